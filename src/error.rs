use thiserror::Error;

/// Failures from the I/O side of a run. Grouping itself never fails.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} API error {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("board API returned errors: {0}")]
    GraphQl(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("extraction run {run_id} ended with status {status}")]
    ExtractionFailed { run_id: String, status: String },

    #[error("extraction run {run_id} still running after {attempts} polls")]
    PollTimeout { run_id: String, attempts: u32 },

    #[error("item {0} has no readable PDF attachments")]
    NoAttachments(String),

    #[error("invalid PDF {file}: {reason}")]
    InvalidPdf { file: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
