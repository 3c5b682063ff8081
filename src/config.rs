use crate::error::{BridgeError, Result};
use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub board: BoardConfig,
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoardConfig {
    #[serde(default = "default_board_api_url")]
    pub api_url: String,
    #[serde(default = "default_board_file_api_url")]
    pub file_api_url: String,
    #[serde(default)]
    pub api_token: String,
    pub destination_board_id: String,
    pub destination_group_id: Option<String>,
    /// Used when an event does not name its board, and for one-shot runs.
    pub source_board_id: Option<String>,
    pub trigger_column_id: String,
    pub trigger_label: String,
    pub done_label: Option<String>,
    pub error_label: Option<String>,
    pub file_column_id: String,
    #[serde(default)]
    pub columns: Vec<ColumnMapping>,
    #[serde(default)]
    pub subitem_columns: Vec<ColumnMapping>,
}

fn default_board_api_url() -> String {
    "https://api.monday.com/v2".to_string()
}

fn default_board_file_api_url() -> String {
    "https://api.monday.com/v2/file".to_string()
}

/// Maps one output field to a destination column.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ColumnMapping {
    pub field: String,
    pub id: String,
    #[serde(default)]
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    #[default]
    Text,
    Numbers,
    Date,
    Dropdown,
    Status,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    pub deployment_id: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_poll_attempts() -> u32 {
    60
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut cfg = Self::parse(&content)?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Secrets may live in the environment instead of the file.
    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("BOARD_API_TOKEN") {
            self.board.api_token = token;
        }
        if let Ok(token) = std::env::var("EXTRACTION_API_TOKEN") {
            self.extraction.api_token = token;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.board.api_token.is_empty() {
            return Err(BridgeError::Config(
                "board.api_token or BOARD_API_TOKEN required".into(),
            ));
        }
        if self.extraction.api_token.is_empty() {
            return Err(BridgeError::Config(
                "extraction.api_token or EXTRACTION_API_TOKEN required".into(),
            ));
        }
        if self.extraction.max_poll_attempts == 0 {
            return Err(BridgeError::Config(
                "extraction.max_poll_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[board]
api_token = "board-secret"
destination_board_id = "111"
trigger_column_id = "status"
trigger_label = "Process"
done_label = "Done"
file_column_id = "files"

[[board.columns]]
field = "supplier_name"
id = "text_supplier"

[[board.columns]]
field = "total_amount"
id = "numbers_total"
kind = "numbers"

[[board.subitem_columns]]
field = "quantity"
id = "numbers_qty"
kind = "numbers"

[extraction]
base_url = "https://extract.example.com/api"
api_token = "extract-secret"
deployment_id = "dep-1"
"#;

    #[test]
    fn test_parse_with_defaults() {
        let cfg = Config::parse(SAMPLE).unwrap();
        assert_eq!(cfg.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.board.api_url, "https://api.monday.com/v2");
        assert_eq!(cfg.board.done_label.as_deref(), Some("Done"));
        assert!(cfg.board.error_label.is_none());
        assert_eq!(cfg.board.columns.len(), 2);
        assert_eq!(cfg.board.columns[0].kind, ColumnKind::Text);
        assert_eq!(cfg.board.columns[1].kind, ColumnKind::Numbers);
        assert_eq!(cfg.extraction.poll_interval_secs, 5);
        assert_eq!(cfg.extraction.max_poll_attempts, 60);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_missing_token_rejected() {
        let mut cfg = Config::parse(SAMPLE).unwrap();
        cfg.board.api_token.clear();
        assert!(matches!(cfg.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_unknown_column_kind_rejected() {
        let bad = SAMPLE.replace(r#"kind = "numbers""#, r#"kind = "people""#);
        assert!(Config::parse(&bad).is_err());
    }
}
