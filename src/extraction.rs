// src/extraction.rs

use crate::board::Attachment;
use crate::config::ExtractionConfig;
use crate::error::{BridgeError, Result};
use crate::grouping::ExtractedFile;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use urlencoding::encode;

/// Source of per-page field data for a set of uploaded PDFs.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(&self, files: &[Attachment]) -> Result<Vec<ExtractedFile>>;
}

#[derive(Debug, Serialize)]
struct CreateBatchRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedResource {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
}

#[derive(Debug, Serialize)]
struct StartRunRequest<'a> {
    batch_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RunState {
    status: String,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunResults {
    #[serde(default)]
    files: Vec<ExtractedFile>,
}

/// Lifecycle of an asynchronous extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Unrecognized states are treated as still in progress.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "QUEUED" => RunStatus::Pending,
            "COMPLETE" | "COMPLETED" | "SUCCEEDED" => RunStatus::Complete,
            "FAILED" | "ERROR" => RunStatus::Failed,
            "CANCELLED" | "CANCELED" | "STOPPED" => RunStatus::Cancelled,
            _ => RunStatus::Running,
        }
    }
}

/// Ids may come back as JSON numbers or strings.
fn id_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected id: {other}"))),
    }
}

/// Ids and file names are escaped so names with `#`, `?` or spaces stay in the path.
fn upload_path(batch_id: &str, file_name: &str) -> String {
    format!("/batches/{}/files/{}", encode(batch_id), encode(file_name))
}

/// HTTP client for the batch/run extraction service.
pub struct ExtractionClient {
    client: Client,
    base_url: String,
    api_token: String,
    deployment_id: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl ExtractionClient {
    pub fn new(cfg: &ExtractionConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        info!(url = %cfg.base_url, deployment = %cfg.deployment_id, "Using extraction service");
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_token: cfg.api_token.clone(),
            deployment_id: cfg.deployment_id.clone(),
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
            max_poll_attempts: cfg.max_poll_attempts,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Api {
                service: "extraction",
                status,
                body,
            });
        }
        Ok(response)
    }

    async fn create_batch(&self, name: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/batches"))
            .bearer_auth(&self.api_token)
            .json(&CreateBatchRequest { name })
            .send()
            .await?;
        let created: CreatedResource = Self::checked(response).await?.json().await?;
        info!(batch_id = %created.id, "Batch created");
        Ok(created.id)
    }

    async fn upload_file(&self, batch_id: &str, file: &Attachment) -> Result<()> {
        let response = self
            .client
            .put(self.url(&upload_path(batch_id, &file.name)))
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/octet-stream")
            .body(file.data.clone())
            .send()
            .await?;
        Self::checked(response).await?;
        info!(batch_id = %batch_id, filename = %file.name, bytes = file.data.len(), "File uploaded");
        Ok(())
    }

    async fn start_run(&self, batch_id: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url(&format!("/deployments/{}/runs", encode(&self.deployment_id))))
            .bearer_auth(&self.api_token)
            .json(&StartRunRequest { batch_id })
            .send()
            .await?;
        let created: CreatedResource = Self::checked(response).await?.json().await?;
        info!(run_id = %created.id, batch_id = %batch_id, "Extraction run started");
        Ok(created.id)
    }

    async fn run_state(&self, run_id: &str) -> Result<RunState> {
        let response = self
            .client
            .get(self.url(&format!("/runs/{}", encode(run_id))))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    /// Poll at a fixed interval until the run settles or attempts run out.
    async fn wait_for_run(&self, run_id: &str) -> Result<()> {
        for attempt in 1..=self.max_poll_attempts {
            tokio::time::sleep(self.poll_interval).await;
            let state = self.run_state(run_id).await?;
            match RunStatus::parse(&state.status) {
                RunStatus::Complete => {
                    info!(run_id = %run_id, attempt, "Extraction run complete");
                    return Ok(());
                }
                RunStatus::Failed | RunStatus::Cancelled => {
                    warn!(run_id = %run_id, status = %state.status, msg = ?state.msg, "Extraction run did not complete");
                    return Err(BridgeError::ExtractionFailed {
                        run_id: run_id.to_string(),
                        status: state.status,
                    });
                }
                RunStatus::Pending | RunStatus::Running => {
                    debug!(run_id = %run_id, attempt, status = %state.status, "Run in progress");
                }
            }
        }
        Err(BridgeError::PollTimeout {
            run_id: run_id.to_string(),
            attempts: self.max_poll_attempts,
        })
    }

    async fn results(&self, run_id: &str) -> Result<Vec<ExtractedFile>> {
        let response = self
            .client
            .get(self.url(&format!("/runs/{}/results", encode(run_id))))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        let results: RunResults = Self::checked(response).await?.json().await?;
        Ok(results.files)
    }
}

#[async_trait]
impl FieldExtractor for ExtractionClient {
    async fn extract(&self, files: &[Attachment]) -> Result<Vec<ExtractedFile>> {
        let batch_name = files
            .first()
            .map(|f| f.name.as_str())
            .unwrap_or("empty-batch");
        let batch_id = self.create_batch(batch_name).await?;
        for file in files {
            self.upload_file(&batch_id, file).await?;
        }

        let run_id = self.start_run(&batch_id).await?;
        self.wait_for_run(&run_id).await?;

        let extracted = self.results(&run_id).await?;
        info!(
            run_id = %run_id,
            files = extracted.len(),
            pages = extracted.iter().map(|f| f.documents.len()).sum::<usize>(),
            "Extraction results fetched"
        );
        Ok(extracted)
    }
}
