//! HTTP surface: subscription handshake and status-change events.

use crate::board::BoardApi;
use crate::config::BoardConfig;
use crate::extraction::FieldExtractor;
use crate::pipeline::{self, SourceItem};
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Bound on remembered deliveries before the set is reset.
const MAX_SEEN_EVENTS: usize = 10_000;

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    pub challenge: Option<String>,
    pub event: Option<WebhookEvent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(default)]
    pub pulse_id: Value,
    #[serde(default)]
    pub board_id: Value,
    #[serde(default)]
    pub column_id: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub trigger_uuid: String,
    #[serde(default)]
    pub trigger_time: String,
}

impl WebhookEvent {
    pub fn item_id(&self) -> Option<String> {
        id_text(&self.pulse_id)
    }

    pub fn board_id(&self) -> Option<String> {
        id_text(&self.board_id)
    }

    /// New status label text, if the event carries one.
    pub fn label(&self) -> Option<&str> {
        self.value.pointer("/label/text").and_then(Value::as_str)
    }

    /// Stable key for recognising redelivery of the same event.
    pub fn delivery_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.trigger_uuid.as_bytes());
        hasher.update(self.pulse_id.to_string().as_bytes());
        hasher.update(self.trigger_time.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Board ids arrive as numbers or strings depending on the event type.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WebhookReply {
    Challenge { challenge: String },
    Status { status: &'static str },
}

/// What to do with an incoming event.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Start(SourceItem),
    Ignore,
    Duplicate,
}

#[derive(Clone)]
pub struct AppState {
    pub board: Arc<dyn BoardApi>,
    pub extractor: Arc<dyn FieldExtractor>,
    pub cfg: Arc<BoardConfig>,
    seen: Arc<Mutex<HashSet<String>>>,
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

impl AppState {
    pub fn new(
        board: Arc<dyn BoardApi>,
        extractor: Arc<dyn FieldExtractor>,
        cfg: Arc<BoardConfig>,
    ) -> Self {
        Self {
            board,
            extractor,
            cfg,
            seen: Arc::new(Mutex::new(HashSet::new())),
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn decide(&self, event: &WebhookEvent) -> Decision {
        if event.column_id != self.cfg.trigger_column_id {
            return Decision::Ignore;
        }
        if event.label() != Some(self.cfg.trigger_label.as_str()) {
            return Decision::Ignore;
        }
        let Some(item_id) = event.item_id() else {
            warn!("Status event without an item id");
            return Decision::Ignore;
        };

        let key = event.delivery_key();
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if seen.len() >= MAX_SEEN_EVENTS {
            seen.clear();
        }
        if !seen.insert(key) {
            return Decision::Duplicate;
        }
        Decision::Start(SourceItem {
            board_id: event.board_id().or_else(|| self.cfg.source_board_id.clone()),
            item_id,
        })
    }

    /// Run the pipeline in the background. Runs never overlap.
    fn spawn_run(&self, source: SourceItem) {
        let state = self.clone();
        tokio::spawn(async move {
            let _guard = state.run_lock.lock().await;
            // `run` logs the outcome and reports it on the item.
            let _ = pipeline::run(
                state.board.as_ref(),
                state.extractor.as_ref(),
                &state.cfg,
                &source,
            )
            .await;
        });
    }
}

pub async fn health_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Acknowledge immediately; any run happens after the response.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Json<WebhookReply> {
    if let Some(challenge) = payload.challenge {
        info!("Webhook challenge received");
        return Json(WebhookReply::Challenge { challenge });
    }

    let Some(event) = payload.event else {
        return Json(WebhookReply::Status { status: "ignored" });
    };

    let status = match state.decide(&event) {
        Decision::Start(source) => {
            info!(item_id = %source.item_id, board_id = ?source.board_id, "Status change accepted");
            state.spawn_run(source);
            "accepted"
        }
        Decision::Duplicate => {
            info!(key = %event.delivery_key(), "Duplicate delivery ignored");
            "duplicate"
        }
        Decision::Ignore => "ignored",
    };
    Json(WebhookReply::Status { status })
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhook", post(handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(addr: &str, state: AppState) -> Result<(), std::io::Error> {
    info!(addr = %addr, "Starting webhook server");
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
