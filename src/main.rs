mod board;
mod config;
mod error;
mod extraction;
mod grouping;
mod pdf_check;
mod pipeline;
mod webhook;
mod writer;

use board::BoardClient;
use extraction::ExtractionClient;
use pipeline::SourceItem;
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config/bridge.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = env::var("BRIDGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::Config::load(&config_path)?;
    info!(path = %config_path, board = %cfg.board.destination_board_id, "Config loaded");

    let board = Arc::new(BoardClient::new(&cfg.board)?);
    let extractor = Arc::new(ExtractionClient::new(&cfg.extraction)?);

    // One-shot mode: process a single item and exit.
    if let Ok(item_id) = env::var("RUN_ITEM") {
        let source = SourceItem {
            board_id: cfg.board.source_board_id.clone(),
            item_id,
        };
        let summary = pipeline::run(board.as_ref(), extractor.as_ref(), &cfg.board, &source).await?;
        info!(
            item_id = %summary.item_id,
            files = summary.files,
            skipped_files = summary.skipped_files,
            pdf_pages = summary.pdf_pages,
            "Item processed"
        );
        for doc in &summary.documents {
            info!(
                invoice = %doc.invoice_number,
                item_id = %doc.item_id,
                subitems = doc.subitems_created,
                files = doc.files_attached,
                "Written"
            );
        }
        return Ok(());
    }

    let state = webhook::AppState::new(board, extractor, Arc::new(cfg.board.clone()));
    webhook::start_server(&cfg.server.bind_addr, state).await?;

    Ok(())
}
