// src/pipeline.rs

use crate::board::{Attachment, BoardApi};
use crate::config::BoardConfig;
use crate::error::{BridgeError, Result};
use crate::extraction::FieldExtractor;
use crate::grouping;
use crate::pdf_check;
use crate::writer::{DestinationWriter, WrittenDocument};
use tracing::{Instrument, error, info, info_span, warn};

/// What one run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub item_id: String,
    pub files: usize,
    pub skipped_files: usize,
    /// Page count across the accepted PDFs.
    pub pdf_pages: usize,
    /// PDF pages with images but no text layer.
    pub image_only_pages: usize,
    /// Page results returned by the extractor.
    pub pages: usize,
    pub documents: Vec<WrittenDocument>,
}

/// PDFs accepted for extraction plus what the checks found.
#[derive(Debug, Default)]
struct CollectedFiles {
    attachments: Vec<Attachment>,
    skipped: usize,
    pdf_pages: usize,
    image_only_pages: usize,
}

/// The board item whose status change triggered a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceItem {
    pub board_id: Option<String>,
    pub item_id: String,
}

/// Run the pipeline for one item and report the outcome on its status column.
pub async fn run(
    board: &dyn BoardApi,
    extractor: &dyn FieldExtractor,
    cfg: &BoardConfig,
    source: &SourceItem,
) -> Result<RunSummary> {
    let item_id = source.item_id.as_str();
    let span = info_span!("run", item_id = %item_id);
    async {
        let outcome = process_item(board, extractor, cfg, item_id).await;

        let label = match &outcome {
            Ok(summary) => {
                info!(
                    files = summary.files,
                    skipped_files = summary.skipped_files,
                    pdf_pages = summary.pdf_pages,
                    image_only_pages = summary.image_only_pages,
                    pages = summary.pages,
                    documents = summary.documents.len(),
                    "Run complete"
                );
                cfg.done_label.as_deref()
            }
            Err(e) => {
                error!(error = %e, "Run failed");
                cfg.error_label.as_deref()
            }
        };

        if let (Some(label), Some(board_id)) = (label, source.board_id.as_deref()) {
            if let Err(e) = board
                .set_status(board_id, item_id, &cfg.trigger_column_id, label)
                .await
            {
                warn!(error = %e, label = %label, "Could not update source item status");
            }
        }

        outcome
    }
    .instrument(span)
    .await
}

/// Download, check, extract, group and write back the PDFs of one item.
pub async fn process_item(
    board: &dyn BoardApi,
    extractor: &dyn FieldExtractor,
    cfg: &BoardConfig,
    item_id: &str,
) -> Result<RunSummary> {
    let collected = collect_attachments(board, item_id).await?;
    let attachments = collected.attachments;
    if attachments.is_empty() {
        return Err(BridgeError::NoAttachments(item_id.to_string()));
    }

    let extracted = extractor.extract(&attachments).await?;
    let pages = grouping::pages_from_files(&extracted);
    let documents = grouping::group_pages(&pages);
    info!(
        pages = pages.len(),
        documents = documents.len(),
        "Pages grouped into documents"
    );

    let writer = DestinationWriter::new(board, cfg);
    let mut written = Vec::with_capacity(documents.len());
    for doc in &documents {
        written.push(writer.write(doc, &attachments).await?);
    }

    Ok(RunSummary {
        item_id: item_id.to_string(),
        files: attachments.len(),
        skipped_files: collected.skipped,
        pdf_pages: collected.pdf_pages,
        image_only_pages: collected.image_only_pages,
        pages: pages.len(),
        documents: written,
    })
}

/// Fetch the item's PDF assets, keeping only those that open as PDFs.
async fn collect_attachments(board: &dyn BoardApi, item_id: &str) -> Result<CollectedFiles> {
    let assets = board.item_assets(item_id).await?;
    let mut collected = CollectedFiles::default();

    for asset in assets.iter().filter(|a| a.is_pdf()) {
        let data = board.download(asset).await?;
        let pdf = match pdf_check::inspect(&asset.name, &data) {
            Ok(pdf) => pdf,
            Err(e) => {
                warn!(error = %e, "Skipping attachment");
                collected.skipped += 1;
                continue;
            }
        };
        collected.pdf_pages += pdf.pages;
        collected.image_only_pages += pdf.image_only_pages;

        // Names key uploads and re-attachment, so they must stay unique.
        let name = if collected.attachments.iter().any(|a| a.name == asset.name) {
            format!("{}_{}", asset.id, asset.name)
        } else {
            asset.name.clone()
        };
        collected.attachments.push(Attachment { name, data });
    }

    info!(
        assets = assets.len(),
        pdfs = collected.attachments.len(),
        skipped = collected.skipped,
        pdf_pages = collected.pdf_pages,
        "Attachments collected"
    );
    Ok(collected)
}
