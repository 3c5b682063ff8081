// src/pdf_check.rs

use crate::error::{BridgeError, Result};
use lopdf::Document;
use tracing::info;

/// What we learn about an attachment before sending it for extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfSummary {
    pub pages: usize,
    /// Pages with image XObjects but no fonts. These depend on OCR.
    pub image_only_pages: usize,
}

/// Open the bytes as a PDF and count its pages.
pub fn inspect(file_name: &str, pdf_bytes: &[u8]) -> Result<PdfSummary> {
    let doc = Document::load_mem(pdf_bytes).map_err(|e| BridgeError::InvalidPdf {
        file: file_name.to_string(),
        reason: format!("failed to parse PDF: {e}"),
    })?;

    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(BridgeError::InvalidPdf {
            file: file_name.to_string(),
            reason: "PDF has no pages".into(),
        });
    }

    let image_only_pages = pages
        .values()
        .filter(|object_id| is_image_only(&doc, **object_id))
        .count();

    info!(
        filename = %file_name,
        pages = pages.len(),
        image_only = image_only_pages,
        "PDF inspected"
    );

    Ok(PdfSummary {
        pages: pages.len(),
        image_only_pages,
    })
}

fn is_image_only(doc: &Document, object_id: lopdf::ObjectId) -> bool {
    let Ok(page_dict) = doc.get_object(object_id).and_then(|o| o.as_dict()) else {
        return false;
    };

    let resource = |name: &[u8]| {
        page_dict
            .get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok())
            .and_then(|res| res.get(name).ok())
            .and_then(|f| doc.dereference(f).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok())
            .is_some_and(|dict| !dict.is_empty())
    };

    resource(b"XObject") && !resource(b"Font")
}
