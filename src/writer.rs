use crate::board::{Attachment, BoardApi};
use crate::config::{BoardConfig, ColumnKind, ColumnMapping};
use crate::error::Result;
use crate::grouping::{InvoiceDocument, LineItem};
use serde_json::{Map, Value, json};
use time::Date;
use time::macros::format_description;
use tracing::{Instrument, info, info_span, warn};

/// Outcome of writing one invoice document.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenDocument {
    pub invoice_number: String,
    pub item_id: String,
    pub subitems_created: usize,
    pub subitems_failed: usize,
    pub files_attached: usize,
}

/// Materializes grouped documents as board items with line-item subitems.
pub struct DestinationWriter<'a> {
    board: &'a dyn BoardApi,
    cfg: &'a BoardConfig,
}

impl<'a> DestinationWriter<'a> {
    pub fn new(board: &'a dyn BoardApi, cfg: &'a BoardConfig) -> Self {
        Self { board, cfg }
    }

    /// Create the parent item, then one subitem per line item, then attach
    /// the source PDFs. Only the parent creation is fatal.
    pub async fn write(
        &self,
        doc: &InvoiceDocument,
        sources: &[Attachment],
    ) -> Result<WrittenDocument> {
        let span = info_span!("write", invoice = %doc.invoice_number);
        self.write_document(doc, sources).instrument(span).await
    }

    async fn write_document(
        &self,
        doc: &InvoiceDocument,
        sources: &[Attachment],
    ) -> Result<WrittenDocument> {
        let values = column_values(&self.cfg.columns, |field| header_value(doc, field));
        let item_id = self
            .board
            .create_item(
                &self.cfg.destination_board_id,
                self.cfg.destination_group_id.as_deref(),
                &doc.invoice_number,
                &values,
            )
            .await?;

        let mut written = WrittenDocument {
            invoice_number: doc.invoice_number.clone(),
            item_id: item_id.clone(),
            subitems_created: 0,
            subitems_failed: 0,
            files_attached: 0,
        };

        for item in &doc.items {
            let values =
                column_values(&self.cfg.subitem_columns, |field| line_item_value(item, field));
            match self
                .board
                .create_subitem(&item_id, &item.item_number, &values)
                .await
            {
                Ok(_) => written.subitems_created += 1,
                Err(e) => {
                    warn!(error = %e, item_number = %item.item_number, "Subitem creation failed");
                    written.subitems_failed += 1;
                }
            }
        }

        for name in doc.file_names() {
            let Some(file) = sources.iter().find(|s| s.name == name) else {
                warn!(filename = %name, "Source file not available for re-attachment");
                continue;
            };
            match self
                .board
                .attach_file(&item_id, &self.cfg.file_column_id, file)
                .await
            {
                Ok(()) => written.files_attached += 1,
                Err(e) => warn!(error = %e, filename = %name, "File attachment failed"),
            }
        }

        info!(
            item_id = %item_id,
            subitems = written.subitems_created,
            failed = written.subitems_failed,
            files = written.files_attached,
            "Document written"
        );
        Ok(written)
    }
}

fn header_value(doc: &InvoiceDocument, field: &str) -> Option<String> {
    let value = match field {
        "invoice_number" => doc.invoice_number.clone(),
        "document_type" => doc.document_type.clone(),
        "supplier_name" => doc.supplier_name.clone(),
        "terms" => doc.terms.clone(),
        "document_date" => doc.document_date.clone(),
        "due_date" => doc.due_date.clone(),
        "total_amount" => format_number(doc.total_amount),
        "tax_amount" => format_number(doc.tax_amount),
        _ => return None,
    };
    Some(value)
}

fn line_item_value(item: &LineItem, field: &str) -> Option<String> {
    let value = match field {
        "item_number" => item.item_number.clone(),
        "description" => item.description.clone(),
        "quantity" => format_number(item.quantity),
        "unit_cost" => format_number(item.unit_cost),
        "amount" => format_number(item.amount),
        _ => return None,
    };
    Some(value)
}

fn format_number(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.0}")
    } else {
        rounded.to_string()
    }
}

/// Build the `column_values` object for the mapped columns. Unknown fields
/// and empty values are left out.
fn column_values<F>(columns: &[ColumnMapping], lookup: F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    let mut values = Map::new();
    for column in columns {
        let Some(raw) = lookup(&column.field) else {
            warn!(field = %column.field, column = %column.id, "Unknown field in column mapping");
            continue;
        };
        if raw.is_empty() {
            continue;
        }
        if let Some(formatted) = format_column(column.kind, &raw) {
            values.insert(column.id.clone(), formatted);
        }
    }
    Value::Object(values)
}

fn format_column(kind: ColumnKind, raw: &str) -> Option<Value> {
    match kind {
        ColumnKind::Text | ColumnKind::Numbers => Some(Value::String(raw.to_string())),
        ColumnKind::Date => match normalize_date(raw) {
            Some(date) => Some(json!({ "date": date })),
            None => {
                warn!(value = %raw, "Unrecognized date format; column left empty");
                None
            }
        },
        ColumnKind::Dropdown => Some(json!({ "labels": [raw] })),
        ColumnKind::Status => Some(json!({ "label": raw })),
    }
}

/// Normalize common invoice date spellings to `YYYY-MM-DD`.
/// Slash dates are read month first, dotted dates day first.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    // ISO timestamps keep only their date part.
    let raw = match (raw.get(..10), raw.get(10..11)) {
        (Some(date), Some("T")) => date,
        _ => raw,
    };

    let date = Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .or_else(|_| {
            Date::parse(
                raw,
                format_description!("[month padding:none]/[day padding:none]/[year]"),
            )
        })
        .or_else(|_| {
            Date::parse(
                raw,
                format_description!("[year]/[month padding:none]/[day padding:none]"),
            )
        })
        .or_else(|_| {
            Date::parse(
                raw,
                format_description!("[day padding:none].[month padding:none].[year]"),
            )
        })
        .or_else(|_| {
            Date::parse(
                raw,
                format_description!(
                    "[month repr:long case_sensitive:false] [day padding:none], [year]"
                ),
            )
        })
        .or_else(|_| {
            Date::parse(
                raw,
                format_description!(
                    "[month repr:short case_sensitive:false] [day padding:none], [year]"
                ),
            )
        })
        .ok()?;

    date.format(format_description!("[year]-[month]-[day]")).ok()
}
