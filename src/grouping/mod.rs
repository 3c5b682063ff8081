// src/grouping/mod.rs

mod fields;
mod line_items;

pub use fields::{ExtractedFile, ExtractedPage, PageRecord, pages_from_files};
pub use line_items::{LineItem, normalize};

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// Audit entry for a page folded into a document.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub page_type: String,
    pub file_name: String,
    pub fields: Map<String, Value>,
}

/// A logical invoice reassembled from one or more pages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InvoiceDocument {
    pub invoice_number: String,
    pub document_type: String,
    pub supplier_name: String,
    pub terms: String,
    pub document_date: String,
    pub due_date: String,
    pub total_amount: f64,
    pub tax_amount: f64,
    pub items: Vec<LineItem>,
    pub pages: Vec<AuditPage>,
}

impl InvoiceDocument {
    fn new(invoice_number: &str) -> Self {
        Self {
            invoice_number: invoice_number.to_string(),
            ..Self::default()
        }
    }

    /// Distinct source files in first-seen order.
    pub fn file_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for page in &self.pages {
            if !names.contains(&page.file_name.as_str()) {
                names.push(&page.file_name);
            }
        }
        names
    }

    fn fold(&mut self, page: &PageRecord) {
        self.pages.push(AuditPage {
            page_type: page.page_type.clone(),
            file_name: page.file_name.clone(),
            fields: page.fields.clone(),
        });

        let authoritative = page.is_main();

        if authoritative || self.supplier_name.is_empty() {
            overwrite_text(&mut self.document_type, &page.document_type);
            overwrite_text(&mut self.supplier_name, &page.supplier);
            overwrite_text(&mut self.terms, &page.terms);
            overwrite_text(&mut self.document_date, &page.document_date);
            overwrite_text(&mut self.due_date, &page.due_date);
            overwrite_amount(&mut self.total_amount, page.total_amount);
            overwrite_amount(&mut self.tax_amount, page.tax_amount);
        }

        let items = normalize(&page.raw_line_items);
        if !items.is_empty() && (authoritative || self.items.is_empty()) {
            debug!(
                invoice = %self.invoice_number,
                file = %page.file_name,
                replaced = self.items.len(),
                items = items.len(),
                "Line items taken from page"
            );
            self.items = items;
        }
    }
}

fn overwrite_text(slot: &mut String, value: &str) {
    if !value.is_empty() {
        *slot = value.to_string();
    }
}

fn overwrite_amount(slot: &mut f64, value: f64) {
    if value != 0.0 {
        *slot = value;
    }
}

/// Group pages into invoice documents keyed by invoice number.
///
/// Pages are folded left to right. A page tagged `main` may overwrite header
/// fields and replace the line items; any other page only fills a document
/// that has no supplier (headers) or no items yet. Pages without a usable
/// invoice number are dropped. Output follows first appearance of each key.
pub fn group_pages(pages: &[PageRecord]) -> Vec<InvoiceDocument> {
    let mut documents: Vec<InvoiceDocument> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for page in pages {
        if !page.has_invoice_number() {
            debug!(file = %page.file_name, invoice = %page.invoice_number, "Skipping page without invoice number");
            continue;
        }

        let slot = *index.entry(page.invoice_number.as_str()).or_insert_with(|| {
            documents.push(InvoiceDocument::new(&page.invoice_number));
            documents.len() - 1
        });
        documents[slot].fold(page);
    }

    documents
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group_files(files: &[ExtractedFile]) -> Vec<InvoiceDocument> {
        group_pages(&pages_from_files(files))
    }

    fn file(name: &str, pages: Vec<Value>) -> ExtractedFile {
        ExtractedFile {
            original_file_name: name.to_string(),
            documents: pages
                .into_iter()
                .map(|fields| ExtractedPage {
                    fields: fields.as_object().cloned().unwrap_or_default(),
                })
                .collect(),
        }
    }

    fn fields(invoice: &str, page_type: &str, supplier: &str, total: &str, items: Value) -> Value {
        json!({
            "0": {"value": invoice},
            "1": {"value": page_type},
            "3": {"value": supplier},
            "7": {"value": items},
            "8": {"value": total}
        })
    }

    #[test]
    fn test_two_file_scenario() {
        let files = vec![
            file("a.pdf", vec![fields("INV-100", "cover", "Acme", "$100", json!(null))]),
            file("b.pdf", vec![fields("INV-100", "main", "", "$150", json!([["X", 10, 2]]))]),
        ];
        let docs = group_files(&files);
        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc.invoice_number, "INV-100");
        assert_eq!(doc.supplier_name, "Acme");
        assert_eq!(doc.total_amount, 150.0);
        assert_eq!(
            doc.items,
            vec![LineItem {
                item_number: "X".into(),
                description: String::new(),
                quantity: 2.0,
                unit_cost: 10.0,
                amount: 20.0,
            }]
        );
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.file_names(), ["a.pdf", "b.pdf"]);
    }

    #[test]
    fn test_sentinel_pages_skipped() {
        let files = vec![file(
            "a.pdf",
            vec![
                fields("", "main", "S", "1", json!([["A", 1, 1]])),
                fields("unknown", "main", "S", "1", json!(null)),
                fields("none", "main", "S", "1", json!(null)),
                fields("INV-1", "main", "S", "1", json!(null)),
            ],
        )];
        let docs = group_files(&files);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].pages.len(), 1);
        assert!(docs[0].items.is_empty());
    }

    #[test]
    fn test_keys_unique_in_first_seen_order() {
        let files = vec![
            file(
                "a.pdf",
                vec![
                    fields("B", "", "", "", json!(null)),
                    fields("A", "", "", "", json!(null)),
                ],
            ),
            file(
                "b.pdf",
                vec![
                    fields("B", "", "", "", json!(null)),
                    fields("C", "", "", "", json!(null)),
                ],
            ),
        ];
        let docs = group_files(&files);
        let keys: Vec<_> = docs.iter().map(|d| d.invoice_number.as_str()).collect();
        assert_eq!(keys, ["B", "A", "C"]);
        let page_counts: Vec<_> = docs.iter().map(|d| d.pages.len()).collect();
        assert_eq!(page_counts, [2, 1, 1]);
    }

    #[test]
    fn test_audit_trail_records_every_page() {
        let files = vec![file(
            "a.pdf",
            vec![
                fields("INV-2", "main", "Acme", "$10", json!([["A", 1, 1]])),
                fields("INV-2", "continuation", "Other", "$99", json!([["B", 1, 1]])),
            ],
        )];
        let docs = group_files(&files);
        let doc = &docs[0];
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[1].page_type, "continuation");
        assert_eq!(doc.pages[1].fields["3"]["value"], "Other");
        // The continuation page was rejected for both headers and items.
        assert_eq!(doc.supplier_name, "Acme");
        assert_eq!(doc.total_amount, 10.0);
        assert_eq!(doc.items[0].item_number, "A");
    }

    #[test]
    fn test_main_page_partial_header_override() {
        let first = json!({
            "0": {"value": "INV-3"},
            "1": {"value": "other"},
            "2": {"value": "Invoice"},
            "3": {"value": "Old Supplier"},
            "4": {"value": "Net 15"},
            "5": {"value": "2024-01-01"},
            "6": {"value": "2024-01-31"},
            "8": {"value": "$10"},
            "9": {"value": "$1"}
        });
        let second = json!({
            "0": {"value": "INV-3"},
            "1": {"value": "main"},
            "2": {"value": "Credit Note"},
            "3": {"value": "New Supplier"},
            "4": {"value": ""},
            "6": {"value": ""},
            "8": {"value": "$20"}
        });
        let third = json!({
            "0": {"value": "INV-3"},
            "1": {"value": "continuation"},
            "2": {"value": "Statement"},
            "6": {"value": "2024-02-28"}
        });
        let docs = group_files(&[file("a.pdf", vec![first, second, third])]);
        let doc = &docs[0];
        assert_eq!(doc.document_type, "Credit Note");
        assert_eq!(doc.due_date, "2024-01-31");
        assert_eq!(doc.supplier_name, "New Supplier");
        assert_eq!(doc.terms, "Net 15");
        assert_eq!(doc.document_date, "2024-01-01");
        assert_eq!(doc.total_amount, 20.0);
        assert_eq!(doc.tax_amount, 1.0);
    }

    #[test]
    fn test_later_main_items_replace_not_merge() {
        let files = vec![file(
            "a.pdf",
            vec![
                fields("INV-4", "main", "S", "", json!([["A", 1, 1], ["B", 1, 1]])),
                fields("INV-4", "main", "S", "", json!([["C", 2, 3]])),
            ],
        )];
        let docs = group_files(&files);
        let numbers: Vec<_> = docs[0].items.iter().map(|i| i.item_number.as_str()).collect();
        assert_eq!(numbers, ["C"]);
    }

    #[test]
    fn test_first_available_items_without_main() {
        let files = vec![file(
            "a.pdf",
            vec![
                fields("INV-5", "", "", "", json!([])),
                fields("INV-5", "", "", "", json!([["first", 1, 1]])),
                fields("INV-5", "", "", "", json!([["second", 1, 1]])),
            ],
        )];
        let docs = group_files(&files);
        assert_eq!(docs[0].items.len(), 1);
        assert_eq!(docs[0].items[0].item_number, "first");
        assert_eq!(docs[0].pages.len(), 3);
    }

    #[test]
    fn test_headers_fill_until_supplier_known() {
        let files = vec![file(
            "a.pdf",
            vec![
                fields("INV-6", "", "", "$5", json!(null)),
                fields("INV-6", "", "Acme", "$7", json!(null)),
                fields("INV-6", "", "Beta", "$9", json!(null)),
            ],
        )];
        let docs = group_files(&files);
        assert_eq!(docs[0].supplier_name, "Acme");
        assert_eq!(docs[0].total_amount, 7.0);
    }

    #[test]
    fn test_same_invoice_across_files_merges() {
        let files = vec![
            file("a.pdf", vec![fields("INV-7", "main", "Acme", "$1", json!(null))]),
            file("b.pdf", vec![fields("INV-7", "", "", "", json!([["Q", 1, 1]]))]),
        ];
        let docs = group_files(&files);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].items.len(), 1);
        assert_eq!(docs[0].file_names(), ["a.pdf", "b.pdf"]);
    }

    #[test]
    fn test_page_type_and_sentinels_match_exactly() {
        let files = vec![file(
            "a.pdf",
            vec![
                fields("UNKNOWN", "main", "Upper", "$5", json!(null)),
                fields("INV-8", "main", "Acme", "$10", json!([["A", 1, 1]])),
                fields("INV-8", "MAIN", "Other", "$99", json!([["B", 1, 1]])),
            ],
        )];
        let docs = group_files(&files);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].invoice_number, "UNKNOWN");
        assert_eq!(docs[1].supplier_name, "Acme");
        assert_eq!(docs[1].total_amount, 10.0);
        assert_eq!(docs[1].items[0].item_number, "A");
    }

    #[test]
    fn test_empty_input() {
        assert!(group_pages(&[]).is_empty());
    }
}
