use super::line_items::RawTable;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;

// Field indices assigned by the extractor configuration. These keys are a
// fixed contract with the upstream deployment and must not be renumbered.
pub const INVOICE_NUMBER: &str = "0";
pub const PAGE_TYPE: &str = "1";
pub const DOCUMENT_TYPE: &str = "2";
pub const SUPPLIER: &str = "3";
pub const TERMS: &str = "4";
pub const DOCUMENT_DATE: &str = "5";
pub const DUE_DATE: &str = "6";
pub const LINE_ITEMS: &str = "7";
pub const TOTAL_AMOUNT: &str = "8";
pub const TAX_AMOUNT: &str = "9";

/// Invoice numbers the extractor emits when it could not read one.
const SENTINEL_INVOICE_NUMBERS: &[&str] = &["unknown", "none"];

static LEADING_DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?").unwrap()
});

static NON_CURRENCY_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9.\-]").unwrap());

/// One uploaded file as returned by the extraction service.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedFile {
    pub original_file_name: String,
    #[serde(default)]
    pub documents: Vec<ExtractedPage>,
}

/// One page-level result: field index -> `{ "value": ... }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedPage {
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Typed view of a single extracted page.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub file_name: String,
    pub invoice_number: String,
    pub page_type: String,
    pub document_type: String,
    pub supplier: String,
    pub terms: String,
    pub document_date: String,
    pub due_date: String,
    pub total_amount: f64,
    pub tax_amount: f64,
    pub raw_line_items: RawTable,
    /// The untouched field map, kept for the audit trail.
    pub fields: Map<String, Value>,
}

impl PageRecord {
    pub fn from_extracted(file_name: &str, page: &ExtractedPage) -> Self {
        let fields = &page.fields;
        Self {
            file_name: file_name.to_string(),
            invoice_number: field_text(fields, INVOICE_NUMBER),
            page_type: field_text(fields, PAGE_TYPE),
            document_type: field_text(fields, DOCUMENT_TYPE),
            supplier: field_text(fields, SUPPLIER),
            terms: field_text(fields, TERMS),
            document_date: field_text(fields, DOCUMENT_DATE),
            due_date: field_text(fields, DUE_DATE),
            total_amount: field_value(fields, TOTAL_AMOUNT).map_or(0.0, parse_currency),
            tax_amount: field_value(fields, TAX_AMOUNT).map_or(0.0, parse_currency),
            raw_line_items: RawTable::from_value(field_value(fields, LINE_ITEMS)),
            fields: fields.clone(),
        }
    }

    /// A page without a usable invoice number cannot be placed in any document.
    pub fn has_invoice_number(&self) -> bool {
        let key = self.invoice_number.trim();
        !key.is_empty() && !SENTINEL_INVOICE_NUMBERS.contains(&key)
    }

    pub fn is_main(&self) -> bool {
        self.page_type == "main"
    }
}

/// Flatten files into page records, preserving file order then page order.
pub fn pages_from_files(files: &[ExtractedFile]) -> Vec<PageRecord> {
    files
        .iter()
        .flat_map(|file| {
            file.documents
                .iter()
                .map(|page| PageRecord::from_extracted(&file.original_file_name, page))
        })
        .collect()
}

fn field_value<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields
        .get(key)
        .and_then(|slot| slot.get("value"))
        .filter(|v| !v.is_null())
}

fn field_text(fields: &Map<String, Value>, key: &str) -> String {
    field_value(fields, key).map(value_text).unwrap_or_default()
}

/// Stringify a scalar JSON value. Containers and null become empty.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        // Floats print like integers when integral: 100.0 -> "100".
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => f.to_string(),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

/// Parse the leading decimal number of a string, `0` when there is none.
pub fn parse_decimal_str(raw: &str) -> f64 {
    LEADING_DECIMAL
        .find(raw.trim())
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

pub fn parse_decimal(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
        Value::String(s) => parse_decimal_str(s),
        _ => 0.0,
    }
}

/// Currency strings keep only digits, `.` and `-` before parsing.
pub fn parse_currency_str(raw: &str) -> f64 {
    parse_decimal_str(&NON_CURRENCY_CHARS.replace_all(raw, ""))
}

pub fn parse_currency(value: &Value) -> f64 {
    match value {
        Value::String(s) => parse_currency_str(s),
        other => parse_decimal(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(fields: Value) -> ExtractedPage {
        ExtractedPage {
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_currency_cleaning() {
        assert_eq!(parse_currency_str("$1,234.56"), 1234.56);
        assert_eq!(parse_currency_str("abc"), 0.0);
        assert_eq!(parse_currency_str("-$12.50"), -12.5);
        assert_eq!(parse_currency_str("-"), 0.0);
        assert_eq!(parse_currency(&json!(99.5)), 99.5);
    }

    #[test]
    fn test_decimal_prefix_parse() {
        assert_eq!(parse_decimal_str(" 12.5 "), 12.5);
        assert_eq!(parse_decimal_str("3 pcs"), 3.0);
        assert_eq!(parse_decimal_str("pcs 3"), 0.0);
        assert_eq!(parse_decimal(&json!("7")), 7.0);
        assert_eq!(parse_decimal(&json!(null)), 0.0);
        assert_eq!(parse_decimal(&json!([1])), 0.0);
    }

    #[test]
    fn test_page_record_from_numeric_fields() {
        let p = page(json!({
            "0": {"value": " INV-1 "},
            "1": {"value": "main"},
            "2": {"value": "Invoice"},
            "3": {"value": "Acme"},
            "4": {"value": "Net 30"},
            "5": {"value": "2024-03-01"},
            "6": {"value": "2024-03-31"},
            "7": {"value": [["A1", 5, 2]]},
            "8": {"value": "$1,000.00"},
            "9": {"value": 80}
        }));
        let rec = PageRecord::from_extracted("a.pdf", &p);
        assert_eq!(rec.invoice_number, "INV-1");
        assert!(rec.is_main());
        assert_eq!(rec.supplier, "Acme");
        assert_eq!(rec.due_date, "2024-03-31");
        assert_eq!(rec.total_amount, 1000.0);
        assert_eq!(rec.tax_amount, 80.0);
        assert_eq!(rec.file_name, "a.pdf");
        assert!(matches!(rec.raw_line_items, RawTable::Rows(ref rows) if rows.len() == 1));
        assert_eq!(rec.fields.len(), 10);
    }

    #[test]
    fn test_missing_fields_default() {
        let rec = PageRecord::from_extracted("b.pdf", &page(json!({"1": {"value": null}})));
        assert_eq!(rec.invoice_number, "");
        assert_eq!(rec.page_type, "");
        assert_eq!(rec.total_amount, 0.0);
        assert!(matches!(rec.raw_line_items, RawTable::Empty));
        assert!(!rec.has_invoice_number());
    }

    #[test]
    fn test_sentinel_invoice_numbers() {
        for raw in ["", "  ", "unknown", "none"] {
            let rec = PageRecord::from_extracted("c.pdf", &page(json!({"0": {"value": raw}})));
            assert!(!rec.has_invoice_number(), "{raw:?} should be skipped");
        }
        for raw in ["Unknown", "UNKNOWN", "None"] {
            let rec = PageRecord::from_extracted("c.pdf", &page(json!({"0": {"value": raw}})));
            assert!(rec.has_invoice_number(), "{raw:?} is a real key");
        }
        let rec = PageRecord::from_extracted("c.pdf", &page(json!({"0": {"value": 4411}})));
        assert!(rec.has_invoice_number());
        assert_eq!(rec.invoice_number, "4411");
    }

    #[test]
    fn test_main_page_type_is_exact() {
        for raw in ["MAIN", "Main", "mainline"] {
            let rec = PageRecord::from_extracted("d.pdf", &page(json!({"1": {"value": raw}})));
            assert!(!rec.is_main(), "{raw:?} is not main");
        }
    }

    #[test]
    fn test_value_text_integral_floats() {
        assert_eq!(value_text(&json!(100.0)), "100");
        assert_eq!(value_text(&json!(12.5)), "12.5");
        assert_eq!(value_text(&json!(4411)), "4411");
        assert_eq!(value_text(&json!(-3)), "-3");
        assert_eq!(value_text(&json!(" A1 ")), "A1");
        assert_eq!(value_text(&json!([1])), "");
    }

    #[test]
    fn test_pages_from_files_keeps_order() {
        let files = vec![
            ExtractedFile {
                original_file_name: "one.pdf".into(),
                documents: vec![
                    page(json!({"0": {"value": "A"}})),
                    page(json!({"0": {"value": "B"}})),
                ],
            },
            ExtractedFile {
                original_file_name: "two.pdf".into(),
                documents: vec![page(json!({"0": {"value": "C"}}))],
            },
        ];
        let pages = pages_from_files(&files);
        let keys: Vec<_> = pages.iter().map(|p| p.invoice_number.as_str()).collect();
        assert_eq!(keys, ["A", "B", "C"]);
        assert_eq!(pages[2].file_name, "two.pdf");
    }
}
