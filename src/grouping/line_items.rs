use super::fields::{parse_decimal, value_text};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Ordered alias tables: the first key present on a row wins. Extractor schema
// drift is handled by editing these lists.
const ITEM_NUMBER_KEYS: &[&str] = &["Item Number", "item_number", "itemNumber", "number"];
const UNIT_COST_KEYS: &[&str] = &["Unit Cost", "unit_cost", "unitCost", "cost", "price"];
const QUANTITY_KEYS: &[&str] = &["Quantity", "quantity", "qty"];
const DESCRIPTION_KEYS: &[&str] = &["description", "desc"];
const AMOUNT_KEYS: &[&str] = &["amount", "total"];

/// A normalized billable row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub item_number: String,
    pub description: String,
    pub quantity: f64,
    pub unit_cost: f64,
    pub amount: f64,
}

/// Shape of one table row, decided once at ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRow {
    /// `[item_number, unit_cost, quantity, ...]`
    Positional(Vec<Value>),
    Keyed(Map<String, Value>),
    Empty,
}

/// The line-item payload of a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RawTable {
    #[default]
    Empty,
    Rows(Vec<RawRow>),
}

impl RawRow {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Array(cells) => RawRow::Positional(cells.clone()),
            Value::Object(map) => RawRow::Keyed(map.clone()),
            _ => RawRow::Empty,
        }
    }

    fn normalize(&self) -> Option<LineItem> {
        let item = match self {
            RawRow::Positional(cells) => {
                let cell = |i: usize| cells.get(i);
                let unit_cost = cell(1).map_or(0.0, parse_decimal);
                let quantity = cell(2).map_or(0.0, parse_decimal);
                LineItem {
                    item_number: cell(0).map(value_text).unwrap_or_default(),
                    description: String::new(),
                    quantity,
                    unit_cost,
                    amount: quantity * unit_cost,
                }
            }
            RawRow::Keyed(map) => {
                let unit_cost = lookup(map, UNIT_COST_KEYS).map_or(0.0, parse_decimal);
                let quantity = lookup(map, QUANTITY_KEYS).map_or(0.0, parse_decimal);
                let amount = lookup(map, AMOUNT_KEYS)
                    .map(parse_decimal)
                    .unwrap_or(quantity * unit_cost);
                LineItem {
                    item_number: lookup(map, ITEM_NUMBER_KEYS)
                        .map(value_text)
                        .unwrap_or_default(),
                    description: lookup(map, DESCRIPTION_KEYS)
                        .map(value_text)
                        .unwrap_or_default(),
                    quantity,
                    unit_cost,
                    amount,
                }
            }
            RawRow::Empty => return None,
        };

        // Blank and separator rows carry no item number or no figures.
        let keep = !item.item_number.is_empty() && (item.unit_cost > 0.0 || item.quantity > 0.0);
        keep.then_some(item)
    }
}

impl RawTable {
    /// Anything other than an array of rows is treated as "no table".
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Array(rows)) if !rows.is_empty() => {
                RawTable::Rows(rows.iter().map(RawRow::from_value).collect())
            }
            _ => RawTable::Empty,
        }
    }
}

/// First alias carrying a non-null, non-blank value.
fn lookup<'a>(map: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|key| {
        map.get(*key).filter(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
    })
}

/// Normalize a page's raw table into retained line items, in row order.
pub fn normalize(table: &RawTable) -> Vec<LineItem> {
    match table {
        RawTable::Empty => Vec::new(),
        RawTable::Rows(rows) => rows.iter().filter_map(RawRow::normalize).collect(),
    }
}
