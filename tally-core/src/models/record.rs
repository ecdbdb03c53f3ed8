use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field names the filter prompt asks the model to produce.
pub mod field {
    pub const VENDOR: &str = "Vendor";
    pub const INVOICE_NUMBER: &str = "InvoiceNumber";
    pub const INVOICE_DATE: &str = "InvoiceDate";
    pub const START_DATE: &str = "StartDate";
    pub const END_DATE: &str = "EndDate";
    pub const CURRENCY_CODE: &str = "CurrencyCode";
    pub const TOTAL_AMOUNT_DUE: &str = "TotalAmountDue";
    pub const DESCRIPTION: &str = "Description";
}

/// Extraction result for one source PDF. One element of the results array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Object key the invoice was read from.
    pub source: String,
    /// Downloaded PDF, relative to the download folder.
    pub file_name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Filter-step output kept verbatim when it held no JSON object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields_raw: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub details: String,
    pub processed_at: DateTime<Utc>,
}

impl InvoiceRecord {
    /// A field rendered as plain text; strings lose their quotes.
    pub fn field_text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        }
    }
}
