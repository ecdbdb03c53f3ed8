//! Batch report over a results file: invoice count, totals per currency,
//! vendors and invoice numbers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::models::{field, InvoiceRecord};

/// Currency bucket for invoices that name none.
pub const UNKNOWN_CURRENCY: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total_invoices: usize,
    /// Currency code -> total, formatted with two decimals.
    pub totals: BTreeMap<String, String>,
    pub unique_vendors: Vec<String>,
    pub invoice_numbers: Vec<String>,
    /// Sources whose amount could not be read, or would overflow its total.
    pub unparsed_amounts: Vec<String>,
}

impl BatchReport {
    pub fn from_records(records: &[InvoiceRecord]) -> Self {
        let mut cents: BTreeMap<String, i64> = BTreeMap::new();
        let mut vendors = BTreeSet::new();
        let mut invoice_numbers = Vec::new();
        let mut unparsed_amounts = Vec::new();

        for record in records {
            if let Some(vendor) = record.field_text(field::VENDOR) {
                vendors.insert(vendor);
            }
            if let Some(number) = record.field_text(field::INVOICE_NUMBER) {
                invoice_numbers.push(number);
            }

            match record
                .field_text(field::TOTAL_AMOUNT_DUE)
                .and_then(|raw| parse_amount_cents(&raw))
            {
                Some(amount) => {
                    let currency = record
                        .field_text(field::CURRENCY_CODE)
                        .map(|c| c.to_uppercase())
                        .unwrap_or_else(|| UNKNOWN_CURRENCY.to_string());
                    let total = cents.entry(currency).or_default();
                    match total.checked_add(amount) {
                        Some(sum) => *total = sum,
                        None => unparsed_amounts.push(record.source.clone()),
                    }
                }
                None => unparsed_amounts.push(record.source.clone()),
            }
        }

        Self {
            total_invoices: records.len(),
            totals: cents
                .into_iter()
                .map(|(currency, total)| (currency, format_cents(total)))
                .collect(),
            unique_vendors: vendors.into_iter().collect(),
            invoice_numbers,
            unparsed_amounts,
        }
    }
}

fn amount_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^\s*(-)?\s*[^\d\s.,-]*\s*(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d{1,2}))?\s*[^\d\s.,-]*\s*$",
        )
        .expect("amount pattern is valid")
    })
}

/// Parse an amount into cents.
///
/// The value must be a single number with an optional currency symbol or code
/// before or after it. Comma thousands separators are accepted:
/// `"$1,234.5"` -> `123450`, `"12 EUR"` -> `1200`. Anything else, such as
/// `"1.234,00"` or more than two decimals, is `None`.
pub fn parse_amount_cents(raw: &str) -> Option<i64> {
    let caps = amount_pattern().captures(raw)?;
    let negative = caps.get(1).is_some();
    let whole: i64 = caps.get(2)?.as_str().replace(',', "").parse().ok()?;
    let fraction = match caps.get(3).map(|m| m.as_str()) {
        None => 0,
        Some(f) if f.len() == 1 => f.parse::<i64>().ok()? * 10,
        Some(f) => f.parse::<i64>().ok()?,
    };

    let cents = whole.checked_mul(100)?.checked_add(fraction)?;
    Some(if negative { -cents } else { cents })
}

/// `123450` -> `"1234.50"`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
