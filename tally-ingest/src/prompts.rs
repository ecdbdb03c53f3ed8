//! The three-step prompt chain run against every invoice.
//!
//! 1. **extract**: the PDF is attached and the model lists every key/value
//!    it can read (`details`).
//! 2. **filter**: `details` is narrowed to the key fields as a JSON object.
//! 3. **summarize**: `details` is condensed into a short summary.
//!
//! Only the first call carries the document; later steps receive the
//! previous output as text through the `{details}` placeholder.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tally_core::config::PromptsConfig;
use tally_core::{InvoiceDocument, ModelBackend, ModelError, PromptRequest};

/// Placeholder replaced by the extract step's output.
pub const DETAILS_PLACEHOLDER: &str = "{details}";

pub const EXTRACT_PROMPT: &str =
    "Extract all data from the attached invoice in key: value format, one pair per line. \
Include vendor and customer details, invoice number, dates, line items, taxes, totals and payment terms.";

pub const FILTER_PROMPT: &str = r#"Below is data extracted from an invoice. Format your analysis as a single JSON object with the following structure:
{
"Vendor": "<vendor name>",
"InvoiceNumber": "<invoice number>",
"InvoiceDate": "<DD-MM-YYYY formatted invoice date>",
"StartDate": "<DD-MM-YYYY formatted service start date>",
"EndDate": "<DD-MM-YYYY formatted service end date>",
"CurrencyCode": "<currency code based on the symbol and vendor details>",
"TotalAmountDue": "<100.90>",
"Description": "<concise summary of the invoice description within 20 words>"
}
Use null for values that are not present. Reply with the JSON object only. Do not start with "Based on the ...".

Invoice data:
{details}"#;

pub const SUMMARY_PROMPT: &str =
    "Summarize the following invoice data in at most 3 lines.\n\nInvoice data:\n{details}";

/// Output of one full chain run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput {
    pub details: String,
    pub fields: BTreeMap<String, Value>,
    /// Filter output kept verbatim when no JSON object could be read from it.
    pub fields_raw: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct PromptChain {
    extract: String,
    filter: String,
    summarize: String,
}

impl Default for PromptChain {
    fn default() -> Self {
        Self {
            extract: EXTRACT_PROMPT.to_string(),
            filter: FILTER_PROMPT.to_string(),
            summarize: SUMMARY_PROMPT.to_string(),
        }
    }
}

impl PromptChain {
    /// Defaults with any `[prompts]` overrides applied.
    pub fn from_config(config: &PromptsConfig) -> Self {
        let defaults = Self::default();
        Self {
            extract: config.extract.clone().unwrap_or(defaults.extract),
            filter: config.filter.clone().unwrap_or(defaults.filter),
            summarize: config.summarize.clone().unwrap_or(defaults.summarize),
        }
    }

    pub fn filter_prompt(&self, details: &str) -> String {
        render(&self.filter, details)
    }

    pub fn summary_prompt(&self, details: &str) -> String {
        render(&self.summarize, details)
    }

    /// Run extract, filter and summarize in order.
    pub async fn run(
        &self,
        model: &dyn ModelBackend,
        document: &InvoiceDocument,
    ) -> Result<ChainOutput, ModelError> {
        let details = model
            .generate(PromptRequest::with_document(&self.extract, document))
            .await?;

        let filter_prompt = self.filter_prompt(&details);
        let filtered = model.generate(PromptRequest::text(&filter_prompt)).await?;

        let summary_prompt = self.summary_prompt(&details);
        let summary = model.generate(PromptRequest::text(&summary_prompt)).await?;

        let (fields, fields_raw) = match parse_fields(&filtered) {
            Some(fields) => (fields, None),
            None => {
                tracing::warn!(
                    document = %document.name,
                    "Filter step returned no JSON object; keeping raw text"
                );
                (BTreeMap::new(), Some(filtered.trim().to_string()))
            }
        };

        Ok(ChainOutput {
            details: details.trim().to_string(),
            fields,
            fields_raw,
            summary: summary.trim().to_string(),
        })
    }
}

/// Substitute `{details}`, or append the details when the template has no placeholder.
pub fn render(template: &str, details: &str) -> String {
    if template.contains(DETAILS_PLACEHOLDER) {
        template.replace(DETAILS_PLACEHOLDER, details)
    } else {
        format!("{}\n\n{}", template.trim_end(), details)
    }
}

/// Locate JSON in a model reply, handling Markdown code fences.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if text.starts_with("```") {
        if let Some(start) = text.find('\n') {
            let after_first_line = &text[start + 1..];
            if let Some(end) = after_first_line.rfind("```") {
                return after_first_line[..end].trim();
            }
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return &text[start..=end];
        }
    }

    text
}

/// Parse the filter reply into a field map. `None` unless it holds a JSON object.
pub fn parse_fields(text: &str) -> Option<BTreeMap<String, Value>> {
    let object: Map<String, Value> = serde_json::from_str(extract_json(text)).ok()?;
    Some(object.into_iter().collect())
}
