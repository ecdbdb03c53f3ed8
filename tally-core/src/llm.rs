//! Model backend for the invoice prompt chain.
//!
//! `ModelBackend` hides the hosted model behind one `generate` call that takes
//! a prompt and, optionally, the invoice PDF itself. `BedrockModel` sends it
//! through the Bedrock Converse API.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::DisplayErrorContext;
use aws_sdk_bedrockruntime::{
    primitives::Blob,
    types::{
        ContentBlock, ConversationRole, DocumentBlock, DocumentFormat, DocumentSource,
        InferenceConfiguration, Message,
    },
    Client,
};
use thiserror::Error;

use crate::config::ModelConfig;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to build model request: {0}")]
    Request(String),

    #[error("Model API error ({model}): {message}")]
    Api { model: String, message: String },

    #[error("Model returned no text content")]
    EmptyResponse,
}

/// A PDF attached to a prompt.
#[derive(Debug, Clone)]
pub struct InvoiceDocument {
    /// Display name, usually the object key.
    pub name: String,
    pub bytes: Vec<u8>,
}

/// One model invocation.
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    pub prompt: &'a str,
    pub document: Option<&'a InvoiceDocument>,
}

impl<'a> PromptRequest<'a> {
    pub fn text(prompt: &'a str) -> Self {
        Self {
            prompt,
            document: None,
        }
    }

    pub fn with_document(prompt: &'a str, document: &'a InvoiceDocument) -> Self {
        Self {
            prompt,
            document: Some(document),
        }
    }
}

/// Abstraction over hosted model providers.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Run the prompt and return the model's text reply.
    async fn generate(&self, request: PromptRequest<'_>) -> Result<String, ModelError>;

    /// Model identifier for logging.
    fn name(&self) -> &str;
}

/// Bedrock Converse client bound to one model.
#[derive(Debug, Clone)]
pub struct BedrockModel {
    client: Client,
    config: ModelConfig,
}

impl BedrockModel {
    pub fn new(client: Client, config: ModelConfig) -> Self {
        Self { client, config }
    }

    fn build_message(&self, request: PromptRequest<'_>) -> Result<Message, ModelError> {
        let mut message = Message::builder().role(ConversationRole::User);

        if let Some(document) = request.document {
            let block = DocumentBlock::builder()
                .format(DocumentFormat::Pdf)
                .name(document_name(&document.name))
                .source(DocumentSource::Bytes(Blob::new(document.bytes.clone())))
                .build()
                .map_err(|e| ModelError::Request(e.to_string()))?;
            message = message.content(ContentBlock::Document(block));
        }

        message
            .content(ContentBlock::Text(request.prompt.to_string()))
            .build()
            .map_err(|e| ModelError::Request(e.to_string()))
    }
}

#[async_trait]
impl ModelBackend for BedrockModel {
    async fn generate(&self, request: PromptRequest<'_>) -> Result<String, ModelError> {
        let message = self.build_message(request)?;

        let inference = InferenceConfiguration::builder()
            .max_tokens(self.config.max_tokens)
            .temperature(self.config.temperature)
            .build();

        let response = self
            .client
            .converse()
            .model_id(&self.config.model_id)
            .messages(message)
            .inference_config(inference)
            .send()
            .await
            .map_err(|e| {
                let message = DisplayErrorContext(&e).to_string();
                tracing::error!(model = %self.config.model_id, error = %message, "Bedrock API error");
                ModelError::Api {
                    model: self.config.model_id.clone(),
                    message,
                }
            })?;

        if let Some(usage) = response.usage() {
            tracing::debug!(
                model = %self.config.model_id,
                input_tokens = usage.input_tokens(),
                output_tokens = usage.output_tokens(),
                "Bedrock call complete"
            );
        }

        let text = response
            .output()
            .and_then(|output| output.as_message().ok())
            .map(|message| collect_text(message.content()))
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        Ok(text)
    }

    fn name(&self) -> &str {
        &self.config.model_id
    }
}

/// Concatenate the text blocks of a reply.
fn collect_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text(text) => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Bedrock document names allow alphanumerics, single spaces, hyphens,
/// parentheses and square brackets only.
pub fn document_name(raw: &str) -> String {
    let base = raw.rsplit('/').next().unwrap_or(raw);
    let stem = if base.to_ascii_lowercase().ends_with(".pdf") {
        &base[..base.len() - 4]
    } else {
        base
    };

    let mut name = String::with_capacity(stem.len());
    let mut last_was_space = false;
    for ch in stem.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '(' | ')' | '[' | ']') {
            Some(ch)
        } else if ch.is_whitespace() || matches!(ch, '_' | '.') {
            Some(' ')
        } else {
            None
        };

        match mapped {
            Some(' ') if last_was_space || name.is_empty() => {}
            Some(' ') => {
                name.push(' ');
                last_was_space = true;
            }
            Some(c) => {
                name.push(c);
                last_was_space = false;
            }
            None => {}
        }
    }

    let name = name.trim_end().to_string();
    if name.is_empty() {
        "invoice".to_string()
    } else {
        name
    }
}
