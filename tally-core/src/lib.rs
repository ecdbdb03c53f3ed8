pub mod aws;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod report;
pub mod storage;
pub mod store;

pub use config::TallyConfig;
pub use error::TallyError;
pub use llm::{BedrockModel, InvoiceDocument, ModelBackend, ModelError, PromptRequest};
pub use models::InvoiceRecord;
pub use report::BatchReport;
pub use storage::{ObjectEntry, ObjectSource, S3ObjectSource, StorageError};
pub use store::ResultStore;
