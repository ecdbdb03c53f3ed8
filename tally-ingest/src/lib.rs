pub mod pipeline;
pub mod prompts;

pub use pipeline::{BatchOutcome, BatchProcessor, BatchSettings, IngestError};
pub use prompts::{ChainOutput, PromptChain};
