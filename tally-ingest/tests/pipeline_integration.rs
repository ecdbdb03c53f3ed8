//! Batch processor against an in-memory object store and a scripted model.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tally_core::config::WriteMode;
use tally_core::{
    InvoiceRecord, ModelBackend, ModelError, ObjectEntry, ObjectSource, PromptRequest,
    ResultStore, StorageError,
};
use tally_ingest::{BatchProcessor, BatchSettings, IngestError, PromptChain};

// ============================================================================
// Fakes
// ============================================================================

struct MemorySource {
    objects: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    fn new(keys: &[&str]) -> Self {
        Self {
            objects: keys
                .iter()
                .map(|k| (k.to_string(), format!("%PDF-1.4 {}", k).into_bytes()))
                .collect(),
        }
    }
}

#[async_trait]
impl ObjectSource for MemorySource {
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectEntry>, StorageError> {
        Ok(self
            .objects
            .iter()
            .filter(|(k, _)| prefix.map_or(true, |p| k.starts_with(p)))
            .map(|(k, v)| ObjectEntry {
                key: k.clone(),
                size: v.len() as u64,
            })
            .collect())
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let bytes = self.objects.get(key).ok_or_else(|| StorageError::Download {
            bucket: "memory".to_string(),
            key: key.to_string(),
            message: "no such key".to_string(),
        })?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, bytes).await?;
        Ok(bytes.len() as u64)
    }

    fn bucket(&self) -> &str {
        "memory"
    }
}

#[derive(Debug, Clone)]
struct Call {
    prompt: String,
    document: Option<String>,
}

/// Replies by step: extract (document attached), filter, summarize.
#[derive(Default)]
struct ScriptedModel {
    calls: Mutex<Vec<Call>>,
    failing_documents: HashSet<String>,
    filter_reply: Option<String>,
}

impl ScriptedModel {
    fn failing_on(keys: &[&str]) -> Self {
        Self {
            failing_documents: keys.iter().map(|k| k.to_string()).collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedModel {
    async fn generate(&self, request: PromptRequest<'_>) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push(Call {
            prompt: request.prompt.to_string(),
            document: request.document.map(|d| d.name.clone()),
        });

        if let Some(document) = request.document {
            if self.failing_documents.contains(&document.name) {
                return Err(ModelError::Api {
                    model: "scripted".to_string(),
                    message: "throttled".to_string(),
                });
            }
            assert!(document.bytes.starts_with(b"%PDF"), "PDF bytes must be attached");
            return Ok(format!("Vendor: Vendor of {}\nTotal: $10.50", document.name));
        }

        if request.prompt.starts_with("Below is data extracted") {
            if let Some(reply) = &self.filter_reply {
                return Ok(reply.clone());
            }
            let vendor = request
                .prompt
                .lines()
                .find_map(|l| l.strip_prefix("Vendor: "))
                .unwrap_or("?");
            return Ok(format!(
                "```json\n{{\"Vendor\": \"{}\", \"TotalAmountDue\": \"$10.50\", \"CurrencyCode\": \"USD\"}}\n```",
                vendor
            ));
        }

        Ok("A short summary.".to_string())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct Workspace {
    _dir: tempfile::TempDir,
    download_dir: PathBuf,
    results_path: PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    Workspace {
        download_dir: dir.path().join("invoice"),
        results_path: dir.path().join("processed_invoice_output.json"),
        _dir: dir,
    }
}

fn processor(
    ws: &Workspace,
    source: MemorySource,
    model: Arc<ScriptedModel>,
    mode: WriteMode,
    continue_on_error: bool,
) -> BatchProcessor {
    BatchProcessor::new(
        Arc::new(source),
        model,
        ResultStore::new(&ws.results_path),
        PromptChain::default(),
        BatchSettings {
            download_dir: ws.download_dir.clone(),
            mode,
            continue_on_error,
        },
    )
}

fn read_results(ws: &Workspace) -> Vec<InvoiceRecord> {
    let raw = std::fs::read_to_string(&ws.results_path).expect("results file exists");
    serde_json::from_str(&raw).expect("results file is valid JSON")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_every_pdf_yields_exactly_one_record() {
    let ws = workspace();
    let source = MemorySource::new(&["inv/b.pdf", "inv/a.PDF", "inv/", "inv/readme.txt"]);
    let model = Arc::new(ScriptedModel::default());

    let outcome = processor(&ws, source, model, WriteMode::Overwrite, false)
        .run(Some("inv/"))
        .await
        .expect("run succeeds");

    assert_eq!(outcome.listed, 4);
    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.skipped_other, 2);
    assert!(outcome.failed.is_empty());
    assert_eq!(outcome.total_records, 2);

    let records = read_results(&ws);
    let sources: Vec<&str> = records.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(sources, vec!["inv/a.PDF", "inv/b.pdf"]);

    let first = &records[0];
    assert_eq!(first.file_name, "inv/a.PDF");
    assert_eq!(first.fields["Vendor"], "Vendor of inv/a.PDF");
    assert_eq!(first.fields["TotalAmountDue"], "$10.50");
    assert!(first.fields_raw.is_none());
    assert_eq!(first.summary, "A short summary.");
    assert!(first.details.starts_with("Vendor: Vendor of inv/a.PDF"));

    assert!(ws.download_dir.join("inv").join("a.PDF").exists());
    assert!(ws.download_dir.join("inv").join("b.pdf").exists());
}

#[tokio::test]
async fn test_chain_feeds_extraction_into_later_prompts() {
    let ws = workspace();
    let source = MemorySource::new(&["x.pdf"]);
    let model = Arc::new(ScriptedModel::default());

    processor(&ws, source, model.clone(), WriteMode::Overwrite, false)
        .run(None)
        .await
        .unwrap();

    let calls = model.calls();
    assert_eq!(calls.len(), 3, "extract, filter, summarize");

    assert_eq!(calls[0].document.as_deref(), Some("x.pdf"));
    assert!(calls[1].document.is_none());
    assert!(calls[2].document.is_none());

    assert!(calls[1].prompt.contains("Vendor: Vendor of x.pdf"));
    assert!(calls[2].prompt.starts_with("Summarize"));
    assert!(calls[2].prompt.contains("Total: $10.50"));
}

#[tokio::test]
async fn test_failure_stops_the_run_but_keeps_finished_records() {
    let ws = workspace();
    let source = MemorySource::new(&["a.pdf", "b.pdf", "c.pdf"]);
    let model = Arc::new(ScriptedModel::failing_on(&["b.pdf"]));

    let result = processor(&ws, source, model.clone(), WriteMode::Overwrite, false)
        .run(None)
        .await;

    match result {
        Err(IngestError::Model { key, .. }) => assert_eq!(key, "b.pdf"),
        other => panic!("Expected model error, got {:?}", other.map(|o| o.processed)),
    }

    let records = read_results(&ws);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, "a.pdf");
    assert!(
        model.calls().iter().all(|c| c.document.as_deref() != Some("c.pdf")),
        "Nothing after the failure is processed"
    );
}

#[tokio::test]
async fn test_continue_on_error_counts_failures() {
    let ws = workspace();
    let source = MemorySource::new(&["a.pdf", "b.pdf", "c.pdf"]);
    let model = Arc::new(ScriptedModel::failing_on(&["b.pdf"]));

    let outcome = processor(&ws, source, model, WriteMode::Overwrite, true)
        .run(None)
        .await
        .expect("run completes");

    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.failed, vec!["b.pdf".to_string()]);

    let sources: Vec<String> = read_results(&ws).into_iter().map(|r| r.source).collect();
    assert_eq!(sources, vec!["a.pdf", "c.pdf"]);
}

#[tokio::test]
async fn test_overwrite_clears_previous_run() {
    let ws = workspace();
    std::fs::create_dir_all(&ws.download_dir).unwrap();
    std::fs::write(ws.download_dir.join("stale.pdf"), b"old").unwrap();

    processor(
        &ws,
        MemorySource::new(&["old.pdf"]),
        Arc::new(ScriptedModel::default()),
        WriteMode::Overwrite,
        false,
    )
    .run(None)
    .await
    .unwrap();

    processor(
        &ws,
        MemorySource::new(&["new.pdf"]),
        Arc::new(ScriptedModel::default()),
        WriteMode::Overwrite,
        false,
    )
    .run(None)
    .await
    .unwrap();

    let records = read_results(&ws);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, "new.pdf");
    assert!(!ws.download_dir.join("stale.pdf").exists());
    assert!(!ws.download_dir.join("old.pdf").exists());
}

#[tokio::test]
async fn test_append_skips_invoices_already_recorded() {
    let ws = workspace();

    processor(
        &ws,
        MemorySource::new(&["a.pdf"]),
        Arc::new(ScriptedModel::default()),
        WriteMode::Overwrite,
        false,
    )
    .run(None)
    .await
    .unwrap();

    let model = Arc::new(ScriptedModel::default());
    let outcome = processor(
        &ws,
        MemorySource::new(&["a.pdf", "b.pdf"]),
        model.clone(),
        WriteMode::Append,
        false,
    )
    .run(None)
    .await
    .unwrap();

    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.skipped_existing, 1);
    assert_eq!(outcome.total_records, 2);
    assert_eq!(model.calls().len(), 3, "Only b.pdf goes through the chain");

    let sources: Vec<String> = read_results(&ws).into_iter().map(|r| r.source).collect();
    assert_eq!(sources, vec!["a.pdf", "b.pdf"]);
}

#[tokio::test]
async fn test_unparsable_filter_reply_keeps_raw_text() {
    let ws = workspace();
    let model = Arc::new(ScriptedModel {
        filter_reply: Some("Vendor is Amazon, total 10 dollars".to_string()),
        ..ScriptedModel::default()
    });

    processor(&ws, MemorySource::new(&["a.pdf"]), model, WriteMode::Overwrite, false)
        .run(None)
        .await
        .unwrap();

    let records = read_results(&ws);
    assert_eq!(records.len(), 1, "A record is written even without structured fields");
    assert!(records[0].fields.is_empty());
    assert_eq!(
        records[0].fields_raw.as_deref(),
        Some("Vendor is Amazon, total 10 dollars")
    );
}

#[tokio::test]
async fn test_key_escaping_download_dir_is_rejected() {
    let ws = workspace();
    let source = MemorySource::new(&["../escape.pdf", "ok.pdf"]);

    let result = processor(
        &ws,
        source,
        Arc::new(ScriptedModel::default()),
        WriteMode::Overwrite,
        false,
    )
    .run(None)
    .await;

    match result {
        Err(IngestError::Storage(StorageError::UnsafeKey(key))) => {
            assert_eq!(key, "../escape.pdf")
        }
        other => panic!("Expected UnsafeKey, got {:?}", other.map(|o| o.processed)),
    }
    assert!(!ws.download_dir.parent().unwrap().join("escape.pdf").exists());
}

#[tokio::test]
async fn test_empty_listing_writes_empty_array() {
    let ws = workspace();

    let outcome = processor(
        &ws,
        MemorySource::new(&[]),
        Arc::new(ScriptedModel::default()),
        WriteMode::Overwrite,
        false,
    )
    .run(Some("nothing/"))
    .await
    .unwrap();

    assert_eq!(outcome.processed, 0);
    assert!(read_results(&ws).is_empty());
}

#[tokio::test]
async fn test_keys_sharing_a_local_path_are_not_overwritten() {
    let ws = workspace();
    let source = MemorySource::new(&["/a.pdf", "a.pdf"]);

    let outcome = processor(
        &ws,
        source,
        Arc::new(ScriptedModel::default()),
        WriteMode::Overwrite,
        true,
    )
    .run(None)
    .await
    .unwrap();

    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.failed, vec!["a.pdf".to_string()]);

    let records = read_results(&ws);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, "/a.pdf");
    assert_eq!(records[0].file_name, "a.pdf");
    assert_eq!(
        std::fs::read(ws.download_dir.join("a.pdf")).unwrap(),
        b"%PDF-1.4 /a.pdf"
    );
}

#[tokio::test]
async fn test_colliding_key_stops_a_fail_fast_run() {
    let ws = workspace();
    let source = MemorySource::new(&["x//a.pdf", "x/a.pdf"]);

    let result = processor(
        &ws,
        source,
        Arc::new(ScriptedModel::default()),
        WriteMode::Overwrite,
        false,
    )
    .run(None)
    .await;

    match result {
        Err(IngestError::PathCollision { key, path }) => {
            assert_eq!(key, "x/a.pdf");
            assert_eq!(path, "x/a.pdf");
        }
        other => panic!("Expected PathCollision, got {:?}", other.map(|o| o.processed)),
    }
    assert_eq!(read_results(&ws).len(), 1);
}

#[tokio::test]
async fn test_first_invoice_failing_still_leaves_valid_results() {
    let ws = workspace();
    std::fs::write(&ws.results_path, "[{\"stale\": true}]").unwrap();

    let result = processor(
        &ws,
        MemorySource::new(&["a.pdf"]),
        Arc::new(ScriptedModel::failing_on(&["a.pdf"])),
        WriteMode::Overwrite,
        false,
    )
    .run(None)
    .await;

    assert!(matches!(result, Err(IngestError::Model { .. })));
    assert!(read_results(&ws).is_empty());
}
