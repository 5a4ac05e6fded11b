//! Memory subsystem — persistent document/chunk store and session transcripts.
//!
//! [`MemorySystem`] is the facade shared (behind `Arc`) by the agents
//! subsystem, which reads it directly, and [`MemorySubsystem`], the bus
//! handler answering `memory/*` queries from the HTTP channel. SQLite and
//! file I/O are synchronous; bus handlers run them under `spawn_blocking`.

pub mod docstore;
pub mod session;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::{MemoryConfig, RetrievalConfig};
use crate::error::AppError;
use crate::ingest::chunker;
use crate::supervisor::bus::{
    BusError, BusPayload, BusResult, ERR_INTERNAL, ERR_METHOD_NOT_FOUND,
};
use crate::supervisor::dispatch::BusHandler;
use crate::supervisor::health::{HealthDetail, HealthReporter};

use docstore::{Chunk, DocStore, Document};
use session::SessionStore;

/// Result of one document ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    pub document_id: String,
    pub title: String,
    pub pages: usize,
    pub chunks: usize,
}

// ── MemorySystem ──────────────────────────────────────────────────────────────

/// Owns the persistent stores. Cheap to share behind `Arc`.
pub struct MemorySystem {
    docstore: DocStore,
    sessions: SessionStore,
}

impl MemorySystem {
    pub fn new(work_dir: &Path, config: &MemoryConfig) -> Result<Self, AppError> {
        std::fs::create_dir_all(work_dir).map_err(|e| {
            AppError::Memory(format!("cannot create work dir {}: {e}", work_dir.display()))
        })?;
        Ok(Self {
            docstore: DocStore::open(work_dir)?,
            sessions: SessionStore::open(work_dir, config.transcript_cap)?,
        })
    }

    pub fn docstore(&self) -> &DocStore {
        &self.docstore
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Store a document from already-extracted page texts and index its
    /// chunks. Re-ingesting identical content reuses the existing document
    /// id and replaces its chunk index.
    pub fn ingest_document(
        &self,
        title: &str,
        source: &str,
        pages: Vec<String>,
        retrieval: &RetrievalConfig,
    ) -> Result<IngestSummary, AppError> {
        let content = pages.join("\n\n");
        if content.trim().is_empty() {
            return Err(AppError::Ingest("document has no text content".into()));
        }

        let doc_id = self.docstore.add_document(Document {
            id: String::new(),
            title: title.to_string(),
            source: source.to_string(),
            content,
            content_hash: String::new(),
            pages: pages.len(),
            created_at: String::new(),
            metadata: Default::default(),
        })?;

        let mut chunks = Vec::new();
        for (idx, page) in pages.iter().enumerate() {
            for piece in chunker::chunk_text(page, retrieval.chunk_size, retrieval.chunk_overlap) {
                chunks.push(Chunk {
                    id: uuid::Uuid::now_v7().to_string(),
                    doc_id: doc_id.clone(),
                    page: idx + 1,
                    position: piece.position,
                    text: piece.text,
                });
            }
        }
        let chunk_count = chunks.len();
        self.docstore.index_chunks(chunks)?;

        debug!(%doc_id, pages = pages.len(), chunks = chunk_count, "document ingested");

        Ok(IngestSummary {
            document_id: doc_id,
            title: title.to_string(),
            pages: pages.len(),
            chunks: chunk_count,
        })
    }
}

// ── MemorySubsystem (bus handler) ─────────────────────────────────────────────

/// Bus handler for `memory/*` queries.
pub struct MemorySubsystem {
    memory: Arc<MemorySystem>,
    retrieval: RetrievalConfig,
    reporter: Option<HealthReporter>,
}

impl MemorySubsystem {
    pub fn new(memory: Arc<MemorySystem>, retrieval: RetrievalConfig) -> Self {
        Self { memory, retrieval, reporter: None }
    }

    /// Attach a health reporter and report initial healthy state.
    ///
    /// The stores opened successfully before this subsystem was built, so
    /// startup is healthy; store failures at request time flip it.
    pub fn with_health_reporter(mut self, reporter: HealthReporter) -> Self {
        reporter.healthy();
        self.reporter = Some(reporter);
        self
    }
}

/// Report the outcome of a store operation to the health registry.
///
/// Only store-level failures flip health; ingest rejections (bad client
/// data) are not a subsystem fault.
fn report_outcome<T>(reporter: &Option<HealthReporter>, result: &Result<T, AppError>) {
    if let Some(r) = reporter {
        match result {
            Ok(_) => r.healthy(),
            Err(e @ AppError::Memory(_)) => r.unhealthy(format!("store failure: {e}")),
            Err(_) => {}
        }
    }
}

impl BusHandler for MemorySubsystem {
    fn prefix(&self) -> &str {
        "memory"
    }

    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        match method {
            "memory/stats" => {
                let memory = self.memory.clone();
                let reporter = self.reporter.clone();
                tokio::spawn(async move {
                    let result = tokio::task::spawn_blocking(move || memory.docstore().stats())
                        .await
                        .unwrap_or_else(|e| Err(AppError::Memory(format!("stats task failed: {e}"))));
                    // Successful stats also refresh the store-size detail.
                    if let (Some(r), Ok(stats)) = (&reporter, &result) {
                        r.healthy_with(HealthDetail::Memory {
                            documents: stats.total_documents,
                            chunks: stats.total_chunks,
                        });
                    } else {
                        report_outcome(&reporter, &result);
                    }
                    let _ = reply_tx.send(to_json_reply(result));
                });
            }
            "memory/documents" => {
                let memory = self.memory.clone();
                let reporter = self.reporter.clone();
                tokio::spawn(async move {
                    let result =
                        tokio::task::spawn_blocking(move || memory.docstore().list_documents())
                            .await
                            .unwrap_or_else(|e| {
                                Err(AppError::Memory(format!("documents task failed: {e}")))
                            });
                    report_outcome(&reporter, &result);
                    let result = result.map(|docs| DocumentListing {
                        documents: docs
                            .into_iter()
                            .map(|d| DocumentEntry {
                                id: d.doc_id,
                                title: d.title,
                                pages: d.pages,
                                chunks: d.chunks,
                                created_at: d.created_at,
                            })
                            .collect(),
                    });
                    let _ = reply_tx.send(to_json_reply(result));
                });
            }
            "memory/ingest" => match payload {
                BusPayload::IngestDocument { title, source, pages } => {
                    let memory = self.memory.clone();
                    let retrieval = self.retrieval.clone();
                    let reporter = self.reporter.clone();
                    tokio::spawn(async move {
                        let result = tokio::task::spawn_blocking(move || {
                            memory.ingest_document(&title, &source, pages, &retrieval)
                        })
                        .await
                        .unwrap_or_else(|e| Err(AppError::Memory(format!("ingest task failed: {e}"))));
                        report_outcome(&reporter, &result);
                        let _ = reply_tx.send(to_json_reply(result));
                    });
                }
                _ => {
                    let _ = reply_tx.send(Err(BusError::new(
                        ERR_METHOD_NOT_FOUND,
                        format!("unsupported payload for method: {method}"),
                    )));
                }
            },
            _ => {
                let _ = reply_tx.send(Err(BusError::new(
                    ERR_METHOD_NOT_FOUND,
                    format!("method not found: {method}"),
                )));
            }
        }
    }
}

/// `/api/documents` response body.
#[derive(Debug, Serialize, Deserialize)]
struct DocumentListing {
    documents: Vec<DocumentEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DocumentEntry {
    id: String,
    title: String,
    pages: usize,
    chunks: usize,
    created_at: String,
}

fn to_json_reply<T: Serialize>(result: Result<T, AppError>) -> BusResult {
    match result {
        Ok(value) => match serde_json::to_string(&value) {
            Ok(data) => Ok(BusPayload::JsonResponse { data }),
            Err(e) => Err(BusError::new(ERR_INTERNAL, format!("serialize reply: {e}"))),
        },
        Err(e) => Err(BusError::new(ERR_INTERNAL, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_memory() -> (TempDir, MemorySystem) {
        let temp = TempDir::new().expect("tempdir");
        let memory = MemorySystem::new(temp.path(), &MemoryConfig::standard()).expect("open");
        (temp, memory)
    }

    #[test]
    fn ingest_chunks_and_indexes_pages() {
        let (_temp, memory) = make_memory();
        let retrieval = RetrievalConfig::standard();

        let pages = vec![
            "the infield fly rule protects baserunners from deliberate drops".to_string(),
            "equipment inspections happen before every series".to_string(),
        ];
        let summary = memory
            .ingest_document("Rulebook", "upload:rulebook.pdf", pages, &retrieval)
            .expect("ingest");

        assert_eq!(summary.pages, 2);
        assert!(summary.chunks >= 2);

        let hits = memory
            .docstore()
            .search("infield fly rule", &retrieval)
            .expect("search");
        assert!(!hits.is_empty());
        assert_eq!(hits[0].page, 1);
        assert_eq!(hits[0].document_title, "Rulebook");
    }

    #[test]
    fn ingest_empty_pages_errors() {
        let (_temp, memory) = make_memory();
        let retrieval = RetrievalConfig::standard();

        let result = memory.ingest_document("Empty", "unit", vec!["  ".to_string()], &retrieval);
        assert!(result.is_err());
    }

    #[test]
    fn reingest_same_content_is_idempotent() {
        let (_temp, memory) = make_memory();
        let retrieval = RetrievalConfig::standard();
        let pages = vec!["identical page content for dedup".to_string()];

        let first = memory
            .ingest_document("Doc", "unit", pages.clone(), &retrieval)
            .expect("first ingest");
        let second = memory
            .ingest_document("Doc again", "unit", pages, &retrieval)
            .expect("second ingest");

        assert_eq!(first.document_id, second.document_id);
        let stats = memory.docstore().stats().expect("stats");
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.total_chunks, first.chunks);
    }

    #[tokio::test]
    async fn subsystem_answers_stats_over_bus() {
        let (_temp, memory) = make_memory();
        let subsystem = MemorySubsystem::new(Arc::new(memory), RetrievalConfig::standard());

        let (tx, rx) = oneshot::channel();
        subsystem.handle_request("memory/stats", BusPayload::Empty, tx);

        match rx.await.expect("reply") {
            Ok(BusPayload::JsonResponse { data }) => {
                let v: serde_json::Value = serde_json::from_str(&data).unwrap();
                assert_eq!(v["total_documents"], 0);
                assert_eq!(v["total_chunks"], 0);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn subsystem_ingests_over_bus() {
        let (_temp, memory) = make_memory();
        let subsystem = MemorySubsystem::new(Arc::new(memory), RetrievalConfig::standard());

        let (tx, rx) = oneshot::channel();
        subsystem.handle_request(
            "memory/ingest",
            BusPayload::IngestDocument {
                title: "Bus Doc".into(),
                source: "unit".into(),
                pages: vec!["some page text worth indexing".into()],
            },
            tx,
        );

        match rx.await.expect("reply") {
            Ok(BusPayload::JsonResponse { data }) => {
                let summary: IngestSummary = serde_json::from_str(&data).unwrap();
                assert_eq!(summary.title, "Bus Doc");
                assert_eq!(summary.pages, 1);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_method_errors() {
        let (_temp, memory) = make_memory();
        let subsystem = MemorySubsystem::new(Arc::new(memory), RetrievalConfig::standard());

        let (tx, rx) = oneshot::channel();
        subsystem.handle_request("memory/unknown", BusPayload::Empty, tx);

        let err = rx.await.expect("reply").unwrap_err();
        assert_eq!(err.code, ERR_METHOD_NOT_FOUND);
    }
}
