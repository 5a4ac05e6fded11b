//! Persistent document + chunk store with keyword retrieval.
//!
//! Documents are deduplicated by content hash; full text lives as a file
//! under `docstore/docs/`, metadata and chunks in SQLite (`chunks.db`, WAL).
//! Retrieval is literal text matching: the query is expanded into search
//! terms (keywords, configured synonyms, adjacent keyword combinations) and
//! each chunk is scored by occurrence counts with bonuses for exact and
//! multi-keyword matches. No embeddings.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RetrievalConfig;
use crate::error::AppError;

const DOCSTORE_DIR: &str = "docstore";
const DOCS_DIR: &str = "docs";
const DB_FILENAME: &str = "chunks.db";
const SCHEMA_VERSION: i64 = 1;

/// Words carrying no retrieval signal, dropped during keyword extraction.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "if", "not", "no", "yes", "this",
    "that", "these", "those", "what", "which", "who", "whom", "where", "when",
    "why", "how", "for", "with", "without", "about", "into", "onto", "over",
    "under", "between", "behind", "after", "before", "during", "while", "from",
    "until", "are", "was", "were", "will", "would", "can", "could", "should",
    "tell", "explain", "describe", "please", "information", "regarding",
];

#[derive(Debug, Clone)]
pub struct DocStore {
    docs_dir: PathBuf,
    db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub source: String,
    pub content: String,
    pub content_hash: String,
    pub pages: usize,
    pub created_at: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocMetadata {
    pub doc_id: String,
    pub title: String,
    pub source: String,
    pub content_hash: String,
    pub pages: usize,
    pub chunks: usize,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    /// 1-based page number the chunk came from.
    pub page: usize,
    /// Character offset of the chunk within its page.
    pub position: usize,
    pub text: String,
}

/// One retrieval hit, as surfaced to agents and the chat API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub doc_id: String,
    pub document_title: String,
    pub page: usize,
    pub snippet: String,
    pub score: i64,
    pub matched_term: String,
}

/// Aggregate store statistics for `/api/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub documents: Vec<DocStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocStats {
    pub title: String,
    pub pages: usize,
    pub chunks: usize,
}

impl DocStore {
    /// Open (or create) the store under `{work_dir}/docstore/`.
    pub fn open(work_dir: &Path) -> Result<Self, AppError> {
        let dir = work_dir.join(DOCSTORE_DIR);
        let docs_dir = dir.join(DOCS_DIR);
        fs::create_dir_all(&docs_dir).map_err(|e| {
            AppError::Memory(format!("docstore: cannot create {}: {e}", docs_dir.display()))
        })?;

        let db_path = dir.join(DB_FILENAME);
        let store = Self { docs_dir, db_path };
        store.init_db()?;
        Ok(store)
    }

    /// Insert a document, deduplicating by content hash.
    ///
    /// Returns the id of the stored document — the existing id when identical
    /// content was added before.
    pub fn add_document(&self, mut doc: Document) -> Result<String, AppError> {
        if doc.id.is_empty() {
            doc.id = uuid::Uuid::now_v7().to_string();
        }
        if doc.content_hash.is_empty() {
            doc.content_hash = Self::sha256_hex(&doc.content);
        }
        if doc.created_at.is_empty() {
            doc.created_at = now_iso8601();
        }

        let metadata_json = serde_json::to_string(&doc.metadata)
            .map_err(|e| AppError::Memory(format!("docstore: serialize metadata: {e}")))?;

        let mut conn = self.open_conn()?;
        if let Some(existing_id) = Self::find_doc_id_by_hash(&conn, &doc.content_hash)? {
            return Ok(existing_id);
        }

        let tx = conn
            .transaction()
            .map_err(|e| AppError::Memory(format!("docstore: begin tx: {e}")))?;

        tx.execute(
            "INSERT INTO documents (doc_id, title, source, content_hash, pages, created_at, updated_at, metadata) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                doc.id,
                doc.title,
                doc.source,
                doc.content_hash,
                doc.pages as i64,
                doc.created_at,
                now_iso8601(),
                metadata_json,
            ],
        )
        .map_err(|e| AppError::Memory(format!("docstore: insert metadata: {e}")))?;

        tx.commit()
            .map_err(|e| AppError::Memory(format!("docstore: commit add_document: {e}")))?;

        fs::write(self.doc_content_path(&doc.id), doc.content).map_err(|e| {
            AppError::Memory(format!("docstore: write document content for {}: {e}", doc.id))
        })?;

        Ok(doc.id)
    }

    pub fn get_document(&self, doc_id: &str) -> Result<Document, AppError> {
        let conn = self.open_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT title, source, content_hash, pages, created_at, metadata FROM documents WHERE doc_id = ?1",
            )
            .map_err(|e| AppError::Memory(format!("docstore: prepare get_document: {e}")))?;

        let row = stmt
            .query_row(params![doc_id], |row| {
                let metadata_json: String = row.get(5)?;
                let metadata: HashMap<String, String> =
                    serde_json::from_str(&metadata_json).unwrap_or_default();
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    metadata,
                ))
            })
            .map_err(|e| AppError::Memory(format!("docstore: get_document {doc_id}: {e}")))?;

        let content = fs::read_to_string(self.doc_content_path(doc_id)).map_err(|e| {
            AppError::Memory(format!("docstore: read document content for {doc_id}: {e}"))
        })?;

        Ok(Document {
            id: doc_id.to_string(),
            title: row.0,
            source: row.1,
            content,
            content_hash: row.2,
            pages: row.3 as usize,
            created_at: row.4,
            metadata: row.5,
        })
    }

    pub fn list_documents(&self) -> Result<Vec<DocMetadata>, AppError> {
        let conn = self.open_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT d.doc_id, d.title, d.source, d.content_hash, d.pages, d.created_at, d.updated_at,
                        (SELECT COUNT(*) FROM chunks c WHERE c.doc_id = d.doc_id)
                 FROM documents d ORDER BY d.created_at DESC",
            )
            .map_err(|e| AppError::Memory(format!("docstore: prepare list_documents: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(DocMetadata {
                    doc_id: row.get(0)?,
                    title: row.get(1)?,
                    source: row.get(2)?,
                    content_hash: row.get(3)?,
                    pages: row.get::<_, i64>(4)? as usize,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                    chunks: row.get::<_, i64>(7)? as usize,
                })
            })
            .map_err(|e| AppError::Memory(format!("docstore: query list_documents: {e}")))?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(
                row.map_err(|e| AppError::Memory(format!("docstore: map list_documents row: {e}")))?,
            );
        }
        Ok(docs)
    }

    pub fn delete_document(&self, doc_id: &str) -> Result<(), AppError> {
        let mut conn = self.open_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Memory(format!("docstore: begin delete tx: {e}")))?;

        tx.execute("DELETE FROM chunks WHERE doc_id = ?1", params![doc_id])
            .map_err(|e| AppError::Memory(format!("docstore: delete chunks for {doc_id}: {e}")))?;

        tx.execute("DELETE FROM documents WHERE doc_id = ?1", params![doc_id])
            .map_err(|e| AppError::Memory(format!("docstore: delete metadata for {doc_id}: {e}")))?;

        tx.commit()
            .map_err(|e| AppError::Memory(format!("docstore: commit delete tx: {e}")))?;

        let content_path = self.doc_content_path(doc_id);
        if content_path.exists() {
            fs::remove_file(&content_path).map_err(|e| {
                AppError::Memory(format!("docstore: remove {}: {e}", content_path.display()))
            })?;
        }
        Ok(())
    }

    /// Replace all indexed chunks for the documents referenced in `chunks`.
    pub fn index_chunks(&self, chunks: Vec<Chunk>) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut conn = self.open_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Memory(format!("docstore: begin index tx: {e}")))?;

        let mut doc_ids = HashSet::new();
        for chunk in &chunks {
            doc_ids.insert(chunk.doc_id.clone());
        }

        for doc_id in &doc_ids {
            tx.execute("DELETE FROM chunks WHERE doc_id = ?1", params![doc_id])
                .map_err(|e| {
                    AppError::Memory(format!("docstore: clear chunks for {doc_id} before reindex: {e}"))
                })?;
        }

        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (id, doc_id, page, position, text) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    chunk.id,
                    chunk.doc_id,
                    chunk.page as i64,
                    chunk.position as i64,
                    chunk.text
                ],
            )
            .map_err(|e| AppError::Memory(format!("docstore: insert chunk: {e}")))?;
        }

        tx.commit()
            .map_err(|e| AppError::Memory(format!("docstore: commit index tx: {e}")))?;
        Ok(())
    }

    /// Aggregate counts for the stats endpoint.
    pub fn stats(&self) -> Result<StoreStats, AppError> {
        let conn = self.open_conn()?;
        let total_chunks: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| AppError::Memory(format!("docstore: count chunks: {e}")))?;

        let mut stmt = conn
            .prepare(
                "SELECT d.title, d.pages,
                        (SELECT COUNT(*) FROM chunks c WHERE c.doc_id = d.doc_id)
                 FROM documents d ORDER BY d.created_at DESC",
            )
            .map_err(|e| AppError::Memory(format!("docstore: prepare stats: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(DocStats {
                    title: row.get(0)?,
                    pages: row.get::<_, i64>(1)? as usize,
                    chunks: row.get::<_, i64>(2)? as usize,
                })
            })
            .map_err(|e| AppError::Memory(format!("docstore: query stats: {e}")))?;

        let mut documents = Vec::new();
        for row in rows {
            documents.push(row.map_err(|e| AppError::Memory(format!("docstore: map stats row: {e}")))?);
        }

        Ok(StoreStats {
            total_documents: documents.len(),
            total_chunks: total_chunks as usize,
            documents,
        })
    }

    /// Score every indexed chunk against `query` and return the best hits.
    ///
    /// Scoring per candidate term: `occurrences × 10`, `+200` for an exact
    /// full-query match, `+5 × term length`, `+50` per distinct query keyword
    /// present in the chunk, `−30` when the chunk exceeds 1000 characters.
    /// Hits below `cfg.min_score` are dropped; identical snippets are
    /// deduplicated; results are sorted by score and truncated to `top_k`.
    pub fn search(&self, query: &str, cfg: &RetrievalConfig) -> Result<Vec<SourceRef>, AppError> {
        let query_lower = query.trim().to_lowercase();
        if query_lower.len() <= 2 || cfg.top_k == 0 {
            return Ok(Vec::new());
        }

        let keywords = extract_keywords(&query_lower);
        let terms = build_search_terms(&query_lower, &keywords, &cfg.synonyms);

        let conn = self.open_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT c.doc_id, c.page, c.text, d.title
                 FROM chunks c JOIN documents d ON d.doc_id = c.doc_id",
            )
            .map_err(|e| AppError::Memory(format!("docstore: prepare search: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)? as usize,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| AppError::Memory(format!("docstore: query search: {e}")))?;

        let mut results: Vec<SourceRef> = Vec::new();
        let mut seen_snippets: HashSet<String> = HashSet::new();

        for row in rows {
            let (doc_id, page, text, title) =
                row.map_err(|e| AppError::Memory(format!("docstore: map search row: {e}")))?;
            let content_lower = text.to_lowercase();

            let keyword_hits = keywords
                .iter()
                .filter(|k| content_lower.contains(k.as_str()))
                .count() as i64;
            let long_penalty = if text.chars().count() > 1000 { 30 } else { 0 };

            let mut best: Option<(&str, i64)> = None;
            for term in &terms {
                let occurrences = content_lower.matches(term.as_str()).count() as i64;
                if occurrences == 0 {
                    continue;
                }
                let mut score = occurrences * 10;
                if *term == query_lower {
                    score += 200;
                }
                score += term.len() as i64 * 5;
                score += keyword_hits * 50;
                score -= long_penalty;

                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((term, score));
                }
            }

            let Some((term, score)) = best else { continue };
            if score < cfg.min_score {
                continue;
            }

            let snippet = extract_snippet(
                &text,
                &content_lower,
                term,
                cfg.snippet_before,
                cfg.snippet_after,
            );
            if !seen_snippets.insert(snippet.to_lowercase()) {
                continue;
            }

            results.push(SourceRef {
                doc_id,
                document_title: title,
                page,
                snippet,
                score,
                matched_term: term.to_string(),
            });
        }

        results.sort_by(|a, b| b.score.cmp(&a.score));
        results.truncate(cfg.top_k);
        Ok(results)
    }

    fn init_db(&self) -> Result<(), AppError> {
        let conn = self.open_conn()?;
        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .map_err(|e| AppError::Memory(format!("docstore: read schema version: {e}")))?;

        if version == 0 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS documents (
                    doc_id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    source TEXT NOT NULL,
                    content_hash TEXT NOT NULL UNIQUE,
                    pages INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    metadata TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS chunks (
                    id TEXT PRIMARY KEY,
                    doc_id TEXT NOT NULL,
                    page INTEGER NOT NULL,
                    position INTEGER NOT NULL,
                    text TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id);

                PRAGMA user_version = 1;
                ",
            )
            .map_err(|e| AppError::Memory(format!("docstore: initialize schema: {e}")))?;
            return Ok(());
        }

        if version != SCHEMA_VERSION {
            return Err(AppError::Memory(format!(
                "docstore: unsupported schema version {version}, expected {SCHEMA_VERSION}"
            )));
        }

        Ok(())
    }

    fn open_conn(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| AppError::Memory(format!("docstore: open {}: {e}", self.db_path.display())))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AppError::Memory(format!("docstore: set journal_mode WAL: {e}")))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| AppError::Memory(format!("docstore: set busy_timeout: {e}")))?;

        Ok(conn)
    }

    fn doc_content_path(&self, doc_id: &str) -> PathBuf {
        self.docs_dir.join(format!("{doc_id}.txt"))
    }

    fn find_doc_id_by_hash(conn: &Connection, content_hash: &str) -> Result<Option<String>, AppError> {
        let mut stmt = conn
            .prepare("SELECT doc_id FROM documents WHERE content_hash = ?1")
            .map_err(|e| AppError::Memory(format!("docstore: prepare find by hash: {e}")))?;

        let mut rows = stmt
            .query(params![content_hash])
            .map_err(|e| AppError::Memory(format!("docstore: query find by hash: {e}")))?;

        if let Some(row) = rows
            .next()
            .map_err(|e| AppError::Memory(format!("docstore: read find by hash row: {e}")))?
        {
            let doc_id: String = row
                .get(0)
                .map_err(|e| AppError::Memory(format!("docstore: decode find by hash row: {e}")))?;
            return Ok(Some(doc_id));
        }
        Ok(None)
    }

    fn sha256_hex(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }
}

// ── Query expansion ───────────────────────────────────────────────────────────

/// Pull lowercase alphanumeric keywords (> 2 chars, non-stop-word) out of a
/// lowercased query.
fn extract_keywords(query_lower: &str) -> Vec<String> {
    query_lower
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Build the candidate search term list: full query, each keyword, configured
/// synonyms, and adjacent 2- and 3-keyword combinations. Deduplicated,
/// insertion order preserved so tie-breaking is deterministic.
fn build_search_terms(
    query_lower: &str,
    keywords: &[String],
    synonyms: &HashMap<String, Vec<String>>,
) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut push = |t: String, terms: &mut Vec<String>| {
        if t.chars().count() > 2 && seen.insert(t.clone()) {
            terms.push(t);
        }
    };

    push(query_lower.to_string(), &mut terms);

    for keyword in keywords {
        push(keyword.clone(), &mut terms);
        if let Some(related) = synonyms.get(keyword) {
            for r in related {
                push(r.to_lowercase(), &mut terms);
            }
        }
    }

    if keywords.len() >= 2 {
        for i in 0..keywords.len() {
            for j in (i + 1)..(i + 3).min(keywords.len()) {
                push(keywords[i..=j].join(" "), &mut terms);
            }
        }
    }

    terms
}

// ── Snippet extraction ────────────────────────────────────────────────────────

/// Cut a context window around the first occurrence of `term`, `before` /
/// `after` characters wide, expanded to sentence boundaries (`.!?`) within
/// 100 characters of each edge.
fn extract_snippet(
    text: &str,
    content_lower: &str,
    term: &str,
    before: usize,
    after: usize,
) -> String {
    // Lowercasing can shift byte lengths, so the match offset is only a
    // guide; snap it onto a char boundary of the original text first.
    let pos = snap_start(text, content_lower.find(term).unwrap_or(0));
    let bytes = text.as_bytes();

    let mut start = back_by_chars(text, pos, before);
    if start > 0 {
        let floor = back_by_chars(text, start, 100);
        let mut i = start;
        while i > floor {
            i -= 1;
            // Sentence terminators are ASCII, so any hit is a char boundary.
            if matches!(bytes[i], b'.' | b'!' | b'?') {
                start = i + 1;
                break;
            }
        }
    }

    let mut end = forward_by_chars(text, pos, after);
    if end < text.len() {
        let ceil = forward_by_chars(text, end, 100);
        let mut i = end;
        while i < ceil {
            if matches!(bytes[i], b'.' | b'!' | b'?') {
                end = i + 1;
                break;
            }
            i += 1;
        }
    }

    text[start..end].trim().to_string()
}

/// Move `i` down to the nearest char boundary of `s`.
fn snap_start(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Byte offset `n` characters before `from` (a char boundary), floored at 0.
fn back_by_chars(s: &str, from: usize, n: usize) -> usize {
    if n == 0 {
        return from;
    }
    s[..from]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Byte offset `n` characters after `from` (a char boundary), capped at the end.
fn forward_by_chars(s: &str, from: usize, n: usize) -> usize {
    s[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(s.len())
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
