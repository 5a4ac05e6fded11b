//! Per-session chat transcripts — capped Markdown files.
//!
//! ## On-disk format
//!
//! One directory per session under `{work_dir}/sessions/{session_id}/`,
//! containing `transcript.md` with `### {role} — {timestamp}` delimiters.
//! Human-readable on disk, parsed back into typed entries on load.
//! Capped by entry count (FIFO — oldest entries dropped first).

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::error::AppError;

/// Default maximum number of transcript entries before FIFO eviction.
const DEFAULT_TRANSCRIPT_CAP: usize = 500;

const SESSIONS_DIR: &str = "sessions";
const TRANSCRIPT_FILENAME: &str = "transcript.md";

/// One parsed transcript entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub role: String,
    pub timestamp: String,
    pub content: String,
}

/// Store managing all session transcript directories.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
    transcript_cap: usize,
}

impl SessionStore {
    /// Open (or create) the sessions root under `{work_dir}/sessions/`.
    pub fn open(work_dir: &Path, transcript_cap: Option<usize>) -> Result<Self, AppError> {
        let root = work_dir.join(SESSIONS_DIR);
        fs::create_dir_all(&root).map_err(|e| {
            AppError::Memory(format!("sessions: cannot create {}: {e}", root.display()))
        })?;
        Ok(Self {
            root,
            transcript_cap: transcript_cap.unwrap_or(DEFAULT_TRANSCRIPT_CAP),
        })
    }

    /// Append an entry to the session's transcript, evicting the oldest
    /// entries past the cap. Creates the session directory on first write.
    pub fn append(&self, session_id: &str, role: &str, content: &str) -> Result<(), AppError> {
        let dir = self.session_dir(session_id)?;
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::Memory(format!("sessions: cannot create {}: {e}", dir.display()))
        })?;

        let path = dir.join(TRANSCRIPT_FILENAME);
        let existing = fs::read_to_string(&path).unwrap_or_default();
        let mut entries = parse_transcript(&existing);

        entries.push(TranscriptEntry {
            role: role.to_string(),
            timestamp: now_iso8601(),
            content: content.to_string(),
        });

        while entries.len() > self.transcript_cap {
            entries.remove(0);
        }

        fs::write(&path, serialise_transcript(&entries)).map_err(|e| {
            AppError::Memory(format!("sessions: cannot write {}: {e}", path.display()))
        })
    }

    /// Read the last `n` transcript entries for a session. A session that has
    /// never been written to reads as empty.
    pub fn read_last(&self, session_id: &str, n: usize) -> Result<Vec<TranscriptEntry>, AppError> {
        let path = self.session_dir(session_id)?.join(TRANSCRIPT_FILENAME);
        let text = fs::read_to_string(&path).unwrap_or_default();
        let entries = parse_transcript(&text);
        let start = entries.len().saturating_sub(n);
        Ok(entries[start..].to_vec())
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf, AppError> {
        // Session ids are minted as UUIDs; reject anything that could
        // escape the sessions root.
        if session_id.is_empty()
            || session_id
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '-'))
        {
            return Err(AppError::Memory(format!("invalid session id: {session_id:?}")));
        }
        Ok(self.root.join(session_id))
    }
}

/// Parse `transcript.md` into typed entries.
fn parse_transcript(text: &str) -> Vec<TranscriptEntry> {
    let mut entries = Vec::new();
    let mut current: Option<(String, String, Vec<String>)> = None;

    for line in text.lines() {
        if let Some(header) = line.strip_prefix("### ") {
            if let Some((role, ts, lines)) = current.take() {
                entries.push(TranscriptEntry {
                    role,
                    timestamp: ts,
                    content: lines.join("\n").trim().to_string(),
                });
            }
            let (role, ts) = if let Some((r, t)) = header.split_once(" — ") {
                (r.trim().to_string(), t.trim().to_string())
            } else {
                (header.to_string(), String::new())
            };
            current = Some((role, ts, Vec::new()));
        } else if let Some((_, _, ref mut lines)) = current {
            lines.push(line.to_string());
        }
    }
    if let Some((role, ts, lines)) = current {
        entries.push(TranscriptEntry {
            role,
            timestamp: ts,
            content: lines.join("\n").trim().to_string(),
        });
    }
    entries
}

fn serialise_transcript(entries: &[TranscriptEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        out.push_str(&format!("### {} — {}\n\n{}\n\n", e.role, e.timestamp, e.content));
    }
    out
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(cap: usize) -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path(), Some(cap)).unwrap();
        (dir, store)
    }

    #[test]
    fn append_and_read() {
        let (_dir, store) = setup(10);

        store.append("s1", "user", "hello").unwrap();
        store.append("s1", "assistant", "hi there").unwrap();

        let entries = store.read_last("s1", 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, "user");
        assert_eq!(entries[0].content, "hello");
        assert_eq!(entries[1].role, "assistant");
        assert_eq!(entries[1].content, "hi there");
    }

    #[test]
    fn fifo_cap_drops_oldest() {
        let (_dir, store) = setup(3);

        for i in 0..5 {
            store.append("s1", "user", &format!("msg{i}")).unwrap();
        }

        let entries = store.read_last("s1", 10).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].content, "msg2");
        assert_eq!(entries[2].content, "msg4");
    }

    #[test]
    fn read_last_n_returns_tail() {
        let (_dir, store) = setup(10);

        store.append("s1", "user", "a").unwrap();
        store.append("s1", "assistant", "b").unwrap();
        store.append("s1", "user", "c").unwrap();

        let entries = store.read_last("s1", 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "b");
        assert_eq!(entries[1].content, "c");
    }

    #[test]
    fn unknown_session_reads_empty() {
        let (_dir, store) = setup(10);
        assert!(store.read_last("never-written", 5).unwrap().is_empty());
    }

    #[test]
    fn sessions_are_isolated() {
        let (_dir, store) = setup(10);
        store.append("s1", "user", "for s1").unwrap();
        store.append("s2", "user", "for s2").unwrap();

        let s1 = store.read_last("s1", 10).unwrap();
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].content, "for s1");
    }

    #[test]
    fn multiline_content_round_trips() {
        let (_dir, store) = setup(10);
        store.append("s1", "assistant", "line one\nline two").unwrap();

        let entries = store.read_last("s1", 1).unwrap();
        assert_eq!(entries[0].content, "line one\nline two");
    }

    #[test]
    fn invalid_session_id_rejected() {
        let (_dir, store) = setup(10);
        assert!(store.append("../escape", "user", "nope").is_err());
        assert!(store.append("", "user", "nope").is_err());
    }

    #[test]
    fn timestamps_are_iso8601() {
        let (_dir, store) = setup(10);
        store.append("s1", "user", "hello").unwrap();
        let entries = store.read_last("s1", 1).unwrap();
        assert!(entries[0].timestamp.ends_with('Z'));
        assert!(entries[0].timestamp.contains('T'));
    }
}
