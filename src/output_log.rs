//! Output Log (C2): a durable, append-only per-session chunk store with
//! full-text search and soft-delete, backed by SQLite + FTS5.
//!
//! `chunks` is the single source of truth; `chunks_fts` is a derived FTS5
//! index kept in sync purely through triggers, so callers never write to
//! it directly.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::ResultExt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogChunk {
    pub id: i64,
    pub session_id: String,
    pub ts: f64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: i64,
    pub session_id: String,
    pub ts: f64,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryPage {
    pub chunks: Vec<LogChunk>,
    pub earliest_ts: Option<f64>,
}

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    ts REAL NOT NULL,
    content TEXT NOT NULL,
    archived INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_chunks_session_ts
    ON chunks(session_id, ts);
";

const FTS_SCHEMA: &str = "\
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts
    USING fts5(content, content=chunks, content_rowid=id);
";

const FTS_TRIGGERS: &str = "\
CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks
BEGIN
    INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
END;
CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks
BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.id, old.content);
END;
CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks
BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.id, old.content);
    INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
END;
";

/// Append-only output log. One writer per process is assumed; the
/// connection is guarded by a mutex so any number of async callers can
/// share it (sqlite itself serializes writers regardless).
pub struct OutputLog {
    conn: Mutex<Connection>,
}

impl OutputLog {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context_path("create state dir", parent)?;
        }
        let conn = Connection::open(db_path).context_path("open output log", db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(FTS_SCHEMA)?;
        conn.execute_batch(FTS_TRIGGERS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory log, for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(FTS_SCHEMA)?;
        conn.execute_batch(FTS_TRIGGERS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// No-op if `lines` is empty; otherwise atomically inserts one chunk.
    pub fn append(&self, session_id: &str, lines: &[String]) -> anyhow::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let content = lines.join("\n");
        let ts = now_secs();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chunks (session_id, ts, content) VALUES (?1, ?2, ?3)",
            rusqlite::params![session_id, ts, content],
        )?;
        Ok(())
    }

    /// Newest up-to-`limit` non-archived chunks with `ts < before` if
    /// given, returned chronologically (oldest first).
    pub fn read(&self, session_id: &str, before: Option<f64>, limit: usize) -> anyhow::Result<HistoryPage> {
        let conn = self.conn.lock().unwrap();
        let mut rows_vec: Vec<LogChunk> = Vec::new();

        let mut collect = |mut stmt: rusqlite::Statement, params: &[&dyn rusqlite::ToSql]| -> anyhow::Result<()> {
            let mut rows = stmt.query(params)?;
            while let Some(row) = rows.next()? {
                rows_vec.push(LogChunk {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    ts: row.get(2)?,
                    content: row.get(3)?,
                });
            }
            Ok(())
        };

        if let Some(before) = before {
            let stmt = conn.prepare(
                "SELECT id, session_id, ts, content FROM chunks \
                 WHERE session_id = ?1 AND ts < ?2 AND archived = 0 \
                 ORDER BY ts DESC LIMIT ?3",
            )?;
            collect(stmt, &[&session_id, &before, &(limit as i64)])?;
        } else {
            let stmt = conn.prepare(
                "SELECT id, session_id, ts, content FROM chunks \
                 WHERE session_id = ?1 AND archived = 0 \
                 ORDER BY ts DESC LIMIT ?2",
            )?;
            collect(stmt, &[&session_id, &(limit as i64)])?;
        }

        rows_vec.reverse();
        let earliest_ts = rows_vec.first().map(|c| c.ts);
        Ok(HistoryPage {
            chunks: rows_vec,
            earliest_ts,
        })
    }

    /// Full-text search, ranked by relevance, each result carrying a
    /// `<b>…</b>`-marked snippet with ≈40 tokens of context.
    pub fn search(&self, query: &str, session_id: Option<&str>, limit: usize) -> anyhow::Result<Vec<SearchResult>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::new();

        let sql = if session_id.is_some() {
            "SELECT c.id, c.session_id, c.ts, snippet(chunks_fts, 0, '<b>', '</b>', '...', 40) \
             FROM chunks_fts f JOIN chunks c ON c.id = f.rowid \
             WHERE f.content MATCH ?1 AND c.session_id = ?2 AND c.archived = 0 \
             ORDER BY f.rank LIMIT ?3"
        } else {
            "SELECT c.id, c.session_id, c.ts, snippet(chunks_fts, 0, '<b>', '</b>', '...', 40) \
             FROM chunks_fts f JOIN chunks c ON c.id = f.rowid \
             WHERE f.content MATCH ?1 AND c.archived = 0 \
             ORDER BY f.rank LIMIT ?2"
        };
        let mut stmt = conn.prepare(sql)?;

        let mut push_rows = |mut rows: rusqlite::Rows| -> anyhow::Result<()> {
            while let Some(row) = rows.next()? {
                out.push(SearchResult {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    ts: row.get(2)?,
                    snippet: row.get(3)?,
                });
            }
            Ok(())
        };

        if let Some(sid) = session_id {
            let rows = stmt.query(rusqlite::params![query, sid, limit as i64])?;
            push_rows(rows)?;
        } else {
            let rows = stmt.query(rusqlite::params![query, limit as i64])?;
            push_rows(rows)?;
        }
        Ok(out)
    }

    pub fn latest_ts(&self, session_id: &str) -> anyhow::Result<Option<f64>> {
        let conn = self.conn.lock().unwrap();
        let ts: Option<f64> = conn.query_row(
            "SELECT MAX(ts) FROM chunks WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(ts)
    }

    pub fn soft_delete(&self, session_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE chunks SET archived = 1 WHERE session_id = ?1",
            [session_id],
        )?;
        Ok(())
    }

    pub fn session_ids(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT DISTINCT session_id FROM chunks WHERE archived = 0")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Releases the underlying connection. Subsequent calls will fail;
    /// only meant to be used once, at shutdown.
    pub fn close(&self) {
        // Connection is dropped with the OutputLog value itself; this
        // exists as an explicit lifecycle hook mirroring the storage
        // contract's close() operation.
    }
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_round_trips() {
        let log = OutputLog::open_in_memory().unwrap();
        log.append("s1", &["l1".to_string(), "l2".to_string()]).unwrap();
        let page = log.read("s1", None, 50).unwrap();
        assert_eq!(page.chunks.len(), 1);
        assert_eq!(page.chunks[0].content, "l1\nl2");
    }

    #[test]
    fn append_empty_lines_is_noop() {
        let log = OutputLog::open_in_memory().unwrap();
        log.append("s1", &[]).unwrap();
        let page = log.read("s1", None, 50).unwrap();
        assert!(page.chunks.is_empty());
    }

    #[test]
    fn soft_delete_hides_from_read_search_and_session_ids() {
        let log = OutputLog::open_in_memory().unwrap();
        log.append("s1", &["hello world".to_string()]).unwrap();
        assert_eq!(log.session_ids().unwrap(), vec!["s1".to_string()]);

        log.soft_delete("s1").unwrap();
        assert!(log.read("s1", None, 50).unwrap().chunks.is_empty());
        assert!(log.search("hello", Some("s1"), 10).unwrap().is_empty());
        assert!(log.session_ids().unwrap().is_empty());
    }

    #[test]
    fn soft_delete_is_idempotent() {
        let log = OutputLog::open_in_memory().unwrap();
        log.append("s1", &["x".to_string()]).unwrap();
        log.soft_delete("s1").unwrap();
        log.soft_delete("s1").unwrap();
        assert!(log.session_ids().unwrap().is_empty());
    }

    #[test]
    fn search_finds_inserted_content() {
        let log = OutputLog::open_in_memory().unwrap();
        log.append("s1", &["the quick brown fox".to_string()]).unwrap();
        let results = log.search("quick", None, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].snippet.contains("<b>"));
    }
}
