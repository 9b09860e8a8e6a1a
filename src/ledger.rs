//! SQLite ledger of runs and their stage history.
//!
//! Each distinct input gets a stable sequence number the first time it is
//! seen; later runs of the same input reuse it, so their artifacts land in
//! the same run directory and resume.

use crate::error::{LecternError, Result};
use crate::stage::Stage;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS runs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        input_key TEXT NOT NULL UNIQUE,
        input_kind TEXT NOT NULL,
        label TEXT NOT NULL,
        run_id TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL CHECK(status IN ('pending', 'done', 'partial', 'failed')),
        document_path TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_runs_run_id ON runs(run_id);

    CREATE TABLE IF NOT EXISTS stage_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        stage TEXT NOT NULL,
        outcome TEXT NOT NULL,
        message TEXT,
        recorded_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_stage_events_run_id ON stage_events(run_id);
"#;

/// Terminal (or in-progress) state of a run as recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Done,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Done => "done",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "done" => RunStatus::Done,
            "partial" => RunStatus::Partial,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Pending,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a stage during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Skipped,
    Degraded,
    Failed,
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageOutcome::Completed => "completed",
            StageOutcome::Skipped => "skipped",
            StageOutcome::Degraded => "degraded",
            StageOutcome::Failed => "failed",
        }
    }
}

/// One row of the `runs` table.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub seq: i64,
    pub run_id: String,
    pub input_key: String,
    pub input_kind: String,
    pub label: String,
    pub status: RunStatus,
    pub document_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the `stage_events` table.
#[derive(Debug, Clone)]
pub struct StageEvent {
    pub stage: String,
    pub outcome: String,
    pub message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Persistent record of runs.
pub struct RunLedger {
    conn: Mutex<Connection>,
}

impl RunLedger {
    /// Open (or create) the ledger database at `path`.
    #[instrument(skip_all)]
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened run ledger at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory ledger (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LecternError::Ledger(format!("Failed to acquire lock: {}", e)))
    }

    /// Get or create the run for an input, marking it pending.
    ///
    /// The run id is `<seq>-<slug>` and never changes once assigned.
    #[instrument(skip(self))]
    pub fn open_run(&self, input_key: &str, input_kind: &str, label: &str, slug: &str) -> Result<RunRecord> {
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.lock()?;
            let inserted = conn.execute(
                r#"
                INSERT OR IGNORE INTO runs (input_key, input_kind, label, status, created_at, updated_at)
                VALUES (?1, ?2, ?3, 'pending', ?4, ?4)
                "#,
                params![input_key, input_kind, label, now],
            )?;

            if inserted > 0 {
                let seq = conn.last_insert_rowid();
                let run_id = format!("{:03}-{}", seq, slug);
                conn.execute(
                    "UPDATE runs SET run_id = ?1 WHERE seq = ?2",
                    params![run_id, seq],
                )?;
                debug!("Assigned run id {} to {}", run_id, input_key);
            } else {
                conn.execute(
                    "UPDATE runs SET status = 'pending', updated_at = ?1 WHERE input_key = ?2",
                    params![now, input_key],
                )?;
                debug!("Reusing existing run for {}", input_key);
            }
        }

        self.find_by_key(input_key)?
            .ok_or_else(|| LecternError::Ledger(format!("run for {} vanished", input_key)))
    }

    /// Append a stage outcome to the run's history.
    pub fn record_stage(
        &self,
        run_id: &str,
        stage: Stage,
        outcome: StageOutcome,
        message: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO stage_events (run_id, stage, outcome, message, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![run_id, stage.as_str(), outcome.as_str(), message, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record the terminal status of a run.
    pub fn finish_run(&self, run_id: &str, status: RunStatus, document: Option<&Path>) -> Result<()> {
        let conn = self.lock()?;
        let document = document.map(|p| p.to_string_lossy().to_string());
        let updated = conn.execute(
            r#"
            UPDATE runs SET status = ?1, document_path = ?2, updated_at = ?3
            WHERE run_id = ?4
            "#,
            params![status.as_str(), document, Utc::now().to_rfc3339(), run_id],
        )?;
        if updated == 0 {
            return Err(LecternError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    pub fn find_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.query_one("WHERE run_id = ?1", run_id)
    }

    pub fn find_by_key(&self, input_key: &str) -> Result<Option<RunRecord>> {
        self.query_one("WHERE input_key = ?1", input_key)
    }

    fn query_one(&self, clause: &str, value: &str) -> Result<Option<RunRecord>> {
        let conn = self.lock()?;
        let sql = format!("{} {}", SELECT_RUN, clause);
        let result = conn.query_row(&sql, params![value], row_to_record);

        match result {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All runs, oldest first.
    pub fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY seq", SELECT_RUN))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Stage history of a run, oldest first.
    pub fn stage_events(&self, run_id: &str) -> Result<Vec<StageEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT stage, outcome, message, recorded_at FROM stage_events
            WHERE run_id = ?1 ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let recorded_at: String = row.get(3)?;
            Ok(StageEvent {
                stage: row.get(0)?,
                outcome: row.get(1)?,
                message: row.get(2)?,
                recorded_at: parse_time(&recorded_at),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

const SELECT_RUN: &str = r#"
    SELECT seq, run_id, input_key, input_kind, label, status, document_path, created_at, updated_at
    FROM runs
"#;

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    let status: String = row.get(5)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(RunRecord {
        seq: row.get(0)?,
        run_id: row.get(1)?,
        input_key: row.get(2)?,
        input_kind: row.get(3)?,
        label: row.get(4)?,
        status: RunStatus::parse(&status),
        document_path: row.get(6)?,
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_input_reuses_run_id() {
        let ledger = RunLedger::in_memory().unwrap();
        let first = ledger
            .open_run("/tmp/lecture.mp4", "local_video", "lecture", "lecture")
            .unwrap();
        ledger.finish_run(&first.run_id, RunStatus::Failed, None).unwrap();

        let again = ledger
            .open_run("/tmp/lecture.mp4", "local_video", "lecture", "lecture")
            .unwrap();
        assert_eq!(first.run_id, again.run_id);
        assert_eq!(again.status, RunStatus::Pending);
        assert_eq!(first.run_id, "001-lecture");
    }

    #[test]
    fn test_distinct_inputs_get_sequential_ids() {
        let ledger = RunLedger::in_memory().unwrap();
        let a = ledger.open_run("a.md", "local_text", "a", "a").unwrap();
        let b = ledger.open_run("b.md", "local_text", "b", "b").unwrap();
        assert_eq!(a.run_id, "001-a");
        assert_eq!(b.run_id, "002-b");
        assert_eq!(ledger.list_runs().unwrap().len(), 2);
    }

    #[test]
    fn test_finish_and_history() {
        let ledger = RunLedger::in_memory().unwrap();
        let run = ledger.open_run("a.md", "local_text", "a", "a").unwrap();
        ledger
            .record_stage(&run.run_id, Stage::SynthesizeNotes, StageOutcome::Completed, None)
            .unwrap();
        ledger
            .record_stage(
                &run.run_id,
                Stage::EnrichImages,
                StageOutcome::Degraded,
                Some("quota exceeded"),
            )
            .unwrap();
        ledger
            .finish_run(&run.run_id, RunStatus::Partial, Some(Path::new("/out/a.pdf")))
            .unwrap();

        let found = ledger.find_run(&run.run_id).unwrap().unwrap();
        assert_eq!(found.status, RunStatus::Partial);
        assert_eq!(found.document_path.as_deref(), Some("/out/a.pdf"));

        let events = ledger.stage_events(&run.run_id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].stage, "images");
        assert_eq!(events[1].outcome, "degraded");
        assert_eq!(events[1].message.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn test_failed_finish_clears_document() {
        let ledger = RunLedger::in_memory().unwrap();
        let run = ledger.open_run("a.md", "local_text", "a", "a").unwrap();
        ledger
            .finish_run(&run.run_id, RunStatus::Done, Some(Path::new("/out/a.pdf")))
            .unwrap();
        ledger.finish_run(&run.run_id, RunStatus::Failed, None).unwrap();

        let found = ledger.find_run(&run.run_id).unwrap().unwrap();
        assert_eq!(found.status, RunStatus::Failed);
        assert!(found.document_path.is_none());
    }

    #[test]
    fn test_finish_unknown_run() {
        let ledger = RunLedger::in_memory().unwrap();
        let err = ledger.finish_run("999-nope", RunStatus::Done, None).unwrap_err();
        assert!(matches!(err, LecternError::RunNotFound(_)));
        assert!(ledger.find_run("999-nope").unwrap().is_none());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("runs.db");
        {
            let ledger = RunLedger::open(&path).unwrap();
            ledger.open_run("a.md", "local_text", "a", "a").unwrap();
        }
        let reopened = RunLedger::open(&path).unwrap();
        assert_eq!(reopened.list_runs().unwrap()[0].run_id, "001-a");
    }
}
