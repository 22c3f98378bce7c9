use super::{NewRun, RunHistory, RunMessage, RunRecord, RunStatus};
use crate::core::{BuildError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

const RUNS_TREE: &str = "pipeline_runs";
const MESSAGES_TREE: &str = "pipeline_messages";

/// Run history stored in an embedded sled database.
///
/// Runs are keyed by id. Messages are keyed by run id followed by a
/// monotonically increasing sequence number, so a prefix scan returns them in
/// logging order.
#[derive(Debug, Clone)]
pub struct SledRunHistory {
    db: sled::Db,
    runs: sled::Tree,
    messages: sled::Tree,
}

impl SledRunHistory {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| BuildError::history(format!("opening {}", path.display()), e))?;
        info!(path = %path.display(), "Opened run history");
        Self::from_db(db)
    }

    /// In-memory store removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| BuildError::history("opening temporary store", e))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let runs = db
            .open_tree(RUNS_TREE)
            .map_err(|e| BuildError::history("opening runs tree", e))?;
        let messages = db
            .open_tree(MESSAGES_TREE)
            .map_err(|e| BuildError::history("opening messages tree", e))?;
        Ok(Self { db, runs, messages })
    }

    fn load_run(&self, run_id: Uuid) -> Result<RunRecord> {
        let bytes = self
            .runs
            .get(run_id.as_bytes())
            .map_err(|e| BuildError::history("reading run", e))?
            .ok_or_else(|| BuildError::validation_field(format!("unknown history run {run_id}"), "run_id"))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn store_run(&self, record: &RunRecord) -> Result<()> {
        self.runs
            .insert(record.id.as_bytes(), serde_json::to_vec(record)?)
            .map_err(|e| BuildError::history("writing run", e))?;
        Ok(())
    }
}

#[async_trait]
impl RunHistory for SledRunHistory {
    async fn start_run(&self, run: NewRun) -> Result<Uuid> {
        let record = RunRecord {
            id: Uuid::new_v4(),
            run,
            started_at: Utc::now(),
            finished_at: None,
            status: None,
            summary: None,
        };
        self.store_run(&record)?;
        debug!(run_id = %record.id, project = %record.run.project_key, "Started history run");
        Ok(record.id)
    }

    async fn log_message(&self, run_id: Uuid, message: &str) -> Result<()> {
        let seq = self
            .db
            .generate_id()
            .map_err(|e| BuildError::history("allocating message id", e))?;
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(run_id.as_bytes());
        key.extend_from_slice(&seq.to_be_bytes());

        let entry = RunMessage {
            run_id,
            logged_at: Utc::now(),
            message: message.to_string(),
        };
        self.messages
            .insert(key, serde_json::to_vec(&entry)?)
            .map_err(|e| BuildError::history("writing message", e))?;
        Ok(())
    }

    async fn finish_run(&self, run_id: Uuid, status: RunStatus, summary: Option<&str>) -> Result<()> {
        let mut record = self.load_run(run_id)?;
        record.finished_at = Some(Utc::now());
        record.status = Some(status);
        record.summary = summary.map(str::to_string);
        self.store_run(&record)?;
        self.db
            .flush_async()
            .await
            .map_err(|e| BuildError::history("flushing", e))?;
        debug!(run_id = %run_id, status = %status, "Finished history run");
        Ok(())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut records = Vec::new();
        for item in self.runs.iter() {
            let (_, bytes) = item.map_err(|e| BuildError::history("scanning runs", e))?;
            records.push(serde_json::from_slice::<RunRecord>(&bytes)?);
        }
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn messages(&self, run_id: Uuid) -> Result<Vec<RunMessage>> {
        let mut messages = Vec::new();
        for item in self.messages.scan_prefix(run_id.as_bytes()) {
            let (_, bytes) = item.map_err(|e| BuildError::history("scanning messages", e))?;
            messages.push(serde_json::from_slice(&bytes)?);
        }
        Ok(messages)
    }
}
