//! Pipeline run history
//!
//! Every scheduler invocation opens a run record, appends each log line to it
//! and closes it with a final [`RunStatus`]. History is best-effort: the
//! scheduler logs and swallows store failures.

pub mod sled_store;

pub use sled_store::SledRunHistory;

use crate::core::Result;
use crate::log_sink::LogSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

/// Final status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Data known when a run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRun {
    pub kind: String,
    pub session_id: Uuid,
    pub project_key: String,
    pub profiles: Vec<String>,
    pub modules: Vec<String>,
}

impl NewRun {
    pub fn build(session_id: Uuid, project_key: impl Into<String>, profiles: Vec<String>, modules: Vec<String>) -> Self {
        Self {
            kind: "build".to_string(),
            session_id,
            project_key: project_key.into(),
            profiles,
            modules,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub run: NewRun,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// `None` while the run is in progress
    pub status: Option<RunStatus>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMessage {
    pub run_id: Uuid,
    pub logged_at: DateTime<Utc>,
    pub message: String,
}

/// Persistent store of pipeline runs
#[async_trait]
pub trait RunHistory: Send + Sync {
    async fn start_run(&self, run: NewRun) -> Result<Uuid>;

    async fn log_message(&self, run_id: Uuid, message: &str) -> Result<()>;

    async fn finish_run(&self, run_id: Uuid, status: RunStatus, summary: Option<&str>) -> Result<()>;

    /// Most recent runs first
    async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>>;

    /// Messages of one run in logging order
    async fn messages(&self, run_id: Uuid) -> Result<Vec<RunMessage>>;
}

/// Log sink that appends every line to a history run.
///
/// Lines are queued and written by a background task so the sink never blocks
/// a build. Drop every clone of the sink, then await the writer handle to be
/// sure all lines are stored.
#[derive(Debug, Clone)]
pub struct HistoryLogSink {
    tx: mpsc::UnboundedSender<String>,
}

impl HistoryLogSink {
    pub fn spawn(history: Arc<dyn RunHistory>, run_id: Uuid) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = history.log_message(run_id, &line).await {
                    warn!(run_id = %run_id, error = %e, "Failed to record history message");
                }
            }
        });
        (Self { tx }, writer)
    }
}

impl LogSink for HistoryLogSink {
    fn line(&self, line: &str) {
        // Writer gone means the run is over; late lines are dropped
        let _ = self.tx.send(line.to_string());
    }
}
