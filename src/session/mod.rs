//! Orchestrator session context
//!
//! A [`BuildSession`] replaces process-global state: construct one per
//! orchestrator lifetime and hand it to every executor and scheduler that
//! should share run-once markers.

pub mod run_once;

pub use run_once::RunOnceCache;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug)]
pub struct BuildSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    run_once: RunOnceCache,
    environment: HashMap<String, String>,
}

impl BuildSession {
    pub fn new() -> Self {
        Self::with_environment(HashMap::new())
    }

    /// Session whose build processes receive these environment overrides
    pub fn with_environment(environment: HashMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            run_once: RunOnceCache::new(),
            environment,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn run_once(&self) -> &RunOnceCache {
        &self.run_once
    }

    pub fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }
}

impl Default for BuildSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_do_not_share_markers() {
        let first = BuildSession::new();
        let second = BuildSession::new();
        first.run_once().mark("proj", "commons");

        assert!(first.run_once().contains("proj", "commons"));
        assert!(!second.run_once().contains("proj", "commons"));
        assert_ne!(first.id(), second.id());
    }
}
