use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Session-scoped claims for `run_once` modules.
///
/// Keyed by (project key, module name). The first profile to reach a module
/// builds it inside the claim; concurrent profiles wait on the same claim and
/// reuse the result. A failed build leaves the claim empty so a later run can
/// try again. Successful claims are never removed; the cache dies with its
/// session.
#[derive(Debug, Default)]
pub struct RunOnceCache {
    claims: DashMap<(String, String), Arc<OnceCell<()>>>,
}

impl RunOnceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The claim for one module. Concurrent first calls get the same cell.
    pub fn claim(&self, project_key: &str, module: &str) -> Arc<OnceCell<()>> {
        self.claims
            .entry((project_key.to_string(), module.to_string()))
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    pub fn contains(&self, project_key: &str, module: &str) -> bool {
        self.claims
            .get(&(project_key.to_string(), module.to_string()))
            .is_some_and(|cell| cell.initialized())
    }

    /// Record a successful build done outside a claim.
    /// Returns false if the module was already built.
    pub fn mark(&self, project_key: &str, module: &str) -> bool {
        self.claim(project_key, module).set(()).is_ok()
    }

    pub fn len(&self) -> usize {
        self.claims.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
