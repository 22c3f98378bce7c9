//! External build runner seam

pub mod maven;

pub use maven::MavenRunner;

use crate::core::{CancellationToken, Result};
use crate::log_sink::LogSink;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

/// One build process request
#[derive(Debug, Clone, Copy)]
pub struct BuildInvocation<'a> {
    pub module_path: &'a Path,
    pub goals: &'a [String],
    /// `None` builds without a profile flag
    pub profile: Option<&'a str>,
    pub env_overrides: &'a HashMap<String, String>,
    /// Output is not captured and cancellation only requests termination
    pub detached: bool,
}

impl BuildInvocation<'_> {
    /// Arguments passed to the build tool
    pub fn args(&self) -> Vec<String> {
        let mut args = self.goals.to_vec();
        if let Some(profile) = self.profile {
            args.push("-P".to_string());
            args.push(profile.to_string());
        }
        args
    }
}

/// Runs a module's build and reports its exit code
#[async_trait]
pub trait BuildRunner: Send + Sync {
    /// Execute the build, streaming each output line to `output`.
    ///
    /// Implementations must stop the process once `cancel` is set. A spawn
    /// failure is an `Err`; a build that ran and failed is a non-zero code.
    async fn run(
        &self,
        invocation: &BuildInvocation<'_>,
        output: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<i32>;
}
