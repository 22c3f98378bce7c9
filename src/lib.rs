//! forgebuild: multi-profile build orchestration
//!
//! Builds the modules of a project for several deployment profiles at once.
//! Commons modules run once up front, the remaining (profile, module) pairs
//! run on a bounded pool of tokio tasks, and each module's artifacts are
//! copied into a per-profile output directory.
//!
//! ```no_run
//! use forgebuild::{
//!     BuildSession, ForgeConfig, MultiProfileScheduler, PipelineRequest, ProfileExecutor,
//!     TracingLogSink,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> forgebuild::Result<()> {
//! let config = ForgeConfig::load_from_path("forge.yaml")?;
//! let project = Arc::new(config.resolve_project("billing", None)?);
//! let session = Arc::new(BuildSession::with_environment(config.environment.clone()));
//!
//! let scheduler = MultiProfileScheduler::from_config(
//!     &config,
//!     ProfileExecutor::maven(session),
//!     Arc::new(TracingLogSink),
//! )?;
//! let report = scheduler
//!     .run(PipelineRequest::new(project, config.profiles_for("billing", None)))
//!     .await;
//! assert!(report.succeeded());
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
pub mod config;
pub mod core;
pub mod executor;
pub mod history;
pub mod log_sink;
pub mod model;
pub mod runner;
pub mod scheduler;
pub mod session;

pub use artifacts::{ArtifactCopier, CopyRequest, DestinationLedger, FsArtifactCopier};
pub use config::{ForgeConfig, GroupConfig, PathsConfig, ProjectConfig};
pub use crate::core::{BuildError, CancellationToken, Result};
pub use executor::{ProfileExecutor, ProfileRequest};
pub use history::{RunHistory, RunRecord, RunStatus, SledRunHistory};
pub use log_sink::{BufferingLogSink, LogSink, TracingLogSink};
pub use model::{ExecutionMode, ModuleDescriptor, PlacementAreas, ProjectDescriptor};
pub use runner::{BuildInvocation, BuildRunner, MavenRunner};
pub use scheduler::{
    effective_workers, ModuleMutexRegistry, MultiProfileScheduler, PipelineReport, PipelineRequest, TaskOutcome,
};
pub use session::{BuildSession, RunOnceCache};
