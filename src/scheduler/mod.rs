//! Multi-profile scheduling
//!
//! A pipeline run builds the commons modules once against the first profile,
//! then fans every remaining (profile, module) pair out to a bounded pool of
//! tokio tasks. The first failure cancels the shared token and closes the
//! pool; tasks that have not started resolve as cancelled.

pub mod mutex_registry;

pub use crate::history::RunStatus;
pub use mutex_registry::ModuleMutexRegistry;

use crate::artifacts::DestinationLedger;
use crate::config::ForgeConfig;
use crate::core::{CancellationToken, Result};
use crate::executor::{ProfileExecutor, ProfileRequest};
use crate::history::{HistoryLogSink, NewRun, RunHistory, SledRunHistory};
use crate::log_sink::{FanoutLogSink, LogSink};
use crate::model::ProjectDescriptor;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one (profile, module) task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Ok,
    Error,
    Cancelled,
}

/// Worker count: explicit override, then the configured default, then
/// `task_count` clamped to `2..=4`. Zero counts as unset.
pub fn effective_workers(task_count: usize, requested: Option<usize>, configured: Option<usize>) -> usize {
    requested
        .filter(|&n| n > 0)
        .or(configured.filter(|&n| n > 0))
        .unwrap_or_else(|| task_count.clamp(2, 4))
}

/// What to build in one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub project: Arc<ProjectDescriptor>,
    pub profiles: Vec<String>,
    pub modules: Option<HashSet<String>>,
    pub max_workers: Option<usize>,
    pub include_optional: bool,
    pub cancel: CancellationToken,
}

impl PipelineRequest {
    pub fn new<I, S>(project: Arc<ProjectDescriptor>, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            project,
            profiles: profiles.into_iter().map(Into::into).collect(),
            modules: None,
            max_workers: None,
            include_optional: true,
            cancel: CancellationToken::new(),
        }
    }

    /// Restrict the run to these module names
    pub fn modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules = Some(modules.into_iter().map(Into::into).collect());
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn include_optional(mut self, include: bool) -> Self {
        self.include_optional = include;
        self
    }

    /// Use a caller-held token so the run can be cancelled from outside
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub status: RunStatus,
    /// Profiles whose every task finished successfully, in completion order
    pub completed_profiles: Vec<String>,
    pub tasks: usize,
    pub workers: usize,
    pub overall_success: bool,
    pub cancelled: bool,
    pub run_id: Option<Uuid>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.overall_success && !self.cancelled
    }
}

struct RunRecorder {
    history: Arc<dyn RunHistory>,
    run_id: Uuid,
    writer: JoinHandle<()>,
}

impl RunRecorder {
    async fn finish(self, status: RunStatus, summary: &str) {
        // Every sink clone is gone by now, the writer drains and exits
        if let Err(e) = self.writer.await {
            warn!(run_id = %self.run_id, error = %e, "History writer task failed");
        }
        if let Err(e) = self.history.finish_run(self.run_id, status, Some(summary)).await {
            warn!(run_id = %self.run_id, error = %e, "Failed to finish history run");
        }
    }
}

struct Drive {
    status: RunStatus,
    summary: &'static str,
    completed_profiles: Vec<String>,
    tasks: usize,
    workers: usize,
    overall_success: bool,
}

/// Everything a spawned task needs, shared by reference count
#[derive(Clone)]
struct TaskContext {
    executor: ProfileExecutor,
    project: Arc<ProjectDescriptor>,
    semaphore: Arc<Semaphore>,
    mutexes: Arc<ModuleMutexRegistry>,
    ledger: Arc<DestinationLedger>,
    output: Arc<dyn LogSink>,
    cancel: CancellationToken,
    include_optional: bool,
}

async fn run_task(ctx: TaskContext, profile: String, module: String, serial: bool) -> TaskOutcome {
    // A closed pool means the pipeline already stopped
    let Ok(_permit) = ctx.semaphore.clone().acquire_owned().await else {
        return TaskOutcome::Cancelled;
    };
    if ctx.cancel.is_cancelled() {
        return TaskOutcome::Cancelled;
    }

    let serial_guard = if serial {
        Some(ctx.mutexes.lock(&module).await)
    } else {
        None
    };
    let filter = HashSet::from([module.clone()]);
    let result = ctx
        .executor
        .execute(ProfileRequest {
            project: &ctx.project,
            profile: &profile,
            include_optional: ctx.include_optional,
            filter: Some(&filter),
            cancel: &ctx.cancel,
            ledger: &ctx.ledger,
            output: ctx.output.as_ref(),
        })
        .await;
    drop(serial_guard);

    match result {
        Ok(()) => TaskOutcome::Ok,
        Err(e) if e.is_cancellation() => TaskOutcome::Cancelled,
        Err(e) => {
            debug!(profile = %profile, module = %module, error = %e, "Task failed");
            ctx.cancel.cancel();
            TaskOutcome::Error
        }
    }
}

/// Drives pipeline runs over a [`ProfileExecutor`]
pub struct MultiProfileScheduler {
    executor: ProfileExecutor,
    output: Arc<dyn LogSink>,
    default_workers: Option<usize>,
    history: Option<Arc<dyn RunHistory>>,
}

impl MultiProfileScheduler {
    pub fn new(executor: ProfileExecutor, output: Arc<dyn LogSink>) -> Self {
        Self {
            executor,
            output,
            default_workers: None,
            history: None,
        }
    }

    /// Scheduler using the configured worker default and history store
    pub fn from_config(config: &ForgeConfig, executor: ProfileExecutor, output: Arc<dyn LogSink>) -> Result<Self> {
        let mut scheduler = Self::new(executor, output).with_default_workers(config.max_build_workers);
        if let Some(path) = &config.history_path {
            scheduler = scheduler.with_history(Arc::new(SledRunHistory::open(path)?));
        }
        Ok(scheduler)
    }

    pub fn with_default_workers(mut self, workers: Option<usize>) -> Self {
        self.default_workers = workers;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn RunHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn executor(&self) -> &ProfileExecutor {
        &self.executor
    }

    /// Build every (profile, module) combination of the request
    pub async fn run(&self, request: PipelineRequest) -> PipelineReport {
        let cancel = request.cancel.clone();
        let project = request.project.clone();
        let selected: Vec<String> = project
            .select(request.modules.as_ref())
            .map(|m| m.name.clone())
            .collect();
        info!(
            project = %project.key,
            profiles = ?request.profiles,
            modules = selected.len(),
            "Starting pipeline"
        );

        let (recorder, output) = self.open_run(&project, &request.profiles, selected).await;
        let drive = self.drive(&request, output).await;

        let cancelled = cancel.is_cancelled();
        let (status, summary) = match drive.status {
            RunStatus::Success if cancelled => (RunStatus::Cancelled, "Pipeline cancelled by user."),
            status => (status, drive.summary),
        };
        info!(project = %project.key, status = %status, "Pipeline finished");

        let run_id = recorder.as_ref().map(|r| r.run_id);
        if let Some(recorder) = recorder {
            recorder.finish(status, summary).await;
        }

        PipelineReport {
            status,
            completed_profiles: drive.completed_profiles,
            tasks: drive.tasks,
            workers: drive.workers,
            overall_success: drive.overall_success,
            cancelled,
            run_id,
        }
    }

    async fn open_run(
        &self,
        project: &ProjectDescriptor,
        profiles: &[String],
        modules: Vec<String>,
    ) -> (Option<RunRecorder>, Arc<dyn LogSink>) {
        let Some(history) = self.history.clone() else {
            return (None, self.output.clone());
        };
        let run = NewRun::build(self.executor.session().id(), project.key.clone(), profiles.to_vec(), modules);
        match history.start_run(run).await {
            Ok(run_id) => {
                let (sink, writer) = HistoryLogSink::spawn(history.clone(), run_id);
                let output = FanoutLogSink::new().with(self.output.clone()).with(Arc::new(sink));
                let recorder = RunRecorder {
                    history,
                    run_id,
                    writer,
                };
                (Some(recorder), Arc::new(output))
            }
            Err(e) => {
                warn!(project = %project.key, error = %e, "Failed to start history run");
                (None, self.output.clone())
            }
        }
    }

    async fn drive(&self, request: &PipelineRequest, output: Arc<dyn LogSink>) -> Drive {
        let project = &request.project;
        let cancel = &request.cancel;
        let ledger = Arc::new(DestinationLedger::new());
        let modules: Vec<_> = project.select(request.modules.as_ref()).collect();

        let Some(first_profile) = request.profiles.first() else {
            debug!(project = %project.key, "No profiles requested");
            return Drive {
                status: RunStatus::Success,
                summary: "No profiles requested.",
                completed_profiles: Vec::new(),
                tasks: 0,
                workers: 0,
                overall_success: true,
            };
        };

        let commons: HashSet<String> = modules
            .iter()
            .filter(|m| m.is_commons())
            .map(|m| m.name.clone())
            .collect();
        // Every profile's outputs are cleaned before anything lands in them
        for (index, profile) in request.profiles.iter().enumerate() {
            let placed: HashSet<String> = modules
                .iter()
                .filter(|m| index == 0 || !commons.contains(&m.name))
                .map(|m| m.name.clone())
                .collect();
            let prepared = self
                .executor
                .prepare_outputs(ProfileRequest {
                    project,
                    profile,
                    include_optional: request.include_optional,
                    filter: Some(&placed),
                    cancel,
                    ledger: &ledger,
                    output: output.as_ref(),
                })
                .await;
            if let Err(e) = prepared {
                cancel.cancel();
                error!(project = %project.key, profile = %profile, error = %e, "Preparing outputs failed");
                output.line("<< ERROR: Pipeline stopped due to failures.");
                return Drive {
                    status: RunStatus::Error,
                    summary: "Output directories could not be prepared.",
                    completed_profiles: Vec::new(),
                    tasks: 0,
                    workers: 0,
                    overall_success: false,
                };
            }
        }

        if !commons.is_empty() {
            info!(project = %project.key, profile = %first_profile, modules = commons.len(), "Commons phase");
            let result = self
                .executor
                .execute(ProfileRequest {
                    project,
                    profile: first_profile,
                    include_optional: true,
                    filter: Some(&commons),
                    cancel,
                    ledger: &ledger,
                    output: output.as_ref(),
                })
                .await;
            if let Err(e) = result {
                cancel.cancel();
                let (status, summary) = if e.is_cancellation() {
                    output.line("<< Pipeline cancelled by user.");
                    (RunStatus::Cancelled, "Pipeline cancelled by user.")
                } else {
                    error!(project = %project.key, error = %e, "Commons phase failed");
                    output.line("<< ERROR: Commons phase failed. Stopping the pipeline.");
                    (RunStatus::Error, "Commons phase failed.")
                };
                return Drive {
                    status,
                    summary,
                    completed_profiles: Vec::new(),
                    tasks: 0,
                    workers: 0,
                    overall_success: false,
                };
            }
        }

        let mut tasks = Vec::new();
        let mut pending: HashMap<String, HashSet<String>> = HashMap::new();
        for profile in &request.profiles {
            output.line(&format!("== Profile: {} ==", profile));
            let mut names = HashSet::new();
            for module in modules.iter().filter(|m| !commons.contains(&m.name)) {
                tasks.push((profile.clone(), module.name.clone(), module.serial_across_profiles));
                names.insert(module.name.clone());
            }
            if !names.is_empty() {
                pending.insert(profile.clone(), names);
            }
        }

        let task_count = tasks.len();
        if task_count == 0 {
            return Drive {
                status: RunStatus::Success,
                summary: "No pending tasks.",
                completed_profiles: Vec::new(),
                tasks: 0,
                workers: 0,
                overall_success: true,
            };
        }

        let workers = effective_workers(task_count, request.max_workers, self.default_workers);
        info!(project = %project.key, tasks = task_count, workers, "Dispatching build tasks");

        let semaphore = Arc::new(Semaphore::new(workers));
        let ctx = TaskContext {
            executor: self.executor.clone(),
            project: project.clone(),
            semaphore: semaphore.clone(),
            mutexes: Arc::new(ModuleMutexRegistry::new()),
            ledger,
            output: output.clone(),
            cancel: cancel.clone(),
            include_optional: request.include_optional,
        };

        let mut running = FuturesUnordered::new();
        for (profile, module, serial) in tasks {
            let handle = tokio::spawn(run_task(ctx.clone(), profile.clone(), module.clone(), serial));
            running.push(async move { (profile, module, handle.await) });
        }
        drop(ctx);

        let mut overall_success = true;
        let mut error_reported = false;
        let mut completed_profiles = Vec::new();

        // Only this loop touches `pending`
        while let Some((profile, module, joined)) = running.next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(profile = %profile, module = %module, error = %e, "Build task panicked");
                    cancel.cancel();
                    if !error_reported {
                        output.line(&format!("[{}] << ERROR in {}: {}", profile, module, e));
                    }
                    TaskOutcome::Error
                }
            };

            match outcome {
                TaskOutcome::Ok => {
                    if let Some(names) = pending.get_mut(&profile) {
                        if names.remove(&module) && names.is_empty() {
                            output.line(&format!("[{}] >> Profile completed.", profile));
                            completed_profiles.push(profile);
                        }
                    }
                }
                TaskOutcome::Error => {
                    overall_success = false;
                    cancel.cancel();
                    semaphore.close();
                    if !error_reported {
                        output.line("<< ERROR: Pipeline stopped due to failures.");
                        error_reported = true;
                    }
                }
                TaskOutcome::Cancelled => overall_success = false,
            }
        }

        if cancel.is_cancelled() {
            semaphore.close();
            if !error_reported {
                warn!(project = %project.key, "Pipeline cancelled by user");
                output.line("<< Pipeline cancelled by user.");
            }
        }

        let (status, summary) = if error_reported {
            (RunStatus::Error, "Pipeline finished with errors.")
        } else if cancel.is_cancelled() || !overall_success {
            (RunStatus::Cancelled, "Pipeline cancelled by user.")
        } else {
            (RunStatus::Success, "Pipeline completed.")
        };

        Drive {
            status,
            summary,
            completed_profiles,
            tasks: task_count,
            workers,
            overall_success,
        }
    }
}
