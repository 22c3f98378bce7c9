use crate::artifacts::{ArtifactCopier, ArtifactPlacement, DestinationLedger, FsArtifactCopier};
use crate::core::{BuildError, CancellationToken, Result};
use crate::log_sink::{LogSink, ProfileLogSink};
use crate::model::{ModuleDescriptor, ProjectDescriptor};
use crate::runner::{BuildInvocation, BuildRunner, MavenRunner};
use crate::session::BuildSession;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One single-profile build
#[derive(Clone, Copy)]
pub struct ProfileRequest<'a> {
    pub project: &'a ProjectDescriptor,
    pub profile: &'a str,
    pub include_optional: bool,
    /// Only modules named here are considered. `None` selects all.
    pub filter: Option<&'a HashSet<String>>,
    pub cancel: &'a CancellationToken,
    pub ledger: &'a DestinationLedger,
    /// Receives unprefixed lines; the executor adds `[profile] `
    pub output: &'a dyn LogSink,
}

/// Builds the selected modules of one project for one profile, in order,
/// stopping at the first failure.
#[derive(Clone)]
pub struct ProfileExecutor {
    runner: Arc<dyn BuildRunner>,
    copier: Arc<dyn ArtifactCopier>,
    session: Arc<BuildSession>,
}

impl ProfileExecutor {
    pub fn new(runner: Arc<dyn BuildRunner>, copier: Arc<dyn ArtifactCopier>, session: Arc<BuildSession>) -> Self {
        Self {
            runner,
            copier,
            session,
        }
    }

    /// Maven runner and filesystem copier
    pub fn maven(session: Arc<BuildSession>) -> Self {
        Self::new(Arc::new(MavenRunner::new()), Arc::new(FsArtifactCopier::new()), session)
    }

    pub fn session(&self) -> &Arc<BuildSession> {
        &self.session
    }

    /// Clean the output directories of the selected modules for this profile,
    /// parents before children. [`execute`](Self::execute) does this first; a
    /// scheduler running one module per task calls it once per profile with
    /// the whole selection before dispatching.
    pub async fn prepare_outputs(&self, request: ProfileRequest<'_>) -> Result<()> {
        let log = ProfileLogSink::new(request.profile, request.output);
        let placement = ArtifactPlacement {
            project: request.project,
            profile: request.profile,
            copier: self.copier.as_ref(),
            ledger: request.ledger,
            output: &log,
            cancel: request.cancel,
        };
        let modules = request.project.ordered_modules(request.filter);

        match placement.prepare_profile(&modules, request.include_optional).await {
            Ok(dirs) => {
                debug!(project = %request.project.key, profile = request.profile, dirs, "Outputs prepared");
                Ok(())
            }
            Err(e) => {
                error!(project = %request.project.key, profile = request.profile, error = %e, "Output preparation failed");
                log.line(&format!("ERROR: could not prepare output directories: {}. Aborting profile.", e));
                Err(e)
            }
        }
    }

    /// Run every selected module.
    ///
    /// Returns `Err(BuildError::Cancelled)` when the token stopped the profile,
    /// any other error when a module failed. Both leave the remaining modules
    /// unbuilt.
    pub async fn execute(&self, request: ProfileRequest<'_>) -> Result<()> {
        self.prepare_outputs(request).await?;

        let ProfileRequest {
            project,
            profile,
            include_optional,
            filter,
            cancel,
            ledger,
            output,
        } = request;
        let log = ProfileLogSink::new(profile, output);
        let placement = ArtifactPlacement {
            project,
            profile,
            copier: self.copier.as_ref(),
            ledger,
            output: &log,
            cancel,
        };

        let modules = project.ordered_modules(filter);
        debug!(project = %project.key, profile, modules = modules.len(), "Executing profile");

        for module in modules {
            if cancel.is_cancelled() {
                log.line(&format!("Cancelled by user before running {}.", module.name));
                return Err(BuildError::cancelled(format!("{} before {}", profile, module.name)));
            }

            if module.optional && !include_optional {
                log.line(&format!("Skipping optional module: {}", module.name));
                continue;
            }
            if !module.applies_to(profile) {
                log.line(&format!(
                    "Skipping {} (only for profile {})",
                    module.name,
                    module.only_if_profile_equals.as_deref().unwrap_or_default()
                ));
                continue;
            }

            self.build_module(project, profile, module, cancel, &log).await?;

            match placement.place(module).await {
                Ok(copied) => debug!(module = %module.name, profile, copied, "Artifacts placed"),
                Err(e) => {
                    error!(module = %module.name, profile, error = %e, "Artifact placement failed");
                    log.line(&format!(
                        "ERROR: artifact placement failed in {}: {}. Aborting profile.",
                        module.name, e
                    ));
                    return Err(e);
                }
            }
        }

        info!(project = %project.key, profile, "Profile finished");
        Ok(())
    }

    async fn build_module(
        &self,
        project: &ProjectDescriptor,
        profile: &str,
        module: &ModuleDescriptor,
        cancel: &CancellationToken,
        log: &dyn LogSink,
    ) -> Result<()> {
        let module_path = project.module_path(module);
        if !module_path.exists() {
            let missing = BuildError::MissingModulePath {
                path: module_path.clone(),
            };
            warn!(module = %module.name, profile, "{}", missing);
            log.line(&format!("WARNING: module path does not exist: {}", module_path.display()));
        }

        if !module.run_once {
            return self.invoke(project, profile, module, cancel, log).await;
        }

        // Concurrent profiles wait here for the one build of this module
        let claim = self.session.run_once().claim(&project.key, &module.name);
        let built_here = AtomicBool::new(false);
        claim
            .get_or_try_init(|| async {
                built_here.store(true, Ordering::SeqCst);
                self.invoke(project, profile, module, cancel, log).await
            })
            .await?;
        if !built_here.load(Ordering::SeqCst) {
            log.line(&format!("{}: run_once, reusing artifacts from this session.", module.name));
        }
        Ok(())
    }

    async fn invoke(
        &self,
        project: &ProjectDescriptor,
        profile: &str,
        module: &ModuleDescriptor,
        cancel: &CancellationToken,
        log: &dyn LogSink,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            log.line(&format!("{}: cancelled by user.", module.name));
            return Err(BuildError::cancelled(format!("{} before {}", profile, module.name)));
        }

        let module_path = project.module_path(module);
        let invocation = BuildInvocation {
            module_path: &module_path,
            goals: &module.goals,
            profile: module.effective_profile(profile),
            env_overrides: self.session.environment(),
            detached: project.execution_mode.is_detached(),
        };
        info!(
            module = %module.name,
            profile,
            effective_profile = ?invocation.profile,
            "Building module"
        );

        let result = self.runner.run(&invocation, log, cancel).await;
        if cancel.is_cancelled() {
            log.line(&format!("{}: cancelled by user.", module.name));
            return Err(BuildError::cancelled(format!("{} in {}", profile, module.name)));
        }

        let exit_code = match result {
            Ok(code) => code,
            Err(e) => {
                error!(module = %module.name, profile, error = %e, "Build could not run");
                log.line(&format!("ERROR: could not run build in {}: {}. Aborting profile.", module.name, e));
                return Err(e);
            }
        };
        if exit_code != 0 {
            error!(module = %module.name, profile, exit_code, "Module build failed");
            log.line(&format!(
                "ERROR: build failed in {} (exit code {}). Aborting profile.",
                module.name, exit_code
            ));
            return Err(BuildError::module_failed(&module.name, profile, exit_code));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::BufferingLogSink;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    /// Records invocations and drops a jar into `target/`
    #[derive(Default)]
    struct ScriptedRunner {
        calls: Mutex<Vec<(String, Option<String>)>>,
        fail_module: Option<String>,
    }

    impl ScriptedRunner {
        fn failing(module: &str) -> Self {
            Self {
                fail_module: Some(module.to_string()),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(String, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BuildRunner for ScriptedRunner {
        async fn run(
            &self,
            invocation: &BuildInvocation<'_>,
            output: &dyn LogSink,
            _cancel: &CancellationToken,
        ) -> Result<i32> {
            let name = invocation
                .module_path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned();
            self.calls
                .lock()
                .unwrap()
                .push((name.clone(), invocation.profile.map(str::to_string)));
            output.line(&format!("building {name}"));

            let target = invocation.module_path.join("target");
            fs::create_dir_all(&target).unwrap();
            fs::write(target.join(format!("{name}.jar")), b"jar").unwrap();

            Ok(if self.fail_module.as_deref() == Some(name.as_str()) { 1 } else { 0 })
        }
    }

    struct Harness {
        tmp: tempfile::TempDir,
        runner: Arc<ScriptedRunner>,
        executor: ProfileExecutor,
        sink: BufferingLogSink,
    }

    impl Harness {
        fn new(runner: ScriptedRunner) -> Self {
            let runner = Arc::new(runner);
            let executor = ProfileExecutor::new(
                runner.clone(),
                Arc::new(FsArtifactCopier),
                Arc::new(BuildSession::new()),
            );
            Self {
                tmp: tempfile::tempdir().unwrap(),
                runner,
                executor,
                sink: BufferingLogSink::new(),
            }
        }

        fn project(&self, modules: Vec<ModuleDescriptor>) -> ProjectDescriptor {
            let repo = self.tmp.path().join("repo");
            for module in &modules {
                fs::create_dir_all(repo.join(&module.path)).unwrap();
            }
            ProjectDescriptor::new("proj", modules, repo, self.tmp.path().join("out")).unwrap()
        }

        async fn run(
            &self,
            project: &ProjectDescriptor,
            profile: &str,
            include_optional: bool,
            cancel: &CancellationToken,
        ) -> Result<()> {
            self.executor
                .execute(ProfileRequest {
                    project,
                    profile,
                    include_optional,
                    filter: None,
                    cancel,
                    ledger: &DestinationLedger::new(),
                    output: &self.sink,
                })
                .await
        }

        fn built(&self) -> Vec<String> {
            self.runner.calls().into_iter().map(|(m, _)| m).collect()
        }
    }

    #[tokio::test]
    async fn test_commons_built_first_with_effective_profiles() {
        let harness = Harness::new(ScriptedRunner::default());
        let project = harness.project(vec![
            ModuleDescriptor::new("web", "web"),
            ModuleDescriptor::new("common", "common").commons(),
            ModuleDescriptor::new("batch", "batch").profile_override("prod"),
        ]);

        harness
            .run(&project, "dev", false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            harness.runner.calls(),
            vec![
                ("common".to_string(), None),
                ("web".to_string(), Some("dev".to_string())),
                ("batch".to_string(), Some("prod".to_string())),
            ]
        );
        assert!(harness.sink.contains("[dev] building web"));
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_modules() {
        let harness = Harness::new(ScriptedRunner::failing("api"));
        let project = harness.project(vec![
            ModuleDescriptor::new("api", "api"),
            ModuleDescriptor::new("web", "web"),
        ]);

        let result = harness.run(&project, "qa", false, &CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(BuildError::ModuleBuildFailure { exit_code: 1, .. })
        ));
        assert_eq!(harness.built(), vec!["api"]);
        assert!(harness
            .sink
            .contains("[qa] ERROR: build failed in api (exit code 1). Aborting profile."));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_module() {
        let harness = Harness::new(ScriptedRunner::default());
        let project = harness.project(vec![ModuleDescriptor::new("api", "api")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = harness.run(&project, "dev", false, &cancel).await;

        assert!(result.unwrap_err().is_cancellation());
        assert!(harness.built().is_empty());
        assert!(harness.sink.contains("Cancelled by user before running api."));
    }

    #[tokio::test]
    async fn test_skips_optional_and_profile_restricted_modules() {
        let harness = Harness::new(ScriptedRunner::default());
        let project = harness.project(vec![
            ModuleDescriptor::new("docs", "docs").optional(),
            ModuleDescriptor::new("prod-only", "prod-only").only_if_profile("prod"),
            ModuleDescriptor::new("api", "api"),
        ]);

        harness
            .run(&project, "dev", false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(harness.built(), vec!["api"]);
        assert!(harness.sink.contains("Skipping optional module: docs"));
        assert!(harness.sink.contains("Skipping prod-only (only for profile prod)"));

        harness
            .run(&project, "prod", true, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(harness.built(), vec!["api", "docs", "prod-only", "api"]);
    }

    #[tokio::test]
    async fn test_run_once_reuses_previous_build() {
        let harness = Harness::new(ScriptedRunner::default());
        let project = harness.project(vec![ModuleDescriptor::new("common", "common")
            .commons()
            .copy_to_secondary()]);

        for profile in ["dev", "qa"] {
            harness
                .run(&project, profile, false, &CancellationToken::new())
                .await
                .unwrap();
        }

        assert_eq!(harness.built(), vec!["common"]);
        assert!(harness
            .sink
            .contains("[qa] common: run_once, reusing artifacts from this session."));
        // Placement still runs with the previous outputs
        assert!(project.profile_output("qa").join("ui/common.jar").exists());
    }

    #[tokio::test]
    async fn test_failed_run_once_build_is_retried() {
        let harness = Harness::new(ScriptedRunner::failing("shared"));
        let project = harness.project(vec![ModuleDescriptor::new("shared", "shared").run_once()]);

        for profile in ["dev", "qa"] {
            let result = harness.run(&project, profile, false, &CancellationToken::new()).await;
            assert!(matches!(result, Err(BuildError::ModuleBuildFailure { .. })));
        }

        assert_eq!(harness.built(), vec!["shared", "shared"]);
        assert!(!harness.executor.session().run_once().contains("proj", "shared"));
        assert!(!harness.sink.contains("reusing artifacts"));
    }

    #[tokio::test]
    async fn test_skipped_module_cleans_stale_output() {
        let harness = Harness::new(ScriptedRunner::default());
        let project = harness.project(vec![ModuleDescriptor::new("tool", "tool")
            .optional()
            .rename_to("tool.jar")]);
        let root = project.profile_output("dev");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("tool.jar"), b"stale").unwrap();

        harness
            .run(&project, "dev", false, &CancellationToken::new())
            .await
            .unwrap();

        assert!(harness.built().is_empty());
        assert!(!root.join("tool.jar").exists());
    }

    #[tokio::test]
    async fn test_missing_module_path_is_only_a_warning() {
        let harness = Harness::new(ScriptedRunner::default());
        let project = ProjectDescriptor::new(
            "proj",
            vec![ModuleDescriptor::new("ghost", "ghost")],
            harness.tmp.path().join("repo"),
            harness.tmp.path().join("out"),
        )
        .unwrap();
        assert!(!Path::new(&project.module_path(&project.modules[0])).exists());

        harness
            .run(&project, "dev", false, &CancellationToken::new())
            .await
            .unwrap();
        assert!(harness.sink.contains("WARNING: module path does not exist"));
        assert_eq!(harness.built(), vec!["ghost"]);
    }
}
