//! YAML configuration that resolves a project key into a [`ProjectDescriptor`].
//!
//! Layout mirrors what operators already keep on disk: shared workspace paths,
//! groups of repositories with their own output base, and the projects that
//! live in each group. Legacy top-level `projects` are still honoured.

use crate::core::errors::{BuildError, Result};
use crate::model::{ExecutionMode, ModuleDescriptor, PlacementAreas, ProjectDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Named workspace checkouts
    #[serde(default)]
    pub workspaces: HashMap<String, PathBuf>,
    /// Fallback output base when a group does not define its own
    #[serde(default)]
    pub output_base: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub key: String,
    pub modules: Vec<ModuleDescriptor>,
    #[serde(default)]
    pub profiles: Option<Vec<String>>,
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
    /// Legacy workspace name
    #[serde(default)]
    pub workspace: Option<String>,
    /// Repository name within the owning group
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub areas: Option<PlacementAreas>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub key: String,
    #[serde(default)]
    pub repos: HashMap<String, PathBuf>,
    #[serde(default)]
    pub output_base: Option<PathBuf>,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

/// Top-level orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    /// Legacy projects declared outside any group
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub default_execution_mode: ExecutionMode,
    /// Environment overrides handed to every build process
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Default worker count for the multi-profile scheduler
    #[serde(default)]
    pub max_build_workers: Option<usize>,
    /// Location of the run history database, history is disabled when unset
    #[serde(default)]
    pub history_path: Option<PathBuf>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            groups: Vec::new(),
            projects: Vec::new(),
            profiles: Vec::new(),
            default_execution_mode: ExecutionMode::Integrated,
            environment: HashMap::new(),
            max_build_workers: None,
            history_path: None,
        }
    }
}

impl ForgeConfig {
    /// Create a new builder for ForgeConfig
    pub fn builder() -> ForgeConfigBuilder {
        ForgeConfigBuilder::new()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ForgeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BuildError::io(format!("reading {}", path.display()), e))?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_build_workers == Some(0) {
            return Err(BuildError::configuration_field(
                "max_build_workers must be greater than 0",
                "max_build_workers",
            ));
        }
        for group in &self.groups {
            if group.key.trim().is_empty() {
                return Err(BuildError::configuration_field("group key cannot be empty", "groups"));
            }
        }
        for (_, project) in self.iter_projects() {
            if project.key.trim().is_empty() {
                return Err(BuildError::configuration_field("project key cannot be empty", "projects"));
            }
            for module in &project.modules {
                module.validate()?;
            }
            if let Some(areas) = &project.areas {
                areas.validate()?;
            }
        }
        Ok(())
    }

    /// Every (group, project) pair, grouped projects first
    pub fn iter_projects(&self) -> impl Iterator<Item = (Option<&GroupConfig>, &ProjectConfig)> {
        self.groups
            .iter()
            .flat_map(|g| g.projects.iter().map(move |p| (Some(g), p)))
            .chain(self.projects.iter().map(|p| (None, p)))
    }

    pub fn group(&self, key: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.key == key)
    }

    /// Locate a project, preferring the given group when it declares one
    pub fn find_project(
        &self,
        project_key: &str,
        group_key: Option<&str>,
    ) -> Option<(Option<&GroupConfig>, &ProjectConfig)> {
        if let Some(group) = group_key.and_then(|k| self.group(k)) {
            if let Some(project) = group.projects.iter().find(|p| p.key == project_key) {
                return Some((Some(group), project));
            }
        }
        self.iter_projects().find(|(_, p)| p.key == project_key)
    }

    /// Profiles offered for a project: its own list, then its group's, then the global one
    pub fn profiles_for(&self, project_key: &str, group_key: Option<&str>) -> Vec<String> {
        match self.find_project(project_key, group_key) {
            Some((_, project)) if project.profiles.as_ref().is_some_and(|p| !p.is_empty()) => {
                project.profiles.clone().unwrap_or_default()
            }
            Some((Some(group), _)) if !group.profiles.is_empty() => group.profiles.clone(),
            _ => self.profiles.clone(),
        }
    }

    fn resolve_repo_path(&self, group: Option<&GroupConfig>, project: &ProjectConfig) -> PathBuf {
        if let (Some(group), Some(repo)) = (group, project.repo.as_deref()) {
            if let Some(path) = group.repos.get(repo) {
                return path.clone();
            }
        }
        if let Some(path) = project
            .workspace
            .as_deref()
            .and_then(|w| self.paths.workspaces.get(w))
        {
            return path.clone();
        }
        if let Some(path) = project
            .repo
            .as_deref()
            .and_then(|r| self.paths.workspaces.get(r))
        {
            return path.clone();
        }
        PathBuf::from(
            project
                .workspace
                .as_deref()
                .or(project.repo.as_deref())
                .unwrap_or("."),
        )
    }

    fn resolve_output_base(&self, group: Option<&GroupConfig>) -> PathBuf {
        group
            .and_then(|g| g.output_base.clone())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| self.paths.output_base.clone())
    }

    /// Resolve a project into the validated descriptor the engine consumes
    pub fn resolve_project(&self, project_key: &str, group_key: Option<&str>) -> Result<ProjectDescriptor> {
        let (group, project) = self
            .find_project(project_key, group_key)
            .ok_or_else(|| BuildError::ProjectNotFound {
                project_key: project_key.to_string(),
            })?;

        let repo_root = self.resolve_repo_path(group, project);
        let output_root = self.resolve_output_base(group);
        debug!(
            project = project_key,
            group = group.map(|g| g.key.as_str()),
            repo_root = %repo_root.display(),
            output_root = %output_root.display(),
            "Resolved project"
        );

        let descriptor = ProjectDescriptor::new(
            project.key.clone(),
            project.modules.clone(),
            repo_root,
            output_root,
        )?
        .with_execution_mode(project.execution_mode.unwrap_or(self.default_execution_mode))
        .with_areas(project.areas.clone().unwrap_or_default())?;
        Ok(descriptor)
    }
}

/// Builder for ForgeConfig
pub struct ForgeConfigBuilder {
    config: ForgeConfig,
}

impl ForgeConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: ForgeConfig::default(),
        }
    }

    pub fn output_base(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.paths.output_base = path.into();
        self
    }

    pub fn workspace(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.config.paths.workspaces.insert(name.into(), path.into());
        self
    }

    pub fn group(mut self, group: GroupConfig) -> Self {
        self.config.groups.push(group);
        self
    }

    pub fn project(mut self, project: ProjectConfig) -> Self {
        self.config.projects.push(project);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.environment.insert(key.into(), value.into());
        self
    }

    pub fn max_build_workers(mut self, workers: usize) -> Self {
        self.config.max_build_workers = Some(workers);
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.config.default_execution_mode = mode;
        self
    }

    pub fn history_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.history_path = Some(path.into());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ForgeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ForgeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
paths:
  workspaces:
    legacy-ws: /src/legacy
  output_base: /builds
default_execution_mode: integrated
environment:
  MAVEN_OPTS: -Xmx2g
max_build_workers: 3
profiles: [dev]
groups:
  - key: core
    repos:
      platform: /src/platform
    output_base: /builds/core
    profiles: [dev, qa, staging]
    projects:
      - key: billing
        repo: platform
        execution_mode: separate_windows
        modules:
          - name: commons
            path: commons
            run_once: true
            no_profile: true
          - name: web
            path: web
            copy_to_profile_war: true
projects:
  - key: legacy
    workspace: legacy-ws
    modules:
      - name: app
        path: .
        goals: [install]
"#;

    #[test]
    fn test_resolve_grouped_project() {
        let config = ForgeConfig::from_yaml_str(SAMPLE).unwrap();
        let project = config.resolve_project("billing", None).unwrap();

        assert_eq!(project.repo_root, PathBuf::from("/src/platform"));
        assert_eq!(project.output_root, PathBuf::from("/builds/core"));
        assert_eq!(project.execution_mode, ExecutionMode::SeparateWindows);
        assert_eq!(
            project.profile_output("qa"),
            PathBuf::from("/builds/core/billing/qa")
        );
        assert!(project.modules[0].is_commons());
        assert!(project.modules[1].copy_to_profile_primary);
    }

    #[test]
    fn test_resolve_legacy_project() {
        let config = ForgeConfig::from_yaml_str(SAMPLE).unwrap();
        let project = config.resolve_project("legacy", Some("core")).unwrap();

        assert_eq!(project.repo_root, PathBuf::from("/src/legacy"));
        assert_eq!(project.output_root, PathBuf::from("/builds"));
        assert_eq!(project.execution_mode, ExecutionMode::Integrated);
        assert_eq!(project.modules[0].goals, vec!["install"]);
    }

    #[test]
    fn test_profiles_fallback_chain() {
        let config = ForgeConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.profiles_for("billing", None), vec!["dev", "qa", "staging"]);
        assert_eq!(config.profiles_for("legacy", None), vec!["dev"]);
    }

    #[test]
    fn test_unknown_project() {
        let config = ForgeConfig::from_yaml_str(SAMPLE).unwrap();
        let err = config.resolve_project("nope", None).unwrap_err();
        assert!(matches!(err, BuildError::ProjectNotFound { .. }));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ForgeConfig::default();
        assert!(config.validate().is_ok());

        config.max_build_workers = Some(0);
        assert!(config.validate().is_err());
        config.max_build_workers = Some(2);

        config.projects.push(ProjectConfig {
            key: "p".to_string(),
            modules: vec![ModuleDescriptor::new("bad", "bad").rename_to("../x.jar")],
            profiles: None,
            execution_mode: None,
            workspace: None,
            repo: None,
            areas: None,
        });
        assert!(config.validate().is_err());

        config.projects[0].modules = vec![ModuleDescriptor::new("ok", "ok")];
        assert!(config.validate().is_ok());
        config.projects[0].areas = Some(PlacementAreas::new("war", "../../x"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = ForgeConfig::builder()
            .output_base("/tmp/out")
            .workspace("main", "/tmp/src")
            .env("JAVA_HOME", "/opt/jdk")
            .max_build_workers(4)
            .build()
            .unwrap();

        assert_eq!(config.paths.output_base, PathBuf::from("/tmp/out"));
        assert_eq!(config.environment.get("JAVA_HOME").map(String::as_str), Some("/opt/jdk"));
        assert_eq!(config.max_build_workers, Some(4));
        assert!(ForgeConfig::builder().max_build_workers(0).build().is_err());
    }
}
