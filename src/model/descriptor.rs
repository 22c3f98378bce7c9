use crate::core::errors::{BuildError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

fn default_goals() -> Vec<String> {
    vec!["clean".to_string(), "package".to_string()]
}

/// Static definition of one buildable unit and its placement rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    /// Path relative to the project repository root
    pub path: PathBuf,
    #[serde(default = "default_goals")]
    pub goals: Vec<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub no_profile: bool,
    #[serde(default)]
    pub run_once: bool,
    #[serde(default)]
    pub serial_across_profiles: bool,
    #[serde(default, alias = "copy_to_profile_war")]
    pub copy_to_profile_primary: bool,
    #[serde(default, alias = "copy_to_profile_ui")]
    pub copy_to_profile_secondary: bool,
    #[serde(default)]
    pub copy_to_subfolder: Option<PathBuf>,
    #[serde(default)]
    pub copy_to_root: bool,
    #[serde(default, alias = "rename_jar_to")]
    pub rename_to: Option<String>,
    #[serde(default)]
    pub select_pattern: Option<String>,
    #[serde(default)]
    pub profile_override: Option<String>,
    #[serde(default)]
    pub only_if_profile_equals: Option<String>,
}

/// True unless every component of `path` descends into the profile output
fn escapes_output(path: &Path) -> bool {
    let mut descends = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => descends = true,
            Component::CurDir => {}
            _ => return true,
        }
    }
    !descends
}

/// How a module's artifacts are placed after a successful build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementMode<'a> {
    /// Exactly one file matching `pattern`, copied as `rename_to`
    Selective { pattern: &'a str, rename_to: &'a str },
    /// Every configured copy rule applies independently
    Classic,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            goals: default_goals(),
            optional: false,
            no_profile: false,
            run_once: false,
            serial_across_profiles: false,
            copy_to_profile_primary: false,
            copy_to_profile_secondary: false,
            copy_to_subfolder: None,
            copy_to_root: false,
            rename_to: None,
            select_pattern: None,
            profile_override: None,
            only_if_profile_equals: None,
        }
    }

    pub fn with_goals<I, S>(mut self, goals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.goals = goals.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Shorthand for `run_once` + `no_profile`
    pub fn commons(mut self) -> Self {
        self.run_once = true;
        self.no_profile = true;
        self
    }

    pub fn run_once(mut self) -> Self {
        self.run_once = true;
        self
    }

    pub fn no_profile(mut self) -> Self {
        self.no_profile = true;
        self
    }

    pub fn serial_across_profiles(mut self) -> Self {
        self.serial_across_profiles = true;
        self
    }

    pub fn copy_to_primary(mut self) -> Self {
        self.copy_to_profile_primary = true;
        self
    }

    pub fn copy_to_secondary(mut self) -> Self {
        self.copy_to_profile_secondary = true;
        self
    }

    pub fn copy_to_root(mut self) -> Self {
        self.copy_to_root = true;
        self
    }

    pub fn copy_to_subfolder(mut self, subfolder: impl Into<PathBuf>) -> Self {
        self.copy_to_subfolder = Some(subfolder.into());
        self
    }

    pub fn rename_to(mut self, file_name: impl Into<String>) -> Self {
        self.rename_to = Some(file_name.into());
        self
    }

    pub fn select_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.select_pattern = Some(pattern.into());
        self
    }

    pub fn profile_override(mut self, profile: impl Into<String>) -> Self {
        self.profile_override = Some(profile.into());
        self
    }

    pub fn only_if_profile(mut self, profile: impl Into<String>) -> Self {
        self.only_if_profile_equals = Some(profile.into());
        self
    }

    /// Commons modules are built once per session and ahead of everything else
    pub fn is_commons(&self) -> bool {
        self.run_once && self.no_profile
    }

    pub fn placement_mode(&self) -> PlacementMode<'_> {
        match (self.select_pattern.as_deref(), self.rename_to.as_deref()) {
            (Some(pattern), Some(rename_to)) => PlacementMode::Selective { pattern, rename_to },
            _ => PlacementMode::Classic,
        }
    }

    /// Profile handed to the build runner, `None` for profile-less modules
    pub fn effective_profile<'a>(&'a self, active: &'a str) -> Option<&'a str> {
        if self.no_profile {
            return None;
        }
        Some(self.profile_override.as_deref().unwrap_or(active))
    }

    /// Whether the module applies to the active profile
    pub fn applies_to(&self, profile: &str) -> bool {
        match self.only_if_profile_equals.as_deref() {
            Some(only) if !only.is_empty() => only == profile,
            _ => true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BuildError::validation_field("module name cannot be empty", "name"));
        }
        if self.goals.is_empty() {
            return Err(BuildError::validation_field(
                format!("module {} has no build goals", self.name),
                "goals",
            ));
        }
        if let Some(rename) = &self.rename_to {
            let bare = Path::new(rename).file_name().map(|f| f == rename.as_str());
            if rename.is_empty() || bare != Some(true) {
                return Err(BuildError::validation_field(
                    format!("module {}: rename_to must be a plain file name, got {:?}", self.name, rename),
                    "rename_to",
                ));
            }
        }
        if let Some(subfolder) = &self.copy_to_subfolder {
            if escapes_output(subfolder) {
                return Err(BuildError::validation_field(
                    format!(
                        "module {}: copy_to_subfolder must stay inside the profile output, got {}",
                        self.name,
                        subfolder.display()
                    ),
                    "copy_to_subfolder",
                ));
            }
        }
        if let Some(pattern) = &self.select_pattern {
            if pattern.is_empty()
                || pattern.contains('/')
                || pattern.contains('\\')
                || glob::Pattern::new(pattern).is_err()
            {
                return Err(BuildError::validation_field(
                    format!("module {}: select_pattern must be a single file glob", self.name),
                    "select_pattern",
                ));
            }
        }
        Ok(())
    }
}

/// How build processes are attached to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Output captured and streamed to the log sink
    #[default]
    Integrated,
    /// Each module builds in its own window, output not captured
    #[serde(alias = "detached")]
    SeparateWindows,
}

impl ExecutionMode {
    pub fn is_detached(self) -> bool {
        matches!(self, ExecutionMode::SeparateWindows)
    }
}

/// Names of the two dedicated placement areas under a profile output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementAreas {
    #[serde(default = "PlacementAreas::default_primary")]
    pub primary: String,
    #[serde(default = "PlacementAreas::default_secondary")]
    pub secondary: String,
}

impl PlacementAreas {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, area) in [("primary", &self.primary), ("secondary", &self.secondary)] {
            if escapes_output(Path::new(area)) {
                return Err(BuildError::validation_field(
                    format!("placement area {field} must stay inside the profile output, got {area:?}"),
                    field,
                ));
            }
        }
        Ok(())
    }

    fn default_primary() -> String {
        "war".to_string()
    }

    fn default_secondary() -> String {
        "ui".to_string()
    }
}

impl Default for PlacementAreas {
    fn default() -> Self {
        Self {
            primary: Self::default_primary(),
            secondary: Self::default_secondary(),
        }
    }
}

/// Fully resolved project definition consumed by the executor and scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDescriptor {
    pub key: String,
    pub modules: Vec<ModuleDescriptor>,
    pub execution_mode: ExecutionMode,
    /// Repository checkout the module paths are relative to
    pub repo_root: PathBuf,
    /// Base directory; artifacts land in `output_root/<key>/<profile>`
    pub output_root: PathBuf,
    pub areas: PlacementAreas,
}

impl ProjectDescriptor {
    /// Build and validate a project. Validation happens here, once.
    pub fn new(
        key: impl Into<String>,
        modules: Vec<ModuleDescriptor>,
        repo_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let project = Self {
            key: key.into(),
            modules,
            execution_mode: ExecutionMode::default(),
            repo_root: repo_root.into(),
            output_root: output_root.into(),
            areas: PlacementAreas::default(),
        };
        project.validate()?;
        Ok(project)
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Replace the placement areas, re-validating the project
    pub fn with_areas(mut self, areas: PlacementAreas) -> Result<Self> {
        self.areas = areas;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(BuildError::validation_field("project key cannot be empty", "key"));
        }
        self.areas.validate()?;
        let mut seen = HashSet::new();
        for module in &self.modules {
            module.validate()?;
            if !seen.insert(module.name.as_str()) {
                return Err(BuildError::validation_field(
                    format!("duplicate module {} in project {}", module.name, self.key),
                    "modules",
                ));
            }
        }
        Ok(())
    }

    pub fn module(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn module_path(&self, module: &ModuleDescriptor) -> PathBuf {
        self.repo_root.join(&module.path)
    }

    /// Output directory for one profile
    pub fn profile_output(&self, profile: &str) -> PathBuf {
        self.output_root.join(&self.key).join(profile)
    }

    /// Modules passing the optional name filter, in declaration order
    pub fn select<'a>(
        &'a self,
        filter: Option<&'a HashSet<String>>,
    ) -> impl Iterator<Item = &'a ModuleDescriptor> + 'a {
        self.modules
            .iter()
            .filter(move |m| filter.map_or(true, |f| f.contains(&m.name)))
    }

    /// Selected modules with commons first; relative order kept within each group
    pub fn ordered_modules<'a>(&'a self, filter: Option<&'a HashSet<String>>) -> Vec<&'a ModuleDescriptor> {
        let mut modules: Vec<_> = self.select(filter).collect();
        // sort_by_key is stable
        modules.sort_by_key(|m| if m.is_commons() { 0u8 } else { 1u8 });
        modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(modules: &[&ModuleDescriptor]) -> Vec<String> {
        modules.iter().map(|m| m.name.clone()).collect()
    }

    #[test]
    fn test_commons_first_and_stable() {
        let project = ProjectDescriptor::new(
            "proj",
            vec![
                ModuleDescriptor::new("web", "web"),
                ModuleDescriptor::new("common-a", "common-a").commons(),
                ModuleDescriptor::new("api", "api").run_once(),
                ModuleDescriptor::new("common-b", "common-b").commons(),
                ModuleDescriptor::new("ui", "ui").no_profile(),
            ],
            "/repo",
            "/out",
        )
        .unwrap();

        let ordered = project.ordered_modules(None);
        assert_eq!(
            names(&ordered),
            vec!["common-a", "common-b", "web", "api", "ui"]
        );
    }

    #[test]
    fn test_ordering_property_over_generated_lists() {
        // Every commons module precedes every other one, relative order kept
        let mut rng = fastrand::Rng::with_seed(7);
        for round in 0..50 {
            let modules: Vec<_> = (0..rng.usize(0..12))
                .map(|i| {
                    let m = ModuleDescriptor::new(format!("m{round}-{i}"), format!("m{i}"));
                    match rng.u8(0..4) {
                        0 => m.commons(),
                        1 => m.run_once(),
                        2 => m.no_profile(),
                        _ => m,
                    }
                })
                .collect();
            let project = ProjectDescriptor::new("p", modules.clone(), "/r", "/o").unwrap();
            let ordered = project.ordered_modules(None);

            let expected: Vec<_> = modules
                .iter()
                .filter(|m| m.is_commons())
                .chain(modules.iter().filter(|m| !m.is_commons()))
                .map(|m| m.name.clone())
                .collect();
            assert_eq!(names(&ordered), expected);
        }
    }

    #[test]
    fn test_filter_applies_before_ordering() {
        let project = ProjectDescriptor::new(
            "proj",
            vec![
                ModuleDescriptor::new("a", "a"),
                ModuleDescriptor::new("b", "b").commons(),
                ModuleDescriptor::new("c", "c"),
            ],
            "/repo",
            "/out",
        )
        .unwrap();
        let filter: HashSet<String> = ["c".to_string(), "b".to_string()].into();
        assert_eq!(names(&project.ordered_modules(Some(&filter))), vec!["b", "c"]);
    }

    #[test]
    fn test_effective_profile() {
        let plain = ModuleDescriptor::new("a", "a");
        assert_eq!(plain.effective_profile("dev"), Some("dev"));

        let overridden = ModuleDescriptor::new("b", "b").profile_override("prod");
        assert_eq!(overridden.effective_profile("dev"), Some("prod"));

        let profileless = ModuleDescriptor::new("c", "c").profile_override("prod").no_profile();
        assert_eq!(profileless.effective_profile("dev"), None);
    }

    #[test]
    fn test_placement_mode() {
        let selective = ModuleDescriptor::new("a", "a")
            .select_pattern("*-client.jar")
            .rename_to("client.jar")
            .copy_to_primary();
        assert_eq!(
            selective.placement_mode(),
            PlacementMode::Selective {
                pattern: "*-client.jar",
                rename_to: "client.jar"
            }
        );

        let rename_only = ModuleDescriptor::new("b", "b").rename_to("app.jar");
        assert_eq!(rename_only.placement_mode(), PlacementMode::Classic);
    }

    #[test]
    fn test_validation_errors() {
        assert!(ModuleDescriptor::new("", "x").validate().is_err());
        assert!(ModuleDescriptor::new("a", "a").with_goals(Vec::<String>::new()).validate().is_err());
        assert!(ModuleDescriptor::new("a", "a").rename_to("dir/app.jar").validate().is_err());
        assert!(ModuleDescriptor::new("a", "a").copy_to_subfolder("../escape").validate().is_err());
        assert!(ModuleDescriptor::new("a", "a").select_pattern("target/*.jar").validate().is_err());
        assert!(ModuleDescriptor::new("a", "a")
            .copy_to_subfolder("lib/ext")
            .rename_to("app.jar")
            .validate()
            .is_ok());

        let dup = ProjectDescriptor::new(
            "proj",
            vec![ModuleDescriptor::new("a", "a"), ModuleDescriptor::new("a", "b")],
            "/r",
            "/o",
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_areas_must_stay_inside_profile_output() {
        let project = || ProjectDescriptor::new("proj", vec![ModuleDescriptor::new("a", "a")], "/r", "/o").unwrap();

        for (primary, secondary) in [("../../x", "ui"), ("war", "/etc"), ("", "ui"), ("war", ".")] {
            let err = project()
                .with_areas(PlacementAreas::new(primary, secondary))
                .unwrap_err();
            assert!(matches!(err, BuildError::Validation { .. }), "{primary:?}/{secondary:?}");
        }

        let nested = project().with_areas(PlacementAreas::new("deploy/war", "static")).unwrap();
        assert_eq!(nested.areas.primary, "deploy/war");

        // Fields are public, so validate() checks them again
        let mut tampered = project();
        tampered.areas.secondary = "../shared".to_string();
        assert!(tampered.validate().is_err());
    }

    #[test]
    fn test_invalid_select_glob_rejected() {
        assert!(ModuleDescriptor::new("a", "a").select_pattern("app-[.jar").validate().is_err());
        assert!(ModuleDescriptor::new("a", "a").select_pattern("app-[0-9].jar").validate().is_ok());
    }

    #[test]
    fn test_yaml_aliases_and_defaults() {
        let yaml = r#"
name: ui-module
path: modules/ui
copy_to_profile_ui: true
rename_jar_to: ui.jar
serial_across_profiles: true
"#;
        let module: ModuleDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(module.goals, vec!["clean", "package"]);
        assert!(module.copy_to_profile_secondary);
        assert!(!module.copy_to_profile_primary);
        assert_eq!(module.rename_to.as_deref(), Some("ui.jar"));
        assert!(module.serial_across_profiles);
    }
}
