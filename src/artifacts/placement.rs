use super::copier::{ArtifactCopier, CopyRequest, DEFAULT_EXCLUDED_SUFFIXES};
use crate::core::{CancellationToken, Result};
use crate::log_sink::LogSink;
use crate::model::{ModuleDescriptor, PlacementMode, ProjectDescriptor};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

const PRIMARY_PATTERNS: &[&str] = &["*.war"];
const SECONDARY_PATTERNS: &[&str] = &["*.jar"];
const SUBFOLDER_PATTERNS: &[&str] = &["*.jar", "*.war"];
const RENAME_CANDIDATES: &[&str] = &["*-jar-with-dependencies.jar", "*.jar", "*.war"];

/// Output directories already wiped during one build invocation.
///
/// Each directory is cleaned exactly once, before the first artifact lands in
/// it. Concurrent callers preparing the same directory wait for the single
/// clean to finish. Callers prepare parents before children, otherwise a late
/// parent clean would wipe a child that already holds artifacts.
#[derive(Debug, Default)]
pub struct DestinationLedger {
    cleaned: DashMap<PathBuf, Arc<OnceCell<()>>>,
}

impl DestinationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clean `dir` if this invocation has not cleaned it yet.
    ///
    /// A missing directory counts as clean. With `create` the directory exists
    /// afterwards.
    pub async fn prepare(&self, dir: &Path, copier: &dyn ArtifactCopier, create: bool) -> Result<PathBuf> {
        let cell = self
            .cleaned
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_try_init(|| async {
            debug!(dir = %dir.display(), "Cleaning destination");
            copier.clean_dir(dir).await
        })
        .await?;
        if create {
            copier.ensure_dir(dir).await?;
        }
        Ok(dir.to_path_buf())
    }

    pub fn is_cleaned(&self, dir: &Path) -> bool {
        self.cleaned.get(dir).is_some_and(|cell| cell.initialized())
    }

    pub fn len(&self) -> usize {
        self.cleaned.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Places one profile's module artifacts into its output directory
pub struct ArtifactPlacement<'a> {
    pub project: &'a ProjectDescriptor,
    pub profile: &'a str,
    pub copier: &'a dyn ArtifactCopier,
    pub ledger: &'a DestinationLedger,
    pub output: &'a dyn LogSink,
    pub cancel: &'a CancellationToken,
}

impl ArtifactPlacement<'_> {
    fn root(&self) -> PathBuf {
        self.project.profile_output(self.profile)
    }

    fn primary_dir(&self, module: &ModuleDescriptor) -> PathBuf {
        if module.copy_to_root {
            self.root()
        } else {
            self.root().join(&self.project.areas.primary)
        }
    }

    fn secondary_dir(&self, module: &ModuleDescriptor) -> PathBuf {
        if module.copy_to_root {
            self.root()
        } else {
            self.root().join(&self.project.areas.secondary)
        }
    }

    fn subfolder_or_root(&self, module: &ModuleDescriptor) -> PathBuf {
        match &module.copy_to_subfolder {
            Some(sub) => self.root().join(sub),
            None => self.root(),
        }
    }

    /// Every directory the module's rules may write to
    pub fn destinations(&self, module: &ModuleDescriptor) -> BTreeSet<PathBuf> {
        let mut dests = BTreeSet::new();
        if let PlacementMode::Selective { .. } = module.placement_mode() {
            dests.insert(self.selective_dir(module));
            return dests;
        }
        if module.copy_to_profile_primary {
            dests.insert(self.primary_dir(module));
        }
        if module.copy_to_profile_secondary {
            dests.insert(self.secondary_dir(module));
        }
        if let Some(sub) = &module.copy_to_subfolder {
            dests.insert(self.root().join(sub));
        }
        if module.rename_to.is_some() {
            dests.insert(self.subfolder_or_root(module));
        }
        dests
    }

    /// Clean every destination of `modules` for this profile, parents first.
    ///
    /// Directories of modules that will build are created. Modules skipped for
    /// this profile only get their stale output wiped. Returns the number of
    /// directories prepared.
    pub async fn prepare_profile(&self, modules: &[&ModuleDescriptor], include_optional: bool) -> Result<usize> {
        let mut dirs: BTreeMap<PathBuf, bool> = BTreeMap::new();
        for module in modules {
            let builds = (include_optional || !module.optional) && module.applies_to(self.profile);
            for dest in self.destinations(module) {
                *dirs.entry(dest).or_default() |= builds;
            }
        }

        // Path ordering puts every directory before its descendants
        for (dir, create) in &dirs {
            self.ledger.prepare(dir, self.copier, *create).await?;
        }
        Ok(dirs.len())
    }

    /// Copy the module's artifacts from `<module>/target`. Returns the file count.
    ///
    /// Without a prior [`prepare_profile`](Self::prepare_profile) over every
    /// module of the profile, a later module may clean a parent of this one's
    /// destinations.
    pub async fn place(&self, module: &ModuleDescriptor) -> Result<usize> {
        for dest in self.destinations(module) {
            self.ledger.prepare(&dest, self.copier, false).await?;
        }
        let target = self.project.module_path(module).join("target");
        match module.placement_mode() {
            PlacementMode::Selective { pattern, rename_to } => {
                self.place_selective(module, &target, pattern, rename_to).await
            }
            PlacementMode::Classic => self.place_classic(module, &target).await,
        }
    }

    fn selective_dir(&self, module: &ModuleDescriptor) -> PathBuf {
        if let Some(sub) = &module.copy_to_subfolder {
            self.root().join(sub)
        } else if module.copy_to_profile_secondary {
            self.secondary_dir(module)
        } else if module.copy_to_profile_primary {
            self.primary_dir(module)
        } else {
            self.root()
        }
    }

    async fn place_selective(
        &self,
        module: &ModuleDescriptor,
        target: &Path,
        pattern: &str,
        rename_to: &str,
    ) -> Result<usize> {
        let dest_dir = self.ledger.prepare(&self.selective_dir(module), self.copier, true).await?;

        match self.copier.find_first(target, &[pattern], &[]).await? {
            Some(src) => {
                let dest = dest_dir.join(rename_to);
                self.copier.copy_renamed(&src, &dest).await?;
                self.output.line(&format!(
                    "Copied single artifact: {} -> {}",
                    file_name(&src),
                    dest.display()
                ));
                Ok(1)
            }
            None => {
                self.output.line(&format!(
                    "WARNING: no file matching {} in {}",
                    pattern,
                    target.display()
                ));
                Ok(0)
            }
        }
    }

    async fn place_classic(&self, module: &ModuleDescriptor, target: &Path) -> Result<usize> {
        let mut copied = 0;

        if module.copy_to_profile_primary {
            copied += self.copy_into(target, PRIMARY_PATTERNS, self.primary_dir(module)).await?;
        }
        if module.copy_to_profile_secondary {
            copied += self.copy_into(target, SECONDARY_PATTERNS, self.secondary_dir(module)).await?;
        }
        if let Some(sub) = &module.copy_to_subfolder {
            copied += self.copy_into(target, SUBFOLDER_PATTERNS, self.root().join(sub)).await?;
        }

        if let Some(rename_to) = &module.rename_to {
            if let Some(src) = self
                .copier
                .find_first(target, RENAME_CANDIDATES, DEFAULT_EXCLUDED_SUFFIXES)
                .await?
            {
                let dest_dir = self.ledger.prepare(&self.subfolder_or_root(module), self.copier, true).await?;
                self.copier.copy_renamed(&src, &dest_dir.join(rename_to)).await?;
                self.output.line(&format!(
                    "Renamed {} -> {} in {}",
                    file_name(&src),
                    rename_to,
                    dest_dir.display()
                ));
                copied += 1;
            }
        }

        Ok(copied)
    }

    async fn copy_into(&self, target: &Path, patterns: &[&str], dest: PathBuf) -> Result<usize> {
        let dest = self.ledger.prepare(&dest, self.copier, true).await?;
        let request = CopyRequest::new(target, patterns.iter().copied(), dest);
        self.copier.copy_matching(request, self.output, self.cancel).await
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
