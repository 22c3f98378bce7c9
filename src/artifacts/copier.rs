use crate::core::{BuildError, CancellationToken, Result};
use crate::log_sink::LogSink;
use async_trait::async_trait;
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Artifact suffixes that are never copied by default
pub const DEFAULT_EXCLUDED_SUFFIXES: &[&str] = &["-sources.jar", "-javadoc.jar", "-tests.jar", ".pom"];

/// Directory names skipped by recursive copies by default
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &["dependency", "dependencies", "lib", "libs", "WEB-INF", "classes"];

/// A glob copy from one directory into another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub src_dir: PathBuf,
    pub patterns: Vec<String>,
    pub dest_dir: PathBuf,
    pub recursive: bool,
    pub excluded_suffixes: Vec<String>,
    pub excluded_dirs: Vec<String>,
}

impl CopyRequest {
    pub fn new<I, S>(src_dir: impl Into<PathBuf>, patterns: I, dest_dir: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            src_dir: src_dir.into(),
            patterns: patterns.into_iter().map(Into::into).collect(),
            dest_dir: dest_dir.into(),
            recursive: false,
            excluded_suffixes: DEFAULT_EXCLUDED_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    pub fn excluded_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn excluded_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    fn compile(&self) -> Result<CompiledRequest<'_>> {
        let patterns = self
            .patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    BuildError::validation_field(format!("invalid artifact pattern {p:?}: {e}"), "patterns")
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CompiledRequest {
            request: self,
            patterns,
        })
    }
}

struct CompiledRequest<'a> {
    request: &'a CopyRequest,
    patterns: Vec<Pattern>,
}

impl CompiledRequest<'_> {
    fn accepts(&self, file_name: &str) -> bool {
        !self
            .request
            .excluded_suffixes
            .iter()
            .any(|s| file_name.ends_with(s.as_str()))
            && self.patterns.iter().any(|p| p.matches(file_name))
    }
}

/// Artifact placement collaborator
#[async_trait]
pub trait ArtifactCopier: Send + Sync {
    /// Copy every file accepted by `request` flat into its destination.
    /// Returns the number of files copied.
    async fn copy_matching(
        &self,
        request: CopyRequest,
        output: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<usize>;

    /// First file (sorted by name) in `dir` matching the earliest pattern that
    /// matches anything, ignoring files ending in one of `excluded_suffixes`
    async fn find_first(
        &self,
        dir: &Path,
        patterns: &[&str],
        excluded_suffixes: &[&str],
    ) -> Result<Option<PathBuf>>;

    /// Copy one file to an exact destination path
    async fn copy_renamed(&self, src: &Path, dest: &Path) -> Result<()>;

    /// Create the directory and any missing parents
    async fn ensure_dir(&self, dir: &Path) -> Result<()>;

    /// Remove everything inside `dir`, leaving the directory itself
    async fn clean_dir(&self, dir: &Path) -> Result<()>;
}

/// Filesystem-backed copier. Blocking work runs on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsArtifactCopier;

impl FsArtifactCopier {
    pub fn new() -> Self {
        Self
    }
}

async fn blocking<T, F>(operation: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BuildError::artifact(operation.to_string(), std::io::Error::other(e)))?
}

/// Copy contents and permissions, then carry the source modification time over
fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    let operation = || format!("copying {} to {}", src.display(), dest.display());
    fs::copy(src, dest).map_err(|e| BuildError::artifact(operation(), e))?;
    let modified = fs::metadata(src)
        .and_then(|m| m.modified())
        .map_err(|e| BuildError::artifact(operation(), e))?;
    fs::File::options()
        .write(true)
        .open(dest)
        .and_then(|f| f.set_modified(modified))
        .map_err(|e| BuildError::artifact(operation(), e))
}

fn collect_candidates(request: &CopyRequest) -> Result<Vec<PathBuf>> {
    let compiled = request.compile()?;
    if !request.src_dir.is_dir() {
        return Ok(Vec::new());
    }

    let max_depth = if request.recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    let walker = WalkDir::new(&request.src_dir)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| request.excluded_dirs.iter().any(|d| d == name)))
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let operation = format!("scanning {}", request.src_dir.display());
            BuildError::artifact(operation, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_str().is_some_and(|name| compiled.accepts(name)) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

#[async_trait]
impl ArtifactCopier for FsArtifactCopier {
    async fn copy_matching(
        &self,
        request: CopyRequest,
        output: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if !request.src_dir.is_dir() {
            warn!(src = %request.src_dir.display(), "Artifact source directory does not exist");
            return Ok(0);
        }

        let cancel = cancel.clone();
        let copied = blocking("copying artifacts", move || {
            let dest = &request.dest_dir;
            fs::create_dir_all(dest)
                .map_err(|e| BuildError::artifact(format!("creating {}", dest.display()), e))?;

            let mut copied = Vec::new();
            for src in collect_candidates(&request)? {
                if cancel.is_cancelled() {
                    break;
                }
                let Some(name) = src.file_name() else { continue };
                let target = dest.join(name);
                copy_file(&src, &target)?;
                copied.push((src, target));
            }
            Ok(copied)
        })
        .await?;

        for (src, target) in &copied {
            output.line(&format!("Copied: {} -> {}", src.display(), target.display()));
        }
        debug!(count = copied.len(), "Artifacts copied");
        Ok(copied.len())
    }

    async fn find_first(
        &self,
        dir: &Path,
        patterns: &[&str],
        excluded_suffixes: &[&str],
    ) -> Result<Option<PathBuf>> {
        if !dir.is_dir() {
            return Ok(None);
        }
        let request = CopyRequest::new(dir, Vec::<String>::new(), dir).excluded_suffixes(excluded_suffixes.iter().copied());
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();

        blocking("selecting artifact", move || {
            // One pass per pattern keeps the priority order of the list
            for pattern in patterns {
                let mut request = request.clone();
                request.patterns = vec![pattern];
                if let Some(first) = collect_candidates(&request)?.into_iter().next() {
                    return Ok(Some(first));
                }
            }
            Ok(None)
        })
        .await
    }

    async fn copy_renamed(&self, src: &Path, dest: &Path) -> Result<()> {
        let (src, dest) = (src.to_path_buf(), dest.to_path_buf());
        blocking("renaming artifact", move || {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| BuildError::artifact(format!("creating {}", parent.display()), e))?;
            }
            copy_file(&src, &dest)
        })
        .await
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        let dir = dir.to_path_buf();
        blocking("creating directory", move || {
            fs::create_dir_all(&dir).map_err(|e| BuildError::artifact(format!("creating {}", dir.display()), e))
        })
        .await
    }

    async fn clean_dir(&self, dir: &Path) -> Result<()> {
        let dir = dir.to_path_buf();
        blocking("cleaning directory", move || {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(BuildError::artifact(format!("listing {}", dir.display()), e)),
            };
            for entry in entries {
                let entry = entry.map_err(|e| BuildError::artifact(format!("listing {}", dir.display()), e))?;
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .map_err(|e| BuildError::artifact(format!("inspecting {}", path.display()), e))?;
                let removed = if file_type.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                match removed {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(BuildError::artifact(format!("removing {}", path.display()), e)),
                }
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::BufferingLogSink;
    use pretty_assertions::assert_eq;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"artifact").unwrap();
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_copy_applies_default_exclusions() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("target");
        touch(&target.join("api-1.0.jar"));
        touch(&target.join("api-1.0-sources.jar"));
        touch(&target.join("api-1.0-javadoc.jar"));
        touch(&target.join("api-1.0.pom"));
        touch(&target.join("web.war"));
        touch(&target.join("classes/Inner.jar"));
        let dest = tmp.path().join("out");

        let sink = BufferingLogSink::new();
        let copied = FsArtifactCopier
            .copy_matching(
                CopyRequest::new(&target, ["*.jar", "*.war"], &dest),
                &sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(copied, 2);
        assert_eq!(listing(&dest), vec!["api-1.0.jar", "web.war"]);
        assert_eq!(sink.count_containing("Copied:"), 2);
    }

    #[tokio::test]
    async fn test_recursive_copy_skips_excluded_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("dist");
        touch(&src.join("top.jar"));
        touch(&src.join("nested/deep.jar"));
        touch(&src.join("lib/vendored.jar"));
        touch(&src.join("nested/WEB-INF/hidden.jar"));
        let dest = tmp.path().join("out");

        let copied = FsArtifactCopier
            .copy_matching(
                CopyRequest::new(&src, ["*.jar"], &dest).recursive(),
                &BufferingLogSink::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(copied, 2);
        assert_eq!(listing(&dest), vec!["deep.jar", "top.jar"]);
    }

    #[tokio::test]
    async fn test_missing_source_copies_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let copied = FsArtifactCopier
            .copy_matching(
                CopyRequest::new(tmp.path().join("absent"), ["*"], tmp.path().join("out")),
                &BufferingLogSink::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(copied, 0);
    }

    #[tokio::test]
    async fn test_find_first_respects_pattern_priority() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("a-plain.jar"));
        touch(&tmp.path().join("b-jar-with-dependencies.jar"));
        touch(&tmp.path().join("0-sources.jar"));

        let found = FsArtifactCopier
            .find_first(
                tmp.path(),
                &["*-jar-with-dependencies.jar", "*.jar"],
                DEFAULT_EXCLUDED_SUFFIXES,
            )
            .await
            .unwrap();
        assert_eq!(found, Some(tmp.path().join("b-jar-with-dependencies.jar")));

        let plain = FsArtifactCopier
            .find_first(tmp.path(), &["*.jar"], DEFAULT_EXCLUDED_SUFFIXES)
            .await
            .unwrap();
        assert_eq!(plain, Some(tmp.path().join("a-plain.jar")));

        let none = FsArtifactCopier.find_first(tmp.path(), &["*.war"], &[]).await.unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn test_copies_keep_source_mtime() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("target/app.jar");
        touch(&src);
        let old = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);
        fs::File::options().write(true).open(&src).unwrap().set_modified(old).unwrap();

        let dest = tmp.path().join("out");
        FsArtifactCopier
            .copy_matching(
                CopyRequest::new(tmp.path().join("target"), ["*.jar"], &dest),
                &BufferingLogSink::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        FsArtifactCopier.copy_renamed(&src, &dest.join("renamed.jar")).await.unwrap();

        for name in ["app.jar", "renamed.jar"] {
            let modified = fs::metadata(dest.join(name)).unwrap().modified().unwrap();
            assert_eq!(modified, old, "{name}");
        }
    }

    #[tokio::test]
    async fn test_glob_classes_and_invalid_patterns() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("app-7.jar"));
        touch(&tmp.path().join("app-x.jar"));
        touch(&tmp.path().join("app-12.jar"));

        let digit = FsArtifactCopier
            .find_first(tmp.path(), &["app-[!0-9].jar"], &[])
            .await
            .unwrap();
        assert_eq!(digit, Some(tmp.path().join("app-x.jar")));

        let single = FsArtifactCopier.find_first(tmp.path(), &["app-?.jar"], &[]).await.unwrap();
        assert_eq!(single, Some(tmp.path().join("app-7.jar")));

        let err = FsArtifactCopier
            .copy_matching(
                CopyRequest::new(tmp.path(), ["app-[.jar"], tmp.path().join("out")),
                &BufferingLogSink::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_clean_dir_keeps_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("out");
        touch(&dir.join("stale.war"));
        touch(&dir.join("nested/old.jar"));

        FsArtifactCopier.clean_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert!(listing(&dir).is_empty());

        // Missing directories are fine
        FsArtifactCopier.clean_dir(&tmp.path().join("missing")).await.unwrap();
    }
}
