//! Artifact placement: glob copies out of `target/` into profile output directories

pub mod copier;
pub mod placement;

pub use copier::{ArtifactCopier, CopyRequest, FsArtifactCopier, DEFAULT_EXCLUDED_DIRS, DEFAULT_EXCLUDED_SUFFIXES};
pub use placement::{ArtifactPlacement, DestinationLedger};
