use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for build orchestration
#[derive(Debug, Error)]
pub enum BuildError {
    /// The external build runner exited with a non-zero code
    #[error("Build failed for module {module} (profile: {profile}, exit code: {exit_code})")]
    ModuleBuildFailure {
        module: String,
        profile: String,
        exit_code: i32,
    },

    /// The cancellation token was observed before or while running
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// Module directory does not exist. Only ever reported as a warning.
    #[error("Module path does not exist: {}", path.display())]
    MissingModulePath { path: PathBuf },

    /// Copying, renaming or cleaning artifacts failed
    #[error("Artifact operation failed: {operation}")]
    ArtifactIo {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// The build process could not be spawned or awaited
    #[error("Build process error in {}: {message}", module_path.display())]
    Process {
        module_path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Project not found: {project_key}")]
    ProjectNotFound { project_key: String },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("History store error: {operation}")]
    History {
        operation: String,
        #[source]
        source: sled::Error,
    },

    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BuildError {
    /// Create a module build failure
    pub fn module_failed<M: Into<String>, P: Into<String>>(
        module: M,
        profile: P,
        exit_code: i32,
    ) -> Self {
        Self::ModuleBuildFailure {
            module: module.into(),
            profile: profile.into(),
            exit_code,
        }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an artifact IO error
    pub fn artifact<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::ArtifactIo {
            operation: operation.into(),
            source,
        }
    }

    /// Create a process error
    pub fn process<S: Into<String>>(
        module_path: impl Into<PathBuf>,
        message: S,
        source: Option<std::io::Error>,
    ) -> Self {
        Self::Process {
            module_path: module_path.into(),
            message: message.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a history store error
    pub fn history<S: Into<String>>(operation: S, source: sled::Error) -> Self {
        Self::History {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// True when the error stems from the cancellation token, not a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether this error aborts the profile it occurred in
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MissingModulePath { .. })
    }
}

/// Result type alias for BuildError
pub type Result<T> = std::result::Result<T, BuildError>;

impl From<serde_yaml::Error> for BuildError {
    fn from(e: serde_yaml::Error) -> Self {
        BuildError::serialization("yaml", e)
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(e: serde_json::Error) -> Self {
        BuildError::serialization("json", e)
    }
}
