//! Error types for Beaver
//!
//! All modules use `BeaverResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Beaver operations
pub type BeaverResult<T> = Result<T, BeaverError>;

/// All errors that can occur in Beaver
#[derive(Error, Debug)]
pub enum BeaverError {
    // Graph construction errors (fatal, reported before scheduling)
    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Artifact {artifact} is already produced by [{existing}]")]
    Conflict { artifact: String, existing: String },

    #[error("Unknown artifact: {0}")]
    UnknownArtifact(String),

    #[error("Artifact {name} is already declared as {existing}")]
    DuplicateArtifact { name: String, existing: String },

    #[error("Invalid transformation: {0}")]
    InvalidTransform(String),

    // Execution errors (isolated to the affected sub-tree)
    #[error("Cannot digest {artifact}: {reason}")]
    Resource { artifact: String, reason: String },

    #[error("Transformation [{transform}] failed: {reason}")]
    Execution { transform: String, reason: String },

    #[error("Build cancelled")]
    Cancelled,

    // Staleness store errors (degrade to a full rebuild)
    #[error("Staleness store {path} unusable: {reason}")]
    Persistence { path: PathBuf, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid build manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("Build manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Invalid artifact pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("{0}")]
    User(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BeaverError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an execution error for a transformation
    pub fn execution(transform: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            transform: transform.into(),
            reason: reason.into(),
        }
    }

    /// Create a resource error for an artifact
    pub fn resource(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resource {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is a graph construction error
    ///
    /// These abort the build before any transformation is evaluated.
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            Self::Cycle { .. }
                | Self::Conflict { .. }
                | Self::UnknownArtifact(_)
                | Self::DuplicateArtifact { .. }
                | Self::InvalidTransform(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Cycle { .. } => Some("A transformation consumes one of its own outputs"),
            Self::UnknownArtifact(_) => Some("Run: beaver list"),
            Self::ManifestNotFound(_) => Some("Create a beaver.toml or pass --file"),
            Self::Persistence { .. } => Some("Run: beaver forget --all"),
            Self::ConfigInvalid { .. } => Some("Run: beaver config path"),
            _ => None,
        }
    }
}
