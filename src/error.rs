//! Error types for shipload
//!
//! All modules use `ShiploadResult<T>` as their return type.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for shipload operations
pub type ShiploadResult<T> = Result<T, ShiploadError>;

/// All errors that can occur in shipload
#[derive(Error, Debug)]
pub enum ShiploadError {
    // Manifest errors
    #[error("Cyclic dependency involving module '{id}'")]
    CyclicDependency { id: String },

    #[error("Module '{id}' depends on '{dependency}', which is not in the manifest")]
    UnknownDependency { id: String, dependency: String },

    #[error("Invalid manifest: {0}")]
    ManifestParse(String),

    #[error("No manifest available for {url}")]
    ManifestUnavailable { url: String },

    // Fetch errors
    #[error("Module '{id}' is unavailable from every source")]
    ModuleUnavailable { id: String },

    #[error("Integrity check failed for module '{id}': expected sha256 {expected}, got {actual}")]
    IntegrityViolation {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Transport error fetching {url}: {reason}")]
    Transport { url: String, reason: String },

    // Load errors
    #[error("Module '{id}' was rejected by the receiver: {reason}")]
    ReceiverFailure { id: String, reason: String },

    #[error("Load was cancelled")]
    Cancelled,

    // Cache errors
    #[error("Cache index error: {0}")]
    CacheIndex(#[from] rusqlite::Error),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

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
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

/// Coarse classification of failures, used when reporting load events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CyclicDependency,
    UnknownDependency,
    ModuleUnavailable,
    IntegrityViolation,
    ReceiverFailure,
    ManifestUnavailable,
    Cancelled,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CyclicDependency => "cyclic_dependency",
            Self::UnknownDependency => "unknown_dependency",
            Self::ModuleUnavailable => "module_unavailable",
            Self::IntegrityViolation => "integrity_violation",
            Self::ReceiverFailure => "receiver_failure",
            Self::ManifestUnavailable => "manifest_unavailable",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ShiploadError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a transport error
    pub fn transport(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a receiver failure for a module
    pub fn receiver(id: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::ReceiverFailure {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Classify this error for event reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            Self::UnknownDependency { .. } => ErrorKind::UnknownDependency,
            Self::ModuleUnavailable { .. } => ErrorKind::ModuleUnavailable,
            Self::IntegrityViolation { .. } => ErrorKind::IntegrityViolation,
            Self::ReceiverFailure { .. } => ErrorKind::ReceiverFailure,
            Self::ManifestUnavailable { .. } | Self::ManifestParse(_) => {
                ErrorKind::ManifestUnavailable
            }
            Self::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ManifestUnavailable { .. } => {
                Some("Check the manifest URL, or seed an embedded directory with `shipload download`")
            }
            Self::IntegrityViolation { .. } => {
                Some("The served bytes do not match the manifest; republish the manifest or module")
            }
            Self::CacheIndex(_) => Some("Run: shipload cache prune --max-bytes 0"),
            _ => None,
        }
    }
}
