use std::path::PathBuf;
use thiserror::Error;

/// Stable error codes for build failures.
///
/// All codes are SCREAMING_SNAKE_CASE and stable across versions.
pub mod codes {
    /// A specifier could not be mapped to a file.
    pub const BUILD_RESOLVE_ERROR: &str = "BUILD_RESOLVE_ERROR";
    /// Splitting or resolver configuration is malformed.
    pub const BUILD_CONFIG_INVALID: &str = "BUILD_CONFIG_INVALID";
    /// Async classification did not reach a consistent fixed point.
    pub const BUILD_CYCLE_CLASSIFICATION: &str = "BUILD_CYCLE_CLASSIFICATION";
    /// A resolved module could not be read.
    pub const BUILD_READ_ERROR: &str = "BUILD_READ_ERROR";
    /// The parser rejected a module.
    pub const BUILD_PARSE_ERROR: &str = "BUILD_PARSE_ERROR";
}

/// Core error type for weld builds.
///
/// Any of these fails the whole build; partial chunk sets are never produced.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot resolve '{specifier}' from '{}': {reason}", importer.display())]
    Resolution {
        importer: PathBuf,
        specifier: String,
        reason: String,
    },

    #[error("Invalid configuration at {field}: {message}")]
    Config { field: String, message: String },

    #[error("Async classification failed: {message}")]
    CycleClassification { message: String },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

impl Error {
    #[must_use]
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn cycle_classification(message: impl Into<String>) -> Self {
        Self::CycleClassification {
            message: message.into(),
        }
    }

    /// Get the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => codes::BUILD_RESOLVE_ERROR,
            Self::Config { .. } => codes::BUILD_CONFIG_INVALID,
            Self::CycleClassification { .. } => codes::BUILD_CYCLE_CLASSIFICATION,
            Self::Read { .. } => codes::BUILD_READ_ERROR,
            Self::Parse { .. } => codes::BUILD_PARSE_ERROR,
        }
    }

    /// Whether the error is caused by user input (as opposed to an internal invariant).
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::CycleClassification { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
