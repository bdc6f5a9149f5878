//! Error types for document loading, schema flattening, and module generation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors while loading or dereferencing a source document.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("unresolved $ref \"{reference}\": {message}")]
    UnresolvedRef { reference: String, message: String },
}

/// Errors from the schema flattening engine.
///
/// Both kinds are fatal to generation for the affected resource: they
/// indicate a malformed source schema, not a recoverable condition.
#[derive(Debug, Error)]
pub enum FlattenError {
    #[error("cycle detected in allOf composition at {origin}")]
    CycleDetected { origin: String },

    #[error(
        "conflicting definitions for property \"{property}\": \
         {first_origin} declares {first_shape}, {second_origin} declares {second_shape}"
    )]
    ConflictingPropertyDefinition {
        property: String,
        first_origin: String,
        first_shape: String,
        second_origin: String,
        second_shape: String,
    },
}

/// Errors during module generation.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Flatten(#[from] FlattenError),

    #[error("resource type \"{resource_type}\" not found in document")]
    ResourceNotFound { resource_type: String },

    #[error("no request body schema on PUT {path}")]
    MissingBodySchema { path: String },

    #[error("variable name collision: \"{first}\" and \"{second}\" both lower to \"{target}\"")]
    NameCollision {
        first: String,
        second: String,
        target: String,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

impl FlattenError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

impl GenerateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            GenerateError::Load(e) => e.exit_code(),
            GenerateError::Flatten(e) => e.exit_code(),
            _ => 2,
        }
    }
}
