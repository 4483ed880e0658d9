use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum KvDocError {
    #[error("Schema parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unique constraint violated: field '{field}' value '{value}'")]
    UniqueConstraintViolation { field: String, value: String },

    #[error("Unique field '{field}' cannot be null")]
    NullUniqueField { field: String },

    #[error("Document is missing its '_id' field")]
    MissingIdentifier,

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Invalid collection name: '{0}'")]
    InvalidCollection(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Document codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, KvDocError>;
