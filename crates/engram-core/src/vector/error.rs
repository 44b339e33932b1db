//! Error type for the vector index.

#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorSearchError {
    #[error("index creation failed: {0}")]
    IndexCreation(String),
    #[error("failed to add vector: {0}")]
    IndexAdd(String),
    #[error("search failed: {0}")]
    IndexSearch(String),
    #[error("invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("metadata value is not a flat scalar: key={0}")]
    NonScalarMetadata(String),
}

pub type Result<T> = std::result::Result<T, VectorSearchError>;
