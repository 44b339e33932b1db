//! Vector index: HNSW k-NN over node embeddings with multi-query fusion.

mod error;
mod fusion;
mod index;

pub use error::{Result, VectorSearchError};
pub use fusion::{fuse, normalize_weights, FusionMethod, SubqueryHits};
pub use index::{
    VectorIndex, VectorIndexConfig, VectorRecord, VectorUpsert, DEFAULT_CONNECTIVITY,
    DEFAULT_EXPANSION_ADD, DEFAULT_EXPANSION_SEARCH, MULTI_QUERY_OVERFETCH,
    SINGLE_QUERY_FALLBACK_OVERFETCH,
};
