//! Opaque embedding and completion collaborators.

mod client;
mod traits;

pub use client::EmbeddingClient;
pub use traits::{Embedder, TextCompleter};

#[cfg(any(test, feature = "test-support"))]
pub use traits::test_support;
#[cfg(any(test, feature = "test-support"))]
pub use traits::test_support as testing;
