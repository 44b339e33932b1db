//! Trait seams for the opaque collaborators the core consumes but does not own:
//! a text embedder and an LLM text completer. Concrete HTTP-backed
//! implementations live outside this crate and are injected.

/// Turns text into fixed-dimension float32 vectors.
///
/// Implementations are the single source of truth for vector dimension;
/// this crate never falls back to a locally-run model when one is absent.
pub trait Embedder: Send + Sync {
    /// Embed one string. Empty/whitespace input and transient failures both
    /// yield `None` rather than an error.
    fn embed(&self, text: &str) -> Option<Vec<f32>>;

    /// Length-preserving batch embed; failures are positional `None`s.
    fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Fixed dimension this embedder produces, when known ahead of a call.
    fn dimensions(&self) -> Option<usize> {
        None
    }
}

/// A chat/completion model used for multi-query generation, auto-link
/// relation classification, and short-term memory formatting.
///
/// Kept deliberately minimal: one prompt in, one text response out. Callers
/// that need structured output parse the response themselves, extracting
/// a JSON object from the completion text.
pub trait TextCompleter: Send + Sync {
    fn complete(&self, prompt: &str) -> Option<String>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Deterministic embedder for unit tests: hashes each word into a fixed
    /// dimension and L2-normalizes. Blank input returns `None` per contract.
    pub struct FakeEmbedder {
        pub dims: usize,
    }

    impl Embedder for FakeEmbedder {
        fn embed(&self, text: &str) -> Option<Vec<f32>> {
            if text.trim().is_empty() {
                return None;
            }
            let mut v = vec![0.0f32; self.dims];
            for (i, byte) in text.bytes().enumerate() {
                v[i % self.dims] += byte as f32;
            }
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in v.iter_mut() {
                    *x /= norm;
                }
            }
            Some(v)
        }

        fn dimensions(&self) -> Option<usize> {
            Some(self.dims)
        }
    }

    /// Scripted completer returning canned answers by exact prompt match,
    /// falling back to `None` (simulating a transient failure).
    #[derive(Default)]
    pub struct ScriptedCompleter {
        pub answers: Mutex<HashMap<String, String>>,
    }

    impl TextCompleter for ScriptedCompleter {
        fn complete(&self, prompt: &str) -> Option<String> {
            self.answers.lock().unwrap().get(prompt).cloned()
        }
    }
}
