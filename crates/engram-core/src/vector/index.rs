//! Persistent HNSW vector index over `(id, embedding, metadata, document)`.
//!
//! Backed by USearch, with a metadata/document side table and multi-query
//! fusion layered on top of the bare nearest-neighbor index.

use super::error::{Result, VectorSearchError};
use super::fusion::{fuse, FusionMethod, SubqueryHits};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;

#[cfg(feature = "vector-search")]
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

pub const DEFAULT_CONNECTIVITY: usize = 16;
pub const DEFAULT_EXPANSION_ADD: usize = 128;
pub const DEFAULT_EXPANSION_SEARCH: usize = 64;

/// One stored record's side data (the embedding lives in the HNSW index
/// itself; this is metadata plus the optional source document).
#[derive(Debug, Clone, Default)]
pub struct VectorRecord {
    pub id: String,
    pub metadata: BTreeMap<String, Value>,
    pub document: Option<String>,
    pub embedding: Vec<f32>,
}

/// A `(node, embedding, metadata[, document])` tuple queued for `add_batch`.
pub struct VectorUpsert {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: BTreeMap<String, Value>,
    pub document: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub dimensions: usize,
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
}

impl VectorIndexConfig {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
        }
    }
}

/// Recommended over-fetch factor per sub-query in `search_multi`.
pub const MULTI_QUERY_OVERFETCH: usize = 3;
/// Over-fetch factor used by the single-query fallback path.
pub const SINGLE_QUERY_FALLBACK_OVERFETCH: usize = 5;

pub struct VectorIndex {
    #[cfg(feature = "vector-search")]
    ann: Index,
    config: VectorIndexConfig,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    records: HashMap<String, VectorRecord>,
    next_id: u64,
}

impl VectorIndex {
    pub fn new(config: VectorIndexConfig) -> Result<Self> {
        #[cfg(feature = "vector-search")]
        {
            let options = IndexOptions {
                dimensions: config.dimensions,
                metric: MetricKind::Cos,
                quantization: ScalarKind::F32,
                connectivity: config.connectivity,
                expansion_add: config.expansion_add,
                expansion_search: config.expansion_search,
                multi: false,
            };
            let ann = Index::new(&options)
                .map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;
            ann.reserve(16)
                .map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;
            Ok(Self {
                ann,
                config,
                key_to_id: HashMap::new(),
                id_to_key: HashMap::new(),
                records: HashMap::new(),
                next_id: 0,
            })
        }
        #[cfg(not(feature = "vector-search"))]
        {
            Ok(Self {
                config,
                key_to_id: HashMap::new(),
                id_to_key: HashMap::new(),
                records: HashMap::new(),
                next_id: 0,
            })
        }
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    fn validate_metadata(metadata: &BTreeMap<String, Value>) -> Result<()> {
        for (k, v) in metadata {
            let scalar = matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null);
            if !scalar {
                return Err(VectorSearchError::NonScalarMetadata(k.clone()));
            }
        }
        Ok(())
    }

    /// Overwrite-on-duplicate add.
    pub fn add(&mut self, upsert: VectorUpsert) -> Result<()> {
        if upsert.embedding.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions {
                expected: self.config.dimensions,
                got: upsert.embedding.len(),
            });
        }
        Self::validate_metadata(&upsert.metadata)?;

        #[cfg(feature = "vector-search")]
        {
            if let Some(&existing) = self.key_to_id.get(&upsert.id) {
                let _ = self.ann.remove(existing);
            }
            let current = self.ann.size();
            let capacity = self.ann.capacity();
            if current >= capacity {
                self.ann
                    .reserve(std::cmp::max(capacity * 2, 16))
                    .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            }
            let ann_id = *self.key_to_id.get(&upsert.id).unwrap_or(&self.next_id);
            self.ann
                .add(ann_id, &upsert.embedding)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            if !self.key_to_id.contains_key(&upsert.id) {
                self.key_to_id.insert(upsert.id.clone(), ann_id);
                self.id_to_key.insert(ann_id, upsert.id.clone());
                self.next_id += 1;
            }
        }
        #[cfg(not(feature = "vector-search"))]
        {
            let ann_id = *self.key_to_id.get(&upsert.id).unwrap_or(&self.next_id);
            if !self.key_to_id.contains_key(&upsert.id) {
                self.key_to_id.insert(upsert.id.clone(), ann_id);
                self.id_to_key.insert(ann_id, upsert.id.clone());
                self.next_id += 1;
            }
        }

        self.records.insert(
            upsert.id.clone(),
            VectorRecord {
                id: upsert.id,
                metadata: upsert.metadata,
                document: upsert.document,
                embedding: upsert.embedding,
            },
        );
        Ok(())
    }

    pub fn add_batch(&mut self, upserts: Vec<VectorUpsert>) -> Result<()> {
        for u in upserts {
            self.add(u)?;
        }
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let Some(ann_id) = self.key_to_id.remove(id) else {
            return Ok(false);
        };
        self.id_to_key.remove(&ann_id);
        self.records.remove(id);
        #[cfg(feature = "vector-search")]
        {
            self.ann
                .remove(ann_id)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
        }
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Option<&VectorRecord> {
        self.records.get(id)
    }

    /// Cosine search with an optional scalar metadata type-filter and a
    /// minimum-similarity floor. Distance from the backing store is
    /// converted to similarity as `1 - distance`, clamped to `[0, 1]`.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        type_filter: Option<&str>,
        min_similarity: f32,
    ) -> Result<Vec<(String, f32, VectorRecord)>> {
        if query.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions {
                expected: self.config.dimensions,
                got: query.len(),
            });
        }
        if self.records.is_empty() {
            return Ok(Vec::new());
        }

        let raw = self.raw_search(query, limit * 3 + limit)?;
        let mut out = Vec::new();
        for (id, similarity) in raw {
            let Some(record) = self.records.get(&id) else {
                continue;
            };
            if let Some(tf) = type_filter {
                let matches = record
                    .metadata
                    .get("node_type")
                    .and_then(|v| v.as_str())
                    .map(|s| s == tf)
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            if similarity < min_similarity {
                continue;
            }
            out.push((id, similarity, record.clone()));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Multi-query fused k-NN. Each sub-query is over-fetched by
    /// `MULTI_QUERY_OVERFETCH`x `limit` before fusion.
    pub fn search_multi(
        &self,
        queries: &[Vec<f32>],
        weights: &[f32],
        limit: usize,
        fusion: FusionMethod,
    ) -> Result<Vec<(String, f32, VectorRecord)>> {
        let mut per_query: Vec<SubqueryHits> = Vec::with_capacity(queries.len());
        for q in queries {
            let raw = self.raw_search(q, limit * MULTI_QUERY_OVERFETCH)?;
            per_query.push(raw);
        }
        let fused = fuse(&per_query, weights, fusion);
        let mut ranked: Vec<(String, f32)> = fused.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        ranked.truncate(limit);

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| self.records.get(&id).cloned().map(|r| (id, score, r)))
            .collect())
    }

    fn raw_search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        if query.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions {
                expected: self.config.dimensions,
                got: query.len(),
            });
        }
        if self.records.is_empty() {
            return Ok(Vec::new());
        }
        #[cfg(feature = "vector-search")]
        {
            let results = self
                .ann
                .search(query, limit)
                .map_err(|e| VectorSearchError::IndexSearch(e.to_string()))?;
            let mut out = Vec::with_capacity(results.keys.len());
            for (key, distance) in results.keys.iter().zip(results.distances.iter()) {
                if let Some(id) = self.id_to_key.get(key) {
                    let similarity = (1.0 - distance).clamp(0.0, 1.0);
                    out.push((id.clone(), similarity));
                }
            }
            Ok(out)
        }
        #[cfg(not(feature = "vector-search"))]
        {
            // Brute-force cosine fallback when the ANN backend is compiled out.
            let mut scored: Vec<(String, f32)> = self
                .records
                .values()
                .map(|r| (r.id.clone(), cosine_similarity(query, &r.embedding)))
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
            scored.truncate(limit);
            Ok(scored)
        }
    }
}

#[allow(dead_code)]
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(seed: f32, dims: usize) -> Vec<f32> {
        (0..dims).map(|i| ((i as f32 + seed) / dims as f32).sin()).collect()
    }

    fn upsert(id: &str, vec: Vec<f32>) -> VectorUpsert {
        VectorUpsert {
            id: id.to_string(),
            embedding: vec,
            metadata: BTreeMap::new(),
            document: None,
        }
    }

    #[test]
    fn add_overwrites_without_duplicating() {
        let mut idx = VectorIndex::new(VectorIndexConfig::new(8)).unwrap();
        idx.add(upsert("n1", v(1.0, 8))).unwrap();
        idx.add(upsert("n1", v(2.0, 8))).unwrap();
        assert_eq!(idx.count(), 1);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut idx = VectorIndex::new(VectorIndexConfig::new(8)).unwrap();
        let result = idx.add(upsert("n1", vec![1.0, 2.0, 3.0]));
        assert!(result.is_err());
    }

    #[test]
    fn search_finds_nearest_and_respects_limit() {
        let mut idx = VectorIndex::new(VectorIndexConfig::new(16)).unwrap();
        idx.add(upsert("close", v(1.0, 16))).unwrap();
        idx.add(upsert("far", v(500.0, 16))).unwrap();
        let results = idx.search(&v(1.0, 16), 1, None, 0.0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "close");
    }

    #[test]
    fn search_multi_weighted_max_fuses_across_queries() {
        let mut idx = VectorIndex::new(VectorIndexConfig::new(16)).unwrap();
        idx.add(upsert("a", v(1.0, 16))).unwrap();
        idx.add(upsert("b", v(50.0, 16))).unwrap();
        let results = idx
            .search_multi(&[v(1.0, 16), v(1.2, 16)], &[1.0, 0.5], 2, FusionMethod::WeightedMax)
            .unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn delete_removes_record() {
        let mut idx = VectorIndex::new(VectorIndexConfig::new(8)).unwrap();
        idx.add(upsert("n1", v(1.0, 8))).unwrap();
        assert!(idx.delete("n1").unwrap());
        assert!(idx.get("n1").is_none());
        assert_eq!(idx.count(), 0);
    }
}
