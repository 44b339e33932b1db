//! Short-term → long-term batch transfer.
//!
//! For each eligible short-term memory, an LLM is asked to produce a list of
//! graph operations (`CREATE_MEMORY, UPDATE_MEMORY, MERGE_MEMORIES,
//! CREATE_NODE, UPDATE_NODE, MERGE_NODES, CREATE_EDGE, UPDATE_EDGE,
//! DELETE_EDGE`) rather than a single `create_memory` call, since one
//! short-term candidate may resolve to touching several existing long-term
//! memories (e.g. merging into one, linking to another). When no completer
//! is wired up, or its response doesn't parse, this falls back to the
//! simpler "search for a near-duplicate, else create" path — the same
//! dependency-failure degradation used elsewhere when an LLM collaborator
//! is unavailable.

use crate::config::TransferConfig;
use crate::error::{Result, RuntimeError};
use crate::memory_manager::MemoryManager;
use crate::short_term::{RawCreateParams, ShortTermManager, StagedMemory};
use engram_core::graph::{EdgeType, NodeType};
use engram_core::tools::SearchMemoriesParams;
use engram_core::TextCompleter;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// One LLM-decided graph mutation. `op` is a `SCREAMING_SNAKE_CASE` op
/// name; `params` is a free-form bag rather than a fixed struct because the
/// alias-registration rule below must inspect arbitrary parameter *keys*,
/// not just a few named fields.
#[derive(Debug, Clone)]
pub struct GraphOp {
    pub op: String,
    pub params: BTreeMap<String, Value>,
}

/// Keys whose value is treated as a temp-id alias for whatever this op
/// creates, beyond the canonical `target_id` placeholder field — LLMs are
/// inconsistent about which key they stash a registerable id under.
const ALIAS_KEY_SUBSTRINGS: &[&str] = &["alias", "placeholder", "temp_id", "register_as", "memory_id", "node_id"];

fn is_create_op(op: &str) -> bool {
    matches!(op, "CREATE_MEMORY" | "CREATE_NODE" | "CREATE_EDGE")
}

fn param_str(params: &BTreeMap<String, Value>, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn param_f64(params: &BTreeMap<String, Value>, key: &str) -> Option<f64> {
    params.get(key).and_then(Value::as_f64)
}

/// Resolves temp ids issued by the transfer LLM (e.g. `TEMP_MEM_1`) against
/// the real ids produced as each `CREATE_*` step executes.
#[derive(Default)]
struct TempIdResolver {
    map: HashMap<String, String>,
}

impl TempIdResolver {
    fn resolve(&self, raw: &str) -> String {
        self.map.get(raw).cloned().unwrap_or_else(|| raw.to_string())
    }

    fn resolve_many(&self, raw: &[String]) -> Vec<String> {
        raw.iter().map(|r| self.resolve(r)).collect()
    }

    /// Alias registration rule: after a create op produces `real_id`,
    /// register its `target_id` placeholder (if any)
    /// plus any other parameter whose key name suggests it's also meant as
    /// an id reference for this newly-created entity.
    fn register(&mut self, op: &GraphOp, real_id: &str) {
        if !is_create_op(&op.op) {
            return;
        }
        if let Some(target) = param_str(&op.params, "target_id") {
            self.map.insert(target, real_id.to_string());
        }
        for (key, value) in &op.params {
            if key == "target_id" {
                continue;
            }
            let lower = key.to_lowercase();
            if ALIAS_KEY_SUBSTRINGS.iter().any(|needle| lower.contains(needle)) {
                if let Value::String(alias) = value {
                    self.map.insert(alias.clone(), real_id.to_string());
                }
            }
        }
    }
}

fn parse_graph_ops(response: &str) -> Option<Vec<GraphOp>> {
    let raw: Vec<Value> = serde_json::from_str(response).ok()?;
    let ops: Vec<GraphOp> = raw
        .into_iter()
        .filter_map(|v| {
            let mut obj = v.as_object()?.clone();
            let op = obj.remove("op").and_then(|v| v.as_str().map(str::to_string))?;
            Some(GraphOp {
                op: op.to_uppercase(),
                params: obj.into_iter().collect(),
            })
        })
        .collect();
    if ops.is_empty() {
        None
    } else {
        Some(ops)
    }
}

/// Drains transfer-eligible short-term memories into the long-term graph.
pub struct TransferManager {
    short_term: Arc<ShortTermManager>,
    long_term: Arc<MemoryManager>,
    completer: Option<Arc<dyn TextCompleter>>,
    config: TransferConfig,
}

impl TransferManager {
    pub fn new(short_term: Arc<ShortTermManager>, long_term: Arc<MemoryManager>, config: TransferConfig) -> Self {
        Self {
            short_term,
            long_term,
            completer: None,
            config,
        }
    }

    pub fn with_completer(mut self, completer: Arc<dyn TextCompleter>) -> Self {
        self.completer = Some(completer);
        self
    }

    /// Runs one transfer batch, returning the number of memories committed
    /// to the long-term graph.
    pub async fn run_batch(&self) -> Result<usize> {
        let candidates = self.short_term.transfer_eligible(self.config.batch_size).await;
        let mut committed = 0usize;

        for candidate in candidates {
            let similar = self.find_similar(&candidate).await;

            let ops = match (&self.completer, &similar) {
                (Some(completer), _) => self.decide_graph_ops(completer.as_ref(), &candidate, &similar),
                (None, Some(hits)) if hits.iter().any(|h| h.score > 0.97) => {
                    debug!(memory = %candidate.id, "skipping transfer: near-duplicate already in long-term graph");
                    self.short_term.remove(&candidate.id).await;
                    continue;
                }
                (None, _) => None,
            };

            match ops {
                Some(ops) => {
                    self.execute_ops(&ops).await;
                }
                None => {
                    let memory = self.long_term.create_memory(candidate.params.clone().into()).await?;
                    self.long_term.commit(&memory.id).await?;
                }
            }

            self.short_term.remove(&candidate.id).await;
            committed += 1;
        }

        Ok(committed)
    }

    async fn find_similar(&self, candidate: &StagedMemory) -> Option<Vec<engram_core::tools::ScoredMemory>> {
        let search = SearchMemoriesParams {
            query: format!("{} {}", candidate.params.subject, candidate.params.topic),
            top_k: self.config.search_top_k,
            expand_depth: 0,
            use_multi_query: false,
            min_importance: 0.0,
            ..Default::default()
        };
        match self.long_term.search_memories(&search).await {
            Ok(hits) => Some(hits),
            Err(err) => {
                warn!(error = %err, "transfer similarity search failed, proceeding without it");
                None
            }
        }
    }

    /// Asks the LLM for a graph-operation plan; falls back to `None`
    /// (caller then does a plain create) on any parse/response failure.
    fn decide_graph_ops(
        &self,
        completer: &dyn TextCompleter,
        candidate: &StagedMemory,
        similar: &Option<Vec<engram_core::tools::ScoredMemory>>,
    ) -> Option<Vec<GraphOp>> {
        let similar_ids: Vec<&str> = similar
            .as_ref()
            .map(|hits| hits.iter().map(|h| h.memory_id.as_str()).collect())
            .unwrap_or_default();
        let prompt = format!(
            "Decide graph operations to commit this short-term memory: subject={}, topic={}, object={:?}, importance={:?}. \
             Similar existing long-term memories: {:?}. Respond with a JSON array of ops.",
            candidate.params.subject, candidate.params.topic, candidate.params.object, candidate.params.importance, similar_ids,
        );
        let response = completer.complete(&prompt)?;
        parse_graph_ops(&response)
    }

    /// Executes a graph-op plan in order, resolving temp ids against ones
    /// registered by earlier `CREATE_*` steps. Each step is best-effort: a
    /// failing step is logged and skipped rather than aborting the
    /// remaining plan.
    async fn execute_ops(&self, ops: &[GraphOp]) {
        let mut resolver = TempIdResolver::default();
        for op in ops {
            if let Err(err) = self.execute_one(op, &mut resolver).await {
                warn!(op = %op.op, error = %err, "transfer graph op failed, continuing with remaining plan");
            }
        }
    }

    async fn execute_one(&self, op: &GraphOp, resolver: &mut TempIdResolver) -> Result<()> {
        match op.op.as_str() {
            "CREATE_MEMORY" => {
                let params = RawCreateParams {
                    subject: param_str(&op.params, "subject").unwrap_or_default(),
                    memory_type: param_str(&op.params, "memory_type").unwrap_or_else(|| "FACT".to_string()),
                    topic: param_str(&op.params, "topic").unwrap_or_default(),
                    object: param_str(&op.params, "object"),
                    attributes: Default::default(),
                    importance: param_f64(&op.params, "importance"),
                };
                let memory = self.long_term.create_memory(params.into()).await?;
                self.long_term.commit(&memory.id).await?;
                resolver.register(op, &memory.id);
            }
            "UPDATE_MEMORY" => {
                let id = param_str(&op.params, "memory_id").ok_or_else(|| RuntimeError::Transfer("UPDATE_MEMORY missing memory_id".into()))?;
                self.long_term.update_memory_fields(&resolver.resolve(&id), param_f64(&op.params, "importance")).await?;
            }
            "MERGE_MEMORIES" => {
                let target = param_str(&op.params, "target_id").ok_or_else(|| RuntimeError::Transfer("MERGE_MEMORIES missing target_id".into()))?;
                let sources: Vec<String> = op
                    .params
                    .get("source_ids")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                self.long_term.merge_memories(&resolver.resolve(&target), &resolver.resolve_many(&sources)).await?;
            }
            "CREATE_NODE" => {
                let content = param_str(&op.params, "content").ok_or_else(|| RuntimeError::Transfer("CREATE_NODE missing content".into()))?;
                let node_type = param_str(&op.params, "node_type").map(|s| NodeType::parse_name(&s)).unwrap_or(NodeType::Entity);
                let node = self.long_term.create_node(&content, node_type).await?;
                resolver.register(op, &node.id);
            }
            "UPDATE_NODE" => {
                let id = param_str(&op.params, "node_id").ok_or_else(|| RuntimeError::Transfer("UPDATE_NODE missing node_id".into()))?;
                self.long_term.update_node_content(&resolver.resolve(&id), param_str(&op.params, "content")).await?;
            }
            "MERGE_NODES" => {
                let source = param_str(&op.params, "source_id").ok_or_else(|| RuntimeError::Transfer("MERGE_NODES missing source_id".into()))?;
                let target = param_str(&op.params, "target_id").ok_or_else(|| RuntimeError::Transfer("MERGE_NODES missing target_id".into()))?;
                self.long_term.merge_nodes(&resolver.resolve(&source), &resolver.resolve(&target)).await?;
            }
            "CREATE_EDGE" => {
                let source = param_str(&op.params, "source_node_id").ok_or_else(|| RuntimeError::Transfer("CREATE_EDGE missing source_node_id".into()))?;
                let target = param_str(&op.params, "target_node_id").ok_or_else(|| RuntimeError::Transfer("CREATE_EDGE missing target_node_id".into()))?;
                let relation = param_str(&op.params, "relation").unwrap_or_else(|| "related".to_string());
                let edge_type = param_str(&op.params, "edge_type").map(|s| parse_edge_type(&s)).unwrap_or(EdgeType::Relation);
                let importance = param_f64(&op.params, "importance").unwrap_or(1.0) as f32;
                let edge = self
                    .long_term
                    .create_edge(&resolver.resolve(&source), &resolver.resolve(&target), &relation, edge_type, importance)
                    .await?;
                resolver.register(op, &edge.id);
            }
            "UPDATE_EDGE" => {
                let id = param_str(&op.params, "edge_id").ok_or_else(|| RuntimeError::Transfer("UPDATE_EDGE missing edge_id".into()))?;
                let importance = param_f64(&op.params, "importance").unwrap_or(1.0) as f32;
                self.long_term.update_edge_importance(&resolver.resolve(&id), importance).await?;
            }
            "DELETE_EDGE" => {
                let id = param_str(&op.params, "edge_id").ok_or_else(|| RuntimeError::Transfer("DELETE_EDGE missing edge_id".into()))?;
                self.long_term.delete_edge(&resolver.resolve(&id)).await?;
            }
            other => {
                return Err(RuntimeError::Transfer(format!("unknown graph op: {other}")));
            }
        }
        Ok(())
    }
}

fn parse_edge_type(s: &str) -> EdgeType {
    match s.to_lowercase().as_str() {
        "core_relation" => EdgeType::CoreRelation,
        "attribute" => EdgeType::Attribute,
        "causality" => EdgeType::Causality,
        "reference" => EdgeType::Reference,
        "temporal" => EdgeType::Temporal,
        "memory_type" => EdgeType::MemoryType,
        _ => EdgeType::Relation,
    }
}
