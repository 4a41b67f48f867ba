//! WorldModel: concept hierarchy consulted by the reasoner.
//!
//! The engine only depends on the [`WorldModel`] trait. [`ConceptGraph`] is the
//! in-memory implementation loaded from a JSON/YAML node/edge file.

use crate::error::MeaningResult;
use crate::files;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use tracing::info;

pub const IS_A: &str = "is_a";

/// A concept node with free-form attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptNode {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptEdge {
    pub source: String,
    pub target: String,
    #[serde(default = "default_relationship", alias = "label")]
    pub relationship: String,
}

fn default_relationship() -> String {
    IS_A.to_string()
}

/// Read-only knowledge-graph boundary.
pub trait WorldModel: Send + Sync {
    fn has_node(&self, id: &str) -> bool;

    /// Transitive closure over `is_a` edges, excluding `id` itself.
    fn get_all_supertypes(&self, id: &str) -> BTreeSet<String>;

    /// Direct neighbours of `id`, optionally restricted to one relationship label.
    fn find_related(&self, id: &str, relationship: Option<&str>) -> Vec<ConceptNode>;
}

#[derive(Debug, Default, Deserialize)]
struct GraphFile {
    #[serde(default)]
    nodes: Vec<ConceptNode>,
    #[serde(default)]
    edges: Vec<ConceptEdge>,
}

/// In-memory concept graph.
#[derive(Debug, Clone, Default)]
pub struct ConceptGraph {
    nodes: BTreeMap<String, ConceptNode>,
    /// source -> outgoing edges in insertion order
    outgoing: BTreeMap<String, Vec<ConceptEdge>>,
}

impl ConceptGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> MeaningResult<Self> {
        let file: GraphFile = files::read_definition(path)?;
        let mut graph = Self::new();
        for node in file.nodes {
            graph.add_node(node);
        }
        for edge in file.edges {
            graph.add_edge(&edge.source, &edge.target, &edge.relationship);
        }
        info!(
            target: "meaning::world_model",
            path = %path.display(),
            nodes = graph.node_count(),
            "Loaded world model"
        );
        Ok(graph)
    }

    pub fn add_node(&mut self, node: ConceptNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    fn ensure_node(&mut self, id: &str) {
        self.nodes.entry(id.to_string()).or_insert_with(|| ConceptNode {
            id: id.to_string(),
            attributes: BTreeMap::new(),
        });
    }

    /// Add an edge; unknown endpoints are created implicitly.
    pub fn add_edge(&mut self, source: &str, target: &str, relationship: &str) {
        self.ensure_node(source);
        self.ensure_node(target);
        self.outgoing
            .entry(source.to_string())
            .or_default()
            .push(ConceptEdge {
                source: source.to_string(),
                target: target.to_string(),
                relationship: relationship.to_string(),
            });
    }

    pub fn add_is_a(&mut self, child: &str, parent: &str) {
        self.add_edge(child, parent, IS_A);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(Vec::len).sum()
    }
}

impl WorldModel for ConceptGraph {
    fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    fn get_all_supertypes(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for edge in self.outgoing.get(&current).into_iter().flatten() {
                if edge.relationship == IS_A && edge.target != id && seen.insert(edge.target.clone()) {
                    queue.push_back(edge.target.clone());
                }
            }
        }
        seen
    }

    fn find_related(&self, id: &str, relationship: Option<&str>) -> Vec<ConceptNode> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .filter(|e| relationship.map(|r| r == e.relationship).unwrap_or(true))
            .filter_map(|e| self.nodes.get(&e.target).cloned())
            .collect()
    }
}
