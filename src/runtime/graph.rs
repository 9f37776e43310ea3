/// Dependency graph builder
///
/// Converts a workflow's node/edge lists into a petgraph DAG and derives the
/// scheduling data from it: the dependency map (node → predecessor ids), the
/// initial per-node dependency counts, and successor/descendant lookups used
/// for completion and failure propagation.

use crate::errors::GraphError;
use crate::workflow::types::{Edge, Node};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// Validated dependency graph of one workflow
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// The petgraph DiGraph structure; weights are node ids
    graph: DiGraph<String, ()>,
    /// Mapping from node ID to graph node index
    node_id_to_index: HashMap<String, NodeIndex>,
    /// Node ids in a valid topological order
    order: Vec<String>,
}

impl DependencyGraph {
    /// Build and validate the graph
    ///
    /// Duplicate edges are collapsed so a node's dependency count equals the
    /// number of distinct predecessors. Fails on duplicate node ids, edges
    /// naming unknown nodes, and cycles (including self-loops).
    pub fn build(nodes: &[Node], edges: &[Edge]) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();

        for node in nodes {
            if node_id_to_index.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
            let index = graph.add_node(node.id.clone());
            node_id_to_index.insert(node.id.clone(), index);
        }

        for edge in edges {
            let from = *node_id_to_index
                .get(&edge.from_node_id)
                .ok_or_else(|| GraphError::UnknownNode(edge.from_node_id.clone()))?;
            let to = *node_id_to_index
                .get(&edge.to_node_id)
                .ok_or_else(|| GraphError::UnknownNode(edge.to_node_id.clone()))?;

            if graph.find_edge(from, to).is_some() {
                tracing::debug!(
                    "🔗 Ignoring duplicate edge '{}' → '{}'",
                    edge.from_node_id,
                    edge.to_node_id
                );
                continue;
            }
            graph.add_edge(from, to, ());
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| GraphError::Cycle(graph[cycle.node_id()].clone()))?
            .into_iter()
            .map(|index| graph[index].clone())
            .collect();

        Ok(Self {
            graph,
            node_id_to_index,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.node_id_to_index.contains_key(node_id)
    }

    /// Node ids in topological order
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Direct predecessors of a node (the nodes it depends on)
    pub fn predecessors(&self, node_id: &str) -> Vec<String> {
        self.neighbors(node_id, Direction::Incoming)
    }

    /// Direct successors of a node (the nodes that depend on it)
    pub fn successors(&self, node_id: &str) -> Vec<String> {
        self.neighbors(node_id, Direction::Outgoing)
    }

    /// Dependency map: `to_node_id → [from_node_id, ...]` for every node
    pub fn dependency_map(&self) -> HashMap<String, Vec<String>> {
        self.order
            .iter()
            .map(|id| (id.clone(), self.predecessors(id)))
            .collect()
    }

    /// Number of distinct predecessors of a node
    pub fn in_degree(&self, node_id: &str) -> u32 {
        self.node_id_to_index
            .get(node_id)
            .map(|&index| {
                self.graph
                    .neighbors_directed(index, Direction::Incoming)
                    .count() as u32
            })
            .unwrap_or(0)
    }

    /// Initial dependency count per node
    pub fn initial_counts(&self) -> HashMap<String, u32> {
        self.order
            .iter()
            .map(|id| (id.clone(), self.in_degree(id)))
            .collect()
    }

    /// All nodes transitively reachable from `node_id`, excluding itself,
    /// in breadth-first order
    pub fn descendants(&self, node_id: &str) -> Vec<String> {
        let Some(&start) = self.node_id_to_index.get(node_id) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        let mut found = Vec::new();

        seen.insert(start);
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            for target in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if seen.insert(target) {
                    found.push(self.graph[target].clone());
                    queue.push_back(target);
                }
            }
        }

        found
    }

    fn neighbors(&self, node_id: &str, direction: Direction) -> Vec<String> {
        let Some(&index) = self.node_id_to_index.get(node_id) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        ids.sort();
        ids
    }
}
