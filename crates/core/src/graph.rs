use crate::error::{FlowError, Result};
use crate::types::JobId;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Anything that can be stored in a [`Graph`]
pub trait GraphNode {
    fn id(&self) -> JobId;
}

impl<T: GraphNode + ?Sized> GraphNode for Arc<T> {
    fn id(&self) -> JobId {
        (**self).id()
    }
}

/// Directed dependency graph with insertion-ordered adjacency lists.
///
/// Edge order matters: the incoming list of a node defines the order of its
/// fan-in inputs.
#[derive(Debug, Clone)]
pub struct Graph<N> {
    nodes: Vec<N>,
    index: HashMap<JobId, usize>,
    to_nodes: HashMap<JobId, Vec<JobId>>,
    from_nodes: HashMap<JobId, Vec<JobId>>,
    max_id: u64,
}

impl<N> Default for Graph<N> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            to_nodes: HashMap::new(),
            from_nodes: HashMap::new(),
            max_id: 0,
        }
    }
}

impl<N: GraphNode> Graph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh id. Ids are never reused.
    pub fn next_id(&mut self) -> JobId {
        let id = JobId(self.max_id);
        self.max_id += 1;
        id
    }

    /// Register a node
    pub fn add_node(&mut self, node: N) -> Result<()> {
        let id = node.id();
        if self.index.contains_key(&id) {
            return Err(FlowError::DuplicateId(id));
        }

        // Keep issued ids ahead of externally chosen ones
        if id.0 >= self.max_id {
            self.max_id = id.0 + 1;
        }

        self.index.insert(id, self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = N>) -> Result<()> {
        for node in nodes {
            self.add_node(node)?;
        }
        Ok(())
    }

    /// Add a dependency edge `from -> to`. Adding the same edge twice is a no-op.
    pub fn add_edge(&mut self, from: JobId, to: JobId) -> Result<()> {
        for id in [from, to] {
            if !self.contains(id) {
                return Err(FlowError::UnknownNode(id));
            }
        }

        let outgoing = self.to_nodes.entry(from).or_default();
        if !outgoing.contains(&to) {
            outgoing.push(to);
        }

        let incoming = self.from_nodes.entry(to).or_default();
        if !incoming.contains(&from) {
            incoming.push(from);
        }

        Ok(())
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn node(&self, id: JobId) -> Option<&N> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of the nodes `id` points to, in edge insertion order
    pub fn outgoing_ids(&self, id: JobId) -> &[JobId] {
        self.to_nodes.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Ids of the nodes pointing to `id`, in edge insertion order
    pub fn incoming_ids(&self, id: JobId) -> &[JobId] {
        self.from_nodes.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn outgoing(&self, id: JobId) -> Vec<&N> {
        self.resolve(self.outgoing_ids(id))
    }

    pub fn incoming(&self, id: JobId) -> Vec<&N> {
        self.resolve(self.incoming_ids(id))
    }

    /// All nodes in registration order
    pub fn all_nodes(&self) -> &[N] {
        &self.nodes
    }

    /// Nodes without predecessors
    pub fn start_nodes(&self) -> Vec<&N> {
        self.nodes
            .iter()
            .filter(|n| self.incoming_ids(n.id()).is_empty())
            .collect()
    }

    /// Nodes without successors
    pub fn terminus_nodes(&self) -> Vec<&N> {
        self.nodes
            .iter()
            .filter(|n| self.outgoing_ids(n.id()).is_empty())
            .collect()
    }

    /// Depth-first topological order.
    ///
    /// Each node is placed in front of everything reachable from it. On a
    /// cyclic graph the visited set still makes this terminate, but the
    /// returned order is meaningless; use [`Graph::find_cycle`] first if the
    /// input is untrusted.
    pub fn topological_order(&self) -> Vec<&N> {
        let mut visited = HashSet::new();
        let mut post_order = Vec::with_capacity(self.nodes.len());

        for node in &self.nodes {
            if !visited.contains(&node.id()) {
                self.visit(node.id(), &mut visited, &mut post_order);
            }
        }

        post_order.reverse();
        self.resolve(&post_order)
    }

    fn visit(&self, root: JobId, visited: &mut HashSet<JobId>, post_order: &mut Vec<JobId>) {
        // Explicit stack of (node, index of the next outgoing edge to follow)
        let mut stack = vec![(root, 0usize)];
        visited.insert(root);

        while let Some((id, edge)) = stack.pop() {
            let outgoing = self.outgoing_ids(id);
            match outgoing.get(edge) {
                Some(&next) => {
                    stack.push((id, edge + 1));
                    if visited.insert(next) {
                        stack.push((next, 0));
                    }
                }
                None => post_order.push(id),
            }
        }
    }

    /// Return a node that sits on a cycle, if there is one
    pub fn find_cycle(&self) -> Option<JobId> {
        let mut graph: DiGraph<JobId, ()> = DiGraph::new();
        let indices: HashMap<JobId, NodeIndex> = self
            .nodes
            .iter()
            .map(|n| (n.id(), graph.add_node(n.id())))
            .collect();

        for (from, targets) in &self.to_nodes {
            for to in targets {
                graph.add_edge(indices[from], indices[to], ());
            }
        }

        toposort(&graph, None).err().map(|cycle| graph[cycle.node_id()])
    }

    fn resolve(&self, ids: &[JobId]) -> Vec<&N> {
        ids.iter().filter_map(|&id| self.node(id)).collect()
    }
}
