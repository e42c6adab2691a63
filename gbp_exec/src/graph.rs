//! # Graph
//!
//! Arena storage for a single search tree. Vertices and edges live in index-addressed slots and
//! refer to each other by [`VertexId`] and [`EdgeId`], so removing a subtree only empties slots and
//! never invalidates the ids of surviving vertices.
//!
//! The graph always satisfies the tree invariant: exactly one root (the first vertex inserted),
//! every other vertex has exactly one incoming edge, and there are no cycles.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::state::State;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Index of a vertex within a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId(pub usize);

/// Index of an edge within a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub usize);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,

    pub state: State,

    /// The incoming edge, `None` only for the root.
    pub parent_edge: Option<EdgeId>,

    pub children: Vec<VertexId>,

    /// Sum of edge costs from the root to this vertex.
    pub cost_to_root: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub parent: VertexId,
    pub child: VertexId,
    pub data: EdgeData,
}

/// Data produced when an edge passes its feasibility check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeData {
    /// Incremental cost of traversing the edge.
    pub cost: f64,

    /// The intermediate states checked along the edge, ending with the child state.
    pub sub_path: Vec<State>,
}

/// A tree of states.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    vertices: Vec<Option<Vertex>>,
    edges: Vec<Option<Edge>>,
    root: Option<VertexId>,
    num_vertices: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Vertex {0:?} does not exist in the graph")]
    UnknownVertex(VertexId),

    #[error("Graph invariant violated: {0}")]
    InvariantViolation(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new graph containing only the given root state.
    pub fn with_root(state: State) -> Self {
        let mut graph = Self::new();
        graph.vertices.push(Some(Vertex {
            id: VertexId(0),
            state,
            parent_edge: None,
            children: Vec::new(),
            cost_to_root: 0.0,
        }));
        graph.root = Some(VertexId(0));
        graph.num_vertices = 1;
        graph
    }

    /// Insert a new vertex.
    ///
    /// With `parent` set the vertex is linked to the given parent by a new edge carrying `data`.
    /// Without a parent the vertex becomes the root, which is only valid on an empty graph.
    pub fn insert(
        &mut self,
        state: State,
        parent: Option<(VertexId, EdgeData)>,
    ) -> Result<VertexId, GraphError> {
        let id = VertexId(self.vertices.len());

        match parent {
            None => {
                if let Some(root) = self.root {
                    return Err(GraphError::InvariantViolation(format!(
                        "attempted to insert a second root, graph already rooted at {:?}",
                        root
                    )));
                }

                self.vertices.push(Some(Vertex {
                    id,
                    state,
                    parent_edge: None,
                    children: Vec::new(),
                    cost_to_root: 0.0,
                }));
                self.root = Some(id);
            }
            Some((parent_id, data)) => {
                let parent_cost = match self.vertex(parent_id) {
                    Some(p) => p.cost_to_root,
                    None => {
                        return Err(GraphError::InvariantViolation(format!(
                            "parent {:?} of new vertex does not exist",
                            parent_id
                        )))
                    }
                };

                let edge_id = EdgeId(self.edges.len());
                let cost_to_root = parent_cost + data.cost;

                self.vertices.push(Some(Vertex {
                    id,
                    state,
                    parent_edge: Some(edge_id),
                    children: Vec::new(),
                    cost_to_root,
                }));
                self.edges.push(Some(Edge {
                    id: edge_id,
                    parent: parent_id,
                    child: id,
                    data,
                }));
                if let Some(Some(p)) = self.vertices.get_mut(parent_id.0) {
                    p.children.push(id);
                }
            }
        }

        self.num_vertices += 1;

        Ok(id)
    }

    /// Make `parent` the parent of the existing vertex `child`, replacing any incoming edge the
    /// child already has. The child's subtree moves with it.
    ///
    /// Fails if either vertex is unknown, if `child` is the root, or if `parent` is a descendant
    /// of `child` (which would close a cycle).
    pub fn add_edge(
        &mut self,
        parent: VertexId,
        child: VertexId,
        data: EdgeData,
    ) -> Result<EdgeId, GraphError> {
        let parent_cost = self
            .vertex(parent)
            .ok_or(GraphError::UnknownVertex(parent))?
            .cost_to_root;
        let child_cost = self
            .vertex(child)
            .ok_or(GraphError::UnknownVertex(child))?
            .cost_to_root;

        if self.root == Some(child) {
            return Err(GraphError::InvariantViolation(format!(
                "{:?} is the root and cannot have an incoming edge",
                child
            )));
        }
        if self.ancestors(parent).any(|v| v == child) {
            return Err(GraphError::InvariantViolation(format!(
                "edge {:?} -> {:?} would create a cycle",
                parent, child
            )));
        }

        // Unlink the old incoming edge
        if let Some(old) = self.vertex(child).and_then(|v| v.parent_edge) {
            let old_parent = self.edges.get_mut(old.0).and_then(Option::take).map(|e| e.parent);
            if let Some(p) = old_parent
                .and_then(|p| self.vertices.get_mut(p.0))
                .and_then(|s| s.as_mut())
            {
                p.children.retain(|c| *c != child);
            }
        }

        let edge_id = EdgeId(self.edges.len());
        let delta = parent_cost + data.cost - child_cost;

        self.edges.push(Some(Edge {
            id: edge_id,
            parent,
            child,
            data,
        }));
        if let Some(p) = self.vertices.get_mut(parent.0).and_then(|s| s.as_mut()) {
            p.children.push(child);
        }
        if let Some(c) = self.vertices.get_mut(child.0).and_then(|s| s.as_mut()) {
            c.parent_edge = Some(edge_id);
        }

        for v in self.descendants(child) {
            if let Some(vertex) = self.vertices.get_mut(v.0).and_then(|s| s.as_mut()) {
                vertex.cost_to_root += delta;
            }
        }

        Ok(edge_id)
    }

    /// Find the vertex nearest to `query` under the given metric.
    ///
    /// Ties are broken by insertion order, with the earliest inserted vertex winning. Returns
    /// `None` only if the graph is empty.
    pub fn nearest<F>(&self, query: &State, metric: F) -> Option<VertexId>
    where
        F: Fn(&State, &State) -> f64,
    {
        // min_by_key returns the first of equal minima, and vertices are stored in insertion order
        self.vertices()
            .min_by_key(|v| OrderedFloat(metric(&v.state, query)))
            .map(|v| v.id)
    }

    /// Return the states from the root to `vertex`, inclusive at both ends.
    pub fn path_to(&self, vertex: VertexId) -> Result<Vec<State>, GraphError> {
        let mut path = Vec::new();
        let mut current = vertex;

        loop {
            // A chain longer than the vertex count can only come from a cycle
            if path.len() >= self.num_vertices {
                return Err(GraphError::InvariantViolation(format!(
                    "parent chain from {:?} does not terminate",
                    vertex
                )));
            }

            let v = self.vertex(current).ok_or(GraphError::UnknownVertex(current))?;
            path.push(v.state);

            match self.parent(current) {
                Some(p) => current = p,
                None => break,
            }
        }

        if self.root != Some(current) {
            return Err(GraphError::InvariantViolation(format!(
                "parent chain from {:?} ends at {:?}, not the root",
                vertex, current
            )));
        }

        path.reverse();
        Ok(path)
    }

    /// Remove a vertex, all of its descendants, and every edge touching them.
    ///
    /// Does nothing if the vertex does not exist. Removing the root empties the graph.
    pub fn remove_subtree(&mut self, vertex: VertexId) {
        if self.vertex(vertex).is_none() {
            return;
        }

        if let Some(p) = self
            .parent(vertex)
            .and_then(|p| self.vertices.get_mut(p.0))
            .and_then(|s| s.as_mut())
        {
            p.children.retain(|c| *c != vertex);
        }

        for id in self.descendants(vertex) {
            if let Some(removed) = self.vertices.get_mut(id.0).and_then(Option::take) {
                if let Some(slot) = removed.parent_edge.and_then(|e| self.edges.get_mut(e.0)) {
                    *slot = None;
                }
                self.num_vertices -= 1;
            }
        }

        if self.root == Some(vertex) {
            self.root = None;
        }
    }

    /// Remove an edge, along with the subtree hanging from its child.
    pub fn remove_edge(&mut self, edge: EdgeId) {
        if let Some(child) = self.edge(edge).map(|e| e.child) {
            self.remove_subtree(child);
        }
    }

    /// Remove every subtree whose incoming edge fails the predicate.
    ///
    /// The predicate is called with the parent state, the child state and the edge. Returns the
    /// number of vertices removed.
    pub fn prune<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&State, &State, &Edge) -> bool,
    {
        let before = self.num_vertices;

        // Breadth first from the root so that a removed subtree is never visited
        let mut queue: Vec<VertexId> = self.root.into_iter().collect();
        let mut i = 0;
        while i < queue.len() {
            let id = queue[i];
            i += 1;

            let children = match self.vertex(id) {
                Some(v) => v.children.clone(),
                None => continue,
            };
            let parent_state = match self.vertex(id) {
                Some(v) => v.state,
                None => continue,
            };

            for child in children {
                let passes = match (self.vertex(child), self.parent_edge(child)) {
                    (Some(c), Some(e)) => keep(&parent_state, &c.state, e),
                    _ => false,
                };

                if passes {
                    queue.push(child);
                } else {
                    self.remove_subtree(child);
                }
            }
        }

        before - self.num_vertices
    }

    /// Check the tree invariant holds, returning a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), GraphError> {
        let violation = |msg: String| Err(GraphError::InvariantViolation(msg));

        let root = match self.root {
            Some(r) => r,
            None if self.num_vertices == 0 => return Ok(()),
            None => return violation("graph has vertices but no root".into()),
        };

        let mut num_roots = 0;
        for v in self.vertices() {
            match v.parent_edge {
                None => {
                    num_roots += 1;
                    if v.id != root {
                        return violation(format!("{:?} has no parent but isn't the root", v.id));
                    }
                }
                Some(e) => match self.edge(e) {
                    Some(edge) if edge.child == v.id => {
                        let parent_lists_child = self
                            .vertex(edge.parent)
                            .map_or(false, |p| p.children.contains(&v.id));
                        if !parent_lists_child {
                            return violation(format!(
                                "{:?} is not listed as a child of its parent {:?}",
                                v.id, edge.parent
                            ));
                        }
                    }
                    _ => return violation(format!("{:?} has a dangling incoming edge", v.id)),
                },
            }

            if let Some(c) = v.children.iter().find(|c| self.parent(**c) != Some(v.id)) {
                return violation(format!("child {:?} of {:?} has another parent", c, v.id));
            }

            // Acyclic and connected: every vertex reaches the root
            self.path_to(v.id)?;
        }

        if num_roots != 1 {
            return violation(format!("expected exactly one root, found {}", num_roots));
        }

        let num_edges = self.edges.iter().flatten().count();
        if num_edges + 1 != self.num_vertices {
            return violation(format!(
                "{} vertices should have {} edges, found {}",
                self.num_vertices,
                self.num_vertices - 1,
                num_edges
            ));
        }

        Ok(())
    }

    pub fn root(&self) -> Option<VertexId> {
        self.root
    }

    /// The root state, if the graph is not empty.
    pub fn root_state(&self) -> Option<State> {
        self.root.and_then(|r| self.vertex(r)).map(|v| v.state)
    }

    pub fn len(&self) -> usize {
        self.num_vertices
    }

    pub fn is_empty(&self) -> bool {
        self.num_vertices == 0
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(id.0).and_then(|v| v.as_ref())
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.0).and_then(|e| e.as_ref())
    }

    /// The incoming edge of a vertex.
    pub fn parent_edge(&self, id: VertexId) -> Option<&Edge> {
        self.vertex(id)
            .and_then(|v| v.parent_edge)
            .and_then(|e| self.edge(e))
    }

    pub fn parent(&self, id: VertexId) -> Option<VertexId> {
        self.parent_edge(id).map(|e| e.parent)
    }

    pub fn children(&self, id: VertexId) -> &[VertexId] {
        self.vertex(id).map_or(&[][..], |v| v.children.as_slice())
    }

    /// Iterate over all vertices in insertion order.
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.iter().flatten()
    }

    /// Iterate over all edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().flatten()
    }

    /// Walk from `id` up to the root, inclusive at both ends.
    fn ancestors(&self, id: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        let limit = self.num_vertices;
        std::iter::successors(Some(id), move |v| self.parent(*v)).take(limit + 1)
    }

    /// The vertex and all of its descendants, parents before children.
    fn descendants(&self, id: VertexId) -> Vec<VertexId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() && out.len() <= self.num_vertices {
            out.extend_from_slice(self.children(out[i]));
            i += 1;
        }
        out
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
