//! Relationship graph built on `petgraph`
//!
//! The relationship graph is the scheduling view of a catalog: containers
//! are spliced out, declared and inferred relationships become edges, and
//! every vertex is a resource that can actually be applied. Edges may carry
//! a callback label that routes events from source to target.

mod priority;
mod traversal;

pub use priority::Priority;
pub use traversal::{Scheduler, TraversalHooks, TraversalStats};

use crate::catalog::{Catalog, ResourceId};
use crate::error::{Error, Result};
use crate::types::ResourceRef;
use log::debug;
use petgraph::Direction;
use petgraph::algo;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Callback name used by notify/subscribe relationships
pub const REFRESH: &str = "refresh";

/// Which events an edge forwards to its callback
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventFilter {
    /// Every event
    #[default]
    All,
    /// Only events with this name
    Named(String),
}

impl EventFilter {
    pub fn matches(&self, event_name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(name) => name == event_name,
        }
    }
}

/// Label of a relationship edge
///
/// An edge without a callback only orders its endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeLabel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    #[serde(default)]
    pub event: EventFilter,
}

impl EdgeLabel {
    /// Ordering-only edge
    pub fn none() -> Self {
        Self::default()
    }

    /// Edge that refreshes its target on any event
    pub fn refresh() -> Self {
        Self {
            callback: Some(REFRESH.to_string()),
            event: EventFilter::All,
        }
    }

    pub fn is_labelled(&self) -> bool {
        self.callback.is_some()
    }
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.callback, &self.event) {
            (None, _) => Ok(()),
            (Some(callback), EventFilter::All) => write!(f, "{callback}"),
            (Some(callback), EventFilter::Named(event)) => write!(f, "{callback} on {event}"),
        }
    }
}

/// Directed acyclic graph of the resources to apply
#[derive(Debug, Default)]
pub struct RelationshipGraph {
    graph: StableDiGraph<ResourceId, EdgeLabel>,
    index_map: HashMap<ResourceId, NodeIndex>,
    references: HashMap<ResourceId, ResourceRef>,
    priorities: HashMap<ResourceId, Priority>,
    synthesized: HashMap<ResourceRef, ResourceId>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the relationship graph of a catalog
    ///
    /// Adds every resource as a vertex, turns explicit dependencies and
    /// declared relationships into edges, infers autorequire edges, and
    /// finally replaces each container by its members. Fails if a declared
    /// relationship names a resource that is not in the catalog.
    pub fn build(catalog: &Catalog) -> Result<Self> {
        let mut graph = Self::new();
        let ids = catalog.ids();

        for &id in &ids {
            if let Some(reference) = catalog.reference(id) {
                graph.add_vertex(id, reference.clone());
            }
        }

        for dependency in catalog.dependencies() {
            graph.add_edge(dependency.from, dependency.to, dependency.label.clone());
        }

        for &id in &ids {
            for (from, to, label) in declared_edges(catalog, id)? {
                graph.add_edge(from, to, label);
            }
        }

        for &id in &ids {
            graph.add_autorequires(catalog, id);
        }

        graph.splice_containers(catalog, &ids);
        Ok(graph)
    }

    /// Add a vertex with a priority derived from its reference
    pub fn add_vertex(&mut self, id: ResourceId, reference: ResourceRef) {
        let priority = Priority::for_ref(&reference);
        self.add_vertex_with_priority(id, reference, priority);
    }

    /// Add a vertex; an existing vertex keeps its original priority
    pub fn add_vertex_with_priority(
        &mut self,
        id: ResourceId,
        reference: ResourceRef,
        priority: Priority,
    ) {
        if self.index_map.contains_key(&id) {
            return;
        }
        let idx = self.graph.add_node(id);
        self.index_map.insert(id, idx);
        self.references.insert(id, reference);
        self.priorities.insert(id, priority);
    }

    /// Add a vertex for a resource that exists only in this graph
    ///
    /// Synthesized vertices can be looked up by reference with
    /// [`RelationshipGraph::synthesized`].
    pub fn add_synthesized(&mut self, id: ResourceId, reference: ResourceRef, priority: Priority) {
        self.synthesized.insert(reference.clone(), id);
        self.add_vertex_with_priority(id, reference, priority);
    }

    /// Id of a synthesized vertex
    pub fn synthesized(&self, reference: &ResourceRef) -> Option<ResourceId> {
        self.synthesized.get(reference).copied()
    }

    /// Remove a vertex and every edge touching it
    pub fn remove_vertex(&mut self, id: ResourceId) {
        if let Some(idx) = self.index_map.remove(&id) {
            self.graph.remove_node(idx);
        }
        if let Some(reference) = self.references.remove(&id)
            && self.synthesized.get(&reference) == Some(&id)
        {
            self.synthesized.remove(&reference);
        }
        self.priorities.remove(&id);
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.index_map.contains_key(&id)
    }

    /// Number of vertices
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All vertices, in priority order
    pub fn vertices(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.index_map.keys().copied().collect();
        ids.sort_by(|a, b| self.priorities.get(a).cmp(&self.priorities.get(b)));
        ids
    }

    pub fn reference(&self, id: ResourceId) -> Option<&ResourceRef> {
        self.references.get(&id)
    }

    pub fn priority(&self, id: ResourceId) -> Option<&Priority> {
        self.priorities.get(&id)
    }

    /// Add an edge, merging with an existing edge between the same pair
    ///
    /// A labelled edge replaces an unlabelled one; an existing label is
    /// never downgraded. Edges touching unknown vertices are ignored. A
    /// self-edge is kept so the cycle check reports it.
    pub fn add_edge(&mut self, from: ResourceId, to: ResourceId, label: EdgeLabel) {
        let (Some(&a), Some(&b)) = (self.index_map.get(&from), self.index_map.get(&to)) else {
            return;
        };
        match self.graph.find_edge(a, b) {
            Some(edge) => {
                if label.is_labelled()
                    && let Some(existing) = self.graph.edge_weight_mut(edge)
                    && !existing.is_labelled()
                {
                    *existing = label;
                }
            }
            None => {
                self.graph.add_edge(a, b, label);
            }
        }
    }

    pub fn has_edge(&self, from: ResourceId, to: ResourceId) -> bool {
        self.edge_label(from, to).is_some()
    }

    pub fn edge_label(&self, from: ResourceId, to: ResourceId) -> Option<&EdgeLabel> {
        let (a, b) = (self.index_map.get(&from)?, self.index_map.get(&to)?);
        let edge = self.graph.find_edge(*a, *b)?;
        self.graph.edge_weight(edge)
    }

    pub fn remove_edge(&mut self, from: ResourceId, to: ResourceId) -> Option<EdgeLabel> {
        let (a, b) = (self.index_map.get(&from)?, self.index_map.get(&to)?);
        let edge = self.graph.find_edge(*a, *b)?;
        self.graph.remove_edge(edge)
    }

    /// Direct predecessors of a vertex
    pub fn dependencies(&self, id: ResourceId) -> Vec<ResourceId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct successors of a vertex
    pub fn dependents(&self, id: ResourceId) -> Vec<ResourceId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Incoming edges as `(source, label)`
    pub fn in_edges(&self, id: ResourceId) -> Vec<(ResourceId, EdgeLabel)> {
        self.edges(id, Direction::Incoming)
    }

    /// Outgoing edges as `(target, label)`
    pub fn out_edges(&self, id: ResourceId) -> Vec<(ResourceId, EdgeLabel)> {
        self.edges(id, Direction::Outgoing)
    }

    /// Every edge as `(source, target, label)`, sorted by endpoints
    pub fn all_edges(&self) -> Vec<(ResourceId, ResourceId, EdgeLabel)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (source, target) = self.graph.edge_endpoints(e)?;
                let label = self.graph.edge_weight(e)?.clone();
                Some((self.graph[source], self.graph[target], label))
            })
            .collect();
        edges.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        edges
    }

    /// Outgoing edges of `source` whose label routes `event_name`
    ///
    /// Returns `(target, callback)` pairs.
    pub fn matching_edges(&self, source: ResourceId, event_name: &str) -> Vec<(ResourceId, String)> {
        self.out_edges(source)
            .into_iter()
            .filter_map(|(target, label)| {
                let callback = label.callback?;
                label.event.matches(event_name).then_some((target, callback))
            })
            .collect()
    }

    /// Every strongly connected component that forms a cycle
    ///
    /// Components are returned in priority order of their first member;
    /// a single vertex only counts when it has an edge to itself.
    pub fn find_cycles(&self) -> Vec<Vec<ResourceId>> {
        let mut cycles: Vec<Vec<ResourceId>> = algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&idx| self.graph.contains_edge(idx, idx))
            })
            .map(|component| {
                let mut ids: Vec<ResourceId> =
                    component.into_iter().map(|idx| self.graph[idx]).collect();
                ids.sort_by(|a, b| self.priorities.get(a).cmp(&self.priorities.get(b)));
                ids
            })
            .collect();
        cycles.sort_by(|a, b| {
            self.priorities
                .get(&a[0])
                .cmp(&self.priorities.get(&b[0]))
        });
        cycles
    }

    /// Fail with every cycle found, rendered as reference chains
    pub fn check_acyclic(&self) -> Result<()> {
        let cycles = self.find_cycles();
        if cycles.is_empty() {
            return Ok(());
        }
        let cycles = cycles
            .iter()
            .map(|cycle| {
                cycle
                    .iter()
                    .map(|id| self.describe(*id))
                    .collect::<Vec<String>>()
            })
            .collect();
        Err(Error::DependencyCycle { cycles })
    }

    /// Reference of a vertex for messages
    pub fn describe(&self, id: ResourceId) -> String {
        self.references
            .get(&id)
            .map(ToString::to_string)
            .unwrap_or_else(|| id.to_string())
    }

    fn neighbors(&self, id: ResourceId, direction: Direction) -> Vec<ResourceId> {
        let Some(&idx) = self.index_map.get(&id) else {
            return Vec::new();
        };
        let mut ids: Vec<ResourceId> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n])
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn edges(&self, id: ResourceId, direction: Direction) -> Vec<(ResourceId, EdgeLabel)> {
        let Some(&idx) = self.index_map.get(&id) else {
            return Vec::new();
        };
        let mut edges: Vec<(ResourceId, EdgeLabel)> = self
            .graph
            .edges_directed(idx, direction)
            .map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                (self.graph[other], e.weight().clone())
            })
            .collect();
        edges.sort_by_key(|(other, _)| *other);
        edges
    }

    /// Add inferred edges for one resource
    ///
    /// An inferred edge is skipped when the pair is already related in
    /// either direction, so explicit relationships always win.
    fn add_autorequires(&mut self, catalog: &Catalog, id: ResourceId) {
        let Some(resource) = catalog.get(id) else {
            return;
        };
        for reference in resource.autorequire() {
            let Some(dependency) = catalog.resource_id(&reference) else {
                continue;
            };
            if dependency == id {
                continue;
            }
            if self.has_edge(id, dependency) {
                debug!(
                    "{}: skipping automatic relationship with {}",
                    self.describe(id),
                    self.describe(dependency)
                );
                continue;
            }
            if self.has_edge(dependency, id) {
                continue;
            }
            debug!(
                "{}: autorequiring {}",
                self.describe(id),
                self.describe(dependency)
            );
            self.add_edge(dependency, id, EdgeLabel::none());
        }
    }

    /// Replace every container by its non-container members
    ///
    /// Edges into a container are redirected to each member, edges out of
    /// it leave from each member, labels included. An empty container
    /// connects its predecessors straight to its successors.
    fn splice_containers(&mut self, catalog: &Catalog, ids: &[ResourceId]) {
        for &container in ids {
            if !catalog.get(container).is_some_and(|r| r.is_container()) {
                continue;
            }
            let members = catalog.leaf_members(container);
            let incoming = self.in_edges(container);
            let outgoing = self.out_edges(container);

            if members.is_empty() {
                for (source, _) in &incoming {
                    for (target, label) in &outgoing {
                        self.add_edge(*source, *target, label.clone());
                    }
                }
            } else {
                for (source, label) in &incoming {
                    for &member in &members {
                        self.add_edge(*source, member, label.clone());
                    }
                }
                for (target, label) in &outgoing {
                    for &member in &members {
                        self.add_edge(member, *target, label.clone());
                    }
                }
            }
            self.remove_vertex(container);
        }
    }
}

/// Edges resulting from the relationships a resource declares
///
/// Fails on a relationship whose target is not in the catalog.
pub(crate) fn declared_edges(
    catalog: &Catalog,
    id: ResourceId,
) -> Result<Vec<(ResourceId, ResourceId, EdgeLabel)>> {
    let Some(resource) = catalog.get(id) else {
        return Ok(Vec::new());
    };
    let mut edges = Vec::new();
    for relationship in resource.relationships() {
        let target = catalog.resource_id(&relationship.target).ok_or_else(|| {
            Error::UnknownRelationshipTarget {
                source_ref: resource.resource_ref().to_string(),
                kind: relationship.kind.as_str().to_string(),
                target: relationship.target.to_string(),
            }
        })?;
        let label = if relationship.kind.refreshes() {
            EdgeLabel::refresh()
        } else {
            EdgeLabel::none()
        };
        if relationship.kind.declarer_is_source() {
            edges.push((id, target, label));
        } else {
            edges.push((target, id, label));
        }
    }
    Ok(edges)
}
