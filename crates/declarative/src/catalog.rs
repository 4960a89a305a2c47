//! Catalog - the desired-state resources of one node and how they relate

use crate::error::{Error, Result};
use crate::graph::{EdgeLabel, RelationshipGraph};
use crate::resource::SharedResource;
use crate::tags::Tags;
use crate::types::ResourceRef;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Stable index of a resource in a catalog
///
/// Ids are never reused, even after the resource is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub usize);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct Entry {
    resource: SharedResource,
    reference: ResourceRef,
    tags: Tags,
    aliases: Vec<ResourceRef>,
    live: bool,
}

/// A declared ordering edge between two catalog resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub from: ResourceId,
    pub to: ResourceId,
    pub label: EdgeLabel,
}

/// The full set of resources for one managed node
///
/// The catalog owns every resource, its tags and aliases, explicit
/// ordering edges, and containment. The relationship graph used for
/// scheduling is derived from it on demand and memoised until the catalog
/// changes.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: Vec<Entry>,
    table: HashMap<ResourceRef, ResourceId>,
    dependencies: Vec<Dependency>,
    containment: Vec<(ResourceId, ResourceId)>,
    relationship_graph: Option<RelationshipGraph>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource
    ///
    /// Fails if a different resource already uses the same reference. Adding
    /// the same resource object again returns its existing id. When the
    /// resource's name differs from its title and its type is isomorphic,
    /// the name is registered as an alias.
    pub fn add_resource(&mut self, resource: SharedResource) -> Result<ResourceId> {
        let reference = resource.resource_ref();
        if let Some(&existing) = self.table.get(&reference) {
            if Arc::ptr_eq(&self.entries[existing.0].resource, &resource) {
                return Ok(existing);
            }
            return Err(Error::DuplicateResource {
                reference: reference.to_string(),
            });
        }

        let alias = resource
            .name()
            .filter(|name| *name != reference.title && resource.isomorphic())
            .map(|name| reference.with_title(name));
        if let Some(alias) = &alias
            && self.table.contains_key(alias)
        {
            return Err(Error::AliasConflict {
                reference: reference.to_string(),
                alias: alias.to_string(),
            });
        }

        let id = self.push_entry(resource);
        self.table.insert(reference, id);
        if let Some(alias) = alias {
            self.table.insert(alias.clone(), id);
            self.entries[id.0].aliases.push(alias);
        }
        self.invalidate();
        Ok(id)
    }

    /// Register an additional reference for a resource
    pub fn alias(&mut self, id: ResourceId, name: &str) -> Result<()> {
        let entry = self.entry(id)?;
        let alias = entry.reference.with_title(name);
        if alias == entry.reference {
            return Ok(());
        }
        match self.table.get(&alias) {
            Some(&existing) if existing == id => Ok(()),
            Some(_) => Err(Error::AliasConflict {
                reference: entry.reference.to_string(),
                alias: alias.to_string(),
            }),
            None => {
                self.table.insert(alias.clone(), id);
                self.entries[id.0].aliases.push(alias);
                Ok(())
            }
        }
    }

    /// Remove a resource, its references, and every edge touching it
    pub fn remove_resource(&mut self, id: ResourceId) -> Result<()> {
        let entry = self
            .entries
            .get_mut(id.0)
            .filter(|e| e.live)
            .ok_or_else(|| Error::UnknownResource(id.to_string()))?;
        entry.live = false;
        let mut references = vec![entry.reference.clone()];
        references.append(&mut entry.aliases);
        for reference in references {
            if self.table.get(&reference) == Some(&id) {
                self.table.remove(&reference);
            }
        }
        self.dependencies.retain(|d| d.from != id && d.to != id);
        self.containment.retain(|(c, r)| *c != id && *r != id);
        self.invalidate();
        Ok(())
    }

    /// Declare that `from` must be applied before `to`
    pub fn add_dependency(&mut self, from: ResourceId, to: ResourceId, label: EdgeLabel) {
        let dependency = Dependency { from, to, label };
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
            self.invalidate();
        }
    }

    /// Place `child` inside `container`
    pub fn contain(&mut self, container: ResourceId, child: ResourceId) {
        if !self.containment.contains(&(container, child)) {
            self.containment.push((container, child));
            self.invalidate();
        }
    }

    /// Add tags to a resource
    pub fn tag(&mut self, id: ResourceId, tags: &Tags) {
        if let Some(entry) = self.entries.get_mut(id.0) {
            entry.tags.merge(tags);
        }
    }

    /// Look up a resource by type and title (or alias)
    ///
    /// Falls through to the relationship graph, which may hold synthesized
    /// resources that are not part of the catalog proper.
    pub fn resource(&self, type_name: &str, title: &str) -> Option<SharedResource> {
        let reference = ResourceRef::new(type_name, title);
        self.resource_id(&reference)
            .or_else(|| {
                self.relationship_graph
                    .as_ref()
                    .and_then(|graph| graph.synthesized(&reference))
            })
            .and_then(|id| self.get(id).cloned())
    }

    /// Id of the resource registered under a reference or alias
    pub fn resource_id(&self, reference: &ResourceRef) -> Option<ResourceId> {
        self.table.get(reference).copied()
    }

    /// The resource stored under an id, including synthesized ones
    pub fn get(&self, id: ResourceId) -> Option<&SharedResource> {
        self.entries
            .get(id.0)
            .filter(|e| e.live)
            .map(|e| &e.resource)
    }

    /// Reference of the resource stored under an id
    pub fn reference(&self, id: ResourceId) -> Option<&ResourceRef> {
        self.entries
            .get(id.0)
            .filter(|e| e.live)
            .map(|e| &e.reference)
    }

    pub fn tags(&self, id: ResourceId) -> Option<&Tags> {
        self.entries.get(id.0).filter(|e| e.live).map(|e| &e.tags)
    }

    /// Ids of every resource registered in the catalog, in insertion order
    pub fn ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.table.values().copied().collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Every registered resource, in insertion order
    pub fn resources(&self) -> Vec<SharedResource> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.get(id).cloned())
            .collect()
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Direct children of a container
    pub fn children(&self, container: ResourceId) -> Vec<ResourceId> {
        self.containment
            .iter()
            .filter(|(c, _)| *c == container)
            .map(|(_, child)| *child)
            .collect()
    }

    /// The container directly holding a resource
    pub fn container_of(&self, id: ResourceId) -> Option<ResourceId> {
        self.containment
            .iter()
            .find(|(_, child)| *child == id)
            .map(|(container, _)| *container)
    }

    /// Every non-container resource inside a container, at any depth
    pub fn leaf_members(&self, container: ResourceId) -> Vec<ResourceId> {
        let mut members = Vec::new();
        let mut stack = self.children(container);
        let mut seen = std::collections::HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            match self.get(id) {
                Some(resource) if resource.is_container() => stack.extend(self.children(id)),
                Some(_) => members.push(id),
                None => {}
            }
        }
        members.sort();
        members
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The derived relationship graph, built on first use
    pub fn relationship_graph(&mut self) -> Result<&mut RelationshipGraph> {
        if self.relationship_graph.is_none() {
            self.relationship_graph = Some(RelationshipGraph::build(self)?);
        }
        self.relationship_graph
            .as_mut()
            .ok_or_else(|| Error::UnknownResource("relationship graph".to_string()))
    }

    /// Move the relationship graph out of the catalog for the length of a run
    ///
    /// The run mutates catalog and graph side by side; the graph is handed
    /// back with [`Catalog::restore_relationship_graph`] when it is done.
    pub fn take_relationship_graph(&mut self) -> Result<RelationshipGraph> {
        match self.relationship_graph.take() {
            Some(graph) => Ok(graph),
            None => RelationshipGraph::build(self),
        }
    }

    pub fn restore_relationship_graph(&mut self, graph: RelationshipGraph) {
        self.relationship_graph = Some(graph);
    }

    /// Add a resource produced by dynamic generation
    ///
    /// Unlike [`Catalog::add_resource`] this keeps the relationship graph:
    /// the generator wires the new vertex into it itself.
    pub(crate) fn add_generated(&mut self, resource: SharedResource) -> Result<ResourceId> {
        let graph = self.relationship_graph.take();
        let result = self.add_resource(resource);
        self.relationship_graph = graph;
        result
    }

    /// Store a synthesized resource that is not addressable by reference
    pub(crate) fn add_detached(&mut self, resource: SharedResource) -> ResourceId {
        self.push_entry(resource)
    }

    fn push_entry(&mut self, resource: SharedResource) -> ResourceId {
        let reference = resource.resource_ref();
        let mut tags: Tags = resource.tags().into_iter().collect();
        tags.insert(&reference.type_name);
        tags.insert(&reference.title);
        let id = ResourceId(self.entries.len());
        self.entries.push(Entry {
            resource,
            reference,
            tags,
            aliases: Vec::new(),
            live: true,
        });
        id
    }

    fn entry(&self, id: ResourceId) -> Result<&Entry> {
        self.entries
            .get(id.0)
            .filter(|e| e.live)
            .ok_or_else(|| Error::UnknownResource(id.to_string()))
    }

    fn invalidate(&mut self) {
        if self.relationship_graph.take().is_some() {
            debug!("catalog changed; relationship graph will be rebuilt");
        }
    }
}
