//! Dynamic resource generation
//!
//! Resources may produce further resources either before the run starts
//! (`generate`) or right before they are applied (`eval_generate`). The
//! generator adds the results to the catalog and the relationship graph in
//! lockstep and wires them so ordering and notifications keep working.

use crate::catalog::{Catalog, ResourceId};
use crate::error::{Error, Result};
use crate::graph::{EdgeLabel, Priority, RelationshipGraph, declared_edges};
use crate::resource::{Resource, SharedResource, Whit};
use crate::types::ResourceRef;
use log::{debug, error};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Adds dynamically generated resources to a running catalog
#[derive(Debug, Default)]
pub struct ResourceGenerator {
    generated: HashSet<ResourceId>,
    eval_generated: HashSet<ResourceId>,
    failed: bool,
}

impl ResourceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any `generate` or `eval_generate` call failed
    pub fn resources_failed_to_generate(&self) -> bool {
        self.failed
    }

    /// Add the resources produced by `generate`, recursively
    ///
    /// Each child is ordered after its parent (before it, for depth-first
    /// parents) unless the two are already related the other way round.
    /// Children inherit the parent's tags and scheduling rank. A resource
    /// is only asked to generate once per run.
    pub fn generate_additional_resources(
        &mut self,
        catalog: &mut Catalog,
        graph: &mut RelationshipGraph,
        id: ResourceId,
    ) {
        if !self.generated.insert(id) {
            return;
        }
        let Some(resource) = catalog.get(id).cloned() else {
            return;
        };
        let children = match resource.generate() {
            Ok(children) => children,
            Err(e) => {
                self.failed = true;
                error!(
                    "{}: Failed to generate additional resources using 'generate': {e:#}",
                    resource.resource_ref()
                );
                return;
            }
        };

        for child in children {
            let Some(child_id) = self.add_child(catalog, graph, id, child) else {
                continue;
            };
            let (source, target) = if resource.depth_first() {
                (child_id, id)
            } else {
                (id, child_id)
            };
            add_conditional_edge(graph, source, target, EdgeLabel::none());
            self.generate_additional_resources(catalog, graph, child_id);
        }
    }

    /// Expand a resource right before it is applied
    ///
    /// Returns true if new resources were added. The generated children
    /// are contained by the parent: a `Whit[completed_<title>]` sentinel is
    /// inserted after them and takes over the parent's outgoing edges, so
    /// nothing downstream runs before all children are done and refresh
    /// events from the parent still reach its subscribers. When another
    /// parent with the same title already owns that sentinel name, the
    /// sentinel is named after the full reference instead
    /// (`Whit[completed_Type[title]]`).
    pub fn eval_generate(
        &mut self,
        catalog: &mut Catalog,
        graph: &mut RelationshipGraph,
        id: ResourceId,
    ) -> Result<bool> {
        let Some(resource) = catalog.get(id).cloned() else {
            return Ok(false);
        };
        if !resource.supports_eval_generate() {
            return Ok(false);
        }
        if resource.depth_first() {
            return Err(Error::NestedEvalGenerate(
                resource.resource_ref().to_string(),
            ));
        }
        if !self.eval_generated.insert(id) {
            return Ok(false);
        }

        let children = match resource.eval_generate() {
            Ok(children) => children,
            Err(e) => {
                self.failed = true;
                error!(
                    "{}: Failed to generate additional resources using 'eval_generate': {e:#}",
                    resource.resource_ref()
                );
                return Ok(false);
            }
        };
        if children.is_empty() {
            return Ok(false);
        }

        let mut made: HashMap<String, ResourceId> = HashMap::new();
        let mut order = Vec::new();
        for child in children {
            let name = child.name().unwrap_or_else(|| child.resource_ref().title);
            if let Some(child_id) = self.add_child(catalog, graph, id, child)
                && child_id != id
            {
                made.insert(name, child_id);
                order.push(child_id);
            }
        }
        if order.is_empty() {
            return Ok(false);
        }

        self.contain_generated_resources_in(catalog, graph, id, &order);
        connect_resources_to_ancestors(catalog, graph, id, &made, &order);
        Ok(true)
    }

    /// Add one generated child, reusing a catalog resource with the same reference
    fn add_child(
        &self,
        catalog: &mut Catalog,
        graph: &mut RelationshipGraph,
        parent: ResourceId,
        child: SharedResource,
    ) -> Option<ResourceId> {
        let reference = child.resource_ref();
        let parent_tags = catalog.tags(parent).cloned().unwrap_or_default();

        if let Some(existing) = catalog.resource_id(&reference) {
            debug!("{reference}: already in the catalog, reusing it");
            catalog.tag(existing, &parent_tags);
            return Some(existing);
        }

        let child_id = match catalog.add_generated(child) {
            Ok(child_id) => child_id,
            Err(e) => {
                error!("{reference}: could not add generated resource: {e}");
                return None;
            }
        };
        catalog.tag(child_id, &parent_tags);
        if let Some(container) = catalog.container_of(parent) {
            catalog.contain(container, child_id);
        }

        let priority = match graph.priority(parent) {
            Some(parent_priority) => Priority::inherited(parent_priority, &reference),
            None => Priority::for_ref(&reference),
        };
        graph.add_vertex_with_priority(child_id, reference.clone(), priority);

        match declared_edges(catalog, child_id) {
            Ok(edges) => {
                for (from, to, label) in edges {
                    graph.add_edge(from, to, label);
                }
            }
            Err(e) => debug!("{reference}: ignoring relationships of generated resource: {e}"),
        }
        Some(child_id)
    }

    /// Put the completion sentinel between the children and everything after the parent
    fn contain_generated_resources_in(
        &self,
        catalog: &mut Catalog,
        graph: &mut RelationshipGraph,
        parent: ResourceId,
        children: &[ResourceId],
    ) {
        let Some(parent_ref) = catalog.reference(parent).cloned() else {
            return;
        };
        let mut whit = Whit::completed(&parent_ref);
        let taken = |reference: &ResourceRef| {
            graph.synthesized(reference).is_some() || catalog.resource_id(reference).is_some()
        };
        if taken(&whit.resource_ref()) {
            whit = Whit::completed_qualified(&parent_ref);
        }
        let whit_ref = whit.resource_ref();
        let sentinel = catalog.add_detached(Arc::new(whit));
        let priority = match graph.priority(parent) {
            Some(parent_priority) => Priority::inherited(parent_priority, &whit_ref),
            None => Priority::for_ref(&whit_ref),
        };
        graph.add_synthesized(sentinel, whit_ref, priority);
        if let Some(tags) = catalog.tags(parent).cloned() {
            catalog.tag(sentinel, &tags);
        }

        for (target, label) in graph.out_edges(parent) {
            if target == sentinel || children.contains(&target) {
                continue;
            }
            graph.add_edge(sentinel, target, label);
            graph.remove_edge(parent, target);
        }

        for &child in children {
            add_conditional_edge(graph, child, sentinel, EdgeLabel::none());
        }
        add_conditional_edge(graph, parent, sentinel, EdgeLabel::refresh());
    }
}

/// Order each child after its nearest generated ancestor, or after the parent
fn connect_resources_to_ancestors(
    catalog: &Catalog,
    graph: &mut RelationshipGraph,
    parent: ResourceId,
    made: &HashMap<String, ResourceId>,
    children: &[ResourceId],
) {
    for &child in children {
        let Some(resource) = catalog.get(child) else {
            continue;
        };
        let ancestor = resource
            .ancestors()
            .iter()
            .filter_map(|name| made.get(name).copied())
            .find(|&candidate| candidate != child)
            .unwrap_or(parent);
        add_conditional_edge(graph, ancestor, child, EdgeLabel::none());
    }
}

/// Add an edge unless the opposite edge already exists
///
/// A resource is never ordered against itself here.
fn add_conditional_edge(
    graph: &mut RelationshipGraph,
    source: ResourceId,
    target: ResourceId,
    label: EdgeLabel,
) {
    if source == target || graph.has_edge(target, source) {
        return;
    }
    graph.add_edge(source, target, label);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::RelationshipKind;
    use crate::testing::TestResource;

    fn setup(catalog: &mut Catalog) -> RelationshipGraph {
        catalog.take_relationship_graph().unwrap()
    }

    #[test]
    fn test_generated_children_follow_parent() {
        let mut catalog = Catalog::new();
        let parent = catalog
            .add_resource(
                TestResource::new("tidy", "/tmp")
                    .tagged("cleanup")
                    .generates(vec![TestResource::shared("file", "/tmp/a")])
                    .into_shared(),
            )
            .unwrap();
        let mut graph = setup(&mut catalog);
        let mut generator = ResourceGenerator::new();

        generator.generate_additional_resources(&mut catalog, &mut graph, parent);

        let child = catalog
            .resource_id(&ResourceRef::new("file", "/tmp/a"))
            .unwrap();
        assert!(graph.has_edge(parent, child));
        assert!(catalog.tags(child).unwrap().contains("cleanup"));
        assert_eq!(
            graph.priority(child).unwrap().rank(),
            graph.priority(parent).unwrap().rank()
        );
        assert!(!generator.resources_failed_to_generate());
    }

    #[test]
    fn test_depth_first_children_come_first() {
        let mut catalog = Catalog::new();
        let parent = catalog
            .add_resource(
                TestResource::new("tidy", "/tmp")
                    .depth_first()
                    .generates(vec![TestResource::shared("file", "/tmp/a")])
                    .into_shared(),
            )
            .unwrap();
        let mut graph = setup(&mut catalog);
        ResourceGenerator::new().generate_additional_resources(&mut catalog, &mut graph, parent);

        let child = catalog
            .resource_id(&ResourceRef::new("file", "/tmp/a"))
            .unwrap();
        assert!(graph.has_edge(child, parent));
    }

    #[test]
    fn test_existing_resource_is_reused() {
        let mut catalog = Catalog::new();
        let existing = catalog
            .add_resource(TestResource::shared("file", "/tmp/a"))
            .unwrap();
        let parent = catalog
            .add_resource(
                TestResource::new("tidy", "/tmp")
                    .generates(vec![TestResource::shared("file", "/tmp/a")])
                    .into_shared(),
            )
            .unwrap();
        let mut graph = setup(&mut catalog);
        ResourceGenerator::new().generate_additional_resources(&mut catalog, &mut graph, parent);

        assert_eq!(catalog.len(), 2);
        assert!(graph.has_edge(parent, existing));
    }

    #[test]
    fn test_no_edge_against_existing_reverse_relationship() {
        let mut catalog = Catalog::new();
        catalog
            .add_resource(
                TestResource::new("file", "/tmp/a")
                    .relate(RelationshipKind::Before, ResourceRef::new("tidy", "/tmp"))
                    .into_shared(),
            )
            .unwrap();
        let parent = catalog
            .add_resource(
                TestResource::new("tidy", "/tmp")
                    .generates(vec![TestResource::shared("file", "/tmp/a")])
                    .into_shared(),
            )
            .unwrap();
        let mut graph = setup(&mut catalog);
        ResourceGenerator::new().generate_additional_resources(&mut catalog, &mut graph, parent);

        assert!(graph.find_cycles().is_empty());
    }

    #[test]
    fn test_generate_failure_is_recorded() {
        let mut catalog = Catalog::new();
        let parent = catalog
            .add_resource(
                TestResource::new("tidy", "/tmp")
                    .generate_error("boom")
                    .into_shared(),
            )
            .unwrap();
        let mut graph = setup(&mut catalog);
        let mut generator = ResourceGenerator::new();
        generator.generate_additional_resources(&mut catalog, &mut graph, parent);
        assert!(generator.resources_failed_to_generate());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_eval_generate_inserts_completion_sentinel() {
        let mut catalog = Catalog::new();
        let parent = catalog
            .add_resource(
                TestResource::new("file", "/srv")
                    .tagged("web")
                    .eval_generates(vec![
                        TestResource::new("file", "/srv/a")
                            .with_ancestors(&["/srv"])
                            .into_shared(),
                        TestResource::new("file", "/srv/a/b")
                            .with_ancestors(&["/srv/a", "/srv"])
                            .into_shared(),
                    ])
                    .into_shared(),
            )
            .unwrap();
        let after = catalog
            .add_resource(
                TestResource::new("service", "web")
                    .relate(RelationshipKind::Subscribe, ResourceRef::new("file", "/srv"))
                    .into_shared(),
            )
            .unwrap();
        let mut graph = setup(&mut catalog);
        let mut generator = ResourceGenerator::new();

        assert!(generator.eval_generate(&mut catalog, &mut graph, parent).unwrap());

        let a = catalog.resource_id(&ResourceRef::new("file", "/srv/a")).unwrap();
        let b = catalog.resource_id(&ResourceRef::new("file", "/srv/a/b")).unwrap();
        let sentinel = graph
            .synthesized(&ResourceRef::new("whit", "completed_/srv"))
            .unwrap();

        assert!(!graph.has_edge(parent, after));
        assert_eq!(graph.edge_label(sentinel, after), Some(&EdgeLabel::refresh()));
        assert_eq!(graph.edge_label(parent, sentinel), Some(&EdgeLabel::refresh()));
        assert!(graph.has_edge(a, sentinel));
        assert!(graph.has_edge(b, sentinel));
        assert!(graph.has_edge(parent, a));
        assert!(graph.has_edge(a, b));
        assert!(!graph.has_edge(parent, b));
        assert!(catalog.tags(sentinel).unwrap().contains("web"));
        assert!(catalog.resource("whit", "completed_/srv").is_none());
        assert!(graph.find_cycles().is_empty());

        // a second call is a no-op
        assert!(!generator.eval_generate(&mut catalog, &mut graph, parent).unwrap());
    }

    #[test]
    fn test_parents_sharing_a_title_get_their_own_sentinels() {
        let mut catalog = Catalog::new();
        let file = catalog
            .add_resource(
                TestResource::new("file", "srv")
                    .eval_generates(vec![TestResource::shared("notify", "x")])
                    .into_shared(),
            )
            .unwrap();
        let tidy = catalog
            .add_resource(
                TestResource::new("tidy", "srv")
                    .eval_generates(vec![TestResource::shared("notify", "y")])
                    .into_shared(),
            )
            .unwrap();
        let mut graph = setup(&mut catalog);
        let mut generator = ResourceGenerator::new();

        assert!(generator.eval_generate(&mut catalog, &mut graph, file).unwrap());
        assert!(generator.eval_generate(&mut catalog, &mut graph, tidy).unwrap());

        let first = graph
            .synthesized(&ResourceRef::new("whit", "completed_srv"))
            .unwrap();
        let second = graph
            .synthesized(&ResourceRef::new("whit", "completed_Tidy[srv]"))
            .unwrap();
        assert_ne!(first, second);
        assert!(graph.has_edge(file, first));
        assert!(graph.has_edge(tidy, second));
        assert!(!graph.has_edge(tidy, first));
    }

    #[test]
    fn test_eval_generate_on_depth_first_resource_fails() {
        let mut catalog = Catalog::new();
        let parent = catalog
            .add_resource(
                TestResource::new("file", "/srv")
                    .depth_first()
                    .eval_generates(vec![TestResource::shared("file", "/srv/a")])
                    .into_shared(),
            )
            .unwrap();
        let mut graph = setup(&mut catalog);
        let err = ResourceGenerator::new()
            .eval_generate(&mut catalog, &mut graph, parent)
            .unwrap_err();
        assert!(matches!(err, Error::NestedEvalGenerate(_)));
    }

    #[test]
    fn test_eval_generate_with_nothing_to_add() {
        let mut catalog = Catalog::new();
        let parent = catalog
            .add_resource(
                TestResource::new("file", "/srv")
                    .eval_generates(Vec::new())
                    .into_shared(),
            )
            .unwrap();
        let mut graph = setup(&mut catalog);
        assert!(
            !ResourceGenerator::new()
                .eval_generate(&mut catalog, &mut graph, parent)
                .unwrap()
        );
        assert_eq!(graph.len(), 1);
    }
}
