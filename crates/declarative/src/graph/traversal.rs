//! Dependency-ordered traversal of the relationship graph

use super::{Priority, RelationshipGraph};
use crate::catalog::ResourceId;
use crate::error::Result;
use log::{debug, warn};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Callbacks driving a traversal
///
/// Every hook except [`TraversalHooks::visit`] has a permissive default.
/// Hooks that can change the graph receive it mutably; the traversal
/// treats its cached blocker counts as stale whenever
/// [`TraversalHooks::pre_process`] reports an expansion.
pub trait TraversalHooks {
    /// Polled before each vertex; returning false cancels the rest
    fn should_continue(&mut self) -> bool {
        true
    }

    /// Whether the vertex can be visited now; unsuitable vertices are deferred
    fn suitable(&mut self, _id: ResourceId) -> bool {
        true
    }

    /// Runs right before a visit; returns true if the graph was expanded
    fn pre_process(&mut self, _graph: &mut RelationshipGraph, _id: ResourceId) -> bool {
        false
    }

    /// Apply the vertex
    fn visit(&mut self, graph: &mut RelationshipGraph, id: ResourceId);

    /// The vertex stayed unsuitable while nothing else could make progress
    fn overly_deferred(&mut self, _id: ResourceId) {}

    /// The vertex was never visited because the traversal was cancelled
    fn canceled(&mut self, _id: ResourceId) {}

    /// The vertex never became ready; `waiting_on` lists its unfinished dependencies
    fn blocked(&mut self, _graph: &RelationshipGraph, _id: ResourceId, _waiting_on: &[ResourceId]) {}
}

/// Counts of what happened during a traversal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub visited: usize,
    pub overly_deferred: usize,
    pub canceled: usize,
    pub blocked: usize,
}

/// Ready queue and blocker bookkeeping for one traversal
#[derive(Debug, Default)]
pub struct Scheduler {
    blockers: HashMap<ResourceId, usize>,
    ready: BinaryHeap<Reverse<(Priority, ResourceId)>>,
    queued: HashSet<ResourceId>,
    done: HashSet<ResourceId>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the dependencies of every vertex and enqueue those with none
    pub fn enqueue_roots(&mut self, graph: &RelationshipGraph) {
        for id in graph.vertices() {
            let count = graph.dependencies(id).len();
            self.blockers.insert(id, count);
            if count == 0 {
                self.enqueue(graph, id);
            }
        }
    }

    /// Make a vertex ready
    pub fn enqueue(&mut self, graph: &RelationshipGraph, id: ResourceId) {
        if self.done.contains(&id) || !self.queued.insert(id) {
            return;
        }
        let priority = match graph.priority(id) {
            Some(priority) => priority.clone(),
            None => match graph.reference(id) {
                Some(reference) => Priority::for_ref(reference),
                None => return,
            },
        };
        self.ready.push(Reverse((priority, id)));
    }

    /// Pop the ready vertex with the smallest priority
    pub fn next_resource(&mut self) -> Option<ResourceId> {
        while let Some(Reverse((_, id))) = self.ready.pop() {
            self.queued.remove(&id);
            if !self.done.contains(&id) {
                return Some(id);
            }
        }
        None
    }

    /// Release one blocker of a vertex; true when it has none left
    ///
    /// The first time a vertex is touched after
    /// [`Scheduler::invalidate_blockers`] its count is recomputed from the
    /// dependencies that are not finished yet.
    pub fn unblock(&mut self, graph: &RelationshipGraph, id: ResourceId) -> bool {
        let done = &self.done;
        let count = self
            .blockers
            .entry(id)
            .or_insert_with(|| {
                graph
                    .dependencies(id)
                    .into_iter()
                    .filter(|dependency| !done.contains(dependency))
                    .count()
            });
        if *count > 0 {
            *count -= 1;
        } else {
            warn!(
                "{}: appears to have a negative number of dependencies",
                graph.describe(id)
            );
        }
        *count == 0
    }

    /// Mark a vertex done and release its dependents
    ///
    /// Finishing a vertex twice does nothing.
    pub fn finish(&mut self, graph: &RelationshipGraph, id: ResourceId) {
        if self.done.contains(&id) {
            return;
        }
        for dependent in graph.dependents(id) {
            if self.unblock(graph, dependent) {
                self.enqueue(graph, dependent);
            }
        }
        self.done.insert(id);
    }

    /// Drop every cached blocker count after the graph was expanded
    pub fn invalidate_blockers(&mut self) {
        self.blockers.clear();
    }

    pub fn is_done(&self, id: ResourceId) -> bool {
        self.done.contains(&id)
    }
}

impl RelationshipGraph {
    /// Visit every vertex after all of its dependencies
    ///
    /// Ready vertices are taken in priority order. A vertex that is not
    /// suitable yet is set aside and retried once something else was
    /// visited; if the queue drains without any progress the deferred
    /// vertices are given up on. When the hooks ask to stop, the vertices
    /// that were not reached are reported as canceled. Vertices that are
    /// still waiting on a dependency once nothing else is left, which only
    /// happens when an expansion closed a cycle, are reported as blocked.
    ///
    /// Fails without visiting anything if the graph contains a cycle.
    pub fn traverse<H: TraversalHooks + ?Sized>(&mut self, hooks: &mut H) -> Result<TraversalStats> {
        self.check_acyclic()?;

        let mut scheduler = Scheduler::new();
        let mut stats = TraversalStats::default();
        let mut deferred: Vec<ResourceId> = Vec::new();
        let mut made_progress = false;
        let mut stopped = false;

        scheduler.enqueue_roots(self);

        loop {
            if !hooks.should_continue() {
                stopped = true;
                break;
            }

            let Some(id) = scheduler.next_resource() else {
                if deferred.is_empty() {
                    break;
                }
                if made_progress {
                    for id in deferred.drain(..) {
                        scheduler.enqueue(self, id);
                    }
                } else {
                    for id in deferred.drain(..) {
                        hooks.overly_deferred(id);
                        stats.overly_deferred += 1;
                        scheduler.finish(self, id);
                    }
                }
                made_progress = false;
                continue;
            };

            if !hooks.suitable(id) {
                debug!("{}: deferring until it becomes suitable", self.describe(id));
                deferred.push(id);
                continue;
            }

            made_progress = true;
            if hooks.pre_process(self, id) {
                scheduler.invalidate_blockers();
            }
            hooks.visit(self, id);
            stats.visited += 1;
            scheduler.finish(self, id);
        }

        if stopped {
            for id in deferred.drain(..) {
                scheduler.enqueue(self, id);
            }
            while let Some(id) = scheduler.next_resource() {
                hooks.canceled(id);
                stats.canceled += 1;
                scheduler.finish(self, id);
            }
        }

        for id in self.vertices() {
            if scheduler.is_done(id) {
                continue;
            }
            let waiting_on: Vec<ResourceId> = self
                .dependencies(id)
                .into_iter()
                .filter(|dependency| !scheduler.is_done(*dependency))
                .collect();
            warn!("{}: never became ready to be applied", self.describe(id));
            hooks.blocked(self, id, &waiting_on);
            stats.blocked += 1;
        }

        Ok(stats)
    }
}
