//! Event routing and refresh callbacks
//!
//! Events produced while applying a resource travel along the labelled
//! edges of the relationship graph. Each target collects them per callback
//! and runs the callback once, when it is applied itself.

use crate::catalog::{Catalog, ResourceId};
use crate::graph::{REFRESH, RelationshipGraph};
use crate::status::ResourceStatus;
use crate::types::{Event, EventStatus, NOOP_RESTART, RESTARTED};
use log::{debug, error, info};
use std::collections::HashMap;

/// Queues events per target and callback, and records every event of a run
#[derive(Debug, Default)]
pub struct EventManager {
    events: Vec<Event>,
    queues: HashMap<ResourceId, Vec<(String, Vec<Event>)>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event queued during the run, in order
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Record the events of a resource and route them to interested targets
    ///
    /// An event that invalidates refreshes first drops the refresh already
    /// queued for its own resource. Self-refreshing resources that are not
    /// being removed queue a refresh of themselves.
    pub fn queue_events(
        &mut self,
        catalog: &Catalog,
        graph: &RelationshipGraph,
        source: ResourceId,
        events: &[Event],
    ) {
        let Some(resource) = catalog.get(source).cloned() else {
            return;
        };
        let source_ref = resource.resource_ref();
        self.events.extend(events.iter().cloned());

        let mut by_name: Vec<(&str, Vec<Event>)> = Vec::new();
        for event in events {
            match by_name.iter_mut().find(|(name, _)| *name == event.name) {
                Some((_, group)) => group.push(event.clone()),
                None => by_name.push((event.name.as_str(), vec![event.clone()])),
            }
        }

        for (name, group) in by_name {
            if group.iter().any(|e| e.invalidate_refreshes) {
                self.dequeue_events_for_resource(graph, source, source, REFRESH);
            }

            if resource.self_refresh() && !resource.deleting() {
                self.queue_events_for_resource(graph, source, source, REFRESH, &group);
            }

            for (target, callback) in graph.matching_edges(source, name) {
                let responds = catalog
                    .get(target)
                    .is_some_and(|t| t.responds_to(&callback));
                if !responds {
                    continue;
                }
                self.queue_events_for_resource(graph, source, target, &callback, &group);
            }
        }
        debug!("{source_ref}: queued {} event(s)", events.len());
    }

    /// Add events to the queue of one target callback
    pub fn queue_events_for_resource(
        &mut self,
        graph: &RelationshipGraph,
        source: ResourceId,
        target: ResourceId,
        callback: &str,
        events: &[Event],
    ) {
        let queue = self.queues.entry(target).or_default();
        match queue.iter_mut().find(|(name, _)| name == callback) {
            Some((_, queued)) => queued.extend(events.iter().cloned()),
            None => {
                info!(
                    "{}: Scheduling {callback} of {}",
                    graph.describe(source),
                    graph.describe(target)
                );
                queue.push((callback.to_string(), events.to_vec()));
            }
        }
    }

    /// Drop the events queued for one callback of a target
    ///
    /// `source` is the resource whose event asked for the drop. Returns
    /// true if a callback was unscheduled.
    pub fn dequeue_events_for_resource(
        &mut self,
        graph: &RelationshipGraph,
        source: ResourceId,
        target: ResourceId,
        callback: &str,
    ) -> bool {
        let Some(queue) = self.queues.get_mut(&target) else {
            return false;
        };
        let Some(position) = queue.iter().position(|(name, _)| name == callback) else {
            return false;
        };
        info!("{}", unscheduling_message(graph, source, target, callback));
        queue.remove(position);
        true
    }

    /// Drop everything queued for a target
    pub fn dequeue_all_events_for_resource(&mut self, target: ResourceId) {
        self.queues.remove(&target);
    }

    /// Callbacks currently queued for a target, with their event counts
    pub fn queued_callbacks(&self, target: ResourceId) -> Vec<(String, usize)> {
        self.queues
            .get(&target)
            .map(|queue| {
                queue
                    .iter()
                    .map(|(callback, events)| (callback.clone(), events.len()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run the callbacks queued for a resource that was just applied
    ///
    /// Batches made only of noop events, and any batch in noop mode, are
    /// reported instead of run. A resource that ran at least one callback
    /// emits a `restarted` event.
    pub fn process_events(
        &mut self,
        catalog: &Catalog,
        graph: &RelationshipGraph,
        id: ResourceId,
        status: &mut ResourceStatus,
        noop: bool,
    ) {
        let Some(resource) = catalog.get(id).cloned() else {
            return;
        };
        let reference = resource.resource_ref();
        let queued = self.queues.remove(&id).unwrap_or_default();
        let mut restarted = false;

        for (callback, events) in queued {
            let count = events.len();
            let plural = if count == 1 { "" } else { "s" };

            if noop || events.iter().all(Event::is_noop) {
                info!("{reference}: Would have triggered '{callback}' from {count} event{plural}");
                let event = Event::new(reference.clone(), NOOP_RESTART, EventStatus::Noop);
                self.queue_events(catalog, graph, id, &[event]);
                continue;
            }

            match resource.callback(&callback, &events) {
                Ok(()) => {
                    if reference.type_name != crate::resource::Whit::TYPE {
                        info!("{reference}: Triggered '{callback}' from {count} event{plural}");
                    }
                    restarted = true;
                }
                Err(e) => {
                    let message = format!("Failed to call {callback}: {e:#}");
                    error!("{reference}: {message}");
                    status.failed_to_restart = true;
                    status.failure_reason = Some(message);
                }
            }
        }

        if restarted {
            status.restarted = true;
            let event = Event::new(reference, RESTARTED, EventStatus::Success);
            self.queue_events(catalog, graph, id, &[event]);
        }
    }
}

fn unscheduling_message(
    graph: &RelationshipGraph,
    source: ResourceId,
    target: ResourceId,
    callback: &str,
) -> String {
    format!(
        "{}: Unscheduling {callback} on {}",
        graph.describe(source),
        graph.describe(target)
    )
}
