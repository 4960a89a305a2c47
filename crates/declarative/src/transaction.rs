//! Transaction - applies a catalog in dependency order
//!
//! A transaction owns everything that lives for the length of one run: the
//! report, the event queues, the generator state. It drives the traversal
//! of the relationship graph and decides, per resource, whether to skip it,
//! apply it through the harness, and run its queued refresh callbacks.

use crate::catalog::{Catalog, ResourceId};
use crate::context::{NoCoordinator, NoProgress, ProgressCallback, RunCoordinator};
use crate::error::{Error, Result};
use crate::event_manager::EventManager;
use crate::generator::ResourceGenerator;
use crate::graph::{RelationshipGraph, TraversalHooks};
use crate::harness::{EvaluationContext, ResourceHarness};
use crate::persistence::{MemoryBackend, Persistence, StoreBackend};
use crate::resource::{Resource, Whit};
use crate::status::Report;
use crate::types::ResourceRef;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::time::Instant;

const DEPENDENCY_CYCLE: &str = "dependency_cycle";
const RESOURCE_FAILED: &str = "resource_failed";
const RESOURCE_BLOCKED: &str = "resource_blocked";

/// Options for a run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Report what would change without changing anything
    pub noop: bool,
    /// Only apply resources carrying at least one of these tags
    pub tags: Vec<String>,
    /// Never apply resources carrying any of these tags
    pub skip_tags: Vec<String>,
    /// Skip resources whose direct dependencies failed
    pub skip_on_failed_dependency: bool,
    /// Apply resources even outside their schedule
    pub ignore_schedules: bool,
}

/// One run over a catalog
pub struct Transaction<'a, B, C, P>
where
    B: StoreBackend,
    C: RunCoordinator + ?Sized,
    P: ProgressCallback + ?Sized,
{
    catalog: &'a mut Catalog,
    options: RunOptions,
    store: &'a mut Persistence<B>,
    coordinator: &'a mut C,
    progress: &'a mut P,
    report: Report,
    event_manager: EventManager,
    harness: ResourceHarness,
    generator: ResourceGenerator,
    failed_before_visit: HashSet<ResourceId>,
    stop_logged: bool,
}

impl<'a, B, C, P> Transaction<'a, B, C, P>
where
    B: StoreBackend,
    C: RunCoordinator + ?Sized,
    P: ProgressCallback + ?Sized,
{
    pub fn new(
        catalog: &'a mut Catalog,
        options: RunOptions,
        store: &'a mut Persistence<B>,
        coordinator: &'a mut C,
        progress: &'a mut P,
    ) -> Self {
        let report = Report::new(options.noop);
        Self {
            catalog,
            options,
            store,
            coordinator,
            progress,
            report,
            event_manager: EventManager::new(),
            harness: ResourceHarness::new(),
            generator: ResourceGenerator::new(),
            failed_before_visit: HashSet::new(),
            stop_logged: false,
        }
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn into_report(self) -> Report {
        self.report
    }

    /// Apply every resource of the catalog
    ///
    /// Fails only for structural problems found before the first resource
    /// is visited. When the graph has cycles, the resources taking part in
    /// them get failed statuses on the report before the error is returned.
    /// A failing pre-run check of any resource also aborts the run.
    pub fn evaluate(&mut self) -> Result<()> {
        let started = Instant::now();
        self.store.load();
        let mut graph = self.catalog.take_relationship_graph()?;

        for id in self.catalog.ids() {
            if graph.contains(id) {
                self.generator
                    .generate_additional_resources(self.catalog, &mut graph, id);
            }
        }

        let cycles = graph.find_cycles();
        if !cycles.is_empty() {
            for id in cycles.iter().flatten() {
                if let Some(reference) = graph.reference(*id).cloned() {
                    self.report
                        .resource_status_mut(&reference)
                        .failed_because(DEPENDENCY_CYCLE, "resource is part of a dependency cycle");
                }
            }
            let result = graph.check_acyclic();
            self.catalog.restore_relationship_graph(graph);
            self.report.duration = Some(started.elapsed());
            return result;
        }

        let failures = self.pre_run_checks(&graph);
        if !failures.is_empty() {
            self.catalog.restore_relationship_graph(graph);
            self.report.duration = Some(started.elapsed());
            return Err(Error::PreRunChecksFailed(failures));
        }

        self.progress.on_run_start(graph.len());
        let traversal = graph.traverse(self);
        self.progress.on_run_complete();
        self.catalog.restore_relationship_graph(graph);
        let stats = traversal?;
        debug!(
            "Visited {} resource(s), {} unsuitable, {} canceled, {} blocked",
            stats.visited, stats.overly_deferred, stats.canceled, stats.blocked
        );

        self.report.resources_failed_to_generate = self.generator.resources_failed_to_generate();
        self.report.events = std::mem::take(&mut self.event_manager).into_events();
        self.report
            .retain_statuses(|status| status.resource.type_name != Whit::TYPE);

        self.save_store();
        self.report.duration = Some(started.elapsed());
        Ok(())
    }

    /// Run the pre-run check of every resource, collecting the failures
    fn pre_run_checks(&self, graph: &RelationshipGraph) -> Vec<String> {
        let mut failures = Vec::new();
        for id in graph.vertices() {
            let Some(resource) = self.catalog.get(id) else {
                continue;
            };
            if let Err(e) = resource.pre_run_check() {
                let message = format!("{}: {e:#}", resource.resource_ref());
                error!("{message}");
                failures.push(message);
            }
        }
        failures
    }

    /// Persist the store; failures are reported but do not fail the run
    fn save_store(&mut self) {
        let live: Vec<String> = self
            .catalog
            .ids()
            .into_iter()
            .filter_map(|id| self.catalog.reference(id).map(ToString::to_string))
            .collect();
        self.store.prune(&live);
        if let Err(e) = self.store.save() {
            error!("Could not save state store {}: {e}", self.store.location());
            self.report.store_error = Some(e.to_string());
        }
    }

    /// Skip, or apply and then refresh, one resource
    fn eval_resource(&mut self, graph: &RelationshipGraph, id: ResourceId) {
        let Some(resource) = self.catalog.get(id).cloned() else {
            return;
        };
        let reference = resource.resource_ref();
        self.progress.on_resource_start(&reference);

        if self.skip(graph, id, &reference) {
            self.report.resource_status_mut(&reference).skipped = true;
            debug!("{reference}: Resource is being skipped, unscheduling all events");
            self.event_manager.dequeue_all_events_for_resource(id);
        } else if self.failed_before_visit.contains(&id) {
            self.event_manager.dequeue_all_events_for_resource(id);
        } else {
            self.report.resource_status_mut(&reference).scheduled = true;
            self.apply(graph, id, resource.as_ref());

            let noop = self.options.noop || resource.noop();
            let status = self.report.resource_status_mut(&reference);
            self.event_manager
                .process_events(self.catalog, graph, id, status, noop);
        }

        if let Some(status) = self.report.resource_status(&reference) {
            self.progress.on_resource_complete(status);
        }
    }

    /// Run the harness and route the resulting events
    fn apply(&mut self, graph: &RelationshipGraph, id: ResourceId, resource: &dyn Resource) {
        let live_dependents: Vec<ResourceRef> = graph
            .dependents(id)
            .into_iter()
            .filter_map(|dependent| self.catalog.get(dependent))
            .filter(|dependent| !dependent.deleting())
            .map(|dependent| dependent.resource_ref())
            .filter(|dependent| dependent.type_name != Whit::TYPE)
            .collect();
        let ctx = EvaluationContext {
            noop: self.options.noop,
            live_dependents,
        };

        let mut status = self.harness.evaluate(resource, &ctx, &mut *self.store);
        status.tags = self
            .catalog
            .tags(id)
            .map(|tags| tags.iter().map(String::from).collect())
            .unwrap_or_default();

        let failed = status.failed;
        let events = status.events.clone();
        self.report.add_resource_status(status);
        if !failed {
            self.event_manager
                .queue_events(self.catalog, graph, id, &events);
        }
    }

    /// Whether a resource must not be applied in this run
    fn skip(&mut self, graph: &RelationshipGraph, id: ResourceId, reference: &ResourceRef) -> bool {
        let tags = self.catalog.tags(id);
        if !self.options.tags.is_empty()
            && !tags.is_some_and(|t| t.tagged_with_any(&self.options.tags))
        {
            debug!("{reference}: Not tagged with {}", self.options.tags.join(", "));
            return true;
        }
        if tags.is_some_and(|t| t.tagged_with_any(&self.options.skip_tags)) {
            debug!("{reference}: Tagged with {}", self.options.skip_tags.join(", "));
            return true;
        }
        if !self.scheduled(id, reference) {
            debug!("{reference}: Not scheduled");
            return true;
        }
        if self.options.skip_on_failed_dependency && self.failed_dependencies(graph, id) {
            warn!("{reference}: Skipping because of failed dependencies");
            self.report.resource_status_mut(reference).dependency_failed = true;
            return true;
        }
        false
    }

    /// Whether the resource's schedule allows applying it now
    ///
    /// The schedule is matched against the last time the resource was checked.
    fn scheduled(&self, id: ResourceId, reference: &ResourceRef) -> bool {
        if self.options.ignore_schedules {
            return true;
        }
        let Some(schedule) = self.catalog.get(id).and_then(|r| r.schedule()) else {
            return true;
        };
        let checked = self
            .store
            .record(&reference.to_string())
            .and_then(|record| record.checked);
        schedule.matches(checked, Utc::now())
    }

    fn failed_dependencies(&self, graph: &RelationshipGraph, id: ResourceId) -> bool {
        graph
            .dependencies(id)
            .into_iter()
            .filter_map(|dependency| graph.reference(dependency))
            .filter_map(|reference| self.report.resource_status(reference))
            .any(|status| status.failed || status.dependency_failed)
    }

    fn fail_before_visit(&mut self, id: ResourceId, name: &str, message: String) {
        if let Some(reference) = self.catalog.reference(id).cloned() {
            error!("{reference}: {message}");
            self.report
                .resource_status_mut(&reference)
                .failed_because(name, message);
        }
        self.failed_before_visit.insert(id);
    }
}

impl<B, C, P> TraversalHooks for Transaction<'_, B, C, P>
where
    B: StoreBackend,
    C: RunCoordinator + ?Sized,
    P: ProgressCallback + ?Sized,
{
    fn should_continue(&mut self) -> bool {
        if !self.coordinator.stop_requested() {
            return true;
        }
        if !self.stop_logged {
            warn!("Stop requested; remaining resources will be skipped");
            self.stop_logged = true;
        }
        false
    }

    fn suitable(&mut self, id: ResourceId) -> bool {
        self.catalog.get(id).is_none_or(|resource| resource.suitable())
    }

    fn pre_process(&mut self, graph: &mut RelationshipGraph, id: ResourceId) -> bool {
        let Some(resource) = self.catalog.get(id).cloned() else {
            return false;
        };
        if let Err(e) = self.coordinator.prefetch_if_necessary(resource.as_ref()) {
            let message = format!(
                "Could not prefetch {} provider: {e:#}",
                resource.resource_ref().type_name
            );
            self.fail_before_visit(id, RESOURCE_FAILED, message);
            return false;
        }
        match self.generator.eval_generate(self.catalog, graph, id) {
            Ok(expanded) => expanded,
            Err(e) => {
                self.fail_before_visit(id, RESOURCE_FAILED, e.to_string());
                false
            }
        }
    }

    fn visit(&mut self, graph: &mut RelationshipGraph, id: ResourceId) {
        self.eval_resource(graph, id);
    }

    fn overly_deferred(&mut self, id: ResourceId) {
        self.fail_before_visit(
            id,
            RESOURCE_FAILED,
            "Could not find a suitable provider".to_string(),
        );
        self.event_manager.dequeue_all_events_for_resource(id);
    }

    fn canceled(&mut self, id: ResourceId) {
        if let Some(reference) = self.catalog.reference(id).cloned() {
            info!("{reference}: Skipping because the run was stopped");
            self.report.resource_status_mut(&reference).skipped = true;
        }
        self.event_manager.dequeue_all_events_for_resource(id);
    }

    fn blocked(&mut self, graph: &RelationshipGraph, id: ResourceId, waiting_on: &[ResourceId]) {
        let waiting: Vec<String> = waiting_on.iter().map(|d| graph.describe(*d)).collect();
        let message = if waiting.is_empty() {
            "Never became ready to be applied".to_string()
        } else {
            format!("Never became ready to be applied; still waiting on {}", waiting.join(", "))
        };
        self.fail_before_visit(id, RESOURCE_BLOCKED, message);
        self.event_manager.dequeue_all_events_for_resource(id);
    }
}

/// Apply a catalog with the given options, store and callbacks
///
/// # Type Parameters
/// * `B` - Store backend type
/// * `C` - Run coordinator type
/// * `P` - Progress callback type
///
/// # Returns
/// The report of the run
pub fn execute<B, C, P>(
    catalog: &mut Catalog,
    options: RunOptions,
    store: &mut Persistence<B>,
    coordinator: &mut C,
    progress: &mut P,
) -> Result<Report>
where
    B: StoreBackend,
    C: RunCoordinator + ?Sized,
    P: ProgressCallback + ?Sized,
{
    let mut transaction = Transaction::new(catalog, options, store, coordinator, progress);
    transaction.evaluate()?;
    Ok(transaction.into_report())
}

/// Simple execution without callbacks
///
/// For basic use cases that need no history between runs, no cancellation
/// and no progress output.
pub fn execute_simple(catalog: &mut Catalog, options: RunOptions) -> Result<Report> {
    let mut store: Persistence<MemoryBackend> = Persistence::in_memory();
    execute(catalog, options, &mut store, &mut NoCoordinator, &mut NoProgress)
}
