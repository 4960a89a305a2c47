//! Resource harness - evaluates one resource against its desired state
//!
//! The harness retrieves current values, syncs every out-of-sync property
//! (or only reports it in noop mode), produces one event per change,
//! captures audit events, and records what it saw in the persistence store.

use crate::persistence::{Persistence, StoreBackend};
use crate::property::{ENSURE, Property, PropertyTable, PropertyValues};
use crate::resource::Resource;
use crate::status::ResourceStatus;
use crate::types::{Change, Event, EventStatus, ResourceRef, Value, format_value, is_absent};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Name of the event recorded when a resource could not be evaluated
const RESOURCE_FAILED: &str = "resource_failed";

/// What the harness needs to know about the run
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    /// Simulate every change
    pub noop: bool,
    /// Dependents of the resource that are not being removed themselves
    pub live_dependents: Vec<ResourceRef>,
}

/// Records the elapsed time into its slot when dropped
struct EvaluationTimer<'a> {
    started: Instant,
    slot: &'a mut Option<Duration>,
}

impl<'a> EvaluationTimer<'a> {
    fn start(slot: &'a mut Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            slot,
        }
    }
}

impl Drop for EvaluationTimer<'_> {
    fn drop(&mut self) {
        *self.slot = Some(self.started.elapsed());
    }
}

/// Evaluates single resources
#[derive(Debug, Default)]
pub struct ResourceHarness;

impl ResourceHarness {
    pub fn new() -> Self {
        Self
    }

    /// Bring one resource in sync and describe what happened
    ///
    /// Never fails: problems with the resource end up as failure events on
    /// the returned status.
    pub fn evaluate<B: StoreBackend>(
        &self,
        resource: &dyn Resource,
        ctx: &EvaluationContext,
        store: &mut Persistence<B>,
    ) -> ResourceStatus {
        let mut status = ResourceStatus::new(resource.resource_ref());
        let mut elapsed = None;
        let result = {
            let _timer = EvaluationTimer::start(&mut elapsed);
            self.perform_changes(resource, ctx, store, &mut status)
        };
        status.evaluation_time = elapsed;

        if let Err(e) = result {
            let message = format!("{e:#}");
            error!("{}: Could not evaluate: {message}", status.resource);
            status.failed_because(RESOURCE_FAILED, message);
        }
        status
    }

    fn perform_changes<B: StoreBackend>(
        &self,
        resource: &dyn Resource,
        ctx: &EvaluationContext,
        store: &mut Persistence<B>,
        status: &mut ResourceStatus,
    ) -> anyhow::Result<()> {
        let reference = resource.resource_ref();
        let key = reference.to_string();

        let current = resource.retrieve()?;
        store.mark_checked(&key);

        if resource.purging() && resource.deleting() && !ctx.live_dependents.is_empty() {
            let dependents = ctx
                .live_dependents
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<String>>()
                .join(", ");
            let message = format!("{dependents} still depend(s) on me -- not purging");
            warn!("{reference}: {message}");
            status.skipped = true;
            status.failure_reason = Some(message);
            return Ok(());
        }

        let noop = ctx.noop || resource.noop();
        let audited = resource.audited();
        let historical = store.values(&key);
        let properties = resource.properties();
        let mut synced: HashSet<String> = HashSet::new();

        let mut manage_rest = resource.present(&current);
        if let Some(ensure) = properties.ensure()
            && let Some(event) = sync_if_needed(
                &reference, ensure, &current, &historical, &audited, noop, store,
            )
        {
            synced.insert(ENSURE.to_string());
            manage_rest =
                event.status == EventStatus::Noop && !ensure.should().is_some_and(is_absent);
            status.add_event(event);
        } else if !manage_rest {
            debug!("{reference}: Nothing to manage: no ensure and the resource doesn't exist");
        }

        if manage_rest {
            for property in properties.managed().filter(|p| p.name() != ENSURE) {
                if let Some(event) = sync_if_needed(
                    &reference, property, &current, &historical, &audited, noop, store,
                ) {
                    synced.insert(property.name().to_string());
                    status.add_event(event);
                }
            }
        }

        for event in capture_audit_events(
            &reference,
            properties,
            &current,
            &historical,
            &audited,
            &synced,
        ) {
            status.add_event(event);
        }

        persist_system_values(resource, &key, &current, &audited, status, store);

        if status.changed && !noop {
            store.mark_synced(&key);
            resource.flush()?;
        }
        Ok(())
    }
}

/// Sync one property if it is out of sync, returning the resulting event
fn sync_if_needed<B: StoreBackend>(
    reference: &ResourceRef,
    property: &Property,
    current: &PropertyValues,
    historical: &PropertyValues,
    audited: &[String],
    noop: bool,
    store: &Persistence<B>,
) -> Option<Event> {
    let name = property.name();
    let should = property.should()?;
    let is = current.get(name).cloned().unwrap_or(Value::Null);
    if property.insync(&is) {
        return None;
    }

    let key = reference.to_string();
    let historical_value = historical.get(name).cloned();
    let do_audit = audited.iter().any(|a| a == name);
    let audit_message = match &historical_value {
        Some(previous) if do_audit && *previous != property.handler().recorded_value(&is) => {
            format!(" (previously recorded value was {})", format_value(previous))
        }
        _ => String::new(),
    };
    let corrective_change = store
        .get_system_value(&key, name)
        .is_some_and(|stored| *stored != property.handler().recorded_value(&is));

    let change = Change::new(name, is.clone(), should.clone());
    let mut event = if noop {
        let message = format!(
            "current_value {}, should be {} (noop){audit_message}",
            format_value(&is),
            format_value(should)
        );
        info!("{reference}: {message}");
        change.into_event(reference.clone(), historical_value, EventStatus::Noop, message)
    } else {
        match property.handler().sync(should) {
            Ok(()) => {
                let message = format!(
                    "{}{audit_message}",
                    property.handler().change_message(name, &is, should)
                );
                info!("{reference}: {message}");
                change.into_event(
                    reference.clone(),
                    historical_value,
                    EventStatus::Success,
                    message,
                )
            }
            Err(e) => {
                let message = format!(
                    "change from {} to {} failed: {e:#}",
                    format_value(&is),
                    format_value(should)
                );
                error!("{reference}: {message}");
                change.into_event(
                    reference.clone(),
                    historical_value,
                    EventStatus::Failure,
                    message,
                )
            }
        }
    };
    event.corrective_change = corrective_change;
    event.audited = do_audit;
    Some(event)
}

/// Events for audited values that changed since the previous run
fn capture_audit_events(
    reference: &ResourceRef,
    properties: &PropertyTable,
    current: &PropertyValues,
    historical: &PropertyValues,
    audited: &[String],
    synced: &HashSet<String>,
) -> Vec<Event> {
    let mut events = Vec::new();
    for name in audited {
        if synced.contains(name) {
            continue;
        }
        let is = recorded_value(properties, name, current);
        match historical.get(name) {
            Some(previous) if *previous != is => {
                let message = format!(
                    "audit change: previously recorded value {} has been changed to {}",
                    format_value(previous),
                    format_value(&is)
                );
                info!("{reference}: {message}");
                let mut event = Change::new(name.as_str(), is, Value::Null).into_event(
                    reference.clone(),
                    Some(previous.clone()),
                    EventStatus::Audit,
                    message,
                );
                event.desired_value = None;
                event.audited = true;
                events.push(event);
            }
            Some(_) => {}
            None => info!(
                "{reference}: audit change: newly-recorded value {}",
                format_value(&is)
            ),
        }
    }
    events
}

/// Record observed and applied values for the next run
fn persist_system_values<B: StoreBackend>(
    resource: &dyn Resource,
    key: &str,
    current: &PropertyValues,
    audited: &[String],
    status: &ResourceStatus,
    store: &mut Persistence<B>,
) {
    for name in audited {
        let is = recorded_value(resource.properties(), name, current);
        store.set_system_value(key, name, is);
    }

    for property in resource.properties().managed() {
        let Some(should) = property.should() else {
            continue;
        };
        let name = property.name();
        let event = status
            .events
            .iter()
            .find(|e| e.property.as_deref() == Some(name) && e.status != EventStatus::Audit);
        let value = match event {
            Some(event) if event.status != EventStatus::Success => store
                .get_system_value(key, name)
                .cloned()
                .or_else(|| event.previous_value.clone()),
            _ => Some(property.handler().recorded_value(should)),
        };
        if let Some(value) = value {
            store.set_system_value(key, name, value);
        }
    }
}

/// The current value of `name` in the form the store keeps
fn recorded_value(properties: &PropertyTable, name: &str, current: &PropertyValues) -> Value {
    let is = current.get(name).cloned().unwrap_or(Value::Null);
    match properties.get(name) {
        Some(property) => property.handler().recorded_value(&is),
        None => is,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestResource;
    use serde_json::json;

    fn evaluate(resource: &TestResource, noop: bool) -> (ResourceStatus, Persistence<crate::persistence::MemoryBackend>) {
        let mut store = Persistence::in_memory();
        let ctx = EvaluationContext {
            noop,
            ..EvaluationContext::default()
        };
        let status = ResourceHarness::new().evaluate(resource, &ctx, &mut store);
        (status, store)
    }

    #[test]
    fn test_retrieve_failure_produces_failed_status() {
        let resource = TestResource::new("notify", "a").retrieve_error("the_message");
        let (status, _) = evaluate(&resource, false);
        assert!(status.failed);
        assert_eq!(status.events.len(), 1);
        assert_eq!(status.events[0].status, EventStatus::Failure);
        assert_eq!(status.events[0].message, "the_message");
        assert!(status.evaluation_time.is_some());
    }

    #[test]
    fn test_out_of_sync_property_is_synced() {
        let resource =
            TestResource::new("file", "/tmp/x").with_property("mode", json!("0600"), Some(json!("0644")));
        let (status, store) = evaluate(&resource, false);

        assert!(status.changed);
        assert_eq!(status.events.len(), 1);
        let event = &status.events[0];
        assert_eq!(event.name, "mode_changed");
        assert_eq!(event.status, EventStatus::Success);
        assert_eq!(event.message, "mode changed '0644' to '0600'");
        assert_eq!(resource.value("mode"), Some(json!("0600")));
        assert_eq!(
            store.get_system_value("File[/tmp/x]", "mode"),
            Some(&json!("0600"))
        );
        assert_eq!(resource.flush_count(), 1);
        assert!(store.record("File[/tmp/x]").unwrap().synced.is_some());
    }

    #[test]
    fn test_noop_reports_without_changing() {
        let resource =
            TestResource::new("file", "/tmp/x").with_property("mode", json!("0600"), Some(json!("0644")));
        let (status, store) = evaluate(&resource, true);

        assert!(!status.changed);
        assert!(status.out_of_sync);
        assert_eq!(status.events[0].status, EventStatus::Noop);
        assert_eq!(
            status.events[0].message,
            "current_value '0644', should be '0600' (noop)"
        );
        assert_eq!(resource.value("mode"), Some(json!("0644")));
        assert_eq!(resource.flush_count(), 0);
        assert_eq!(
            store.get_system_value("File[/tmp/x]", "mode"),
            Some(&json!("0644"))
        );
    }

    #[test]
    fn test_resource_level_noop() {
        let resource = TestResource::new("file", "/tmp/x")
            .with_property("mode", json!("0600"), Some(json!("0644")))
            .in_noop();
        let (status, _) = evaluate(&resource, false);
        assert_eq!(status.events[0].status, EventStatus::Noop);
        assert_eq!(resource.value("mode"), Some(json!("0644")));
    }

    #[test]
    fn test_failed_sync() {
        let resource = TestResource::new("file", "/tmp/x").failing_property(
            "mode",
            json!("0600"),
            json!("0644"),
            "permission denied",
        );
        let (status, _) = evaluate(&resource, false);
        assert!(status.failed);
        assert_eq!(
            status.events[0].message,
            "change from '0644' to '0600' failed: permission denied"
        );
    }

    #[test]
    fn test_ensure_change_ends_the_pass() {
        let resource = TestResource::new("file", "/tmp/x")
            .with_property("ensure", json!("present"), Some(json!("absent")))
            .with_property("mode", json!("0600"), Some(json!("0644")));
        let (status, _) = evaluate(&resource, false);

        assert_eq!(status.events.len(), 1);
        assert_eq!(status.events[0].name, "file_created");
        assert_eq!(resource.value("mode"), Some(json!("0644")));
    }

    #[test]
    fn test_ensure_failure_ends_the_pass() {
        let resource = TestResource::new("file", "/tmp/x")
            .failing_property("ensure", json!("present"), json!("absent"), "disk full")
            .with_property("mode", json!("0600"), Some(json!("0644")));
        let (status, _) = evaluate(&resource, false);
        assert_eq!(status.events.len(), 1);
        assert!(status.failed);
    }

    #[test]
    fn test_absent_resource_manages_nothing() {
        let resource = TestResource::new("file", "/tmp/x")
            .with_property("ensure", json!("absent"), Some(json!("absent")))
            .with_property("mode", json!("0600"), None);
        let (status, _) = evaluate(&resource, false);
        assert!(status.events.is_empty());
        assert_eq!(resource.value("mode"), None);
    }

    #[test]
    fn test_purge_blocked_by_live_dependents() {
        let resource = TestResource::new("file", "/tmp/x")
            .with_property("ensure", json!("absent"), Some(json!("present")))
            .purging();
        let mut store = Persistence::in_memory();
        let ctx = EvaluationContext {
            noop: false,
            live_dependents: vec![ResourceRef::new("service", "web")],
        };
        let status = ResourceHarness::new().evaluate(&resource, &ctx, &mut store);

        assert!(status.skipped);
        assert!(status.events.is_empty());
        assert_eq!(
            status.failure_reason.as_deref(),
            Some("Service[web] still depend(s) on me -- not purging")
        );
        assert_eq!(resource.value("ensure"), Some(json!("present")));
    }

    #[test]
    fn test_audit_change_is_reported_once() {
        let resource = TestResource::new("file", "/tmp/x").audit("content", json!("one"));
        let mut store = Persistence::in_memory();
        let harness = ResourceHarness::new();
        let ctx = EvaluationContext::default();

        let first = harness.evaluate(&resource, &ctx, &mut store);
        assert!(first.events.is_empty());

        resource.set_value("content", json!("two"));
        let second = harness.evaluate(&resource, &ctx, &mut store);
        assert_eq!(second.events.len(), 1);
        let event = &second.events[0];
        assert_eq!(event.status, EventStatus::Audit);
        assert_eq!(event.historical_value, Some(json!("one")));
        assert_eq!(
            event.message,
            "audit change: previously recorded value 'one' has been changed to 'two'"
        );
        assert!(!second.changed);
        assert_eq!(resource.value("content"), Some(json!("two")));

        let third = harness.evaluate(&resource, &ctx, &mut store);
        assert!(third.events.is_empty());
    }

    #[test]
    fn test_corrective_change() {
        let resource =
            TestResource::new("file", "/tmp/x").with_property("mode", json!("0600"), Some(json!("0600")));
        let mut store = Persistence::in_memory();
        let harness = ResourceHarness::new();
        let ctx = EvaluationContext::default();

        let first = harness.evaluate(&resource, &ctx, &mut store);
        assert!(first.events.is_empty());

        resource.set_value("mode", json!("0777"));
        let second = harness.evaluate(&resource, &ctx, &mut store);
        assert!(second.corrective_change);
        assert!(second.events[0].corrective_change);
    }
}
