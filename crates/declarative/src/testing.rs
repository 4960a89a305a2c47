//! Configurable in-memory resource for unit tests

use crate::property::{Property, PropertyHandler, PropertyTable, PropertyValues};
use crate::resource::{Relationship, RelationshipKind, Resource, SharedResource};
use crate::schedule::Schedule;
use crate::types::{Event, ResourceRef, Value};
use anyhow::{Result, bail};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type State = Arc<Mutex<PropertyValues>>;

#[derive(Debug)]
struct StateHandler {
    name: String,
    state: State,
    error: Option<String>,
}

impl PropertyHandler for StateHandler {
    fn sync(&self, should: &Value) -> Result<()> {
        if let Some(error) = &self.error {
            bail!("{error}");
        }
        self.state
            .lock()
            .unwrap()
            .insert(self.name.clone(), should.clone());
        Ok(())
    }
}

#[derive(Debug)]
pub struct TestResource {
    reference: ResourceRef,
    name: Option<String>,
    isomorphic: bool,
    container: bool,
    tags: Vec<String>,
    relationships: Vec<Relationship>,
    autorequire: Vec<ResourceRef>,
    table: PropertyTable,
    audited: Vec<String>,
    state: State,
    retrieve_error: Option<String>,
    generated: Vec<SharedResource>,
    generate_error: Option<String>,
    eval_generated: Option<Vec<SharedResource>>,
    depth_first: bool,
    self_refresh: bool,
    noop: bool,
    purging: bool,
    refreshable: bool,
    refresh_error: Option<String>,
    unsuitable_polls: AtomicUsize,
    ancestors: Vec<String>,
    pre_run_error: Option<String>,
    schedule: Option<Schedule>,
    refreshes: AtomicUsize,
    flushes: AtomicUsize,
}

impl TestResource {
    pub fn new(type_name: &str, title: &str) -> Self {
        Self {
            reference: ResourceRef::new(type_name, title),
            name: None,
            isomorphic: true,
            container: false,
            tags: Vec::new(),
            relationships: Vec::new(),
            autorequire: Vec::new(),
            table: PropertyTable::new(),
            audited: Vec::new(),
            state: State::default(),
            retrieve_error: None,
            generated: Vec::new(),
            generate_error: None,
            eval_generated: None,
            depth_first: false,
            self_refresh: false,
            noop: false,
            purging: false,
            refreshable: false,
            refresh_error: None,
            unsuitable_polls: AtomicUsize::new(0),
            ancestors: Vec::new(),
            pre_run_error: None,
            schedule: None,
            refreshes: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
        }
    }

    pub fn shared(type_name: &str, title: &str) -> SharedResource {
        Self::new(type_name, title).into_shared()
    }

    pub fn into_shared(self) -> SharedResource {
        Arc::new(self)
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn non_isomorphic(mut self) -> Self {
        self.isomorphic = false;
        self
    }

    pub fn container(mut self) -> Self {
        self.container = true;
        self
    }

    pub fn tagged(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn relate(mut self, kind: RelationshipKind, target: ResourceRef) -> Self {
        self.relationships.push(Relationship::new(kind, target));
        self
    }

    pub fn autorequires(mut self, target: ResourceRef) -> Self {
        self.autorequire.push(target);
        self
    }

    /// Manage `name`, starting from `current` (absent when `None`)
    pub fn with_property(self, name: &str, should: Value, current: Option<Value>) -> Self {
        self.property(name, Some(should), current, None)
    }

    /// Manage `name` with a handler whose sync always fails
    pub fn failing_property(self, name: &str, should: Value, current: Value, error: &str) -> Self {
        self.property(name, Some(should), Some(current), Some(error.to_string()))
    }

    /// Audit `name` without managing it
    pub fn audit(mut self, name: &str, current: Value) -> Self {
        self.audited.push(name.to_string());
        self.property(name, None, Some(current), None)
    }

    fn property(
        mut self,
        name: &str,
        should: Option<Value>,
        current: Option<Value>,
        error: Option<String>,
    ) -> Self {
        let handler = Arc::new(StateHandler {
            name: name.to_string(),
            state: self.state.clone(),
            error,
        });
        let property = match should {
            Some(should) => Property::managed(name, should, handler),
            None => Property::unmanaged(name, handler),
        };
        self.table.insert(property);
        if let Some(current) = current {
            self.state.lock().unwrap().insert(name.to_string(), current);
        }
        self
    }

    pub fn retrieve_error(mut self, error: &str) -> Self {
        self.retrieve_error = Some(error.to_string());
        self
    }

    pub fn generates(mut self, children: Vec<SharedResource>) -> Self {
        self.generated = children;
        self
    }

    pub fn generate_error(mut self, error: &str) -> Self {
        self.generate_error = Some(error.to_string());
        self
    }

    pub fn eval_generates(mut self, children: Vec<SharedResource>) -> Self {
        self.eval_generated = Some(children);
        self
    }

    pub fn depth_first(mut self) -> Self {
        self.depth_first = true;
        self
    }

    pub fn self_refreshing(mut self) -> Self {
        self.self_refresh = true;
        self.refreshable = true;
        self
    }

    pub fn in_noop(mut self) -> Self {
        self.noop = true;
        self
    }

    pub fn purging(mut self) -> Self {
        self.purging = true;
        self
    }

    pub fn refreshable(mut self) -> Self {
        self.refreshable = true;
        self
    }

    pub fn refresh_error(mut self, error: &str) -> Self {
        self.refreshable = true;
        self.refresh_error = Some(error.to_string());
        self
    }

    /// Report unsuitable for the first `polls` checks
    pub fn unsuitable_for(self, polls: usize) -> Self {
        self.unsuitable_polls.store(polls, Ordering::SeqCst);
        self
    }

    pub fn pre_run_error(mut self, error: &str) -> Self {
        self.pre_run_error = Some(error.to_string());
        self
    }

    pub fn scheduled(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_ancestors(mut self, ancestors: &[&str]) -> Self {
        self.ancestors = ancestors.iter().map(ToString::to_string).collect();
        self
    }

    /// Current value of a property on the simulated system
    pub fn value(&self, name: &str) -> Option<Value> {
        self.state.lock().unwrap().get(name).cloned()
    }

    /// Change a property behind the engine's back
    pub fn set_value(&self, name: &str, value: Value) {
        self.state.lock().unwrap().insert(name.to_string(), value);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl Resource for TestResource {
    fn resource_ref(&self) -> ResourceRef {
        self.reference.clone()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn isomorphic(&self) -> bool {
        self.isomorphic
    }

    fn properties(&self) -> &PropertyTable {
        &self.table
    }

    fn audited(&self) -> Vec<String> {
        self.audited.clone()
    }

    fn retrieve(&self) -> Result<PropertyValues> {
        if let Some(error) = &self.retrieve_error {
            bail!("{error}");
        }
        Ok(self.state.lock().unwrap().clone())
    }

    fn relationships(&self) -> Vec<Relationship> {
        self.relationships.clone()
    }

    fn autorequire(&self) -> Vec<ResourceRef> {
        self.autorequire.clone()
    }

    fn generate(&self) -> Result<Vec<SharedResource>> {
        if let Some(error) = &self.generate_error {
            bail!("{error}");
        }
        Ok(self.generated.clone())
    }

    fn supports_eval_generate(&self) -> bool {
        self.eval_generated.is_some()
    }

    fn eval_generate(&self) -> Result<Vec<SharedResource>> {
        Ok(self.eval_generated.clone().unwrap_or_default())
    }

    fn depth_first(&self) -> bool {
        self.depth_first
    }

    fn self_refresh(&self) -> bool {
        self.self_refresh
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn noop(&self) -> bool {
        self.noop
    }

    fn suitable(&self) -> bool {
        self.unsuitable_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    fn pre_run_check(&self) -> Result<()> {
        if let Some(error) = &self.pre_run_error {
            bail!("{error}");
        }
        Ok(())
    }

    fn schedule(&self) -> Option<Schedule> {
        self.schedule
    }

    fn purging(&self) -> bool {
        self.purging
    }

    fn responds_to(&self, callback: &str) -> bool {
        self.refreshable && callback == "refresh"
    }

    fn callback(&self, name: &str, _events: &[Event]) -> Result<()> {
        if !self.responds_to(name) {
            bail!("{} does not respond to '{name}'", self.reference);
        }
        if let Some(error) = &self.refresh_error {
            bail!("{error}");
        }
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn ancestors(&self) -> Vec<String> {
        self.ancestors.clone()
    }

    fn is_container(&self) -> bool {
        self.container
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
