//! Resource trait for declarative state management
//!
//! A Resource represents something that can be in a certain state,
//! and can be changed to reach a desired state. Resources also declare how
//! they relate to each other, and may generate further resources.

use crate::property::{ENSURE, PropertyTable, PropertyValues};
use crate::schedule::Schedule;
use crate::types::{Event, ResourceRef, is_absent};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of a declared relationship between two resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    /// This resource runs before the target
    Before,
    /// The target runs before this resource
    Require,
    /// Like `before`, and the target is refreshed when this resource changes
    Notify,
    /// Like `require`, and this resource is refreshed when the target changes
    Subscribe,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Require => "require",
            Self::Notify => "notify",
            Self::Subscribe => "subscribe",
        }
    }

    /// Whether the declaring resource is the source of the resulting edge
    pub fn declarer_is_source(&self) -> bool {
        matches!(self, Self::Before | Self::Notify)
    }

    /// Whether the resulting edge carries a refresh callback
    pub fn refreshes(&self) -> bool {
        matches!(self, Self::Notify | Self::Subscribe)
    }
}

/// A relationship declared by a resource on another resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relationship {
    pub kind: RelationshipKind,
    pub target: ResourceRef,
}

impl Relationship {
    pub fn new(kind: RelationshipKind, target: ResourceRef) -> Self {
        Self { kind, target }
    }
}

/// Core trait for declarative resources
///
/// Every resource in a catalog implements this trait, which provides:
/// - Identity (reference, optional intrinsic name)
/// - Properties and state detection
/// - Relationship declarations (explicit and inferred)
/// - Dynamic generation of further resources
/// - Refresh callbacks
///
/// Only [`Resource::resource_ref`], [`Resource::properties`] and
/// [`Resource::retrieve`] are required; everything else defaults to the
/// behavior of a plain, non-generating, non-refreshing resource.
///
/// # Example
///
/// ```ignore
/// use declarative::{Property, PropertyTable, PropertyValues, Resource, ResourceRef};
///
/// #[derive(Debug)]
/// struct Motd { table: PropertyTable }
///
/// impl Resource for Motd {
///     fn resource_ref(&self) -> ResourceRef {
///         ResourceRef::new("file", "/etc/motd")
///     }
///
///     fn properties(&self) -> &PropertyTable {
///         &self.table
///     }
///
///     fn retrieve(&self) -> anyhow::Result<PropertyValues> {
///         let content = std::fs::read_to_string("/etc/motd").unwrap_or_default();
///         Ok([("content".to_string(), content.into())].into())
///     }
/// }
/// ```
pub trait Resource: Send + Sync + fmt::Debug {
    /// Unique reference of this resource within a catalog
    fn resource_ref(&self) -> ResourceRef;

    /// Human-readable description
    fn description(&self) -> String {
        self.resource_ref().to_string()
    }

    /// Intrinsic name, when it differs from the title
    ///
    /// For isomorphic types the catalog registers `Type[name]` as an alias.
    fn name(&self) -> Option<String> {
        None
    }

    /// Whether title and name are interchangeable identities for this type
    fn isomorphic(&self) -> bool {
        true
    }

    /// Managed and audited properties, in evaluation order
    fn properties(&self) -> &PropertyTable;

    /// Properties whose values are recorded and compared across runs
    fn audited(&self) -> Vec<String> {
        Vec::new()
    }

    /// Detect the current value of every managed and audited property
    fn retrieve(&self) -> Result<PropertyValues>;

    /// Whether the resource exists, given retrieved values
    fn present(&self, current: &PropertyValues) -> bool {
        current.get(ENSURE).is_none_or(|v| !is_absent(v))
    }

    /// Explicitly declared relationships (before/require/notify/subscribe)
    fn relationships(&self) -> Vec<Relationship> {
        Vec::new()
    }

    /// Resources this one implicitly depends on, when they are in the catalog
    fn autorequire(&self) -> Vec<ResourceRef> {
        Vec::new()
    }

    /// Resources to add to the catalog before traversal starts
    fn generate(&self) -> Result<Vec<SharedResource>> {
        Ok(Vec::new())
    }

    /// Whether [`Resource::eval_generate`] should be called when visited
    fn supports_eval_generate(&self) -> bool {
        false
    }

    /// Resources to add to the graph right before this resource is visited
    fn eval_generate(&self) -> Result<Vec<SharedResource>> {
        Ok(Vec::new())
    }

    /// Generated children must run before this resource instead of after
    fn depth_first(&self) -> bool {
        false
    }

    /// Refresh this resource whenever one of its own properties changes
    fn self_refresh(&self) -> bool {
        false
    }

    /// Declared tags; the catalog adds the type name and title
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Simulate changes on this resource even when the run is live
    fn noop(&self) -> bool {
        false
    }

    /// Whether a provider able to manage this resource is available now
    fn suitable(&self) -> bool {
        true
    }

    /// Checked for every resource before anything is applied; an error aborts the run
    fn pre_run_check(&self) -> Result<()> {
        Ok(())
    }

    /// How often the resource may be applied; `None` means on every run
    fn schedule(&self) -> Option<Schedule> {
        None
    }

    /// The resource is being removed as part of a purge
    fn purging(&self) -> bool {
        false
    }

    /// The resource is being removed from the system
    fn deleting(&self) -> bool {
        self.properties()
            .ensure()
            .and_then(|p| p.should())
            .is_some_and(is_absent)
    }

    /// Whether this resource accepts the named refresh callback
    fn responds_to(&self, _callback: &str) -> bool {
        false
    }

    /// Run a refresh callback with the events that triggered it
    fn callback(&self, name: &str, _events: &[Event]) -> Result<()> {
        anyhow::bail!("{} does not respond to '{}'", self.resource_ref(), name)
    }

    /// Names of enclosing resources, nearest first (e.g. parent directories)
    ///
    /// Used to order resources produced by the same `eval_generate` call.
    fn ancestors(&self) -> Vec<String> {
        Vec::new()
    }

    /// Containers group other resources and are never applied themselves
    fn is_container(&self) -> bool {
        false
    }

    /// Persist buffered changes after all properties were synced
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// A shared resource handle
///
/// The catalog and relationship graph both refer to resources while they
/// are mutated, so resources are reference counted rather than boxed.
pub type SharedResource = Arc<dyn Resource>;

/// Completion sentinel inserted by `eval_generate`
///
/// A whit has no properties. It responds to `refresh` without doing
/// anything so that notifications flow through it to downstream resources.
#[derive(Debug)]
pub struct Whit {
    title: String,
    table: PropertyTable,
}

impl Whit {
    pub const TYPE: &'static str = "whit";

    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            table: PropertyTable::new(),
        }
    }

    /// Sentinel marking that everything generated by `parent` is done
    pub fn completed(parent: &ResourceRef) -> Self {
        Self::new(format!("completed_{}", parent.title))
    }

    /// Completion sentinel named after the whole reference of `parent`
    pub fn completed_qualified(parent: &ResourceRef) -> Self {
        Self::new(format!("completed_{parent}"))
    }
}

impl Resource for Whit {
    fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(Self::TYPE, self.title.clone())
    }

    fn properties(&self) -> &PropertyTable {
        &self.table
    }

    fn retrieve(&self) -> Result<PropertyValues> {
        Ok(PropertyValues::new())
    }

    fn responds_to(&self, callback: &str) -> bool {
        callback == "refresh"
    }

    fn callback(&self, _name: &str, _events: &[Event]) -> Result<()> {
        Ok(())
    }
}

/// A container grouping other resources (a class or defined type instance)
#[derive(Debug)]
pub struct Component {
    reference: ResourceRef,
    tags: Vec<String>,
    relationships: Vec<Relationship>,
    table: PropertyTable,
}

impl Component {
    pub fn new(type_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            reference: ResourceRef::new(type_name, title),
            tags: Vec::new(),
            relationships: Vec::new(),
            table: PropertyTable::new(),
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_relationship(mut self, kind: RelationshipKind, target: ResourceRef) -> Self {
        self.relationships.push(Relationship::new(kind, target));
        self
    }
}

impl Resource for Component {
    fn resource_ref(&self) -> ResourceRef {
        self.reference.clone()
    }

    fn properties(&self) -> &PropertyTable {
        &self.table
    }

    fn retrieve(&self) -> Result<PropertyValues> {
        Ok(PropertyValues::new())
    }

    fn relationships(&self) -> Vec<Relationship> {
        self.relationships.clone()
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn is_container(&self) -> bool {
        true
    }
}
