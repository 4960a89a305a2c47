//! # Declarative
//!
//! A catalog execution engine for declarative resource management.
//!
//! A catalog of resources, each declaring the desired values of its
//! properties and its relationships to other resources, is applied in
//! dependency order. Every resource is compared with the live system and
//! brought in sync; the changes emit events which travel along the
//! relationship graph and trigger refresh callbacks on subscribers.
//!
//! ## Core Concepts
//!
//! - **Resource**: Something with properties that can be retrieved and synced
//! - **Catalog**: The resources of a run plus their containment and tags
//! - **RelationshipGraph**: The ordering edges between catalog resources
//! - **Transaction**: One run over a catalog, producing a [`Report`]
//! - **Persistence**: Values remembered between runs, for audits
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{Catalog, RunOptions, execute_simple};
//!
//! let mut catalog = Catalog::new();
//! let config = catalog.add_resource(config_file)?;
//! let service = catalog.add_resource(web_service)?;
//! catalog.add_dependency(config, service, EdgeLabel::refresh());
//!
//! let report = execute_simple(&mut catalog, RunOptions::default())?;
//! for status in report.statuses() {
//!     println!("{}: {}", status.resource, status.state_label());
//! }
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`Resource`] and [`PropertyHandler`]: Read and change the system
//! - [`RunCoordinator`]: Cooperative cancellation and provider prefetching
//! - [`ProgressCallback`]: Receives progress updates
//! - [`StoreBackend`]: Where cross-run values are kept
//!
//! This allows the crate to be used without hard dependencies on
//! specific resource types, UI frameworks or storage locations.

pub mod catalog;
pub mod context;
pub mod error;
pub mod event_manager;
pub mod generator;
pub mod graph;
pub mod harness;
pub mod persistence;
pub mod property;
pub mod resource;
pub mod schedule;
pub mod status;
pub mod tags;
pub mod transaction;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use catalog::{Catalog, ResourceId};
pub use context::{NoCoordinator, NoProgress, ProgressCallback, RunCoordinator, StopFlag};
pub use error::{Error, Result};
pub use graph::{EdgeLabel, EventFilter, Priority, RelationshipGraph};
pub use persistence::{FileBackend, MemoryBackend, Persistence, StoreBackend};
pub use property::{Property, PropertyHandler, PropertyTable, PropertyValues};
pub use resource::{
    Component, Relationship, RelationshipKind, Resource, SharedResource, Whit,
};
pub use schedule::{Period, Schedule};
pub use status::{Report, ResourceStatus, RunOutcome, RunSummary};
pub use tags::Tags;
pub use transaction::{RunOptions, Transaction, execute, execute_simple};
pub use types::{Event, EventStatus, ResourceRef, Value};
