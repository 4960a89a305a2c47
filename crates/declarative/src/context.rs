//! Run coordination and progress traits
//!
//! These traits allow the declarative crate to be used without
//! depending on a specific signal handler, provider cache or UI.

use crate::resource::Resource;
use crate::status::ResourceStatus;
use crate::types::ResourceRef;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Coordinates a run with the world outside the engine
///
/// Implement this trait to cancel runs cooperatively or to warm provider
/// caches before resources are applied.
pub trait RunCoordinator {
    /// Checked between resources; returning true stops the run
    fn stop_requested(&self) -> bool {
        false
    }

    /// Called right before a resource is applied
    ///
    /// A provider that can list all its instances at once would do so here.
    fn prefetch_if_necessary(&mut self, _resource: &dyn Resource) -> Result<()> {
        Ok(())
    }
}

/// Coordinator that never stops and never prefetches
pub struct NoCoordinator;

impl RunCoordinator for NoCoordinator {}

/// Coordinator backed by a shared stop flag
///
/// Clone it into a signal handler or another thread and call
/// [`StopFlag::request_stop`] to end the run after the current resource.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl RunCoordinator for StopFlag {
    fn stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during a run.
pub trait ProgressCallback {
    /// Called once before the first resource with the number of vertices
    fn on_run_start(&mut self, _count: usize) {}

    /// Called when starting to apply a single resource
    fn on_resource_start(&mut self, resource: &ResourceRef);

    /// Called when a resource has been applied, skipped or failed
    fn on_resource_complete(&mut self, status: &ResourceStatus);

    /// Called once after the last resource
    fn on_run_complete(&mut self) {}
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_resource_start(&mut self, _resource: &ResourceRef) {}
    fn on_resource_complete(&mut self, _status: &ResourceStatus) {}
}
