//! Per-resource status records and the run report

use crate::types::{Event, EventStatus, ResourceRef};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Everything that happened to one resource during a run
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub resource: ResourceRef,
    pub tags: Vec<String>,
    pub events: Vec<Event>,
    pub changed: bool,
    pub failed: bool,
    pub skipped: bool,
    pub scheduled: bool,
    pub restarted: bool,
    pub failed_to_restart: bool,
    pub dependency_failed: bool,
    pub out_of_sync: bool,
    pub change_count: usize,
    pub out_of_sync_count: usize,
    pub corrective_change: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_time: Option<Duration>,
    pub time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl ResourceStatus {
    pub fn new(resource: ResourceRef) -> Self {
        Self {
            resource,
            tags: Vec::new(),
            events: Vec::new(),
            changed: false,
            failed: false,
            skipped: false,
            scheduled: false,
            restarted: false,
            failed_to_restart: false,
            dependency_failed: false,
            out_of_sync: false,
            change_count: 0,
            out_of_sync_count: 0,
            corrective_change: false,
            evaluation_time: None,
            time: Utc::now(),
            failure_reason: None,
        }
    }

    /// Record an event and update the flags it implies
    pub fn add_event(&mut self, event: Event) {
        match event.status {
            EventStatus::Success => {
                self.changed = true;
                self.change_count += 1;
                self.out_of_sync = true;
                self.out_of_sync_count += 1;
            }
            EventStatus::Failure => {
                self.failed = true;
                self.out_of_sync = true;
                self.out_of_sync_count += 1;
            }
            EventStatus::Noop => {
                self.out_of_sync = true;
                self.out_of_sync_count += 1;
            }
            EventStatus::Audit => {}
        }
        if event.corrective_change {
            self.corrective_change = true;
        }
        self.events.push(event);
    }

    /// Mark the resource failed with a single failure event
    pub fn failed_because(&mut self, name: &str, message: impl Into<String>) {
        let message = message.into();
        self.failure_reason = Some(message.clone());
        self.add_event(
            Event::new(self.resource.clone(), name, EventStatus::Failure).with_message(message),
        );
    }

    /// Short label for the most significant outcome
    pub fn state_label(&self) -> &'static str {
        if self.failed || self.failed_to_restart {
            "failed"
        } else if self.skipped {
            "skipped"
        } else if self.changed {
            "changed"
        } else if self.out_of_sync {
            "noop"
        } else if self.restarted {
            "restarted"
        } else {
            "unchanged"
        }
    }
}

/// Counters over every status of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub changed: usize,
    pub out_of_sync: usize,
    pub failed: usize,
    pub failed_to_restart: usize,
    pub restarted: usize,
    pub skipped: usize,
    pub scheduled: usize,
    pub corrective_change: usize,
}

impl RunSummary {
    /// Add one status to the summary
    pub fn add_status(&mut self, status: &ResourceStatus) {
        self.total += 1;
        self.changed += usize::from(status.changed);
        self.out_of_sync += usize::from(status.out_of_sync);
        self.failed += usize::from(status.failed);
        self.failed_to_restart += usize::from(status.failed_to_restart);
        self.restarted += usize::from(status.restarted);
        self.skipped += usize::from(status.skipped);
        self.scheduled += usize::from(status.scheduled);
        self.corrective_change += usize::from(status.corrective_change);
    }

    /// Check if the run was fully successful
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.failed_to_restart == 0
    }
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Unchanged,
    Changed,
    Failed,
}

/// The record of one run, in the order resources were evaluated
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub time: DateTime<Utc>,
    pub noop: bool,
    statuses: Vec<ResourceStatus>,
    #[serde(skip)]
    index: HashMap<ResourceRef, usize>,
    pub events: Vec<Event>,
    pub resources_failed_to_generate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
}

impl Report {
    pub fn new(noop: bool) -> Self {
        Self {
            time: Utc::now(),
            noop,
            statuses: Vec::new(),
            index: HashMap::new(),
            events: Vec::new(),
            resources_failed_to_generate: false,
            duration: None,
            store_error: None,
        }
    }

    /// Store the status of a resource
    ///
    /// Replaces an earlier status for the same resource but keeps its
    /// position and any flags set on it before evaluation.
    pub fn add_resource_status(&mut self, mut status: ResourceStatus) {
        match self.index.get(&status.resource) {
            Some(&i) => {
                let previous = &self.statuses[i];
                status.scheduled |= previous.scheduled;
                status.dependency_failed |= previous.dependency_failed;
                self.statuses[i] = status;
            }
            None => {
                self.index.insert(status.resource.clone(), self.statuses.len());
                self.statuses.push(status);
            }
        }
    }

    /// The status of a resource, created on first use
    pub fn resource_status_mut(&mut self, resource: &ResourceRef) -> &mut ResourceStatus {
        let i = match self.index.get(resource) {
            Some(&i) => i,
            None => {
                self.index.insert(resource.clone(), self.statuses.len());
                self.statuses.push(ResourceStatus::new(resource.clone()));
                self.statuses.len() - 1
            }
        };
        &mut self.statuses[i]
    }

    pub fn resource_status(&self, resource: &ResourceRef) -> Option<&ResourceStatus> {
        self.index.get(resource).map(|&i| &self.statuses[i])
    }

    /// Statuses in evaluation order
    pub fn statuses(&self) -> &[ResourceStatus] {
        &self.statuses
    }

    /// Drop the statuses of resources that should not be reported
    pub fn retain_statuses(&mut self, keep: impl Fn(&ResourceStatus) -> bool) {
        self.statuses.retain(|status| keep(status));
        self.index = self
            .statuses
            .iter()
            .enumerate()
            .map(|(i, status)| (status.resource.clone(), i))
            .collect();
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for status in &self.statuses {
            summary.add_status(status);
        }
        summary
    }

    pub fn outcome(&self) -> RunOutcome {
        let summary = self.summary();
        if !summary.is_success() {
            RunOutcome::Failed
        } else if summary.changed > 0 || summary.restarted > 0 {
            RunOutcome::Changed
        } else {
            RunOutcome::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(status: EventStatus) -> Event {
        Event::new(ResourceRef::new("notify", "a"), "message_changed", status)
    }

    #[test]
    fn test_event_flags() {
        let mut status = ResourceStatus::new(ResourceRef::new("notify", "a"));
        status.add_event(event(EventStatus::Noop));
        assert!(status.out_of_sync);
        assert!(!status.changed);

        status.add_event(event(EventStatus::Success));
        assert!(status.changed);
        assert_eq!(status.change_count, 1);
        assert_eq!(status.out_of_sync_count, 2);

        status.add_event(event(EventStatus::Audit));
        assert_eq!(status.out_of_sync_count, 2);
        assert!(!status.failed);
    }

    #[test]
    fn test_failed_because() {
        let mut status = ResourceStatus::new(ResourceRef::new("notify", "a"));
        status.failed_because("resource_failed", "the_message");
        assert!(status.failed);
        assert_eq!(status.events.len(), 1);
        assert_eq!(status.events[0].message, "the_message");
        assert_eq!(status.events[0].status, EventStatus::Failure);
        assert_eq!(status.failure_reason.as_deref(), Some("the_message"));
    }

    #[test]
    fn test_report_replaces_status_in_place() {
        let a = ResourceRef::new("notify", "a");
        let b = ResourceRef::new("notify", "b");
        let mut report = Report::new(false);
        report.resource_status_mut(&a).scheduled = true;
        report.add_resource_status(ResourceStatus::new(b.clone()));

        let mut evaluated = ResourceStatus::new(a.clone());
        evaluated.changed = true;
        report.add_resource_status(evaluated);

        let order: Vec<&ResourceRef> = report.statuses().iter().map(|s| &s.resource).collect();
        assert_eq!(order, vec![&a, &b]);
        let status = report.resource_status(&a).unwrap();
        assert!(status.changed);
        assert!(status.scheduled);
    }

    #[test]
    fn test_outcome() {
        let mut report = Report::new(false);
        assert_eq!(report.outcome(), RunOutcome::Unchanged);

        report.resource_status_mut(&ResourceRef::new("notify", "a")).changed = true;
        assert_eq!(report.outcome(), RunOutcome::Changed);

        report
            .resource_status_mut(&ResourceRef::new("notify", "b"))
            .failed_to_restart = true;
        assert_eq!(report.outcome(), RunOutcome::Failed);
        assert_eq!(report.summary().failed_to_restart, 1);
        assert!(!report.summary().is_success());
    }

    #[test]
    fn test_retain_statuses_rebuilds_index() {
        let mut report = Report::new(false);
        report.resource_status_mut(&ResourceRef::new("whit", "completed_x"));
        report.resource_status_mut(&ResourceRef::new("notify", "a"));
        report.retain_statuses(|s| s.resource.type_name != "whit");
        assert_eq!(report.statuses().len(), 1);
        assert!(
            report
                .resource_status(&ResourceRef::new("notify", "a"))
                .is_some()
        );
    }
}
