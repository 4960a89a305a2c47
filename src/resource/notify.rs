//! Notify resource - logs a message on every run

use anyhow::Result;
use declarative::property::{PropertyHandler, PropertyTable, PropertyValues};
use declarative::{Event, Property, Relationship, Resource, ResourceRef, Schedule, Value};
use log::info;
use std::sync::Arc;

use super::Common;

pub const MESSAGE: &str = "message";

/// A message that is "applied" by logging it
///
/// The message is never recorded as current, so the resource is out of
/// sync on every run and notifies its subscribers each time.
#[derive(Debug)]
pub struct Notify {
    reference: ResourceRef,
    common: Common,
    table: PropertyTable,
}

#[derive(Debug)]
struct MessageHandler {
    reference: ResourceRef,
}

impl PropertyHandler for MessageHandler {
    fn insync(&self, _is: &Value, _should: &Value) -> bool {
        false
    }

    fn sync(&self, should: &Value) -> Result<()> {
        let message = should
            .as_str()
            .map_or_else(|| should.to_string(), ToString::to_string);
        info!("{}: {message}", self.reference);
        Ok(())
    }
}

impl Notify {
    /// A notify whose message defaults to its title
    pub fn new(title: &str, message: Option<String>, common: Common) -> Self {
        let reference = ResourceRef::new("notify", title);
        let handler = Arc::new(MessageHandler {
            reference: reference.clone(),
        });
        let message = message.unwrap_or_else(|| title.to_string());
        let table =
            PropertyTable::new().with(Property::managed(MESSAGE, Value::String(message), handler));
        Self {
            reference,
            common,
            table,
        }
    }
}

impl Resource for Notify {
    fn resource_ref(&self) -> ResourceRef {
        self.reference.clone()
    }

    fn name(&self) -> Option<String> {
        self.common.distinct_name(&self.reference)
    }

    fn properties(&self) -> &PropertyTable {
        &self.table
    }

    fn audited(&self) -> Vec<String> {
        self.common.audit.clone()
    }

    fn retrieve(&self) -> Result<PropertyValues> {
        Ok(PropertyValues::from([(MESSAGE.to_string(), Value::Null)]))
    }

    fn relationships(&self) -> Vec<Relationship> {
        self.common.relationships.clone()
    }

    fn tags(&self) -> Vec<String> {
        self.common.tags.clone()
    }

    fn noop(&self) -> bool {
        self.common.noop
    }

    fn schedule(&self) -> Option<Schedule> {
        self.common.schedule
    }

    fn responds_to(&self, callback: &str) -> bool {
        callback == "refresh"
    }

    fn callback(&self, name: &str, events: &[Event]) -> Result<()> {
        info!(
            "{}: Received {name} from {} event(s)",
            self.reference,
            events.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{Catalog, EventStatus, RunOptions, execute_simple};

    #[test]
    fn test_notify_is_always_out_of_sync() {
        let mut catalog = Catalog::new();
        catalog
            .add_resource(Arc::new(Notify::new("hello", None, Common::default())))
            .unwrap();

        for _ in 0..2 {
            let report = execute_simple(&mut catalog, RunOptions::default()).unwrap();
            let status = &report.statuses()[0];
            assert!(status.changed);
            assert_eq!(status.events[0].status, EventStatus::Success);
            assert_eq!(status.events[0].message, "defined 'message' as 'hello'");
        }
    }

    #[test]
    fn test_explicit_message() {
        let notify = Notify::new("greeting", Some("hi there".into()), Common::default());
        let property = notify.properties().get(MESSAGE).unwrap();
        assert_eq!(property.should(), Some(&Value::String("hi there".into())));
        assert!(notify.responds_to("refresh"));
        assert!(!notify.responds_to("restart"));
    }
}
