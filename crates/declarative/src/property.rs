//! Property table for resources
//!
//! A resource manages an ordered set of named properties. Each property
//! carries an optional desired value and a handler that knows how to compare
//! and apply it. The table is built once when the resource is constructed
//! and looked up by name afterwards.

use crate::types::{Value, format_value};
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Current values of a resource, keyed by property name
pub type PropertyValues = BTreeMap<String, Value>;

/// Name of the property that controls whether a resource exists
pub const ENSURE: &str = "ensure";

/// Knows how to compare and apply one property of one resource
pub trait PropertyHandler: Send + Sync + fmt::Debug {
    /// Whether the current value already satisfies the desired value
    fn insync(&self, is: &Value, should: &Value) -> bool {
        is == should
    }

    /// Bring the property to the desired value
    fn sync(&self, should: &Value) -> Result<()>;

    /// Log message describing a successful change
    fn change_message(&self, property: &str, is: &Value, should: &Value) -> String {
        default_change_message(property, is, should)
    }

    /// The form of a value kept in the store between runs
    ///
    /// Audit comparisons and corrective-change checks compare these forms,
    /// so a handler can keep a digest in place of a large value.
    fn recorded_value(&self, value: &Value) -> Value {
        value.clone()
    }
}

/// Default wording for a successful property change
pub fn default_change_message(property: &str, is: &Value, should: &Value) -> String {
    if crate::types::is_absent(is) {
        format!("defined '{}' as {}", property, format_value(should))
    } else if crate::types::is_absent(should) {
        format!("undefined '{}' from {}", property, format_value(is))
    } else {
        format!(
            "{} changed {} to {}",
            property,
            format_value(is),
            format_value(should)
        )
    }
}

/// A named property with its desired value and handler
#[derive(Debug, Clone)]
pub struct Property {
    name: String,
    should: Option<Value>,
    handler: Arc<dyn PropertyHandler>,
}

impl Property {
    /// A managed property with a desired value
    pub fn managed(
        name: impl Into<String>,
        should: Value,
        handler: Arc<dyn PropertyHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            should: Some(should),
            handler,
        }
    }

    /// A property that is known but has no desired value (audit only)
    pub fn unmanaged(name: impl Into<String>, handler: Arc<dyn PropertyHandler>) -> Self {
        Self {
            name: name.into(),
            should: None,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn should(&self) -> Option<&Value> {
        self.should.as_ref()
    }

    pub fn handler(&self) -> &dyn PropertyHandler {
        self.handler.as_ref()
    }

    /// Whether `is` satisfies the desired value; unmanaged properties always do
    pub fn insync(&self, is: &Value) -> bool {
        match &self.should {
            Some(should) => self.handler.insync(is, should),
            None => true,
        }
    }
}

/// Ordered, name-indexed collection of properties
#[derive(Debug, Clone, Default)]
pub struct PropertyTable {
    entries: Vec<Property>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a property, keeping the original position on replace
    pub fn insert(&mut self, property: Property) {
        match self.entries.iter_mut().find(|p| p.name == property.name) {
            Some(existing) => *existing = property,
            None => self.entries.push(property),
        }
    }

    /// Builder form of [`PropertyTable::insert`]
    pub fn with(mut self, property: Property) -> Self {
        self.insert(property);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.entries.iter().find(|p| p.name == name)
    }

    /// The `ensure` property, if it has a desired value
    pub fn ensure(&self) -> Option<&Property> {
        self.get(ENSURE).filter(|p| p.should.is_some())
    }

    /// Properties with a desired value, in declaration order
    pub fn managed(&self) -> impl Iterator<Item = &Property> {
        self.entries.iter().filter(|p| p.should.is_some())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Noop;

    impl PropertyHandler for Noop {
        fn sync(&self, _should: &Value) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_insert_keeps_declaration_order() {
        let handler: Arc<dyn PropertyHandler> = Arc::new(Noop);
        let mut table = PropertyTable::new()
            .with(Property::managed("mode", json!("0644"), handler.clone()))
            .with(Property::managed("owner", json!("root"), handler.clone()));
        table.insert(Property::managed("mode", json!("0600"), handler));

        assert_eq!(table.names(), vec!["mode", "owner"]);
        assert_eq!(table.get("mode").unwrap().should(), Some(&json!("0600")));
    }

    #[test]
    fn test_unmanaged_properties_are_always_insync() {
        let table = PropertyTable::new().with(Property::unmanaged("content", Arc::new(Noop)));
        let prop = table.get("content").unwrap();
        assert!(prop.insync(&json!("anything")));
        assert_eq!(table.managed().count(), 0);
        assert!(table.ensure().is_none());
    }

    #[test]
    fn test_change_messages() {
        assert_eq!(
            default_change_message("content", &json!("absent"), &json!("hi")),
            "defined 'content' as 'hi'"
        );
        assert_eq!(
            default_change_message("mode", &json!("0644"), &json!("0600")),
            "mode changed '0644' to '0600'"
        );
    }
}
