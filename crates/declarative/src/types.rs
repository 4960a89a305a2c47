//! Core types for declarative resource management

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A property value, current or desired
///
/// Values are JSON-shaped so they can be persisted in the state store
/// without a per-type schema.
pub type Value = serde_json::Value;

/// Stable identity of a resource: its type plus its title
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Type name, lowercase (`file`, `notify`, `foo::bar`)
    pub type_name: String,
    /// Title, unique within the type
    pub title: String,
}

impl ResourceRef {
    /// Create a reference, normalizing the type name to lowercase
    pub fn new(type_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into().to_lowercase(),
            title: title.into(),
        }
    }

    /// The same type with a different title (used for aliases)
    pub fn with_title(&self, title: impl Into<String>) -> Self {
        Self {
            type_name: self.type_name.clone(),
            title: title.into(),
        }
    }

    /// Type name as rendered in references: each `::` segment capitalized
    pub fn display_type(&self) -> String {
        self.type_name
            .split("::")
            .map(|segment| {
                let mut chars = segment.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join("::")
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.display_type(), self.title)
    }
}

impl FromStr for ResourceRef {
    type Err = String;

    /// Parse `Type[title]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let open = s
            .find('[')
            .ok_or_else(|| format!("invalid resource reference '{s}': expected Type[title]"))?;
        if !s.ends_with(']') || open == 0 {
            return Err(format!(
                "invalid resource reference '{s}': expected Type[title]"
            ));
        }
        let type_name = &s[..open];
        let title = &s[open + 1..s.len() - 1];
        let title = title.trim_matches(|c| c == '\'' || c == '"');
        if title.is_empty() {
            return Err(format!("invalid resource reference '{s}': empty title"));
        }
        Ok(Self::new(type_name, title))
    }
}

/// Outcome of a single property evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// A change was needed but not made (noop mode)
    Noop,
    /// A change was made
    Success,
    /// A change was attempted and failed
    Failure,
    /// An audited value changed outside of our management
    Audit,
}

impl EventStatus {
    /// Lowercase label used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Audit => "audit",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the event emitted by a resource after its refresh callbacks ran
pub const RESTARTED: &str = "restarted";
/// Name of the event emitted when refresh callbacks were only simulated
pub const NOOP_RESTART: &str = "noop_restart";

/// An immutable record of one outcome on one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name (`content_changed`, `file_created`, `restarted`, ...)
    pub name: String,
    /// Resource the event happened on
    pub resource: ResourceRef,
    /// Property the event concerns, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Value observed before the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<Value>,
    /// Value the property should have
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_value: Option<Value>,
    /// Value recorded by a previous run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_value: Option<Value>,
    /// Outcome
    pub status: EventStatus,
    /// Human-readable description
    pub message: String,
    /// When the event was created
    pub time: DateTime<Utc>,
    /// The value had drifted away from what a previous run left behind
    #[serde(default)]
    pub corrective_change: bool,
    /// Processing this event cancels refreshes already queued for its resource
    #[serde(default)]
    pub invalidate_refreshes: bool,
    /// The property is audited
    #[serde(default)]
    pub audited: bool,
}

impl Event {
    /// Create an event with the given name and status and no values
    pub fn new(resource: ResourceRef, name: impl Into<String>, status: EventStatus) -> Self {
        Self {
            name: name.into(),
            resource,
            property: None,
            previous_value: None,
            desired_value: None,
            historical_value: None,
            status,
            message: String::new(),
            time: Utc::now(),
            corrective_change: false,
            invalidate_refreshes: false,
            audited: false,
        }
    }

    /// Set the message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Mark this event as cancelling pending refreshes of its resource
    pub fn invalidating_refreshes(mut self) -> Self {
        self.invalidate_refreshes = true;
        self
    }

    /// Whether this event represents a real (non-simulated) outcome
    pub fn is_noop(&self) -> bool {
        self.status == EventStatus::Noop
    }
}

/// A pending mutation of one property
///
/// Changes live only for the duration of a single sync: they are applied,
/// logged, and turned into an [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Property being changed
    pub property: String,
    /// Current value
    pub is: Value,
    /// Desired value
    pub should: Value,
}

impl Change {
    /// Create a change
    pub fn new(property: impl Into<String>, is: Value, should: Value) -> Self {
        Self {
            property: property.into(),
            is,
            should,
        }
    }

    /// Event name for this change on a resource of the given type
    ///
    /// `ensure` changes are named after the type and the transition
    /// (`file_created`, `file_removed`); everything else is
    /// `<property>_changed`.
    pub fn event_name(&self, type_name: &str) -> String {
        let type_name = type_name.replace("::", "_");
        if self.property == "ensure" {
            if is_absent(&self.is) {
                format!("{type_name}_created")
            } else if is_absent(&self.should) {
                format!("{type_name}_removed")
            } else {
                format!("{type_name}_changed")
            }
        } else {
            format!("{}_changed", self.property)
        }
    }

    /// Build the event describing this change
    pub fn into_event(
        self,
        resource: ResourceRef,
        historical_value: Option<Value>,
        status: EventStatus,
        message: String,
    ) -> Event {
        let name = self.event_name(&resource.type_name);
        let mut event = Event::new(resource, name, status).with_message(message);
        event.property = Some(self.property);
        event.previous_value = Some(self.is);
        event.desired_value = Some(self.should);
        event.historical_value = historical_value;
        event
    }
}

/// Whether a value means "does not exist"
pub fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s == "absent",
        _ => false,
    }
}

/// Render a value for log messages: strings bare, everything else as JSON
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        Value::Null => "absent".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ref_display_capitalizes_segments() {
        assert_eq!(ResourceRef::new("file", "/tmp/x").to_string(), "File[/tmp/x]");
        assert_eq!(
            ResourceRef::new("apache::vhost", "site").to_string(),
            "Apache::Vhost[site]"
        );
    }

    #[test]
    fn test_ref_parse() {
        let r: ResourceRef = "Notify[hello world]".parse().unwrap();
        assert_eq!(r, ResourceRef::new("notify", "hello world"));

        let quoted: ResourceRef = "File['/etc/motd']".parse().unwrap();
        assert_eq!(quoted.title, "/etc/motd");

        assert!("Notify".parse::<ResourceRef>().is_err());
        assert!("[x]".parse::<ResourceRef>().is_err());
        assert!("Notify[]".parse::<ResourceRef>().is_err());
    }

    #[test]
    fn test_event_names() {
        let created = Change::new("ensure", json!("absent"), json!("present"));
        assert_eq!(created.event_name("file"), "file_created");

        let removed = Change::new("ensure", json!("present"), json!("absent"));
        assert_eq!(removed.event_name("file"), "file_removed");

        let changed = Change::new("content", json!("a"), json!("b"));
        assert_eq!(changed.event_name("file"), "content_changed");
    }

    #[test]
    fn test_change_into_event_carries_values() {
        let change = Change::new("mode", json!("0644"), json!("0600"));
        let event = change.into_event(
            ResourceRef::new("file", "/tmp/x"),
            Some(json!("0640")),
            EventStatus::Success,
            "mode changed".into(),
        );
        assert_eq!(event.name, "mode_changed");
        assert_eq!(event.property.as_deref(), Some("mode"));
        assert_eq!(event.previous_value, Some(json!("0644")));
        assert_eq!(event.desired_value, Some(json!("0600")));
        assert_eq!(event.historical_value, Some(json!("0640")));
        assert!(!event.is_noop());
    }
}
