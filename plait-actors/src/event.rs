//! Events and actor identity

use serde::{Deserialize, Serialize};

/// Identifier of an actor; assigned sequentially at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u64);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor({})", self.0)
    }
}

/// An immutable message between actors
///
/// Events are matched by `name`; the payload is free-form JSON in the
/// style of workflow variable maps. The optional group id correlates
/// events belonging to one logical exchange, and `sender` records the
/// producing actor for traces and reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type name used for matching, defer, and ignore sets
    pub name: String,
    /// Free-form payload
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Correlation group, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u64>,
    /// Producing actor, if sent from one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<ActorId>,
}

impl Event {
    /// An event with an empty payload
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: serde_json::Value::Null,
            group: None,
            sender: None,
        }
    }

    /// An event carrying a payload
    pub fn with_payload(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            group: None,
            sender: None,
        }
    }

    /// Attach a correlation group id
    pub fn in_group(mut self, group: u64) -> Self {
        self.group = Some(group);
        self
    }

    /// Record the sending actor
    pub fn from_sender(mut self, sender: ActorId) -> Self {
        self.sender = Some(sender);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builders() {
        let event = Event::with_payload("work", serde_json::json!({"items": 3}))
            .in_group(7)
            .from_sender(ActorId(2));
        assert_eq!(event.name, "work");
        assert_eq!(event.group, Some(7));
        assert_eq!(event.sender, Some(ActorId(2)));
        assert_eq!(event.payload["items"], 3);
    }

    #[test]
    fn test_event_serde_skips_empty_metadata() {
        let json = serde_json::to_string(&Event::new("ping")).unwrap();
        assert!(!json.contains("group"));
        assert!(!json.contains("sender"));
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Event::new("ping"));
    }
}
