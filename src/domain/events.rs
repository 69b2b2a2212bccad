//! Inbound event types.
//!
//! An event is the immutable input to a pipeline run. The request boundary
//! hands over an [`EventRequest`] and the orchestrator validates it.

use serde::{Deserialize, Serialize};

/// A named event accepted over the request boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event name; the seed payload of the chain
    pub name: String,
}

impl Event {
    /// Create an event with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Whether the event can start a run
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Wire shape of an inbound request: `{"eventName": "..."}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    /// Missing and empty names are both rejected by the orchestrator
    #[serde(default)]
    pub event_name: Option<String>,
}

impl EventRequest {
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: Some(event_name.into()),
        }
    }

    /// Convert into an event; a missing name becomes an empty one
    pub fn into_event(self) -> Event {
        Event::new(self.event_name.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_validity() {
        assert!(Event::new("go").is_valid());
        assert!(Event::new(" ").is_valid());
        assert!(!Event::new("").is_valid());
    }

    #[test]
    fn test_request_parsing() {
        let req: EventRequest = serde_json::from_str(r#"{"eventName":"deploy"}"#).unwrap();
        assert_eq!(req.into_event(), Event::new("deploy"));

        let missing: EventRequest = serde_json::from_str("{}").unwrap();
        assert!(!missing.into_event().is_valid());
    }
}
