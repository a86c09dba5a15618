//! Event record fields needed to render a message, extracted from the `evtx` JSON representation.
//!
//! Expected shape (attributes inlined under `#attributes`):
//!
//! ```json
//! {
//!   "Event": {
//!     "System": {
//!       "Provider": { "#attributes": { "Name": "...", "Guid": "{...}", "EventSourceName": "..." } },
//!       "EventID": { "#attributes": { "Qualifiers": 16384 }, "#text": 7036 }
//!     },
//!     "EventData": { "Data": [ ... ] }
//!   }
//! }
//! ```

use crate::template::RecordStrings;

use serde_json::Value;

const ATTRIBUTES: &str = "#attributes";
const TEXT: &str = "#text";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRecord {
    pub record_id: u64,
    pub written_time: String,
    pub provider_name: Option<String>,
    pub provider_guid: Option<String>,
    /// `EventSourceName`, or the provider name for classic event sources.
    pub event_source: Option<String>,
    pub event_identifier: u32,
    pub qualifiers: Option<u16>,
    pub strings: Vec<String>,
}

impl EventRecord {
    pub fn from_json(record_id: u64, written_time: impl Into<String>, event: &Value) -> Self {
        let event = event.get("Event").unwrap_or(event);
        let system = event.get("System");

        let provider = system
            .and_then(|s| s.get("Provider"))
            .and_then(|p| p.get(ATTRIBUTES));
        let provider_attribute = |name: &str| {
            provider
                .and_then(|attributes| attributes.get(name))
                .and_then(scalar_to_string)
                .filter(|s| !s.is_empty())
        };

        let provider_name = provider_attribute("Name");
        let provider_guid = provider_attribute("Guid");
        let event_source = provider_attribute("EventSourceName").or_else(|| provider_name.clone());

        let (event_identifier, qualifiers) = system
            .and_then(|s| s.get("EventID"))
            .map(parse_event_identifier)
            .unwrap_or_default();

        let mut strings = Vec::new();
        for section in ["EventData", "UserData"] {
            if let Some(data) = event.get(section) {
                collect_strings(data, &mut strings);
            }
        }

        EventRecord {
            record_id,
            written_time: written_time.into(),
            provider_name,
            provider_guid,
            event_source,
            event_identifier,
            qualifiers,
            strings,
        }
    }

    /// The identifier of the event's message in the message table.
    pub fn message_identifier(&self) -> u32 {
        message_identifier(self.event_identifier, self.qualifiers)
    }
}

impl RecordStrings for EventRecord {
    fn number_of_strings(&self) -> usize {
        self.strings.len()
    }

    fn string(&self, index: usize) -> Option<&str> {
        self.strings.get(index).map(String::as_str)
    }
}

/// `(qualifiers << 16) | event_identifier`
pub fn message_identifier(event_identifier: u32, qualifiers: Option<u16>) -> u32 {
    match qualifiers {
        Some(qualifiers) => (u32::from(qualifiers) << 16) | (event_identifier & 0xffff),
        None => event_identifier,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn value_to_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `EventID` is either a plain number or an element with a `Qualifiers` attribute.
fn parse_event_identifier(value: &Value) -> (u32, Option<u16>) {
    match value {
        Value::Object(map) => {
            let identifier = map.get(TEXT).and_then(value_to_u32).unwrap_or_default();
            let qualifiers = map
                .get(ATTRIBUTES)
                .and_then(|a| a.get("Qualifiers"))
                .and_then(value_to_u32)
                .and_then(|q| u16::try_from(q).ok());
            (identifier, qualifiers)
        }
        other => (value_to_u32(other).unwrap_or_default(), None),
    }
}

/// Collect the leaf values of an `EventData`/`UserData` element in document order.
///
/// Attributes and `Binary` payloads are not substitution strings.
fn collect_strings(value: &Value, strings: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (name, child) in map {
                if name == ATTRIBUTES || name == "Binary" {
                    continue;
                }
                collect_strings(child, strings);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_strings(item, strings);
            }
        }
        scalar => {
            if let Some(s) = scalar_to_string(scalar) {
                strings.push(s);
            }
        }
    }
}
