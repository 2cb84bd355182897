//! Optional capture of editing events for debugging and replay tooling.
//!
//! When enabled on a document, every insert, delete, integration, split and
//! marker registration records an [`Event`] carrying the operation kind plus
//! a snapshot of the block store and state vector at that moment. The
//! snapshots serialise to JSON, so a capture can be dumped and stepped
//! through offline. Capture is off by default and costs nothing while off.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::{BlockId, ClientId, Clock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Insert,
    Delete,
    Integrate,
    Split,
    Marker,
}

/// A block's wire-visible state at capture time. Neighbour links are
/// positional and omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub id: BlockId,
    pub content: String,
    pub is_deleted: bool,
    pub left_origin: BlockId,
    pub right_origin: BlockId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub state_vector: BTreeMap<ClientId, Clock>,
    pub blocks: BTreeMap<ClientId, Vec<BlockSnapshot>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture(
        &mut self,
        event_type: EventType,
        state_vector: BTreeMap<ClientId, Clock>,
        blocks: BTreeMap<ClientId, Vec<BlockSnapshot>>,
    ) {
        self.events.push(Event {
            event_type,
            state_vector,
            blocks,
        });
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&EventType::Insert).unwrap(), "\"insert\"");
        assert_eq!(serde_json::to_string(&EventType::Split).unwrap(), "\"split\"");
    }

    #[test]
    fn event_round_trips() {
        let mut log = EventLog::new();
        let mut sv = BTreeMap::new();
        sv.insert(1, 5);
        log.capture(EventType::Integrate, sv, BTreeMap::new());
        let json = serde_json::to_string(&log.events()[0]).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, EventType::Integrate);
        assert_eq!(back.state_vector.get(&1), Some(&5));
    }
}
