//! Common types shared between the replication core and presence transports.

use crate::error::RecordError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Unique identifier for a participant (one connected client session).
///
/// Opaque to everything but equality; generated locally at session start
/// and never reused within a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wraps an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The unit of replication: where a participant claims to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    /// Originating participant
    pub id: ParticipantId,
    pub x: f64,
    pub y: f64,
}

impl PositionState {
    /// Creates a new position state.
    pub fn new(id: ParticipantId, x: f64, y: f64) -> Self {
        Self { id, x, y }
    }

    /// Euclidean distance to another state's coordinates.
    pub fn distance_to(&self, other: &PositionState) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// A raw presence payload as delivered by the transport.
///
/// Transports attach their own metadata (e.g. `presence_ref`), so records
/// are kept as an open JSON object and only read as a [`PositionState`]
/// when merged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresenceRecord(pub Map<String, Value>);

impl PresenceRecord {
    /// Builds the record announced for a position.
    pub fn from_state(state: &PositionState) -> Self {
        let mut map = Map::new();
        map.insert("id".to_string(), Value::from(state.id.as_str()));
        map.insert("x".to_string(), Value::from(state.x));
        map.insert("y".to_string(), Value::from(state.y));
        Self(map)
    }

    /// Adds or replaces a metadata field.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Returns the record's `id` field if it is a non-empty string.
    pub fn id(&self) -> Option<&str> {
        self.0
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Reads the record as a position. Extra fields are ignored.
    pub fn to_state(&self) -> Result<PositionState, RecordError> {
        let id = self.id().ok_or(RecordError::MissingId)?;
        let x = self.coordinate("x")?;
        let y = self.coordinate("y")?;
        Ok(PositionState::new(ParticipantId::new(id), x, y))
    }

    fn coordinate(&self, key: &'static str) -> Result<f64, RecordError> {
        self.0
            .get(key)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
            .ok_or(RecordError::BadCoordinate(key))
    }
}

impl From<&PositionState> for PresenceRecord {
    fn from(state: &PositionState) -> Self {
        Self::from_state(state)
    }
}

/// Full point-in-time presence view: presence key -> records.
///
/// A key may carry several records when the transport still remembers a
/// stale one; the first record is the current one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresenceSnapshot(pub BTreeMap<String, Vec<PresenceRecord>>);

impl PresenceSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record under a presence key.
    pub fn push(&mut self, key: impl Into<String>, record: PresenceRecord) {
        self.0.entry(key.into()).or_default().push(record);
    }

    /// Builder form of [`push`](Self::push).
    pub fn with(mut self, key: impl Into<String>, record: PresenceRecord) -> Self {
        self.push(key, record);
        self
    }

    /// Iterates the first record of each key, in key order.
    pub fn first_records(&self) -> impl Iterator<Item = (&str, &PresenceRecord)> {
        self.0
            .iter()
            .filter_map(|(key, records)| records.first().map(|r| (key.as_str(), r)))
    }

    /// Number of presence keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Presence events in the transport's taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// Periodic full reconciliation
    Sync(PresenceSnapshot),
    /// Incremental hint: these records appeared
    Join(Vec<PresenceRecord>),
    /// Incremental hint: these records went away
    Leave(Vec<PresenceRecord>),
}

impl PresenceEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            PresenceEvent::Sync(_) => "sync",
            PresenceEvent::Join(_) => "join",
            PresenceEvent::Leave(_) => "leave",
        }
    }
}

/// Outcome of a subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscribeStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

impl SubscribeStatus {
    pub fn is_subscribed(&self) -> bool {
        matches!(self, SubscribeStatus::Subscribed)
    }
}

impl std::fmt::Display for SubscribeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubscribeStatus::Subscribed => "SUBSCRIBED",
            SubscribeStatus::ChannelError => "CHANNEL_ERROR",
            SubscribeStatus::TimedOut => "TIMED_OUT",
            SubscribeStatus::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> PresenceRecord {
        match value {
            Value::Object(map) => PresenceRecord(map),
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_record_to_state_ignores_metadata() {
        let rec = record(json!({ "id": "p1", "x": 10.0, "y": -4, "presence_ref": "abc" }));
        let state = rec.to_state().unwrap();

        assert_eq!(state.id.as_str(), "p1");
        assert_eq!(state.x, 10.0);
        assert_eq!(state.y, -4.0);
    }

    #[test]
    fn test_record_rejects_missing_fields() {
        assert_eq!(
            record(json!({ "x": 1, "y": 2 })).to_state(),
            Err(RecordError::MissingId)
        );
        assert_eq!(
            record(json!({ "id": "", "x": 1, "y": 2 })).to_state(),
            Err(RecordError::MissingId)
        );
        assert_eq!(
            record(json!({ "id": "p1", "y": 2 })).to_state(),
            Err(RecordError::BadCoordinate("x"))
        );
        assert_eq!(
            record(json!({ "id": "p1", "x": 1, "y": "2" })).to_state(),
            Err(RecordError::BadCoordinate("y"))
        );
    }

    #[test]
    fn test_record_from_state_reads_back() {
        let state = PositionState::new(ParticipantId::from("player_a"), 400.0, 300.0);
        let rec = PresenceRecord::from_state(&state).with_field("presence_ref", "r1");

        assert_eq!(rec.to_state().unwrap(), state);
    }

    #[test]
    fn test_snapshot_first_records() {
        let a = PositionState::new("a".into(), 1.0, 1.0);
        let stale = PositionState::new("a".into(), 0.0, 0.0);
        let snapshot = PresenceSnapshot::new()
            .with("key-a", PresenceRecord::from_state(&a))
            .with("key-a", PresenceRecord::from_state(&stale))
            .with("key-empty", PresenceRecord::default());

        let firsts: Vec<_> = snapshot.first_records().collect();
        assert_eq!(firsts.len(), 2);
        assert_eq!(firsts[0].1.to_state().unwrap(), a);
        assert!(firsts[1].1.to_state().is_err());
    }

    #[test]
    fn test_snapshot_deserializes_from_transport_json() {
        let raw = json!({
            "ref-1": [{ "id": "B", "x": 20, "y": 10 }],
            "ref-2": []
        });
        let snapshot: PresenceSnapshot = serde_json::from_value(raw).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.first_records().count(), 1);
    }

    #[test]
    fn test_participant_id_display() {
        let id = ParticipantId::new("player_k3j9x0a1b");
        assert_eq!(id.to_string(), "player_k3j9x0a1b");
    }
}
