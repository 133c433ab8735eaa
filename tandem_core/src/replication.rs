//! The REPLICATION Engine - merges presence events into remote entity state.
//!
//! Merge rule, applied per record:
//! - `sync`:  create-if-absent, otherwise retarget
//! - `join`:  create-if-absent
//! - `leave`: remove-if-present
//!
//! Records naming the local participant are never merged (self-exclusion),
//! and malformed records are skipped. With this rule the final entity set
//! does not depend on how `sync`, `join` and `leave` interleave.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tandem_env::{ParticipantId, PositionState, PresenceEvent, PresenceRecord, PresenceSnapshot};
use tracing::debug;

// ============================================================================
// REMOTE ENTITY
// ============================================================================

/// Last known state of another participant.
///
/// `target` is written by the engine, `current` only by the interpolator.
/// Both always carry the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    current: PositionState,
    target: PositionState,
}

impl RemoteEntity {
    fn spawn(state: PositionState) -> Self {
        Self {
            current: state.clone(),
            target: state,
        }
    }

    pub fn id(&self) -> &ParticipantId {
        &self.target.id
    }

    /// Where the entity is drawn.
    pub fn current(&self) -> &PositionState {
        &self.current
    }

    /// Where the entity last announced it was.
    pub fn target(&self) -> &PositionState {
        &self.target
    }

    /// Distance still to cover.
    pub fn remaining(&self) -> f64 {
        self.current.distance_to(&self.target)
    }

    fn retarget(&mut self, state: PositionState) {
        debug_assert_eq!(state.id, self.target.id);
        self.target = state;
    }

    /// Moves `current` to the given coordinates. Interpolator only.
    pub(crate) fn set_current(&mut self, x: f64, y: f64) {
        self.current.x = x;
        self.current.y = y;
    }
}

/// Owned copy of one remote entity for rendering and export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteView {
    pub id: ParticipantId,
    pub current: [f64; 2],
    pub target: [f64; 2],
}

impl From<&RemoteEntity> for RemoteView {
    fn from(entity: &RemoteEntity) -> Self {
        Self {
            id: entity.id().clone(),
            current: [entity.current.x, entity.current.y],
            target: [entity.target.x, entity.target.y],
        }
    }
}

// ============================================================================
// MERGE OUTCOME
// ============================================================================

/// What one handler invocation changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Entities created, in merge order
    pub created: Vec<ParticipantId>,
    /// Existing entities whose target was replaced
    pub updated: usize,
    /// Entities removed
    pub removed: Vec<ParticipantId>,
    /// Malformed records ignored
    pub skipped: usize,
}

impl MergeOutcome {
    /// True if the entity set or any target changed.
    pub fn changed(&self) -> bool {
        !self.created.is_empty() || self.updated > 0 || !self.removed.is_empty()
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Owns the participant id -> remote entity mapping for one session.
#[derive(Debug, Clone)]
pub struct ReplicationEngine {
    local_id: ParticipantId,
    entities: BTreeMap<ParticipantId, RemoteEntity>,
}

impl ReplicationEngine {
    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            entities: BTreeMap::new(),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Dispatches a transport event to the matching handler.
    pub fn apply(&mut self, event: &PresenceEvent) -> MergeOutcome {
        let outcome = match event {
            PresenceEvent::Sync(snapshot) => self.on_sync(snapshot),
            PresenceEvent::Join(records) => self.on_join(records),
            PresenceEvent::Leave(records) => self.on_leave(records),
        };
        debug!(
            event = event.kind(),
            created = outcome.created.len(),
            updated = outcome.updated,
            removed = outcome.removed.len(),
            skipped = outcome.skipped,
            "presence merged"
        );
        outcome
    }

    /// Full reconciliation. Idempotent.
    pub fn on_sync(&mut self, snapshot: &PresenceSnapshot) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for (_key, record) in snapshot.first_records() {
            let Some(state) = self.foreign_state(record, &mut outcome) else {
                continue;
            };
            match self.entities.get_mut(&state.id) {
                Some(entity) => {
                    if entity.target != state {
                        entity.retarget(state);
                        outcome.updated += 1;
                    }
                }
                None => {
                    outcome.created.push(state.id.clone());
                    self.entities.insert(state.id.clone(), RemoteEntity::spawn(state));
                }
            }
        }
        outcome
    }

    /// Incremental hint that participants appeared. No-op for tracked ids.
    pub fn on_join(&mut self, records: &[PresenceRecord]) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for record in records {
            let Some(state) = self.foreign_state(record, &mut outcome) else {
                continue;
            };
            if !self.entities.contains_key(&state.id) {
                outcome.created.push(state.id.clone());
                self.entities.insert(state.id.clone(), RemoteEntity::spawn(state));
            }
        }
        outcome
    }

    /// Incremental hint that participants went away. Unknown ids are ignored.
    pub fn on_leave(&mut self, records: &[PresenceRecord]) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for record in records {
            // Only the id matters for removal
            let Some(id) = record.id() else {
                outcome.skipped += 1;
                continue;
            };
            if id == self.local_id.as_str() {
                continue;
            }
            let id = ParticipantId::new(id);
            if self.entities.remove(&id).is_some() {
                outcome.removed.push(id);
            }
        }
        outcome
    }

    /// Reads a record, filtering out malformed and self records.
    fn foreign_state(
        &self,
        record: &PresenceRecord,
        outcome: &mut MergeOutcome,
    ) -> Option<PositionState> {
        match record.to_state() {
            Ok(state) if state.id == self.local_id => None,
            Ok(state) => Some(state),
            Err(e) => {
                debug!(error = %e, "skipping malformed presence record");
                outcome.skipped += 1;
                None
            }
        }
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&RemoteEntity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.entities.contains_key(id)
    }

    /// Iterates entities in id order.
    pub fn entities(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.entities.values()
    }

    pub(crate) fn entities_mut(&mut self) -> impl Iterator<Item = &mut RemoteEntity> {
        self.entities.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Owned copy of every entity, in id order.
    pub fn snapshot(&self) -> Vec<RemoteView> {
        self.entities.values().map(RemoteView::from).collect()
    }

    /// Drops all remote state, returning the ids that were tracked.
    pub fn clear(&mut self) -> Vec<ParticipantId> {
        std::mem::take(&mut self.entities).into_keys().collect()
    }
}
