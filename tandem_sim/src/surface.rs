//! Headless render surface for simulated participants.

use std::collections::{BTreeMap, BTreeSet};
use tandem_core::{EntityKind, InputState, Key, RenderSurface};
use tandem_env::ParticipantId;

/// An entity as drawn on a [`HeadlessSurface`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneEntity {
    pub kind: EntityKind,
    pub x: f64,
    pub y: f64,
}

/// Records the scene instead of drawing it; input comes from [`set_held`](Self::set_held).
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    held: BTreeSet<Key>,
    entities: BTreeMap<ParticipantId, SceneEntity>,
    input_attached: bool,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the set of held keys.
    pub fn set_held(&mut self, keys: impl IntoIterator<Item = Key>) {
        self.held = keys.into_iter().collect();
    }

    pub fn entity(&self, id: &ParticipantId) -> Option<&SceneEntity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&ParticipantId, &SceneEntity)> {
        self.entities.iter()
    }

    pub fn remote_count(&self) -> usize {
        self.entities
            .values()
            .filter(|e| e.kind == EntityKind::Remote)
            .count()
    }

    pub fn input_attached(&self) -> bool {
        self.input_attached
    }
}

impl InputState for HeadlessSurface {
    fn is_held(&self, key: Key) -> bool {
        self.input_attached && self.held.contains(&key)
    }
}

impl RenderSurface for HeadlessSurface {
    fn add_entity(&mut self, id: &ParticipantId, kind: EntityKind, x: f64, y: f64) {
        self.entities.insert(id.clone(), SceneEntity { kind, x, y });
    }

    fn remove_entity(&mut self, id: &ParticipantId) {
        self.entities.remove(id);
    }

    fn place_entity(&mut self, id: &ParticipantId, x: f64, y: f64) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.x = x;
            entity.y = y;
        }
    }

    fn attach_input(&mut self) {
        self.input_attached = true;
    }

    fn detach_input(&mut self) {
        self.input_attached = false;
        self.held.clear();
    }
}
