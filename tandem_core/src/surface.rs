//! Rendering collaborator interface.
//!
//! The scene engine is external. The core only needs to add, move and remove
//! entities, and to poll which keys are currently held.

use serde::{Deserialize, Serialize};
use tandem_env::ParticipantId;

use crate::controller::Key;

/// Which side owns an entity.
///
/// Local entities are written here and replicated out; remote entities are
/// written only by replication and interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Local,
    Remote,
}

/// Level-triggered input query: true for every tick a key stays pressed.
pub trait InputState {
    fn is_held(&self, key: Key) -> bool;
}

/// The scene a session draws into.
pub trait RenderSurface: InputState {
    fn add_entity(&mut self, id: &ParticipantId, kind: EntityKind, x: f64, y: f64);

    fn remove_entity(&mut self, id: &ParticipantId);

    fn place_entity(&mut self, id: &ParticipantId, x: f64, y: f64);

    /// Starts delivering input. Called when a session takes the surface.
    fn attach_input(&mut self) {}

    /// Stops delivering input to the session. Called once on teardown.
    fn detach_input(&mut self) {}
}
