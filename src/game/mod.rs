//! Game simulation modules

pub mod collision;
pub mod r#match;
pub mod obstacle;
pub mod pattern;
pub mod physics;
pub mod player;
pub mod rng;
pub mod snapshot;

pub use r#match::{GameMatch, MatchPhase};
pub use physics::PhysicsEngine;
pub use player::Player;

use crate::ws::protocol::InputAction;

/// One validated-at-the-edge player input, identity supplied by the
/// session rather than the payload
#[derive(Debug, Clone, Copy)]
pub struct PlayerInput {
    pub seq: u32,
    pub action: InputAction,
    pub timestamp: u64,
}
