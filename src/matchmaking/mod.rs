//! Match registry and orchestration

pub mod manager;

pub use manager::{MatchHandle, MatchManager, SettlementJob};
