//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::game::obstacle::ObstacleKind;
use crate::game::player::PlayerPhase;

/// Player actions for a single input message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputAction {
    Jump,
    Duck,
    Unduck,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Platform session token; must be the first message on the socket
    /// when not supplied at upgrade time
    Authenticate { token: String },

    /// Declare readiness in the lobby
    Ready,

    /// Player input for the current tick
    Input {
        /// Strictly increasing per player; stale values are dropped
        seq: u32,
        action: InputAction,
        /// Client wall clock, ms; drift outside the accepted window is
        /// treated as tampering
        timestamp: u64,
    },

    /// Ping for latency measurement
    Ping { t: u64 },

    /// Leave the current match
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { player_id: Uuid, server_time: u64 },

    /// Confirmation of match join
    MatchJoined {
        match_id: Uuid,
        player_id: Uuid,
        /// Published before start; the seed itself is revealed only in the
        /// post-match audit trail
        seed_commitment: String,
        players: Vec<PlayerInfo>,
    },

    /// Player joined the match
    PlayerJoined { player: PlayerInfo },

    /// Player left the match
    PlayerLeft { player_id: Uuid, reason: String },

    /// Emitted once, at match start
    MatchStarting {
        match_id: Uuid,
        start_time: u64,
        config: GameConfig,
        seed_commitment: String,
    },

    /// Authoritative state snapshot (sent at regular intervals)
    GameUpdate { snapshot: MatchSnapshot },

    /// Emitted once per match after it finishes
    MatchEnded { result: MatchResult },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong { t: u64 },
}

/// Player info for lobby/join
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: Uuid,
    pub display_name: String,
    pub phase: PlayerPhase,
    pub stake: f64,
    pub currency: String,
}

/// Serializable view of a match, pushed at the snapshot cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub timestamp: u64,
    pub tick: u64,
    pub players: Vec<PlayerSnapshot>,
    pub obstacles: Vec<ObstacleSnapshot>,
}

/// Player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_id: Uuid,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub grounded: bool,
    pub ducking: bool,
    pub phase: PlayerPhase,
    pub score: f64,
    pub last_input_seq: u32,
}

/// Obstacle state in a snapshot. Uses the same closed kind set as the
/// simulation; there is no separate snapshot vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstacleSnapshot {
    pub id: u64,
    pub kind: ObstacleKind,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Final settlement-ready result of a finished match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_id: Uuid,
    pub winner_id: Option<Uuid>,
    pub standings: Vec<PlayerResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerResult {
    pub player_id: Uuid,
    pub score: f64,
    pub ranking: u32,
    pub winnings: f64,
}

/// One audited state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tick: u64,
    pub event: String,
    pub data: serde_json::Value,
}

/// The verifiable post-match record: seed revealed, commitment published
/// pre-start, and the full ordered event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditTrail {
    pub match_id: Uuid,
    pub seed: u32,
    pub seed_commitment: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Entries discarded once the bounded log filled
    pub dropped_events: u64,
    pub events: Vec<AuditEntry>,
}
