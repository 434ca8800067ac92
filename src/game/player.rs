//! Per-participant state: lifecycle, vertical physics, wager and
//! anti-cheat bookkeeping

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rolling-window input cap. Deterministic (driven by input timestamps),
/// unlike the governor limiter at the connection edge.
pub const INPUT_WINDOW_MS: u64 = 1_000;
pub const MAX_INPUTS_PER_WINDOW: usize = 12;

/// Player lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerPhase {
    /// Authenticated, in a match lobby
    Connected,
    /// Declared ready to start
    Ready,
    /// Running in a live match
    Playing,
    /// Hit an obstacle
    Eliminated,
    /// Socket dropped mid-match; state retained for reconnection
    Disconnected,
}

/// Wager attached to a player by the platform at session verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetData {
    pub stake: f64,
    pub currency: String,
}

/// Authoritative per-player state
#[derive(Debug, Clone)]
pub struct Player {
    pub id: Uuid,
    /// Owning socket/session; rebound on reconnect
    pub session_id: Uuid,
    pub display_name: String,
    pub phase: PlayerPhase,

    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub grounded: bool,
    pub ducking: bool,

    /// Monotonic non-decreasing while Playing
    pub score: f64,
    pub bet: BetData,

    // Anti-cheat bookkeeping
    pub last_input_seq: u32,
    input_window: VecDeque<u64>,
    pub last_jump_tick: Option<u64>,

    /// Minimum observed vertical clearance per unpassed obstacle id
    pub near_miss_margins: HashMap<u64, f32>,

    pub joined_at: u64,
}

impl Player {
    pub fn new(id: Uuid, session_id: Uuid, display_name: String, bet: BetData, joined_at: u64) -> Self {
        Self {
            id,
            session_id,
            display_name,
            phase: PlayerPhase::Connected,
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            grounded: true,
            ducking: false,
            score: 0.0,
            bet,
            last_input_seq: 0,
            input_window: VecDeque::new(),
            last_jump_tick: None,
            near_miss_margins: HashMap::new(),
            joined_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase == PlayerPhase::Playing
    }

    /// Connected -> Ready
    pub fn mark_ready(&mut self) -> bool {
        if self.phase == PlayerPhase::Connected {
            self.phase = PlayerPhase::Ready;
            true
        } else {
            false
        }
    }

    /// Reset into the live match at the configured spawn position
    pub fn set_playing(&mut self, spawn_x: f32, spawn_y: f32) {
        self.phase = PlayerPhase::Playing;
        self.x = spawn_x;
        self.y = spawn_y;
        self.vx = 0.0;
        self.vy = 0.0;
        self.grounded = true;
        self.ducking = false;
        self.last_jump_tick = None;
        self.near_miss_margins.clear();
    }

    pub fn eliminate(&mut self) {
        if self.phase == PlayerPhase::Playing {
            self.phase = PlayerPhase::Eliminated;
        }
    }

    /// Soft disconnect; everything else is retained for reconnection
    pub fn disconnect(&mut self) {
        self.phase = PlayerPhase::Disconnected;
    }

    /// Rebind the socket after a disconnect. Resumes Playing when the match
    /// is live, otherwise falls back to the lobby state.
    pub fn reconnect(&mut self, session_id: Uuid, match_in_progress: bool) {
        self.session_id = session_id;
        if self.phase == PlayerPhase::Disconnected {
            self.phase = if match_in_progress {
                PlayerPhase::Playing
            } else {
                PlayerPhase::Connected
            };
        }
    }

    /// Takes effect only when grounded and Playing; records the tick for
    /// the collision grace window.
    pub fn jump(&mut self, velocity: f32, tick: u64) -> bool {
        if self.phase != PlayerPhase::Playing || !self.grounded {
            return false;
        }
        self.vy = velocity;
        self.grounded = false;
        self.last_jump_tick = Some(tick);
        true
    }

    pub fn duck(&mut self) {
        if self.phase == PlayerPhase::Playing {
            self.ducking = true;
        }
    }

    pub fn unduck(&mut self) {
        self.ducking = false;
    }

    /// Integrate vertical physics for one timestep
    pub fn update_position(&mut self, dt: f32, gravity: f32) {
        if !self.grounded {
            self.vy -= gravity * dt;
        }
        self.x += self.vx * dt;
        self.y += self.vy * dt;

        if self.y <= 0.0 {
            self.y = 0.0;
            self.vy = 0.0;
            self.grounded = true;
        }
    }

    /// Admit or reject an input against the rolling window. Accepted
    /// inputs are recorded at `now_ms`.
    pub fn check_rate_limit(&mut self, now_ms: u64) -> bool {
        while let Some(&front) = self.input_window.front() {
            if front + INPUT_WINDOW_MS <= now_ms {
                self.input_window.pop_front();
            } else {
                break;
            }
        }
        if self.input_window.len() >= MAX_INPUTS_PER_WINDOW {
            return false;
        }
        self.input_window.push_back(now_ms);
        true
    }

    /// Continuous survival score
    pub fn add_time_score(&mut self, dt: f32, rate: f64) {
        if self.phase == PlayerPhase::Playing {
            self.score += rate * dt as f64;
        }
    }

    /// Fixed increment on an obstacle-pass event
    pub fn add_pass_bonus(&mut self, bonus: f64) {
        if self.phase == PlayerPhase::Playing {
            self.score += bonus;
        }
    }

    /// Keep the smallest clearance seen for an obstacle
    pub fn record_near_miss_margin(&mut self, obstacle_id: u64, margin: f32) {
        let entry = self.near_miss_margins.entry(obstacle_id).or_insert(margin);
        if margin < *entry {
            *entry = margin;
        }
    }

    /// Remove and return the tracked minimum once the obstacle is passed
    pub fn take_near_miss_margin(&mut self, obstacle_id: u64) -> Option<f32> {
        self.near_miss_margins.remove(&obstacle_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Player {
        let mut p = Player::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "runner".to_string(),
            BetData { stake: 10.0, currency: "USD".to_string() },
            0,
        );
        p.set_playing(120.0, 0.0);
        p
    }

    #[test]
    fn jump_requires_grounded_and_playing() {
        let mut p = player();
        assert!(p.jump(950.0, 7));
        assert_eq!(p.last_jump_tick, Some(7));
        // Airborne now; a second jump is a no-op
        assert!(!p.jump(950.0, 8));
        assert_eq!(p.last_jump_tick, Some(7));

        let mut p = player();
        p.eliminate();
        assert!(!p.jump(950.0, 1));
    }

    #[test]
    fn gravity_brings_player_back_to_ground() {
        let mut p = player();
        p.jump(950.0, 1);

        let dt = 1.0 / 60.0;
        let mut airborne_ticks = 0;
        while !p.grounded && airborne_ticks < 600 {
            p.update_position(dt, 2800.0);
            airborne_ticks += 1;
        }

        assert!(p.grounded);
        assert_eq!(p.y, 0.0);
        assert_eq!(p.vy, 0.0);
        // ~0.68s of air time at these constants
        assert!(airborne_ticks > 30 && airborne_ticks < 60);
    }

    #[test]
    fn duck_only_while_playing() {
        let mut p = player();
        p.duck();
        assert!(p.ducking);
        p.unduck();
        assert!(!p.ducking);

        let mut p = player();
        p.eliminate();
        p.duck();
        assert!(!p.ducking);
    }

    #[test]
    fn rate_limit_caps_bursts_per_window() {
        let mut p = player();
        for i in 0..MAX_INPUTS_PER_WINDOW {
            assert!(p.check_rate_limit(1_000 + i as u64), "input {} rejected", i);
        }
        assert!(!p.check_rate_limit(1_020));
        // Window slides: the oldest entries expire
        assert!(p.check_rate_limit(2_000 + INPUT_WINDOW_MS));
    }

    #[test]
    fn score_only_accrues_while_playing() {
        let mut p = player();
        p.add_time_score(1.0, 10.0);
        p.add_pass_bonus(50.0);
        assert_eq!(p.score, 60.0);

        p.eliminate();
        p.add_time_score(1.0, 10.0);
        p.add_pass_bonus(50.0);
        assert_eq!(p.score, 60.0);
    }

    #[test]
    fn reconnect_resumes_playing_mid_match() {
        let mut p = player();
        p.score = 123.0;
        p.disconnect();
        assert_eq!(p.phase, PlayerPhase::Disconnected);

        let new_session = Uuid::new_v4();
        p.reconnect(new_session, true);
        assert_eq!(p.phase, PlayerPhase::Playing);
        assert_eq!(p.session_id, new_session);
        assert_eq!(p.score, 123.0);
    }

    #[test]
    fn reconnect_before_start_returns_to_lobby() {
        let mut p = Player::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "runner".to_string(),
            BetData { stake: 5.0, currency: "USD".to_string() },
            0,
        );
        p.disconnect();
        p.reconnect(Uuid::new_v4(), false);
        assert_eq!(p.phase, PlayerPhase::Connected);
    }

    #[test]
    fn near_miss_tracking_keeps_minimum() {
        let mut p = player();
        p.record_near_miss_margin(3, 14.0);
        p.record_near_miss_margin(3, 6.5);
        p.record_near_miss_margin(3, 9.0);
        assert_eq!(p.take_near_miss_margin(3), Some(6.5));
        assert_eq!(p.take_near_miss_margin(3), None);
    }
}
