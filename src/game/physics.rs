//! Physics engine - validates player input and orchestrates the per-tick
//! collision, scoring and near-miss pass

use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::ws::protocol::InputAction;

use super::collision::CollisionDetector;
use super::r#match::{GameMatch, MatchPhase};
use super::PlayerInput;

/// Oldest acceptable input timestamp relative to server time, ms
pub const MAX_INPUT_LAG_MS: i64 = 5_000;
/// Furthest-future acceptable input timestamp, ms
pub const MAX_INPUT_LEAD_MS: i64 = 1_000;
/// A tracked minimum clearance at or below this is a near miss
pub const NEAR_MISS_MARGIN: f32 = 10.0;

/// Stateless tick orchestrator
pub struct PhysicsEngine;

impl PhysicsEngine {
    /// Validate and apply one player input. Rejections are silent no-ops:
    /// the sender sees nothing and their next valid input proceeds normally.
    pub fn process_player_input(
        game: &mut GameMatch,
        player_id: Uuid,
        input: &PlayerInput,
        now_ms: u64,
    ) -> bool {
        let tick = game.tick;
        let jump_velocity = game.config.jump_velocity;

        let player = match game.players.get_mut(&player_id) {
            Some(p) if p.is_active() => p,
            _ => return false,
        };

        // Replay / out-of-order
        if input.seq <= player.last_input_seq {
            debug!(player_id = %player_id, seq = input.seq, "Stale input sequence dropped");
            return false;
        }

        // Burst flood
        if !player.check_rate_limit(now_ms) {
            debug!(player_id = %player_id, "Input rate limit exceeded");
            return false;
        }

        // Clock-tamper defense
        let drift = now_ms as i64 - input.timestamp as i64;
        if drift > MAX_INPUT_LAG_MS || drift < -MAX_INPUT_LEAD_MS {
            debug!(player_id = %player_id, drift, "Input timestamp outside accepted window");
            return false;
        }

        player.last_input_seq = input.seq;
        match input.action {
            InputAction::Jump => {
                player.jump(jump_velocity, tick);
            }
            InputAction::Duck => player.duck(),
            InputAction::Unduck => player.unduck(),
        }

        game.record_event(
            "input_accepted",
            json!({ "player_id": player_id, "seq": input.seq, "action": input.action }),
        );
        true
    }

    /// Drive one full simulation tick: match physics, then collision /
    /// near-miss / pass scoring across every active player x obstacle pair.
    pub fn update_match(game: &mut GameMatch, now_ms: u64) {
        if game.phase != MatchPhase::InProgress {
            return;
        }

        game.update(now_ms);
        if game.phase != MatchPhase::InProgress {
            return;
        }

        let config = game.config.clone();
        let detector = CollisionDetector::new(&config);
        let tick = game.tick;

        let player_ids: Vec<Uuid> = game
            .players
            .values()
            .filter(|p| p.is_active())
            .map(|p| p.id)
            .collect();
        let mut obstacle_ids: Vec<u64> = game.obstacles.keys().copied().collect();
        obstacle_ids.sort_unstable();

        let mut events: Vec<(&'static str, serde_json::Value)> = Vec::new();

        'players: for pid in player_ids {
            for &oid in &obstacle_ids {
                let hit = match (game.players.get(&pid), game.obstacles.get(&oid)) {
                    (Some(player), Some(obstacle)) => {
                        detector.check_collision(player, obstacle, tick)
                    }
                    _ => continue,
                };

                if hit {
                    if let Some(player) = game.players.get_mut(&pid) {
                        player.eliminate();
                    }
                    events.push((
                        "player_eliminated",
                        json!({ "player_id": pid, "obstacle_id": oid }),
                    ));
                    continue 'players;
                }

                // Track clearance while the obstacle is still live for this player
                if let (Some(player), Some(obstacle)) =
                    (game.players.get_mut(&pid), game.obstacles.get(&oid))
                {
                    if !obstacle.passed {
                        detector.track_near_miss(player, obstacle);
                    }
                }

                let passed = match (game.players.get(&pid), game.obstacles.get(&oid)) {
                    (Some(player), Some(obstacle)) => {
                        detector.check_obstacle_passed(player, obstacle)
                    }
                    _ => false,
                };

                if passed {
                    if let Some(obstacle) = game.obstacles.get_mut(&oid) {
                        obstacle.passed = true;
                    }
                    if let Some(player) = game.players.get_mut(&pid) {
                        player.add_pass_bonus(config.obstacle_pass_bonus);
                        events.push((
                            "obstacle_passed",
                            json!({ "player_id": pid, "obstacle_id": oid }),
                        ));

                        if let Some(margin) = player.take_near_miss_margin(oid) {
                            if margin > 0.0 && margin <= NEAR_MISS_MARGIN {
                                events.push((
                                    "near_miss",
                                    json!({ "player_id": pid, "obstacle_id": oid, "margin": margin }),
                                ));
                            }
                        }
                    }
                }
            }
        }

        for (event, data) in events {
            game.record_event(event, data);
        }

        game.evaluate_end(now_ms);
    }
}
