//! Collision detection with configurable forgiveness
//!
//! Hitboxes are shrunk toward their centers by the match's forgiveness
//! factor, a marginal overlap right after a jump input is forgiven, and
//! vertical clearances are tracked per obstacle for near-miss events.

use crate::config::GameConfig;

use super::obstacle::{Bounds, Obstacle};
use super::player::Player;

/// Horizontal overlap at or below this many pixels is eligible for grace
pub const GRACE_PIXELS: f32 = 6.0;
/// Grace window after a jump input, in ticks (~80 ms at 60 Hz)
pub const GRACE_TICKS: u64 = 5;

/// Per-match collision service, configured once from the match config
pub struct CollisionDetector<'a> {
    config: &'a GameConfig,
    forgiveness: f32,
}

impl<'a> CollisionDetector<'a> {
    pub fn new(config: &'a GameConfig) -> Self {
        Self {
            config,
            forgiveness: config.forgiveness(),
        }
    }

    /// Scale a box toward its center. 1.0 keeps the visual hitbox,
    /// 0.5 halves each dimension.
    pub fn shrink_bounds(&self, b: Bounds) -> Bounds {
        let cx = (b.left + b.right) / 2.0;
        let cy = (b.bottom + b.top) / 2.0;
        let half_w = b.width() / 2.0 * self.forgiveness;
        let half_h = b.height() / 2.0 * self.forgiveness;
        Bounds {
            left: cx - half_w,
            right: cx + half_w,
            bottom: cy - half_h,
            top: cy + half_h,
        }
    }

    /// Visual (unshrunk) player box; ducking lowers the height
    pub fn player_bounds(&self, player: &Player) -> Bounds {
        let height = if player.ducking {
            self.config.player_duck_height
        } else {
            self.config.player_height
        };
        Bounds {
            left: player.x,
            right: player.x + self.config.player_width,
            bottom: player.y,
            top: player.y + height,
        }
    }

    /// True on a real hit. A shrunk-box overlap is forgiven when it is
    /// horizontally marginal and the player jumped within the grace window.
    pub fn check_collision(&self, player: &Player, obstacle: &Obstacle, current_tick: u64) -> bool {
        let p = self.shrink_bounds(self.player_bounds(player));
        let o = self.shrink_bounds(obstacle.bounds());

        if !p.overlaps(&o) {
            return false;
        }

        let overlap_x = p.right.min(o.right) - p.left.max(o.left);
        if overlap_x <= GRACE_PIXELS {
            if let Some(jump_tick) = player.last_jump_tick {
                if current_tick.saturating_sub(jump_tick) <= GRACE_TICKS {
                    return false;
                }
            }
        }

        true
    }

    /// While the obstacle horizontally overlaps the player (visual bounds),
    /// record the vertical clearance: gap above the obstacle when the player
    /// jumped clear, gap below it when the player ducked clear.
    pub fn track_near_miss(&self, player: &mut Player, obstacle: &Obstacle) {
        let p = self.player_bounds(player);
        let o = obstacle.bounds();

        if p.left >= o.right || p.right <= o.left {
            return;
        }

        let gap_above = p.bottom - o.top;
        let gap_below = o.bottom - p.top;
        let clearance = gap_above.max(gap_below);
        player.record_near_miss_margin(obstacle.id, clearance);
    }

    /// True once, when the obstacle's trailing edge has cleared the
    /// player's leading edge. The caller marks the obstacle passed.
    pub fn check_obstacle_passed(&self, player: &Player, obstacle: &Obstacle) -> bool {
        if obstacle.passed {
            return false;
        }
        obstacle.bounds().right < self.player_bounds(player).left
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::obstacle::ObstacleKind;
    use crate::game::player::BetData;
    use uuid::Uuid;

    fn config_with_forgiveness(f: f32) -> GameConfig {
        let mut config = GameConfig::default();
        config.hitbox_forgiveness = f;
        config
    }

    fn playing_player() -> Player {
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
    fn forgiveness_one_keeps_visual_bounds() {
        let config = config_with_forgiveness(1.0);
        let detector = CollisionDetector::new(&config);
        let b = Bounds { left: 10.0, right: 50.0, bottom: 0.0, top: 30.0 };
        assert_eq!(detector.shrink_bounds(b), b);
    }

    #[test]
    fn forgiveness_half_shrinks_centered() {
        let config = config_with_forgiveness(0.5);
        let detector = CollisionDetector::new(&config);
        let b = Bounds { left: 10.0, right: 50.0, bottom: 0.0, top: 40.0 };
        let s = detector.shrink_bounds(b);
        assert_eq!(s.width(), 20.0);
        assert_eq!(s.height(), 20.0);
        assert_eq!(s.left, 20.0);
        assert_eq!(s.right, 40.0);
        assert_eq!(s.bottom, 10.0);
        assert_eq!(s.top, 30.0);
    }

    #[test]
    fn out_of_range_forgiveness_clamps() {
        let config = config_with_forgiveness(0.1);
        let detector = CollisionDetector::new(&config);
        let b = Bounds { left: 0.0, right: 40.0, bottom: 0.0, top: 40.0 };
        assert_eq!(detector.shrink_bounds(b).width(), 20.0);
    }

    #[test]
    fn late_jump_grace_forgives_marginal_overlap() {
        let config = config_with_forgiveness(1.0);
        let detector = CollisionDetector::new(&config);
        let mut player = playing_player();

        // Obstacle overlapping the player's right edge by 4px
        let mut obstacle = Obstacle::spawn(1, ObstacleKind::CactusSmall, 0.0, 340.0, 0.0, &config);
        obstacle.x = player.x + config.player_width - 4.0;

        // No jump recorded: a hit
        assert!(detector.check_collision(&player, &obstacle, 100));

        // Jumped 3 ticks ago: forgiven
        player.last_jump_tick = Some(97);
        assert!(!detector.check_collision(&player, &obstacle, 100));

        // Same geometry, jump outside the window: a hit again
        player.last_jump_tick = Some(100 - GRACE_TICKS - 1);
        assert!(detector.check_collision(&player, &obstacle, 100));
    }

    #[test]
    fn deep_overlap_gets_no_grace() {
        let config = config_with_forgiveness(1.0);
        let detector = CollisionDetector::new(&config);
        let mut player = playing_player();
        player.last_jump_tick = Some(100);

        let mut obstacle = Obstacle::spawn(1, ObstacleKind::CactusLarge, 0.0, 340.0, 0.0, &config);
        obstacle.x = player.x + 2.0;
        assert!(detector.check_collision(&player, &obstacle, 101));
    }

    #[test]
    fn ducking_clears_a_bird_that_standing_would_not() {
        let mut config = config_with_forgiveness(1.0);
        config.obstacles.bird_mid_y = 30.0;
        let detector = CollisionDetector::new(&config);
        let mut player = playing_player();

        let mut bird = Obstacle::spawn(1, ObstacleKind::BirdMid, 0.0, 340.0, 0.0, &config);
        bird.sine = None;
        bird.y = 30.0;
        bird.x = player.x;

        assert!(detector.check_collision(&player, &bird, 50));
        player.duck();
        assert!(!detector.check_collision(&player, &bird, 50));
    }

    #[test]
    fn near_miss_tracks_minimum_clearance_under_a_bird() {
        let config = config_with_forgiveness(1.0);
        let detector = CollisionDetector::new(&config);
        let mut player = playing_player();

        let mut bird = Obstacle::spawn(7, ObstacleKind::BirdMid, 0.0, 340.0, 0.0, &config);
        bird.sine = None;
        bird.x = player.x;
        bird.y = config.player_height + 20.0;
        detector.track_near_miss(&mut player, &bird);

        bird.y = config.player_height + 8.0;
        detector.track_near_miss(&mut player, &bird);

        bird.y = config.player_height + 15.0;
        detector.track_near_miss(&mut player, &bird);

        assert_eq!(player.take_near_miss_margin(7), Some(8.0));
    }

    #[test]
    fn near_miss_ignores_non_overlapping_obstacles() {
        let config = config_with_forgiveness(1.0);
        let detector = CollisionDetector::new(&config);
        let mut player = playing_player();

        let obstacle = Obstacle::spawn(9, ObstacleKind::CactusSmall, player.x + 500.0, 340.0, 0.0, &config);
        detector.track_near_miss(&mut player, &obstacle);
        assert!(player.take_near_miss_margin(9).is_none());
    }

    #[test]
    fn obstacle_passed_fires_once() {
        let config = config_with_forgiveness(1.0);
        let detector = CollisionDetector::new(&config);
        let player = playing_player();

        let mut obstacle = Obstacle::spawn(1, ObstacleKind::CactusSmall, player.x + 100.0, 340.0, 0.0, &config);
        assert!(!detector.check_obstacle_passed(&player, &obstacle));

        obstacle.x = player.x - obstacle.width - 1.0;
        assert!(detector.check_obstacle_passed(&player, &obstacle));

        obstacle.passed = true;
        assert!(!detector.check_obstacle_passed(&player, &obstacle));
    }
}
