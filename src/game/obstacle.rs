//! Obstacles - passive kinematic hazards scrolling toward the players

use serde::{Deserialize, Serialize};

use crate::config::GameConfig;

/// The closed set of obstacle variants. Ground variants must be jumped,
/// air variants must be ducked under (or jumped over at low altitude).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleKind {
    CactusSmall,
    CactusLarge,
    CactusGroup,
    BirdLow,
    BirdMid,
    BirdHigh,
}

impl ObstacleKind {
    pub const GROUND: [ObstacleKind; 3] = [
        ObstacleKind::CactusSmall,
        ObstacleKind::CactusLarge,
        ObstacleKind::CactusGroup,
    ];

    pub const AIR: [ObstacleKind; 3] = [
        ObstacleKind::BirdLow,
        ObstacleKind::BirdMid,
        ObstacleKind::BirdHigh,
    ];

    pub fn is_ground(&self) -> bool {
        matches!(
            self,
            ObstacleKind::CactusSmall | ObstacleKind::CactusLarge | ObstacleKind::CactusGroup
        )
    }

    pub fn is_air(&self) -> bool {
        !self.is_ground()
    }
}

/// Sine-wave vertical motion for bobbing air variants
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SineMotion {
    pub base_y: f32,
    pub amplitude: f32,
    pub period: f32,
}

/// Axis-aligned bounding box, origin at bottom-left
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl Bounds {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }

    pub fn overlaps(&self, other: &Bounds) -> bool {
        self.left < other.right
            && self.right > other.left
            && self.bottom < other.top
            && self.top > other.bottom
    }
}

/// A positioned hazard with simple kinematics
#[derive(Debug, Clone)]
pub struct Obstacle {
    pub id: u64,
    pub kind: ObstacleKind,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Leftward scroll speed at spawn, px/s
    pub speed: f32,
    /// Vertical drift for non-sine movers, px/s
    pub vy: f32,
    pub sine: Option<SineMotion>,
    pub passed: bool,
    /// Match-elapsed seconds at spawn, anchors the sine phase
    pub spawned_at: f32,
}

impl Obstacle {
    /// Typed factory: dimensions and spawn height come from config, never
    /// from the caller.
    pub fn spawn(id: u64, kind: ObstacleKind, x: f32, speed: f32, elapsed: f32, config: &GameConfig) -> Self {
        let o = &config.obstacles;
        let (dims, y, sine) = match kind {
            ObstacleKind::CactusSmall => (o.cactus_small, 0.0, None),
            ObstacleKind::CactusLarge => (o.cactus_large, 0.0, None),
            ObstacleKind::CactusGroup => (o.cactus_group, 0.0, None),
            ObstacleKind::BirdLow => (o.bird, o.bird_low_y, None),
            ObstacleKind::BirdMid => (
                o.bird,
                o.bird_mid_y,
                Some(SineMotion {
                    base_y: o.bird_mid_y,
                    amplitude: 18.0,
                    period: 1.6,
                }),
            ),
            ObstacleKind::BirdHigh => (
                o.bird,
                o.bird_high_y,
                Some(SineMotion {
                    base_y: o.bird_high_y,
                    amplitude: 26.0,
                    period: 2.2,
                }),
            ),
        };

        Self {
            id,
            kind,
            x,
            y,
            width: dims.width,
            height: dims.height,
            speed,
            vy: 0.0,
            sine,
            passed: false,
            spawned_at: elapsed,
        }
    }

    /// Advance one timestep. `elapsed` is match-elapsed seconds.
    pub fn update(&mut self, dt: f32, elapsed: f32) {
        self.x -= self.speed * dt;
        if let Some(sine) = self.sine {
            let t = elapsed - self.spawned_at;
            self.y = sine.base_y + sine.amplitude * (std::f32::consts::TAU * t / sine.period).sin();
        } else {
            self.y += self.vy * dt;
        }
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            left: self.x,
            right: self.x + self.width,
            bottom: self.y,
            top: self.y + self.height,
        }
    }

    /// True once the right edge has scrolled past world x = 0
    pub fn is_off_screen(&self) -> bool {
        self.x + self.width < 0.0
    }
}
