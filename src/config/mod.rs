//! Configuration module - environment variable parsing and match tuning

use std::env;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Wagering platform API base URL
    pub platform_base_url: String,
    /// API key sent on every platform call
    pub platform_api_key: String,
    /// Shared secret for signing settlement callbacks
    pub platform_callback_secret: String,

    /// Allowed client origin for CORS
    pub client_origin: String,

    /// Match tuning snapshot handed to every new match
    pub game: GameConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let dev_mode = env::var("DEV_MODE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        // Platform credentials are mandatory outside dev mode; a dev server
        // can run without a platform and accept dev tokens instead.
        let platform_var = |name: &'static str| -> Result<String, ConfigError> {
            match env::var(name) {
                Ok(v) => Ok(v),
                Err(_) if dev_mode => Ok(String::new()),
                Err(_) => Err(ConfigError::Missing(name)),
            }
        };

        let mut game = GameConfig::default();
        game.dev_mode = dev_mode;
        if let Ok(v) = env::var("MAX_PLAYERS") {
            game.max_players = v.parse().map_err(|_| ConfigError::Invalid("MAX_PLAYERS"))?;
        }
        if let Ok(v) = env::var("TICK_RATE") {
            game.tick_rate = v.parse().map_err(|_| ConfigError::Invalid("TICK_RATE"))?;
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            platform_base_url: platform_var("PLATFORM_BASE_URL")?,
            platform_api_key: platform_var("PLATFORM_API_KEY")?,
            platform_callback_secret: platform_var("PLATFORM_CALLBACK_SECRET")?,

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            game,
        })
    }
}

/// Width/height of a sprite's visual box, in world pixels
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Dims {
    pub width: f32,
    pub height: f32,
}

/// Per-obstacle-type dimensions and spawn heights
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ObstacleTuning {
    pub cactus_small: Dims,
    pub cactus_large: Dims,
    pub cactus_group: Dims,
    pub bird: Dims,
    /// Spawn Y for the three bird altitudes (bottom edge, world pixels)
    pub bird_low_y: f32,
    pub bird_mid_y: f32,
    pub bird_high_y: f32,
}

/// Immutable per-match tuning. A match takes a snapshot at creation and
/// never observes later changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameConfig {
    /// Downward acceleration, px/s^2
    pub gravity: f32,
    /// Initial upward velocity of a jump, px/s
    pub jump_velocity: f32,
    /// Scroll speed at match start, px/s
    pub base_speed: f32,
    /// Linear speed growth per elapsed second, as a fraction of base speed
    pub speed_growth: f32,
    /// Scroll speed ceiling, px/s
    pub max_speed: f32,

    pub player_width: f32,
    pub player_height: f32,
    /// Hitbox height while ducking
    pub player_duck_height: f32,
    pub player_start_x: f32,
    pub player_start_y: f32,

    pub obstacles: ObstacleTuning,

    pub world_width: f32,
    pub world_height: f32,

    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Ticks between broadcast snapshots
    pub snapshot_divisor: u32,

    /// Hitbox shrink factor; clamped into [0.5, 1.0] at the point of use
    pub hitbox_forgiveness: f32,

    pub max_players: usize,
    pub dev_mode: bool,

    /// Elapsed seconds at which phases 2..=5 begin
    pub phase_starts: [f32; 4],

    /// Survival score rate, points per second while playing
    pub score_per_second: f64,
    /// Fixed bonus for clearing an obstacle
    pub obstacle_pass_bonus: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            gravity: 2800.0,
            jump_velocity: 950.0,
            base_speed: 340.0,
            speed_growth: 0.045,
            max_speed: 900.0,

            player_width: 44.0,
            player_height: 48.0,
            player_duck_height: 26.0,
            player_start_x: 120.0,
            player_start_y: 0.0,

            obstacles: ObstacleTuning {
                cactus_small: Dims { width: 26.0, height: 48.0 },
                cactus_large: Dims { width: 34.0, height: 68.0 },
                cactus_group: Dims { width: 88.0, height: 52.0 },
                bird: Dims { width: 46.0, height: 30.0 },
                bird_low_y: 20.0,
                bird_mid_y: 75.0,
                bird_high_y: 130.0,
            },

            world_width: 1280.0,
            world_height: 720.0,

            tick_rate: 60,
            snapshot_divisor: 3,

            hitbox_forgiveness: 0.8,

            max_players: 4,
            dev_mode: false,

            phase_starts: [20.0, 45.0, 80.0, 120.0],

            score_per_second: 10.0,
            obstacle_pass_bonus: 50.0,
        }
    }
}

impl GameConfig {
    /// Minimum players required before a match can start
    pub fn min_players(&self) -> usize {
        if self.dev_mode {
            1
        } else {
            2
        }
    }

    /// Fixed physics timestep, seconds
    pub fn tick_delta(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Forgiveness factor clamped to its legal range
    pub fn forgiveness(&self) -> f32 {
        self.hitbox_forgiveness.clamp(0.5, 1.0)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
