//! Obstacle pattern catalog and phase-weighted selection
//!
//! Patterns are advisory templates; every generated sequence passes through
//! gap validation so it stays physically beatable at the prevailing speed no
//! matter what the RNG rolls.

use serde::{Deserialize, Serialize};

use super::obstacle::ObstacleKind;
use super::rng::GameRng;

/// Ordered difficulty tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    VeryHard,
    Expert,
}

const TIERS: [Difficulty; 5] = [
    Difficulty::Easy,
    Difficulty::Medium,
    Difficulty::Hard,
    Difficulty::VeryHard,
    Difficulty::Expert,
];

/// One obstacle in a pattern plus the gap (px) to whatever follows it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternElement {
    pub kind: ObstacleKind,
    pub gap: f32,
}

/// An obstacle-sequence template
pub struct PatternDef {
    pub id: u32,
    pub name: &'static str,
    pub difficulty: Difficulty,
    pub build: fn(f32) -> Vec<PatternElement>,
}

fn el(kind: ObstacleKind, gap: f32) -> PatternElement {
    PatternElement { kind, gap }
}

/// The static catalog. Easy tier is single-obstacle by design; phase 1
/// draws nothing else.
pub static PATTERNS: &[PatternDef] = &[
    PatternDef {
        id: 1,
        name: "lone_small_cactus",
        difficulty: Difficulty::Easy,
        build: |speed| vec![el(ObstacleKind::CactusSmall, speed * 0.9)],
    },
    PatternDef {
        id: 2,
        name: "lone_large_cactus",
        difficulty: Difficulty::Easy,
        build: |speed| vec![el(ObstacleKind::CactusLarge, speed * 0.95)],
    },
    PatternDef {
        id: 3,
        name: "lone_low_bird",
        difficulty: Difficulty::Easy,
        build: |speed| vec![el(ObstacleKind::BirdLow, speed * 0.9)],
    },
    PatternDef {
        id: 4,
        name: "cactus_pair",
        difficulty: Difficulty::Medium,
        build: |speed| {
            vec![
                el(ObstacleKind::CactusSmall, speed * 0.8),
                el(ObstacleKind::CactusLarge, speed * 0.9),
            ]
        },
    },
    PatternDef {
        id: 5,
        name: "bird_then_cactus",
        difficulty: Difficulty::Medium,
        build: |speed| {
            vec![
                el(ObstacleKind::BirdMid, speed * 0.85),
                el(ObstacleKind::CactusSmall, speed * 0.9),
            ]
        },
    },
    PatternDef {
        id: 6,
        name: "double_bird",
        difficulty: Difficulty::Medium,
        build: |speed| {
            vec![
                el(ObstacleKind::BirdLow, speed * 0.75),
                el(ObstacleKind::BirdHigh, speed * 0.9),
            ]
        },
    },
    PatternDef {
        id: 7,
        name: "cactus_corridor",
        difficulty: Difficulty::Hard,
        build: |speed| {
            vec![
                el(ObstacleKind::CactusSmall, speed * 0.75),
                el(ObstacleKind::CactusGroup, speed * 0.85),
                el(ObstacleKind::CactusSmall, speed * 0.9),
            ]
        },
    },
    PatternDef {
        id: 8,
        name: "swoop_and_block",
        difficulty: Difficulty::Hard,
        build: |speed| {
            vec![
                el(ObstacleKind::BirdMid, speed * 0.85),
                el(ObstacleKind::CactusLarge, speed * 0.8),
                el(ObstacleKind::BirdLow, speed * 0.9),
            ]
        },
    },
    PatternDef {
        id: 9,
        name: "triple_cactus",
        difficulty: Difficulty::Hard,
        build: |speed| {
            vec![
                el(ObstacleKind::CactusLarge, speed * 0.78),
                el(ObstacleKind::CactusSmall, speed * 0.78),
                el(ObstacleKind::CactusLarge, speed * 0.9),
            ]
        },
    },
    PatternDef {
        id: 10,
        name: "gauntlet",
        difficulty: Difficulty::VeryHard,
        build: |speed| {
            vec![
                el(ObstacleKind::CactusGroup, speed * 0.8),
                el(ObstacleKind::BirdMid, speed * 0.85),
                el(ObstacleKind::CactusSmall, speed * 0.75),
                el(ObstacleKind::BirdHigh, speed * 0.9),
            ]
        },
    },
    PatternDef {
        id: 11,
        name: "stutter_step",
        difficulty: Difficulty::VeryHard,
        build: |speed| {
            vec![
                el(ObstacleKind::CactusSmall, speed * 0.7),
                el(ObstacleKind::CactusSmall, speed * 0.7),
                el(ObstacleKind::CactusGroup, speed * 0.9),
            ]
        },
    },
    PatternDef {
        id: 12,
        name: "full_press",
        difficulty: Difficulty::Expert,
        build: |speed| {
            vec![
                el(ObstacleKind::CactusGroup, speed * 0.8),
                el(ObstacleKind::BirdLow, speed * 0.75),
                el(ObstacleKind::CactusLarge, speed * 0.8),
                el(ObstacleKind::BirdMid, speed * 0.85),
                el(ObstacleKind::CactusSmall, speed * 0.9),
            ]
        },
    },
    PatternDef {
        id: 13,
        name: "wing_wall",
        difficulty: Difficulty::Expert,
        build: |speed| {
            vec![
                el(ObstacleKind::BirdHigh, speed * 0.7),
                el(ObstacleKind::BirdMid, speed * 0.7),
                el(ObstacleKind::BirdLow, speed * 0.8),
                el(ObstacleKind::CactusGroup, speed * 0.9),
            ]
        },
    },
];

/// Tier weight percentages per phase, rows are phases 1..=5,
/// columns easy..expert. Each row sums to 100.
const PHASE_WEIGHTS: [[f64; 5]; 5] = [
    [100.0, 0.0, 0.0, 0.0, 0.0],
    [55.0, 35.0, 10.0, 0.0, 0.0],
    [25.0, 40.0, 25.0, 10.0, 0.0],
    [10.0, 30.0, 35.0, 20.0, 5.0],
    [5.0, 20.0, 30.0, 30.0, 15.0],
];

// Gap floors. Each applied floor is max(absolute, speed * multiplier).
const MIN_GAP_ABS: f32 = 150.0;
const MIN_GAP_MULT: f32 = 0.55;
/// After a ground element the player is mid-jump and must land first
const JUMP_RECOVERY_ABS: f32 = 220.0;
const JUMP_RECOVERY_MULT: f32 = 0.75;
/// Air element followed by ground element forces a duck-to-jump transition
const DUCK_TO_JUMP_ABS: f32 = 260.0;
const DUCK_TO_JUMP_MULT: f32 = 0.85;

/// Draw a difficulty tier for the given phase. Phase is clamped to 1..=5.
pub fn draw_tier(phase: u32, rng: &mut GameRng) -> Difficulty {
    let phase = phase.clamp(1, 5);
    let weights = &PHASE_WEIGHTS[(phase - 1) as usize];

    let roll = rng.next() * 100.0;
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if roll < cumulative {
            return TIERS[i];
        }
    }
    // roll == 100.0 cannot happen ([0,1) draw); guard for float edge anyway
    TIERS[4]
}

/// Select a pattern for the current phase and speed and return its
/// validated element sequence.
pub fn select_pattern(phase: u32, speed: f32, rng: &mut GameRng) -> (&'static PatternDef, Vec<PatternElement>) {
    let tier = draw_tier(phase, rng);

    let in_tier: Vec<&PatternDef> = PATTERNS.iter().filter(|p| p.difficulty == tier).collect();
    let def = in_tier[rng.next_index(in_tier.len())];

    let mut elements = (def.build)(speed);
    validate_pattern(&mut elements, speed);
    (def, elements)
}

/// Clamp every gap up to the floor for its transition category. Guarantees
/// the sequence is beatable at `speed` regardless of what the template or
/// the RNG produced.
pub fn validate_pattern(elements: &mut [PatternElement], speed: f32) {
    let global = MIN_GAP_ABS.max(speed * MIN_GAP_MULT);
    let jump_recovery = JUMP_RECOVERY_ABS.max(speed * JUMP_RECOVERY_MULT);
    let duck_to_jump = DUCK_TO_JUMP_ABS.max(speed * DUCK_TO_JUMP_MULT);

    for i in 0..elements.len() {
        let mut floor = global;

        if elements[i].kind.is_ground() {
            floor = floor.max(jump_recovery);
        }

        let next_is_ground = elements
            .get(i + 1)
            .map(|n| n.kind.is_ground())
            .unwrap_or(false);
        if elements[i].kind.is_air() && next_is_ground {
            floor = floor.max(duck_to_jump);
        }

        if elements[i].gap < floor {
            elements[i].gap = floor;
        }
    }
}
