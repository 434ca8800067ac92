//! Match manager - registry of in-flight matches, matchmaking, start/stop
//! orchestration, spawn scheduling and settlement

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::game::pattern::{self, PatternElement};
use crate::game::player::{BetData, Player};
use crate::game::r#match::{millis_to_datetime, GameMatch, MatchPhase, RemovePlayerOutcome};
use crate::game::snapshot::SnapshotBuilder;
use crate::game::PhysicsEngine;
use crate::util::time::unix_millis;
use crate::ws::protocol::{AuditTrail, MatchResult, PlayerResult, ServerMsg};

/// House fee retained from every pot; the rest goes to the winner
pub const HOUSE_FEE: f64 = 0.05;
/// Finished matches stay registered this long so final results reach clients
pub const FINISHED_GRACE_MS: u64 = 10_000;

/// Breather before the first obstacles of a match
const FIRST_SPAWN_DELAY: Duration = Duration::from_millis(1_500);

/// Handle to a registered match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    /// The match's mutable state; one lock per match, never shared across
    /// matches
    pub state: Arc<Mutex<GameMatch>>,
    /// Outbound events; every connected session subscribes
    pub events_tx: broadcast::Sender<ServerMsg>,
    snapshots: Arc<Mutex<SnapshotBuilder>>,
    result_delivered: Arc<AtomicBool>,
}

impl std::fmt::Debug for MatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchHandle").field("id", &self.id).finish()
    }
}

impl MatchHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.events_tx.subscribe()
    }
}

/// Result plus audit trail, handed to the platform after a match finishes
#[derive(Debug, Clone)]
pub struct SettlementJob {
    pub result: MatchResult,
    pub audit: AuditTrail,
}

/// Why a join attempt was refused
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("player is already in an active match")]
    AlreadyInMatch,

    #[error("no match could admit the player")]
    MatchUnavailable,
}

/// Owns the registries. Constructor-injected everywhere so tests can run
/// isolated instances.
pub struct MatchManager {
    game_config: GameConfig,
    matches: DashMap<Uuid, MatchHandle>,
    player_index: DashMap<Uuid, Uuid>,
}

impl MatchManager {
    pub fn new(game_config: GameConfig) -> Self {
        Self {
            game_config,
            matches: DashMap::new(),
            player_index: DashMap::new(),
        }
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|entry| entry.value().state.lock().players.len())
            .sum()
    }

    pub fn get(&self, match_id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(match_id).map(|entry| entry.value().clone())
    }

    pub fn match_for_player(&self, player_id: &Uuid) -> Option<MatchHandle> {
        let match_id = *self.player_index.get(player_id)?;
        self.get(&match_id)
    }

    /// First Waiting, non-full match, or a fresh one
    pub fn find_or_create_match(&self, now_ms: u64) -> MatchHandle {
        for entry in self.matches.iter() {
            let handle = entry.value();
            let game = handle.state.lock();
            if game.phase == MatchPhase::Waiting && !game.is_full() {
                return handle.clone();
            }
        }
        self.create_match(now_ms)
    }

    fn create_match(&self, now_ms: u64) -> MatchHandle {
        let id = Uuid::new_v4();
        let game = GameMatch::new(id, self.game_config.clone(), now_ms);
        let (events_tx, _) = broadcast::channel(64);

        let handle = MatchHandle {
            id,
            state: Arc::new(Mutex::new(game)),
            events_tx,
            snapshots: Arc::new(Mutex::new(SnapshotBuilder::new(
                self.game_config.snapshot_divisor,
            ))),
            result_delivered: Arc::new(AtomicBool::new(false)),
        };

        info!(match_id = %id, "Created new match");
        self.matches.insert(id, handle.clone());
        handle
    }

    /// Admit an authenticated player. A rejoining player id is a
    /// reconnection: the session is rebound in place and nothing else
    /// changes.
    pub fn add_player_to_match(
        &self,
        player_id: Uuid,
        session_id: Uuid,
        display_name: String,
        bet: BetData,
        now_ms: u64,
    ) -> Result<MatchHandle, JoinError> {
        if let Some(match_id) = self.player_index.get(&player_id).map(|r| *r) {
            match self.get(&match_id) {
                Some(handle) => {
                    let mut game = handle.state.lock();
                    if game.reconnect_player(player_id, session_id) {
                        info!(match_id = %match_id, player_id = %player_id, "Player reconnected");
                        drop(game);
                        return Ok(handle);
                    }
                    return Err(JoinError::AlreadyInMatch);
                }
                None => {
                    // Match already evicted; fall through to a fresh join
                    self.player_index.remove(&player_id);
                }
            }
        }

        let handle = self.find_or_create_match(now_ms);
        let player = Player::new(player_id, session_id, display_name.clone(), bet.clone(), now_ms);
        let admitted = {
            let mut game = handle.state.lock();
            game.add_player(player)
        };

        let handle = if admitted {
            handle
        } else {
            // The found match filled or started under our feet; a fresh
            // Waiting match always has room.
            let handle = self.create_match(now_ms);
            let player = Player::new(player_id, session_id, display_name, bet, now_ms);
            let mut game = handle.state.lock();
            if !game.add_player(player) {
                return Err(JoinError::MatchUnavailable);
            }
            drop(game);
            handle
        };

        self.player_index.insert(player_id, handle.id);
        let infos = handle.state.lock().player_infos();
        if let Some(info) = infos.into_iter().find(|p| p.player_id == player_id) {
            let _ = handle.events_tx.send(ServerMsg::PlayerJoined { player: info });
        }
        Ok(handle)
    }

    pub fn mark_player_ready(&self, player_id: Uuid) -> bool {
        match self.match_for_player(&player_id) {
            Some(handle) => handle.state.lock().mark_player_ready(player_id),
            None => false,
        }
    }

    /// Start the match if its preconditions hold, announce it, and begin
    /// obstacle-spawn scheduling
    pub fn try_start_match(&self, match_id: Uuid, now_ms: u64) -> bool {
        let Some(handle) = self.get(&match_id) else {
            return false;
        };

        {
            let mut game = handle.state.lock();
            if !game.can_start() {
                return false;
            }
            if let Err(e) = game.start(now_ms) {
                warn!(match_id = %match_id, error = %e, "Start failed after can_start");
                return false;
            }

            let _ = handle.events_tx.send(ServerMsg::MatchStarting {
                match_id,
                start_time: now_ms,
                config: game.config.clone(),
                seed_commitment: game.seed_commitment.clone(),
            });
        }

        tokio::spawn(run_spawn_scheduler(handle));
        true
    }

    /// Delegates removal semantics to the match and garbage-collects an
    /// emptied Waiting match
    pub fn remove_player_from_match(&self, player_id: Uuid, _now_ms: u64) -> Option<RemovePlayerOutcome> {
        let handle = self.match_for_player(&player_id)?;

        let (outcome, gc_match) = {
            let mut game = handle.state.lock();
            let outcome = game.remove_player(player_id);
            let gc = game.phase == MatchPhase::Waiting && game.players.is_empty();
            (outcome, gc)
        };

        match &outcome {
            RemovePlayerOutcome::Removed(_) | RemovePlayerOutcome::NotFound => {
                self.player_index.remove(&player_id);
            }
            // Soft disconnect keeps the index entry so a reconnect routes
            // back to the same match
            RemovePlayerOutcome::Disconnected => {}
        }

        let reason = match &outcome {
            RemovePlayerOutcome::Disconnected => "disconnected",
            _ => "left",
        };
        let _ = handle.events_tx.send(ServerMsg::PlayerLeft {
            player_id,
            reason: reason.to_string(),
        });

        if gc_match {
            self.matches.remove(&handle.id);
            info!(match_id = %handle.id, "Removed empty waiting match");
        }

        Some(outcome)
    }

    /// One global tick across every match: physics, snapshot broadcast,
    /// result delivery on finish, and grace-period eviction. Returns the
    /// settlement jobs for matches that finished this tick.
    pub fn update_all_matches(&self, now_ms: u64) -> Vec<SettlementJob> {
        let mut jobs = Vec::new();
        let mut evict = Vec::new();

        for entry in self.matches.iter() {
            let handle = entry.value().clone();
            let mut game = handle.state.lock();

            match game.phase {
                MatchPhase::InProgress => {
                    PhysicsEngine::update_match(&mut game, now_ms);

                    if game.phase == MatchPhase::Finished {
                        handle.snapshots.lock().force_next();
                    }
                    if handle.snapshots.lock().should_send() {
                        let _ = handle.events_tx.send(ServerMsg::GameUpdate {
                            snapshot: game.snapshot(now_ms),
                        });
                    }

                    if game.phase == MatchPhase::Finished
                        && !handle.result_delivered.swap(true, Ordering::SeqCst)
                    {
                        if let Some(result) = Self::calculate_match_result(&game) {
                            let _ = handle
                                .events_tx
                                .send(ServerMsg::MatchEnded { result: result.clone() });
                            jobs.push(SettlementJob {
                                result,
                                audit: game.audit_trail(),
                            });
                        }
                    }
                }
                MatchPhase::Finished => {
                    let expired = game
                        .ended_at
                        .map(|ended| ended + FINISHED_GRACE_MS <= now_ms)
                        .unwrap_or(true);
                    if expired {
                        evict.push(handle.id);
                    }
                }
                MatchPhase::Waiting | MatchPhase::Starting => {}
            }
        }

        for match_id in evict {
            self.matches.remove(&match_id);
            self.player_index.retain(|_, mid| *mid != match_id);
            info!(match_id = %match_id, "Evicted finished match");
        }

        jobs
    }

    /// Winner-takes-all settlement: rank by score descending (lexically
    /// smallest id on exact ties), pot × (1 − house fee) to the single
    /// highest scorer, zero to everyone else.
    pub fn calculate_match_result(game: &GameMatch) -> Option<MatchResult> {
        if game.phase != MatchPhase::Finished {
            return None;
        }

        let mut ranked: Vec<&Player> = game.players.values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let pot: f64 = ranked.iter().map(|p| p.bet.stake).sum();
        let payout = pot * (1.0 - HOUSE_FEE);

        let standings: Vec<PlayerResult> = ranked
            .iter()
            .enumerate()
            .map(|(i, p)| PlayerResult {
                player_id: p.id,
                score: p.score,
                ranking: (i + 1) as u32,
                winnings: if i == 0 { payout } else { 0.0 },
            })
            .collect();

        Some(MatchResult {
            match_id: game.id,
            winner_id: game.get_winner().map(|p| p.id),
            standings,
            started_at: game.started_at.and_then(millis_to_datetime),
            ended_at: game.ended_at.and_then(millis_to_datetime),
        })
    }
}

/// Per-match obstacle scheduling. Recomputes its own cadence from elapsed
/// time and pattern gaps after every spawn instead of running on a fixed
/// timer, and self-terminates once the match leaves InProgress.
async fn run_spawn_scheduler(handle: MatchHandle) {
    debug!(match_id = %handle.id, "Spawn scheduler started");
    let mut delay = FIRST_SPAWN_DELAY;

    loop {
        tokio::time::sleep(delay).await;
        let now = unix_millis();

        enum Plan {
            Simple,
            Pattern(Vec<PatternElement>),
        }

        let (plan, dev_pause) = {
            let mut game = handle.state.lock();
            if game.phase != MatchPhase::InProgress {
                break;
            }

            if game.config.dev_mode {
                game.spawn_obstacle(now);
                (Plan::Simple, game.current_speed(now))
            } else {
                let phase = game.difficulty_phase(now);
                let speed = game.current_speed(now);
                let (def, elements) = pattern::select_pattern(phase, speed, game.rng_mut());
                game.record_event(
                    "pattern_selected",
                    json!({ "pattern": def.name, "difficulty": def.difficulty, "phase": phase }),
                );
                debug!(match_id = %handle.id, pattern = def.name, phase, "Spawning pattern");
                (Plan::Pattern(elements), speed)
            }
        };

        match plan {
            Plan::Simple => {
                // Keep the dev cadence proportional to scroll speed
                let secs = (420.0 / dev_pause.max(1.0)).clamp(0.4, 3.0);
                delay = Duration::from_secs_f32(secs);
            }
            Plan::Pattern(elements) => {
                let mut stopped = false;
                for element in elements {
                    let now = unix_millis();
                    let speed = {
                        let mut game = handle.state.lock();
                        if game.phase != MatchPhase::InProgress {
                            stopped = true;
                            break;
                        }
                        game.spawn_obstacle_of(element.kind, now);
                        game.current_speed(now)
                    };
                    // Validated gap in pixels becomes wall time at the
                    // prevailing scroll speed
                    let secs = (element.gap / speed.max(1.0)).clamp(0.15, 5.0);
                    tokio::time::sleep(Duration::from_secs_f32(secs)).await;
                }
                if stopped {
                    break;
                }

                // Inter-pattern recovery shrinks as difficulty ramps
                let now = unix_millis();
                let (phase, jitter) = {
                    let mut game = handle.state.lock();
                    if game.phase != MatchPhase::InProgress {
                        break;
                    }
                    let jitter = game.rng_mut().next_range(0.0, 0.6);
                    (game.difficulty_phase(now), jitter)
                };
                let pause = (2.4 - 0.35 * phase as f32).max(0.5) + jitter as f32;
                delay = Duration::from_secs_f32(pause);
            }
        }
    }

    debug!(match_id = %handle.id, "Spawn scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::PlayerPhase;

    fn manager(dev_mode: bool, max_players: usize) -> MatchManager {
        let mut config = GameConfig::default();
        config.dev_mode = dev_mode;
        config.max_players = max_players;
        MatchManager::new(config)
    }

    fn bet(stake: f64) -> BetData {
        BetData { stake, currency: "USD".to_string() }
    }

    fn join(m: &MatchManager, now: u64) -> (Uuid, MatchHandle) {
        let player_id = Uuid::new_v4();
        let handle = m
            .add_player_to_match(player_id, Uuid::new_v4(), "p".to_string(), bet(10.0), now)
            .unwrap();
        (player_id, handle)
    }

    #[test]
    fn matchmaking_reuses_waiting_match_until_full() {
        let m = manager(false, 2);
        let (_, h1) = join(&m, 0);
        let (_, h2) = join(&m, 0);
        assert_eq!(h1.id, h2.id);
        assert_eq!(m.active_matches(), 1);

        // Full: third player lands in a new match
        let (_, h3) = join(&m, 0);
        assert_ne!(h3.id, h1.id);
        assert_eq!(m.active_matches(), 2);
    }

    #[test]
    fn double_join_of_active_player_is_rejected() {
        let m = manager(false, 4);
        let (player_id, _) = join(&m, 0);
        let err = m
            .add_player_to_match(player_id, Uuid::new_v4(), "p".to_string(), bet(10.0), 0)
            .unwrap_err();
        assert!(matches!(err, JoinError::AlreadyInMatch));
    }

    #[test]
    fn removing_last_waiting_player_garbage_collects_the_match() {
        let m = manager(false, 4);
        let (player_id, _) = join(&m, 0);
        assert_eq!(m.active_matches(), 1);

        let outcome = m.remove_player_from_match(player_id, 0).unwrap();
        assert!(matches!(outcome, RemovePlayerOutcome::Removed(_)));
        assert_eq!(m.active_matches(), 0);
        assert!(m.match_for_player(&player_id).is_none());
    }

    #[tokio::test]
    async fn settlement_pays_winner_pot_minus_house_fee() {
        let m = manager(false, 4);
        let (a, handle) = join(&m, 0);
        let (b, _) = join(&m, 0);
        let (c, _) = join(&m, 0);

        for id in [a, b, c] {
            assert!(m.mark_player_ready(id));
        }
        assert!(m.try_start_match(handle.id, 1_000));

        {
            let mut game = handle.state.lock();
            game.players.get_mut(&a).unwrap().score = 300.0;
            game.players.get_mut(&b).unwrap().score = 200.0;
            game.players.get_mut(&c).unwrap().score = 100.0;
            assert!(MatchManager::calculate_match_result(&game).is_none());
            game.end(5_000);
        }

        let game = handle.state.lock();
        let result = MatchManager::calculate_match_result(&game).unwrap();
        assert_eq!(result.winner_id, Some(a));
        assert_eq!(result.standings.len(), 3);
        assert_eq!(result.standings[0].player_id, a);
        assert_eq!(result.standings[0].ranking, 1);
        assert_eq!(result.standings[0].winnings, 28.5);
        assert_eq!(result.standings[1].winnings, 0.0);
        assert_eq!(result.standings[2].winnings, 0.0);
        assert!(result.started_at.is_some());
        assert!(result.ended_at.is_some());
    }

    #[tokio::test]
    async fn equal_scores_settle_to_smallest_id() {
        let m = manager(false, 4);
        let (a, handle) = join(&m, 0);
        let (b, _) = join(&m, 0);
        for id in [a, b] {
            m.mark_player_ready(id);
        }
        m.try_start_match(handle.id, 0);

        {
            let mut game = handle.state.lock();
            game.players.get_mut(&a).unwrap().score = 150.0;
            game.players.get_mut(&b).unwrap().score = 150.0;
            game.end(1_000);
        }

        let game = handle.state.lock();
        let result = MatchManager::calculate_match_result(&game).unwrap();
        assert_eq!(result.winner_id, Some(a.min(b)));
    }

    #[tokio::test]
    async fn finished_match_is_settled_once_then_evicted() {
        let m = manager(true, 4);
        let (player_id, handle) = join(&m, 0);
        m.mark_player_ready(player_id);
        assert!(m.try_start_match(handle.id, 0));

        handle.state.lock().players.get_mut(&player_id).unwrap().eliminate();

        let jobs = m.update_all_matches(100);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].result.match_id, handle.id);
        assert_eq!(jobs[0].audit.seed_commitment, handle.state.lock().seed_commitment);

        // Already delivered; still registered during the grace period
        assert!(m.update_all_matches(200).is_empty());
        assert_eq!(m.active_matches(), 1);

        let ended_at = handle.state.lock().ended_at.unwrap();
        assert!(m.update_all_matches(ended_at + FINISHED_GRACE_MS + 1).is_empty());
        assert_eq!(m.active_matches(), 0);
        assert!(m.match_for_player(&player_id).is_none());
    }

    #[tokio::test]
    async fn disconnect_and_rejoin_routes_back_to_the_same_match() {
        let m = manager(false, 4);
        let (a, handle) = join(&m, 0);
        let (b, _) = join(&m, 0);
        for id in [a, b] {
            m.mark_player_ready(id);
        }
        assert!(m.try_start_match(handle.id, 0));

        let outcome = m.remove_player_from_match(a, 10).unwrap();
        assert!(matches!(outcome, RemovePlayerOutcome::Disconnected));
        assert_eq!(
            handle.state.lock().players[&a].phase,
            PlayerPhase::Disconnected
        );

        let new_session = Uuid::new_v4();
        let rejoined = m
            .add_player_to_match(a, new_session, "p".to_string(), bet(10.0), 20)
            .unwrap();
        assert_eq!(rejoined.id, handle.id);
        let game = handle.state.lock();
        assert_eq!(game.players[&a].phase, PlayerPhase::Playing);
        assert_eq!(game.players[&a].session_id, new_session);
    }

    #[test]
    fn start_requires_everyone_ready() {
        let m = manager(false, 4);
        let (a, handle) = join(&m, 0);
        let (_b, _) = join(&m, 0);
        m.mark_player_ready(a);

        // b never readied; nothing to start, and no scheduler task is
        // spawned so this stays off the runtime
        assert!(!handle.state.lock().can_start());
    }
}
