//! Line movement tracking.
//!
//! Each tracked game gets its own refresh task. The cadence tightens from the
//! active-games interval to the real-time interval once the game is inside
//! the pre-start window, and a refresh that is still running when the next
//! tick lands is skipped rather than stacked.

use crate::cache::TtlStore;
use crate::config::TrackerConfig;
use crate::error::LiveDataError;
use crate::events::{DomainEvent, EventBus};
use crate::models::{GameTrackingState, MarketKind, OddsMovement, Sport};
use crate::monitoring::ErrorMonitor;
use crate::tracker::diff::{diff_snapshots, merge_quotes};
use crate::tracker::provider::OddsProvider;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Refresh cadence for a game given its start time.
pub fn refresh_interval(
    config: &TrackerConfig,
    game_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Duration {
    let window = ChronoDuration::hours(config.real_time_window_hours);
    // In-play and recently started games also fall inside the window.
    if game_date - now <= window {
        config.real_time_interval
    } else {
        config.active_games_interval
    }
}

struct TrackedGame {
    state: GameTrackingState,
    in_flight: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct LineTracker {
    config: TrackerConfig,
    provider: Arc<dyn OddsProvider>,
    store: Arc<dyn TtlStore>,
    events: EventBus,
    monitor: Arc<dyn ErrorMonitor>,
    games: Arc<RwLock<HashMap<String, TrackedGame>>>,
}

impl LineTracker {
    pub fn new(
        config: TrackerConfig,
        provider: Arc<dyn OddsProvider>,
        store: Arc<dyn TtlStore>,
        events: EventBus,
        monitor: Arc<dyn ErrorMonitor>,
    ) -> Self {
        Self {
            config,
            provider,
            store,
            events,
            monitor,
            games: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Begin tracking a game. Idempotent; a game already tracked keeps its
    /// existing task and history.
    pub fn start_tracking(
        &self,
        game_id: &str,
        sport: Sport,
        home_team: &str,
        away_team: &str,
        game_date: DateTime<Utc>,
    ) -> Result<(), LiveDataError> {
        {
            let mut games = self.games.write();
            if games.contains_key(game_id) {
                debug!("{} already tracked", game_id);
                return Ok(());
            }
            if games.len() >= self.config.max_tracked_games {
                return Err(LiveDataError::CapacityExceeded {
                    kind: "tracked_games",
                    limit: self.config.max_tracked_games,
                });
            }
            games.insert(
                game_id.to_string(),
                TrackedGame {
                    state: GameTrackingState::new(game_id, sport, home_team, away_team, game_date),
                    in_flight: Arc::new(AtomicBool::new(false)),
                    task: None,
                },
            );
        }

        let tracker = self.clone();
        let id = game_id.to_string();
        let task = tokio::spawn(async move { tracker.monitor_game(id).await });

        let mut games = self.games.write();
        match games.get_mut(game_id) {
            Some(game) => game.task = Some(task),
            // Stopped before the handle was recorded.
            None => task.abort(),
        }

        info!(
            "tracking {} ({} {} @ {})",
            game_id,
            sport.as_str(),
            away_team,
            home_team
        );
        Ok(())
    }

    /// Stop tracking and archive the final state under a long-retention key.
    /// Returns false when the game was not tracked.
    pub async fn stop_tracking(&self, game_id: &str) -> bool {
        let Some(game) = self.games.write().remove(game_id) else {
            return false;
        };
        if let Some(task) = game.task {
            task.abort();
        }

        match serde_json::to_value(&game.state) {
            Ok(snapshot) => {
                let ttl = Duration::from_secs(self.config.historical_tracking_days * 24 * 3600);
                self.store
                    .set(&format!("tracking:history:{}", game_id), snapshot, ttl)
                    .await;
            }
            Err(e) => warn!("failed to archive {}: {}", game_id, e),
        }

        info!("stopped tracking {}", game_id);
        true
    }

    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.games.read().keys().cloned().collect();
        for id in ids {
            self.stop_tracking(&id).await;
        }
    }

    /// Pull fresh quotes for every market, diff against the previous
    /// snapshot and commit. Returns the detected movements.
    pub async fn refresh(&self, game_id: &str) -> Result<Vec<OddsMovement>, LiveDataError> {
        let in_flight = {
            let games = self.games.read();
            match games.get(game_id) {
                Some(g) => g.in_flight.clone(),
                None => return Ok(Vec::new()),
            }
        };

        // Skip when the previous refresh has not finished.
        if in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("{} refresh already in flight, skipping", game_id);
            return Ok(Vec::new());
        }
        let _guard = InFlightGuard(in_flight);

        // The baseline is read only while holding the guard; read before the
        // swap it could race a concurrent commit and re-report movements the
        // other refresh already recorded.
        let (sport, previous) = {
            let games = self.games.read();
            match games.get(game_id) {
                Some(g) => (g.state.sport, g.state.current_odds.clone()),
                None => return Ok(Vec::new()),
            }
        };

        let mut by_market = HashMap::new();
        for market in MarketKind::ALL {
            match self.provider.fetch_market(sport, game_id, market).await {
                Ok(quotes) => {
                    by_market.insert(market, quotes);
                }
                // One failed market never blocks the others.
                Err(e) => {
                    self.monitor.report("odds_provider", &e.to_string());
                    self.events.publish(DomainEvent::DataError {
                        channel: None,
                        detail: e.to_string(),
                    });
                }
            }
        }

        let now = Utc::now();
        let merged = merge_quotes(by_market, now);
        if merged.is_empty() {
            // Provider hiccup; keep the previous snapshot rather than
            // diffing everything back in on the next refresh.
            debug!("{} refresh returned no quotes, keeping snapshot", game_id);
            return Ok(Vec::new());
        }

        let movements = diff_snapshots(
            game_id,
            &previous,
            &merged,
            self.config.significant_movement_threshold,
            now,
        );

        {
            let mut games = self.games.write();
            let Some(game) = games.get_mut(game_id) else {
                // Stopped mid-refresh; discard the result.
                return Ok(Vec::new());
            };
            game.state.current_odds = merged;
            game.state.last_updated = now;
            game.state.movements.extend(movements.iter().cloned());
            let excess = game
                .state
                .movements
                .len()
                .saturating_sub(self.config.max_movement_history);
            if excess > 0 {
                game.state.movements.drain(..excess);
            }
        }

        for movement in &movements {
            if movement.is_significant || movement.is_reversal {
                self.events
                    .publish(DomainEvent::SignificantMovement(movement.clone()));
            }
        }

        Ok(movements)
    }

    pub fn tracked_games(&self) -> Vec<String> {
        self.games.read().keys().cloned().collect()
    }

    pub fn tracked_count(&self) -> usize {
        self.games.read().len()
    }

    pub fn game_state(&self, game_id: &str) -> Option<GameTrackingState> {
        self.games.read().get(game_id).map(|g| g.state.clone())
    }

    pub fn movements(&self, game_id: &str) -> Vec<OddsMovement> {
        self.games
            .read()
            .get(game_id)
            .map(|g| g.state.movements.clone())
            .unwrap_or_default()
    }

    async fn monitor_game(&self, game_id: String) {
        loop {
            let game_date = match self.games.read().get(&game_id) {
                Some(g) => g.state.game_date,
                None => return,
            };
            tokio::time::sleep(refresh_interval(&self.config, game_date, Utc::now())).await;

            if !self.games.read().contains_key(&game_id) {
                debug!("{} untracked, refresh loop ending", game_id);
                return;
            }
            if let Err(e) = self.refresh(&game_id).await {
                warn!("{} refresh failed: {}", game_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryTtlStore;
    use crate::monitoring::testing::RecordingMonitor;
    use crate::tracker::provider::testing::{quotes, ScriptedProvider};

    fn test_config() -> TrackerConfig {
        TrackerConfig {
            real_time_interval: Duration::from_secs(3),
            active_games_interval: Duration::from_secs(30),
            real_time_window_hours: 2,
            max_tracked_games: 20,
            max_movement_history: 500,
            significant_movement_threshold: 10.0,
            historical_tracking_days: 30,
        }
    }

    struct Fixture {
        tracker: LineTracker,
        events: EventBus,
        store: Arc<MemoryTtlStore>,
        provider: Arc<ScriptedProvider>,
        monitor: Arc<RecordingMonitor>,
    }

    fn fixture_with(config: TrackerConfig, provider: Arc<ScriptedProvider>) -> Fixture {
        let events = EventBus::new(256);
        let store = Arc::new(MemoryTtlStore::new());
        let monitor = Arc::new(RecordingMonitor::default());
        let tracker = LineTracker::new(
            config,
            provider.clone(),
            store.clone(),
            events.clone(),
            monitor.clone(),
        );
        Fixture {
            tracker,
            events,
            store,
            provider,
            monitor,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(test_config(), ScriptedProvider::new())
    }

    fn far_future() -> DateTime<Utc> {
        Utc::now() + ChronoDuration::hours(24)
    }

    fn start(f: &Fixture, game_id: &str) {
        f.tracker
            .start_tracking(game_id, Sport::NBA, "Celtics", "Lakers", far_future())
            .unwrap();
    }

    #[test]
    fn test_adaptive_interval() {
        let config = test_config();
        let now = Utc::now();

        // Far out: relaxed cadence.
        let d = refresh_interval(&config, now + ChronoDuration::hours(5), now);
        assert_eq!(d, Duration::from_secs(30));

        // Inside the two-hour window: tight cadence.
        let d = refresh_interval(&config, now + ChronoDuration::hours(1), now);
        assert_eq!(d, Duration::from_secs(3));

        // In play.
        let d = refresh_interval(&config, now - ChronoDuration::hours(1), now);
        assert_eq!(d, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_refresh_detects_and_publishes_movement() {
        let f = fixture();
        f.provider
            .push(MarketKind::H2h, quotes("draftkings", &[("home", -150.0)]));
        f.provider
            .push(MarketKind::H2h, quotes("draftkings", &[("home", -170.0)]));
        start(&f, "g1");

        // Baseline refresh produces no movements.
        let movements = f.tracker.refresh("g1").await.unwrap();
        assert!(movements.is_empty());

        let mut rx = f.events.subscribe();
        let movements = f.tracker.refresh("g1").await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement, -20.0);
        assert!(movements[0].is_significant);

        match rx.recv().await.unwrap() {
            DomainEvent::SignificantMovement(m) => {
                assert_eq!(m.game_id, "g1");
                assert_eq!(m.new_value, -170.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let state = f.tracker.game_state("g1").unwrap();
        assert_eq!(state.movements.len(), 1);
        assert_eq!(
            state.current_odds[0].price(MarketKind::H2h, "home"),
            Some(-170.0)
        );
    }

    #[tokio::test]
    async fn test_tracking_capacity_cap() {
        let mut config = test_config();
        config.max_tracked_games = 1;
        let f = fixture_with(config, ScriptedProvider::new());

        start(&f, "g1");
        let overflow =
            f.tracker
                .start_tracking("g2", Sport::NBA, "Heat", "Bucks", far_future());
        assert!(matches!(
            overflow,
            Err(LiveDataError::CapacityExceeded { limit: 1, .. })
        ));
        assert_eq!(f.tracker.tracked_count(), 1);
    }

    #[tokio::test]
    async fn test_start_tracking_is_idempotent() {
        let f = fixture();
        start(&f, "g1");
        start(&f, "g1");
        assert_eq!(f.tracker.tracked_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_archives_and_later_refresh_is_noop() {
        let f = fixture();
        f.provider
            .push(MarketKind::H2h, quotes("draftkings", &[("home", -150.0)]));
        start(&f, "g1");
        f.tracker.refresh("g1").await.unwrap();

        assert!(f.tracker.stop_tracking("g1").await);
        assert_eq!(f.tracker.tracked_count(), 0);

        let archived = f.store.get("tracking:history:g1").await.unwrap();
        assert_eq!(archived["game_id"], "g1");
        assert_eq!(archived["sport"], "NBA");

        // Refreshing an untracked game does nothing, quietly.
        let fetched_before = f.provider.fetches();
        assert!(f.tracker.refresh("g1").await.unwrap().is_empty());
        assert_eq!(f.provider.fetches(), fetched_before);

        assert!(!f.tracker.stop_tracking("g1").await);
    }

    #[tokio::test]
    async fn test_empty_fetch_keeps_previous_snapshot() {
        let f = fixture();
        f.provider
            .push(MarketKind::H2h, quotes("draftkings", &[("home", -150.0)]));
        start(&f, "g1");

        f.tracker.refresh("g1").await.unwrap();
        // Script exhausted: every market now returns no quotes.
        f.tracker.refresh("g1").await.unwrap();

        let state = f.tracker.game_state("g1").unwrap();
        assert_eq!(
            state.current_odds[0].price(MarketKind::H2h, "home"),
            Some(-150.0)
        );
    }

    #[tokio::test]
    async fn test_one_failed_market_does_not_block_others() {
        let f = fixture();
        f.provider.push_error(MarketKind::H2h, "timeout");
        f.provider
            .push(MarketKind::Totals, quotes("draftkings", &[("over", -110.0)]));
        start(&f, "g1");

        f.tracker.refresh("g1").await.unwrap();

        assert!(f.monitor.has_component("odds_provider"));
        let state = f.tracker.game_state("g1").unwrap();
        assert_eq!(
            state.current_odds[0].price(MarketKind::Totals, "over"),
            Some(-110.0)
        );
    }

    #[tokio::test]
    async fn test_overlapping_refresh_skipped() {
        let provider = ScriptedProvider::with_delay(Duration::from_millis(50));
        provider.push(MarketKind::H2h, quotes("draftkings", &[("home", -150.0)]));
        let f = fixture_with(test_config(), provider);
        start(&f, "g1");

        let t1 = f.tracker.clone();
        let t2 = f.tracker.clone();
        let (a, b) = tokio::join!(t1.refresh("g1"), t2.refresh("g1"));
        a.unwrap();
        b.unwrap();

        // Only one refresh actually hit the provider.
        assert_eq!(f.provider.fetches(), MarketKind::ALL.len() as u32);
    }

    #[tokio::test]
    async fn test_interleaved_refreshes_record_each_change_once() {
        let provider = ScriptedProvider::with_delay(Duration::from_millis(40));
        provider.push(MarketKind::H2h, quotes("draftkings", &[("home", -150.0)]));
        provider.push(MarketKind::H2h, quotes("draftkings", &[("home", -170.0)]));
        let f = fixture_with(test_config(), provider);
        start(&f, "g1");

        f.tracker.refresh("g1").await.unwrap(); // baseline

        // One of the overlapping refreshes runs, the other is skipped; the
        // winner must diff against the latest committed snapshot, not one
        // captured before the guard was taken.
        let t1 = f.tracker.clone();
        let t2 = f.tracker.clone();
        let (a, b) = tokio::join!(t1.refresh("g1"), t2.refresh("g1"));
        assert_eq!(a.unwrap().len() + b.unwrap().len(), 1);

        // Exhausted script: empty fetch keeps the snapshot, no re-diffing.
        f.tracker.refresh("g1").await.unwrap();

        let movements = f.tracker.movements("g1");
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement, -20.0);
    }

    #[tokio::test]
    async fn test_movement_history_capped() {
        let mut config = test_config();
        config.max_movement_history = 2;
        config.significant_movement_threshold = 1.0;
        let f = fixture_with(config, ScriptedProvider::new());

        for price in [-150.0, -155.0, -160.0, -165.0] {
            f.provider
                .push(MarketKind::H2h, quotes("draftkings", &[("home", price)]));
        }
        start(&f, "g1");
        for _ in 0..4 {
            f.tracker.refresh("g1").await.unwrap();
        }

        let movements = f.tracker.movements("g1");
        assert_eq!(movements.len(), 2);
        // Oldest entries were dropped first.
        assert_eq!(movements[0].new_value, -160.0);
        assert_eq!(movements[1].new_value, -165.0);
    }
}
