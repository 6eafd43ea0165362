//! Service facade.
//!
//! `LiveDataService` owns the streaming side (connections, subscriptions,
//! dispatch) and the tracking side (per-game refresh, alerting), wired
//! together over the event bus. Collaborators are injected at construction;
//! there are no global singletons.

use crate::alerts::AlertEngine;
use crate::cache::TtlStore;
use crate::config::LiveDataConfig;
use crate::error::LiveDataError;
use crate::events::{DomainEvent, EventBus};
use crate::models::{
    Alert, ChannelKind, ControlFrame, GameTrackingState, MarketKind, ServiceStatus, Sport,
};
use crate::monitoring::ErrorMonitor;
use crate::stream::subscriptions::channel_for;
use crate::stream::{
    ConnectionManager, MessageDispatcher, StreamTransport, SubscriptionRegistry,
};
use crate::tracker::{LineTracker, OddsProvider};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

pub struct LiveDataService {
    events: EventBus,
    connections: Arc<ConnectionManager>,
    subscriptions: Arc<SubscriptionRegistry>,
    dispatcher: Arc<MessageDispatcher>,
    tracker: LineTracker,
    alerts: Arc<AlertEngine>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<(ChannelKind, String)>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    started: AtomicBool,
}

impl LiveDataService {
    pub fn new(
        mut config: LiveDataConfig,
        transport: Arc<dyn StreamTransport>,
        provider: Arc<dyn OddsProvider>,
        store: Arc<dyn TtlStore>,
        monitor: Arc<dyn ErrorMonitor>,
    ) -> Self {
        config
            .alerts
            .floor_movement_threshold(config.tracker.significant_movement_threshold);

        let events = EventBus::default();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let connections = Arc::new(ConnectionManager::new(
            transport,
            config.stream.clone(),
            events.clone(),
            monitor.clone(),
            inbound_tx,
        ));
        let subscriptions = Arc::new(SubscriptionRegistry::new(config.stream.max_subscriptions));
        connections.set_resubscribe(subscriptions.clone());

        let dispatcher = Arc::new(MessageDispatcher::new(
            &config.stream,
            events.clone(),
            monitor.clone(),
            store.clone(),
        ));
        let tracker = LineTracker::new(
            config.tracker.clone(),
            provider,
            store,
            events.clone(),
            monitor,
        );
        let alerts = Arc::new(AlertEngine::new(config.alerts.clone(), events.clone()));

        Self {
            events,
            connections,
            subscriptions,
            dispatcher,
            tracker,
            alerts,
            inbound: Mutex::new(Some(inbound_rx)),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the background loops: frame dispatch, movement-to-alert wiring
    /// and alert retention cleanup. Safe to call once; later calls no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks.lock();

        if let Some(inbound) = self.inbound.lock().take() {
            let dispatcher = self.dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher.run(inbound).await;
            }));
        }

        let alerts = self.alerts.clone();
        let mut rx = self.events.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(DomainEvent::SignificantMovement(movement)) => {
                        alerts.evaluate(&movement);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("alert loop lagged, missed {} events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }));

        tasks.push(AlertEngine::spawn_cleanup(self.alerts.clone()));
        info!("live data service started");
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub async fn subscribe_to_live_scores(&self, sport: Sport) -> Result<(), LiveDataError> {
        self.subscribe(ControlFrame::subscribe("live_score").with_sport(sport))
            .await
    }

    pub async fn subscribe_to_odds_movement(
        &self,
        game_id: &str,
        markets: Vec<MarketKind>,
    ) -> Result<(), LiveDataError> {
        self.subscribe(
            ControlFrame::subscribe("odds_change")
                .with_game_id(game_id)
                .with_markets(markets),
        )
        .await
    }

    pub async fn subscribe_to_player_stats(
        &self,
        game_id: &str,
        player_ids: Vec<String>,
    ) -> Result<(), LiveDataError> {
        self.subscribe(
            ControlFrame::subscribe("player_stat")
                .with_game_id(game_id)
                .with_player_ids(player_ids),
        )
        .await
    }

    pub async fn subscribe_to_injury_reports(
        &self,
        team_ids: Vec<String>,
    ) -> Result<(), LiveDataError> {
        self.subscribe(ControlFrame::subscribe("injury_report").with_team_ids(team_ids))
            .await
    }

    /// Register and send a subscribe frame. A duplicate registration sends
    /// nothing. When the channel cannot be opened the registration is kept;
    /// the frame replays as soon as the channel comes up.
    pub async fn subscribe(&self, frame: ControlFrame) -> Result<(), LiveDataError> {
        if !self.subscriptions.register(&frame)? {
            return Ok(());
        }
        self.connections
            .send_control(channel_for(&frame.msg_type), &frame)
            .await
    }

    /// Best-effort unsubscribe. Returns whether the subscription existed.
    pub async fn unsubscribe(&self, frame: &ControlFrame) -> bool {
        let Some(recorded) = self.subscriptions.remove(frame) else {
            return false;
        };
        self.send_unsubscribe(&recorded).await;
        true
    }

    async fn send_unsubscribe(&self, recorded: &ControlFrame) {
        let unsub = recorded.to_unsubscribe();
        if let Err(e) = self
            .connections
            .send_control(channel_for(&unsub.msg_type), &unsub)
            .await
        {
            warn!("unsubscribe frame not delivered: {}", e);
        }
    }

    // ========================================================================
    // Game Tracking
    // ========================================================================

    /// Start tracking a game: register it, subscribe to its odds stream and
    /// take the baseline snapshot right away.
    pub async fn start_tracking_game(
        &self,
        game_id: &str,
        sport: Sport,
        home_team: &str,
        away_team: &str,
        game_date: DateTime<Utc>,
    ) -> Result<(), LiveDataError> {
        self.tracker
            .start_tracking(game_id, sport, home_team, away_team, game_date)?;

        if let Err(e) = self
            .subscribe_to_odds_movement(game_id, MarketKind::ALL.to_vec())
            .await
        {
            warn!("odds subscription for {} not delivered: {}", game_id, e);
        }

        if let Err(e) = self.tracker.refresh(game_id).await {
            warn!("baseline refresh for {} failed: {}", game_id, e);
        }
        Ok(())
    }

    /// Stop tracking: drop the game's subscriptions and archive its state.
    pub async fn stop_tracking_game(&self, game_id: &str) -> bool {
        for recorded in self.subscriptions.remove_game(game_id) {
            self.send_unsubscribe(&recorded).await;
        }
        self.tracker.stop_tracking(game_id).await
    }

    pub fn game_tracking_data(&self, game_id: &str) -> Option<GameTrackingState> {
        self.tracker.game_state(game_id)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts.recent_alerts(limit)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> ServiceStatus {
        let stats = self.connections.stats();
        ServiceStatus {
            connections: self.connections.status(),
            connect_attempts: stats.connect_attempts.load(Ordering::Relaxed),
            successful_connects: stats.successful_connects.load(Ordering::Relaxed),
            failed_connects: stats.failed_connects.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.len(),
            tracked_games: self.tracker.tracked_count(),
            dropped_frames: self.dispatcher.dropped_frames(),
            alerts_buffered: self.alerts.len(),
        }
    }

    /// Archive every tracked game, close every channel and stop the
    /// background loops.
    pub async fn shutdown(&self) {
        info!("live data service shutting down");
        self.tracker.stop_all().await;
        self.connections.shutdown();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
