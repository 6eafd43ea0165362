//! Line Tracker Service
//!
//! Live sports line monitoring and movement alerting.
//!
//! This service:
//! - Maintains streaming connections for live scores and odds changes
//! - Tracks per-game odds across bookmakers on an adaptive cadence
//! - Detects line movements and reversals between snapshots
//! - Raises alerts when movements cross the configured thresholds
//!
//! Runs against simulated upstream collaborators; swap `sim` for real
//! transport and provider implementations in a production deployment.

mod sim;

use anyhow::Result;
use chrono::Utc;
use dotenv::dotenv;
use linewatch_core::{
    monitor_from_env, DomainEvent, LiveDataConfig, LiveDataService, MemoryTtlStore, Sport,
};
use sim::{SimProvider, SimTransport, SIM_GAME_ID};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Line Tracker Service...");

    let config = LiveDataConfig::from_env();
    let store = Arc::new(MemoryTtlStore::new());
    let monitor = monitor_from_env();
    let transport = Arc::new(SimTransport::new());
    let provider = Arc::new(SimProvider::new());

    let service = Arc::new(LiveDataService::new(
        config, transport, provider, store, monitor,
    ));
    service.start();

    service.subscribe_to_live_scores(Sport::NBA).await?;
    service
        .start_tracking_game(
            SIM_GAME_ID,
            Sport::NBA,
            "Celtics",
            "Lakers",
            Utc::now() + chrono::Duration::hours(1),
        )
        .await?;

    let mut events = service.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    warn!("event log lagged, missed {} events", missed)
                }
                Err(RecvError::Closed) => return,
            }
        }
    });

    let status_service = service.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let status = status_service.status();
            info!(
                "status: {} subscriptions, {} tracked games, {} dropped frames, {} alerts",
                status.subscriptions,
                status.tracked_games,
                status.dropped_frames,
                status.alerts_buffered
            );
            for channel in status.connections {
                info!(
                    "  {} channel: {:?} ({} reconnect attempts)",
                    channel.channel, channel.state, channel.reconnect_attempts
                );
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    service.shutdown().await;
    Ok(())
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::ScoreUpdate {
            game_id,
            home_score,
            away_score,
            ..
        } => info!("score {}: {}-{}", game_id, home_score, away_score),
        DomainEvent::OddsChange {
            game_id,
            bookmaker,
            market,
            side,
            price,
        } => debug!(
            "odds {} {} {} {} -> {}",
            game_id, bookmaker, market, side, price
        ),
        DomainEvent::SignificantMovement(m) => info!(
            "movement {} {} {} {}: {} -> {} ({:+.1}, {:+.1}%)",
            m.game_id, m.bookmaker, m.market, m.side, m.old_value, m.new_value, m.movement,
            m.movement_pct
        ),
        DomainEvent::OddsAlert(alert) => warn!(
            "{:?} alert [{:?}] {}: {} {} {} moved {:+.1}",
            alert.severity,
            alert.alert_type,
            alert.game_id,
            alert.movement.bookmaker,
            alert.movement.market,
            alert.movement.side,
            alert.movement.movement
        ),
        DomainEvent::ConnectionEstablished { channel } => info!("{} channel connected", channel),
        DomainEvent::ConnectionLost { channel, terminal } => {
            warn!("{} channel lost (terminal: {})", channel, terminal)
        }
        DomainEvent::Reconnecting { channel, attempt } => {
            info!("{} channel reconnecting (attempt {})", channel, attempt)
        }
        DomainEvent::RateLimitWarning { channel, dropped } => {
            warn!("{} channel over budget, dropped {}", channel, dropped)
        }
        DomainEvent::DataError { detail, .. } => debug!("data error: {}", detail),
        _ => {}
    }
}
