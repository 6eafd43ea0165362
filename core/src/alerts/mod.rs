//! Alerting on detected line movements.
//!
//! Each movement is scored against the alert thresholds; the ones that
//! qualify are stamped with an id, published as events and kept in a bounded
//! time-pruned history for later inspection.

use crate::config::AlertConfig;
use crate::events::{DomainEvent, EventBus};
use crate::models::{Alert, AlertSeverity, AlertType, OddsMovement};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct AlertEngine {
    config: AlertConfig,
    events: EventBus,
    history: RwLock<VecDeque<Alert>>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig, events: EventBus) -> Self {
        Self {
            config,
            events,
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// Score one movement. Returns the raised alert, if any.
    ///
    /// A sign flip always alerts as a line reversal at high severity,
    /// regardless of magnitude; anything else must meet the movement
    /// threshold and escalates to critical at the critical threshold.
    pub fn evaluate(&self, movement: &OddsMovement) -> Option<Alert> {
        let (alert_type, severity) = if movement.is_reversal {
            (AlertType::LineReversal, AlertSeverity::High)
        } else if movement.movement.abs() >= self.config.movement_threshold {
            let severity = if movement.movement.abs() >= self.config.critical_threshold {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            };
            (AlertType::SignificantMovement, severity)
        } else {
            return None;
        };

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            game_id: movement.game_id.clone(),
            alert_type,
            severity,
            movement: movement.clone(),
            timestamp: Utc::now(),
        };

        info!(
            "{:?} alert for {} ({} {} {}): {} -> {}",
            alert.severity,
            alert.game_id,
            movement.bookmaker,
            movement.market,
            movement.side,
            movement.old_value,
            movement.new_value
        );

        {
            let mut history = self.history.write();
            history.push_back(alert.clone());
            while history.len() > self.config.max_history {
                history.pop_front();
            }
        }

        self.events.publish(DomainEvent::OddsAlert(alert.clone()));
        Some(alert)
    }

    /// Drop alerts older than the retention window. Returns how many went.
    pub fn prune_expired(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        let mut history = self.history.write();
        let before = history.len();
        history.retain(|a| a.timestamp > cutoff);
        before - history.len()
    }

    /// Newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.history
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn alerts_for_game(&self, game_id: &str) -> Vec<Alert> {
        self.history
            .read()
            .iter()
            .filter(|a| a.game_id == game_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }

    /// Periodic retention sweep, for long-running processes.
    pub fn spawn_cleanup(engine: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = engine.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let pruned = engine.prune_expired();
                if pruned > 0 {
                    debug!("pruned {} expired alerts", pruned);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketKind;
    use std::time::Duration;

    fn test_config() -> AlertConfig {
        AlertConfig {
            movement_threshold: 20.0,
            critical_threshold: 50.0,
            retention: Duration::from_secs(24 * 3600),
            max_history: 1000,
            cleanup_interval: Duration::from_secs(3600),
        }
    }

    fn movement(game_id: &str, old_value: f64, new_value: f64) -> OddsMovement {
        let delta = new_value - old_value;
        OddsMovement {
            game_id: game_id.to_string(),
            bookmaker: "draftkings".to_string(),
            market: MarketKind::H2h,
            side: "home".to_string(),
            old_value,
            new_value,
            movement: delta,
            movement_pct: if old_value != 0.0 {
                delta / old_value.abs() * 100.0
            } else {
                0.0
            },
            is_significant: delta.abs() >= 10.0,
            is_reversal: old_value != 0.0
                && new_value != 0.0
                && (old_value > 0.0) != (new_value > 0.0),
            timestamp: Utc::now(),
        }
    }

    fn engine() -> (AlertEngine, EventBus) {
        let events = EventBus::new(64);
        (AlertEngine::new(test_config(), events.clone()), events)
    }

    #[tokio::test]
    async fn test_threshold_movement_raises_high_alert() {
        let (engine, events) = engine();
        let mut rx = events.subscribe();

        let alert = engine.evaluate(&movement("g1", -150.0, -175.0)).unwrap();
        assert_eq!(alert.alert_type, AlertType::SignificantMovement);
        assert_eq!(alert.severity, AlertSeverity::High);

        match rx.recv().await.unwrap() {
            DomainEvent::OddsAlert(published) => assert_eq!(published.id, alert.id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_critical_threshold_escalates() {
        let (engine, _events) = engine();
        let alert = engine.evaluate(&movement("g1", -150.0, -210.0)).unwrap();
        assert_eq!(alert.alert_type, AlertType::SignificantMovement);
        assert_eq!(alert.severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_small_movement_no_alert() {
        let (engine, _events) = engine();
        assert!(engine.evaluate(&movement("g1", -110.0, -115.0)).is_none());
        assert!(engine.is_empty());
    }

    #[test]
    fn test_reversal_alerts_below_movement_threshold() {
        let (engine, _events) = engine();
        let mut small = movement("g1", 8.0, -8.0);
        small.movement = -16.0;
        let alert = engine.evaluate(&small).unwrap();
        assert_eq!(alert.alert_type, AlertType::LineReversal);
        assert_eq!(alert.severity, AlertSeverity::High);
    }

    #[test]
    fn test_reversal_severity_pinned_high() {
        let (engine, _events) = engine();
        // |Δ| = 203, well past the critical threshold, but a reversal
        // alerts at high severity no matter the magnitude.
        let alert = engine.evaluate(&movement("g1", 102.0, -101.0)).unwrap();
        assert_eq!(alert.alert_type, AlertType::LineReversal);
        assert_eq!(alert.severity, AlertSeverity::High);
    }

    #[test]
    fn test_history_bounded() {
        let mut config = test_config();
        config.max_history = 2;
        let engine = AlertEngine::new(config, EventBus::new(64));

        engine.evaluate(&movement("g1", -100.0, -130.0)).unwrap();
        engine.evaluate(&movement("g2", -100.0, -130.0)).unwrap();
        engine.evaluate(&movement("g3", -100.0, -130.0)).unwrap();

        assert_eq!(engine.len(), 2);
        let recent = engine.recent_alerts(10);
        assert_eq!(recent[0].game_id, "g3");
        assert_eq!(recent[1].game_id, "g2");
        assert!(engine.alerts_for_game("g1").is_empty());
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let mut config = test_config();
        config.retention = Duration::from_millis(10);
        let engine = AlertEngine::new(config, EventBus::new(64));

        engine.evaluate(&movement("g1", -100.0, -130.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        engine.evaluate(&movement("g2", -100.0, -130.0)).unwrap();

        assert_eq!(engine.prune_expired(), 1);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.recent_alerts(10)[0].game_id, "g2");
    }
}
