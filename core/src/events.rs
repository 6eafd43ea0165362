//! Typed in-process event bus.
//!
//! One strongly typed variant per domain event, delivered over a tokio
//! broadcast channel. Consumers subscribe for a receiver; slow consumers lag
//! and miss events rather than applying backpressure to producers.

use crate::models::{Alert, ChannelKind, MarketKind, OddsMovement};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum DomainEvent {
    ScoreUpdate {
        game_id: String,
        home_score: u16,
        away_score: u16,
        period: Option<u8>,
    },
    OddsChange {
        game_id: String,
        bookmaker: String,
        market: MarketKind,
        side: String,
        price: f64,
    },
    PlayerStatUpdate {
        game_id: String,
        player_id: String,
        stat: String,
        value: f64,
    },
    InjuryReport {
        team_id: String,
        player_id: String,
        status: String,
    },
    ConnectionEstablished {
        channel: ChannelKind,
    },
    ConnectionLost {
        channel: ChannelKind,
        terminal: bool,
    },
    Reconnecting {
        channel: ChannelKind,
        attempt: u32,
    },
    DataError {
        channel: Option<ChannelKind>,
        detail: String,
    },
    RateLimitWarning {
        channel: ChannelKind,
        dropped: u64,
    },
    SignificantMovement(OddsMovement),
    OddsAlert(Alert),
}

impl DomainEvent {
    /// Wire-style name, used in logs and downstream routing.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::ScoreUpdate { .. } => "score_update",
            DomainEvent::OddsChange { .. } => "odds_change",
            DomainEvent::PlayerStatUpdate { .. } => "player_stat_update",
            DomainEvent::InjuryReport { .. } => "injury_report",
            DomainEvent::ConnectionEstablished { .. } => "connection_established",
            DomainEvent::ConnectionLost { .. } => "connection_lost",
            DomainEvent::Reconnecting { .. } => "reconnecting",
            DomainEvent::DataError { .. } => "data_error",
            DomainEvent::RateLimitWarning { .. } => "rate_limit_warning",
            DomainEvent::SignificantMovement(_) => "significant_movement",
            DomainEvent::OddsAlert(_) => "odds_alert",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Publish to all current subscribers. Having no subscribers is fine.
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ConnectionEstablished {
            channel: ChannelKind::Scores,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "connection_established");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::RateLimitWarning {
            channel: ChannelKind::Odds,
            dropped: 3,
        });
    }

    #[test]
    fn test_event_kind_names() {
        let event = DomainEvent::DataError {
            channel: None,
            detail: "bad frame".to_string(),
        };
        assert_eq!(event.kind(), "data_error");

        let event = DomainEvent::ConnectionLost {
            channel: ChannelKind::Odds,
            terminal: true,
        };
        assert_eq!(event.kind(), "connection_lost");
    }
}
