//! Subscription bookkeeping.
//!
//! The registry is pure state: it decides whether a subscribe frame is new,
//! enforces the global capacity cap, and can replay every active frame for a
//! channel after a reconnect. Actually sending frames is the connection
//! manager's job.

use crate::error::LiveDataError;
use crate::models::{ChannelKind, ControlFrame, Sport};
use crate::stream::connection::SubscriptionSnapshot;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Channel a message type is carried on. Odds changes have their own
/// connection; everything else rides the scores channel.
pub fn channel_for(msg_type: &str) -> ChannelKind {
    if msg_type == "odds_change" {
        ChannelKind::Odds
    } else {
        ChannelKind::Scores
    }
}

/// Identity of a subscription. Two frames that differ only in timestamp are
/// the same subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubscriptionKey {
    channel: ChannelKind,
    msg_type: String,
    sport: Option<Sport>,
    game_id: Option<String>,
    player_ids: Option<Vec<String>>,
    team_ids: Option<Vec<String>>,
}

impl SubscriptionKey {
    fn from_frame(frame: &ControlFrame) -> Self {
        Self {
            channel: channel_for(&frame.msg_type),
            msg_type: frame.msg_type.clone(),
            sport: frame.sport,
            game_id: frame.game_id.clone(),
            player_ids: frame.player_ids.clone(),
            team_ids: frame.team_ids.clone(),
        }
    }
}

pub struct SubscriptionRegistry {
    max_subscriptions: usize,
    entries: RwLock<HashMap<SubscriptionKey, ControlFrame>>,
}

impl SubscriptionRegistry {
    pub fn new(max_subscriptions: usize) -> Self {
        Self {
            max_subscriptions,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record a subscription. Returns true when it is new and the frame
    /// should go out, false when it is already active.
    pub fn register(&self, frame: &ControlFrame) -> Result<bool, LiveDataError> {
        let key = SubscriptionKey::from_frame(frame);
        let mut entries = self.entries.write();

        if entries.contains_key(&key) {
            return Ok(false);
        }
        if entries.len() >= self.max_subscriptions {
            return Err(LiveDataError::CapacityExceeded {
                kind: "subscriptions",
                limit: self.max_subscriptions,
            });
        }

        entries.insert(key, frame.clone());
        Ok(true)
    }

    /// Drop a subscription, returning the originally recorded frame so the
    /// caller can derive the matching unsubscribe. `None` when it was never
    /// active.
    pub fn remove(&self, frame: &ControlFrame) -> Option<ControlFrame> {
        let key = SubscriptionKey::from_frame(frame);
        self.entries.write().remove(&key)
    }

    /// Drop every subscription scoped to a game, returning the recorded
    /// frames for unsubscribe delivery.
    pub fn remove_game(&self, game_id: &str) -> Vec<ControlFrame> {
        let mut entries = self.entries.write();
        let keys: Vec<SubscriptionKey> = entries
            .keys()
            .filter(|k| k.game_id.as_deref() == Some(game_id))
            .cloned()
            .collect();
        keys.iter().filter_map(|k| entries.remove(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SubscriptionSnapshot for SubscriptionRegistry {
    fn control_frames(&self, channel: ChannelKind) -> Vec<ControlFrame> {
        self.entries
            .read()
            .iter()
            .filter(|(key, _)| key.channel == channel)
            .map(|(_, frame)| frame.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketKind;

    #[test]
    fn test_register_is_idempotent() {
        let registry = SubscriptionRegistry::new(50);
        let frame = ControlFrame::subscribe("live_score").with_game_id("g1");

        assert!(registry.register(&frame).unwrap());
        // Same identity, later timestamp.
        let again = ControlFrame::subscribe("live_score").with_game_id("g1");
        assert!(!registry.register(&again).unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_capacity_cap_enforced() {
        let registry = SubscriptionRegistry::new(2);
        registry
            .register(&ControlFrame::subscribe("live_score").with_game_id("g1"))
            .unwrap();
        registry
            .register(&ControlFrame::subscribe("live_score").with_game_id("g2"))
            .unwrap();

        let overflow = registry.register(&ControlFrame::subscribe("live_score").with_game_id("g3"));
        assert!(matches!(
            overflow,
            Err(LiveDataError::CapacityExceeded { limit: 2, .. })
        ));
        assert_eq!(registry.len(), 2);

        // A duplicate at capacity is not an error.
        assert!(!registry
            .register(&ControlFrame::subscribe("live_score").with_game_id("g1"))
            .unwrap());
    }

    #[test]
    fn test_snapshot_split_by_channel() {
        let registry = SubscriptionRegistry::new(50);
        registry
            .register(&ControlFrame::subscribe("live_score").with_game_id("g1"))
            .unwrap();
        registry
            .register(
                &ControlFrame::subscribe("odds_change")
                    .with_game_id("g1")
                    .with_markets(vec![MarketKind::H2h]),
            )
            .unwrap();
        registry
            .register(&ControlFrame::subscribe("injury_report").with_team_ids(vec!["t1".into()]))
            .unwrap();

        assert_eq!(registry.control_frames(ChannelKind::Scores).len(), 2);
        assert_eq!(registry.control_frames(ChannelKind::Odds).len(), 1);
    }

    #[test]
    fn test_remove_returns_recorded_frame() {
        let registry = SubscriptionRegistry::new(50);
        let frame = ControlFrame::subscribe("odds_change")
            .with_game_id("g1")
            .with_markets(vec![MarketKind::Spreads]);
        registry.register(&frame).unwrap();

        let removed = registry.remove(&frame).expect("was registered");
        assert_eq!(removed.msg_type, "odds_change");
        assert!(registry.is_empty());
        assert!(registry.remove(&frame).is_none());
    }

    #[test]
    fn test_remove_game_clears_all_scopes() {
        let registry = SubscriptionRegistry::new(50);
        registry
            .register(&ControlFrame::subscribe("live_score").with_game_id("g1"))
            .unwrap();
        registry
            .register(&ControlFrame::subscribe("odds_change").with_game_id("g1"))
            .unwrap();
        registry
            .register(&ControlFrame::subscribe("live_score").with_game_id("g2"))
            .unwrap();

        let removed = registry.remove_game("g1");
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_channel_for_routing() {
        assert_eq!(channel_for("odds_change"), ChannelKind::Odds);
        assert_eq!(channel_for("live_score"), ChannelKind::Scores);
        assert_eq!(channel_for("player_stat"), ChannelKind::Scores);
        assert_eq!(channel_for("injury_report"), ChannelKind::Scores);
    }
}
