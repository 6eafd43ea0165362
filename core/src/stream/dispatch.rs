//! Inbound frame dispatch.
//!
//! Frames arrive from the per-channel drivers in connection order. Each one
//! passes a sliding-window rate limiter, is parsed in two stages (envelope
//! first, typed payload second), cached under a short TTL for late readers,
//! and published as a typed domain event. A bad frame never takes the loop
//! down; it is counted, reported and dropped.

use crate::cache::TtlStore;
use crate::config::StreamConfig;
use crate::events::{DomainEvent, EventBus};
use crate::models::{known_message_type, ChannelKind, InboundMessage};
use crate::monitoring::ErrorMonitor;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

// ============================================================================
// Rate Limiting
// ============================================================================

/// Sliding one-second window. Frames beyond the budget are dropped, not
/// queued; for live data a stale frame is worse than a missing one.
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    admitted: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32) -> Self {
        Self {
            max_per_window,
            window: Duration::from_secs(1),
            admitted: VecDeque::new(),
        }
    }

    /// Whether a frame arriving at `now` fits the window budget.
    pub fn admit(&mut self, now: Instant) -> bool {
        while let Some(&front) = self.admitted.front() {
            if now.duration_since(front) >= self.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }

        if self.admitted.len() < self.max_per_window as usize {
            self.admitted.push_back(now);
            true
        } else {
            false
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct MessageDispatcher {
    events: EventBus,
    monitor: Arc<dyn ErrorMonitor>,
    cache: Arc<dyn TtlStore>,
    cache_ttl: Duration,
    max_updates_per_second: u32,
    dropped: Arc<AtomicU64>,
}

impl MessageDispatcher {
    pub fn new(
        config: &StreamConfig,
        events: EventBus,
        monitor: Arc<dyn ErrorMonitor>,
        cache: Arc<dyn TtlStore>,
    ) -> Self {
        Self {
            events,
            monitor,
            cache,
            cache_ttl: config.live_cache_ttl,
            max_updates_per_second: config.max_updates_per_second,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total frames dropped by the rate limiter since start.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    /// Consume frames until every driver sender is gone.
    pub async fn run(&self, mut inbound: mpsc::UnboundedReceiver<(ChannelKind, String)>) {
        let mut limiters: HashMap<ChannelKind, RateLimiter> = HashMap::new();
        let mut warn_state: HashMap<ChannelKind, (Option<Instant>, u64)> = HashMap::new();

        while let Some((channel, text)) = inbound.recv().await {
            let now = Instant::now();
            let limiter = limiters
                .entry(channel)
                .or_insert_with(|| RateLimiter::new(self.max_updates_per_second));

            if !limiter.admit(now) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let (last_warned, pending) = warn_state.entry(channel).or_insert((None, 0));
                *pending += 1;
                // At most one warning per window, carrying the drops since
                // the previous one.
                let due = match last_warned {
                    Some(t) => now.duration_since(*t) >= Duration::from_secs(1),
                    None => true,
                };
                if due {
                    self.events.publish(DomainEvent::RateLimitWarning {
                        channel,
                        dropped: *pending,
                    });
                    warn!("{} channel over budget, dropped {} frames", channel, pending);
                    *last_warned = Some(now);
                    *pending = 0;
                }
                continue;
            }

            self.handle_frame(channel, &text).await;
        }
        debug!("inbound senders closed, dispatcher stopping");
    }

    /// Parse and route one admitted frame.
    pub async fn handle_frame(&self, channel: ChannelKind, text: &str) {
        // Stage one: envelope. Tells bad JSON apart from an unknown type.
        let envelope: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                self.report_bad_frame(channel, &format!("malformed frame: {}", e));
                return;
            }
        };

        let msg_type = match envelope.get("type").and_then(Value::as_str) {
            Some(t) => t.to_owned(),
            None => {
                self.report_bad_frame(channel, "frame missing type field");
                return;
            }
        };
        if !known_message_type(&msg_type) {
            self.report_bad_frame(channel, &format!("unknown message type: {}", msg_type));
            return;
        }

        // Stage two: typed payload.
        let message: InboundMessage = match serde_json::from_value(envelope) {
            Ok(m) => m,
            Err(e) => {
                self.report_bad_frame(channel, &format!("bad {} payload: {}", msg_type, e));
                return;
            }
        };

        self.route(message).await;
    }

    async fn route(&self, message: InboundMessage) {
        match message {
            InboundMessage::LiveScore {
                game_id,
                home_score,
                away_score,
                period,
                ..
            } => {
                self.cache_update(
                    &format!("live:score:{}", game_id),
                    serde_json::json!({
                        "home_score": home_score,
                        "away_score": away_score,
                        "period": period,
                    }),
                )
                .await;
                self.events.publish(DomainEvent::ScoreUpdate {
                    game_id,
                    home_score,
                    away_score,
                    period,
                });
            }
            InboundMessage::OddsChange {
                game_id,
                bookmaker,
                market,
                side,
                price,
            } => {
                self.cache_update(
                    &format!("live:odds:{}:{}", game_id, bookmaker),
                    serde_json::json!({
                        "market": market,
                        "side": side,
                        "price": price,
                    }),
                )
                .await;
                self.events.publish(DomainEvent::OddsChange {
                    game_id,
                    bookmaker,
                    market,
                    side,
                    price,
                });
            }
            InboundMessage::PlayerStat {
                game_id,
                player_id,
                stat,
                value,
            } => {
                self.cache_update(
                    &format!("live:player:{}:{}", game_id, player_id),
                    serde_json::json!({ "stat": stat, "value": value }),
                )
                .await;
                self.events.publish(DomainEvent::PlayerStatUpdate {
                    game_id,
                    player_id,
                    stat,
                    value,
                });
            }
            InboundMessage::InjuryReport {
                team_id,
                player_id,
                status,
                detail,
            } => {
                self.cache_update(
                    &format!("live:injury:{}:{}", team_id, player_id),
                    serde_json::json!({ "status": status, "detail": detail }),
                )
                .await;
                self.events.publish(DomainEvent::InjuryReport {
                    team_id,
                    player_id,
                    status,
                });
            }
            InboundMessage::Heartbeat { .. } => {
                debug!("provider heartbeat received");
            }
        }
    }

    async fn cache_update(&self, key: &str, value: Value) {
        self.cache.set(key, value, self.cache_ttl).await;
    }

    fn report_bad_frame(&self, channel: ChannelKind, detail: &str) {
        self.monitor.report("dispatch", detail);
        self.events.publish(DomainEvent::DataError {
            channel: Some(channel),
            detail: detail.to_string(),
        });
    }
}
