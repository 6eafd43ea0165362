//! Persistent per-channel streaming connections.
//!
//! One live transport connection per channel kind at any time, owned by a
//! dedicated driver task. The driver sends heartbeat keepalives on a fixed
//! interval, forwards inbound frames in arrival order, and reconnects with
//! bounded backoff when the stream drops. Exhausting the retry budget closes
//! the channel for good and emits a single terminal `connection_lost`.

use crate::config::StreamConfig;
use crate::error::LiveDataError;
use crate::events::{DomainEvent, EventBus};
use crate::models::{ChannelKind, ChannelStatus, ConnectionState, ControlFrame};
use crate::monitoring::ErrorMonitor;
use crate::stream::transport::{StreamConnection, StreamTransport};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Source of subscribe frames to replay after a connection is established.
pub trait SubscriptionSnapshot: Send + Sync {
    fn control_frames(&self, channel: ChannelKind) -> Vec<ControlFrame>;
}

/// Statistics for monitoring connection behavior
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connect_attempts: AtomicU64,
    pub successful_connects: AtomicU64,
    pub failed_connects: AtomicU64,
}

impl ConnectionStats {
    pub fn record_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful_connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_connects.fetch_add(1, Ordering::Relaxed);
    }
}

struct ChannelHandle {
    state: Arc<RwLock<ConnectionState>>,
    attempts: Arc<AtomicU32>,
    last_heartbeat: Arc<RwLock<Option<DateTime<Utc>>>>,
    outbound: mpsc::UnboundedSender<String>,
    task: tokio::task::JoinHandle<()>,
}

pub struct ConnectionManager {
    transport: Arc<dyn StreamTransport>,
    config: StreamConfig,
    events: EventBus,
    monitor: Arc<dyn ErrorMonitor>,
    inbound: mpsc::UnboundedSender<(ChannelKind, String)>,
    channels: RwLock<HashMap<ChannelKind, ChannelHandle>>,
    resubscribe: Arc<RwLock<Option<Arc<dyn SubscriptionSnapshot>>>>,
    stats: Arc<ConnectionStats>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        config: StreamConfig,
        events: EventBus,
        monitor: Arc<dyn ErrorMonitor>,
        inbound: mpsc::UnboundedSender<(ChannelKind, String)>,
    ) -> Self {
        Self {
            transport,
            config,
            events,
            monitor,
            inbound,
            channels: RwLock::new(HashMap::new()),
            resubscribe: Arc::new(RwLock::new(None)),
            stats: Arc::new(ConnectionStats::default()),
        }
    }

    /// Attach the registry whose subscribe frames are replayed after each
    /// (re)connect.
    pub fn set_resubscribe(&self, snapshot: Arc<dyn SubscriptionSnapshot>) {
        *self.resubscribe.write() = Some(snapshot);
    }

    /// Return once a live connection exists for the channel, opening one if
    /// needed. A transport failure during the initial open fails this call.
    pub async fn get_or_create(&self, channel: ChannelKind) -> Result<(), LiveDataError> {
        if self.is_usable(channel) {
            return Ok(());
        }

        self.stats.record_attempt();
        let conn = match self.transport.connect(channel).await {
            Ok(conn) => conn,
            Err(e) => {
                self.stats.record_failure();
                self.events.publish(DomainEvent::DataError {
                    channel: Some(channel),
                    detail: e.to_string(),
                });
                self.monitor
                    .report("connection", &format!("{} open failed: {}", channel, e));
                return Err(e);
            }
        };

        let mut channels = self.channels.write();
        // Lost the race against a concurrent open; keep the winner.
        if let Some(existing) = channels.get(&channel) {
            if *existing.state.read() != ConnectionState::PermanentlyClosed {
                return Ok(());
            }
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));
        let attempts = Arc::new(AtomicU32::new(0));
        let last_heartbeat = Arc::new(RwLock::new(None));

        let ctx = ChannelCtx {
            channel,
            transport: self.transport.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            monitor: self.monitor.clone(),
            inbound: self.inbound.clone(),
            resubscribe: self.resubscribe.clone(),
            state: state.clone(),
            attempts: attempts.clone(),
            last_heartbeat: last_heartbeat.clone(),
            stats: self.stats.clone(),
            outbound: outbound_rx,
        };
        let task = tokio::spawn(run_channel(conn, ctx));

        if let Some(old) = channels.insert(
            channel,
            ChannelHandle {
                state,
                attempts,
                last_heartbeat,
                outbound: outbound_tx,
                task,
            },
        ) {
            old.task.abort();
        }

        Ok(())
    }

    /// Send a control frame on a channel, opening the connection first if
    /// necessary.
    pub async fn send_control(
        &self,
        channel: ChannelKind,
        frame: &ControlFrame,
    ) -> Result<(), LiveDataError> {
        self.get_or_create(channel).await?;

        let payload =
            serde_json::to_string(frame).map_err(|e| LiveDataError::Parse(e.to_string()))?;

        let channels = self.channels.read();
        let handle = channels
            .get(&channel)
            .ok_or_else(|| LiveDataError::Connection(format!("{} channel missing", channel)))?;
        handle
            .outbound
            .send(payload)
            .map_err(|_| LiveDataError::Connection(format!("{} channel closed", channel)))
    }

    pub fn state(&self, channel: ChannelKind) -> ConnectionState {
        self.channels
            .read()
            .get(&channel)
            .map(|h| *h.state.read())
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn status(&self) -> Vec<ChannelStatus> {
        self.channels
            .read()
            .iter()
            .map(|(channel, handle)| ChannelStatus {
                channel: *channel,
                state: *handle.state.read(),
                reconnect_attempts: handle.attempts.load(Ordering::Relaxed),
                last_heartbeat: *handle.last_heartbeat.read(),
            })
            .collect()
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        self.stats.clone()
    }

    /// Abort every driver task and mark all channels closed.
    pub fn shutdown(&self) {
        let mut channels = self.channels.write();
        for (channel, handle) in channels.drain() {
            handle.task.abort();
            *handle.state.write() = ConnectionState::Closed;
            debug!("{} channel shut down", channel);
        }
    }

    fn is_usable(&self, channel: ChannelKind) -> bool {
        self.channels
            .read()
            .get(&channel)
            .map(|h| *h.state.read() != ConnectionState::PermanentlyClosed)
            .unwrap_or(false)
    }
}

fn keepalive_frame() -> String {
    serde_json::json!({
        "action": "keepalive",
        "timestamp": Utc::now().to_rfc3339(),
    })
    .to_string()
}

struct ChannelCtx {
    channel: ChannelKind,
    transport: Arc<dyn StreamTransport>,
    config: StreamConfig,
    events: EventBus,
    monitor: Arc<dyn ErrorMonitor>,
    inbound: mpsc::UnboundedSender<(ChannelKind, String)>,
    resubscribe: Arc<RwLock<Option<Arc<dyn SubscriptionSnapshot>>>>,
    state: Arc<RwLock<ConnectionState>>,
    attempts: Arc<AtomicU32>,
    last_heartbeat: Arc<RwLock<Option<DateTime<Utc>>>>,
    stats: Arc<ConnectionStats>,
    outbound: mpsc::UnboundedReceiver<String>,
}

enum SessionInput {
    Heartbeat,
    Outbound(Option<String>),
    Inbound(Option<Result<String, LiveDataError>>),
}

/// Driver task owning one channel's transport connection across reconnects.
async fn run_channel(mut conn: Box<dyn StreamConnection>, mut ctx: ChannelCtx) {
    loop {
        ctx.attempts.store(0, Ordering::SeqCst);
        *ctx.state.write() = ConnectionState::Open;
        ctx.stats.record_success();
        ctx.events.publish(DomainEvent::ConnectionEstablished {
            channel: ctx.channel,
        });
        info!("{} channel connected", ctx.channel);

        if !replay_subscriptions(&mut conn, &ctx).await {
            // Replay failure counts as a lost session.
        } else if run_session(&mut conn, &mut ctx).await == SessionEnd::Shutdown {
            *ctx.state.write() = ConnectionState::Closed;
            return;
        }

        ctx.stats.record_failure();
        ctx.events.publish(DomainEvent::ConnectionLost {
            channel: ctx.channel,
            terminal: false,
        });
        warn!("{} channel lost", ctx.channel);

        conn = match reconnect(&mut ctx).await {
            Some(conn) => conn,
            None => return,
        };
    }
}

/// Send with a deadline. A transport wedged on a write would otherwise hold
/// the driver loop and stall inbound dispatch; past the deadline the
/// connection counts as dead.
async fn send_bounded(
    conn: &mut Box<dyn StreamConnection>,
    frame: String,
    deadline: Duration,
) -> Result<(), LiveDataError> {
    match tokio::time::timeout(deadline, conn.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(LiveDataError::Connection(format!(
            "send timed out after {:?}",
            deadline
        ))),
    }
}

/// Re-send subscribe frames for this channel. Returns false when the
/// connection died mid-replay.
async fn replay_subscriptions(conn: &mut Box<dyn StreamConnection>, ctx: &ChannelCtx) -> bool {
    let frames = match ctx.resubscribe.read().clone() {
        Some(snapshot) => snapshot.control_frames(ctx.channel),
        None => Vec::new(),
    };

    for frame in frames {
        let payload = match serde_json::to_string(&frame) {
            Ok(p) => p,
            Err(e) => {
                warn!("skipping unserializable subscribe frame: {}", e);
                continue;
            }
        };
        if let Err(e) = send_bounded(conn, payload, ctx.config.heartbeat_interval).await {
            ctx.monitor
                .report("connection", &format!("{} replay failed: {}", ctx.channel, e));
            return false;
        }
    }
    true
}

#[derive(PartialEq)]
enum SessionEnd {
    Lost,
    Shutdown,
}

/// Pump one established connection until it drops or the manager goes away.
async fn run_session(conn: &mut Box<dyn StreamConnection>, ctx: &mut ChannelCtx) -> SessionEnd {
    let mut heartbeat = tokio::time::interval(ctx.config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; consume it so keepalives start
    // one interval after connect.
    heartbeat.tick().await;

    loop {
        let input = tokio::select! {
            _ = heartbeat.tick() => SessionInput::Heartbeat,
            frame = ctx.outbound.recv() => SessionInput::Outbound(frame),
            frame = conn.next_frame() => SessionInput::Inbound(frame),
        };

        match input {
            SessionInput::Heartbeat => {
                let frame = keepalive_frame();
                if let Err(e) = send_bounded(conn, frame, ctx.config.heartbeat_interval).await {
                    ctx.monitor
                        .report("connection", &format!("{} keepalive failed: {}", ctx.channel, e));
                    return SessionEnd::Lost;
                }
                *ctx.last_heartbeat.write() = Some(Utc::now());
            }
            SessionInput::Outbound(Some(frame)) => {
                if let Err(e) = send_bounded(conn, frame, ctx.config.heartbeat_interval).await {
                    ctx.monitor
                        .report("connection", &format!("{} send failed: {}", ctx.channel, e));
                    return SessionEnd::Lost;
                }
            }
            SessionInput::Outbound(None) => {
                debug!("{} manager dropped, stopping driver", ctx.channel);
                return SessionEnd::Shutdown;
            }
            SessionInput::Inbound(Some(Ok(text))) => {
                if ctx.inbound.send((ctx.channel, text)).is_err() {
                    debug!("{} dispatcher gone, stopping driver", ctx.channel);
                    return SessionEnd::Shutdown;
                }
            }
            SessionInput::Inbound(Some(Err(e))) => {
                ctx.events.publish(DomainEvent::DataError {
                    channel: Some(ctx.channel),
                    detail: e.to_string(),
                });
                ctx.monitor
                    .report("connection", &format!("{} transport error: {}", ctx.channel, e));
                return SessionEnd::Lost;
            }
            SessionInput::Inbound(None) => {
                debug!("{} stream ended", ctx.channel);
                return SessionEnd::Lost;
            }
        }
    }
}

/// Retry the transport with backoff. `None` means the budget is exhausted and
/// the channel is permanently closed.
async fn reconnect(ctx: &mut ChannelCtx) -> Option<Box<dyn StreamConnection>> {
    loop {
        let attempt = ctx.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > ctx.config.reconnect.max_attempts {
            error!(
                "{} reconnect attempts exhausted ({}), closing channel",
                ctx.channel, ctx.config.reconnect.max_attempts
            );
            *ctx.state.write() = ConnectionState::PermanentlyClosed;
            ctx.events.publish(DomainEvent::ConnectionLost {
                channel: ctx.channel,
                terminal: true,
            });
            return None;
        }

        *ctx.state.write() = ConnectionState::Reconnecting;
        ctx.events.publish(DomainEvent::Reconnecting {
            channel: ctx.channel,
            attempt,
        });

        let delay = ctx.config.reconnect.delay_for(attempt - 1);
        info!(
            "{} reconnecting in {:?} (attempt {}/{})",
            ctx.channel, delay, attempt, ctx.config.reconnect.max_attempts
        );
        tokio::time::sleep(delay).await;

        ctx.stats.record_attempt();
        match ctx.transport.connect(ctx.channel).await {
            Ok(conn) => return Some(conn),
            Err(e) => {
                ctx.stats.record_failure();
                ctx.monitor.report(
                    "connection",
                    &format!("{} reconnect attempt {} failed: {}", ctx.channel, attempt, e),
                );
            }
        }
    }
}
