// Shared domain models for LineWatch services
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Sport & Channel Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sport {
    NBA,
    NCAAB,
    NFL,
    NCAAF,
    NHL,
    MLB,
    MLS,
    #[serde(rename = "SOCCER")]
    Soccer,
}

impl Sport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::NBA => "NBA",
            Sport::NCAAB => "NCAAB",
            Sport::NFL => "NFL",
            Sport::NCAAF => "NCAAF",
            Sport::NHL => "NHL",
            Sport::MLB => "MLB",
            Sport::MLS => "MLS",
            Sport::Soccer => "SOCCER",
        }
    }
}

/// Logical class of persistent streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Scores,
    Odds,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Scores => "scores",
            ChannelKind::Odds => "odds",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bettable market category for a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    H2h,
    Spreads,
    Totals,
}

impl MarketKind {
    pub const ALL: [MarketKind; 3] = [MarketKind::H2h, MarketKind::Spreads, MarketKind::Totals];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::H2h => "h2h",
            MarketKind::Spreads => "spreads",
            MarketKind::Totals => "totals",
        }
    }
}

impl std::fmt::Display for MarketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Connection & Subscription
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Reconnecting,
    PermanentlyClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

/// Outbound control frame sent to the streaming provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFrame {
    pub action: ControlAction,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sport: Option<Sport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markets: Option<Vec<MarketKind>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_ids: Option<Vec<String>>,
    pub timestamp: DateTime<Utc>,
}

impl ControlFrame {
    pub fn subscribe(msg_type: &str) -> Self {
        Self {
            action: ControlAction::Subscribe,
            msg_type: msg_type.to_string(),
            sport: None,
            game_id: None,
            markets: None,
            player_ids: None,
            team_ids: None,
            timestamp: Utc::now(),
        }
    }

    /// Derive the matching unsubscribe frame for a recorded subscription.
    pub fn to_unsubscribe(&self) -> Self {
        let mut frame = self.clone();
        frame.action = ControlAction::Unsubscribe;
        frame.timestamp = Utc::now();
        frame
    }

    pub fn with_sport(mut self, sport: Sport) -> Self {
        self.sport = Some(sport);
        self
    }

    pub fn with_game_id(mut self, game_id: &str) -> Self {
        self.game_id = Some(game_id.to_string());
        self
    }

    pub fn with_markets(mut self, markets: Vec<MarketKind>) -> Self {
        self.markets = Some(markets);
        self
    }

    pub fn with_player_ids(mut self, player_ids: Vec<String>) -> Self {
        self.player_ids = Some(player_ids);
        self
    }

    pub fn with_team_ids(mut self, team_ids: Vec<String>) -> Self {
        self.team_ids = Some(team_ids);
        self
    }
}

// ============================================================================
// Inbound Frames
// ============================================================================

/// Strongly typed inbound frame, parsed once at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    LiveScore {
        game_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sport: Option<Sport>,
        home_score: u16,
        away_score: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        period: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        clock: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    OddsChange {
        game_id: String,
        bookmaker: String,
        market: MarketKind,
        side: String,
        price: f64,
    },
    PlayerStat {
        game_id: String,
        player_id: String,
        stat: String,
        value: f64,
    },
    InjuryReport {
        team_id: String,
        player_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Heartbeat {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
}

/// Wire names the dispatcher routes on. Anything else is logged and dropped.
pub fn known_message_type(msg_type: &str) -> bool {
    matches!(
        msg_type,
        "live_score" | "odds_change" | "player_stat" | "injury_report" | "heartbeat"
    )
}

// ============================================================================
// Odds Snapshots & Movements
// ============================================================================

/// One side of a quoted market, e.g. ("home", -150.0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub side: String,
    pub price: f64,
}

/// Raw per-bookmaker quotes for a single market, as returned by the
/// odds-pull collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmakerQuotes {
    pub bookmaker: String,
    pub last_update: DateTime<Utc>,
    pub outcomes: Vec<Outcome>,
}

/// Immutable per-bookmaker snapshot across markets, replaced wholesale on
/// each refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmakerOdds {
    pub bookmaker: String,
    pub updated_at: DateTime<Utc>,
    pub markets: HashMap<MarketKind, HashMap<String, f64>>,
}

impl BookmakerOdds {
    pub fn new(bookmaker: &str, updated_at: DateTime<Utc>) -> Self {
        Self {
            bookmaker: bookmaker.to_string(),
            updated_at,
            markets: HashMap::new(),
        }
    }

    pub fn price(&self, market: MarketKind, side: &str) -> Option<f64> {
        self.markets.get(&market).and_then(|m| m.get(side)).copied()
    }
}

/// Signed delta between two consecutive observations of the same
/// (bookmaker, market, side) tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsMovement {
    pub game_id: String,
    pub bookmaker: String,
    pub market: MarketKind,
    pub side: String,
    pub old_value: f64,
    pub new_value: f64,
    pub movement: f64,
    pub movement_pct: f64,
    pub is_significant: bool,
    pub is_reversal: bool,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Game Tracking
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameTrackingState {
    pub game_id: String,
    pub sport: Sport,
    pub home_team: String,
    pub away_team: String,
    pub game_date: DateTime<Utc>,
    pub current_odds: Vec<BookmakerOdds>,
    pub movements: Vec<OddsMovement>,
    pub last_updated: DateTime<Utc>,
}

impl GameTrackingState {
    pub fn new(
        game_id: &str,
        sport: Sport,
        home_team: &str,
        away_team: &str,
        game_date: DateTime<Utc>,
    ) -> Self {
        Self {
            game_id: game_id.to_string(),
            sport,
            home_team: home_team.to_string(),
            away_team: away_team.to_string(),
            game_date,
            current_odds: Vec::new(),
            movements: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    SignificantMovement,
    LineReversal,
    SteamMove,
    LargeVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn rank(&self) -> u8 {
        match self {
            AlertSeverity::Low => 0,
            AlertSeverity::Medium => 1,
            AlertSeverity::High => 2,
            AlertSeverity::Critical => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub game_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub movement: OddsMovement,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Service Status
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub channel: ChannelKind,
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub connections: Vec<ChannelStatus>,
    pub connect_attempts: u64,
    pub successful_connects: u64,
    pub failed_connects: u64,
    pub subscriptions: usize,
    pub tracked_games: usize,
    pub dropped_frames: u64,
    pub alerts_buffered: usize,
}
