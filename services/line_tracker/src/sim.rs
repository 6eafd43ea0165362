//! Simulated upstream collaborators.
//!
//! Stand-ins for the provider stream and the odds API so the service can run
//! end to end without credentials: the transport emits periodic score and
//! odds frames, the provider returns random-walk prices with occasional
//! steam-sized jumps that exercise the alert path.

use async_trait::async_trait;
use chrono::Utc;
use linewatch_core::{
    BookmakerQuotes, ChannelKind, LiveDataError, MarketKind, OddsProvider, Outcome, Sport,
    StreamConnection, StreamTransport,
};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const SIM_GAME_ID: &str = "sim-nba-001";

pub struct SimTransport {
    frame_interval: Duration,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            frame_interval: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl StreamTransport for SimTransport {
    async fn connect(
        &self,
        channel: ChannelKind,
    ) -> Result<Box<dyn StreamConnection>, LiveDataError> {
        Ok(Box::new(SimConnection {
            channel,
            frame_interval: self.frame_interval,
            home_score: 0,
            away_score: 0,
        }))
    }
}

struct SimConnection {
    channel: ChannelKind,
    frame_interval: Duration,
    home_score: u16,
    away_score: u16,
}

#[async_trait]
impl StreamConnection for SimConnection {
    async fn send(&mut self, _frame: String) -> Result<(), LiveDataError> {
        // Control and keepalive frames are accepted and ignored.
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<String, LiveDataError>> {
        tokio::time::sleep(self.frame_interval).await;

        let frame = match self.channel {
            ChannelKind::Scores => {
                {
                    let mut rng = rand::thread_rng();
                    if rng.gen_bool(0.6) {
                        self.home_score += rng.gen_range(0..=3);
                    } else {
                        self.away_score += rng.gen_range(0..=3);
                    }
                }
                serde_json::json!({
                    "type": "live_score",
                    "game_id": SIM_GAME_ID,
                    "sport": "NBA",
                    "home_score": self.home_score,
                    "away_score": self.away_score,
                    "period": 1,
                })
                .to_string()
            }
            ChannelKind::Odds => serde_json::json!({
                "type": "odds_change",
                "game_id": SIM_GAME_ID,
                "bookmaker": "draftkings",
                "market": "h2h",
                "side": "home",
                "price": -150.0 + (rand::random::<f64>() - 0.5) * 20.0,
            })
            .to_string(),
        };

        Some(Ok(frame))
    }
}

fn sides_for(market: MarketKind) -> [(&'static str, f64); 2] {
    match market {
        MarketKind::H2h => [("home", -150.0), ("away", 130.0)],
        MarketKind::Spreads => [("home", -110.0), ("away", -110.0)],
        MarketKind::Totals => [("over", -110.0), ("under", -110.0)],
    }
}

/// Random-walk odds source. Prices drift a few points per fetch; roughly one
/// fetch in twenty takes a steam-sized jump.
pub struct SimProvider {
    prices: Mutex<HashMap<String, f64>>,
}

impl SimProvider {
    pub fn new() -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl OddsProvider for SimProvider {
    async fn fetch_market(
        &self,
        _sport: Sport,
        game_id: &str,
        market: MarketKind,
    ) -> Result<Vec<BookmakerQuotes>, LiveDataError> {
        let mut prices = self.prices.lock().unwrap();
        let mut rng = rand::thread_rng();

        let mut out = Vec::new();
        for bookmaker in ["draftkings", "fanduel"] {
            let mut outcomes = Vec::new();
            for (side, base) in sides_for(market) {
                let key = format!("{}:{}:{}:{}", game_id, market, bookmaker, side);
                let price = prices.entry(key).or_insert(base);
                *price += rng.gen_range(-6.0..6.0);
                if rng.gen_bool(0.05) {
                    *price += if rng.gen_bool(0.5) { 60.0 } else { -60.0 };
                }
                outcomes.push(Outcome {
                    side: side.to_string(),
                    price: (*price * 10.0).round() / 10.0,
                });
            }
            out.push(BookmakerQuotes {
                bookmaker: bookmaker.to_string(),
                last_update: Utc::now(),
                outcomes,
            });
        }
        Ok(out)
    }
}
