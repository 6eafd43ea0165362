//! Odds-pull collaborator.

use crate::error::LiveDataError;
use crate::models::{BookmakerQuotes, MarketKind, Sport};
use async_trait::async_trait;

/// Source of current per-bookmaker quotes for one market of one game.
/// Deployments back this with an HTTP odds API; tests script it.
#[async_trait]
pub trait OddsProvider: Send + Sync {
    async fn fetch_market(
        &self,
        sport: Sport,
        game_id: &str,
        market: MarketKind,
    ) -> Result<Vec<BookmakerQuotes>, LiveDataError>;
}
