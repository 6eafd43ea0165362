//! Snapshot merging and movement detection.
//!
//! Raw per-market quote lists are merged into one immutable snapshot per
//! bookmaker, then diffed side-by-side against the previous snapshot. One
//! movement per (bookmaker, market, side) whose price changed; unchanged
//! prices and sides seen for the first time produce nothing.

use crate::models::{BookmakerOdds, BookmakerQuotes, MarketKind, OddsMovement};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Merge per-market quote lists into one snapshot per bookmaker.
pub fn merge_quotes(
    by_market: HashMap<MarketKind, Vec<BookmakerQuotes>>,
    fetched_at: DateTime<Utc>,
) -> Vec<BookmakerOdds> {
    let mut merged: HashMap<String, BookmakerOdds> = HashMap::new();

    for (market, quote_list) in by_market {
        for quotes in quote_list {
            let snapshot = merged
                .entry(quotes.bookmaker.clone())
                .or_insert_with(|| BookmakerOdds::new(&quotes.bookmaker, fetched_at));
            let sides = snapshot.markets.entry(market).or_default();
            for outcome in quotes.outcomes {
                sides.insert(outcome.side, outcome.price);
            }
        }
    }

    let mut snapshots: Vec<BookmakerOdds> = merged.into_values().collect();
    snapshots.sort_by(|a, b| a.bookmaker.cmp(&b.bookmaker));
    snapshots
}

/// Diff two consecutive snapshots of the same game.
pub fn diff_snapshots(
    game_id: &str,
    old: &[BookmakerOdds],
    new: &[BookmakerOdds],
    significant_threshold: f64,
    now: DateTime<Utc>,
) -> Vec<OddsMovement> {
    let old_by_bookmaker: HashMap<&str, &BookmakerOdds> =
        old.iter().map(|o| (o.bookmaker.as_str(), o)).collect();

    let mut movements = Vec::new();
    for snapshot in new {
        let Some(previous) = old_by_bookmaker.get(snapshot.bookmaker.as_str()) else {
            continue;
        };
        for (market, sides) in &snapshot.markets {
            for (side, &new_value) in sides {
                let Some(old_value) = previous.price(*market, side) else {
                    continue;
                };
                if new_value == old_value {
                    continue;
                }

                let movement = new_value - old_value;
                let movement_pct = if old_value != 0.0 {
                    movement / old_value.abs() * 100.0
                } else {
                    0.0
                };
                // A reversal is a sign flip between two nonzero prices, e.g.
                // a favorite at +120 going to -105.
                let is_reversal =
                    old_value != 0.0 && new_value != 0.0 && (old_value > 0.0) != (new_value > 0.0);

                movements.push(OddsMovement {
                    game_id: game_id.to_string(),
                    bookmaker: snapshot.bookmaker.clone(),
                    market: *market,
                    side: side.clone(),
                    old_value,
                    new_value,
                    movement,
                    movement_pct,
                    is_significant: movement.abs() >= significant_threshold,
                    is_reversal,
                    timestamp: now,
                });
            }
        }
    }

    movements.sort_by(|a, b| {
        (a.bookmaker.as_str(), a.market.as_str(), a.side.as_str())
            .cmp(&(b.bookmaker.as_str(), b.market.as_str(), b.side.as_str()))
    });
    movements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(bookmaker: &str, market: MarketKind, sides: &[(&str, f64)]) -> BookmakerOdds {
        let mut odds = BookmakerOdds::new(bookmaker, Utc::now());
        odds.markets.insert(
            market,
            sides
                .iter()
                .map(|(side, price)| (side.to_string(), *price))
                .collect(),
        );
        odds
    }

    #[test]
    fn test_drift_on_a_favorite() {
        let old = vec![snapshot("draftkings", MarketKind::H2h, &[("home", -150.0)])];
        let new = vec![snapshot("draftkings", MarketKind::H2h, &[("home", -170.0)])];

        let movements = diff_snapshots("g1", &old, &new, 10.0, Utc::now());
        assert_eq!(movements.len(), 1);

        let m = &movements[0];
        assert_eq!(m.movement, -20.0);
        assert!((m.movement_pct - (-20.0 / 150.0 * 100.0)).abs() < 1e-9);
        assert!(m.is_significant);
        assert!(!m.is_reversal);
    }

    #[test]
    fn test_sign_flip_is_a_reversal() {
        let old = vec![snapshot("fanduel", MarketKind::H2h, &[("away", 120.0)])];
        let new = vec![snapshot("fanduel", MarketKind::H2h, &[("away", -105.0)])];

        let movements = diff_snapshots("g1", &old, &new, 10.0, Utc::now());
        assert_eq!(movements.len(), 1);

        let m = &movements[0];
        assert_eq!(m.movement, -225.0);
        assert!((m.movement_pct - (-225.0 / 120.0 * 100.0)).abs() < 1e-9);
        assert!(m.is_reversal);
        assert!(m.is_significant);
    }

    #[test]
    fn test_zero_baseline_has_zero_pct_and_no_reversal() {
        let old = vec![snapshot("dk", MarketKind::Spreads, &[("home", 0.0)])];
        let new = vec![snapshot("dk", MarketKind::Spreads, &[("home", 5.5)])];

        let movements = diff_snapshots("g1", &old, &new, 1.0, Utc::now());
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement_pct, 0.0);
        assert!(!movements[0].is_reversal);
    }

    #[test]
    fn test_unchanged_and_new_sides_produce_nothing() {
        let old = vec![snapshot("dk", MarketKind::H2h, &[("home", -150.0)])];
        let new = vec![snapshot(
            "dk",
            MarketKind::H2h,
            &[("home", -150.0), ("away", 130.0)],
        )];

        assert!(diff_snapshots("g1", &old, &new, 10.0, Utc::now()).is_empty());
    }

    #[test]
    fn test_unknown_bookmaker_is_skipped() {
        let old = vec![snapshot("dk", MarketKind::H2h, &[("home", -150.0)])];
        let new = vec![snapshot("caesars", MarketKind::H2h, &[("home", -160.0)])];

        assert!(diff_snapshots("g1", &old, &new, 10.0, Utc::now()).is_empty());
    }

    #[test]
    fn test_sub_threshold_movement_not_significant() {
        let old = vec![snapshot("dk", MarketKind::Totals, &[("over", -110.0)])];
        let new = vec![snapshot("dk", MarketKind::Totals, &[("over", -115.0)])];

        let movements = diff_snapshots("g1", &old, &new, 10.0, Utc::now());
        assert_eq!(movements.len(), 1);
        assert!(!movements[0].is_significant);

        // Exactly at the threshold counts.
        let new = vec![snapshot("dk", MarketKind::Totals, &[("over", -120.0)])];
        let movements = diff_snapshots("g1", &old, &new, 10.0, Utc::now());
        assert!(movements[0].is_significant);
    }

    #[test]
    fn test_merge_groups_markets_by_bookmaker() {
        use crate::models::{BookmakerQuotes, Outcome};

        let now = Utc::now();
        let mut by_market = HashMap::new();
        by_market.insert(
            MarketKind::H2h,
            vec![BookmakerQuotes {
                bookmaker: "dk".to_string(),
                last_update: now,
                outcomes: vec![Outcome {
                    side: "home".to_string(),
                    price: -150.0,
                }],
            }],
        );
        by_market.insert(
            MarketKind::Totals,
            vec![BookmakerQuotes {
                bookmaker: "dk".to_string(),
                last_update: now,
                outcomes: vec![Outcome {
                    side: "over".to_string(),
                    price: -110.0,
                }],
            }],
        );

        let merged = merge_quotes(by_market, now);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].price(MarketKind::H2h, "home"), Some(-150.0));
        assert_eq!(merged[0].price(MarketKind::Totals, "over"), Some(-110.0));
    }
}
