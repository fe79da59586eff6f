use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One tradeable outcome slice of a settlement event.
///
/// Prices are integer cents (0–100). A price of 0 means no resting quote on
/// that side. Bounds are inclusive; a missing `lower` marks the low tail
/// ("X or below"), a missing `upper` the high tail ("X or above"). A bucket
/// with no bounds at all is the single implicit YES outcome of a
/// direction-style market (price up/down), which has no numeric range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub ticker: String,
    pub lower: Option<i32>,
    pub upper: Option<i32>,
    /// Best YES bid in cents (0–100)
    pub yes_bid: u32,
    /// Best YES ask in cents (0–100)
    pub yes_ask: u32,
    pub open: bool,
}

impl Bucket {
    /// Price we would pay to buy: the ask, falling back to the bid when the
    /// ask side is unquoted.
    pub fn buy_price(&self) -> u32 {
        if self.yes_ask > 0 {
            self.yes_ask
        } else {
            self.yes_bid
        }
    }

    /// Market-implied probability of this outcome (buy side).
    pub fn implied_prob(&self) -> f64 {
        self.buy_price() as f64 / 100.0
    }

    /// Human-readable range, e.g. "<=67", "68-69", ">=76".
    pub fn range_label(&self) -> String {
        match (self.lower, self.upper) {
            (None, Some(hi)) => format!("<={}", hi),
            (Some(lo), None) => format!(">={}", lo),
            (Some(lo), Some(hi)) => format!("{}-{}", lo, hi),
            (None, None) => self.ticker.clone(),
        }
    }

    /// Check whether a settled value of the underlying falls in this bucket.
    pub fn contains(&self, value: f64) -> bool {
        match (self.lower, self.upper) {
            (None, Some(hi)) => value <= hi as f64,
            (Some(lo), None) => value >= lo as f64,
            (Some(lo), Some(hi)) => value >= lo as f64 && value <= hi as f64,
            (None, None) => false,
        }
    }

    /// Ordering key within an event: tails sort to the extremes.
    fn sort_key(&self) -> i64 {
        match (self.lower, self.upper) {
            (None, Some(_)) => i64::MIN,
            (Some(lo), _) => lo as i64,
            (None, None) => i64::MIN,
        }
    }
}

/// A settlement event: one underlying quantity settling at one moment, with
/// an ordered set of mutually exclusive outcome buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_ticker: String,
    pub title: String,
    /// City code or symbol the event settles on (e.g. "NYC", "BTC")
    pub underlying: String,
    /// Settlement date
    pub date: NaiveDate,
    /// Buckets in bound order (low tail first)
    pub buckets: Vec<Bucket>,
    /// "open" | "closed" | "settled"
    pub status: String,
    pub close_time: Option<DateTime<Utc>>,
}

impl Event {
    /// Idempotency key: one trade per underlying per settlement date.
    pub fn market_key(&self) -> String {
        format!("{}-{}", self.underlying, self.date.format("%Y%m%d"))
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        if self.status != "open" {
            return false;
        }
        match self.close_time {
            Some(close) => now < close,
            None => true,
        }
    }

    pub fn bucket(&self, ticker: &str) -> Option<&Bucket> {
        self.buckets.iter().find(|b| b.ticker == ticker)
    }

    /// Sum of implied probabilities across buckets (should be near 1).
    pub fn total_implied_prob(&self) -> f64 {
        self.buckets.iter().map(|b| b.implied_prob()).sum()
    }

    /// Sort buckets into bound order. Called once after construction from a
    /// market-data fetch; evaluation assumes this order.
    pub fn sort_buckets(&mut self) {
        self.buckets.sort_by_key(|b| b.sort_key());
    }

    /// Structural invariants of the snapshot. A failure here poisons the
    /// whole event for the cycle: the affected market is skipped, other
    /// markets are unaffected.
    pub fn validate(&self) -> Result<()> {
        for b in &self.buckets {
            if b.yes_bid > 100 || b.yes_ask > 100 {
                bail!(
                    "{}: price out of range (bid {}, ask {})",
                    b.ticker,
                    b.yes_bid,
                    b.yes_ask
                );
            }
            if b.yes_ask > 0 && b.yes_bid > b.yes_ask {
                bail!("{}: bid {} above ask {}", b.ticker, b.yes_bid, b.yes_ask);
            }
            if let (Some(lo), Some(hi)) = (b.lower, b.upper) {
                if lo >= hi {
                    bail!("{}: bounds not ordered ({} >= {})", b.ticker, lo, hi);
                }
            }
        }

        // A single-bucket event (direction market) carries no range
        // structure; the partition rules apply from two buckets up.
        if self.buckets.len() < 2 {
            return Ok(());
        }

        for (i, b) in self.buckets.iter().enumerate() {
            match (b.lower, b.upper) {
                (None, None) => bail!("{}: unbounded bucket in a partition", b.ticker),
                (None, Some(_)) if i != 0 => {
                    bail!("{}: low tail not first in bound order", b.ticker)
                }
                (Some(_), None) if i != self.buckets.len() - 1 => {
                    bail!("{}: high tail not last in bound order", b.ticker)
                }
                _ => {}
            }
        }

        for pair in self.buckets.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            match (prev.upper, next.lower) {
                (Some(hi), Some(lo)) => {
                    if lo != hi + 1 {
                        bail!(
                            "buckets {} and {} do not form a contiguous partition",
                            prev.ticker,
                            next.ticker
                        );
                    }
                }
                // Tails already pinned to the ends above; a missing interior
                // bound can only mean a malformed snapshot.
                _ => bail!(
                    "buckets {} and {} missing adjacent bounds",
                    prev.ticker,
                    next.ticker
                ),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(ticker: &str, lo: i32, hi: i32, bid: u32, ask: u32) -> Bucket {
        Bucket {
            ticker: ticker.into(),
            lower: Some(lo),
            upper: Some(hi),
            yes_bid: bid,
            yes_ask: ask,
            open: true,
        }
    }

    fn event(buckets: Vec<Bucket>) -> Event {
        Event {
            event_ticker: "KXHIGHNY-26AUG08".into(),
            title: "NYC high temperature".into(),
            underlying: "NYC".into(),
            date: NaiveDate::from_ymd_opt(2026, 8, 8).unwrap(),
            buckets,
            status: "open".into(),
            close_time: None,
        }
    }

    #[test]
    fn valid_partition_with_tails_passes() {
        let mut ev = event(vec![
            range("T2", 70, 71, 20, 25),
            Bucket {
                ticker: "T1".into(),
                lower: None,
                upper: Some(69),
                yes_bid: 10,
                yes_ask: 15,
                open: true,
            },
            Bucket {
                ticker: "T3".into(),
                lower: Some(72),
                upper: None,
                yes_bid: 30,
                yes_ask: 35,
                open: true,
            },
        ]);
        ev.sort_buckets();
        assert_eq!(ev.buckets[0].ticker, "T1");
        assert_eq!(ev.buckets[2].ticker, "T3");
        ev.validate().unwrap();
    }

    #[test]
    fn bid_above_ask_is_rejected() {
        let ev = event(vec![range("T1", 70, 71, 40, 30)]);
        assert!(ev.validate().is_err());
    }

    #[test]
    fn gap_in_partition_is_rejected() {
        let ev = event(vec![range("T1", 70, 71, 20, 25), range("T2", 74, 75, 20, 25)]);
        assert!(ev.validate().is_err());
    }

    #[test]
    fn overlapping_buckets_are_rejected() {
        let ev = event(vec![range("T1", 70, 72, 20, 25), range("T2", 72, 74, 20, 25)]);
        assert!(ev.validate().is_err());
    }

    #[test]
    fn unordered_bounds_are_rejected() {
        let ev = event(vec![range("T1", 73, 71, 20, 25)]);
        assert!(ev.validate().is_err());
    }

    #[test]
    fn single_unbounded_bucket_is_a_direction_market() {
        let ev = event(vec![Bucket {
            ticker: "KXBTC15M-TEST".into(),
            lower: None,
            upper: None,
            yes_bid: 40,
            yes_ask: 45,
            open: true,
        }]);
        ev.validate().unwrap();
    }

    #[test]
    fn buy_price_falls_back_to_bid() {
        let b = Bucket {
            ticker: "T1".into(),
            lower: Some(70),
            upper: Some(71),
            yes_bid: 30,
            yes_ask: 0,
            open: true,
        };
        assert_eq!(b.buy_price(), 30);
    }

    #[test]
    fn market_key_combines_underlying_and_date() {
        let ev = event(vec![]);
        assert_eq!(ev.market_key(), "NYC-20260808");
    }

    #[test]
    fn contains_handles_tails() {
        let low = Bucket {
            ticker: "L".into(),
            lower: None,
            upper: Some(67),
            yes_bid: 5,
            yes_ask: 8,
            open: true,
        };
        assert!(low.contains(60.0));
        assert!(!low.contains(68.0));
        let high = Bucket {
            ticker: "H".into(),
            lower: Some(76),
            upper: None,
            yes_bid: 5,
            yes_ask: 8,
            open: true,
        };
        assert!(high.contains(80.0));
        assert!(!high.contains(75.0));
    }
}
