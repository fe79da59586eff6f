use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only record of one order's terminal outcome, settled later once
/// the underlying event resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Option<i64>,
    /// Bucket/market ticker the order worked
    pub ticker: String,
    /// Idempotency key: underlying + settlement date
    pub market_key: String,
    /// "buy" or "sell"
    pub side: String,
    /// Limit price in cents
    pub price_cents: u32,
    /// Realized (filled) quantity, not the requested one
    pub quantity: u32,
    /// Cost in dollars at the realized quantity
    pub cost: f64,
    pub placed_at: DateTime<Utc>,
    /// Terminal order status: "filled" | "cancelled" | "expired"
    pub outcome: String,
    pub dry_run: bool,

    // Settlement fields, populated once the event resolves
    pub settled: bool,
    pub settled_at: Option<DateTime<Utc>>,
    /// "yes" or "no"
    pub result: Option<String>,
    /// Payout in dollars
    pub payout: f64,
    /// Realized profit/loss in dollars
    pub pnl: f64,
}

/// Aggregate statistics over the trade log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: i64,
    pub settled: i64,
    pub unsettled: i64,
    pub wins: i64,
    pub losses: i64,
    pub total_pnl: f64,
    pub total_wagered: f64,
}

impl TradeStats {
    pub fn win_rate(&self) -> f64 {
        if self.settled == 0 {
            return 0.0;
        }
        self.wins as f64 / self.settled as f64
    }

    pub fn roi(&self) -> f64 {
        if self.total_wagered <= 0.0 {
            return 0.0;
        }
        self.total_pnl / self.total_wagered * 100.0
    }
}
