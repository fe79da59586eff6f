use clap::{Parser, ValueEnum};

/// Which opportunity-selection strategy the engine runs. Chosen once at
/// startup; the rest of the pipeline is strategy-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyKind {
    /// Follow market prices: buy the highest-bid bucket plus its best
    /// neighbor as a spread (no external forecast needed)
    Spread,
    /// Compare an NWS forecast distribution to market prices and buy
    /// buckets with sufficient edge
    Forecast,
    /// Trade 15-minute BTC direction windows on late-window momentum
    Momentum,
}

/// What to do with resting orders still working at market close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClosePolicy {
    /// Actively cancel the remainder
    Cancel,
    /// Leave it; the exchange expires unfilled orders at close
    Expire,
}

/// Kalshi bucket-spread / BTC momentum trading bot
#[derive(Parser, Debug, Clone)]
#[command(name = "bucket-bot", version, about)]
pub struct Config {
    /// Enable live trading (default: dry run, no real orders)
    #[arg(long, env = "LIVE", default_value = "false")]
    pub live: bool,

    /// Check settlements, print the P&L report, and exit
    #[arg(long = "check", default_value = "false")]
    pub check_settlements: bool,

    /// Run continuously (default: single evaluation pass)
    #[arg(long = "run", default_value = "false")]
    pub run_continuous: bool,

    /// Run duration in minutes (with --run)
    #[arg(long, env = "DURATION_MINUTES")]
    pub duration_minutes: Option<u64>,

    /// Selection strategy
    #[arg(long, env = "STRATEGY", value_enum, default_value = "spread")]
    pub strategy: StrategyKind,

    /// SQLite trade-log path
    #[arg(long, env = "DATABASE_PATH", default_value = "trades.db")]
    pub database_path: String,

    /// Kalshi API base URL
    #[arg(
        long,
        env = "KALSHI_API_URL",
        default_value = "https://api.elections.kalshi.com"
    )]
    pub kalshi_api_url: String,

    /// Kalshi API key (required for live trading)
    #[arg(long, env = "KALSHI_API_KEY")]
    pub kalshi_api_key: Option<String>,

    /// National Weather Service API base URL
    #[arg(long, env = "NWS_API_URL", default_value = "https://api.weather.gov")]
    pub nws_api_url: String,

    /// Binance API base URL (US endpoint; no key needed for public prices)
    #[arg(long, env = "BINANCE_API_URL", default_value = "https://api.binance.us")]
    pub binance_api_url: String,

    /// Cities to trade (weather strategies)
    #[arg(long, env = "CITIES", value_delimiter = ',', default_value = "NYC")]
    pub cities: Vec<String>,

    /// Series ticker for the BTC direction windows
    #[arg(long, env = "WINDOW_SERIES", default_value = "KXBTC15M")]
    pub window_series: String,

    // ── Bucket-spread parameters ─────────────────────────────────────────────
    /// Don't buy buckets bidding below this (cents)
    #[arg(long, env = "MIN_BUCKET_PRICE", default_value = "10")]
    pub min_bucket_price: u32,

    /// Don't buy buckets bidding above this (cents)
    #[arg(long, env = "MAX_BUCKET_PRICE", default_value = "60")]
    pub max_bucket_price: u32,

    /// Maximum combined cost of a spread (cents, strictly under the 100¢
    /// payout so a win is always profitable)
    #[arg(long, env = "MAX_TOTAL_COST", default_value = "95")]
    pub max_total_cost: u32,

    /// Contracts per spread leg
    #[arg(long, env = "CONTRACTS_PER_LEG", default_value = "10")]
    pub contracts_per_leg: u32,

    // ── Forecast-edge parameters ─────────────────────────────────────────────
    /// Minimum edge (our probability minus market probability) to trade
    #[arg(long, env = "MIN_EDGE", default_value = "0.05")]
    pub min_edge: f64,

    /// Model probability above which a single narrow bucket is bought alone
    #[arg(long, env = "HIGH_CONFIDENCE", default_value = "0.70")]
    pub high_confidence: f64,

    /// Maximum legs in an edge cluster
    #[arg(long, env = "MAX_LEGS", default_value = "3")]
    pub max_legs: usize,

    /// Base contracts per edge position (scaled up with edge)
    #[arg(long, env = "BASE_CONTRACTS", default_value = "3")]
    pub base_contracts: u32,

    /// Maximum contracts in a single market
    #[arg(long, env = "MAX_POSITION_PER_MARKET", default_value = "20")]
    pub max_position_per_market: u32,

    /// Overpricing (market minus model probability) on a tail bucket that
    /// triggers a fade (sell) instead of a buy
    #[arg(long, env = "FADE_THRESHOLD", default_value = "0.20")]
    pub fade_threshold: f64,

    // ── Momentum parameters ──────────────────────────────────────────────────
    /// Minimum confidence to bet (0–1)
    #[arg(long, env = "MIN_CONFIDENCE", default_value = "0.65")]
    pub min_confidence: f64,

    /// Length of a direction window in minutes
    #[arg(long, env = "WINDOW_MINUTES", default_value = "15")]
    pub window_minutes: f64,

    /// Start betting this many minutes before close
    #[arg(long, env = "MAX_MINUTES_BEFORE_CLOSE", default_value = "10")]
    pub max_minutes_before_close: f64,

    /// Stop betting this many minutes before close
    #[arg(long, env = "MIN_MINUTES_BEFORE_CLOSE", default_value = "2")]
    pub min_minutes_before_close: f64,

    /// Minimum absolute % move of the underlying to consider a bet
    #[arg(long, env = "MIN_PRICE_CHANGE_PCT", default_value = "0.05")]
    pub min_price_change_pct: f64,

    /// A move at least this large earns the strong-move confidence bonus
    #[arg(long, env = "STRONG_MOVE_PCT", default_value = "0.15")]
    pub strong_move_pct: f64,

    /// Contracts at full confidence
    #[arg(long, env = "MOMENTUM_MAX_CONTRACTS", default_value = "10")]
    pub momentum_max_contracts: u32,

    /// Contracts at minimum confidence
    #[arg(long, env = "MOMENTUM_MIN_CONTRACTS", default_value = "2")]
    pub momentum_min_contracts: u32,

    /// Don't pay (or risk) more than this per contract (cents)
    #[arg(long, env = "MOMENTUM_MAX_PRICE", default_value = "95")]
    pub momentum_max_price: u32,

    /// Scale position size with confidence (false = fixed max size)
    #[arg(
        long,
        env = "SCALE_BY_CONFIDENCE",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub scale_by_confidence: bool,

    // ── Risk & execution ─────────────────────────────────────────────────────
    /// Maximum dollars committed per settlement day (hard cap)
    #[arg(long, env = "DAILY_RISK_CAP", default_value = "100.0")]
    pub daily_risk_cap: f64,

    /// What to do with orders still resting at market close
    #[arg(long, env = "CLOSE_POLICY", value_enum, default_value = "cancel")]
    pub close_policy: ClosePolicy,

    /// Reserve risk budget when an order fills rather than when it is
    /// submitted (default: on submit, which can only overstate risk)
    #[arg(long, env = "RESERVE_ON_FILL", default_value = "false")]
    pub reserve_on_fill: bool,

    /// UTC offset in hours defining the settlement-day boundary
    /// (-5 = US Eastern standard time, where Kalshi weather markets settle)
    #[arg(long, env = "SETTLEMENT_UTC_OFFSET_HOURS", default_value = "-5")]
    pub settlement_utc_offset_hours: i32,

    /// Seconds between evaluation cycles (with --run)
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "60")]
    pub poll_interval_secs: u64,
}

impl Config {
    pub fn dry_run(&self) -> bool {
        !self.live
    }

    /// Fatal configuration errors, surfaced once at startup.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.live && self.kalshi_api_key.is_none() {
            anyhow::bail!(
                "KALSHI_API_KEY is required in live trading mode. Omit --live for a dry run."
            );
        }
        if self.min_bucket_price >= self.max_bucket_price {
            anyhow::bail!(
                "min_bucket_price ({}) must be below max_bucket_price ({})",
                self.min_bucket_price,
                self.max_bucket_price
            );
        }
        if self.max_bucket_price > 100 {
            anyhow::bail!("max_bucket_price must be at most 100 cents");
        }
        if self.max_total_cost == 0 || self.max_total_cost > 100 {
            anyhow::bail!("max_total_cost must be between 1 and 100 cents");
        }
        if self.max_total_cost <= self.min_bucket_price {
            anyhow::bail!(
                "max_total_cost ({}) at or below min_bucket_price ({}): no bucket could ever qualify",
                self.max_total_cost,
                self.min_bucket_price
            );
        }
        if self.contracts_per_leg == 0 || self.base_contracts == 0 {
            anyhow::bail!("contract counts must be positive");
        }
        if !(0.0..1.0).contains(&self.min_edge) {
            anyhow::bail!("min_edge must be in [0, 1)");
        }
        if !(0.0..=1.0).contains(&self.high_confidence) {
            anyhow::bail!("high_confidence must be between 0.0 and 1.0");
        }
        if !(1..=5).contains(&self.max_legs) {
            anyhow::bail!("max_legs must be between 1 and 5");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            anyhow::bail!("min_confidence must be between 0.0 and 1.0");
        }
        if self.min_minutes_before_close >= self.max_minutes_before_close {
            anyhow::bail!(
                "min_minutes_before_close ({}) must be below max_minutes_before_close ({})",
                self.min_minutes_before_close,
                self.max_minutes_before_close
            );
        }
        if self.max_minutes_before_close > self.window_minutes {
            anyhow::bail!("max_minutes_before_close cannot exceed the window length");
        }
        if self.momentum_min_contracts > self.momentum_max_contracts {
            anyhow::bail!("momentum_min_contracts must not exceed momentum_max_contracts");
        }
        if self.momentum_max_price > 100 {
            anyhow::bail!("momentum_max_price must be at most 100 cents");
        }
        if self.daily_risk_cap <= 0.0 {
            anyhow::bail!("daily_risk_cap must be positive");
        }
        if self.cities.is_empty() && self.strategy != StrategyKind::Momentum {
            anyhow::bail!("at least one city is required for weather strategies");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = Config::try_parse_from(["bucket-bot"]).unwrap();
        cfg.validate().unwrap();
    }

    #[test]
    fn live_requires_api_key() {
        let mut cfg = Config::try_parse_from(["bucket-bot"]).unwrap();
        cfg.live = true;
        assert!(cfg.validate().is_err());
        cfg.kalshi_api_key = Some("key".into());
        cfg.validate().unwrap();
    }

    #[test]
    fn contradictory_price_band_is_fatal() {
        let mut cfg = Config::try_parse_from(["bucket-bot"]).unwrap();
        cfg.min_bucket_price = 60;
        cfg.max_bucket_price = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cost_cap_below_price_floor_is_fatal() {
        let mut cfg = Config::try_parse_from(["bucket-bot"]).unwrap();
        cfg.max_total_cost = 8;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_betting_window_is_fatal() {
        let mut cfg = Config::try_parse_from(["bucket-bot"]).unwrap();
        cfg.min_minutes_before_close = 12.0;
        assert!(cfg.validate().is_err());
    }
}
