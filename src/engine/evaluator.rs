use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Config, StrategyKind};
use crate::market::Event;

use super::{edge, momentum, spread};

/// Payout per winning contract, in cents.
pub const CONTRACT_PAYOUT_CENTS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// A belief about an event, produced fresh each cycle by a signal provider.
/// The evaluator variant in use determines which shape it expects.
#[derive(Debug, Clone)]
pub enum Signal {
    /// No external belief; the observed bid ranking is the signal.
    BidRanking,
    /// Modeled probability per bucket ticker.
    Distribution(Vec<(String, f64)>),
    /// Directional momentum inside a countdown window.
    Momentum {
        /// Percentage change of the underlying since window start
        change_pct: f64,
        /// Minutes remaining until the window settles
        minutes_left: f64,
        /// Total window length in minutes
        window_minutes: f64,
        /// Whether a secondary momentum check agrees with the direction
        corroborated: bool,
    },
}

/// One leg of a proposed position: a limit order we would rest on the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLeg {
    pub ticker: String,
    pub side: Side,
    pub price_cents: u32,
    pub quantity: u32,
}

impl OrderLeg {
    /// Payout in cents if this leg's outcome wins: a bought contract pays
    /// 100¢, a sold contract keeps its premium.
    fn win_payout_cents(&self) -> u32 {
        match self.side {
            Side::Buy => CONTRACT_PAYOUT_CENTS * self.quantity,
            Side::Sell => self.price_cents * self.quantity,
        }
    }
}

/// A proposed trade: one or more legs on a single event, created and
/// consumed within one evaluation cycle.
#[derive(Debug, Clone)]
pub struct CandidatePosition {
    legs: Vec<OrderLeg>,
    pub total_cost_cents: u32,
    pub potential_payout_cents: u32,
}

impl CandidatePosition {
    /// Build a candidate, enforcing its structural invariants: a non-empty
    /// leg list, cost equal to the sum of price × quantity, and (for
    /// multi-leg buys of mutually exclusive outcomes) a per-contract cost
    /// strictly under the 100¢ payout.
    pub fn new(legs: Vec<OrderLeg>) -> Result<Self> {
        if legs.is_empty() {
            bail!("candidate position must have at least one leg");
        }
        for leg in &legs {
            if leg.quantity == 0 {
                bail!("{}: zero-quantity leg", leg.ticker);
            }
            if leg.price_cents == 0 || leg.price_cents >= CONTRACT_PAYOUT_CENTS {
                bail!("{}: leg price {}¢ out of range", leg.ticker, leg.price_cents);
            }
        }
        if legs.len() > 1 && legs.iter().all(|l| l.side == Side::Buy) {
            let per_contract: u32 = legs.iter().map(|l| l.price_cents).sum();
            if per_contract >= CONTRACT_PAYOUT_CENTS {
                bail!(
                    "multi-leg cost {}¢ per contract is not under the {}¢ payout",
                    per_contract,
                    CONTRACT_PAYOUT_CENTS
                );
            }
        }
        let total_cost_cents = legs.iter().map(|l| l.price_cents * l.quantity).sum();
        // Outcomes are mutually exclusive, so at most one leg can win.
        let potential_payout_cents = legs
            .iter()
            .map(OrderLeg::win_payout_cents)
            .max()
            .unwrap_or(0);
        Ok(CandidatePosition {
            legs,
            total_cost_cents,
            potential_payout_cents,
        })
    }

    pub fn legs(&self) -> &[OrderLeg] {
        &self.legs
    }

    pub fn total_cost_dollars(&self) -> f64 {
        self.total_cost_cents as f64 / 100.0
    }

    /// Summed per-contract price across legs, used by the cost invariants.
    pub fn per_contract_cost_cents(&self) -> u32 {
        self.legs.iter().map(|l| l.price_cents).sum()
    }

    pub fn tickers(&self) -> Vec<&str> {
        self.legs.iter().map(|l| l.ticker.as_str()).collect()
    }
}

/// The one polymorphic capability of the evaluator: map an event snapshot
/// plus a signal to at most one candidate position. Variants are selected by
/// configuration, not by market type.
#[derive(Debug, Clone, Copy)]
pub enum SelectionStrategy {
    BucketSpread,
    ForecastEdge,
    Momentum,
}

impl From<StrategyKind> for SelectionStrategy {
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Spread => SelectionStrategy::BucketSpread,
            StrategyKind::Forecast => SelectionStrategy::ForecastEdge,
            StrategyKind::Momentum => SelectionStrategy::Momentum,
        }
    }
}

impl SelectionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SelectionStrategy::BucketSpread => "bucket-spread",
            SelectionStrategy::ForecastEdge => "forecast-edge",
            SelectionStrategy::Momentum => "momentum",
        }
    }

    /// Evaluate one event. `None` is the expected majority outcome and is
    /// not an error.
    pub fn evaluate(
        &self,
        event: &Event,
        signal: &Signal,
        config: &Config,
    ) -> Option<CandidatePosition> {
        match (self, signal) {
            (SelectionStrategy::BucketSpread, Signal::BidRanking) => {
                spread::select_spread(event, config)
            }
            (SelectionStrategy::ForecastEdge, Signal::Distribution(probs)) => {
                edge::select_edge_position(event, probs, config)
            }
            (
                SelectionStrategy::Momentum,
                Signal::Momentum {
                    change_pct,
                    minutes_left,
                    window_minutes,
                    corroborated,
                },
            ) => momentum::select_momentum_position(
                event,
                *change_pct,
                *minutes_left,
                *window_minutes,
                *corroborated,
                config,
            ),
            _ => {
                debug!(
                    "{}: signal shape does not match strategy {}, skipping",
                    event.event_ticker,
                    self.name()
                );
                None
            }
        }
    }
}
