use chrono::NaiveDate;
use std::collections::HashSet;
use thiserror::Error;
use tracing::info;

use super::evaluator::{CandidatePosition, CONTRACT_PAYOUT_CENTS};

/// Why the risk gate turned a candidate away. Checked in a fixed order so a
/// rejection log always names the first failing constraint.
#[derive(Debug, Error, PartialEq)]
pub enum RejectReason {
    #[error("market {0} already traded today")]
    AlreadyTraded(String),
    #[error("daily cap: ${spent:.2} committed + ${cost:.2} candidate > ${cap:.2}")]
    DailyCapExceeded { spent: f64, cost: f64, cap: f64 },
    #[error("candidate cost invariant violated ({per_contract}¢ per contract)")]
    CostInvariant { per_contract: u32 },
}

/// Process-wide running risk state for one engine instance: dollars
/// committed this settlement day plus the set of market keys already
/// traded. Mutated only by the execution driver; the gate just reads it.
#[derive(Debug, Clone)]
pub struct RiskLedger {
    day: NaiveDate,
    spent_today: f64,
    traded: HashSet<String>,
}

impl RiskLedger {
    pub fn new(day: NaiveDate) -> Self {
        RiskLedger {
            day,
            spent_today: 0.0,
            traded: HashSet::new(),
        }
    }

    /// Reset when the settlement day rolls over. The boundary is derived
    /// from the configured settlement offset, not process-local midnight.
    pub fn roll_day(&mut self, today: NaiveDate) {
        if today == self.day {
            return;
        }
        info!(
            "Settlement day rolled {} -> {}: resetting risk ledger (${:.2} was committed, {} markets traded)",
            self.day,
            today,
            self.spent_today,
            self.traded.len()
        );
        self.day = today;
        self.spent_today = 0.0;
        self.traded.clear();
    }

    pub fn spent_today(&self) -> f64 {
        self.spent_today
    }

    pub fn has_traded(&self, market_key: &str) -> bool {
        self.traded.contains(market_key)
    }

    pub fn traded_count(&self) -> usize {
        self.traded.len()
    }

    /// Record a market as traded without committing budget (used by the
    /// reserve-on-fill timing, where cost lands when fills do).
    pub fn mark_traded(&mut self, market_key: &str) {
        self.traded.insert(market_key.to_string());
    }

    /// Reserve budget and mark the market traded. Called by the execution
    /// driver immediately after submission under the default timing.
    pub fn commit(&mut self, market_key: &str, cost: f64) {
        self.traded.insert(market_key.to_string());
        self.spent_today += cost;
    }

    /// Add realized cost only (market already marked at submit time).
    pub fn add_cost(&mut self, cost: f64) {
        self.spent_today += cost;
    }
}

/// Pure validation: no side effects on accept or reject.
pub fn check(
    candidate: &CandidatePosition,
    market_key: &str,
    ledger: &RiskLedger,
    daily_cap: f64,
) -> Result<(), RejectReason> {
    if ledger.has_traded(market_key) {
        return Err(RejectReason::AlreadyTraded(market_key.to_string()));
    }

    let cost = candidate.total_cost_dollars();
    if ledger.spent_today() + cost > daily_cap {
        return Err(RejectReason::DailyCapExceeded {
            spent: ledger.spent_today(),
            cost,
            cap: daily_cap,
        });
    }

    // The constructor already enforced this; re-check before money moves.
    let per_contract = candidate.per_contract_cost_cents();
    if candidate.legs().len() > 1 && per_contract >= CONTRACT_PAYOUT_CENTS {
        return Err(RejectReason::CostInvariant { per_contract });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::evaluator::{OrderLeg, Side};
    use approx::assert_relative_eq;

    fn candidate(prices: &[u32], qty: u32) -> CandidatePosition {
        let legs = prices
            .iter()
            .enumerate()
            .map(|(i, &p)| OrderLeg {
                ticker: format!("T{}", i + 1),
                side: Side::Buy,
                price_cents: p,
                quantity: qty,
            })
            .collect();
        CandidatePosition::new(legs).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 7).unwrap()
    }

    #[test]
    fn traded_market_is_rejected_regardless_of_content() {
        let mut ledger = RiskLedger::new(day());
        ledger.commit("NYC-20260808", 5.0);
        let err = check(&candidate(&[20], 1), "NYC-20260808", &ledger, 100.0).unwrap_err();
        assert_eq!(err, RejectReason::AlreadyTraded("NYC-20260808".into()));
    }

    #[test]
    fn cap_excess_is_rejected_and_ledger_unchanged() {
        let mut ledger = RiskLedger::new(day());
        ledger.commit("CHI-20260808", 95.0);
        let cand = candidate(&[40, 30], 10); // $7.00
        let err = check(&cand, "NYC-20260808", &ledger, 100.0).unwrap_err();
        assert!(matches!(err, RejectReason::DailyCapExceeded { .. }));
        assert_relative_eq!(ledger.spent_today(), 95.0, epsilon = 1e-9);
        assert!(!ledger.has_traded("NYC-20260808"));
    }

    #[test]
    fn spend_accumulates_exactly() {
        let mut ledger = RiskLedger::new(day());
        for (i, cost) in [8.2, 4.5, 1.3].iter().enumerate() {
            let key = format!("M{}-20260808", i);
            ledger.commit(&key, *cost);
        }
        assert_relative_eq!(ledger.spent_today(), 14.0, epsilon = 1e-9);
    }

    #[test]
    fn candidate_exactly_at_cap_is_accepted() {
        let mut ledger = RiskLedger::new(day());
        ledger.commit("CHI-20260808", 92.0);
        let cand = candidate(&[40, 40], 10); // $8.00
        check(&cand, "NYC-20260808", &ledger, 100.0).unwrap();
    }

    #[test]
    fn day_rollover_clears_state() {
        let mut ledger = RiskLedger::new(day());
        ledger.commit("NYC-20260807", 50.0);
        ledger.roll_day(day());
        assert_relative_eq!(ledger.spent_today(), 50.0, epsilon = 1e-9);
        ledger.roll_day(NaiveDate::from_ymd_opt(2026, 8, 8).unwrap());
        assert_relative_eq!(ledger.spent_today(), 0.0, epsilon = 1e-9);
        assert!(!ledger.has_traded("NYC-20260807"));
    }

    #[test]
    fn check_order_reports_idempotency_before_cap() {
        let mut ledger = RiskLedger::new(day());
        ledger.commit("NYC-20260808", 99.9);
        // Both the traded set and the cap would reject; idempotency wins.
        let err = check(&candidate(&[50], 10), "NYC-20260808", &ledger, 100.0).unwrap_err();
        assert!(matches!(err, RejectReason::AlreadyTraded(_)));
    }
}
