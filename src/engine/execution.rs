use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ClosePolicy, Config};
use crate::db::models::TradeRecord;
use crate::db::Database;

use super::evaluator::{CandidatePosition, Side};
use super::risk::RiskLedger;

/// Lifecycle state of one working exchange order. `Filled`, `Cancelled` and
/// `Expired` are terminal; the realized fill count travels with the state so
/// a partially filled order that dies keeps its quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    PartiallyFilled { filled: u32 },
    Filled,
    Cancelled { filled: u32 },
    Expired { filled: u32 },
}

/// Something observed about an order: a fill total from a status check, an
/// active cancellation, or the market closing on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    /// Cumulative filled quantity reported by the exchange
    Fill { total_filled: u32 },
    Cancel,
    Expire,
}

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("order already terminal in {0}")]
    AlreadyTerminal(&'static str),
    #[error("fill count regressed from {have} to {reported}")]
    FillRegression { have: u32, reported: u32 },
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled { .. } | OrderStatus::Expired { .. }
        )
    }

    /// Realized fill count for a given requested quantity.
    pub fn filled(&self, requested: u32) -> u32 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::PartiallyFilled { filled } => *filled,
            OrderStatus::Filled => requested,
            OrderStatus::Cancelled { filled } => *filled,
            OrderStatus::Expired { filled } => *filled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PartiallyFilled { .. } => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled { .. } => "cancelled",
            OrderStatus::Expired { .. } => "expired",
        }
    }

    /// The single transition function. Anything outside the table is an
    /// error, which keeps illegal state changes unrepresentable at the call
    /// sites.
    pub fn apply(self, event: OrderEvent, requested: u32) -> Result<OrderStatus, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(self.as_str()));
        }
        let have = self.filled(requested);
        Ok(match event {
            OrderEvent::Fill { total_filled } => {
                if total_filled < have {
                    return Err(TransitionError::FillRegression {
                        have,
                        reported: total_filled,
                    });
                }
                if total_filled >= requested {
                    OrderStatus::Filled
                } else if total_filled > 0 {
                    OrderStatus::PartiallyFilled {
                        filled: total_filled,
                    }
                } else {
                    self
                }
            }
            OrderEvent::Cancel => OrderStatus::Cancelled { filled: have },
            OrderEvent::Expire => OrderStatus::Expired { filled: have },
        })
    }
}

/// One leg's working order.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub market_key: String,
    pub ticker: String,
    pub side: Side,
    pub price_cents: u32,
    pub quantity: u32,
    pub status: OrderStatus,
    pub placed_at: DateTime<Utc>,
    pub close_time: Option<DateTime<Utc>>,
}

/// Fill status reported by the exchange for one order.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    /// Exchange status string, e.g. "resting", "executed", "canceled"
    pub status: String,
    /// Cumulative filled quantity
    pub filled: u32,
}

/// The order-submission seam. `KalshiClient` implements it for real; tests
/// substitute a scripted mock.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit_limit_order(
        &self,
        ticker: &str,
        side: Side,
        price_cents: u32,
        quantity: u32,
    ) -> Result<String>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn fetch_order_status(&self, order_id: &str) -> Result<OrderUpdate>;
}

/// Turns accepted candidates into working orders, tracks them to a terminal
/// state, and appends trade records. The only mutator of the risk ledger.
pub struct ExecutionDriver {
    gateway: Arc<dyn OrderGateway>,
    db: Database,
    dry_run: bool,
    close_policy: ClosePolicy,
    reserve_on_fill: bool,
    open_orders: Vec<Order>,
}

impl ExecutionDriver {
    pub fn new(gateway: Arc<dyn OrderGateway>, db: Database, config: &Config) -> Self {
        ExecutionDriver {
            gateway,
            db,
            dry_run: config.dry_run(),
            close_policy: config.close_policy,
            reserve_on_fill: config.reserve_on_fill,
            open_orders: Vec::new(),
        }
    }

    pub fn open_order_count(&self) -> usize {
        self.open_orders.len()
    }

    /// Submit one limit order per leg and reserve risk budget. The budget is
    /// reserved immediately after submission, not after fills confirm, so a
    /// burst of evaluations can never double-commit it; the reservation can
    /// only overstate risk. `--reserve-on-fill` defers the budget to fill
    /// time (the market is still marked traded at submit).
    pub async fn execute(
        &mut self,
        market_key: &str,
        close_time: Option<DateTime<Utc>>,
        candidate: &CandidatePosition,
        ledger: &mut RiskLedger,
    ) -> Result<()> {
        if self.dry_run {
            for leg in candidate.legs() {
                info!(
                    "[DRY RUN] Would place: {} {}x {} @ {}¢",
                    leg.side.as_str().to_uppercase(),
                    leg.quantity,
                    leg.ticker,
                    leg.price_cents
                );
            }
            // Still mark the market so a dry run doesn't re-log the same
            // opportunity every cycle.
            ledger.mark_traded(market_key);
            return Ok(());
        }

        let mut submitted = 0usize;
        for leg in candidate.legs() {
            match self
                .gateway
                .submit_limit_order(leg.ticker.as_str(), leg.side, leg.price_cents, leg.quantity)
                .await
            {
                Ok(order_id) => {
                    info!(
                        "Placed: {} {}x {} @ {}¢ (order {})",
                        leg.side.as_str().to_uppercase(),
                        leg.quantity,
                        leg.ticker,
                        leg.price_cents,
                        order_id
                    );
                    self.open_orders.push(Order {
                        id: order_id,
                        market_key: market_key.to_string(),
                        ticker: leg.ticker.clone(),
                        side: leg.side,
                        price_cents: leg.price_cents,
                        quantity: leg.quantity,
                        status: OrderStatus::Pending,
                        placed_at: Utc::now(),
                        close_time,
                    });
                    submitted += 1;
                }
                Err(e) => {
                    error!("Failed to place {} order: {:#}", leg.ticker, e);
                }
            }
        }

        if submitted == 0 {
            anyhow::bail!("no leg of the candidate could be submitted");
        }

        if self.reserve_on_fill {
            ledger.mark_traded(market_key);
        } else {
            ledger.commit(market_key, candidate.total_cost_dollars());
            debug!(
                "Reserved ${:.2}; ${:.2} committed today",
                candidate.total_cost_dollars(),
                ledger.spent_today()
            );
        }
        Ok(())
    }

    /// Poll every outstanding order once: advance its state from the
    /// exchange-reported fill status, apply the close policy to orders whose
    /// market has closed, and append a trade record for each order that
    /// reached a terminal state.
    pub async fn sweep(&mut self, now: DateTime<Utc>, ledger: &mut RiskLedger) -> Result<()> {
        let mut orders = std::mem::take(&mut self.open_orders);

        for order in &mut orders {
            match self.gateway.fetch_order_status(&order.id).await {
                Ok(update) => {
                    if let Some(event) = Self::event_from_update(&update, order.quantity) {
                        self.advance(order, event);
                    }
                }
                // Transient: the order is revisited next sweep.
                Err(e) => warn!("Fill check failed for order {}: {:#}", order.id, e),
            }

            if order.status.is_terminal() {
                continue;
            }

            let closed = order.close_time.is_some_and(|close| now >= close);
            if !closed {
                continue;
            }
            match self.close_policy {
                ClosePolicy::Cancel => {
                    match self.gateway.cancel_order(&order.id).await {
                        Ok(()) => self.advance(order, OrderEvent::Cancel),
                        Err(e) => warn!("Cancel failed for order {}: {:#}", order.id, e),
                    }
                }
                ClosePolicy::Expire => self.advance(order, OrderEvent::Expire),
            }
        }

        for order in orders {
            if order.status.is_terminal() {
                self.record_terminal(&order, ledger)?;
            } else {
                self.open_orders.push(order);
            }
        }
        Ok(())
    }

    /// Best-effort cancellation of everything still resting; called on
    /// clean shutdown.
    pub async fn shutdown(&mut self, ledger: &mut RiskLedger) -> Result<()> {
        if self.open_orders.is_empty() {
            return Ok(());
        }
        info!(
            "Shutting down: cancelling {} resting order(s)",
            self.open_orders.len()
        );
        let mut orders = std::mem::take(&mut self.open_orders);
        for order in &mut orders {
            match self.gateway.cancel_order(&order.id).await {
                Ok(()) => self.advance(order, OrderEvent::Cancel),
                Err(e) => warn!("Shutdown cancel failed for order {}: {:#}", order.id, e),
            }
        }
        for order in orders {
            if order.status.is_terminal() {
                self.record_terminal(&order, ledger)?;
            }
        }
        Ok(())
    }

    fn advance(&self, order: &mut Order, event: OrderEvent) {
        match order.status.apply(event, order.quantity) {
            Ok(next) => {
                if next != order.status {
                    debug!(
                        "Order {} {} -> {}",
                        order.id,
                        order.status.as_str(),
                        next.as_str()
                    );
                }
                order.status = next;
            }
            Err(e) => warn!("Ignoring bad transition for order {}: {}", order.id, e),
        }
    }

    fn event_from_update(update: &OrderUpdate, requested: u32) -> Option<OrderEvent> {
        match update.status.as_str() {
            // An executed order is fully matched even when the exchange
            // omits the fill count.
            "executed" | "filled" => Some(OrderEvent::Fill {
                total_filled: update.filled.max(requested),
            }),
            "canceled" | "cancelled" => Some(OrderEvent::Cancel),
            "expired" => Some(OrderEvent::Expire),
            // Still working; report any partial fills.
            _ if update.filled > 0 => Some(OrderEvent::Fill {
                total_filled: update.filled,
            }),
            _ => None,
        }
    }

    fn record_terminal(&self, order: &Order, ledger: &mut RiskLedger) -> Result<()> {
        let filled = order.status.filled(order.quantity);
        let cost = (order.price_cents * filled) as f64 / 100.0;
        let record = TradeRecord {
            id: None,
            ticker: order.ticker.clone(),
            market_key: order.market_key.clone(),
            side: order.side.as_str().to_string(),
            price_cents: order.price_cents,
            quantity: filled,
            cost,
            placed_at: order.placed_at,
            outcome: order.status.as_str().to_string(),
            dry_run: self.dry_run,
            settled: false,
            settled_at: None,
            result: None,
            payout: 0.0,
            pnl: 0.0,
        };
        self.db
            .insert_trade(&record)
            .context("failed to append trade record")?;
        info!(
            "Trade recorded: {} {} {}/{} filled @ {}¢ ({})",
            order.ticker,
            order.side.as_str(),
            filled,
            order.quantity,
            order.price_cents,
            order.status.as_str()
        );
        if self.reserve_on_fill && filled > 0 {
            ledger.add_cost(cost);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::evaluator::OrderLeg;
    use chrono::{Duration, NaiveDate};
    use clap::Parser;
    use std::collections::HashMap;
    use std::sync::Mutex;

    // ── State machine ─────────────────────────────────────────────────────────

    #[test]
    fn pending_fills_completely() {
        let s = OrderStatus::Pending
            .apply(OrderEvent::Fill { total_filled: 10 }, 10)
            .unwrap();
        assert_eq!(s, OrderStatus::Filled);
    }

    #[test]
    fn pending_fills_partially_then_completes() {
        let s = OrderStatus::Pending
            .apply(OrderEvent::Fill { total_filled: 4 }, 10)
            .unwrap();
        assert_eq!(s, OrderStatus::PartiallyFilled { filled: 4 });
        let s = s.apply(OrderEvent::Fill { total_filled: 10 }, 10).unwrap();
        assert_eq!(s, OrderStatus::Filled);
    }

    #[test]
    fn partial_then_cancel_keeps_fill_count() {
        let s = OrderStatus::PartiallyFilled { filled: 4 }
            .apply(OrderEvent::Cancel, 10)
            .unwrap();
        assert_eq!(s, OrderStatus::Cancelled { filled: 4 });
        assert_eq!(s.filled(10), 4);
    }

    #[test]
    fn expire_from_pending_and_partial() {
        assert_eq!(
            OrderStatus::Pending.apply(OrderEvent::Expire, 10).unwrap(),
            OrderStatus::Expired { filled: 0 }
        );
        assert_eq!(
            OrderStatus::PartiallyFilled { filled: 7 }
                .apply(OrderEvent::Expire, 10)
                .unwrap(),
            OrderStatus::Expired { filled: 7 }
        );
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        for terminal in [
            OrderStatus::Filled,
            OrderStatus::Cancelled { filled: 0 },
            OrderStatus::Expired { filled: 2 },
        ] {
            let err = terminal.apply(OrderEvent::Cancel, 10).unwrap_err();
            assert!(matches!(err, TransitionError::AlreadyTerminal(_)));
        }
    }

    #[test]
    fn fill_regression_is_rejected() {
        let err = OrderStatus::PartiallyFilled { filled: 6 }
            .apply(OrderEvent::Fill { total_filled: 3 }, 10)
            .unwrap_err();
        assert_eq!(err, TransitionError::FillRegression { have: 6, reported: 3 });
    }

    #[test]
    fn zero_fill_report_is_a_no_op() {
        let s = OrderStatus::Pending
            .apply(OrderEvent::Fill { total_filled: 0 }, 10)
            .unwrap();
        assert_eq!(s, OrderStatus::Pending);
    }

    // ── Driver against a scripted gateway ─────────────────────────────────────

    #[derive(Default)]
    struct MockGateway {
        submitted: Mutex<Vec<(String, Side, u32, u32)>>,
        cancelled: Mutex<Vec<String>>,
        statuses: Mutex<HashMap<String, OrderUpdate>>,
        next_id: Mutex<u32>,
    }

    impl MockGateway {
        fn set_status(&self, order_id: &str, status: &str, filled: u32) {
            self.statuses.lock().unwrap().insert(
                order_id.to_string(),
                OrderUpdate {
                    status: status.to_string(),
                    filled,
                },
            );
        }
    }

    #[async_trait]
    impl OrderGateway for MockGateway {
        async fn submit_limit_order(
            &self,
            ticker: &str,
            side: Side,
            price_cents: u32,
            quantity: u32,
        ) -> Result<String> {
            let mut id = self.next_id.lock().unwrap();
            *id += 1;
            self.submitted
                .lock()
                .unwrap()
                .push((ticker.to_string(), side, price_cents, quantity));
            Ok(format!("ord-{}", id))
        }

        async fn cancel_order(&self, order_id: &str) -> Result<()> {
            self.cancelled.lock().unwrap().push(order_id.to_string());
            Ok(())
        }

        async fn fetch_order_status(&self, order_id: &str) -> Result<OrderUpdate> {
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .get(order_id)
                .map(|u| OrderUpdate {
                    status: u.status.clone(),
                    filled: u.filled,
                })
                .unwrap_or(OrderUpdate {
                    status: "resting".to_string(),
                    filled: 0,
                }))
        }
    }

    fn live_config() -> Config {
        let mut cfg = Config::try_parse_from(["bucket-bot"]).unwrap();
        cfg.live = true;
        cfg.kalshi_api_key = Some("key".into());
        cfg
    }

    fn candidate() -> CandidatePosition {
        CandidatePosition::new(vec![
            OrderLeg {
                ticker: "T2".into(),
                side: Side::Buy,
                price_cents: 49,
                quantity: 10,
            },
            OrderLeg {
                ticker: "T3".into(),
                side: Side::Buy,
                price_cents: 33,
                quantity: 10,
            },
        ])
        .unwrap()
    }

    fn ledger() -> RiskLedger {
        RiskLedger::new(NaiveDate::from_ymd_opt(2026, 8, 7).unwrap())
    }

    #[tokio::test]
    async fn execute_submits_each_leg_and_reserves_on_submit() {
        let gateway = Arc::new(MockGateway::default());
        let db = Database::open_in_memory().unwrap();
        let mut driver = ExecutionDriver::new(gateway.clone(), db, &live_config());
        let mut ledger = ledger();

        driver
            .execute("NYC-20260808", None, &candidate(), &mut ledger)
            .await
            .unwrap();

        assert_eq!(gateway.submitted.lock().unwrap().len(), 2);
        assert_eq!(driver.open_order_count(), 2);
        // Budget reserved for the full candidate before any fill lands.
        assert!((ledger.spent_today() - 8.2).abs() < 1e-9);
        assert!(ledger.has_traded("NYC-20260808"));
    }

    #[tokio::test]
    async fn dry_run_marks_market_without_spending() {
        let gateway = Arc::new(MockGateway::default());
        let db = Database::open_in_memory().unwrap();
        let cfg = Config::try_parse_from(["bucket-bot"]).unwrap();
        let mut driver = ExecutionDriver::new(gateway.clone(), db, &cfg);
        let mut ledger = ledger();

        driver
            .execute("NYC-20260808", None, &candidate(), &mut ledger)
            .await
            .unwrap();

        assert!(gateway.submitted.lock().unwrap().is_empty());
        assert!(ledger.has_traded("NYC-20260808"));
        assert_eq!(ledger.spent_today(), 0.0);
    }

    #[tokio::test]
    async fn partial_fill_then_cancel_records_realized_quantity() {
        let gateway = Arc::new(MockGateway::default());
        let db = Database::open_in_memory().unwrap();
        let mut driver = ExecutionDriver::new(gateway.clone(), db.clone(), &live_config());
        let mut ledger = ledger();

        let single = CandidatePosition::new(vec![OrderLeg {
            ticker: "T2".into(),
            side: Side::Buy,
            price_cents: 49,
            quantity: 10,
        }])
        .unwrap();
        driver
            .execute("NYC-20260808", None, &single, &mut ledger)
            .await
            .unwrap();

        // 4 of 10 fill, then the exchange reports the order cancelled.
        gateway.set_status("ord-1", "resting", 4);
        driver.sweep(Utc::now(), &mut ledger).await.unwrap();
        assert_eq!(driver.open_order_count(), 1);

        gateway.set_status("ord-1", "canceled", 4);
        driver.sweep(Utc::now(), &mut ledger).await.unwrap();
        assert_eq!(driver.open_order_count(), 0);

        let trades = db.list_unsettled().unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, 4);
        assert_eq!(trades[0].outcome, "cancelled");
        assert!((trades[0].cost - 1.96).abs() < 1e-9);
    }

    #[tokio::test]
    async fn close_policy_cancel_cancels_resting_orders() {
        let gateway = Arc::new(MockGateway::default());
        let db = Database::open_in_memory().unwrap();
        let mut driver = ExecutionDriver::new(gateway.clone(), db.clone(), &live_config());
        let mut ledger = ledger();

        let close = Utc::now() - Duration::minutes(1);
        driver
            .execute("NYC-20260808", Some(close), &candidate(), &mut ledger)
            .await
            .unwrap();
        driver.sweep(Utc::now(), &mut ledger).await.unwrap();

        assert_eq!(driver.open_order_count(), 0);
        assert_eq!(gateway.cancelled.lock().unwrap().len(), 2);
        // Unfilled cancels still leave (zero-quantity) records behind.
        assert_eq!(db.get_stats().unwrap().total_trades, 2);
    }

    #[tokio::test]
    async fn close_policy_expire_leaves_cancellation_to_the_exchange() {
        let gateway = Arc::new(MockGateway::default());
        let db = Database::open_in_memory().unwrap();
        let mut cfg = live_config();
        cfg.close_policy = ClosePolicy::Expire;
        let mut driver = ExecutionDriver::new(gateway.clone(), db.clone(), &cfg);
        let mut ledger = ledger();

        let close = Utc::now() - Duration::minutes(1);
        driver
            .execute("NYC-20260808", Some(close), &candidate(), &mut ledger)
            .await
            .unwrap();
        driver.sweep(Utc::now(), &mut ledger).await.unwrap();

        assert_eq!(driver.open_order_count(), 0);
        assert!(gateway.cancelled.lock().unwrap().is_empty());
        let recent = db.list_recent(10).unwrap();
        assert!(recent.iter().all(|t| t.outcome == "expired"));
    }

    #[tokio::test]
    async fn full_fill_records_full_quantity() {
        let gateway = Arc::new(MockGateway::default());
        let db = Database::open_in_memory().unwrap();
        let mut driver = ExecutionDriver::new(gateway.clone(), db.clone(), &live_config());
        let mut ledger = ledger();

        driver
            .execute("NYC-20260808", None, &candidate(), &mut ledger)
            .await
            .unwrap();
        gateway.set_status("ord-1", "executed", 10);
        gateway.set_status("ord-2", "executed", 10);
        driver.sweep(Utc::now(), &mut ledger).await.unwrap();

        let trades = db.list_unsettled().unwrap();
        assert_eq!(trades.len(), 2);
        assert!(trades.iter().all(|t| t.quantity == 10));
    }

    #[tokio::test]
    async fn reserve_on_fill_defers_budget_to_fills() {
        let gateway = Arc::new(MockGateway::default());
        let db = Database::open_in_memory().unwrap();
        let mut cfg = live_config();
        cfg.reserve_on_fill = true;
        let mut driver = ExecutionDriver::new(gateway.clone(), db, &cfg);
        let mut ledger = ledger();

        let single = CandidatePosition::new(vec![OrderLeg {
            ticker: "T2".into(),
            side: Side::Buy,
            price_cents: 50,
            quantity: 10,
        }])
        .unwrap();
        driver
            .execute("NYC-20260808", None, &single, &mut ledger)
            .await
            .unwrap();
        // Market is marked (idempotency) but no budget is committed yet.
        assert!(ledger.has_traded("NYC-20260808"));
        assert_eq!(ledger.spent_today(), 0.0);

        gateway.set_status("ord-1", "executed", 10);
        driver.sweep(Utc::now(), &mut ledger).await.unwrap();
        assert!((ledger.spent_today() - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn shutdown_cancels_everything_resting() {
        let gateway = Arc::new(MockGateway::default());
        let db = Database::open_in_memory().unwrap();
        let mut driver = ExecutionDriver::new(gateway.clone(), db, &live_config());
        let mut ledger = ledger();

        driver
            .execute("NYC-20260808", None, &candidate(), &mut ledger)
            .await
            .unwrap();
        driver.shutdown(&mut ledger).await.unwrap();

        assert_eq!(driver.open_order_count(), 0);
        assert_eq!(gateway.cancelled.lock().unwrap().len(), 2);
    }
}
