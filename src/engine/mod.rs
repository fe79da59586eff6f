pub mod edge;
pub mod evaluator;
pub mod execution;
pub mod momentum;
pub mod risk;
pub mod spread;

pub use evaluator::{CandidatePosition, SelectionStrategy, Signal};
pub use execution::ExecutionDriver;
pub use risk::RiskLedger;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Config, StrategyKind};
use crate::db::Database;
use crate::kalshi::KalshiClient;
use crate::market::Event;
use crate::signals::{
    BidRankingSignal, BinanceClient, ForecastSignal, MomentumSignal, NwsClient, SignalProvider,
};

/// The settlement day a wall-clock instant belongs to, under the configured
/// UTC offset. The risk ledger resets on this boundary, not on process-local
/// midnight.
pub fn settlement_day(now: DateTime<Utc>, utc_offset_hours: i32) -> NaiveDate {
    (now + Duration::hours(utc_offset_hours as i64)).date_naive()
}

/// The core engine: one instance owns its risk ledger and execution driver,
/// and runs the full pipeline once per cycle: signal, evaluate, gate,
/// execute, record.
pub struct Engine {
    config: Config,
    kalshi: KalshiClient,
    signal: Arc<dyn SignalProvider>,
    strategy: SelectionStrategy,
    ledger: RiskLedger,
    driver: ExecutionDriver,
}

impl Engine {
    pub fn new(config: Config, db: Database, kalshi: KalshiClient) -> Result<Self> {
        let signal: Arc<dyn SignalProvider> = match config.strategy {
            StrategyKind::Spread => Arc::new(BidRankingSignal),
            StrategyKind::Forecast => Arc::new(ForecastSignal::new(NwsClient::new(
                &config.nws_api_url,
            )?)),
            StrategyKind::Momentum => Arc::new(MomentumSignal::new(
                BinanceClient::new(&config.binance_api_url)?,
                "BTCUSDT",
                config.window_minutes,
            )),
        };
        let strategy = SelectionStrategy::from(config.strategy);
        let driver = ExecutionDriver::new(Arc::new(kalshi.clone()), db, &config);
        let ledger = RiskLedger::new(settlement_day(
            Utc::now(),
            config.settlement_utc_offset_hours,
        ));
        info!(
            "Engine ready: strategy={}, signal={}, daily cap ${:.2}",
            strategy.name(),
            signal.name(),
            config.daily_risk_cap
        );
        Ok(Engine {
            config,
            kalshi,
            signal,
            strategy,
            ledger,
            driver,
        })
    }

    /// One full evaluation cycle. Markets are processed sequentially; a
    /// failure in one never blocks the others. Ends with a fill-status
    /// sweep over outstanding orders.
    pub async fn run_cycle(&mut self) -> Result<()> {
        let now = Utc::now();
        self.ledger.roll_day(settlement_day(
            now,
            self.config.settlement_utc_offset_hours,
        ));

        match self.config.strategy {
            StrategyKind::Momentum => {
                if let Err(e) = self.process_window_market().await {
                    warn!(
                        "Error evaluating {} window: {:#}",
                        self.config.window_series, e
                    );
                }
            }
            _ => {
                let target = self.target_date(now);
                let cities = self.config.cities.clone();
                for city in &cities {
                    if let Err(e) = self.process_city(city, target).await {
                        warn!("Error processing {}: {:#}", city, e);
                    }
                }
            }
        }

        self.driver.sweep(Utc::now(), &mut self.ledger).await
    }

    /// Weather markets are traded one day ahead, like the settlement they
    /// reference.
    fn target_date(&self, now: DateTime<Utc>) -> NaiveDate {
        settlement_day(now, self.config.settlement_utc_offset_hours) + Duration::days(1)
    }

    async fn process_city(&mut self, city: &str, date: NaiveDate) -> Result<()> {
        let market_key = format!(
            "{}-{}",
            city.to_uppercase().replace(' ', "_"),
            date.format("%Y%m%d")
        );
        if self.ledger.has_traded(&market_key) {
            debug!("{}: already traded today, skipping", market_key);
            return Ok(());
        }

        let Some(event) = self.kalshi.fetch_weather_event(city, date, "HIGH").await? else {
            info!("{}: no market found for {}", city, date);
            return Ok(());
        };
        if !event.is_open(Utc::now()) {
            info!("{}: market closed", city);
            return Ok(());
        }
        // A malformed snapshot poisons only this market for this cycle.
        event
            .validate()
            .with_context(|| format!("invalid snapshot for {}", event.event_ticker))?;

        self.evaluate_and_execute(&event, &event.market_key()).await
    }

    async fn process_window_market(&mut self) -> Result<()> {
        let Some(event) = self
            .kalshi
            .fetch_active_window_market(&self.config.window_series)
            .await?
        else {
            debug!("No active {} market", self.config.window_series);
            return Ok(());
        };
        // Each window is its own event; the ticker embeds its settlement
        // moment, so it serves as the idempotency key.
        let market_key = event.event_ticker.clone();
        if self.ledger.has_traded(&market_key) {
            debug!("{}: already traded this window", market_key);
            return Ok(());
        }
        event
            .validate()
            .with_context(|| format!("invalid snapshot for {}", event.event_ticker))?;

        self.evaluate_and_execute(&event, &market_key).await
    }

    async fn evaluate_and_execute(&mut self, event: &Event, market_key: &str) -> Result<()> {
        let signal = self.signal.compute_signal(event).await?;

        let Some(candidate) = self.strategy.evaluate(event, &signal, &self.config) else {
            // The expected majority outcome; not an error.
            debug!("{}: no opportunity", event.event_ticker);
            return Ok(());
        };

        info!(
            "{}: candidate [{}], cost {}¢, potential payout {}¢",
            event.event_ticker,
            candidate
                .legs()
                .iter()
                .map(|l| format!("{} {}x{}¢", l.ticker, l.quantity, l.price_cents))
                .collect::<Vec<_>>()
                .join(", "),
            candidate.per_contract_cost_cents(),
            candidate.potential_payout_cents,
        );

        if let Err(reason) = risk::check(
            &candidate,
            market_key,
            &self.ledger,
            self.config.daily_risk_cap,
        ) {
            info!("{}: risk gate rejected: {}", event.event_ticker, reason);
            return Ok(());
        }

        self.driver
            .execute(market_key, event.close_time, &candidate, &mut self.ledger)
            .await
    }

    /// Clean shutdown: best-effort cancellation of resting orders.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.driver.shutdown(&mut self.ledger).await
    }

    pub fn log_status(&self) {
        info!(
            "Status: ${:.2} committed today, {} market(s) traded, {} order(s) open",
            self.ledger.spent_today(),
            self.ledger.traded_count(),
            self.driver.open_order_count()
        );
    }
}
