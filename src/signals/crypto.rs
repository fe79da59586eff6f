use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::engine::evaluator::Signal;
use crate::market::Event;

use super::provider::SignalProvider;

/// Client for Binance public price endpoints (no API key needed).
#[derive(Clone)]
pub struct BinanceClient {
    http: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(BinanceClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Current spot price for a symbol (e.g. "BTCUSDT").
    pub async fn get_price(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .context("Binance price request failed")?;
        if !resp.status().is_success() {
            bail!("Binance API error: {}", resp.status());
        }
        let raw: serde_json::Value = resp.json().await?;
        raw["price"]
            .as_str()
            .and_then(|p| p.parse::<f64>().ok())
            .with_context(|| format!("no price in Binance response for {}", symbol))
    }

    /// Price at a historical moment, from the 1-minute kline covering it.
    pub async fn get_price_at(&self, symbol: &str, timestamp_ms: i64) -> Result<Option<f64>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", "1m"),
                ("startTime", &timestamp_ms.to_string()),
                ("limit", "1"),
            ])
            .send()
            .await
            .context("Binance kline request failed")?;
        if !resp.status().is_success() {
            bail!("Binance API error: {}", resp.status());
        }
        let raw: serde_json::Value = resp.json().await?;
        // Kline rows are [open_time, open, high, low, close, ...]
        let open = raw
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get(1))
            .and_then(|v| v.as_str())
            .and_then(|p| p.parse::<f64>().ok());
        Ok(open)
    }
}

/// Secondary momentum check: at least two of the recent price deltas move
/// with the claimed direction.
pub fn detect_momentum(is_up: bool, history: &[f64]) -> bool {
    if history.len() < 3 {
        return false;
    }
    let mut aligned = 0;
    for pair in history.windows(2) {
        let delta = pair[1] - pair[0];
        if (is_up && delta > 0.0) || (!is_up && delta < 0.0) {
            aligned += 1;
        }
    }
    aligned >= 2
}

/// Signal source for the momentum strategy: percentage change of the
/// underlying from the window-start reference to now, plus a corroborating
/// short-history momentum check.
pub struct MomentumSignal {
    crypto: BinanceClient,
    symbol: String,
    window_minutes: f64,
    /// Window-start reference prices, keyed by event ticker. A window's
    /// reference never changes once captured.
    window_start_prices: Mutex<HashMap<String, f64>>,
    /// Last few spot reads for the corroboration check.
    price_history: Mutex<Vec<f64>>,
}

impl MomentumSignal {
    pub fn new(crypto: BinanceClient, symbol: &str, window_minutes: f64) -> Self {
        MomentumSignal {
            crypto,
            symbol: symbol.to_string(),
            window_minutes,
            window_start_prices: Mutex::new(HashMap::new()),
            price_history: Mutex::new(Vec::new()),
        }
    }

    async fn window_start_price(&self, event: &Event, start_ms: i64) -> Result<f64> {
        if let Some(price) = self
            .window_start_prices
            .lock()
            .unwrap()
            .get(&event.event_ticker)
        {
            return Ok(*price);
        }
        let price = match self.crypto.get_price_at(&self.symbol, start_ms).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                // Degraded reference; better than skipping the window.
                warn!(
                    "{}: no kline at window start, falling back to spot",
                    event.event_ticker
                );
                self.crypto.get_price(&self.symbol).await?
            }
            Err(e) => return Err(e),
        };
        let mut cache = self.window_start_prices.lock().unwrap();
        // Windows roll every few minutes; drop stale references rather than
        // growing without bound.
        if cache.len() >= 64 {
            cache.clear();
        }
        cache.insert(event.event_ticker.clone(), price);
        Ok(price)
    }

    fn push_history(&self, price: f64) -> Vec<f64> {
        let mut history = self.price_history.lock().unwrap();
        history.push(price);
        let len = history.len();
        if len > 4 {
            history.drain(..len - 4);
        }
        history.clone()
    }
}

#[async_trait]
impl SignalProvider for MomentumSignal {
    async fn compute_signal(&self, event: &Event) -> Result<Signal> {
        let close = event
            .close_time
            .context("window market has no close time")?;
        let now = Utc::now();
        let minutes_left = (close - now).num_seconds() as f64 / 60.0;
        let start = close - Duration::seconds((self.window_minutes * 60.0) as i64);

        let start_price = self
            .window_start_price(event, start.timestamp_millis())
            .await?;
        let current_price = self.crypto.get_price(&self.symbol).await?;
        if start_price <= 0.0 || current_price <= 0.0 {
            bail!("unusable {} prices ({} -> {})", self.symbol, start_price, current_price);
        }

        let change_pct = (current_price - start_price) / start_price * 100.0;
        let history = self.push_history(current_price);
        let corroborated = detect_momentum(change_pct > 0.0, &history);

        debug!(
            "{}: {} ${:.0} -> ${:.0} ({:+.3}%), {:.1} min left, momentum {}",
            event.event_ticker,
            self.symbol,
            start_price,
            current_price,
            change_pct,
            minutes_left,
            corroborated
        );

        Ok(Signal::Momentum {
            change_pct,
            minutes_left,
            window_minutes: self.window_minutes,
            corroborated,
        })
    }

    fn name(&self) -> &str {
        "binance-momentum"
    }
}
