use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::engine::evaluator::Side;
use crate::engine::execution::{OrderGateway, OrderUpdate};
use crate::market::{Bucket, Event};

/// City codes used in Kalshi weather tickers.
fn city_code(city: &str) -> String {
    match city.to_uppercase().replace(' ', "_").as_str() {
        "NYC" => "NY".to_string(),
        "CHICAGO" => "CHI".to_string(),
        "MIAMI" => "MIA".to_string(),
        "AUSTIN" => "AUS".to_string(),
        "DENVER" => "DEN".to_string(),
        "HOUSTON" => "HOU".to_string(),
        "LOS_ANGELES" => "LAX".to_string(),
        "PHILADELPHIA" => "PHIL".to_string(),
        other => other.to_string(),
    }
}

/// Client for the Kalshi trade API: market data, order submission, fill
/// status and settlement results.
#[derive(Clone)]
pub struct KalshiClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl KalshiClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = Url::parse(base_url).context("Invalid Kalshi API URL")?;
        Ok(KalshiClient {
            http,
            base_url,
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {}", key)),
            None => req,
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let resp = self
            .auth(self.http.get(self.url(path)).query(query))
            .send()
            .await
            .context("Kalshi API request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Kalshi API error {}: {}", status, body);
        }
        resp.json().await.context("Failed to parse Kalshi response")
    }

    // ── Account ──────────────────────────────────────────────────────────────

    /// Account balance in dollars.
    pub async fn get_balance(&self) -> Result<f64> {
        let raw = self.get_json("/trade-api/v2/portfolio/balance", &[]).await?;
        Ok(raw["balance"].as_f64().unwrap_or(0.0) / 100.0)
    }

    // ── Market data ──────────────────────────────────────────────────────────

    /// Fetch one city's temperature market for a date, with its bucket
    /// partition. Returns `None` when no such event is listed.
    pub async fn fetch_weather_event(
        &self,
        city: &str,
        date: NaiveDate,
        kind: &str,
    ) -> Result<Option<Event>> {
        let code = city_code(city);
        let date_str = date.format("%y%b%d").to_string().to_uppercase();

        // Ticker formats have changed over time; try both.
        let event_tickers = [
            format!("KX{}{}-{}", kind, code, date_str),
            format!("{}{}-{}", kind, code, date_str),
        ];

        for event_ticker in &event_tickers {
            let raw = match self
                .get_json(
                    "/trade-api/v2/markets",
                    &[
                        ("event_ticker", event_ticker.clone()),
                        ("limit", "50".to_string()),
                    ],
                )
                .await
            {
                Ok(raw) => raw,
                // An unknown ticker format can 404; try the next one.
                Err(e) => {
                    debug!("{}: {:#}", event_ticker, e);
                    continue;
                }
            };
            let markets = raw["markets"].as_array().cloned().unwrap_or_default();
            if markets.is_empty() {
                continue;
            }
            let event = parse_weather_event(event_ticker, city, date, &markets);
            debug!(
                "{}: {} buckets, total implied {:.0}%",
                event_ticker,
                event.buckets.len(),
                event.total_implied_prob() * 100.0
            );
            return Ok(Some(event));
        }

        Ok(None)
    }

    /// The currently active direction-window market in a series (e.g.
    /// KXBTC15M), as a single-bucket event.
    pub async fn fetch_active_window_market(&self, series: &str) -> Result<Option<Event>> {
        let raw = self
            .get_json(
                "/trade-api/v2/markets",
                &[
                    ("series_ticker", series.to_string()),
                    ("status", "open".to_string()),
                    ("limit", "20".to_string()),
                ],
            )
            .await?;
        let markets = raw["markets"].as_array().cloned().unwrap_or_default();

        // The active window is the open market closing soonest.
        let now = Utc::now();
        let mut best: Option<(DateTime<Utc>, &Value)> = None;
        for m in &markets {
            let Some(close) = parse_time(&m["close_time"]) else {
                continue;
            };
            if close <= now {
                continue;
            }
            match best {
                Some((prev, _)) if prev <= close => {}
                _ => best = Some((close, m)),
            }
        }

        let Some((close, m)) = best else {
            return Ok(None);
        };
        let ticker = m["ticker"].as_str().unwrap_or_default().to_string();
        Ok(Some(Event {
            event_ticker: ticker.clone(),
            title: m["title"].as_str().unwrap_or_default().to_string(),
            underlying: "BTC".to_string(),
            date: close.date_naive(),
            buckets: vec![Bucket {
                ticker,
                lower: None,
                upper: None,
                yes_bid: m["yes_bid"].as_u64().unwrap_or(0) as u32,
                yes_ask: m["yes_ask"].as_u64().unwrap_or(0) as u32,
                open: m["status"].as_str() == Some("active"),
            }],
            status: "open".to_string(),
            close_time: Some(close),
        }))
    }

    /// Settlement result for a market: `Some("yes"|"no")` once settled.
    pub async fn fetch_market_result(&self, ticker: &str) -> Result<Option<String>> {
        let raw = self
            .get_json(&format!("/trade-api/v2/markets/{}", ticker), &[])
            .await?;
        let market = &raw["market"];
        let status = market["status"].as_str().unwrap_or_default();
        let result = market["result"].as_str().unwrap_or_default();
        if matches!(status, "settled" | "finalized") && !result.is_empty() {
            Ok(Some(result.to_lowercase()))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl OrderGateway for KalshiClient {
    async fn submit_limit_order(
        &self,
        ticker: &str,
        side: Side,
        price_cents: u32,
        quantity: u32,
    ) -> Result<String> {
        info!(
            "Placing order: {} {}x {} @ {}¢",
            side.as_str(),
            quantity,
            ticker,
            price_cents
        );
        // Orders are always expressed on the YES side; `action` carries the
        // direction.
        let body = serde_json::json!({
            "ticker": ticker,
            "action": side.as_str(),
            "side": "yes",
            "count": quantity,
            "type": "limit",
            "yes_price": price_cents,
        });
        let resp = self
            .auth(self.http.post(self.url("/trade-api/v2/portfolio/orders")))
            .json(&body)
            .send()
            .await
            .context("Failed to place Kalshi order")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Order placement failed {}: {}", status, body);
        }
        let raw: Value = resp.json().await?;
        let order_id = raw["order"]["order_id"]
            .as_str()
            .context("order response missing order_id")?
            .to_string();
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let resp = self
            .auth(
                self.http
                    .delete(self.url(&format!("/trade-api/v2/portfolio/orders/{}", order_id))),
            )
            .send()
            .await
            .context("Failed to cancel Kalshi order")?;
        if !resp.status().is_success() {
            bail!("Order cancel failed: {}", resp.status());
        }
        Ok(())
    }

    async fn fetch_order_status(&self, order_id: &str) -> Result<OrderUpdate> {
        let raw = self
            .get_json(&format!("/trade-api/v2/portfolio/orders/{}", order_id), &[])
            .await?;
        let order = &raw["order"];
        Ok(OrderUpdate {
            status: order["status"].as_str().unwrap_or_default().to_lowercase(),
            filled: order["filled_count"].as_u64().unwrap_or(0) as u32,
        })
    }
}

fn parse_time(v: &Value) -> Option<DateTime<Utc>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn parse_weather_event(
    event_ticker: &str,
    city: &str,
    date: NaiveDate,
    markets: &[Value],
) -> Event {
    let buckets: Vec<Bucket> = markets.iter().filter_map(parse_bucket).collect();
    let close_time = markets.iter().find_map(|m| parse_time(&m["close_time"]));
    let status = if markets
        .iter()
        .any(|m| m["status"].as_str() == Some("active"))
    {
        "open"
    } else {
        "closed"
    };

    let mut event = Event {
        event_ticker: event_ticker.to_string(),
        title: format!("{} temperature on {}", city, date),
        underlying: city.to_uppercase().replace(' ', "_"),
        date,
        buckets,
        status: status.to_string(),
        close_time,
    };
    event.sort_buckets();
    event
}

/// Decode one bucket from its market row. The ticker's last segment names
/// the range: "B70.5" is the 70–71 range around that midpoint, "T68" a
/// tail whose direction comes from the subtitle.
fn parse_bucket(market: &Value) -> Option<Bucket> {
    let ticker = market["ticker"].as_str()?;
    let bucket_part = ticker.rsplit('-').next()?;

    let yes_bid = market["yes_bid"].as_u64().unwrap_or(0) as u32;
    let yes_ask = market["yes_ask"].as_u64().unwrap_or(0) as u32;
    let open = market["status"].as_str() == Some("active");

    let (lower, upper) = if let Some(mid) = bucket_part.strip_prefix('B') {
        let mid: f64 = mid.parse().ok()?;
        (Some((mid - 0.5) as i32), Some((mid + 0.5) as i32))
    } else if let Some(threshold) = bucket_part.strip_prefix('T') {
        let threshold: i32 = threshold.parse().ok()?;
        let subtitle = market["subtitle"].as_str().unwrap_or_default().to_lowercase();
        if subtitle.contains('<') || subtitle.contains("below") {
            (None, Some(threshold))
        } else {
            (Some(threshold), None)
        }
    } else {
        return None;
    };

    Some(Bucket {
        ticker: ticker.to_string(),
        lower,
        upper,
        yes_bid,
        yes_ask,
        open,
    })
}
