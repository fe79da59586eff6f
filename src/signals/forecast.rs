use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use tracing::debug;

use crate::engine::evaluator::Signal;
use crate::market::Event;

use super::provider::SignalProvider;

/// NWS station/gridpoint per city. Kalshi settles its temperature markets
/// on these specific stations, so the forecast must come from the matching
/// gridpoint.
fn city_grid(city: &str) -> Option<(&'static str, &'static str, u32, u32)> {
    // (station, forecast office, grid x, grid y)
    match city.to_uppercase().replace(' ', "_").as_str() {
        "NYC" => Some(("KNYC", "OKX", 33, 37)),
        "CHICAGO" => Some(("KMDW", "LOT", 75, 73)),
        "MIAMI" => Some(("KMIA", "MFL", 109, 50)),
        "AUSTIN" => Some(("KAUS", "EWX", 156, 91)),
        "DENVER" => Some(("KDEN", "BOU", 62, 60)),
        "HOUSTON" => Some(("KIAH", "HGX", 65, 97)),
        "LOS_ANGELES" => Some(("KLAX", "LOX", 149, 48)),
        "PHILADELPHIA" => Some(("KPHL", "PHI", 49, 75)),
        _ => None,
    }
}

/// Forecast uncertainty (standard deviation, °F) by days ahead.
fn forecast_std(days_ahead: i64) -> f64 {
    match days_ahead {
        d if d <= 0 => 2.0,
        1 => 2.5,
        _ => 3.5,
    }
}

/// A point temperature forecast for one station and date.
#[derive(Debug, Clone)]
pub struct Forecast {
    pub station: String,
    pub date: NaiveDate,
    pub high_temp: f64,
    pub low_temp: Option<f64>,
    pub high_temp_std: f64,
}

/// Client for the National Weather Service API.
#[derive(Clone)]
pub struct NwsClient {
    http: Client,
    base_url: String,
}

impl NwsClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            // NWS rejects requests without a User-Agent
            .user_agent("bucket-bot/0.2 (weather trading bot)")
            .build()
            .context("Failed to build HTTP client")?;
        Ok(NwsClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the high/low forecast for a city on a given date.
    pub async fn get_forecast(&self, city: &str, date: NaiveDate) -> Result<Forecast> {
        let (station, office, grid_x, grid_y) =
            city_grid(city).with_context(|| format!("unknown city: {}", city))?;

        let url = format!(
            "{}/gridpoints/{}/{},{}/forecast",
            self.base_url, office, grid_x, grid_y
        );
        debug!("Fetching NWS forecast: {}", url);

        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/geo+json")
            .send()
            .await
            .context("NWS request failed")?;
        if !resp.status().is_success() {
            bail!("NWS API error: {}", resp.status());
        }
        let raw: serde_json::Value = resp.json().await.context("Failed to parse NWS response")?;

        let date_str = date.format("%Y-%m-%d").to_string();
        let mut high_temp: Option<f64> = None;
        let mut low_temp: Option<f64> = None;

        for period in raw["properties"]["periods"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            let start = period["startTime"].as_str().unwrap_or_default();
            if !start.starts_with(&date_str) {
                continue;
            }
            let temp = match period["temperature"].as_f64() {
                Some(t) => t,
                None => continue,
            };
            if period["isDaytime"].as_bool().unwrap_or(false) {
                high_temp = Some(temp);
            } else {
                low_temp = Some(temp);
            }
        }

        let high_temp = high_temp
            .with_context(|| format!("no daytime forecast period for {} on {}", city, date))?;
        let days_ahead = (date - Utc::now().date_naive()).num_days();

        Ok(Forecast {
            station: station.to_string(),
            date,
            high_temp,
            low_temp,
            high_temp_std: forecast_std(days_ahead),
        })
    }
}

/// Map a normal forecast distribution onto an event's buckets. Each bucket
/// gets the probability mass of its range (with a half-degree continuity
/// correction on the integer bounds), floored at 0.1% and renormalized.
pub fn bucket_probabilities(event: &Event, mean: f64, std: f64) -> Vec<(String, f64)> {
    let mut probs: Vec<(String, f64)> = event
        .buckets
        .iter()
        .map(|b| {
            let p = match (b.lower, b.upper) {
                (None, Some(hi)) => normal_cdf(hi as f64 + 0.5, mean, std),
                (Some(lo), None) => 1.0 - normal_cdf(lo as f64 - 0.5, mean, std),
                (Some(lo), Some(hi)) => {
                    normal_cdf(hi as f64 + 0.5, mean, std) - normal_cdf(lo as f64 - 0.5, mean, std)
                }
                (None, None) => 0.0,
            };
            (b.ticker.clone(), p.max(0.001))
        })
        .collect();

    let total: f64 = probs.iter().map(|(_, p)| *p).sum();
    if total > 0.0 && (total - 1.0).abs() > 0.01 {
        for (_, p) in probs.iter_mut() {
            *p /= total;
        }
    }
    probs
}

fn normal_cdf(x: f64, mean: f64, std: f64) -> f64 {
    let z = (x - mean) / std;
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26 approximation, max error ~1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

/// Signal source for the forecast-edge strategy: an NWS point forecast
/// widened into a per-bucket probability distribution.
pub struct ForecastSignal {
    nws: NwsClient,
}

impl ForecastSignal {
    pub fn new(nws: NwsClient) -> Self {
        ForecastSignal { nws }
    }
}

#[async_trait]
impl SignalProvider for ForecastSignal {
    async fn compute_signal(&self, event: &Event) -> Result<Signal> {
        let forecast = self.nws.get_forecast(&event.underlying, event.date).await?;
        debug!(
            "{}: NWS forecast high {:.0}°F (±{:.1}°F)",
            event.underlying, forecast.high_temp, forecast.high_temp_std
        );
        Ok(Signal::Distribution(bucket_probabilities(
            event,
            forecast.high_temp,
            forecast.high_temp_std,
        )))
    }

    fn name(&self) -> &str {
        "nws-forecast"
    }
}
