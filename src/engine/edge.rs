use tracing::debug;

use crate::config::Config;
use crate::market::{Bucket, Event};

use super::evaluator::{CandidatePosition, OrderLeg, Side, CONTRACT_PAYOUT_CENTS};

/// Edge computed for one bucket: our model probability against the
/// market-implied one.
#[derive(Debug, Clone)]
pub struct BucketEdge {
    pub ticker: String,
    pub range_label: String,
    pub model_prob: f64,
    pub market_prob: f64,
    /// model_prob - market_prob
    pub edge: f64,
    /// Expected value per contract in cents
    pub expected_value: f64,
    /// Buy-side price used (ask, falling back to bid)
    pub price_cents: u32,
}

/// Calculate the edge for every bucket, sorted highest first.
pub fn bucket_edges(event: &Event, probs: &[(String, f64)]) -> Vec<BucketEdge> {
    let mut edges: Vec<BucketEdge> = event
        .buckets
        .iter()
        .map(|b| {
            let model_prob = probs
                .iter()
                .find(|(t, _)| t == &b.ticker)
                .map(|(_, p)| *p)
                .unwrap_or(0.0);
            let price = b.buy_price();
            let market_prob = price as f64 / 100.0;
            let payout = (CONTRACT_PAYOUT_CENTS - price.min(CONTRACT_PAYOUT_CENTS)) as f64;
            BucketEdge {
                ticker: b.ticker.clone(),
                range_label: b.range_label(),
                model_prob,
                market_prob,
                edge: model_prob - market_prob,
                expected_value: payout * model_prob - price as f64 * (1.0 - model_prob),
                price_cents: price,
            }
        })
        .collect();
    edges.sort_by(|a, b| b.edge.partial_cmp(&a.edge).unwrap_or(std::cmp::Ordering::Equal));
    edges
}

/// Edge-threshold selection: buy buckets where the model probability beats
/// the market price by at least the configured edge. A high-confidence
/// narrow bucket is bought alone; moderate confidence spreads across a
/// small cluster of adjacent buckets. When the market has a tail bucket
/// priced far above the model, fade it instead.
pub fn select_edge_position(
    event: &Event,
    probs: &[(String, f64)],
    config: &Config,
) -> Option<CandidatePosition> {
    let edges = bucket_edges(event, probs);

    let tradeable = |ticker: &str| -> bool {
        let Some(bucket) = event.bucket(ticker) else {
            return false;
        };
        let Some(e) = edges.iter().find(|e| e.ticker == ticker) else {
            return false;
        };
        e.edge > config.min_edge
            && e.price_cents > 0
            && e.price_cents <= config.max_bucket_price
            && bucket.yes_bid > 0
    };

    let best = edges.iter().find(|e| tradeable(&e.ticker));

    let Some(best) = best else {
        debug!(
            "{}: no bucket with edge > {:.0}%",
            event.event_ticker,
            config.min_edge * 100.0
        );
        return select_fade(event, &edges, config);
    };

    let quantity = scale_contracts(best.edge, config);

    // A confident narrow forecast concentrates on one bucket; otherwise
    // spread the position over adjacent buckets that also carry edge.
    let legs = if best.model_prob > config.high_confidence {
        vec![buy_leg(event.bucket(&best.ticker)?, quantity)]
    } else {
        cluster_legs(event, &best.ticker, &tradeable, quantity, config)
    };

    if legs.is_empty() {
        return None;
    }
    CandidatePosition::new(legs).ok()
}

/// Grow a cluster outward from the seed bucket, preferring whichever
/// adjacent bucket carries the higher bid, while the per-contract cost
/// stays strictly under both the payout and the configured cap.
fn cluster_legs(
    event: &Event,
    seed_ticker: &str,
    tradeable: &dyn Fn(&str) -> bool,
    quantity: u32,
    config: &Config,
) -> Vec<OrderLeg> {
    let seed_idx = event
        .buckets
        .iter()
        .position(|b| b.ticker == seed_ticker)
        .unwrap_or(0);

    let mut lo = seed_idx;
    let mut hi = seed_idx;
    let mut picked = vec![seed_idx];
    let mut cost: u32 = event.buckets[seed_idx].buy_price();

    while picked.len() < config.max_legs {
        let left = lo.checked_sub(1).filter(|&i| tradeable(&event.buckets[i].ticker));
        let right = (hi + 1 < event.buckets.len())
            .then_some(hi + 1)
            .filter(|&i| tradeable(&event.buckets[i].ticker));

        let next = match (left, right) {
            (Some(l), Some(r)) => {
                if event.buckets[r].yes_bid > event.buckets[l].yes_bid {
                    r
                } else {
                    l
                }
            }
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (None, None) => break,
        };

        let next_cost = cost + event.buckets[next].buy_price();
        if next_cost >= CONTRACT_PAYOUT_CENTS || next_cost >= config.max_total_cost {
            break;
        }
        cost = next_cost;
        if next < lo {
            lo = next;
        } else {
            hi = next;
        }
        picked.push(next);
    }

    picked.sort_unstable();
    picked
        .into_iter()
        .map(|i| buy_leg(&event.buckets[i], quantity))
        .collect()
}

/// Fade sub-case: a tail bucket priced far above the model probability is
/// sold instead of buying the cheap side.
fn select_fade(
    event: &Event,
    edges: &[BucketEdge],
    config: &Config,
) -> Option<CandidatePosition> {
    let mut best: Option<(&Bucket, f64)> = None;
    for bucket in &event.buckets {
        let is_tail = bucket.lower.is_none() || bucket.upper.is_none();
        if !is_tail || bucket.yes_bid == 0 {
            continue;
        }
        let Some(e) = edges.iter().find(|e| e.ticker == bucket.ticker) else {
            continue;
        };
        let overpricing = e.market_prob - e.model_prob;
        if overpricing < config.fade_threshold {
            continue;
        }
        match best {
            Some((_, prev)) if prev >= overpricing => {}
            _ => best = Some((bucket, overpricing)),
        }
    }

    let (bucket, overpricing) = best?;
    debug!(
        "{}: fading {} (market {:.0}% over model)",
        event.event_ticker,
        bucket.ticker,
        overpricing * 100.0
    );
    let quantity = scale_contracts(overpricing, config);
    // Rest the sell at the ask when quoted; otherwise hit the bid.
    let price = if bucket.yes_ask > 0 {
        bucket.yes_ask
    } else {
        bucket.yes_bid
    };
    CandidatePosition::new(vec![OrderLeg {
        ticker: bucket.ticker.clone(),
        side: Side::Sell,
        price_cents: price,
        quantity,
    }])
    .ok()
}

fn buy_leg(bucket: &Bucket, quantity: u32) -> OrderLeg {
    OrderLeg {
        ticker: bucket.ticker.clone(),
        side: Side::Buy,
        price_cents: bucket.yes_bid,
        quantity,
    }
}

/// Position size grows linearly with edge relative to the threshold,
/// capped per market and floored at one contract.
fn scale_contracts(edge: f64, config: &Config) -> u32 {
    let scaled = config.base_contracts as f64 * (edge / config.min_edge.max(1e-9));
    (scaled.floor() as u32)
        .clamp(1, config.max_position_per_market)
}
