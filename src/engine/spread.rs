use tracing::debug;

use crate::config::Config;
use crate::market::{Bucket, Event};

use super::evaluator::{CandidatePosition, OrderLeg, Side};

/// Bucket-spread selection: follow the market's own ranking. Buy the
/// highest-bid bucket inside the acceptable price band, paired with its best
/// adjacent neighbor when the combined cost stays under the cap.
pub fn select_spread(event: &Event, config: &Config) -> Option<CandidatePosition> {
    let peak_idx = find_peak(&event.buckets, config)?;
    let peak = &event.buckets[peak_idx];

    let legs = match find_best_neighbor(&event.buckets, peak_idx, config) {
        Some(neighbor_idx) => {
            let neighbor = &event.buckets[neighbor_idx];
            vec![
                buy_leg(peak, config.contracts_per_leg),
                buy_leg(neighbor, config.contracts_per_leg),
            ]
        }
        // A single-bucket bet is fine; its cost is trivially under payout.
        None => vec![buy_leg(peak, config.contracts_per_leg)],
    };

    let per_contract: u32 = legs.iter().map(|l| l.price_cents).sum();
    if per_contract >= config.max_total_cost {
        debug!(
            "{}: spread cost {}¢ at or above cap {}¢",
            event.event_ticker, per_contract, config.max_total_cost
        );
        return None;
    }

    CandidatePosition::new(legs).ok()
}

fn buy_leg(bucket: &Bucket, quantity: u32) -> OrderLeg {
    OrderLeg {
        ticker: bucket.ticker.clone(),
        side: Side::Buy,
        // Rest at the bid: better price than crossing, at the cost of an
        // uncertain fill.
        price_cents: bucket.yes_bid,
        quantity,
    }
}

/// The peak bucket: highest bid within the acceptable band. Ties go to the
/// first bucket in bound order (strict `>` while scanning in order).
fn find_peak(buckets: &[Bucket], config: &Config) -> Option<usize> {
    let mut peak: Option<usize> = None;
    for (i, b) in buckets.iter().enumerate() {
        if b.yes_bid < config.min_bucket_price || b.yes_bid > config.max_bucket_price {
            continue;
        }
        match peak {
            Some(p) if buckets[p].yes_bid >= b.yes_bid => {}
            _ => peak = Some(i),
        }
    }
    peak
}

/// The better of the peak's two immediate neighbors in the bound-ordered
/// partition. A neighbor qualifies when its bid clears the floor and the
/// combined per-contract cost stays strictly under the cap; with both
/// qualifying, the higher bid wins (more likely to land).
fn find_best_neighbor(buckets: &[Bucket], peak_idx: usize, config: &Config) -> Option<usize> {
    let peak_bid = buckets[peak_idx].yes_bid;
    let qualifies = |idx: usize| -> bool {
        let b = &buckets[idx];
        b.yes_bid >= config.min_bucket_price && peak_bid + b.yes_bid < config.max_total_cost
    };

    let left = peak_idx.checked_sub(1).filter(|&i| qualifies(i));
    let right = (peak_idx + 1 < buckets.len())
        .then_some(peak_idx + 1)
        .filter(|&i| qualifies(i));

    match (left, right) {
        (Some(l), Some(r)) => {
            if buckets[r].yes_bid > buckets[l].yes_bid {
                Some(r)
            } else {
                Some(l)
            }
        }
        (Some(l), None) => Some(l),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
}
