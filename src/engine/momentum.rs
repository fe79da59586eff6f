use tracing::debug;

use crate::config::Config;
use crate::market::Event;

use super::evaluator::{CandidatePosition, OrderLeg, Side, CONTRACT_PAYOUT_CENTS};

/// Confidence that the current direction holds to settlement.
///
/// Monotonically non-decreasing in both the magnitude of the move and the
/// time already elapsed: bigger swings and later reads are both harder to
/// reverse. The magnitude term saturates below 0.95; corroborating momentum
/// adds a flat +0.15 and a strong move (>= `strong_move_pct`) a flat +0.10,
/// capped at 0.99.
pub fn confidence(
    change_pct: f64,
    minutes_left: f64,
    window_minutes: f64,
    corroborated: bool,
    strong_move_pct: f64,
) -> f64 {
    let magnitude = change_pct.abs();
    let price_confidence = (0.5 + magnitude * 0.4).min(0.95);
    let time_factor = (1.0 - minutes_left / window_minutes).max(0.0);
    let mut conf = price_confidence * (0.5 + 0.5 * time_factor);
    if corroborated {
        conf += 0.15;
    }
    if magnitude >= strong_move_pct {
        conf += 0.10;
    }
    conf.min(0.99)
}

/// Linear size between the configured minimum and maximum contract counts,
/// unless scaling is disabled (fixed max size).
pub fn scale_contracts(conf: f64, config: &Config) -> u32 {
    if !config.scale_by_confidence {
        return config.momentum_max_contracts;
    }
    let range = 1.0 - config.min_confidence;
    let frac = if range > 0.0 {
        ((conf - config.min_confidence) / range).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let span = (config.momentum_max_contracts - config.momentum_min_contracts) as f64;
    let contracts = config.momentum_min_contracts as f64 + frac * span;
    (contracts as u32).clamp(config.momentum_min_contracts, config.momentum_max_contracts)
}

/// Momentum selection for a direction window: only inside the configured
/// band before close, only when the underlying has clearly moved, and only
/// when confidence clears the floor. Buys the favored side at its ask when
/// affordable, otherwise sells the opposing side when the implied risk is
/// acceptable.
pub fn select_momentum_position(
    event: &Event,
    change_pct: f64,
    minutes_left: f64,
    window_minutes: f64,
    corroborated: bool,
    config: &Config,
) -> Option<CandidatePosition> {
    // Too early the signal is noise; too late there is no time to transact.
    if minutes_left > config.max_minutes_before_close {
        debug!(
            "{}: {:.1} min left, waiting for the {:.0}-minute window",
            event.event_ticker, minutes_left, config.max_minutes_before_close
        );
        return None;
    }
    if minutes_left < config.min_minutes_before_close {
        debug!(
            "{}: {:.1} min left, past the {:.0}-minute cutoff",
            event.event_ticker, minutes_left, config.min_minutes_before_close
        );
        return None;
    }
    if change_pct.abs() < config.min_price_change_pct {
        debug!(
            "{}: move {:.3}% below the {:.3}% floor",
            event.event_ticker,
            change_pct.abs(),
            config.min_price_change_pct
        );
        return None;
    }

    let conf = confidence(
        change_pct,
        minutes_left,
        window_minutes,
        corroborated,
        config.strong_move_pct,
    );
    if conf < config.min_confidence {
        debug!(
            "{}: confidence {:.0}% below {:.0}%",
            event.event_ticker,
            conf * 100.0,
            config.min_confidence * 100.0
        );
        return None;
    }

    let quantity = scale_contracts(conf, config);
    let market = event.buckets.first()?;
    let is_up = change_pct > 0.0;

    let leg = if is_up {
        // Favor YES: buy it at the ask when affordable. The sell-NO
        // fallback prices out identically on a YES/NO book, so there is no
        // second path on the up side.
        if market.yes_ask > 0 && market.yes_ask <= config.momentum_max_price {
            OrderLeg {
                ticker: market.ticker.clone(),
                side: Side::Buy,
                price_cents: market.yes_ask,
                quantity,
            }
        } else {
            debug!(
                "{}: no viable up trade (YES ask {}¢ > max {}¢)",
                event.event_ticker, market.yes_ask, config.momentum_max_price
            );
            return None;
        }
    } else {
        // Favor NO: sell YES at its bid. The implied risk per contract is
        // the payout minus the premium received.
        let risk = CONTRACT_PAYOUT_CENTS.saturating_sub(market.yes_bid);
        if market.yes_bid > 0 && risk <= config.momentum_max_price {
            OrderLeg {
                ticker: market.ticker.clone(),
                side: Side::Sell,
                price_cents: market.yes_bid,
                quantity,
            }
        } else if market.yes_bid > 0 && market.yes_bid <= 5 && conf >= 0.75 {
            // Last resort: a nearly-worthless YES bid is cheap to sell even
            // with the full payout at risk, given high confidence.
            OrderLeg {
                ticker: market.ticker.clone(),
                side: Side::Sell,
                price_cents: market.yes_bid,
                quantity,
            }
        } else {
            debug!(
                "{}: no viable down trade (YES bid {}¢, implied risk {}¢ > max {}¢)",
                event.event_ticker, market.yes_bid, risk, config.momentum_max_price
            );
            return None;
        }
    };

    debug!(
        "{}: direction {} at {:.0}% confidence, {} contracts",
        event.event_ticker,
        if is_up { "UP" } else { "DOWN" },
        conf * 100.0,
        quantity
    );

    CandidatePosition::new(vec![leg]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use clap::Parser;

    use crate::market::Bucket;

    fn config() -> Config {
        Config::try_parse_from(["bucket-bot"]).unwrap()
    }

    fn window_market(bid: u32, ask: u32) -> Event {
        Event {
            event_ticker: "KXBTC15M-26AUG071415".into(),
            title: "BTC up in the next 15 minutes".into(),
            underlying: "BTC".into(),
            date: NaiveDate::from_ymd_opt(2026, 8, 7).unwrap(),
            buckets: vec![Bucket {
                ticker: "KXBTC15M-26AUG071415".into(),
                lower: None,
                upper: None,
                yes_bid: bid,
                yes_ask: ask,
                open: true,
            }],
            status: "open".into(),
            close_time: None,
        }
    }

    #[test]
    fn confidence_with_momentum_and_large_move() {
        // 0.20% move, 2 minutes left of 15, corroborated: the original
        // tuning lands near 0.79.
        let conf = confidence(0.20, 2.0, 15.0, true, 0.15);
        assert_relative_eq!(conf, 0.791, epsilon = 0.02);
    }

    #[test]
    fn confidence_rises_as_close_approaches() {
        let early = confidence(0.10, 10.0, 15.0, false, 0.15);
        let late = confidence(0.10, 2.0, 15.0, false, 0.15);
        assert!(late >= early);
    }

    #[test]
    fn confidence_rises_with_magnitude() {
        let small = confidence(0.06, 5.0, 15.0, false, 0.15);
        let large = confidence(0.50, 5.0, 15.0, false, 0.15);
        assert!(large >= small);
    }

    #[test]
    fn confidence_is_capped() {
        let conf = confidence(5.0, 0.0, 15.0, true, 0.15);
        assert!(conf <= 0.99);
    }

    #[test]
    fn contracts_scale_linearly_with_confidence() {
        let cfg = config();
        assert_eq!(scale_contracts(0.65, &cfg), 2);
        assert_eq!(scale_contracts(1.0, &cfg), 10);
        // (0.80 - 0.65) / 0.35 ≈ 0.4286 → 2 + 0.4286 * 8 ≈ 5.4 → 5
        assert_eq!(scale_contracts(0.80, &cfg), 5);
    }

    #[test]
    fn fixed_size_when_scaling_disabled() {
        let mut cfg = config();
        cfg.scale_by_confidence = false;
        assert_eq!(scale_contracts(0.65, &cfg), 10);
    }

    #[test]
    fn outside_betting_window_yields_nothing() {
        let ev = window_market(40, 45);
        let cfg = config();
        assert!(select_momentum_position(&ev, 0.5, 12.0, 15.0, true, &cfg).is_none());
        assert!(select_momentum_position(&ev, 0.5, 1.0, 15.0, true, &cfg).is_none());
    }

    #[test]
    fn small_move_yields_nothing() {
        let ev = window_market(40, 45);
        assert!(select_momentum_position(&ev, 0.01, 5.0, 15.0, true, &config()).is_none());
    }

    #[test]
    fn up_move_buys_yes_at_ask() {
        let ev = window_market(70, 75);
        let cand = select_momentum_position(&ev, 0.5, 3.0, 15.0, true, &config()).unwrap();
        let legs = cand.legs();
        assert_eq!(legs[0].side, Side::Buy);
        assert_eq!(legs[0].price_cents, 75);
    }

    #[test]
    fn expensive_yes_yields_no_up_trade() {
        let ev = window_market(95, 98);
        let cfg = config();
        assert!(select_momentum_position(&ev, 0.5, 3.0, 15.0, true, &cfg).is_none());
    }

    #[test]
    fn down_move_sells_yes_at_bid() {
        let ev = window_market(30, 35);
        let cand = select_momentum_position(&ev, -0.5, 3.0, 15.0, true, &config()).unwrap();
        let legs = cand.legs();
        assert_eq!(legs[0].side, Side::Sell);
        assert_eq!(legs[0].price_cents, 30);
    }

    #[test]
    fn cheap_bid_sold_only_at_high_confidence() {
        // Implied risk 97¢ exceeds the 95¢ cap, so only the high-confidence
        // cheap-sell path can fire.
        let ev = window_market(3, 0);
        let cfg = config();
        // Confidence ≈ 0.66: above the entry floor but below the 0.75 the
        // cheap-sell path demands.
        let low_conf = select_momentum_position(&ev, -0.12, 2.0, 15.0, true, &cfg);
        assert!(low_conf.is_none());
        let high_conf = select_momentum_position(&ev, -0.8, 2.0, 15.0, true, &cfg).unwrap();
        assert_eq!(high_conf.legs()[0].price_cents, 3);
    }
}
