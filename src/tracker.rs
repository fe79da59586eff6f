use anyhow::Result;
use futures_util::future::join_all;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::db::models::TradeRecord;
use crate::db::Database;
use crate::kalshi::KalshiClient;

/// Check every unsettled trade against resolved markets and fill in its
/// settlement fields. Returns the trades that settled this pass.
pub async fn check_settlements(db: &Database, kalshi: &KalshiClient) -> Result<Vec<TradeRecord>> {
    let unsettled = db.list_unsettled()?;
    if unsettled.is_empty() {
        return Ok(Vec::new());
    }

    // One result lookup per distinct ticker, fetched concurrently.
    let mut tickers: Vec<String> = unsettled.iter().map(|t| t.ticker.clone()).collect();
    tickers.sort();
    tickers.dedup();

    let lookups = tickers.iter().map(|ticker| {
        let kalshi = kalshi.clone();
        let ticker = ticker.clone();
        async move {
            let result = kalshi.fetch_market_result(&ticker).await;
            (ticker, result)
        }
    });

    let mut results: HashMap<String, String> = HashMap::new();
    for (ticker, result) in join_all(lookups).await {
        match result {
            Ok(Some(outcome)) => {
                results.insert(ticker, outcome);
            }
            Ok(None) => {}
            // Transient or delisted; the trade stays unsettled.
            Err(e) => warn!("Could not check {}: {:#}", ticker, e),
        }
    }

    let mut newly_settled = Vec::new();
    for mut trade in unsettled {
        let Some(result) = results.get(&trade.ticker) else {
            continue;
        };
        let Some(id) = trade.id else {
            continue;
        };

        let payout = settlement_payout(&trade.side, result, trade.quantity);
        let pnl = payout - trade.cost;

        db.mark_settled(id, result, payout, pnl)?;
        info!(
            "Settled {}: {} -> {} (pnl ${:+.2})",
            trade.ticker, trade.side, result, pnl
        );

        trade.settled = true;
        trade.result = Some(result.clone());
        trade.payout = payout;
        trade.pnl = pnl;
        newly_settled.push(trade);
    }

    Ok(newly_settled)
}

/// Dollars paid out at settlement: $1 per contract when the traded side
/// wins (a sold YES pays when the market resolves no), nothing otherwise.
fn settlement_payout(side: &str, result: &str, quantity: u32) -> f64 {
    let won = match side {
        "buy" => result == "yes",
        _ => result == "no",
    };
    if won {
        quantity as f64
    } else {
        0.0
    }
}

/// Settle what can be settled and print the report.
pub async fn check_and_report(db: &Database, kalshi: &KalshiClient) -> Result<()> {
    info!("Checking settlements...");
    let newly_settled = check_settlements(db, kalshi).await?;

    if !newly_settled.is_empty() {
        println!("\n{} trade(s) just settled:", newly_settled.len());
        for trade in &newly_settled {
            let mark = if trade.pnl > 0.0 { "+" } else { "-" };
            println!("  [{}] {}: ${:+.2}", mark, trade.ticker, trade.pnl);
        }
    }

    print_report(db)?;
    Ok(())
}

/// Formatted trade-log report on stdout.
pub fn print_report(db: &Database) -> Result<()> {
    let stats = db.get_stats()?;

    println!("\n{}", "=".repeat(50));
    println!("TRADE TRACKER REPORT");
    println!("{}", "=".repeat(50));
    println!("\nTotal trades: {}", stats.total_trades);
    println!("Settled: {}", stats.settled);
    println!("Unsettled: {}", stats.unsettled);

    if stats.settled > 0 {
        println!("\nWins: {}", stats.wins);
        println!("Losses: {}", stats.losses);
        println!("Win rate: {:.1}%", stats.win_rate() * 100.0);
        println!("\nTotal wagered: ${:.2}", stats.total_wagered);
        println!("Total P&L: ${:+.2}", stats.total_pnl);
        println!("ROI: {:+.1}%", stats.roi());
    }

    println!("\n{}", "-".repeat(50));
    println!("RECENT TRADES");
    println!("{}", "-".repeat(50));
    for trade in db.list_recent(10)? {
        let status = if trade.settled { "done" } else { "open" };
        let pnl_str = if trade.settled {
            format!("${:+.2}", trade.pnl)
        } else {
            "pending".to_string()
        };
        let result_str = trade.result.as_deref().unwrap_or("").to_uppercase();
        println!("[{}] {}", status, trade.ticker);
        println!(
            "   {} {}x @ {}¢ = ${:.2}",
            trade.side, trade.quantity, trade.price_cents, trade.cost
        );
        println!("   {} -> {}", result_str, pnl_str);
    }

    Ok(())
}
