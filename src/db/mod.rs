use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

pub mod models;
use models::{TradeRecord, TradeStats};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS trades (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker      TEXT NOT NULL,
    market_key  TEXT NOT NULL,
    side        TEXT NOT NULL,
    price_cents INTEGER NOT NULL,
    quantity    INTEGER NOT NULL,
    cost        REAL NOT NULL,
    placed_at   TEXT NOT NULL,
    outcome     TEXT NOT NULL,
    dry_run     INTEGER NOT NULL,
    settled     INTEGER NOT NULL DEFAULT 0,
    settled_at  TEXT,
    result      TEXT,
    payout      REAL NOT NULL DEFAULT 0,
    pnl         REAL NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_trades_unsettled ON trades(settled, ticker);
";

/// Thread-safe SQLite handle (single connection behind a mutex).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the trade log at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory database for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Trades ────────────────────────────────────────────────────────────────

    /// Append a trade record. Rows are never deleted.
    pub fn insert_trade(&self, trade: &TradeRecord) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trades (
                ticker, market_key, side, price_cents, quantity, cost,
                placed_at, outcome, dry_run, settled, settled_at, result,
                payout, pnl
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                trade.ticker,
                trade.market_key,
                trade.side,
                trade.price_cents,
                trade.quantity,
                trade.cost,
                trade.placed_at,
                trade.outcome,
                trade.dry_run,
                trade.settled,
                trade.settled_at,
                trade.result,
                trade.payout,
                trade.pnl,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Record a trade's settlement; the one mutation a trade row sees.
    pub fn mark_settled(&self, id: i64, result: &str, payout: f64, pnl: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE trades SET settled=1, settled_at=?1, result=?2, payout=?3, pnl=?4
             WHERE id=?5",
            params![Utc::now(), result, payout, pnl, id],
        )?;
        Ok(())
    }

    /// Trades whose underlying market has not yet resolved.
    pub fn list_unsettled(&self) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, ticker, market_key, side, price_cents, quantity, cost,
                    placed_at, outcome, dry_run, settled, settled_at, result,
                    payout, pnl
             FROM trades WHERE settled=0 AND quantity > 0 ORDER BY placed_at",
        )?;
        let trades = stmt
            .query_map([], map_trade)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }

    /// Most recent trades, newest first.
    pub fn list_recent(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, ticker, market_key, side, price_cents, quantity, cost,
                    placed_at, outcome, dry_run, settled, settled_at, result,
                    payout, pnl
             FROM trades ORDER BY placed_at DESC LIMIT ?1",
        )?;
        let trades = stmt
            .query_map(params![limit], map_trade)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn get_stats(&self) -> Result<TradeStats> {
        let conn = self.conn.lock().unwrap();
        let total_trades: i64 = conn
            .query_row("SELECT COUNT(*) FROM trades", [], |r| r.get(0))
            .unwrap_or(0);
        let settled: i64 = conn
            .query_row("SELECT COUNT(*) FROM trades WHERE settled=1", [], |r| {
                r.get(0)
            })
            .unwrap_or(0);
        let wins: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM trades WHERE settled=1 AND pnl > 0",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);
        let losses: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM trades WHERE settled=1 AND pnl < 0",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);
        let total_pnl: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(pnl),0) FROM trades WHERE settled=1",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0.0);
        let total_wagered: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(cost),0) FROM trades WHERE settled=1",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0.0);
        Ok(TradeStats {
            total_trades,
            settled,
            unsettled: total_trades - settled,
            wins,
            losses,
            total_pnl,
            total_wagered,
        })
    }
}

fn map_trade(row: &Row<'_>) -> rusqlite::Result<TradeRecord> {
    Ok(TradeRecord {
        id: row.get(0)?,
        ticker: row.get(1)?,
        market_key: row.get(2)?,
        side: row.get(3)?,
        price_cents: row.get(4)?,
        quantity: row.get(5)?,
        cost: row.get(6)?,
        placed_at: row.get(7)?,
        outcome: row.get(8)?,
        dry_run: row.get(9)?,
        settled: row.get(10)?,
        settled_at: row.get(11)?,
        result: row.get(12)?,
        payout: row.get(13)?,
        pnl: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn trade(ticker: &str, qty: u32, cost: f64) -> TradeRecord {
        TradeRecord {
            id: None,
            ticker: ticker.into(),
            market_key: "NYC-20260808".into(),
            side: "buy".into(),
            price_cents: 40,
            quantity: qty,
            cost,
            placed_at: Utc::now(),
            outcome: "filled".into(),
            dry_run: true,
            settled: false,
            settled_at: None,
            result: None,
            payout: 0.0,
            pnl: 0.0,
        }
    }

    #[test]
    fn insert_and_list_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_trade(&trade("T1", 10, 4.0)).unwrap();
        assert!(id > 0);
        let unsettled = db.list_unsettled().unwrap();
        assert_eq!(unsettled.len(), 1);
        assert_eq!(unsettled[0].ticker, "T1");
        assert_eq!(unsettled[0].quantity, 10);
    }

    #[test]
    fn settlement_removes_from_unsettled() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_trade(&trade("T1", 10, 4.0)).unwrap();
        db.mark_settled(id, "yes", 10.0, 6.0).unwrap();
        assert!(db.list_unsettled().unwrap().is_empty());
        let stats = db.get_stats().unwrap();
        assert_eq!(stats.settled, 1);
        assert_eq!(stats.wins, 1);
        assert_relative_eq!(stats.total_pnl, 6.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_quantity_trades_are_not_settleable() {
        let db = Database::open_in_memory().unwrap();
        db.insert_trade(&trade("T1", 0, 0.0)).unwrap();
        assert!(db.list_unsettled().unwrap().is_empty());
        assert_eq!(db.get_stats().unwrap().total_trades, 1);
    }

    #[test]
    fn stats_win_rate_and_roi() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_trade(&trade("T1", 10, 4.0)).unwrap();
        let b = db.insert_trade(&trade("T2", 10, 6.0)).unwrap();
        db.mark_settled(a, "yes", 10.0, 6.0).unwrap();
        db.mark_settled(b, "no", 0.0, -6.0).unwrap();
        let stats = db.get_stats().unwrap();
        assert_relative_eq!(stats.win_rate(), 0.5, epsilon = 1e-9);
        assert_relative_eq!(stats.roi(), 0.0, epsilon = 1e-9);
    }
}
