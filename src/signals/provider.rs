use anyhow::Result;
use async_trait::async_trait;

use crate::engine::evaluator::Signal;
use crate::market::Event;

/// Trait every signal source must implement. The engine is agnostic to
/// which belief shape comes back; the evaluator variant in use decides
/// whether it can act on it.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    /// Compute a fresh belief for the event. Recomputed every cycle, never
    /// cached across cycles by the engine.
    async fn compute_signal(&self, event: &Event) -> Result<Signal>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// The degenerate signal source: no external belief, the observed bid
/// ranking in the snapshot is the signal.
pub struct BidRankingSignal;

#[async_trait]
impl SignalProvider for BidRankingSignal {
    async fn compute_signal(&self, _event: &Event) -> Result<Signal> {
        Ok(Signal::BidRanking)
    }

    fn name(&self) -> &str {
        "bid-ranking"
    }
}
