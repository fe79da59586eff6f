pub mod crypto;
pub mod forecast;
pub mod provider;

pub use crypto::{BinanceClient, MomentumSignal};
pub use forecast::{ForecastSignal, NwsClient};
pub use provider::{BidRankingSignal, SignalProvider};
