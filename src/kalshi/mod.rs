pub mod client;

pub use client::KalshiClient;
