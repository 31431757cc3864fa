pub mod candle_aggregator;
pub mod clock;
pub mod engines;
pub mod indicators;
pub mod market_book;
pub mod runtime;
pub mod signal_ledger;
pub mod signal_service;
pub mod smc;
pub mod stats_store;
