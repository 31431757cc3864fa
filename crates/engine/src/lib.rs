//! Real-time signal engine for short-expiry OTC currency pairs.
//!
//! Ticks are aggregated into one-minute candles, analysed with a library of
//! indicators and smart-money structure detectors, and turned into
//! directional signals by a configurable decision engine. Published signals
//! are tracked to expiry and their outcomes persisted.

pub mod config;
pub mod constants;
pub mod core;
pub mod errors;
pub mod logging;
pub mod types;
