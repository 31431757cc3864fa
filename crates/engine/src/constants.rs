use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub const MS_PER_SECOND: i64 = 1_000;
pub const MS_PER_MINUTE: i64 = 60_000;

/// Candle bucket width. Every instrument is aggregated into 1-minute candles.
pub const CANDLE_BUCKET_MS: i64 = MS_PER_MINUTE;

// ---------------------------------------------------------------------------
// Aggregator defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_CANDLE_CAPACITY: usize = 2_000;
pub const DEFAULT_WARMUP_CANDLES: usize = 50;

/// Default ceiling on an accepted tick price.
pub const DEFAULT_MAX_TICK_PRICE: Decimal = dec!(1_000_000);

/// Candles priced above this are never analysed. Squared deviations of
/// prices under the bound stay far inside `Decimal` range.
pub const MAX_ANALYSIS_PRICE: Decimal = dec!(1_000_000_000);

// ---------------------------------------------------------------------------
// Pip sizes
// ---------------------------------------------------------------------------

/// Pip size for standard four-decimal quotes (EUR/USD 1.0950).
pub const STANDARD_PIP: Decimal = dec!(0.0001);

/// Pip size for two-decimal quotes (USD/JPY 151.42).
pub const JPY_PIP: Decimal = dec!(0.01);

/// Quotes at or above this level are treated as two-decimal instruments when
/// the symbol itself gives no hint.
pub const TWO_DECIMAL_PRICE_FLOOR: Decimal = dec!(20);

// ---------------------------------------------------------------------------
// Ledger defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_HISTORY_CAP: usize = 50;
pub const DEFAULT_MIN_CONFIDENCE_PERCENT: u8 = 70;
pub const DEFAULT_MIN_PAYOUT_PERCENT: u8 = 80;

/// Confidence percent at or above which a signal counts as high-confidence.
pub const HIGH_CONFIDENCE_PERCENT: u8 = 75;

/// Trade durations the scoring engine can pick from, in minutes.
pub const DURATION_CHOICES_MINUTES: [u32; 3] = [2, 3, 5];
