use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::Direction;

// ============================================================================
// Structure
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Ranging,
}

impl Trend {
    /// The trade direction this trend favours, if any.
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Bullish => Some(Direction::Buy),
            Self::Bearish => Some(Direction::Sell),
            Self::Ranging => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingKind {
    High,
    Low,
}

/// Local extremum, derived per analysis call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwingPoint {
    /// Index into the analysed candle window.
    pub index: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub time: i64,
    pub kind: SwingKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakKind {
    /// Break of structure in the trend direction.
    Bos,
    /// Change of character: a break against the trend.
    Choch,
}

/// A close beyond the last swing extreme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureBreak {
    pub kind: BreakKind,
    pub direction: Direction,
    /// The swing level that was broken.
    #[serde(with = "rust_decimal::serde::str")]
    pub level: Decimal,
    pub index: usize,
    pub time: i64,
    /// Breakout Quality Index in [0, 100].
    pub quality: u8,
}

/// Pure function of the candle window; recomputed on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStructure {
    pub trend: Trend,
    /// Most recent break of either kind.
    pub structure: Option<StructureBreak>,
    pub last_bos: Option<StructureBreak>,
    pub last_choch: Option<StructureBreak>,
    pub swing_highs: Vec<SwingPoint>,
    pub swing_lows: Vec<SwingPoint>,
}

// ============================================================================
// Liquidity
// ============================================================================

/// Equal highs or lows clustered into one resting-liquidity level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityPool {
    pub side: SwingKind,
    #[serde(with = "rust_decimal::serde::str")]
    pub level: Decimal,
    pub touches: usize,
    pub first_index: usize,
    pub last_index: usize,
}

/// A wick through a resting level that closed back on the original side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquiditySweep {
    /// BUY for a sweep of lows (bullish), SELL for a sweep of highs.
    pub direction: Direction,
    #[serde(with = "rust_decimal::serde::str")]
    pub swept_level: Decimal,
    pub index: usize,
    pub time: i64,
    /// Piercing wick as a fraction of the candle range.
    #[serde(with = "rust_decimal::serde::str")]
    pub wick_fraction: Decimal,
    /// The swept level was an equal-high/low pool rather than a lone swing.
    pub from_pool: bool,
}

/// A minor swing followed by an outsized move: the trap before the real POI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inducement {
    /// Direction of the move that followed the trap.
    pub direction: Direction,
    #[serde(with = "rust_decimal::serde::str")]
    pub level: Decimal,
    pub index: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub swing_size: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub move_size: Decimal,
}

// ============================================================================
// Zones
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    OrderBlock,
    FairValueGap,
    Breaker,
    Mitigation,
    Rejection,
}

/// Price band produced by a completed candle pattern. Value copy: holding one
/// never aliases a later analysis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub kind: ZoneKind,
    /// BUY zones are support (bullish), SELL zones resistance.
    pub direction: Direction,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    /// Index of the candle that completed the pattern.
    pub index: usize,
    pub created_at: i64,
    /// Price re-entered the band after creation.
    pub mitigated: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub strength: Decimal,
}

impl Zone {
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.low && price <= self.high
    }

    /// Whether a `[low, high]` span overlaps the band.
    pub fn overlaps(&self, low: Decimal, high: Decimal) -> bool {
        low <= self.high && high >= self.low
    }

    pub fn midpoint(&self) -> Decimal {
        (self.high + self.low) / Decimal::TWO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceZone {
    /// Top quartile of the range; bearish bias.
    Premium,
    /// Bottom quartile of the range; bullish bias.
    Discount,
    Equilibrium,
}

impl PriceZone {
    pub fn bias(self) -> Option<Direction> {
        match self {
            Self::Premium => Some(Direction::Sell),
            Self::Discount => Some(Direction::Buy),
            Self::Equilibrium => None,
        }
    }
}

/// Where price sits inside the active trading range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangePosition {
    pub zone: PriceZone,
    #[serde(with = "rust_decimal::serde::str")]
    pub range_high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub range_low: Decimal,
    /// 0 at the range low, 1 at the range high.
    #[serde(with = "rust_decimal::serde::str")]
    pub position: Decimal,
    /// Range came from the last confirmed swing leg rather than the static window.
    pub dynamic: bool,
}

/// Fibonacci retracement band of the active range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OteZone {
    /// 0.618 / 0.705 / 0.786 retracement prices measured down from the high.
    pub buy_levels: [Decimal; 3],
    /// Same ratios measured up from the low.
    pub sell_levels: [Decimal; 3],
    pub in_buy_zone: bool,
    pub in_sell_zone: bool,
}

impl OteZone {
    pub fn contains(&self, direction: Direction) -> bool {
        match direction {
            Direction::Buy => self.in_buy_zone,
            Direction::Sell => self.in_sell_zone,
        }
    }
}

// ============================================================================
// Regime and momentum
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketPhase {
    Expansion,
    Contraction,
    Ranging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    Trending,
    MeanReverting,
    Contraction,
}

/// Close-to-close rate of change, recent three candles against the prior three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityDelta {
    #[serde(with = "rust_decimal::serde::str")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub previous: Decimal,
    /// Set when velocity and its change share a sign.
    pub aligned: Option<Direction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceActionPattern {
    BullishEngulfing,
    BearishEngulfing,
    Hammer,
    ShootingStar,
    Doji,
    InsideBar,
}

impl PriceActionPattern {
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::BullishEngulfing | Self::Hammer => Some(Direction::Buy),
            Self::BearishEngulfing | Self::ShootingStar => Some(Direction::Sell),
            Self::Doji | Self::InsideBar => None,
        }
    }

    /// Indecision patterns that argue against entering at all.
    pub fn is_toxic(self) -> bool {
        matches!(self, Self::Doji)
    }
}

/// Price/RSI divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub direction: Direction,
    /// Composite strength in [0, 100].
    #[serde(with = "rust_decimal::serde::str")]
    pub strength: Decimal,
}

// ============================================================================
// Snapshot
// ============================================================================

/// Every structural and indicator reading for one candle window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcSnapshot {
    pub candle_count: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub atr: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub rsi: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub stochastic_k: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub adx: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub ema_fast: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub ema_slow: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub ema_trend: Option<Decimal>,
    pub structure: MarketStructure,
    pub pools: Vec<LiquidityPool>,
    pub sweep: Option<LiquiditySweep>,
    pub order_blocks: Vec<Zone>,
    pub fair_value_gaps: Vec<Zone>,
    /// Breaker and mitigation blocks.
    pub touched_blocks: Vec<Zone>,
    pub rejection_blocks: Vec<Zone>,
    pub inducement: Option<Inducement>,
    pub range: Option<RangePosition>,
    pub ote: Option<OteZone>,
    pub phase: MarketPhase,
    pub regime: Regime,
    pub velocity: Option<VelocityDelta>,
    pub patterns: Vec<PriceActionPattern>,
    pub divergence: Option<Divergence>,
}

impl SmcSnapshot {
    /// Unmitigated zones of any kind favouring `direction`.
    pub fn active_zones(&self, direction: Direction) -> impl Iterator<Item = &Zone> {
        self.order_blocks
            .iter()
            .chain(&self.fair_value_gaps)
            .chain(&self.touched_blocks)
            .chain(&self.rejection_blocks)
            .filter(move |z| z.direction == direction && !z.mitigated)
    }

    pub fn has_order_block(&self, direction: Direction) -> bool {
        self.order_blocks
            .iter()
            .any(|z| z.direction == direction && !z.mitigated)
    }

    pub fn has_fair_value_gap(&self, direction: Direction) -> bool {
        self.fair_value_gaps
            .iter()
            .any(|z| z.direction == direction && !z.mitigated)
    }

    pub fn zone_bias(&self) -> Option<Direction> {
        self.range.and_then(|r| r.zone.bias())
    }
}
