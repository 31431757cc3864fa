use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use super::signal::Direction;
use super::smc::{LiquiditySweep, StructureBreak, Trend, Zone};

/// Position in the sweep → displacement → CHoCH → retest sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SequenceStatus {
    #[default]
    Idle,
    LiquiditySwept,
    Displacement,
    Choch,
    Retest,
}

/// What the sequence has captured so far. Zone and break are value copies
/// taken when the transition happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupData {
    pub sweep: LiquiditySweep,
    pub pre_sweep_trend: Trend,
    pub displacement_time: Option<i64>,
    pub structure_break: Option<StructureBreak>,
    pub poi: Option<Zone>,
}

/// Per-instrument state carried between engine invocations.
///
/// Engines never mutate the stored value in place: they take `&EngineState`
/// and hand back the successor, which the caller stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub status: SequenceStatus,
    pub direction: Option<Direction>,
    /// Open time of the newest closed candle already consumed.
    pub last_candle_time: Option<i64>,
    /// Closed candles consumed since the last transition.
    pub candles_in_status: usize,
    pub cooldown_until: Option<i64>,
    pub setup: Option<SetupData>,
    pub reliability: Reliability,
}

impl EngineState {
    /// Back to idle, keeping learning data and the cooldown marker.
    pub fn reset(&self) -> Self {
        Self {
            status: SequenceStatus::Idle,
            direction: None,
            last_candle_time: self.last_candle_time,
            candles_in_status: 0,
            cooldown_until: self.cooldown_until,
            setup: None,
            reliability: self.reliability.clone(),
        }
    }

    pub fn in_cooldown(&self, now: i64) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

// ============================================================================
// Shadow learning
// ============================================================================

/// Ranking components that carry an adjustable weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    History,
    Confluence,
    Flux,
    Correlation,
    Volatility,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::History,
        Feature::Confluence,
        Feature::Flux,
        Feature::Correlation,
        Feature::Volatility,
    ];
}

/// A synthetic trade awaiting expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowTrade {
    pub direction: Direction,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    pub opened_at: i64,
    pub expires_at: i64,
    /// Components that argued for this trade.
    pub features: Vec<Feature>,
    /// Up/down pattern of the three candles before entry.
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowOutcome {
    pub direction: Direction,
    pub win: bool,
    pub pattern: String,
    pub resolved_at: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FractalStats {
    pub wins: u32,
    pub total: u32,
}

impl FractalStats {
    pub fn win_rate(&self) -> Option<Decimal> {
        (self.total > 0).then(|| Decimal::from(self.wins) / Decimal::from(self.total))
    }
}

/// Live reliability estimate of one instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reliability {
    /// Rolling shadow outcomes, oldest first.
    pub outcomes: VecDeque<ShadowOutcome>,
    pub pending: VecDeque<ShadowTrade>,
    /// Missing entries weigh 1.
    pub synapses: BTreeMap<Feature, Decimal>,
    pub fractal: BTreeMap<String, FractalStats>,
}

impl Reliability {
    pub fn samples(&self) -> usize {
        self.outcomes.len()
    }

    /// Rolling shadow win rate in [0, 1]; `None` before the first resolution.
    pub fn win_rate(&self) -> Option<Decimal> {
        if self.outcomes.is_empty() {
            return None;
        }
        let wins = self.outcomes.iter().filter(|o| o.win).count();
        Some(Decimal::from(wins) / Decimal::from(self.outcomes.len()))
    }

    pub fn synapse(&self, feature: Feature) -> Decimal {
        self.synapses.get(&feature).copied().unwrap_or(Decimal::ONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn outcome(win: bool) -> ShadowOutcome {
        ShadowOutcome {
            direction: Direction::Buy,
            win,
            pattern: "UUD".into(),
            resolved_at: 0,
        }
    }

    #[test]
    fn test_win_rate() {
        let mut rel = Reliability::default();
        assert_eq!(rel.win_rate(), None);
        rel.outcomes.extend([outcome(true), outcome(false), outcome(false), outcome(true)]);
        assert_eq!(rel.win_rate(), Some(dec!(0.5)));
        assert_eq!(rel.synapse(Feature::Flux), Decimal::ONE);
    }

    #[test]
    fn test_reset_keeps_cooldown_and_learning() {
        let mut state = EngineState {
            status: SequenceStatus::Choch,
            direction: Some(Direction::Sell),
            candles_in_status: 7,
            cooldown_until: Some(500),
            ..Default::default()
        };
        state.reliability.outcomes.push_back(outcome(true));

        let reset = state.reset();
        assert_eq!(reset.status, SequenceStatus::Idle);
        assert_eq!(reset.direction, None);
        assert_eq!(reset.candles_in_status, 0);
        assert_eq!(reset.cooldown_until, Some(500));
        assert_eq!(reset.reliability.samples(), 1);
    }
}
