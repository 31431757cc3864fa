use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::market_data::InstrumentId;

/// Trade direction of a binary option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// +1 for BUY, -1 for SELL.
    pub fn sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    /// Whether moving from `entry` to `exit` pays out in this direction.
    /// An unchanged price is a loss.
    pub fn wins(self, entry: Decimal, exit: Decimal) -> bool {
        match self {
            Self::Buy => exit > entry,
            Self::Sell => exit < entry,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Resolution state of a published signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pending,
    Win,
    Loss,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Win => "win",
            Self::Loss => "loss",
        }
    }
}

/// Decision engine implementation selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Fixed/weighted point scoring.
    Scoring,
    /// Sweep → displacement → CHoCH → retest state machine, strict profile.
    Sequence,
    /// State machine with relaxed floors, fast paths and the hybrid shortcut.
    SequenceRelaxed,
    /// Cross-instrument ranking with shadow learning and ghost inversion.
    DeepSight,
    /// Deep Sight plus synapse adaptation and fractal memory.
    Nexus,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scoring => "scoring",
            Self::Sequence => "sequence",
            Self::SequenceRelaxed => "sequence_relaxed",
            Self::DeepSight => "deep_sight",
            Self::Nexus => "nexus",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "scoring" => Ok(Self::Scoring),
            "sequence" => Ok(Self::Sequence),
            "sequence_relaxed" => Ok(Self::SequenceRelaxed),
            "deep_sight" => Ok(Self::DeepSight),
            "nexus" => Ok(Self::Nexus),
            other => Err(format!("unknown decision engine '{other}'")),
        }
    }
}

/// A directional decision. Created by a decision engine with
/// [`Outcome::Pending`], resolved exactly once by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Assigned by the ledger on record; zero until then.
    pub id: u64,
    pub instrument: InstrumentId,
    pub direction: Direction,
    /// Integer percent in [0, 100].
    pub confidence: u8,
    pub expiry_minutes: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    pub reasons: Vec<String>,
    /// Unix milliseconds.
    pub created_at: i64,
    pub outcome: Outcome,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub exit_price: Option<Decimal>,
    /// Direction was flipped by a contrarian override.
    #[serde(default)]
    pub inverted: bool,
}

impl Signal {
    pub fn new(
        instrument: impl Into<InstrumentId>,
        direction: Direction,
        confidence: u8,
        expiry_minutes: u32,
        entry_price: Decimal,
        reasons: Vec<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: 0,
            instrument: instrument.into(),
            direction,
            confidence: confidence.min(100),
            expiry_minutes,
            entry_price,
            reasons,
            created_at,
            outcome: Outcome::Pending,
            exit_price: None,
            inverted: false,
        }
    }

    /// Unix milliseconds at which the outcome is determined.
    pub fn expires_at(&self) -> i64 {
        self.created_at + i64::from(self.expiry_minutes) * crate::constants::MS_PER_MINUTE
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome != Outcome::Pending
    }
}

/// Aggregate win/loss counters, persisted across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStats {
    pub total: u64,
    pub wins: u64,
    pub losses: u64,
    pub high_conf_total: u64,
    pub high_conf_wins: u64,
    pub high_conf_losses: u64,
    pub consecutive_losses: u32,
}

impl SignalStats {
    /// Win rate over resolved signals in [0, 1]; zero before any resolution.
    pub fn win_rate(&self) -> Decimal {
        let resolved = self.wins + self.losses;
        if resolved == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.wins) / Decimal::from(resolved)
        }
    }
}
