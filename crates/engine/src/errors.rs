use thiserror::Error;

/// Typed error hierarchy for the signal engine.
///
/// Library-internal errors use specific variants; application code wraps with
/// `anyhow::Context` for propagation.
#[derive(Error, Debug)]
pub enum EngineError {
    // -- Ingestion ----------------------------------------------------------
    #[error("invalid tick for {instrument}: {reason}")]
    InvalidTick { instrument: String, reason: String },

    // -- Publication --------------------------------------------------------
    #[error("signal throttled: {reason}")]
    Throttled { reason: String },

    // -- Persistence --------------------------------------------------------
    #[error("storage error: {reason}")]
    Storage { reason: String },

    #[error("history payload of {bytes} bytes exceeds storage budget of {budget} bytes")]
    QuotaExceeded { bytes: usize, budget: usize },

    // -- Configuration ------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    // -- Forwarded errors ---------------------------------------------------
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the error means the store ran out of room and the caller
    /// should shrink what it writes.
    pub fn is_quota(&self) -> bool {
        match self {
            Self::QuotaExceeded { .. } => true,
            Self::Sqlx(sqlx::Error::Database(db)) => {
                // SQLITE_FULL (13)
                db.code().is_some_and(|code| code == "13")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_detection() {
        let err = EngineError::QuotaExceeded { bytes: 10, budget: 5 };
        assert!(err.is_quota());
        assert!(err.to_string().contains("exceeds storage budget"));

        let err = EngineError::Storage { reason: "disk".into() };
        assert!(!err.is_quota());
    }
}
