//! SQLite persistence for aggregate statistics and signal history.
//!
//! Uses `sqlx::query()` runtime queries against the schema created by
//! `sqlx::migrate!`. The history payload is bounded by a byte budget; when a
//! write would exceed it, or the database reports it is full, the oldest half
//! is dropped and the write retried.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::errors::EngineError;
use crate::types::{Signal, SignalStats};

/// Stored history row, already serialised.
struct Entry {
    signal_id: i64,
    instrument: String,
    outcome: &'static str,
    payload: String,
}

pub struct StatsStore {
    pool: SqlitePool,
    byte_budget: usize,
}

fn to_db(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_db(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

impl StatsStore {
    /// Open (creating if missing) the database at `db_path` and migrate it.
    pub async fn open(db_path: &str, byte_budget: usize) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1) // SQLite is single-writer
            .connect(&format!("sqlite:{db_path}?mode=rwc"))
            .await
            .context("failed to connect to SQLite database")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        info!(db_path, byte_budget, "stats store initialized");
        Ok(Self { pool, byte_budget })
    }

    /// Persisted counters and history, oldest signal first. Empty when
    /// nothing has been saved yet.
    pub async fn load(&self) -> Result<(SignalStats, Vec<Signal>), EngineError> {
        let stats = sqlx::query("SELECT * FROM signal_stats WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?
            .map(|row| SignalStats {
                total: from_db(row.get("total")),
                wins: from_db(row.get("wins")),
                losses: from_db(row.get("losses")),
                high_conf_total: from_db(row.get("high_conf_total")),
                high_conf_wins: from_db(row.get("high_conf_wins")),
                high_conf_losses: from_db(row.get("high_conf_losses")),
                consecutive_losses: u32::try_from(row.get::<i64, _>("consecutive_losses"))
                    .unwrap_or(0),
            })
            .unwrap_or_default();

        let rows = sqlx::query("SELECT signal_id, payload FROM signal_history ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.get("payload");
            match serde_json::from_str::<Signal>(&payload) {
                Ok(signal) => history.push(signal),
                Err(e) => {
                    let id: i64 = row.get("signal_id");
                    warn!(signal_id = id, error = %e, "skipping unreadable history entry");
                }
            }
        }
        Ok((stats, history))
    }

    /// Like [`load`](Self::load), but any failure yields empty state.
    pub async fn load_or_default(&self) -> (SignalStats, Vec<Signal>) {
        match self.load().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "failed to load statistics, starting empty");
                (SignalStats::default(), Vec::new())
            }
        }
    }

    /// Replace the stored counters and history. Returns how many history
    /// entries were kept.
    pub async fn save(&self, stats: &SignalStats, history: &[Signal]) -> Result<usize, EngineError> {
        let entries = history
            .iter()
            .map(|s| -> Result<Entry, EngineError> {
                Ok(Entry {
                    signal_id: to_db(s.id),
                    instrument: s.instrument.clone(),
                    outcome: s.outcome.as_str(),
                    payload: serde_json::to_string(s)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut start = 0;
        loop {
            let slice = &entries[start..];
            let bytes: usize = slice.iter().map(|e| e.payload.len()).sum();
            if bytes > self.byte_budget {
                let err = EngineError::QuotaExceeded {
                    bytes,
                    budget: self.byte_budget,
                };
                start += prune_step(slice.len());
                warn!(error = %err, kept = entries.len() - start, "pruning history to fit budget");
                continue;
            }

            match self.write(stats, slice).await {
                Ok(()) => return Ok(slice.len()),
                Err(e) if e.is_quota() && !slice.is_empty() => {
                    start += prune_step(slice.len());
                    warn!(error = %e, kept = entries.len() - start, "database full, pruning history");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn write(&self, stats: &SignalStats, entries: &[Entry]) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO signal_stats
                (id, total, wins, losses, high_conf_total, high_conf_wins,
                 high_conf_losses, consecutive_losses, updated_at)
             VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                total = excluded.total,
                wins = excluded.wins,
                losses = excluded.losses,
                high_conf_total = excluded.high_conf_total,
                high_conf_wins = excluded.high_conf_wins,
                high_conf_losses = excluded.high_conf_losses,
                consecutive_losses = excluded.consecutive_losses,
                updated_at = excluded.updated_at",
        )
        .bind(to_db(stats.total))
        .bind(to_db(stats.wins))
        .bind(to_db(stats.losses))
        .bind(to_db(stats.high_conf_total))
        .bind(to_db(stats.high_conf_wins))
        .bind(to_db(stats.high_conf_losses))
        .bind(i64::from(stats.consecutive_losses))
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM signal_history")
            .execute(&mut *tx)
            .await?;

        for (seq, entry) in entries.iter().enumerate() {
            sqlx::query(
                "INSERT INTO signal_history (seq, signal_id, instrument, outcome, payload)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(to_db(seq as u64))
            .bind(entry.signal_id)
            .bind(&entry.instrument)
            .bind(entry.outcome)
            .bind(&entry.payload)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Entries to drop from the front: half, at least one.
fn prune_step(len: usize) -> usize {
    (len / 2).max(1).min(len)
}
