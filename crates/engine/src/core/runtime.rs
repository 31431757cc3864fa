//! Line-delimited JSON runtime.
//!
//! One `select!` loop owns the [`SignalService`]: it reads requests, drives
//! the tick, signal and housekeeping timers, and hands outbound messages to
//! a writer task over an `mpsc` channel.

use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::signal_service::{MetricsReport, SignalService};
use super::stats_store::StatsStore;
use crate::types::{Direction, Outcome, Signal, Tick};

const TICK_INTERVAL: Duration = Duration::from_millis(250);
const SIGNAL_INTERVAL: Duration = Duration::from_secs(1);
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(5);

// ═══════════════════════════════════════════════════════════════════════════
// Wire messages
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Request {
    Tick {
        pair: String,
        #[serde(with = "rust_decimal::serde::float")]
        price: Decimal,
        #[serde(default)]
        payout: Option<u8>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Metrics,
}

/// Published signal, in the shape the external executor consumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    pub id: u64,
    pub pair: String,
    pub action: Direction,
    pub confidence: u8,
    pub duration: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    pub timestamp: i64,
    pub reasons: Vec<String>,
    pub result: Option<Outcome>,
    pub inverted: bool,
}

impl From<&Signal> for SignalMessage {
    fn from(s: &Signal) -> Self {
        Self {
            id: s.id,
            pair: s.instrument.clone(),
            action: s.direction,
            confidence: s.confidence,
            duration: s.expiry_minutes,
            entry_price: s.entry_price,
            timestamp: s.created_at,
            reasons: s.reasons.clone(),
            result: s.is_resolved().then_some(s.outcome),
            inverted: s.inverted,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    Signal(SignalMessage),
    Result(SignalMessage),
    Metrics(MetricsReport),
    Error { message: String },
}

// ═══════════════════════════════════════════════════════════════════════════
// Writer
// ═══════════════════════════════════════════════════════════════════════════

/// Serialise outbound messages as JSON lines until the channel closes.
pub fn spawn_writer<W>(mut writer: W, mut rx: mpsc::Receiver<Outbound>) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let mut line = serde_json::to_string(&message).context("failed to encode message")?;
            line.push('\n');
            writer
                .write_all(line.as_bytes())
                .await
                .context("failed to write message")?;
            writer.flush().await.context("failed to flush output")?;
        }
        Ok(())
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Event loop
// ═══════════════════════════════════════════════════════════════════════════

pub struct Runtime {
    service: SignalService,
    store: Option<StatsStore>,
    out: mpsc::Sender<Outbound>,
    shutdown: CancellationToken,
}

impl Runtime {
    pub fn new(
        service: SignalService,
        store: Option<StatsStore>,
        out: mpsc::Sender<Outbound>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            service,
            store,
            out,
            shutdown,
        }
    }

    /// Run until shutdown or end of input. Returns the service for
    /// inspection.
    pub async fn run<R>(mut self, reader: R) -> Result<SignalService>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut tick_timer = tokio::time::interval(TICK_INTERVAL);
        let mut signal_timer = tokio::time::interval(SIGNAL_INTERVAL);
        let mut housekeeping_timer = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        for timer in [&mut tick_timer, &mut signal_timer, &mut housekeeping_timer] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        let shutdown = self.shutdown.clone();
        info!(engine = %self.service.engine_kind(), "runtime started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("runtime shutting down");
                    break;
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => self.handle_line(&line).await,
                        Ok(None) => {
                            info!("input closed");
                            break;
                        }
                        // The undecodable line is consumed; the next one reads normally.
                        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                            warn!(error = %e, "ignoring undecodable request");
                            self.send(Outbound::Error {
                                message: format!("malformed request: {e}"),
                            })
                            .await;
                        }
                        Err(e) => {
                            error!(error = %e, "input failed, stopping");
                            break;
                        }
                    }
                }
                _ = tick_timer.tick() => {
                    let pass = self.service.tick_pass();
                    for signal in &pass.finalized {
                        self.send(Outbound::Result(SignalMessage::from(signal))).await;
                    }
                    if pass.changed_stats() {
                        self.persist().await;
                    }
                }
                _ = signal_timer.tick() => {
                    if let Some(signal) = self.service.maybe_generate() {
                        self.send(Outbound::Signal(SignalMessage::from(&signal))).await;
                        self.persist().await;
                    }
                }
                _ = housekeeping_timer.tick() => {
                    if self.service.housekeeping() {
                        debug!(instruments = self.service.book().len(), "flux measured");
                    }
                }
            }
        }

        self.persist().await;
        Ok(self.service)
    }

    async fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<Request>(line) {
            Ok(Request::Tick {
                pair,
                price,
                payout,
                timestamp,
            }) => {
                self.service.ingest(Tick {
                    instrument: pair,
                    price,
                    timestamp: timestamp.unwrap_or(0),
                    payout,
                });
            }
            Ok(Request::Metrics) => {
                let report = self.service.metrics();
                self.send(Outbound::Metrics(report)).await;
            }
            Err(e) => {
                warn!(error = %e, "ignoring malformed request");
                self.send(Outbound::Error {
                    message: format!("malformed request: {e}"),
                })
                .await;
            }
        }
    }

    async fn send(&self, message: Outbound) {
        if let Err(e) = self.out.send(message).await {
            error!("failed to queue outbound message: {e}");
        }
    }

    async fn persist(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        let (stats, history) = self.service.snapshot();
        match store.save(&stats, &history).await {
            Ok(kept) if kept < history.len() => {
                warn!(kept, total = history.len(), "history pruned to fit storage");
                self.service.prune_history(kept);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to persist statistics"),
        }
    }
}
