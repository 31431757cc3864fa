//! End-to-end: ticks → candles → engine → ledger, on virtual time.

use std::sync::Arc;

use otc_signal_engine::config::{EngineConfig, LedgerParams, SignalConfig};
use otc_signal_engine::core::clock::{Clock, ManualClock};
use otc_signal_engine::core::engines::build_engine;
use otc_signal_engine::core::signal_ledger::SignalLedger;
use otc_signal_engine::core::signal_service::SignalService;
use otc_signal_engine::types::{Direction, EngineKind, Outcome, Tick};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const T0: i64 = 1_700_000_040_000;
const TICK_STEP_MS: i64 = 20_000;

fn service(kind: EngineKind, clock: Arc<ManualClock>) -> SignalService {
    let settings = SignalConfig {
        engine: kind,
        warmup_candles_count: 30,
        min_confidence_percent: 0,
        ..Default::default()
    };
    let config = EngineConfig::default();
    let ledger = SignalLedger::new(LedgerParams::default(), SignalService::throttle(&settings));
    SignalService::new(settings, &config, build_engine(kind, &config), ledger, clock)
}

fn tick(instrument: &str, price: Decimal, payout: Option<u8>) -> Tick {
    Tick {
        instrument: instrument.into(),
        price,
        timestamp: 0,
        payout,
    }
}

/// Three ticks a minute with a small saw-tooth so candles are never flat.
fn warm_up(svc: &mut SignalService, clock: &ManualClock, instruments: &[(&str, Option<u8>)], minutes: i64) {
    for m in 0..minutes {
        for s in 0..3 {
            clock.set(T0 + m * 60_000 + s * TICK_STEP_MS);
            let price = dec!(1.1000) + Decimal::from(m % 7) * dec!(0.0003) + Decimal::from(s) * dec!(0.0001);
            for (instrument, payout) in instruments {
                svc.ingest(tick(instrument, price, *payout));
            }
        }
    }
}

/// Keep ticking until `until`, holding price `offset` away from `anchor` and
/// drifting further each tick.
fn drift_until(svc: &mut SignalService, clock: &ManualClock, instrument: &str, anchor: Decimal, offset: Decimal, until: i64) {
    let mut price = anchor + offset;
    let step = offset / dec!(20);
    while clock.now_ms() < until {
        clock.advance(TICK_STEP_MS);
        price += step;
        svc.ingest(tick(instrument, price, None));
    }
}

// -- Publication and settlement ---------------------------------------------

#[test]
fn test_signal_published_on_eligible_pair_and_settled() {
    let clock = Arc::new(ManualClock::new(T0));
    let mut svc = service(EngineKind::Scoring, clock.clone());
    warm_up(&mut svc, &clock, &[("EURUSD", Some(70)), ("GBPUSD", Some(92))], 45);

    let signal = svc.generate().expect("a warmed-up pair always gets a decision");
    assert_eq!(signal.instrument, "GBPUSD", "low-payout pair must be skipped");
    assert!((1..=100).contains(&signal.confidence));
    assert_eq!(signal.outcome, Outcome::Pending);

    // Move the price in the signal's favour until it expires.
    let favour = match signal.direction {
        Direction::Buy => dec!(0.0010),
        Direction::Sell => dec!(-0.0010),
    };
    drift_until(&mut svc, &clock, "GBPUSD", signal.entry_price, favour, signal.expires_at());

    let pass = svc.tick_pass();
    assert_eq!(pass.finalized.len(), 1);
    assert_eq!(pass.finalized[0].outcome, Outcome::Win);

    let stats = svc.ledger().stats();
    assert_eq!((stats.total, stats.wins, stats.losses), (1, 1, 0));
    assert_eq!(stats.consecutive_losses, 0);

    // Settlement happens once.
    assert!(svc.tick_pass().finalized.is_empty());
    assert_eq!(svc.ledger().stats().total, 1);
}

#[test]
fn test_metrics_reflect_pipeline_state() {
    let clock = Arc::new(ManualClock::new(T0));
    let mut svc = service(EngineKind::SequenceRelaxed, clock.clone());
    warm_up(&mut svc, &clock, &[("EURUSD", Some(90)), ("AUDCAD", None)], 10);

    let metrics = svc.metrics();
    assert_eq!(metrics.engine, EngineKind::SequenceRelaxed);
    assert_eq!(metrics.instruments.len(), 2);
    let eur = &metrics.instruments["EURUSD"];
    assert!(!eur.warmup_complete);
    assert!(eur.candle_count >= 9);
    assert_eq!(eur.payout, Some(90));
    assert!(metrics.last_signal.is_none());
    assert_eq!(metrics.confidence_cap, 100);
}

// -- Shadow learning ---------------------------------------------------------

#[test]
fn test_persistently_wrong_setup_gets_inverted() {
    let clock = Arc::new(ManualClock::new(T0));
    let mut svc = service(EngineKind::DeepSight, clock.clone());
    warm_up(&mut svc, &clock, &[("EURUSD", None)], 45);

    // Every shadow trade is pushed against until the model flips.
    for _ in 0..5 {
        let signal = svc.generate().expect("ranking always picks the only pair");
        assert!(!signal.inverted);
        let shadow = svc
            .book()
            .get("EURUSD")
            .and_then(|r| r.state.reliability.pending.back().cloned())
            .expect("a shadow trade per closed candle");
        let against = match shadow.direction {
            Direction::Buy => dec!(-0.0010),
            Direction::Sell => dec!(0.0010),
        };
        drift_until(&mut svc, &clock, "EURUSD", shadow.entry_price, against, shadow.expires_at);
        let pass = svc.tick_pass();
        assert!(pass.shadow_resolved >= 1);
    }

    let reliability = &svc.book().get("EURUSD").unwrap().state.reliability;
    assert_eq!(reliability.samples(), 5);
    assert_eq!(reliability.win_rate(), Some(Decimal::ZERO));

    let signal = svc.generate().expect("ranking always picks the only pair");
    assert!(signal.inverted);
    let raw = svc
        .book()
        .get("EURUSD")
        .and_then(|r| r.state.reliability.pending.back().cloned())
        .expect("shadow recorded in the raw direction")
        .direction;
    assert_eq!(signal.direction, raw.opposite());
}
