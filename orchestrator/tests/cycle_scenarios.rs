// End-to-end cycle tests against scripted collaborators: a scripted data
// source with fault injection, the in-memory store and a recording
// notification sink.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{
    ExitReason, FaultKind, FeatureBundle, FetchFault, ModelScore, RiskRejection, Signal,
    SignalClass, SignalState,
};
use market_gateway::{MarketDataSource, RetryPolicy};
use orchestrator::{EngineConfig, MemorySignalStore, NotificationSink, Orchestrator};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use uuid::Uuid;

/// Per-ticker script: the data to serve plus how many leading feature
/// fetches fail with a transient fault first.
#[derive(Clone)]
struct TickerScript {
    bundle: FeatureBundle,
    scores: Vec<ModelScore>,
    transient_failures: u32,
    permanent: bool,
}

struct ScriptedSource {
    scripts: HashMap<String, TickerScript>,
    feature_calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedSource {
    fn new(scripts: HashMap<String, TickerScript>) -> Self {
        Self {
            scripts,
            feature_calls: Mutex::new(HashMap::new()),
        }
    }

    fn feature_calls(&self, ticker: &str) -> u32 {
        self.feature_calls
            .lock()
            .unwrap()
            .get(ticker)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl MarketDataSource for ScriptedSource {
    fn source_id(&self) -> &str {
        "scripted"
    }

    async fn fetch_features(&self, ticker: &str) -> Result<FeatureBundle, FetchFault> {
        let script = self
            .scripts
            .get(ticker)
            .ok_or_else(|| FetchFault::new(FaultKind::NotFound, "no script for ticker"))?;
        if script.permanent {
            return Err(FetchFault::new(FaultKind::Unauthenticated, "key revoked"));
        }

        let calls = {
            let mut map = self.feature_calls.lock().unwrap();
            let entry = map.entry(ticker.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        if calls <= script.transient_failures {
            return Err(FetchFault::new(FaultKind::Connection, "connection reset"));
        }
        Ok(script.bundle.clone())
    }

    async fn fetch_model_scores(&self, ticker: &str) -> Result<Vec<ModelScore>, FetchFault> {
        let script = self
            .scripts
            .get(ticker)
            .ok_or_else(|| FetchFault::new(FaultKind::NotFound, "no script for ticker"))?;
        Ok(script.scores.clone())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
    failures: AtomicU32,
}

impl RecordingSink {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn signal_opened(&self, signal: &Signal) -> anyhow::Result<()> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("smtp unreachable");
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("opened:{}", signal.ticker));
        Ok(())
    }

    async fn signal_closed(&self, signal: &Signal, reason: ExitReason) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("closed:{}:{}", signal.ticker, reason));
        Ok(())
    }
}

/// Notifications are delivered on spawned tasks; give them a beat to land
/// before asserting on the sink
async fn settle() {
    tokio::time::sleep(StdDuration::from_millis(20)).await;
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Config with sub-millisecond retry delays and a roomy rate limit so the
/// tests run fast
fn fast_config(tickers: &[&str]) -> EngineConfig {
    init_tracing();
    let mut config = EngineConfig::default();
    config.tickers = tickers.iter().map(|t| t.to_string()).collect();

    let fast = RetryPolicy {
        max_attempts: 5,
        base_delay_secs: 0.001,
        max_delay_secs: 0.005,
        multiplier: 2.0,
        jitter_fraction: 0.0,
    };
    config.retry.lenient = fast.clone();
    config.retry.fallback = fast.clone();
    config.retry.strict = RetryPolicy {
        max_attempts: 3,
        ..fast
    };
    config.rate_limit.default.capacity = 1_000.0;
    config.rate_limit.default.refill_per_sec = 1_000.0;
    config
}

fn buy_script(price: f64, stop: f64, target: f64, confidence: f64) -> TickerScript {
    let mut bundle = FeatureBundle::new("", price, Utc::now());
    bundle.proposed_stop = Some(stop);
    bundle.proposed_target = Some(target);

    // Identical confident vectors across all default-weighted models
    let p = [confidence, (1.0 - confidence) / 2.0, (1.0 - confidence) / 2.0];
    TickerScript {
        bundle,
        scores: vec![
            ModelScore::new("lstm", p),
            ModelScore::new("xgboost", p),
            ModelScore::new("sentiment", p),
        ],
        transient_failures: 0,
        permanent: false,
    }
}

fn scripts_for(entries: Vec<(&str, TickerScript)>) -> HashMap<String, TickerScript> {
    entries
        .into_iter()
        .map(|(ticker, mut script)| {
            script.bundle.ticker = ticker.to_string();
            (ticker.to_string(), script)
        })
        .collect()
}

fn seed_active(ticker: &str, entry: f64, stop: f64, target: f64, days_old: i64) -> Signal {
    Signal {
        id: Uuid::new_v4(),
        ticker: ticker.to_string(),
        class: SignalClass::Buy,
        state: SignalState::Active,
        entry_price: entry,
        stop_loss: stop,
        target_price: target,
        position_size: 2_000.0,
        risk_reward_ratio: 2.0,
        opened_at: Utc::now() - Duration::days(days_old),
        closed_at: None,
        exit_price: None,
        exit_reason: None,
    }
}

#[tokio::test]
async fn test_confident_buy_opens_signal() {
    let source = Arc::new(ScriptedSource::new(scripts_for(vec![(
        "AAPL",
        buy_script(100.0, 95.0, 110.0, 0.80),
    )])));
    let store = Arc::new(MemorySignalStore::new(10_000.0));
    let sink = Arc::new(RecordingSink::default());
    let engine = Orchestrator::new(
        fast_config(&["AAPL"]),
        source,
        store.clone(),
        sink.clone(),
    )
    .unwrap();

    let report = engine.run_cycle(Utc::now()).await.unwrap();

    assert_eq!(report.opened.len(), 1);
    assert!(report.rejected.is_empty());
    assert!(report.skipped.is_empty());

    let signal = &report.opened[0];
    assert_eq!(signal.ticker, "AAPL");
    assert_eq!(signal.class, SignalClass::Buy);
    assert_eq!(signal.entry_price, 100.0);
    // risk $200 at $5/share -> $4000, capped at 20% of $10k
    assert_eq!(signal.position_size, 2_000.0);
    assert!((signal.risk_reward_ratio - 2.0).abs() < 1e-9);

    let persisted = store.get(signal.id).await.unwrap();
    assert!(persisted.is_active());
    settle().await;
    assert_eq!(sink.events(), vec!["opened:AAPL".to_string()]);

    // The report is the audit artifact, it must serialize as-is
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"AAPL\""));
}

#[tokio::test]
async fn test_low_confidence_candidate_rejected_with_record() {
    // Ensemble floor lowered so the prediction survives aggregation and the
    // risk validator is the one that turns it away
    let mut config = fast_config(&["AAPL"]);
    config.ensemble.confidence_floor = 0.50;

    let source = Arc::new(ScriptedSource::new(scripts_for(vec![(
        "AAPL",
        buy_script(100.0, 95.0, 110.0, 0.60),
    )])));
    let store = Arc::new(MemorySignalStore::new(10_000.0));
    let sink = Arc::new(RecordingSink::default());
    let engine = Orchestrator::new(config, source, store.clone(), sink).unwrap();

    let report = engine.run_cycle(Utc::now()).await.unwrap();

    assert!(report.opened.is_empty());
    assert_eq!(report.rejected.len(), 1);
    let rejection = &report.rejected[0];
    assert_eq!(rejection.reason, RiskRejection::LowConfidence);
    assert_eq!(rejection.candidate.ticker, "AAPL");
    assert!(store.all().await.is_empty());
}

#[tokio::test]
async fn test_sub_floor_prediction_never_becomes_candidate() {
    // Default ensemble floor forces sub-floor predictions to HOLD, which
    // produces neither a signal nor a rejection record
    let source = Arc::new(ScriptedSource::new(scripts_for(vec![(
        "AAPL",
        buy_script(100.0, 95.0, 110.0, 0.60),
    )])));
    let store = Arc::new(MemorySignalStore::new(10_000.0));
    let sink = Arc::new(RecordingSink::default());
    let engine = Orchestrator::new(fast_config(&["AAPL"]), source, store, sink).unwrap();

    let report = engine.run_cycle(Utc::now()).await.unwrap();
    assert!(report.opened.is_empty());
    assert!(report.rejected.is_empty());
}

#[tokio::test]
async fn test_target_hit_closes_signal_at_target_price() {
    // Price runs through the target, exit fills at the target level
    let source = Arc::new(ScriptedSource::new(scripts_for(vec![(
        "AAPL",
        buy_script(112.0, 95.0, 110.0, 0.80),
    )])));
    let store = Arc::new(MemorySignalStore::new(10_000.0));
    store.insert(seed_active("AAPL", 100.0, 95.0, 110.0, 1)).await;
    let sink = Arc::new(RecordingSink::default());
    let engine = Orchestrator::new(fast_config(&["AAPL"]), source, store.clone(), sink.clone())
        .unwrap();

    let report = engine.run_cycle(Utc::now()).await.unwrap();

    // The held ticker is not reopened in the same cycle
    assert!(report.opened.is_empty());
    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.closed[0].reason, ExitReason::Target);

    let closed = &report.closed[0].signal;
    assert_eq!(closed.exit_price, Some(110.0));
    assert_eq!(closed.exit_reason, Some(ExitReason::Target));
    assert!(closed.closed_at.is_some());
    let persisted = store.get(closed.id).await.unwrap();
    assert!(!persisted.is_active());
    settle().await;
    assert_eq!(sink.events(), vec!["closed:AAPL:TARGET".to_string()]);
}

#[tokio::test]
async fn test_time_decay_closes_stale_signal() {
    // Flat price, but the position is older than the hold limit
    let source = Arc::new(ScriptedSource::new(scripts_for(vec![(
        "AAPL",
        buy_script(101.0, 95.0, 110.0, 0.80),
    )])));
    let store = Arc::new(MemorySignalStore::new(10_000.0));
    store.insert(seed_active("AAPL", 100.0, 95.0, 110.0, 8)).await;
    let sink = Arc::new(RecordingSink::default());
    let engine =
        Orchestrator::new(fast_config(&["AAPL"]), source, store.clone(), sink).unwrap();

    let report = engine.run_cycle(Utc::now()).await.unwrap();

    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.closed[0].reason, ExitReason::TimeDecay);
    assert_eq!(report.closed[0].signal.exit_price, Some(101.0));
}

#[tokio::test]
async fn test_drawdown_breach_halts_and_flattens_in_one_cycle() {
    let source = Arc::new(ScriptedSource::new(scripts_for(vec![
        ("AAPL", buy_script(100.0, 95.0, 110.0, 0.80)),
        ("TSLA", buy_script(200.0, 190.0, 220.0, 0.80)),
    ])));
    let store = Arc::new(MemorySignalStore::new(100_000.0));
    let sink = Arc::new(RecordingSink::default());
    let engine = Orchestrator::new(
        fast_config(&["AAPL", "TSLA"]),
        source,
        store.clone(),
        sink,
    )
    .unwrap();

    // Cycle 1 at full value establishes the peak and opens positions
    let report = engine.run_cycle(Utc::now()).await.unwrap();
    assert_eq!(report.opened.len(), 2);

    // 20% drop breaches the 15% drawdown limit
    store.set_portfolio_value(80_000.0).await;
    let report = engine.run_cycle(Utc::now()).await.unwrap();

    // Both held tickers are suppressed as candidates, and the whole book is
    // force-closed by the risk event in this same cycle
    assert!(report.opened.is_empty());
    assert_eq!(report.closed.len(), 2);
    assert!(report
        .closed
        .iter()
        .all(|c| c.reason == ExitReason::RiskEvent));
    assert!(engine.risk_state().is_halted());

    // The halt is sticky: nothing reopens while the flag is set, and every
    // candidate is turned away as DRAWDOWN_HALT
    let report = engine.run_cycle(Utc::now()).await.unwrap();
    assert!(report.opened.is_empty());
    assert_eq!(report.rejected.len(), 2);
    assert!(report
        .rejected
        .iter()
        .all(|r| r.reason == RiskRejection::DrawdownHalt));

    // Recovery plus an explicit reset reopens the gate
    store.set_portfolio_value(100_000.0).await;
    engine.risk_state().reset_halt();
    let report = engine.run_cycle(Utc::now()).await.unwrap();
    assert_eq!(report.opened.len(), 2);
    assert!(!engine.risk_state().is_halted());
}

#[tokio::test]
async fn test_transient_failures_retried_then_succeed() {
    let mut script = buy_script(100.0, 95.0, 110.0, 0.80);
    script.transient_failures = 3;
    let source = Arc::new(ScriptedSource::new(scripts_for(vec![("AAPL", script)])));
    let store = Arc::new(MemorySignalStore::new(10_000.0));
    let sink = Arc::new(RecordingSink::default());
    let engine = Orchestrator::new(
        fast_config(&["AAPL"]),
        source.clone(),
        store,
        sink,
    )
    .unwrap();

    let report = engine.run_cycle(Utc::now()).await.unwrap();

    assert_eq!(report.opened.len(), 1);
    assert!(report.skipped.is_empty());
    // Three transient failures plus the success
    assert_eq!(source.feature_calls("AAPL"), 4);
}

#[tokio::test]
async fn test_permanent_failure_skips_ticker_but_cycle_survives() {
    let mut bad = buy_script(0.0, 0.0, 0.0, 0.80);
    bad.permanent = true;
    let source = Arc::new(ScriptedSource::new(scripts_for(vec![
        ("AAPL", buy_script(100.0, 95.0, 110.0, 0.80)),
        ("BADTICK", bad),
    ])));
    let store = Arc::new(MemorySignalStore::new(10_000.0));
    let sink = Arc::new(RecordingSink::default());
    let engine = Orchestrator::new(
        fast_config(&["AAPL", "BADTICK"]),
        source,
        store,
        sink,
    )
    .unwrap();

    let report = engine.run_cycle(Utc::now()).await.unwrap();

    assert_eq!(report.opened.len(), 1);
    assert_eq!(report.opened[0].ticker, "AAPL");
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].ticker, "BADTICK");
    assert_eq!(report.skipped[0].code, "FETCH_PERMANENT");
}

#[tokio::test]
async fn test_position_cap_limits_openings_across_one_cycle() {
    let tickers = ["T0", "T1", "T2", "T3", "T4", "T5", "T6"];
    let scripts = tickers
        .iter()
        .map(|t| (*t, buy_script(100.0, 95.0, 110.0, 0.80)))
        .collect::<Vec<_>>();
    let source = Arc::new(ScriptedSource::new(scripts_for(scripts)));
    let store = Arc::new(MemorySignalStore::new(100_000.0));
    let sink = Arc::new(RecordingSink::default());
    let engine = Orchestrator::new(
        fast_config(&tickers),
        source,
        store.clone(),
        sink,
    )
    .unwrap();

    let report = engine.run_cycle(Utc::now()).await.unwrap();

    // Exactly max_open_positions admitted, the rest rejected at the serial
    // commit with the position-limit reason
    assert_eq!(report.opened.len(), 5);
    assert_eq!(report.rejected.len(), 2);
    assert!(report
        .rejected
        .iter()
        .all(|r| r.reason == RiskRejection::MaxPositionsReached));
    assert_eq!(store.all().await.len(), 5);
}

#[tokio::test]
async fn test_notification_failure_does_not_block_the_signal() {
    let source = Arc::new(ScriptedSource::new(scripts_for(vec![(
        "AAPL",
        buy_script(100.0, 95.0, 110.0, 0.80),
    )])));
    let store = Arc::new(MemorySignalStore::new(10_000.0));
    let sink = Arc::new(RecordingSink::default());
    sink.failures.store(1, Ordering::SeqCst);
    let engine = Orchestrator::new(fast_config(&["AAPL"]), source, store.clone(), sink.clone())
        .unwrap();

    let report = engine.run_cycle(Utc::now()).await.unwrap();

    // The sink error is logged and swallowed; the signal still opened
    assert_eq!(report.opened.len(), 1);
    assert_eq!(store.all().await.len(), 1);
    settle().await;
    assert!(sink.events().is_empty());
}

/// A sink that never resolves; deliveries must not hold the cycle hostage
struct StallingSink;

#[async_trait]
impl NotificationSink for StallingSink {
    async fn signal_opened(&self, _signal: &Signal) -> anyhow::Result<()> {
        std::future::pending().await
    }

    async fn signal_closed(&self, _signal: &Signal, _reason: ExitReason) -> anyhow::Result<()> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_stalled_sink_does_not_delay_the_cycle() {
    let source = Arc::new(ScriptedSource::new(scripts_for(vec![(
        "AAPL",
        buy_script(100.0, 95.0, 110.0, 0.80),
    )])));
    let store = Arc::new(MemorySignalStore::new(10_000.0));
    let engine = Orchestrator::new(
        fast_config(&["AAPL"]),
        source,
        store.clone(),
        Arc::new(StallingSink),
    )
    .unwrap();

    let report = tokio::time::timeout(StdDuration::from_secs(5), engine.run_cycle(Utc::now()))
        .await
        .expect("cycle must finish while the sink hangs")
        .unwrap();

    assert_eq!(report.opened.len(), 1);
    assert_eq!(store.all().await.len(), 1);
}

#[tokio::test]
async fn test_signal_flip_closes_against_opposing_prediction() {
    // Confident SELL prediction against a held BUY at an uneventful price
    let mut script = buy_script(101.0, 95.0, 110.0, 0.80);
    let p = [0.1, 0.1, 0.8];
    script.scores = vec![
        ModelScore::new("lstm", p),
        ModelScore::new("xgboost", p),
        ModelScore::new("sentiment", p),
    ];
    let source = Arc::new(ScriptedSource::new(scripts_for(vec![("AAPL", script)])));
    let store = Arc::new(MemorySignalStore::new(10_000.0));
    store.insert(seed_active("AAPL", 100.0, 95.0, 110.0, 1)).await;
    let sink = Arc::new(RecordingSink::default());
    let engine =
        Orchestrator::new(fast_config(&["AAPL"]), source, store.clone(), sink).unwrap();

    let report = engine.run_cycle(Utc::now()).await.unwrap();

    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.closed[0].reason, ExitReason::SignalFlip);
    // Flip exits fill at the current price, not a level
    assert_eq!(report.closed[0].signal.exit_price, Some(101.0));
}
