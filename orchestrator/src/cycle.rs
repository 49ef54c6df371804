// Cycle driver
// One run_cycle call: fetch fresh data per ticker through the gateway,
// combine model scores, validate candidates, then re-evaluate the open book
// against the same immutable snapshot. Invokable on any external cadence.

use crate::config::EngineConfig;
use crate::lifecycle::LifecycleManager;
use crate::notify::{notify_closed, notify_opened, NotificationSink};
use crate::snapshot::CycleSnapshot;
use crate::storage::SignalStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{
    CandidateSignal, CombinedPrediction, ExitReason, FeatureBundle, FetchError, ModelScore,
    RejectionRecord, Signal, SignalClass,
};
use market_gateway::{FetchGateway, MarketDataSource, SourceRateLimiter};
use portfolio_risk::{RiskState, RiskValidator, ValidatorStats};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A signal closed during the cycle, with the reason that terminated it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedSignal {
    pub signal: Signal,
    pub reason: ExitReason,
}

/// A ticker dropped from the cycle after its fetch failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedTicker {
    pub ticker: String,
    /// Machine-readable classification, e.g. FETCH_TRANSIENT
    pub code: String,
    pub message: String,
}

/// The engine's single externally visible surface: everything that happened
/// in one cycle, with machine-readable codes and human-readable reasons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub opened: Vec<Signal>,
    pub closed: Vec<ClosedSignal>,
    pub rejected: Vec<RejectionRecord>,
    pub skipped: Vec<SkippedTicker>,
}

struct TickerData {
    bundle: FeatureBundle,
    scores: Vec<ModelScore>,
}

/// Drives fixed-period cycles tying gateway, ensemble, risk validation and
/// lifecycle management together.
pub struct Orchestrator {
    config: EngineConfig,
    gateway: Arc<FetchGateway>,
    source: Arc<dyn MarketDataSource>,
    store: Arc<dyn SignalStore>,
    notifier: Arc<dyn NotificationSink>,
    validator: Arc<RiskValidator>,
    lifecycle: LifecycleManager,
    risk_state: Arc<RiskState>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn MarketDataSource>,
        store: Arc<dyn SignalStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        config.ensemble.validate()?;
        config.rate_limit.validate()?;

        let limiter = Arc::new(SourceRateLimiter::new(
            config.rate_limit.default.clone(),
            config.rate_limit.sources.clone(),
        ));
        let gateway = Arc::new(FetchGateway::new(config.retry.clone(), limiter));
        let validator = Arc::new(RiskValidator::new(config.risk.clone()));
        let lifecycle =
            LifecycleManager::new(config.ensemble.confidence_floor, config.max_hold_days);

        Ok(Self {
            config,
            gateway,
            source,
            store,
            notifier,
            validator,
            lifecycle,
            risk_state: Arc::new(RiskState::new(0.0)),
        })
    }

    /// Shared risk state, exposed so the host can reset the halt flag
    pub fn risk_state(&self) -> Arc<RiskState> {
        self.risk_state.clone()
    }

    pub fn validator_stats(&self) -> ValidatorStats {
        self.validator.stats()
    }

    /// Run one full cycle at `now`.
    ///
    /// Per-ticker fetch failures degrade to skips; risk rejections are
    /// expected outcomes carried in the report. Only a cross-cycle
    /// lifecycle inconsistency or a failing persistence collaborator fails
    /// the cycle, and neither ever poisons the next one.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let deadline = Instant::now() + Duration::from_secs_f64(self.config.cycle_deadline_secs);
        info!(cycle = %cycle_id, tickers = self.config.tickers.len(), "cycle started");

        // Refresh the shared risk context from the persistence collaborator
        let portfolio_value = self
            .store
            .portfolio_value()
            .await
            .context("portfolio value unavailable")?;
        self.risk_state.record_portfolio_value(portfolio_value).await;
        let active = self.store.list_active().await.context("active signals unavailable")?;
        self.risk_state.set_open_positions(active.len()).await;

        // The drawdown trigger is checked at cycle start as well as inside
        // the rule battery, so a breach closes the book even in a cycle
        // that produces no candidates.
        let probe = self.risk_state.snapshot().await;
        if probe.drawdown >= self.config.risk.max_drawdown {
            self.risk_state.trip_halt();
        }

        let (snapshot, bundles, skipped) = self.take_snapshot(cycle_id, now, deadline).await?;

        let (opened, rejected) = self
            .open_candidates(&snapshot, &bundles, &active, now)
            .await?;

        let closed = self.close_positions(&active, &snapshot, now).await?;

        info!(
            cycle = %cycle_id,
            opened = opened.len(),
            closed = closed.len(),
            rejected = rejected.len(),
            skipped = skipped.len(),
            "cycle finished"
        );

        Ok(CycleReport {
            cycle_id,
            started_at: now,
            opened,
            closed,
            rejected,
            skipped,
        })
    }

    /// Fetch all tickers concurrently and freeze one immutable market view
    async fn take_snapshot(
        &self,
        cycle_id: Uuid,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<(CycleSnapshot, HashMap<String, FeatureBundle>, Vec<SkippedTicker>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_fetches));
        let mut tasks = Vec::with_capacity(self.config.tickers.len());

        for ticker in self.config.tickers.clone() {
            let semaphore = semaphore.clone();
            let gateway = self.gateway.clone();
            let source = self.source.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = fetch_ticker(&gateway, source.as_ref(), &ticker, deadline).await;
                (ticker, outcome)
            }));
        }

        let mut prices = HashMap::new();
        let mut predictions = HashMap::new();
        let mut bundles = HashMap::new();
        let mut skipped = Vec::new();

        for task in tasks {
            let (ticker, outcome) = task.await.context("fetch task panicked")?;
            match outcome {
                Ok(data) => {
                    let prediction = ensemble::combine(&data.scores, &self.config.ensemble);
                    if prediction.degraded {
                        warn!(ticker = %ticker, "all model scores malformed, holding");
                    }
                    prices.insert(ticker.clone(), data.bundle.last_price);
                    predictions.insert(ticker.clone(), prediction);
                    bundles.insert(ticker, data.bundle);
                }
                Err(err) => {
                    warn!(ticker = %ticker, error = %err, "ticker skipped this cycle");
                    skipped.push(SkippedTicker {
                        ticker,
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let snapshot = CycleSnapshot {
            cycle_id,
            taken_at: now,
            prices,
            predictions,
            halted: self.risk_state.is_halted(),
        };
        Ok((snapshot, bundles, skipped))
    }

    /// Validate candidates concurrently, then commit acceptances serially
    /// against the shared risk state
    async fn open_candidates(
        &self,
        snapshot: &CycleSnapshot,
        bundles: &HashMap<String, FeatureBundle>,
        active: &[Signal],
        now: DateTime<Utc>,
    ) -> Result<(Vec<Signal>, Vec<RejectionRecord>)> {
        let held: HashSet<&str> = active
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.ticker.as_str())
            .collect();

        let ctx = self.risk_state.snapshot().await;
        let mut tasks = Vec::new();

        for (ticker, prediction) in &snapshot.predictions {
            if !prediction.class.is_tradeable() {
                continue;
            }
            // One open signal per ticker at a time
            if held.contains(ticker.as_str()) {
                debug!(ticker = %ticker, "already holding, candidate suppressed");
                continue;
            }
            let Some(bundle) = bundles.get(ticker) else {
                continue;
            };

            let candidate = self.build_candidate(bundle, prediction);
            let validator = self.validator.clone();
            let risk_state = self.risk_state.clone();
            tasks.push(tokio::spawn(async move {
                let verdict = validator.validate(&candidate, &ctx, &risk_state, now);
                (candidate, verdict)
            }));
        }

        let mut opened = Vec::new();
        let mut rejected = Vec::new();

        for task in tasks {
            let (candidate, verdict) = task.await.context("validation task panicked")?;
            match verdict {
                Ok((signal, trace)) => {
                    // Serialized commit: the write lock re-checks the limit
                    // so concurrent acceptances cannot overshoot it.
                    match self
                        .risk_state
                        .commit_open(self.config.risk.max_open_positions)
                        .await
                    {
                        Ok(()) => {
                            if let Err(e) = self.store.save(&signal).await {
                                error!(
                                    ticker = %signal.ticker,
                                    error = %e,
                                    "accepted signal failed to persist, releasing slot"
                                );
                                self.risk_state.commit_close().await;
                                continue;
                            }
                            debug!(ticker = %signal.ticker, rules = trace.len(), "rule trace retained");
                            notify_opened(self.notifier.clone(), signal.clone());
                            opened.push(signal);
                        }
                        Err(reason) => {
                            rejected.push(RejectionRecord {
                                candidate,
                                reason,
                                message: format!(
                                    "passed validation but lost the commit race: {}",
                                    reason
                                ),
                                rejected_at: now,
                            });
                        }
                    }
                }
                Err(record) => rejected.push(record),
            }
        }

        Ok((opened, rejected))
    }

    /// Lifecycle pass: close whatever the snapshot says must close
    async fn close_positions(
        &self,
        active: &[Signal],
        snapshot: &CycleSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClosedSignal>> {
        let closes = self
            .lifecycle
            .evaluate(active, snapshot)
            .map_err(|e| anyhow::Error::new(e).context("lifecycle evaluation failed for this cycle"))?;

        let mut book: HashMap<Uuid, Signal> =
            active.iter().map(|s| (s.id, s.clone())).collect();
        let mut closed = Vec::new();

        for close in closes {
            let Some(mut signal) = book.remove(&close.signal_id) else {
                continue;
            };
            signal.close(close.reason, close.exit_price, now)?;
            self.store
                .update(&signal)
                .await
                .context("failed to persist signal closure")?;
            self.risk_state.commit_close().await;
            notify_closed(self.notifier.clone(), signal.clone(), close.reason);
            info!(
                ticker = %signal.ticker,
                reason = %close.reason,
                exit_price = close.exit_price,
                "signal closed"
            );
            closed.push(ClosedSignal {
                signal,
                reason: close.reason,
            });
        }

        Ok(closed)
    }

    fn build_candidate(
        &self,
        bundle: &FeatureBundle,
        prediction: &CombinedPrediction,
    ) -> CandidateSignal {
        let entry = bundle.last_price;
        let risk = &self.config.risk;
        let (stop_loss, target_price) = match prediction.class {
            SignalClass::Sell => (
                bundle
                    .proposed_stop
                    .unwrap_or(entry * (1.0 + risk.default_stop_fraction)),
                bundle
                    .proposed_target
                    .unwrap_or(entry * (1.0 - risk.default_target_fraction)),
            ),
            _ => (
                bundle
                    .proposed_stop
                    .unwrap_or(entry * (1.0 - risk.default_stop_fraction)),
                bundle
                    .proposed_target
                    .unwrap_or(entry * (1.0 + risk.default_target_fraction)),
            ),
        };

        CandidateSignal {
            ticker: bundle.ticker.clone(),
            class: prediction.class,
            confidence: prediction.confidence,
            entry_price: entry,
            stop_loss,
            target_price,
        }
    }
}

async fn fetch_ticker(
    gateway: &FetchGateway,
    source: &dyn MarketDataSource,
    ticker: &str,
    deadline: Instant,
) -> Result<TickerData, FetchError> {
    let source_id = source.source_id().to_string();
    let kind = source.policy_kind();

    let features = gateway
        .execute(&source_id, kind, deadline, |_| source.fetch_features(ticker))
        .await?;
    debug!(
        ticker,
        attempts = features.attempts,
        "features fetched"
    );

    let scores = gateway
        .execute(&source_id, kind, deadline, |_| {
            source.fetch_model_scores(ticker)
        })
        .await?;

    Ok(TickerData {
        bundle: features.value,
        scores: scores.value,
    })
}
