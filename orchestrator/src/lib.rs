//! Cycle orchestration
//!
//! Drives fixed-period cycles: fetch fresh per-ticker data through the
//! gateway, combine model scores, validate candidates against the risk
//! battery, and re-evaluate every open signal against one immutable
//! snapshot. `Orchestrator::run_cycle` is the engine's single entry point.

pub mod config;
pub mod cycle;
pub mod lifecycle;
pub mod notify;
pub mod snapshot;
pub mod storage;

pub use config::{load_config, save_config, EngineConfig, RateLimitSection};
pub use cycle::{ClosedSignal, CycleReport, Orchestrator, SkippedTicker};
pub use lifecycle::{LifecycleManager, SignalClose};
pub use notify::{NoopSink, NotificationSink};
pub use snapshot::CycleSnapshot;
pub use storage::{MemorySignalStore, SignalStore};
