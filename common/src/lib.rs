pub mod error;
pub mod market;
pub mod scores;
pub mod signal;

pub use error::{FaultKind, FetchError, FetchFault, LifecycleInconsistency, RiskRejection};
pub use market::FeatureBundle;
pub use scores::{CombinedPrediction, ModelContribution, ModelScore};
pub use signal::{
    CandidateSignal, ExitReason, RejectionRecord, Signal, SignalClass, SignalState,
};
