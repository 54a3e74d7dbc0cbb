pub mod periodic;
pub mod prober;
pub mod scheduler;
pub mod transition;

pub use periodic::PeriodicTimer;
pub use prober::{ProbeResult, Prober};
pub use scheduler::{CycleSummary, ProbeScheduler};
pub use transition::{TransitionManager, TransitionOutcome};
