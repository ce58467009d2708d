pub mod engine;
pub mod evidence;
pub mod matchers;
pub mod scorer;
pub mod verification;

pub use engine::{CorrelationEngine, CorrelationOptions, CorrelationOutcome, CorrelationRequest};
pub use evidence::Evidence;
pub use verification::VerificationManager;
