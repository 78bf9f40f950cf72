pub mod classifier;
pub mod engine;
pub mod error;
pub mod retry;
pub mod types;

pub use classifier::PrefixClassifier;
pub use engine::AcquisitionLoop;
pub use error::{AcquisitionError, AcquisitionErrorKind};
pub use retry::ReleaseRetrier;
pub use types::{AcquisitionSettings, LoopState, RunOutcome, RunReport};
