//! Training module
//!
//! - `trainer`: the epoch loop, RMSprop on binary cross-entropy
//! - `callbacks`: observers of the loop (`TimeHistory`, `MetricsLogger`)
//! - `history`: per-epoch metrics saved next to the artifacts

pub mod callbacks;
pub mod history;
pub mod trainer;

pub use callbacks::{MetricsLogger, TimeHistory, TrainingCallback};
pub use history::{EpochRecord, TrainingHistory};
pub use trainer::{count_correct, FitOutcome, TrainingRun};
