//! Pek Core
//!
//! Transport-free building blocks of the Pek clustering client:
//! - Early-termination rules and the default catalog (`EarlyTerminator`)
//! - The task configuration record sent to the server (`TaskArgs`)
//! - The task lifecycle state machine (`TaskStatus`)
//! - Decoding of streamed partial results (`PartialResult`)

pub mod args;
pub mod error;
pub mod et;
pub mod results;
pub mod status;

pub use args::{InitStrategy, MetricGroup, MetricSelection, PerRun, TaskArgs, TaskId};
pub use error::{DecodeError, EarlyTerminationError, TaskError, TaskResult};
pub use et::{DefaultEarlyTerminator, EarlyTerminationAction, EarlyTerminator};
pub use results::{PartialResult, PartialResultInfo, PartialResultMetrics, RunsStatus, normalize_non_finite};
pub use status::TaskStatus;
