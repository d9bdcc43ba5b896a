//! Parallel batch execution with ordered aggregation.

mod executor;
mod options;
mod result;

pub use executor::BatchExecutor;
pub use options::BatchOptions;
pub(crate) use options::default_parallelism;
pub use result::{BatchProgress, BatchProgressSink, BatchResult, ExecutionError};
