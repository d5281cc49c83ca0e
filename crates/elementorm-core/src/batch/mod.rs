//! Bounded-concurrency batch processing.

mod processor;

pub use processor::{
    AsyncBatchProcessor, BatchAborted, BatchFailure, BatchOperationError, BatchReport,
};
