use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error kinds that cross the coordinator/worker boundary.
///
/// Every variant here corresponds to one of the error kinds a worker must
/// distinguish in order to decide whether to retry, fail the current task,
/// or treat a result as benign. Serializable so it can travel as the `Err`
/// side of an RPC reply.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum MrError {
    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error(
        "incomplete tasks in done phase: map {map_done}/{map_total}, reduce {reduce_done}/{reduce_total}"
    )]
    IncompleteInPhaseDone {
        map_done: usize,
        map_total: usize,
        reduce_done: usize,
        reduce_total: usize,
    },

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("storage io failure: {0}")]
    StorageIOFailure(String),

    #[error("intermediate not found: {0}")]
    NotFoundIntermediate(String),
}
