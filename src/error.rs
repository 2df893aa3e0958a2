//! Error type for the fallible plumbing around scheduler and write-queue threads.
//!
//! Containers never fail; absence is reported as `None`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The private work thread could not be started.
    #[error("failed to spawn work thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The target scheduler or queue has shut down; the submission was dropped.
    #[error("work context has shut down")]
    Closed,

    /// A blocking request was issued from the work thread it would wait on.
    #[error("blocking request issued from its own work thread")]
    Reentrant,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
