//! Backend runner contract.
//!
//! Every concurrency backend implements [`Backend`] and must honor the
//! same behavior for one round:
//!
//! 1. Bind and listen on `params.bind_addr` with the backlog from
//!    [`crate::backlog::listen_backlog`], before any peer can connect.
//! 2. Fire `ready_to_connect` exactly once, after the listening socket is
//!    ready but before accept-blocking begins.
//! 3. Accept exactly `params.count` connections, `TCP_NODELAY` on each.
//! 4. Fire `before_test` exactly once, at the earliest backend-defined
//!    point after which steady-state echo traffic begins.
//! 5. Run an echo session concurrently for every accepted connection
//!    until all sessions terminate.
//! 6. Fire `after_test` exactly once, after the last session terminated.
//! 7. Return only after step 6.
//!
//! The contract is scheduling-agnostic: only the ordering and
//! single-firing of the three callbacks and the completeness of step 6
//! are constrained, not when within the accept burst a backend decides
//! steady state has begun.

use crate::config::TestParams;
use std::collections::BTreeMap;
use std::io;

/// Instrumentation hooks fired by a backend during a round.
///
/// Each is fired exactly once, in declaration order. `ready_to_connect`
/// signals the load generator to begin opening connections; firing it
/// before the listener exists would race the bind, firing it later would
/// under-count setup time.
pub trait TestHooks: Send {
    fn ready_to_connect(&mut self);
    fn before_test(&mut self);
    fn after_test(&mut self);
}

/// One echo-server concurrency model.
pub trait Backend: Send + Sync {
    /// Registry key for this backend.
    fn name(&self) -> &'static str;

    /// Run one round to completion under this concurrency model.
    ///
    /// Runs until every session's peer closes; a misbehaving peer that
    /// never closes blocks the round indefinitely. The load generator
    /// bounds the round externally via `params.runtime_secs`.
    fn run(&self, params: &TestParams, hooks: &mut dyn TestHooks) -> Result<(), BackendError>;
}

/// Why a backend failed to complete a round.
#[derive(Debug)]
pub enum BackendError {
    /// Socket setup or accept failed.
    Io(io::Error),
    /// A native entry point returned a non-zero status.
    Native { symbol: &'static str, status: i32 },
    /// A shared library could not be loaded or resolved.
    Library(String),
}

impl From<io::Error> for BackendError {
    fn from(e: io::Error) -> Self {
        BackendError::Io(e)
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Io(e) => write!(f, "backend I/O error: {e}"),
            BackendError::Native { symbol, status } => {
                write!(f, "native backend {symbol} returned status {status}")
            }
            BackendError::Library(msg) => write!(f, "native library error: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Name-keyed backend registry.
///
/// Built explicitly during startup and passed to the harness; sorted
/// iteration order doubles as the execution order for `*` selections.
pub type Registry = BTreeMap<&'static str, Box<dyn Backend>>;
