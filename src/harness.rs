//! Round driver.
//!
//! Wires one backend run to the control channel and the process-time
//! stamps: `ready_to_connect` sends the handshake, `before_test` and
//! `after_test` capture wall and CPU time around the measured window,
//! and the result payload is collected and decoded once the backend
//! returns. A failed round surfaces its error to the caller; the caller
//! records it alongside successful rounds and moves on.

use crate::config::TestParams;
use crate::control::{ControlChannel, ControlError};
use crate::payload::TestResult;
use crate::runner::{Backend, BackendError, TestHooks};
use std::fmt;
use std::mem;
use std::time::Instant;
use tracing::{error, info};

/// Wall and CPU time spent between `before_test` and `after_test`.
#[derive(Debug, Clone, Copy)]
pub struct ProcTimes {
    /// User CPU seconds.
    pub utime: f64,
    /// System CPU seconds.
    pub stime: f64,
    /// Elapsed wall-clock seconds.
    pub ctime: f64,
}

#[derive(Debug, Clone, Copy)]
struct Stamp {
    wall: Instant,
    user: f64,
    system: f64,
}

fn timeval_secs(tv: libc::timeval) -> f64 {
    tv.tv_sec as f64 + tv.tv_usec as f64 * 1e-6
}

fn stamp() -> Stamp {
    let mut usage: libc::rusage = unsafe { mem::zeroed() };
    // getrusage only fails for an invalid `who` argument.
    unsafe {
        libc::getrusage(libc::RUSAGE_SELF, &mut usage);
    }
    Stamp {
        wall: Instant::now(),
        user: timeval_secs(usage.ru_utime),
        system: timeval_secs(usage.ru_stime),
    }
}

/// Hooks for one instrumented round.
///
/// Each hook fires exactly once; a second firing is a broken backend and
/// trips an assertion.
pub struct RoundHooks {
    params: TestParams,
    control: ControlChannel,
    ready_fired: bool,
    before: Option<Stamp>,
    after: Option<Stamp>,
    send_error: Option<ControlError>,
}

impl RoundHooks {
    pub fn new(params: TestParams, control: ControlChannel) -> Self {
        Self {
            params,
            control,
            ready_fired: false,
            before: None,
            after: None,
            send_error: None,
        }
    }
}

impl TestHooks for RoundHooks {
    fn ready_to_connect(&mut self) {
        assert!(!self.ready_fired, "ready_to_connect fired twice");
        self.ready_fired = true;
        if let Err(e) = self.control.announce_ready(&self.params) {
            // The backend contract gives this hook no way to fail, so the
            // error is surfaced after the run instead.
            error!(error = %e, "handshake send failed");
            self.send_error = Some(e);
        }
    }

    fn before_test(&mut self) {
        assert!(self.before.is_none(), "before_test fired twice");
        self.before = Some(stamp());
    }

    fn after_test(&mut self) {
        assert!(self.before.is_some(), "after_test fired before before_test");
        assert!(self.after.is_none(), "after_test fired twice");
        self.after = Some(stamp());
    }
}

/// Everything one successful round produces.
#[derive(Debug)]
pub struct RoundData {
    pub times: ProcTimes,
    pub result: TestResult,
}

/// Why a round failed. Subsequent rounds are unaffected.
#[derive(Debug)]
pub enum RoundError {
    Control(ControlError),
    Backend(BackendError),
    /// The backend returned without honoring the callback contract.
    Contract(&'static str),
}

impl fmt::Display for RoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundError::Control(e) => write!(f, "{e}"),
            RoundError::Backend(e) => write!(f, "{e}"),
            RoundError::Contract(what) => write!(f, "backend contract violation: {what}"),
        }
    }
}

impl std::error::Error for RoundError {}

/// Run one backend round end to end and decode its result.
pub fn run_round(backend: &dyn Backend, params: &TestParams) -> Result<RoundData, RoundError> {
    let control = ControlChannel::connect(params.loader_addr).map_err(RoundError::Control)?;
    let mut hooks = RoundHooks::new(params.clone(), control);

    info!(
        backend = backend.name(),
        count = params.count,
        msize = params.msize,
        "running round"
    );
    backend.run(params, &mut hooks).map_err(RoundError::Backend)?;

    let RoundHooks {
        control,
        ready_fired,
        before,
        after,
        send_error,
        ..
    } = hooks;

    if let Some(e) = send_error {
        return Err(RoundError::Control(e));
    }
    if !ready_fired {
        return Err(RoundError::Contract("ready_to_connect never fired"));
    }
    let (before, after) = match (before, after) {
        (Some(b), Some(a)) => (b, a),
        _ => return Err(RoundError::Contract("instrumentation window not closed")),
    };

    let result = control.collect_result().map_err(RoundError::Control)?;

    let times = ProcTimes {
        utime: after.user - before.user,
        stime: after.system - before.system,
        ctime: after.wall.duration_since(before.wall).as_secs_f64(),
    };

    info!(
        backend = backend.name(),
        messages = result.messages,
        elapsed = format!("{:.2}s", times.ctime),
        "round complete"
    );

    Ok(RoundData { times, result })
}
