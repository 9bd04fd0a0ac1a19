//! Thread-per-connection backend.
//!
//! One OS thread per accepted connection. Session threads block on a
//! condvar-backed start gate until the whole accept burst has landed, so
//! all sessions are released at once without any spin-polling.

use crate::backlog::listen_backlog;
use crate::config::TestParams;
use crate::net;
use crate::runner::{Backend, BackendError, TestHooks};
use crate::session;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use tracing::{debug, error};

/// Blocks session threads until the accept burst completes.
///
/// Release-all-at-once semantics without burning CPU: waiters sleep on
/// the condvar instead of spinning on a shared flag.
struct StartGate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl StartGate {
    fn new() -> Self {
        Self {
            open: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn release(&self) {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        *open = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        while !*open {
            open = self.cond.wait(open).unwrap_or_else(|e| e.into_inner());
        }
    }
}

pub struct ThreadsBackend;

impl Backend for ThreadsBackend {
    fn name(&self) -> &'static str {
        "threads"
    }

    fn run(&self, params: &TestParams, hooks: &mut dyn TestHooks) -> Result<(), BackendError> {
        let listener = net::bind_listener(params.bind_addr, listen_backlog(params.count))?;
        hooks.ready_to_connect();

        let gate = Arc::new(StartGate::new());
        let violations = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::with_capacity(params.count);

        for i in 0..params.count {
            let (stream, peer) = listener.accept()?;
            net::prepare_stream(&stream)?;
            debug!(session = i, peer = %peer, "accepted connection");

            let gate = Arc::clone(&gate);
            let violations = Arc::clone(&violations);
            let msize = params.msize;
            let handle = thread::Builder::new()
                .name(format!("echo-{i}"))
                .spawn(move || {
                    let mut stream = stream;
                    gate.wait();
                    let outcome = session::run_session(&mut stream, msize);
                    session::record_outcome(&outcome, msize, &violations);
                })?;
            handles.push(handle);
        }

        drop(listener);

        // The last expected connection has been accepted: steady state
        // starts as soon as the gate opens.
        hooks.before_test();
        gate.release();

        for handle in handles {
            if handle.join().is_err() {
                error!("session thread panicked");
            }
        }
        hooks.after_test();

        let violations = violations.load(Ordering::Relaxed);
        if violations > 0 {
            error!(violations, "sessions aborted on framing violations");
        }
        Ok(())
    }
}
