//! Green-thread-per-connection backend.
//!
//! One `may` coroutine per accepted connection. The accept burst runs on
//! the calling thread over a plain blocking listener; each accepted socket
//! is handed to the coroutine scheduler by file descriptor, so the
//! `TCP_NODELAY` and backlog setup applied at accept time carries over.

use crate::backlog::listen_backlog;
use crate::config::TestParams;
use crate::net;
use crate::runner::{Backend, BackendError, TestHooks};
use crate::session;
use may::go;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

pub struct GreenBackend;

impl Backend for GreenBackend {
    fn name(&self) -> &'static str {
        "green"
    }

    fn run(&self, params: &TestParams, hooks: &mut dyn TestHooks) -> Result<(), BackendError> {
        let listener = net::bind_listener(params.bind_addr, listen_backlog(params.count))?;
        hooks.ready_to_connect();

        let violations = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::with_capacity(params.count);

        for i in 0..params.count {
            let (stream, peer) = listener.accept()?;
            net::prepare_stream(&stream)?;
            debug!(session = i, peer = %peer, "accepted connection");

            // Re-home the socket onto the coroutine scheduler. The raw fd
            // transfer keeps exactly one owner at all times.
            let mut stream =
                unsafe { may::net::TcpStream::from_raw_fd(stream.into_raw_fd()) };

            let violations = Arc::clone(&violations);
            let msize = params.msize;
            handles.push(go!(move || {
                let outcome = session::run_session(&mut stream, msize);
                session::record_outcome(&outcome, msize, &violations);
            }));
        }

        drop(listener);

        hooks.before_test();
        for handle in handles {
            if handle.join().is_err() {
                error!("session coroutine panicked");
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
