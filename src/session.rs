//! Echo session state machine.
//!
//! One session per accepted connection. The protocol has no headers and no
//! delimiters: every application-level read/write unit is exactly `msize`
//! bytes. A non-zero read of any other length is a framing violation, never
//! a partial read to be buffered and retried. A violation aborts only the
//! offending session; the runner and all other sessions are untouched.
//!
//! Peer reset is an expected termination mode and is treated identically to
//! a graceful close.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, trace};

/// Classification of a single read against the fixed frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// Zero bytes read: the peer closed the connection.
    PeerClosed,
    /// Exactly one frame read: echo it back.
    Echo,
    /// Any other non-zero length: fatal framing violation.
    Violation,
}

/// Classify the byte count returned by a read.
pub fn classify_read(len: usize, msize: usize) -> FrameEvent {
    if len == 0 {
        FrameEvent::PeerClosed
    } else if len == msize {
        FrameEvent::Echo
    } else {
        FrameEvent::Violation
    }
}

/// How a session reached its terminal state.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Peer closed (or reset) after `frames` complete echoes.
    PeerClosed { frames: u64 },
    /// A frame of unexpected length arrived; the session was aborted.
    FramingViolation { frames: u64, got: usize },
    /// An unexpected I/O error terminated the session.
    IoError { frames: u64, error: io::Error },
}

/// True for error kinds that mean "the peer went away", which the session
/// contract treats as a normal close.
pub fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

/// Run one echo session over a blocking stream until the peer closes.
///
/// Used directly by the thread and green-thread backends; the event-loop
/// and task backends reimplement the same transitions over their own I/O
/// primitives but share [`classify_read`].
pub fn run_session<S: Read + Write>(stream: &mut S, msize: usize) -> SessionOutcome {
    let mut frame = vec![0u8; msize];
    let mut frames = 0u64;

    loop {
        let n = match stream.read(&mut frame) {
            Ok(n) => n,
            Err(ref e) if is_disconnect(e) => return SessionOutcome::PeerClosed { frames },
            Err(error) => return SessionOutcome::IoError { frames, error },
        };

        match classify_read(n, msize) {
            FrameEvent::PeerClosed => return SessionOutcome::PeerClosed { frames },
            FrameEvent::Violation => {
                return SessionOutcome::FramingViolation { frames, got: n };
            }
            FrameEvent::Echo => {
                if let Err(error) = stream.write_all(&frame[..n]) {
                    if is_disconnect(&error) {
                        return SessionOutcome::PeerClosed { frames };
                    }
                    return SessionOutcome::IoError { frames, error };
                }
                frames += 1;
            }
        }
    }
    // The socket is released by the caller dropping the stream, which
    // happens unconditionally on every return path.
}

/// Log a finished session and bump the shared violation counter if needed.
pub fn record_outcome(outcome: &SessionOutcome, msize: usize, violations: &AtomicU64) {
    match outcome {
        SessionOutcome::PeerClosed { frames } => {
            trace!(frames, "session closed by peer");
        }
        SessionOutcome::FramingViolation { frames, got } => {
            violations.fetch_add(1, Ordering::Relaxed);
            error!(
                expected = msize,
                got, frames, "framing violation, session aborted"
            );
        }
        SessionOutcome::IoError { frames, error } => {
            error!(frames, error = %error, "session failed");
        }
    }
}
