//! Multiplexed-I/O backend.
//!
//! Readiness-based model: a single-threaded mio poll loop drives every
//! session. Uses epoll on Linux, kqueue on macOS.
//!
//! Events are edge-triggered, so reads drain until `WouldBlock` and a
//! blocked echo write parks the session in a writing state registered for
//! writable interest instead of stalling the loop.

use crate::backlog::listen_backlog;
use crate::config::TestParams;
use crate::net;
use crate::runner::{Backend, BackendError, TestHooks};
use crate::session::{classify_read, is_disconnect, FrameEvent};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use slab::Slab;
use std::io::{self, Read, Write};
use tracing::{debug, error, trace};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Per-session state for the poll loop.
///
/// `AwaitingFrame` reads frames and echoes them inline; a write that does
/// not complete moves the session to `Writing` until the socket drains.
enum SessionState {
    AwaitingFrame,
    Writing { written: usize, len: usize },
}

struct EchoSession {
    stream: TcpStream,
    frame: Vec<u8>,
    state: SessionState,
    frames: u64,
}

impl EchoSession {
    fn new(stream: TcpStream, msize: usize) -> Self {
        Self {
            stream,
            frame: vec![0u8; msize],
            state: SessionState::AwaitingFrame,
            frames: 0,
        }
    }
}

/// What to do with a session after driving it.
enum Drive {
    Keep,
    Close,
}

pub struct SelectorBackend;

impl Backend for SelectorBackend {
    fn name(&self) -> &'static str {
        "selector"
    }

    fn run(&self, params: &TestParams, hooks: &mut dyn TestHooks) -> Result<(), BackendError> {
        let std_listener = net::bind_listener(params.bind_addr, listen_backlog(params.count))?;
        std_listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(std_listener);

        let mut poll = Poll::new()?;
        let mut events = Events::with_capacity(256);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        hooks.ready_to_connect();

        let mut sessions: Slab<EchoSession> = Slab::with_capacity(params.count);
        // Edge-triggered readiness seen during the accept burst must not
        // be dropped: peers start sending as soon as they connect.
        let mut early_ready: Vec<usize> = Vec::new();

        while sessions.len() < params.count {
            poll.poll(&mut events, None)?;
            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => {
                        accept_burst(&listener, &poll, &mut sessions, params)?;
                    }
                    Token(key) => early_ready.push(key),
                }
            }
        }

        poll.registry().deregister(&mut listener)?;
        drop(listener);

        hooks.before_test();

        let mut violations = 0u64;

        for key in early_ready {
            drive_ready(&mut poll, &mut sessions, key, true, params.msize, &mut violations)?;
        }

        while !sessions.is_empty() {
            poll.poll(&mut events, None)?;
            for event in events.iter() {
                let Token(key) = event.token();
                drive_ready(
                    &mut poll,
                    &mut sessions,
                    key,
                    event.is_readable(),
                    params.msize,
                    &mut violations,
                )?;
            }
        }

        hooks.after_test();

        if violations > 0 {
            error!(violations, "sessions aborted on framing violations");
        }
        Ok(())
    }
}

fn accept_burst(
    listener: &TcpListener,
    poll: &Poll,
    sessions: &mut Slab<EchoSession>,
    params: &TestParams,
) -> io::Result<()> {
    while sessions.len() < params.count {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nodelay(true)?;
                let key = sessions.insert(EchoSession::new(stream, params.msize));
                let conn = &mut sessions[key];
                poll.registry()
                    .register(&mut conn.stream, Token(key), Interest::READABLE)?;
                debug!(session = key, peer = %peer, "accepted connection");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Drive one session for a readiness event, closing it when it ends.
fn drive_ready(
    poll: &mut Poll,
    sessions: &mut Slab<EchoSession>,
    key: usize,
    readable: bool,
    msize: usize,
    violations: &mut u64,
) -> io::Result<()> {
    let Some(sess) = sessions.get_mut(key) else {
        return Ok(());
    };

    let drive = match sess.state {
        SessionState::AwaitingFrame if readable => {
            drive_frames(poll.registry(), Token(key), sess, msize, violations)?
        }
        SessionState::Writing { .. } => drive_write(poll.registry(), Token(key), sess)?,
        // Readiness for a direction the session is not waiting on.
        _ => Drive::Keep,
    };

    if let Drive::Close = drive {
        let mut sess = sessions.remove(key);
        let _ = poll.registry().deregister(&mut sess.stream);
        trace!(session = key, frames = sess.frames, "session closed");
    }
    Ok(())
}

/// Read and echo frames until the socket would block or the session ends.
fn drive_frames(
    registry: &Registry,
    token: Token,
    sess: &mut EchoSession,
    msize: usize,
    violations: &mut u64,
) -> io::Result<Drive> {
    loop {
        let n = match sess.stream.read(&mut sess.frame) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Drive::Keep),
            Err(ref e) if is_disconnect(e) => return Ok(Drive::Close),
            Err(e) => {
                error!(frames = sess.frames, error = %e, "session failed");
                return Ok(Drive::Close);
            }
        };

        match classify_read(n, msize) {
            FrameEvent::PeerClosed => return Ok(Drive::Close),
            FrameEvent::Violation => {
                *violations += 1;
                error!(
                    expected = msize,
                    got = n,
                    frames = sess.frames,
                    "framing violation, session aborted"
                );
                return Ok(Drive::Close);
            }
            FrameEvent::Echo => {
                sess.state = SessionState::Writing { written: 0, len: n };
                match drive_write(registry, token, sess)? {
                    Drive::Close => return Ok(Drive::Close),
                    Drive::Keep => {
                        if matches!(sess.state, SessionState::Writing { .. }) {
                            // Echo blocked mid-frame; resume on writable.
                            return Ok(Drive::Keep);
                        }
                        sess.frames += 1;
                    }
                }
            }
        }
    }
}

/// Push out a pending echo; back to reading once the frame is flushed.
fn drive_write(registry: &Registry, token: Token, sess: &mut EchoSession) -> io::Result<Drive> {
    let SessionState::Writing { mut written, len } = sess.state else {
        return Ok(Drive::Keep);
    };
    let resumed = written > 0;

    while written < len {
        match sess.stream.write(&sess.frame[written..len]) {
            Ok(0) => return Ok(Drive::Close),
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                sess.state = SessionState::Writing { written, len };
                registry.reregister(&mut sess.stream, token, Interest::WRITABLE)?;
                return Ok(Drive::Keep);
            }
            Err(ref e) if is_disconnect(e) => return Ok(Drive::Close),
            Err(e) => {
                error!(frames = sess.frames, error = %e, "session failed");
                return Ok(Drive::Close);
            }
        }
    }

    sess.state = SessionState::AwaitingFrame;
    if resumed {
        // The session was parked for writable interest; swing back to
        // readable for the next frame.
        sess.frames += 1;
        registry.reregister(&mut sess.stream, token, Interest::READABLE)?;
    }
    Ok(Drive::Keep)
}
