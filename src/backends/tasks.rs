//! Cooperative-task backend.
//!
//! One tokio task per connection on a current-thread runtime: every
//! session shares one OS thread and yields at each await point, which is
//! the cooperative-scheduling model under measurement. The accept burst
//! happens on the blocking listener before the runtime spins up, so task
//! startup cost stays inside the measured window's setup phase.

use crate::backlog::listen_backlog;
use crate::config::TestParams;
use crate::net;
use crate::runner::{Backend, BackendError, TestHooks};
use crate::session;
use bytes::BytesMut;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, error, trace};

pub struct TasksBackend;

impl Backend for TasksBackend {
    fn name(&self) -> &'static str {
        "tasks"
    }

    fn run(&self, params: &TestParams, hooks: &mut dyn TestHooks) -> Result<(), BackendError> {
        let listener = net::bind_listener(params.bind_addr, listen_backlog(params.count))?;
        hooks.ready_to_connect();

        let mut streams = Vec::with_capacity(params.count);
        for i in 0..params.count {
            let (stream, peer) = listener.accept()?;
            net::prepare_stream(&stream)?;
            debug!(session = i, peer = %peer, "accepted connection");
            streams.push(stream);
        }
        drop(listener);

        let violations = Arc::new(AtomicU64::new(0));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;

        runtime.block_on(async {
            let mut sessions = JoinSet::new();
            for stream in streams {
                stream.set_nonblocking(true)?;
                let stream = TcpStream::from_std(stream)?;
                sessions.spawn(echo_session(
                    stream,
                    params.msize,
                    Arc::clone(&violations),
                ));
            }

            hooks.before_test();
            while let Some(joined) = sessions.join_next().await {
                if joined.is_err() {
                    error!("session task panicked");
                }
            }
            Ok::<(), io::Error>(())
        })?;

        hooks.after_test();

        let violations = violations.load(Ordering::Relaxed);
        if violations > 0 {
            error!(violations, "sessions aborted on framing violations");
        }
        Ok(())
    }
}

/// One echo session as a cooperative task.
///
/// Same transitions as the blocking session loop, expressed over async
/// reads and writes.
async fn echo_session(mut stream: TcpStream, msize: usize, violations: Arc<AtomicU64>) {
    let mut frame = BytesMut::zeroed(msize);
    let mut frames = 0u64;

    loop {
        let n = match stream.read(&mut frame[..]).await {
            Ok(n) => n,
            Err(ref e) if session::is_disconnect(e) => break,
            Err(e) => {
                error!(frames, error = %e, "session failed");
                return;
            }
        };

        match session::classify_read(n, msize) {
            session::FrameEvent::PeerClosed => break,
            session::FrameEvent::Violation => {
                violations.fetch_add(1, Ordering::Relaxed);
                error!(
                    expected = msize,
                    got = n,
                    frames,
                    "framing violation, session aborted"
                );
                return;
            }
            session::FrameEvent::Echo => {
                if let Err(e) = stream.write_all(&frame[..n]).await {
                    if !session::is_disconnect(&e) {
                        error!(frames, error = %e, "session failed");
                        return;
                    }
                    break;
                }
                frames += 1;
            }
        }
    }

    trace!(frames, "session closed by peer");
}
