//! Control channel client.
//!
//! Coordinates with the external load generator over a dedicated TCP
//! connection, distinct from the sockets under test. The exchange is one
//! handshake send when the echo server is ready to accept, and one result
//! receive after the instrumentation window closes. Failures here are
//! fatal to the current round and are never retried internally; retries
//! belong to the harness's round iteration.

use crate::config::TestParams;
use crate::payload::{self, DecodeError, TestResult};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use tracing::debug;

/// Upper bound on the result payload size, read in a single receive.
pub const MAX_RESULT_BYTES: usize = 64 * 1024;

/// One round's connection to the load generator.
#[derive(Debug)]
pub struct ControlChannel {
    stream: TcpStream,
}

impl ControlChannel {
    /// Open the control connection. A refused or timed-out connect is
    /// fatal to the round.
    pub fn connect(loader: SocketAddr) -> Result<Self, ControlError> {
        let stream = TcpStream::connect(loader).map_err(|e| ControlError::Connect(loader, e))?;
        debug!(loader = %loader, "control channel connected");
        Ok(Self { stream })
    }

    /// Send the handshake that tells the load generator where to connect
    /// and how to shape traffic. One send, no terminator; the load
    /// generator parses the whole payload from one read.
    pub fn announce_ready(&mut self, params: &TestParams) -> Result<(), ControlError> {
        let line = handshake_line(params);
        debug!(handshake = %line, "announcing ready to connect");
        self.stream
            .write_all(line.as_bytes())
            .map_err(ControlError::Send)
    }

    /// Block for the result payload, decode it, and close the channel.
    pub fn collect_result(mut self) -> Result<TestResult, ControlError> {
        let mut buf = vec![0u8; MAX_RESULT_BYTES];
        let n = self.stream.read(&mut buf).map_err(ControlError::Receive)?;
        if n == 0 {
            return Err(ControlError::Receive(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "load generator closed the control channel without a result",
            )));
        }
        debug!(bytes = n, "received result payload");
        payload::decode(&buf[..n]).map_err(ControlError::Decode)
    }
}

/// The ASCII handshake line, space-separated fields in fixed order.
pub fn handshake_line(params: &TestParams) -> String {
    format!(
        "{} {} {} {} {} {} {}",
        params.bind_addr.ip(),
        params.bind_addr.port(),
        params.count,
        params.runtime_secs,
        params.timeout_ms.0,
        params.timeout_ms.1,
        params.msize
    )
}

/// Control-channel failures, fatal to the current round.
#[derive(Debug)]
pub enum ControlError {
    Connect(SocketAddr, io::Error),
    Send(io::Error),
    Receive(io::Error),
    Decode(DecodeError),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Connect(addr, e) => {
                write!(f, "failed to connect to load generator at {addr}: {e}")
            }
            ControlError::Send(e) => write!(f, "failed to send handshake: {e}"),
            ControlError::Receive(e) => write!(f, "failed to receive result payload: {e}"),
            ControlError::Decode(e) => write!(f, "result payload decode error: {e}"),
        }
    }
}

impl std::error::Error for ControlError {}
