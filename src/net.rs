//! Listening-socket construction shared by all backends.
//!
//! Built through `socket2` so the backlog computed by the sizing heuristic
//! is applied explicitly; `std::net::TcpListener::bind` would pick its own.

use std::io;
use std::net::SocketAddr;

/// Create a blocking TCP listener on `addr` with an explicit backlog.
///
/// `SO_REUSEADDR` is set so that back-to-back rounds can rebind the same
/// port without waiting out TIME_WAIT.
pub fn bind_listener(addr: SocketAddr, backlog: usize) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as usize) as i32)?;

    Ok(socket.into())
}

/// Configure an accepted connection for latency measurement:
/// disable Nagle batching so per-message latency reflects protocol
/// overhead, not coalescing.
pub fn prepare_stream(stream: &std::net::TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)
}
