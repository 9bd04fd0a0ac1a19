//! echo-bench: TCP echo benchmark comparing connection-handling strategies.
//!
//! Runs one echo server per round under a chosen concurrency model
//! (multiplexed I/O, cooperative tasks, OS threads, green threads, or
//! native code loaded from a shared library) against an external load
//! generator, and reports throughput and latency percentiles under an
//! identical measurement methodology for every model.
//!
//! The measurement-critical pieces live here:
//! - the instrumented echo-session contract every backend must honor
//!   ([`runner`], [`session`]),
//! - the control-channel protocol spoken with the load generator
//!   ([`control`]),
//! - the latency-histogram codec and percentile engine ([`payload`],
//!   [`percentile`]).

pub mod backends;
pub mod backlog;
pub mod config;
pub mod control;
pub mod harness;
pub mod net;
pub mod payload;
pub mod percentile;
pub mod report;
pub mod runner;
pub mod session;
