//! The wirebench orchestration plane.
//!
//! Drives distributed micro-benchmarks: for every cell of a configured
//! experiment matrix it launches a server process and a fan-out of client
//! processes on remote hosts, shepherds the trial through warm-up, join,
//! and teardown, and leaves the per-client latency artifacts on disk for
//! the analysis plane.
//!
//! Remote hosts are reached through the [`remote::RemoteExecutor`] seam, a
//! single "run this command on this host" primitive. Launched processes are
//! tracked by the PID captured at spawn time; fixed sleeps around lifecycle
//! transitions are replaced by bounded liveness polls.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod lifecycle;
mod observability;
pub mod remote;
