//! Shared vocabulary for the wirebench control and analysis planes.
//!
//! This crate defines the typed identity of a benchmark trial
//! ([`ExperimentKey`]), the on-disk layout of its artifacts
//! ([`TrialPaths`]), the grammar of the statistics lines emitted by
//! benchmark clients ([`report`]), and the error taxonomy shared by the
//! runner and the analysis tool.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod key;
pub mod report;

pub use crate::error::{Error, Result};
pub use crate::key::{ExperimentKey, TrialPaths};
pub use crate::report::ClientReport;
