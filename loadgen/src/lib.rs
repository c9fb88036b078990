//! Synthetic load generator for S3-compatible object stores.
//!
//! The generator issues writes and reads at fixed rates, each as an independent task, and
//! records how the store responds. Reads target a corpus of objects written during warm-up, so a
//! read that finds nothing is reported as a miss instead of an error.
//!
//! See [`loadgen::LoadGenerator`] for the run lifecycle and [`scheduler::Scheduler`] for the rate
//! control.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod concurrency;
pub mod config;
pub mod corpus;
pub mod executor;
pub mod loadgen;
pub mod metrics;
pub mod observability;
pub mod payload;
pub mod report;
pub mod scheduler;
