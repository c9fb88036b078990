//! Test utilities for the load generator crates.
//!
//! This crate provides helpers shared by the unit and integration tests of the workspace. See the
//! modules for all available utilities.

pub mod tracing;
