//! Shared plumbing for the Granary workspace: configuration loading,
//! telemetry initialization, and the caller-side retry helper.

pub mod config;
pub mod retry;
pub mod telemetry;
