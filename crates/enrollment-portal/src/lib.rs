//! Student enrollment service: intake, status review, and real-time
//! notification of status changes.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
