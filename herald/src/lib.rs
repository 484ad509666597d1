//! herald library crate.
//!
//! Notification fan-out core: ingests upstream events and delivers
//! deduplicated push, email and in-app notifications. Exposed as a library for
//! the binary and the integration tests.

pub mod config;
pub mod database;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod notification;
pub mod utils;

pub use error::{Error, Result};
