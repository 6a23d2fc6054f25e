//! # Siren Common Library
//!
//! Shared code for the Siren services:
//! - Error type used by configuration and bootstrap code
//! - TOML + environment configuration helpers
//! - Logging bootstrap (tracing subscriber)

pub mod config;
pub mod error;
pub mod logging;

pub use config::LoggingConfig;
pub use error::{Error, Result};
