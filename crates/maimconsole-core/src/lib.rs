//! maimconsole Core Library
//!
//! Shared functionality for the maimconsole adapter:
//! - Message envelope model and MaimCore wire codec
//! - Configuration resolution
//! - Common error types
//! - Tracing initialisation

pub mod config;
pub mod envelope;
pub mod error;
pub mod tracing_init;

pub use config::{AdapterConfig, LoadedConfig};
pub use envelope::{Envelope, Identity};
pub use error::{Error, Result};
