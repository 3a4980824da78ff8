//! Shared plumbing for the Membridge services: configuration loading,
//! the service-level error type, and tracing setup.

pub mod config;
pub mod error;
pub mod tracing;

pub use error::{Result, ServiceError};
