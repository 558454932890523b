//! Issuance daemon library
//!
//! This module provides the core components for the issuance daemon:
//! - REST API handlers and the verifier webhook endpoint
//! - Configuration loading
//! - Server lifecycle and periodic job management

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
