//! Core types, configuration, and error handling for Warden.
//!
//! This crate provides the shared foundation used by the other Warden crates:
//! - [`WardenError`]: unified error type using `thiserror`
//! - [`WardenConfig`]: configuration loaded from `.warden.toml`
//! - Shared types: [`Category`], [`Finding`], [`Outcome`], [`Severity`],
//!   [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{AuditLogConfig, OracleConfig, PipelineConfig, WardenConfig};
pub use error::WardenError;
pub use types::{Category, Finding, OutputFormat, Outcome, Severity};

/// A convenience `Result` type for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
