//! Shared configuration and error types for Stockroom.
//!
//! This crate provides common types used across all other crates:
//! - Environment-sourced application configuration
//! - Application-wide error types

pub mod config;
pub mod error;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
