//! # CalSync Domain
//!
//! Business domain types for the calendar synchronization engine.
//!
//! This crate contains:
//! - Calendar event payloads and the typed synchronization metadata bag
//! - Sync configurations, event mappings and sync run records
//! - Domain error types and Result definitions
//! - Configuration structures and constants
//!
//! ## Architecture
//! - No dependencies on other CalSync crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
