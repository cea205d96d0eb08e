//! # kiln-base
//!
//! Core types and utilities for the kiln JIT harness.
//!
//! This crate provides the foundational building blocks used across all other
//! kiln crates, including:
//!
//! - **Error Types**: Unified error handling with process exit-code mapping
//! - **Utilities**: Address formatting and alignment helpers

pub mod error;
pub mod utils;

pub use error::{Error, Result};
