//! # kiln-ir
//!
//! LLVM module loading and verification for kiln.
//!
//! This crate owns the LLVM context and turns files (textual `.ll` or
//! bitcode `.bc`) into verified modules ready for instrumentation and
//! JIT compilation.

pub mod loader;

pub use loader::{is_bitcode, source_file_name, verify, Loader};
