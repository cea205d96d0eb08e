//! # kiln-sanitizer
//!
//! Address-sanitizer instrumentation for kiln.
//!
//! Features:
//! - `sanitize_address` attribute tagging for defined functions
//! - New-pass-manager pipeline execution (`asan`, optionally after a
//!   `default<On>` pipeline)
//! - `asan.module_ctor` neutralization for runtimes initialized at load
//! - Textual IR dumping of the instrumented module

pub mod instrument;

pub use instrument::{
    dump, instrument, neutralize_module_ctor, pipeline_for, SanitizerConfig, ASAN_CTOR_NAME,
};
