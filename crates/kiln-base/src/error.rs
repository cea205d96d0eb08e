//! Unified error types for kiln.

use thiserror::Error;

/// The main error type for kiln operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IR or bitcode parsing failed. Carries the LLVM diagnostic text.
    #[error("parse error: {0}")]
    Parse(String),

    /// I/O error while reading or writing a module file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Module verification failed.
    #[error("verification failed: {0}")]
    Verify(String),

    /// Execution engine construction failed.
    #[error("engine construction failed: {0}")]
    EngineBuild(String),

    /// Section finalization or memory protection failed.
    #[error("finalize failed: {0}")]
    Finalize(String),

    /// A symbol could not be resolved in the compiled module.
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    /// Sanitizer pass pipeline construction or execution failed.
    #[error("instrumentation failed: {0}")]
    Instrument(String),

    /// Configuration file or environment parsing failed.
    #[error("config error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Maps the error to a process exit code.
    ///
    /// Codes 1 through 4 match the failure signals of the load, verify,
    /// build, and finalize stages; the rest extend the taxonomy.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Parse(_) | Error::Io(_) => 1,
            Error::Verify(_) => 2,
            Error::EngineBuild(_) => 3,
            Error::Finalize(_) => 4,
            Error::SymbolNotFound(_) => 5,
            Error::Instrument(_) => 6,
            Error::Config(_) => 78,
            Error::Internal(_) => 70,
        }
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
