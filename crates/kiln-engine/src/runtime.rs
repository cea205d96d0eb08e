//! Runtime library preloading for JIT symbol resolution.
//!
//! MCJIT resolves external symbols against the process image, so a runtime
//! library (the ASan runtime, most importantly) must be loaded globally
//! before finalization for the instrumented module to link.

use kiln_base::{Error, Result};
use libloading::Library;
use llvm_sys::support::LLVMLoadLibraryPermanently;
use std::ffi::CString;
use std::path::Path;

type AsanInitFn = unsafe extern "C" fn();

/// Checks that a library exposes the sanitizer runtime entry point.
///
/// Useful before committing to a preload: `LLVMLoadLibraryPermanently`
/// cannot be undone.
pub fn probe_sanitizer_runtime(path: &Path) -> Result<()> {
    let library = unsafe {
        Library::new(path).map_err(|e| {
            Error::EngineBuild(format!("failed to load runtime library {}: {}", path.display(), e))
        })?
    };
    unsafe {
        library.get::<AsanInitFn>(b"__asan_init").map_err(|e| {
            Error::EngineBuild(format!(
                "{} does not export __asan_init: {}",
                path.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Makes a shared library's symbols visible to the JIT resolver for the
/// lifetime of the process.
pub fn preload(path: &Path) -> Result<()> {
    let raw = path
        .to_str()
        .ok_or_else(|| Error::EngineBuild(format!("non-UTF-8 library path: {:?}", path)))?;
    let cpath = CString::new(raw)
        .map_err(|_| Error::EngineBuild(format!("library path contains NUL: {:?}", path)))?;

    let failed = unsafe { LLVMLoadLibraryPermanently(cpath.as_ptr()) };
    if failed != 0 {
        return Err(Error::EngineBuild(format!(
            "failed to preload {}",
            path.display()
        )));
    }
    tracing::info!(path = %path.display(), "preloaded runtime library");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_missing_library() {
        let err = probe_sanitizer_runtime(Path::new("/nonexistent/libclang_rt.asan.so"))
            .expect_err("missing library should fail");
        match err {
            Error::EngineBuild(msg) => assert!(msg.contains("nonexistent")),
            other => panic!("expected EngineBuild, got {:?}", other),
        }
    }

    #[test]
    fn test_preload_missing_library() {
        assert!(preload(Path::new("/nonexistent/libfoo.so")).is_err());
    }
}
