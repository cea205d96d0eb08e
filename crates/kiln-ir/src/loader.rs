//! Module loading from textual IR and bitcode files.

use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Module;
use kiln_base::{Error, Result};
use std::fs;
use std::path::Path;

/// Magic bytes of a raw bitcode file (`BC\xC0\xDE`).
const BITCODE_MAGIC: [u8; 4] = [0x42, 0x43, 0xC0, 0xDE];

/// Magic bytes of a bitcode wrapper header (little-endian `0x0B17C0DE`).
const BITCODE_WRAPPER_MAGIC: [u8; 4] = [0xDE, 0xC0, 0x17, 0x0B];

/// Loads LLVM modules into a context it owns.
///
/// Modules borrow the loader, so the loader must outlive every module and
/// engine built from it.
pub struct Loader {
    context: Context,
}

impl Loader {
    /// Creates a new loader with a fresh LLVM context.
    pub fn new() -> Self {
        Self {
            context: Context::create(),
        }
    }

    /// Returns the underlying LLVM context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Loads a module from a file, sniffing bitcode vs textual IR.
    pub fn load_file(&self, path: &Path) -> Result<Module<'_>> {
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("module");

        if is_bitcode(&bytes) {
            tracing::debug!(path = %path.display(), "loading bitcode module");
            Module::parse_bitcode_from_path(path, &self.context)
                .map_err(|e| Error::Parse(e.to_string()))
        } else {
            tracing::debug!(path = %path.display(), "loading textual IR module");
            let buf = MemoryBuffer::create_from_memory_range_copy(&bytes, name);
            self.context
                .create_module_from_ir(buf)
                .map_err(|e| Error::Parse(e.to_string()))
        }
    }

    /// Parses a module from an in-memory IR string.
    pub fn load_ir_str(&self, ir: &str, name: &str) -> Result<Module<'_>> {
        let buf = MemoryBuffer::create_from_memory_range_copy(ir.as_bytes(), name);
        self.context
            .create_module_from_ir(buf)
            .map_err(|e| Error::Parse(e.to_string()))
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns whether the bytes start with a bitcode magic.
#[must_use]
pub fn is_bitcode(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && (bytes[..4] == BITCODE_MAGIC || bytes[..4] == BITCODE_WRAPPER_MAGIC)
}

/// Verifies a module, mapping the diagnostic into `Error::Verify`.
pub fn verify(module: &Module<'_>) -> Result<()> {
    module.verify().map_err(|e| Error::Verify(e.to_string()))
}

/// Returns the module's `source_filename`, if any.
#[must_use]
pub fn source_file_name(module: &Module<'_>) -> String {
    module.get_source_file_name().to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_bitcode_magic() {
        assert!(is_bitcode(&[0x42, 0x43, 0xC0, 0xDE, 0x00]));
        assert!(is_bitcode(&[0xDE, 0xC0, 0x17, 0x0B, 0x00]));
        assert!(!is_bitcode(b"define i32 @f() {"));
        assert!(!is_bitcode(b"BC"));
    }

    #[test]
    fn test_load_ir_str() {
        let loader = Loader::new();
        let module = loader
            .load_ir_str("define i32 @answer() {\n  ret i32 42\n}\n", "answer")
            .expect("valid IR should parse");
        assert!(module.get_function("answer").is_some());
        verify(&module).expect("module should verify");
    }

    #[test]
    fn test_parse_error_carries_diagnostic() {
        let loader = Loader::new();
        let err = loader
            .load_ir_str("this is not IR", "bad")
            .expect_err("garbage should not parse");
        match err {
            Error::Parse(msg) => assert!(!msg.is_empty()),
            other => panic!("expected Parse, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_rejects_bad_dominance() {
        // %a uses %b before its definition; the parser accepts forward
        // references but the verifier rejects the dominance violation.
        let loader = Loader::new();
        let module = loader
            .load_ir_str(
                "define i32 @f() {\nentry:\n  %a = add i32 %b, 1\n  %b = add i32 1, 1\n  ret i32 %a\n}\n",
                "bad_dom",
            )
            .expect("should parse");
        let err = verify(&module).expect_err("verifier should reject");
        match err {
            Error::Verify(msg) => assert!(!msg.is_empty()),
            other => panic!("expected Verify, got {:?}", other),
        }
    }
}
