//! Typed entry-point invocation.

use kiln_base::{Error, Result};
use std::ffi::CString;
use std::fmt;
use std::os::raw::{c_char, c_int};

/// The shapes of entry point the harness knows how to call.
#[derive(Debug, Clone)]
pub enum EntrySpec {
    /// C `main(argc, argv) -> i32`. `argv[0]` is supplied by the caller.
    Main { argv: Vec<String> },
    /// Numeric kernel `fn(u64) -> f64`.
    UnaryU64 { arg: u64 },
    /// `fn() -> i32`.
    NoArgs,
}

/// The value an entry point returned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryValue {
    Int(i32),
    Float(f64),
}

impl EntryValue {
    /// The process exit code this value maps to. Float results report
    /// success; their value is printed instead.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            EntryValue::Int(v) => *v,
            EntryValue::Float(_) => 0,
        }
    }
}

impl fmt::Display for EntryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryValue::Int(v) => write!(f, "{}", v),
            EntryValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Owns the NUL-terminated strings backing a C `argv`.
///
/// The pointer array is NULL-terminated per the C convention; `argc`
/// excludes the terminator.
pub(crate) struct ArgvBuffer {
    strings: Vec<CString>,
    pointers: Vec<*const c_char>,
}

impl ArgvBuffer {
    pub(crate) fn new(argv: &[String]) -> Result<Self> {
        let strings = argv
            .iter()
            .map(|arg| {
                CString::new(arg.as_str())
                    .map_err(|_| Error::Internal(format!("argument contains NUL: {:?}", arg)))
            })
            .collect::<Result<Vec<_>>>()?;
        let pointers = strings
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        Ok(Self { strings, pointers })
    }

    pub(crate) fn argc(&self) -> c_int {
        self.strings.len() as c_int
    }

    pub(crate) fn as_ptr(&self) -> *const *const c_char {
        self.pointers.as_ptr()
    }
}

/// Calls the resolved entry address with the given signature.
///
/// # Safety
/// `address` must point to JIT'd code whose ABI matches `spec`.
pub(crate) unsafe fn invoke(address: u64, spec: &EntrySpec) -> Result<EntryValue> {
    match spec {
        EntrySpec::Main { argv } => {
            let argv = ArgvBuffer::new(argv)?;
            let entry: unsafe extern "C" fn(c_int, *const *const c_char) -> c_int =
                std::mem::transmute(address as usize);
            Ok(EntryValue::Int(entry(argv.argc(), argv.as_ptr())))
        }
        EntrySpec::UnaryU64 { arg } => {
            let entry: unsafe extern "C" fn(u64) -> f64 = std::mem::transmute(address as usize);
            Ok(EntryValue::Float(entry(*arg)))
        }
        EntrySpec::NoArgs => {
            let entry: unsafe extern "C" fn() -> c_int = std::mem::transmute(address as usize);
            Ok(EntryValue::Int(entry()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_argv_buffer_layout() {
        let args = vec!["prog".to_string(), "10000000".to_string()];
        let argv = ArgvBuffer::new(&args).unwrap();
        assert_eq!(argv.argc(), 2);

        unsafe {
            let ptrs = argv.as_ptr();
            assert_eq!(CStr::from_ptr(*ptrs).to_str().unwrap(), "prog");
            assert_eq!(CStr::from_ptr(*ptrs.add(1)).to_str().unwrap(), "10000000");
            assert!((*ptrs.add(2)).is_null());
        }
    }

    #[test]
    fn test_argv_rejects_interior_nul() {
        let args = vec!["a\0b".to_string()];
        assert!(ArgvBuffer::new(&args).is_err());
    }

    #[test]
    fn test_entry_value_exit_codes() {
        assert_eq!(EntryValue::Int(7).exit_code(), 7);
        assert_eq!(EntryValue::Float(3.14).exit_code(), 0);
        assert_eq!(EntryValue::Float(3.5).to_string(), "3.5");
    }
}
