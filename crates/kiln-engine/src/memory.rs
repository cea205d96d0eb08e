//! Section memory management for the MCJIT engine.
//!
//! The custom memory manager hands out page-granular anonymous mappings for
//! every section the JIT emits, records each allocation, and applies the
//! final RX/RO protections when the engine finalizes the object. Allocating
//! the `asan_globals` section additionally captures its bounds and registers
//! the `__start_asan_globals` / `__stop_asan_globals` brackets with the
//! engine before relocation resolution.

use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Section name the sanitizer pass uses for its global registry.
pub const ASAN_GLOBALS_SECTION: &str = "asan_globals";

/// Kind of a JIT'd section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Code,
    Data,
}

/// One observed section allocation.
#[derive(Debug, Clone, Serialize)]
pub struct SectionRecord {
    pub kind: SectionKind,
    pub address: usize,
    pub size: usize,
    pub alignment: u32,
    pub section_id: u32,
    pub name: String,
    pub read_only: bool,
}

/// Captured bounds of the `asan_globals` section.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AsanGlobalsBracket {
    pub start: usize,
    pub end: usize,
}

/// Everything the memory manager observed, shared with the engine.
#[derive(Debug, Default)]
pub struct SectionLog {
    pub records: Vec<SectionRecord>,
    pub asan_globals: Option<AsanGlobalsBracket>,
    pub finalize_errors: Vec<String>,
    pub finalized: bool,
}

pub type SharedSectionLog = Arc<Mutex<SectionLog>>;

#[cfg(unix)]
pub(crate) use unix::{create_manager, MemoryState, SectionAllocator};

#[cfg(unix)]
mod unix {
    use super::*;
    use kiln_base::utils::{align_up, format_hex};
    use llvm_sys::execution_engine::{
        LLVMAddGlobalMapping, LLVMCreateSimpleMCJITMemoryManager, LLVMExecutionEngineRef,
        LLVMMCJITMemoryManagerRef,
    };
    use llvm_sys::prelude::{LLVMBool, LLVMValueRef};
    use std::cell::Cell;
    use std::ffi::CStr;
    use std::os::raw::{c_char, c_uint, c_void};

    struct Mapping {
        addr: *mut u8,
        len: usize,
        kind: SectionKind,
        read_only: bool,
    }

    /// Page-granular allocator backing the JIT's sections.
    pub(crate) struct SectionAllocator {
        page_size: usize,
        mappings: Vec<Mapping>,
    }

    impl SectionAllocator {
        pub(crate) fn new() -> Self {
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            Self {
                page_size: if page_size > 0 { page_size as usize } else { 4096 },
                mappings: Vec::new(),
            }
        }

        /// Maps a fresh RW region large enough for the section.
        ///
        /// Sections are page-aligned, which satisfies any alignment the JIT
        /// requests up to the page size.
        pub(crate) fn allocate(
            &mut self,
            size: usize,
            alignment: u32,
            kind: SectionKind,
            read_only: bool,
        ) -> *mut u8 {
            if alignment as usize > self.page_size {
                return std::ptr::null_mut();
            }
            let len = align_up(size.max(1), self.page_size);
            let addr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if addr == libc::MAP_FAILED {
                return std::ptr::null_mut();
            }
            let addr = addr as *mut u8;
            self.mappings.push(Mapping {
                addr,
                len,
                kind,
                read_only,
            });
            addr
        }

        /// Applies the final protections: RX for code, RO for read-only data.
        ///
        /// Instruction-cache invalidation is not needed on x86-64, the only
        /// architecture the harness targets.
        pub(crate) fn apply_protections(&mut self) -> Vec<String> {
            let mut errors = Vec::new();
            for mapping in &self.mappings {
                let prot = match mapping.kind {
                    SectionKind::Code => libc::PROT_READ | libc::PROT_EXEC,
                    SectionKind::Data if mapping.read_only => libc::PROT_READ,
                    SectionKind::Data => continue,
                };
                let rc = unsafe { libc::mprotect(mapping.addr as *mut c_void, mapping.len, prot) };
                if rc != 0 {
                    errors.push(format!(
                        "mprotect failed for section at {} ({} bytes): {}",
                        format_hex(mapping.addr as u64),
                        mapping.len,
                        std::io::Error::last_os_error()
                    ));
                }
            }
            errors
        }
    }

    impl Drop for SectionAllocator {
        fn drop(&mut self) {
            for mapping in &self.mappings {
                unsafe {
                    libc::munmap(mapping.addr as *mut c_void, mapping.len);
                }
            }
        }
    }

    /// State shared with the MCJIT memory-manager callbacks.
    ///
    /// The engine reference and bracket values are filled in by
    /// `Engine::from_module`; the callbacks run later, during the engine's
    /// lazy finalization, always on the caller's thread.
    pub(crate) struct MemoryState {
        allocator: SectionAllocator,
        log: SharedSectionLog,
        engine: Cell<LLVMExecutionEngineRef>,
        bracket_start: Option<LLVMValueRef>,
        bracket_stop: Option<LLVMValueRef>,
    }

    impl MemoryState {
        pub(crate) fn new(
            log: SharedSectionLog,
            bracket_start: Option<LLVMValueRef>,
            bracket_stop: Option<LLVMValueRef>,
        ) -> Self {
            Self {
                allocator: SectionAllocator::new(),
                log,
                engine: Cell::new(std::ptr::null_mut()),
                bracket_start,
                bracket_stop,
            }
        }

        pub(crate) fn set_engine(&self, engine: LLVMExecutionEngineRef) {
            self.engine.set(engine);
        }
    }

    /// Wraps the state into a simple MCJIT memory manager.
    ///
    /// Ownership of the box passes to the engine; the destroy callback
    /// reclaims it when the engine is disposed.
    pub(crate) unsafe fn create_manager(
        state: Box<MemoryState>,
    ) -> (LLVMMCJITMemoryManagerRef, *mut MemoryState) {
        let raw = Box::into_raw(state);
        let manager = LLVMCreateSimpleMCJITMemoryManager(
            raw as *mut c_void,
            allocate_code_section,
            allocate_data_section,
            finalize_memory,
            Some(destroy),
        );
        (manager, raw)
    }

    fn section_name(name: *const c_char) -> String {
        if name.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
        }
    }

    extern "C" fn allocate_code_section(
        opaque: *mut c_void,
        size: usize,
        alignment: c_uint,
        section_id: c_uint,
        name: *const c_char,
    ) -> *mut u8 {
        let state = unsafe { &mut *(opaque as *mut MemoryState) };
        let name = section_name(name);
        let addr = state
            .allocator
            .allocate(size, alignment, SectionKind::Code, false);
        if addr.is_null() {
            return addr;
        }
        tracing::debug!(
            address = %format_hex(addr as u64),
            size,
            section_id,
            name = %name,
            "MEM code section"
        );
        state.log.lock().unwrap().records.push(SectionRecord {
            kind: SectionKind::Code,
            address: addr as usize,
            size,
            alignment,
            section_id,
            name,
            read_only: false,
        });
        addr
    }

    extern "C" fn allocate_data_section(
        opaque: *mut c_void,
        size: usize,
        alignment: c_uint,
        section_id: c_uint,
        name: *const c_char,
        is_read_only: LLVMBool,
    ) -> *mut u8 {
        let state = unsafe { &mut *(opaque as *mut MemoryState) };
        let name = section_name(name);
        let read_only = is_read_only != 0;
        let addr = state
            .allocator
            .allocate(size, alignment, SectionKind::Data, read_only);
        if addr.is_null() {
            return addr;
        }
        tracing::debug!(
            address = %format_hex(addr as u64),
            size,
            section_id,
            name = %name,
            read_only,
            "DAT data section"
        );

        let mut log = state.log.lock().unwrap();
        log.records.push(SectionRecord {
            kind: SectionKind::Data,
            address: addr as usize,
            size,
            alignment,
            section_id,
            name: name.clone(),
            read_only,
        });

        if name == ASAN_GLOBALS_SECTION {
            let bracket = AsanGlobalsBracket {
                start: addr as usize,
                end: addr as usize + size,
            };
            log.asan_globals = Some(bracket);
            drop(log);

            // The bracket symbols must be mapped before relocation
            // resolution, which runs later in the same finalize pass.
            let engine = state.engine.get();
            if engine.is_null() {
                tracing::debug!("asan_globals seen before engine registration");
            } else {
                if let Some(start) = state.bracket_start {
                    unsafe {
                        LLVMAddGlobalMapping(engine, start, bracket.start as *mut c_void);
                    }
                }
                if let Some(stop) = state.bracket_stop {
                    unsafe {
                        LLVMAddGlobalMapping(engine, stop, bracket.end as *mut c_void);
                    }
                }
                tracing::debug!(
                    start = %format_hex(bracket.start as u64),
                    end = %format_hex(bracket.end as u64),
                    "mapped asan_globals bracket"
                );
            }
        }
        addr
    }

    extern "C" fn finalize_memory(opaque: *mut c_void, _err_msg: *mut *mut c_char) -> LLVMBool {
        let state = unsafe { &mut *(opaque as *mut MemoryState) };
        let errors = state.allocator.apply_protections();
        let mut log = state.log.lock().unwrap();
        log.finalized = true;
        for error in &errors {
            tracing::error!(%error, "section finalize");
        }
        log.finalize_errors.extend(errors);
        // Reporting failure here would make MCJIT abort the process; errors
        // are surfaced through the log instead.
        0
    }

    extern "C" fn destroy(opaque: *mut c_void) {
        if !opaque.is_null() {
            drop(unsafe { Box::from_raw(opaque as *mut MemoryState) });
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_allocations_are_page_aligned() {
            let mut allocator = SectionAllocator::new();
            let a = allocator.allocate(10, 16, SectionKind::Code, false);
            let b = allocator.allocate(5000, 16, SectionKind::Data, true);
            assert!(!a.is_null());
            assert!(!b.is_null());
            assert_eq!(a as usize % allocator.page_size, 0);
            assert_eq!(b as usize % allocator.page_size, 0);
        }

        #[test]
        fn test_allocated_memory_is_writable() {
            let mut allocator = SectionAllocator::new();
            let addr = allocator.allocate(64, 8, SectionKind::Data, false);
            assert!(!addr.is_null());
            unsafe {
                std::ptr::write_bytes(addr, 0xAB, 64);
                assert_eq!(*addr, 0xAB);
            }
        }

        #[test]
        fn test_apply_protections_succeeds() {
            let mut allocator = SectionAllocator::new();
            allocator.allocate(128, 16, SectionKind::Code, false);
            allocator.allocate(128, 16, SectionKind::Data, true);
            allocator.allocate(128, 16, SectionKind::Data, false);
            assert!(allocator.apply_protections().is_empty());
        }

        #[test]
        fn test_oversized_alignment_is_rejected() {
            let mut allocator = SectionAllocator::new();
            let addr = allocator.allocate(16, (allocator.page_size * 2) as u32, SectionKind::Code, false);
            assert!(addr.is_null());
        }
    }
}
