//! MCJIT engine construction and symbol resolution.

use crate::bindings::HostBindings;
use crate::entry::{self, EntrySpec, EntryValue};
use crate::memory::SharedSectionLog;
use crate::report::{self, SectionReport};
use crate::runtime;
use inkwell::module::Module;
use inkwell::targets::{InitializationConfig, Target};
use inkwell::values::AsValueRef;
use kiln_base::utils::format_hex;
use kiln_base::{Error, Result};
use llvm_sys::core::LLVMDisposeMessage;
use llvm_sys::execution_engine::{
    LLVMAddGlobalMapping, LLVMCreateMCJITCompilerForModule, LLVMDisposeExecutionEngine,
    LLVMExecutionEngineRef, LLVMGetFunctionAddress, LLVMInitializeMCJITCompilerOptions,
    LLVMLinkInMCJIT, LLVMMCJITCompilerOptions, LLVMMCJITMemoryManagerRef,
    LLVMRunStaticConstructors, LLVMRunStaticDestructors,
};
use llvm_sys::prelude::LLVMValueRef;
use once_cell::sync::Lazy;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::os::raw::{c_char, c_void};
use std::path::PathBuf;

/// Names of the section-bracket symbols the sanitizer pass references.
const ASAN_BRACKET_START: &str = "__start_asan_globals";
const ASAN_BRACKET_STOP: &str = "__stop_asan_globals";

static LLVM_INIT: Lazy<std::result::Result<(), String>> = Lazy::new(|| {
    Target::initialize_native(&InitializationConfig::default())?;
    unsafe { LLVMLinkInMCJIT() };
    Ok(())
});

fn ensure_llvm_ready() -> Result<()> {
    LLVM_INIT.clone().map_err(Error::EngineBuild)
}

/// Optimization level for JIT code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    None,
    Less,
    Default,
    Aggressive,
}

impl From<OptLevel> for u32 {
    fn from(level: OptLevel) -> Self {
        match level {
            OptLevel::None => 0,
            OptLevel::Less => 1,
            OptLevel::Default => 2,
            OptLevel::Aggressive => 3,
        }
    }
}

impl From<u8> for OptLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => OptLevel::None,
            1 => OptLevel::Less,
            2 => OptLevel::Default,
            _ => OptLevel::Aggressive,
        }
    }
}

/// Configuration for engine construction.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Code generation optimization level.
    pub opt_level: OptLevel,
    /// Whether to install the observing section memory manager.
    pub section_hooks: bool,
    /// Host symbol bindings to install for declared symbols.
    pub bindings: HostBindings,
    /// Shared libraries to preload before construction.
    pub preload: Vec<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::Default,
            section_hooks: true,
            bindings: HostBindings::new(),
            preload: Vec::new(),
        }
    }
}

/// An MCJIT execution engine over a single module.
///
/// The engine owns the module it was built from; it must not outlive the
/// context the module was created in.
pub struct Engine<'ctx> {
    ee: LLVMExecutionEngineRef,
    log: Option<SharedSectionLog>,
    module_name: String,
    _context: PhantomData<&'ctx ()>,
}

impl<'ctx> Engine<'ctx> {
    /// Builds an MCJIT engine that takes ownership of the module.
    pub fn from_module(module: Module<'ctx>, options: EngineOptions) -> Result<Self> {
        ensure_llvm_ready()?;

        for lib in &options.preload {
            runtime::preload(lib)?;
        }

        let module_name = module.get_name().to_string_lossy().into_owned();

        // Binding targets have to be collected while we still hold the
        // module; the value refs stay valid once the engine owns it.
        let mut mappings: Vec<(String, LLVMValueRef, usize)> = Vec::new();
        for (name, address) in options.bindings.iter() {
            if let Some(function) = module.get_function(name) {
                mappings.push((name.clone(), function.as_value_ref(), *address));
            } else if let Some(global) = module.get_global(name) {
                mappings.push((name.clone(), global.as_value_ref(), *address));
            } else {
                tracing::debug!(symbol = %name, "binding skipped, not declared by module");
            }
        }

        let mut log: Option<SharedSectionLog> = None;
        let mut manager: LLVMMCJITMemoryManagerRef = std::ptr::null_mut();
        #[cfg(unix)]
        let mut state_ptr: *mut crate::memory::MemoryState = std::ptr::null_mut();

        if options.section_hooks {
            #[cfg(unix)]
            {
                let bracket_start = module
                    .get_global(ASAN_BRACKET_START)
                    .map(|g| g.as_value_ref());
                let bracket_stop = module
                    .get_global(ASAN_BRACKET_STOP)
                    .map(|g| g.as_value_ref());
                let shared: SharedSectionLog = Default::default();
                let state = Box::new(crate::memory::MemoryState::new(
                    shared.clone(),
                    bracket_start,
                    bracket_stop,
                ));
                let (mm, raw) = unsafe { crate::memory::create_manager(state) };
                manager = mm;
                state_ptr = raw;
                log = Some(shared);
            }
            #[cfg(not(unix))]
            tracing::warn!("section hooks unavailable on this platform, using default memory manager");
        }

        let module_ref = module.as_mut_ptr();
        // The engine takes ownership of the module; skipping the inkwell
        // drop avoids a double dispose.
        std::mem::forget(module);

        let mut ee: LLVMExecutionEngineRef = std::ptr::null_mut();
        let mut err_msg: *mut c_char = std::ptr::null_mut();
        let failed = unsafe {
            let mut opts: LLVMMCJITCompilerOptions = std::mem::zeroed();
            LLVMInitializeMCJITCompilerOptions(
                &mut opts,
                std::mem::size_of::<LLVMMCJITCompilerOptions>(),
            );
            opts.OptLevel = u32::from(options.opt_level);
            if !manager.is_null() {
                opts.MCJMM = manager;
            }
            LLVMCreateMCJITCompilerForModule(
                &mut ee,
                module_ref,
                &mut opts,
                std::mem::size_of::<LLVMMCJITCompilerOptions>(),
                &mut err_msg,
            )
        };
        if failed != 0 {
            return Err(Error::EngineBuild(unsafe { consume_message(err_msg) }));
        }

        #[cfg(unix)]
        if !state_ptr.is_null() {
            unsafe { (*state_ptr).set_engine(ee) };
        }

        let engine = Self {
            ee,
            log,
            module_name,
            _context: PhantomData,
        };

        for (name, value, address) in mappings {
            unsafe { LLVMAddGlobalMapping(engine.ee, value, address as *mut c_void) };
            tracing::debug!(
                symbol = %name,
                address = %format_hex(address as u64),
                "installed host binding"
            );
        }

        Ok(engine)
    }

    /// Resolves a function symbol to its JIT'd address.
    ///
    /// The first lookup finalizes the object: sections are emitted,
    /// relocated, and protected. Finalization failures surface here as
    /// `Error::Finalize`.
    pub fn resolve(&self, name: &str) -> Result<u64> {
        let cname =
            CString::new(name).map_err(|_| Error::SymbolNotFound(name.to_string()))?;
        let address = unsafe { LLVMGetFunctionAddress(self.ee, cname.as_ptr()) };
        self.check_finalize()?;
        if address == 0 {
            return Err(Error::SymbolNotFound(name.to_string()));
        }
        Ok(address)
    }

    /// Runs the module's static constructors, finalizing the object first
    /// if needed.
    pub fn run_static_constructors(&self) -> Result<()> {
        unsafe { LLVMRunStaticConstructors(self.ee) };
        self.check_finalize()
    }

    /// Runs the module's static destructors.
    pub fn run_static_destructors(&self) {
        unsafe { LLVMRunStaticDestructors(self.ee) };
    }

    /// Resolves the entry point and calls it with the given signature.
    pub fn invoke(&self, name: &str, spec: &EntrySpec) -> Result<EntryValue> {
        let address = self.resolve(name)?;
        tracing::info!(
            entry = name,
            address = %format_hex(address),
            "invoking entry point"
        );
        unsafe { entry::invoke(address, spec) }
    }

    /// Snapshot of the sections observed so far, if hooks are installed.
    pub fn section_report(&self) -> Option<SectionReport> {
        self.log
            .as_ref()
            .map(|log| SectionReport::from_log(&log.lock().unwrap(), &self.module_name))
    }

    /// Writes the `perf-<pid>.map` file from the observed code sections.
    pub fn write_perf_map(&self) -> Result<PathBuf> {
        let report = self.section_report().ok_or_else(|| {
            Error::Internal("perf map requires section hooks".to_string())
        })?;
        report::write_perf_map(&report)
    }

    fn check_finalize(&self) -> Result<()> {
        if let Some(log) = &self.log {
            let log = log.lock().unwrap();
            if let Some(first) = log.finalize_errors.first() {
                return Err(Error::Finalize(first.clone()));
            }
        }
        Ok(())
    }
}

impl Drop for Engine<'_> {
    fn drop(&mut self) {
        unsafe { LLVMDisposeExecutionEngine(self.ee) };
    }
}

unsafe fn consume_message(message: *mut c_char) -> String {
    if message.is_null() {
        return "unknown engine error".to_string();
    }
    let text = CStr::from_ptr(message).to_string_lossy().into_owned();
    LLVMDisposeMessage(message);
    text
}
