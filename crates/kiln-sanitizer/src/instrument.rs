//! Address-sanitizer pass pipeline over loaded modules.

use inkwell::attributes::{Attribute, AttributeLoc};
use inkwell::module::Module;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{CodeModel, InitializationConfig, RelocMode, Target, TargetMachine};
use inkwell::values::InstructionOpcode;
use inkwell::OptimizationLevel;
use kiln_base::{Error, Result};
use std::path::Path;

/// Name of the module constructor the sanitizer pass emits.
pub const ASAN_CTOR_NAME: &str = "asan.module_ctor";

/// Configuration for sanitizer instrumentation.
#[derive(Debug, Clone)]
pub struct SanitizerConfig {
    /// Pass pipeline to run, in `opt -passes` syntax.
    pub pipeline: String,
    /// Whether to strip `asan.module_ctor` down to a bare return after
    /// instrumentation. A preloaded sanitizer runtime initializes itself at
    /// dlopen time, so the ctor's init calls are redundant under the JIT.
    pub neutralize_ctor: bool,
    /// Whether to re-verify the module after the pipeline runs.
    pub verify_after: bool,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            pipeline: "asan".to_string(),
            neutralize_ctor: true,
            verify_after: true,
        }
    }
}

/// Builds the pipeline string for an optimization level.
#[must_use]
pub fn pipeline_for(opt_level: u8) -> String {
    if opt_level == 0 {
        "asan".to_string()
    } else {
        format!("default<O{}>,asan", opt_level.min(3))
    }
}

/// Instruments a module with the address-sanitizer pipeline.
///
/// Every defined function is tagged `sanitize_address` first; the sanitizer
/// function pass only instruments tagged functions.
pub fn instrument(module: &Module<'_>, config: &SanitizerConfig) -> Result<()> {
    let ctx = module.get_context();
    let kind_id = Attribute::get_named_enum_kind_id("sanitize_address");
    let attr = ctx.create_enum_attribute(kind_id, 0);

    let mut tagged = 0usize;
    for function in module.get_functions() {
        if function.count_basic_blocks() == 0 {
            continue;
        }
        function.add_attribute(AttributeLoc::Function, attr);
        tagged += 1;
    }
    tracing::debug!(tagged, "tagged functions with sanitize_address");

    let machine = native_target_machine()?;
    module
        .run_passes(&config.pipeline, &machine, PassBuilderOptions::create())
        .map_err(|e| Error::Instrument(e.to_string()))?;
    tracing::info!(pipeline = %config.pipeline, "ran sanitizer pipeline");

    if config.neutralize_ctor {
        neutralize_module_ctor(module);
    }

    if config.verify_after {
        module.verify().map_err(|e| Error::Verify(e.to_string()))?;
    }

    Ok(())
}

/// Strips `asan.module_ctor` down to a bare return.
///
/// Returns false if the module has no such constructor.
pub fn neutralize_module_ctor(module: &Module<'_>) -> bool {
    let Some(ctor) = module.get_function(ASAN_CTOR_NAME) else {
        return false;
    };
    let Some(entry) = ctor.get_first_basic_block() else {
        return false;
    };

    let mut removed = 0usize;
    let mut current = entry.get_first_instruction();
    while let Some(instruction) = current {
        if instruction.get_opcode() == InstructionOpcode::Return {
            break;
        }
        let next = instruction.get_next_instruction();
        instruction.erase_from_basic_block();
        removed += 1;
        current = next;
    }
    tracing::debug!(removed, "neutralized {}", ASAN_CTOR_NAME);
    true
}

/// Writes the module as textual IR.
pub fn dump(module: &Module<'_>, path: &Path) -> Result<()> {
    module
        .print_to_file(path)
        .map_err(|e| Error::Internal(format!("failed to write IR dump: {}", e)))
}

fn native_target_machine() -> Result<TargetMachine> {
    Target::initialize_native(&InitializationConfig::default())
        .map_err(Error::Instrument)?;

    let triple = TargetMachine::get_default_triple();
    let target = Target::from_triple(&triple).map_err(|e| Error::Instrument(e.to_string()))?;
    target
        .create_target_machine(
            &triple,
            TargetMachine::get_host_cpu_name().to_str().unwrap_or(""),
            TargetMachine::get_host_cpu_features().to_str().unwrap_or(""),
            OptimizationLevel::None,
            RelocMode::Default,
            CodeModel::JITDefault,
        )
        .ok_or_else(|| Error::Instrument("no native target machine available".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_for() {
        assert_eq!(pipeline_for(0), "asan");
        assert_eq!(pipeline_for(2), "default<O2>,asan");
        assert_eq!(pipeline_for(9), "default<O3>,asan");
    }

    #[test]
    fn test_default_config() {
        let config = SanitizerConfig::default();
        assert_eq!(config.pipeline, "asan");
        assert!(config.neutralize_ctor);
        assert!(config.verify_after);
    }
}
