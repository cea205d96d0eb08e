//! End-to-end instrumentation tests for kiln-sanitizer.

use inkwell::values::InstructionOpcode;
use kiln_ir::{verify, Loader};
use kiln_sanitizer::{dump, instrument, SanitizerConfig, ASAN_CTOR_NAME};

const STORE_IR: &str = r#"
@counter = global i32 0

define void @bump() {
entry:
  %v = load i32, ptr @counter
  %n = add i32 %v, 1
  store i32 %n, ptr @counter
  ret void
}
"#;

/// Instrumentation creates the sanitizer module constructor and the module
/// still verifies.
#[test]
fn test_instrument_creates_ctor() {
    let loader = Loader::new();
    let module = loader.load_ir_str(STORE_IR, "store").expect("parse");

    let config = SanitizerConfig {
        neutralize_ctor: false,
        ..Default::default()
    };
    instrument(&module, &config).expect("instrumentation should succeed");

    assert!(module.get_function(ASAN_CTOR_NAME).is_some());
    verify(&module).expect("instrumented module should verify");
}

/// Neutralizing leaves the constructor with a lone return.
#[test]
fn test_neutralized_ctor_is_bare_return() {
    let loader = Loader::new();
    let module = loader.load_ir_str(STORE_IR, "store").expect("parse");

    instrument(&module, &SanitizerConfig::default()).expect("instrumentation should succeed");

    let ctor = module
        .get_function(ASAN_CTOR_NAME)
        .expect("ctor should exist");
    let entry = ctor.get_first_basic_block().expect("ctor entry block");
    let first = entry
        .get_first_instruction()
        .expect("ctor should keep its terminator");
    assert_eq!(first.get_opcode(), InstructionOpcode::Return);
    assert!(first.get_next_instruction().is_none());

    verify(&module).expect("neutralized module should verify");
}

/// The instrumented module dumps as textual IR containing sanitizer symbols.
#[test]
fn test_dump_instrumented_ir() {
    let loader = Loader::new();
    let module = loader.load_ir_str(STORE_IR, "store").expect("parse");
    instrument(&module, &SanitizerConfig::default()).expect("instrumentation should succeed");

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.asan.ll");
    dump(&module, &path).expect("dump should succeed");

    let text = std::fs::read_to_string(&path).expect("read dump");
    assert!(text.contains("asan"), "dump should mention sanitizer symbols");
}
