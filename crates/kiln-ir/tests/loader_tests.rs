//! End-to-end loading tests for kiln-ir.

use kiln_base::Error;
use kiln_ir::{source_file_name, verify, Loader};
use std::io::Write;

const ADD_IR: &str = r#"
source_filename = "add.c"

define i32 @add(i32 %a, i32 %b) {
entry:
  %sum = add i32 %a, %b
  ret i32 %sum
}
"#;

/// A textual IR file loads, verifies, and reports its source filename.
#[test]
fn test_load_textual_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("add.ll");
    std::fs::write(&path, ADD_IR).expect("write fixture");

    let loader = Loader::new();
    let module = loader.load_file(&path).expect("load should succeed");
    verify(&module).expect("verify should succeed");
    assert_eq!(source_file_name(&module), "add.c");
    assert!(module.get_function("add").is_some());
}

/// A missing input file surfaces as an I/O error, not a parse error.
#[test]
fn test_missing_file_is_io_error() {
    let loader = Loader::new();
    let err = loader
        .load_file(std::path::Path::new("/nonexistent/kiln/input.ll"))
        .expect_err("missing file should fail");
    match err {
        Error::Io(_) => (),
        other => panic!("expected Io, got {:?}", other),
    }
}

/// A file with broken IR reports the LLVM diagnostic.
#[test]
fn test_parse_failure_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.ll");
    let mut f = std::fs::File::create(&path).expect("create fixture");
    writeln!(f, "define i32 @f( {{").expect("write fixture");
    drop(f);

    let loader = Loader::new();
    let err = loader.load_file(&path).expect_err("broken IR should fail");
    match err {
        Error::Parse(msg) => assert!(!msg.is_empty()),
        other => panic!("expected Parse, got {:?}", other),
    }
}
