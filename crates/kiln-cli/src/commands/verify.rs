//! Verify command.

use clap::Args;
use kiln_base::Result;
use kiln_ir::{source_file_name, verify, Loader};
use std::path::PathBuf;

#[derive(Args)]
pub struct VerifyArgs {
    /// Input module (.ll or .bc)
    #[arg(required = true)]
    pub input: PathBuf,
}

pub fn run(args: VerifyArgs) -> Result<i32> {
    let loader = Loader::new();
    let module = loader.load_file(&args.input)?;
    verify(&module)?;

    let functions = module.get_functions().count();
    let source = source_file_name(&module);
    if source.is_empty() {
        println!("{}: ok ({} functions)", args.input.display(), functions);
    } else {
        println!(
            "{}: ok ({} functions, source {})",
            args.input.display(),
            functions,
            source
        );
    }
    Ok(0)
}
