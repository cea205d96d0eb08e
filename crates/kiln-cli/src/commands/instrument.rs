//! Instrument command.

use clap::Args;
use kiln_base::Result;
use kiln_ir::{verify, Loader};
use kiln_sanitizer::{dump, instrument, pipeline_for, SanitizerConfig};
use std::path::PathBuf;

#[derive(Args)]
pub struct InstrumentArgs {
    /// Input module (.ll or .bc)
    #[arg(required = true)]
    pub input: PathBuf,

    /// Output file for the instrumented IR
    #[arg(short, long)]
    pub output: PathBuf,

    /// Optimization pipeline level to run before the sanitizer (0-3)
    #[arg(long, default_value = "0")]
    pub opt: u8,

    /// Keep the sanitizer module constructor intact
    #[arg(long)]
    pub keep_ctor: bool,
}

pub fn run(args: InstrumentArgs) -> Result<i32> {
    tracing::info!("loading module from {}", args.input.display());

    let loader = Loader::new();
    let module = loader.load_file(&args.input)?;
    verify(&module)?;

    let config = SanitizerConfig {
        pipeline: pipeline_for(args.opt),
        neutralize_ctor: !args.keep_ctor,
        verify_after: true,
    };
    instrument(&module, &config)?;

    dump(&module, &args.output)?;
    println!("wrote {}", args.output.display());
    Ok(0)
}
