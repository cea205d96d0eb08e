//! kiln CLI - Load, verify, instrument, and JIT-execute LLVM IR modules.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "LLVM IR JIT harness with sanitizer instrumentation", long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// JIT-compile a module and invoke an entry point
    Run(commands::run::RunArgs),
    /// Instrument a module with the address sanitizer and dump the IR
    Instrument(commands::instrument::InstrumentArgs),
    /// Load and verify a module
    Verify(commands::verify::VerifyArgs),
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let outcome = match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Instrument(args) => commands::instrument::run(args),
        Commands::Verify(args) => commands::verify::run(args),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(err.exit_code());
        }
    }
}
