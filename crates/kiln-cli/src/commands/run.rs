//! Run command.

use crate::config::CliConfig;
use clap::Args;
use kiln_base::{Error, Result};
use kiln_engine::{Engine, EngineOptions, EntrySpec, EntryValue, HostBindings, SectionReport};
use kiln_ir::{source_file_name, verify, Loader};
use kiln_sanitizer::{dump, instrument, pipeline_for, SanitizerConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Args)]
pub struct RunArgs {
    /// Input module (.ll or .bc)
    #[arg(required = true)]
    pub input: PathBuf,

    /// Entry point symbol to invoke
    #[arg(short, long, default_value = "main")]
    pub entry: String,

    /// Entry signature: C main, unary u64 kernel, or no arguments
    #[arg(short, long, value_parser = ["main", "u64", "none"], default_value = "main")]
    pub signature: String,

    /// Arguments passed to a C-main entry (argv[1..])
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,

    /// Argument passed to a u64 entry
    #[arg(long, default_value = "0")]
    pub arg: u64,

    /// Instrument the module with the address sanitizer before running
    #[arg(long)]
    pub asan: bool,

    /// Keep the sanitizer module constructor intact
    #[arg(long)]
    pub keep_ctor: bool,

    /// Dump the module (after instrumentation) as textual IR
    #[arg(long)]
    pub dump: Option<PathBuf>,

    /// Optimization level (0-3)
    #[arg(short, long, default_value = "0")]
    pub opt: u8,

    /// Shared libraries to preload for symbol resolution
    #[arg(long)]
    pub preload: Vec<PathBuf>,

    /// Extra host bindings, NAME=HEXADDR
    #[arg(long)]
    pub bind: Vec<String>,

    /// Disable the observing section memory manager
    #[arg(long)]
    pub no_section_hooks: bool,

    /// Write a perf map for the JIT'd code sections
    #[arg(long)]
    pub perf_map: bool,

    /// Write a JSON run report to this file
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Skip running static constructors
    #[arg(long)]
    pub no_ctors: bool,
}

/// JSON run report written by `--profile`.
#[derive(Serialize)]
struct RunReport {
    module: String,
    entry: String,
    entry_address: String,
    elapsed_ms: f64,
    result: String,
    sections: Option<SectionReport>,
}

pub fn run(args: RunArgs) -> Result<i32> {
    let config = CliConfig::load()?;

    tracing::info!("loading module from {}", args.input.display());
    let loader = Loader::new();
    let module = loader.load_file(&args.input)?;
    verify(&module)?;

    let source = source_file_name(&module);
    if !source.is_empty() {
        tracing::info!(source = %source, "module loaded");
    }

    if args.asan {
        let sanitizer = SanitizerConfig {
            pipeline: pipeline_for(args.opt),
            neutralize_ctor: !args.keep_ctor,
            verify_after: true,
        };
        instrument(&module, &sanitizer)?;
    }
    if let Some(path) = &args.dump {
        dump(&module, path)?;
        tracing::info!("dumped IR to {}", path.display());
    }

    let mut bindings = if args.asan {
        HostBindings::sanitizer_defaults()
    } else {
        HostBindings::new()
    };
    for spec in &args.bind {
        let (name, address) = parse_bind(spec)?;
        bindings.bind(name, address);
    }

    let mut preload = config.preload.clone();
    if args.asan {
        if let Some(runtime) = &config.asan_runtime {
            kiln_engine::runtime::probe_sanitizer_runtime(runtime)?;
            preload.push(runtime.clone());
        } else {
            tracing::warn!(
                "no sanitizer runtime configured; set asan_runtime in the config or KILN_ASAN_RUNTIME"
            );
        }
    }
    preload.extend(args.preload.iter().cloned());

    let options = EngineOptions {
        opt_level: args.opt.into(),
        section_hooks: !args.no_section_hooks,
        bindings,
        preload,
    };
    let engine = Engine::from_module(module, options)?;

    // Resolve first so finalize failures surface before any code runs.
    let address = engine.resolve(&args.entry)?;
    if !args.no_ctors {
        engine.run_static_constructors()?;
    }

    let spec = entry_spec(&args)?;
    let start = Instant::now();
    let value = engine.invoke(&args.entry, &spec)?;
    let elapsed = start.elapsed();
    tracing::info!(entry = %args.entry, %value, ?elapsed, "entry returned");

    if args.perf_map {
        let path = engine.write_perf_map()?;
        println!("perf map: {}", path.display());
    }
    if let Some(path) = &args.profile {
        let report = RunReport {
            module: args.input.display().to_string(),
            entry: args.entry.clone(),
            entry_address: kiln_base::utils::format_hex(address),
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            result: value.to_string(),
            sections: engine.section_report(),
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| Error::Internal(format!("report serialization: {}", e)))?;
        std::fs::write(path, json)?;
        tracing::info!("wrote profile to {}", path.display());
    }

    if let EntryValue::Float(v) = value {
        println!("{} = {}", args.entry, v);
    }
    Ok(value.exit_code())
}

fn entry_spec(args: &RunArgs) -> Result<EntrySpec> {
    match args.signature.as_str() {
        "main" => {
            let mut argv = vec![args.input.display().to_string()];
            argv.extend(args.args.iter().cloned());
            Ok(EntrySpec::Main { argv })
        }
        "u64" => Ok(EntrySpec::UnaryU64 { arg: args.arg }),
        "none" => Ok(EntrySpec::NoArgs),
        other => Err(Error::Internal(format!("unknown signature: {}", other))),
    }
}

/// Parses a NAME=HEXADDR binding spec.
fn parse_bind(spec: &str) -> Result<(String, usize)> {
    let (name, addr) = spec
        .split_once('=')
        .ok_or_else(|| Error::Config(format!("invalid binding (want NAME=HEXADDR): {}", spec)))?;
    let digits = addr.trim_start_matches("0x");
    let address = usize::from_str_radix(digits, 16)
        .map_err(|e| Error::Config(format!("invalid binding address {}: {}", addr, e)))?;
    if name.is_empty() {
        return Err(Error::Config(format!("empty binding name: {}", spec)));
    }
    Ok((name.to_string(), address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bind() {
        let (name, addr) = parse_bind("printf=0x7f00beef").unwrap();
        assert_eq!(name, "printf");
        assert_eq!(addr, 0x7f00_beef);

        let (_, addr) = parse_bind("x=ff").unwrap();
        assert_eq!(addr, 0xff);

        assert!(parse_bind("no_equals").is_err());
        assert!(parse_bind("=0x1").is_err());
        assert!(parse_bind("x=zz").is_err());
    }

    #[test]
    fn test_entry_spec_shapes() {
        let mut args = RunArgs {
            input: PathBuf::from("pi.test.ll"),
            entry: "pi2".to_string(),
            signature: "u64".to_string(),
            args: vec![],
            arg: 10_000_000,
            asan: false,
            keep_ctor: false,
            dump: None,
            opt: 0,
            preload: vec![],
            bind: vec![],
            no_section_hooks: false,
            perf_map: false,
            profile: None,
            no_ctors: false,
        };

        match entry_spec(&args).unwrap() {
            EntrySpec::UnaryU64 { arg } => assert_eq!(arg, 10_000_000),
            other => panic!("expected UnaryU64, got {:?}", other),
        }

        args.signature = "main".to_string();
        args.args = vec!["10000000".to_string()];
        match entry_spec(&args).unwrap() {
            EntrySpec::Main { argv } => {
                assert_eq!(argv, vec!["pi.test.ll".to_string(), "10000000".to_string()]);
            }
            other => panic!("expected Main, got {:?}", other),
        }
    }
}
