use std::env;
use std::process;

// Stand-in llvm-config for building against a prebuilt LLVM without one.
// Point LLVM_SYS_180_PREFIX at this binary's output via KILN_LLVM_PREFIX.
fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: llvm-config <flag>");
        process::exit(1);
    }

    let prefix = env::var("KILN_LLVM_PREFIX").unwrap_or_else(|_| "/usr/lib/llvm-18".to_string());

    for arg in &args[1..] {
        match arg.as_str() {
            "--version" => {
                println!("18.1.8");
                return;
            }
            "--prefix" => {
                println!("{}", prefix);
                return;
            }
            "--bindir" => {
                println!("{}/bin", prefix);
                return;
            }
            "--includedir" => {
                println!("{}/include", prefix);
                return;
            }
            "--libdir" => {
                println!("{}/lib", prefix);
                return;
            }
            "--cmakedir" => {
                println!("{}/lib/cmake/llvm", prefix);
                return;
            }
            "--cxxflags" => {
                println!("-I{}/include -std=c++17 -fno-exceptions -funwind-tables -fno-rtti", prefix);
                return;
            }
            "--ldflags" => {
                println!("-L{}/lib", prefix);
                return;
            }
            "--libs" => {
                // Minimal output works when linking the monolithic dylib
                println!("-lLLVM-18");
                return;
            }
            "--system-libs" => {
                println!();
                return;
            }
            "--link-static" => {
                println!("false");
                return;
            }
            "--link-shared" => {
                println!("true");
                return;
            }
            _ => {}
        }
    }
}
