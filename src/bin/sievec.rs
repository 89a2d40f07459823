// sievec - compile a command tree into a Sieve binary
// The tree is the TOML output of the script parser and validator

use std::env;
use std::path::Path;
use std::process;

use log::info;
use sieve::compiler::{compile, Script};
use sieve::disassembler::Disassembler;
use sieve::operand::CodeView;
use sieve::{ErrorHandler, Registry};

fn print_usage(program: &str) {
    eprintln!("Usage: {} [options] <command-tree.toml>", program);
    eprintln!("\nOptions:");
    eprintln!("  -o, --output <file>  Write the binary here (default: input name with .svbin)");
    eprintln!("  -d, --dump           Print the disassembly of the generated binary");
    eprintln!("  -h, --help           Show this help message");
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        process::exit(1);
    }

    let mut input_file = "";
    let mut output_file = String::new();
    let mut dump = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-o" | "--output" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: -o requires a filename");
                    process::exit(1);
                }
                output_file = args[i + 1].clone();
                i += 2;
            }
            "-d" | "--dump" => {
                dump = true;
                i += 1;
            }
            "-h" | "--help" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            arg if arg.starts_with('-') => {
                eprintln!("Error: Unknown option '{}'", arg);
                print_usage(&args[0]);
                process::exit(1);
            }
            _ => {
                if !input_file.is_empty() {
                    eprintln!("Error: Multiple input files specified");
                    process::exit(1);
                }
                input_file = &args[i];
                i += 1;
            }
        }
    }

    if input_file.is_empty() {
        eprintln!("Error: No input file specified");
        print_usage(&args[0]);
        process::exit(1);
    }

    if output_file.is_empty() {
        let base_name = Path::new(input_file).file_stem().unwrap_or_else(|| {
            eprintln!("Error: Invalid input filename");
            process::exit(1);
        });
        output_file = format!("{}.svbin", base_name.to_string_lossy());
    }

    let script = match Script::load(input_file) {
        Ok(script) => script,
        Err(e) => {
            eprintln!("Error: Cannot read '{}': {}", input_file, e);
            process::exit(1);
        }
    };

    let registry = match Registry::standard() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let mut ehandler = ErrorHandler::new();
    let binary = match compile(&script, &registry, &mut ehandler) {
        Ok(binary) => binary,
        Err(_) => {
            eprint!("{}", ehandler.render());
            eprintln!("Compilation of '{}' failed", input_file);
            process::exit(1);
        }
    };

    if let Err(e) = binary.save(&output_file) {
        eprintln!("Error: Cannot write '{}': {}", output_file, e);
        process::exit(1);
    }
    info!(
        "Compiled {} into {} ({} bytes of code)",
        input_file,
        output_file,
        binary.len()
    );

    if dump {
        match CodeView::link(&binary, &registry) {
            Ok(view) => print!("{}", Disassembler::new(&view).dump()),
            Err(e) => eprintln!("Error: {}", e),
        }
    }
}
