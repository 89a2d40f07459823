use log::debug;
use sieve::disassembler::Disassembler;
use sieve::operand::CodeView;
use sieve::{Binary, Registry};
use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut show_hex = false;
    let mut filename = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-x" => show_hex = true,
            "-h" | "--help" => {
                eprintln!("Usage: {} [options] <binary-file>", args[0]);
                eprintln!("\nOptions:");
                eprintln!("  -x    Also print a hex dump of the code");
                eprintln!("  -h    Show this help message");
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                filename = Some(arg.to_string());
                break;
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let filename = filename.unwrap_or_else(|| {
        eprintln!("Usage: {} [options] <binary-file>", args[0]);
        eprintln!("Try '{} -h' for help", args[0]);
        std::process::exit(1);
    });

    let binary = Binary::load(&filename)?;
    debug!("Loaded {} bytes of code from {}", binary.len(), filename);

    let registry = Registry::standard()?;
    let view = CodeView::link(&binary, &registry)?;
    print!("{}", Disassembler::new(&view).dump());

    if show_hex {
        println!();
        for (row, chunk) in binary.code().chunks(16).enumerate() {
            let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            println!("{:08x}: {}", row * 16, bytes.join(" "));
        }
    }
    Ok(())
}
