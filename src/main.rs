use log::{debug, info};
use sieve::actions::{ActionHandler, SideEffect};
use sieve::config::TraceLevel;
use sieve::plugins::flags::FlagSet;
use sieve::plugins::imap4flags::{current_flags, FlagContext};
use sieve::{Binary, ErrorHandler, ExecStatus, Interpreter, Registry, SieveConfig};
use std::env;
use std::process;

/// Prints every action instead of delivering anything
struct PrintingHandler {
    mailbox: String,
    fail_keep: bool,
}

impl ActionHandler for PrintingHandler {
    fn keep(&mut self, side_effects: &[SideEffect]) -> Result<(), String> {
        if self.fail_keep {
            return Err(format!("mailbox '{}' refused the message", self.mailbox));
        }
        let mut line = format!("store message in folder: {}", self.mailbox);
        for side_effect in side_effects {
            line.push_str(&format!(" {}", side_effect));
        }
        println!("{}", line);
        Ok(())
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [options] <binary-file>", program);
    eprintln!("\nOptions:");
    eprintln!("  -c, --config <file>    Read configuration from a TOML file");
    eprintln!("  -t, --trace <level>    Trace level: none, actions, commands, tests, matching");
    eprintln!("  -f, --flags <flags>    Initial value of the internal flag variable");
    eprintln!("  -v, --var <slot=value> Initial value of a variable slot (repeatable)");
    eprintln!("  -m, --mailbox <name>   Folder used by keep (default INBOX)");
    eprintln!("      --fail-keep        Make every keep fail");
    eprintln!("  -h, --help             Show this help message");
}

fn parse_trace_level(name: &str) -> Option<TraceLevel> {
    match name {
        "none" => Some(TraceLevel::None),
        "actions" => Some(TraceLevel::Actions),
        "commands" => Some(TraceLevel::Commands),
        "tests" => Some(TraceLevel::Tests),
        "matching" => Some(TraceLevel::Matching),
        _ => None,
    }
}

fn option_value<'a>(args: &'a [String], i: usize) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value.as_str(),
        None => {
            eprintln!("Error: {} requires a value", args[i]);
            process::exit(1);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        process::exit(1);
    }

    let mut binary_path = None;
    let mut config_path = None;
    let mut trace_level = None;
    let mut initial_flags = None;
    let mut variables: Vec<(u32, String)> = Vec::new();
    let mut handler = PrintingHandler {
        mailbox: "INBOX".to_string(),
        fail_keep: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                config_path = Some(option_value(&args, i).to_string());
                i += 2;
            }
            "-t" | "--trace" => {
                let name = option_value(&args, i);
                trace_level = Some(parse_trace_level(name).unwrap_or_else(|| {
                    eprintln!("Error: Unknown trace level '{}'", name);
                    process::exit(1);
                }));
                i += 2;
            }
            "-f" | "--flags" => {
                initial_flags = Some(option_value(&args, i).to_string());
                i += 2;
            }
            "-v" | "--var" => {
                let assignment = option_value(&args, i);
                let parsed = assignment
                    .split_once('=')
                    .and_then(|(slot, value)| Some((slot.parse::<u32>().ok()?, value.to_string())));
                match parsed {
                    Some(var) => variables.push(var),
                    None => {
                        eprintln!("Error: Expected <slot>=<value>, got '{}'", assignment);
                        process::exit(1);
                    }
                }
                i += 2;
            }
            "-m" | "--mailbox" => {
                handler.mailbox = option_value(&args, i).to_string();
                i += 2;
            }
            "--fail-keep" => {
                handler.fail_keep = true;
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
                if binary_path.is_some() {
                    eprintln!("Error: Multiple binary files specified");
                    process::exit(1);
                }
                binary_path = Some(args[i].clone());
                i += 1;
            }
        }
    }

    let binary_path = binary_path.unwrap_or_else(|| {
        eprintln!("Error: No binary file specified");
        process::exit(1);
    });

    let mut config = match &config_path {
        Some(path) => SieveConfig::load(path)?,
        None => SieveConfig::default(),
    };
    if let Some(level) = trace_level {
        config.trace.level = level;
    }
    debug!("Configuration: {:?}", config);

    let binary = Binary::load(&binary_path)?;
    info!("Loaded {} ({} bytes of code)", binary_path, binary.len());

    let registry = Registry::standard()?;
    let mut ehandler = ErrorHandler::with_max_errors(config.diagnostics.max_errors);

    let (status, flags, actions) = {
        let mut interp = Interpreter::new(&binary, &registry, &mut ehandler, &config)?;
        if let Some(flags) = &initial_flags {
            interp.env_mut().extension_context::<FlagContext>().flags = FlagSet::parse(flags);
        }
        for (slot, value) in &variables {
            let stored = interp
                .storage_mut(0)
                .map_or(false, |storage| storage.set(*slot, value));
            if !stored {
                eprintln!("Error: Variable slot {} is out of range", slot);
                process::exit(1);
            }
        }

        let status = interp.execute(&mut handler);
        let actions: Vec<String> = interp
            .result()
            .actions()
            .iter()
            .map(|a| a.to_string())
            .collect();
        (status, current_flags(interp.env()), actions)
    };

    println!("status: {} ({})", status, status.code());
    println!("flags: {}", flags);
    for action in &actions {
        println!("action: {}", action);
    }
    if actions.is_empty() {
        println!("action: keep (implicit)");
    }
    print!("{}", ehandler.render());

    if status != ExecStatus::Ok {
        process::exit(1);
    }
    Ok(())
}
