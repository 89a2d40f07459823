// Binary files, linking and the disassembler

use std::env;
use std::fs;
use std::path::PathBuf;

use sieve::compiler::{Argument, CodeGenerator, Command, Script};
use sieve::config::TraceConfig;
use sieve::disassembler::{Disassembler, DumpEnv};
use sieve::interpreter::ExecStatus;
use sieve::operand::{CodeView, VariableRef};
use sieve::operation::read_operation;
use sieve::runtime::RuntimeEnv;
use sieve::variables::MemoryStorage;
use sieve::{Binary, BinaryError, ErrorHandler, Interpreter, Registry, SieveConfig};
use test_log::test;

fn list(items: &[&str]) -> Argument {
    Argument::StringList(items.iter().map(|s| s.to_string()).collect())
}

fn sample_script() -> Script {
    let mut cond = Command::new("if", vec![]);
    cond.test = Some(Box::new(Command::new(
        "hasflag",
        vec![
            Argument::MatchType(sieve::matching::MatchType::Is),
            Argument::Variable(VariableRef { storage: 0, slot: 1 }),
            list(&["\\Seen"]),
        ],
    )));
    let mut errors = Command::new("if", vec![]);
    errors.test = Some(Box::new(Command::new(
        "test_error",
        vec![
            Argument::Tag {
                name: "index".to_string(),
                value: Some(Box::new(Argument::Number(1))),
            },
            Argument::String("x".to_string()),
        ],
    )));

    Script {
        commands: vec![
            Command::new("setflag", vec![list(&["\\Seen", "$Work"])]),
            Command::new(
                "addflag",
                vec![Argument::Variable(VariableRef { storage: 0, slot: 1 }), list(&["a"])],
            ),
            cond,
            errors,
            Command::new("removeflag", vec![Argument::String("$Work".to_string())]),
            Command::new(
                "keep",
                vec![Argument::Tag {
                    name: "flags".to_string(),
                    value: Some(Box::new(list(&["\\Flagged"]))),
                }],
            ),
            Command::new("stop", vec![]),
        ],
    }
}

fn temp_path(name: &str) -> PathBuf {
    let mut path = env::temp_dir();
    path.push(format!("sieve-{}-{}", std::process::id(), name));
    path
}

#[test]
fn saved_binary_loads_and_runs() {
    let registry = Registry::standard().unwrap();
    let binary = CodeGenerator::new(&registry).compile(&sample_script()).unwrap();

    let path = temp_path("roundtrip.svbin");
    binary.save(&path).unwrap();
    let loaded = Binary::load(&path).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(loaded, binary);

    let mut ehandler = ErrorHandler::new();
    let mut interp =
        Interpreter::new(&loaded, &registry, &mut ehandler, &SieveConfig::default()).unwrap();
    assert_eq!(interp.run(), ExecStatus::Ok);
    assert_eq!(interp.result().actions().len(), 1);
}

#[test]
fn damaged_files_are_rejected() {
    let registry = Registry::standard().unwrap();
    let binary = CodeGenerator::new(&registry).compile(&sample_script()).unwrap();
    let bytes = binary.to_bytes();

    let mut bad_magic = bytes.clone();
    bad_magic[0] = b'X';
    assert_eq!(Binary::from_bytes(&bad_magic), Err(BinaryError::BadMagic));

    let mut bad_version = bytes.clone();
    bad_version[5] = 9;
    assert_eq!(
        Binary::from_bytes(&bad_version),
        Err(BinaryError::UnsupportedVersion(9))
    );

    assert!(matches!(
        Binary::from_bytes(&bytes[..bytes.len() - 1]),
        Err(BinaryError::Truncated("code"))
    ));

    assert!(matches!(
        Binary::load(temp_path("missing.svbin")),
        Err(BinaryError::Io(_))
    ));
}

#[test]
fn linking_needs_every_extension() {
    let registry = Registry::standard().unwrap();
    let binary = CodeGenerator::new(&registry).compile(&sample_script()).unwrap();
    assert_eq!(
        binary.extensions(),
        &["imap4flags".to_string(), "testsuite".to_string()]
    );

    // A core-only registry cannot run it
    let core = Registry::new();
    let mut ehandler = ErrorHandler::new();
    let err = Interpreter::new(&binary, &core, &mut ehandler, &SieveConfig::default())
        .err()
        .unwrap();
    assert_eq!(err, BinaryError::UnknownExtension("imap4flags".to_string()));
    assert!(CodeView::link(&binary, &core).is_err());
}

#[test]
fn dump_and_execute_agree_on_record_boundaries() {
    let registry = Registry::standard().unwrap();
    let binary = CodeGenerator::new(&registry).compile(&sample_script()).unwrap();
    let view = CodeView::link(&binary, &registry).unwrap();

    let mut ehandler = ErrorHandler::new();
    let mut env = RuntimeEnv::new(view.clone(), &mut ehandler, TraceConfig::default());
    env.add_storage(Box::new(MemoryStorage::new(4, 64)));

    let mut address = 0;
    let mut records = 0;
    while address < view.len() {
        let op = read_operation(&view, &mut address).unwrap();

        let mut dumped = address;
        let mut denv = DumpEnv::new(&view);
        assert!((op.def.dump)(&mut denv, &mut dumped), "{}", op.def.mnemonic);

        // Both `if` blocks are empty, so every jump lands on the next record
        let mut executed = address;
        let status = (op.def.execute)(&mut env, &mut executed);
        assert_eq!(status, ExecStatus::Ok, "{}", op.def.mnemonic);
        assert_eq!(dumped, executed, "{} at {:08x}", op.def.mnemonic, op.address);

        address = dumped;
        records += 1;
    }
    assert_eq!(address, view.len());
    assert_eq!(records, 9);

    let dump = Disassembler::new(&view).dump();
    assert!(!dump.contains("corrupt"));
    assert_eq!(dump.lines().filter(|l| l.contains("variable: VAR $0:1")).count(), 2);
}
