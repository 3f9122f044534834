mod bytecode;
mod frontend;
mod lang;
mod repl;
mod runtime;

use std::{env, fs, io, path::Path, process};

use crate::bytecode::compile::{Bytecode, Compiler};
use crate::bytecode::{disasm, image};
use crate::frontend::lexer::Lexer;
use crate::frontend::parser::Parser;
use crate::lang::ast::Program;
use crate::lang::object::{Env, Object};
use crate::runtime::eval::Evaluator;
use crate::runtime::vm::Vm;

fn main() {
    let args: Vec<String> = env::args().collect();

    let disassemble = args.contains(&"--disasm".to_string());
    let tree_walk = args.contains(&"--eval".to_string());

    let emit_pos = args.iter().position(|a| a == "--emit");
    let emit_target = emit_pos.and_then(|i| args.get(i + 1)).cloned();
    if emit_pos.is_some() && emit_target.is_none() {
        eprintln!("Error: --emit needs an output file");
        process::exit(1);
    }

    // first non-flag argument (skipping the --emit value) is the filename
    let filename = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(i, a)| !a.starts_with('-') && Some(*i) != emit_pos.map(|p| p + 1))
        .map(|(_, a)| a.clone());

    match filename {
        Some(filename) => run_file(&filename, disassemble, tree_walk, emit_target.as_deref()),
        None => {
            if args.len() == 1 {
                let stdin = io::stdin();
                if let Err(e) = repl::start(stdin.lock(), &mut io::stdout()) {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            } else {
                print_usage();
            }
        }
    }
}

fn print_usage() {
    println!("WICK - a small imperative scripting language");
    println!();
    println!("Usage:");
    println!("  wick                          Start interactive REPL");
    println!("  wick <file.wk>                Compile and run a program");
    println!("  wick <file.wkc>               Run a compiled bytecode image");
    println!("  wick --disasm <file>          Print disassembly before running");
    println!("  wick --eval <file.wk>         Run using the tree-walking evaluator");
    println!("  wick --emit <out.wkc> <file.wk>  Compile to a bytecode image");
}

fn run_file(filename: &str, disassemble: bool, tree_walk: bool, emit_target: Option<&str>) {
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some("wk") => {
            let program = parse_file(filename);
            if tree_walk {
                run_tree_walk(&program);
                return;
            }

            let bytecode = compile_program(&program);
            if disassemble {
                print_disassembly(&bytecode);
            }
            match emit_target {
                Some(target) => emit_image(&bytecode, target),
                None => run_bytecode(bytecode),
            }
        }
        Some("wkc") => {
            let bytecode = load_image(filename);
            if disassemble {
                print_disassembly(&bytecode);
            }
            run_bytecode(bytecode);
        }
        _ => {
            eprintln!("Error: expected a .wk or .wkc file, got {}", filename);
            process::exit(1);
        }
    }
}

fn parse_file(filename: &str) -> Program {
    let source = match fs::read_to_string(filename) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", filename, e);
            process::exit(1);
        }
    };

    let tokens = match Lexer::new(&source).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            process::exit(1);
        }
    };

    match Parser::new(tokens).parse_program() {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn compile_program(program: &Program) -> Bytecode {
    let mut compiler = Compiler::new();
    if let Err(e) = compiler.compile(program) {
        eprintln!("{}", e);
        process::exit(1);
    }
    compiler.bytecode()
}

fn run_bytecode(bytecode: Bytecode) {
    let mut vm = Vm::new(bytecode);
    if let Err(e) = vm.run() {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn run_tree_walk(program: &Program) {
    let result = Evaluator::new().eval_program(program, &Env::new());
    if result.is_error() {
        eprintln!("runtime error: {}", result);
        process::exit(1);
    }
}

fn print_disassembly(bytecode: &Bytecode) {
    println!("=== MAIN ===");
    print!("{}", disasm::disassemble(&bytecode.instructions));
    for (index, constant) in bytecode.constants.iter().enumerate() {
        if let Object::CompiledFunction(function) = constant {
            println!("=== FUNCTION (constant {}) ===", index);
            print!("{}", disasm::disassemble(&function.instructions));
        }
    }
}

fn emit_image(bytecode: &Bytecode, target: &str) {
    let bytes = match image::encode(bytecode) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = fs::write(target, bytes) {
        eprintln!("Failed to write '{}': {}", target, e);
        process::exit(1);
    }
}

fn load_image(filename: &str) -> Bytecode {
    let bytes = match fs::read(filename) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", filename, e);
            process::exit(1);
        }
    };
    match image::decode(&bytes) {
        Ok(bytecode) => bytecode,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
