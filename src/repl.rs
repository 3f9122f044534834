use std::io::{self, BufRead, Write};
use std::mem;

use crate::bytecode::compile::Compiler;
use crate::bytecode::symbol::SymbolTable;
use crate::frontend::lexer::Lexer;
use crate::frontend::parser::Parser;
use crate::lang::object::Object;
use crate::runtime::vm::{self, Vm};

const PROMPT: &str = ">> ";

/// The interactive session: one line is one compilation unit. The symbol
/// table, constant pool and global slots persist across units, so bindings
/// from earlier lines stay visible; errors are reported and the session
/// continues.
pub fn start(input: impl BufRead, output: &mut dyn Write) -> io::Result<()> {
    let mut symbols = SymbolTable::new();
    let mut constants: Vec<Object> = Vec::new();
    let mut globals = vm::new_globals();

    write!(output, "{}", PROMPT)?;
    output.flush()?;

    for line in input.lines() {
        let line = line?;

        if let Some((next_symbols, next_constants)) =
            run_line(&line, mem::take(&mut symbols), mem::take(&mut constants), &mut globals, output)?
        {
            symbols = next_symbols;
            constants = next_constants;
        }

        write!(output, "{}", PROMPT)?;
        output.flush()?;
    }
    writeln!(output)?;
    Ok(())
}

/// Compile and run one unit. Always hands the (possibly grown) session state
/// back, even when the unit failed: a failed unit's instructions are
/// discarded wholesale, but the pool it appended to stays valid.
fn run_line(
    line: &str,
    symbols: SymbolTable,
    constants: Vec<Object>,
    globals: &mut Vec<Object>,
    output: &mut dyn Write,
) -> io::Result<Option<(SymbolTable, Vec<Object>)>> {
    let tokens = match Lexer::new(line).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            writeln!(output, "lexer error: {}", e)?;
            return Ok(Some((symbols, constants)));
        }
    };

    let program = match Parser::new(tokens).parse_program() {
        Ok(program) => program,
        Err(e) => {
            writeln!(output, "{}", e)?;
            return Ok(Some((symbols, constants)));
        }
    };

    let mut compiler = Compiler::with_state(symbols, constants);
    if let Err(e) = compiler.compile(&program) {
        writeln!(output, "{}", e)?;
        return Ok(Some(compiler.into_state()));
    }
    let bytecode = compiler.bytecode();

    let mut machine = Vm::with_state(bytecode, mem::take(globals));
    match machine.run() {
        Ok(()) => {
            let result = machine.last_popped();
            if result != Object::Null {
                writeln!(output, "{}", result)?;
            }
        }
        Err(e) => {
            writeln!(output, "{}", e)?;
        }
    }
    // The globals survive even a failed run; only the VM is poisoned.
    *globals = machine.into_globals();

    Ok(Some(compiler.into_state()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(lines: &str) -> String {
        let mut output = Vec::new();
        start(lines.as_bytes(), &mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_bindings_persist_across_lines() {
        let output = session("let a = 2;\na + 3;\n");
        assert!(output.contains("5"));
    }

    #[test]
    fn test_compile_error_does_not_end_session() {
        let output = session("missing;\n1 + 1;\n");
        assert!(output.contains("undefined variable 'missing'"));
        assert!(output.contains("2"));
    }

    #[test]
    fn test_runtime_error_does_not_end_session() {
        let output = session("let a = 1;\n1 / 0;\na;\n");
        assert!(output.contains("division by zero"));
        // The global survived the failed run.
        assert!(output.contains("1"));
    }

    #[test]
    fn test_functions_span_lines() {
        let output = session("fun double(x) { return x * 2; }\ndouble(21);\n");
        assert!(output.contains("42"));
    }

    #[test]
    fn test_null_results_are_not_echoed() {
        let output = session("let a = 1;\n");
        let after_prompt = output.replace(PROMPT, "");
        assert_eq!(after_prompt.trim(), "");
    }
}
