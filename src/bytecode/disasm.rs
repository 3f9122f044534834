use std::fmt::Write;

use crate::bytecode::op::{Definition, Instructions, Op, read_operands};

// =============================================================================
// Disassembly - diagnostics and tests only, never consumed by the VM
// =============================================================================

/// Render an instruction stream as `<byte-offset> <mnemonic> <operand…>`,
/// one instruction per line.
pub fn disassemble(ins: &Instructions) -> String {
    let mut out = String::new();
    let bytes = ins.as_bytes();
    let mut offset = 0;

    while offset < bytes.len() {
        let op = match Op::from_byte(bytes[offset]) {
            Some(op) => op,
            None => {
                writeln!(out, "{:04} ERROR: unknown opcode {}", offset, bytes[offset]).ok();
                offset += 1;
                continue;
            }
        };

        let def = op.def();
        let (operands, read) = read_operands(&def, &bytes[offset + 1..]);
        writeln!(out, "{:04} {}", offset, fmt_instruction(&def, &operands)).ok();
        offset += 1 + read;
    }

    out
}

fn fmt_instruction(def: &Definition, operands: &[usize]) -> String {
    if operands.len() != def.operand_widths.len() {
        return format!(
            "ERROR: operand count {} does not match definition {}",
            operands.len(),
            def.operand_widths.len()
        );
    }

    match operands {
        [] => def.name.to_string(),
        [a] => format!("{} {}", def.name, a),
        [a, b] => format!("{} {} {}", def.name, a, b),
        _ => format!("ERROR: unhandled operand count for {}", def.name),
    }
}

impl std::fmt::Display for Instructions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", disassemble(self))
    }
}
