// File: src/debug.rs
//
// Bytecode disassembler, wired up behind `--trace` (§2: "optional, but
// useful to carry over"). Each line mirrors clox's `disassembleInstruction`
// layout — offset, source line (or `|` when unchanged from the previous
// instruction), mnemonic, operands — adapted to read straight off the
// `Instruction` enum instead of decoding trailing opcode bytes.

use crate::chunk::Chunk;
use crate::gc::Heap;

pub fn disassemble_chunk(chunk: &Chunk, name: &str, heap: &Heap) -> String {
    let mut out = format!("== {} ==\n", name);
    for offset in 0..chunk.code.len() {
        out.push_str(&disassemble_instruction(chunk, offset, heap));
    }
    out
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize, heap: &Heap) -> String {
    let mut out = format!("{:04} ", offset);
    let line = chunk.line_at(offset);
    if offset > 0 && line == chunk.line_at(offset - 1) {
        out.push_str("   | ");
    } else {
        out.push_str(&format!("{:4} ", line));
    }
    out.push_str(&format_instruction(chunk, offset, heap));
    out.push('\n');
    out
}

fn format_instruction(chunk: &Chunk, offset: usize, heap: &Heap) -> String {
    use crate::chunk::Instruction::*;
    match &chunk.code[offset] {
        Constant(idx) => constant_op("OP_CONSTANT", chunk, *idx, heap),
        Nil => "OP_NIL".to_string(),
        True => "OP_TRUE".to_string(),
        False => "OP_FALSE".to_string(),
        Pop => "OP_POP".to_string(),
        GetLocal(slot) => format!("OP_GET_LOCAL {}", slot),
        SetLocal(slot) => format!("OP_SET_LOCAL {}", slot),
        GetGlobal(idx) => constant_op("OP_GET_GLOBAL", chunk, *idx, heap),
        DefineGlobal(idx) => constant_op("OP_DEFINE_GLOBAL", chunk, *idx, heap),
        SetGlobal(idx) => constant_op("OP_SET_GLOBAL", chunk, *idx, heap),
        GetUpvalue(slot) => format!("OP_GET_UPVALUE {}", slot),
        SetUpvalue(slot) => format!("OP_SET_UPVALUE {}", slot),
        GetProperty(idx) => constant_op("OP_GET_PROPERTY", chunk, *idx, heap),
        SetProperty(idx) => constant_op("OP_SET_PROPERTY", chunk, *idx, heap),
        Equal => "OP_EQUAL".to_string(),
        Greater => "OP_GREATER".to_string(),
        Less => "OP_LESS".to_string(),
        Add => "OP_ADD".to_string(),
        Subtract => "OP_SUBTRACT".to_string(),
        Multiply => "OP_MULTIPLY".to_string(),
        Divide => "OP_DIVIDE".to_string(),
        Not => "OP_NOT".to_string(),
        Negate => "OP_NEGATE".to_string(),
        Print => "OP_PRINT".to_string(),
        Jump(target) => format!("OP_JUMP -> {}", target.0),
        JumpIfFalse(target) => format!("OP_JUMP_IF_FALSE -> {}", target.0),
        Loop(target) => format!("OP_LOOP -> {}", target.0),
        Call(arg_count) => format!("OP_CALL ({} args)", arg_count),
        Closure(idx, captures) => {
            let mut s = constant_op("OP_CLOSURE", chunk, *idx, heap);
            for capture in captures {
                s.push_str(&format!(
                    "\n      |                     {} {}",
                    if capture.is_local { "local" } else { "upvalue" },
                    capture.index
                ));
            }
            s
        }
        CloseUpvalue => "OP_CLOSE_UPVALUE".to_string(),
        Return => "OP_RETURN".to_string(),
        Class(idx) => constant_op("OP_CLASS", chunk, *idx, heap),
        Method(idx) => constant_op("OP_METHOD", chunk, *idx, heap),
        Invoke(idx, arg_count) => {
            format!("OP_INVOKE ({} args) {}", arg_count, constant_op("", chunk, *idx, heap))
        }
    }
}

fn constant_op(mnemonic: &str, chunk: &Chunk, idx: u8, heap: &Heap) -> String {
    format!("{} {} '{}'", mnemonic, idx, chunk.constants[idx as usize].format(heap))
}
