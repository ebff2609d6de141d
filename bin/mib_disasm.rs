//=====================================================
// File: bin/mib_disasm.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript bytecode disassembler
// Objective: Print every instruction of a .mib image with its index, and the
//            function ids the VM will assign when linking it
//=====================================================

use std::{env, fs};

use anyhow::{Context, Result, anyhow};
use mibscript::bytecode::{self, ByteCode};

fn main() -> Result<()> {
    let input = env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: mib_disasm <file.mib>"))?;
    let data = fs::read(&input).with_context(|| format!("reading {input}"))?;
    let program = bytecode::decode_program(&data).with_context(|| format!("decoding {input}"))?;

    let mut next_id = 0u32;
    let mut depth = 0usize;
    for (index, instruction) in program.iter().enumerate() {
        if matches!(instruction, ByteCode::FunctionDefinitionEnd) {
            depth = depth.saturating_sub(1);
        }
        let indent = "  ".repeat(depth);
        match instruction {
            ByteCode::FunctionDefinitionBegin { .. }
            | ByteCode::NativeFunctionDefinitionBegin { .. } => {
                println!("{index:05}: {indent}{instruction}    ; function {next_id}");
                next_id += 1;
                depth += 1;
            }
            _ => println!("{index:05}: {indent}{instruction}"),
        }
    }
    println!();
    println!("{} instructions, {next_id} functions", program.len());
    Ok(())
}

//=====================================================
// End of file
//=====================================================
