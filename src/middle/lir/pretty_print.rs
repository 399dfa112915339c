use std::io::{self, Write};

use colored::Colorize;
use itertools::Itertools;

use crate::{
    index::Index,
    middle::lir::{self, OpCode},
};

pub fn pretty_print_lir(function: &lir::Function) {
    print!(
        "{} {}{}",
        "fn".magenta(),
        function.name.value().blue(),
        "(".white()
    );

    print!(
        "{}",
        function
            .parameters
            .iter()
            .map(|register| format!("R{}", register.index()))
            .join(", ")
            .yellow()
    );

    println!("{}", ") {".white());

    for block in function.blocks.iter() {
        println!("{}", format!("{}:", block.label.value()).bright_red());

        for instruction in &block.instructions {
            println!("    {instruction}");
        }
    }

    println!("{}", "}".white())
}

/// Uncolored form of the same layout, for `-e lir` output files.
pub fn write_lir(out: &mut impl Write, module: &lir::Module) -> io::Result<()> {
    for function in &module.functions {
        writeln!(
            out,
            "fn {}({}) {{",
            function.name.value(),
            function
                .parameters
                .iter()
                .map(|register| format!("R{}", register.index()))
                .join(", ")
        )?;

        for block in function.blocks.iter() {
            writeln!(out, "{}:", block.label.value())?;

            for instruction in &block.instructions {
                writeln!(out, "    {}", render_instruction(instruction))?;
            }
        }

        writeln!(out, "}}")?;
        writeln!(out)?;
    }

    Ok(())
}

fn mnemonic(opcode: OpCode) -> &'static str {
    match opcode {
        OpCode::Mov => "MOV",
        OpCode::Load => "LOAD",
        OpCode::Store => "STORE",
        OpCode::Add => "ADD",
        OpCode::Sub => "SUB",
        OpCode::Mul => "MUL",
        OpCode::Div => "DIV",
        OpCode::Cmp => "CMP",
        OpCode::Jmp => "JMP",
        OpCode::Je => "JE",
        OpCode::Jne => "JNE",
        OpCode::Jg => "JG",
        OpCode::Jl => "JL",
        OpCode::Jge => "JGE",
        OpCode::Jle => "JLE",
        OpCode::Call => "CALL",
        OpCode::Ret => "RET",
        OpCode::Wait => "WAIT",
        OpCode::Dodecap => "DODECAP",
        OpCode::Sample => "SAMPLE",
        OpCode::Delta => "DELTA",
        OpCode::Label => "LABEL",
        OpCode::Nop => "NOP",
    }
}

fn render_operand(operand: lir::Operand) -> String {
    match operand {
        lir::Operand::Register(register) => format!("R{}", register.index()),
        lir::Operand::Immediate(value) => value.to_string(),
        lir::Operand::Memory(address) => format!("[{address}]"),
        lir::Operand::Label(label) => label.value().to_owned(),
    }
}

fn render_instruction(instruction: &lir::Instruction) -> String {
    let operands = [instruction.dest, instruction.src1, instruction.src2]
        .into_iter()
        .flatten()
        .map(render_operand)
        .join(", ");

    let mut text = if operands.is_empty() {
        mnemonic(instruction.opcode).to_owned()
    } else {
        format!("{} {operands}", mnemonic(instruction.opcode))
    };

    if let Some(comment) = &instruction.comment {
        text.push_str(&format!(" ; {comment}"));
    }

    text
}

impl core::fmt::Display for lir::Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let operands = [self.dest, self.src1, self.src2]
            .into_iter()
            .flatten()
            .map(|operand| operand.to_string())
            .join(", ");

        if operands.is_empty() {
            write!(f, "{}", mnemonic(self.opcode).cyan())?;
        } else {
            write!(f, "{} {}", mnemonic(self.opcode).cyan(), operands.white())?;
        }

        if let Some(comment) = &self.comment {
            write!(f, " {}", format!("; {comment}").bright_black())?;
        }

        Ok(())
    }
}

impl core::fmt::Display for lir::Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Operand::Register(register) => {
                write!(f, "{}", format!("R{}", register.index()).yellow())
            }
            lir::Operand::Immediate(value) => write!(f, "{}", value.to_string().purple()),
            lir::Operand::Memory(address) => {
                write!(f, "{}", format!("[{address}]").purple())
            }
            lir::Operand::Label(label) => write!(f, "{}", label.value().blue()),
        }
    }
}
