//! A straightforward x86-64 emitter over SSA functions: every value lives in
//! a stack slot, arithmetic goes through `rax`/`rcx`, and the temporal
//! operations call into the runtime support library.

use std::fmt::Write;

use crate::{
    index::Index,
    middle::ssa::{SsaBasicBlock, SsaFunction, SsaModule, SsaOpCode, SsaValueKind, ValueId},
};

pub fn emit_module(module: &SsaModule) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "; Sno compiler - generated assembly");
    let _ = writeln!(out, "; Target: x86-64");
    let _ = writeln!(out);
    let _ = writeln!(out, "section .text");

    for function in &module.functions {
        let _ = writeln!(out, "global {}", function.name.value());
    }

    let _ = writeln!(out);

    for function in &module.functions {
        emit_function(&mut out, function);
    }

    out
}

struct FunctionEmitter<'a> {
    function: &'a SsaFunction,
    out: &'a mut String,
}

fn emit_function(out: &mut String, function: &SsaFunction) {
    let _ = writeln!(out, "; fn {}", function.name.value());
    let _ = writeln!(out, "{}:", function.name.value());

    // Prologue: one 8-byte slot per SSA value, frame kept 16-aligned
    let frame = (function.values.len() * 8).next_multiple_of(16);
    let _ = writeln!(out, "    push rbp");
    let _ = writeln!(out, "    mov rbp, rsp");
    let _ = writeln!(out, "    sub rsp, {frame}");

    let mut emitter = FunctionEmitter { function, out };

    // Parameters arrive in the System V order and spill to their slots
    const ARGUMENT_REGISTERS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

    for value in function.values.iter() {
        if let SsaValueKind::Parameter(index) = value.kind {
            if let Some(register) = ARGUMENT_REGISTERS.get(index) {
                emitter.line(&format!("mov {}, {register}", slot(value.id)));
            }
        }
    }

    for block in function.blocks.iter() {
        emitter.emit_block(block);
    }

    let _ = writeln!(emitter.out);
}

fn slot(value: ValueId) -> String {
    format!("qword [rbp - {}]", 8 * (value.index() + 1))
}

fn local_label(function: &SsaFunction, block: crate::middle::ssa::SsaBlockId) -> String {
    format!(
        ".{}_{}",
        function.name.value(),
        function.blocks[block].label.value()
    )
}

impl<'a> FunctionEmitter<'a> {
    fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "    {text}");
    }

    /// Materializes a value into the given machine register.
    fn load(&mut self, value: ValueId, register: &str) {
        match self.function.values[value].kind {
            SsaValueKind::Constant(constant) => {
                self.line(&format!("mov {register}, {constant}"));
            }
            SsaValueKind::Global(address) => {
                self.line(&format!("mov {register}, {address}"));
            }
            _ => self.line(&format!("mov {register}, {}", slot(value))),
        }
    }

    fn store(&mut self, value: ValueId, register: &str) {
        self.line(&format!("mov {}, {register}", slot(value)));
    }

    /// Phi operands become copies at the end of each predecessor, right
    /// before its terminator transfers control.
    fn emit_phi_copies(&mut self, from: &SsaBasicBlock) {
        for successor in from.successors.clone() {
            let phis: Vec<_> = self.function.blocks[successor]
                .instructions
                .iter()
                .filter(|i| i.opcode == SsaOpCode::Phi)
                .cloned()
                .collect();

            if phis.is_empty() {
                continue;
            }

            let Some(position) = self.function.blocks[successor]
                .predecessors
                .iter()
                .position(|pred| *pred == from.id)
            else {
                continue;
            };

            for phi in phis {
                let incoming = phi.operands[position];
                let result = phi.result.expect("phi defines a value");

                self.load(incoming, "rax");
                self.store(result, "rax");
            }
        }
    }

    fn emit_block(&mut self, block: &SsaBasicBlock) {
        let _ = writeln!(self.out, "{}:", local_label(self.function, block.id));

        for instruction in &block.instructions {
            match instruction.opcode {
                SsaOpCode::Phi => {
                    // Filled by copies in the predecessors
                }
                SsaOpCode::Add
                | SsaOpCode::Sub
                | SsaOpCode::Mul
                | SsaOpCode::And
                | SsaOpCode::Or
                | SsaOpCode::Xor
                | SsaOpCode::VectorAdd
                | SsaOpCode::VectorMul => {
                    let mnemonic = match instruction.opcode {
                        SsaOpCode::Add | SsaOpCode::VectorAdd => "add",
                        SsaOpCode::Sub => "sub",
                        SsaOpCode::Mul | SsaOpCode::VectorMul => "imul",
                        SsaOpCode::And => "and",
                        SsaOpCode::Or => "or",
                        SsaOpCode::Xor => "xor",
                        _ => unreachable!(),
                    };

                    self.load(instruction.operands[0], "rax");
                    self.load(instruction.operands[1], "rcx");
                    self.line(&format!("{mnemonic} rax, rcx"));
                    self.store(instruction.result.unwrap(), "rax");
                }
                SsaOpCode::Div | SsaOpCode::Mod => {
                    self.load(instruction.operands[0], "rax");
                    self.load(instruction.operands[1], "rcx");
                    self.line("cqo");
                    self.line("idiv rcx");

                    let result_register = if instruction.opcode == SsaOpCode::Div {
                        "rax"
                    } else {
                        "rdx"
                    };
                    self.store(instruction.result.unwrap(), result_register);
                }
                SsaOpCode::Not => {
                    self.load(instruction.operands[0], "rax");
                    self.line("not rax");
                    self.store(instruction.result.unwrap(), "rax");
                }
                op
                @ (SsaOpCode::Eq
                | SsaOpCode::Ne
                | SsaOpCode::Lt
                | SsaOpCode::Le
                | SsaOpCode::Gt
                | SsaOpCode::Ge) => {
                    let set = match op {
                        SsaOpCode::Eq => "sete",
                        SsaOpCode::Ne => "setne",
                        SsaOpCode::Lt => "setl",
                        SsaOpCode::Le => "setle",
                        SsaOpCode::Gt => "setg",
                        SsaOpCode::Ge => "setge",
                        _ => unreachable!(),
                    };

                    self.load(instruction.operands[0], "rax");
                    self.load(instruction.operands[1], "rcx");
                    self.line("cmp rax, rcx");
                    self.line(&format!("{set} al"));
                    self.line("movzx rax, al");
                    self.store(instruction.result.unwrap(), "rax");
                }
                SsaOpCode::Load | SsaOpCode::VectorLoad => {
                    self.load(instruction.operands[0], "rax");
                    self.line("mov rax, qword [rax]");
                    self.store(instruction.result.unwrap(), "rax");
                }
                SsaOpCode::Store | SsaOpCode::VectorStore => {
                    self.load(instruction.operands[0], "rax");
                    self.load(instruction.operands[1], "rcx");
                    self.line("mov qword [rax], rcx");
                }
                SsaOpCode::Alloca => {
                    // Slots are pre-reserved in the frame
                    if let Some(result) = instruction.result {
                        self.line(&format!("lea rax, {}", slot(result)));
                        self.store(result, "rax");
                    }
                }
                SsaOpCode::Br => {
                    self.emit_phi_copies(block);
                    let target = local_label(self.function, instruction.targets[0]);
                    self.line(&format!("jmp {target}"));
                }
                SsaOpCode::CondBr => {
                    self.emit_phi_copies(block);
                    self.load(instruction.operands[0], "rax");
                    self.line("test rax, rax");
                    self.line(&format!(
                        "jnz {}",
                        local_label(self.function, instruction.targets[0])
                    ));
                    self.line(&format!(
                        "jmp {}",
                        local_label(self.function, instruction.targets[1])
                    ));
                }
                SsaOpCode::Ret => {
                    if let Some(value) = instruction.operands.first() {
                        self.load(*value, "rax");
                    } else {
                        self.line("xor rax, rax");
                    }

                    self.line("mov rsp, rbp");
                    self.line("pop rbp");
                    self.line("ret");
                }
                SsaOpCode::Call => {
                    let callee = instruction.symbol.expect("call has a callee");
                    self.line(&format!("call {}", callee.value()));

                    if let Some(result) = instruction.result {
                        self.store(result, "rax");
                    }
                }
                SsaOpCode::Wait => {
                    self.load(instruction.operands[0], "rdi");
                    self.line("call __sno_wait");
                }
                SsaOpCode::DurationCreate => {
                    self.load(instruction.operands[0], "rax");
                    self.store(instruction.result.unwrap(), "rax");
                }
                SsaOpCode::DodecConvert => {
                    self.load(instruction.operands[0], "rdi");
                    self.line("call __sno_dodec_convert");
                    self.store(instruction.result.unwrap(), "rax");
                }
                SsaOpCode::Dodecap => {
                    self.load(instruction.operands[0], "rdi");
                    self.line("call __sno_capture");
                    self.store(instruction.result.unwrap(), "rax");
                }
                SsaOpCode::Sample => {
                    self.load(instruction.operands[0], "rdi");
                    self.line("call __sno_sample");
                    self.store(instruction.result.unwrap(), "rax");
                }
                SsaOpCode::Delta => {
                    self.load(instruction.operands[0], "rdi");
                    self.line("call __sno_delta");
                    self.store(instruction.result.unwrap(), "rax");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        diagnostics::DiagnosticEngine,
        frontend::{parser::Parser, SourceFile},
        middle::ssa::builder::build_from_program,
    };

    fn emit(source: &str) -> String {
        let file: &'static SourceFile = Box::leak(Box::new(SourceFile::in_memory(source)));
        let mut diagnostics = DiagnosticEngine::new();
        let result = Parser::parse_program(file, &mut diagnostics);
        assert!(!result.had_error);

        let module = build_from_program(&result.program, &mut diagnostics);
        emit_module(&module)
    }

    #[test]
    fn functions_get_labels_and_frames() {
        let assembly = emit("fn f() return 1;");

        assert!(assembly.contains("global f"));
        assert!(assembly.contains("f:"));
        assert!(assembly.contains("push rbp"));
        assert!(assembly.contains("mov rbp, rsp"));
        assert!(assembly.contains("ret"));
    }

    #[test]
    fn waits_call_the_runtime() {
        let assembly = emit("wait 1s;");

        assert!(assembly.contains("mov rdi,"));
        assert!(assembly.contains("call __sno_wait"));
    }

    #[test]
    fn conditional_branches_test_their_condition() {
        let assembly = emit("if x == 0: return 1; else: return 2;");

        assert!(assembly.contains("sete al"));
        assert!(assembly.contains("test rax, rax"));
        assert!(assembly.contains("jnz .main_else0"));
        assert!(assembly.contains("jmp .main_then0"));
    }

    #[test]
    fn phi_operands_become_predecessor_copies() {
        let assembly = emit("let x = 0; if c: x = 1; else: x = 2; let y = x + 1;");

        // Both branch blocks copy their incoming value before jumping to the
        // join
        let copies = assembly.matches("jmp .main_endif0").count();
        assert_eq!(copies, 2);
    }
}
