//! Populates the `ty` slot of every SSA value from the global type
//! registry. Runs after construction; a second sweep lets Φ nodes settle
//! once their operands are typed.

use crate::middle::{
    ssa::{SsaFunction, SsaModule, SsaOpCode, SsaValueKind},
    ty::TypeRegistry,
};

pub fn annotate_module(module: &mut SsaModule) {
    for function in &mut module.functions {
        annotate_function(function);
    }
}

pub fn annotate_function(function: &mut SsaFunction) {
    let registry = TypeRegistry::global();

    // Values with intrinsic types
    for value in function.values.iter_mut() {
        value.ty = Some(match value.kind {
            SsaValueKind::Constant(_) => registry.dodecagram(),
            SsaValueKind::Parameter(_) => registry.dodecagram(),
            SsaValueKind::Global(_) => registry.integer(64, true),
            SsaValueKind::Register => continue,
        });
    }

    // Two sweeps: results first, then phis over now-typed operands
    for _ in 0..2 {
        for block_index in function.blocks.indices().collect::<Vec<_>>() {
            for instruction_index in 0..function.blocks[block_index].instructions.len() {
                let instruction = &function.blocks[block_index].instructions[instruction_index];

                let Some(result) = instruction.result else {
                    continue;
                };

                let ty = match instruction.opcode {
                    op if op.is_comparison() => Some(registry.boolean()),
                    SsaOpCode::DurationCreate => Some(registry.duration()),
                    SsaOpCode::DodecConvert
                    | SsaOpCode::Dodecap
                    | SsaOpCode::Sample
                    | SsaOpCode::Delta
                    | SsaOpCode::Call => Some(registry.dodecagram()),
                    SsaOpCode::Add
                    | SsaOpCode::Sub
                    | SsaOpCode::Mul
                    | SsaOpCode::Div
                    | SsaOpCode::Mod
                    | SsaOpCode::And
                    | SsaOpCode::Or
                    | SsaOpCode::Xor
                    | SsaOpCode::Not
                    | SsaOpCode::VectorAdd
                    | SsaOpCode::VectorMul
                    | SsaOpCode::Phi => {
                        // Unify across the operands; dodecagram wins ties
                        // with plain integers
                        let mut unified = None;

                        for operand in &instruction.operands {
                            let Some(operand_ty) = function.values[*operand].ty else {
                                continue;
                            };

                            unified = Some(match unified {
                                None => operand_ty,
                                Some(current) => registry
                                    .unify(current, operand_ty)
                                    .unwrap_or(current),
                            });
                        }

                        unified.or(Some(registry.dodecagram()))
                    }
                    SsaOpCode::Load | SsaOpCode::Alloca | SsaOpCode::VectorLoad => {
                        Some(registry.auto())
                    }
                    _ => None,
                };

                if let Some(ty) = ty {
                    function.values[result].ty = Some(ty);
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
        middle::ty::TypeKind,
    };

    fn annotated(source: &str) -> SsaModule {
        let file: &'static SourceFile = Box::leak(Box::new(SourceFile::in_memory(source)));
        let mut diagnostics = DiagnosticEngine::new();
        let result = Parser::parse_program(file, &mut diagnostics);
        assert!(!result.had_error);

        let mut module = build_from_program(&result.program, &mut diagnostics);
        annotate_module(&mut module);
        module
    }

    #[test]
    fn constants_are_dodecagrams() {
        let module = annotated("let x = 3b;");
        let function = &module.functions[0];

        let registry = TypeRegistry::global();

        for value in function.values.iter() {
            if matches!(value.kind, SsaValueKind::Constant(_)) {
                assert_eq!(value.ty, Some(registry.dodecagram()));
            }
        }
    }

    #[test]
    fn comparisons_produce_booleans() {
        let module = annotated("if x == 0: return 1; else: return 2;");
        let function = &module.functions[0];

        let registry = TypeRegistry::global();

        let comparison = function
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .find(|i| i.opcode.is_comparison())
            .unwrap();

        assert_eq!(
            function.values[comparison.result.unwrap()].ty,
            Some(registry.boolean())
        );
    }

    #[test]
    fn wait_intervals_are_durations() {
        let module = annotated("wait 1s;");
        let function = &module.functions[0];

        let registry = TypeRegistry::global();

        let duration = function
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .find(|i| i.opcode == SsaOpCode::DurationCreate)
            .unwrap();

        assert_eq!(
            function.values[duration.result.unwrap()].ty,
            Some(registry.duration())
        );
        assert!(matches!(
            registry.kind(registry.duration()),
            TypeKind::Duration
        ));
    }

    #[test]
    fn arithmetic_propagates_through_phis() {
        let module = annotated("let x = 0; if c: x = 1; else: x = 2; let y = x + 1;");
        let function = &module.functions[0];

        let registry = TypeRegistry::global();

        let phi = function
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .find(|i| i.opcode == SsaOpCode::Phi)
            .unwrap();

        assert_eq!(
            function.values[phi.result.unwrap()].ty,
            Some(registry.dodecagram())
        );
    }
}
