//! Code generation — postfix sequence to CIL instruction stream.
//!
//! Walks the postfix token sequence left to right and emits stack-machine
//! instructions computing the expression, then materializes a print of the
//! final value and a return. Arithmetic is 32-bit signed throughout, with
//! one exception: `^` widens both operands to float64, calls
//! `System.Math::Pow`, and truncates the result back to int32. The
//! truncation loses precision for large bases and exponents; that is the
//! specified behavior, not a defect.
//!
//! The generator also tracks evaluation-stack depth as it emits, so the
//! method header's max-stack bound stays correct for deeply nested
//! expressions.

use crate::errors::CodegenError;
use crate::il::{Callee, Instruction};
use crate::token::{OpKind, Token, TokenKind};
use tracing::debug;

/// The writer's historical default; emitted bodies never declare less.
const DEFAULT_MAX_STACK: i32 = 8;

/// The entry method's body: the generated instruction stream plus its
/// evaluation-stack bound. One scratch int32 local (slot 0, used by `^`)
/// is always declared alongside it in the local-variable signature.
#[derive(Debug)]
pub struct EntryBody {
    pub instructions: Vec<Instruction>,
    pub max_stack: u16,
}

struct Generator {
    instructions: Vec<Instruction>,
    depth: i32,
    max_depth: i32,
}

impl Generator {
    fn new() -> Self {
        Self {
            instructions: Vec::new(),
            depth: 0,
            max_depth: 0,
        }
    }

    fn emit(&mut self, instruction: Instruction) {
        self.depth += instruction.stack_delta();
        self.max_depth = self.max_depth.max(self.depth);
        self.instructions.push(instruction);
    }
}

/// Lower a postfix sequence into the entry method's instruction stream.
pub fn generate(postfix: &[Token]) -> Result<EntryBody, CodegenError> {
    let mut gen = Generator::new();

    for token in postfix {
        match &token.kind {
            TokenKind::Number(text) => match text.parse::<i32>() {
                Ok(value) => gen.emit(Instruction::LdcI4(value)),
                // A digit run that overflows i32 falls through to the
                // unknown-token arm, like any other uncompilable token.
                Err(_) => {
                    return Err(CodegenError::UnknownToken {
                        lexeme: text.clone(),
                        span: token.span.into(),
                    })
                }
            },

            TokenKind::Op(op) => match op {
                OpKind::Plus => gen.emit(Instruction::Add),
                OpKind::Minus => gen.emit(Instruction::Sub),
                OpKind::Star => gen.emit(Instruction::Mul),
                OpKind::Slash | OpKind::Obelus => gen.emit(Instruction::Div),
                OpKind::Percent => gen.emit(Instruction::Rem),
                OpKind::Caret => {
                    // Math.Pow wants float64 operands. Park the exponent in
                    // the scratch local while the base is widened, then
                    // widen the exponent and truncate the result to int32.
                    gen.emit(Instruction::Stloc0);
                    gen.emit(Instruction::ConvR8);
                    gen.emit(Instruction::Ldloc0);
                    gen.emit(Instruction::ConvR8);
                    gen.emit(Instruction::Call(Callee::MathPow));
                    gen.emit(Instruction::ConvI4);
                }
            },

            TokenKind::LParen | TokenKind::RParen => {
                return Err(CodegenError::UnbalancedParens {
                    span: token.span.into(),
                })
            }
        }
    }

    gen.emit(Instruction::Call(Callee::WriteLineInt32));
    gen.emit(Instruction::Ret);

    let max_stack = gen.max_depth.max(DEFAULT_MAX_STACK) as u16;
    debug!(
        instructions = gen.instructions.len(),
        max_stack, "generated entry body"
    );

    Ok(EntryBody {
        instructions: gen.instructions,
        max_stack,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::token::Span;

    fn body(source: &str) -> EntryBody {
        let tokens = Lexer::new(source).scan_tokens().expect("lexer errors");
        let postfix = Parser::new(tokens).parse().expect("parse errors");
        generate(&postfix).expect("codegen errors")
    }

    // ── A small interpreter over the typed stream ───────────────────
    //
    // Executes the instruction stream the way the runtime would, so the
    // semantic test vectors hold without loading the produced image.

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Val {
        I(i32),
        F(f64),
    }

    fn run(body: &EntryBody) -> i32 {
        let mut stack: Vec<Val> = Vec::new();
        let mut local = Val::I(0);
        let mut printed = None;

        for instruction in &body.instructions {
            match instruction {
                Instruction::LdcI4(v) => stack.push(Val::I(*v)),
                Instruction::Add | Instruction::Sub | Instruction::Mul | Instruction::Div
                | Instruction::Rem => {
                    let (Some(Val::I(b)), Some(Val::I(a))) = (stack.pop(), stack.pop()) else {
                        panic!("integer binop on non-integer operands");
                    };
                    stack.push(Val::I(match instruction {
                        Instruction::Add => a.wrapping_add(b),
                        Instruction::Sub => a.wrapping_sub(b),
                        Instruction::Mul => a.wrapping_mul(b),
                        Instruction::Div => a.wrapping_div(b),
                        Instruction::Rem => a.wrapping_rem(b),
                        _ => unreachable!(),
                    }));
                }
                Instruction::ConvR8 => {
                    let widened = match stack.pop().expect("conv.r8 on empty stack") {
                        Val::I(v) => v as f64,
                        Val::F(v) => v,
                    };
                    stack.push(Val::F(widened));
                }
                Instruction::ConvI4 => {
                    let narrowed = match stack.pop().expect("conv.i4 on empty stack") {
                        Val::I(v) => v,
                        Val::F(v) => v as i32, // truncation toward zero
                    };
                    stack.push(Val::I(narrowed));
                }
                Instruction::Stloc0 => local = stack.pop().expect("stloc.0 on empty stack"),
                Instruction::Ldloc0 => stack.push(local),
                Instruction::Call(Callee::MathPow) => {
                    let (Some(Val::F(b)), Some(Val::F(a))) = (stack.pop(), stack.pop()) else {
                        panic!("Math.Pow on non-float operands");
                    };
                    stack.push(Val::F(a.powf(b)));
                }
                Instruction::Call(Callee::WriteLineInt32) => {
                    let Some(Val::I(v)) = stack.pop() else {
                        panic!("WriteLine(int32) on non-integer operand");
                    };
                    printed = Some(v);
                }
                Instruction::Call(Callee::ObjectCtor) => {
                    stack.pop();
                }
                Instruction::Ldarg0 => stack.push(Val::I(0)),
                Instruction::Ret => break,
            }
        }

        assert!(stack.is_empty(), "stack not empty at ret");
        printed.expect("nothing printed")
    }

    #[test]
    fn test_pow_lowering_sequence() {
        let body = body("5^3");
        assert_eq!(
            body.instructions,
            vec![
                Instruction::LdcI4(5),
                Instruction::LdcI4(3),
                Instruction::Stloc0,
                Instruction::ConvR8,
                Instruction::Ldloc0,
                Instruction::ConvR8,
                Instruction::Call(Callee::MathPow),
                Instruction::ConvI4,
                Instruction::Call(Callee::WriteLineInt32),
                Instruction::Ret,
            ]
        );
    }

    #[test]
    fn test_pow_computes_125() {
        assert_eq!(run(&body("5^3")), 125);
    }

    #[test]
    fn test_reference_program_prints_141() {
        assert_eq!(run(&body("5 ^ 3 + (8 * 2)")), 141);
    }

    #[test]
    fn test_division_truncates_toward_zero() {
        assert_eq!(run(&body("7/2")), 3);
        assert_eq!(run(&body("9÷4")), 2);
    }

    #[test]
    fn test_remainder() {
        assert_eq!(run(&body("7%3")), 1);
    }

    #[test]
    fn test_precedence_end_to_end() {
        assert_eq!(run(&body("2+3*4")), 14);
        assert_eq!(run(&body("(2+3)*4")), 20);
    }

    #[test]
    fn test_stray_paren_is_unbalanced_parens() {
        let stray = vec![Token::new(TokenKind::LParen, Span::new(0, 1))];
        assert!(matches!(
            generate(&stray),
            Err(CodegenError::UnbalancedParens { .. })
        ));
    }

    #[test]
    fn test_oversized_literal_is_unknown_token() {
        let tokens = vec![Token::new(
            TokenKind::Number("99999999999".into()),
            Span::new(0, 11),
        )];
        let err = generate(&tokens).unwrap_err();
        match err {
            CodegenError::UnknownToken { lexeme, .. } => assert_eq!(lexeme, "99999999999"),
            other => panic!("expected unknown token, got {other:?}"),
        }
    }

    #[test]
    fn test_max_stack_has_writer_default_floor() {
        assert_eq!(body("1+2").max_stack, 8);
    }
}
