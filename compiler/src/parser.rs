//! Parser — shunting-yard conversion from infix to postfix order.
//!
//! The parser reorders a flat token stream into postfix (Reverse Polish)
//! order, where every operator follows its operands. Postfix needs no
//! precedence lookups to evaluate, which keeps the code generator a single
//! forward walk.
//!
//! The algorithm is Dijkstra's shunting yard: numbers flow straight to the
//! output, operators wait on a stack until an incoming operator with lower
//! binding power (or the end of input) flushes them, and parentheses act as
//! structural markers on the stack that are never compared by precedence.
//!
//! Exponentiation is deliberately left-associative here, matching the rest
//! of the table: `2^3^2` parses as `(2^3)^2`.

use crate::errors::ParseError;
use crate::token::{OpKind, Token, TokenKind};

// ── Operator descriptors ────────────────────────────────────────────

/// Operator associativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Left,
    Right,
    None,
}

/// Precedence and associativity for one operator symbol.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub precedence: u8,
    pub assoc: Assoc,
}

/// Static lookup table: additive < multiplicative < exponentiation,
/// all left-associative.
pub fn op_info(op: OpKind) -> OpInfo {
    match op {
        OpKind::Plus | OpKind::Minus => OpInfo {
            precedence: 0,
            assoc: Assoc::Left,
        },
        OpKind::Star | OpKind::Slash | OpKind::Obelus | OpKind::Percent => OpInfo {
            precedence: 1,
            assoc: Assoc::Left,
        },
        OpKind::Caret => OpInfo {
            precedence: 2,
            assoc: Assoc::Left,
        },
    }
}

/// Pop `top` before pushing `incoming`? True when `top` binds strictly
/// tighter, or equally tight with a left-associative `incoming`.
fn should_pop(top: OpInfo, incoming: OpInfo) -> bool {
    top.precedence > incoming.precedence
        || (top.precedence == incoming.precedence && matches!(incoming.assoc, Assoc::Left))
}

// ── Parser ──────────────────────────────────────────────────────────

pub struct Parser {
    tokens: Vec<Token>,
    stack: Vec<Token>,
    output: Vec<Token>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            stack: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Convert the token stream to postfix order.
    ///
    /// Consumes the parser: each pipeline stage owns its input and hands a
    /// fresh owned sequence to the next stage.
    pub fn parse(mut self) -> Result<Vec<Token>, ParseError> {
        let tokens = std::mem::take(&mut self.tokens);
        for token in tokens {
            match &token.kind {
                TokenKind::Number(_) => self.output.push(token),

                TokenKind::Op(op) => {
                    self.pop_operators(*op);
                    self.stack.push(token);
                }

                // Parentheses only sit on the stack temporarily; they are
                // markers, not operators.
                TokenKind::LParen => self.stack.push(token),

                TokenKind::RParen => loop {
                    match self.stack.pop() {
                        Some(t) if t.kind == TokenKind::LParen => break,
                        Some(t) => self.output.push(t),
                        None => {
                            return Err(ParseError::UnmatchedClose {
                                span: token.span.into(),
                            })
                        }
                    }
                },
            }
        }

        // Drain the stack. A leftover '(' means the expression never
        // closed it.
        while let Some(token) = self.stack.pop() {
            if token.kind == TokenKind::LParen {
                return Err(ParseError::UnmatchedOpen {
                    span: token.span.into(),
                });
            }
            self.output.push(token);
        }

        Ok(self.output)
    }

    /// Flush stacked operators that outrank `incoming`.
    fn pop_operators(&mut self, incoming: OpKind) {
        let incoming = op_info(incoming);
        while let Some(top) = self.stack.last() {
            let TokenKind::Op(top_op) = &top.kind else {
                break; // a '(' fences off everything beneath it
            };
            if !should_pop(op_info(*top_op), incoming) {
                break;
            }
            if let Some(token) = self.stack.pop() {
                self.output.push(token);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn postfix(source: &str) -> Vec<String> {
        let tokens = Lexer::new(source).scan_tokens().expect("lexer errors");
        Parser::new(tokens)
            .parse()
            .expect("parse errors")
            .into_iter()
            .map(|t| t.kind.to_string())
            .collect()
    }

    fn parse_err(source: &str) -> ParseError {
        let tokens = Lexer::new(source).scan_tokens().expect("lexer errors");
        Parser::new(tokens).parse().unwrap_err()
    }

    #[test]
    fn test_reference_expression() {
        assert_eq!(postfix("5^3+(8*2)"), ["5", "3", "^", "8", "2", "*", "+"]);
    }

    #[test]
    fn test_single_number() {
        assert_eq!(postfix("42"), ["42"]);
    }

    #[test]
    fn test_precedence_layers() {
        // ^ over * over +
        assert_eq!(postfix("2+3*4^2"), ["2", "3", "4", "2", "^", "*", "+"]);
    }

    #[test]
    fn test_left_associativity() {
        assert_eq!(postfix("8-3-2"), ["8", "3", "-", "2", "-"]);
        // Exponentiation is left-associative in this table: (2^3)^2.
        assert_eq!(postfix("2^3^2"), ["2", "3", "^", "2", "^"]);
    }

    #[test]
    fn test_parens_override_precedence() {
        assert_eq!(postfix("(2+3)*4"), ["2", "3", "+", "4", "*"]);
    }

    #[test]
    fn test_nested_parens() {
        assert_eq!(postfix("((1+2))"), ["1", "2", "+"]);
    }

    #[test]
    fn test_unmatched_open_paren() {
        assert!(matches!(parse_err("(1+2"), ParseError::UnmatchedOpen { .. }));
    }

    #[test]
    fn test_unmatched_close_paren() {
        assert!(matches!(
            parse_err("1+2)"),
            ParseError::UnmatchedClose { .. }
        ));
    }

    #[test]
    fn test_should_pop_respects_associativity() {
        let left = |p| OpInfo {
            precedence: p,
            assoc: Assoc::Left,
        };
        let right = |p| OpInfo {
            precedence: p,
            assoc: Assoc::Right,
        };
        let non = |p| OpInfo {
            precedence: p,
            assoc: Assoc::None,
        };

        assert!(should_pop(left(1), left(0)));
        assert!(!should_pop(left(0), left(1)));
        // Equal precedence pops only for a left-associative incoming op.
        assert!(should_pop(left(1), left(1)));
        assert!(!should_pop(left(1), right(1)));
        assert!(!should_pop(left(1), non(1)));
    }

    // ── Postfix-vs-direct evaluation property ───────────────────────

    /// Deterministic xorshift64 so the property test is reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn below(&mut self, bound: u64) -> u64 {
            self.next() % bound
        }
    }

    /// Render a random expression tree, parenthesizing subtrees at random
    /// so both fully- and partially-parenthesized shapes are covered.
    fn gen_expr(rng: &mut XorShift, depth: u32, out: &mut String) {
        if depth == 0 || rng.below(3) == 0 {
            out.push((b'0' + rng.below(10) as u8) as char);
            return;
        }
        let op = ['+', '-', '*', '/', '÷', '%', '^'][rng.below(7) as usize];
        let parens = rng.below(2) == 0;
        if parens {
            out.push('(');
        }
        gen_expr(rng, depth - 1, out);
        out.push(op);
        gen_expr(rng, depth - 1, out);
        if parens {
            out.push(')');
        }
    }

    /// Shared operator semantics for both test evaluators. Mirrors the
    /// generated bytecode: wrapping 32-bit arithmetic, f64 exponentiation
    /// narrowed back to i32. Division by zero yields None and the sample
    /// is skipped.
    fn apply(op: OpKind, a: i32, b: i32) -> Option<i32> {
        Some(match op {
            OpKind::Plus => a.wrapping_add(b),
            OpKind::Minus => a.wrapping_sub(b),
            OpKind::Star => a.wrapping_mul(b),
            OpKind::Slash | OpKind::Obelus => {
                if b == 0 {
                    return None;
                }
                a.wrapping_div(b)
            }
            OpKind::Percent => {
                if b == 0 {
                    return None;
                }
                a.wrapping_rem(b)
            }
            OpKind::Caret => (a as f64).powf(b as f64) as i32,
        })
    }

    fn eval_postfix(tokens: &[Token]) -> Option<i32> {
        let mut stack: Vec<i32> = Vec::new();
        for token in tokens {
            match &token.kind {
                TokenKind::Number(text) => stack.push(text.parse().ok()?),
                TokenKind::Op(op) => {
                    let b = stack.pop()?;
                    let a = stack.pop()?;
                    stack.push(apply(*op, a, b)?);
                }
                _ => return None,
            }
        }
        if stack.len() == 1 {
            stack.pop()
        } else {
            None
        }
    }

    /// Direct infix evaluation by precedence climbing over the raw token
    /// stream, honoring the same table (everything left-associative).
    fn eval_direct(tokens: &[Token], pos: &mut usize, min_prec: u8) -> Option<i32> {
        let mut left = eval_primary(tokens, pos)?;
        while *pos < tokens.len() {
            let TokenKind::Op(op) = &tokens[*pos].kind else {
                break;
            };
            let op = *op;
            let info = op_info(op);
            if info.precedence < min_prec {
                break;
            }
            *pos += 1;
            let right = eval_direct(tokens, pos, info.precedence + 1)?;
            left = apply(op, left, right)?;
        }
        Some(left)
    }

    fn eval_primary(tokens: &[Token], pos: &mut usize) -> Option<i32> {
        match &tokens.get(*pos)?.kind {
            TokenKind::Number(text) => {
                *pos += 1;
                text.parse().ok()
            }
            TokenKind::LParen => {
                *pos += 1;
                let value = eval_direct(tokens, pos, 0)?;
                match tokens.get(*pos)?.kind {
                    TokenKind::RParen => {
                        *pos += 1;
                        Some(value)
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    #[test]
    fn test_postfix_matches_direct_evaluation() {
        let mut rng = XorShift(0x5EED_1234_ABCD_0001);
        let mut checked = 0;
        for _ in 0..500 {
            let mut source = String::new();
            gen_expr(&mut rng, 3, &mut source);

            let tokens = Lexer::new(&source).scan_tokens().expect("lexer errors");
            let mut pos = 0;
            let direct = eval_direct(&tokens, &mut pos, 0);
            if direct.is_some() {
                assert_eq!(pos, tokens.len(), "direct eval must consume {source}");
            }

            let postfix = Parser::new(tokens).parse().expect("parse errors");
            let via_postfix = eval_postfix(&postfix);

            // Division by zero skips the sample in both evaluators alike.
            if let (Some(a), Some(b)) = (direct, via_postfix) {
                assert_eq!(a, b, "divergence on {source}");
                checked += 1;
            } else {
                assert_eq!(direct, via_postfix, "one evaluator failed on {source}");
            }
        }
        assert!(checked > 100, "too few evaluable samples: {checked}");
    }
}
