//! Lexer — tokenizes an arithmetic expression.
//!
//! The lexer scans the expression string character by character in a single
//! left-to-right pass, producing a vector of tokens. Key behaviors:
//!
//! - **Digits accumulate**: consecutive digits form one Number token.
//!
//! - **Whitespace is a hard separator**: it ends a pending number, so
//!   `"1 2"` is two Number tokens, never `12`.
//!
//! - **Operators and parentheses are self-delimiting**: they end a pending
//!   number and then emit themselves as their own token.
//!
//! - **Anything else fails immediately**: a character outside the grammar
//!   aborts the scan with a [`LexError`] before any parsing happens.
//!
//! - **Span tracking**: every token records its byte offset range in the
//!   source, enabling diagnostics that underline the exact characters.

use crate::errors::LexError;
use crate::token::{OpKind, Span, Token, TokenKind};

pub struct Lexer {
    chars: Vec<char>,
    start: usize,    // Start of current token (byte offset)
    current: usize,  // Current position (char index)
    byte_pos: usize, // Current byte position
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            start: 0,
            current: 0,
            byte_pos: 0,
            tokens: Vec::new(),
        }
    }

    pub fn scan_tokens(mut self) -> Result<Vec<Token>, LexError> {
        while !self.is_at_end() {
            self.start = self.byte_pos;
            self.scan_token()?;
        }
        Ok(self.tokens)
    }

    fn scan_token(&mut self) -> Result<(), LexError> {
        let c = self.advance();
        let kind = match c {
            // Whitespace — skip. Ends any pending number, since digit runs
            // are consumed whole by `number`.
            ' ' | '\t' | '\r' | '\n' => return Ok(()),

            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,

            '+' => TokenKind::Op(OpKind::Plus),
            '-' => TokenKind::Op(OpKind::Minus),
            '*' => TokenKind::Op(OpKind::Star),
            '/' => TokenKind::Op(OpKind::Slash),
            '÷' => TokenKind::Op(OpKind::Obelus),
            '%' => TokenKind::Op(OpKind::Percent),
            '^' => TokenKind::Op(OpKind::Caret),

            c if c.is_ascii_digit() => {
                self.number(c);
                return Ok(());
            }

            _ => {
                return Err(LexError {
                    ch: c,
                    span: Span::new(self.start, self.byte_pos).into(),
                })
            }
        };
        self.add_token(kind);
        Ok(())
    }

    fn number(&mut self, first: char) {
        let mut text = String::new();
        text.push(first);
        while !self.is_at_end() && self.peek().is_ascii_digit() {
            text.push(self.advance());
        }
        self.add_token(TokenKind::Number(text));
    }

    // ── Character-level helpers ──────────────────────────────────────

    fn advance(&mut self) -> char {
        let c = self.chars[self.current];
        self.current += 1;
        self.byte_pos += c.len_utf8();
        c
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.chars[self.current]
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    fn add_token(&mut self, kind: TokenKind) {
        self.tokens
            .push(Token::new(kind, Span::new(self.start, self.byte_pos)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<TokenKind> {
        let tokens = Lexer::new(source).scan_tokens().expect("lexer errors");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_adjacent_digits_combine() {
        assert_eq!(
            lex("12+3"),
            vec![
                TokenKind::Number("12".into()),
                TokenKind::Op(OpKind::Plus),
                TokenKind::Number("3".into()),
            ]
        );
    }

    #[test]
    fn test_whitespace_separates_numbers() {
        // Whitespace is a hard separator even between adjacent digits.
        assert_eq!(
            lex("1 2"),
            vec![
                TokenKind::Number("1".into()),
                TokenKind::Number("2".into()),
            ]
        );
    }

    #[test]
    fn test_all_operators() {
        let kinds = lex("1+2-3*4/5÷6%7^8");
        let ops: Vec<OpKind> = kinds
            .into_iter()
            .filter_map(|k| match k {
                TokenKind::Op(op) => Some(op),
                _ => None,
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                OpKind::Plus,
                OpKind::Minus,
                OpKind::Star,
                OpKind::Slash,
                OpKind::Obelus,
                OpKind::Percent,
                OpKind::Caret,
            ]
        );
    }

    #[test]
    fn test_multibyte_operator_spans() {
        // ÷ is two bytes in UTF-8; spans stay byte-accurate around it.
        let tokens = Lexer::new("8÷21").scan_tokens().unwrap();
        assert_eq!(tokens[1].span, Span::new(1, 3));
        assert_eq!(tokens[2].span, Span::new(3, 5));
    }

    #[test]
    fn test_parentheses() {
        assert_eq!(
            lex("(1)"),
            vec![
                TokenKind::LParen,
                TokenKind::Number("1".into()),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn test_unknown_character_fails() {
        let err = Lexer::new("5 & 3").scan_tokens().unwrap_err();
        assert_eq!(err.ch, '&');
        assert_eq!(err.span.offset(), 2);
    }

    #[test]
    fn test_empty_and_blank_input() {
        assert_eq!(lex(""), vec![]);
        assert_eq!(lex("   "), vec![]);
    }

    #[test]
    fn test_reference_expression() {
        let kinds = lex("5 ^ 3 + (8 * 2)");
        assert_eq!(kinds.len(), 9);
        assert_eq!(kinds[0], TokenKind::Number("5".into()));
        assert_eq!(kinds[4], TokenKind::LParen);
        assert_eq!(kinds[8], TokenKind::RParen);
    }
}
