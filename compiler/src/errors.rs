//! Rich error reporting with source spans.
//!
//! Uses miette for terminal error output with source code context and
//! underlines. Errors carry labeled spans only; the caller attaches the
//! source text with [`miette::Report::with_source_code`] when rendering.
//!
//! The taxonomy mirrors the pipeline: [`LexError`] for characters outside
//! the grammar, [`ParseError`] for unbalanced parentheses during the
//! postfix conversion, and [`CodegenError`] for tokens that cannot be
//! lowered to bytecode. All three are unrecoverable at the point of
//! detection — the pipeline aborts and nothing is written.

use crate::token::Span;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.end - span.start).into()
    }
}

/// A character that is not a digit, whitespace, operator, or parenthesis.
#[derive(Debug, Error, Diagnostic)]
#[error("unexpected character '{ch}'")]
#[diagnostic(
    code(exprsharp::lex::unexpected_char),
    help("expressions may contain digits, the operators + - * / ÷ % ^, parentheses, and spaces")
)]
pub struct LexError {
    pub ch: char,
    #[label("this character is not part of the expression grammar")]
    pub span: SourceSpan,
}

/// Parenthesis mismatch detected during the shunting-yard conversion.
#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("unmatched closing parenthesis")]
    #[diagnostic(code(exprsharp::parse::unmatched_close))]
    UnmatchedClose {
        #[label("no opening parenthesis matches this ')'")]
        span: SourceSpan,
    },

    #[error("unmatched opening parenthesis")]
    #[diagnostic(code(exprsharp::parse::unmatched_open))]
    UnmatchedOpen {
        #[label("this '(' is never closed")]
        span: SourceSpan,
    },
}

/// A postfix token that cannot be lowered to bytecode.
///
/// Stray parentheses are reported distinctly from other bad tokens: a
/// parenthesis reaching code generation means the input was unbalanced,
/// which deserves a better message than "unknown token".
#[derive(Debug, Error, Diagnostic)]
pub enum CodegenError {
    #[error("unbalanced parentheses")]
    #[diagnostic(code(exprsharp::codegen::unbalanced_parens))]
    UnbalancedParens {
        #[label("stray parenthesis reached code generation")]
        span: SourceSpan,
    },

    #[error("unable to compile expression; unknown token '{lexeme}'")]
    #[diagnostic(code(exprsharp::codegen::unknown_token))]
    UnknownToken {
        lexeme: String,
        #[label("not a 32-bit integer literal or recognized operator")]
        span: SourceSpan,
    },
}

/// Any failure across the compilation pipeline.
#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Codegen(#[from] CodegenError),
}
