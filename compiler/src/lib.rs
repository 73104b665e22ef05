//! ExprSharp Compiler — compiles an arithmetic expression into a
//! standalone .NET executable that prints the expression's value.
//!
//! # Compiler Pipeline
//!
//! ```text
//! Expression text
//!     │
//!     ▼
//! ┌───────────┐
//! │  Lexer     │  Scans the text into Number/Operator/Paren tokens
//! └────┬──────┘
//!      │
//!      ▼
//! ┌───────────┐
//! │  Parser    │  Shunting-yard reorder into postfix (Reverse Polish)
//! └────┬──────┘
//!      │
//!      ▼
//! ┌───────────┐
//! │  Codegen   │  Postfix → CIL stack-machine instruction stream
//! └────┬──────┘
//!      │
//!      ▼
//! ┌───────────┐
//! │ Assembler  │  Metadata tables + IL + PE container → binary image
//! └────┬──────┘
//!      │
//!      ▼
//! Executable module (.dll + launcher + runtimeconfig.json)
//! ```
//!
//! Each stage owns its input and returns a fresh owned value; nothing is
//! shared between invocations, so the library is freely reusable for many
//! expressions in one process.

pub mod artifact;
pub mod assembler;
pub mod codegen;
pub mod errors;
pub mod il;
pub mod lexer;
pub mod metadata;
pub mod parser;
pub mod pe;
pub mod signatures;
pub mod token;

pub use errors::CompileError;

use tracing::debug;

/// Run the full pipeline: expression text in, binary image bytes out.
///
/// Fails on the first error; nothing is written anywhere — handing the
/// image to storage is [`artifact::build_application`]'s job.
pub fn compile(expression: &str) -> Result<Vec<u8>, CompileError> {
    let tokens = lexer::Lexer::new(expression).scan_tokens()?;
    debug!(tokens = tokens.len(), "tokenized expression");
    let postfix = parser::Parser::new(tokens).parse()?;
    debug!(tokens = postfix.len(), "converted to postfix");
    let body = codegen::generate(&postfix)?;
    Ok(assembler::assemble(&body))
}
