//! ExprSharp compiler CLI entry point.
//!
//! Usage:
//!   exprsharpc lex "<expression>"        (dump tokens)
//!   exprsharpc parse "<expression>"      (dump postfix order)
//!   exprsharpc compile "<expression>" [-o <dir>] [--apphost <path>]

use exprsharp_compiler::artifact::{self, BuildOptions};
use exprsharp_compiler::{assembler, codegen, lexer::Lexer, parser::Parser, token::Token};
use std::path::PathBuf;
use std::{env, process};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exprsharp_compiler=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: exprsharpc <command> \"<expression>\"");
        eprintln!("Commands: lex, parse, compile");
        process::exit(64);
    }

    let command = &args[1];
    let expression = &args[2];

    match command.as_str() {
        "lex" => {
            let tokens = Lexer::new(expression)
                .scan_tokens()
                .unwrap_or_else(|e| report(expression, e.into()));
            for token in &tokens {
                println!("{:?}", token);
            }
        }
        "parse" => {
            let postfix = lex_and_parse(expression);
            let rendered: Vec<String> = postfix.iter().map(|t| t.kind.to_string()).collect();
            println!("{}", rendered.join(" "));
        }
        "compile" => {
            let postfix = lex_and_parse(expression);
            let body =
                codegen::generate(&postfix).unwrap_or_else(|e| report(expression, e.into()));
            let image = assembler::assemble(&body);

            let mut options = BuildOptions::default();
            let mut rest = args[3..].iter();
            while let Some(flag) = rest.next() {
                match flag.as_str() {
                    "-o" => options.output_dir = rest.next().map(PathBuf::from),
                    "--apphost" => options.apphost_template = rest.next().map(PathBuf::from),
                    other => {
                        eprintln!("Unknown option: {}", other);
                        process::exit(64);
                    }
                }
            }

            match artifact::build_application(&image, &options) {
                Ok(artifacts) => println!("Compiled to {}", artifacts.module_path.display()),
                Err(e) => {
                    eprintln!("Error writing output: {}", e);
                    process::exit(74);
                }
            }
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            process::exit(64);
        }
    }
}

/// Lex and parse the expression, exiting with a rendered diagnostic on
/// the first error.
fn lex_and_parse(expression: &str) -> Vec<Token> {
    let tokens = Lexer::new(expression)
        .scan_tokens()
        .unwrap_or_else(|e| report(expression, e.into()));
    Parser::new(tokens)
        .parse()
        .unwrap_or_else(|e| report(expression, e.into()))
}

fn report(expression: &str, error: exprsharp_compiler::CompileError) -> ! {
    let report = miette::Report::new(error).with_source_code(expression.to_string());
    eprintln!("{:?}", report);
    process::exit(65);
}
