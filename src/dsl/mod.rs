//! The automation DSL: lexer, parser, and tree-walking interpreter.

pub mod ast;
pub mod interp;
pub mod lexer;
pub mod parser;

use crate::error::RunError;
use crate::host::RunContext;

/// Parse and execute a DSL script against a run context.
///
/// This is the primary entry point for the DSL pipeline:
/// source → lex → parse → interpret. Lex and parse failures abort the run;
/// the line-tagged message is mirrored into the run's output buffer so the
/// user sees why the script stopped.
pub fn run(source: &str, name: &str, ctx: &RunContext) -> Result<(), RunError> {
    let program = match parser::parse(source) {
        Ok(program) => program,
        Err(e) => {
            ctx.io.output(&format!("error: {e}"));
            return Err(e);
        }
    };

    let mut interpreter = interp::Interpreter::new(name, ctx);
    tracing::debug!(script = name, "script started");
    let result = interpreter.run(&program);
    if let Err(e) = &result {
        ctx.io.output(&format!("error: {e}"));
        if let Some(line) = e.line() {
            ctx.io.output(&format!("on line {line}"));
        }
    }
    tracing::debug!(script = %interpreter.script_name, "script finished");
    result
}
