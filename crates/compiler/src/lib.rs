pub mod ast;
pub mod codegen;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod scan;
#[cfg(test)]
mod tests;

pub use error::{CompileError, RejectionReason};
pub use scan::scan;

use std::panic::resume_unwind;
use std::thread;

use mystery_bytecode::ExecutableUnit;

/// Stack for the compiler thread; parsing and code generation recurse once
/// per nesting level.
const COMPILE_STACK_BYTES: usize = 16 * 1024 * 1024;

/// Compile a submission to an executable unit whose entry point is the
/// single top-level function it declares. Runs on its own thread so the
/// caller's stack size does not bound how deep the source may nest.
pub fn normalize(source: &str) -> Result<ExecutableUnit, CompileError> {
    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("normalize".into())
            .stack_size(COMPILE_STACK_BYTES)
            .spawn_scoped(scope, || compile(source));
        match worker {
            Ok(handle) => handle.join().unwrap_or_else(|panic| resume_unwind(panic)),
            Err(e) => {
                log::warn!("could not start compiler thread, compiling inline: {e}");
                compile(source)
            }
        }
    })
}

fn compile(source: &str) -> Result<ExecutableUnit, CompileError> {
    let tokens = lexer::lex(source)?;
    let program = parser::parse(tokens)?;
    let entry = resolve::find_entry(&program)?;
    let captures = resolve::analyze(&program);
    let module = codegen::emit("submission", &program, &captures, &entry)?;
    log::debug!(
        "normalized submission: {} bytes, entry '{}', {} functions",
        source.len(),
        entry,
        module.functions.len()
    );
    Ok(ExecutableUnit::new(module, entry))
}
