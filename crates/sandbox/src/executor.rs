use std::panic::{catch_unwind, AssertUnwindSafe};

use mystery_bytecode::ExecutableUnit;

use crate::error::{ExecutionOutcome, FailureKind, VmError};
use crate::vm::{ExecutionLimits, Vm};

/// Run a normalized submission against one input.
///
/// Every call builds a fresh VM, deep-copies `input` into its heap and drops
/// the whole context before returning; only the boolean verdict (or a typed
/// failure) leaves the sandbox.
pub fn invoke(unit: &ExecutableUnit, input: &[i64], limits: ExecutionLimits) -> ExecutionOutcome {
    let run = catch_unwind(AssertUnwindSafe(|| run_isolated(unit, input, limits)));
    let outcome = match run {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => ExecutionOutcome::from(e),
        Err(_) => ExecutionOutcome::failure(
            FailureKind::RuntimeError,
            "internal error: sandbox aborted the invocation",
        ),
    };
    if let ExecutionOutcome::Failure { kind, message } = &outcome {
        log::debug!("{} failed on {:?}: {kind} ({message})", unit.entry_name, input);
    }
    outcome
}

fn run_isolated(
    unit: &ExecutableUnit,
    input: &[i64],
    limits: ExecutionLimits,
) -> Result<ExecutionOutcome, VmError> {
    let mut vm = Vm::new(&unit.module, limits)?;
    let entry = vm.run_script()?;
    if !entry.is_callable() {
        return Err(VmError::type_error(format!(
            "{} is not a function",
            unit.entry_name
        )));
    }
    let items = input.iter().map(|n| crate::Value::Number(*n as f64)).collect();
    let argument = vm.heap().array(items)?;
    let result = vm.call(entry, vec![argument])?;
    log::trace!("{} returned after {} steps", unit.entry_name, vm.step_count());
    Ok(match result {
        crate::Value::Bool(b) => ExecutionOutcome::Success(b),
        other => ExecutionOutcome::failure(
            FailureKind::TypeMismatch,
            format!("expected boolean, got {}", other.type_of()),
        ),
    })
}
