mod bindings;
mod builtins;
pub mod error;
pub mod executor;
pub mod heap;
#[cfg(test)]
mod tests;
pub mod value;
pub mod vm;

pub use error::{ExecutionOutcome, FailureKind, VmError};
pub use executor::invoke;
pub use value::Value;
pub use vm::{ExecutionLimits, Vm};
