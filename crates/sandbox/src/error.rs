use mystery_bytecode::Capability;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("Execution timeout: your code took too long to execute")]
    Timeout,

    #[error("Execution timeout: step limit of {0} exceeded")]
    StepLimit(u64),

    #[error("Memory limit exceeded: your code used too much memory")]
    OutOfMemory,

    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    #[error("TypeError: {0}")]
    TypeError(String),

    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    #[error("RangeError: {0}")]
    RangeError(String),

    #[error("Forbidden capability {capability}: '{name}' is not available")]
    CapabilityDenied {
        capability: Capability,
        name: String,
    },

    /// A value raised by a guest `throw`, already rendered as text.
    #[error("{0}")]
    Thrown(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("bytecode error: {0}")]
    Bytecode(#[from] mystery_bytecode::BytecodeError),
}

impl VmError {
    pub fn kind(&self) -> FailureKind {
        match self {
            VmError::Timeout | VmError::StepLimit(_) => FailureKind::Timeout,
            VmError::OutOfMemory => FailureKind::MemoryExceeded,
            _ => FailureKind::RuntimeError,
        }
    }

    pub(crate) fn type_error(msg: impl Into<String>) -> Self {
        VmError::TypeError(msg.into())
    }
}

/// Why a sandboxed invocation did not produce a boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    MemoryExceeded,
    RuntimeError,
    TypeMismatch,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::MemoryExceeded => "memory_exceeded",
            FailureKind::RuntimeError => "runtime_error",
            FailureKind::TypeMismatch => "type_mismatch",
        };
        f.write_str(s)
    }
}

/// Result of one sandboxed invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Success(bool),
    Failure { kind: FailureKind, message: String },
}

impl ExecutionOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        ExecutionOutcome::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }
}

impl From<VmError> for ExecutionOutcome {
    fn from(e: VmError) -> Self {
        ExecutionOutcome::failure(e.kind(), e.to_string())
    }
}
