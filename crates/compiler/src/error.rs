use mystery_bytecode::Capability;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("lexer error at line {line}, col {col}: {msg}")]
    Lexer { line: usize, col: usize, msg: String },

    #[error("parse error at line {line}: {msg}")]
    Parse { line: usize, msg: String },

    #[error("No function was defined. Please define a function.")]
    NoEntryPoint,

    #[error("expected exactly one top-level function, found {}: {}", .0.len(), .0.join(", "))]
    AmbiguousEntryPoint(Vec<String>),

    #[error("function '{name}' must take exactly one parameter, found {found}")]
    EntryArity { name: String, found: usize },

    #[error("compile error at line {line}: {msg}")]
    Codegen { line: usize, msg: String },
}

/// Why the capability scanner refused a submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("Forbidden construct '{token}' at line {line}: dynamic code evaluation is not allowed")]
    DynamicEval { token: String, line: usize },

    #[error("Forbidden construct '{token}' at line {line}: module loading is not allowed")]
    ModuleLoading { token: String, line: usize },

    #[error("Forbidden construct '{token}' at line {line}: timers are not allowed")]
    Timer { token: String, line: usize },

    #[error("Forbidden construct '{token}' at line {line}: network access is not allowed")]
    Network { token: String, line: usize },

    #[error("Forbidden construct '{token}' at line {line}: host globals are not accessible")]
    HostGlobal { token: String, line: usize },

    #[error("Forbidden construct '{token}' at line {line}: prototype access is not allowed")]
    PrototypeAccess { token: String, line: usize },
}

impl RejectionReason {
    pub fn new(capability: Capability, token: impl Into<String>, line: usize) -> Self {
        let token = token.into();
        match capability {
            Capability::DynamicEval => RejectionReason::DynamicEval { token, line },
            Capability::ModuleLoading => RejectionReason::ModuleLoading { token, line },
            Capability::Timer => RejectionReason::Timer { token, line },
            Capability::Network => RejectionReason::Network { token, line },
            Capability::HostGlobal => RejectionReason::HostGlobal { token, line },
            Capability::PrototypeAccess => RejectionReason::PrototypeAccess { token, line },
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            RejectionReason::DynamicEval { .. } => Capability::DynamicEval,
            RejectionReason::ModuleLoading { .. } => Capability::ModuleLoading,
            RejectionReason::Timer { .. } => Capability::Timer,
            RejectionReason::Network { .. } => Capability::Network,
            RejectionReason::HostGlobal { .. } => Capability::HostGlobal,
            RejectionReason::PrototypeAccess { .. } => Capability::PrototypeAccess,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            RejectionReason::DynamicEval { line, .. }
            | RejectionReason::ModuleLoading { line, .. }
            | RejectionReason::Timer { line, .. }
            | RejectionReason::Network { line, .. }
            | RejectionReason::HostGlobal { line, .. }
            | RejectionReason::PrototypeAccess { line, .. } => *line,
        }
    }
}
