use serde::{Deserialize, Serialize};
use std::fmt;

/// Host capabilities a submission might try to reach.
/// None of them is ever granted; the scanner and the VM both deny them by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    DynamicEval,
    ModuleLoading,
    Timer,
    Network,
    HostGlobal,
    PrototypeAccess,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::DynamicEval,
        Capability::ModuleLoading,
        Capability::Timer,
        Capability::Network,
        Capability::HostGlobal,
        Capability::PrototypeAccess,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::DynamicEval => "dynamic evaluation",
            Capability::ModuleLoading => "module loading",
            Capability::Timer => "timers",
            Capability::Network => "network access",
            Capability::HostGlobal => "host global access",
            Capability::PrototypeAccess => "prototype access",
        }
    }

    /// Capability guarded by a global identifier, if any.
    pub fn for_identifier(name: &str) -> Option<Self> {
        match name {
            "eval" | "Function" => Some(Capability::DynamicEval),
            "require" | "import" => Some(Capability::ModuleLoading),
            "setTimeout" | "setInterval" | "setImmediate" | "queueMicrotask" => {
                Some(Capability::Timer)
            }
            "fetch" | "XMLHttpRequest" | "WebSocket" => Some(Capability::Network),
            "process" | "global" | "globalThis" | "window" | "Deno" | "Bun" => {
                Some(Capability::HostGlobal)
            }
            _ => None,
        }
    }

    /// Capability guarded by a property name, if any.
    pub fn for_property(name: &str) -> Option<Self> {
        match name {
            "constructor" | "__proto__" | "prototype" => Some(Capability::PrototypeAccess),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
