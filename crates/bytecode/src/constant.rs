use serde::{Deserialize, Serialize};
use std::fmt;

/// Literal values stored in a module's constant pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

impl Constant {
    /// Identity used for constant-pool deduplication.
    /// Numbers compare by bit pattern so `0` and `-0` stay distinct.
    pub fn same_as(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Undefined => write!(f, "undefined"),
            Constant::Null => write!(f, "null"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Number(n) => write!(f, "{n}"),
            Constant::Str(s) => write!(f, "{s:?}"),
        }
    }
}
