use mystery_bytecode::Capability;

use crate::error::VmError;
use crate::value::{Namespace, Value};

/// Global functions callable without a namespace.
const GLOBAL_FUNCTIONS: &[&str] = &["isNaN", "isFinite", "parseInt", "parseFloat"];

/// Resolve a free identifier against the sandbox allow-list.
///
/// Names that map to a host capability are refused outright; every other
/// unknown name is a reference error, as in an ordinary strict-mode script.
pub fn resolve(name: &str) -> Result<Value, VmError> {
    if let Some(value) = lookup(name) {
        return Ok(value);
    }
    if let Some(capability) = Capability::for_identifier(name) {
        log::warn!("guest requested '{name}', denied ({capability})");
        return Err(VmError::CapabilityDenied {
            capability,
            name: name.to_string(),
        });
    }
    Err(VmError::ReferenceError(format!("{name} is not defined")))
}

/// `typeof name` never throws: unbound and denied names read as "undefined".
pub fn type_of(name: &str) -> &'static str {
    lookup(name).map_or("undefined", |v| v.type_of())
}

fn lookup(name: &str) -> Option<Value> {
    let value = match name {
        "Math" => Value::Namespace(Namespace::Math),
        "Number" => Value::Namespace(Namespace::Number),
        "Array" => Value::Namespace(Namespace::Array),
        "String" => Value::Namespace(Namespace::String),
        "Boolean" => Value::Namespace(Namespace::Boolean),
        "Infinity" => Value::Number(f64::INFINITY),
        "NaN" => Value::Number(f64::NAN),
        "undefined" => Value::Undefined,
        _ => {
            let f = GLOBAL_FUNCTIONS.iter().find(|f| **f == name)?;
            Value::Native(Namespace::Global, f)
        }
    };
    Some(value)
}
