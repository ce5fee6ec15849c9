use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constant::Constant;
use crate::opcode::Op;

pub const VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u16),
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Where a closure's captured cell comes from when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capture {
    /// A cell held in a local slot of the creating frame.
    Local(u32),
    /// An upvalue of the creating closure.
    Upvalue(u32),
}

/// A function in the bytecode module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub arity: u8,
    /// Total local slots, parameters first.
    pub locals: u32,
    pub captures: Vec<Capture>,
    pub code: Vec<Op>,
}

/// A compiled bytecode module.
/// Function `entry` is the script body; running it yields the submission's entry closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub version: u16,
    pub constants: Vec<Constant>,
    pub functions: Vec<Function>,
    pub entry: u32,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            version: VERSION,
            constants: Vec::new(),
            functions: Vec::new(),
            entry: 0,
        }
    }

    /// Serialize to JSON (portable text format).
    pub fn to_json(&self) -> Result<String, BytecodeError> {
        serde_json::to_string_pretty(self).map_err(|e| BytecodeError::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, BytecodeError> {
        serde_json::from_str(json).map_err(|e| BytecodeError::Serialization(e.to_string()))
    }

    /// Add a constant (deduplicated) and return its index.
    pub fn add_const(&mut self, value: Constant) -> u32 {
        if let Some(idx) = self.constants.iter().position(|c| c.same_as(&value)) {
            return idx as u32;
        }
        let idx = self.constants.len() as u32;
        self.constants.push(value);
        idx
    }

    /// Add a function and return its index.
    pub fn add_function(&mut self, func: Function) -> u32 {
        let idx = self.functions.len() as u32;
        self.functions.push(func);
        idx
    }

    /// Reserve a function slot to be filled in later with `set_function`.
    pub fn reserve_function(&mut self, name: impl Into<String>) -> u32 {
        self.add_function(Function {
            name: name.into(),
            arity: 0,
            locals: 0,
            captures: Vec::new(),
            code: Vec::new(),
        })
    }

    pub fn set_function(&mut self, idx: u32, func: Function) {
        if let Some(slot) = self.functions.get_mut(idx as usize) {
            *slot = func;
        }
    }

    pub fn const_str(&self, idx: u32) -> Option<&str> {
        self.constants.get(idx as usize).and_then(Constant::as_str)
    }

    /// Structural checks so the VM can trust every index it decodes.
    pub fn validate(&self) -> Result<(), BytecodeError> {
        if self.version != VERSION {
            return Err(BytecodeError::UnsupportedVersion(self.version));
        }
        if self.functions.get(self.entry as usize).is_none() {
            return Err(invalid(format!("entry function {} missing", self.entry)));
        }
        for (fi, func) in self.functions.iter().enumerate() {
            if u32::from(func.arity) > func.locals {
                return Err(invalid(format!("function {fi}: arity exceeds locals")));
            }
            if !matches!(func.code.last(), Some(Op::Ret)) {
                return Err(invalid(format!("function {fi}: missing final Ret")));
            }
            for (pc, op) in func.code.iter().enumerate() {
                if let Some(target) = op.jump_target() {
                    if target as usize >= func.code.len() {
                        return Err(invalid(format!("function {fi} pc {pc}: jump out of range")));
                    }
                }
                if let Some(c) = op.constant_ref() {
                    let Some(constant) = self.constants.get(c as usize) else {
                        return Err(invalid(format!("function {fi} pc {pc}: constant {c} missing")));
                    };
                    let needs_name = !matches!(op, Op::PushConst(_));
                    if needs_name && constant.as_str().is_none() {
                        return Err(invalid(format!("function {fi} pc {pc}: expected name constant")));
                    }
                }
                match op {
                    Op::LoadLocal(s)
                    | Op::StoreLocal(s)
                    | Op::InitCell(s)
                    | Op::LoadCell(s)
                    | Op::StoreCell(s)
                        if *s >= func.locals =>
                    {
                        return Err(invalid(format!("function {fi} pc {pc}: local {s} out of range")));
                    }
                    Op::LoadUpvalue(u) | Op::StoreUpvalue(u) if *u as usize >= func.captures.len() => {
                        return Err(invalid(format!("function {fi} pc {pc}: upvalue {u} out of range")));
                    }
                    Op::MakeClosure(f) => {
                        let Some(target) = self.functions.get(*f as usize) else {
                            return Err(invalid(format!("function {fi} pc {pc}: closure {f} missing")));
                        };
                        for capture in &target.captures {
                            match capture {
                                Capture::Local(s) if *s >= func.locals => {
                                    return Err(invalid(format!(
                                        "function {fi} pc {pc}: captured local {s} out of range"
                                    )));
                                }
                                Capture::Upvalue(u) if *u as usize >= func.captures.len() => {
                                    return Err(invalid(format!(
                                        "function {fi} pc {pc}: captured upvalue {u} out of range"
                                    )));
                                }
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn invalid(msg: String) -> BytecodeError {
    BytecodeError::InvalidBytecode(msg)
}

/// A normalized submission: the compiled module plus the discovered entry-point name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableUnit {
    pub module: Module,
    pub entry_name: String,
}

impl ExecutableUnit {
    pub fn new(module: Module, entry_name: impl Into<String>) -> Self {
        ExecutableUnit {
            module,
            entry_name: entry_name.into(),
        }
    }
}
