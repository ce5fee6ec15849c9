pub mod capability;
pub mod constant;
pub mod module;
pub mod opcode;

pub use capability::Capability;
pub use constant::Constant;
pub use module::{BytecodeError, Capture, ExecutableUnit, Function, Module};
pub use opcode::Op;
