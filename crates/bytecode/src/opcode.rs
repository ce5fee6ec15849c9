use serde::{Deserialize, Serialize};

/// Instructions for the submission VM.
/// Stack-based: operands are pushed/popped from the operand stack.
/// Jump operands are absolute instruction offsets within the current function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Push a constant from the constant pool onto the stack.
    PushConst(u32),
    PushUndefined,

    /// Load a plain local slot onto the stack.
    LoadLocal(u32),
    /// Pop the top of stack into a plain local slot.
    StoreLocal(u32),

    /// Pop a value and place it in a fresh cell stored in the local slot.
    /// Used for bindings captured by nested functions.
    InitCell(u32),
    /// Load through the cell held in a local slot.
    LoadCell(u32),
    /// Pop a value and write it through the cell held in a local slot.
    StoreCell(u32),
    /// Load through the current closure's captured cell.
    LoadUpvalue(u32),
    /// Pop a value and write it through the current closure's captured cell.
    StoreUpvalue(u32),

    /// Resolve a host binding by name (constant index).
    LoadGlobal(u32),
    /// Push `typeof <name>` without failing on unbound names.
    TypeOfGlobal(u32),

    /// Create a closure over function index, capturing per the function's capture list.
    MakeClosure(u32),

    /// Pop N args and the callee below them. Pushes the return value.
    Call(u8),
    /// Pop N args and the receiver below them, call method by name (constant index).
    CallMethod(u32, u8),
    /// Pop an argument array and the callee below it.
    CallSpread,
    /// Pop an argument array and the receiver below it, call method by name.
    CallMethodSpread(u32),
    /// Construct an intrinsic by name (constant index) with N args.
    New(u32, u8),

    /// Return from the current function. Pops return value from stack.
    Ret,

    /// Unconditional jump to instruction offset.
    Jmp(u32),
    /// Pop top of stack; jump if truthy.
    JmpIf(u32),
    /// Pop top of stack; jump if falsy.
    JmpIfNot(u32),
    /// Pop top of stack; jump unless it is `null` or `undefined`.
    JmpIfNotNullish(u32),

    /// Pop an object, push its named property (constant index).
    GetProp(u32),
    /// Pop index and object, push the element.
    GetIndex,
    /// Pop value, index and object; store the element and push the value back.
    SetIndex,

    /// Pop N values into a new array.
    MakeArray(u32),
    /// Pop a value and append it to the array beneath it (array stays on the stack).
    ArrayPush,
    /// Pop an iterable and append its elements to the array beneath it.
    ArrayExtend,
    /// Replace the top of stack with an array view suitable for `for ... of`.
    Iterable,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Neg,
    ToNumber,

    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Shl,
    Shr,
    UShr,

    // Comparison
    StrictEq,
    StrictNeq,
    LooseEq,
    LooseNeq,
    Lt,
    Lte,
    Gt,
    Gte,

    // Logic
    Not,
    TypeOf,

    /// Pop a value and raise it as a guest exception.
    Throw,

    // Stack manipulation
    Pop,
    Dup,
    /// Duplicate the top two values, preserving order.
    Dup2,
}

impl Op {
    /// Jump target, if this instruction transfers control.
    pub fn jump_target(&self) -> Option<u32> {
        match self {
            Op::Jmp(t) | Op::JmpIf(t) | Op::JmpIfNot(t) | Op::JmpIfNotNullish(t) => Some(*t),
            _ => None,
        }
    }

    /// Constant-pool index referenced by this instruction, if any.
    pub fn constant_ref(&self) -> Option<u32> {
        match self {
            Op::PushConst(c)
            | Op::LoadGlobal(c)
            | Op::TypeOfGlobal(c)
            | Op::CallMethod(c, _)
            | Op::CallMethodSpread(c)
            | Op::New(c, _)
            | Op::GetProp(c) => Some(*c),
            _ => None,
        }
    }
}
