use std::rc::Rc;
use std::time::{Duration, Instant};

use mystery_bytecode::{Capability, Capture, Function, Module, Op};

use crate::bindings;
use crate::builtins;
use crate::error::VmError;
use crate::heap::Heap;
use crate::value::{as_index, compare_with, parse_number, to_int32, Cell, Closure, Namespace, Value};

const MAX_STACK: usize = 1 << 16;
const MAX_CALL_DEPTH: usize = 256;
/// Intrinsics that call back into guest code nest on the host stack.
const MAX_NATIVE_DEPTH: usize = 32;
const DEADLINE_INTERVAL: u64 = 256;
/// Bytes a conversion may produce beyond the free heap before it is cut off.
const CONVERSION_SLACK: u64 = 4096;

/// Resource ceilings for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub time: Duration,
    pub memory_bytes: usize,
    pub max_steps: u64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        ExecutionLimits {
            time: Duration::from_millis(100),
            memory_bytes: 128 * 1024 * 1024,
            max_steps: 5_000_000,
        }
    }
}

#[derive(Debug)]
enum Slot {
    Plain(Value),
    Cell(Cell),
}

#[derive(Debug)]
struct Frame {
    closure: Rc<Closure>,
    ip: usize,
    base: usize,
    locals: Vec<Slot>,
}

/// The submission virtual machine. One instance per invocation.
pub struct Vm<'m> {
    module: &'m Module,
    consts: Vec<Value>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    heap: Heap,
    steps: u64,
    max_steps: u64,
    started: Instant,
    time_limit: Duration,
    native_depth: usize,
}

impl<'m> Vm<'m> {
    pub fn new(module: &'m Module, limits: ExecutionLimits) -> Result<Self, VmError> {
        module.validate()?;
        Ok(Vm {
            module,
            consts: module.constants.iter().map(Value::from).collect(),
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            heap: Heap::new(limits.memory_bytes),
            steps: 0,
            max_steps: limits.max_steps,
            started: Instant::now(),
            time_limit: limits.time,
            native_depth: 0,
        })
    }

    pub fn step_count(&self) -> u64 {
        self.steps
    }

    pub(crate) fn heap(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Evaluate the module's script body, returning whatever it yields
    /// (the submission's entry closure).
    pub fn run_script(&mut self) -> Result<Value, VmError> {
        let script = self.heap.closure(self.module.entry, Vec::new())?;
        self.call(script, Vec::new())
    }

    /// Call any callable value to completion.
    pub fn call(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, VmError> {
        match callee {
            Value::Closure(closure) => {
                if self.native_depth >= MAX_NATIVE_DEPTH {
                    return Err(VmError::StackOverflow);
                }
                let floor = self.frames.len();
                self.enter(closure, args)?;
                self.native_depth += 1;
                let result = self.run_until(floor);
                self.native_depth -= 1;
                result
            }
            Value::Native(ns, name) => {
                let result = self.scoped(|vm| builtins::call_static(vm, ns, name, args));
                self.check_deadline()?;
                result
            }
            Value::Namespace(ns) if ns != Namespace::Math && ns != Namespace::Global => {
                self.scoped(|vm| builtins::call_namespace(vm, ns, args))
            }
            other => Err(VmError::type_error(format!(
                "{} is not a function",
                other.type_of()
            ))),
        }
    }

    // --- Metering ---

    fn tick(&mut self) -> Result<(), VmError> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(VmError::StepLimit(self.max_steps));
        }
        if self.steps % DEADLINE_INTERVAL == 0 {
            self.steps += self.heap.take_work();
            self.check_deadline()?;
        }
        Ok(())
    }

    /// Account for `n` units of work done by an intrinsic.
    pub(crate) fn charge(&mut self, n: u64) -> Result<(), VmError> {
        self.steps = self
            .steps
            .saturating_add(n)
            .saturating_add(self.heap.take_work());
        if self.steps > self.max_steps {
            return Err(VmError::StepLimit(self.max_steps));
        }
        self.check_deadline()
    }

    fn check_deadline(&self) -> Result<(), VmError> {
        if self.started.elapsed() > self.time_limit {
            return Err(VmError::Timeout);
        }
        Ok(())
    }

    /// Run a conversion that may walk nested guest data. Each visited element
    /// and output byte costs one step, and output never outgrows the heap.
    fn metered<T>(&mut self, f: impl FnOnce(&mut u64) -> T) -> Result<T, VmError> {
        let room = self.heap.room() as u64;
        let steps = self.max_steps.saturating_sub(self.steps);
        let available = steps.min(room.saturating_add(CONVERSION_SLACK));
        let mut budget = available;
        let out = f(&mut budget);
        self.steps += available - budget;
        if budget == 0 {
            return Err(if room < steps {
                VmError::OutOfMemory
            } else {
                VmError::StepLimit(self.max_steps)
            });
        }
        self.check_deadline()?;
        Ok(out)
    }

    // --- Conversions shared with the intrinsics ---

    /// Run an intrinsic, releasing the text reservations it made on the way.
    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, VmError>) -> Result<T, VmError> {
        let mark = self.heap.scratch();
        let out = f(self);
        self.heap.release_scratch(mark);
        out
    }

    /// Pay for `bytes` of host text before building it.
    pub(crate) fn reserve_text(&mut self, bytes: usize) -> Result<(), VmError> {
        self.heap.reserve(bytes)?;
        self.charge(bytes as u64 / 64)
    }

    /// Turn reserved host text into a guest string.
    pub(crate) fn text_value(&mut self, text: &str) -> Result<Value, VmError> {
        self.heap.release_bytes(text.len());
        self.heap.string(text)
    }

    fn render(&mut self, v: &Value) -> Result<String, VmError> {
        self.metered(|budget| v.to_js_string_with(budget))
    }

    pub(crate) fn number(&mut self, v: &Value) -> Result<f64, VmError> {
        match v {
            Value::Number(n) => Ok(*n),
            Value::Array(_) => Ok(parse_number(&self.render(v)?)),
            other => Ok(other.to_number()),
        }
    }

    /// Append the string form of `v` to text under construction, reserving it first.
    pub(crate) fn append(&mut self, out: &mut String, v: &Value) -> Result<(), VmError> {
        match v {
            Value::Str(s) => {
                self.reserve_text(s.len())?;
                out.push_str(s);
            }
            other => {
                let text = if other.is_object() {
                    self.render(other)?
                } else {
                    other.to_js_string()
                };
                self.reserve_text(text.len())?;
                out.push_str(&text);
            }
        }
        Ok(())
    }

    /// ToString into host text. The bytes stay reserved until the calling intrinsic returns.
    pub(crate) fn stringify(&mut self, v: &Value) -> Result<String, VmError> {
        let mut out = String::new();
        self.append(&mut out, v)?;
        Ok(out)
    }

    /// ToString producing a guest value; existing strings are shared, new ones are charged.
    pub(crate) fn string_value(&mut self, v: &Value) -> Result<Value, VmError> {
        if let Value::Str(_) = v {
            return Ok(v.clone());
        }
        let s = self.stringify(v)?;
        self.text_value(&s)
    }

    pub(crate) fn compare(
        &mut self,
        a: &Value,
        b: &Value,
    ) -> Result<Option<std::cmp::Ordering>, VmError> {
        self.metered(|budget| compare_with(a, b, budget))
    }

    fn loose_equals(&mut self, a: &Value, b: &Value) -> Result<bool, VmError> {
        self.metered(|budget| a.loose_equals_with(b, budget))
    }

    // --- Frames ---

    fn function(&self, idx: u32) -> Result<&'m Function, VmError> {
        let module: &'m Module = self.module;
        module
            .functions
            .get(idx as usize)
            .ok_or_else(|| VmError::Internal(format!("function {idx} missing")))
    }

    fn enter(&mut self, closure: Rc<Closure>, mut args: Vec<Value>) -> Result<(), VmError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(VmError::StackOverflow);
        }
        let func = self.function(closure.func)?;
        args.truncate(func.arity as usize);
        args.resize(func.locals as usize, Value::Undefined);
        let frame = Frame {
            closure,
            ip: 0,
            base: self.stack.len(),
            locals: args.into_iter().map(Slot::Plain).collect(),
        };
        self.frames.push(frame);
        Ok(())
    }

    fn frame(&mut self) -> Result<&mut Frame, VmError> {
        self.frames
            .last_mut()
            .ok_or_else(|| VmError::Internal("no active frame".into()))
    }

    fn slot(&mut self, idx: u32) -> Result<&mut Slot, VmError> {
        self.frame()?
            .locals
            .get_mut(idx as usize)
            .ok_or_else(|| VmError::Internal(format!("local {idx} out of range")))
    }

    fn upvalue(&mut self, idx: u32) -> Result<Cell, VmError> {
        self.frame()?
            .closure
            .upvalues
            .get(idx as usize)
            .cloned()
            .ok_or_else(|| VmError::Internal(format!("upvalue {idx} out of range")))
    }

    /// The cell behind a local slot, boxing a plain value on first capture.
    fn capture_local(&mut self, idx: u32) -> Result<Cell, VmError> {
        if let Slot::Cell(cell) = self.slot(idx)? {
            return Ok(cell.clone());
        }
        let current = match self.slot(idx)? {
            Slot::Plain(v) => std::mem::take(v),
            Slot::Cell(_) => Value::Undefined,
        };
        let cell = self.heap.cell(current)?;
        *self.slot(idx)? = Slot::Cell(cell.clone());
        Ok(cell)
    }

    fn jump(&mut self, target: u32) -> Result<(), VmError> {
        self.frame()?.ip = target as usize;
        Ok(())
    }

    // --- Operand stack ---

    fn push(&mut self, v: Value) -> Result<(), VmError> {
        if self.stack.len() >= MAX_STACK {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::Internal("stack underflow".into()))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, VmError> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| VmError::Internal("stack underflow".into()))?;
        Ok(self.stack.split_off(at))
    }

    fn peek(&self) -> Result<&Value, VmError> {
        self.stack
            .last()
            .ok_or_else(|| VmError::Internal("stack underflow".into()))
    }

    fn name(&self, idx: u32) -> Result<&'m str, VmError> {
        let module: &'m Module = self.module;
        module
            .const_str(idx)
            .ok_or_else(|| VmError::Internal(format!("constant {idx} is not a name")))
    }

    /// Copy the items of a spread argument list.
    fn spread_args(&mut self, list: Value) -> Result<Vec<Value>, VmError> {
        match list {
            Value::Array(items) => Ok(items.borrow().clone()),
            _ => Err(VmError::Internal("spread arguments must be an array".into())),
        }
    }

    // --- Main loop ---

    fn run_until(&mut self, floor: usize) -> Result<Value, VmError> {
        loop {
            self.tick()?;
            let module: &'m Module = self.module;
            let frame = self.frame()?;
            let func = module
                .functions
                .get(frame.closure.func as usize)
                .ok_or_else(|| VmError::Internal("frame function missing".into()))?;
            let op = *func
                .code
                .get(frame.ip)
                .ok_or_else(|| VmError::Internal(format!("ip {} out of range", frame.ip)))?;
            frame.ip += 1;

            match op {
                Op::PushConst(idx) => {
                    let v = self
                        .consts
                        .get(idx as usize)
                        .cloned()
                        .ok_or_else(|| VmError::Internal(format!("constant {idx} missing")))?;
                    self.push(v)?;
                }
                Op::PushUndefined => self.push(Value::Undefined)?,
                Op::LoadLocal(idx) | Op::LoadCell(idx) => {
                    let v = match self.slot(idx)? {
                        Slot::Plain(v) => v.clone(),
                        Slot::Cell(cell) => cell.borrow().clone(),
                    };
                    self.push(v)?;
                }
                Op::StoreLocal(idx) => {
                    let v = self.pop()?;
                    *self.slot(idx)? = Slot::Plain(v);
                }
                Op::InitCell(idx) => {
                    let v = self.pop()?;
                    let cell = self.heap.cell(v)?;
                    *self.slot(idx)? = Slot::Cell(cell);
                }
                Op::StoreCell(idx) => {
                    let v = self.pop()?;
                    match self.slot(idx)? {
                        Slot::Cell(cell) => *cell.borrow_mut() = v,
                        Slot::Plain(slot) => *slot = v,
                    }
                }
                Op::LoadUpvalue(idx) => {
                    let v = self.upvalue(idx)?.borrow().clone();
                    self.push(v)?;
                }
                Op::StoreUpvalue(idx) => {
                    let v = self.pop()?;
                    *self.upvalue(idx)?.borrow_mut() = v;
                }
                Op::LoadGlobal(idx) => {
                    let v = bindings::resolve(self.name(idx)?)?;
                    self.push(v)?;
                }
                Op::TypeOfGlobal(idx) => {
                    let t = bindings::type_of(self.name(idx)?);
                    self.push(Value::str(t))?;
                }
                Op::MakeClosure(idx) => {
                    let target = self.function(idx)?;
                    let mut upvalues = Vec::with_capacity(target.captures.len());
                    for capture in &target.captures {
                        let cell = match *capture {
                            Capture::Local(slot) => self.capture_local(slot)?,
                            Capture::Upvalue(up) => self.upvalue(up)?,
                        };
                        upvalues.push(cell);
                    }
                    let closure = self.heap.closure(idx, upvalues)?;
                    self.push(closure)?;
                }
                Op::Call(argc) => {
                    let args = self.pop_n(argc as usize)?;
                    let callee = self.pop()?;
                    self.dispatch(callee, args)?;
                }
                Op::CallSpread => {
                    let list = self.pop()?;
                    let args = self.spread_args(list)?;
                    let callee = self.pop()?;
                    self.dispatch(callee, args)?;
                }
                Op::CallMethod(name, argc) => {
                    let args = self.pop_n(argc as usize)?;
                    let receiver = self.pop()?;
                    let name = self.name(name)?;
                    let result = self.call_method(receiver, name, args)?;
                    self.push(result)?;
                }
                Op::CallMethodSpread(name) => {
                    let list = self.pop()?;
                    let args = self.spread_args(list)?;
                    let receiver = self.pop()?;
                    let name = self.name(name)?;
                    let result = self.call_method(receiver, name, args)?;
                    self.push(result)?;
                }
                Op::New(name, argc) => {
                    let args = self.pop_n(argc as usize)?;
                    let name = self.name(name)?;
                    if let Some(capability) = Capability::for_identifier(name) {
                        return Err(VmError::CapabilityDenied {
                            capability,
                            name: name.to_string(),
                        });
                    }
                    let v = self.scoped(|vm| builtins::construct(vm, name, args))?;
                    self.push(v)?;
                }
                Op::Ret => {
                    let result = self.pop()?;
                    let frame = self
                        .frames
                        .pop()
                        .ok_or_else(|| VmError::Internal("return without frame".into()))?;
                    self.stack.truncate(frame.base);
                    if self.frames.len() <= floor {
                        return Ok(result);
                    }
                    self.push(result)?;
                }
                Op::Jmp(target) => self.jump(target)?,
                Op::JmpIf(target) => {
                    if self.pop()?.is_truthy() {
                        self.jump(target)?;
                    }
                }
                Op::JmpIfNot(target) => {
                    if !self.pop()?.is_truthy() {
                        self.jump(target)?;
                    }
                }
                Op::JmpIfNotNullish(target) => {
                    if !self.pop()?.is_nullish() {
                        self.jump(target)?;
                    }
                }
                Op::GetProp(name) => {
                    let name = self.name(name)?;
                    deny_property(name)?;
                    let object = self.pop()?;
                    let v = self.scoped(|vm| builtins::get_property(vm, &object, name))?;
                    self.push(v)?;
                }
                Op::GetIndex => {
                    let index = self.pop()?;
                    let object = self.pop()?;
                    let v = self.get_index(&object, &index)?;
                    self.push(v)?;
                }
                Op::SetIndex => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let object = self.pop()?;
                    self.set_index(&object, &index, value.clone())?;
                    self.push(value)?;
                }
                Op::MakeArray(n) => {
                    let items = self.pop_n(n as usize)?;
                    let array = self.heap.array(items)?;
                    self.push(array)?;
                }
                Op::ArrayPush => {
                    let v = self.pop()?;
                    self.heap.charge_slots(1)?;
                    match self.peek()? {
                        Value::Array(items) => items.borrow_mut().push(v),
                        _ => return Err(VmError::Internal("array literal target missing".into())),
                    }
                }
                Op::ArrayExtend => {
                    let iterable = self.pop()?;
                    let items = self.iterate(&iterable)?;
                    self.heap.charge_slots(items.len())?;
                    match self.peek()? {
                        Value::Array(target) => target.borrow_mut().extend(items),
                        _ => return Err(VmError::Internal("array literal target missing".into())),
                    }
                }
                Op::Iterable => {
                    let v = self.pop()?;
                    let view = match &v {
                        Value::Array(_) => v.clone(),
                        _ => {
                            let items = self.iterate(&v)?;
                            self.heap.array(items)?
                        }
                    };
                    self.push(view)?;
                }
                Op::Add => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let v = self.add(&a, &b)?;
                    self.push(v)?;
                }
                Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::Pow => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let (x, y) = (self.number(&a)?, self.number(&b)?);
                    let n = match op {
                        Op::Sub => x - y,
                        Op::Mul => x * y,
                        Op::Div => x / y,
                        Op::Mod => x % y,
                        _ => power(x, y),
                    };
                    self.push(Value::Number(n))?;
                }
                Op::Neg => {
                    let a = self.pop()?;
                    let n = self.number(&a)?;
                    self.push(Value::Number(-n))?;
                }
                Op::ToNumber => {
                    let a = self.pop()?;
                    let n = self.number(&a)?;
                    self.push(Value::Number(n))?;
                }
                Op::BitAnd | Op::BitOr | Op::BitXor | Op::Shl | Op::Shr | Op::UShr => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let (x, y) = (to_int32(self.number(&a)?), to_int32(self.number(&b)?));
                    let shift = (y as u32) & 31;
                    let n = match op {
                        Op::BitAnd => f64::from(x & y),
                        Op::BitOr => f64::from(x | y),
                        Op::BitXor => f64::from(x ^ y),
                        Op::Shl => f64::from(x.wrapping_shl(shift)),
                        Op::Shr => f64::from(x >> shift),
                        _ => f64::from((x as u32) >> shift),
                    };
                    self.push(Value::Number(n))?;
                }
                Op::BitNot => {
                    let a = self.pop()?;
                    let x = to_int32(self.number(&a)?);
                    self.push(Value::Number(f64::from(!x)))?;
                }
                Op::StrictEq | Op::StrictNeq => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let eq = a.strict_equals(&b);
                    self.push(Value::Bool(eq == matches!(op, Op::StrictEq)))?;
                }
                Op::LooseEq | Op::LooseNeq => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let eq = self.loose_equals(&a, &b)?;
                    self.push(Value::Bool(eq == matches!(op, Op::LooseEq)))?;
                }
                Op::Lt | Op::Lte | Op::Gt | Op::Gte => {
                    use std::cmp::Ordering::*;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let ord = self.compare(&a, &b)?;
                    let result = match (op, ord) {
                        (_, None) => false,
                        (Op::Lt, Some(o)) => o == Less,
                        (Op::Lte, Some(o)) => o != Greater,
                        (Op::Gt, Some(o)) => o == Greater,
                        (_, Some(o)) => o != Less,
                    };
                    self.push(Value::Bool(result))?;
                }
                Op::Not => {
                    let a = self.pop()?;
                    self.push(Value::Bool(!a.is_truthy()))?;
                }
                Op::TypeOf => {
                    let a = self.pop()?;
                    self.push(Value::str(a.type_of()))?;
                }
                Op::Throw => {
                    let v = self.pop()?;
                    let text = self.stringify(&v)?;
                    return Err(VmError::Thrown(text));
                }
                Op::Pop => {
                    self.pop()?;
                }
                Op::Dup => {
                    let v = self.peek()?.clone();
                    self.push(v)?;
                }
                Op::Dup2 => {
                    let pair = self.pop_n(2)?;
                    self.push(pair[0].clone())?;
                    self.push(pair[1].clone())?;
                    self.push(pair[0].clone())?;
                    self.push(pair[1].clone())?;
                }
            }
        }
    }

    /// Call from inside the loop: guest closures get a frame on the VM stack,
    /// intrinsics run directly.
    fn dispatch(&mut self, callee: Value, args: Vec<Value>) -> Result<(), VmError> {
        match callee {
            Value::Closure(closure) => self.enter(closure, args),
            other => {
                let v = self.call(other, args)?;
                self.push(v)
            }
        }
    }

    fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, VmError> {
        deny_property(name)?;
        let result = self.scoped(|vm| builtins::call_method(vm, receiver, name, args));
        self.check_deadline()?;
        result
    }

    fn add(&mut self, a: &Value, b: &Value) -> Result<Value, VmError> {
        if let (Value::Number(x), Value::Number(y)) = (a, b) {
            return Ok(Value::Number(x + y));
        }
        self.scoped(|vm| {
            let pa = vm.primitive(a)?;
            let pb = vm.primitive(b)?;
            if matches!(pa, Value::Str(_)) || matches!(pb, Value::Str(_)) {
                let mut joined = String::new();
                vm.append(&mut joined, &pa)?;
                vm.append(&mut joined, &pb)?;
                return vm.text_value(&joined);
            }
            Ok(Value::Number(pa.to_number() + pb.to_number()))
        })
    }

    /// Primitive form used by `+`; objects become their string form.
    fn primitive(&mut self, v: &Value) -> Result<Value, VmError> {
        if v.is_object() {
            let text = self.render(v)?;
            self.reserve_text(text.len())?;
            Ok(Value::Str(Rc::from(text)))
        } else {
            Ok(v.clone())
        }
    }

    fn get_index(&mut self, object: &Value, index: &Value) -> Result<Value, VmError> {
        if object.is_nullish() {
            let key = self.stringify(index)?;
            return Err(VmError::type_error(format!(
                "Cannot read properties of {} (reading '{key}')",
                object.to_js_string()
            )));
        }
        match (object, as_index(index)) {
            (Value::Array(items), Some(i)) => Ok(items.borrow().get(i).cloned().unwrap_or_default()),
            (Value::Str(s), Some(i)) => {
                self.charge(i as u64 / 16)?;
                match s.encode_utf16().nth(i) {
                    Some(unit) => Ok(Value::str(&String::from_utf16_lossy(&[unit]))),
                    None => Ok(Value::Undefined),
                }
            }
            (_, Some(_)) => Ok(Value::Undefined),
            (_, None) => {
                let key = self.stringify(index)?;
                deny_property(&key)?;
                builtins::get_property(self, object, &key)
            }
        }
    }

    fn set_index(&mut self, object: &Value, index: &Value, value: Value) -> Result<(), VmError> {
        if object.is_nullish() {
            let key = self.stringify(index)?;
            return Err(VmError::type_error(format!(
                "Cannot set properties of {} (setting '{key}')",
                object.to_js_string()
            )));
        }
        let Value::Array(items) = object else {
            return Ok(());
        };
        let Some(i) = as_index(index) else {
            let key = self.stringify(index)?;
            return deny_property(&key);
        };
        let len = items.borrow().len();
        if i >= len {
            self.heap.charge_slots(i + 1 - len)?;
            self.charge((i - len) as u64)?;
            items.borrow_mut().resize(i + 1, Value::Undefined);
        }
        if let Some(slot) = items.borrow_mut().get_mut(i) {
            *slot = value;
        }
        Ok(())
    }

    /// Elements produced by iterating a value, as `for ... of` and spread see them.
    pub(crate) fn iterate(&mut self, v: &Value) -> Result<Vec<Value>, VmError> {
        let items = match v {
            Value::Array(items) | Value::Set(items) => items.borrow().clone(),
            Value::Map(entries) => {
                let pairs: Vec<(Value, Value)> = entries.borrow().clone();
                let mut out = Vec::with_capacity(pairs.len());
                for (k, val) in pairs {
                    out.push(self.heap.array(vec![k, val])?);
                }
                out
            }
            Value::Str(s) => {
                self.heap.charge_slots(s.len())?;
                s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect()
            }
            other => {
                return Err(VmError::type_error(format!(
                    "{} is not iterable",
                    other.to_js_string()
                )))
            }
        };
        self.charge(items.len() as u64)?;
        Ok(items)
    }
}

impl Drop for Vm<'_> {
    fn drop(&mut self) {
        // Sever guest containers before the stack and frames release their references.
        self.heap.release();
    }
}

fn deny_property(name: &str) -> Result<(), VmError> {
    match Capability::for_property(name) {
        Some(capability) => Err(VmError::CapabilityDenied {
            capability,
            name: name.to_string(),
        }),
        None => Ok(()),
    }
}

/// Exponentiation with the guest's NaN rules for `1 ** NaN` and `(±1) ** ±Infinity`.
fn power(base: f64, exp: f64) -> f64 {
    if exp.is_nan() || (base.abs() == 1.0 && exp.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exp)
}
