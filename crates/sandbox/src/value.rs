use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use mystery_bytecode::Constant;

pub type List = Rc<Shared<Vec<Value>>>;
pub type Entries = Rc<Shared<Vec<(Value, Value)>>>;
pub type Cell = Rc<Shared<Value>>;

const MAX_DROP_DEPTH: usize = 128;

thread_local! {
    static DROP_DEPTH: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
    static DEFERRED: RefCell<Vec<Value>> = const { RefCell::new(Vec::new()) };
}

/// Contents of a mutable guest container.
pub trait Contents: Default {
    fn drain_into(&mut self, out: &mut Vec<Value>);
}

impl Contents for Vec<Value> {
    fn drain_into(&mut self, out: &mut Vec<Value>) {
        out.append(self);
    }
}

impl Contents for Vec<(Value, Value)> {
    fn drain_into(&mut self, out: &mut Vec<Value>) {
        for (k, v) in self.drain(..) {
            out.push(k);
            out.push(v);
        }
    }
}

impl Contents for Value {
    fn drain_into(&mut self, out: &mut Vec<Value>) {
        out.push(std::mem::take(self));
    }
}

/// Interior-mutable container whose drop never recurses deeper than
/// `MAX_DROP_DEPTH`, so arbitrarily nested guest data can be released.
#[derive(Debug, Default)]
pub struct Shared<T: Contents>(RefCell<T>);

impl<T: Contents> Shared<T> {
    pub fn new(value: T) -> Rc<Self> {
        Rc::new(Shared(RefCell::new(value)))
    }

    /// Move the contents out, leaving the container empty.
    pub fn take_into(&self, out: &mut Vec<Value>) {
        if let Ok(mut inner) = self.0.try_borrow_mut() {
            inner.drain_into(out);
        }
    }
}

impl<T: Contents> Deref for Shared<T> {
    type Target = RefCell<T>;

    fn deref(&self) -> &RefCell<T> {
        &self.0
    }
}

impl<T: Contents> Drop for Shared<T> {
    fn drop(&mut self) {
        let depth = DROP_DEPTH.get();
        if depth >= MAX_DROP_DEPTH {
            DEFERRED.with_borrow_mut(|queue| self.0.get_mut().drain_into(queue));
            return;
        }
        DROP_DEPTH.set(depth + 1);
        drop(std::mem::take(self.0.get_mut()));
        if depth == 0 {
            loop {
                let batch = DEFERRED.with_borrow_mut(std::mem::take);
                if batch.is_empty() {
                    break;
                }
                drop(batch);
            }
        }
        DROP_DEPTH.set(depth);
    }
}

/// Work allowance for conversions performed outside a metered VM context.
pub const DISPLAY_BUDGET: u64 = 1 << 20;
const MAX_STRINGIFY_DEPTH: usize = 64;

/// A guest function: compiled code plus its captured cells.
#[derive(Debug)]
pub struct Closure {
    pub func: u32,
    pub upvalues: Vec<Cell>,
}

/// A guest error object such as `new TypeError("bad")`.
#[derive(Debug)]
pub struct ErrorObject {
    pub name: &'static str,
    pub message: String,
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

/// Host objects exposed to guests by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Global,
    Math,
    Number,
    Array,
    String,
    Boolean,
}

impl Namespace {
    pub fn name(&self) -> &'static str {
        match self {
            Namespace::Global => "globalThis",
            Namespace::Math => "Math",
            Namespace::Number => "Number",
            Namespace::Array => "Array",
            Namespace::String => "String",
            Namespace::Boolean => "Boolean",
        }
    }
}

/// Runtime values inside the sandbox.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(List),
    /// Insertion-ordered, unique under SameValueZero.
    Set(List),
    Map(Entries),
    Closure(Rc<Closure>),
    /// A static intrinsic such as `Math.abs`.
    Native(Namespace, &'static str),
    Namespace(Namespace),
    Error(Rc<ErrorObject>),
}

impl From<&Constant> for Value {
    fn from(c: &Constant) -> Self {
        match c {
            Constant::Undefined => Value::Undefined,
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Number(n) => Value::Number(*n),
            Constant::Str(s) => Value::Str(Rc::from(s.as_str())),
        }
    }
}

/// Canonical index for array access: a non-negative integral number or numeric string.
pub fn as_index(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < 9_007_199_254_740_992.0 => {
            Some(*n as usize)
        }
        Value::Str(s) => {
            let i: usize = s.parse().ok()?;
            (i.to_string() == **s).then_some(i)
        }
        _ => None,
    }
}

/// ToInt32, as used by the bitwise operators.
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32 as i32
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".into() } else { "-Infinity".into() };
    }
    if n == 0.0 {
        return "0".into();
    }
    let abs = n.abs();
    if abs >= 1e21 || abs < 1e-6 {
        let s = format!("{:e}", n);
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => s,
        };
    }
    if n.fract() == 0.0 {
        return format!("{}", n as i64);
    }
    format!("{}", n)
}

pub fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    let (sign, body) = match t.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, t.strip_prefix('+').unwrap_or(t)),
    };
    if body == "Infinity" {
        return sign * f64::INFINITY;
    }
    let radix = [("0x", 16), ("0X", 16), ("0b", 2), ("0B", 2), ("0o", 8), ("0O", 8)]
        .iter()
        .find_map(|(prefix, radix)| body.strip_prefix(prefix).map(|digits| (digits, *radix)));
    if let Some((digits, radix)) = radix {
        // Signed radix literals are NaN.
        if sign < 0.0 || t.starts_with('+') {
            return f64::NAN;
        }
        return u64::from_str_radix(digits, radix)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    let valid = body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !valid || body.starts_with(['e', 'E']) {
        return f64::NAN;
    }
    body.parse::<f64>().map(|v| sign * v).unwrap_or(f64::NAN)
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Native(..))
            || matches!(self, Value::Namespace(ns) if *ns != Namespace::Math && *ns != Namespace::Global)
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            v if v.is_callable() => "function",
            _ => "object",
        }
    }

    pub fn is_object(&self) -> bool {
        !matches!(
            self,
            Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) | Value::Str(_)
        )
    }

    pub fn to_number(&self) -> f64 {
        let mut budget = DISPLAY_BUDGET;
        self.to_number_with(&mut budget)
    }

    pub fn to_number_with(&self, budget: &mut u64) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => parse_number(s),
            Value::Array(_) => parse_number(&self.to_js_string_with(budget)),
            _ => f64::NAN,
        }
    }

    pub fn to_js_string(&self) -> String {
        let mut budget = DISPLAY_BUDGET;
        self.to_js_string_with(&mut budget)
    }

    /// ToString with a work budget: each visited element and each output byte costs one unit.
    /// Output is truncated once the budget reaches zero.
    pub fn to_js_string_with(&self, budget: &mut u64) -> String {
        let mut out = String::new();
        self.write_js_string(&mut out, 0, budget);
        out
    }

    fn write_js_string(&self, out: &mut String, depth: usize, budget: &mut u64) {
        if *budget == 0 {
            return;
        }
        *budget -= 1;
        let text: Cow<'_, str> = match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string().into(),
            Value::Number(n) => format_number(*n).into(),
            Value::Str(s) => Cow::Borrowed(&**s),
            Value::Array(items) => {
                // Arrays nested this deep are almost certainly cyclic; JS prints them empty.
                if depth >= MAX_STRINGIFY_DEPTH {
                    return;
                }
                let Ok(items) = items.try_borrow() else {
                    return;
                };
                for (i, v) in items.iter().enumerate() {
                    if *budget == 0 {
                        return;
                    }
                    if i > 0 {
                        out.push(',');
                        *budget = budget.saturating_sub(1);
                    }
                    if !v.is_nullish() {
                        v.write_js_string(out, depth + 1, budget);
                    }
                }
                return;
            }
            Value::Set(_) => "[object Set]".into(),
            Value::Map(_) => "[object Map]".into(),
            Value::Closure(_) | Value::Native(..) => "function () { [native code] }".into(),
            Value::Namespace(ns) => format!("[object {}]", ns.name()).into(),
            Value::Error(e) => e.to_string().into(),
        };
        let take = text.len().min(*budget as usize);
        let mut cut = take;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push_str(&text[..cut]);
        *budget -= take as u64;
    }

    /// Primitive form used by `+` and relational comparisons.
    pub fn to_primitive_with(&self, budget: &mut u64) -> Value {
        if self.is_object() {
            Value::Str(Rc::from(self.to_js_string_with(budget)))
        } else {
            self.clone()
        }
    }

    fn same_reference(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) | (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            (Value::Native(n1, a), Value::Native(n2, b)) => n1 == n2 && a == b,
            (Value::Namespace(a), Value::Namespace(b)) => a == b,
            _ => false,
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => self.same_reference(other),
        }
    }

    /// Equality used by `includes`, `Set` and `Map`: like `===` but NaN equals NaN.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }

    pub fn loose_equals_with(&self, other: &Value, budget: &mut u64) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Str(_)) | (Value::Str(_), Value::Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Value::Bool(_), _) => Value::Number(self.to_number()).loose_equals_with(other, budget),
            (_, Value::Bool(_)) => self.loose_equals_with(&Value::Number(other.to_number()), budget),
            (Value::Number(_) | Value::Str(_), b) if b.is_object() => {
                self.loose_equals_with(&b.to_primitive_with(budget), budget)
            }
            (a, Value::Number(_) | Value::Str(_)) if a.is_object() => {
                a.to_primitive_with(budget).loose_equals_with(other, budget)
            }
            _ => self.strict_equals(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(_) => write!(f, "[{}]", self.to_js_string()),
            other => write!(f, "{}", other.to_js_string()),
        }
    }
}

/// Abstract relational comparison. `None` when either side is NaN.
pub fn compare_with(a: &Value, b: &Value, budget: &mut u64) -> Option<std::cmp::Ordering> {
    let (pa, pb) = (a.to_primitive_with(budget), b.to_primitive_with(budget));
    if let (Value::Str(x), Value::Str(y)) = (&pa, &pb) {
        return Some(x.encode_utf16().cmp(y.encode_utf16()));
    }
    pa.to_number().partial_cmp(&pb.to_number())
}
