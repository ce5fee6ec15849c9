//! Intrinsic objects and methods available to guest code.
//!
//! Every intrinsic that walks guest data charges the VM for the work, and no
//! `RefCell` borrow is held while a guest callback runs.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::VmError;
use crate::value::{
    as_index, format_number, Entries, ErrorObject, List, Namespace, Value,
};
use crate::vm::Vm;

const MATH_FUNCTIONS: &[&str] = &[
    "abs", "floor", "ceil", "round", "trunc", "sign", "sqrt", "cbrt", "pow", "max", "min", "log",
    "log2", "log10", "exp", "hypot",
];
const NUMBER_FUNCTIONS: &[&str] = &[
    "isInteger",
    "isFinite",
    "isNaN",
    "isSafeInteger",
    "parseInt",
    "parseFloat",
];
const ARRAY_FUNCTIONS: &[&str] = &["isArray", "from", "of"];

fn statics(ns: Namespace) -> &'static [&'static str] {
    match ns {
        Namespace::Math => MATH_FUNCTIONS,
        Namespace::Number => NUMBER_FUNCTIONS,
        Namespace::Array => ARRAY_FUNCTIONS,
        Namespace::Global => &["isNaN", "isFinite", "parseInt", "parseFloat"],
        Namespace::String | Namespace::Boolean => &[],
    }
}

fn static_name(ns: Namespace, name: &str) -> Option<&'static str> {
    statics(ns).iter().copied().find(|f| *f == name)
}

// --- Small helpers ---

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn element(list: &List, i: usize) -> Value {
    list.borrow().get(i).cloned().unwrap_or_default()
}

fn callable(v: &Value) -> Result<Value, VmError> {
    if v.is_callable() {
        Ok(v.clone())
    } else {
        Err(VmError::type_error(format!(
            "{} is not a function",
            v.to_js_string()
        )))
    }
}

fn not_a_function(receiver: &Value, name: &str) -> VmError {
    let owner = match receiver {
        Value::Namespace(ns) => ns.name().to_string(),
        other => other.type_of().to_string(),
    };
    VmError::type_error(format!("{owner}.{name} is not a function"))
}

fn unreadable(receiver: &Value, name: &str) -> VmError {
    VmError::type_error(format!(
        "Cannot read properties of {} (reading '{name}')",
        receiver.to_js_string()
    ))
}

/// ToIntegerOrInfinity.
fn integer(vm: &mut Vm, v: &Value) -> Result<f64, VmError> {
    let n = vm.number(v)?;
    Ok(if n.is_nan() { 0.0 } else { n.trunc() })
}

/// Resolve a possibly negative position against `len`, clamping into `0..=len`.
fn relative(vm: &mut Vm, v: &Value, len: usize, default: usize) -> Result<usize, VmError> {
    if matches!(v, Value::Undefined) {
        return Ok(default);
    }
    let n = integer(vm, v)?;
    let len_f = len as f64;
    let pos = if n < 0.0 { (len_f + n).max(0.0) } else { n.min(len_f) };
    Ok(pos as usize)
}

fn number(n: impl Into<f64>) -> Value {
    Value::Number(n.into())
}

fn index_value(i: Option<usize>) -> Value {
    number(i.map_or(-1.0, |i| i as f64))
}

/// Hashable identity under SameValueZero.
#[derive(PartialEq, Eq, Hash)]
enum Key {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    Str(Rc<str>),
    Ref(usize),
    Intrinsic(&'static str, &'static str),
}

fn key(v: &Value) -> Key {
    match v {
        Value::Undefined => Key::Undefined,
        Value::Null => Key::Null,
        Value::Bool(b) => Key::Bool(*b),
        Value::Number(n) if n.is_nan() => Key::Number(f64::NAN.to_bits()),
        Value::Number(n) if *n == 0.0 => Key::Number(0f64.to_bits()),
        Value::Number(n) => Key::Number(n.to_bits()),
        Value::Str(s) => Key::Str(s.clone()),
        Value::Array(l) | Value::Set(l) => Key::Ref(Rc::as_ptr(l) as *const () as usize),
        Value::Map(m) => Key::Ref(Rc::as_ptr(m) as *const () as usize),
        Value::Closure(c) => Key::Ref(Rc::as_ptr(c) as *const () as usize),
        Value::Error(e) => Key::Ref(Rc::as_ptr(e) as *const () as usize),
        Value::Native(ns, name) => Key::Intrinsic(ns.name(), *name),
        Value::Namespace(ns) => Key::Intrinsic(ns.name(), ""),
    }
}

fn utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

/// UTF-16 offset of a byte position.
fn utf16_offset(s: &str, byte: usize) -> usize {
    s[..byte].encode_utf16().count()
}

// --- Properties ---

pub(crate) fn get_property(vm: &mut Vm, object: &Value, name: &str) -> Result<Value, VmError> {
    let v = match object {
        Value::Undefined | Value::Null => return Err(unreadable(object, name)),
        Value::Array(items) if name == "length" => number(items.borrow().len() as f64),
        Value::Str(s) if name == "length" => {
            vm.charge(s.len() as u64 / 16)?;
            number(s.encode_utf16().count() as f64)
        }
        Value::Set(items) if name == "size" => number(items.borrow().len() as f64),
        Value::Map(entries) if name == "size" => number(entries.borrow().len() as f64),
        Value::Error(e) => match name {
            "message" => vm.heap().string(&e.message)?,
            "name" => Value::str(e.name),
            _ => Value::Undefined,
        },
        Value::Namespace(ns) => namespace_property(*ns, name),
        _ => Value::Undefined,
    };
    Ok(v)
}

fn namespace_property(ns: Namespace, name: &str) -> Value {
    let constant = match (ns, name) {
        (Namespace::Math, "PI") => std::f64::consts::PI,
        (Namespace::Math, "E") => std::f64::consts::E,
        (Namespace::Math, "LN2") => std::f64::consts::LN_2,
        (Namespace::Math, "LN10") => std::f64::consts::LN_10,
        (Namespace::Math, "SQRT2") => std::f64::consts::SQRT_2,
        (Namespace::Number, "MAX_SAFE_INTEGER") => 9_007_199_254_740_991.0,
        (Namespace::Number, "MIN_SAFE_INTEGER") => -9_007_199_254_740_991.0,
        (Namespace::Number, "EPSILON") => f64::EPSILON,
        (Namespace::Number, "MAX_VALUE") => f64::MAX,
        (Namespace::Number, "MIN_VALUE") => 5e-324,
        (Namespace::Number, "POSITIVE_INFINITY") => f64::INFINITY,
        (Namespace::Number, "NEGATIVE_INFINITY") => f64::NEG_INFINITY,
        (Namespace::Number, "NaN") => f64::NAN,
        _ => {
            return static_name(ns, name).map_or(Value::Undefined, |f| Value::Native(ns, f));
        }
    };
    Value::Number(constant)
}

// --- Method dispatch ---

pub(crate) fn call_method(
    vm: &mut Vm,
    receiver: Value,
    name: &str,
    args: Vec<Value>,
) -> Result<Value, VmError> {
    match &receiver {
        Value::Undefined | Value::Null => Err(unreadable(&receiver, name)),
        Value::Namespace(ns) => match static_name(*ns, name) {
            Some(f) => call_static(vm, *ns, f, args),
            None => Err(not_a_function(&receiver, name)),
        },
        Value::Array(list) => array_method(vm, list, name, &args)
            .unwrap_or_else(|| Err(not_a_function(&receiver, name))),
        Value::Set(list) => set_method(vm, list, name, &args)
            .unwrap_or_else(|| Err(not_a_function(&receiver, name))),
        Value::Map(entries) => map_method(vm, entries, name, &args)
            .unwrap_or_else(|| Err(not_a_function(&receiver, name))),
        Value::Str(s) => string_method(vm, s, name, &args)
            .unwrap_or_else(|| Err(not_a_function(&receiver, name))),
        Value::Number(n) => match name {
            "toString" => number_to_string(vm, *n, &arg(&args, 0)),
            "toFixed" => to_fixed(vm, *n, &arg(&args, 0)),
            _ => Err(not_a_function(&receiver, name)),
        },
        Value::Bool(_) | Value::Error(_) if name == "toString" => vm.string_value(&receiver),
        _ => Err(not_a_function(&receiver, name)),
    }
}

// --- Arrays ---

fn array_method(
    vm: &mut Vm,
    list: &List,
    name: &str,
    args: &[Value],
) -> Option<Result<Value, VmError>> {
    let result = match name {
        "at" => array_at(vm, list, args),
        "every" | "some" | "find" | "findIndex" | "findLast" | "findLastIndex" | "filter"
        | "map" | "forEach" => iterate_with(vm, list, name, args),
        "reduce" => reduce(vm, list, args),
        "includes" | "indexOf" | "lastIndexOf" => search(vm, list, name, args),
        "slice" => slice(vm, list, args),
        "splice" => splice(vm, list, args),
        "concat" => concat(vm, list, args),
        "join" => join(vm, list, &arg(args, 0)),
        "toString" => join(vm, list, &Value::Undefined),
        "reverse" => {
            vm.charge(list.borrow().len() as u64)
                .map(|_| {
                    list.borrow_mut().reverse();
                    Value::Array(list.clone())
                })
        }
        "sort" => sort(vm, list, &arg(args, 0)),
        "push" => push(vm, list, args),
        "pop" => Ok(list.borrow_mut().pop().unwrap_or_default()),
        "shift" => shift(vm, list),
        "unshift" => unshift(vm, list, args),
        "fill" => fill(vm, list, args),
        _ => return None,
    };
    Some(result)
}

fn array_at(vm: &mut Vm, list: &List, args: &[Value]) -> Result<Value, VmError> {
    let len = list.borrow().len() as f64;
    let n = integer(vm, &arg(args, 0))?;
    let k = if n < 0.0 { len + n } else { n };
    if k < 0.0 || k >= len {
        return Ok(Value::Undefined);
    }
    Ok(element(list, k as usize))
}

/// The callback-driven traversals. Length is fixed when the traversal starts;
/// elements are read live so callbacks observe earlier mutations.
fn iterate_with(
    vm: &mut Vm,
    list: &List,
    name: &str,
    args: &[Value],
) -> Result<Value, VmError> {
    let f = callable(&arg(args, 0))?;
    let len = list.borrow().len();
    let backwards = matches!(name, "findLast" | "findLastIndex");
    let mut kept = Vec::new();
    let mut mapped = Vec::new();
    if name == "map" {
        vm.heap().charge_slots(len)?;
        mapped.reserve(len);
    }
    for step in 0..len {
        let i = if backwards { len - 1 - step } else { step };
        let v = element(list, i);
        let out = vm.call(
            f.clone(),
            vec![v.clone(), number(i as f64), Value::Array(list.clone())],
        )?;
        let hit = out.is_truthy();
        match name {
            "every" if !hit => return Ok(Value::Bool(false)),
            "some" if hit => return Ok(Value::Bool(true)),
            "find" | "findLast" if hit => return Ok(v),
            "findIndex" | "findLastIndex" if hit => return Ok(number(i as f64)),
            "filter" if hit => {
                vm.heap().charge_slots(1)?;
                kept.push(v);
            }
            "map" => mapped.push(out),
            _ => {}
        }
    }
    match name {
        "every" => Ok(Value::Bool(true)),
        "some" => Ok(Value::Bool(false)),
        "findIndex" | "findLastIndex" => Ok(number(-1.0)),
        "filter" => vm.heap().array(kept),
        "map" => vm.heap().array(mapped),
        _ => Ok(Value::Undefined),
    }
}

fn reduce(vm: &mut Vm, list: &List, args: &[Value]) -> Result<Value, VmError> {
    let f = callable(&arg(args, 0))?;
    let len = list.borrow().len();
    let (mut acc, start) = if args.len() >= 2 {
        (args[1].clone(), 0)
    } else if len == 0 {
        return Err(VmError::type_error(
            "Reduce of empty array with no initial value",
        ));
    } else {
        (element(list, 0), 1)
    };
    for i in start..len {
        let v = element(list, i);
        acc = vm.call(
            f.clone(),
            vec![acc, v, number(i as f64), Value::Array(list.clone())],
        )?;
    }
    Ok(acc)
}

fn search(vm: &mut Vm, list: &List, name: &str, args: &[Value]) -> Result<Value, VmError> {
    let needle = arg(args, 0);
    let items = list.borrow().clone();
    vm.charge(items.len() as u64)?;
    let result = match name {
        "includes" => {
            let from = relative(vm, &arg(args, 1), items.len(), 0)?;
            Value::Bool(items[from..].iter().any(|v| v.same_value_zero(&needle)))
        }
        "indexOf" => {
            let from = relative(vm, &arg(args, 1), items.len(), 0)?;
            let found = items[from..].iter().position(|v| v.strict_equals(&needle));
            index_value(found.map(|i| i + from))
        }
        _ => index_value(items.iter().rposition(|v| v.strict_equals(&needle))),
    };
    Ok(result)
}

fn slice(vm: &mut Vm, list: &List, args: &[Value]) -> Result<Value, VmError> {
    let len = list.borrow().len();
    let start = relative(vm, &arg(args, 0), len, 0)?;
    let end = relative(vm, &arg(args, 1), len, len)?;
    let items = if start < end {
        list.borrow()[start..end].to_vec()
    } else {
        Vec::new()
    };
    vm.charge(items.len() as u64)?;
    vm.heap().array(items)
}

fn splice(vm: &mut Vm, list: &List, args: &[Value]) -> Result<Value, VmError> {
    let len = list.borrow().len();
    let start = relative(vm, &arg(args, 0), len, 0)?;
    let delete = match args.len() {
        0 => 0,
        1 => len - start,
        _ => integer(vm, &args[1])?.clamp(0.0, (len - start) as f64) as usize,
    };
    let inserted: Vec<Value> = args.iter().skip(2).cloned().collect();
    vm.heap().charge_slots(inserted.len())?;
    vm.charge(len as u64)?;
    let removed: Vec<Value> = list
        .borrow_mut()
        .splice(start..start + delete, inserted)
        .collect();
    vm.heap().array(removed)
}

fn concat(vm: &mut Vm, list: &List, args: &[Value]) -> Result<Value, VmError> {
    let mut items = list.borrow().clone();
    for a in args {
        match a {
            Value::Array(other) => {
                let other = other.borrow().clone();
                items.extend(other);
            }
            v => items.push(v.clone()),
        }
    }
    vm.charge(items.len() as u64)?;
    vm.heap().array(items)
}

fn join(vm: &mut Vm, list: &List, separator: &Value) -> Result<Value, VmError> {
    let separator = match separator {
        Value::Undefined => ",".to_string(),
        other => vm.stringify(other)?,
    };
    let items = list.borrow().clone();
    let mut out = String::new();
    for (i, v) in items.iter().enumerate() {
        if i > 0 {
            vm.reserve_text(separator.len())?;
            out.push_str(&separator);
        }
        if !v.is_nullish() {
            vm.append(&mut out, v)?;
        }
        vm.charge(1)?;
    }
    vm.text_value(&out)
}

fn push(vm: &mut Vm, list: &List, args: &[Value]) -> Result<Value, VmError> {
    vm.heap().charge_slots(args.len())?;
    let mut items = list.borrow_mut();
    items.extend(args.iter().cloned());
    Ok(number(items.len() as f64))
}

fn shift(vm: &mut Vm, list: &List) -> Result<Value, VmError> {
    vm.charge(list.borrow().len() as u64)?;
    let mut items = list.borrow_mut();
    if items.is_empty() {
        return Ok(Value::Undefined);
    }
    Ok(items.remove(0))
}

fn unshift(vm: &mut Vm, list: &List, args: &[Value]) -> Result<Value, VmError> {
    vm.heap().charge_slots(args.len())?;
    vm.charge(list.borrow().len() as u64)?;
    let mut items = list.borrow_mut();
    items.splice(0..0, args.iter().cloned());
    Ok(number(items.len() as f64))
}

fn fill(vm: &mut Vm, list: &List, args: &[Value]) -> Result<Value, VmError> {
    let len = list.borrow().len();
    let value = arg(args, 0);
    let start = relative(vm, &arg(args, 1), len, 0)?;
    let end = relative(vm, &arg(args, 2), len, len)?;
    vm.charge(len as u64)?;
    if start < end {
        for slot in &mut list.borrow_mut()[start..end] {
            *slot = value.clone();
        }
    }
    Ok(Value::Array(list.clone()))
}

/// In-place stable sort. `undefined` elements always move to the end.
fn sort(vm: &mut Vm, list: &List, comparator: &Value) -> Result<Value, VmError> {
    if !matches!(comparator, Value::Undefined) {
        callable(comparator)?;
    }
    let items = list.borrow().clone();
    let (defined, undefined): (Vec<Value>, Vec<Value>) = items
        .into_iter()
        .partition(|v| !matches!(v, Value::Undefined));
    let mut sorted = if matches!(comparator, Value::Undefined) {
        let mut keyed = Vec::with_capacity(defined.len());
        for v in defined {
            let text = vm.stringify(&v)?;
            keyed.push((utf16(&text), v));
        }
        merge_sort(keyed, |a, b| Ok(a.0 < b.0))?
            .into_iter()
            .map(|(_, v)| v)
            .collect::<Vec<_>>()
    } else {
        merge_sort(defined, |a, b| {
            vm.charge(1)?;
            let out = vm.call(comparator.clone(), vec![a.clone(), b.clone()])?;
            Ok(vm.number(&out)? < 0.0)
        })?
    };
    sorted.extend(undefined);
    *list.borrow_mut() = sorted;
    Ok(Value::Array(list.clone()))
}

/// Bottom-up merge sort; `less(a, b)` reports whether `a` must precede `b`.
fn merge_sort<T: Clone>(
    items: Vec<T>,
    mut less: impl FnMut(&T, &T) -> Result<bool, VmError>,
) -> Result<Vec<T>, VmError> {
    let n = items.len();
    let mut src = items;
    let mut width = 1;
    while width < n {
        let mut dst = Vec::with_capacity(n);
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j) = (start, mid);
            while i < mid && j < end {
                if less(&src[j], &src[i])? {
                    dst.push(src[j].clone());
                    j += 1;
                } else {
                    dst.push(src[i].clone());
                    i += 1;
                }
            }
            dst.extend_from_slice(&src[i..mid]);
            dst.extend_from_slice(&src[j..end]);
            start = end;
        }
        src = dst;
        width *= 2;
    }
    Ok(src)
}

// --- Sets and maps ---

fn set_method(
    vm: &mut Vm,
    list: &List,
    name: &str,
    args: &[Value],
) -> Option<Result<Value, VmError>> {
    if !matches!(
        name,
        "has" | "add" | "delete" | "clear" | "values" | "keys" | "forEach"
    ) {
        return None;
    }
    Some(set_call(vm, list, name, args))
}

fn set_call(vm: &mut Vm, list: &List, name: &str, args: &[Value]) -> Result<Value, VmError> {
    let needle = arg(args, 0);
    vm.charge(list.borrow().len() as u64)?;
    let position = list.borrow().iter().position(|v| v.same_value_zero(&needle));
    match name {
        "has" => Ok(Value::Bool(position.is_some())),
        "add" => {
            if position.is_none() {
                vm.heap().charge_slots(1)?;
                list.borrow_mut().push(needle);
            }
            Ok(Value::Set(list.clone()))
        }
        "delete" => Ok(Value::Bool(match position {
            Some(i) => {
                list.borrow_mut().remove(i);
                true
            }
            None => false,
        })),
        "clear" => {
            list.borrow_mut().clear();
            Ok(Value::Undefined)
        }
        "values" | "keys" => {
            let items = list.borrow().clone();
            vm.heap().array(items)
        }
        _ => {
            let f = callable(&needle)?;
            let len = list.borrow().len();
            for i in 0..len {
                let v = element(list, i);
                vm.call(f.clone(), vec![v.clone(), v, Value::Set(list.clone())])?;
            }
            Ok(Value::Undefined)
        }
    }
}

fn map_method(
    vm: &mut Vm,
    entries: &Entries,
    name: &str,
    args: &[Value],
) -> Option<Result<Value, VmError>> {
    if !matches!(
        name,
        "get" | "set" | "has" | "delete" | "clear" | "keys" | "values" | "entries" | "forEach"
    ) {
        return None;
    }
    Some(map_call(vm, entries, name, args))
}

fn map_call(vm: &mut Vm, entries: &Entries, name: &str, args: &[Value]) -> Result<Value, VmError> {
    let k = arg(args, 0);
    vm.charge(entries.borrow().len() as u64)?;
    let position = entries.borrow().iter().position(|(ek, _)| ek.same_value_zero(&k));
    match name {
        "get" => Ok(position
            .and_then(|i| entries.borrow().get(i).map(|(_, v)| v.clone()))
            .unwrap_or_default()),
        "has" => Ok(Value::Bool(position.is_some())),
        "set" => {
            let v = arg(args, 1);
            match position {
                Some(i) => {
                    if let Some(entry) = entries.borrow_mut().get_mut(i) {
                        entry.1 = v;
                    }
                }
                None => {
                    vm.heap().charge_slots(2)?;
                    entries.borrow_mut().push((k, v));
                }
            }
            Ok(Value::Map(entries.clone()))
        }
        "delete" => Ok(Value::Bool(match position {
            Some(i) => {
                entries.borrow_mut().remove(i);
                true
            }
            None => false,
        })),
        "clear" => {
            entries.borrow_mut().clear();
            Ok(Value::Undefined)
        }
        "keys" | "values" => {
            let items: Vec<Value> = entries
                .borrow()
                .iter()
                .map(|(k, v)| if name == "keys" { k.clone() } else { v.clone() })
                .collect();
            vm.heap().array(items)
        }
        "entries" => vm.iterate(&Value::Map(entries.clone())).and_then(|pairs| vm.heap().array(pairs)),
        _ => {
            let f = callable(&k)?;
            let len = entries.borrow().len();
            for i in 0..len {
                let Some((ek, ev)) = entries.borrow().get(i).cloned() else {
                    break;
                };
                vm.call(f.clone(), vec![ev, ek, Value::Map(entries.clone())])?;
            }
            Ok(Value::Undefined)
        }
    }
}

// --- Strings and numbers ---

fn string_method(
    vm: &mut Vm,
    s: &Rc<str>,
    name: &str,
    args: &[Value],
) -> Option<Result<Value, VmError>> {
    let known = matches!(
        name,
        "split"
            | "includes"
            | "indexOf"
            | "startsWith"
            | "endsWith"
            | "charAt"
            | "charCodeAt"
            | "at"
            | "slice"
            | "substring"
            | "repeat"
            | "toUpperCase"
            | "toLowerCase"
            | "trim"
            | "trimStart"
            | "trimEnd"
            | "concat"
            | "padStart"
            | "padEnd"
            | "toString"
    );
    if !known {
        return None;
    }
    Some(vm.charge(s.len() as u64 / 16).and_then(|_| string_call(vm, s, name, args)))
}

fn string_call(vm: &mut Vm, s: &Rc<str>, name: &str, args: &[Value]) -> Result<Value, VmError> {
    let first = arg(args, 0);
    match name {
        "toString" => Ok(Value::Str(s.clone())),
        "split" => {
            let sep = match &first {
                Value::Undefined => None,
                v => Some(vm.stringify(v)?),
            };
            let limit = match arg(args, 1) {
                Value::Undefined => usize::MAX,
                v => integer(vm, &v)?.max(0.0) as usize,
            };
            let mut out = Vec::new();
            match sep.as_deref() {
                None => {
                    if limit > 0 {
                        out.push(Value::Str(s.clone()));
                    }
                }
                Some("") => {
                    for (i, c) in s.char_indices().take(limit) {
                        vm.charge(1)?;
                        out.push(vm.heap().string(&s[i..i + c.len_utf8()])?);
                    }
                }
                Some(sep) => {
                    for piece in s.split(sep).take(limit) {
                        vm.charge(1)?;
                        out.push(vm.heap().string(piece)?);
                    }
                }
            }
            vm.heap().array(out)
        }
        "includes" | "indexOf" | "startsWith" | "endsWith" => {
            let needle = vm.stringify(&first)?;
            Ok(match name {
                "includes" => Value::Bool(s.contains(needle.as_str())),
                "startsWith" => Value::Bool(s.starts_with(needle.as_str())),
                "endsWith" => Value::Bool(s.ends_with(needle.as_str())),
                _ => index_value(s.find(needle.as_str()).map(|b| utf16_offset(s, b))),
            })
        }
        "charAt" | "charCodeAt" | "at" => {
            let units = utf16(s);
            let len = units.len() as f64;
            let mut n = integer(vm, &first)?;
            if name == "at" && n < 0.0 {
                n += len;
            }
            let unit = (n >= 0.0 && n < len).then(|| units[n as usize]);
            Ok(match (name, unit) {
                ("charCodeAt", Some(u)) => number(u),
                ("charCodeAt", None) => number(f64::NAN),
                ("charAt", None) => Value::str(""),
                (_, None) => Value::Undefined,
                (_, Some(u)) => Value::str(&String::from_utf16_lossy(&[u])),
            })
        }
        "slice" | "substring" => {
            let units = utf16(s);
            let len = units.len();
            let (start, end) = if name == "slice" {
                (
                    relative(vm, &first, len, 0)?,
                    relative(vm, &arg(args, 1), len, len)?,
                )
            } else {
                let clamp = |n: f64| n.clamp(0.0, len as f64) as usize;
                let a = clamp(integer(vm, &first)?);
                let b = match arg(args, 1) {
                    Value::Undefined => len,
                    v => clamp(integer(vm, &v)?),
                };
                (a.min(b), a.max(b))
            };
            let text = if start < end {
                String::from_utf16_lossy(&units[start..end])
            } else {
                String::new()
            };
            vm.heap().string(&text)
        }
        "repeat" => {
            let count = integer(vm, &first)?;
            if count < 0.0 || count.is_infinite() {
                return Err(VmError::RangeError(format!(
                    "Invalid count value: {}",
                    format_number(count)
                )));
            }
            let total = (s.len() as f64) * count;
            if total > usize::MAX as f64 {
                return Err(VmError::OutOfMemory);
            }
            vm.reserve_text(total as usize)?;
            vm.charge(total as u64 / 16)?;
            let text = s.repeat(count as usize);
            vm.text_value(&text)
        }
        "toUpperCase" | "toLowerCase" => {
            vm.reserve_text(s.len())?;
            let text = if name == "toUpperCase" {
                s.to_uppercase()
            } else {
                s.to_lowercase()
            };
            vm.text_value(&text)
        }
        "trim" => vm.heap().string(s.trim()),
        "trimStart" => vm.heap().string(s.trim_start()),
        "trimEnd" => vm.heap().string(s.trim_end()),
        "concat" => {
            let mut out = String::new();
            vm.reserve_text(s.len())?;
            out.push_str(s);
            for a in args {
                vm.append(&mut out, a)?;
            }
            vm.text_value(&out)
        }
        _ => {
            let target = integer(vm, &first)?;
            let filler = match arg(args, 1) {
                Value::Undefined => " ".to_string(),
                v => vm.stringify(&v)?,
            };
            let current = s.encode_utf16().count();
            if filler.is_empty() || target <= current as f64 {
                return Ok(Value::Str(s.clone()));
            }
            let missing = target as usize - current;
            let widest = filler.chars().map(char::len_utf8).max().unwrap_or(1);
            vm.reserve_text(missing.saturating_mul(widest).saturating_add(s.len()))?;
            vm.charge(missing as u64 / 16)?;
            let pad: String = filler.chars().cycle().take(missing).collect();
            let text = if name == "padStart" {
                format!("{pad}{s}")
            } else {
                format!("{s}{pad}")
            };
            vm.text_value(&text)
        }
    }
}

fn number_to_string(vm: &mut Vm, n: f64, radix: &Value) -> Result<Value, VmError> {
    let radix = match radix {
        Value::Undefined => 10.0,
        v => integer(vm, v)?,
    };
    if !(2.0..=36.0).contains(&radix) {
        return Err(VmError::RangeError(
            "toString() radix must be between 2 and 36".into(),
        ));
    }
    if radix == 10.0 || !n.is_finite() || n.fract() != 0.0 {
        return vm.heap().string(&format_number(n));
    }
    let radix = radix as u32;
    let mut digits = Vec::new();
    let mut x = n.abs();
    while x >= 1.0 {
        let d = (x % f64::from(radix)) as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('0'));
        x = (x / f64::from(radix)).floor();
    }
    if digits.is_empty() {
        digits.push('0');
    }
    if n < 0.0 {
        digits.push('-');
    }
    let text: String = digits.into_iter().rev().collect();
    vm.heap().string(&text)
}

fn to_fixed(vm: &mut Vm, n: f64, digits: &Value) -> Result<Value, VmError> {
    let digits = integer(vm, digits)?;
    if !(0.0..=100.0).contains(&digits) {
        return Err(VmError::RangeError(
            "toFixed() digits argument must be between 0 and 100".into(),
        ));
    }
    let text = if !n.is_finite() || n.abs() >= 1e21 {
        format_number(n)
    } else {
        let n = if n == 0.0 { 0.0 } else { n };
        format!("{:.*}", digits as usize, n)
    };
    vm.heap().string(&text)
}

/// `parseInt` semantics: optional sign, optional hex prefix, longest digit run.
fn parse_int(text: &str, radix: f64) -> f64 {
    let t = text.trim_start();
    let (sign, t) = match t.as_bytes().first() {
        Some(b'-') => (-1.0, &t[1..]),
        Some(b'+') => (1.0, &t[1..]),
        _ => (1.0, t),
    };
    let mut radix = if radix.is_nan() || radix == 0.0 { 0 } else { radix.trunc() as i64 };
    if radix != 0 && !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut body = t;
    if (radix == 0 || radix == 16) && (t.starts_with("0x") || t.starts_with("0X")) {
        body = &t[2..];
        radix = 16;
    }
    if radix == 0 {
        radix = 10;
    }
    let radix = radix as u32;
    let mut value = 0.0;
    let mut any = false;
    for c in body.chars() {
        let Some(d) = c.to_digit(radix) else {
            break;
        };
        value = value * f64::from(radix) + f64::from(d);
        any = true;
    }
    if any {
        sign * value
    } else {
        f64::NAN
    }
}

/// `parseFloat` semantics: the longest prefix that reads as a decimal literal.
fn parse_float(text: &str) -> f64 {
    let t = text.trim_start();
    let unsigned = t.trim_start_matches(['+', '-']);
    if unsigned.starts_with("Infinity") {
        return if t.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY };
    }
    let bytes = t.as_bytes();
    let mut end = 0;
    let mut best = None;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end];
        match c {
            b'0'..=b'9' => {
                end += 1;
                if t[..end].parse::<f64>().is_ok() {
                    best = Some(end);
                }
                continue;
            }
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if !seen_exp && best.is_some() => {
                seen_exp = true;
                if matches!(bytes.get(end + 1), Some(b'+' | b'-')) {
                    end += 1;
                }
            }
            _ => break,
        }
        end += 1;
    }
    best.and_then(|b| t[..b].parse().ok()).unwrap_or(f64::NAN)
}

// --- Static functions ---

pub(crate) fn call_static(
    vm: &mut Vm,
    ns: Namespace,
    name: &str,
    args: Vec<Value>,
) -> Result<Value, VmError> {
    let first = arg(&args, 0);
    match (ns, name) {
        (Namespace::Math, "max" | "min" | "hypot") => {
            let mut values = Vec::with_capacity(args.len());
            for a in &args {
                values.push(vm.number(a)?);
            }
            vm.charge(values.len() as u64)?;
            Ok(number(math_fold(name, &values)))
        }
        (Namespace::Math, "pow") => {
            let (x, y) = (vm.number(&first)?, vm.number(&arg(&args, 1))?);
            let n = if y.is_nan() || (x.abs() == 1.0 && y.is_infinite()) {
                f64::NAN
            } else {
                x.powf(y)
            };
            Ok(number(n))
        }
        (Namespace::Math, _) => {
            let x = vm.number(&first)?;
            let n = match name {
                "abs" => x.abs(),
                "floor" => x.floor(),
                "ceil" => x.ceil(),
                "round" => (x + 0.5).floor(),
                "trunc" => x.trunc(),
                "sign" if x.is_nan() || x == 0.0 => x,
                "sign" => x.signum(),
                "sqrt" => x.sqrt(),
                "cbrt" => x.cbrt(),
                "log" => x.ln(),
                "log2" => x.log2(),
                "log10" => x.log10(),
                "exp" => x.exp(),
                _ => return Err(not_a_function(&Value::Namespace(ns), name)),
            };
            Ok(number(n))
        }
        (Namespace::Number, "isInteger" | "isSafeInteger" | "isFinite" | "isNaN") => {
            let Value::Number(n) = first else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match name {
                "isInteger" => n.is_finite() && n.fract() == 0.0,
                "isSafeInteger" => n.fract() == 0.0 && n.abs() <= 9_007_199_254_740_991.0,
                "isFinite" => n.is_finite(),
                _ => n.is_nan(),
            }))
        }
        (Namespace::Global, "isNaN") => Ok(Value::Bool(vm.number(&first)?.is_nan())),
        (Namespace::Global, "isFinite") => Ok(Value::Bool(vm.number(&first)?.is_finite())),
        (Namespace::Global | Namespace::Number, "parseInt") => {
            let text = vm.stringify(&first)?;
            let radix = match arg(&args, 1) {
                Value::Undefined => 0.0,
                v => vm.number(&v)?,
            };
            Ok(number(parse_int(&text, radix)))
        }
        (Namespace::Global | Namespace::Number, "parseFloat") => {
            let text = vm.stringify(&first)?;
            Ok(number(parse_float(&text)))
        }
        (Namespace::Array, "isArray") => Ok(Value::Bool(matches!(first, Value::Array(_)))),
        (Namespace::Array, "of") => vm.heap().array(args),
        (Namespace::Array, "from") => {
            let items = match &first {
                Value::Undefined | Value::Null => {
                    return Err(VmError::type_error(format!(
                        "{} is not iterable",
                        first.to_js_string()
                    )))
                }
                v if v.is_object() || matches!(v, Value::Str(_)) => vm.iterate(v)?,
                _ => Vec::new(),
            };
            let items = match arg(&args, 1) {
                Value::Undefined => items,
                f => {
                    let f = callable(&f)?;
                    let mut mapped = Vec::with_capacity(items.len());
                    for (i, v) in items.into_iter().enumerate() {
                        mapped.push(vm.call(f.clone(), vec![v, number(i as f64)])?);
                    }
                    mapped
                }
            };
            vm.heap().array(items)
        }
        _ => Err(not_a_function(&Value::Namespace(ns), name)),
    }
}

fn math_fold(name: &str, values: &[f64]) -> f64 {
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    match name {
        "max" => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "min" => values.iter().copied().fold(f64::INFINITY, f64::min),
        _ => values.iter().map(|v| v * v).sum::<f64>().sqrt(),
    }
}

/// `Number(x)`, `String(x)`, `Boolean(x)` and `Array(...)` called as functions.
pub(crate) fn call_namespace(
    vm: &mut Vm,
    ns: Namespace,
    args: Vec<Value>,
) -> Result<Value, VmError> {
    match ns {
        Namespace::Number if args.is_empty() => Ok(number(0.0)),
        Namespace::Number => Ok(number(vm.number(&args[0])?)),
        Namespace::String if args.is_empty() => Ok(Value::str("")),
        Namespace::String => vm.string_value(&args[0]),
        Namespace::Boolean => Ok(Value::Bool(arg(&args, 0).is_truthy())),
        Namespace::Array => construct(vm, "Array", args),
        Namespace::Math | Namespace::Global => Err(VmError::type_error(format!(
            "{} is not a function",
            ns.name()
        ))),
    }
}

// --- Constructors ---

pub(crate) fn construct(vm: &mut Vm, name: &str, args: Vec<Value>) -> Result<Value, VmError> {
    let first = arg(&args, 0);
    match name {
        "Set" => {
            let items = match &first {
                Value::Undefined | Value::Null => Vec::new(),
                v => vm.iterate(v)?,
            };
            let mut seen = HashSet::with_capacity(items.len());
            let unique: Vec<Value> = items.into_iter().filter(|v| seen.insert(key(v))).collect();
            vm.heap().set(unique)
        }
        "Map" => {
            let items = match &first {
                Value::Undefined | Value::Null => Vec::new(),
                v => vm.iterate(v)?,
            };
            let mut index: HashMap<Key, usize> = HashMap::with_capacity(items.len());
            let mut entries: Vec<(Value, Value)> = Vec::with_capacity(items.len());
            for item in items {
                let Value::Array(pair) = &item else {
                    return Err(VmError::type_error(format!(
                        "Iterator value {} is not an entry object",
                        item.to_js_string()
                    )));
                };
                let (k, v) = (element(pair, 0), element(pair, 1));
                match index.get(&key(&k)) {
                    Some(&i) => entries[i].1 = v,
                    None => {
                        index.insert(key(&k), entries.len());
                        entries.push((k, v));
                    }
                }
            }
            vm.heap().map(entries)
        }
        "Error" | "TypeError" | "RangeError" => {
            let message = match &first {
                Value::Undefined => String::new(),
                v => vm.stringify(v)?,
            };
            let name = match name {
                "TypeError" => "TypeError",
                "RangeError" => "RangeError",
                _ => "Error",
            };
            Ok(Value::Error(Rc::new(ErrorObject { name, message })))
        }
        "Array" => match (&first, args.len()) {
            (Value::Number(n), 1) => {
                let Some(len) = as_index(&first).filter(|len| *len < (1usize << 32)) else {
                    return Err(VmError::RangeError(format!(
                        "Invalid array length: {}",
                        format_number(*n)
                    )));
                };
                vm.heap().charge_slots(len)?;
                vm.charge(len as u64)?;
                vm.heap().array(vec![Value::Undefined; len])
            }
            _ => vm.heap().array(args),
        },
        "String" | "Number" | "Boolean" => {
            let ns = match name {
                "String" => Namespace::String,
                "Number" => Namespace::Number,
                _ => Namespace::Boolean,
            };
            call_namespace(vm, ns, args)
        }
        _ => Err(VmError::type_error(format!("{name} is not a constructor"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_prefixes() {
        assert_eq!(parse_int("42px", 0.0), 42.0);
        assert_eq!(parse_int("  -17", 0.0), -17.0);
        assert_eq!(parse_int("0x1f", 0.0), 31.0);
        assert_eq!(parse_int("101", 2.0), 5.0);
        assert!(parse_int("abc", 0.0).is_nan());
        assert!(parse_int("5", 1.0).is_nan());
    }

    #[test]
    fn test_parse_float_prefix() {
        assert_eq!(parse_float("3.5kg"), 3.5);
        assert_eq!(parse_float("-2e3x"), -2000.0);
        assert_eq!(parse_float("1e"), 1.0);
        assert_eq!(parse_float("-Infinity"), f64::NEG_INFINITY);
        assert!(parse_float(".").is_nan());
    }

    #[test]
    fn test_merge_sort_is_stable() {
        let items = vec![(2, 'a'), (1, 'b'), (2, 'c'), (1, 'd')];
        let sorted = merge_sort(items, |a, b| Ok(a.0 < b.0)).unwrap();
        assert_eq!(sorted, vec![(1, 'b'), (1, 'd'), (2, 'a'), (2, 'c')]);
    }

    #[test]
    fn test_key_merges_zero_and_nan() {
        assert!(key(&Value::Number(0.0)) == key(&Value::Number(-0.0)));
        assert!(key(&Value::Number(f64::NAN)) == key(&Value::Number(f64::NAN)));
        assert!(key(&Value::str("1")) != key(&Value::Number(1.0)));
    }
}
