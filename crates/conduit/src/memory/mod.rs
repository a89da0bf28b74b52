//! An in-process test double for the foreign runtime.
//!
//! `MemoryRuntime` implements both foreign contracts over a small Python-shaped
//! object model held entirely in host memory: `None`, bools, ints, floats,
//! strings, bytes, lists, tuples, dicts, iterators, slices, classes and their
//! instances, native functions, modules, and host callbacks. It is what the
//! crate's tests and doctests run against, and it lets embedders exercise
//! bridge code without linking a real interpreter.
//!
//! It is not a Python implementation. There is no bytecode or standard
//! library, modules exist only once registered, and evaluation understands
//! only the expression-level statement language of the private `exec`
//! submodule, enough to drive the bridge's evaluation path. Real foreign code
//! belongs to a real runtime such as the `python` feature's `PythonRuntime`.
//!
//! Objects are built with the free constructor functions of this module
//! ([`int`], [`list`], [`class`], ...).

mod exec;

use std::{
    any::Any,
    cell::RefCell,
    collections::VecDeque,
    fmt::{self, Write},
    rc::{Rc, Weak},
};

use indexmap::IndexMap;

use crate::{
    error::{BridgeResult, Error, ForeignException},
    handle::{ForeignHandle, ForeignRuntime, Handle, Primitive, Status, Step},
    marshal::{Arg, HostCallback},
};

/// Signature of native functions: positional handles and keyword handles.
pub type NativeFn = dyn Fn(Vec<Handle>, IndexMap<String, Handle>) -> BridgeResult<Handle>;

/// One object of the memory runtime.
pub struct MemoryObject {
    this: Weak<Self>,
    kind: Kind,
    attrs: RefCell<IndexMap<String, Handle>>,
}

enum Kind {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(RefCell<Vec<Handle>>),
    Tuple(Vec<Handle>),
    Dict(RefCell<IndexMap<String, Handle>>),
    Iterator(RefCell<VecDeque<Handle>>),
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
    Type {
        module: String,
        name: String,
    },
    Instance {
        class: Handle,
    },
    Function {
        name: String,
        func: Rc<NativeFn>,
    },
    BoundMethod {
        receiver: Handle,
        name: String,
        func: Rc<NativeFn>,
    },
    Callback(HostCallback),
    /// A host function stored on its receiver; the receiver is held weakly.
    HostMethod {
        receiver: Weak<MemoryObject>,
        callback: HostCallback,
    },
    Module {
        name: String,
    },
}

fn alloc(kind: Kind) -> Handle {
    alloc_with(kind, IndexMap::new())
}

fn alloc_with(kind: Kind, attrs: IndexMap<String, Handle>) -> Handle {
    let obj: Rc<MemoryObject> = Rc::new_cyclic(|this| MemoryObject {
        this: this.clone(),
        kind,
        attrs: RefCell::new(attrs),
    });
    obj
}

/// Recovers the memory object behind a handle, if it is one.
#[must_use]
pub fn downcast(handle: &Handle) -> Option<&MemoryObject> {
    handle.as_any()?.downcast_ref::<MemoryObject>()
}

#[must_use]
pub fn none() -> Handle {
    alloc(Kind::None)
}

#[must_use]
pub fn bool(value: bool) -> Handle {
    alloc(Kind::Bool(value))
}

#[must_use]
pub fn int(value: i64) -> Handle {
    alloc(Kind::Int(value))
}

#[must_use]
pub fn float(value: f64) -> Handle {
    alloc(Kind::Float(value))
}

#[must_use]
pub fn str(value: impl Into<String>) -> Handle {
    alloc(Kind::Str(value.into()))
}

#[must_use]
pub fn bytes(value: impl Into<Vec<u8>>) -> Handle {
    alloc(Kind::Bytes(value.into()))
}

#[must_use]
pub fn list(items: Vec<Handle>) -> Handle {
    alloc(Kind::List(RefCell::new(items)))
}

#[must_use]
pub fn tuple(items: Vec<Handle>) -> Handle {
    alloc(Kind::Tuple(items))
}

#[must_use]
pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Handle)>) -> Handle {
    alloc(Kind::Dict(RefCell::new(
        entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
    )))
}

/// A one-shot iterator over `items`.
#[must_use]
pub fn iterator(items: Vec<Handle>) -> Handle {
    alloc(Kind::Iterator(RefCell::new(items.into())))
}

/// A native function.
pub fn function(
    name: impl Into<String>,
    func: impl Fn(Vec<Handle>, IndexMap<String, Handle>) -> BridgeResult<Handle> + 'static,
) -> Handle {
    alloc(Kind::Function {
        name: name.into(),
        func: Rc::new(func),
    })
}

/// A class. Functions among `attrs` become methods of its instances, with the
/// instance passed as the first positional argument.
pub fn class<K: Into<String>>(
    module: impl Into<String>,
    name: impl Into<String>,
    attrs: impl IntoIterator<Item = (K, Handle)>,
) -> Handle {
    alloc_with(
        Kind::Type {
            module: module.into(),
            name: name.into(),
        },
        attrs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
    )
}

/// A module whose attributes are `attrs`.
pub fn module<K: Into<String>>(name: impl Into<String>, attrs: impl IntoIterator<Item = (K, Handle)>) -> Handle {
    alloc_with(
        Kind::Module { name: name.into() },
        attrs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
    )
}

fn builtin_type(name: &str) -> Handle {
    alloc(Kind::Type {
        module: "builtins".to_owned(),
        name: name.to_owned(),
    })
}

/// Builds a runtime exception of the builtin type `kind`.
#[must_use]
pub fn exception(kind: &str, message: impl fmt::Display) -> ForeignException {
    let message = message.to_string();
    let exc_type = builtin_type(kind);
    let value = alloc_with(
        Kind::Instance {
            class: Rc::clone(&exc_type),
        },
        IndexMap::from([("args".to_owned(), tuple(vec![str(message.clone())]))]),
    );
    let rendered = if message.is_empty() {
        kind.to_owned()
    } else {
        format!("{kind}: {message}")
    };
    ForeignException::new(exc_type, value, None, rendered)
}

/// [`exception`] as an [`Error`].
#[must_use]
pub fn raise(kind: &str, message: impl fmt::Display) -> Error {
    Error::Foreign(exception(kind, message))
}

/// Converts a marshalled argument into a memory object.
pub fn from_arg(arg: Arg) -> BridgeResult<Handle> {
    Ok(match arg {
        Arg::None => none(),
        Arg::Bool(b) => bool(b),
        Arg::Int(i) => int(i),
        Arg::BigInt(i) => {
            let small = i64::try_from(&i).map_err(|_| raise("OverflowError", format!("int too large: {i}")))?;
            int(small)
        }
        Arg::Float(f) => float(f),
        Arg::Str(s) => str(s),
        Arg::List(items) => list(items.into_iter().map(from_arg).collect::<BridgeResult<_>>()?),
        Arg::Dict(map) | Arg::Kwargs(map) => dict(
            map.into_iter()
                .map(|(k, v)| Ok((k, from_arg(v)?)))
                .collect::<BridgeResult<Vec<_>>>()?,
        ),
        Arg::Handle(handle) => handle,
        Arg::Bytes(data) => bytes(data),
        Arg::Callback(callback) => alloc(Kind::Callback(callback)),
    })
}

/// Turns `Arg::Handle` wrapping a memory int or str into the plain key variant.
fn normalize_key(key: Arg) -> Arg {
    if let Arg::Handle(handle) = &key
        && let Some(obj) = downcast(handle)
    {
        match &obj.kind {
            Kind::Int(i) => return Arg::Int(*i),
            Kind::Str(s) => return Arg::Str(s.clone()),
            _ => {}
        }
    }
    key
}

fn repr_of(handle: &Handle) -> String {
    match downcast(handle) {
        Some(obj) => obj.render(true),
        None => handle.to_str().unwrap_or_else(|_| "<foreign>".to_owned()),
    }
}

#[expect(clippy::cast_possible_truncation, reason = "integral floats hash as their int value")]
fn float_hash(f: f64) -> i64 {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.2e18 {
        f as i64
    } else {
        i64::from_ne_bytes(f.to_bits().to_ne_bytes())
    }
}

fn render_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn fnv1a(data: &[u8]) -> i64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    i64::from_ne_bytes(hash.to_ne_bytes())
}

/// Resolves slice bounds against a length the way the runtime's `slice.indices` does.
fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> BridgeResult<Vec<usize>> {
    let len = i64::try_from(len).map_err(|_| raise("OverflowError", "sequence too long"))?;
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(raise("ValueError", "slice step cannot be zero"));
    }
    let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |value: Option<i64>, default: i64| match value {
        None => default,
        Some(v) if v < 0 => (v + len).max(lower),
        Some(v) => v.min(upper),
    };
    let mut index = clamp(start, if step > 0 { lower } else { upper });
    let stop = clamp(stop, if step > 0 { upper } else { lower });
    let mut indices = Vec::new();
    while (step > 0 && index < stop) || (step < 0 && index > stop) {
        indices.push(usize::try_from(index).map_err(|_| raise("IndexError", "slice index out of range"))?);
        let Some(next) = index.checked_add(step) else {
            break;
        };
        index = next;
    }
    Ok(indices)
}

/// Normalises a possibly negative index.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

impl MemoryObject {
    fn handle(&self) -> BridgeResult<Handle> {
        let this: Rc<Self> = self
            .this
            .upgrade()
            .ok_or_else(|| raise("ReferenceError", "object was released"))?;
        Ok(this)
    }

    fn identity(&self) -> usize {
        self.this.as_ptr().addr()
    }

    /// Name of the object's type.
    #[must_use]
    pub fn type_name(&self) -> String {
        match &self.kind {
            Kind::None => "NoneType".to_owned(),
            Kind::Bool(_) => "bool".to_owned(),
            Kind::Int(_) => "int".to_owned(),
            Kind::Float(_) => "float".to_owned(),
            Kind::Str(_) => "str".to_owned(),
            Kind::Bytes(_) => "bytes".to_owned(),
            Kind::List(_) => "list".to_owned(),
            Kind::Tuple(_) => "tuple".to_owned(),
            Kind::Dict(_) => "dict".to_owned(),
            Kind::Iterator(_) => "list_iterator".to_owned(),
            Kind::Slice { .. } => "slice".to_owned(),
            Kind::Type { .. } => "type".to_owned(),
            Kind::Instance { class } => match downcast(class).map(|c| &c.kind) {
                Some(Kind::Type { name, .. }) => name.clone(),
                _ => "object".to_owned(),
            },
            Kind::Function { .. } => "function".to_owned(),
            Kind::BoundMethod { .. } => "method".to_owned(),
            Kind::Callback(_) => "host_function".to_owned(),
            Kind::HostMethod { .. } => "method".to_owned(),
            Kind::Module { .. } => "module".to_owned(),
        }
    }

    /// Number of elements of a sized object.
    pub fn len(&self) -> BridgeResult<usize> {
        match &self.kind {
            Kind::List(items) => Ok(items.borrow().len()),
            Kind::Tuple(items) => Ok(items.len()),
            Kind::Dict(map) => Ok(map.borrow().len()),
            Kind::Str(s) => Ok(s.chars().count()),
            Kind::Bytes(data) => Ok(data.len()),
            _ => Err(raise(
                "TypeError",
                format!("object of type '{}' has no len()", self.type_name()),
            )),
        }
    }

    fn render(&self, repr: bool) -> String {
        match &self.kind {
            Kind::None => "None".to_owned(),
            Kind::Bool(true) => "True".to_owned(),
            Kind::Bool(false) => "False".to_owned(),
            Kind::Int(i) => i.to_string(),
            Kind::Float(f) => render_float(*f),
            Kind::Str(s) if repr => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Kind::Str(s) => s.clone(),
            Kind::Bytes(data) => {
                let mut out = String::from("b'");
                for byte in data {
                    if byte.is_ascii_graphic() || *byte == b' ' {
                        out.push(char::from(*byte));
                    } else {
                        let _ = write!(out, "\\x{byte:02x}");
                    }
                }
                out.push('\'');
                out
            }
            Kind::List(items) => {
                let items: Vec<String> = items.borrow().iter().map(repr_of).collect();
                format!("[{}]", items.join(", "))
            }
            Kind::Tuple(items) if items.len() == 1 => format!("({},)", repr_of(&items[0])),
            Kind::Tuple(items) => {
                let items: Vec<String> = items.iter().map(repr_of).collect();
                format!("({})", items.join(", "))
            }
            Kind::Dict(map) => {
                let entries: Vec<String> = map
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("'{k}': {}", repr_of(v)))
                    .collect();
                format!("{{{}}}", entries.join(", "))
            }
            Kind::Iterator(_) => "<list_iterator object>".to_owned(),
            Kind::Slice { start, stop, step } => {
                let part = |v: &Option<i64>| v.map_or_else(|| "None".to_owned(), |v| v.to_string());
                format!("slice({}, {}, {})", part(start), part(stop), part(step))
            }
            Kind::Type { module, name } if module == "builtins" => format!("<class '{name}'>"),
            Kind::Type { module, name } => format!("<class '{module}.{name}'>"),
            Kind::Instance { class } => {
                if let Some(Kind::Tuple(args)) = self.attrs.borrow().get("args").and_then(downcast).map(|a| &a.kind)
                    && let [message] = args.as_slice()
                {
                    return downcast(message).map_or_else(|| repr_of(message), |m| m.render(false));
                }
                match downcast(class).map(|c| &c.kind) {
                    Some(Kind::Type { module, name }) => format!("<{module}.{name} object>"),
                    _ => "<object>".to_owned(),
                }
            }
            Kind::Function { name, .. } => format!("<function {name}>"),
            Kind::BoundMethod { name, .. } => format!("<bound method {name}>"),
            Kind::Callback(callback) => format!("<host function {}>", callback.name()),
            Kind::HostMethod { callback, .. } => format!("<bound method {}>", callback.name()),
            Kind::Module { name } => format!("<module '{name}'>"),
        }
    }

    fn attribute(&self, name: &str) -> BridgeResult<Handle> {
        match (&self.kind, name) {
            (Kind::Type { module, .. }, "__module__") => return Ok(str(module.clone())),
            (Kind::Type { name: type_name, .. }, "__name__") => return Ok(str(type_name.clone())),
            (Kind::Function { name: fname, .. }, "__name__") => return Ok(str(fname.clone())),
            (Kind::Callback(callback) | Kind::HostMethod { callback, .. }, "__name__") => {
                return Ok(str(callback.name()));
            }
            (Kind::Module { name: mname }, "__name__") => return Ok(str(mname.clone())),
            (Kind::Dict(_), "copy" | "keys" | "values" | "items" | "get") => return self.builtin_method(name),
            (Kind::List(_), "append" | "copy" | "pop") => return self.builtin_method(name),
            (Kind::Instance { class }, "__class__") => return Ok(Rc::clone(class)),
            _ => {}
        }
        if let Some(value) = self.attrs.borrow().get(name) {
            return Ok(Rc::clone(value));
        }
        if let Kind::Instance { class } = &self.kind {
            let class_attr = downcast(class).and_then(|c| c.attrs.borrow().get(name).cloned());
            match class_attr {
                Some(attr) => {
                    if let Some(Kind::Function { func, .. }) = downcast(&attr).map(|a| &a.kind) {
                        return Ok(alloc(Kind::BoundMethod {
                            receiver: self.handle()?,
                            name: name.to_owned(),
                            func: Rc::clone(func),
                        }));
                    }
                    return Ok(attr);
                }
                None if name == "__init__" => {
                    return Ok(alloc(Kind::BoundMethod {
                        receiver: self.handle()?,
                        name: name.to_owned(),
                        func: Rc::new(|args, kwargs| {
                            if args.len() > 1 || !kwargs.is_empty() {
                                return Err(raise("TypeError", "object.__init__() takes no arguments"));
                            }
                            Ok(none())
                        }),
                    }));
                }
                None => {}
            }
        }
        Err(raise(
            "AttributeError",
            format!("'{}' object has no attribute '{name}'", self.type_name()),
        ))
    }

    /// Methods of the builtin containers, bound to this object.
    fn builtin_method(&self, name: &str) -> BridgeResult<Handle> {
        let receiver = self.handle()?;
        let method_name = name.to_owned();
        let func: Rc<NativeFn> = Rc::new(move |args, _kwargs| {
            let mut args = args.into_iter();
            let receiver = args.next().ok_or_else(|| raise("TypeError", "missing receiver"))?;
            let obj = downcast(&receiver).ok_or_else(|| raise("TypeError", "foreign receiver"))?;
            obj.call_builtin_method(&method_name, args.collect())
        });
        Ok(alloc(Kind::BoundMethod {
            receiver,
            name: name.to_owned(),
            func,
        }))
    }

    fn call_builtin_method(&self, name: &str, args: Vec<Handle>) -> BridgeResult<Handle> {
        match (&self.kind, name) {
            (Kind::Dict(map), "copy") => Ok(alloc(Kind::Dict(RefCell::new(map.borrow().clone())))),
            (Kind::Dict(map), "keys") => Ok(list(map.borrow().keys().map(|k| str(k.clone())).collect())),
            (Kind::Dict(map), "values") => Ok(list(map.borrow().values().cloned().collect())),
            (Kind::Dict(map), "items") => Ok(list(
                map.borrow()
                    .iter()
                    .map(|(k, v)| tuple(vec![str(k.clone()), Rc::clone(v)]))
                    .collect(),
            )),
            (Kind::Dict(map), "get") => {
                let mut args = args.into_iter();
                let key = args.next().ok_or_else(|| raise("TypeError", "get expected at least 1 argument"))?;
                let default = args.next().unwrap_or_else(none);
                let Arg::Str(key) = normalize_key(Arg::Handle(key)) else {
                    return Ok(default);
                };
                Ok(map.borrow().get(&key).cloned().unwrap_or(default))
            }
            (Kind::List(items), "append") => {
                let item = args
                    .into_iter()
                    .next()
                    .ok_or_else(|| raise("TypeError", "append() takes exactly one argument (0 given)"))?;
                items.borrow_mut().push(item);
                Ok(none())
            }
            (Kind::List(items), "copy") => Ok(list(items.borrow().clone())),
            (Kind::List(items), "pop") => items
                .borrow_mut()
                .pop()
                .ok_or_else(|| raise("IndexError", "pop from empty list")),
            _ => Err(raise(
                "AttributeError",
                format!("'{}' object has no attribute '{name}'", self.type_name()),
            )),
        }
    }

    fn instantiate(&self, args: Vec<Arg>) -> BridgeResult<Handle> {
        let instance = alloc(Kind::Instance { class: self.handle()? });
        let init = instance.get_attr("__init__")?;
        init.invoke(args)?;
        Ok(instance)
    }
}

impl fmt::Debug for MemoryObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryObject({})", self.render(true))
    }
}

impl ForeignHandle for MemoryObject {
    fn type_of(&self) -> BridgeResult<Handle> {
        Ok(match &self.kind {
            Kind::Instance { class } => Rc::clone(class),
            _ => builtin_type(&self.type_name()),
        })
    }

    fn to_primitive(&self) -> BridgeResult<Primitive> {
        match &self.kind {
            Kind::Bool(b) => Ok(Primitive::Bool(*b)),
            Kind::Int(i) => Ok(Primitive::Int(*i)),
            Kind::Float(f) => Ok(Primitive::Float(*f)),
            Kind::Str(s) => Ok(Primitive::Str(s.clone())),
            _ => Err(raise(
                "TypeError",
                format!("'{}' object has no primitive value", self.type_name()),
            )),
        }
    }

    fn invoke(&self, args: Vec<Arg>) -> BridgeResult<Handle> {
        if let Kind::Type { .. } = &self.kind {
            return self.instantiate(args);
        }
        let (positional, kwargs) = Arg::split_kwargs(args);
        let mut positional = positional.into_iter().map(from_arg).collect::<BridgeResult<Vec<_>>>()?;
        let kwargs = kwargs
            .into_iter()
            .map(|(k, v)| Ok((k, from_arg(v)?)))
            .collect::<BridgeResult<IndexMap<_, _>>>()?;
        match &self.kind {
            Kind::Function { func, .. } => func(positional, kwargs),
            Kind::BoundMethod { receiver, func, .. } => {
                positional.insert(0, Rc::clone(receiver));
                func(positional, kwargs)
            }
            Kind::Callback(callback) | Kind::HostMethod { callback, .. } => {
                if !kwargs.is_empty() {
                    return Err(raise(
                        "TypeError",
                        format!("{}() takes no keyword arguments", callback.name()),
                    ));
                }
                if let Kind::HostMethod { receiver, .. } = &self.kind {
                    let receiver: Handle = receiver
                        .upgrade()
                        .ok_or_else(|| raise("ReferenceError", "weakly-referenced object no longer exists"))?;
                    positional.insert(0, receiver);
                }
                from_arg(callback.call(positional)?)
            }
            _ => Err(raise(
                "TypeError",
                format!("'{}' object is not callable", self.type_name()),
            )),
        }
    }

    fn to_str(&self) -> BridgeResult<String> {
        Ok(self.render(false))
    }

    fn is_callable(&self) -> bool {
        matches!(
            self.kind,
            Kind::Type { .. }
                | Kind::Function { .. }
                | Kind::BoundMethod { .. }
                | Kind::Callback(_)
                | Kind::HostMethod { .. }
        )
    }

    fn is_iterator(&self) -> bool {
        matches!(self.kind, Kind::Iterator(_))
    }

    fn is_sequence(&self) -> bool {
        matches!(self.kind, Kind::List(_) | Kind::Tuple(_) | Kind::Bytes(_))
    }

    fn next(&self) -> BridgeResult<Step> {
        match &self.kind {
            Kind::Iterator(items) => Ok(items.borrow_mut().pop_front().map_or(Step::Done, Step::Yield)),
            _ => Err(raise(
                "TypeError",
                format!("'{}' object is not an iterator", self.type_name()),
            )),
        }
    }

    fn hash(&self) -> BridgeResult<i64> {
        match &self.kind {
            Kind::None => Ok(0),
            Kind::Bool(b) => Ok(i64::from(*b)),
            Kind::Int(i) => Ok(*i),
            Kind::Float(f) => Ok(float_hash(*f)),
            Kind::Str(s) => Ok(fnv1a(s.as_bytes())),
            Kind::Bytes(data) => Ok(fnv1a(data)),
            Kind::Tuple(items) => items.iter().try_fold(0x0034_5678_i64, |acc, item| {
                Ok(acc.wrapping_mul(1_000_003) ^ item.hash()?)
            }),
            Kind::List(_) | Kind::Dict(_) => Err(raise(
                "TypeError",
                format!("unhashable type: '{}'", self.type_name()),
            )),
            _ => Ok(fnv1a(&self.identity().to_ne_bytes())),
        }
    }

    fn has_attr(&self, name: &str) -> bool {
        self.attribute(name).is_ok()
    }

    fn get_attr(&self, name: &str) -> BridgeResult<Handle> {
        self.attribute(name)
    }

    fn set_attr(&self, name: &str, value: Arg) -> Status {
        if !matches!(
            self.kind,
            Kind::Instance { .. } | Kind::Type { .. } | Kind::Module { .. } | Kind::Function { .. }
        ) {
            return Status::FAILURE;
        }
        match from_arg(value) {
            Ok(value) => {
                self.attrs.borrow_mut().insert(name.to_owned(), value);
                Status::OK
            }
            Err(_) => Status::FAILURE,
        }
    }

    fn get_item(&self, key: Arg) -> BridgeResult<Handle> {
        let key = normalize_key(key);
        match (&self.kind, key) {
            (Kind::List(items), key) => sequence_item(&items.borrow(), key, list, "list"),
            (Kind::Tuple(items), key) => sequence_item(items, key, tuple, "tuple"),
            (Kind::Bytes(data), Arg::Int(index)) => resolve_index(index, data.len())
                .map(|i| int(i64::from(data[i])))
                .ok_or_else(|| raise("IndexError", "index out of range")),
            (Kind::Dict(map), Arg::Str(key)) => map
                .borrow()
                .get(&key)
                .cloned()
                .ok_or_else(|| raise("KeyError", format!("'{key}'"))),
            (Kind::Dict(_), other) => Err(raise("KeyError", format!("{other:?}"))),
            _ => Err(raise(
                "TypeError",
                format!("'{}' object is not subscriptable", self.type_name()),
            )),
        }
    }

    fn set_item(&self, key: Arg, value: Arg) -> Status {
        let key = normalize_key(key);
        let Ok(value) = from_arg(value) else {
            return Status::FAILURE;
        };
        match (&self.kind, key) {
            (Kind::List(items), Arg::Int(index)) => {
                let mut items = items.borrow_mut();
                match resolve_index(index, items.len()) {
                    Some(i) => {
                        items[i] = value;
                        Status::OK
                    }
                    None => Status::FAILURE,
                }
            }
            (Kind::Dict(map), Arg::Str(key)) => {
                map.borrow_mut().insert(key, value);
                Status::OK
            }
            _ => Status::FAILURE,
        }
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

fn sequence_item(items: &[Handle], key: Arg, rebuild: fn(Vec<Handle>) -> Handle, kind: &str) -> BridgeResult<Handle> {
    match key {
        Arg::Int(index) => resolve_index(index, items.len())
            .map(|i| Rc::clone(&items[i]))
            .ok_or_else(|| raise("IndexError", format!("{kind} index out of range"))),
        Arg::Handle(handle) => match downcast(&handle).map(|h| &h.kind) {
            Some(Kind::Slice { start, stop, step }) => {
                let picked = slice_indices(items.len(), *start, *stop, *step)?
                    .into_iter()
                    .map(|i| Rc::clone(&items[i]))
                    .collect();
                Ok(rebuild(picked))
            }
            _ => Err(raise("TypeError", format!("{kind} indices must be integers or slices"))),
        },
        _ => Err(raise("TypeError", format!("{kind} indices must be integers or slices"))),
    }
}

/// The in-memory runtime.
#[derive(Debug)]
pub struct MemoryRuntime {
    globals: Handle,
    builtins: IndexMap<String, Handle>,
    modules: RefCell<IndexMap<String, Handle>>,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    #[must_use]
    pub fn new() -> Self {
        let builtins: IndexMap<String, Handle> = [
            ("len", function("len", builtin_len)),
            ("slice", function("slice", builtin_slice)),
            ("type", function("type", builtin_type_of)),
            ("iter", function("iter", builtin_iter)),
            ("str", function("str", builtin_str)),
            ("object", class("builtins", "object", Vec::<(String, Handle)>::new())),
        ]
        .into_iter()
        .map(|(name, handle)| (name.to_owned(), handle))
        .collect();
        Self {
            globals: dict(Vec::<(String, Handle)>::new()),
            builtins,
            modules: RefCell::new(IndexMap::new()),
        }
    }

    /// Makes `module` importable under `name`.
    pub fn register_module(&self, name: impl Into<String>, module: Handle) {
        self.modules.borrow_mut().insert(name.into(), module);
    }

    /// Reads a binding of the shared global namespace.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Handle> {
        self.globals.get_item(Arg::Str(name.to_owned())).ok()
    }

    fn lookup_builtin(&self, name: &str) -> Option<Handle> {
        self.builtins.get(name).cloned()
    }
}

impl ForeignRuntime for MemoryRuntime {
    fn builtin(&self, name: &str) -> BridgeResult<Handle> {
        self.lookup_builtin(name)
            .ok_or_else(|| raise("NameError", format!("name '{name}' is not defined")))
    }

    fn globals(&self) -> Handle {
        Rc::clone(&self.globals)
    }

    fn import(&self, module: &str) -> BridgeResult<Handle> {
        self.modules
            .borrow()
            .get(module)
            .cloned()
            .ok_or_else(|| raise("ModuleNotFoundError", format!("No module named '{module}'")))
    }

    fn exec(&self, source: &str, globals: &Handle, locals: &Handle) -> BridgeResult<Handle> {
        exec::run(self, source, globals, locals)
    }

    fn bind_method(&self, function: HostCallback, receiver: &Handle) -> BridgeResult<Handle> {
        let receiver = downcast(receiver).ok_or_else(|| raise("TypeError", "cannot bind a method to a foreign object"))?;
        Ok(alloc(Kind::HostMethod {
            receiver: Weak::clone(&receiver.this),
            callback: function,
        }))
    }

    fn materialize(&self, error: &Error) -> BridgeResult<ForeignException> {
        match error {
            Error::Foreign(exc) => Ok(exc.clone()),
            Error::Type(message) => Ok(exception("TypeError", message)),
        }
    }
}

fn single_arg(name: &str, args: Vec<Handle>) -> BridgeResult<Handle> {
    let count = args.len();
    let mut args = args.into_iter();
    match (args.next(), count) {
        (Some(arg), 1) => Ok(arg),
        _ => Err(raise(
            "TypeError",
            format!("{name}() takes exactly one argument ({count} given)"),
        )),
    }
}

fn builtin_len(args: Vec<Handle>, _kwargs: IndexMap<String, Handle>) -> BridgeResult<Handle> {
    let arg = single_arg("len", args)?;
    let obj = downcast(&arg).ok_or_else(|| raise("TypeError", "object has no len()"))?;
    let len = i64::try_from(obj.len()?).map_err(|_| raise("OverflowError", "length too large"))?;
    Ok(int(len))
}

fn optional_int(handle: &Handle) -> BridgeResult<Option<i64>> {
    match downcast(handle).map(|h| &h.kind) {
        Some(Kind::None) => Ok(None),
        Some(Kind::Int(i)) => Ok(Some(*i)),
        _ => Err(raise("TypeError", "slice indices must be integers or None")),
    }
}

fn builtin_slice(args: Vec<Handle>, _kwargs: IndexMap<String, Handle>) -> BridgeResult<Handle> {
    let (start, stop, step) = match args.as_slice() {
        [stop] => (None, optional_int(stop)?, None),
        [start, stop] => (optional_int(start)?, optional_int(stop)?, None),
        [start, stop, step] => (optional_int(start)?, optional_int(stop)?, optional_int(step)?),
        _ => {
            return Err(raise(
                "TypeError",
                format!("slice expected 1 to 3 arguments, got {}", args.len()),
            ));
        }
    };
    Ok(alloc(Kind::Slice { start, stop, step }))
}

fn builtin_type_of(args: Vec<Handle>, _kwargs: IndexMap<String, Handle>) -> BridgeResult<Handle> {
    single_arg("type", args)?.type_of()
}

fn builtin_iter(args: Vec<Handle>, _kwargs: IndexMap<String, Handle>) -> BridgeResult<Handle> {
    let arg = single_arg("iter", args)?;
    let obj = downcast(&arg).ok_or_else(|| raise("TypeError", "object is not iterable"))?;
    match &obj.kind {
        Kind::Iterator(_) => Ok(Rc::clone(&arg)),
        Kind::List(items) => Ok(iterator(items.borrow().clone())),
        Kind::Tuple(items) => Ok(iterator(items.clone())),
        Kind::Dict(map) => Ok(iterator(map.borrow().keys().map(|k| str(k.clone())).collect())),
        Kind::Str(s) => Ok(iterator(s.chars().map(|c| str(c.to_string())).collect())),
        _ => Err(raise(
            "TypeError",
            format!("'{}' object is not iterable", obj.type_name()),
        )),
    }
}

fn builtin_str(args: Vec<Handle>, _kwargs: IndexMap<String, Handle>) -> BridgeResult<Handle> {
    Ok(str(single_arg("str", args)?.to_str()?))
}
