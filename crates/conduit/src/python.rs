//! CPython backend built on pyo3.
//!
//! [`PythonRuntime`] runs against the interpreter pyo3 links to; every handle
//! is a [`PyHandle`] owning one strong reference to a Python object. The GIL
//! is taken per primitive operation.

use std::{any::Any, fmt, rc::Rc};

use num_bigint::BigInt;
use pyo3::{
    exceptions::{PyStopIteration, PyTypeError},
    prelude::*,
    sync::PyOnceLock,
    types::{PyBool, PyBytes, PyDict, PyFloat, PyInt, PyIterator, PyList, PySequence, PyString, PyTuple},
};

use crate::{
    error::{BridgeResult, Error, ForeignException},
    handle::{ForeignHandle, ForeignRuntime, Handle, Primitive, Status, Step},
    marshal::{Arg, HostCallback},
};

/// One strong reference to a Python object.
pub struct PyHandle(Py<PyAny>);

impl PyHandle {
    #[must_use]
    pub fn new(obj: Py<PyAny>) -> Handle {
        Rc::new(Self(obj))
    }

    /// The underlying Python object.
    #[must_use]
    pub fn object(&self) -> &Py<PyAny> {
        &self.0
    }
}

impl fmt::Debug for PyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Python::attach(|py| match self.0.bind(py).repr() {
            Ok(repr) => write!(f, "PyHandle({})", repr.to_string_lossy()),
            Err(_) => f.write_str("PyHandle(<unrepresentable>)"),
        })
    }
}

/// Turns a raised Python exception into a bridge error, keeping the
/// `(type, value, traceback)` triple.
fn raised(py: Python<'_>, err: &PyErr) -> Error {
    let exc_type = PyHandle::new(err.get_type(py).into_any().unbind());
    let value = PyHandle::new(err.value(py).clone().into_any().unbind());
    let traceback = err.traceback(py).map(|tb| PyHandle::new(tb.into_any().unbind()));
    Error::Foreign(ForeignException::new(exc_type, value, traceback, err.to_string()))
}

impl From<PyErr> for Error {
    fn from(err: PyErr) -> Self {
        Python::attach(|py| raised(py, &err))
    }
}

/// Error handed back to Python when a host callback fails.
fn to_py_err(py: Python<'_>, error: &Error) -> PyErr {
    match error {
        Error::Foreign(exc) => match unwrap_handle(exc.value()) {
            Some(value) => PyErr::from_value(value.bind(py).clone()),
            None => PyTypeError::new_err(exc.message().to_owned()),
        },
        Error::Type(msg) => PyTypeError::new_err(msg.clone()),
    }
}

fn unwrap_handle(handle: &Handle) -> Option<&Py<PyAny>> {
    handle.as_any()?.downcast_ref::<PyHandle>().map(PyHandle::object)
}

fn bound_handle<'py>(py: Python<'py>, handle: &Handle) -> BridgeResult<Bound<'py, PyAny>> {
    unwrap_handle(handle)
        .map(|obj| obj.bind(py).clone())
        .ok_or_else(|| Error::type_error(format!("{handle:?} is not a Python handle")))
}

/// Converts a marshalled argument to a Python object.
fn to_py(py: Python<'_>, arg: Arg) -> BridgeResult<Py<PyAny>> {
    Ok(match arg {
        Arg::None => py.None(),
        Arg::Bool(b) => PyBool::new(py, b).to_owned().into_any().unbind(),
        Arg::Int(i) => {
            let Ok(int) = i.into_pyobject(py);
            int.into_any().unbind()
        }
        Arg::BigInt(i) => i.into_pyobject(py)?.into_any().unbind(),
        Arg::Float(f) => {
            let Ok(float) = f.into_pyobject(py);
            float.into_any().unbind()
        }
        Arg::Str(s) => PyString::new(py, &s).into_any().unbind(),
        Arg::List(items) => {
            let items = items.into_iter().map(|item| to_py(py, item)).collect::<BridgeResult<Vec<_>>>()?;
            PyList::new(py, items)?.into_any().unbind()
        }
        Arg::Dict(map) | Arg::Kwargs(map) => to_py_dict(py, map)?.into_any().unbind(),
        Arg::Handle(handle) => bound_handle(py, &handle)?.unbind(),
        Arg::Bytes(data) => PyBytes::new(py, &data).into_any().unbind(),
        Arg::Callback(callback) => Py::new(py, CallbackShim { callback })?.into_any(),
    })
}

fn to_py_dict(py: Python<'_>, map: indexmap::IndexMap<String, Arg>) -> BridgeResult<Bound<'_, PyDict>> {
    let dict = PyDict::new(py);
    for (key, value) in map {
        dict.set_item(key, to_py(py, value)?)?;
    }
    Ok(dict)
}

/// A host callback as a Python callable.
#[pyclass(unsendable, name = "HostCallback", module = "conduit")]
struct CallbackShim {
    callback: HostCallback,
}

#[pymethods]
impl CallbackShim {
    #[pyo3(signature = (*args))]
    fn __call__(&self, py: Python<'_>, args: &Bound<'_, PyTuple>) -> PyResult<Py<PyAny>> {
        let handles = args.iter().map(|arg| PyHandle::new(arg.unbind())).collect();
        let result = self.callback.call(handles).map_err(|err| to_py_err(py, &err))?;
        to_py(py, result).map_err(|err| to_py_err(py, &err))
    }

    fn __repr__(&self) -> String {
        format!("<host function {}>", self.callback.name())
    }

    #[getter]
    fn __name__(&self) -> String {
        self.callback.name().to_owned()
    }
}

impl ForeignHandle for PyHandle {
    fn type_of(&self) -> BridgeResult<Handle> {
        Python::attach(|py| Ok(Self::new(self.0.bind(py).get_type().into_any().unbind())))
    }

    fn to_primitive(&self) -> BridgeResult<Primitive> {
        Python::attach(|py| {
            let obj = self.0.bind(py);
            // bool is a subclass of int
            if let Ok(b) = obj.cast::<PyBool>() {
                Ok(Primitive::Bool(b.is_true()))
            } else if let Ok(int) = obj.cast::<PyInt>() {
                match int.extract::<i64>() {
                    Ok(i) => Ok(Primitive::Int(i)),
                    Err(_) => Ok(Primitive::BigInt(int.extract::<BigInt>()?)),
                }
            } else if let Ok(float) = obj.cast::<PyFloat>() {
                Ok(Primitive::Float(float.value()))
            } else if let Ok(string) = obj.cast::<PyString>() {
                Ok(Primitive::Str(string.to_string_lossy().into_owned()))
            } else {
                Err(Error::type_error(format!(
                    "cannot convert {} to a primitive",
                    obj.get_type().name()?
                )))
            }
        })
    }

    fn invoke(&self, args: Vec<Arg>) -> BridgeResult<Handle> {
        Python::attach(|py| {
            let (positional, kwargs) = Arg::split_kwargs(args);
            let positional = positional.into_iter().map(|arg| to_py(py, arg)).collect::<BridgeResult<Vec<_>>>()?;
            let positional = PyTuple::new(py, positional)?;
            let result = if kwargs.is_empty() {
                self.0.bind(py).call1(positional)?
            } else {
                let kwargs = to_py_dict(py, kwargs)?;
                self.0.bind(py).call(positional, Some(&kwargs))?
            };
            Ok(Self::new(result.unbind()))
        })
    }

    fn to_str(&self) -> BridgeResult<String> {
        Python::attach(|py| Ok(self.0.bind(py).str()?.to_string_lossy().into_owned()))
    }

    fn is_callable(&self) -> bool {
        Python::attach(|py| self.0.bind(py).is_callable())
    }

    fn is_iterator(&self) -> bool {
        Python::attach(|py| self.0.bind(py).cast::<PyIterator>().is_ok())
    }

    fn is_sequence(&self) -> bool {
        Python::attach(|py| self.0.bind(py).cast::<PySequence>().is_ok())
    }

    fn next(&self) -> BridgeResult<Step> {
        Python::attach(|py| match self.0.bind(py).call_method0("__next__") {
            Ok(value) => Ok(Step::Yield(Self::new(value.unbind()))),
            Err(err) if err.is_instance_of::<PyStopIteration>(py) => Ok(Step::Done),
            Err(err) => Err(raised(py, &err)),
        })
    }

    fn hash(&self) -> BridgeResult<i64> {
        Python::attach(|py| {
            let hash = self.0.bind(py).hash()?;
            i64::try_from(hash).map_err(|_| Error::type_error("hash does not fit in 64 bits"))
        })
    }

    fn has_attr(&self, name: &str) -> bool {
        Python::attach(|py| self.0.bind(py).hasattr(name).unwrap_or(false))
    }

    fn get_attr(&self, name: &str) -> BridgeResult<Handle> {
        Python::attach(|py| Ok(Self::new(self.0.bind(py).getattr(name)?.unbind())))
    }

    fn set_attr(&self, name: &str, value: Arg) -> Status {
        Python::attach(|py| {
            let Ok(value) = to_py(py, value) else {
                return Status::FAILURE;
            };
            self.0.bind(py).setattr(name, value).is_ok().into()
        })
    }

    fn get_item(&self, key: Arg) -> BridgeResult<Handle> {
        Python::attach(|py| {
            let key = to_py(py, key)?;
            Ok(Self::new(self.0.bind(py).get_item(key)?.unbind()))
        })
    }

    fn set_item(&self, key: Arg, value: Arg) -> Status {
        Python::attach(|py| {
            let (Ok(key), Ok(value)) = (to_py(py, key), to_py(py, value)) else {
                return Status::FAILURE;
            };
            self.0.bind(py).set_item(key, value).is_ok().into()
        })
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

/// Runs a block and returns the value of its trailing expression statement.
const EXEC_HELPER: &std::ffi::CStr = cr#"
import ast

def run(source, globals, locals):
    tree = ast.parse(source, mode="exec")
    tail = None
    if tree.body and isinstance(tree.body[-1], ast.Expr):
        tail = ast.Expression(tree.body.pop().value)
    exec(compile(tree, "<conduit>", "exec"), globals, locals)
    if tail is None:
        return None
    return eval(compile(tail, "<conduit>", "eval"), globals, locals)
"#;

fn exec_helper<'py>(py: Python<'py>) -> PyResult<&'py Bound<'py, PyAny>> {
    static RUN: PyOnceLock<Py<PyAny>> = PyOnceLock::new();
    RUN.get_or_try_init(py, || {
        PyModule::from_code(py, EXEC_HELPER, c"conduit_exec.py", c"conduit_exec")?
            .getattr("run")
            .map(Bound::unbind)
    })
    .map(|run| run.bind(py))
}

/// The CPython runtime. Its global namespace is the `__main__` module's dict.
#[derive(Debug)]
pub struct PythonRuntime {
    globals: Handle,
}

impl PythonRuntime {
    pub fn new() -> BridgeResult<Self> {
        Python::attach(|py| {
            let globals = py.import("__main__")?.dict().into_any().unbind();
            Ok(Self {
                globals: PyHandle::new(globals),
            })
        })
    }
}

impl ForeignRuntime for PythonRuntime {
    fn builtin(&self, name: &str) -> BridgeResult<Handle> {
        Python::attach(|py| Ok(PyHandle::new(py.import("builtins")?.getattr(name)?.unbind())))
    }

    fn globals(&self) -> Handle {
        Rc::clone(&self.globals)
    }

    fn import(&self, module: &str) -> BridgeResult<Handle> {
        Python::attach(|py| Ok(PyHandle::new(py.import(module)?.into_any().unbind())))
    }

    fn exec(&self, source: &str, globals: &Handle, locals: &Handle) -> BridgeResult<Handle> {
        Python::attach(|py| {
            let globals = bound_handle(py, globals)?;
            let locals = bound_handle(py, locals)?;
            let result = exec_helper(py)?.call1((source, globals, locals))?;
            Ok(PyHandle::new(result.unbind()))
        })
    }

    fn bind_method(&self, function: HostCallback, receiver: &Handle) -> BridgeResult<Handle> {
        Python::attach(|py| {
            let receiver = bound_handle(py, receiver)?;
            let function = Py::new(py, CallbackShim { callback: function })?;
            let method = py.import("types")?.getattr("MethodType")?.call1((function, receiver))?;
            Ok(PyHandle::new(method.unbind()))
        })
    }

    fn materialize(&self, error: &Error) -> BridgeResult<ForeignException> {
        match error {
            Error::Foreign(exc) => Ok(exc.clone()),
            Error::Type(msg) => Python::attach(|py| match raised(py, &PyTypeError::new_err(msg.clone())) {
                Error::Foreign(exc) => Ok(exc),
                other => Err(other),
            }),
        }
    }
}
