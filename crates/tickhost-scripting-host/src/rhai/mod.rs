//! Rhai guest language backend
//!
//! Each script gets its own `Engine` and compiled `AST`. Script functions
//! handed to the host travel as [`FnPtr`] inside a [`GuestFn`].

mod bindings;
mod loader;

pub use loader::load_rhai_scripts;

use parking_lot::RwLock;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Position, AST};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tickhost_scripting_api::{GuestError, GuestFn, GuestResult, GuestValue};

use crate::api::ScriptApi;
use crate::interpreter::{Interpreter, ScriptSource};

/// A Rhai script, from a file or from memory
pub struct RhaiScript {
    name: String,
    path: Option<PathBuf>,
    source: String,
    config: GuestValue,
}

impl RhaiScript {
    pub fn from_source(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            source: source.into(),
            config: GuestValue::None,
        }
    }

    /// Read a script file; its name is the file stem
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let name = crate::script_scanner::script_name(path).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "script file has no usable name")
        })?;
        Ok(Self {
            name,
            path: Some(path.to_path_buf()),
            source,
            config: GuestValue::None,
        })
    }

    pub fn with_config(mut self, config: GuestValue) -> Self {
        self.config = config;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl ScriptSource for RhaiScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_interpreter(&self) -> GuestResult<Arc<dyn Interpreter>> {
        let ast = Engine::new().compile(&self.source).map_err(|err| {
            let error = GuestError::new(err.0.to_string()).with_kind("SyntaxError");
            match position_trace(&self.name, err.1) {
                Some(trace) => error.with_traceback(trace),
                None => error,
            }
        })?;
        Ok(Arc::new(RhaiInterpreter {
            name: self.name.clone(),
            ast,
            runtime: RwLock::new(None),
        }))
    }

    fn config(&self) -> GuestValue {
        self.config.clone()
    }
}

struct Runtime {
    engine: Engine,
    ast: AST,
}

struct RhaiInterpreter {
    name: String,
    ast: AST,
    /// Set while the script is loaded; the engine's bindings hold the
    /// script's API, so `close` drops it to release the script
    runtime: RwLock<Option<Arc<Runtime>>>,
}

impl Interpreter for RhaiInterpreter {
    fn invoke(&self, function: &GuestFn, args: &[GuestValue]) -> GuestResult {
        if let Some(result) = function.call_native(args) {
            return result;
        }
        let Some(fn_ptr) = function.downcast_ref::<FnPtr>() else {
            return Err(GuestError::new(format!("'{}' is not a Rhai function", function.name()))
                .with_kind("TypeError"));
        };
        let runtime = self
            .runtime
            .read()
            .clone()
            .ok_or_else(|| GuestError::new(format!("script '{}' is closed", self.name)))?;

        let args: Vec<Dynamic> = args.iter().map(to_dynamic).collect();
        let result = match args.as_slice() {
            [] => fn_ptr.call::<Dynamic>(&runtime.engine, &runtime.ast, ()),
            [a] => fn_ptr.call::<Dynamic>(&runtime.engine, &runtime.ast, (a.clone(),)),
            [a, b] => fn_ptr.call::<Dynamic>(&runtime.engine, &runtime.ast, (a.clone(), b.clone())),
            [a, b, c] => fn_ptr.call::<Dynamic>(
                &runtime.engine,
                &runtime.ast,
                (a.clone(), b.clone(), c.clone()),
            ),
            _ => {
                return Err(GuestError::new(format!(
                    "'{}' called with {} arguments, at most 3 are supported",
                    function.name(),
                    args.len()
                ))
                .with_kind("TypeError"))
            }
        };
        result
            .map(|value| from_dynamic(&value))
            .map_err(|err| guest_error(&self.name, &err))
    }

    fn run_main(&self, api: ScriptApi) -> GuestResult<()> {
        let mut engine = Engine::new();
        bindings::register(&mut engine, api);
        engine.on_progress(|_| {
            crate::task::cancellation_requested().then(|| Dynamic::from("task cancelled"))
        });
        let runtime = Arc::new(Runtime {
            engine,
            ast: self.ast.clone(),
        });
        *self.runtime.write() = Some(Arc::clone(&runtime));

        runtime
            .engine
            .run_ast(&runtime.ast)
            .map_err(|err| guest_error(&self.name, &err))
    }

    fn close(&self) {
        self.runtime.write().take();
    }
}

fn position_trace(script: &str, position: Position) -> Option<String> {
    let line = position.line()?;
    Some(match position.position() {
        Some(column) => format!("  at {}:{}:{}", script, line, column),
        None => format!("  at {}:{}", script, line),
    })
}

fn guest_error(script: &str, err: &EvalAltResult) -> GuestError {
    let kind = match err {
        EvalAltResult::ErrorRuntime(..) => "RuntimeError",
        EvalAltResult::ErrorFunctionNotFound(..) => "FunctionNotFound",
        EvalAltResult::ErrorVariableNotFound(..) => "NameError",
        EvalAltResult::ErrorMismatchDataType(..) | EvalAltResult::ErrorMismatchOutputType(..) => {
            "TypeError"
        }
        EvalAltResult::ErrorParsing(..) => "SyntaxError",
        EvalAltResult::ErrorTerminated(..) => "Cancelled",
        _ => "ScriptError",
    };
    let error = GuestError::new(err.to_string()).with_kind(kind);
    match position_trace(script, err.position()) {
        Some(trace) => error.with_traceback(trace),
        None => error,
    }
}

pub(crate) fn to_dynamic(value: &GuestValue) -> Dynamic {
    match value {
        GuestValue::None => Dynamic::UNIT,
        GuestValue::Bool(b) => Dynamic::from(*b),
        GuestValue::Int(i) => Dynamic::from(*i),
        GuestValue::Float(f) => Dynamic::from(*f),
        GuestValue::Str(s) => Dynamic::from(s.clone()),
        GuestValue::List(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        GuestValue::Map(entries) => Dynamic::from_map(
            entries
                .iter()
                .map(|(key, value)| (key.as_str().into(), to_dynamic(value)))
                .collect(),
        ),
    }
}

pub(crate) fn from_dynamic(value: &Dynamic) -> GuestValue {
    if value.is_unit() {
        return GuestValue::None;
    }
    if let Ok(b) = value.as_bool() {
        return GuestValue::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return GuestValue::Int(i);
    }
    if let Ok(f) = value.as_float() {
        return GuestValue::Float(f);
    }
    if value.is_string() {
        return GuestValue::Str(value.to_string());
    }
    if let Some(items) = value.clone().try_cast::<rhai::Array>() {
        return GuestValue::List(items.iter().map(from_dynamic).collect());
    }
    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        return GuestValue::Map(
            map.iter()
                .map(|(key, value)| (key.to_string(), from_dynamic(value)))
                .collect(),
        );
    }
    if let Some(fn_ptr) = value.clone().try_cast::<FnPtr>() {
        return GuestValue::Str(fn_ptr.fn_name().to_string());
    }
    GuestValue::Str(value.to_string())
}
