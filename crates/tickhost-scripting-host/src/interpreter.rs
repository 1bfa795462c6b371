//! Guest interpreter primitive
//!
//! The host never executes guest code itself. It hands callables to the
//! interpreter that owns them and receives a value or a guest exception.

use std::sync::Arc;

use tickhost_scripting_api::{GuestError, GuestFn, GuestResult, GuestValue};

use crate::api::ScriptApi;

/// One script's interpreter context
pub trait Interpreter: Send + Sync + 'static {
    /// Call a guest function with arguments
    fn invoke(&self, function: &GuestFn, args: &[GuestValue]) -> GuestResult;

    /// Execute the script's top-level code; registrations made here are
    /// attributed to the script behind `api`
    fn run_main(&self, api: ScriptApi) -> GuestResult<()>;

    /// Release interpreter resources once the script is unloaded
    fn close(&self) {}
}

/// Something the script manager can load
pub trait ScriptSource: Send {
    /// Unique script name
    fn name(&self) -> &str;

    /// Build a fresh interpreter context for this script
    fn create_interpreter(&self) -> GuestResult<Arc<dyn Interpreter>>;

    /// Per-script configuration exposed to the script
    fn config(&self) -> GuestValue {
        GuestValue::None
    }
}

type MainFn = dyn Fn(&ScriptApi) -> GuestResult<()> + Send + Sync;

/// A script written in Rust, with closures as guest functions
pub struct NativeScript {
    name: String,
    main: Arc<MainFn>,
    config: GuestValue,
}

impl NativeScript {
    pub fn new<F>(name: impl Into<String>, main: F) -> Self
    where
        F: Fn(&ScriptApi) -> GuestResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            main: Arc::new(main),
            config: GuestValue::None,
        }
    }

    pub fn with_config(mut self, config: GuestValue) -> Self {
        self.config = config;
        self
    }
}

impl ScriptSource for NativeScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_interpreter(&self) -> GuestResult<Arc<dyn Interpreter>> {
        Ok(Arc::new(NativeInterpreter {
            main: Arc::clone(&self.main),
        }))
    }

    fn config(&self) -> GuestValue {
        self.config.clone()
    }
}

struct NativeInterpreter {
    main: Arc<MainFn>,
}

impl Interpreter for NativeInterpreter {
    fn invoke(&self, function: &GuestFn, args: &[GuestValue]) -> GuestResult {
        function.call_native(args).unwrap_or_else(|| {
            Err(GuestError::new(format!("'{}' is not a native function", function.name()))
                .with_kind("TypeError"))
        })
    }

    fn run_main(&self, api: ScriptApi) -> GuestResult<()> {
        (self.main)(&api)
    }
}
