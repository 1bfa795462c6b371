//! Routing of guest exceptions to loggers and notifiers

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tickhost_scripting_api::GuestError;

use crate::context::{panic_message, ScriptContext};

/// Offered to every sink before a guest exception is logged.
/// Clearing `report` suppresses the log output.
#[derive(Debug, Clone)]
pub struct ScriptExceptionEvent {
    script: String,
    exception: GuestError,
    message: String,
    report: bool,
}

impl ScriptExceptionEvent {
    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn exception(&self) -> &GuestError {
        &self.exception
    }

    /// What the script was doing when the exception was raised
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn report(&self) -> bool {
        self.report
    }

    pub fn set_report(&mut self, report: bool) {
        self.report = report;
    }
}

/// External consumer of script exceptions
pub trait ExceptionSink: Send + Sync {
    fn on_exception(&self, event: &mut ScriptExceptionEvent);
}

impl<F> ExceptionSink for F
where
    F: Fn(&mut ScriptExceptionEvent) + Send + Sync,
{
    fn on_exception(&self, event: &mut ScriptExceptionEvent) {
        self(event)
    }
}

#[derive(Clone, Default)]
pub struct ExceptionRouter {
    sinks: Arc<RwLock<Vec<Arc<dyn ExceptionSink>>>>,
}

impl ExceptionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&self, sink: impl ExceptionSink + 'static) {
        self.sinks.write().push(Arc::new(sink));
    }

    /// Offer the exception to every sink, then log it unless vetoed.
    /// Returns whether it was logged.
    pub fn report(&self, script: &ScriptContext, exception: &GuestError, message: &str) -> bool {
        let mut event = ScriptExceptionEvent {
            script: script.name().to_string(),
            exception: exception.clone(),
            message: message.to_string(),
            report: true,
        };

        let sinks = self.sinks.read().clone();
        for sink in sinks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| sink.on_exception(&mut event))) {
                tracing::error!(
                    target: "scripting",
                    script = script.name(),
                    "Exception sink panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
        if !event.report {
            return false;
        }

        let text = format!("{}: {}", message, exception.formatted());
        script.logger().append(tracing::Level::ERROR, &text);
        tracing::error!(target: "scripting", script = script.name(), "{}", text);
        true
    }
}
