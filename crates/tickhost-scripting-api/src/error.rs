use std::fmt;

/// An exception raised by guest code
///
/// Carries the guest's own exception kind and message plus an optional
/// guest traceback. The host never unwinds through guest errors; it routes
/// them to the exception router instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GuestError {
    pub kind: String,
    pub message: String,
    pub traceback: Option<String>,
}

impl GuestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: "Exception".to_string(),
            message: message.into(),
            traceback: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    /// Error text including the traceback when one is available
    pub fn formatted(&self) -> Formatted<'_> {
        Formatted(self)
    }
}

/// Display adapter returned by [`GuestError::formatted`]
pub struct Formatted<'a>(&'a GuestError);

impl fmt::Display for Formatted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.traceback {
            Some(traceback) => write!(f, "{}\n{}", self.0, traceback),
            None => write!(f, "{}", self.0),
        }
    }
}
