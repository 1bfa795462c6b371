use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::{GuestError, GuestValue};

/// Signature of a guest function implemented directly in Rust
pub type NativeFn = dyn Fn(&[GuestValue]) -> Result<GuestValue, GuestError> + Send + Sync;

/// A callable handed to the host by guest code
///
/// The body is opaque to the host: only the interpreter that produced it
/// knows how to call it. Two handles refer to the same function when their
/// names match, which is how a script unregisters a listener it registered
/// earlier.
#[derive(Clone)]
pub struct GuestFn {
    name: Arc<str>,
    body: Arc<dyn Any + Send + Sync>,
}

impl GuestFn {
    /// Wrap an interpreter specific function object
    pub fn new<T>(name: impl Into<Arc<str>>, body: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
        }
    }

    /// Wrap a Rust closure as a guest function
    pub fn native<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(&[GuestValue]) -> Result<GuestValue, GuestError> + Send + Sync + 'static,
    {
        let body: Box<NativeFn> = Box::new(f);
        Self::new(name, body)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Borrow the interpreter specific body
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.body.downcast_ref::<T>()
    }

    /// Call the function if it is a native closure
    pub fn call_native(&self, args: &[GuestValue]) -> Option<Result<GuestValue, GuestError>> {
        self.downcast_ref::<Box<NativeFn>>().map(|f| f(args))
    }

    pub fn same_function(&self, other: &GuestFn) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for GuestFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuestFn({})", self.name)
    }
}
