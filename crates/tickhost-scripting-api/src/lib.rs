/// Types shared by the tickhost scripting host and the guest bindings
///
/// The host crate depends on this one; guest language backends only need
/// these types to move values, errors and callables across the boundary.
pub mod error;
pub mod events;
pub mod function;
pub mod value;

pub use error::GuestError;
pub use events::{
    EventKind, EventPriority, HostEvent, ScriptEvent, ScriptEventType, UnknownEventKind,
    UnknownPriority,
};
pub use function::{GuestFn, NativeFn};
pub use value::GuestValue;

/// Result of a call into guest code
pub type GuestResult<T = GuestValue> = Result<T, GuestError>;
