/// Process wiring for a tickhost server: logging, the main-loop driver,
/// console input and script reloading
pub mod console;
pub mod host;
pub mod host_runner;
pub mod logging;
pub mod reload;

pub use console::ConsoleSender;
pub use host::Host;
pub use host_runner::{check_script, HostRunner, StopReason};
pub use logging::init_logging;
