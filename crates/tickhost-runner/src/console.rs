//! Operator console: stdin lines become commands

use std::io::BufRead;
use tokio::sync::mpsc;

use tickhost_scripting_host::CommandSender;

/// The operator at the terminal. Holds every permission.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSender;

impl CommandSender for ConsoleSender {
    fn name(&self) -> &str {
        "CONSOLE"
    }

    fn send_message(&self, message: &str) {
        println!("{}", message);
    }
}

/// Read stdin on a detached thread so a pending read never holds up
/// runtime shutdown. The channel closes at end of input.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("tickhost-console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!("Stopped reading console input: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::error!("Failed to start console reader: {}", e);
    }
    line_rx
}
