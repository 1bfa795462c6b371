//! Command-table primitive and an in-process command map

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HostError;

/// Whoever typed the command
pub trait CommandSender: Send + Sync {
    fn name(&self) -> &str;

    fn send_message(&self, message: &str);

    fn has_permission(&self, _permission: &str) -> bool {
        true
    }
}

pub trait CommandExecutor: Send + Sync {
    /// Run the command. `false` means the input was not understood and the
    /// usage text should be shown.
    fn execute(&self, sender: &dyn CommandSender, label: &str, args: &[String]) -> bool;

    fn tab_complete(&self, _sender: &dyn CommandSender, _label: &str, _args: &[String]) -> Vec<String> {
        Vec::new()
    }

    fn usage(&self) -> Option<String> {
        None
    }
}

pub trait CommandTable: Send + Sync + 'static {
    /// Insert a command under its name and every alias
    fn insert(
        &self,
        name: &str,
        aliases: &[String],
        executor: Arc<dyn CommandExecutor>,
    ) -> Result<(), HostError>;

    /// Remove every key `insert` added for this command
    fn remove(&self, name: &str, aliases: &[String]) -> Result<(), HostError>;
}

struct Entry {
    owner: String,
    executor: Arc<dyn CommandExecutor>,
}

/// Command table keyed by lower-cased label, each label present both bare
/// and as `<prefix>:<label>`
pub struct CommandMap {
    prefix: String,
    entries: RwLock<HashMap<String, Entry>>,
}

impl CommandMap {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().to_lowercase(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn keys(&self, label: &str) -> [String; 2] {
        let label = label.to_lowercase();
        let prefixed = format!("{}:{}", self.prefix, label);
        [label, prefixed]
    }

    /// Whether `label` resolves to a command
    pub fn contains(&self, label: &str) -> bool {
        self.entries.read().contains_key(&label.to_lowercase())
    }

    /// Every registered key, sorted
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.entries.read().keys().cloned().collect();
        labels.sort();
        labels
    }

    fn lookup(&self, label: &str) -> Option<Arc<dyn CommandExecutor>> {
        self.entries
            .read()
            .get(&label.to_lowercase())
            .map(|entry| Arc::clone(&entry.executor))
    }

    /// Run a command line such as `/greet alice`. Returns `false` if no
    /// command matched.
    pub fn dispatch(&self, sender: &dyn CommandSender, line: &str) -> bool {
        let mut parts = line.trim().trim_start_matches('/').split_whitespace();
        let Some(label) = parts.next() else {
            return false;
        };
        let args: Vec<String> = parts.map(str::to_string).collect();
        let Some(executor) = self.lookup(label) else {
            return false;
        };

        if !executor.execute(sender, label, &args) {
            if let Some(usage) = executor.usage() {
                for line in usage.replace("<command>", label).lines() {
                    sender.send_message(line);
                }
            }
        }
        true
    }

    /// Completions for a partially typed command line
    pub fn complete(&self, sender: &dyn CommandSender, line: &str) -> Vec<String> {
        let line = line.trim_start().trim_start_matches('/');
        let Some((label, rest)) = line.split_once(' ') else {
            let typed = line.to_lowercase();
            return self
                .labels()
                .into_iter()
                .filter(|label| label.starts_with(&typed))
                .collect();
        };

        let Some(executor) = self.lookup(label) else {
            return Vec::new();
        };
        let mut args: Vec<String> = rest.split(' ').map(str::to_string).collect();
        if args.is_empty() {
            args.push(String::new());
        }
        executor.tab_complete(sender, label, &args)
    }
}

impl CommandTable for CommandMap {
    fn insert(
        &self,
        name: &str,
        aliases: &[String],
        executor: Arc<dyn CommandExecutor>,
    ) -> Result<(), HostError> {
        let name = name.to_lowercase();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(HostError::LabelTaken(name));
        }

        for key in self.keys(&name) {
            entries.insert(
                key,
                Entry {
                    owner: name.clone(),
                    executor: Arc::clone(&executor),
                },
            );
        }
        for alias in aliases {
            for key in self.keys(alias) {
                if entries.contains_key(&key) {
                    tracing::warn!("Command alias '{}' for '{}' is already taken", key, name);
                    continue;
                }
                entries.insert(
                    key,
                    Entry {
                        owner: name.clone(),
                        executor: Arc::clone(&executor),
                    },
                );
            }
        }
        Ok(())
    }

    fn remove(&self, name: &str, aliases: &[String]) -> Result<(), HostError> {
        let name = name.to_lowercase();
        let mut entries = self.entries.write();
        if entries.get(&name).map(|entry| entry.owner.as_str()) != Some(name.as_str()) {
            return Err(HostError::Unavailable(format!("command '{}' is not in the command map", name)));
        }

        let labels = std::iter::once(name.as_str()).chain(aliases.iter().map(String::as_str));
        for label in labels {
            for key in self.keys(label) {
                if entries.get(&key).is_some_and(|entry| entry.owner == name) {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
