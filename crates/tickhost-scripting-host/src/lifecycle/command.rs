use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tickhost_scripting_api::{GuestFn, GuestValue};

use crate::command_map::{CommandExecutor, CommandSender, CommandTable};
use crate::context::ScriptContext;
use crate::error::{CommandError, HostError};
use crate::exception::ExceptionRouter;

const INTERNAL_ERROR: &str = "An internal error occurred while attempting to perform this command";
const NO_PERMISSION: &str =
    "I'm sorry, but you do not have permission to perform this command. Please contact the server administrators if you believe that this is in error.";

/// Description of a command a script wants to register
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub usage: String,
    pub aliases: Vec<String>,
    pub permission: Option<String>,
    pub permission_message: Option<String>,
    pub execute: GuestFn,
    pub tab_complete: Option<GuestFn>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, execute: GuestFn) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            usage: "/<command>".to_string(),
            aliases: Vec::new(),
            permission: None,
            permission_message: None,
            execute,
            tab_complete: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn permission_message(mut self, message: impl Into<String>) -> Self {
        self.permission_message = Some(message.into());
        self
    }

    pub fn tab_completer(mut self, function: GuestFn) -> Self {
        self.tab_complete = Some(function);
        self
    }

    /// Lower-cased label and aliases; aliases repeating the label are dropped
    fn normalized(mut self) -> Self {
        self.name = self.name.to_lowercase();
        let mut aliases: Vec<String> = Vec::with_capacity(self.aliases.len());
        for alias in self.aliases.drain(..) {
            let alias = alias.to_lowercase();
            if alias != self.name && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        self.aliases = aliases;
        self
    }
}

/// Bridges the command table to a script's guest functions
struct ScriptCommand {
    script: Weak<ScriptContext>,
    spec: CommandSpec,
    exceptions: ExceptionRouter,
}

impl ScriptCommand {
    fn call_args(sender: &dyn CommandSender, label: &str, args: &[String]) -> [GuestValue; 3] {
        [
            GuestValue::from(sender.name()),
            GuestValue::from(label),
            GuestValue::List(args.iter().map(|arg| GuestValue::from(arg.as_str())).collect()),
        ]
    }
}

impl CommandExecutor for ScriptCommand {
    fn execute(&self, sender: &dyn CommandSender, label: &str, args: &[String]) -> bool {
        let Some(script) = self.script.upgrade() else {
            return true;
        };
        if let Some(permission) = &self.spec.permission {
            if !sender.has_permission(permission) {
                let message = self.spec.permission_message.as_deref().unwrap_or(NO_PERMISSION);
                sender.send_message(message);
                return true;
            }
        }

        match script.invoke(&self.spec.execute, &Self::call_args(sender, label, args)) {
            Ok(GuestValue::Bool(handled)) => handled,
            Ok(_) => {
                script.logger().error(&format!(
                    "Script command function '{}' should return a boolean!",
                    self.spec.execute.name()
                ));
                true
            }
            Err(err) => {
                self.exceptions.report(
                    &script,
                    &err,
                    &format!("Unhandled exception when executing command '{}'", label),
                );
                sender.send_message(INTERNAL_ERROR);
                true
            }
        }
    }

    fn tab_complete(&self, sender: &dyn CommandSender, label: &str, args: &[String]) -> Vec<String> {
        let (Some(script), Some(function)) = (self.script.upgrade(), &self.spec.tab_complete) else {
            return Vec::new();
        };

        match script.invoke(function, &Self::call_args(sender, label, args)) {
            Ok(GuestValue::List(items)) => {
                let completions: Option<Vec<String>> = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect();
                completions.unwrap_or_else(|| {
                    script.logger().error(&format!(
                        "Script tab complete function '{}' should return a list of str!",
                        function.name()
                    ));
                    Vec::new()
                })
            }
            Ok(_) => {
                script.logger().error(&format!(
                    "Script tab complete function '{}' should return a list of str!",
                    function.name()
                ));
                Vec::new()
            }
            Err(err) => {
                self.exceptions.report(
                    &script,
                    &err,
                    &format!("Unhandled exception when tab completing command '{}'", label),
                );
                Vec::new()
            }
        }
    }

    fn usage(&self) -> Option<String> {
        Some(self.spec.usage.clone())
    }
}

#[derive(Debug, Clone)]
struct RegisteredCommand {
    name: String,
    aliases: Vec<String>,
}

pub struct CommandRegistry {
    table: Arc<dyn CommandTable>,
    exceptions: ExceptionRouter,
    commands: Mutex<HashMap<String, Vec<RegisteredCommand>>>,
}

impl CommandRegistry {
    pub fn new(table: Arc<dyn CommandTable>, exceptions: ExceptionRouter) -> Self {
        Self {
            table,
            exceptions,
            commands: Mutex::new(HashMap::new()),
        }
    }

    /// Insert the command and its aliases into the command table
    pub fn register(&self, script: &Arc<ScriptContext>, spec: CommandSpec) -> Result<(), CommandError> {
        let spec = spec.normalized();
        let mut commands = self.commands.lock();
        if !script.is_accepting() {
            return Err(CommandError::ScriptNotRunning(script.name().to_string()));
        }
        let owned = commands.entry(script.name().to_string()).or_default();
        if owned.iter().any(|command| command.name == spec.name) {
            return Err(CommandError::AlreadyRegistered {
                script: script.name().to_string(),
                name: spec.name,
            });
        }

        let registered = RegisteredCommand {
            name: spec.name.clone(),
            aliases: spec.aliases.clone(),
        };
        let executor = Arc::new(ScriptCommand {
            script: Arc::downgrade(script),
            spec,
            exceptions: self.exceptions.clone(),
        });
        self.table
            .insert(&registered.name, &registered.aliases, executor)
            .map_err(|source| CommandError::Host {
                name: registered.name.clone(),
                source,
            })?;

        script.with_resources(|resources| resources.commands.insert(registered.name.clone()));
        tracing::debug!(
            target: "scripting",
            script = script.name(),
            command = registered.name.as_str(),
            aliases = ?registered.aliases,
            "Registered command"
        );
        owned.push(registered);
        Ok(())
    }

    pub fn unregister(&self, script: &ScriptContext, name: &str) -> Result<(), CommandError> {
        let name = name.to_lowercase();
        let command = {
            let mut commands = self.commands.lock();
            let owned = commands.get_mut(script.name());
            let index = owned
                .as_ref()
                .and_then(|owned| owned.iter().position(|command| command.name == name));
            match (owned, index) {
                (Some(owned), Some(index)) => owned.remove(index),
                _ => {
                    return Err(CommandError::NotRegistered {
                        script: script.name().to_string(),
                        name,
                    })
                }
            }
        };
        self.remove(script, &command).map_err(|source| CommandError::Host {
            name: command.name.clone(),
            source,
        })
    }

    /// Remove every command owned by `script`, logging failures
    pub fn unregister_all(&self, script: &ScriptContext) {
        let owned = self.commands.lock().remove(script.name()).unwrap_or_default();
        for command in &owned {
            if let Err(e) = self.remove(script, command) {
                tracing::warn!(
                    target: "scripting",
                    script = script.name(),
                    command = command.name.as_str(),
                    "Failed to unregister command: {}",
                    e
                );
            }
        }
    }

    /// Labels of the commands `script` owns
    pub fn commands_for(&self, script: &str) -> Vec<String> {
        self.commands
            .lock()
            .get(script)
            .map(|owned| owned.iter().map(|command| command.name.clone()).collect())
            .unwrap_or_default()
    }

    fn remove(&self, script: &ScriptContext, command: &RegisteredCommand) -> Result<(), HostError> {
        let removed = self.table.remove(&command.name, &command.aliases);
        script.with_resources(|resources| resources.commands.remove(&command.name));
        removed
    }
}
