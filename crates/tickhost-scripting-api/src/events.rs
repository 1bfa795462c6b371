use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::GuestValue;

/// Typed tag for every event a script can listen to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A player joined the server
    PlayerJoin,
    /// A player left the server
    PlayerQuit,
    /// A player sent a chat message
    PlayerChat,
    /// A player is about to run a command
    PlayerCommand,
    /// A block was broken
    BlockBreak,
    /// A block was placed
    BlockPlace,
    /// An entity took damage
    EntityDamage,
    /// The server finished starting
    ServerLoad,
    /// A script finished loading and is running
    ScriptPostLoad,
    /// A script was unloaded
    ScriptUnload,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::PlayerJoin,
        EventKind::PlayerQuit,
        EventKind::PlayerChat,
        EventKind::PlayerCommand,
        EventKind::BlockBreak,
        EventKind::BlockPlace,
        EventKind::EntityDamage,
        EventKind::ServerLoad,
        EventKind::ScriptPostLoad,
        EventKind::ScriptUnload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PlayerJoin => "player_join",
            EventKind::PlayerQuit => "player_quit",
            EventKind::PlayerChat => "player_chat",
            EventKind::PlayerCommand => "player_command",
            EventKind::BlockBreak => "block_break",
            EventKind::BlockPlace => "block_place",
            EventKind::EntityDamage => "entity_damage",
            EventKind::ServerLoad => "server_load",
            EventKind::ScriptPostLoad => "script_post_load",
            EventKind::ScriptUnload => "script_unload",
        }
    }

    /// Whether listeners may cancel events of this kind
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            EventKind::PlayerChat
                | EventKind::PlayerCommand
                | EventKind::BlockBreak
                | EventKind::BlockPlace
                | EventKind::EntityDamage
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type '{0}'")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// Order in which listeners for the same event run (lowest first)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventPriority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
    /// Observes the final outcome; should not modify the event
    Monitor,
}

impl EventPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventPriority::Lowest => "LOWEST",
            EventPriority::Low => "LOW",
            EventPriority::Normal => "NORMAL",
            EventPriority::High => "HIGH",
            EventPriority::Highest => "HIGHEST",
            EventPriority::Monitor => "MONITOR",
        }
    }
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event priority '{0}'")]
pub struct UnknownPriority(pub String);

impl FromStr for EventPriority {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let priority = match s.to_ascii_uppercase().as_str() {
            "LOWEST" => EventPriority::Lowest,
            "LOW" => EventPriority::Low,
            "NORMAL" => EventPriority::Normal,
            "HIGH" => EventPriority::High,
            "HIGHEST" => EventPriority::Highest,
            "MONITOR" => EventPriority::Monitor,
            _ => return Err(UnknownPriority(s.to_string())),
        };
        Ok(priority)
    }
}

/// An event fired by the host on the main thread
#[derive(Debug, Clone)]
pub struct HostEvent {
    kind: EventKind,
    payload: GuestValue,
    cancelled: bool,
}

impl HostEvent {
    pub fn new(kind: EventKind, payload: GuestValue) -> Self {
        Self {
            kind,
            payload,
            cancelled: false,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload(&self) -> &GuestValue {
        &self.payload
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Set the cancelled state; returns false for kinds that cannot be cancelled
    pub fn set_cancelled(&mut self, cancelled: bool) -> bool {
        if !self.kind.is_cancellable() {
            return false;
        }
        self.cancelled = cancelled;
        true
    }
}

/// Types of script lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEventType {
    Loaded,
    Unloaded,
    LoadFailed { message: String },
    Error { message: String },
}

/// Lifecycle notification published by the script manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEvent {
    pub script: String,
    pub event_type: ScriptEventType,
}
