//! Domain types shared by the monitor, the activity sources and the daemon.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Notification published by the idle monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleEvent {
    /// No activity arrived for a full timeout window.
    Idle,
    /// Activity arrived while idle.
    Active,
}

impl IdleEvent {
    /// Get the event name as used in output and hook environments.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
        }
    }
}

impl fmt::Display for IdleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed pair of input signals the monitor listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Pointer movement.
    Pointer,
    /// Key press.
    Keyboard,
}

impl ActivityKind {
    /// Both kinds, in attach order.
    pub const ALL: [ActivityKind; 2] = [ActivityKind::Pointer, ActivityKind::Keyboard];

    /// Get the kind as a string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pointer => "pointer",
            Self::Keyboard => "keyboard",
        }
    }

    /// Parse a signal token from the line protocol.
    ///
    /// Matching is case-insensitive and accepts the common DOM-style aliases.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "pointer" | "mousemove" | "motion" => Some(Self::Pointer),
            "key" | "keyboard" | "keydown" => Some(Self::Keyboard),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// Which transition happened.
    pub event: IdleEvent,

    /// Milliseconds since the Unix epoch when it was observed.
    pub timestamp_ms: u64,
}

impl Transition {
    /// Create a new transition record.
    pub fn new(event: IdleEvent, timestamp_ms: u64) -> Self {
        Self {
            event,
            timestamp_ms,
        }
    }
}
