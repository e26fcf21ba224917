//! Session state machine

use serde::Serialize;

/// Lifecycle of one gateway session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not started yet
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open, waiting for Hello
    AwaitingHello,
    /// Identify sent (or waiting for a ticket), waiting for READY
    Identifying,
    /// Resume sent, waiting for RESUMED
    Resuming,
    /// Receiving events
    Connected,
    /// Dropping the transport before connecting again
    Reconnecting,
    /// Shutting down; terminal
    Closing,
}

impl SessionState {
    /// Whether `next` is a legal transition from this state
    #[must_use]
    pub const fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::{
            AwaitingHello, Closing, Connected, Connecting, Disconnected, Identifying, Reconnecting,
            Resuming,
        };
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, AwaitingHello)
                | (AwaitingHello, Identifying | Resuming)
                | (Identifying | Resuming, Connected)
                | (Resuming, Identifying)
                | (
                    Connecting | AwaitingHello | Identifying | Resuming | Connected,
                    Reconnecting
                )
                | (Reconnecting, Connecting)
                | (
                    Disconnected
                        | Connecting
                        | AwaitingHello
                        | Identifying
                        | Resuming
                        | Connected
                        | Reconnecting,
                    Closing
                )
        )
    }

    /// Whether the session is receiving events
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closing)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a session needs to resume; present only after READY
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeInfo {
    pub session_id: String,
    pub resume_url: String,
}
