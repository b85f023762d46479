//! Error types for the server
//!
//! [`DisconnectReason`] is the outcome of anything that ends a session. Its
//! `Display` text is exactly what the client sees in the Disconnect packet.

/// Why a session is being torn down
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisconnectReason {
    /// A protocol policy was broken (bad username, stale client, repeated login).
    #[error("{0}")]
    Policy(String),

    /// A movement update failed validation.
    #[error("{0}")]
    Movement(String),

    /// The byte stream could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection timed out")]
    Timeout,

    /// The client stopped reading what it was sent.
    #[error("Connection too slow")]
    SlowClient,

    /// The client asked to leave or hung up.
    #[error("Quitting")]
    ClientQuit,

    #[error("Server closed")]
    ServerShutdown,
}

impl DisconnectReason {
    pub fn username_too_long() -> Self {
        Self::Policy("Username too long".to_string())
    }

    pub fn no_handshake() -> Self {
        Self::Policy("No handshake received".to_string())
    }

    pub fn already_logged_in() -> Self {
        Self::Policy("Already logged in!".to_string())
    }

    pub fn outdated_client() -> Self {
        Self::Policy("Outdated client! Please use Beta 1.7.3".to_string())
    }

    pub fn login_failed() -> Self {
        Self::Policy("Login failed".to_string())
    }

    pub fn chat_too_long() -> Self {
        Self::Policy("Chat message too long".to_string())
    }

    pub fn invalid_position() -> Self {
        Self::Movement("Invalid position".to_string())
    }

    pub fn illegal_stance() -> Self {
        Self::Movement("Illegal stance".to_string())
    }

    pub fn moved_too_quickly() -> Self {
        Self::Movement("You moved too quickly :( (Hacking?)".to_string())
    }

    pub fn illegal_position() -> Self {
        Self::Movement("Illegal position".to_string())
    }
}

/// Failures that stop the server from starting
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
