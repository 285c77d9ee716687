//! Wire protocol types for the chat relay.
//!
//! Every frame on the WebSocket is a JSON object discriminated by a `type`
//! field. Client-originated and server-originated envelopes are separate
//! enums so each direction is matched exhaustively at its dispatch site.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// WebSocket close code used for every server-initiated termination
/// (kick, ban, auth rejection, auth timeout).
///
/// Clients use this to suppress automatic reconnection on intentional
/// disconnects while still retrying on ordinary network failures.
pub const POLICY_CLOSE_CODE: u16 = 1008;

/// Display name used for AI-originated responses.
pub const AI_SENDER: &str = "AI";

/// Role assigned to a session at authentication time.
///
/// A session's role never changes for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular chat participant.
    User,
    /// Administrator, allowed to issue moderation commands.
    Admin,
}

impl Role {
    /// Whether this role may issue admin commands.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Public view of a connected user, as sent in snapshots and join/leave events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    /// Display name.
    pub name: String,
    /// Role resolved at auth time.
    pub role: Role,
    /// Preferred message color, if any.
    pub color: Option<String>,
}

/// Envelopes sent from client to server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Authentication request; must be the first envelope on a connection.
    Auth {
        /// Requested display name.
        #[serde(default)]
        username: String,
        /// Admin password, when elevation is requested.
        #[serde(default)]
        password: Option<String>,
        /// Whether the client requests admin elevation.
        #[serde(default, rename = "wantAdmin")]
        want_admin: bool,
        /// Preferred message color.
        #[serde(default)]
        color: Option<String>,
    },
    /// Public chat message.
    Message {
        /// Client-assigned message id, if any.
        #[serde(default)]
        id: Option<String>,
        /// Message text.
        #[serde(default)]
        text: String,
    },
    /// Private message to one or more recipients.
    Pm {
        /// Client-assigned message id, if any.
        #[serde(default)]
        id: Option<String>,
        /// Recipient display names.
        #[serde(default)]
        to: Vec<String>,
        /// Message text.
        #[serde(default)]
        text: String,
    },
    /// Nickname change request.
    Nick {
        /// Requested new display name.
        #[serde(default, rename = "toNick")]
        to_nick: String,
    },
    /// Color change request.
    Color {
        /// New preferred color, or None to clear it.
        #[serde(default)]
        color: Option<String>,
    },
    /// Free-text prompt for the AI bridge.
    Ai {
        /// Prompt text.
        #[serde(default)]
        text: String,
    },
    /// Raw admin command line (e.g. `/ban @alice 10 spamming`).
    Command {
        /// Raw command text.
        #[serde(default)]
        raw: String,
    },
}

/// Envelopes sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Authentication succeeded.
    AuthOk {
        /// Accepted display name.
        username: String,
        /// Resolved role.
        role: Role,
    },
    /// Authentication failed; the connection is closed after this envelope.
    AuthFailed {
        /// Human-readable rejection reason.
        reason: String,
    },
    /// Public chat message.
    Message {
        /// Message id (client-assigned or generated).
        id: String,
        /// Sender display name.
        from: String,
        /// Message text.
        text: String,
        /// Sender's preferred color.
        color: Option<String>,
        /// RFC 3339 timestamp.
        ts: String,
    },
    /// Private message.
    Pm {
        /// Message id, if the client assigned one.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Sender display name.
        from: String,
        /// Recipient display names.
        to: Vec<String>,
        /// Message text.
        text: String,
        /// RFC 3339 timestamp.
        ts: String,
        /// Set on copies relayed to admins for oversight.
        #[serde(skip_serializing_if = "is_false")]
        admin_copy: bool,
    },
    /// Textual system notice.
    System {
        /// Notice text.
        text: String,
    },
    /// Pinned admin announcement.
    Broadcast {
        /// Issuing admin name.
        from: String,
        /// Announcement text.
        text: String,
        /// RFC 3339 timestamp.
        ts: String,
    },
    /// AI completion result.
    AiResp {
        /// Always [`AI_SENDER`].
        from: String,
        /// Completion text.
        text: String,
        /// RFC 3339 timestamp.
        ts: String,
    },
    /// Full snapshot of connected users, in registration order.
    Users {
        /// Connected users.
        users: Vec<UserView>,
    },
    /// A user joined the room.
    UserJoin {
        /// The joining user.
        user: UserView,
    },
    /// A user left the room.
    UserLeave {
        /// The departing user.
        user: UserView,
    },
    /// Instruct clients to clear their local chat history.
    ClearChat,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Current UTC timestamp in RFC 3339 format, as used in all `ts` fields.
pub fn ts_now() -> String {
    Utc::now().to_rfc3339()
}

impl ServerEnvelope {
    /// Create a system notice.
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    /// Create an auth failure envelope.
    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::AuthFailed {
            reason: reason.into(),
        }
    }

    /// Create an AI response envelope.
    pub fn ai_resp(text: impl Into<String>) -> Self {
        Self::AiResp {
            from: AI_SENDER.to_string(),
            text: text.into(),
            ts: ts_now(),
        }
    }
}
