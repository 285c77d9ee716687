//! Connection registry for Hearth.
//!
//! The registry owns the bookkeeping for every live session: registration
//! with case-insensitive name uniqueness, name lookup, ordered snapshots,
//! and envelope delivery. Each session carries the sending half of its
//! connection's outbound channel, so broadcasts never touch a socket
//! directly; a per-connection writer task drains the channel.

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::protocol::{Role, ServerEnvelope, UserView};

/// Registration or rename failed because the name is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("username is already in use")]
pub struct NameTaken;

/// Instruction for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// Serialize and send an envelope.
    Deliver(ServerEnvelope),
    /// Send a close frame with the given code and reason, then stop.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason text.
        reason: String,
    },
}

/// One live, authenticated connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session id, stable for the connection's lifetime.
    pub id: Uuid,
    /// Current display name.
    pub name: String,
    /// Role resolved at auth time; never changes afterwards.
    pub role: Role,
    /// Preferred message color.
    pub color: Option<String>,
    /// Sending half of the connection's outbound channel.
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Session {
    /// Create a new session with a fresh id.
    pub fn new(
        name: impl Into<String>,
        role: Role,
        color: Option<String>,
        tx: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role,
            color,
            tx,
        }
    }

    /// Public view of this session.
    pub fn view(&self) -> UserView {
        UserView {
            name: self.name.clone(),
            role: self.role,
            color: self.color.clone(),
        }
    }

    /// Best-effort delivery; a half-closed connection drops the envelope.
    pub fn deliver(&self, envelope: ServerEnvelope) {
        if self.tx.send(Outbound::Deliver(envelope)).is_err() {
            tracing::trace!("Dropped envelope for departed session {}", self.name);
        }
    }

    /// Ask the connection's writer task to close the socket.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.tx.send(Outbound::Close {
            code,
            reason: reason.into(),
        });
    }
}

/// Registry of live sessions, in registration order.
#[derive(Default)]
pub struct Registry {
    sessions: RwLock<Vec<Session>>,
}

/// Case-insensitive username comparison, as used for every name lookup.
pub(crate) fn names_match(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session.
    ///
    /// The case-insensitive uniqueness check happens under the write lock,
    /// so of two simultaneous attempts with the same name exactly one
    /// succeeds.
    pub async fn register(&self, session: Session) -> Result<(), NameTaken> {
        let mut sessions = self.sessions.write().await;
        if sessions.iter().any(|s| names_match(&s.name, &session.name)) {
            return Err(NameTaken);
        }
        sessions.push(session);
        Ok(())
    }

    /// Remove a session by id, returning it if it was registered.
    pub async fn unregister(&self, id: Uuid) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let index = sessions.iter().position(|s| s.id == id)?;
        Some(sessions.remove(index))
    }

    /// Whether a session with this name (case-insensitive) is registered.
    pub async fn contains_name(&self, name: &str) -> bool {
        self.sessions
            .read()
            .await
            .iter()
            .any(|s| names_match(&s.name, name))
    }

    /// Look up a session by name, case-insensitive.
    pub async fn find_by_name(&self, name: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .iter()
            .find(|s| names_match(&s.name, name))
            .cloned()
    }

    /// Ordered snapshot of public user views, in registration order.
    pub async fn snapshot(&self) -> Vec<UserView> {
        self.sessions.read().await.iter().map(Session::view).collect()
    }

    /// Number of registered sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Deliver an envelope to one session by name. Returns false when the
    /// session is not registered.
    pub async fn send_to(&self, name: &str, envelope: ServerEnvelope) -> bool {
        match self.find_by_name(name).await {
            Some(session) => {
                session.deliver(envelope);
                true
            }
            None => false,
        }
    }

    /// Deliver an envelope to every registered session not in `exclude`,
    /// in registration order. Delivery failures are dropped.
    pub async fn broadcast(&self, envelope: &ServerEnvelope, exclude: &[&str]) {
        let sessions = self.sessions.read().await;
        for session in sessions.iter() {
            if exclude.iter().any(|name| names_match(name, &session.name)) {
                continue;
            }
            session.deliver(envelope.clone());
        }
    }

    /// Deliver an envelope to every registered admin not in `exclude`.
    pub async fn send_to_admins(&self, envelope: &ServerEnvelope, exclude: &[&str]) {
        let sessions = self.sessions.read().await;
        for session in sessions.iter() {
            if !session.role.is_admin() {
                continue;
            }
            if exclude.iter().any(|name| names_match(name, &session.name)) {
                continue;
            }
            session.deliver(envelope.clone());
        }
    }

    /// Ask a session's writer task to close the connection. Returns false
    /// when the session is not registered.
    pub async fn close(&self, name: &str, code: u16, reason: &str) -> bool {
        match self.find_by_name(name).await {
            Some(session) => {
                session.close(code, reason);
                true
            }
            None => false,
        }
    }

    /// Rename a session, re-validating uniqueness atomically.
    ///
    /// Returns the previous name on success.
    pub async fn rename(&self, id: Uuid, new_name: &str) -> Result<String, NameTaken> {
        let mut sessions = self.sessions.write().await;
        if sessions
            .iter()
            .any(|s| s.id != id && names_match(&s.name, new_name))
        {
            return Err(NameTaken);
        }
        let session = sessions.iter_mut().find(|s| s.id == id).ok_or(NameTaken)?;
        let old = std::mem::replace(&mut session.name, new_name.to_string());
        Ok(old)
    }

    /// Update a session's preferred color.
    pub async fn set_color(&self, id: Uuid, color: Option<String>) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.iter_mut().find(|s| s.id == id) {
            session.color = color;
        }
    }
}
