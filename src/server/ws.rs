//! Chat WebSocket handler: auth gate and per-session envelope loop.
//!
//! Each connection moves through `UNAUTHENTICATED -> AUTHENTICATED ->
//! CLOSED` (or straight to `CLOSED` on timeout or rejection). Once
//! authenticated, the socket's sending half is owned by a writer task fed
//! through the session's outbound channel, so broadcasts from other
//! sessions and moderation closes never race the handler itself.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use crate::protocol::{
    ts_now, ClientEnvelope, Role, ServerEnvelope, POLICY_CLOSE_CODE,
};
use crate::registry::{names_match, Outbound, Session};

use super::ServerState;

/// Maximum username length in characters.
const MAX_NAME_LEN: usize = 32;

/// WebSocket chat handler.
///
/// GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Identity resolved by the auth gate.
struct Authenticated {
    name: String,
    role: Role,
    color: Option<String>,
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut sender, mut receiver) = socket.split();

    let auth = match authenticate(&mut receiver, &mut sender, &state).await {
        Some(auth) => auth,
        None => return,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(&auth.name, auth.role, auth.color.clone(), tx.clone());
    let id = session.id;
    let view = session.view();

    // The uniqueness check in register is the authoritative one; the earlier
    // contains_name check may be stale by now.
    if state.registry.register(session).await.is_err() {
        reject(&mut sender, "Username is already in use.").await;
        return;
    }

    tracing::info!("{} authenticated as {} ({})", id, auth.name, auth.role);
    let mut writer = tokio::spawn(write_outbound(sender, rx));

    let deliver = |envelope: ServerEnvelope| {
        let _ = tx.send(Outbound::Deliver(envelope));
    };

    deliver(ServerEnvelope::AuthOk {
        username: auth.name.clone(),
        role: auth.role,
    });

    state
        .registry
        .broadcast(&ServerEnvelope::UserJoin { user: view }, &[&auth.name])
        .await;
    state
        .registry
        .broadcast(
            &ServerEnvelope::system(format!("{} has joined the chat.", auth.name)),
            &[&auth.name],
        )
        .await;

    deliver(ServerEnvelope::Users {
        users: state.registry.snapshot().await,
    });

    spawn_welcome(&state, &auth.name, tx.clone());

    // Envelopes are processed strictly in receipt order for this
    // connection. The writer task exits after sending a close frame, so a
    // moderation close tears down the whole session even when the peer
    // ignores the frame and keeps sending.
    let mut name = auth.name;
    let mut color = auth.color;
    let mut writer_done = false;
    loop {
        tokio::select! {
            _ = &mut writer => {
                writer_done = true;
                break;
            }
            frame = receiver.next() => {
                let Some(frame) = frame else { break };
                let message = match frame {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::debug!("WebSocket error for {}: {}", name, e);
                        break;
                    }
                };

                match message {
                    Message::Text(text) => {
                        handle_envelope(
                            &state, id, auth.role, &mut name, &mut color, &tx, &text,
                        )
                        .await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    // Leave event and textual notice go out as one transition, after the
    // session is gone from the registry.
    if let Some(session) = state.registry.unregister(id).await {
        let view = session.view();
        let departed = view.name.clone();
        state
            .registry
            .broadcast(&ServerEnvelope::UserLeave { user: view }, &[])
            .await;
        state
            .registry
            .broadcast(
                &ServerEnvelope::system(format!("{departed} has left the chat.")),
                &[],
            )
            .await;
        tracing::info!("{} disconnected", departed);
    }

    drop(tx);
    if !writer_done {
        let _ = writer.await;
    }
}

/// Read the auth envelope and resolve an identity, or reject and close.
async fn authenticate(
    receiver: &mut SplitStream<WebSocket>,
    sender: &mut SplitSink<WebSocket, Message>,
    state: &ServerState,
) -> Option<Authenticated> {
    let wait = Duration::from_secs(state.config.server.auth_timeout_secs);
    let text = match timeout(wait, next_text(receiver)).await {
        Ok(Some(text)) => text,
        Ok(None) => return None,
        Err(_) => {
            tracing::debug!(
                "No auth envelope within {}s, closing",
                state.config.server.auth_timeout_secs
            );
            policy_close(sender, "authentication timed out").await;
            return None;
        }
    };

    let (username, password, want_admin, color) =
        match serde_json::from_str::<ClientEnvelope>(&text) {
            Ok(ClientEnvelope::Auth {
                username,
                password,
                want_admin,
                color,
            }) => (username, password, want_admin, color),
            _ => {
                reject(sender, "First message must be auth").await;
                return None;
            }
        };

    let name = username.trim().to_string();
    match validate_auth(state, &name, want_admin, password.as_deref()).await {
        Ok(role) => Some(Authenticated { name, role, color }),
        Err(reason) => {
            reject(sender, &reason).await;
            None
        }
    }
}

/// Validate an auth request against policy, in order: username shape,
/// ban state, name availability, admin credentials.
async fn validate_auth(
    state: &ServerState,
    name: &str,
    want_admin: bool,
    password: Option<&str>,
) -> Result<Role, String> {
    let length = name.chars().count();
    if length == 0 || length > MAX_NAME_LEN {
        return Err("Username must be 1-32 characters.".to_string());
    }

    if let Some(reason) = state.store.check_ban(name).await {
        return Err(reason);
    }

    if state.registry.contains_name(name).await {
        return Err("Username is already in use.".to_string());
    }

    if want_admin {
        let admin = &state.config.admin;
        let matches = !admin.password.is_empty()
            && name == admin.username
            && password == Some(admin.password.as_str());
        if !matches {
            // Do not disclose which check failed
            return Err("Invalid admin credentials.".to_string());
        }
        return Ok(Role::Admin);
    }

    Ok(Role::User)
}

/// Dispatch one post-auth envelope.
#[allow(clippy::too_many_arguments)]
async fn handle_envelope(
    state: &Arc<ServerState>,
    id: Uuid,
    role: Role,
    name: &mut String,
    color: &mut Option<String>,
    tx: &mpsc::UnboundedSender<Outbound>,
    text: &str,
) {
    let deliver = |envelope: ServerEnvelope| {
        let _ = tx.send(Outbound::Deliver(envelope));
    };

    let envelope = match serde_json::from_str::<ClientEnvelope>(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!("Malformed envelope from {}: {}", name, e);
            deliver(ServerEnvelope::system("Unrecognized message."));
            return;
        }
    };

    // Muted senders get a remaining-time notice; the envelope is dropped.
    if let Some(notice) = state.store.check_mute(name).await {
        deliver(ServerEnvelope::system(notice));
        return;
    }

    match envelope {
        ClientEnvelope::Auth { .. } => {
            deliver(ServerEnvelope::system("Already authenticated."));
        }

        ClientEnvelope::Message { id: msg_id, text } => {
            let envelope = ServerEnvelope::Message {
                id: msg_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                from: name.clone(),
                text,
                color: color.clone(),
                ts: ts_now(),
            };
            state.registry.broadcast(&envelope, &[]).await;
        }

        ClientEnvelope::Pm {
            id: msg_id,
            to,
            text,
        } => {
            handle_pm(state, name, msg_id, to, text, &deliver).await;
        }

        ClientEnvelope::Nick { to_nick } => {
            let new_name = to_nick.trim().to_string();
            if new_name.is_empty() {
                return;
            }
            if new_name.chars().count() > MAX_NAME_LEN {
                deliver(ServerEnvelope::system("Nickname must be 1-32 characters."));
                return;
            }
            match state.registry.rename(id, &new_name).await {
                Ok(old_name) => {
                    *name = new_name.clone();
                    state
                        .registry
                        .broadcast(
                            &ServerEnvelope::system(format!(
                                "{old_name} is now known as {new_name}."
                            )),
                            &[],
                        )
                        .await;
                    let users = state.registry.snapshot().await;
                    state
                        .registry
                        .broadcast(&ServerEnvelope::Users { users }, &[])
                        .await;
                }
                Err(_) => {
                    deliver(ServerEnvelope::system("Nickname already in use."));
                }
            }
        }

        ClientEnvelope::Color { color: new_color } => {
            state.registry.set_color(id, new_color.clone()).await;
            *color = new_color;
            let users = state.registry.snapshot().await;
            state
                .registry
                .broadcast(&ServerEnvelope::Users { users }, &[])
                .await;
        }

        ClientEnvelope::Ai { text } => {
            state
                .registry
                .broadcast(
                    &ServerEnvelope::system(format!("{name} is asking the AI...")),
                    &[],
                )
                .await;
            let state = Arc::clone(state);
            tokio::spawn(async move {
                let completion = state.ai.complete(&text).await;
                // The requester may be gone by now; address whoever is live
                state
                    .registry
                    .broadcast(&ServerEnvelope::ai_resp(completion), &[])
                    .await;
            });
        }

        ClientEnvelope::Command { raw } => {
            if role.is_admin() {
                super::admin::execute(state, name, &raw).await;
            } else {
                deliver(ServerEnvelope::system(
                    "You are not authorized to use admin commands.",
                ));
            }
        }
    }
}

/// Deliver a private message: echo to the sender, one copy per recipient,
/// offline notices for the missed, and flagged copies to admins.
async fn handle_pm(
    state: &ServerState,
    name: &str,
    msg_id: Option<String>,
    to: Vec<String>,
    text: String,
    deliver: &impl Fn(ServerEnvelope),
) {
    if to.is_empty() || text.is_empty() {
        deliver(ServerEnvelope::system(
            "PM requires at least one recipient and a message.",
        ));
        return;
    }

    deliver(ServerEnvelope::Pm {
        id: msg_id.clone(),
        from: name.to_string(),
        to: to.clone(),
        text: text.clone(),
        ts: ts_now(),
        admin_copy: false,
    });

    for recipient in &to {
        if names_match(recipient, name) {
            continue;
        }

        let payload = ServerEnvelope::Pm {
            id: msg_id.clone(),
            from: name.to_string(),
            to: vec![recipient.clone()],
            text: text.clone(),
            ts: ts_now(),
            admin_copy: false,
        };
        if !state.registry.send_to(recipient, payload).await {
            deliver(ServerEnvelope::system(format!(
                "Could not deliver PM to '{recipient}' (user offline)."
            )));
        }

        let admin_payload = ServerEnvelope::Pm {
            id: msg_id.clone(),
            from: name.to_string(),
            to: vec![recipient.clone()],
            text: text.clone(),
            ts: ts_now(),
            admin_copy: true,
        };
        state
            .registry
            .send_to_admins(&admin_payload, &[name, recipient])
            .await;
    }
}

/// Send a private AI-generated greeting to a freshly joined user.
///
/// Runs detached so a slow bridge never delays the session loop; if the
/// user is gone by resolution time, the greeting is dropped.
fn spawn_welcome(state: &Arc<ServerState>, name: &str, tx: mpsc::UnboundedSender<Outbound>) {
    let state = Arc::clone(state);
    let name = name.to_string();
    tokio::spawn(async move {
        let prompt = format!(
            "Generate a short, friendly welcome message for a user named '{name}' \
             who just joined the Hearth chat room. Keep it under 20 words."
        );
        let greeting = state.ai.complete(&prompt).await;
        let _ = tx.send(Outbound::Deliver(ServerEnvelope::system(greeting)));
    });
}

/// Writer task: drains the outbound channel into the socket.
///
/// Transmission failures are dropped, never propagated into the dispatch
/// loop. A `Close` instruction ends the task after the close frame.
async fn write_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Deliver(envelope) => match serde_json::to_string(&envelope) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to serialize envelope: {}", e),
            },
            Outbound::Close { code, reason } => {
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

/// Next text frame from the socket, skipping control frames. None when the
/// peer is gone.
async fn next_text(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => return Some(text),
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(_)) => continue,
            Some(Err(_)) => return None,
        }
    }
}

/// Send `auth_failed` followed by a policy close.
async fn reject(sender: &mut SplitSink<WebSocket, Message>, reason: &str) {
    if let Ok(json) = serde_json::to_string(&ServerEnvelope::auth_failed(reason)) {
        let _ = sender.send(Message::Text(json)).await;
    }
    policy_close(sender, reason).await;
}

/// Close the socket with the policy code.
async fn policy_close(sender: &mut SplitSink<WebSocket, Message>, reason: &str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: POLICY_CLOSE_CODE,
            reason: reason.to_string().into(),
        })))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tokio::sync::mpsc::unbounded_channel;

    async fn test_state(dir: &tempfile::TempDir) -> ServerState {
        let mut config = Config::default();
        config.moderation.state_path = dir
            .path()
            .join("moderation.json")
            .display()
            .to_string();
        config.admin.username = "admin".to_string();
        config.admin.password = "secret".to_string();
        ServerState::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_validate_auth_regular_user() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;

        let role = validate_auth(&state, "alice", false, None).await.unwrap();
        assert_eq!(role, Role::User);
    }

    #[tokio::test]
    async fn test_validate_auth_rejects_empty_and_long_names() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;

        assert!(validate_auth(&state, "", false, None).await.is_err());
        let long = "x".repeat(33);
        assert!(validate_auth(&state, &long, false, None).await.is_err());
        let max = "x".repeat(32);
        assert!(validate_auth(&state, &max, false, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_auth_rejects_banned_user() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        state.store.ban("alice", None).await;

        let reason = validate_auth(&state, "alice", false, None)
            .await
            .unwrap_err();
        assert!(reason.contains("permanently"), "reason: {reason}");

        state.store.unban("alice").await;
        assert!(validate_auth(&state, "alice", false, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_auth_rejects_taken_name() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;

        let (tx, _rx) = unbounded_channel();
        state
            .registry
            .register(Session::new("Alice", Role::User, None, tx))
            .await
            .unwrap();

        let reason = validate_auth(&state, "alice", false, None)
            .await
            .unwrap_err();
        assert!(reason.contains("already in use"));
    }

    #[tokio::test]
    async fn test_validate_auth_admin_elevation() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;

        let role = validate_auth(&state, "admin", true, Some("secret"))
            .await
            .unwrap();
        assert_eq!(role, Role::Admin);
    }

    #[tokio::test]
    async fn test_validate_auth_admin_mismatch_is_generic() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;

        // Wrong password and wrong username yield the same reason
        let wrong_password = validate_auth(&state, "admin", true, Some("nope"))
            .await
            .unwrap_err();
        let wrong_username = validate_auth(&state, "imposter", true, Some("secret"))
            .await
            .unwrap_err();
        assert_eq!(wrong_password, wrong_username);
        assert_eq!(wrong_password, "Invalid admin credentials.");
    }

    #[tokio::test]
    async fn test_validate_auth_admin_disabled_when_password_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.moderation.state_path = dir
            .path()
            .join("moderation.json")
            .display()
            .to_string();
        let state = ServerState::new(config).await.unwrap();

        assert!(validate_auth(&state, "admin", true, Some(""))
            .await
            .is_err());
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    fn system_texts(items: &[Outbound]) -> Vec<String> {
        items
            .iter()
            .filter_map(|item| match item {
                Outbound::Deliver(ServerEnvelope::System { text }) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_non_admin_command_is_rejected_without_effect() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(test_state(&dir).await);

        let (tx, mut rx) = unbounded_channel();
        let session = Session::new("alice", Role::User, None, tx.clone());
        let id = session.id;
        state.registry.register(session).await.unwrap();

        let (target_tx, mut target_rx) = unbounded_channel();
        state
            .registry
            .register(Session::new("bob", Role::User, None, target_tx))
            .await
            .unwrap();

        let mut name = "alice".to_string();
        let mut color = None;
        handle_envelope(
            &state,
            id,
            Role::User,
            &mut name,
            &mut color,
            &tx,
            r#"{"type":"command","raw":"/kick @bob"}"#,
        )
        .await;

        let texts = system_texts(&drain(&mut rx));
        assert!(texts.iter().any(|t| t.contains("not authorized")));
        assert!(drain(&mut target_rx).is_empty());
        assert!(state.registry.contains_name("bob").await);
    }

    #[tokio::test]
    async fn test_muted_sender_envelope_is_dropped_with_notice() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(test_state(&dir).await);
        state.store.mute("alice", 5).await;

        let (tx, mut rx) = unbounded_channel();
        let session = Session::new("alice", Role::User, None, tx.clone());
        let id = session.id;
        state.registry.register(session).await.unwrap();

        let (other_tx, mut other_rx) = unbounded_channel();
        state
            .registry
            .register(Session::new("bob", Role::User, None, other_tx))
            .await
            .unwrap();

        let mut name = "alice".to_string();
        let mut color = None;
        handle_envelope(
            &state,
            id,
            Role::User,
            &mut name,
            &mut color,
            &tx,
            r#"{"type":"message","text":"hello"}"#,
        )
        .await;

        // Remaining-time notice to the sender, nothing relayed to the room
        let texts = system_texts(&drain(&mut rx));
        assert!(texts.iter().any(|t| t.contains("muted")), "texts: {texts:?}");
        assert!(drain(&mut other_rx).is_empty());

        // The drop applies to every envelope type, not just chat messages
        handle_envelope(
            &state,
            id,
            Role::User,
            &mut name,
            &mut color,
            &tx,
            r#"{"type":"nick","toNick":"sneaky"}"#,
        )
        .await;
        assert_eq!(name, "alice");
        assert!(state.registry.contains_name("alice").await);
    }

    #[tokio::test]
    async fn test_validate_auth_ban_check_precedes_name_check() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        state.store.ban("alice", None).await;

        let (tx, _rx) = unbounded_channel();
        state
            .registry
            .register(Session::new("alice", Role::User, None, tx))
            .await
            .unwrap();

        let reason = validate_auth(&state, "alice", false, None)
            .await
            .unwrap_err();
        assert!(reason.contains("banned"));
    }
}
