//! Admin command execution.
//!
//! Raw `command` envelopes are parsed by [`crate::command`] and the verb
//! effects applied here. Callers have already verified the issuing session
//! is an admin. Target resolution happens immediately before each action,
//! never from stale lookups, since a target can disconnect between
//! envelopes.

use std::sync::Arc;

use crate::command::{self, Command, Verb};
use crate::protocol::{ts_now, ServerEnvelope, POLICY_CLOSE_CODE};

use super::ServerState;

/// Execute one raw admin command line.
pub(super) async fn execute(state: &Arc<ServerState>, admin_name: &str, raw: &str) {
    let Some(cmd) = command::parse(raw) else {
        notify(state, admin_name, "Empty command.").await;
        return;
    };

    if cmd.verb.requires_target() && cmd.targets.is_empty() {
        notify(
            state,
            admin_name,
            format!("Usage: /{} @user[,@user...]", cmd.verb.name()),
        )
        .await;
        return;
    }

    tracing::info!("Admin {} issued /{}", admin_name, cmd.verb.name());

    match cmd.verb {
        Verb::Broadcast => announce(state, admin_name, &cmd).await,
        Verb::ClearAll => clear_all(state, admin_name).await,
        Verb::Kick => kick(state, admin_name, &cmd).await,
        Verb::Ban => ban(state, admin_name, &cmd).await,
        Verb::Unban => unban(state, admin_name, &cmd).await,
        Verb::Mute => mute(state, admin_name, &cmd).await,
        Verb::Unmute => unmute(state, admin_name, &cmd).await,
        Verb::Unknown(ref verb) => {
            notify(state, admin_name, format!("Unknown admin command: /{verb}")).await;
        }
    }
}

/// System notice to the issuing admin only.
async fn notify(state: &ServerState, admin_name: &str, text: impl Into<String>) {
    state
        .registry
        .send_to(admin_name, ServerEnvelope::system(text.into()))
        .await;
}

fn reason_text(remainder: &str) -> &str {
    if remainder.is_empty() {
        "No reason specified."
    } else {
        remainder
    }
}

/// `/broadcast <message>`: pinned announcement to everyone.
async fn announce(state: &ServerState, admin_name: &str, cmd: &Command) {
    if cmd.remainder.is_empty() {
        notify(state, admin_name, "Usage: /broadcast <message>").await;
        return;
    }
    state
        .registry
        .broadcast(
            &ServerEnvelope::Broadcast {
                from: admin_name.to_string(),
                text: cmd.remainder.clone(),
                ts: ts_now(),
            },
            &[],
        )
        .await;
}

/// `/clearall`: tell every client to clear its local history.
async fn clear_all(state: &ServerState, admin_name: &str) {
    state.registry.broadcast(&ServerEnvelope::ClearChat, &[]).await;
    state
        .registry
        .broadcast(
            &ServerEnvelope::system(format!("Chat history cleared by {admin_name}.")),
            &[],
        )
        .await;
}

/// `/kick @user [reason]`: notify, policy-close, announce. Targets that are
/// not connected are skipped silently.
async fn kick(state: &ServerState, admin_name: &str, cmd: &Command) {
    let reason = reason_text(&cmd.remainder);
    for target in &cmd.targets {
        let Some(session) = state.registry.find_by_name(target).await else {
            continue;
        };
        session.deliver(ServerEnvelope::system(format!(
            "You have been kicked by {admin_name}. Reason: {reason}"
        )));
        session.close(POLICY_CLOSE_CODE, "kicked");
        state
            .registry
            .broadcast(
                &ServerEnvelope::system(format!("{} was kicked by {admin_name}.", session.name)),
                &[],
            )
            .await;
    }
}

/// `/ban @user [minutes] [reason]`: record the ban (permanent without a
/// duration), announce, and close the target if connected.
async fn ban(state: &ServerState, admin_name: &str, cmd: &Command) {
    let reason = reason_text(&cmd.remainder);
    for target in &cmd.targets {
        state.store.ban(target, cmd.duration).await;

        let description = match cmd.duration {
            Some(minutes) => format!("banned by {admin_name} for {minutes} minutes"),
            None => format!("banned by {admin_name} permanently"),
        };
        state
            .registry
            .broadcast(
                &ServerEnvelope::system(format!("{target} was {description}.")),
                &[],
            )
            .await;

        if let Some(session) = state.registry.find_by_name(target).await {
            session.deliver(ServerEnvelope::system(format!(
                "You have been {description}. Reason: {reason}"
            )));
            session.close(POLICY_CLOSE_CODE, "banned");
        }
    }
}

/// `/unban @user`: remove the record; announce only if one existed.
async fn unban(state: &ServerState, admin_name: &str, cmd: &Command) {
    for target in &cmd.targets {
        if state.store.unban(target).await {
            state
                .registry
                .broadcast(
                    &ServerEnvelope::system(format!("{target} was unbanned by {admin_name}.")),
                    &[],
                )
                .await;
        } else {
            notify(state, admin_name, format!("User '{target}' is not banned.")).await;
        }
    }
}

/// `/mute @user [minutes]`: record the mute, notify the target if
/// connected, announce.
async fn mute(state: &ServerState, admin_name: &str, cmd: &Command) {
    let minutes = cmd
        .duration
        .unwrap_or(state.config.moderation.default_mute_minutes);
    for target in &cmd.targets {
        state.store.mute(target, minutes).await;
        state
            .registry
            .send_to(
                target,
                ServerEnvelope::system(format!("You have been muted for {minutes} minutes.")),
            )
            .await;
        state
            .registry
            .broadcast(
                &ServerEnvelope::system(format!(
                    "{target} was muted by {admin_name} for {minutes} minutes."
                )),
                &[],
            )
            .await;
    }
}

/// `/unmute @user`: remove the record; announce only if one existed.
async fn unmute(state: &ServerState, admin_name: &str, cmd: &Command) {
    for target in &cmd.targets {
        if state.store.unmute(target).await {
            state
                .registry
                .broadcast(
                    &ServerEnvelope::system(format!("{target} was unmuted by {admin_name}.")),
                    &[],
                )
                .await;
        } else {
            notify(state, admin_name, format!("User '{target}' is not muted.")).await;
        }
    }
}
