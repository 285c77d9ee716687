//! Persistent moderation store for Hearth.
//!
//! Bans and mutes are kept in memory and mirrored to a single JSON document
//! on every mutation. The document is written to a temporary path and then
//! renamed over the canonical path, so a partially-written document is never
//! visible. Expired records are evicted lazily on lookup, and every eviction
//! is persisted before the record is treated as absent.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{HearthError, Result};

/// The persisted moderation document.
///
/// Ban values are expiry timestamps, with `None` meaning a permanent ban.
/// Mute values are always expiry timestamps. Keys are lowercased usernames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ModerationState {
    #[serde(default)]
    bans: BTreeMap<String, Option<DateTime<Utc>>>,
    #[serde(default)]
    mutes: BTreeMap<String, DateTime<Utc>>,
}

/// Store of ban and mute records, persisted across restarts.
///
/// The on-disk document is the sole source of truth across restarts; a
/// write failure is logged and the in-memory maps remain authoritative
/// until the process exits.
pub struct ModerationStore {
    /// Canonical path of the persisted document.
    path: PathBuf,
    /// Current state. Held across the persist await so a write-then-rename
    /// cannot interleave with another mutation.
    state: Mutex<ModerationState>,
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

/// Expiry timestamp `minutes` from now, saturating at the maximum
/// representable instant. Admin-supplied durations can be arbitrarily
/// large and must never panic the calling task.
fn expiry_in(minutes: u64) -> DateTime<Utc> {
    let delta = i64::try_from(minutes)
        .ok()
        .and_then(Duration::try_minutes)
        .unwrap_or(Duration::MAX);
    Utc::now()
        .checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl ModerationStore {
    /// Load the store from the given path.
    ///
    /// A missing or corrupt document yields empty maps; the server still
    /// starts either way.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<ModerationState>(&content) {
                Ok(state) => {
                    tracing::info!(
                        bans = state.bans.len(),
                        mutes = state.mutes.len(),
                        "Loaded moderation state from {}",
                        path.display()
                    );
                    state
                }
                Err(e) => {
                    tracing::warn!(
                        "Corrupt moderation state at {}: {}. Starting with empty maps.",
                        path.display(),
                        e
                    );
                    ModerationState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No moderation state at {}", path.display());
                ModerationState::default()
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read moderation state at {}: {}. Starting with empty maps.",
                    path.display(),
                    e
                );
                ModerationState::default()
            }
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Check whether a username is banned.
    ///
    /// Returns the rejection reason if banned. An expired record is evicted
    /// and the eviction persisted before `None` is returned; eviction is
    /// idempotent, so concurrent checks on the same name are harmless.
    pub async fn check_ban(&self, name: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        match state.bans.get(&key(name)) {
            None => None,
            Some(None) => Some("You are permanently banned from this server.".to_string()),
            Some(Some(expiry)) if *expiry > now => {
                let remaining = (*expiry - now).num_minutes().max(1);
                Some(format!("You are banned for another {remaining} minutes."))
            }
            Some(Some(_)) => {
                state.bans.remove(&key(name));
                self.persist(&state).await;
                None
            }
        }
    }

    /// Check whether a username is muted.
    ///
    /// Returns a remaining-time notice if muted, with second granularity.
    /// Expired records are evicted and persisted, as in [`check_ban`].
    ///
    /// [`check_ban`]: ModerationStore::check_ban
    pub async fn check_mute(&self, name: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        match state.mutes.get(&key(name)) {
            None => None,
            Some(expiry) if *expiry > now => {
                let remaining = (*expiry - now).num_seconds().max(1);
                Some(format!("You are still muted for {remaining}s."))
            }
            Some(_) => {
                state.mutes.remove(&key(name));
                self.persist(&state).await;
                None
            }
        }
    }

    /// Ban a username for the given number of minutes, or permanently when
    /// no duration is given.
    pub async fn ban(&self, name: &str, duration_minutes: Option<u64>) {
        let expiry = duration_minutes.map(expiry_in);
        let mut state = self.state.lock().await;
        state.bans.insert(key(name), expiry);
        self.persist(&state).await;
    }

    /// Remove a ban record. Returns true if a record existed.
    pub async fn unban(&self, name: &str) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.bans.remove(&key(name)).is_some();
        if removed {
            self.persist(&state).await;
        }
        removed
    }

    /// Mute a username for the given number of minutes.
    pub async fn mute(&self, name: &str, minutes: u64) {
        let expiry = expiry_in(minutes);
        let mut state = self.state.lock().await;
        state.mutes.insert(key(name), expiry);
        self.persist(&state).await;
    }

    /// Remove a mute record. Returns true if a record existed.
    pub async fn unmute(&self, name: &str) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.mutes.remove(&key(name)).is_some();
        if removed {
            self.persist(&state).await;
        }
        removed
    }

    /// Whether a ban record exists for the name, expired or not.
    pub async fn contains_ban(&self, name: &str) -> bool {
        self.state.lock().await.bans.contains_key(&key(name))
    }

    /// Whether a mute record exists for the name, expired or not.
    pub async fn contains_mute(&self, name: &str) -> bool {
        self.state.lock().await.mutes.contains_key(&key(name))
    }

    /// Force a synchronous write of the current document.
    ///
    /// Called on shutdown signals to bound data loss.
    pub async fn flush(&self) {
        let state = self.state.lock().await;
        self.persist(&state).await;
    }

    /// Persist the document, logging on failure.
    async fn persist(&self, state: &ModerationState) {
        if let Err(e) = self.write_document(state).await {
            tracing::warn!(
                "Failed to persist moderation state to {}: {}",
                self.path.display(),
                e
            );
        }
    }

    /// Write the document to a temporary path, then rename it over the
    /// canonical path.
    async fn write_document(&self, state: &ModerationState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| HearthError::Persistence(format!("serialize failed: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
