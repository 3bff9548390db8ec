//! Per-conversation session identity and state.
//!
//! The caller supplies an opaque session key with every request; a
//! well-known suffix marks a key as a *linked* session (a second browser
//! tab sharing one chat). All per-identity state goes through the
//! [`SessionStore`] seam so nothing here is an ambient global.

mod cache;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

pub use cache::{CredentialCache, FileCredentialCache};

/// Store keys for the client-visible state that survives a page reload.
pub mod keys {
    /// Serialized [`crate::auth::Credential`] for this identity.
    pub const CREDENTIAL: &str = "credential";
    /// Set to [`super::CHAT_ACTIVE_VALUE`] while an escalated chat is live.
    pub const CHAT_ACTIVE: &str = "chat_active";
    /// Last known remote chat session id.
    pub const CHAT_SESSION_ID: &str = "chat_session_id";
    /// Last known chatbot conversation id.
    pub const CONVERSATION_ID: &str = "conversation_id";
    /// Last display name the user gave during escalation.
    pub const USER_DISPLAY_NAME: &str = "user_display_name";
}

/// Value stored under [`keys::CHAT_ACTIVE`] while a chat is live.
pub const CHAT_ACTIVE_VALUE: &str = "active";

/// Opaque session key supplied by the caller.
///
/// The linked-session suffix is resolved once at construction: `raw()` is
/// the key as received, `cache_key()` the suffix-stripped form. Two raw
/// keys differing only by the suffix resolve to the same cache key, which
/// is what lets a linked session find the primary session's persisted
/// credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    raw: String,
    cache_key: String,
    linked: bool,
}

impl SessionIdentity {
    pub fn new(raw: impl Into<String>, linked_suffix: &str) -> Self {
        let raw = raw.into();
        let linked = !linked_suffix.is_empty() && raw.contains(linked_suffix);
        let cache_key = if linked {
            raw.replace(linked_suffix, "")
        } else {
            raw.clone()
        };
        Self {
            raw,
            cache_key,
            linked,
        }
    }

    /// The session key exactly as the caller sent it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The suffix-stripped key used for the shared credential cache.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Whether this is a linked (secondary) session.
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Per-identity key/value state.
///
/// Injected into the token layer and the escalation engine; implementations
/// decide where the state actually lives.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, identity: &SessionIdentity, key: &str) -> Option<String>;
    async fn set(&self, identity: &SessionIdentity, key: &str, value: String);
    async fn delete(&self, identity: &SessionIdentity, key: &str);
    /// Remove every key for this identity.
    async fn clear(&self, identity: &SessionIdentity);
}

/// In-memory session store, one slot per raw session key.
#[derive(Default)]
pub struct MemorySessionStore {
    slots: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, identity: &SessionIdentity, key: &str) -> Option<String> {
        self.slots
            .read()
            .await
            .get(identity.raw())
            .and_then(|slot| slot.get(key).cloned())
    }

    async fn set(&self, identity: &SessionIdentity, key: &str, value: String) {
        self.slots
            .write()
            .await
            .entry(identity.raw().to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    async fn delete(&self, identity: &SessionIdentity, key: &str) {
        if let Some(slot) = self.slots.write().await.get_mut(identity.raw()) {
            slot.remove(key);
        }
    }

    async fn clear(&self, identity: &SessionIdentity) {
        self.slots.write().await.remove(identity.raw());
    }
}
