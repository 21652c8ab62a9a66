//! Conversation state for commands waiting on one more operator input.
//!
//! At most one pending action exists per operator. Entries are never swept in
//! the background; expiry is checked whenever an entry is touched, so a stale
//! reply simply finds nothing to match against.

use std::collections::HashMap;

use tracing::{debug, info};

use notegram_core::is_expired_unix;
use notegram_instagram::{Audience, TwoFactorContinuation};

/// The account-scoped remainder of a suspended command, replayed once the
/// missing input arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountAction {
    PostNote { audience: Audience, text: String },
    DeleteNote,
}

impl AccountAction {
    /// Command token the action came from, for prompts and logs.
    pub fn label(&self) -> &'static str {
        match self {
            AccountAction::PostNote {
                audience: Audience::MutualFollowers,
                ..
            } => "/note",
            AccountAction::PostNote {
                audience: Audience::CloseFriends,
                ..
            } => "/note_cf",
            AccountAction::DeleteNote => "/delete_note",
        }
    }
}

/// What the operator still owes us.
#[derive(Debug, Clone)]
pub enum PendingKind {
    AccountChoice {
        action: AccountAction,
    },
    TwoFactorCode {
        continuation: TwoFactorContinuation,
        action: AccountAction,
    },
}

impl PendingKind {
    pub fn label(&self) -> &'static str {
        match self {
            PendingKind::AccountChoice { .. } => "account choice",
            PendingKind::TwoFactorCode { .. } => "verification code",
        }
    }
}

/// One suspended command together with its expiry deadline.
#[derive(Debug)]
pub struct PendingAction {
    pub kind: PendingKind,
    created_unix: u64,
    expires_unix: u64,
}

impl PendingAction {
    fn is_expired(&self, now_unix: u64) -> bool {
        is_expired_unix(Some(self.expires_unix), now_unix)
    }
}

/// Keyed store of pending actions, operator id to entry.
#[derive(Debug, Default)]
pub struct PendingActionStore {
    entries: HashMap<i64, PendingAction>,
}

impl PendingActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, operator: i64, kind: PendingKind, now_unix: u64, ttl_seconds: u64) {
        debug!(operator, kind = kind.label(), ttl_seconds, "pending action registered");
        self.entries.insert(
            operator,
            PendingAction {
                kind,
                created_unix: now_unix,
                expires_unix: now_unix.saturating_add(ttl_seconds),
            },
        );
    }

    /// The operator's live entry, if any. Touching an expired entry evicts it.
    pub fn live(&mut self, operator: i64, now_unix: u64) -> Option<&PendingAction> {
        self.evict_if_expired(operator, now_unix);
        self.entries.get(&operator)
    }

    /// Removes and returns the operator's live entry. Expired entries are
    /// evicted and reported as absent.
    pub fn take_if_live(&mut self, operator: i64, now_unix: u64) -> Option<PendingAction> {
        self.evict_if_expired(operator, now_unix);
        self.entries.remove(&operator)
    }

    /// Puts a taken entry back unchanged, deadline included. Used when a
    /// reply did not resolve the prompt and the operator gets another try.
    pub fn restore(&mut self, operator: i64, action: PendingAction) {
        self.entries.insert(operator, action);
    }

    /// Drops the operator's entry regardless of expiry. Returns whether one
    /// was there.
    pub fn clear(&mut self, operator: i64) -> bool {
        self.entries.remove(&operator).is_some()
    }

    fn evict_if_expired(&mut self, operator: i64, now_unix: u64) {
        let expired = self
            .entries
            .get(&operator)
            .map(|action| action.is_expired(now_unix))
            .unwrap_or(false);
        if expired {
            if let Some(action) = self.entries.remove(&operator) {
                info!(
                    operator,
                    kind = action.kind.label(),
                    waited_seconds = now_unix.saturating_sub(action.created_unix),
                    "pending action expired, discarding"
                );
            }
        }
    }
}
