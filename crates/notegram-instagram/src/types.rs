use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceProfile;

const SESSION_SCHEMA_VERSION: u32 = 1;

/// Visibility scope of a posted note.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    MutualFollowers,
    CloseFriends,
}

impl Audience {
    /// Numeric audience selector the platform expects.
    pub fn wire_value(self) -> u8 {
        match self {
            Audience::MutualFollowers => 0,
            Audience::CloseFriends => 1,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Audience::MutualFollowers => "mutual followers",
            Audience::CloseFriends => "close friends",
        }
    }
}

/// The caller's active note as reported by the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: u64,
    pub text: String,
}

/// One reply to the caller's note, normalized from the platform inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteReply {
    pub sender_username: String,
    pub text: String,
    pub created_at_unix: u64,
}

/// Authenticated state for one account. Serialized to the session store and
/// rehydrated on restart; the serialized string is the durable source of
/// truth.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    schema_version: u32,
    pub username: String,
    pub user_id: u64,
    pub authorization: String,
    pub device_id: String,
    pub phone_id: String,
    pub issued_at_unix: u64,
}

impl SessionState {
    pub fn new(
        username: impl Into<String>,
        user_id: u64,
        authorization: impl Into<String>,
        device: &DeviceProfile,
        issued_at_unix: u64,
    ) -> Self {
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            username: username.into(),
            user_id,
            authorization: authorization.into(),
            device_id: device.device_id.clone(),
            phone_id: device.phone_id.clone(),
            issued_at_unix,
        }
    }

    pub fn to_serialized(&self) -> Result<String, PlatformError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a stored session body. Unknown schema versions are rejected so
    /// callers fall back to a fresh login instead of sending garbage.
    pub fn from_serialized(raw: &str) -> Result<Self, PlatformError> {
        let session: SessionState = serde_json::from_str(raw)?;
        if session.schema_version != SESSION_SCHEMA_VERSION {
            return Err(PlatformError::InvalidResponse(format!(
                "unsupported session schema version {}",
                session.schema_version
            )));
        }
        Ok(session)
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("username", &self.username)
            .field("user_id", &self.user_id)
            .field("authorization", &"[REDACTED]")
            .field("device_id", &self.device_id)
            .field("issued_at_unix", &self.issued_at_unix)
            .finish()
    }
}

/// Platform-side half of a 2FA challenge: everything the completion call
/// needs to bind the code to the login attempt that raised it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingTwoFactor {
    pub username: String,
    pub two_factor_identifier: String,
    pub device: DeviceProfile,
}

/// Result of a credential login.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Session(SessionState),
    TwoFactorRequired(PendingTwoFactor),
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("session storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("the platform rejected the credentials")]
    InvalidCredentials,
    #[error("invalid or expired verification code")]
    InvalidCode,
    #[error("the platform is rate limiting this account")]
    RateLimited,
    #[error("the platform rejected the session")]
    SessionRejected,
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Notes surface of the social platform. Implemented by the HTTP client and
/// by scripted in-memory doubles in tests.
#[async_trait]
pub trait NotesPlatform: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AuthError>;

    async fn complete_two_factor(
        &self,
        challenge: &PendingTwoFactor,
        code: &str,
    ) -> Result<SessionState, AuthError>;

    /// Low-cost check that a session is still accepted by the platform.
    async fn probe(&self, session: &SessionState) -> Result<(), AuthError>;

    async fn post_note(
        &self,
        session: &SessionState,
        audience: Audience,
        text: &str,
    ) -> Result<(), AuthError>;

    async fn get_current_note(&self, session: &SessionState) -> Result<Option<Note>, AuthError>;

    /// Deletes the active note. Returns `false` when there was none.
    async fn delete_note(&self, session: &SessionState) -> Result<bool, AuthError>;

    /// Replies to the caller's note newer than `since_unix`, most recent last.
    async fn recent_replies(
        &self,
        session: &SessionState,
        since_unix: u64,
    ) -> Result<Vec<NoteReply>, AuthError>;
}
