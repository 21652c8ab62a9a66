use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use notegram_accounts::AccountIdentity;
use notegram_core::{current_unix_timestamp, is_expired_unix};
use notegram_session::SessionStore;

use crate::login_locks::LoginLockMap;
use crate::types::{
    AuthError, LoginOutcome, NotesPlatform, PendingTwoFactor, PlatformError, SessionState,
};

/// Opaque handle binding a 2FA code submission to the login attempt that
/// raised it. Carries a local deadline; a code presented after the deadline
/// fails without contacting the platform.
#[derive(Debug, Clone)]
pub struct TwoFactorContinuation {
    pub account_name: String,
    challenge: PendingTwoFactor,
    expires_unix: u64,
}

impl TwoFactorContinuation {
    pub fn is_expired(&self, now_unix: u64) -> bool {
        is_expired_unix(Some(self.expires_unix), now_unix)
    }
}

/// Result of asking for a usable session.
#[derive(Debug)]
pub enum SessionOutcome {
    Ready(SessionState),
    TwoFactorRequired(TwoFactorContinuation),
}

/// Result of running a platform action under session management.
#[derive(Debug)]
pub enum ActionOutcome<T> {
    Completed(T),
    TwoFactorRequired(TwoFactorContinuation),
}

/// Owns the session lifecycle for every account: reuse from the store after
/// a probe, fresh login, 2FA continuation, persistence after every
/// successful authentication, and the single transparent re-login when the
/// platform rejects a session mid-use.
pub struct Authenticator {
    platform: Arc<dyn NotesPlatform>,
    store: SessionStore,
    locks: LoginLockMap,
    code_ttl_seconds: u64,
}

impl Authenticator {
    pub fn new(platform: Arc<dyn NotesPlatform>, store: SessionStore, code_ttl_seconds: u64) -> Self {
        Self {
            platform,
            store,
            locks: LoginLockMap::new(),
            code_ttl_seconds,
        }
    }

    /// Produces a usable session for the account, preferring the stored one
    /// when the platform still accepts it. At most one login/probe sequence
    /// runs per account at a time.
    pub async fn obtain_session(
        &self,
        account: &AccountIdentity,
    ) -> Result<SessionOutcome, AuthError> {
        let _guard = self.locks.acquire(&account.name).await;

        if let Some(raw) = self.store.load(&account.name).map_err(storage_error)? {
            match SessionState::from_serialized(&raw) {
                Ok(session) => match self.platform.probe(&session).await {
                    Ok(()) => {
                        debug!(account = %account.name, "stored session accepted");
                        return Ok(SessionOutcome::Ready(session));
                    }
                    Err(AuthError::SessionRejected) => {
                        info!(account = %account.name, "stored session rejected, logging in again");
                    }
                    Err(other) => return Err(other),
                },
                Err(error) => {
                    warn!(
                        account = %account.name,
                        error = %error,
                        "stored session is unreadable, logging in again"
                    );
                }
            }
        }

        self.fresh_login(account).await
    }

    async fn fresh_login(&self, account: &AccountIdentity) -> Result<SessionOutcome, AuthError> {
        info!(account = %account.name, "performing credential login");
        match self
            .platform
            .login(&account.username, account.password.expose())
            .await?
        {
            LoginOutcome::Session(session) => {
                self.persist(&account.name, &session)?;
                info!(account = %account.name, "login succeeded");
                Ok(SessionOutcome::Ready(session))
            }
            LoginOutcome::TwoFactorRequired(challenge) => {
                info!(account = %account.name, "platform requires a verification code");
                Ok(SessionOutcome::TwoFactorRequired(TwoFactorContinuation {
                    account_name: account.name.clone(),
                    challenge,
                    expires_unix: current_unix_timestamp().saturating_add(self.code_ttl_seconds),
                }))
            }
        }
    }

    /// Finishes a challenged login. The deadline is checked locally first;
    /// an expired continuation never reaches the platform.
    pub async fn complete_two_factor(
        &self,
        continuation: &TwoFactorContinuation,
        code: &str,
    ) -> Result<SessionState, AuthError> {
        if continuation.is_expired(current_unix_timestamp()) {
            debug!(
                account = %continuation.account_name,
                "verification window elapsed before the code arrived"
            );
            return Err(AuthError::InvalidCode);
        }
        let _guard = self.locks.acquire(&continuation.account_name).await;
        let session = self
            .platform
            .complete_two_factor(&continuation.challenge, code)
            .await?;
        self.persist(&continuation.account_name, &session)?;
        info!(account = %continuation.account_name, "verification code accepted");
        Ok(session)
    }

    /// Obtains a session and runs `action` with it. When the platform
    /// rejects the session mid-use, the stored copy is dropped and the
    /// action retried once against a freshly authenticated session; a second
    /// consecutive failure surfaces.
    pub async fn run_with_session<T, F, Fut>(
        &self,
        account: &AccountIdentity,
        action: F,
    ) -> Result<ActionOutcome<T>, AuthError>
    where
        F: Fn(SessionState) -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let session = match self.obtain_session(account).await? {
            SessionOutcome::Ready(session) => session,
            SessionOutcome::TwoFactorRequired(continuation) => {
                return Ok(ActionOutcome::TwoFactorRequired(continuation));
            }
        };

        match action(session).await {
            Ok(value) => Ok(ActionOutcome::Completed(value)),
            Err(AuthError::SessionRejected) => {
                info!(account = %account.name, "session rejected mid-use, re-authenticating once");
                self.store.delete(&account.name).map_err(storage_error)?;
                let session = match self.obtain_session(account).await? {
                    SessionOutcome::Ready(session) => session,
                    SessionOutcome::TwoFactorRequired(continuation) => {
                        return Ok(ActionOutcome::TwoFactorRequired(continuation));
                    }
                };
                let value = action(session).await?;
                Ok(ActionOutcome::Completed(value))
            }
            Err(other) => Err(other),
        }
    }

    fn persist(&self, account_name: &str, session: &SessionState) -> Result<(), AuthError> {
        let serialized = session.to_serialized()?;
        self.store
            .save(account_name, &serialized)
            .map_err(storage_error)
    }
}

fn storage_error(error: anyhow::Error) -> AuthError {
    AuthError::Platform(PlatformError::Storage(format!("{error:#}")))
}
