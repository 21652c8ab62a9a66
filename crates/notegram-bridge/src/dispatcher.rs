//! Command dispatcher: routes operator messages through validation, account
//! resolution, authentication, and the platform action, and renders every
//! outcome as one reply text.
//!
//! All platform and auth failures are absorbed here. Whatever happens, the
//! operator gets a sentence and the process keeps running.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use thiserror::Error;
use tracing::info;

use notegram_accounts::{AccountIdentity, AccountRegistry};
use notegram_core::current_unix_timestamp;
use notegram_instagram::{
    ActionOutcome, AuthError, Authenticator, Audience, NoteReply, NotesPlatform,
};

use crate::commands::{is_verification_code, parse_operator_input, ParsedInput, RelayCommand};
use crate::pending_actions::{AccountAction, PendingAction, PendingActionStore, PendingKind};

const NOTE_TEXT_MAX_CHARS: usize = 60;
const REPLY_WINDOW_SECONDS: u64 = 24 * 60 * 60;
const REPLY_DISPLAY_LIMIT: usize = 8;

/// Input rejected before any network traffic.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Usage: {command} <text>")]
    EmptyNoteText { command: &'static str },
    #[error("The note text is {chars} characters, the limit is {limit}.")]
    NoteTooLong { chars: usize, limit: usize },
}

/// A reply arrived with nothing to match it against.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("No command is waiting for input. Send /start for the command list.")]
    NoPendingAction,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub choice_ttl_seconds: u64,
    pub code_ttl_seconds: u64,
    pub account_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            choice_ttl_seconds: 120,
            code_ttl_seconds: 90,
            account_timeout_ms: 45_000,
        }
    }
}

/// Fan-out views read every account; they never suspend on operator input.
#[derive(Debug, Clone, Copy)]
enum FanOutView {
    CurrentNote,
    NoteReplies,
}

impl FanOutView {
    fn label(self) -> &'static str {
        match self {
            FanOutView::CurrentNote => "current note",
            FanOutView::NoteReplies => "note replies",
        }
    }
}

pub struct CommandDispatcher {
    registry: AccountRegistry,
    platform: Arc<dyn NotesPlatform>,
    authenticator: Arc<Authenticator>,
    pending: PendingActionStore,
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(
        registry: AccountRegistry,
        platform: Arc<dyn NotesPlatform>,
        authenticator: Arc<Authenticator>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            platform,
            authenticator,
            pending: PendingActionStore::new(),
            config,
        }
    }

    /// Handles one operator message and returns the reply to send.
    pub async fn handle_message(&mut self, operator: i64, text: &str) -> String {
        let now = current_unix_timestamp();
        match parse_operator_input(text) {
            ParsedInput::Command(RelayCommand::Start) => self.render_help(),
            ParsedInput::Command(RelayCommand::Cancel) => {
                if self.pending.clear(operator) {
                    "Cancelled.".to_string()
                } else {
                    ConversationError::NoPendingAction.to_string()
                }
            }
            ParsedInput::Command(RelayCommand::Note { text }) => {
                self.start_account_command(
                    operator,
                    AccountAction::PostNote {
                        audience: Audience::MutualFollowers,
                        text,
                    },
                    now,
                )
                .await
            }
            ParsedInput::Command(RelayCommand::NoteCloseFriends { text }) => {
                self.start_account_command(
                    operator,
                    AccountAction::PostNote {
                        audience: Audience::CloseFriends,
                        text,
                    },
                    now,
                )
                .await
            }
            ParsedInput::Command(RelayCommand::DeleteNote) => {
                self.start_account_command(operator, AccountAction::DeleteNote, now)
                    .await
            }
            ParsedInput::Command(RelayCommand::CurrentNote) => {
                self.start_fan_out(operator, FanOutView::CurrentNote, now).await
            }
            ParsedInput::Command(RelayCommand::NoteReplies) => {
                self.start_fan_out(operator, FanOutView::NoteReplies, now).await
            }
            ParsedInput::Unknown { command } => {
                format!("Unrecognized command {command}. Send /start for the command list.")
            }
            ParsedInput::Reply { text } => self.handle_reply(operator, &text, now).await,
        }
    }

    /// Starts a command that targets exactly one account, asking which one
    /// when more than one is configured.
    async fn start_account_command(
        &mut self,
        operator: i64,
        action: AccountAction,
        now: u64,
    ) -> String {
        if let Some(pending) = self.pending.live(operator, now) {
            return render_busy(pending);
        }
        if let Err(error) = validate_action(&action) {
            return error.to_string();
        }
        let accounts = self.registry.list();
        if accounts.len() == 1 {
            let account = accounts[0].clone();
            return self.execute_action(operator, action, &account).await;
        }
        let prompt = self.render_account_choices(&action);
        self.pending.register(
            operator,
            PendingKind::AccountChoice { action },
            now,
            self.config.choice_ttl_seconds,
        );
        prompt
    }

    async fn start_fan_out(&mut self, operator: i64, view: FanOutView, now: u64) -> String {
        if let Some(pending) = self.pending.live(operator, now) {
            return render_busy(pending);
        }
        self.run_fan_out(view).await
    }

    /// Matches a non-command message against the outstanding pending action.
    async fn handle_reply(&mut self, operator: i64, text: &str, now: u64) -> String {
        let Some(pending) = self.pending.take_if_live(operator, now) else {
            return ConversationError::NoPendingAction.to_string();
        };
        match pending.kind.clone() {
            PendingKind::AccountChoice { action } => {
                let Some(account) = self.registry.resolve(text).cloned() else {
                    let count = self.registry.list().len();
                    let reply = format!(
                        "'{}' does not match a configured account. Reply with a number from 1 to {count} or an account name, or send /cancel.",
                        text.trim()
                    );
                    self.pending.restore(operator, pending);
                    return reply;
                };
                self.execute_action(operator, action, &account).await
            }
            PendingKind::TwoFactorCode {
                continuation,
                action,
            } => {
                let code = text.trim();
                if !is_verification_code(code) {
                    let reply = format!(
                        "A 6-digit verification code is expected for {}. Send the code, or /cancel.",
                        continuation.account_name
                    );
                    self.pending.restore(operator, pending);
                    return reply;
                }
                let Some(account) = self.registry.resolve(&continuation.account_name).cloned()
                else {
                    return format!(
                        "Account {} is no longer configured.",
                        continuation.account_name
                    );
                };
                match self
                    .authenticator
                    .complete_two_factor(&continuation, code)
                    .await
                {
                    Ok(_session) => self.execute_action(operator, action, &account).await,
                    Err(error) => format!(
                        "Could not finish signing in to {}: {}. Start the command again.",
                        account.name,
                        describe_auth_error(&error)
                    ),
                }
            }
        }
    }

    /// Runs a resolved single-account action, suspending on a 2FA challenge.
    async fn execute_action(
        &mut self,
        operator: i64,
        action: AccountAction,
        account: &AccountIdentity,
    ) -> String {
        info!(account = %account.name, action = action.label(), "executing account action");
        match self.run_account_action(&action, account).await {
            Ok(ActionOutcome::Completed(summary)) => summary,
            Ok(ActionOutcome::TwoFactorRequired(continuation)) => {
                let prompt = format!(
                    "Signing in to {} (@{}) requires a verification code. Send the 6-digit code, or /cancel.",
                    account.name, account.username
                );
                self.pending.register(
                    operator,
                    PendingKind::TwoFactorCode {
                        continuation,
                        action,
                    },
                    current_unix_timestamp(),
                    self.config.code_ttl_seconds,
                );
                prompt
            }
            Err(error) => format!(
                "{} (@{}): {}",
                account.name,
                account.username,
                describe_auth_error(&error)
            ),
        }
    }

    async fn run_account_action(
        &self,
        action: &AccountAction,
        account: &AccountIdentity,
    ) -> Result<ActionOutcome<String>, AuthError> {
        let platform = Arc::clone(&self.platform);
        match action {
            AccountAction::PostNote { audience, text } => {
                let audience = *audience;
                let outcome = self
                    .authenticator
                    .run_with_session(account, |session| {
                        let platform = Arc::clone(&platform);
                        let text = text.clone();
                        async move { platform.post_note(&session, audience, &text).await }
                    })
                    .await?;
                Ok(match outcome {
                    ActionOutcome::Completed(()) => ActionOutcome::Completed(format!(
                        "Posted the note to {} (@{}) for {}.",
                        account.name,
                        account.username,
                        audience.describe()
                    )),
                    ActionOutcome::TwoFactorRequired(continuation) => {
                        ActionOutcome::TwoFactorRequired(continuation)
                    }
                })
            }
            AccountAction::DeleteNote => {
                let outcome = self
                    .authenticator
                    .run_with_session(account, |session| {
                        let platform = Arc::clone(&platform);
                        async move { platform.delete_note(&session).await }
                    })
                    .await?;
                Ok(match outcome {
                    ActionOutcome::Completed(true) => ActionOutcome::Completed(format!(
                        "Deleted the active note on {} (@{}).",
                        account.name, account.username
                    )),
                    ActionOutcome::Completed(false) => ActionOutcome::Completed(format!(
                        "{} (@{}) has no active note to delete.",
                        account.name, account.username
                    )),
                    ActionOutcome::TwoFactorRequired(continuation) => {
                        ActionOutcome::TwoFactorRequired(continuation)
                    }
                })
            }
        }
    }

    /// Queries every account concurrently and aggregates one line per
    /// account. A slow or failing account affects only its own line.
    async fn run_fan_out(&self, view: FanOutView) -> String {
        let accounts = self.registry.list().to_vec();
        info!(view = view.label(), accounts = accounts.len(), "running fan-out");
        let budget = Duration::from_millis(self.config.account_timeout_ms);
        let jobs = accounts.iter().map(|account| async move {
            match tokio::time::timeout(budget, self.fan_out_status(view, account)).await {
                Ok(status) => status,
                Err(_elapsed) => format!("timed out after {}s", budget.as_secs()),
            }
        });
        let statuses = join_all(jobs).await;
        accounts
            .iter()
            .zip(statuses)
            .enumerate()
            .map(|(index, (account, status))| render_fan_out_line(index, account, &status))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// One account's status text for a fan-out view. Never fails; errors
    /// become the status.
    async fn fan_out_status(&self, view: FanOutView, account: &AccountIdentity) -> String {
        let platform = Arc::clone(&self.platform);
        match view {
            FanOutView::CurrentNote => {
                let result = self
                    .authenticator
                    .run_with_session(account, |session| {
                        let platform = Arc::clone(&platform);
                        async move { platform.get_current_note(&session).await }
                    })
                    .await;
                match result {
                    Ok(ActionOutcome::Completed(Some(note))) => format!("\"{}\"", note.text),
                    Ok(ActionOutcome::Completed(None)) => "no active note".to_string(),
                    Ok(ActionOutcome::TwoFactorRequired(_)) => {
                        "sign-in requires a verification code; run /note or /delete_note on it first"
                            .to_string()
                    }
                    Err(error) => describe_auth_error(&error),
                }
            }
            FanOutView::NoteReplies => {
                let since_unix = current_unix_timestamp().saturating_sub(REPLY_WINDOW_SECONDS);
                let result = self
                    .authenticator
                    .run_with_session(account, |session| {
                        let platform = Arc::clone(&platform);
                        async move { platform.recent_replies(&session, since_unix).await }
                    })
                    .await;
                match result {
                    Ok(ActionOutcome::Completed(replies)) if replies.is_empty() => {
                        "no recent replies".to_string()
                    }
                    Ok(ActionOutcome::Completed(replies)) => render_replies(&replies),
                    Ok(ActionOutcome::TwoFactorRequired(_)) => {
                        "sign-in requires a verification code; run /note or /delete_note on it first"
                            .to_string()
                    }
                    Err(error) => describe_auth_error(&error),
                }
            }
        }
    }

    fn render_help(&self) -> String {
        let mut lines = vec![
            "Commands:".to_string(),
            "/note <text> - post a note for mutual followers".to_string(),
            "/note_cf <text> - post a note for close friends".to_string(),
            "/current_note - show the active note on every account".to_string(),
            "/note_replies - show recent note replies on every account".to_string(),
            "/delete_note - delete the active note".to_string(),
            "/cancel - abort the request waiting for input".to_string(),
            String::new(),
            "Accounts:".to_string(),
        ];
        for (index, account) in self.registry.list().iter().enumerate() {
            lines.push(format!(
                "{}. {} (@{})",
                index + 1,
                account.name,
                account.username
            ));
        }
        lines.join("\n")
    }

    fn render_account_choices(&self, action: &AccountAction) -> String {
        let mut lines = vec![format!("Which account should handle {}?", action.label())];
        for (index, account) in self.registry.list().iter().enumerate() {
            lines.push(format!(
                "{}. {} (@{})",
                index + 1,
                account.name,
                account.username
            ));
        }
        lines.push("Reply with a number or an account name. /cancel aborts.".to_string());
        lines.join("\n")
    }
}

fn validate_action(action: &AccountAction) -> Result<(), ValidationError> {
    let AccountAction::PostNote { text, .. } = action else {
        return Ok(());
    };
    if text.is_empty() {
        return Err(ValidationError::EmptyNoteText {
            command: action.label(),
        });
    }
    let chars = text.chars().count();
    if chars > NOTE_TEXT_MAX_CHARS {
        return Err(ValidationError::NoteTooLong {
            chars,
            limit: NOTE_TEXT_MAX_CHARS,
        });
    }
    Ok(())
}

fn render_busy(pending: &PendingAction) -> String {
    match &pending.kind {
        PendingKind::AccountChoice { action } => format!(
            "Still waiting for an account choice for {}. Reply with a number or name, or send /cancel.",
            action.label()
        ),
        PendingKind::TwoFactorCode { continuation, .. } => format!(
            "Still waiting for the verification code for {}. Send the 6-digit code, or /cancel.",
            continuation.account_name
        ),
    }
}

fn describe_auth_error(error: &AuthError) -> String {
    match error {
        AuthError::InvalidCredentials => "the platform rejected the stored credentials".to_string(),
        AuthError::InvalidCode => "the verification code was rejected or expired".to_string(),
        AuthError::RateLimited => {
            "the platform is rate limiting this account; try again later".to_string()
        }
        AuthError::SessionRejected => {
            "the session was rejected even after signing in again".to_string()
        }
        AuthError::Platform(error) => format!("platform request failed: {error}"),
    }
}

fn render_fan_out_line(index: usize, account: &AccountIdentity, status: &str) -> String {
    if status.contains('\n') {
        format!(
            "{}. {} (@{}):\n{}",
            index + 1,
            account.name,
            account.username,
            status
        )
    } else {
        format!(
            "{}. {} (@{}): {}",
            index + 1,
            account.name,
            account.username,
            status
        )
    }
}

/// Renders the most recent replies, oldest first, capped for readability.
fn render_replies(replies: &[NoteReply]) -> String {
    let start = replies.len().saturating_sub(REPLY_DISPLAY_LIMIT);
    replies[start..]
        .iter()
        .map(|reply| {
            format!(
                "@{}: {} ({})",
                reply.sender_username,
                reply.text,
                format_clock(reply.created_at_unix)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_clock(unix_seconds: u64) -> String {
    DateTime::<Utc>::from_timestamp(unix_seconds as i64, 0)
        .map(|stamp| stamp.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}
