//! Startup wiring: turns the parsed configuration into running components.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use notegram_accounts::AccountRegistry;
use notegram_bridge::{
    CommandDispatcher, DispatcherConfig, RelayRuntime, TelegramClient, TelegramConfig,
};
use notegram_instagram::{
    Authenticator, InstagramConfig, InstagramHttpClient, SessionOutcome,
};
use notegram_session::SessionStore;

use crate::cli_args::Cli;

pub fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("NOTEGRAM_LOG")
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

struct Components {
    registry: AccountRegistry,
    store: SessionStore,
    platform: Arc<InstagramHttpClient>,
    authenticator: Arc<Authenticator>,
}

impl std::fmt::Debug for Components {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Components").finish_non_exhaustive()
    }
}

fn build_components(cli: &Cli) -> Result<Components> {
    let registry =
        AccountRegistry::parse(&cli.accounts).context("invalid accounts configuration")?;
    let store = SessionStore::new(&cli.state_dir);
    let platform = Arc::new(InstagramHttpClient::new(InstagramConfig {
        api_base: cli.instagram_api_base.clone(),
        request_timeout_ms: cli.request_timeout_ms,
    })?);
    let authenticator = Arc::new(Authenticator::new(
        platform.clone(),
        store.clone(),
        cli.code_ttl_seconds,
    ));
    Ok(Components {
        registry,
        store,
        platform,
        authenticator,
    })
}

fn report_sessions(store: &SessionStore, registry: &AccountRegistry) {
    for account in registry.list() {
        match store.load(&account.name) {
            Ok(Some(_)) => info!(account = %account.name, "stored session found"),
            Ok(None) => info!(account = %account.name, "no stored session yet, will sign in on first use"),
            Err(error) => {
                warn!(account = %account.name, "failed to read stored session: {error:#}")
            }
        }
    }
}

/// Relay mode: poll Telegram and dispatch operator commands until
/// interrupted.
pub async fn run_relay(cli: &Cli) -> Result<()> {
    let components = build_components(cli)?;
    let bot_token = cli
        .telegram_bot_token
        .clone()
        .context("--telegram-bot-token (or NOTEGRAM_TELEGRAM_BOT_TOKEN) is required to run the relay")?;
    let operator_chat_id = cli
        .operator_chat_id
        .context("--operator-chat-id (or NOTEGRAM_OPERATOR_CHAT_ID) is required to run the relay")?;

    info!(
        accounts = components.registry.list().len(),
        state_dir = %cli.state_dir.display(),
        "starting relay"
    );
    report_sessions(&components.store, &components.registry);

    let client = TelegramClient::new(TelegramConfig {
        api_base: cli.telegram_api_base.clone(),
        bot_token,
        poll_timeout_seconds: cli.poll_timeout_seconds,
        request_timeout_ms: cli.request_timeout_ms,
    })?;
    let dispatcher = CommandDispatcher::new(
        components.registry,
        components.platform,
        components.authenticator,
        DispatcherConfig {
            choice_ttl_seconds: cli.choice_ttl_seconds,
            code_ttl_seconds: cli.code_ttl_seconds,
            account_timeout_ms: cli.account_timeout_ms,
        },
    );
    let mut runtime = RelayRuntime::new(client, dispatcher, operator_chat_id);
    runtime.run().await
}

/// One-shot login mode: authenticate a single account from the terminal so
/// the relay later starts with a warm session.
pub async fn run_login(cli: &Cli, account_name: &str) -> Result<()> {
    let components = build_components(cli)?;
    let account = components
        .registry
        .resolve(account_name)
        .with_context(|| format!("account '{account_name}' is not in the configured list"))?
        .clone();

    match components.authenticator.obtain_session(&account).await? {
        SessionOutcome::Ready(session) => {
            info!(account = %account.name, username = %session.username, "session ready");
        }
        SessionOutcome::TwoFactorRequired(continuation) => {
            print!(
                "Verification code for {} (@{}): ",
                account.name, account.username
            );
            std::io::stdout().flush().context("failed to flush prompt")?;
            let mut code = String::new();
            std::io::stdin()
                .read_line(&mut code)
                .context("failed to read verification code from stdin")?;
            let session = components
                .authenticator
                .complete_two_factor(&continuation, code.trim())
                .await?;
            info!(account = %account.name, username = %session.username, "session ready");
        }
    }
    Ok(())
}
