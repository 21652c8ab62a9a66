use std::path::PathBuf;

use clap::Parser;

use notegram_bridge::TELEGRAM_API_BASE;
use notegram_instagram::PRODUCTION_API_BASE;

#[derive(Debug, Parser)]
#[command(
    name = "notegram",
    about = "Telegram-operated relay for posting and reading notes across several accounts",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "NOTEGRAM_ACCOUNTS",
        hide_env_values = true,
        help = "Accounts as name=username:password entries separated by |"
    )]
    pub accounts: String,

    #[arg(
        long = "telegram-bot-token",
        env = "NOTEGRAM_TELEGRAM_BOT_TOKEN",
        hide_env_values = true,
        help = "Telegram bot token; required unless running with --login"
    )]
    pub telegram_bot_token: Option<String>,

    #[arg(
        long = "operator-chat-id",
        env = "NOTEGRAM_OPERATOR_CHAT_ID",
        help = "Telegram chat id allowed to issue commands; required unless running with --login"
    )]
    pub operator_chat_id: Option<i64>,

    #[arg(
        long = "state-dir",
        env = "NOTEGRAM_STATE_DIR",
        default_value = ".notegram",
        help = "Directory holding persisted session files"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "telegram-api-base",
        env = "NOTEGRAM_TELEGRAM_API_BASE",
        default_value = TELEGRAM_API_BASE,
        help = "Telegram Bot API base URL"
    )]
    pub telegram_api_base: String,

    #[arg(
        long = "instagram-api-base",
        env = "NOTEGRAM_INSTAGRAM_API_BASE",
        default_value = PRODUCTION_API_BASE,
        help = "Notes platform API base URL"
    )]
    pub instagram_api_base: String,

    #[arg(
        long = "poll-timeout-seconds",
        env = "NOTEGRAM_POLL_TIMEOUT_SECONDS",
        default_value_t = 30,
        help = "Telegram long-poll hold time in seconds"
    )]
    pub poll_timeout_seconds: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "NOTEGRAM_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        help = "Timeout for a single HTTP request"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "account-timeout-ms",
        env = "NOTEGRAM_ACCOUNT_TIMEOUT_MS",
        default_value_t = 45_000,
        help = "Budget for one account inside a fan-out command"
    )]
    pub account_timeout_ms: u64,

    #[arg(
        long = "choice-ttl-seconds",
        env = "NOTEGRAM_CHOICE_TTL_SECONDS",
        default_value_t = 120,
        help = "How long an account-choice prompt stays answerable"
    )]
    pub choice_ttl_seconds: u64,

    #[arg(
        long = "code-ttl-seconds",
        env = "NOTEGRAM_CODE_TTL_SECONDS",
        default_value_t = 90,
        help = "How long a verification-code prompt stays answerable"
    )]
    pub code_ttl_seconds: u64,

    #[arg(
        long,
        value_name = "ACCOUNT",
        help = "Sign in to one configured account, persist its session, and exit"
    )]
    pub login: Option<String>,
}
