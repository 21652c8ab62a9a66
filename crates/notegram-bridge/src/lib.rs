//! Telegram-facing side of the relay: transport client, command grammar,
//! pending-action conversation state, and the dispatcher that turns operator
//! messages into platform actions.
mod commands;
mod dispatcher;
mod pending_actions;
mod runtime;
mod telegram_api_client;

pub use commands::{is_verification_code, parse_operator_input, ParsedInput, RelayCommand};
pub use dispatcher::{
    CommandDispatcher, ConversationError, DispatcherConfig, ValidationError,
};
pub use pending_actions::{AccountAction, PendingAction, PendingActionStore, PendingKind};
pub use runtime::RelayRuntime;
pub use telegram_api_client::{
    OperatorMessage, TelegramClient, TelegramConfig, UpdateBatch, TELEGRAM_API_BASE,
};
