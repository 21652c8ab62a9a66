//! A Telegram-operated relay that posts, reads, and deletes notes across
//! several platform accounts.
mod bootstrap;
mod cli_args;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap::{init_tracing, run_login, run_relay};
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.login.clone() {
        Some(account_name) => run_login(&cli, &account_name).await,
        None => run_relay(&cli).await,
    }
}
