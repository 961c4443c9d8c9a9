//! VibeNote CLI - quick notes from the terminal, synced across devices
//!
//! Each profile acts as one device: a local database plus a shared remote
//! collection file that several profiles can sync through.

mod cli;
mod commands;
mod config_profiles;
mod error;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::add::run_add;
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::ProfileContext;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::sync::{run_sync, run_sync_status};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "vibenote=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        Some(Commands::Config { command }) => {
            run_config(command, cli.profile.as_deref(), cli.db_path, cli.remote_path)?;
        }
        command => {
            let ctx =
                ProfileContext::resolve(cli.profile.as_deref(), cli.db_path, cli.remote_path)?;
            match command {
                Some(Commands::Add { content }) => run_add(&content, &ctx).await?,
                Some(Commands::List { limit, json, all }) => {
                    run_list(limit, json, all, &ctx).await?;
                }
                Some(Commands::Edit { id }) => run_edit(&id, &ctx).await?,
                Some(Commands::Delete { id }) => run_delete(&id, &ctx).await?,
                Some(Commands::Sync { command: None }) => run_sync(&ctx).await?,
                Some(Commands::Sync {
                    command: Some(SyncCommands::Status { json }),
                }) => run_sync_status(json, &ctx).await?,
                Some(Commands::Watch { limit }) => run_watch(limit, &ctx).await?,
                Some(Commands::Auth { command }) => run_auth(command, &ctx).await?,
                Some(Commands::Completions { .. } | Commands::Config { .. }) => {}
                None => {
                    // Quick capture mode: vibenote "my note"
                    if cli.note.is_empty() {
                        Cli::command().print_help()?;
                        println!();
                    } else {
                        run_add(&cli.note, &ctx).await?;
                    }
                }
            }
        }
    }

    Ok(())
}
