use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "vibenote")]
#[command(about = "Quick notes from the command line, synced across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the shared remote collection file
    #[arg(long, global = true, value_name = "PATH")]
    pub remote_path: Option<PathBuf>,

    /// CLI profile name (one profile per simulated device)
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,

    /// Quick capture: vibenote "my note here"
    #[arg(trailing_var_arg = true)]
    pub note: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new note
    #[command(alias = "new")]
    Add {
        /// Note content
        content: Vec<String>,
    },
    /// List recent notes
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Include notes of every owner
        #[arg(long)]
        all: bool,
    },
    /// Edit an existing note
    Edit {
        /// Note ID
        id: String,
    },
    /// Delete an existing note
    Delete {
        /// Note ID
        id: String,
    },
    /// Push pending notes and pull remote changes
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Follow remote changes and print notes as they change
    Watch {
        /// Number of notes to show per refresh
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Sign a profile in or out
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show note counts by sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config.
    ///
    /// Stores the global `--db-path` and `--remote-path` in the profile.
    Init {
        /// How often `watch` polls the remote collection
        #[arg(long, value_name = "MS")]
        poll_interval_ms: Option<u64>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in as a user, claiming any notes taken while signed out
    Login {
        /// Stable user identifier
        #[arg(long, value_name = "ID")]
        user: String,
    },
    /// Show who the profile is signed in as
    Status,
    /// Sign out and forget the user identifier
    Logout,
}
