//! CLI parse: clap types for mediamgr. No behavior; definitions only.

use crate::posts::PostStatus;
use crate::types::ResourceType;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// mediamgr - quota-gated AI media generation
#[derive(Parser)]
#[command(name = "mediamgr")]
#[command(about = "Quota-gated AI media generation with exactly-once credit accounting")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the user config file)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage accounts and credits
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Generate content for an account
    Generate {
        /// Account to charge
        account: String,
        /// Resource type (text, image, video)
        resource: ResourceType,
        /// Theme or prompt
        prompt: String,
        /// Skip caption generation for media
        #[arg(long)]
        no_caption: bool,
        /// Target platform (repeatable)
        #[arg(long = "platform")]
        platforms: Vec<String>,
        /// Backend parameter as key=value; JSON values are parsed (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,
        /// Use scripted in-process backends instead of the configured ones
        #[arg(long)]
        dry_run: bool,
    },
    /// Queue an uploaded image or video as a post
    Upload {
        /// Account submitting the upload
        account: String,
        /// Media file
        file: PathBuf,
        /// Post text
        #[arg(long, default_value = "")]
        text: String,
        /// MIME type (guessed from the extension when omitted)
        #[arg(long)]
        mime_type: Option<String>,
        /// Target platform (repeatable)
        #[arg(long = "platform")]
        platforms: Vec<String>,
        /// Record as posted instead of pending
        #[arg(long)]
        post_now: bool,
    },
    /// Inspect queued posts
    Posts {
        #[command(subcommand)]
        command: PostCommands,
    },
    /// Refund stale reservations and prune resolved ones
    Reconcile {
        /// Refund reservations older than this (default: ledger.reservation_ttl_ms)
        #[arg(long)]
        max_age_ms: Option<u64>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open an account with a plan allocation
    Open {
        account: String,
        /// Plan name (default: configured default plan)
        #[arg(long)]
        plan: Option<String>,
        /// Unmetered admin account
        #[arg(long)]
        admin: bool,
    },
    /// Show an account and its balances
    Show { account: String },
    /// List all accounts
    List,
    /// Add credits, either a single resource or a named add-on pack
    Grant {
        account: String,
        /// Resource type to credit
        #[arg(long, requires = "amount", conflicts_with = "pack")]
        resource: Option<ResourceType>,
        /// Number of credits
        #[arg(long, requires = "resource")]
        amount: Option<i64>,
        /// Add-on pack name
        #[arg(long)]
        pack: Option<String>,
    },
    /// Reset balances to a plan allocation
    Plan { account: String, plan: String },
}

#[derive(Subcommand)]
pub enum PostCommands {
    /// List posts, newest last
    List {
        /// Filter by status (pending, posted)
        #[arg(long)]
        status: Option<PostStatus>,
        /// Filter by account
        #[arg(long)]
        account: Option<String>,
    },
    /// Show one post
    Show { id: u64 },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the user config file location
    Path,
}
