//! CLI command names for log spans.

use crate::cli::parse::{AccountCommands, Commands, ConfigCommands, PostCommands};

/// Dotted command name (e.g. "account.open", "posts.list").
pub fn command_name(command: &Commands) -> String {
    match command {
        Commands::Account { command } => format!("account.{}", account_command_name(command)),
        Commands::Generate { .. } => "generate".to_string(),
        Commands::Upload { .. } => "upload".to_string(),
        Commands::Posts { command } => format!("posts.{}", post_command_name(command)),
        Commands::Reconcile { .. } => "reconcile".to_string(),
        Commands::Config { command } => format!("config.{}", config_command_name(command)),
    }
}

pub fn account_command_name(command: &AccountCommands) -> &'static str {
    match command {
        AccountCommands::Open { .. } => "open",
        AccountCommands::Show { .. } => "show",
        AccountCommands::List => "list",
        AccountCommands::Grant { .. } => "grant",
        AccountCommands::Plan { .. } => "plan",
    }
}

pub fn post_command_name(command: &PostCommands) -> &'static str {
    match command {
        PostCommands::List { .. } => "list",
        PostCommands::Show { .. } => "show",
    }
}

pub fn config_command_name(command: &ConfigCommands) -> &'static str {
    match command {
        ConfigCommands::Show => "show",
        ConfigCommands::Path => "path",
    }
}
