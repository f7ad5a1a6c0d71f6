//! CLI presentation: text and JSON formatters per command group.

mod account;
mod generation;
mod posts;

pub use account::{
    format_account_json, format_account_list_json, format_account_list_text, format_account_text,
    format_grant_text,
};
pub use generation::{format_generated_json, format_generated_text, format_reconcile_json, format_reconcile_text};
pub use posts::{format_post_list_json, format_post_list_text, format_post_text};

use owo_colors::OwoColorize;

/// Section heading with bold/underline.
pub(crate) fn heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

pub(crate) fn to_pretty_json(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
