//! Account presentation: balances and account listings.

use super::{heading, to_pretty_json};
use crate::ledger::{Account, AccountProfile};
use crate::types::{ResourceType, Role};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;

fn balance_cell(account: &Account, resource: ResourceType) -> String {
    if account.role == Role::Admin {
        return "unmetered".to_string();
    }
    let balance = account.balance(resource);
    if balance > 0 {
        balance.to_string()
    } else {
        format!("{}", balance.red())
    }
}

pub fn format_account_text(account: &Account) -> String {
    let mut output = format!("{}\n", heading(&format!("Account {}", account.account_id)));
    output.push_str(&format!("Role: {}\n", account.role));
    output.push_str(&format!("Plan: {}\n", account.plan));

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Resource", "Credits"]);
    for resource in ResourceType::ALL {
        table.add_row(vec![resource.to_string(), balance_cell(account, resource)]);
    }
    output.push_str(&table.to_string());
    output
}

pub fn format_account_json(account: &Account) -> String {
    to_pretty_json(&json!({
        "account_id": account.account_id,
        "role": account.role,
        "plan": account.plan,
        "balances": account.balances,
    }))
}

pub fn format_grant_text(account: &Account, resource: ResourceType, amount: i64) -> String {
    format!(
        "Granted {} {} credit(s) to {}\n\n{}",
        amount,
        resource,
        account.account_id,
        format_account_text(account)
    )
}

pub fn format_account_list_text(accounts: &[(AccountProfile, Account)]) -> String {
    if accounts.is_empty() {
        return "No accounts found.\n\nUse 'mediamgr account open' to add one.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Account", "Role", "Plan", "Text", "Image", "Video", "Opened"]);
    for (profile, account) in accounts {
        table.add_row(vec![
            profile.account_id.to_string(),
            profile.role.to_string(),
            profile.plan.clone(),
            balance_cell(account, ResourceType::Text),
            balance_cell(account, ResourceType::Image),
            balance_cell(account, ResourceType::Video),
            profile.created_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    format!("{}\n\nTotal: {} account(s)", table, accounts.len())
}

pub fn format_account_list_json(accounts: &[(AccountProfile, Account)]) -> String {
    let list: Vec<_> = accounts
        .iter()
        .map(|(profile, account)| {
            json!({
                "account_id": profile.account_id,
                "role": profile.role,
                "plan": profile.plan,
                "created_at": profile.created_at,
                "balances": account.balances,
            })
        })
        .collect();
    to_pretty_json(&json!({ "accounts": list, "total": accounts.len() }))
}
