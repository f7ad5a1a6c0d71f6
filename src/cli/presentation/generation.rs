//! Generation and reconciliation presentation.

use super::{heading, to_pretty_json};
use crate::ledger::ReconcileReport;
use crate::orchestrator::GeneratedContent;
use owo_colors::OwoColorize;
use serde_json::json;

pub fn format_generated_text(content: &GeneratedContent) -> String {
    let mut output = format!("{}\n", heading(&format!("Job {}", content.job_id)));
    output.push_str(&format!("Account: {}\n", content.account_id));
    output.push_str(&format!("Resource: {}\n", content.resource));
    output.push_str(&format!("Attempts: {}\n", content.attempts));
    if let Some(url) = &content.media_url {
        output.push_str(&format!("Media: {}\n", url));
    }
    if let Some(mime_type) = &content.mime_type {
        output.push_str(&format!("MIME type: {}\n", mime_type));
    }
    match content.post_id {
        Some(id) => output.push_str(&format!("Post: #{} ({})\n", id, content.status)),
        None => output.push_str("Post: not recorded\n"),
    }
    if content.caption_degraded {
        output.push_str(&format!(
            "{}\n",
            "Caption generation failed; placeholder caption used".yellow()
        ));
    }
    output.push('\n');
    output.push_str(&content.text);
    output
}

pub fn format_generated_json(content: &GeneratedContent) -> String {
    serde_json::to_string_pretty(content).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_reconcile_text(report: &ReconcileReport) -> String {
    let mut output = format!(
        "Reconciliation complete:\n  Refunded: {}\n  Resolved concurrently: {}\n  Pruned: {}",
        report.refunded.len(),
        report.raced,
        report.pruned
    );
    for id in &report.refunded {
        output.push_str(&format!("\n  - refunded {}", id));
    }
    if !report.failures.is_empty() {
        output.push_str(&format!(
            "\n\n{} ({}):",
            "Failures".red(),
            report.failures.len()
        ));
        for (id, reason) in &report.failures {
            output.push_str(&format!("\n  - {}: {}", id, reason));
        }
    }
    output
}

pub fn format_reconcile_json(report: &ReconcileReport) -> String {
    let failures: Vec<_> = report
        .failures
        .iter()
        .map(|(id, reason)| json!({ "reservation_id": id, "reason": reason }))
        .collect();
    to_pretty_json(&json!({
        "refunded": report.refunded,
        "raced": report.raced,
        "pruned": report.pruned,
        "failures": failures,
    }))
}
