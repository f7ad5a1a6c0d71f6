//! Post presentation: queue listings and single posts.

use super::{heading, to_pretty_json};
use crate::posts::{PostStatus, StoredPost};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;

const PREVIEW_CHARS: usize = 48;

fn status_label(status: PostStatus) -> String {
    match status {
        PostStatus::Pending => format!("{}", status.yellow()),
        PostStatus::Posted => format!("{}", status.green()),
    }
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > PREVIEW_CHARS {
        let cut: String = line.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    } else {
        line.to_string()
    }
}

pub fn format_post_list_text(posts: &[StoredPost]) -> String {
    if posts.is_empty() {
        return "No posts found.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["ID", "Account", "Status", "Source", "Media", "Text"]);
    for post in posts {
        let media = match (&post.record.media_type, &post.record.media_url) {
            (Some(kind), Some(_)) => kind.to_string(),
            _ => "-".to_string(),
        };
        table.add_row(vec![
            post.id.to_string(),
            post.record.account_id.to_string(),
            status_label(post.record.status),
            post.record.source.to_string(),
            media,
            preview(&post.record.text),
        ]);
    }
    format!("{}\n\nTotal: {} post(s)", table, posts.len())
}

pub fn format_post_list_json(posts: &[StoredPost]) -> String {
    to_pretty_json(&json!({ "posts": posts, "total": posts.len() }))
}

pub fn format_post_text(post: &StoredPost) -> String {
    let record = &post.record;
    let mut output = format!("{}\n", heading(&format!("Post #{}", post.id)));
    output.push_str(&format!("Account: {}\n", record.account_id));
    output.push_str(&format!("Status: {}\n", status_label(record.status)));
    output.push_str(&format!("Source: {}\n", record.source));
    if let Some(job_id) = &record.job_id {
        output.push_str(&format!("Job: {}\n", job_id));
    }
    if let Some(prompt) = &record.prompt {
        output.push_str(&format!("Prompt: {}\n", prompt));
    }
    if let Some(url) = &record.media_url {
        output.push_str(&format!("Media: {}\n", url));
    }
    if !record.platforms.is_empty() {
        output.push_str(&format!("Platforms: {}\n", record.platforms.join(", ")));
    }
    output.push_str(&format!("Created: {}\n\n", record.created_at.to_rfc3339()));
    output.push_str(&record.text);
    output
}
