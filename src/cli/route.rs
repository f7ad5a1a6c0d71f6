//! CLI route: single route table and run context. Dispatches to domain services and presentation.

use crate::backend::scripted::ScriptedBackend;
use crate::backend::{
    Artifact, BackendRegistry, BackendShape, DispatchOutcome, OperationHandle, OperationStatus,
};
use crate::cli::parse::{AccountCommands, Commands, ConfigCommands, OutputFormat, PostCommands};
use crate::cli::presentation::{
    format_account_json, format_account_list_json, format_account_list_text, format_account_text,
    format_generated_json, format_generated_text, format_grant_text, format_post_list_json,
    format_post_list_text, format_post_text, format_reconcile_json, format_reconcile_text,
};
use crate::config::{global_config_path, AppConfig};
use crate::ledger::{
    LedgerStore, MemoryLedgerStore, QuotaLedger, ReservationSweeper, SledLedgerStore,
};
use crate::orchestrator::{
    GenerateRequest, JobSpec, ManualPost, Orchestrator, OrchestratorConfig, PollingPolicy,
};
use crate::posts::{
    MemoryPostStore, PostRecordStore, PostStatus, SledPostStore, StoredPost,
};
use crate::publisher::LocalPublisher;
use crate::types::{AccountId, PostId, ResourceType, Role};
use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 1x1 transparent PNG served by the dry-run image backend
const DRY_RUN_PNG: [u8; 67] = [
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

/// Runtime context for CLI execution: configuration plus the shared ledger and post store.
pub struct RunContext {
    config: AppConfig,
    ledger: Arc<QuotaLedger>,
    posts: Arc<dyn PostRecordStore>,
    format: OutputFormat,
}

impl RunContext {
    /// Open storage described by `config`. Ledger and posts share one sled database.
    pub fn new(config: AppConfig, format: OutputFormat) -> Result<Self> {
        let (store, posts): (Arc<dyn LedgerStore>, Arc<dyn PostRecordStore>) =
            if config.storage.in_memory {
                (
                    Arc::new(MemoryLedgerStore::new()),
                    Arc::new(MemoryPostStore::new()),
                )
            } else {
                let db_path = config.storage.database_path();
                std::fs::create_dir_all(&db_path).with_context(|| {
                    format!("Failed to create data directory {}", db_path.display())
                })?;
                let db = sled::open(&db_path).with_context(|| {
                    format!("Failed to open sled database at {}", db_path.display())
                })?;
                (
                    Arc::new(SledLedgerStore::from_db(db.clone())?),
                    Arc::new(SledPostStore::from_db(db)?),
                )
            };

        let ledger = Arc::new(QuotaLedger::with_catalog(store, config.catalog()));
        Ok(Self {
            config,
            ledger,
            posts,
            format,
        })
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    /// Execute a CLI command via the single route table.
    pub async fn execute(&self, command: &Commands) -> Result<String> {
        if !matches!(command, Commands::Reconcile { .. } | Commands::Config { .. }) {
            self.startup_sweep();
        }

        match command {
            Commands::Account { command } => self.handle_account_command(command),
            Commands::Generate {
                account,
                resource,
                prompt,
                no_caption,
                platforms,
                params,
                dry_run,
            } => {
                let mut spec = JobSpec::new(prompt.clone()).with_platforms(platforms.clone());
                if *no_caption {
                    spec = spec.without_caption();
                }
                for param in params {
                    let (key, value) = parse_param(param)?;
                    spec = spec.with_parameter(key, value);
                }
                let orchestrator = self.orchestrator(if *dry_run {
                    Some(prompt.as_str())
                } else {
                    None
                })?;
                let content = orchestrator
                    .generate(GenerateRequest::new(AccountId::new(account.clone()), *resource, spec))
                    .await?;
                Ok(match self.format {
                    OutputFormat::Json => format_generated_json(&content),
                    OutputFormat::Text => format_generated_text(&content),
                })
            }
            Commands::Upload {
                account,
                file,
                text,
                mime_type,
                platforms,
                post_now,
            } => {
                let mime_type = match mime_type {
                    Some(mime_type) => mime_type.clone(),
                    None => guess_mime_type(file).ok_or_else(|| {
                        anyhow!(
                            "Cannot infer the MIME type of {}; pass --mime-type",
                            file.display()
                        )
                    })?,
                };
                let data = tokio::fs::read(file)
                    .await
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let content = self
                    .orchestrator(None)?
                    .submit_manual_post(ManualPost {
                        account_id: AccountId::new(account.clone()),
                        text: text.clone(),
                        data,
                        mime_type,
                        platforms: platforms.clone(),
                        post_now: *post_now,
                    })
                    .await?;
                Ok(match self.format {
                    OutputFormat::Json => format_generated_json(&content),
                    OutputFormat::Text => format_generated_text(&content),
                })
            }
            Commands::Posts { command } => self.handle_post_command(command),
            Commands::Reconcile { max_age_ms } => {
                let max_age = max_age_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.config.ledger.reservation_ttl());
                let report = self.sweeper(max_age).sweep_once()?;
                Ok(match self.format {
                    OutputFormat::Json => format_reconcile_json(&report),
                    OutputFormat::Text => format_reconcile_text(&report),
                })
            }
            Commands::Config { command } => match command {
                ConfigCommands::Show => Ok(serde_json::to_string_pretty(&self.config.redacted())?),
                ConfigCommands::Path => Ok(global_config_path()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "(no config directory available)".to_string())),
            },
        }
    }

    fn handle_account_command(&self, command: &AccountCommands) -> Result<String> {
        let account = match command {
            AccountCommands::Open {
                account,
                plan,
                admin,
            } => {
                let role = if *admin { Role::Admin } else { Role::User };
                self.ledger
                    .open_account(&AccountId::new(account.clone()), role, plan.as_deref())?
            }
            AccountCommands::Show { account } => {
                self.ledger.account(&AccountId::new(account.clone()))?
            }
            AccountCommands::List => {
                let mut rows = Vec::new();
                for profile in self.ledger.accounts()? {
                    let account = self.ledger.account(&profile.account_id)?;
                    rows.push((profile, account));
                }
                return Ok(match self.format {
                    OutputFormat::Json => format_account_list_json(&rows),
                    OutputFormat::Text => format_account_list_text(&rows),
                });
            }
            AccountCommands::Grant {
                account,
                resource,
                amount,
                pack,
            } => {
                let account_id = AccountId::new(account.clone());
                match (pack, resource, amount) {
                    (Some(pack), _, _) => self.ledger.grant_addon(&account_id, pack)?,
                    (None, Some(resource), Some(amount)) => {
                        self.ledger.grant(&account_id, *resource, *amount)?;
                        let account = self.ledger.account(&account_id)?;
                        if self.format == OutputFormat::Text {
                            return Ok(format_grant_text(&account, *resource, *amount));
                        }
                        account
                    }
                    _ => bail!("Pass either --pack or both --resource and --amount"),
                }
            }
            AccountCommands::Plan { account, plan } => self
                .ledger
                .apply_plan(&AccountId::new(account.clone()), plan)?,
        };
        Ok(match self.format {
            OutputFormat::Json => format_account_json(&account),
            OutputFormat::Text => format_account_text(&account),
        })
    }

    fn handle_post_command(&self, command: &PostCommands) -> Result<String> {
        match command {
            PostCommands::List { status, account } => {
                let mut posts: Vec<StoredPost> = match (account, status) {
                    (Some(account), _) => self.posts.list_for_account(&AccountId::new(account.clone()))?,
                    (None, Some(status)) => self.posts.list_by_status(*status)?,
                    (None, None) => {
                        let mut all = self.posts.list_by_status(PostStatus::Pending)?;
                        all.extend(self.posts.list_by_status(PostStatus::Posted)?);
                        all
                    }
                };
                if let (Some(_), Some(status)) = (account, status) {
                    posts.retain(|post| post.record.status == *status);
                }
                posts.sort_by_key(|post| post.id);
                Ok(match self.format {
                    OutputFormat::Json => format_post_list_json(&posts),
                    OutputFormat::Text => format_post_list_text(&posts),
                })
            }
            PostCommands::Show { id } => {
                let id = PostId(*id);
                let record = self
                    .posts
                    .get(id)?
                    .ok_or_else(|| anyhow!("Post not found: {}", id))?;
                let post = StoredPost { id, record };
                Ok(match self.format {
                    OutputFormat::Json => serde_json::to_string_pretty(&post)?,
                    OutputFormat::Text => format_post_text(&post),
                })
            }
        }
    }

    /// Build the orchestrator. `dry_run` carries the prompt the scripted backends echo.
    fn orchestrator(&self, dry_run: Option<&str>) -> Result<Orchestrator> {
        let mut config: OrchestratorConfig = self.config.orchestrator.clone();
        let backends = match dry_run {
            Some(prompt) => {
                config.polling = PollingPolicy {
                    interval_ms: 100,
                    deadline_ms: 10_000,
                };
                dry_run_backends(prompt)
            }
            None => BackendRegistry::from_config(&self.config.backends)?,
        };
        let publisher = LocalPublisher::from_config(
            &self.config.publisher,
            &self.config.storage.media_path(),
        );
        Ok(Orchestrator::new(
            Arc::clone(&self.ledger),
            backends,
            Arc::new(publisher),
            Arc::clone(&self.posts),
            config,
        ))
    }

    fn sweeper(&self, max_age: Duration) -> ReservationSweeper {
        ReservationSweeper::new(
            Arc::clone(&self.ledger),
            self.config.ledger.sweep_interval(),
            max_age,
            self.config.ledger.retention(),
        )
    }

    /// Refund reservations left behind by a crashed process
    fn startup_sweep(&self) {
        match self.sweeper(self.config.ledger.reservation_ttl()).sweep_once() {
            Ok(report) if !report.refunded.is_empty() => {
                info!(refunded = report.refunded.len(), "Refunded stale reservations at startup");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Startup reconciliation failed"),
        }
    }
}

fn parse_param(param: &str) -> Result<(String, serde_json::Value)> {
    let (key, raw) = param
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid --param '{}': expected key=value", param))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid --param '{}': empty key", param);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn guess_mime_type(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime_type = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => return None,
    };
    Some(mime_type.to_string())
}

fn dry_run_backends(prompt: &str) -> BackendRegistry {
    let video = ScriptedBackend::new("dry-run-video", BackendShape::LongRunningVideo)
        .repeat(DispatchOutcome::Pending(OperationHandle::new("operations/dry-run")))
        .then_poll(Ok(OperationStatus::Running {
            progress: Some(0.5),
        }))
        .then_poll(Ok(OperationStatus::Done(Artifact::Locator {
            uri: "https://storage.googleapis.com/dry-run/video.mp4".to_string(),
            mime_type: Some("video/mp4".to_string()),
        })));

    BackendRegistry::new()
        .with(
            ResourceType::Text,
            Arc::new(ScriptedBackend::text(format!("[dry run] {}", prompt))),
        )
        .with(
            ResourceType::Image,
            Arc::new(ScriptedBackend::image(DRY_RUN_PNG.to_vec(), "image/png")),
        )
        .with(ResourceType::Video, Arc::new(video))
}
