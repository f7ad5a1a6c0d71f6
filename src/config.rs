//! Configuration System
//!
//! Layered application configuration: serde defaults, then the user config file
//! (`$XDG_CONFIG_HOME/mediamgr/config.toml`), then an explicit file, then
//! `MEDIAMGR__SECTION__KEY` environment variables.

use crate::backend::HttpBackendConfig;
use crate::ledger::catalog::{default_addons, default_plan_name, default_plans};
use crate::ledger::{CreditAllocation, CreditCatalog};
use crate::logging::LoggingConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::publisher::PublisherConfig;
use crate::types::ResourceType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

mod loader;
mod sources;

pub use loader::{ConfigLoader, ConfigSources};
pub use sources::global_file::global_config_path;

/// Where state lives on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory; platform data dir when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Keep ledger and posts in memory only
    #[serde(default)]
    pub in_memory: bool,
}

impl StorageConfig {
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "mediamgr")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".mediamgr"))
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_data_dir().join("db")
    }

    pub fn media_path(&self) -> PathBuf {
        self.resolve_data_dir().join("media")
    }
}

/// Reservation reconciliation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Reservations older than this are force-refunded by the sweep
    #[serde(default = "default_reservation_ttl_ms")]
    pub reservation_ttl_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Resolved reservation records are kept this long
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
}

fn default_reservation_ttl_ms() -> u64 {
    15 * 60 * 1000
}

fn default_sweep_interval_ms() -> u64 {
    60 * 1000
}

fn default_retention_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_ms: default_reservation_ttl_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            retention_ms: default_retention_ms(),
        }
    }
}

impl LedgerConfig {
    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_millis(self.reservation_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,

    /// HTTP backends keyed by resource type
    #[serde(default)]
    pub backends: BTreeMap<ResourceType, HttpBackendConfig>,

    /// Plan assigned to newly opened accounts
    #[serde(default = "default_plan_name")]
    pub default_plan: String,

    #[serde(default = "default_plans")]
    pub plans: BTreeMap<String, CreditAllocation>,

    #[serde(default = "default_addons")]
    pub addons: BTreeMap<String, CreditAllocation>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            ledger: LedgerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            publisher: PublisherConfig::default(),
            backends: BTreeMap::new(),
            default_plan: default_plan_name(),
            plans: default_plans(),
            addons: default_addons(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Ledger(String),
    Orchestrator(String),
    Backend(ResourceType, String),
    Publisher(String),
    Catalog(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Ledger(msg) => write!(f, "Ledger: {}", msg),
            ValidationError::Orchestrator(msg) => write!(f, "Orchestrator: {}", msg),
            ValidationError::Backend(resource, msg) => write!(f, "Backend '{}': {}", resource, msg),
            ValidationError::Publisher(msg) => write!(f, "Publisher: {}", msg),
            ValidationError::Catalog(msg) => write!(f, "Catalog: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl AppConfig {
    pub fn catalog(&self) -> CreditCatalog {
        CreditCatalog {
            default_plan: self.default_plan.clone(),
            plans: self.plans.clone(),
            addons: self.addons.clone(),
        }
    }

    /// Longest single backend request any configured backend allows
    pub fn dispatch_timeout(&self) -> Duration {
        let longest = self
            .backends
            .values()
            .map(|backend| backend.request_timeout_ms)
            .max()
            .unwrap_or(120_000);
        Duration::from_millis(longest)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let orchestrator = &self.orchestrator;

        if orchestrator.retry.max_attempts == 0 {
            errors.push(ValidationError::Orchestrator(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if orchestrator.retry.floor_ms > orchestrator.retry.ceiling_ms {
            errors.push(ValidationError::Orchestrator(format!(
                "retry.floor_ms ({}) exceeds retry.ceiling_ms ({})",
                orchestrator.retry.floor_ms, orchestrator.retry.ceiling_ms
            )));
        }
        if orchestrator.polling.interval_ms == 0 {
            errors.push(ValidationError::Orchestrator(
                "polling.interval_ms must be positive".to_string(),
            ));
        }
        if orchestrator.polling.deadline_ms < orchestrator.polling.interval_ms {
            errors.push(ValidationError::Orchestrator(
                "polling.deadline_ms is shorter than polling.interval_ms".to_string(),
            ));
        }
        if orchestrator.max_prompt_chars == 0 {
            errors.push(ValidationError::Orchestrator(
                "max_prompt_chars must be positive".to_string(),
            ));
        }

        // A sweep must never refund a reservation a live job still holds
        let worst_case = orchestrator.worst_case_job_duration(self.dispatch_timeout());
        if self.ledger.reservation_ttl() <= worst_case {
            errors.push(ValidationError::Ledger(format!(
                "reservation_ttl_ms ({}) must exceed the worst-case job duration ({} ms)",
                self.ledger.reservation_ttl_ms,
                worst_case.as_millis()
            )));
        }
        if self.ledger.sweep_interval_ms == 0 {
            errors.push(ValidationError::Ledger(
                "sweep_interval_ms must be positive".to_string(),
            ));
        }

        for (resource, backend) in &self.backends {
            if !backend.endpoint.starts_with("http://") && !backend.endpoint.starts_with("https://") {
                errors.push(ValidationError::Backend(
                    *resource,
                    format!("endpoint must be an http(s) URL, got '{}'", backend.endpoint),
                ));
            }
            if backend.request_timeout_ms == 0 {
                errors.push(ValidationError::Backend(
                    *resource,
                    "request_timeout_ms must be positive".to_string(),
                ));
            }
        }

        if self.publisher.base_url.trim().is_empty() {
            errors.push(ValidationError::Publisher("base_url cannot be empty".to_string()));
        }
        if self.publisher.signing_secret.is_some() && self.publisher.signed_url_ttl_secs == 0 {
            errors.push(ValidationError::Publisher(
                "signed_url_ttl_secs must be positive when signing is enabled".to_string(),
            ));
        }

        if let Err(e) = self.catalog().validate() {
            errors.push(ValidationError::Catalog(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Copy safe to print or log, with secrets masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.publisher.signing_secret.is_some() {
            config.publisher.signing_secret = Some(REDACTED.to_string());
        }
        config
    }
}

const REDACTED: &str = "***";
