//! Integration tests for configuration wiring

use mediamgr::backend::{BackendRegistry, BackendShape, GenerationBackend};
use mediamgr::config::{ConfigLoader, ConfigSources};
use mediamgr::error::ConfigError;
use mediamgr::ledger::{MemoryLedgerStore, QuotaLedger};
use mediamgr::publisher::LocalPublisher;
use mediamgr::types::{AccountId, ResourceType, Role};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
default_plan = "starter"

[storage]
in_memory = true

[ledger]
reservation_ttl_ms = 1200000

[orchestrator]
default_platforms = ["instagram", "threads"]

[orchestrator.polling]
interval_ms = 5000
deadline_ms = 240000

[publisher]
base_url = "https://cdn.example.com/media"
storage_bucket = "media-bucket"

[backends.text]
endpoint = "https://gen.example.com/v1"
model = "caption-large"

[backends.image]
endpoint = "https://gen.example.com/v1"
request_timeout_ms = 60000

[backends.video]
endpoint = "https://video.example.com/v1"
shape = "long_running_video"

[plans.starter]
text = 10
image = 3

[plans.pro]
text = 100
image = 30
video = 5

[addons.video-pack]
video = 10
"#;

fn sources(explicit: std::path::PathBuf, env: HashMap<String, String>) -> ConfigSources {
    ConfigSources {
        global: None,
        explicit: Some(explicit),
        env: Some(env),
    }
}

#[test]
fn test_full_config_wires_components() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, FULL_CONFIG).unwrap();

    let config = ConfigLoader::load_with(sources(path, HashMap::new())).unwrap();
    assert!(config.storage.in_memory);
    assert_eq!(config.orchestrator.polling.interval_ms, 5_000);
    assert_eq!(
        config.orchestrator.default_platforms,
        vec!["instagram".to_string(), "threads".to_string()]
    );
    assert_eq!(
        config.backends[&ResourceType::Video].shape,
        Some(BackendShape::LongRunningVideo)
    );
    assert_eq!(config.dispatch_timeout().as_millis(), 120_000);

    let registry = BackendRegistry::from_config(&config.backends).unwrap();
    assert_eq!(
        registry.resources(),
        vec![ResourceType::Text, ResourceType::Image, ResourceType::Video]
    );
    assert!(registry
        .get(ResourceType::Video)
        .unwrap()
        .shape()
        .is_long_running());

    let ledger = QuotaLedger::with_catalog(Arc::new(MemoryLedgerStore::new()), config.catalog());
    let account_id = AccountId::new("alice");
    let account = ledger.open_account(&account_id, Role::User, None).unwrap();
    assert_eq!(account.plan, "starter");
    assert_eq!(account.balance(ResourceType::Text), 10);
    assert_eq!(account.balance(ResourceType::Video), 0);

    let account = ledger.grant_addon(&account_id, "video-pack").unwrap();
    assert_eq!(account.balance(ResourceType::Video), 10);

    let publisher = LocalPublisher::from_config(&config.publisher, temp_dir.path());
    assert_eq!(
        publisher
            .rewrite_locator("gs://media-bucket/videos/clip.mp4")
            .unwrap(),
        "https://storage.googleapis.com/media-bucket/videos/clip.mp4"
    );
    assert!(publisher.rewrite_locator("gs://other-bucket/clip.mp4").is_err());
}

#[test]
fn test_env_overrides_reach_validation() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, FULL_CONFIG).unwrap();

    let mut env = HashMap::new();
    env.insert(
        "MEDIAMGR__LEDGER__RESERVATION_TTL_MS".to_string(),
        "60000".to_string(),
    );

    match ConfigLoader::load_with(sources(path, env)) {
        Err(ConfigError::Invalid(msg)) => {
            assert!(msg.contains("reservation_ttl_ms"));
            assert!(msg.contains("worst-case"));
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[test]
fn test_global_file_fills_gaps() {
    let temp_dir = TempDir::new().unwrap();
    let global = temp_dir.path().join("global.toml");
    let explicit = temp_dir.path().join("explicit.toml");
    std::fs::write(
        &global,
        r#"
[publisher]
base_url = "https://global.example.com/media"

[backends.image]
endpoint = "https://global.example.com/v1"
"#,
    )
    .unwrap();
    std::fs::write(&explicit, "[publisher]\nsigning_secret = \"s3cret\"\n").unwrap();

    let config = ConfigLoader::load_with(ConfigSources {
        global: Some(global),
        explicit: Some(explicit),
        env: Some(HashMap::new()),
    })
    .unwrap();

    assert_eq!(config.publisher.base_url, "https://global.example.com/media");
    assert_eq!(config.publisher.signing_secret.as_deref(), Some("s3cret"));
    assert_eq!(
        config.backends[&ResourceType::Image].endpoint,
        "https://global.example.com/v1"
    );
}

#[test]
fn test_bad_backend_and_unknown_plan_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
default_plan = "missing"

[backends.image]
endpoint = "ftp://gen.example.com"
"#,
    )
    .unwrap();

    match ConfigLoader::load_from_file(&path) {
        Err(ConfigError::Invalid(msg)) => {
            assert!(msg.contains("Backend 'image'"));
            assert!(msg.contains("Catalog"));
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[test]
fn test_missing_api_key_fails_registry_build() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[backends.text]
endpoint = "https://gen.example.com/v1"
api_key_env = "MEDIAMGR_TEST_KEY_THAT_IS_NEVER_SET"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&path).unwrap();
    assert!(BackendRegistry::from_config(&config.backends).is_err());
}
