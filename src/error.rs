//! Error types for quota-gated media generation.

use crate::orchestrator::GeneratedContent;
use crate::types::{AccountId, JobId, ReservationId, ResourceType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Failed to encode record: {0}")]
    Encode(String),

    #[error("Failed to decode record: {0}")]
    Decode(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Quota ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient {resource} credits for account {account_id}")]
    InsufficientCredits {
        account_id: AccountId,
        resource: ResourceType,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Account already exists: {0}")]
    AccountExists(AccountId),

    #[error("Reservation {id} is {state}, expected reserved")]
    InvalidReservationState {
        id: ReservationId,
        state: String,
    },

    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    #[error("Invalid credit amount: {0}")]
    InvalidAmount(i64),

    #[error("Ledger storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Failure class reported by a generation backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    TransientRateLimited,
    TransientUnavailable,
    InvalidInput,
    Permanent,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorClass::TransientRateLimited | ErrorClass::TransientUnavailable
        )
    }
}

/// Backend call errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Backend temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Backend rejected input: {0}")]
    InvalidInput(String),

    #[error("Backend failed: {0}")]
    Permanent(String),
}

impl BackendError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::RateLimited(_) => ErrorClass::TransientRateLimited,
            BackendError::Unavailable(_) => ErrorClass::TransientUnavailable,
            BackendError::InvalidInput(_) => ErrorClass::InvalidInput,
            BackendError::Permanent(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class().is_transient()
    }
}

/// Artifact publishing errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Nothing to publish: {0}")]
    NothingToPublish(String),

    #[error("Unexpected locator format: {0}")]
    UnsupportedLocator(String),

    #[error("Publish I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Configuration validation failed:\n{0}")]
    Invalid(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

/// What happened to the reserved credit when a request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditState {
    /// No credit was reserved
    NotCharged,
    /// The reserved credit was returned
    Refunded,
    /// The credit was kept; the generation itself succeeded
    Charged,
    /// The refund could not be applied; the reservation sweep will return it
    RefundPending,
}

impl fmt::Display for CreditState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreditState::NotCharged => f.write_str("not charged"),
            CreditState::Refunded => f.write_str("refunded"),
            CreditState::Charged => f.write_str("charged"),
            CreditState::RefundPending => f.write_str("refund pending"),
        }
    }
}

/// Stable error categories at the caller boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientCredits,
    InvalidInput,
    BackendFailed,
    BackendTimedOut,
    PublishFailed,
    RecordingFailed,
    Ledger,
}

/// Caller-facing generation error. Every variant states the credit outcome.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Insufficient {resource} credits for account {account_id} (credit not charged)")]
    InsufficientCredits {
        account_id: AccountId,
        resource: ResourceType,
    },

    #[error("Invalid input: {message} (credit {credit})")]
    InvalidInput { message: String, credit: CreditState },

    #[error("Generation failed after {attempts} attempt(s): {message} (credit {credit})")]
    BackendFailed {
        job_id: JobId,
        message: String,
        attempts: u32,
        exhausted_transient: bool,
        credit: CreditState,
    },

    #[error("Generation timed out after {elapsed:?}; remote operation {operation} may still finish (credit {credit})")]
    BackendTimedOut {
        job_id: JobId,
        operation: String,
        elapsed: Duration,
        credit: CreditState,
    },

    #[error("Publishing failed for job {job_id}: {message} (credit {credit})")]
    PublishFailed {
        job_id: JobId,
        message: String,
        credit: CreditState,
    },

    #[error("Recording the post failed for job {job_id}: {message} (credit {credit})")]
    RecordingFailed {
        job_id: JobId,
        message: String,
        content: Box<GeneratedContent>,
        credit: CreditState,
    },

    #[error("Ledger unavailable: {0} (credit not charged)")]
    Ledger(LedgerError),
}

impl GenerateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerateError::InsufficientCredits { .. } => ErrorKind::InsufficientCredits,
            GenerateError::InvalidInput { .. } => ErrorKind::InvalidInput,
            GenerateError::BackendFailed { .. } => ErrorKind::BackendFailed,
            GenerateError::BackendTimedOut { .. } => ErrorKind::BackendTimedOut,
            GenerateError::PublishFailed { .. } => ErrorKind::PublishFailed,
            GenerateError::RecordingFailed { .. } => ErrorKind::RecordingFailed,
            GenerateError::Ledger(_) => ErrorKind::Ledger,
        }
    }

    pub fn credit_state(&self) -> CreditState {
        match self {
            GenerateError::InsufficientCredits { .. } | GenerateError::Ledger(_) => {
                CreditState::NotCharged
            }
            GenerateError::InvalidInput { credit, .. }
            | GenerateError::BackendFailed { credit, .. }
            | GenerateError::BackendTimedOut { credit, .. }
            | GenerateError::PublishFailed { credit, .. }
            | GenerateError::RecordingFailed { credit, .. } => *credit,
        }
    }

    /// Whether submitting the same request again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerateError::BackendTimedOut { .. } => true,
            GenerateError::BackendFailed {
                exhausted_transient,
                ..
            } => *exhausted_transient,
            GenerateError::Ledger(LedgerError::Storage(_)) => true,
            _ => false,
        }
    }

    /// Map a ledger failure on the admission path
    pub(crate) fn from_admission(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits {
                account_id,
                resource,
            } => GenerateError::InsufficientCredits {
                account_id,
                resource,
            },
            LedgerError::AccountNotFound(account_id) => GenerateError::InvalidInput {
                message: format!("Account not found: {}", account_id),
                credit: CreditState::NotCharged,
            },
            other => GenerateError::Ledger(other),
        }
    }
}
