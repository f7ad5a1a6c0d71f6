//! mediamgr: Quota-Gated Media Generation
//!
//! Per-account credit ledger with reserve/commit/refund, and a generation job
//! orchestrator that retries transient backend failures, polls long-running
//! operations against a deadline, and resolves every reservation exactly once.

pub mod backend;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod posts;
pub mod publisher;
pub mod types;
