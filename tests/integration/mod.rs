//! Integration tests for quota-gated media generation

mod config_integration;
mod job_isolation;
mod ledger_concurrency;
mod orchestrator_flow;
mod polling_deadline;
