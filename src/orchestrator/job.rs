//! Generation job state machine

use crate::backend::OperationHandle;
use crate::types::{JobId, ResourceType};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Dispatched,
    Retrying,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut
        )
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Created, Dispatched)
                | (Dispatched, Succeeded)
                | (Dispatched, Retrying)
                | (Dispatched, Polling)
                | (Dispatched, Failed)
                | (Retrying, Dispatched)
                | (Polling, Polling)
                | (Polling, Succeeded)
                | (Polling, Failed)
                | (Polling, TimedOut)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Created => "created",
            JobState::Dispatched => "dispatched",
            JobState::Retrying => "retrying",
            JobState::Polling => "polling",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// In-process record of one generation, discarded once reported
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub id: JobId,
    pub resource: ResourceType,
    pub state: JobState,
    /// Dispatches issued so far
    pub attempts: u32,
    pub operation: Option<OperationHandle>,
    /// Polling deadline of the current operation
    pub deadline: Option<Instant>,
    pub created_at: Instant,
}

impl GenerationJob {
    pub fn new(id: JobId, resource: ResourceType) -> Self {
        Self {
            id,
            resource,
            state: JobState::Created,
            attempts: 0,
            operation: None,
            deadline: None,
            created_at: Instant::now(),
        }
    }

    pub fn advance(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_advance(next),
            "illegal job transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(job_id = %self.id, from = %self.state, to = %next, "Job transition");
        self.state = next;
    }
}
