//! Reconciliation outcome models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::ReconcilePhase;
use crate::models::plane::TaskDefinitionRef;

/// What the applier did to the service object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Created,
    Updated,
}

/// Terminal status observed by the convergence waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Stable,
    TimedOut,
    Failed,
}

impl FinalStatus {
    /// `TimedOut` counts as success: the rollout may still converge remotely.
    pub fn exit_code(&self) -> i32 {
        match self {
            FinalStatus::Stable | FinalStatus::TimedOut => 0,
            FinalStatus::Failed => 1,
        }
    }
}

/// Result of ensuring the logging endpoint accepts traffic from the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PatchOutcome {
    Authorized,
    AlreadyPresent,
    Skipped(String),
    Degraded(String),
}

impl PatchOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, PatchOutcome::Degraded(_))
    }
}

/// One step of the progress trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailEntry {
    pub phase: ReconcilePhase,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Output of one reconciliation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub run_id: String,
    pub service_name: String,
    pub cluster_name: String,
    pub task_definition: TaskDefinitionRef,
    pub service_action: ServiceAction,
    pub final_status: FinalStatus,
    pub running_count: u32,
    pub desired_count: u32,
    pub network_patch: PatchOutcome,
    pub failure_reason: Option<String>,
    pub trail: Vec<TrailEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconciliationResult {
    pub fn exit_code(&self) -> i32 {
        self.final_status.exit_code()
    }
}
