//! Finite state machine for a reconciliation run

use serde::{Deserialize, Serialize};

/// Reconciliation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    /// Nothing done yet
    Pending,

    /// Desired state validated and remote preconditions probed
    Validated,

    /// New task definition revision registered
    Registered,

    /// Service created or updated
    Applied,

    /// Auxiliary network rules handled
    Patched,

    /// Waiting for the service to settle
    Converging,

    /// Running count matches desired count
    Stable,

    /// Gave up waiting; the rollout may still finish
    TimedOut,

    /// Reconciliation aborted or rollout rolled back
    Failed,
}

impl ReconcilePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconcilePhase::Stable | ReconcilePhase::TimedOut | ReconcilePhase::Failed
        )
    }
}

/// Reconciliation event
#[derive(Debug, Clone)]
pub enum ReconcileEvent {
    /// Inputs validated and remote state probed
    Validate,

    /// Revision registered
    Register,

    /// Service create or update accepted
    Apply,

    /// Network patch step finished (whatever its outcome)
    Patch,

    /// Convergence wait started
    Wait,

    /// Service converged
    Converge,

    /// Deadline reached before convergence
    Timeout,

    /// Unrecoverable error or rollback
    Fail(String),
}

/// Reconciliation FSM
#[derive(Debug, Clone)]
pub struct ReconcileFsm {
    phase: ReconcilePhase,
    error: Option<String>,
}

impl ReconcileFsm {
    /// Create a new FSM in pending phase
    pub fn new() -> Self {
        Self {
            phase: ReconcilePhase::Pending,
            error: None,
        }
    }

    /// Get current phase
    pub fn phase(&self) -> ReconcilePhase {
        self.phase
    }

    /// Get failure reason if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition phase
    pub fn process(&mut self, event: ReconcileEvent) -> Result<ReconcilePhase, String> {
        let next = match (self.phase, &event) {
            (ReconcilePhase::Pending, ReconcileEvent::Validate) => ReconcilePhase::Validated,
            (ReconcilePhase::Validated, ReconcileEvent::Register) => ReconcilePhase::Registered,
            (ReconcilePhase::Registered, ReconcileEvent::Apply) => ReconcilePhase::Applied,
            (ReconcilePhase::Applied, ReconcileEvent::Patch) => ReconcilePhase::Patched,
            (ReconcilePhase::Patched, ReconcileEvent::Wait) => ReconcilePhase::Converging,
            (ReconcilePhase::Converging, ReconcileEvent::Converge) => ReconcilePhase::Stable,
            (ReconcilePhase::Converging, ReconcileEvent::Timeout) => ReconcilePhase::TimedOut,

            (phase, ReconcileEvent::Fail(reason)) if !phase.is_terminal() => {
                self.error = Some(reason.clone());
                ReconcilePhase::Failed
            }

            (phase, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", phase, event));
            }
        };

        self.phase = next;
        Ok(next)
    }
}

impl Default for ReconcileFsm {
    fn default() -> Self {
        Self::new()
    }
}
