//! Deployment reconciler
//!
//! Drives one reconciliation run: probe, decide, register, apply, patch
//! network rules, wait. The run is strictly sequential; each remote call
//! completes before the next one starts.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, Instrument};

use crate::deploy::applier::{Applier, ServicePlan};
use crate::deploy::fsm::{ReconcileEvent, ReconcileFsm};
use crate::deploy::network::{NetworkPatchOptions, NetworkPatcher};
use crate::deploy::probe::Prober;
use crate::deploy::waiter::{Convergence, ConvergenceWaiter, WaiterOptions};
use crate::errors::ReconcileError;
use crate::models::result::{FinalStatus, PatchOutcome, ReconciliationResult, TrailEntry};
use crate::models::spec::DeploymentSpec;
use crate::plane::ControlPlane;
use crate::utils::{generate_uuid, RetryOptions};

/// Reconciler settings
#[derive(Debug, Clone, Default)]
pub struct ReconcilerOptions {
    /// Retry policy for reads
    pub retry: RetryOptions,

    /// Convergence wait settings
    pub waiter: WaiterOptions,

    /// Logging endpoint ingress settings
    pub network: NetworkPatchOptions,
}

/// Phase tracking plus the progress trail shown to the operator
struct Progress {
    fsm: ReconcileFsm,
    trail: Vec<TrailEntry>,
}

impl Progress {
    fn new() -> Self {
        Self {
            fsm: ReconcileFsm::new(),
            trail: Vec::new(),
        }
    }

    fn advance(&mut self, event: ReconcileEvent, message: String) -> Result<(), ReconcileError> {
        let phase = self
            .fsm
            .process(event)
            .map_err(ReconcileError::Internal)?;
        info!("[{:?}] {}", phase, message);
        self.trail.push(TrailEntry {
            phase,
            message,
            at: Utc::now(),
        });
        Ok(())
    }
}

/// Converges one service onto a [`DeploymentSpec`]
pub struct Reconciler {
    plane: Arc<dyn ControlPlane>,
    options: ReconcilerOptions,
}

impl Reconciler {
    pub fn new(plane: Arc<dyn ControlPlane>, options: ReconcilerOptions) -> Self {
        Self { plane, options }
    }

    /// Run one reconciliation.
    ///
    /// Configuration and conflict errors abort before anything is mutated.
    /// A convergence timeout is reported through
    /// [`FinalStatus::TimedOut`], not as an error.
    pub async fn reconcile(
        &self,
        spec: &DeploymentSpec,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let run_id = generate_uuid();
        let span = tracing::info_span!(
            "reconcile",
            run_id = %run_id,
            service = %spec.service_name()
        );

        async {
            let mut progress = Progress::new();
            let result = self.run(spec, &run_id, &mut progress).await;
            if let Err(e) = &result {
                error!("Reconciliation of {} failed: {}", spec.service_name(), e);
                // A failed transition after an error cannot itself fail
                let _ = progress.fsm.process(ReconcileEvent::Fail(e.to_string()));
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        spec: &DeploymentSpec,
        run_id: &str,
        progress: &mut Progress,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let started_at = Utc::now();
        let plane = self.plane.as_ref();
        let prober = Prober::new(plane, self.options.retry.clone());
        let applier = Applier::new(plane);

        // Probe and decide before any mutation
        prober.probe_cluster(spec.cluster_name()).await?;
        let previous = prober.probe_task_definition(spec.task_family()).await?;
        let probe = prober
            .probe_service(spec.cluster_name(), spec.service_name())
            .await?;
        let plan = ServicePlan::decide(spec, &probe)?;
        progress.advance(
            ReconcileEvent::Validate,
            format!(
                "validated {} ({}, {} cpu / {} MiB, {}), service will be {:?}",
                spec.service_name(),
                spec.image(),
                spec.cpu(),
                spec.memory(),
                spec.architecture(),
                plan.action()
            ),
        )?;

        let task_definition = applier.register(spec, run_id, previous.as_ref()).await?;
        progress.advance(
            ReconcileEvent::Register,
            format!("registered revision {}", task_definition),
        )?;

        let service = applier.apply(spec, plan, &task_definition).await?;
        progress.advance(
            ReconcileEvent::Apply,
            format!(
                "service {} {:?} in {} (desired {})",
                service.name,
                plan.action(),
                service.cluster,
                service.desired_count
            ),
        )?;

        let patcher = NetworkPatcher::new(plane, &prober, self.options.network.clone());
        let network_patch = patcher.patch(spec).await;
        progress.advance(ReconcileEvent::Patch, describe_patch(&network_patch))?;

        progress.advance(
            ReconcileEvent::Wait,
            format!(
                "waiting up to {:?} for convergence",
                self.options.waiter.timeout
            ),
        )?;
        let waiter = ConvergenceWaiter::new(&prober, self.options.waiter.clone());
        let convergence = waiter
            .wait(spec.cluster_name(), spec.service_name())
            .await?;

        let (running_count, desired_count) = convergence.counts();
        let (final_status, failure_reason) = match convergence {
            Convergence::Stable { .. } => {
                progress.advance(
                    ReconcileEvent::Converge,
                    format!("stable with {}/{} tasks running", running_count, desired_count),
                )?;
                (FinalStatus::Stable, None)
            }
            Convergence::TimedOut { .. } => {
                progress.advance(
                    ReconcileEvent::Timeout,
                    format!(
                        "not stable yet ({}/{} tasks running); rollout continues remotely",
                        running_count, desired_count
                    ),
                )?;
                (FinalStatus::TimedOut, None)
            }
            Convergence::Failed { reason, .. } => {
                progress.advance(
                    ReconcileEvent::Fail(reason.clone()),
                    format!("rollout failed: {}", reason),
                )?;
                (FinalStatus::Failed, Some(reason))
            }
        };

        Ok(ReconciliationResult {
            run_id: run_id.to_string(),
            service_name: spec.service_name().to_string(),
            cluster_name: spec.cluster_name().to_string(),
            task_definition,
            service_action: plan.action(),
            final_status,
            running_count,
            desired_count,
            network_patch,
            failure_reason,
            trail: std::mem::take(&mut progress.trail),
            started_at,
            finished_at: Utc::now(),
        })
    }
}

fn describe_patch(outcome: &PatchOutcome) -> String {
    match outcome {
        PatchOutcome::Authorized => "logging endpoint ingress authorized".to_string(),
        PatchOutcome::AlreadyPresent => "logging endpoint ingress already present".to_string(),
        PatchOutcome::Skipped(reason) => format!("logging endpoint ingress skipped: {}", reason),
        PatchOutcome::Degraded(reason) => {
            format!("logging endpoint ingress degraded: {}", reason)
        }
    }
}
