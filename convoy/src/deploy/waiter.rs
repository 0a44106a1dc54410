//! Convergence waiter

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::deploy::probe::{Prober, ServiceProbe};
use crate::errors::ReconcileError;
use crate::models::plane::ServiceDescription;

/// Convergence wait settings
#[derive(Debug, Clone)]
pub struct WaiterOptions {
    /// Give up after this long; the rollout may still finish remotely
    pub timeout: Duration,

    /// Delay between service polls
    pub poll_interval: Duration,
}

impl Default for WaiterOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(15),
        }
    }
}

/// How the wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    Stable { running: u32, desired: u32 },
    TimedOut { running: u32, desired: u32 },
    Failed { reason: String, running: u32, desired: u32 },
}

impl Convergence {
    pub fn counts(&self) -> (u32, u32) {
        match self {
            Convergence::Stable { running, desired }
            | Convergence::TimedOut { running, desired }
            | Convergence::Failed { running, desired, .. } => (*running, *desired),
        }
    }
}

/// Polls the service until it settles, fails, or the deadline passes
pub struct ConvergenceWaiter<'a> {
    prober: &'a Prober<'a>,
    options: WaiterOptions,
}

impl<'a> ConvergenceWaiter<'a> {
    pub fn new(prober: &'a Prober<'a>, options: WaiterOptions) -> Self {
        Self { prober, options }
    }

    /// Wait for the service to become stable
    pub async fn wait(&self, cluster: &str, name: &str) -> Result<Convergence, ReconcileError> {
        let deadline = Instant::now() + self.options.timeout;
        let (mut running, mut desired) = (0, 0);
        let mut polls = 0u32;

        info!(
            "Waiting up to {:?} for {} to stabilize",
            self.options.timeout, name
        );

        loop {
            polls += 1;
            match self.prober.probe_service(cluster, name).await {
                Ok(ServiceProbe::Active(service)) => {
                    running = service.running_count;
                    desired = service.desired_count;
                    debug!(
                        "Poll {}: running={} desired={} pending={} deployments={}",
                        polls,
                        running,
                        desired,
                        service.pending_count,
                        service.deployments.len()
                    );

                    if let Some(failed) = service.failed_deployment() {
                        let reason = failed.rollout_state_reason.clone().unwrap_or_else(|| {
                            format!("deployment {} was rolled back", failed.id)
                        });
                        return Ok(Convergence::Failed {
                            reason,
                            running,
                            desired,
                        });
                    }

                    if is_settled(&service) && self.targets_healthy(&service).await? {
                        info!("Service {} is stable after {} polls", name, polls);
                        return Ok(Convergence::Stable { running, desired });
                    }
                }
                Ok(ServiceProbe::Absent) => {
                    return Ok(Convergence::Failed {
                        reason: format!("service '{}' disappeared during rollout", name),
                        running,
                        desired,
                    });
                }
                Ok(ServiceProbe::OtherStatus(status)) => {
                    return Ok(Convergence::Failed {
                        reason: format!("service '{}' became {} during rollout", name, status),
                        running,
                        desired,
                    });
                }
                Err(e) if e.is_retryable() => {
                    warn!("Service poll failed, will poll again: {}", e);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Timed out after {:?} waiting for {} (running={} desired={})",
                    self.options.timeout, name, running, desired
                );
                return Ok(Convergence::TimedOut { running, desired });
            }
            tokio::time::sleep(self.options.poll_interval.min(deadline - now)).await;
        }
    }

    async fn targets_healthy(&self, service: &ServiceDescription) -> Result<bool, ReconcileError> {
        if service.desired_count == 0 {
            return Ok(true);
        }
        for lb in &service.load_balancers {
            let targets = match self.prober.probe_target_health(&lb.target_group_ref).await {
                Ok(targets) => targets,
                Err(e) if e.is_retryable() => {
                    warn!("Target health poll failed, will poll again: {}", e);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            let healthy = targets.iter().filter(|t| t.is_healthy()).count();
            if targets.is_empty() || healthy < targets.len() {
                debug!(
                    "Target group {}: {}/{} targets healthy",
                    lb.target_group_ref,
                    healthy,
                    targets.len()
                );
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// All tasks running and no older deployment still draining
fn is_settled(service: &ServiceDescription) -> bool {
    service.running_count == service.desired_count && service.deployments.len() <= 1
}
