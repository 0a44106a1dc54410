//! Actual-state prober
//!
//! Reads remote state. Every read is retried with bounded exponential
//! backoff when the control plane reports a transient failure; absence of
//! an object is a normal outcome, never an error.

use std::future::Future;

use tracing::{debug, warn};

use crate::errors::ReconcileError;
use crate::models::plane::{
    ClusterDescription, IngressRule, ServiceDescription, TargetHealth, TaskDefinitionRef,
    VpcEndpoint,
};
use crate::plane::ControlPlane;
use crate::utils::{calc_exp_backoff, RetryOptions};

/// Observed state of the target service
#[derive(Debug, Clone)]
pub enum ServiceProbe {
    Absent,
    /// Exists and can be reconciled
    Active(ServiceDescription),
    /// Exists in a transitional or terminal status such as `DRAINING`
    OtherStatus(String),
}

impl ServiceProbe {
    pub fn from_description(description: Option<ServiceDescription>) -> Self {
        match description {
            None => ServiceProbe::Absent,
            Some(service) if service.is_active() => ServiceProbe::Active(service),
            Some(service) if service.status.eq_ignore_ascii_case("INACTIVE") => {
                // Deleted services linger as INACTIVE and can be recreated
                ServiceProbe::Absent
            }
            Some(service) => ServiceProbe::OtherStatus(service.status),
        }
    }
}

/// Reads remote state through a [`ControlPlane`]
pub struct Prober<'a> {
    plane: &'a dyn ControlPlane,
    retry: RetryOptions,
}

impl<'a> Prober<'a> {
    pub fn new(plane: &'a dyn ControlPlane, retry: RetryOptions) -> Self {
        Self { plane, retry }
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T, ReconcileError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ReconcileError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.retry.attempts => {
                    let delay = calc_exp_backoff(&self.retry, attempt);
                    warn!("{} failed: {}; retrying in {:?}", what, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The cluster must exist and be ACTIVE
    pub async fn probe_cluster(&self, name: &str) -> Result<ClusterDescription, ReconcileError> {
        let cluster = self
            .with_retry("describe_cluster", || self.plane.describe_cluster(name))
            .await?;

        match cluster {
            None => Err(ReconcileError::Configuration(format!(
                "cluster '{}' does not exist",
                name
            ))),
            Some(cluster) if cluster.status.eq_ignore_ascii_case("ACTIVE") => Ok(cluster),
            Some(cluster) => Err(ReconcileError::Conflict(format!(
                "cluster '{}' is {}",
                name, cluster.status
            ))),
        }
    }

    /// Latest registered revision of a family, if any
    pub async fn probe_task_definition(
        &self,
        family: &str,
    ) -> Result<Option<TaskDefinitionRef>, ReconcileError> {
        let latest = self
            .with_retry("describe_task_definition", || {
                self.plane.describe_task_definition(family)
            })
            .await?;
        debug!(
            "Latest revision of {}: {}",
            family,
            latest
                .as_ref()
                .map(|r| r.revision.to_string())
                .unwrap_or_else(|| "absent".to_string())
        );
        Ok(latest)
    }

    pub async fn probe_service(
        &self,
        cluster: &str,
        name: &str,
    ) -> Result<ServiceProbe, ReconcileError> {
        let description = self
            .with_retry("describe_service", || self.plane.describe_service(cluster, name))
            .await?;
        Ok(ServiceProbe::from_description(description))
    }

    pub async fn probe_vpc_endpoint(
        &self,
        vpc: &str,
        service_name: &str,
    ) -> Result<Option<VpcEndpoint>, ReconcileError> {
        self.with_retry("describe_vpc_endpoint", || {
            self.plane.describe_vpc_endpoint(vpc, service_name)
        })
        .await
    }

    pub async fn probe_ingress_rules(
        &self,
        security_group: &str,
    ) -> Result<Vec<IngressRule>, ReconcileError> {
        self.with_retry("describe_ingress_rules", || {
            self.plane.describe_ingress_rules(security_group)
        })
        .await
    }

    pub async fn probe_target_health(
        &self,
        target_group_ref: &str,
    ) -> Result<Vec<TargetHealth>, ReconcileError> {
        self.with_retry("describe_target_health", || {
            self.plane.describe_target_health(target_group_ref)
        })
        .await
    }
}
