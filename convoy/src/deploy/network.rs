//! Network-rule patcher
//!
//! Lets the service's security group reach the managed logging endpoint.
//! This step never fails the reconciliation: by the time it runs the
//! service already points at the new revision, so problems here only
//! degrade log delivery.

use tracing::{info, warn};

use crate::deploy::probe::Prober;
use crate::errors::ReconcileError;
use crate::models::plane::{IngressOutcome, IngressRule};
use crate::models::result::PatchOutcome;
use crate::models::spec::DeploymentSpec;
use crate::plane::ControlPlane;

/// Network patch settings
#[derive(Debug, Clone)]
pub struct NetworkPatchOptions {
    /// Service name of the logging VPC endpoint
    pub logging_endpoint_service: String,

    /// Port the endpoint listens on
    pub ingress_port: u16,
}

impl Default for NetworkPatchOptions {
    fn default() -> Self {
        Self {
            logging_endpoint_service: "logs".to_string(),
            ingress_port: 443,
        }
    }
}

pub struct NetworkPatcher<'a> {
    plane: &'a dyn ControlPlane,
    prober: &'a Prober<'a>,
    options: NetworkPatchOptions,
}

impl<'a> NetworkPatcher<'a> {
    pub fn new(
        plane: &'a dyn ControlPlane,
        prober: &'a Prober<'a>,
        options: NetworkPatchOptions,
    ) -> Self {
        Self {
            plane,
            prober,
            options,
        }
    }

    /// Ensure the ingress rule exists. Errors are folded into the outcome.
    pub async fn patch(&self, spec: &DeploymentSpec) -> PatchOutcome {
        let network = spec.network();
        let (Some(vpc), Some(source)) = (network.vpc_id.as_deref(), network.security_group.as_deref())
        else {
            let reason = "no VPC id or compute security group resolved".to_string();
            info!("Skipping logging endpoint ingress: {}", reason);
            return PatchOutcome::Skipped(reason);
        };

        match self.ensure_ingress(vpc, source).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Logging endpoint ingress not ensured: {}", e);
                PatchOutcome::Degraded(e.to_string())
            }
        }
    }

    async fn ensure_ingress(&self, vpc: &str, source: &str) -> Result<PatchOutcome, ReconcileError> {
        let service_name = &self.options.logging_endpoint_service;
        let endpoint = self
            .prober
            .probe_vpc_endpoint(vpc, service_name)
            .await?;

        let Some(endpoint_group) = endpoint.and_then(|e| e.security_groups.into_iter().next())
        else {
            let reason = format!("logging endpoint '{}' not found in {}", service_name, vpc);
            warn!("{}; log delivery may be degraded", reason);
            return Ok(PatchOutcome::Degraded(reason));
        };

        let rule = IngressRule {
            security_group: endpoint_group,
            protocol: "tcp".to_string(),
            port: self.options.ingress_port,
            source_security_group: source.to_string(),
        };

        // The pre-check only saves a call; the provider's duplicate handling
        // is what keeps concurrent runs safe.
        let existing = self.prober.probe_ingress_rules(&rule.security_group).await?;
        if existing.contains(&rule) {
            info!(
                "Ingress {}/{} from {} to {} already present",
                rule.protocol, rule.port, rule.source_security_group, rule.security_group
            );
            return Ok(PatchOutcome::AlreadyPresent);
        }

        match self.plane.authorize_ingress(&rule).await? {
            IngressOutcome::Created => {
                info!(
                    "Authorized ingress {}/{} from {} to {}",
                    rule.protocol, rule.port, rule.source_security_group, rule.security_group
                );
                Ok(PatchOutcome::Authorized)
            }
            IngressOutcome::AlreadyExists => {
                info!("Ingress rule was added concurrently; treating as present");
                Ok(PatchOutcome::AlreadyPresent)
            }
        }
    }
}
