//! Idempotent applier
//!
//! Converges the service object onto the desired state. The create/update
//! decision is always taken from the probed remote state, never from local
//! bookkeeping, so re-running with the same spec updates the one service
//! instead of creating another.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::deploy::probe::ServiceProbe;
use crate::errors::ReconcileError;
use crate::models::plane::{
    CircuitBreaker, ContainerDefinition, ContainerHealthCheck, CreateServiceRequest,
    DeploymentConfiguration, LoadBalancerAttachment, LogConfiguration, NetworkConfiguration,
    PortMapping, ServiceDescription, TaskDefinitionRef, TaskDefinitionRequest,
    UpdateServiceRequest,
};
use crate::models::result::ServiceAction;
use crate::models::spec::DeploymentSpec;
use crate::plane::ControlPlane;

/// Rollout safety policy. Not caller-configurable.
pub const DEPLOYMENT_POLICY: DeploymentConfiguration = DeploymentConfiguration {
    maximum_percent: 200,
    minimum_healthy_percent: 50,
    circuit_breaker: CircuitBreaker {
        enable: true,
        rollback: true,
    },
};

/// Seconds before failing health checks count against a starting task
pub const HEALTH_CHECK_GRACE_PERIOD_SECS: u32 = 60;

/// What the applier will do with the service object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePlan {
    Create,
    Update,
}

impl ServicePlan {
    /// Single decision point between create and update.
    ///
    /// Fails before anything is mutated when the service is in a state that
    /// needs manual intervention, or when a create lacks network settings.
    pub fn decide(spec: &DeploymentSpec, probe: &ServiceProbe) -> Result<Self, ReconcileError> {
        match probe {
            ServiceProbe::Absent => {
                require_create_network(spec)?;
                Ok(ServicePlan::Create)
            }
            ServiceProbe::Active(_) => Ok(ServicePlan::Update),
            ServiceProbe::OtherStatus(status) => Err(ReconcileError::Conflict(format!(
                "service '{}' is {} and needs manual intervention",
                spec.service_name(),
                status
            ))),
        }
    }

    pub fn action(&self) -> ServiceAction {
        match self {
            ServicePlan::Create => ServiceAction::Created,
            ServicePlan::Update => ServiceAction::Updated,
        }
    }
}

fn require_create_network(spec: &DeploymentSpec) -> Result<(&[String], &str), ReconcileError> {
    let network = spec.network();
    if network.subnets.is_empty() {
        return Err(ReconcileError::Configuration(format!(
            "cannot create service '{}': missing required field 'network.subnets'",
            spec.service_name()
        )));
    }
    let security_group = network.security_group.as_deref().ok_or_else(|| {
        ReconcileError::Configuration(format!(
            "cannot create service '{}': missing required field 'network.security_group'",
            spec.service_name()
        ))
    })?;
    Ok((&network.subnets, security_group))
}

/// New revision payload for the desired state
pub fn task_definition_request(spec: &DeploymentSpec, run_id: &str) -> TaskDefinitionRequest {
    let container = ContainerDefinition {
        name: spec.container_name().to_string(),
        image: spec.image().to_string(),
        essential: true,
        port_mappings: vec![PortMapping {
            container_port: spec.port(),
            protocol: "tcp".to_string(),
        }],
        environment: spec.environment().clone(),
        health_check: ContainerHealthCheck {
            command: vec![
                "CMD-SHELL".to_string(),
                format!("curl -f http://localhost:{}/ || exit 1", spec.port()),
            ],
            interval_secs: 30,
            timeout_secs: 5,
            retries: 3,
            start_period_secs: HEALTH_CHECK_GRACE_PERIOD_SECS,
        },
        log_configuration: LogConfiguration {
            driver: "managed".to_string(),
            options: BTreeMap::from([
                ("group".to_string(), format!("/services/{}", spec.task_family())),
                ("stream-prefix".to_string(), spec.container_name().to_string()),
                ("create-group".to_string(), "true".to_string()),
            ]),
        },
    };

    TaskDefinitionRequest {
        family: spec.task_family().to_string(),
        cpu: spec.cpu(),
        memory: spec.memory(),
        network_mode: "vpc".to_string(),
        execution_role_ref: spec.execution_role_ref().to_string(),
        task_role_ref: spec.task_role_ref().to_string(),
        cpu_architecture: spec.architecture(),
        container_definitions: vec![container],
        tags: BTreeMap::from([
            ("spec-digest".to_string(), spec.digest()),
            ("run-id".to_string(), run_id.to_string()),
        ]),
    }
}

/// Full creation payload, including network and load balancer attachment
pub fn create_service_request(
    spec: &DeploymentSpec,
    task_definition: &TaskDefinitionRef,
) -> Result<CreateServiceRequest, ReconcileError> {
    let (subnets, security_group) = require_create_network(spec)?;

    let load_balancers = spec
        .load_balancer_target_ref()
        .map(|target_group_ref| LoadBalancerAttachment {
            target_group_ref: target_group_ref.to_string(),
            container_name: spec.container_name().to_string(),
            container_port: spec.port(),
        })
        .into_iter()
        .collect();

    Ok(CreateServiceRequest {
        cluster: spec.cluster_name().to_string(),
        service_name: spec.service_name().to_string(),
        task_definition: task_definition.clone(),
        desired_count: spec.desired_count(),
        network_configuration: NetworkConfiguration {
            subnets: subnets.to_vec(),
            security_groups: vec![security_group.to_string()],
            assign_public_ip: spec.network().assign_public_ip,
        },
        load_balancers,
        deployment_configuration: DEPLOYMENT_POLICY,
        health_check_grace_period_secs: HEALTH_CHECK_GRACE_PERIOD_SECS,
        tags: BTreeMap::from([("managed-by".to_string(), "convoy".to_string())]),
    })
}

/// Update payload: only the new revision, with a forced rollout
pub fn update_service_request(task_definition: &TaskDefinitionRef) -> UpdateServiceRequest {
    UpdateServiceRequest {
        task_definition: task_definition.clone(),
        force_new_deployment: true,
        deployment_configuration: DEPLOYMENT_POLICY,
        health_check_grace_period_secs: HEALTH_CHECK_GRACE_PERIOD_SECS,
    }
}

/// Mutates remote state. Nothing here is retried automatically.
pub struct Applier<'a> {
    plane: &'a dyn ControlPlane,
}

impl<'a> Applier<'a> {
    pub fn new(plane: &'a dyn ControlPlane) -> Self {
        Self { plane }
    }

    /// Register a new, append-only revision for the desired state
    pub async fn register(
        &self,
        spec: &DeploymentSpec,
        run_id: &str,
        previous: Option<&TaskDefinitionRef>,
    ) -> Result<TaskDefinitionRef, ReconcileError> {
        let request = task_definition_request(spec, run_id);
        let registered = self.plane.register_task_definition(&request).await?;

        if let Some(previous) = previous {
            if registered.revision <= previous.revision {
                warn!(
                    "Registered revision {} does not follow previous revision {}",
                    registered, previous
                );
            }
        }

        info!("Registered task definition {}", registered);
        Ok(registered)
    }

    /// Create or update the service so it runs `task_definition`
    pub async fn apply(
        &self,
        spec: &DeploymentSpec,
        plan: ServicePlan,
        task_definition: &TaskDefinitionRef,
    ) -> Result<ServiceDescription, ReconcileError> {
        let service = match plan {
            ServicePlan::Create => {
                let request = create_service_request(spec, task_definition)?;
                info!(
                    "Creating service {} in cluster {}",
                    request.service_name, request.cluster
                );
                self.plane.create_service(&request).await?
            }
            ServicePlan::Update => {
                let request = update_service_request(task_definition);
                info!(
                    "Updating service {} to {}",
                    spec.service_name(),
                    task_definition
                );
                self.plane
                    .update_service(spec.cluster_name(), spec.service_name(), &request)
                    .await?
            }
        };
        Ok(service)
    }
}
