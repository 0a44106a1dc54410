//! Control plane request and response models

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::spec::Architecture;

/// A registered task definition revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskDefinitionRef {
    pub family: String,
    pub revision: u32,
}

impl fmt::Display for TaskDefinitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.revision)
    }
}

/// Cluster as reported by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDescription {
    pub name: String,
    pub status: String,
}

/// Rollout state of a single service deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutState {
    InProgress,
    Completed,
    Failed,
}

/// One deployment tracked by a service. A service usually holds a single
/// `PRIMARY` deployment; during a rollout the previous one stays `ACTIVE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDeployment {
    pub id: String,
    pub status: String,
    pub task_definition: TaskDefinitionRef,
    pub rollout_state: RolloutState,
    #[serde(default)]
    pub rollout_state_reason: Option<String>,
    pub running_count: u32,
    pub desired_count: u32,
}

/// Service as reported by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub cluster: String,
    pub name: String,
    pub status: String,
    pub task_definition: TaskDefinitionRef,
    pub running_count: u32,
    pub desired_count: u32,
    #[serde(default)]
    pub pending_count: u32,
    #[serde(default)]
    pub deployments: Vec<ServiceDeployment>,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerAttachment>,
}

impl ServiceDescription {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("ACTIVE")
    }

    /// The first deployment whose circuit breaker rolled it back
    pub fn failed_deployment(&self) -> Option<&ServiceDeployment> {
        self.deployments
            .iter()
            .find(|d| d.rollout_state == RolloutState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHealthCheck {
    pub command: Vec<String>,
    pub interval_secs: u32,
    pub timeout_secs: u32,
    pub retries: u32,
    pub start_period_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfiguration {
    pub driver: String,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    pub essential: bool,
    pub port_mappings: Vec<PortMapping>,
    pub environment: BTreeMap<String, String>,
    pub health_check: ContainerHealthCheck,
    pub log_configuration: LogConfiguration,
}

/// Payload for registering a new task definition revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinitionRequest {
    pub family: String,
    pub cpu: u32,
    pub memory: u32,
    pub network_mode: String,
    pub execution_role_ref: String,
    pub task_role_ref: String,
    pub cpu_architecture: Architecture,
    pub container_definitions: Vec<ContainerDefinition>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfiguration {
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub assign_public_ip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerAttachment {
    pub target_group_ref: String,
    pub container_name: String,
    pub container_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub enable: bool,
    pub rollback: bool,
}

/// Rollout safety parameters sent with every create and update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfiguration {
    pub maximum_percent: u32,
    pub minimum_healthy_percent: u32,
    pub circuit_breaker: CircuitBreaker,
}

/// Payload for creating a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateServiceRequest {
    pub cluster: String,
    pub service_name: String,
    pub task_definition: TaskDefinitionRef,
    pub desired_count: u32,
    pub network_configuration: NetworkConfiguration,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerAttachment>,
    pub deployment_configuration: DeploymentConfiguration,
    pub health_check_grace_period_secs: u32,
    pub tags: BTreeMap<String, String>,
}

/// Payload for pointing an existing service at a new revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateServiceRequest {
    pub task_definition: TaskDefinitionRef,
    pub force_new_deployment: bool,
    pub deployment_configuration: DeploymentConfiguration,
    pub health_check_grace_period_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpcEndpoint {
    pub id: String,
    pub service_name: String,
    pub security_groups: Vec<String>,
}

/// A security group ingress rule sourced from another security group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub security_group: String,
    pub protocol: String,
    pub port: u16,
    pub source_security_group: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngressOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetHealth {
    pub target_id: String,
    pub state: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl TargetHealth {
    pub fn is_healthy(&self) -> bool {
        self.state.eq_ignore_ascii_case("healthy")
    }
}
