//! Control plane abstraction
//!
//! The reconciler only talks to the remote orchestrator through the
//! [`ControlPlane`] trait. Two implementations ship with the crate: the
//! REST client in [`crate::http`] and [`memory::InMemoryControlPlane`], a
//! simulated control plane used by tests and `--simulate` runs.

pub mod memory;

use async_trait::async_trait;

use crate::errors::ReconcileError;
use crate::models::plane::{
    ClusterDescription, CreateServiceRequest, IngressOutcome, IngressRule, ServiceDescription,
    TargetHealth, TaskDefinitionRef, TaskDefinitionRequest, UpdateServiceRequest, VpcEndpoint,
};

/// Remote orchestrator operations used during reconciliation.
///
/// `describe_*` calls are reads and return `Ok(None)` for absent objects.
/// Everything else mutates remote state.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn describe_cluster(&self, name: &str)
        -> Result<Option<ClusterDescription>, ReconcileError>;

    /// Latest revision of a task definition family
    async fn describe_task_definition(
        &self,
        family: &str,
    ) -> Result<Option<TaskDefinitionRef>, ReconcileError>;

    async fn register_task_definition(
        &self,
        request: &TaskDefinitionRequest,
    ) -> Result<TaskDefinitionRef, ReconcileError>;

    async fn describe_service(
        &self,
        cluster: &str,
        name: &str,
    ) -> Result<Option<ServiceDescription>, ReconcileError>;

    async fn create_service(
        &self,
        request: &CreateServiceRequest,
    ) -> Result<ServiceDescription, ReconcileError>;

    async fn update_service(
        &self,
        cluster: &str,
        name: &str,
        request: &UpdateServiceRequest,
    ) -> Result<ServiceDescription, ReconcileError>;

    async fn describe_vpc_endpoint(
        &self,
        vpc: &str,
        service_name: &str,
    ) -> Result<Option<VpcEndpoint>, ReconcileError>;

    async fn describe_ingress_rules(
        &self,
        security_group: &str,
    ) -> Result<Vec<IngressRule>, ReconcileError>;

    /// Must report `AlreadyExists` rather than fail when the rule is present
    async fn authorize_ingress(&self, rule: &IngressRule)
        -> Result<IngressOutcome, ReconcileError>;

    async fn describe_target_health(
        &self,
        target_group_ref: &str,
    ) -> Result<Vec<TargetHealth>, ReconcileError>;
}
