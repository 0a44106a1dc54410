//! Control plane REST API

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::ReconcileError;
use crate::http::client::HttpClient;
use crate::models::plane::{
    ClusterDescription, CreateServiceRequest, IngressOutcome, IngressRule, ServiceDescription,
    TargetHealth, TaskDefinitionRef, TaskDefinitionRequest, UpdateServiceRequest, VpcEndpoint,
};
use crate::plane::ControlPlane;

/// List of ingress rules response
#[derive(Debug, Clone, Deserialize)]
pub struct IngressRuleListResponse {
    pub rules: Vec<IngressRule>,
}

/// Target health response
#[derive(Debug, Clone, Deserialize)]
pub struct TargetHealthListResponse {
    pub targets: Vec<TargetHealth>,
}

#[async_trait]
impl ControlPlane for HttpClient {
    async fn describe_cluster(
        &self,
        name: &str,
    ) -> Result<Option<ClusterDescription>, ReconcileError> {
        self.get(self.endpoint(&["clusters", name])?).await
    }

    async fn describe_task_definition(
        &self,
        family: &str,
    ) -> Result<Option<TaskDefinitionRef>, ReconcileError> {
        self.get(self.endpoint(&["task-definitions", family, "latest"])?)
            .await
    }

    async fn register_task_definition(
        &self,
        request: &TaskDefinitionRequest,
    ) -> Result<TaskDefinitionRef, ReconcileError> {
        self.post(self.endpoint(&["task-definitions"])?, request).await
    }

    async fn describe_service(
        &self,
        cluster: &str,
        name: &str,
    ) -> Result<Option<ServiceDescription>, ReconcileError> {
        self.get(self.endpoint(&["clusters", cluster, "services", name])?)
            .await
    }

    async fn create_service(
        &self,
        request: &CreateServiceRequest,
    ) -> Result<ServiceDescription, ReconcileError> {
        let url = self.endpoint(&["clusters", &request.cluster, "services"])?;
        self.post(url, request).await
    }

    async fn update_service(
        &self,
        cluster: &str,
        name: &str,
        request: &UpdateServiceRequest,
    ) -> Result<ServiceDescription, ReconcileError> {
        let url = self.endpoint(&["clusters", cluster, "services", name])?;
        self.patch(url, request).await
    }

    async fn describe_vpc_endpoint(
        &self,
        vpc: &str,
        service_name: &str,
    ) -> Result<Option<VpcEndpoint>, ReconcileError> {
        self.get(self.endpoint(&["vpcs", vpc, "endpoints", service_name])?)
            .await
    }

    async fn describe_ingress_rules(
        &self,
        security_group: &str,
    ) -> Result<Vec<IngressRule>, ReconcileError> {
        let url = self.endpoint(&["security-groups", security_group, "ingress"])?;
        let response: Option<IngressRuleListResponse> = self.get(url).await?;
        Ok(response.map(|r| r.rules).unwrap_or_default())
    }

    async fn authorize_ingress(
        &self,
        rule: &IngressRule,
    ) -> Result<IngressOutcome, ReconcileError> {
        let url = self.endpoint(&["security-groups", &rule.security_group, "ingress"])?;
        match self.post_no_content(url, rule).await {
            Ok(_) => Ok(IngressOutcome::Created),
            // The provider rejects duplicate rules with a conflict
            Err(ReconcileError::Conflict(_)) => Ok(IngressOutcome::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    async fn describe_target_health(
        &self,
        target_group_ref: &str,
    ) -> Result<Vec<TargetHealth>, ReconcileError> {
        let url = self.endpoint(&["target-groups", target_group_ref, "health"])?;
        let response: Option<TargetHealthListResponse> = self.get(url).await?;
        Ok(response.map(|r| r.targets).unwrap_or_default())
    }
}
