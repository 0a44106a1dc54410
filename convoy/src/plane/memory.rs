//! In-memory control plane
//!
//! Simulates the orchestrator closely enough to rehearse a deployment:
//! revisions are append-only per family, services are keyed by cluster and
//! name, and a rollout settles after a configurable number of polls.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::ReconcileError;
use crate::models::plane::{
    ClusterDescription, CreateServiceRequest, IngressOutcome, IngressRule, RolloutState,
    ServiceDeployment, ServiceDescription, TargetHealth, TaskDefinitionRef,
    TaskDefinitionRequest, UpdateServiceRequest, VpcEndpoint,
};
use crate::plane::ControlPlane;
use crate::utils::generate_uuid;

/// How the simulated rollout behaves
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Service polls after a create or update before tasks are running.
    /// `None` means the rollout never settles.
    pub converge_after_polls: Option<u32>,

    /// When set, the circuit breaker rolls the next rollout back with this reason
    pub rollout_failure: Option<String>,

    /// Number of upcoming reads that fail with a throttling error
    pub transient_read_failures: u32,

    /// Report `AlreadyExists` for rules missing from `describe_ingress_rules`,
    /// as happens when a concurrent run wins the race
    pub racing_ingress: bool,

    /// Name of a mutating call, e.g. `"update_service"`, that fails with a
    /// throttling error every time it is invoked
    pub transient_mutation_failure: Option<&'static str>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            converge_after_polls: Some(1),
            rollout_failure: None,
            transient_read_failures: 0,
            racing_ingress: false,
            transient_mutation_failure: None,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    clusters: HashMap<String, String>,
    task_definitions: HashMap<String, Vec<TaskDefinitionRequest>>,
    services: HashMap<(String, String), ServiceDescription>,
    polls_since_apply: HashMap<(String, String), u32>,
    endpoints: HashMap<(String, String), VpcEndpoint>,
    ingress: Vec<IngressRule>,
    target_health: HashMap<String, Vec<TargetHealth>>,
    calls: Vec<String>,
    behavior: Behavior,
}

/// In-memory [`ControlPlane`]
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    state: Mutex<State>,
}

const MUTATING_CALLS: [&str; 4] = [
    "register_task_definition",
    "create_service",
    "update_service",
    "authorize_ingress",
];

impl InMemoryControlPlane {
    /// Create an empty control plane
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an ACTIVE cluster
    pub fn with_cluster(self, name: &str) -> Self {
        self.with_cluster_status(name, "ACTIVE")
    }

    pub fn with_cluster_status(self, name: &str, status: &str) -> Self {
        self.lock()
            .clusters
            .insert(name.to_string(), status.to_string());
        self
    }

    /// Seed a service in an arbitrary status, e.g. `DRAINING`
    pub fn with_service_status(self, cluster: &str, name: &str, status: &str) -> Self {
        let service = ServiceDescription {
            cluster: cluster.to_string(),
            name: name.to_string(),
            status: status.to_string(),
            task_definition: TaskDefinitionRef {
                family: name.to_string(),
                revision: 0,
            },
            running_count: 0,
            desired_count: 0,
            pending_count: 0,
            deployments: Vec::new(),
            load_balancers: Vec::new(),
        };
        self.lock()
            .services
            .insert((cluster.to_string(), name.to_string()), service);
        self
    }

    /// Register a VPC endpoint guarded by `security_group`
    pub fn with_vpc_endpoint(self, vpc: &str, service_name: &str, security_group: &str) -> Self {
        let endpoint = VpcEndpoint {
            id: format!("vpce-{}", &generate_uuid()[..8]),
            service_name: service_name.to_string(),
            security_groups: vec![security_group.to_string()],
        };
        self.lock()
            .endpoints
            .insert((vpc.to_string(), service_name.to_string()), endpoint);
        self
    }

    pub fn with_ingress_rule(self, rule: IngressRule) -> Self {
        self.lock().ingress.push(rule);
        self
    }

    /// Override the health reported for a target group
    pub fn with_target_health(self, target_group_ref: &str, targets: Vec<TargetHealth>) -> Self {
        self.lock()
            .target_health
            .insert(target_group_ref.to_string(), targets);
        self
    }

    pub fn with_behavior(self, behavior: Behavior) -> Self {
        self.set_behavior(behavior);
        self
    }

    /// Change the simulated behavior between runs
    pub fn set_behavior(&self, behavior: Behavior) {
        self.lock().behavior = behavior;
    }

    /// Number of service objects, across all clusters
    pub fn service_count(&self) -> usize {
        self.lock().services.len()
    }

    pub fn service(&self, cluster: &str, name: &str) -> Option<ServiceDescription> {
        self.lock()
            .services
            .get(&(cluster.to_string(), name.to_string()))
            .cloned()
    }

    /// Every revision registered for a family, in order
    pub fn registered(&self, family: &str) -> Vec<TaskDefinitionRequest> {
        self.lock()
            .task_definitions
            .get(family)
            .cloned()
            .unwrap_or_default()
    }

    pub fn ingress_rules(&self) -> Vec<IngressRule> {
        self.lock().ingress.clone()
    }

    /// Names of the operations invoked so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of operations that mutated remote state
    pub fn mutating_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| MUTATING_CALLS.contains(&c.as_str()))
            .count()
    }

    fn record(state: &mut State, call: &str) {
        debug!("simulated control plane call: {}", call);
        state.calls.push(call.to_string());
    }

    fn read(state: &mut State, call: &str) -> Result<(), ReconcileError> {
        Self::record(state, call);
        if state.behavior.transient_read_failures > 0 {
            state.behavior.transient_read_failures -= 1;
            return Err(ReconcileError::TransientControlPlane(format!(
                "{}: rate exceeded",
                call
            )));
        }
        Ok(())
    }

    fn mutate(state: &mut State, call: &str) -> Result<(), ReconcileError> {
        Self::record(state, call);
        if state.behavior.transient_mutation_failure == Some(call) {
            return Err(ReconcileError::TransientControlPlane(format!(
                "{}: rate exceeded",
                call
            )));
        }
        Ok(())
    }

    fn start_rollout(state: &mut State, key: (String, String), task_definition: TaskDefinitionRef) {
        let failure = state.behavior.rollout_failure.clone();
        let Some(service) = state.services.get_mut(&key) else {
            return;
        };

        for deployment in service.deployments.iter_mut() {
            deployment.status = "ACTIVE".to_string();
        }
        service.deployments.retain(|d| d.running_count > 0);
        service.deployments.insert(
            0,
            ServiceDeployment {
                id: format!("dep-{}", generate_uuid()),
                status: "PRIMARY".to_string(),
                task_definition: task_definition.clone(),
                rollout_state: RolloutState::InProgress,
                rollout_state_reason: failure,
                running_count: 0,
                desired_count: service.desired_count,
            },
        );
        service.task_definition = task_definition;
        service.pending_count = service.desired_count;
        state.polls_since_apply.insert(key, 0);
    }

    /// Advance the simulated rollout by one poll
    fn advance(state: &mut State, key: &(String, String)) {
        let converge_after = state.behavior.converge_after_polls;
        let Some(polls) = state.polls_since_apply.get_mut(key) else {
            return;
        };
        *polls += 1;
        let polls = *polls;
        let Some(service) = state.services.get_mut(key) else {
            return;
        };
        let Some(primary) = service.deployments.first_mut() else {
            return;
        };
        if primary.rollout_state != RolloutState::InProgress {
            return;
        }

        if primary.rollout_state_reason.is_some() {
            primary.rollout_state = RolloutState::Failed;
            return;
        }

        if converge_after.is_some_and(|n| polls >= n) {
            primary.rollout_state = RolloutState::Completed;
            primary.running_count = primary.desired_count;
            service.running_count = primary.desired_count;
            service.pending_count = 0;
            service.deployments.truncate(1);
        }
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn describe_cluster(
        &self,
        name: &str,
    ) -> Result<Option<ClusterDescription>, ReconcileError> {
        let mut state = self.lock();
        Self::read(&mut state, "describe_cluster")?;
        Ok(state.clusters.get(name).map(|status| ClusterDescription {
            name: name.to_string(),
            status: status.clone(),
        }))
    }

    async fn describe_task_definition(
        &self,
        family: &str,
    ) -> Result<Option<TaskDefinitionRef>, ReconcileError> {
        let mut state = self.lock();
        Self::read(&mut state, "describe_task_definition")?;
        Ok(state
            .task_definitions
            .get(family)
            .filter(|revisions| !revisions.is_empty())
            .map(|revisions| TaskDefinitionRef {
                family: family.to_string(),
                revision: revisions.len() as u32,
            }))
    }

    async fn register_task_definition(
        &self,
        request: &TaskDefinitionRequest,
    ) -> Result<TaskDefinitionRef, ReconcileError> {
        let mut state = self.lock();
        Self::mutate(&mut state, "register_task_definition")?;
        let revisions = state
            .task_definitions
            .entry(request.family.clone())
            .or_default();
        revisions.push(request.clone());
        Ok(TaskDefinitionRef {
            family: request.family.clone(),
            revision: revisions.len() as u32,
        })
    }

    async fn describe_service(
        &self,
        cluster: &str,
        name: &str,
    ) -> Result<Option<ServiceDescription>, ReconcileError> {
        let mut state = self.lock();
        Self::read(&mut state, "describe_service")?;
        let key = (cluster.to_string(), name.to_string());
        Self::advance(&mut state, &key);
        Ok(state.services.get(&key).cloned())
    }

    async fn create_service(
        &self,
        request: &CreateServiceRequest,
    ) -> Result<ServiceDescription, ReconcileError> {
        let mut state = self.lock();
        Self::mutate(&mut state, "create_service")?;

        if !state.clusters.contains_key(&request.cluster) {
            return Err(ReconcileError::ControlPlane(format!(
                "cluster '{}' not found",
                request.cluster
            )));
        }
        let key = (request.cluster.clone(), request.service_name.clone());
        let exists = state
            .services
            .get(&key)
            .is_some_and(|s| !s.status.eq_ignore_ascii_case("INACTIVE"));
        if exists {
            return Err(ReconcileError::Conflict(format!(
                "service '{}' already exists",
                request.service_name
            )));
        }

        let service = ServiceDescription {
            cluster: request.cluster.clone(),
            name: request.service_name.clone(),
            status: "ACTIVE".to_string(),
            task_definition: request.task_definition.clone(),
            running_count: 0,
            desired_count: request.desired_count,
            pending_count: 0,
            deployments: Vec::new(),
            load_balancers: request.load_balancers.clone(),
        };
        state.services.insert(key.clone(), service);
        Self::start_rollout(&mut state, key.clone(), request.task_definition.clone());

        Ok(state.services[&key].clone())
    }

    async fn update_service(
        &self,
        cluster: &str,
        name: &str,
        request: &UpdateServiceRequest,
    ) -> Result<ServiceDescription, ReconcileError> {
        let mut state = self.lock();
        Self::mutate(&mut state, "update_service")?;

        let key = (cluster.to_string(), name.to_string());
        match state.services.get(&key) {
            Some(service) if service.is_active() => {}
            Some(service) => {
                return Err(ReconcileError::Conflict(format!(
                    "service '{}' is {}",
                    name, service.status
                )))
            }
            None => {
                return Err(ReconcileError::ControlPlane(format!(
                    "service '{}' not found",
                    name
                )))
            }
        }

        let known = state
            .task_definitions
            .get(&request.task_definition.family)
            .is_some_and(|revisions| revisions.len() as u32 >= request.task_definition.revision);
        if !known {
            return Err(ReconcileError::ControlPlane(format!(
                "task definition '{}' not found",
                request.task_definition
            )));
        }

        Self::start_rollout(&mut state, key.clone(), request.task_definition.clone());
        Ok(state.services[&key].clone())
    }

    async fn describe_vpc_endpoint(
        &self,
        vpc: &str,
        service_name: &str,
    ) -> Result<Option<VpcEndpoint>, ReconcileError> {
        let mut state = self.lock();
        Self::read(&mut state, "describe_vpc_endpoint")?;
        Ok(state
            .endpoints
            .get(&(vpc.to_string(), service_name.to_string()))
            .cloned())
    }

    async fn describe_ingress_rules(
        &self,
        security_group: &str,
    ) -> Result<Vec<IngressRule>, ReconcileError> {
        let mut state = self.lock();
        Self::read(&mut state, "describe_ingress_rules")?;
        if state.behavior.racing_ingress {
            return Ok(Vec::new());
        }
        Ok(state
            .ingress
            .iter()
            .filter(|r| r.security_group == security_group)
            .cloned()
            .collect())
    }

    async fn authorize_ingress(
        &self,
        rule: &IngressRule,
    ) -> Result<IngressOutcome, ReconcileError> {
        let mut state = self.lock();
        Self::mutate(&mut state, "authorize_ingress")?;
        if state.ingress.contains(rule) {
            return Ok(IngressOutcome::AlreadyExists);
        }
        state.ingress.push(rule.clone());
        Ok(IngressOutcome::Created)
    }

    async fn describe_target_health(
        &self,
        target_group_ref: &str,
    ) -> Result<Vec<TargetHealth>, ReconcileError> {
        let mut state = self.lock();
        Self::read(&mut state, "describe_target_health")?;
        if let Some(targets) = state.target_health.get(target_group_ref) {
            return Ok(targets.clone());
        }

        let targets = state
            .services
            .values()
            .filter(|s| {
                s.load_balancers
                    .iter()
                    .any(|lb| lb.target_group_ref == target_group_ref)
            })
            .flat_map(|s| {
                (0..s.running_count).map(move |i| TargetHealth {
                    target_id: format!("{}-task-{}", s.name, i),
                    state: "healthy".to_string(),
                    reason: None,
                })
            })
            .collect();
        Ok(targets)
    }
}
