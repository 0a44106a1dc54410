//! End-to-end reconciliation tests against the in-memory control plane

use std::sync::Arc;
use std::time::Duration;

use convoy::deploy::builder::{build_spec, DeploymentInputs};
use convoy::deploy::fsm::ReconcilePhase;
use convoy::deploy::reconciler::{Reconciler, ReconcilerOptions};
use convoy::deploy::waiter::WaiterOptions;
use convoy::errors::ReconcileError;
use convoy::models::plane::{IngressRule, TargetHealth};
use convoy::models::result::{FinalStatus, PatchOutcome, ServiceAction};
use convoy::models::spec::DeploymentSpec;
use convoy::plane::memory::{Behavior, InMemoryControlPlane};
use convoy::stack::{keys, StackOutputs};
use convoy::utils::RetryOptions;
use tokio_test::{assert_err, assert_ok};

const CLUSTER: &str = "demo-dev-cluster";
const SERVICE: &str = "demo-dev-svc";

fn fast_options() -> ReconcilerOptions {
    ReconcilerOptions {
        retry: RetryOptions {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
        waiter: WaiterOptions {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(5),
        },
        ..Default::default()
    }
}

fn outputs() -> StackOutputs {
    StackOutputs::new()
        .with(keys::EXECUTION_ROLE, "role/exec")
        .with(keys::TASK_ROLE, "role/task")
        .with(keys::VPC_ID, "vpc-1")
        .with(keys::SUBNET_IDS, "subnet-a,subnet-b")
        .with(keys::SECURITY_GROUP_ID, "sg-app")
}

fn spec_with(image: &str, outputs: &StackOutputs) -> DeploymentSpec {
    let inputs = DeploymentInputs {
        project: Some("demo".into()),
        environment: Some("dev".into()),
        service: Some("svc".into()),
        image: Some(image.into()),
        ..Default::default()
    };
    build_spec(&inputs, outputs, "x86_64").unwrap()
}

fn spec(image: &str) -> DeploymentSpec {
    spec_with(image, &outputs())
}

fn plane() -> Arc<InMemoryControlPlane> {
    Arc::new(
        InMemoryControlPlane::new()
            .with_cluster(CLUSTER)
            .with_vpc_endpoint("vpc-1", "logs", "sg-logs"),
    )
}

fn reconciler(plane: &Arc<InMemoryControlPlane>, options: ReconcilerOptions) -> Reconciler {
    Reconciler::new(plane.clone(), options)
}

#[tokio::test]
async fn test_create_then_update() {
    let plane = plane();
    let reconciler = reconciler(&plane, fast_options());

    let first = assert_ok!(reconciler.reconcile(&spec("repo:v1")).await);
    assert_eq!(first.service_action, ServiceAction::Created);
    assert_eq!(first.final_status, FinalStatus::Stable);
    assert_eq!(first.task_definition.revision, 1);
    assert_eq!((first.running_count, first.desired_count), (1, 1));
    assert_eq!(first.network_patch, PatchOutcome::Authorized);
    assert_eq!(first.exit_code(), 0);

    let second = assert_ok!(reconciler.reconcile(&spec("repo:v2")).await);
    assert_eq!(second.service_action, ServiceAction::Updated);
    assert_eq!(second.final_status, FinalStatus::Stable);
    assert_eq!(second.task_definition.revision, 2);
    assert_eq!(second.network_patch, PatchOutcome::AlreadyPresent);
    assert_ne!(first.run_id, second.run_id);

    let service = plane.service(CLUSTER, SERVICE).unwrap();
    assert_eq!(service.task_definition, second.task_definition);
    assert_eq!(plane.service_count(), 1);

    let revisions = plane.registered(SERVICE);
    assert_eq!(revisions.len(), 2);
    assert_eq!(revisions[0].container_definitions[0].image, "repo:v1");
    assert_eq!(revisions[1].container_definitions[0].image, "repo:v2");
    assert_eq!(plane.ingress_rules().len(), 1);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let plane = plane();
    let reconciler = reconciler(&plane, fast_options());
    let spec = spec("repo:v1");

    let first = assert_ok!(reconciler.reconcile(&spec).await);
    let second = assert_ok!(reconciler.reconcile(&spec).await);

    assert_eq!(plane.service_count(), 1);
    assert_eq!(second.service_action, ServiceAction::Updated);
    assert_eq!(
        second.task_definition.revision,
        first.task_definition.revision + 1
    );

    // Same inputs give the same payload apart from the run id
    let revisions = plane.registered(SERVICE);
    assert_eq!(
        revisions[0].container_definitions,
        revisions[1].container_definitions
    );
    assert_eq!(revisions[0].tags["spec-digest"], revisions[1].tags["spec-digest"]);
    assert_ne!(revisions[0].tags["run-id"], revisions[1].tags["run-id"]);
}

#[tokio::test]
async fn test_trail_follows_phases() {
    let plane = plane();
    let result = assert_ok!(reconciler(&plane, fast_options())
        .reconcile(&spec("repo:v1"))
        .await);

    let phases: Vec<ReconcilePhase> = result.trail.iter().map(|e| e.phase).collect();
    assert_eq!(
        phases,
        vec![
            ReconcilePhase::Validated,
            ReconcilePhase::Registered,
            ReconcilePhase::Applied,
            ReconcilePhase::Patched,
            ReconcilePhase::Converging,
            ReconcilePhase::Stable,
        ]
    );
    assert!(result.finished_at >= result.started_at);
}

#[tokio::test]
async fn test_create_without_network_mutates_nothing() {
    let plane = plane();
    let outputs = StackOutputs::new()
        .with(keys::EXECUTION_ROLE, "role/exec")
        .with(keys::TASK_ROLE, "role/task");

    let err = assert_err!(reconciler(&plane, fast_options())
        .reconcile(&spec_with("repo:v1", &outputs))
        .await);

    assert!(matches!(err, ReconcileError::Configuration(_)));
    assert!(err.to_string().contains("network"));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(plane.mutating_calls(), 0);
    assert!(plane.registered(SERVICE).is_empty());
}

#[tokio::test]
async fn test_update_without_network_allowed() {
    let plane = plane();
    let reconciler = reconciler(&plane, fast_options());
    assert_ok!(reconciler.reconcile(&spec("repo:v1")).await);

    let outputs = StackOutputs::new()
        .with(keys::EXECUTION_ROLE, "role/exec")
        .with(keys::TASK_ROLE, "role/task");
    let result = assert_ok!(reconciler
        .reconcile(&spec_with("repo:v2", &outputs))
        .await);

    assert_eq!(result.service_action, ServiceAction::Updated);
    assert_eq!(result.final_status, FinalStatus::Stable);
    assert!(matches!(result.network_patch, PatchOutcome::Skipped(_)));
}

#[tokio::test]
async fn test_missing_cluster_aborts() {
    let plane = Arc::new(InMemoryControlPlane::new());
    let err = assert_err!(reconciler(&plane, fast_options())
        .reconcile(&spec("repo:v1"))
        .await);

    assert!(matches!(err, ReconcileError::Configuration(_)));
    assert_eq!(plane.mutating_calls(), 0);
}

#[tokio::test]
async fn test_draining_service_conflicts() {
    let plane = Arc::new(
        InMemoryControlPlane::new()
            .with_cluster(CLUSTER)
            .with_service_status(CLUSTER, SERVICE, "DRAINING"),
    );
    let err = assert_err!(reconciler(&plane, fast_options())
        .reconcile(&spec("repo:v1"))
        .await);

    assert!(matches!(err, ReconcileError::Conflict(_)));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(plane.mutating_calls(), 0);
}

#[tokio::test]
async fn test_inactive_service_is_recreated() {
    let plane = Arc::new(
        InMemoryControlPlane::new()
            .with_cluster(CLUSTER)
            .with_service_status(CLUSTER, SERVICE, "INACTIVE"),
    );
    let result = assert_ok!(reconciler(&plane, fast_options())
        .reconcile(&spec("repo:v1"))
        .await);

    assert_eq!(result.service_action, ServiceAction::Created);
    assert!(plane.service(CLUSTER, SERVICE).unwrap().is_active());
}

#[tokio::test]
async fn test_missing_logging_endpoint_degrades_only() {
    let plane = Arc::new(InMemoryControlPlane::new().with_cluster(CLUSTER));
    let result = assert_ok!(reconciler(&plane, fast_options())
        .reconcile(&spec("repo:v1"))
        .await);

    assert!(result.network_patch.is_degraded());
    assert_eq!(result.final_status, FinalStatus::Stable);
    assert_eq!(result.exit_code(), 0);
    assert!(plane.ingress_rules().is_empty());
}

#[tokio::test]
async fn test_concurrent_ingress_grant_is_present() {
    let plane = plane();
    let reconciler = reconciler(&plane, fast_options());
    assert_ok!(reconciler.reconcile(&spec("repo:v1")).await);

    plane.set_behavior(Behavior {
        racing_ingress: true,
        ..Default::default()
    });
    let result = assert_ok!(reconciler.reconcile(&spec("repo:v1")).await);

    assert_eq!(result.network_patch, PatchOutcome::AlreadyPresent);
    assert_eq!(plane.ingress_rules().len(), 1);
    let grants = plane
        .calls()
        .iter()
        .filter(|c| c.as_str() == "authorize_ingress")
        .count();
    assert_eq!(grants, 2);
}

#[tokio::test]
async fn test_timeout_is_reported_not_raised() {
    let plane = Arc::new(
        InMemoryControlPlane::new()
            .with_cluster(CLUSTER)
            .with_behavior(Behavior {
                converge_after_polls: None,
                ..Default::default()
            }),
    );
    let mut options = fast_options();
    options.waiter.timeout = Duration::from_millis(40);

    let result = assert_ok!(reconciler(&plane, options)
        .reconcile(&spec("repo:v1"))
        .await);

    assert_eq!(result.final_status, FinalStatus::TimedOut);
    assert_eq!((result.running_count, result.desired_count), (0, 1));
    assert_eq!(result.exit_code(), 0);
    assert_eq!(
        result.trail.last().map(|e| e.phase),
        Some(ReconcilePhase::TimedOut)
    );
}

#[tokio::test]
async fn test_rollback_reported_as_failed() {
    let plane = Arc::new(
        InMemoryControlPlane::new()
            .with_cluster(CLUSTER)
            .with_behavior(Behavior {
                rollout_failure: Some("tasks failed container health checks".to_string()),
                ..Default::default()
            }),
    );

    let result = assert_ok!(reconciler(&plane, fast_options())
        .reconcile(&spec("repo:v1"))
        .await);

    assert_eq!(result.final_status, FinalStatus::Failed);
    assert_eq!(
        result.failure_reason.as_deref(),
        Some("tasks failed container health checks")
    );
    assert_eq!(result.exit_code(), 1);
}

#[tokio::test]
async fn test_load_balancer_attached_and_checked() {
    let plane = plane();
    let outputs = outputs().with(keys::TARGET_GROUP_REF, "tg/web");

    let result = assert_ok!(reconciler(&plane, fast_options())
        .reconcile(&spec_with("repo:v1", &outputs))
        .await);
    assert_eq!(result.final_status, FinalStatus::Stable);

    let service = plane.service(CLUSTER, SERVICE).unwrap();
    assert_eq!(service.load_balancers.len(), 1);
    assert_eq!(service.load_balancers[0].target_group_ref, "tg/web");
    assert_eq!(service.load_balancers[0].container_port, 8000);
    assert!(plane
        .calls()
        .iter()
        .any(|c| c.as_str() == "describe_target_health"));
}

#[tokio::test]
async fn test_unhealthy_targets_block_stability() {
    let plane = Arc::new(
        InMemoryControlPlane::new()
            .with_cluster(CLUSTER)
            .with_target_health(
                "tg/web",
                vec![TargetHealth {
                    target_id: "task-0".to_string(),
                    state: "unhealthy".to_string(),
                    reason: Some("health checks failed".to_string()),
                }],
            ),
    );
    let outputs = outputs().with(keys::TARGET_GROUP_REF, "tg/web");
    let mut options = fast_options();
    options.waiter.timeout = Duration::from_millis(40);

    let result = assert_ok!(reconciler(&plane, options)
        .reconcile(&spec_with("repo:v1", &outputs))
        .await);

    assert_eq!(result.final_status, FinalStatus::TimedOut);
    assert_eq!((result.running_count, result.desired_count), (1, 1));
}

#[tokio::test]
async fn test_throttled_reads_are_retried() {
    let plane = Arc::new(
        InMemoryControlPlane::new()
            .with_cluster(CLUSTER)
            .with_behavior(Behavior {
                transient_read_failures: 2,
                ..Default::default()
            }),
    );

    let result = assert_ok!(reconciler(&plane, fast_options())
        .reconcile(&spec("repo:v1"))
        .await);
    assert_eq!(result.final_status, FinalStatus::Stable);
}

fn count_calls(plane: &InMemoryControlPlane, name: &str) -> usize {
    plane.calls().iter().filter(|c| c.as_str() == name).count()
}

#[tokio::test]
async fn test_throttled_registration_is_not_retried() {
    let plane = Arc::new(
        InMemoryControlPlane::new()
            .with_cluster(CLUSTER)
            .with_behavior(Behavior {
                transient_mutation_failure: Some("register_task_definition"),
                ..Default::default()
            }),
    );

    let err = assert_err!(reconciler(&plane, fast_options())
        .reconcile(&spec("repo:v1"))
        .await);

    assert!(matches!(err, ReconcileError::TransientControlPlane(_)));
    assert_eq!(err.exit_code(), 4);
    assert_eq!(count_calls(&plane, "register_task_definition"), 1);
    assert!(plane.registered(SERVICE).is_empty());
    assert_eq!(count_calls(&plane, "create_service"), 0);
    assert_eq!(plane.service_count(), 0);
}

#[tokio::test]
async fn test_throttled_update_is_not_retried() {
    let plane = plane();
    let reconciler = reconciler(&plane, fast_options());
    let first = assert_ok!(reconciler.reconcile(&spec("repo:v1")).await);

    plane.set_behavior(Behavior {
        transient_mutation_failure: Some("update_service"),
        ..Default::default()
    });
    let err = assert_err!(reconciler.reconcile(&spec("repo:v2")).await);

    assert!(matches!(err, ReconcileError::TransientControlPlane(_)));
    assert_eq!(err.exit_code(), 4);
    assert_eq!(count_calls(&plane, "update_service"), 1);
    assert_eq!(count_calls(&plane, "create_service"), 1);
    assert_eq!(plane.service_count(), 1);
    assert_eq!(plane.registered(SERVICE).len(), 2);

    let service = plane.service(CLUSTER, SERVICE).unwrap();
    assert_eq!(service.task_definition, first.task_definition);
}

#[tokio::test]
async fn test_existing_ingress_rule_skips_grant() {
    let plane = Arc::new(
        InMemoryControlPlane::new()
            .with_cluster(CLUSTER)
            .with_vpc_endpoint("vpc-1", "logs", "sg-logs")
            .with_ingress_rule(IngressRule {
                security_group: "sg-logs".to_string(),
                protocol: "tcp".to_string(),
                port: 443,
                source_security_group: "sg-app".to_string(),
            }),
    );

    let result = assert_ok!(reconciler(&plane, fast_options())
        .reconcile(&spec("repo:v1"))
        .await);

    assert_eq!(result.service_action, ServiceAction::Created);
    assert_eq!(result.network_patch, PatchOutcome::AlreadyPresent);
    assert_eq!(count_calls(&plane, "authorize_ingress"), 0);
    assert_eq!(plane.ingress_rules().len(), 1);
}
