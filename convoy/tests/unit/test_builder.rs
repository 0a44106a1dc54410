//! Desired-state builder tests

use std::collections::HashMap;

use convoy::deploy::builder::{build_spec, DeploymentInputs};
use convoy::errors::ReconcileError;
use convoy::models::spec::Architecture;
use convoy::stack::{keys, StackOutputs};

fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn full_outputs() -> StackOutputs {
    StackOutputs::new()
        .with(keys::EXECUTION_ROLE, "role/exec")
        .with(keys::TASK_ROLE, "role/task")
        .with(keys::VPC_ID, "vpc-1")
        .with(keys::SUBNET_IDS, "subnet-a,subnet-b")
        .with(keys::SECURITY_GROUP_ID, "sg-app")
}

fn base_vars() -> Vec<(String, String)> {
    vars(&[
        ("PROJECT_NAME", "demo"),
        ("ENVIRONMENT", "dev"),
        ("SERVICE_NAME", "svc"),
        ("IMAGE_URI", "registry.local:5000/team/app:v7"),
    ])
}

fn configuration_message(err: ReconcileError) -> String {
    match err {
        ReconcileError::Configuration(msg) => msg,
        other => panic!("expected configuration error, got {:?}", other),
    }
}

#[test]
fn test_inputs_read_from_variables() {
    let mut raw = base_vars();
    raw.extend(vars(&[
        ("TASK_CPU", "512"),
        ("TASK_MEMORY", "1024"),
        ("CONTAINER_PORT", "9000"),
        ("DESIRED_COUNT", "3"),
        ("ASSIGN_PUBLIC_IP", "ENABLED"),
        ("CONTAINER_ENV_LOG_FORMAT", "json"),
        ("CONTAINER_ENV_", "ignored"),
        ("UNRELATED", "x"),
    ]));

    let inputs = DeploymentInputs::from_vars(raw);
    let spec = build_spec(&inputs, &full_outputs(), "aarch64").unwrap();

    assert_eq!(spec.service_name(), "demo-dev-svc");
    assert_eq!(spec.image().repository, "registry.local:5000/team/app");
    assert_eq!(spec.image().tag, "v7");
    assert_eq!(spec.cpu(), 512);
    assert_eq!(spec.memory(), 1024);
    assert_eq!(spec.port(), 9000);
    assert_eq!(spec.desired_count(), 3);
    assert!(spec.network().assign_public_ip);
    assert_eq!(spec.architecture(), Architecture::Arm64);
    assert_eq!(spec.environment().len(), 1);
    assert_eq!(
        spec.environment().get("LOG_FORMAT").map(String::as_str),
        Some("json")
    );
    assert_eq!(spec.execution_role_ref(), "role/exec");
    assert_eq!(spec.task_role_ref(), "role/task");
}

#[test]
fn test_cli_overrides_win() {
    let mut args = HashMap::new();
    args.insert("service".to_string(), "api".to_string());
    args.insert("image".to_string(), "repo:v2".to_string());

    let inputs = DeploymentInputs::from_vars(base_vars()).with_overrides(&args);
    let spec = build_spec(&inputs, &full_outputs(), "x86_64").unwrap();

    assert_eq!(spec.service_name(), "demo-dev-api");
    assert_eq!(spec.container_name(), "api");
    assert_eq!(spec.image().tag, "v2");
}

#[test]
fn test_identity_checked_before_image() {
    let inputs = DeploymentInputs::from_vars(vars(&[("ENVIRONMENT", "dev")]));
    let msg = configuration_message(build_spec(&inputs, &full_outputs(), "x86_64").unwrap_err());
    assert!(msg.contains("project"), "{}", msg);
}

#[test]
fn test_image_checked_before_roles() {
    let inputs = DeploymentInputs::from_vars(vars(&[
        ("PROJECT_NAME", "demo"),
        ("ENVIRONMENT", "dev"),
        ("SERVICE_NAME", "svc"),
    ]));
    let msg = configuration_message(build_spec(&inputs, &StackOutputs::new(), "x86_64").unwrap_err());
    assert!(msg.contains("image"), "{}", msg);
}

#[test]
fn test_missing_role_named() {
    let outputs = StackOutputs::new().with(keys::EXECUTION_ROLE, "role/exec");
    let inputs = DeploymentInputs::from_vars(base_vars());
    let msg = configuration_message(build_spec(&inputs, &outputs, "x86_64").unwrap_err());
    assert!(msg.contains(keys::TASK_ROLE), "{}", msg);
}

#[test]
fn test_invalid_identity_rejected() {
    let mut raw = base_vars();
    raw.push(("SERVICE_NAME".to_string(), "my svc!".to_string()));
    let inputs = DeploymentInputs::from_vars(raw);
    assert!(matches!(
        build_spec(&inputs, &full_outputs(), "x86_64"),
        Err(ReconcileError::Configuration(_))
    ));
}

#[test]
fn test_bad_sizing_rejected() {
    for (var, value) in [
        ("TASK_MEMORY", "lots"),
        ("CONTAINER_PORT", "70000"),
        ("DESIRED_COUNT", "-1"),
        ("ASSIGN_PUBLIC_IP", "maybe"),
    ] {
        let mut raw = base_vars();
        raw.push((var.to_string(), value.to_string()));
        let inputs = DeploymentInputs::from_vars(raw);
        assert!(
            matches!(
                build_spec(&inputs, &full_outputs(), "x86_64"),
                Err(ReconcileError::Configuration(_))
            ),
            "{}={} should be rejected",
            var,
            value
        );
    }
}

#[test]
fn test_network_may_be_incomplete_at_build_time() {
    let outputs = StackOutputs::new()
        .with(keys::EXECUTION_ROLE, "role/exec")
        .with(keys::TASK_ROLE, "role/task");
    let inputs = DeploymentInputs::from_vars(base_vars());

    let spec = build_spec(&inputs, &outputs, "x86_64").unwrap();
    assert!(!spec.network().is_complete());
    assert!(spec.load_balancer_target_ref().is_none());
}

#[test]
fn test_zero_desired_count_allowed() {
    let mut raw = base_vars();
    raw.push(("DESIRED_COUNT".to_string(), "0".to_string()));
    let spec = build_spec(&DeploymentInputs::from_vars(raw), &full_outputs(), "x86_64").unwrap();
    assert_eq!(spec.desired_count(), 0);
}
