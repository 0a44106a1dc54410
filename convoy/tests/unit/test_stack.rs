//! Stack output resolution tests

use convoy::errors::ReconcileError;
use convoy::filesys::file::File;
use convoy::stack::{keys, EnvStackOutputs, JsonFileOutputs, StackOutputResolver, StackOutputs};
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_flat_document_with_provider_aliases() {
    let outputs = JsonFileOutputs::parse(
        r#"{
            "ExecutionRoleArn": "role/exec",
            "TaskRoleArn": "role/task",
            "VpcId": "vpc-1",
            "PrivateSubnets": "subnet-a,subnet-b",
            "ServiceSecurityGroupId": "sg-app",
            "DashboardUrl": "https://example.invalid"
        }"#,
    )
    .unwrap();

    assert_eq!(outputs.get(keys::EXECUTION_ROLE), Some("role/exec"));
    assert_eq!(outputs.get(keys::SECURITY_GROUP_ID), Some("sg-app"));
    assert_eq!(outputs.list(keys::SUBNET_IDS), vec!["subnet-a", "subnet-b"]);
    assert_eq!(outputs.len(), 5);
}

#[test]
fn test_list_document() {
    let outputs = JsonFileOutputs::parse(
        r#"[
            {"OutputKey": "TaskExecutionRoleArn", "OutputValue": "role/exec"},
            {"OutputKey": "TargetGroupArn", "OutputValue": "tg/web"},
            {"OutputKey": "SubnetIds", "OutputValue": "  "}
        ]"#,
    )
    .unwrap();

    assert_eq!(outputs.get(keys::EXECUTION_ROLE), Some("role/exec"));
    assert_eq!(outputs.get(keys::TARGET_GROUP_REF), Some("tg/web"));
    assert!(outputs.get(keys::SUBNET_IDS).is_none());
}

#[test]
fn test_unreadable_document_is_configuration_error() {
    let err = JsonFileOutputs::parse("[1, 2").unwrap_err();
    assert!(matches!(err, ReconcileError::Configuration(_)));
}

#[test]
fn test_require_names_missing_output() {
    let outputs = StackOutputs::new().with(keys::TASK_ROLE, "role/task");
    let err = outputs.require(keys::EXECUTION_ROLE).unwrap_err();
    assert!(err.to_string().contains(keys::EXECUTION_ROLE));
}

#[tokio::test]
async fn test_env_resolver() {
    let resolver = EnvStackOutputs::new(vec![
        ("EXECUTION_ROLE_ARN".to_string(), "role/exec".to_string()),
        ("SUBNET_IDS".to_string(), "subnet-a".to_string()),
        ("SECURITY_GROUP_ID".to_string(), "".to_string()),
        ("HOME".to_string(), "/root".to_string()),
    ]);

    let outputs = assert_ok!(resolver.resolve().await);
    assert_eq!(outputs.get(keys::EXECUTION_ROLE), Some("role/exec"));
    assert_eq!(outputs.list(keys::SUBNET_IDS), vec!["subnet-a"]);
    assert!(outputs.get(keys::SECURITY_GROUP_ID).is_none());
    assert_eq!(outputs.len(), 2);
}

#[tokio::test]
async fn test_json_file_resolver() {
    let path = std::env::temp_dir().join(format!(
        "convoy-outputs-{}.json",
        convoy::utils::generate_uuid()
    ));
    let file = File::new(&path);
    file.write_string(r#"{"VpcId": "vpc-9"}"#).await.unwrap();

    let outputs = assert_ok!(JsonFileOutputs::new(file).resolve().await);
    assert_eq!(outputs.get(keys::VPC_ID), Some("vpc-9"));

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn test_missing_outputs_file() {
    let resolver = JsonFileOutputs::new(File::new("/nonexistent/outputs.json"));
    let err = assert_err!(resolver.resolve().await);
    assert!(matches!(err, ReconcileError::Configuration(_)));
}
