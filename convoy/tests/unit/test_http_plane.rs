//! REST control plane tests against a local mock server

use std::time::Duration;

use convoy::errors::ReconcileError;
use convoy::http::client::HttpClient;
use convoy::models::plane::{IngressOutcome, IngressRule};
use convoy::plane::ControlPlane;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INGRESS_PATH: &str = "/v1/security-groups/sg-logs/ingress";

fn rule() -> IngressRule {
    IngressRule {
        security_group: "sg-logs".to_string(),
        protocol: "tcp".to_string(),
        port: 443,
        source_security_group: "sg-app".to_string(),
    }
}

fn client(server: &MockServer) -> HttpClient {
    HttpClient::new(
        &format!("{}/v1", server.uri()),
        Some("t0ken".to_string().into()),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_ingress_grant_with_empty_body() {
    for status in [201, 204] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(INGRESS_PATH))
            .and(header("authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = assert_ok!(client(&server).authorize_ingress(&rule()).await);
        assert_eq!(outcome, IngressOutcome::Created, "status {}", status);
    }
}

#[tokio::test]
async fn test_duplicate_ingress_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGRESS_PATH))
        .respond_with(ResponseTemplate::new(409).set_body_string("rule already exists"))
        .mount(&server)
        .await;

    let outcome = assert_ok!(client(&server).authorize_ingress(&rule()).await);
    assert_eq!(outcome, IngressOutcome::AlreadyExists);
}

#[tokio::test]
async fn test_throttled_ingress_grant_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGRESS_PATH))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = assert_err!(client(&server).authorize_ingress(&rule()).await);
    assert!(matches!(err, ReconcileError::TransientControlPlane(_)));
}

#[tokio::test]
async fn test_missing_service_is_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/clusters/demo-dev-cluster/services/demo-dev-svc"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let service = assert_ok!(
        client(&server)
            .describe_service("demo-dev-cluster", "demo-dev-svc")
            .await
    );
    assert!(service.is_none());
}
