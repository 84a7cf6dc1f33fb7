mod common;

use appoptics_metrics::{ClientConfig, Client, MetricsError};
use mockito::Matcher;

use common::{client_for, fast_retries};

#[tokio::test(flavor = "multi_thread")]
async fn test_not_found_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/metrics/missing")
        .with_status(404)
        .with_body("not found")
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server.url());
    let connection = client.connection().unwrap();
    let err = connection.get("metrics/missing").await.unwrap_err();

    assert!(matches!(err, MetricsError::NotFound { .. }));
    assert_eq!(err.status(), Some(404));
    assert_eq!(connection.request_counter().total_requests(), 1);
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_error_keeps_response_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/metrics")
        .with_status(400)
        .with_body("forbidden")
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server.url());
    let connection = client.connection().unwrap();
    let err = connection
        .post("metrics", serde_json::json!({"gauges": []}))
        .await
        .unwrap_err();

    assert!(matches!(err, MetricsError::ClientError { .. }));
    assert!(err.is_client_error());
    assert_eq!(err.response().unwrap().text(), "forbidden");
    assert!(err.to_string().contains("forbidden"));
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unauthorized_and_duplicate() {
    let mut server = mockito::Server::new_async().await;
    let _unauthorized = server
        .mock("GET", "/v1/unauthorized")
        .with_status(401)
        .create_async()
        .await;
    let _duplicate = server
        .mock("POST", "/v1/duplicate")
        .with_status(422)
        .create_async()
        .await;

    let client = client_for(&server.url());
    let connection = client.connection().unwrap();

    assert!(matches!(
        connection.get("unauthorized").await,
        Err(MetricsError::Unauthorized { .. })
    ));
    assert!(matches!(
        connection.post("duplicate", "{}").await,
        Err(MetricsError::EntityAlreadyExists { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_service_unavailable_exhausts_retries() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/metrics")
        .with_status(503)
        .with_body("service unavailable")
        .expect(4)
        .create_async()
        .await;

    let client = client_for(&server.url());
    let connection = client.connection().unwrap();
    let err = connection.post("metrics", "{}").await.unwrap_err();

    assert!(matches!(err, MetricsError::ServerError { .. }));
    assert!(err.is_retryable());
    assert_eq!(err.status(), Some(503));
    assert_eq!(connection.request_counter().total_requests(), 4);
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retries_resend_same_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/retry_body")
        .match_body(Matcher::JsonString(r#"{"foo":"bar","baz":"kaboom"}"#.to_string()))
        .with_status(502)
        .expect(4)
        .create_async()
        .await;

    let client = client_for(&server.url());
    let connection = client.connection().unwrap();
    let err = connection
        .post(
            "retry_body",
            serde_json::json!({"foo": "bar", "baz": "kaboom"}),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(502));
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_default_headers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/metrics")
        .match_header("authorization", "Basic Zm9vOg==")
        .match_header("content-type", "application/json")
        .match_header(
            "user-agent",
            Matcher::Regex(r"^appoptics-api-rust/\d+\.\d+\.\d+ \(rust; .+\) direct-reqwest/0\.12$".to_string()),
        )
        .with_status(200)
        .with_body(r#"{"query":{},"metrics":[]}"#)
        .create_async()
        .await;

    let client = client_for(&server.url());
    let response = client.connection().unwrap().get("metrics").await.unwrap();

    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["metrics"], serde_json::json!([]));
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_custom_user_agent_and_headers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/metrics")
        .match_header("user-agent", "foo agent")
        .match_header("x-request-source", "billing")
        .with_status(200)
        .create_async()
        .await;

    let client = Client::with_config(
        ClientConfig::new("foo")
            .with_api_endpoint(server.url())
            .with_custom_user_agent("foo agent")
            .with_header("X-Request-Source", "billing")
            .with_retry_policy(fast_retries()),
    );
    client.connection().unwrap().get("metrics").await.unwrap();
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_agent_identifier_prefixes_user_agent() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/metrics")
        .match_header(
            "user-agent",
            Matcher::Regex(r"^my-agent/1\.0 \(dev_id:abc\) appoptics-api-rust/".to_string()),
        )
        .with_status(200)
        .create_async()
        .await;

    let client = client_for(&server.url());
    client
        .set_agent_identifier(&["my-agent", "1.0", "abc"])
        .unwrap();
    client.connection().unwrap().get("metrics").await.unwrap();
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connection_refused_is_network_error() {
    let client = client_for("http://127.0.0.1:1");
    let connection = client.connection().unwrap();
    let err = connection.get("metrics").await.unwrap_err();

    assert!(matches!(err, MetricsError::Network { .. }));
    assert_eq!(connection.request_counter().total_requests(), 4);
}
