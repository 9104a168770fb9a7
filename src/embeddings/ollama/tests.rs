use super::*;
use crate::config::OllamaConfig;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, batch_size: u32) -> OllamaConfig {
    OllamaConfig {
        host: server.address().ip().to_string(),
        port: server.address().port(),
        batch_size,
        ..OllamaConfig::default()
    }
}

fn texts(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
        embedding_dimension: 768,
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.retry_attempts, 5);
}

#[test]
fn empty_input_skips_network() {
    let client = OllamaClient::new(&OllamaConfig::default()).expect("Failed to create client");

    let batch = client.embed(&[]).expect("empty batch should succeed");

    assert!(batch.vectors.is_empty());
    assert_eq!(batch.token_usage, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn embed_returns_vectors_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]],
            "prompt_eval_count": 7
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, 16))
        .expect("Failed to create client")
        .with_retry_attempts(1);
    let batch = tokio::task::spawn_blocking(move || client.embed(&texts(&["first", "second"])))
        .await
        .expect("task should join")
        .expect("embedding should succeed");

    assert_eq!(batch.dimension, 3);
    assert_eq!(batch.token_usage, 7);
    assert_eq!(batch.vectors, vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn embed_splits_into_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0]]
        })))
        .expect(3)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, 1))
        .expect("Failed to create client")
        .with_retry_attempts(1);
    let batch = tokio::task::spawn_blocking(move || client.embed(&texts(&["a b", "c", "d e f"])))
        .await
        .expect("task should join")
        .expect("embedding should succeed");

    assert_eq!(batch.vectors.len(), 3);
    // No prompt_eval_count in the response, so usage falls back to the estimate
    assert_eq!(batch.token_usage, 3 + 1 + 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn response_count_mismatch_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0]]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, 16))
        .expect("Failed to create client")
        .with_retry_attempts(1);
    let result = tokio::task::spawn_blocking(move || client.embed(&texts(&["one", "two"])))
        .await
        .expect("task should join");

    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, 16))
        .expect("Failed to create client")
        .with_retry_attempts(3);
    let result = tokio::task::spawn_blocking(move || client.embed_query("missing model"))
        .await
        .expect("task should join");

    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_requires_configured_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "other-model:latest"}]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, 16))
        .expect("Failed to create client")
        .with_retry_attempts(1);
    let result = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("task should join");

    assert!(result.is_err());
}

#[test]
fn only_server_and_transport_errors_are_transient() {
    assert!(is_transient(&ureq::Error::StatusCode(503)));
    assert!(is_transient(&ureq::Error::ConnectionFailed));
    assert!(is_transient(&ureq::Error::HostNotFound));
    assert!(!is_transient(&ureq::Error::StatusCode(404)));
    assert!(!is_transient(&ureq::Error::StatusCode(400)));
}

#[test]
fn backoff_doubles_per_attempt() {
    assert_eq!(backoff(1), Duration::from_secs(1));
    assert_eq!(backoff(2), Duration::from_secs(2));
    assert_eq!(backoff(3), Duration::from_secs(4));
}
