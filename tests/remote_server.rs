//! Canonical wire protocol to a registered remote server, against a mockito server.

use std::sync::Arc;

use futures::TryStreamExt;
use mockito::{Matcher, Server};
use omnixy::{
    ClientConfig, CompleteOptions, Error, McpClient, Message, PartialResponse, ServerConfig,
    Settings,
};
use serde_json::json;

fn client() -> McpClient {
    McpClient::with_provider(Arc::new(Settings::default()), "openai", ClientConfig::mock())
        .unwrap()
}

fn http(server: &mockito::ServerGuard) -> ServerConfig {
    ServerConfig::new(server.host_with_port()).with_protocol("http")
}

#[tokio::test]
async fn test_complete_posts_canonical_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/complete")
        .match_header("x-team", "core")
        .match_body(Matcher::PartialJson(json!({
            "provider": "openai",
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Explain quantum entanglement"}],
            "temperature": 0.7,
            "max_tokens": 1024,
            "stream": false
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "text": "Entanglement links states.",
                "usage": {"total_tokens": 12},
                "finish_reason": "stop"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = client();
    client
        .register_server("remote", http(&server).with_header("x-team", "core"))
        .unwrap();
    let response = client
        .complete(
            CompleteOptions::new(vec![Message::user("Explain quantum entanglement")])
                .server("remote"),
        )
        .await
        .unwrap()
        .into_response()
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(response.text(), "Entanglement links states.");
    assert_eq!(response.total_tokens(), Some(12));
}

#[tokio::test]
async fn test_stream_decodes_ndjson_fragments() {
    let mut server = Server::new_async().await;
    let body = [
        json!({"partial_text": "Hello "}),
        json!({"partial_text": "world"}),
        json!({"partial_text": "", "is_final": true, "metadata": {"finish_reason": "stop"}}),
        json!({"partial_text": "ignored"}),
    ]
    .iter()
    .map(|v| format!("{}\n", v))
    .collect::<String>();
    let mock = server
        .mock("POST", "/stream")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let client = client();
    client.register_server("remote", http(&server)).unwrap();
    let stream = client
        .complete(
            CompleteOptions::new(vec![Message::user("hi")])
                .server("remote")
                .stream(true),
        )
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    let parts: Vec<PartialResponse> = stream.try_collect().await.unwrap();

    mock.assert_async().await;
    let text: String = parts.iter().map(|p| p.partial_text.as_str()).collect();
    assert_eq!(text, "Hello world");
    assert!(parts.last().unwrap().is_final);
    assert_eq!(parts.last().unwrap().finish_reason(), Some("stop"));
}

#[tokio::test]
async fn test_stream_without_final_fragment_is_closed() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/stream")
        .with_status(200)
        .with_body("{\"partial_text\": \"only\"}\n")
        .create_async()
        .await;

    let client = client();
    client.register_server("remote", http(&server)).unwrap();
    let parts: Vec<PartialResponse> = client
        .complete(
            CompleteOptions::new(vec![Message::user("hi")])
                .server("remote")
                .stream(true),
        )
        .await
        .unwrap()
        .into_stream()
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(parts.len(), 2);
    assert!(!parts[0].is_final);
    assert!(parts[1].is_final);
}

#[tokio::test]
async fn test_server_error_status() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/complete")
        .with_status(503)
        .with_body(json!({"error": {"message": "overloaded"}}).to_string())
        .create_async()
        .await;

    let client = client();
    client.register_server("remote", http(&server)).unwrap();
    let err = client
        .complete(CompleteOptions::new(vec![Message::user("hi")]).server("remote"))
        .await
        .unwrap_err();
    match err {
        Error::Remote { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "overloaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_register_server_requires_url() {
    let client = client();
    let err = client
        .register_server("remote", ServerConfig::default())
        .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}
