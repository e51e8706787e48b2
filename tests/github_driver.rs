//! GitHub driver: fixture data in test mode, REST v3 when live.

use futures::TryStreamExt;
use mockito::{Matcher, Server};
use omnixy::drivers::GitHubDriver;
use omnixy::{DriverConfig, Error, PartialResponse, ProviderDriver, Request, ServiceKind};
use serde_json::json;

fn test_driver() -> GitHubDriver {
    GitHubDriver::new(
        "github",
        DriverConfig {
            test_mode: true,
            ..Default::default()
        },
    )
    .unwrap()
}

fn live_driver(base_url: String) -> GitHubDriver {
    GitHubDriver::new(
        "github",
        DriverConfig {
            api_key: Some("ghp_test".into()),
            base_url: Some(base_url),
            ..Default::default()
        },
    )
    .unwrap()
}

fn action(name: &str) -> omnixy::types::RequestBuilder {
    Request::builder("github").metadata("action", name)
}

#[tokio::test]
async fn test_get_repository_in_test_mode() {
    let driver = test_driver();
    assert_eq!(driver.service_kind(), ServiceKind::NonLlm);
    let request = action("get_repository")
        .parameter("repo", "test-user/test-repo")
        .build()
        .unwrap();
    let response = driver.send_request(&request).await.unwrap();
    assert_eq!(
        response.plugin_data()["github_data"][0]["full_name"],
        "test-user/test-repo"
    );
    assert_eq!(response.model(), Some("github"));
    assert!(response.metadata().contains_key("timestamp"));
}

#[tokio::test]
async fn test_create_issue_in_test_mode() {
    let request = action("create_issue")
        .parameter("repo", "test-user/test-repo")
        .parameter("title", "Bug")
        .parameter("body", "Steps")
        .build()
        .unwrap();
    let response = test_driver().send_request(&request).await.unwrap();
    let issue = &response.plugin_data()["github_data"][0];
    assert_eq!(issue["title"], "Bug");
}

#[tokio::test]
async fn test_unknown_action() {
    let request = action("delete_everything").build().unwrap();
    let err = test_driver().send_request(&request).await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedAction { .. }));
}

#[tokio::test]
async fn test_stream_degrades_to_one_fragment() {
    let request = action("list_repositories").build().unwrap();
    let parts: Vec<PartialResponse> = test_driver()
        .stream_tokens(&request)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(parts.len(), 1);
    assert!(parts[0].is_final);
    assert_eq!(parts[0].plugin_data["github_data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_live_get_repository() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/repos/octo/hello")
        .match_header("authorization", "token ghp_test")
        .match_header("accept", "application/vnd.github.v3+json")
        .with_status(200)
        .with_body(json!({"id": 7, "name": "hello", "full_name": "octo/hello"}).to_string())
        .create_async()
        .await;

    let request = action("get_repository")
        .parameter("repo", "octo/hello")
        .build()
        .unwrap();
    let response = live_driver(server.url()).send_request(&request).await.unwrap();
    mock.assert_async().await;
    assert_eq!(response.plugin_data()["github_data"][0]["id"], 7);
}

#[tokio::test]
async fn test_live_search_unwraps_items() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/search/code")
        .match_query(Matcher::UrlEncoded("q".into(), "fn main".into()))
        .with_status(200)
        .with_body(
            json!({"total_count": 1, "items": [{"path": "src/main.rs"}]}).to_string(),
        )
        .create_async()
        .await;

    let request = action("search_code")
        .parameter("query", "fn main")
        .build()
        .unwrap();
    let response = live_driver(server.url()).send_request(&request).await.unwrap();
    assert_eq!(
        response.plugin_data()["github_data"],
        json!([{"path": "src/main.rs"}])
    );
}
