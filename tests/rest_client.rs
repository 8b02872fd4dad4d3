//! End-to-end tests of generated clients.

use armature_rest::prelude::*;
use armature_rest::{Response, propagation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    id: u64,
    name: String,
}

#[derive(Debug, Serialize)]
pub struct NewUser {
    name: String,
}

#[rest_client("users")]
pub trait UserApi {
    /// Fetch a user.
    #[get("users/{id}")]
    async fn get_user(&self, #[path] id: u64, #[query] expand: Option<String>) -> Result<User>;

    #[post("users")]
    #[headers("Accept: application/json")]
    async fn create(&self, #[body] user: &NewUser) -> Result<User>;

    #[delete("users/{id}")]
    #[service_account("admin", scopes = ["users:write"])]
    async fn delete(&self, #[path] id: u64, #[header("X-Reason")] reason: &str) -> Result<()>;

    #[get("users/{id}/name")]
    #[response(text)]
    async fn name(&self, #[path("id")] user: u64) -> Result<String>;

    #[get("users/{id}/avatar")]
    async fn avatar(&self, #[path] id: u64) -> Result<Response>;
}

#[rest_client("search", client = Search)]
pub trait SearchApi {
    #[get("search")]
    #[timeout(ms = 100)]
    async fn search(&self, #[query("q")] query: &str, #[query] tags: Vec<String>) -> Result<Vec<User>>;
}

struct StaticTokens;

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn fetch_token(&self, account: &ServiceAccount) -> Result<armature_rest::AccessToken> {
        Ok(armature_rest::AccessToken {
            token: format!("{}-token", account.name),
            expires_in: Some(Duration::from_secs(600)),
        })
    }
}

fn clients(server: &MockServer) -> RestClients {
    let config = RestClientsConfig::from_toml_str(&format!(
        r#"
        [services.users]
        base_url = "{uri}/v1/"
        propagate_auth_header = true

        [services.users.retry]
        max_attempts = 3
        wait_duration = "10ms"

        [services.search]
        base_url = "{uri}/"
        "#,
        uri = server.uri()
    ))
    .unwrap();

    RestClients::builder(config)
        .token_provider(Arc::new(StaticTokens))
        .build()
        .unwrap()
}

#[test]
fn test_descriptor_table() {
    let descriptor = <UserApiClient as RestService>::descriptor();
    assert_eq!(descriptor.name(), "users");
    assert_eq!(descriptor.endpoints().len(), 5);
    descriptor.validate().unwrap();

    let delete = descriptor.endpoint("delete").unwrap();
    assert_eq!(delete.method(), &armature_rest::Method::DELETE);
    assert_eq!(delete.path(), "users/{id}");
    assert_eq!(delete.service_account().unwrap().scopes, vec!["users:write"]);

    let create = descriptor.endpoint("create").unwrap();
    assert_eq!(
        create.headers(),
        &[("Accept".to_string(), "application/json".to_string())]
    );

    let search = <Search as RestService>::descriptor();
    assert_eq!(
        search.endpoint("search").unwrap().timeout(),
        Some(Duration::from_millis(100))
    );
}

#[tokio::test]
async fn test_generated_client_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/users/7"))
        .and(query_param("expand", "groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 7,
            "name": "ada"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/users"))
        .and(header("accept", "application/json"))
        .and(body_json(serde_json::json!({"name": "grace"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": 8,
            "name": "grace"
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/users/7"))
        .and(header("authorization", "Bearer admin-token"))
        .and(header("x-reason", "left"))
        .respond_with(ResponseTemplate::new(200).set_body_string("deleted"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/7/name"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ada"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/7/avatar"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0x89, b'P', b'N', b'G']),
        )
        .mount(&server)
        .await;

    let users: UserApiClient = clients(&server).create().unwrap();

    let user = users.get_user(7, Some("groups".into())).await.unwrap();
    assert_eq!(user.name, "ada");

    let created = users
        .create(&NewUser {
            name: "grace".into(),
        })
        .await
        .unwrap();
    assert_eq!(created.id, 8);

    users.delete(7, "left").await.unwrap();
    assert_eq!(users.name(7).await.unwrap(), "ada");

    let avatar = users.avatar(7).await.unwrap();
    assert_eq!(avatar.content_type(), Some("image/png"));
    assert_eq!(avatar.bytes().as_ref(), &[0x89, b'P', b'N', b'G']);
}

#[tokio::test]
async fn test_generated_client_retries_and_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer caller"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 1,
            "name": "ada"
        })))
        .mount(&server)
        .await;

    let users: UserApiClient = clients(&server).create().unwrap();
    let mut inbound = armature_rest::HeaderMap::new();
    inbound.insert(
        "authorization",
        armature_rest::HeaderValue::from_static("Bearer caller"),
    );

    let user = propagation::scope(inbound, users.get_user(1, None))
        .await
        .unwrap();
    assert_eq!(user.id, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_generated_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/users/404"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let clients = clients(&server);
    let users: UserApiClient = clients.create().unwrap();
    let err = users.get_user(404, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermanentTransport);
    assert_eq!(err.status_code(), Some(404));

    // The endpoint's own deadline applies.
    let search: Search = clients.create().unwrap();
    let err = search
        .search("ada", vec!["admin".into(), "ops".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, RestClientError::CallTimeout(_)));
}

#[test]
fn test_standalone_client() {
    let search = Search::new(ClientConfig::with_base_url("http://localhost:8080/")).unwrap();
    assert_eq!(search.proxy().service(), "search");

    let err = Search::new(ClientConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    // Service-account endpoints need a token provider.
    let err = UserApiClient::new(ClientConfig::with_base_url("http://localhost:8080/")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_missing_service_configuration() {
    let clients = RestClients::new(RestClientsConfig::default()).unwrap();
    let err = clients.create::<Search>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
