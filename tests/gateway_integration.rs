//! End-to-end tests for the HTTP gateway.
//!
//! These boot a stub contact-center API and the real gateway, both on
//! random ports, and drive the gateway with a plain HTTP client:
//! - credential acquisition and reuse across calls
//! - linked-session credential sharing
//! - status lifting (204 empty poll, 400→204 chat-profile remap, 417
//!   param errors)
//! - origin/session-key rejection
//! - end-chat teardown of the credential cache

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::{Value, json};

use livechat_bridge::bridge::Bridge;
use livechat_bridge::config::{GatewayConfig, RemoteConfig};
use livechat_bridge::gateway::{GatewayState, start_server};
use livechat_bridge::remote::http::HttpContactCenter;
use livechat_bridge::session::{FileCredentialCache, MemorySessionStore};

const SESSION_HEADER: &str = "x-session-token";

#[derive(Clone)]
struct StubState {
    addr: SocketAddr,
    auth_calls: Arc<AtomicUsize>,
    poll_calls: Arc<AtomicUsize>,
    last_sent_text: Arc<Mutex<Option<Value>>>,
}

async fn stub_token(State(state): State<StubState>) -> Json<Value> {
    state.auth_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "access_token": "stub-token",
        "token_type": "Bearer",
        "refresh_token": "stub-refresh",
        "expires_in": 3600,
        "id_token": "should-be-dropped",
    }))
}

async fn stub_discovery(State(state): State<StubState>) -> Json<Value> {
    Json(json!({ "api_endpoint": format!("http://{}", state.addr) }))
}

async fn stub_hours() -> Json<Value> {
    Json(json!({ "resultSet": { "hoursOfOperationProfiles": [
        { "profileId": "1", "days": [] },
        { "profileId": "7", "days": [] },
    ]}}))
}

async fn stub_agents() -> Json<Value> {
    Json(json!({ "agentStates": [
        { "agentId": 1, "teamId": 5, "agentStateId": 1, "agentStateName": "Available" },
        { "agentId": 2, "teamId": 9, "agentStateId": 1, "agentStateName": "Available" },
    ]}))
}

async fn stub_chat_profile(Path(poc): Path<String>) -> Response {
    if poc == "no-profile" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "no chat profile" })),
        )
            .into_response();
    }
    Json(json!({ "chatProfile": { "1": { "heroImage": "https://img.example.com/agent.png" }}}))
        .into_response()
}

async fn stub_make_chat() -> Json<Value> {
    Json(json!({ "chatSessionId": "chat-42" }))
}

async fn stub_poll(State(state): State<StubState>, Path(id): Path<String>) -> Response {
    if id == "gone" {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response();
    }
    let call = state.poll_calls.fetch_add(1, Ordering::SeqCst);
    if call == 0 {
        Json(json!({ "messages": [
            { "Type": "Chat", "Status": "Active" },
            { "Type": "Chat", "Text": "hello", "PartyTypeValue": "Agent" },
        ]}))
        .into_response()
    } else {
        // Long-poll timeout: no new content, empty body.
        StatusCode::NOT_MODIFIED.into_response()
    }
}

async fn stub_end_chat() -> Json<Value> {
    Json(json!({}))
}

async fn stub_send_text(State(state): State<StubState>, Json(body): Json<Value>) -> Json<Value> {
    *state.last_sent_text.lock().unwrap() = Some(body);
    Json(json!({ "ok": true }))
}

async fn start_stub() -> StubState {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let state = StubState {
        addr: listener.local_addr().expect("stub addr"),
        auth_calls: Arc::new(AtomicUsize::new(0)),
        poll_calls: Arc::new(AtomicUsize::new(0)),
        last_sent_text: Arc::new(Mutex::new(None)),
    };

    let app = Router::new()
        .route("/token", post(stub_token))
        .route("/discovery", get(stub_discovery))
        .route(
            "/inContactAPI/services/v13.0/hours-of-operation",
            get(stub_hours),
        )
        .route(
            "/inContactAPI/services/v13.0/agents/states",
            get(stub_agents),
        )
        .route(
            "/inContactAPI/services/v13.0/points-of-contact/{poc}/chat-profile",
            get(stub_chat_profile),
        )
        .route(
            "/inContactAPI/services/v13.0/contacts/chats",
            post(stub_make_chat),
        )
        .route(
            "/inContactAPI/services/v13.0/contacts/chats/{id}",
            get(stub_poll).delete(stub_end_chat),
        )
        .route(
            "/inContactAPI/services/v13.0/contacts/chats/{id}/send-text",
            post(stub_send_text),
        )
        .with_state(state.clone());

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    state
}

struct Harness {
    gateway: SocketAddr,
    stub: StubState,
    client: reqwest::Client,
    cache_dir: tempfile::TempDir,
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.gateway, path)
    }
}

async fn start_harness() -> Harness {
    let stub = start_stub().await;
    let cache_dir = tempfile::tempdir().expect("cache dir");

    let remote = RemoteConfig {
        auth_url: format!("http://{}/token", stub.addr),
        discovery_url: format!("http://{}/discovery", stub.addr),
        api_version: "v13.0".to_string(),
        access_key_id: "test-key".to_string(),
        access_key_secret: SecretString::from("test-secret"),
        request_timeout: Duration::from_secs(5),
    };
    let api = Arc::new(HttpContactCenter::new(remote));
    let store = Arc::new(MemorySessionStore::new());
    let cache = Arc::new(FileCredentialCache::new(cache_dir.path()));
    let state = Arc::new(GatewayState {
        bridge: Bridge::new(api, store, cache),
        config: GatewayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            allowed_domains: vec!["chat.example.com".to_string()],
            linked_session_suffix: "-linked".to_string(),
        },
    });

    let gateway = start_server("127.0.0.1:0".parse().expect("addr"), state)
        .await
        .expect("start gateway");

    Harness {
        gateway,
        stub,
        client: reqwest::Client::new(),
        cache_dir,
    }
}

#[tokio::test]
async fn full_chat_flow_reuses_one_credential() {
    let h = start_harness().await;

    // Create the chat.
    let resp = h
        .client
        .post(h.url("/make-chat"))
        .header(SESSION_HEADER, "sess-1")
        .json(&json!({ "pointOfContact": "poc-1", "fromAddress": "user@example.com" }))
        .send()
        .await
        .expect("make-chat");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["chatSessionId"], "chat-42");
    // The intended status was lifted and stripped from the body.
    assert!(body.get("code").is_none());

    // First poll delivers messages.
    let resp = h
        .client
        .get(h.url("/get-response"))
        .query(&[("chatSessionId", "chat-42"), ("timeout", "1")])
        .header(SESSION_HEADER, "sess-1")
        .send()
        .await
        .expect("get-response");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["messages"][0]["Status"], "Active");

    // Second poll has nothing: canonical 204, no body.
    let resp = h
        .client
        .get(h.url("/get-response"))
        .query(&[("chatSessionId", "chat-42"), ("timeout", "1")])
        .header(SESSION_HEADER, "sess-1")
        .send()
        .await
        .expect("get-response");
    assert_eq!(resp.status(), 204);
    assert!(resp.text().await.expect("body").is_empty());

    // Send a message, then end the chat.
    let resp = h
        .client
        .post(h.url("/send-text"))
        .query(&[("chatSessionId", "chat-42")])
        .header(SESSION_HEADER, "sess-1")
        .json(&json!({ "label": "Ada", "message": "thanks!" }))
        .send()
        .await
        .expect("send-text");
    assert_eq!(resp.status(), 200);

    let resp = h
        .client
        .post(h.url("/end-chat"))
        .query(&[("chatSessionId", "chat-42")])
        .header(SESSION_HEADER, "sess-1")
        .send()
        .await
        .expect("end-chat");
    assert_eq!(resp.status(), 200);

    // One authentication served the whole conversation.
    assert_eq!(h.stub.auth_calls.load(Ordering::SeqCst), 1);

    // Teardown removed the shared credential file.
    let leftover = std::fs::read_dir(h.cache_dir.path())
        .expect("cache dir")
        .count();
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn linked_session_shares_the_primary_credential() {
    let h = start_harness().await;

    for token in ["sess-7", "sess-7-linked"] {
        let resp = h
            .client
            .get(h.url("/hours-of-operation"))
            .header(SESSION_HEADER, token)
            .send()
            .await
            .expect("hours");
        assert_eq!(resp.status(), 200);
    }

    // The linked session imported the persisted credential instead of
    // authenticating again.
    assert_eq!(h.stub.auth_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hours_are_narrowed_to_the_requested_profile() {
    let h = start_harness().await;

    let resp = h
        .client
        .get(h.url("/hours-of-operation"))
        .query(&[("profileIdHoursOperation", "7")])
        .header(SESSION_HEADER, "sess-1")
        .send()
        .await
        .expect("hours");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    let profiles = body["resultSet"]["hoursOfOperationProfiles"]
        .as_array()
        .expect("profiles");
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0]["profileId"], "7");
}

#[tokio::test]
async fn agents_are_filtered_by_team() {
    let h = start_harness().await;

    let resp = h
        .client
        .get(h.url("/agents-availability"))
        .query(&[("teamId", "5"), ("top", "200")])
        .header(SESSION_HEADER, "sess-1")
        .send()
        .await
        .expect("agents");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    let states = body["agentStates"].as_array().expect("agentStates");
    assert_eq!(states.len(), 1);
    assert_eq!(states[0]["teamId"], 5);
}

#[tokio::test]
async fn absent_chat_profile_maps_to_no_content() {
    let h = start_harness().await;

    let resp = h
        .client
        .get(h.url("/chat-profile"))
        .query(&[("pointOfContact", "no-profile")])
        .header(SESSION_HEADER, "sess-1")
        .send()
        .await
        .expect("chat-profile");
    assert_eq!(resp.status(), 204);

    let resp = h
        .client
        .get(h.url("/chat-profile"))
        .query(&[("pointOfContact", "poc-1")])
        .header(SESSION_HEADER, "sess-1")
        .send()
        .await
        .expect("chat-profile");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(
        body["chatProfile"]["1"]["heroImage"],
        "https://img.example.com/agent.png"
    );
}

#[tokio::test]
async fn missing_params_are_expectation_failures() {
    let h = start_harness().await;

    let resp = h
        .client
        .post(h.url("/make-chat"))
        .header(SESSION_HEADER, "sess-1")
        .json(&json!({ "fromAddress": "user@example.com" }))
        .send()
        .await
        .expect("make-chat");
    assert_eq!(resp.status(), 417);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["error"], "Error with param: pointOfContact");

    let resp = h
        .client
        .get(h.url("/chat-profile"))
        .header(SESSION_HEADER, "sess-1")
        .send()
        .await
        .expect("chat-profile");
    assert_eq!(resp.status(), 417);
}

#[tokio::test]
async fn poll_404_passes_through() {
    let h = start_harness().await;

    let resp = h
        .client
        .get(h.url("/get-response"))
        .query(&[("chatSessionId", "gone")])
        .header(SESSION_HEADER, "sess-1")
        .send()
        .await
        .expect("get-response");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn session_key_and_origin_are_enforced() {
    let h = start_harness().await;

    // No session key at all.
    let resp = h
        .client
        .get(h.url("/hours-of-operation"))
        .send()
        .await
        .expect("hours");
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["error"], "Error on token");

    // Origin outside the allowlist.
    let resp = h
        .client
        .get(h.url("/hours-of-operation"))
        .header(SESSION_HEADER, "sess-1")
        .header("Origin", "https://evil.example.com")
        .send()
        .await
        .expect("hours");
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["error"], "Domain error");

    // Allowed origin passes.
    let resp = h
        .client
        .get(h.url("/hours-of-operation"))
        .header(SESSION_HEADER, "sess-1")
        .header("Origin", "https://chat.example.com")
        .send()
        .await
        .expect("hours");
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn transcript_bodies_are_flattened_for_the_agent() {
    let h = start_harness().await;

    let resp = h
        .client
        .post(h.url("/send-text"))
        .query(&[("chatSessionId", "chat-42")])
        .header(SESSION_HEADER, "sess-1")
        .json(&json!({
            "messages": [
                { "user": "guest", "message": "hi" },
                { "user": "assistant", "message": "escalating" },
            ],
            "assistant": "Botty",
            "guest": "Ada",
            "system": "System",
            "transcriptConversationText": "Transcript Conversation",
        }))
        .send()
        .await
        .expect("send-text");
    assert_eq!(resp.status(), 200);

    let sent = h
        .stub
        .last_sent_text
        .lock()
        .unwrap()
        .clone()
        .expect("stub should have received the text");
    assert_eq!(
        sent["message"],
        "<i>Ada</i>: hi<br><i>Botty</i>: escalating<br>"
    );
    assert_eq!(sent["label"], "Transcript Conversation");
    assert!(sent.get("messages").is_none());
}
