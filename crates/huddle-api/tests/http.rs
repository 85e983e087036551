use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use huddle_api::blobs::DiskBlobStore;
use huddle_api::email::EmailSender;
use huddle_api::unfurl::{LinkUnfurler, NoopUnfurler};
use huddle_api::{AppState, AppStateInner, routes};
use huddle_db::Database;
use huddle_gateway::dispatcher::Dispatcher;
use huddle_types::api::Claims;
use huddle_types::models::LinkPreview;

const SECRET: &str = "test-secret";

/// Only answers once every expected fetch is in flight at the same time.
struct RendezvousUnfurler {
    barrier: tokio::sync::Barrier,
}

#[async_trait]
impl LinkUnfurler for RendezvousUnfurler {
    async fn fetch_preview(&self, url: &str) -> Option<LinkPreview> {
        tokio::time::timeout(std::time::Duration::from_secs(2), self.barrier.wait())
            .await
            .ok()?;
        Some(LinkPreview {
            url: url.to_string(),
            title: Some(url.to_string()),
            description: None,
            image_url: None,
        })
    }
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl EmailSender for Outbox {
    async fn send(&self, to: &str, _subject: &str, body_html: &str) -> Result<()> {
        self.sent.lock().unwrap().push((to.to_string(), body_html.to_string()));
        Ok(())
    }
}

struct Harness {
    app: Router,
    outbox: Arc<Outbox>,
    blob_dir: std::path::PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.blob_dir);
    }
}

async fn harness() -> Harness {
    harness_with(Arc::new(NoopUnfurler)).await
}

async fn harness_with(unfurler: Arc<dyn LinkUnfurler>) -> Harness {
    let blob_dir = std::env::temp_dir().join(format!("huddle-http-{}", Uuid::new_v4()));
    let outbox = Arc::new(Outbox::default());
    let state: AppState = Arc::new(AppStateInner {
        db: Arc::new(Database::open_in_memory().unwrap()),
        dispatcher: Dispatcher::new(),
        jwt_secret: SECRET.to_string(),
        blobs: Arc::new(DiskBlobStore::new(blob_dir.clone(), "http://chat.test").await.unwrap()),
        unfurler,
        email: outbox.clone(),
        public_url: "http://chat.test".to_string(),
        invite_ttl_days: 7,
    });
    Harness {
        app: routes::router(state),
        outbox,
        blob_dir,
    }
}

struct Person {
    id: Uuid,
    token: String,
}

fn person(name: &str) -> Person {
    let id = Uuid::new_v4();
    let claims = Claims {
        sub: id,
        email: format!("{}@example.com", name.to_lowercase()),
        name: name.to_string(),
        exp: 4_102_444_800,
    };
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
    Person { id, token }
}

async fn call(app: &Router, method: Method, uri: &str, who: Option<&Person>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(p) = who {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", p.token));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn sync(app: &Router, p: &Person) {
    let (status, _) = call(app, Method::POST, "/users/me", Some(p), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn rejects_missing_or_forged_tokens() {
    let h = harness().await;
    let (status, _) = call(&h.app, Method::GET, "/workspaces", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = Person {
        id: Uuid::new_v4(),
        token: "not.a.jwt".to_string(),
    };
    let (status, _) = call(&h.app, Method::GET, "/workspaces", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn acme_flow_over_http() {
    let h = harness().await;
    let (ada, bob) = (person("Ada"), person("Bob"));
    sync(&h.app, &ada).await;

    let (status, ws) = call(&h.app, Method::POST, "/workspaces", Some(&ada), Some(json!({ "name": "Acme" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let ws_id = ws["id"].as_str().unwrap().to_string();

    // Invite Bob; the link is mailed and also returned.
    let (status, invite) = call(
        &h.app,
        Method::POST,
        &format!("/workspaces/{ws_id}/invites"),
        Some(&ada),
        Some(json!({ "email": "Bob@Example.com", "role": "member" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = invite["token"].as_str().unwrap().to_string();
    assert_eq!(invite["link"], format!("http://chat.test/invite/{token}"));
    {
        let sent = h.outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "bob@example.com");
        assert!(sent[0].1.contains(&token));
    }

    // The landing page needs no session.
    let (status, details) = call(&h.app, Method::GET, &format!("/invites/{token}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["display_status"], "pending");
    assert_eq!(details["workspace"]["name"], "Acme");

    sync(&h.app, &bob).await;
    let accept = format!("/invites/{token}/accept");
    let (status, accepted) = call(&h.app, Method::POST, &accept, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["already_member"], false);
    let (_, again) = call(&h.app, Method::POST, &accept, Some(&bob), None).await;
    assert_eq!(again["already_member"], true);

    let (status, channel) = call(
        &h.app,
        Method::POST,
        &format!("/workspaces/{ws_id}/channels"),
        Some(&ada),
        Some(json!({ "name": "general" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let channel_id = channel["id"].as_str().unwrap().to_string();

    let (status, posted) = call(
        &h.app,
        Method::POST,
        &format!("/channels/{channel_id}/messages"),
        Some(&bob),
        Some(json!({ "text": "hello team" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(posted["author_name"], "Bob");
    assert_eq!(posted["author_id"], bob.id.to_string());
    let message_id = posted["id"].as_str().unwrap().to_string();

    // Timestamps are millisecond-grained; keep the reply strictly later.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let (status, reply) = call(
        &h.app,
        Method::POST,
        &format!("/channels/{channel_id}/messages"),
        Some(&ada),
        Some(json!({ "text": "welcome!", "reply_to": &message_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["reply_to"], message_id.as_str());

    let (_, page) = call(&h.app, Method::GET, &format!("/channels/{channel_id}/messages"), Some(&ada), None).await;
    let page = page.as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["reply_count"], 1);

    let (_, thread) = call(&h.app, Method::GET, &format!("/messages/{message_id}/thread"), Some(&bob), None).await;
    assert_eq!(thread.as_array().unwrap().len(), 1);

    // Bob has an unread reply from Ada until he reads the channel.
    let unread = format!("/workspaces/{ws_id}/unread");
    let (_, counts) = call(&h.app, Method::GET, &unread, Some(&bob), None).await;
    assert_eq!(counts["total"], 1);
    let (status, _) = call(&h.app, Method::POST, &format!("/channels/{channel_id}/read"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, counts) = call(&h.app, Method::GET, &unread, Some(&bob), None).await;
    assert_eq!(counts["total"], 0);

    let reactions = format!("/messages/{message_id}/reactions");
    let (_, first) = call(&h.app, Method::POST, &reactions, Some(&ada), Some(json!({ "emoji": "🎉" }))).await;
    assert_eq!(first["result"], "added");
    let (_, second) = call(&h.app, Method::POST, &reactions, Some(&ada), Some(json!({ "emoji": "🎉" }))).await;
    assert_eq!(second["result"], "removed");
}

#[tokio::test]
async fn store_errors_map_to_status_codes() {
    let h = harness().await;
    let (ada, bob, eve) = (person("Ada"), person("Bob"), person("Eve"));
    for p in [&ada, &bob, &eve] {
        sync(&h.app, p).await;
    }

    let (_, ws) = call(&h.app, Method::POST, "/workspaces", Some(&ada), Some(json!({ "name": "Acme" }))).await;
    let ws_id = ws["id"].as_str().unwrap().to_string();

    // Outsiders can't look in.
    let (status, _) = call(&h.app, Method::GET, &format!("/workspaces/{ws_id}/channels"), Some(&eve), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Inviting an existing member conflicts.
    let (status, _) = call(
        &h.app,
        Method::POST,
        &format!("/workspaces/{ws_id}/invites"),
        Some(&ada),
        Some(json!({ "email": "ada@example.com", "role": "admin" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // An invite for Bob can't be redeemed by Eve.
    let (_, invite) = call(
        &h.app,
        Method::POST,
        &format!("/workspaces/{ws_id}/invites"),
        Some(&ada),
        Some(json!({ "email": "bob@example.com", "role": "member" })),
    )
    .await;
    let accept = format!("/invites/{}/accept", invite["token"].as_str().unwrap());
    let (status, _) = call(&h.app, Method::POST, &accept, Some(&eve), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&h.app, Method::POST, "/invites/no-such-token/accept", Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Only the owner may delete.
    call(&h.app, Method::POST, &accept, Some(&bob), None).await;
    let (status, _) = call(&h.app, Method::DELETE, &format!("/workspaces/{ws_id}"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, report) = call(&h.app, Method::DELETE, &format!("/workspaces/{ws_id}"), Some(&ada), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["members"], 2);
    assert_eq!(report["invites"], 1);
}

#[tokio::test]
async fn file_round_trip() {
    let h = harness().await;
    let ada = person("Ada");

    let req = Request::builder()
        .method(Method::POST)
        .uri("/files")
        .header(header::AUTHORIZATION, format!("Bearer {}", ada.token))
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("quarterly numbers"))
        .unwrap();
    let response = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let upload: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    let key = upload["content_key"].as_str().unwrap().to_string();
    assert_eq!(upload["size"], 17);
    assert_eq!(upload["url"], format!("http://chat.test/files/{key}"));

    let req = Request::builder().uri(format!("/files/{key}")).body(Body::empty()).unwrap();
    let response = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(response.headers()[header::CONTENT_DISPOSITION], "attachment");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"quarterly numbers");

    let (status, _) = call(&h.app, Method::GET, "/files/../../etc/passwd", None, None).await;
    assert_ne!(status, StatusCode::OK);

    let (status, _) = call(&h.app, Method::POST, "/files", Some(&ada), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

async fn workspace_with_channel(app: &Router, owner: &Person) -> String {
    let (_, ws) = call(app, Method::POST, "/workspaces", Some(owner), Some(json!({ "name": "Acme" }))).await;
    let ws_id = ws["id"].as_str().unwrap().to_string();
    let (_, channel) = call(
        app,
        Method::POST,
        &format!("/workspaces/{ws_id}/channels"),
        Some(owner),
        Some(json!({ "name": "general" })),
    )
    .await;
    channel["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn paging_walks_back_by_message_id() {
    let h = harness().await;
    let ada = person("Ada");
    sync(&h.app, &ada).await;
    let channel_id = workspace_with_channel(&h.app, &ada).await;

    let messages = format!("/channels/{channel_id}/messages");
    for i in 0..5 {
        call(&h.app, Method::POST, &messages, Some(&ada), Some(json!({ "text": format!("m{i}") }))).await;
    }

    let mut seen = Vec::new();
    let mut uri = format!("{messages}?limit=2");
    loop {
        let (status, page) = call(&h.app, Method::GET, &uri, Some(&ada), None).await;
        assert_eq!(status, StatusCode::OK);
        let page = page.as_array().unwrap().clone();
        if page.is_empty() {
            break;
        }
        let mut older: Vec<String> = page.iter().map(|m| m["text"].as_str().unwrap().to_string()).collect();
        older.append(&mut seen);
        seen = older;
        uri = format!("{messages}?limit=2&before={}", page[0]["id"].as_str().unwrap());
    }
    assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4"]);

    let (status, _) = call(&h.app, Method::GET, &format!("{messages}?before={}", Uuid::new_v4()), Some(&ada), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn link_previews_are_fetched_together() {
    let h = harness_with(Arc::new(RendezvousUnfurler {
        barrier: tokio::sync::Barrier::new(3),
    }))
    .await;
    let ada = person("Ada");
    sync(&h.app, &ada).await;
    let channel_id = workspace_with_channel(&h.app, &ada).await;

    let (status, posted) = call(
        &h.app,
        Method::POST,
        &format!("/channels/{channel_id}/messages"),
        Some(&ada),
        Some(json!({ "text": "https://a.test https://b.test https://c.test" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let urls: Vec<&str> = posted["link_previews"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["url"].as_str().unwrap())
        .collect();
    assert_eq!(urls, vec!["https://a.test", "https://b.test", "https://c.test"]);
}
