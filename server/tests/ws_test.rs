//! End-to-end tests over a real socket: HTTP endpoints, WebSocket join handshake,
//! message fan-out and presence.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use campfire_server::auth::config::AuthConfig;
use campfire_server::auth::token::create_session_token;
use campfire_server::client::connection::{ChatClient, ClientError};
use campfire_server::client::state::ClientState;
use campfire_server::db::pool::{create_pool, run_migrations};
use campfire_server::db::queries::users::{UpsertUser, upsert_user};
use campfire_server::engine::chat_engine::{ChatEngine, ChatSettings};
use campfire_server::engine::events::ServerFrame;
use campfire_server::web::app_state::AppState;
use campfire_server::web::router::build_router;

const GENERAL: &str = "3f1c2a9e-0001-4c5e-9a10-6d2b7e000001";
const RANDOM: &str = "3f1c2a9e-0002-4c5e-9a10-6d2b7e000002";

struct TestServer {
    addr: SocketAddr,
    auth: AuthConfig,
}

impl TestServer {
    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn token(&self, user_id: &str) -> String {
        create_session_token(user_id, None, &self.auth).unwrap()
    }

    async fn joined_client(&self, user_id: &str, channel_id: &str) -> ChatClient {
        let mut client = ChatClient::connect(&self.ws_url()).await.unwrap();
        client
            .join(&self.token(user_id), Some(channel_id))
            .await
            .unwrap();
        client
    }
}

/// Helper: start the server on a random port with three registered users.
async fn start_test_server() -> TestServer {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    for (id, name) in [("u1", "alice"), ("u2", "bob"), ("u3", "carol")] {
        upsert_user(
            &pool,
            &UpsertUser {
                user_id: id,
                username: name,
                avatar_color: "#c05621",
                role: "member",
            },
        )
        .await
        .unwrap();
    }

    let auth = AuthConfig::new("ws-test-secret", "campfire");
    let engine = Arc::new(ChatEngine::new(pool, auth.clone(), ChatSettings::default()));
    engine.load_channels_from_db().await.unwrap();

    let state = Arc::new(AppState {
        engine,
        auth_config: auth.clone(),
        public_url: "http://localhost:8080".into(),
        outbound_queue: 256,
    });

    let app = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, auth }
}

/// Read frames until one matches, failing after a couple of seconds.
async fn expect_frame(
    client: &mut ChatClient,
    mut pred: impl FnMut(&ServerFrame) -> bool,
) -> ServerFrame {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next_frame().await.unwrap() {
                Some(frame) if pred(&frame) => return frame,
                Some(_) => continue,
                None => panic!("connection closed while waiting for frame"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = start_test_server().await;
    let body = reqwest::get(server.http_url("/api/health"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_channel_listing_requires_token() {
    let server = start_test_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .get(server.http_url("/api/channels"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = http
        .get(server.http_url("/api/channels"))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = http
        .get(server.http_url("/api/channels"))
        .bearer_auth(server.token("u1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let channels: serde_json::Value = resp.json().await.unwrap();
    let channels = channels.as_array().unwrap();
    assert_eq!(channels.len(), 4);
    assert_eq!(channels[0]["name"], "general");
    assert_eq!(channels[0]["isDefault"], true);
    assert_eq!(channels[0]["category"], "community");
}

#[tokio::test]
async fn test_message_round_trip() {
    let server = start_test_server().await;
    let mut alice = server.joined_client("u1", GENERAL).await;
    let mut bob = server.joined_client("u2", GENERAL).await;
    assert_eq!(alice.state(), ClientState::Joined);

    let presence = expect_frame(
        &mut alice,
        |f| matches!(f, ServerFrame::Presence(p) if p.online_count == 2),
    )
    .await;
    let ServerFrame::Presence(presence) = presence else {
        unreachable!()
    };
    assert_eq!(presence.users_in(GENERAL), ["alice", "bob"]);

    alice.send_message("hello", None).await.unwrap();

    let ServerFrame::Message(to_alice) =
        expect_frame(&mut alice, |f| matches!(f, ServerFrame::Message(_))).await
    else {
        unreachable!()
    };
    let ServerFrame::Message(to_bob) =
        expect_frame(&mut bob, |f| matches!(f, ServerFrame::Message(_))).await
    else {
        unreachable!()
    };
    assert_eq!(to_alice.id, to_bob.id);
    assert_eq!(to_bob.content, "hello");
    assert_eq!(to_bob.username, "alice");
    assert_eq!(to_bob.avatar_color, "#c05621");

    // A later joiner sees the same message in history.
    let mut carol = ChatClient::connect(&server.ws_url()).await.unwrap();
    let history = carol
        .join(&server.token("u3"), Some(GENERAL))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, to_alice.id);
}

#[tokio::test]
async fn test_bad_token_closes_connection() {
    let server = start_test_server().await;
    let mut client = ChatClient::connect(&server.ws_url()).await.unwrap();
    assert_eq!(client.state(), ClientState::Connecting);

    let err = client.join("garbage", Some(GENERAL)).await.unwrap_err();
    match err {
        ClientError::Rejected(message) => assert_eq!(message, "Authentication failed"),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(matches!(
        client.send_message("hi", None).await,
        Err(ClientError::Closed)
    ));
}

#[tokio::test]
async fn test_invalid_frame_keeps_connection_open() {
    let server = start_test_server().await;
    let mut client = ChatClient::connect(&server.ws_url()).await.unwrap();

    client.send_raw("{\"type\":\"shout\"}").await.unwrap();
    let frame = expect_frame(&mut client, |_| true).await;
    assert_eq!(frame, ServerFrame::error("Invalid frame"));

    let history = client
        .join(&server.token("u1"), Some(GENERAL))
        .await
        .unwrap();
    assert!(history.is_empty());
    assert_eq!(client.state(), ClientState::Joined);
}

#[tokio::test]
async fn test_switch_channel_over_socket() {
    let server = start_test_server().await;
    let mut alice = server.joined_client("u1", GENERAL).await;
    let mut bob = server.joined_client("u2", GENERAL).await;

    // Already there: nothing is sent.
    assert!(alice.switch_channel(GENERAL).await.unwrap().is_none());

    let history = alice.switch_channel(RANDOM).await.unwrap();
    assert_eq!(history, Some(vec![]));
    assert_eq!(alice.channel_id(), Some(RANDOM));

    expect_frame(&mut bob, |f| {
        matches!(f, ServerFrame::UserLeft { user_id, .. } if user_id == "u1")
    })
    .await;

    bob.send_message("anyone?", None).await.unwrap();
    expect_frame(&mut bob, |f| matches!(f, ServerFrame::Message(_))).await;

    alice.typing().await.unwrap();
    alice.send_message("over here", None).await.unwrap();
    let ServerFrame::Message(seen) =
        expect_frame(&mut alice, |f| matches!(f, ServerFrame::Message(_))).await
    else {
        unreachable!()
    };
    assert_eq!(seen.content, "over here");
    assert_eq!(seen.channel_id, RANDOM);
}

#[tokio::test]
async fn test_join_default_then_switch_to_it_is_local() {
    let server = start_test_server().await;
    let mut client = ChatClient::connect(&server.ws_url()).await.unwrap();
    let history = client.join(&server.token("u1"), None).await.unwrap();
    assert!(history.is_empty());
    assert_eq!(client.channel_id(), Some(GENERAL));

    let switched = tokio::time::timeout(Duration::from_secs(2), client.switch_channel(GENERAL))
        .await
        .expect("switch to the current channel must not wait on the server")
        .unwrap();
    assert!(switched.is_none());
    assert_eq!(client.state(), ClientState::Joined);

    // The connection is still usable afterwards.
    let history = client.switch_channel(RANDOM).await.unwrap();
    assert_eq!(history, Some(vec![]));
    assert_eq!(client.channel_id(), Some(RANDOM));
}

#[tokio::test]
async fn test_switch_to_unknown_channel_stays_joined() {
    let server = start_test_server().await;
    let mut alice = server.joined_client("u1", GENERAL).await;

    let err = alice.switch_channel("nowhere").await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)));
    assert_eq!(alice.state(), ClientState::Joined);
    assert_eq!(alice.channel_id(), Some(GENERAL));
}

#[tokio::test]
async fn test_disconnect_updates_presence() {
    let server = start_test_server().await;
    let alice = server.joined_client("u1", GENERAL).await;
    let mut bob = server.joined_client("u2", GENERAL).await;

    alice.close().await.unwrap();

    expect_frame(&mut bob, |f| {
        matches!(f, ServerFrame::UserLeft { user_id, .. } if user_id == "u1")
    })
    .await;
    expect_frame(&mut bob, |f| {
        matches!(f, ServerFrame::Presence(p) if p.online_count == 1)
    })
    .await;
}
