//! Integration tests for the inbox watcher and counterpart lookup
//!
//! The dev relay runs in-process; the REST API is mocked with wiremock.

use std::sync::Arc;
use std::time::Duration;

use flittig_chat::{
    ChatConfig, ChatSessionManager, ConnectionState, InboxWatcher, MessageKind, SessionUpdate,
};
use flittig_devserver::{serve, MessageAction, ServerState};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_relay(api_url: &str) -> (ChatConfig, Arc<ServerState>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(ServerState::new());
    let handle = tokio::spawn(serve(listener, state.clone()));

    let config = ChatConfig::new(&format!("ws://127.0.0.1:{}", port), api_url, api_url).unwrap();
    (config, state, handle)
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let waited = timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "Timed out waiting for {}", what);
}

#[tokio::test]
async fn test_inbox_notifies_on_incoming_message() {
    let (config, state, relay) = start_relay("http://127.0.0.1:9").await;
    state.set_profile("alice", Some("Alice".to_string()), None);

    let mut inbox = InboxWatcher::new(config.clone());
    let mut notifications = inbox.subscribe();
    inbox.set_token(Some("bob"));
    wait_until("inbox to open", || inbox.connection_state() == ConnectionState::Open).await;

    let mut alice = ChatSessionManager::new(config).unwrap();
    alice.set_inputs(Some("alice"), Some("bob"));
    wait_until("alice to open", || alice.connection_state() == ConnectionState::Open).await;
    assert!(alice.send("Is the sofa still available?"));

    let notification = timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("Timeout waiting for notification")
        .unwrap();
    assert_eq!(notification.sender_id.as_deref(), Some("alice"));
    assert_eq!(notification.sender_name.as_deref(), Some("Alice"));
    assert_eq!(notification.preview, "Is the sofa still available?");
    assert_eq!(notification.kind, MessageKind::User);
    assert_eq!(inbox.received().len(), 1);

    relay.abort();
}

#[tokio::test]
async fn test_inbox_ignores_own_echo_and_stays_separate() {
    let (config, _state, relay) = start_relay("http://127.0.0.1:9").await;

    let mut inbox = InboxWatcher::new(config.clone());
    inbox.set_token(Some("alice"));
    wait_until("inbox to open", || inbox.connection_state() == ConnectionState::Open).await;

    let mut alice = ChatSessionManager::new(config).unwrap();
    alice.set_inputs(Some("alice"), Some("bob"));
    wait_until("alice to open", || alice.connection_state() == ConnectionState::Open).await;
    assert!(alice.send("hello"));
    wait_until("echo", || alice.messages().len() == 1).await;

    sleep(Duration::from_millis(200)).await;
    assert!(inbox.received().is_empty());

    inbox.close();
    assert_eq!(inbox.connection_state(), ConnectionState::Closed);
    assert_eq!(alice.connection_state(), ConnectionState::Open);

    relay.abort();
}

#[tokio::test]
async fn test_inbox_forwards_system_action() {
    let (config, state, relay) = start_relay("http://127.0.0.1:9").await;

    let mut inbox = InboxWatcher::new(config);
    let mut notifications = inbox.subscribe();
    inbox.set_token(Some("bob"));
    wait_until("inbox to open", || inbox.connection_state() == ConnectionState::Open).await;

    let action = MessageAction {
        id: "review".to_string(),
        label: "Leave a review".to_string(),
        payload: json!({ "jobId": "j-42" }),
    };
    assert!(state.push_system_message("bob", "Job completed", Some(action)));

    let notification = timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("Timeout waiting for notification")
        .unwrap();
    assert_eq!(notification.kind, MessageKind::System);
    let action = notification.action.unwrap();
    assert_eq!(action.id, "review");
    assert_eq!(action.payload["jobId"], "j-42");

    relay.abort();
}

#[tokio::test]
async fn test_session_resolves_counterpart() {
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/bob"))
        .and(header("authorization", "Bearer alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {
                "id": "bob",
                "email": "bob@example.com",
                "name": "Bob",
                "image": "avatars/bob.png"
            }
        })))
        .mount(&api)
        .await;

    let (config, _state, relay) = start_relay(&api.uri()).await;
    let mut session = ChatSessionManager::new(config.clone()).unwrap();
    let mut updates = session.subscribe();
    session.set_inputs(Some("alice"), Some("bob"));

    let resolved = timeout(Duration::from_secs(5), async {
        while let Ok(update) = updates.recv().await {
            if let SessionUpdate::Counterpart(receiver) = update {
                return Some(receiver);
            }
        }
        None
    })
    .await
    .expect("Timeout waiting for counterpart")
    .unwrap();

    assert_eq!(resolved.display_name(), "Bob");
    assert_eq!(
        resolved.image_url(&config).unwrap().as_str(),
        format!("{}/avatars/bob.png", api.uri())
    );
    assert_eq!(session.counterpart(), Some(resolved));

    relay.abort();
}

#[tokio::test]
async fn test_failed_lookup_leaves_chat_usable() {
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&api)
        .await;

    let (config, _state, relay) = start_relay(&api.uri()).await;
    let mut session = ChatSessionManager::new(config).unwrap();
    session.set_inputs(Some("alice"), Some("ghost"));
    wait_until("session to open", || {
        session.connection_state() == ConnectionState::Open
    })
    .await;

    sleep(Duration::from_millis(200)).await;
    assert_eq!(session.counterpart(), None);
    assert!(session.send("anyone there?"));
    wait_until("echo", || session.messages().len() == 1).await;

    relay.abort();
}
