use rollcall_gateway::admin::{self, AdminState};
use rollcall_gateway::{ConnectionHandle, Shutdown, SnapshotPublisher, ViewerFanout};
use rollcall_store::{MemoryUserStore, NewUser, UserStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_admin(state: AdminState) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let signal = shutdown.signal();
    tokio::spawn(async move { admin::serve(listener, state, signal).await });
    (addr, shutdown)
}

fn open_viewer(fanout: &ViewerFanout) -> mpsc::Receiver<Message> {
    let (tx, rx) = mpsc::channel(8);
    let handle = ConnectionHandle::new("127.0.0.1:9".parse().unwrap(), tx);
    handle.mark_open();
    fanout.add_viewer(handle);
    rx
}

#[tokio::test]
async fn test_display_broadcasts_valid_list() {
    let fanout = Arc::new(ViewerFanout::new());
    let mut viewer = open_viewer(&fanout);
    let (addr, _shutdown) = spawn_admin(AdminState::new(Arc::clone(&fanout))).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/display", addr))
        .body(r#"[{"Name":"alice","IpAddress":"10.0.0.1","Port":9000}]"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "snapshot delivered");
    match viewer.recv().await {
        Some(Message::Text(text)) => assert_eq!(
            text.as_str(),
            r#"[{"Name":"alice","IpAddress":"10.0.0.1","Port":9000}]"#
        ),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_display_rejects_invalid_list() {
    let fanout = Arc::new(ViewerFanout::new());
    let mut viewer = open_viewer(&fanout);
    let (addr, _shutdown) = spawn_admin(AdminState::new(Arc::clone(&fanout))).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/display", addr))
        .body(r#"{"Name":"alice"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(viewer.try_recv().is_err());
}

#[tokio::test]
async fn test_display_only_accepts_post() {
    let fanout = Arc::new(ViewerFanout::new());
    let (addr, _shutdown) = spawn_admin(AdminState::new(fanout)).await;

    let response = reqwest::get(format!("http://{}/display", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_publish_requires_store() {
    let fanout = Arc::new(ViewerFanout::new());
    let (addr, _shutdown) = spawn_admin(AdminState::new(fanout)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/publish", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_publish_pushes_store_contents() {
    let store: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());
    store
        .upsert(NewUser::new("bob", "10.0.0.2", 9001))
        .await
        .unwrap();
    let fanout = Arc::new(ViewerFanout::new());
    let mut viewer = open_viewer(&fanout);
    let publisher = Arc::new(SnapshotPublisher::new(store, fanout.clone()));
    let state = AdminState::new(Arc::clone(&fanout)).with_publisher(publisher);
    let (addr, _shutdown) = spawn_admin(state).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/publish", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(matches!(viewer.recv().await, Some(Message::Text(_))));

    let health: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["viewers"], 1);
}
