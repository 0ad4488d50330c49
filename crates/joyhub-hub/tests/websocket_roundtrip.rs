//! End-to-end tests over a loopback WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use joyhub_driver::mock::{MockDriver, MockDriverHandle};
use joyhub_hub::server::serve_with_shutdown;
use joyhub_hub::{CoordinatorSettings, Hub};
use joyhub_store::Store;
use joyhub_types::{ControllerIndex, ErrorCode, ServerMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    addr: SocketAddr,
    hub: Hub,
    mock: MockDriverHandle,
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl Server {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

async fn start_server() -> Server {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let driver = MockDriver::new();
    let mock = driver.handle();
    let dir = std::env::temp_dir().join(format!("joyhub-ws-{}", uuid::Uuid::new_v4()));
    let settings = CoordinatorSettings {
        macro_poll_interval: Duration::from_millis(10),
        ..CoordinatorSettings::default()
    };
    let hub = Hub::with_store(settings, Arc::new(driver), Store::open(dir));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, rx) = oneshot::channel();
    let served = hub.clone();
    let task = tokio::spawn(async move {
        serve_with_shutdown(served, listener, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });

    Server {
        addr,
        hub,
        mock,
        shutdown,
        task,
    }
}

async fn open(addr: SocketAddr) -> Socket {
    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    // Every session starts with a snapshot.
    assert!(matches!(
        recv(&mut socket).await,
        ServerMessage::ActiveControllers { .. }
    ));
    socket
}

async fn send(socket: &mut Socket, json: serde_json::Value) {
    socket
        .send(Message::Text(json.to_string().into()))
        .await
        .unwrap();
}

async fn recv(socket: &mut Socket) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Skip frames until one matches `pred`.
async fn recv_matching(socket: &mut Socket, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
    loop {
        let message = recv(socket).await;
        if pred(&message) {
            return message;
        }
    }
}

async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn ping_and_invalid_frames() {
    let server = start_server().await;
    let mut socket = open(server.addr).await;

    send(&mut socket, serde_json::json!({ "type": "ping" })).await;
    assert_eq!(recv(&mut socket).await, ServerMessage::Pong);

    socket
        .send(Message::Text("not json".into()))
        .await
        .unwrap();
    let ServerMessage::Error { code, .. } = recv(&mut socket).await else {
        panic!("expected error frame");
    };
    assert_eq!(code, ErrorCode::InvalidRequest);

    // Binary frames carrying JSON are accepted too.
    socket
        .send(Message::Binary(br#"{"type":"ping"}"#.to_vec().into()))
        .await
        .unwrap();
    assert_eq!(recv(&mut socket).await, ServerMessage::Pong);

    server.stop().await;
}

#[tokio::test]
async fn shared_controller_survives_creator_disconnect() {
    let server = start_server().await;
    let mut a = open(server.addr).await;
    let mut b = open(server.addr).await;

    send(
        &mut a,
        serde_json::json!({ "type": "create_controller", "device_id": "AA:BB" }),
    )
    .await;
    assert_eq!(
        recv(&mut a).await,
        ServerMessage::ControllerCreated {
            index: ControllerIndex(0)
        }
    );

    send(
        &mut b,
        serde_json::json!({ "type": "join_controller_session", "index": 0 }),
    )
    .await;
    let joined = recv_matching(&mut b, |m| {
        matches!(m, ServerMessage::JoinedControllerSession { .. })
    })
    .await;
    let ServerMessage::JoinedControllerSession { device_id, .. } = joined else {
        unreachable!();
    };
    assert_eq!(device_id.as_deref(), Some("AA:BB"));

    a.close(None).await.unwrap();
    drop(a);

    let snapshot = recv_matching(&mut b, |m| match m {
        ServerMessage::ActiveControllers { controllers } => {
            controllers.len() == 1 && controllers[0].client_count == 1
        }
        _ => false,
    })
    .await;
    assert!(matches!(snapshot, ServerMessage::ActiveControllers { .. }));
    assert!(server.mock.is_live(ControllerIndex(0)));

    b.close(None).await.unwrap();
    drop(b);

    let mock = server.mock.clone();
    assert!(wait_for(|| {
        let mock = mock.clone();
        async move { !mock.is_live(ControllerIndex(0)) }
    })
    .await);
    assert_eq!(server.hub.coordinator().session_count().await, 0);

    server.stop().await;
}

#[tokio::test]
async fn errors_carry_codes() {
    let server = start_server().await;
    let mut socket = open(server.addr).await;

    send(
        &mut socket,
        serde_json::json!({ "type": "join_controller_session", "index": 7 }),
    )
    .await;
    let ServerMessage::Error { code, .. } = recv(&mut socket).await else {
        panic!("expected error frame");
    };
    assert_eq!(code, ErrorCode::NotFound);

    send(&mut socket, serde_json::json!({ "type": "leave_controller_session" })).await;
    let ServerMessage::Error { code, .. } = recv(&mut socket).await else {
        panic!("expected error frame");
    };
    assert_eq!(code, ErrorCode::NotFound);

    server.stop().await;
}

#[tokio::test]
async fn macro_lifecycle_over_the_wire() {
    let server = start_server().await;
    let mut socket = open(server.addr).await;

    send(&mut socket, serde_json::json!({ "type": "create_controller" })).await;
    recv_matching(&mut socket, |m| {
        matches!(m, ServerMessage::ControllerCreated { .. })
    })
    .await;

    // Stopping with nothing running is silent.
    send(&mut socket, serde_json::json!({ "type": "stop_macro" })).await;
    send(&mut socket, serde_json::json!({ "type": "ping" })).await;
    assert_eq!(
        recv_matching(&mut socket, |m| !matches!(
            m,
            ServerMessage::ActiveControllers { .. }
        ))
        .await,
        ServerMessage::Pong
    );

    send(
        &mut socket,
        serde_json::json!({ "type": "start_macro", "index": 0, "script": "A 0.1s" }),
    )
    .await;
    let ServerMessage::MacroStarted { handle, index } = recv(&mut socket).await else {
        panic!("expected macro_started");
    };

    send(&mut socket, serde_json::json!({ "type": "get_macro_status" })).await;
    let ServerMessage::MacroStatus { running, info } = recv(&mut socket).await else {
        panic!("expected macro_status");
    };
    assert!(running);
    assert_eq!(info.unwrap().handle, handle);

    assert!(server.mock.finish_macro(index, &handle));
    assert_eq!(
        recv(&mut socket).await,
        ServerMessage::MacroCompleted { handle, index }
    );

    server.stop().await;
}

#[tokio::test]
async fn macro_library_and_device_registry() {
    let server = start_server().await;
    let mut socket = open(server.addr).await;

    send(
        &mut socket,
        serde_json::json!({ "type": "save_macro", "name": "jump", "content": "A 0.1s" }),
    )
    .await;
    let ServerMessage::MacrosUpdated { macros } = recv(&mut socket).await else {
        panic!("expected macros_updated");
    };
    assert_eq!(macros["jump"].content, "A 0.1s");

    send(
        &mut socket,
        serde_json::json!({ "type": "save_macro", "name": "", "content": "A 0.1s" }),
    )
    .await;
    let ServerMessage::Error { code, .. } = recv(&mut socket).await else {
        panic!("expected error frame");
    };
    assert_eq!(code, ErrorCode::InvalidRequest);

    send(
        &mut socket,
        serde_json::json!({
            "type": "update_macro",
            "old_name": "jump",
            "new_name": "hop",
            "content": "B 0.1s"
        }),
    )
    .await;
    let ServerMessage::MacrosUpdated { macros } = recv(&mut socket).await else {
        panic!("expected macros_updated");
    };
    assert!(!macros.contains_key("jump"));
    assert_eq!(macros["hop"].content, "B 0.1s");

    send(
        &mut socket,
        serde_json::json!({ "type": "device_connected", "device_id": "AA:BB", "name": "Living room" }),
    )
    .await;
    let ServerMessage::KnownDevicesUpdated { devices } = recv(&mut socket).await else {
        panic!("expected known_devices_updated");
    };
    assert_eq!(devices["AA:BB"].name, "Living room");

    // Deleting something unknown produces no response.
    send(
        &mut socket,
        serde_json::json!({ "type": "delete_known_device", "device_id": "CC:DD" }),
    )
    .await;
    send(&mut socket, serde_json::json!({ "type": "get_known_devices" })).await;
    let ServerMessage::KnownDevices { devices } = recv(&mut socket).await else {
        panic!("expected known_devices");
    };
    assert_eq!(devices.len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn health_endpoint() {
    let server = start_server().await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("ok"));

    server.stop().await;
}
