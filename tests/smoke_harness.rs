use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::json;
use stream_monitor::retry::RetryPolicy;
use stream_monitor::stream::proto::{
    AlgorithmStatus, AlgorithmStatusPacket, LiveNodePacket, OrderEventPacket,
};
use stream_monitor::stream::transport::WsTransport;
use stream_monitor::{
    LogItemKind, ResultContext, SessionBuilder, SessionHandler, SessionState,
    StreamSessionParameters,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;

const TEST_ALGORITHM_ID: &str = "smoke-algo";

#[derive(Clone)]
struct WsState {
    frames: Arc<Vec<String>>,
    closed_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug)]
enum Observed {
    Status(AlgorithmStatusPacket),
    Log(String, LogItemKind),
    Result(ResultContext),
    State(SessionState),
}

struct ChannelHandler {
    tx: mpsc::UnboundedSender<Observed>,
}

impl SessionHandler for ChannelHandler {
    fn handle_algorithm_status(&self, packet: AlgorithmStatusPacket) {
        let _ = self.tx.send(Observed::Status(packet));
    }

    fn handle_live_node(&self, _packet: LiveNodePacket) {}

    fn handle_result(&self, context: ResultContext) {
        let _ = self.tx.send(Observed::Result(context));
    }

    fn handle_log_message(&self, _timestamp: DateTime<Utc>, message: String, kind: LogItemKind) {
        let _ = self.tx.send(Observed::Log(message, kind));
    }

    fn handle_order_event(&self, _packet: OrderEventPacket) {}

    fn handle_state_changed(&self, state: SessionState) {
        let _ = self.tx.send(Observed::State(state));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_session_ws_smoke_receives_packets_and_closes_after_completion() {
    let frames = vec![
        json!({"eType": "Log", "sMessage": "hello", "sAlgorithmID": TEST_ALGORITHM_ID})
            .to_string(),
        json!({"eType": "Telemetry", "sMessage": "ignored"}).to_string(),
        json!({
            "eType": "AlgorithmStatus",
            "sAlgorithmID": TEST_ALGORITHM_ID,
            "iProjectID": 7,
            "eStatus": "Running"
        })
        .to_string(),
        json!({
            "eType": "BacktestResult",
            "sBacktestId": "bt-1",
            "dProgress": 1.0,
            "oResults": {"Statistics": {"Total Orders": "3"}}
        })
        .to_string(),
    ];
    let (closed_tx, closed_rx) = oneshot::channel();
    let state = WsState {
        frames: Arc::new(frames),
        closed_tx: Arc::new(Mutex::new(Some(closed_tx))),
    };
    let app = Router::new()
        .route("/stream", get(ws_handler))
        .with_state(state);
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = SessionBuilder::new(
        StreamSessionParameters::new(addr.ip().to_string(), addr.port())
            .with_close_after_completed(true),
    )
    .expect("valid parameters")
    .with_receive_timeout(Duration::from_millis(50))
    .with_connect_retry(RetryPolicy::no_retry())
    .build(
        WsTransport::new().with_path("/stream"),
        Arc::new(ChannelHandler { tx }),
    )
    .expect("build session");
    session.subscribe().expect("subscribe");

    let mut observed = Vec::new();
    while observed.len() < 5 {
        let next = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for session callbacks")
            .expect("handler channel closed");
        observed.push(next);
    }

    assert!(matches!(observed[0], Observed::State(SessionState::Subscribed)));
    assert!(
        matches!(&observed[1], Observed::Log(message, LogItemKind::Log) if message == "hello")
    );
    match &observed[2] {
        Observed::Status(packet) => {
            assert_eq!(packet.algorithm_id, TEST_ALGORITHM_ID);
            assert_eq!(packet.status, AlgorithmStatus::Running);
        }
        other => panic!("expected algorithm status, got {other:?}"),
    }
    match &observed[3] {
        Observed::Result(context) => {
            assert_eq!(context.name, format!("{}:{}", addr.ip(), addr.port()));
            assert_eq!(context.progress, Some(1.0));
            assert_eq!(context.result.statistics["Total Orders"], "3");
        }
        other => panic!("expected backtest result, got {other:?}"),
    }
    assert!(matches!(
        observed[4],
        Observed::State(SessionState::Unsubscribed)
    ));
    assert_eq!(session.state(), SessionState::Unsubscribed);

    timeout(Duration::from_secs(5), closed_rx)
        .await
        .expect("timed out waiting for the client to close the socket")
        .expect("close observation channel dropped");

    let _ = shutdown_tx.send(());
    timeout(Duration::from_secs(5), server_task)
        .await
        .expect("mock ws server should stop")
        .expect("mock ws server task should join");
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: WsState) {
    for frame in state.frames.iter() {
        if socket.send(Message::Text(frame.clone().into())).await.is_err() {
            return;
        }
    }

    // Drain until the client closes its side.
    while let Some(message) = socket.recv().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    if let Some(closed_tx) = state.closed_tx.lock().await.take() {
        let _ = closed_tx.send(());
    }
}

async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let addr = listener
        .local_addr()
        .expect("read mock server listener address");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("mock server should run");
    });
    (addr, shutdown_tx, task)
}
