//! In-process fake backends shared by the adapter integration tests.
//!
//! Every fake binds an ephemeral port on the test's own runtime and records
//! what the adapter sent so tests can assert on the exact native commands.
#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use gb_adapters::{AdapterError, Emitter};
use gb_config::{AdapterSettings, MockConnectionInfo, RustConnectionInfo, SdtdConnectionInfo};
use gb_core::{EventName, GameEvent};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

pub const TOKEN: &str = "secret";
pub const RCON_PASSWORD: &str = "hunter2";

pub const CATALYSM_EOS: &str = "0002b5d970954287afdcb5dc35af0424";
pub const CATALYSM_STEAM: &str = "76561198028175941";

/// Settings with short deadlines so failing paths finish quickly.
pub fn fast_settings() -> AdapterSettings {
    AdapterSettings {
        connect_timeout_ms: 1_000,
        command_timeout_ms: 1_000,
        reachability_timeout_ms: 1_000,
        ..AdapterSettings::default()
    }
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral test port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fake backend failed");
    });
    addr
}

/// Accepts TCP connections and never answers on them.
pub async fn black_hole() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral test port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// Sends every event published on `names` into one ordered channel.
pub fn collect(emitter: &Emitter, names: &[EventName]) -> mpsc::UnboundedReceiver<GameEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    for name in names {
        let tx = tx.clone();
        emitter.on(*name, move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
            }
        });
    }
    rx
}

pub fn collect_all(emitter: &Emitter) -> mpsc::UnboundedReceiver<GameEvent> {
    collect(emitter, &EventName::ALL)
}

pub fn collect_errors(emitter: &Emitter) -> mpsc::UnboundedReceiver<AdapterError> {
    let (tx, rx) = mpsc::unbounded_channel();
    emitter.on_error(move |err| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(err);
        }
    });
    rx
}

pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for the next item")
        .expect("channel closed")
}

/// Asserts nothing else arrives within a short grace period.
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(extra)) = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await {
        panic!("unexpected extra item: {extra:?}");
    }
}

/// Prefix-matched canned replies; the most recently added prefix wins.
#[derive(Clone, Default)]
struct Replies(Arc<Mutex<Vec<(String, String)>>>);

impl Replies {
    fn set(&self, prefix: &str, reply: &str) {
        self.0
            .lock()
            .expect("replies lock")
            .push((prefix.to_string(), reply.to_string()));
    }

    fn find(&self, command: &str) -> Option<String> {
        self.0
            .lock()
            .expect("replies lock")
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone())
    }
}

#[derive(Clone)]
struct SdtdState {
    commands: Arc<Mutex<Vec<String>>>,
    replies: Replies,
    players: Arc<Mutex<Value>>,
    /// `None` ends every open log stream.
    log: broadcast::Sender<Option<String>>,
}

/// 7 Days to Die web API: console, roster, stats and the `/sse/log` stream.
pub struct FakeSdtd {
    pub addr: SocketAddr,
    state: SdtdState,
}

impl FakeSdtd {
    pub async fn start() -> Self {
        let (log, _) = broadcast::channel(64);
        let state = SdtdState {
            commands: Arc::default(),
            replies: Replies::default(),
            players: Arc::new(Mutex::new(json!([]))),
            log,
        };
        let router = Router::new()
            .route("/api/getstats", get(sdtd_stats))
            .route("/api/executeconsolecommand", get(sdtd_command))
            .route("/api/getplayersonline", get(sdtd_players))
            .route("/sse/log", get(sdtd_log))
            .route("/map/mapinfo.json", get(sdtd_map_info))
            .route("/map/{z}/{x}/{tile}", get(sdtd_map_tile))
            .with_state(state.clone());
        Self {
            addr: serve(router).await,
            state,
        }
    }

    pub fn info(&self, use_cpm: bool) -> SdtdConnectionInfo {
        SdtdConnectionInfo {
            host: self.addr.to_string(),
            admin_user: "admin".into(),
            admin_token: TOKEN.into(),
            use_tls: false,
            use_cpm,
        }
    }

    pub fn reply(&self, prefix: &str, result: &str) {
        self.state.replies.set(prefix, result);
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().expect("commands lock").clone()
    }

    pub fn set_players(&self, players: Value) {
        *self.state.players.lock().expect("players lock") = players;
    }

    /// Publishes one line on the log stream, wrapped the way the web API does.
    pub fn push_log(&self, msg: &str) {
        let frame = json!({
            "msg": msg,
            "type": "Log",
            "trace": "",
            "date": "2024-08-01",
            "time": "12:00:00",
            "uptime": "42.000",
        });
        let _ = self.state.log.send(Some(frame.to_string()));
    }

    /// Finishes the log stream body the way a restarting server does.
    pub fn end_log(&self) {
        let _ = self.state.log.send(None);
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("X-SDTD-API-SECRET")
        .is_some_and(|secret| secret == TOKEN)
}

async fn sdtd_stats(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    Json(json!({
        "gametime": { "days": 3, "hours": 7, "minutes": 12 },
        "players": 1,
        "hostiles": 4,
        "animals": 2,
    }))
    .into_response()
}

async fn sdtd_command(
    State(state): State<SdtdState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let command = query.get("command").cloned().unwrap_or_default();
    state
        .commands
        .lock()
        .expect("commands lock")
        .push(command.clone());
    let result = state
        .replies
        .find(&command)
        .unwrap_or_else(|| format!("Executed {command}"));
    Json(json!({ "command": command, "parameters": "", "result": result })).into_response()
}

async fn sdtd_players(State(state): State<SdtdState>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let players = state.players.lock().expect("players lock").clone();
    Json(players).into_response()
}

async fn sdtd_log(State(state): State<SdtdState>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let rx = state.log.subscribe();
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(Some(line)) => {
                    return Some((Ok::<_, Infallible>(Event::default().data(line)), rx))
                }
                Ok(None) | Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    });
    Sse::new(stream).into_response()
}

async fn sdtd_map_info(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    Json(json!({ "blockSize": 128, "maxZoom": 4 })).into_response()
}

/// Serves `tile z/x/y` as the body so tests can check the coordinates.
async fn sdtd_map_tile(
    headers: HeaderMap,
    Path((z, x, tile)): Path<(u32, i32, String)>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    match tile.strip_suffix(".png") {
        Some(y) => (
            [(axum::http::header::CONTENT_TYPE, "image/png")],
            format!("tile {z}/{x}/{y}"),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Clone)]
struct RustState {
    commands: Arc<Mutex<Vec<String>>>,
    replies: Replies,
    events: broadcast::Sender<String>,
    connections: Arc<AtomicUsize>,
}

/// Rust WebRcon: password in the path, JSON frames both ways.
pub struct FakeRust {
    pub addr: SocketAddr,
    state: RustState,
}

impl FakeRust {
    pub async fn start() -> Self {
        let (events, _) = broadcast::channel(64);
        let state = RustState {
            commands: Arc::default(),
            replies: Replies::default(),
            events,
            connections: Arc::default(),
        };
        let router = Router::new()
            .route("/{password}", get(rust_upgrade))
            .with_state(state.clone());
        Self {
            addr: serve(router).await,
            state,
        }
    }

    pub fn info(&self) -> RustConnectionInfo {
        RustConnectionInfo {
            host: self.addr.ip().to_string(),
            rcon_port: self.addr.port(),
            rcon_password: RCON_PASSWORD.into(),
        }
    }

    pub fn reply(&self, prefix: &str, message: &str) {
        self.state.replies.set(prefix, message);
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().expect("commands lock").clone()
    }

    /// Waits until a session is attached and subscribed to broadcasts.
    pub async fn wait_connected(&self) {
        for _ in 0..200 {
            if self.state.connections.load(Ordering::SeqCst) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("adapter never connected");
    }

    /// Broadcasts a console line as an unsolicited frame.
    pub fn push_line(&self, message: &str) {
        self.push_frame(json!({
            "Message": message,
            "Identifier": 0,
            "Type": "Generic",
            "Stacktrace": "",
        }));
    }

    pub fn push_chat(&self, steam_id: &str, username: &str, message: &str, channel: i64) {
        let body = json!({
            "Channel": channel,
            "Message": message,
            "UserId": steam_id,
            "Username": username,
            "Color": "#5af",
            "Time": 1_700_000_000,
        });
        self.push_frame(json!({
            "Message": body.to_string(),
            "Identifier": -1,
            "Type": "Chat",
            "Stacktrace": "",
        }));
    }

    pub fn push_frame(&self, frame: Value) {
        let _ = self.state.events.send(frame.to_string());
    }
}

async fn rust_upgrade(
    ws: WebSocketUpgrade,
    Path(password): Path<String>,
    State(state): State<RustState>,
) -> Response {
    if password != RCON_PASSWORD {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| rust_session(socket, state))
}

async fn rust_session(mut socket: WebSocket, state: RustState) {
    let mut events = state.events.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);
    loop {
        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let request: Value = serde_json::from_str(text.as_str()).unwrap_or_default();
                    let id = request["Identifier"].as_i64().unwrap_or_default();
                    let command = request["Message"].as_str().unwrap_or_default().to_string();
                    state.commands.lock().expect("commands lock").push(command.clone());
                    let message = state.replies.find(&command).unwrap_or_default();
                    let reply = json!({
                        "Message": message,
                        "Identifier": id,
                        "Type": "Generic",
                        "Stacktrace": "",
                    });
                    if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            event = events.recv() => match event {
                Ok(frame) => {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
        }
    }
    state.connections.fetch_sub(1, Ordering::SeqCst);
}

#[derive(Clone)]
struct MockState {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    responses: Arc<Mutex<HashMap<String, Value>>>,
    instances: Arc<Mutex<Vec<String>>>,
    events: broadcast::Sender<String>,
    connections: Arc<AtomicUsize>,
    silent: Arc<AtomicBool>,
}

/// The reference backend: RPC requests, one reply each, pushed game events.
pub struct FakeMock {
    pub addr: SocketAddr,
    state: MockState,
}

impl FakeMock {
    pub async fn start() -> Self {
        let (events, _) = broadcast::channel(64);
        let state = MockState {
            requests: Arc::default(),
            responses: Arc::default(),
            instances: Arc::default(),
            events,
            connections: Arc::default(),
            silent: Arc::default(),
        };
        let router = Router::new()
            .route("/", get(mock_upgrade))
            .with_state(state.clone());
        Self {
            addr: serve(router).await,
            state,
        }
    }

    pub fn info(&self, name: &str) -> MockConnectionInfo {
        MockConnectionInfo {
            host: format!("ws://{}/", self.addr),
            name: name.into(),
        }
    }

    /// Answers `action` with `payload`. Unknown actions get an error frame.
    pub fn respond(&self, action: &str, payload: Value) {
        self.state
            .responses
            .lock()
            .expect("responses lock")
            .insert(action.to_string(), payload);
    }

    /// Stops answering requests at all.
    pub fn go_silent(&self) {
        self.state.silent.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.state.requests.lock().expect("requests lock").clone()
    }

    pub fn instances(&self) -> Vec<String> {
        self.state.instances.lock().expect("instances lock").clone()
    }

    pub async fn wait_connected(&self) {
        for _ in 0..200 {
            if self.state.connections.load(Ordering::SeqCst) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("adapter never connected");
    }

    pub fn push_event(&self, kind: &str, data: Value) {
        let frame = json!({
            "type": "gameEvent",
            "payload": { "type": kind, "data": data },
        });
        let _ = self.state.events.send(frame.to_string());
    }
}

async fn mock_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<MockState>,
) -> Response {
    if let Some(name) = query.get("name") {
        state
            .instances
            .lock()
            .expect("instances lock")
            .push(name.clone());
    }
    ws.on_upgrade(move |socket| mock_session(socket, state))
}

async fn mock_session(mut socket: WebSocket, state: MockState) {
    let mut events = state.events.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);
    loop {
        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Some(reply) = mock_reply(&state, text.as_str()) else {
                        continue;
                    };
                    if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            event = events.recv() => match event {
                Ok(frame) => {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
        }
    }
    state.connections.fetch_sub(1, Ordering::SeqCst);
}

fn mock_reply(state: &MockState, text: &str) -> Option<Value> {
    let request: Value = serde_json::from_str(text).ok()?;
    if request["type"] != "request" {
        return None;
    }
    let request_id = request["requestId"].clone();
    let action = request["payload"]["action"].as_str()?.to_string();
    let args = request["payload"]["args"]
        .as_str()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or(Value::Null);
    state
        .requests
        .lock()
        .expect("requests lock")
        .push((action.clone(), args));

    if state.silent.load(Ordering::SeqCst) {
        return None;
    }
    let response = state
        .responses
        .lock()
        .expect("responses lock")
        .get(&action)
        .cloned();
    Some(match response {
        Some(payload) => json!({ "type": "response", "requestId": request_id, "payload": payload }),
        None => json!({
            "type": "error",
            "requestId": request_id,
            "payload": { "message": format!("Unknown action requested: {action}") },
        }),
    })
}
