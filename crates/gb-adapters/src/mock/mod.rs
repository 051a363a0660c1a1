//! The simulated reference backend.
//!
//! Commands are RPC requests over one websocket; each `request` frame is
//! answered by exactly one `response` or `error` frame carrying the same
//! `requestId`. Game events arrive as `gameEvent` frames whose payload is
//! already structured, so no line rules are involved.

use async_trait::async_trait;
use gb_config::{AdapterSettings, MockConnectionInfo};
use gb_core::{
    Ban, CommandOutput, GameEvent, GameKind, Item, MessageOpts, Player, PlayerReference, Position,
    TestReachabilityOutput,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::emitter::Emitter;
use crate::error::{AdapterError, ParseError, Result};
use crate::guard::Guard;
use crate::parse::publish;
use crate::reachability;
use crate::surface::{EventSource, GameServer};
use crate::transport::ws::{FrameCodec, Inbound, WsSession};

const GAME: GameKind = GameKind::Mock;

struct MockCodec;

impl FrameCodec for MockCodec {
    fn decode(&self, text: &str) -> Result<Value, ParseError> {
        serde_json::from_str(text).map_err(|err| ParseError::MalformedFrame {
            game: GAME,
            reason: err.to_string(),
        })
    }

    fn reply_key(&self, frame: &Value) -> Option<String> {
        match frame.get("type")?.as_str()? {
            "response" | "error" => frame.get("requestId")?.as_str().map(str::to_string),
            _ => None,
        }
    }
}

/// Turns the payload of a `gameEvent` frame into an event.
///
/// The payload's `type` selects the variant. Unknown types become a
/// `LogLine`; a known type with a body that does not fit is malformed.
pub fn parse_game_event(payload: &Value) -> Result<GameEvent, ParseError> {
    let kind = payload.get("type").and_then(Value::as_str).unwrap_or_default();
    let data = payload.get("data").cloned().unwrap_or(Value::Null);

    let Some(name) = gb_core::EventName::from_wire(kind) else {
        let msg = data
            .get("msg")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string());
        return Ok(GameEvent::log_line(msg).stamped());
    };

    let mut body = match data {
        Value::Object(map) => map,
        other => {
            return Err(ParseError::MalformedFrame {
                game: GAME,
                reason: format!("{name} body is not an object: {other}"),
            })
        }
    };
    body.insert("type".into(), Value::String(name.as_str().into()));

    let event: GameEvent =
        serde_json::from_value(Value::Object(body)).map_err(|err| ParseError::MalformedFrame {
            game: GAME,
            reason: format!("{name}: {err}"),
        })?;
    if let Some(field) = event.missing_identity() {
        return Err(ParseError::MissingIdentity {
            game: GAME,
            event: name,
            field,
        });
    }
    Ok(event.stamped())
}

/// The raw text recorded alongside a mock event.
fn raw_line(payload: &Value) -> String {
    payload
        .pointer("/data/msg")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}

#[derive(Clone)]
struct MockClient {
    session: Arc<WsSession>,
    settings: AdapterSettings,
}

impl MockClient {
    async fn call<T: DeserializeOwned>(&self, operation: &'static str, args: Value) -> Result<T> {
        let request_id = Uuid::new_v4().to_string();
        // The server expects `args` as an encoded JSON document.
        let frame = json!({
            "type": "request",
            "requestId": request_id,
            "payload": { "action": operation, "args": args.to_string() },
        });
        let reply = self
            .session
            .request(request_id, &frame, operation, self.settings.command_timeout())
            .await?;
        debug!(game = %GAME, operation, "mock request answered");

        let payload = reply.get("payload").cloned().unwrap_or(Value::Null);
        if reply.get("type").and_then(Value::as_str) == Some("error") {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(AdapterError::Backend {
                game: GAME,
                operation,
                message,
            });
        }
        serde_json::from_value(payload).map_err(|err| AdapterError::Backend {
            game: GAME,
            operation,
            message: format!("unexpected reply: {err}"),
        })
    }

    /// For operations whose reply carries nothing of interest.
    async fn send(&self, operation: &'static str, args: Value) -> Result<()> {
        self.call::<Value>(operation, args).await.map(|_| ())
    }
}

struct Connection {
    client: MockClient,
    pump: JoinHandle<()>,
}

pub struct MockServer {
    info: MockConnectionInfo,
    settings: AdapterSettings,
    emitter: Arc<Emitter>,
    guard: Guard,
    conn: Mutex<Option<Connection>>,
}

impl MockServer {
    pub fn new(info: MockConnectionInfo, settings: AdapterSettings) -> Self {
        let emitter = Arc::new(Emitter::new(GAME));
        Self {
            info,
            settings,
            guard: Guard::new(emitter.clone()),
            emitter,
            conn: Mutex::new(None),
        }
    }

    fn endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.info.host).map_err(|err| AdapterError::transport(GAME, err))?;
        url.query_pairs_mut().append_pair("name", &self.info.name);
        Ok(url)
    }

    async fn client(&self) -> Result<MockClient> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            if conn.client.session.is_open() {
                return Ok(conn.client.clone());
            }
        }
        if let Some(stale) = slot.take() {
            stale.pump.abort();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let session = WsSession::connect(
            GAME,
            self.endpoint()?.as_str(),
            self.settings.connect_timeout(),
            Arc::new(MockCodec),
            tx,
        )
        .await?;
        let client = MockClient {
            session: Arc::new(session),
            settings: self.settings.clone(),
        };
        let pump = tokio::spawn(pump(self.emitter.clone(), self.guard.clone(), rx));
        info!(game = %GAME, instance = %self.info.name, "mock session ready");

        *slot = Some(Connection {
            client: client.clone(),
            pump,
        });
        Ok(client)
    }
}

async fn pump(emitter: Arc<Emitter>, guard: Guard, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
    while let Some(msg) = inbound.recv().await {
        let keep_going = match msg {
            Inbound::Frame(frame) => {
                if frame.get("type").and_then(Value::as_str) != Some("gameEvent") {
                    debug!(game = %GAME, frame = %frame, "ignoring unsolicited frame");
                    continue;
                }
                let payload = frame.get("payload").cloned().unwrap_or(Value::Null);
                publish(&emitter, &guard, &raw_line(&payload), parse_game_event(&payload)).await
            }
            Inbound::Failed(err) => {
                warn!(game = %GAME, error = %err, "mock frame failed");
                guard.background(err).await
            }
            Inbound::Closed => {
                info!(game = %GAME, "mock socket closed by server");
                guard
                    .background(AdapterError::NotConnected { game: GAME })
                    .await;
                break;
            }
        };
        if !keep_going {
            warn!(game = %GAME, "event stream stopped after unhandled error");
            break;
        }
    }
}

#[async_trait]
impl EventSource for MockServer {
    fn game(&self) -> GameKind {
        GAME
    }

    fn emitter(&self) -> Arc<Emitter> {
        self.emitter.clone()
    }

    async fn start(&self) -> Result<()> {
        self.client().await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.client.session.close();
            conn.pump.abort();
            info!(game = %GAME, instance = %self.info.name, "mock session closed");
        }
        Ok(())
    }
}

#[async_trait]
impl GameServer for MockServer {
    async fn get_player(&self, player: &PlayerReference) -> Result<Option<Player>> {
        self.client().await?.call("getPlayer", json!(player)).await
    }

    async fn get_players(&self) -> Result<Vec<Player>> {
        self.client().await?.call("getPlayers", json!({})).await
    }

    async fn get_player_location(&self, player: &PlayerReference) -> Result<Option<Position>> {
        self.client()
            .await?
            .call("getPlayerLocation", json!(player))
            .await
    }

    async fn get_player_inventory(&self, player: &PlayerReference) -> Result<Vec<Item>> {
        self.client()
            .await?
            .call("getPlayerInventory", json!(player))
            .await
    }

    async fn give_item(
        &self,
        player: &PlayerReference,
        item: &str,
        amount: u32,
        quality: Option<&str>,
    ) -> Result<()> {
        let args = json!({
            "player": player,
            "item": item,
            "amount": amount,
            "quality": quality,
        });
        self.client().await?.send("giveItem", args).await
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        self.client().await?.call("listItems", json!({})).await
    }

    async fn execute_console_command(&self, raw_command: &str) -> Result<CommandOutput> {
        self.client()
            .await?
            .call("executeConsoleCommand", json!({ "command": raw_command }))
            .await
    }

    async fn send_message(&self, message: &str, opts: &MessageOpts) -> Result<()> {
        let args = json!({ "message": message, "opts": opts });
        self.client().await?.send("sendMessage", args).await
    }

    async fn teleport_player(&self, player: &PlayerReference, position: Position) -> Result<()> {
        let args = json!({
            "player": player,
            "x": position.x,
            "y": position.y,
            "z": position.z,
        });
        self.client().await?.send("teleportPlayer", args).await
    }

    async fn test_reachability(&self) -> Result<TestReachabilityOutput> {
        let status = async { self.get_players().await };
        let command = async { self.execute_console_command("version").await };
        Ok(reachability::probe(
            GAME,
            self.settings.reachability_timeout(),
            status,
            command,
        )
        .await)
    }

    async fn kick_player(&self, player: &PlayerReference, reason: &str) -> Result<()> {
        let args = json!({ "player": player, "reason": reason });
        self.client().await?.send("kickPlayer", args).await
    }

    async fn ban_player(&self, ban: &Ban) -> Result<()> {
        self.client().await?.send("banPlayer", json!(ban)).await
    }

    async fn unban_player(&self, player: &PlayerReference) -> Result<()> {
        self.client().await?.send("unbanPlayer", json!(player)).await
    }

    async fn list_bans(&self) -> Result<Vec<Ban>> {
        self.client().await?.call("listBans", json!({})).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.client().await?.send("shutdown", json!({})).await
    }
}
