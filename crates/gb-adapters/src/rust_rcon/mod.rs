//! Rust over WebRcon: one websocket carries both console commands and the
//! server's log broadcast.

pub mod parser;

use async_trait::async_trait;
use gb_config::{AdapterSettings, RustConnectionInfo};
use gb_core::{
    Ban, CommandOutput, GameKind, Item, MessageOpts, Player, PlayerReference, Position,
    TestReachabilityOutput,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ban_duration::whole_hours_until;
use crate::emitter::Emitter;
use crate::error::{AdapterError, ParseError, Result};
use crate::guard::Guard;
use crate::parse::{publish, PlayerLookup, PlayerResolver};
use crate::reachability;
use crate::surface::{EventSource, GameServer};
use crate::transport::ws::{FrameCodec, Inbound, WsSession};

use self::parser::{chat_event, lowercase_keys, RconFrame};

const GAME: GameKind = GameKind::Rust;

struct RconCodec;

impl FrameCodec for RconCodec {
    fn decode(&self, text: &str) -> Result<Value, ParseError> {
        serde_json::from_str::<Value>(text)
            .map(lowercase_keys)
            .map_err(|err| ParseError::MalformedFrame {
                game: GAME,
                reason: err.to_string(),
            })
    }

    /// Broadcasts carry identifier 0 or -1; command replies echo ours.
    fn reply_key(&self, frame: &Value) -> Option<String> {
        frame
            .get("identifier")?
            .as_i64()
            .filter(|id| *id > 0)
            .map(|id| id.to_string())
    }
}

/// Console access over an open session.
#[derive(Clone)]
struct RconClient {
    session: Arc<WsSession>,
    next_id: Arc<AtomicI64>,
    timeout: Duration,
}

impl RconClient {
    async fn command(&self, command: &str) -> Result<CommandOutput> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = json!({
            "Identifier": id,
            "Message": command,
            "Name": "WebRcon",
        });
        let reply = self
            .session
            .request(id.to_string(), &frame, "executeConsoleCommand", self.timeout)
            .await?;
        let reply = RconFrame::from_value(reply)?;
        debug!(game = %GAME, command, identifier = id, "console command answered");

        if reply.kind.eq_ignore_ascii_case("error") {
            Ok(CommandOutput::failed(reply.message.clone(), reply.message))
        } else {
            Ok(CommandOutput::ok(reply.message))
        }
    }

    async fn players(&self) -> Result<Vec<Player>> {
        let output = self.command("playerlist").await?;
        Ok(parser::parse_player_list(&output.raw_result)?)
    }
}

#[async_trait]
impl PlayerResolver for RconClient {
    async fn resolve(&self, lookup: &PlayerLookup) -> Result<Option<Player>> {
        let players = self.players().await?;
        Ok(players.into_iter().find(|p| match lookup {
            PlayerLookup::ByPlatformId(id) => p.steam_id.as_deref() == Some(id.id()),
            PlayerLookup::ByName(name) => &p.name == name,
        }))
    }
}

struct Connection {
    client: RconClient,
    pump: JoinHandle<()>,
}

pub struct RustRcon {
    info: RustConnectionInfo,
    settings: AdapterSettings,
    emitter: Arc<Emitter>,
    guard: Guard,
    next_id: Arc<AtomicI64>,
    conn: Mutex<Option<Connection>>,
}

impl RustRcon {
    pub fn new(info: RustConnectionInfo, settings: AdapterSettings) -> Self {
        let emitter = Arc::new(Emitter::new(GAME));
        Self {
            info,
            settings,
            guard: Guard::new(emitter.clone()),
            emitter,
            next_id: Arc::new(AtomicI64::new(1)),
            conn: Mutex::new(None),
        }
    }

    /// The open session, connecting first if needed.
    async fn client(&self) -> Result<RconClient> {
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
            &self.info.ws_url(),
            self.settings.connect_timeout(),
            Arc::new(RconCodec),
            tx,
        )
        .await?;
        let client = RconClient {
            session: Arc::new(session),
            next_id: self.next_id.clone(),
            timeout: self.settings.command_timeout(),
        };
        let pump = tokio::spawn(pump(
            self.emitter.clone(),
            self.guard.clone(),
            client.clone(),
            rx,
        ));
        info!(game = %GAME, host = %self.info.host, port = self.info.rcon_port, "rcon session ready");

        *slot = Some(Connection {
            client: client.clone(),
            pump,
        });
        Ok(client)
    }

    async fn run(&self, command: String) -> Result<CommandOutput> {
        self.client().await?.command(&command).await
    }

    fn unsupported(operation: &'static str) -> AdapterError {
        AdapterError::Unsupported {
            game: GAME,
            operation,
        }
    }
}

/// Quotes a console argument; embedded double quotes become single quotes.
fn quoted(arg: &str) -> String {
    format!("\"{}\"", arg.replace('"', "'"))
}

/// Parses and emits inbound broadcasts in arrival order.
async fn pump(
    emitter: Arc<Emitter>,
    guard: Guard,
    client: RconClient,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) {
    while let Some(msg) = inbound.recv().await {
        let keep_going = match msg {
            Inbound::Frame(value) => handle_frame(&emitter, &guard, &client, value).await,
            Inbound::Failed(err) => {
                warn!(game = %GAME, error = %err, "rcon frame failed");
                guard.background(err).await
            }
            Inbound::Closed => {
                info!(game = %GAME, "rcon socket closed by server");
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

async fn handle_frame(emitter: &Emitter, guard: &Guard, client: &RconClient, value: Value) -> bool {
    let frame = match RconFrame::from_value(value) {
        Ok(frame) => frame,
        Err(err) => return guard.background(err.into()).await,
    };
    if frame.is_chat() {
        return publish(emitter, guard, &frame.message, chat_event(&frame)).await;
    }

    let line = frame.message.trim_end();
    let resolver: &dyn PlayerResolver = client;
    let parsed = parser::rules().parse(line, Some(resolver)).await;
    publish(emitter, guard, line, parsed).await
}

#[async_trait]
impl EventSource for RustRcon {
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
            info!(game = %GAME, "rcon session closed");
        }
        Ok(())
    }
}

#[async_trait]
impl GameServer for RustRcon {
    async fn get_player(&self, player: &PlayerReference) -> Result<Option<Player>> {
        let players = self.get_players().await?;
        Ok(players.into_iter().find(|p| p.game_id == player.game_id))
    }

    async fn get_players(&self) -> Result<Vec<Player>> {
        self.client().await?.players().await
    }

    async fn get_player_location(&self, player: &PlayerReference) -> Result<Option<Position>> {
        let output = self.run("playerlistpos".into()).await?;
        Ok(parser::find_position(&output.raw_result, &player.game_id))
    }

    async fn get_player_inventory(&self, _player: &PlayerReference) -> Result<Vec<Item>> {
        Err(Self::unsupported("getPlayerInventory"))
    }

    async fn give_item(
        &self,
        player: &PlayerReference,
        item: &str,
        amount: u32,
        _quality: Option<&str>,
    ) -> Result<()> {
        self.run(format!(
            "inventory.giveto {} {} {amount}",
            quoted(&player.game_id),
            quoted(item)
        ))
        .await?;
        Ok(())
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        Err(Self::unsupported("listItems"))
    }

    async fn execute_console_command(&self, raw_command: &str) -> Result<CommandOutput> {
        self.run(raw_command.to_string()).await
    }

    /// The vanilla console only broadcasts.
    async fn send_message(&self, message: &str, opts: &MessageOpts) -> Result<()> {
        if opts.recipient.is_some() {
            return Err(Self::unsupported("sendMessage to a single player"));
        }
        self.run(format!("say {}", quoted(message))).await?;
        Ok(())
    }

    async fn teleport_player(&self, player: &PlayerReference, position: Position) -> Result<()> {
        let target = format!("{},{},{}", position.x, position.y, position.z);
        self.run(format!(
            "teleportpos {} {}",
            quoted(&target),
            quoted(&player.game_id)
        ))
        .await?;
        Ok(())
    }

    async fn test_reachability(&self) -> Result<TestReachabilityOutput> {
        Ok(reachability::probe(
            GAME,
            self.settings.reachability_timeout(),
            self.run("serverinfo".into()),
            self.run("echo reachability".into()),
        )
        .await)
    }

    async fn kick_player(&self, player: &PlayerReference, reason: &str) -> Result<()> {
        self.run(format!("kick {} {}", quoted(&player.game_id), quoted(reason)))
            .await?;
        Ok(())
    }

    /// `banid` takes hours; without an expiry the ban is permanent.
    async fn ban_player(&self, ban: &Ban) -> Result<()> {
        let mut command = format!(
            "banid {} {} {}",
            quoted(&ban.player.game_id),
            quoted(&ban.player.name),
            quoted(&ban.reason)
        );
        if let Some(expires_at) = ban.expires_at {
            let hours = whole_hours_until(expires_at, OffsetDateTime::now_utc());
            command.push_str(&format!(" {hours}"));
        }
        self.run(command).await?;
        Ok(())
    }

    async fn unban_player(&self, player: &PlayerReference) -> Result<()> {
        self.run(format!("unban {}", quoted(&player.game_id))).await?;
        Ok(())
    }

    async fn list_bans(&self) -> Result<Vec<Ban>> {
        let output = self.run("banlistex".into()).await?;
        Ok(parser::parse_ban_list(&output.raw_result))
    }

    async fn shutdown(&self) -> Result<()> {
        self.run("quit".into()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_routes_only_positive_identifiers() -> anyhow::Result<()> {
        let codec = RconCodec;
        let reply = codec.decode(r#"{"Message":"ok","Identifier":42,"Type":"Generic"}"#)?;
        assert_eq!(codec.reply_key(&reply).as_deref(), Some("42"));

        let broadcast = codec.decode(r#"{"Message":"[CHAT] x","Identifier":0,"Type":"Generic"}"#)?;
        assert_eq!(codec.reply_key(&broadcast), None);
        Ok(())
    }

    #[test]
    fn test_codec_rejects_non_json() {
        assert!(matches!(
            RconCodec.decode("not json"),
            Err(ParseError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_quoted_escapes_double_quotes() {
        assert_eq!(quoted(r#"say "hi""#), r#""say 'hi'""#);
    }

    #[tokio::test]
    async fn test_unsupported_operations_are_tagged() {
        let rcon = RustRcon::new(
            RustConnectionInfo {
                host: "127.0.0.1".into(),
                rcon_port: 1,
                rcon_password: "pw".into(),
            },
            AdapterSettings::default(),
        );
        let err = rcon.list_items().await.unwrap_err();
        assert_eq!(
            err,
            AdapterError::Unsupported {
                game: GameKind::Rust,
                operation: "listItems"
            }
        );
    }
}
