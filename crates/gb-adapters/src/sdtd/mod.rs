//! 7 Days to Die over the web API: commands are HTTP calls, events arrive
//! on the `/sse/log` push stream.

pub mod api;
pub mod parser;

use async_trait::async_trait;
use bytes::Bytes;
use gb_config::{AdapterSettings, SdtdConnectionInfo};
use gb_core::{
    Ban, CommandOutput, GameKind, Item, MessageOpts, PlatformId, Player, PlayerReference,
    Position, TestReachabilityOutput,
};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ban_duration::BanDuration;
use crate::emitter::Emitter;
use crate::error::{AdapterError, ParseError, Result};
use crate::guard::Guard;
use crate::parse::publish;
use crate::reachability;
use crate::surface::{EventSource, GameServer};
use crate::transport::sse::{self, StreamEnd};
use crate::worker::ItemParsePool;

use self::api::{MapInfo, SdtdApiClient, SdtdApiConfig, SdtdRoster, SseLogLine};
use self::parser::SdtdParser;

const GAME: GameKind = GameKind::SevenDaysToDie;

static BAN_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) - (\S+) \(([^)]*)\) - (.*)")
        .unwrap_or_else(|err| panic!("invalid ban list pattern: {err}"))
});

/// Everything the log stream task needs, shared with the adapter.
#[derive(Clone)]
struct LogPipeline {
    emitter: Arc<Emitter>,
    guard: Guard,
    parser: Arc<SdtdParser>,
    roster: Arc<SdtdRoster>,
}

impl LogPipeline {
    async fn handle(&self, frame: String) -> bool {
        let parsed = match serde_json::from_str::<SseLogLine>(&frame) {
            Ok(line) => line,
            Err(err) => {
                let err = ParseError::MalformedFrame {
                    game: GAME,
                    reason: err.to_string(),
                };
                return publish(&self.emitter, &self.guard, &frame, Err(err)).await;
            }
        };
        let event = self.parser.parse(&parsed.msg, self.roster.as_ref()).await;
        publish(&self.emitter, &self.guard, &parsed.msg, event).await
    }
}

pub struct SevenDaysToDie {
    info: SdtdConnectionInfo,
    settings: AdapterSettings,
    api: Arc<SdtdApiClient>,
    pipeline: LogPipeline,
    items: ItemParsePool,
    stream: Mutex<Option<JoinHandle<()>>>,
}

impl SevenDaysToDie {
    pub fn new(info: SdtdConnectionInfo, settings: AdapterSettings) -> Self {
        let api = Arc::new(SdtdApiClient::new(SdtdApiConfig::new(
            &info,
            settings.connect_timeout(),
            settings.command_timeout(),
        )));
        let emitter = Arc::new(Emitter::new(GAME));
        let pipeline = LogPipeline {
            guard: Guard::new(emitter.clone()),
            emitter,
            parser: Arc::new(SdtdParser::new(info.use_cpm)),
            roster: Arc::new(SdtdRoster::new(api.clone())),
        };
        Self {
            items: ItemParsePool::new(GAME, settings.item_parse_workers),
            info,
            settings,
            api,
            pipeline,
            stream: Mutex::new(None),
        }
    }

    async fn run(&self, command: String) -> Result<CommandOutput> {
        self.execute_console_command(&command).await
    }

    /// Tile geometry of the web map.
    pub async fn get_map_info(&self) -> Result<MapInfo> {
        self.api.get_map_info().await
    }

    /// One rendered PNG tile of the web map at zoom level `z`.
    pub async fn get_map_tile(&self, x: i32, y: i32, z: u32) -> Result<Bytes> {
        self.api.get_map_tile(x, y, z).await
    }
}

/// Quotes a console argument; embedded double quotes become single quotes.
fn quoted(arg: &str) -> String {
    format!("\"{}\"", arg.replace('"', "'"))
}

#[async_trait]
impl EventSource for SevenDaysToDie {
    fn game(&self) -> GameKind {
        GAME
    }

    fn emitter(&self) -> Arc<Emitter> {
        self.pipeline.emitter.clone()
    }

    async fn start(&self) -> Result<()> {
        let mut slot = self.stream.lock().await;
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }

        let body = self.api.sse_stream().await?;
        let pipeline = self.pipeline.clone();
        *slot = Some(tokio::spawn(async move {
            match sse::drive(body, |frame| pipeline.handle(frame)).await {
                Ok(StreamEnd::Declined) => {
                    warn!(game = %GAME, "log stream stopped after unhandled error")
                }
                Ok(StreamEnd::Closed) => {
                    warn!(game = %GAME, "log stream closed by server");
                    pipeline
                        .guard
                        .background(AdapterError::NotConnected { game: GAME })
                        .await;
                }
                Err(err) => {
                    error!(game = %GAME, error = %err, "log stream failed");
                    pipeline.guard.background(err).await;
                }
            }
        }));
        info!(game = %GAME, host = %self.info.host, "listening for log events");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(task) = self.stream.lock().await.take() {
            task.abort();
            info!(game = %GAME, "log stream closed");
        }
        Ok(())
    }
}

#[async_trait]
impl GameServer for SevenDaysToDie {
    async fn get_player(&self, player: &PlayerReference) -> Result<Option<Player>> {
        let players = self.get_players().await?;
        Ok(players.into_iter().find(|p| p.game_id == player.game_id))
    }

    async fn get_players(&self) -> Result<Vec<Player>> {
        let online = self.api.get_online_players().await?;
        Ok(online.iter().map(|p| p.to_player()).collect())
    }

    async fn get_player_location(&self, player: &PlayerReference) -> Result<Option<Position>> {
        let target = PlatformId::Eos(player.game_id.clone()).to_string();
        let locations = self.api.get_players_location().await?;
        Ok(locations
            .into_iter()
            .find(|loc| loc.crossplatformid == target)
            .map(|loc| Position::new(loc.position.x, loc.position.y, loc.position.z)))
    }

    async fn get_player_inventory(&self, player: &PlayerReference) -> Result<Vec<Item>> {
        let user_id = PlatformId::Eos(player.game_id.clone()).to_string();
        let inventory = self.api.get_player_inventory(&user_id).await?;

        let slot_item = |item: &api::InventoryItem| Item {
            name: item.name.clone(),
            code: item.name.clone(),
            amount: Some(item.count),
            quality: item.quality(),
            ..Default::default()
        };
        let mut items: Vec<Item> = inventory
            .bag
            .iter()
            .chain(inventory.belt.iter())
            .flatten()
            .map(slot_item)
            .collect();
        // Worn equipment has no quality in the listing.
        items.extend(inventory.equipment.values().flatten().map(|item| Item {
            quality: None,
            ..slot_item(item)
        }));
        Ok(items)
    }

    async fn give_item(
        &self,
        player: &PlayerReference,
        item: &str,
        amount: u32,
        quality: Option<&str>,
    ) -> Result<()> {
        let target = PlatformId::Eos(player.game_id.clone());
        let command = match (self.info.use_cpm, quality) {
            (true, Some(q)) => format!("giveplus {target} {item} {amount} {q} 0"),
            (true, None) => format!("giveplus {target} {item} {amount}"),
            (false, Some(q)) => format!("give {target} {item} {amount} {q}"),
            (false, None) => format!("give {target} {item} {amount}"),
        };
        let output = self.run(command).await?;

        if self.info.use_cpm && !output.raw_result.contains("Item(s) given") {
            error!(game = %GAME, player = %player.game_id, item, amount, raw = %output.raw_result, "failed to give item");
            return Err(AdapterError::Backend {
                game: GAME,
                operation: "giveItem",
                message: format!("Failed to give item. Result: \"{}\"", output.raw_result),
            });
        }
        Ok(())
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        let output = self.run("li *".into()).await?;
        self.items.parse_items(output.raw_result).await
    }

    async fn execute_console_command(&self, raw_command: &str) -> Result<CommandOutput> {
        let response = self.api.execute_console_command(raw_command).await?;
        debug!(
            game = %GAME,
            command = raw_command,
            result = %response.result.chars().take(1000).collect::<String>(),
            "executed console command"
        );
        Ok(CommandOutput::ok(response.result))
    }

    async fn send_message(&self, message: &str, opts: &MessageOpts) -> Result<()> {
        let escaped = message.replace('"', "'");
        let recipient = opts
            .recipient
            .as_ref()
            .map(|r| PlatformId::Eos(r.game_id.clone()));
        let sender = &self.settings.server_chat_name;

        let command = match (self.info.use_cpm, recipient) {
            (false, None) => format!("say \"{escaped}\""),
            (false, Some(to)) => format!("sayplayer \"{to}\" \"{escaped}\""),
            (true, None) => format!("say2 \"{sender}\" \"{escaped}\""),
            (true, Some(to)) => format!("pm2 \"{sender}\" \"{to}\" \"{escaped}\""),
        };
        self.run(command).await?;
        Ok(())
    }

    async fn teleport_player(&self, player: &PlayerReference, position: Position) -> Result<()> {
        let target = PlatformId::Eos(player.game_id.clone());
        self.run(format!(
            "teleportplayer {target} {} {} {}",
            position.x, position.y, position.z
        ))
        .await?;
        Ok(())
    }

    async fn test_reachability(&self) -> Result<TestReachabilityOutput> {
        Ok(reachability::probe(
            GAME,
            self.settings.reachability_timeout(),
            self.api.get_stats(),
            self.execute_console_command("version"),
        )
        .await)
    }

    async fn kick_player(&self, player: &PlayerReference, reason: &str) -> Result<()> {
        let target = PlatformId::Eos(player.game_id.clone());
        self.run(format!("kick \"{target}\" {}", quoted(reason))).await?;
        Ok(())
    }

    async fn ban_player(&self, ban: &Ban) -> Result<()> {
        let target = PlatformId::Eos(ban.player.game_id.clone());
        let duration = BanDuration::until(ban.expires_at, OffsetDateTime::now_utc());
        self.run(format!(
            "ban add {target} {} {} {}",
            duration.amount,
            duration.unit,
            quoted(&ban.reason)
        ))
        .await?;
        Ok(())
    }

    async fn unban_player(&self, player: &PlayerReference) -> Result<()> {
        let target = PlatformId::Eos(player.game_id.clone());
        self.run(format!("ban remove {target}")).await?;
        Ok(())
    }

    async fn list_bans(&self) -> Result<Vec<Ban>> {
        let output = self.run("ban list".into()).await?;
        if !output.success || output.raw_result.is_empty() {
            return Err(AdapterError::Backend {
                game: GAME,
                operation: "listBans",
                message: "Failed to retrieve ban list.".into(),
            });
        }
        Ok(parse_ban_list(&output.raw_result))
    }

    async fn shutdown(&self) -> Result<()> {
        let command = if self.info.use_cpm { "shutdownba 0" } else { "shutdown" };
        self.run(command.into()).await?;
        Ok(())
    }
}

/// Parses `ban list` output. The first line is a header; entries not keyed
/// by an EOS id cannot be mapped to a game id and are skipped.
pub fn parse_ban_list(raw: &str) -> Vec<Ban> {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    raw.lines()
        .skip(1)
        .filter_map(|line| {
            let caps = BAN_ENTRY.captures(line)?;
            let eos = match PlatformId::parse(&caps[2]) {
                PlatformId::Eos(id) => id,
                _ => return None,
            };
            let expires_at = match PrimitiveDateTime::parse(&caps[1], &format) {
                Ok(at) => at.assume_utc(),
                Err(err) => {
                    debug!(game = %GAME, line, error = %err, "skipping ban entry");
                    return None;
                }
            };
            let mut player = Player::new(eos.clone(), "");
            player.epic_online_services_id = Some(eos);
            Some(Ban {
                player,
                reason: caps[4].to_string(),
                expires_at: Some(expires_at),
            })
        })
        .collect()
}
