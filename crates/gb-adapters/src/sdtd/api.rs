//! HTTP client for the 7 Days to Die web API.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use gb_config::SdtdConnectionInfo;
use gb_core::{GameKind, PlatformId, Player};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AdapterError, Result};
use crate::parse::{PlayerLookup, PlayerResolver};
use crate::transport::sse::ByteStream;

const GAME: GameKind = GameKind::SevenDaysToDie;
const TOKEN_NAME_HEADER: &str = "X-SDTD-API-TOKENNAME";
const TOKEN_SECRET_HEADER: &str = "X-SDTD-API-SECRET";

#[derive(Debug, Clone)]
pub struct SdtdApiConfig {
    pub base_url: String,
    pub admin_user: String,
    pub admin_token: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl SdtdApiConfig {
    pub fn new(info: &SdtdConnectionInfo, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            base_url: info.base_url(),
            admin_user: info.admin_user.clone(),
            admin_token: info.admin_token.clone(),
            connect_timeout,
            read_timeout,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameTime {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsResponse {
    pub gametime: GameTime,
    pub players: u32,
    #[serde(default)]
    pub hostiles: u32,
    #[serde(default)]
    pub animals: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandResponse {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub result: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ApiPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnlinePlayer {
    pub steamid: String,
    pub crossplatformid: String,
    #[serde(default)]
    pub entityid: i64,
    #[serde(default)]
    pub ip: String,
    pub name: String,
    #[serde(default)]
    pub ping: Option<u32>,
}

impl OnlinePlayer {
    /// `crossplatformid` carries the EOS id used as game id; `steamid` is
    /// overloaded for Steam and Xbox and told apart by prefix.
    pub fn to_player(&self) -> Player {
        let eos = PlatformId::parse(&self.crossplatformid);
        let mut player = Player::new(eos.id(), self.name.clone())
            .with_platform_id(eos)
            .with_platform_id(PlatformId::parse(&self.steamid));
        player.ip = Some(self.ip.clone()).filter(|ip| !ip.is_empty());
        player.ping = self.ping;
        player
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerLocation {
    #[serde(default)]
    pub steamid: String,
    pub crossplatformid: String,
    #[serde(default)]
    pub name: String,
    pub position: ApiPosition,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryItem {
    pub count: u32,
    pub name: String,
    #[serde(default)]
    pub quality: Option<Value>,
}

impl InventoryItem {
    /// Quality is numeric on the wire; zero means the item has none.
    pub fn quality(&self) -> Option<String> {
        match self.quality.as_ref()? {
            Value::Number(n) if n.as_f64().is_some_and(|q| q > 0.0) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() && s != "0" => Some(s.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryResponse {
    #[serde(default)]
    pub playername: String,
    #[serde(default)]
    pub bag: Vec<Option<InventoryItem>>,
    #[serde(default)]
    pub belt: Vec<Option<InventoryItem>>,
    #[serde(default)]
    pub equipment: BTreeMap<String, Option<InventoryItem>>,
}

/// `/map/mapinfo.json`: tile edge in blocks and the deepest zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapInfo {
    pub block_size: u32,
    pub max_zoom: u32,
}

/// One entry of the `/sse/log` stream.
#[derive(Debug, Clone, Deserialize)]
pub struct SseLogLine {
    pub msg: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub trace: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub uptime: String,
}

pub struct SdtdApiClient {
    config: SdtdApiConfig,
    http: reqwest::Client,
}

impl SdtdApiClient {
    pub fn new(config: SdtdApiConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|err| {
                warn!(game = %GAME, error = %err, "falling back to default http client");
                reqwest::Client::new()
            });
        Self { config, http }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Url::parse(&self.config.base_url)
            .and_then(|base| base.join(path))
            .map_err(|err| AdapterError::transport(GAME, err))
    }

    fn request(&self, url: Url) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header(TOKEN_NAME_HEADER, &self.config.admin_user)
            .header(TOKEN_SECRET_HEADER, &self.config.admin_token)
    }

    fn map_err(operation: &'static str, after: Duration, err: reqwest::Error) -> AdapterError {
        if err.is_timeout() {
            AdapterError::timeout(GAME, operation, after)
        } else if let Some(status) = err.status() {
            AdapterError::Http { game: GAME, status }
        } else if err.is_decode() {
            AdapterError::Backend {
                game: GAME,
                operation,
                message: err.to_string(),
            }
        } else {
            AdapterError::transport(GAME, err)
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, operation: &'static str) -> Result<T> {
        let start = Instant::now();
        let timeout = self.config.read_timeout;
        let path = url.path().to_string();

        let response = self
            .request(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| Self::map_err(operation, timeout, err))?;

        let status = response.status();
        debug!(
            game = %GAME,
            operation,
            path = %path,
            status = %status,
            duration_ms = start.elapsed().as_millis() as u64,
            "web api request completed"
        );
        if !status.is_success() {
            return Err(AdapterError::Http { game: GAME, status });
        }

        response
            .json::<T>()
            .await
            .map_err(|err| Self::map_err(operation, timeout, err))
    }

    pub async fn get_stats(&self) -> Result<StatsResponse> {
        self.get_json(self.endpoint("/api/getstats")?, "getStats").await
    }

    pub async fn execute_console_command(&self, command: &str) -> Result<CommandResponse> {
        let url = self.command_url(command)?;
        self.get_json(url, "executeConsoleCommand").await
    }

    /// Spaces go out as `%20`; the web API does not decode `+`.
    fn command_url(&self, command: &str) -> Result<Url> {
        let mut url = self.endpoint("/api/executeconsolecommand")?;
        let encoded: String = url::form_urlencoded::byte_serialize(command.as_bytes()).collect();
        url.set_query(Some(&format!("command={}", encoded.replace('+', "%20"))));
        Ok(url)
    }

    pub async fn get_online_players(&self) -> Result<Vec<OnlinePlayer>> {
        self.get_json(self.endpoint("/api/getplayersonline")?, "getPlayers")
            .await
    }

    pub async fn get_players_location(&self) -> Result<Vec<PlayerLocation>> {
        self.get_json(self.endpoint("/api/getplayerslocation")?, "getPlayerLocation")
            .await
    }

    pub async fn get_player_inventory(&self, user_id: &str) -> Result<InventoryResponse> {
        let mut url = self.endpoint("/api/getplayerinventory")?;
        url.query_pairs_mut().append_pair("userid", user_id);
        self.get_json(url, "getPlayerInventory").await
    }

    pub async fn get_map_info(&self) -> Result<MapInfo> {
        self.get_json(self.endpoint("/map/mapinfo.json")?, "getMapInfo")
            .await
    }

    pub async fn get_map_tile(&self, x: i32, y: i32, z: u32) -> Result<Bytes> {
        let url = self.endpoint(&format!("/map/{z}/{x}/{y}.png"))?;
        let timeout = self.config.read_timeout;
        let response = self
            .request(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| Self::map_err("getMapTile", timeout, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Http { game: GAME, status });
        }
        response
            .bytes()
            .await
            .map_err(|err| Self::map_err("getMapTile", timeout, err))
    }

    /// Opens the long-lived log stream. Only the connect step is bounded.
    pub async fn sse_stream(&self) -> Result<ByteStream> {
        let url = self.endpoint("/sse/log")?;
        let connect = self.config.connect_timeout;
        let response = tokio::time::timeout(connect, self.request(url).send())
            .await
            .map_err(|_| AdapterError::timeout(GAME, "openLogStream", connect))?
            .map_err(|err| Self::map_err("openLogStream", connect, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Http { game: GAME, status });
        }
        info!(game = %GAME, "log stream opened");

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|err| AdapterError::transport(GAME, err))),
        ))
    }
}

/// Completes players named by log lines from the live roster.
pub struct SdtdRoster {
    api: std::sync::Arc<SdtdApiClient>,
}

impl SdtdRoster {
    pub fn new(api: std::sync::Arc<SdtdApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PlayerResolver for SdtdRoster {
    async fn resolve(&self, lookup: &PlayerLookup) -> Result<Option<Player>> {
        let players = self.api.get_online_players().await?;
        let found = players.iter().map(OnlinePlayer::to_player).find(|p| match lookup {
            PlayerLookup::ByPlatformId(id) => {
                let id = Some(id.id());
                p.steam_id.as_deref() == id
                    || p.xbox_live_id.as_deref() == id
                    || p.epic_online_services_id.as_deref() == id
            }
            PlayerLookup::ByName(name) => &p.name == name,
        });
        Ok(found)
    }
}
