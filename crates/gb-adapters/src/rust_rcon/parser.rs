//! WebRcon framing and console line rules for Rust.

use gb_core::{
    ChatChannel, ChatMessage, EventName, GameEvent, GameKind, ItemGivenTo, PlatformId, Player,
    PlayerConnected, PlayerDeath, PlayerDisconnected, PlayerKicked, PlayerMessaged, PlayerSpawned,
    Position,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use time::OffsetDateTime;

use crate::error::ParseError;
use crate::parse::{Draft, Fields, PlayerLookup, RuleSet};

const GAME: GameKind = GameKind::Rust;

/// Lowercases every object key, recursively.
pub fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_lowercase(), lowercase_keys(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

/// One WebRcon frame after key normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RconFrame {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub identifier: i64,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub stacktrace: Option<String>,
}

impl RconFrame {
    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        serde_json::from_value(value).map_err(|err| ParseError::MalformedFrame {
            game: GAME,
            reason: err.to_string(),
        })
    }

    pub fn is_chat(&self) -> bool {
        self.kind.eq_ignore_ascii_case("chat")
    }
}

/// Body of a `Chat` frame. It is a JSON string inside `message`, so its keys
/// keep the server's casing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RconChat {
    #[serde(default)]
    channel: i64,
    message: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    username: String,
}

pub fn chat_event(frame: &RconFrame) -> Result<GameEvent, ParseError> {
    let chat: RconChat =
        serde_json::from_str(&frame.message).map_err(|err| ParseError::MalformedFrame {
            game: GAME,
            reason: format!("chat body: {err}"),
        })?;
    // Channel 0 is global, 1 team; the server itself posts with user id 0.
    let player = (!chat.user_id.is_empty() && chat.user_id != "0")
        .then(|| steam_player(&chat.user_id, &chat.username));
    let channel = match chat.channel {
        1 => ChatChannel::Team,
        _ => ChatChannel::Global,
    };
    Ok(GameEvent::ChatMessage(ChatMessage {
        player,
        channel,
        msg: chat.message,
        ..Default::default()
    })
    .stamped())
}

/// Rust identifies players by Steam id, which doubles as game id.
pub fn steam_player(steam_id: &str, name: &str) -> Player {
    Player::new(steam_id, name).with_platform_id(PlatformId::Steam(steam_id.to_string()))
}

fn addressed_player(fields: &Fields<'_>) -> Result<Player, ParseError> {
    let mut player = steam_player(fields.req("steamId")?, fields.req("name")?);
    player.ip = fields.opt("ip").map(str::to_string);
    Ok(player)
}

fn player_kicked(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    Ok(Draft::complete(GameEvent::PlayerKicked(PlayerKicked {
        player: addressed_player(fields)?,
        reason: fields.opt("reason").unwrap_or_default().trim().to_string(),
        ..Default::default()
    })))
}

fn player_disconnected(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    Ok(Draft::complete(GameEvent::PlayerDisconnected(
        PlayerDisconnected {
            player: addressed_player(fields)?,
            msg: fields.opt("reason").map(str::to_string),
            ..Default::default()
        },
    )))
}

fn player_connected(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    Ok(Draft::complete(GameEvent::PlayerConnected(PlayerConnected {
        player: addressed_player(fields)?,
        msg: Some(fields.line().to_string()),
        ..Default::default()
    })))
}

fn player_spawned(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    Ok(Draft::complete(GameEvent::PlayerSpawned(PlayerSpawned {
        player: addressed_player(fields)?,
        ..Default::default()
    })))
}

fn player_messaged(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    Ok(Draft::complete(GameEvent::PlayerMessaged(PlayerMessaged {
        player: addressed_player(fields)?,
        message: fields.req("message")?.trim().to_string(),
        ..Default::default()
    })))
}

fn item_given_to(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    Ok(Draft::resolve_by(
        GameEvent::ItemGivenTo(ItemGivenTo {
            item: fields.req("item")?.trim().to_string(),
            amount: fields.num("amount")?,
            ..Default::default()
        }),
        PlayerLookup::ByName(fields.req("name")?.to_string()),
    ))
}

fn player_death(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    let attacker = match (fields.opt("attackerId"), fields.opt("attacker")) {
        (Some(id), Some(name)) => Some(steam_player(id, name)),
        _ => None,
    };
    Ok(Draft::complete(GameEvent::PlayerDeath(PlayerDeath {
        player: addressed_player(fields)?,
        attacker,
        ..Default::default()
    })))
}

static RULES: LazyLock<RuleSet> = LazyLock::new(|| {
    RuleSet::new(GAME)
        .rule(
            EventName::PlayerKicked,
            r"^(?:(?<ip>[\d.]+):(?<port>\d+)/)?(?<steamId>\d{17})/(?<name>.+?) kicked: (?<reason>.*)$",
            player_kicked,
        )
        .rule(
            EventName::PlayerKicked,
            r"^(?<ip>[\d.]+):(?<port>\d+)/(?<steamId>\d{17})/(?<name>.+?) disconnecting: Kicked: (?<reason>.*)$",
            player_kicked,
        )
        .rule(
            EventName::PlayerDisconnected,
            r"^(?<ip>[\d.]+):(?<port>\d+)/(?<steamId>\d{17})/(?<name>.+?) disconnecting: (?<reason>.*)$",
            player_disconnected,
        )
        .rule(
            EventName::PlayerConnected,
            r"^(?<ip>[\d.]+):(?<port>\d+)/(?<steamId>\d{17})/(?<name>.+?) joined \[(?<os>[^/\]]+)/\d{17}\]",
            player_connected,
        )
        .rule(
            EventName::PlayerConnected,
            r"^(?<name>.+) with steamid (?<steamId>\d{17}) joined from ip (?<ip>[\d.]+):(?<port>\d+)",
            player_connected,
        )
        .rule(
            EventName::PlayerSpawned,
            r"^(?<name>.+)\[(?<steamId>\d{17})\] has spawned",
            player_spawned,
        )
        .rule(
            EventName::PlayerMessaged,
            r"^\[CHAT\] (?<name>.+)\[(?<steamId>\d{17})\] : (?<message>.+)$",
            player_messaged,
        )
        .rule(
            EventName::ItemGivenTo,
            r"^\[ServerVar\] giving (?<name>.+?) (?<amount>\d+) x (?<item>.+)$",
            item_given_to,
        )
        .rule(
            EventName::PlayerDeath,
            r"^(?<name>.+?)\[(?<steamId>\d{17})\] was killed by (?<attacker>.+?)(?:\[(?<attackerId>\d{17})\])?(?: \(.*\))?$",
            player_death,
        )
        .rule(
            EventName::PlayerDeath,
            r"^(?<name>.+?)\[(?<steamId>\d{17})\] died \((?<cause>.+)\)$",
            player_death,
        )
});

pub fn rules() -> &'static RuleSet {
    &RULES
}

/// Row of the `playerlist` JSON reply.
#[derive(Debug, Clone, Deserialize)]
pub struct RconPlayer {
    #[serde(rename = "SteamID")]
    pub steam_id: String,
    #[serde(rename = "DisplayName", default)]
    pub display_name: String,
    #[serde(rename = "Ping", default)]
    pub ping: Option<u32>,
    #[serde(rename = "Address", default)]
    pub address: String,
}

impl RconPlayer {
    pub fn to_player(&self) -> Player {
        let mut player = steam_player(&self.steam_id, &self.display_name);
        player.ping = self.ping;
        player.ip = self
            .address
            .rsplit_once(':')
            .map(|(ip, _)| ip.to_string())
            .or_else(|| Some(self.address.clone()).filter(|a| !a.is_empty()));
        player
    }
}

pub fn parse_player_list(raw: &str) -> Result<Vec<Player>, ParseError> {
    let rows: Vec<RconPlayer> =
        serde_json::from_str(raw).map_err(|err| ParseError::MalformedFrame {
            game: GAME,
            reason: format!("playerlist: {err}"),
        })?;
    Ok(rows.iter().map(RconPlayer::to_player).collect())
}

static POSITION_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<steamId>\d{17})\s+(?<name>.+?)\s+\((?<x>-?[\d.]+), (?<y>-?[\d.]+), (?<z>-?[\d.]+)\)")
        .unwrap_or_else(|err| panic!("invalid playerlistpos pattern: {err}"))
});

/// Finds one player's row in `playerlistpos` output.
pub fn find_position(raw: &str, steam_id: &str) -> Option<Position> {
    raw.lines().find_map(|line| {
        let caps = POSITION_ROW.captures(line.trim())?;
        if &caps["steamId"] != steam_id {
            return None;
        }
        Some(Position::new(
            caps["x"].parse().ok()?,
            caps["y"].parse().ok()?,
            caps["z"].parse().ok()?,
        ))
    })
}

static BAN_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\d+ (?<steamId>\d{17}) "(?<name>[^"]*)" "(?<reason>[^"]*)" (?<expiry>-?\d+)"#)
        .unwrap_or_else(|err| panic!("invalid banlistex pattern: {err}"))
});

/// Parses `banlistex`. Expiry is a unix timestamp, non-positive means permanent.
pub fn parse_ban_list(raw: &str) -> Vec<gb_core::Ban> {
    raw.lines()
        .filter_map(|line| {
            let caps = BAN_ROW.captures(line.trim())?;
            let expiry: i64 = caps["expiry"].parse().ok()?;
            let expires_at = if expiry > 0 {
                Some(OffsetDateTime::from_unix_timestamp(expiry).ok()?)
            } else {
                None
            };
            Some(gb_core::Ban {
                player: steam_player(&caps["steamId"], &caps["name"]),
                reason: caps["reason"].to_string(),
                expires_at,
            })
        })
        .collect()
}
