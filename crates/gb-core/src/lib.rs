use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

pub mod events;
pub mod platform;

pub use events::{
    ChatChannel, ChatMessage, EntityKilled, EventName, GameEvent, ItemGivenTo, LogLine,
    PlayerConnected, PlayerDeath, PlayerDisconnected, PlayerKicked, PlayerMessaged, PlayerSpawned,
};
pub use platform::PlatformId;

/// The game a backend speaks for. Used as the tag on errors and log fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum GameKind {
    #[serde(rename = "7d2d")]
    SevenDaysToDie,
    #[serde(rename = "rust")]
    Rust,
    #[serde(rename = "mock")]
    Mock,
}

impl GameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::SevenDaysToDie => "7d2d",
            GameKind::Rust => "rust",
            GameKind::Mock => "mock",
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal handle for a player inside one game's namespace.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReference {
    pub game_id: String,
}

impl PlayerReference {
    pub fn new(game_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
        }
    }
}

impl From<&Player> for PlayerReference {
    fn from(player: &Player) -> Self {
        Self::new(player.game_id.clone())
    }
}

/// Player identity as reported by one parsed event or roster query.
///
/// Platform identifiers are optional because not every transport exposes
/// every one of them. Two lookups may produce two distinct values describing
/// the same real player; nothing is cached.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub game_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xbox_live_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_online_services_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping: Option<u32>,
}

impl Player {
    pub fn new(game_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Records a prefixed platform identifier in the matching field.
    pub fn with_platform_id(mut self, id: PlatformId) -> Self {
        match id {
            PlatformId::Steam(v) => self.steam_id = Some(v),
            PlatformId::Xbox(v) => self.xbox_live_id = Some(v),
            PlatformId::Eos(v) => self.epic_online_services_id = Some(v),
            PlatformId::Unknown(_) => {}
        }
        self
    }

    pub fn reference(&self) -> PlayerReference {
        PlayerReference::from(self)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Inventory content or catalog entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(default)]
    pub name: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

/// A ban as listed by a backend. `expires_at == None` means permanent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ban {
    pub player: Player,
    #[serde(default)]
    pub reason: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

/// Untouched backend response for a console command.
///
/// `success == false` is a normal return value, not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    #[serde(default)]
    pub raw_result: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CommandOutput {
    pub fn ok(raw_result: impl Into<String>) -> Self {
        Self {
            raw_result: raw_result.into(),
            success: true,
            error_message: None,
        }
    }

    pub fn failed(raw_result: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            raw_result: raw_result.into(),
            success: false,
            error_message: Some(error_message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestReachabilityOutput {
    pub connectable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Milliseconds, only meaningful when connectable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<u64>,
}

impl TestReachabilityOutput {
    pub fn reachable(latency_ms: u64) -> Self {
        Self {
            connectable: true,
            reason: None,
            latency: Some(latency_ms),
        }
    }

    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self {
            connectable: false,
            reason: Some(reason.into()),
            latency: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageOpts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<PlayerReference>,
}

impl MessageOpts {
    pub fn to(recipient: PlayerReference) -> Self {
        Self {
            recipient: Some(recipient),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_player_wire_shape_is_camel_case() {
        let player = Player::new("0002b5d9", "Catalysm")
            .with_platform_id(PlatformId::parse("Steam_76561198028175941"));
        let value = serde_json::to_value(&player).unwrap();
        assert_eq!(
            value,
            json!({
                "gameId": "0002b5d9",
                "name": "Catalysm",
                "steamId": "76561198028175941",
            })
        );
    }

    #[test]
    fn test_ban_without_expiry_is_permanent() {
        let ban: Ban = serde_json::from_value(json!({
            "player": { "gameId": "1", "name": "a" },
            "reason": "griefing",
        }))
        .unwrap();
        assert!(ban.expires_at.is_none());
    }

    #[test]
    fn test_game_kind_tags() {
        assert_eq!(GameKind::SevenDaysToDie.to_string(), "7d2d");
        assert_eq!(
            serde_json::to_value(GameKind::Rust).unwrap(),
            json!("rust")
        );
    }
}
