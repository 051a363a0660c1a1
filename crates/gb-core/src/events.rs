//! The fixed event vocabulary shared by every adapter.
//!
//! The `type` tag of a serialized event is derived from the enum variant, so
//! an event can never declare a type that differs from its own shape.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

use crate::{Player, Position};

/// Channel names an emitter can publish on, excluding the error channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    #[serde(rename = "log")]
    LogLine,
    PlayerConnected,
    PlayerDisconnected,
    PlayerSpawned,
    PlayerKicked,
    PlayerMessaged,
    ChatMessage,
    PlayerDeath,
    EntityKilled,
    ItemGivenTo,
}

impl EventName {
    pub const ALL: [EventName; 10] = [
        EventName::LogLine,
        EventName::PlayerConnected,
        EventName::PlayerDisconnected,
        EventName::PlayerSpawned,
        EventName::PlayerKicked,
        EventName::PlayerMessaged,
        EventName::ChatMessage,
        EventName::PlayerDeath,
        EventName::EntityKilled,
        EventName::ItemGivenTo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::LogLine => "log",
            EventName::PlayerConnected => "player-connected",
            EventName::PlayerDisconnected => "player-disconnected",
            EventName::PlayerSpawned => "player-spawned",
            EventName::PlayerKicked => "player-kicked",
            EventName::PlayerMessaged => "player-messaged",
            EventName::ChatMessage => "chat-message",
            EventName::PlayerDeath => "player-death",
            EventName::EntityKilled => "entity-killed",
            EventName::ItemGivenTo => "item-given-to",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.as_str() == name)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub msg: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerConnected {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub player: Player,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerDisconnected {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub player: Player,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerSpawned {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub player: Player,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerKicked {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub player: Player,
    #[serde(default)]
    pub reason: String,
}

/// A message from one identified player, as logged by the console.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerMessaged {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub player: Player,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatChannel {
    #[default]
    Global,
    Team,
    Friends,
    Whisper,
}

impl ChatChannel {
    /// Maps a backend channel label; anything unrecognised is global chat.
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "party" | "team" => ChatChannel::Team,
            "friends" | "ally" => ChatChannel::Friends,
            "whisper" | "private" => ChatChannel::Whisper,
            _ => ChatChannel::Global,
        }
    }
}

/// Chat as seen by the server. `player` is absent for server-originated chat.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<Player>,
    #[serde(default)]
    pub channel: ChatChannel,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Player>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerDeath {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub player: Player,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacker: Option<Player>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityKilled {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub player: Player,
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weapon: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemGivenTo {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub player: Player,
    pub item: String,
    #[serde(default)]
    pub amount: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GameEvent {
    #[serde(rename = "log")]
    LogLine(LogLine),
    PlayerConnected(PlayerConnected),
    PlayerDisconnected(PlayerDisconnected),
    PlayerSpawned(PlayerSpawned),
    PlayerKicked(PlayerKicked),
    PlayerMessaged(PlayerMessaged),
    ChatMessage(ChatMessage),
    PlayerDeath(PlayerDeath),
    EntityKilled(EntityKilled),
    ItemGivenTo(ItemGivenTo),
}

impl GameEvent {
    pub fn log_line(msg: impl Into<String>) -> Self {
        GameEvent::LogLine(LogLine {
            timestamp: None,
            msg: msg.into(),
        })
    }

    pub fn name(&self) -> EventName {
        match self {
            GameEvent::LogLine(_) => EventName::LogLine,
            GameEvent::PlayerConnected(_) => EventName::PlayerConnected,
            GameEvent::PlayerDisconnected(_) => EventName::PlayerDisconnected,
            GameEvent::PlayerSpawned(_) => EventName::PlayerSpawned,
            GameEvent::PlayerKicked(_) => EventName::PlayerKicked,
            GameEvent::PlayerMessaged(_) => EventName::PlayerMessaged,
            GameEvent::ChatMessage(_) => EventName::ChatMessage,
            GameEvent::PlayerDeath(_) => EventName::PlayerDeath,
            GameEvent::EntityKilled(_) => EventName::EntityKilled,
            GameEvent::ItemGivenTo(_) => EventName::ItemGivenTo,
        }
    }

    fn timestamp_slot(&mut self) -> &mut Option<OffsetDateTime> {
        match self {
            GameEvent::LogLine(e) => &mut e.timestamp,
            GameEvent::PlayerConnected(e) => &mut e.timestamp,
            GameEvent::PlayerDisconnected(e) => &mut e.timestamp,
            GameEvent::PlayerSpawned(e) => &mut e.timestamp,
            GameEvent::PlayerKicked(e) => &mut e.timestamp,
            GameEvent::PlayerMessaged(e) => &mut e.timestamp,
            GameEvent::ChatMessage(e) => &mut e.timestamp,
            GameEvent::PlayerDeath(e) => &mut e.timestamp,
            GameEvent::EntityKilled(e) => &mut e.timestamp,
            GameEvent::ItemGivenTo(e) => &mut e.timestamp,
        }
    }

    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        match self {
            GameEvent::LogLine(e) => e.timestamp,
            GameEvent::PlayerConnected(e) => e.timestamp,
            GameEvent::PlayerDisconnected(e) => e.timestamp,
            GameEvent::PlayerSpawned(e) => e.timestamp,
            GameEvent::PlayerKicked(e) => e.timestamp,
            GameEvent::PlayerMessaged(e) => e.timestamp,
            GameEvent::ChatMessage(e) => e.timestamp,
            GameEvent::PlayerDeath(e) => e.timestamp,
            GameEvent::EntityKilled(e) => e.timestamp,
            GameEvent::ItemGivenTo(e) => e.timestamp,
        }
    }

    /// Fills in the timestamp with `now` unless the source provided one.
    pub fn stamp(&mut self, now: OffsetDateTime) {
        let slot = self.timestamp_slot();
        if slot.is_none() {
            *slot = Some(now);
        }
    }

    pub fn stamped(mut self) -> Self {
        self.stamp(OffsetDateTime::now_utc());
        self
    }

    /// The player the event is about, if the variant has one.
    pub fn player(&self) -> Option<&Player> {
        match self {
            GameEvent::LogLine(_) => None,
            GameEvent::PlayerConnected(e) => Some(&e.player),
            GameEvent::PlayerDisconnected(e) => Some(&e.player),
            GameEvent::PlayerSpawned(e) => Some(&e.player),
            GameEvent::PlayerKicked(e) => Some(&e.player),
            GameEvent::PlayerMessaged(e) => Some(&e.player),
            GameEvent::ChatMessage(e) => e.player.as_ref(),
            GameEvent::PlayerDeath(e) => Some(&e.player),
            GameEvent::EntityKilled(e) => Some(&e.player),
            GameEvent::ItemGivenTo(e) => Some(&e.player),
        }
    }

    /// Replaces the subject player. No-op for variants without one.
    pub fn set_player(&mut self, player: Player) {
        match self {
            GameEvent::LogLine(_) => {}
            GameEvent::PlayerConnected(e) => e.player = player,
            GameEvent::PlayerDisconnected(e) => e.player = player,
            GameEvent::PlayerSpawned(e) => e.player = player,
            GameEvent::PlayerKicked(e) => e.player = player,
            GameEvent::PlayerMessaged(e) => e.player = player,
            GameEvent::ChatMessage(e) => e.player = Some(player),
            GameEvent::PlayerDeath(e) => e.player = player,
            GameEvent::EntityKilled(e) => e.player = player,
            GameEvent::ItemGivenTo(e) => e.player = player,
        }
    }

    /// Names the first mandatory identity field left empty, if any.
    pub fn missing_identity(&self) -> Option<&'static str> {
        let player = self.player()?;
        if player.game_id.trim().is_empty() {
            return Some("player.gameId");
        }
        None
    }
}
