//! Log line rules for 7 Days to Die.
//!
//! Servers running the CSMM Patrons mod ("CPM") log deaths and kills in
//! their own format, so the rule set differs per connection.

use gb_core::{
    ChatChannel, ChatMessage, EntityKilled, EventName, GameEvent, GameKind, PlatformId, Player,
    PlayerConnected, PlayerDeath, PlayerDisconnected, Position,
};
use std::collections::VecDeque;
use std::sync::{LazyLock, Mutex, PoisonError};

use crate::error::ParseError;
use crate::parse::{finish, Draft, Fields, PlayerLookup, PlayerResolver, RuleSet};

const GAME: GameKind = GameKind::SevenDaysToDie;
const MOD_HANDLED_PREFIX: &str = "Chat handled by mod";
const RECENT_CHAT_CAPACITY: usize = 64;

const PLAYER_CONNECTED: &str = r"PlayerSpawnedInWorld \(reason: (?:JoinMultiplayer|EnterMultiplayer), position: (?<x>-?\d+), (?<y>-?\d+), (?<z>-?\d+)\): EntityID=(?<entityId>-?\d+), PltfmId='(?<platformId>[^']+)', CrossId='EOS_(?<eosId>[^']+)', OwnerID='[^']*', PlayerName='(?<name>.+?)'(?:,|$)";
const PLAYER_DISCONNECTED: &str = r"Player disconnected: EntityID=(?<entityId>-?\d+), PltfmId='(?<platformId>[^']+)', CrossId='EOS_(?<eosId>[^']+)', OwnerID='[^']*', PlayerName='(?<name>.+?)'(?:,|$)";
const CHAT_MESSAGE: &str = r"Chat \(from '(?<platformId>[^']+)', entity id '(?<entityId>-?\d+)', to '(?<channel>\w+)'\): '(?<name>.+?)':(?<message>.+)";
const PLAYER_DEATH: &str = r"GMSG: Player '(?<name>.+)' died";
const CPM_PLAYER_DEATH: &str = r"\[CSMM_Patrons\]playerDied: (?<name>.+) \((?<platformId>[^)]+)\) died @ (?<x>-?[\d.]+) (?<y>-?[\d.]+) (?<z>-?[\d.]+)";
const ENTITY_KILLED: &str = r"Entity (?<entity>.+) \d+ killed by (?<name>.+) \d+";
const CPM_ENTITY_KILLED: &str = r"\[CSMM_Patrons\]entityKilled: (?<name>.+) \((?<platformId>[^)]+)\) killed (?<entityType>\w+) (?<entity>\S+) with (?<weapon>.+)";

fn base_rules() -> RuleSet {
    RuleSet::new(GAME)
        .rule(EventName::PlayerConnected, PLAYER_CONNECTED, player_connected)
        .rule(EventName::PlayerDisconnected, PLAYER_DISCONNECTED, player_disconnected)
        .rule(EventName::ChatMessage, CHAT_MESSAGE, chat_message)
}

static VANILLA_RULES: LazyLock<RuleSet> = LazyLock::new(|| {
    base_rules()
        .rule(EventName::PlayerDeath, PLAYER_DEATH, player_death)
        .rule(EventName::EntityKilled, ENTITY_KILLED, entity_killed)
});

static CPM_RULES: LazyLock<RuleSet> = LazyLock::new(|| {
    base_rules()
        .rule(EventName::PlayerDeath, CPM_PLAYER_DEATH, cpm_player_death)
        .rule(EventName::EntityKilled, CPM_ENTITY_KILLED, cpm_entity_killed)
});

/// Identity carried directly by join/leave lines, no lookup needed.
fn announced_player(fields: &Fields<'_>) -> Result<Player, ParseError> {
    let eos = fields.req("eosId")?;
    Ok(Player::new(eos, fields.req("name")?)
        .with_platform_id(PlatformId::parse(fields.req("platformId")?))
        .with_platform_id(PlatformId::Eos(eos.to_string())))
}

fn player_connected(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    Ok(Draft::complete(GameEvent::PlayerConnected(PlayerConnected {
        player: announced_player(fields)?,
        msg: Some(fields.line().to_string()),
        ..Default::default()
    })))
}

fn player_disconnected(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    Ok(Draft::complete(GameEvent::PlayerDisconnected(
        PlayerDisconnected {
            player: announced_player(fields)?,
            msg: Some(fields.line().to_string()),
            ..Default::default()
        },
    )))
}

fn chat_message(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    let entity_id: i64 = fields.num("entityId")?;
    let platform_id = fields.req("platformId")?;
    let message = fields.req("message")?.trim();
    fields.req("name")?;
    // Server-originated chat is only logged.
    if entity_id == -1 {
        return Ok(Draft::complete(GameEvent::log_line(fields.line())));
    }
    Ok(Draft::resolve_by(
        GameEvent::ChatMessage(ChatMessage {
            channel: ChatChannel::from_label(fields.req("channel")?),
            msg: message.to_string(),
            ..Default::default()
        }),
        PlayerLookup::ByPlatformId(PlatformId::parse(platform_id)),
    ))
}

fn player_death(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    Ok(Draft::resolve_by(
        GameEvent::PlayerDeath(PlayerDeath::default()),
        PlayerLookup::ByName(fields.req("name")?.to_string()),
    ))
}

fn cpm_player_death(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    let position = Position::new(fields.num("x")?, fields.num("y")?, fields.num("z")?);
    Ok(Draft::resolve_by(
        GameEvent::PlayerDeath(PlayerDeath {
            position: Some(position),
            ..Default::default()
        }),
        PlayerLookup::ByPlatformId(PlatformId::parse(fields.req("platformId")?)),
    ))
}

fn entity_killed(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    Ok(Draft::resolve_by(
        GameEvent::EntityKilled(EntityKilled {
            entity: fields.req("entity")?.to_string(),
            ..Default::default()
        }),
        PlayerLookup::ByName(fields.req("name")?.to_string()),
    ))
}

fn cpm_entity_killed(fields: &Fields<'_>) -> Result<Draft, ParseError> {
    Ok(Draft::resolve_by(
        GameEvent::EntityKilled(EntityKilled {
            entity: fields.req("entity")?.to_string(),
            weapon: Some(fields.req("weapon")?.to_string()),
            ..Default::default()
        }),
        PlayerLookup::ByPlatformId(PlatformId::parse(fields.req("platformId")?)),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChatKey {
    platform_id: String,
    msg: String,
}

pub struct SdtdParser {
    rules: &'static RuleSet,
    recent_chat: Mutex<VecDeque<ChatKey>>,
}

impl SdtdParser {
    pub fn new(use_cpm: bool) -> Self {
        let rules: &'static RuleSet = if use_cpm { &CPM_RULES } else { &VANILLA_RULES };
        Self {
            rules,
            recent_chat: Mutex::new(VecDeque::with_capacity(RECENT_CHAT_CAPACITY)),
        }
    }

    /// Parses one log line to exactly one event.
    pub async fn parse(
        &self,
        line: &str,
        resolver: &dyn PlayerResolver,
    ) -> Result<GameEvent, ParseError> {
        let draft = match self.rules.extract(line) {
            None => return Ok(GameEvent::log_line(line).stamped()),
            Some(draft) => draft?,
        };
        if self.is_repeated_chat(line, &draft) {
            return Ok(GameEvent::log_line(line).stamped());
        }
        finish(GAME, draft, Some(resolver)).await
    }

    /// Mods re-log chat they handled. The first sighting of a message wins.
    fn is_repeated_chat(&self, line: &str, draft: &Draft) -> bool {
        let (GameEvent::ChatMessage(chat), Some(PlayerLookup::ByPlatformId(id))) =
            (&draft.event, &draft.lookup)
        else {
            return false;
        };
        let key = ChatKey {
            platform_id: id.id().to_string(),
            msg: chat.msg.clone(),
        };

        let mut recent = self
            .recent_chat
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = recent.iter().position(|seen| *seen == key) {
            if line.starts_with(MOD_HANDLED_PREFIX) {
                recent.remove(pos);
                return true;
            }
        }
        if !line.starts_with(MOD_HANDLED_PREFIX) {
            if recent.len() == RECENT_CHAT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(key);
        }
        false
    }
}
