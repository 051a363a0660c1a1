//! Rule-based translation of raw console lines into typed events.
//!
//! A [`RuleSet`] is an ordered list of `(event, regex, extractor)` rules.
//! The first rule whose pattern matches wins; a line no rule matches becomes
//! a `LogLine`. Extractors never return a half-filled event: a missing
//! capture group is a [`ParseError`] naming the group.
//!
//! Some lines only carry a platform id or a display name. Their extractor
//! returns a [`Draft`] with a [`PlayerLookup`] that is completed through a
//! [`PlayerResolver`] before the event is published.

use async_trait::async_trait;
use gb_core::{EventName, GameEvent, GameKind, PlatformId, Player};
use regex::{Captures, Regex};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

use crate::emitter::Emitter;
use crate::error::{AdapterError, ParseError, Result};
use crate::guard::Guard;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerLookup {
    ByPlatformId(PlatformId),
    ByName(String),
}

impl fmt::Display for PlayerLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerLookup::ByPlatformId(id) => write!(f, "with platform id {id}"),
            PlayerLookup::ByName(name) => write!(f, "named {name:?}"),
        }
    }
}

/// Completes a partially identified player, typically from the live roster.
#[async_trait]
pub trait PlayerResolver: Send + Sync {
    async fn resolve(&self, lookup: &PlayerLookup) -> Result<Option<Player>>;
}

/// An extracted event, possibly still waiting on player resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub event: GameEvent,
    pub lookup: Option<PlayerLookup>,
}

impl Draft {
    pub fn complete(event: GameEvent) -> Self {
        Self {
            event,
            lookup: None,
        }
    }

    pub fn resolve_by(event: GameEvent, lookup: PlayerLookup) -> Self {
        Self {
            event,
            lookup: Some(lookup),
        }
    }
}

/// Named capture access for one matched rule.
pub struct Fields<'h> {
    game: GameKind,
    event: EventName,
    line: &'h str,
    caps: Captures<'h>,
}

impl<'h> Fields<'h> {
    pub fn line(&self) -> &'h str {
        self.line
    }

    pub fn opt(&self, group: &'static str) -> Option<&'h str> {
        self.caps
            .name(group)
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn req(&self, group: &'static str) -> Result<&'h str, ParseError> {
        self.opt(group).ok_or(ParseError::MissingGroup {
            game: self.game,
            event: self.event,
            group,
        })
    }

    pub fn num<T: FromStr>(&self, group: &'static str) -> Result<T, ParseError> {
        let raw = self.req(group)?;
        raw.trim().parse().map_err(|_| ParseError::InvalidValue {
            game: self.game,
            event: self.event,
            field: group,
            value: raw.to_string(),
        })
    }
}

pub type Extract = fn(&Fields<'_>) -> Result<Draft, ParseError>;

pub struct Rule {
    pub event: EventName,
    pub pattern: Regex,
    extract: Extract,
}

pub struct RuleSet {
    game: GameKind,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(game: GameKind) -> Self {
        Self {
            game,
            rules: Vec::new(),
        }
    }

    /// Appends a rule. Patterns are literals checked by each rule set's tests.
    pub fn rule(mut self, event: EventName, pattern: &str, extract: Extract) -> Self {
        let pattern = Regex::new(pattern)
            .unwrap_or_else(|err| panic!("invalid {} rule for {event}: {err}", self.game));
        self.rules.push(Rule {
            event,
            pattern,
            extract,
        });
        self
    }

    pub fn game(&self) -> GameKind {
        self.game
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Runs the first matching rule. `None` when nothing matched.
    pub fn extract(&self, line: &str) -> Option<Result<Draft, ParseError>> {
        self.rules.iter().find_map(|rule| {
            let caps = rule.pattern.captures(line)?;
            trace!(game = %self.game, event = %rule.event, "rule matched");
            let fields = Fields {
                game: self.game,
                event: rule.event,
                line,
                caps,
            };
            Some((rule.extract)(&fields))
        })
    }

    /// Parses one line to exactly one event, `LogLine` when nothing matched.
    pub async fn parse(
        &self,
        line: &str,
        resolver: Option<&dyn PlayerResolver>,
    ) -> Result<GameEvent, ParseError> {
        match self.extract(line) {
            None => Ok(GameEvent::log_line(line).stamped()),
            Some(draft) => finish(self.game, draft?, resolver).await,
        }
    }
}

/// Resolves a draft's player, checks identity and stamps the event.
pub async fn finish(
    game: GameKind,
    draft: Draft,
    resolver: Option<&dyn PlayerResolver>,
) -> Result<GameEvent, ParseError> {
    let Draft { mut event, lookup } = draft;
    if let Some(lookup) = lookup {
        let unresolved = || ParseError::UnresolvedPlayer {
            game,
            event: event.name(),
            lookup: lookup.to_string(),
        };
        let resolved = match resolver {
            Some(resolver) => resolver.resolve(&lookup).await.map_err(|err| {
                debug!(game = %game, error = %err, "player lookup failed");
                unresolved()
            })?,
            None => None,
        };
        event.set_player(resolved.ok_or_else(unresolved)?);
    }

    if let Some(field) = event.missing_identity() {
        return Err(ParseError::MissingIdentity {
            game,
            event: event.name(),
            field,
        });
    }
    Ok(event.stamped())
}

/// Publishes the outcome of parsing one raw payload.
///
/// A typed event is followed by the raw line as a `LogLine`; anything else
/// yields the `LogLine` alone. Parse failures go to the error channel.
/// Returns `false` when the failure went unattended and the caller's stream
/// should stop.
pub async fn publish(
    emitter: &Emitter,
    guard: &Guard,
    raw: &str,
    parsed: Result<GameEvent, ParseError>,
) -> bool {
    match parsed {
        Ok(event) if event.name() == EventName::LogLine => {
            emitter.emit(event).await;
            true
        }
        Ok(event) => {
            emitter.emit(event).await;
            emitter.emit(GameEvent::log_line(raw)).await;
            true
        }
        Err(err) => {
            emitter.emit(GameEvent::log_line(raw)).await;
            guard.background(AdapterError::from(err)).await
        }
    }
}
