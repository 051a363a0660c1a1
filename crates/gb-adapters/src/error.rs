use gb_core::{EventName, GameKind};
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// A payload matched a rule but could not be turned into a complete event.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("{game}: parsing failed for {event}: missing capture group `{group}`")]
    MissingGroup {
        game: GameKind,
        event: EventName,
        group: &'static str,
    },
    #[error("{game}: parsing failed for {event}: invalid `{field}` value {value:?}")]
    InvalidValue {
        game: GameKind,
        event: EventName,
        field: &'static str,
        value: String,
    },
    #[error("{game}: parsing failed for {event}: could not resolve player {lookup}")]
    UnresolvedPlayer {
        game: GameKind,
        event: EventName,
        lookup: String,
    },
    #[error("{game}: parsing failed for {event}: missing {field}")]
    MissingIdentity {
        game: GameKind,
        event: EventName,
        field: &'static str,
    },
    #[error("{game}: malformed frame: {reason}")]
    MalformedFrame { game: GameKind, reason: String },
}

/// Every failure an adapter can surface.
///
/// Errors are `Clone` so one failure can be forwarded to the error channel and
/// still be returned to the caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdapterError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{game}: transport error: {message}")]
    Transport { game: GameKind, message: String },
    #[error("{game}: backend responded with HTTP {status}")]
    Http {
        game: GameKind,
        status: http::StatusCode,
    },
    #[error("{game}: {operation} timed out after {after:?}")]
    Timeout {
        game: GameKind,
        operation: &'static str,
        after: Duration,
    },
    #[error("{game}: backend rejected {operation}: {message}")]
    Backend {
        game: GameKind,
        operation: &'static str,
        message: String,
    },
    #[error("{game}: {operation} is not supported")]
    Unsupported {
        game: GameKind,
        operation: &'static str,
    },
    #[error("{game}: background parse failed: {message}")]
    Worker { game: GameKind, message: String },
    #[error("{game}: not connected")]
    NotConnected { game: GameKind },
}

impl AdapterError {
    pub fn transport(game: GameKind, err: impl Display) -> Self {
        AdapterError::Transport {
            game,
            message: err.to_string(),
        }
    }

    pub fn timeout(game: GameKind, operation: &'static str, after: Duration) -> Self {
        AdapterError::Timeout {
            game,
            operation,
            after,
        }
    }

    pub fn game(&self) -> GameKind {
        match self {
            AdapterError::Parse(err) => err.game(),
            AdapterError::Transport { game, .. }
            | AdapterError::Http { game, .. }
            | AdapterError::Timeout { game, .. }
            | AdapterError::Backend { game, .. }
            | AdapterError::Unsupported { game, .. }
            | AdapterError::Worker { game, .. }
            | AdapterError::NotConnected { game } => *game,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AdapterError::Timeout { .. })
    }
}

impl ParseError {
    pub fn game(&self) -> GameKind {
        match self {
            ParseError::MissingGroup { game, .. }
            | ParseError::InvalidValue { game, .. }
            | ParseError::UnresolvedPlayer { game, .. }
            | ParseError::MissingIdentity { game, .. }
            | ParseError::MalformedFrame { game, .. } => *game,
        }
    }
}

pub type Result<T, E = AdapterError> = std::result::Result<T, E>;
