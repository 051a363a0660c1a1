//! Platform identifier disambiguation.
//!
//! Some backends overload a single identifier field for every platform and
//! distinguish them only by a literal prefix (`Steam_`, `XBL_`, `EOS_`).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlatformId {
    Steam(String),
    Xbox(String),
    Eos(String),
    Unknown(String),
}

const STEAM_PREFIX: &str = "Steam_";
const XBOX_PREFIX: &str = "XBL_";
const EOS_PREFIX: &str = "EOS_";

impl PlatformId {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(id) = raw.strip_prefix(STEAM_PREFIX) {
            PlatformId::Steam(id.to_string())
        } else if let Some(id) = raw.strip_prefix(XBOX_PREFIX) {
            PlatformId::Xbox(id.to_string())
        } else if let Some(id) = raw.strip_prefix(EOS_PREFIX) {
            PlatformId::Eos(id.to_string())
        } else {
            PlatformId::Unknown(raw.to_string())
        }
    }

    /// The identifier without its platform prefix.
    pub fn id(&self) -> &str {
        match self {
            PlatformId::Steam(id)
            | PlatformId::Xbox(id)
            | PlatformId::Eos(id)
            | PlatformId::Unknown(id) => id,
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformId::Steam(id) => write!(f, "{STEAM_PREFIX}{id}"),
            PlatformId::Xbox(id) => write!(f, "{XBOX_PREFIX}{id}"),
            PlatformId::Eos(id) => write!(f, "{EOS_PREFIX}{id}"),
            PlatformId::Unknown(id) => f.write_str(id),
        }
    }
}
