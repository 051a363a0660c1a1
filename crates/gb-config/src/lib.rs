use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Connection parameters for a 7 Days to Die server running the web API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SdtdConnectionInfo {
    /// `host[:port]` of the web API, without scheme.
    pub host: String,
    pub admin_user: String,
    pub admin_token: String,
    #[serde(default)]
    pub use_tls: bool,
    /// Server runs the CSMM Patrons mod, which changes command syntax and log lines.
    #[serde(default, rename = "useCPM")]
    pub use_cpm: bool,
}

impl SdtdConnectionInfo {
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.host.trim_end_matches('/'))
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("7d2d host must not be empty");
        }
        if self.host.contains("://") {
            bail!("7d2d host must not include a scheme, use useTls instead: {}", self.host);
        }
        if self.admin_user.is_empty() || self.admin_token.is_empty() {
            bail!("7d2d admin user and token are required");
        }
        Ok(())
    }
}

/// Connection parameters for a Rust server's WebRcon endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RustConnectionInfo {
    pub host: String,
    pub rcon_port: u16,
    pub rcon_password: String,
}

impl RustConnectionInfo {
    /// WebRcon authenticates through the URL path.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}/{}", self.host, self.rcon_port, self.rcon_password)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("rust host must not be empty");
        }
        if self.rcon_port == 0 {
            bail!("rust rcon port must not be 0");
        }
        if self.rcon_password.is_empty() {
            bail!("rust rcon password is required");
        }
        Ok(())
    }
}

/// Connection parameters for the simulated reference backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MockConnectionInfo {
    /// Websocket URL of the mock endpoint, e.g. `ws://127.0.0.1:3002`.
    pub host: String,
    /// Instance name; several simulated servers share one endpoint.
    pub name: String,
}

impl MockConnectionInfo {
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.host)
            .with_context(|| format!("invalid mock host url: {}", self.host))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!("mock host must use ws:// or wss://, got {}", url.scheme());
        }
        if self.name.trim().is_empty() {
            bail!("mock instance name is required");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum ConnectionInfo {
    #[serde(rename = "7d2d")]
    Sdtd(SdtdConnectionInfo),
    Rust(RustConnectionInfo),
    Mock(MockConnectionInfo),
}

impl ConnectionInfo {
    pub fn validate(&self) -> Result<()> {
        match self {
            ConnectionInfo::Sdtd(info) => info.validate(),
            ConnectionInfo::Rust(info) => info.validate(),
            ConnectionInfo::Mock(info) => info.validate(),
        }
    }
}

/// Timeouts and tuning shared by every adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AdapterSettings {
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub reachability_timeout_ms: u64,
    /// Sender name used by chat commands that take one.
    pub server_chat_name: String,
    /// Upper bound on concurrent bulk-parse jobs.
    pub item_parse_workers: usize,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_500,
            command_timeout_ms: 30_000,
            reachability_timeout_ms: 5_000,
            server_chat_name: "Server".into(),
            item_parse_workers: 2,
        }
    }
}

impl AdapterSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub connection: ConnectionInfo,
    #[serde(default)]
    pub settings: AdapterSettings,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Builds the config from a variable lookup; empty values count as unset.
    pub fn load_from<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let game = var("GB_GAME").unwrap_or_else(|| "mock".into());
        let connection = match game.as_str() {
            "7d2d" | "sdtd" => ConnectionInfo::Sdtd(SdtdConnectionInfo {
                host: var("GB_HOST").unwrap_or_else(|| "localhost:8080".into()),
                admin_user: var("GB_ADMIN_USER").unwrap_or_default(),
                admin_token: var("GB_ADMIN_TOKEN").unwrap_or_default(),
                use_tls: parse_flag(var("GB_USE_TLS"), "GB_USE_TLS")?,
                use_cpm: parse_flag(var("GB_USE_CPM"), "GB_USE_CPM")?,
            }),
            "rust" => ConnectionInfo::Rust(RustConnectionInfo {
                host: var("GB_HOST").unwrap_or_else(|| "localhost".into()),
                rcon_port: match var("GB_RCON_PORT") {
                    Some(v) => v
                        .parse()
                        .with_context(|| format!("invalid GB_RCON_PORT: {}", v))?,
                    None => 28016,
                },
                rcon_password: var("GB_RCON_PASSWORD").unwrap_or_default(),
            }),
            "mock" => ConnectionInfo::Mock(MockConnectionInfo {
                host: var("GB_HOST").unwrap_or_else(|| "ws://127.0.0.1:3002".into()),
                name: var("GB_MOCK_NAME").unwrap_or_else(|| "mock-1".into()),
            }),
            other => bail!("unsupported GB_GAME: {}", other),
        };

        let mut settings = AdapterSettings::default();
        if let Some(v) = var("GB_CONNECT_TIMEOUT_MS") {
            settings.connect_timeout_ms = parse_num(&v, "GB_CONNECT_TIMEOUT_MS")?;
        }
        if let Some(v) = var("GB_COMMAND_TIMEOUT_MS") {
            settings.command_timeout_ms = parse_num(&v, "GB_COMMAND_TIMEOUT_MS")?;
        }
        if let Some(v) = var("GB_REACHABILITY_TIMEOUT_MS") {
            settings.reachability_timeout_ms = parse_num(&v, "GB_REACHABILITY_TIMEOUT_MS")?;
        }
        if let Some(v) = var("GB_SERVER_CHAT_NAME") {
            settings.server_chat_name = v;
        }
        if let Some(v) = var("GB_ITEM_PARSE_WORKERS") {
            settings.item_parse_workers = parse_num::<usize>(&v, "GB_ITEM_PARSE_WORKERS")?.max(1);
        }

        connection.validate()?;
        debug!(game = %game, "loaded connection config");
        Ok(Self {
            connection,
            settings,
        })
    }
}

fn parse_flag(value: Option<String>, key: &str) -> Result<bool> {
    match value.as_deref() {
        None => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("no") => Ok(false),
        Some(other) => bail!("invalid {}: {}", key, other),
    }
}

fn parse_num<T>(value: &str, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid {}: {}", key, value))
}
