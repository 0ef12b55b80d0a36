use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use snafu::ResultExt as _;

use crate::api::DEFAULT_SESSION_TTL;
use crate::database::DatabaseConfig;
use crate::error::{ApplicationError, ConfigLoadSnafu};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "Config::default_host")]
    pub host_address: SocketAddr,
    #[serde(default = "Config::default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(flatten)]
    pub database: DatabaseConfig,
    /// Overrides the site name derived from the request host.
    pub site_name: Option<String>,
    #[serde(
        default = "Config::default_session_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub session_ttl: Duration,
    /// Count repeat visits once this much time has passed, instead of once per browser session.
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub view_cooldown: Option<Duration>,
    #[serde(flatten)]
    pub admin: Option<AdminConfig>,
}

/// The administrator created on start-up when no account uses `admin_email` yet.
#[derive(Deserialize, Clone)]
pub struct AdminConfig {
    pub admin_email: String,
    pub admin_password: String,
    #[serde(default = "AdminConfig::default_name")]
    pub admin_name: String,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("admin_email", &self.admin_email)
            .field("admin_name", &self.admin_name)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Config, ApplicationError> {
        envy::from_env::<Config>().context(ConfigLoadSnafu)
    }

    fn default_host() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 3000))
    }

    fn default_log_dir() -> PathBuf {
        PathBuf::from("logs")
    }

    fn default_session_ttl() -> Duration {
        DEFAULT_SESSION_TTL
    }
}

impl AdminConfig {
    fn default_name() -> String {
        "Administrator".to_string()
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|text| humantime::parse_duration(&text))
        .transpose()
        .map_err(serde::de::Error::custom)
}
