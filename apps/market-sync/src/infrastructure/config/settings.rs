//! Sync Configuration Settings
//!
//! Configuration types for the sync engine, loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::connection::ConnectionConfig;
use crate::application::services::engine::EngineConfig;
use crate::application::services::reconnect::ReconnectConfig;
use crate::domain::live_range::RangeId;
use crate::domain::streaming::SecurityKey;

/// Feed API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String) -> Self {
        Self { api_key }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Market data feed connection settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// WebSocket endpoint.
    pub url: String,
    /// Optional bearer credential.
    pub credentials: Option<Credentials>,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Silent-connection watchdog (`None` = disabled).
    pub idle_timeout: Option<Duration>,
}

impl FeedSettings {
    /// Default reconnect delay.
    pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
}

/// Live range settings.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Refresh period for ranges created without one.
    pub default_refresh: Duration,
    /// Directory the renderer writes into.
    pub output_dir: PathBuf,
    /// Ranges created at start-up.
    pub live_ranges: Vec<LiveRangeSpec>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_refresh: Duration::from_millis(5000),
            output_dir: PathBuf::from("./live-ranges"),
            live_ranges: Vec::new(),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Feed connection settings.
    pub feed: FeedSettings,
    /// Live range settings.
    pub sync: SyncSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl SyncConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// any variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let url = env.required("FEED_URL")?;
        let credentials = env
            .optional("FEED_API_KEY")
            .filter(|key| !key.is_empty())
            .map(Credentials::new);

        let idle_secs: u64 = env.parse("FEED_IDLE_TIMEOUT_SECS", 0)?;
        let feed = FeedSettings {
            url,
            credentials,
            reconnect_delay: env.millis(
                "FEED_RECONNECT_DELAY_MS",
                FeedSettings::DEFAULT_RECONNECT_DELAY,
            )?,
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
        };

        let defaults = SyncSettings::default();
        let sync = SyncSettings {
            default_refresh: env.millis("SYNC_DEFAULT_REFRESH_MS", defaults.default_refresh)?,
            output_dir: env
                .optional("SYNC_OUTPUT_DIR")
                .filter(|dir| !dir.is_empty())
                .map_or(defaults.output_dir, PathBuf::from),
            live_ranges: env
                .optional("SYNC_LIVE_RANGES")
                .map(|value| parse_live_ranges(&value))
                .transpose()?
                .unwrap_or_default(),
        };

        let server = ServerSettings {
            health_port: env.parse("SYNC_HEALTH_PORT", ServerSettings::default().health_port)?,
        };

        Ok(Self { feed, sync, server })
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub const fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            connection: ConnectionConfig {
                reconnect: ReconnectConfig::fixed(self.feed.reconnect_delay),
                idle_timeout: self.feed.idle_timeout,
            },
            default_refresh: self.sync.default_refresh,
        }
    }
}

// =============================================================================
// Live Range Specs
// =============================================================================

/// A live range declared in configuration.
///
/// Text form: `id=TICKER[@EXCHANGE],...|field,...[|period_ms]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveRangeSpec {
    /// Range id.
    pub id: RangeId,
    /// Row securities.
    pub securities: Vec<SecurityKey>,
    /// Column fields.
    pub fields: Vec<String>,
    /// Refresh period; the configured default when absent.
    pub period: Option<Duration>,
}

/// Error parsing a [`LiveRangeSpec`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid live range '{entry}': {reason}")]
pub struct LiveRangeSpecError {
    /// The offending text.
    pub entry: String,
    /// What is wrong with it.
    pub reason: String,
}

impl FromStr for LiveRangeSpec {
    type Err = LiveRangeSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| LiveRangeSpecError {
            entry: s.to_string(),
            reason: reason.to_string(),
        };

        let (id, rest) = s.split_once('=').ok_or_else(|| fail("expected 'id=...'"))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(fail("empty id"));
        }

        let mut parts = rest.split('|');
        let securities = parts
            .next()
            .unwrap_or_default()
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(SecurityKey::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| fail(&e.to_string()))?;
        if securities.is_empty() {
            return Err(fail("no securities"));
        }

        let fields: Vec<String> = parts
            .next()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if fields.is_empty() {
            return Err(fail("no fields"));
        }

        let period = match parts.next().map(str::trim) {
            None | Some("") => None,
            Some(ms) => match ms.parse::<u64>() {
                Ok(0) | Err(_) => return Err(fail("period must be a positive number of milliseconds")),
                Ok(ms) => Some(Duration::from_millis(ms)),
            },
        };

        if parts.next().is_some() {
            return Err(fail("too many '|' sections"));
        }

        Ok(Self {
            id: RangeId::new(id),
            securities,
            fields,
            period,
        })
    }
}

fn parse_live_ranges(value: &str) -> Result<Vec<LiveRangeSpec>, ConfigError> {
    value
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry.parse().map_err(|e: LiveRangeSpecError| ConfigError::InvalidValue {
                key: "SYNC_LIVE_RANGES".to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

// =============================================================================
// Errors and Helpers
// =============================================================================

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} is invalid: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(v) if v.is_empty() => Ok(default),
            Some(v) => v.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("'{v}': {e}"),
            }),
        }
    }

    /// A non-zero millisecond duration.
    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.parse(key, duration_millis(default))? {
            0 => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: "must be greater than zero".to_string(),
            }),
            ms => Ok(Duration::from_millis(ms)),
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
