//! Signaling service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use crate::store::StoreTtl;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default gRPC bind address for signaling streams.
pub const DEFAULT_GRPC_BIND_ADDRESS: &str = "0.0.0.0:50051";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default session record lifetime in seconds (24h).
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 86_400;

/// Default peer record lifetime in seconds (1h).
pub const DEFAULT_PEER_TTL_SECONDS: u64 = 3_600;

/// Default time in-flight streams get to finish after shutdown starts.
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS: u64 = 5;

/// Default capacity for sessions created without an explicit limit.
pub const DEFAULT_MAX_PEERS: u32 = 10;

/// Default media server token lifetime in seconds.
pub const DEFAULT_TOKEN_VALIDITY_SECONDS: u64 = 3_600;

/// Default ICE server list.
pub const DEFAULT_ICE_SERVERS: &str = "stun:stun.l.google.com:19302";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(ConfigError::InvalidValue(format!(
                "LOG_FORMAT must be \"json\" or \"pretty\", got {other:?}"
            ))),
        }
    }
}

/// Managed media server credentials. Present only when all three variables
/// are set.
#[derive(Clone)]
pub struct LiveKitConfig {
    /// Client-facing media server URL returned with join tokens.
    pub host: String,
    pub api_key: String,
    pub api_secret: SecretString,
}

impl fmt::Debug for LiveKitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveKitConfig")
            .field("host", &self.host)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Signaling service configuration.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL. May embed a password.
    pub redis_url: SecretString,

    /// gRPC server bind address (default: "0.0.0.0:50051").
    pub grpc_bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    pub session_ttl_seconds: u64,

    pub peer_ttl_seconds: u64,

    /// Grace period for in-flight streams on shutdown (default: 5).
    pub shutdown_grace_period_seconds: u64,

    /// Capacity used by `CreateSession` when the request passes 0.
    pub default_max_peers: u32,

    pub livekit: Option<LiveKitConfig>,

    pub token_validity_seconds: u64,

    /// STUN/TURN URLs for the negotiator's peer connections.
    pub ice_servers: Vec<String>,

    pub log_format: LogFormat,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("grpc_bind_address", &self.grpc_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("peer_ttl_seconds", &self.peer_ttl_seconds)
            .field(
                "shutdown_grace_period_seconds",
                &self.shutdown_grace_period_seconds,
            )
            .field("default_max_peers", &self.default_max_peers)
            .field("livekit", &self.livekit)
            .field("token_validity_seconds", &self.token_validity_seconds)
            .field("ice_servers", &self.ice_servers)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(
            vars.get("REDIS_URL")
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?
                .clone(),
        );

        let grpc_bind_address = vars
            .get("SIGNALING_GRPC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_GRPC_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SIGNALING_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let session_ttl_seconds =
            parse_positive(vars, "SESSION_TTL_SECONDS", DEFAULT_SESSION_TTL_SECONDS)?;
        let peer_ttl_seconds = parse_positive(vars, "PEER_TTL_SECONDS", DEFAULT_PEER_TTL_SECONDS)?;
        let shutdown_grace_period_seconds = parse_or(
            vars,
            "SHUTDOWN_GRACE_PERIOD_SECONDS",
            DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS,
        )?;
        let default_max_peers =
            parse_positive(vars, "SESSION_DEFAULT_MAX_PEERS", DEFAULT_MAX_PEERS)?;
        let token_validity_seconds =
            parse_positive(vars, "TOKEN_VALIDITY_SECONDS", DEFAULT_TOKEN_VALIDITY_SECONDS)?;

        let livekit = livekit_from_vars(vars)?;

        let ice_servers: Vec<String> = vars
            .get("ICE_SERVERS")
            .map_or(DEFAULT_ICE_SERVERS, String::as_str)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let log_format = vars
            .get("LOG_FORMAT")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or_default();

        Ok(Config {
            redis_url,
            grpc_bind_address,
            health_bind_address,
            session_ttl_seconds,
            peer_ttl_seconds,
            shutdown_grace_period_seconds,
            default_max_peers,
            livekit,
            token_validity_seconds,
            ice_servers,
            log_format,
        })
    }

    pub fn store_ttl(&self) -> StoreTtl {
        StoreTtl {
            session: Duration::from_secs(self.session_ttl_seconds),
            peer: Duration::from_secs(self.peer_ttl_seconds),
        }
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_seconds)
    }

    pub fn token_validity(&self) -> Duration {
        Duration::from_secs(self.token_validity_seconds)
    }
}

fn livekit_from_vars(vars: &HashMap<String, String>) -> Result<Option<LiveKitConfig>, ConfigError> {
    let get = |name: &str| vars.get(name).filter(|v| !v.is_empty()).cloned();

    match (
        get("LIVEKIT_HOST"),
        get("LIVEKIT_API_KEY"),
        get("LIVEKIT_API_SECRET"),
    ) {
        (Some(host), Some(api_key), Some(api_secret)) => Ok(Some(LiveKitConfig {
            host,
            api_key,
            api_secret: SecretString::from(api_secret),
        })),
        (None, None, None) => Ok(None),
        _ => Err(ConfigError::InvalidValue(
            "LIVEKIT_HOST, LIVEKIT_API_KEY and LIVEKIT_API_SECRET must be set together"
                .to_string(),
        )),
    }
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name} is not a valid number: {raw:?}"))),
        None => Ok(default),
    }
}

fn parse_positive<T: FromStr + Default + PartialOrd>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    let value = parse_or(vars, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than zero"
        )));
    }
    Ok(value)
}
