//! Configuration for the bridge.
//!
//! Everything is resolved from env vars (a local `.env` is loaded via
//! dotenvy early in startup). Remote credentials are required; gateway and
//! escalation knobs all have working defaults.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Main configuration for the bridge.
#[derive(Debug, Clone)]
pub struct Config {
    pub remote: RemoteConfig,
    pub gateway: GatewayConfig,
    pub cache: CacheConfig,
    pub escalation: EscalationConfig,
}

/// Remote contact-center API endpoints and credentials.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Identity endpoint that exchanges the access key pair for a token.
    pub auth_url: String,
    /// Discovery endpoint that resolves the per-tenant API base.
    pub discovery_url: String,
    /// API version segment appended to the discovered base.
    pub api_version: String,
    pub access_key_id: String,
    pub access_key_secret: SecretString,
    pub request_timeout: Duration,
}

/// Gateway HTTP server configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed to call the gateway (scheme-stripped). A request
    /// carrying an Origin header is rejected unless it matches one of
    /// these.
    pub allowed_domains: Vec<String>,
    /// Suffix marking a session key as a linked (secondary) session.
    pub linked_session_suffix: String,
}

/// Credential cache location for linked-session sharing.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one JSON credential file per suffix-stripped
    /// session key.
    pub dir: PathBuf,
}

/// Escalation engine knobs.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// How long to wait for an agent to pick up before giving up.
    pub agent_wait_timeout: Duration,
    /// Bounded wait passed through to the remote message fetch.
    pub message_wait_secs: u64,
    /// Think-time between poll cycles.
    pub poll_think_time: Duration,
    /// Phrase in an agent/system message that means the department closed
    /// mid-chat.
    pub out_of_time_detection: String,
    /// Team to restrict availability checks to. 0 means any team.
    pub team_id: i64,
    /// Point of contact the chat is created against.
    pub point_of_contact: Option<String>,
    /// Hours-of-operation profile to check, when configured.
    pub hours_profile_id: Option<String>,
    pub default_user_name: String,
    pub default_chatbot_name: String,
    pub default_system_name: String,
    pub transcript_title: String,
}

impl Config {
    /// Resolve the full configuration from the environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            remote: RemoteConfig::resolve()?,
            gateway: GatewayConfig::resolve()?,
            cache: CacheConfig::resolve()?,
            escalation: EscalationConfig::resolve()?,
        })
    }
}

impl RemoteConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            auth_url: required_env("AUTH_URL")?,
            discovery_url: required_env("DISCOVERY_URL")?,
            api_version: optional_env("API_VERSION").unwrap_or_else(|| "v13.0".to_string()),
            access_key_id: required_env("ACCESS_KEY_ID")?,
            access_key_secret: SecretString::from(required_env("ACCESS_KEY_SECRET")?),
            request_timeout: Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECS", 30)?),
        })
    }
}

impl GatewayConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let allowed_domains = optional_env("DOMAINS")
            .map(|raw| {
                raw.replace(' ', "")
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: optional_env("GATEWAY_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_env("GATEWAY_PORT", 8080)?,
            allowed_domains,
            linked_session_suffix: optional_env("LINKED_SESSION_SUFFIX")
                .unwrap_or_else(|| "-linked".to_string()),
        })
    }
}

impl CacheConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            dir: optional_env("CREDENTIAL_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
        })
    }
}

impl EscalationConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            agent_wait_timeout: Duration::from_secs(parse_env("AGENT_WAIT_TIMEOUT_SECS", 60)?),
            message_wait_secs: parse_env("MESSAGE_WAIT_SECS", 24)?,
            poll_think_time: Duration::from_millis(parse_env("POLL_THINK_TIME_MS", 24)?),
            out_of_time_detection: optional_env("OUT_OF_TIME_DETECTION")
                .unwrap_or_else(|| "department is currently closed".to_string()),
            team_id: parse_env("TEAM_ID", 0)?,
            point_of_contact: optional_env("POINT_OF_CONTACT"),
            hours_profile_id: optional_env("HOURS_PROFILE_ID"),
            default_user_name: optional_env("DEFAULT_USER_NAME")
                .unwrap_or_else(|| "Guest".to_string()),
            default_chatbot_name: optional_env("DEFAULT_CHATBOT_NAME")
                .unwrap_or_else(|| "Chatbot".to_string()),
            default_system_name: optional_env("DEFAULT_SYSTEM_NAME")
                .unwrap_or_else(|| "System".to_string()),
            transcript_title: optional_env("TRANSCRIPT_TITLE")
                .unwrap_or_else(|| "Transcript Conversation".to_string()),
        })
    }
}

fn required_env(key: &str) -> Result<String, ConfigError> {
    optional_env(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn optional_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
        None => Ok(default),
    }
}
