use std::time::Duration;

use crate::shared::ChatError;

/// Runtime configuration for the chat server
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub bind_addr: String,
    /// Redis connection string; in-memory bus and presence are used when unset
    pub redis_url: Option<String>,
    /// Pub/sub channel shared by every room
    pub events_channel: String,
    pub presence_key_prefix: String,
    /// How long a touch keeps an identity present in a room
    pub presence_window: Duration,
    /// Upper bound on a single websocket receive before the loop re-checks shutdown
    pub receive_timeout: Duration,
    pub publish_timeout: Duration,
    /// Consecutive failed subscribe attempts before the listener gives up
    pub listener_max_retries: u32,
    pub listener_initial_backoff: Duration,
    pub listener_max_backoff: Duration,
    pub jwt_secret: String,
    pub token_expiration_days: i64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            redis_url: None,
            events_channel: "chat:events".to_string(),
            presence_key_prefix: "chat:presence:".to_string(),
            presence_window: Duration::from_secs(60),
            receive_timeout: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(2),
            listener_max_retries: 10,
            listener_initial_backoff: Duration::from_millis(100),
            listener_max_backoff: Duration::from_secs(30),
            jwt_secret: "your-secret-key-change-in-production".to_string(),
            token_expiration_days: 365,
        }
    }
}

impl ChatConfig {
    /// Reads configuration from process environment variables
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            redis_url: lookup("REDIS_URL").filter(|url| !url.is_empty()),
            events_channel: lookup("CHAT_EVENTS_CHANNEL").unwrap_or(defaults.events_channel),
            presence_key_prefix: lookup("CHAT_PRESENCE_PREFIX")
                .unwrap_or(defaults.presence_key_prefix),
            presence_window: parse_or(&lookup, "PRESENCE_WINDOW_SECS", 60)
                .map(Duration::from_secs)?,
            receive_timeout: parse_or(&lookup, "RECEIVE_TIMEOUT_MS", 1000)
                .map(Duration::from_millis)?,
            publish_timeout: parse_or(&lookup, "PUBLISH_TIMEOUT_MS", 2000)
                .map(Duration::from_millis)?,
            listener_max_retries: parse_or(&lookup, "LISTENER_MAX_RETRIES", 10)?,
            listener_initial_backoff: defaults.listener_initial_backoff,
            listener_max_backoff: defaults.listener_max_backoff,
            jwt_secret: lookup("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            token_expiration_days: parse_or(&lookup, "SESSION_EXPIRATION_DAYS", 365)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ChatError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ChatError::Config(format!("{key} has invalid value {raw:?}"))),
        None => Ok(default),
    }
}
