//! Session configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; everything here is tunable without code changes.

use signal_protocol::IceServerEntry;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default caption display time before auto-clear, in seconds.
pub const DEFAULT_CAPTION_CLEAR_SECONDS: u64 = 5;

/// Default caption language tag.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Default session actor mailbox size.
pub const DEFAULT_SESSION_MAILBOX: usize = 256;

/// Default router actor mailbox size.
pub const DEFAULT_ROUTER_MAILBOX: usize = 1024;

/// Default per-client event channel size.
pub const DEFAULT_EVENT_CHANNEL: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Session configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// STUN/TURN servers handed to every joining client.
    pub ice_servers: Vec<IceServerEntry>,

    /// How long a caption stays on screen before auto-clearing.
    pub caption_clear: Duration,

    /// Default language tag for caption submissions.
    pub default_language: String,

    /// Session actor mailbox size.
    pub session_mailbox: usize,

    /// Router actor mailbox size.
    pub router_mailbox: usize,

    /// Per-client signaling event channel size.
    pub event_channel: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerEntry::default_stun()],
            caption_clear: Duration::from_secs(DEFAULT_CAPTION_CLEAR_SECONDS),
            default_language: DEFAULT_LANGUAGE.to_string(),
            session_mailbox: DEFAULT_SESSION_MAILBOX,
            router_mailbox: DEFAULT_ROUTER_MAILBOX,
            event_channel: DEFAULT_EVENT_CHANNEL,
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from the given variable map.
    ///
    /// Recognized variables:
    /// - `ATRIUM_ICE_URLS` - comma-separated STUN/TURN URLs
    /// - `ATRIUM_CAPTION_CLEAR_SECONDS`
    /// - `ATRIUM_DEFAULT_LANGUAGE`
    /// - `ATRIUM_SESSION_MAILBOX`
    /// - `ATRIUM_ROUTER_MAILBOX`
    /// - `ATRIUM_EVENT_CHANNEL`
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but unparseable.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(urls) = vars.get("ATRIUM_ICE_URLS") {
            let servers: Vec<IceServerEntry> = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(|u| IceServerEntry {
                    urls: u.to_string(),
                    username: None,
                    credential: None,
                })
                .collect();
            if !servers.is_empty() {
                config.ice_servers = servers;
            }
        }

        if let Some(value) = vars.get("ATRIUM_CAPTION_CLEAR_SECONDS") {
            let seconds = parse_number(value, "ATRIUM_CAPTION_CLEAR_SECONDS")?;
            config.caption_clear = Duration::from_secs(seconds);
        }

        if let Some(value) = vars.get("ATRIUM_DEFAULT_LANGUAGE") {
            if value.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "ATRIUM_DEFAULT_LANGUAGE".to_string(),
                    value: value.clone(),
                });
            }
            config.default_language.clone_from(value);
        }

        if let Some(value) = vars.get("ATRIUM_SESSION_MAILBOX") {
            config.session_mailbox = parse_mailbox(value, "ATRIUM_SESSION_MAILBOX")?;
        }
        if let Some(value) = vars.get("ATRIUM_ROUTER_MAILBOX") {
            config.router_mailbox = parse_mailbox(value, "ATRIUM_ROUTER_MAILBOX")?;
        }
        if let Some(value) = vars.get("ATRIUM_EVENT_CHANNEL") {
            config.event_channel = parse_mailbox(value, "ATRIUM_EVENT_CHANNEL")?;
        }

        Ok(config)
    }
}

fn parse_number(value: &str, key: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_mailbox(value: &str, key: &str) -> Result<usize, ConfigError> {
    let parsed: usize = value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(parsed)
}
