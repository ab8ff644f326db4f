//! Configuration types for the signaling session

use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Path of the signaling endpoint on the server
pub const SIGNALING_PATH: &str = "/rtc";

/// Signaling protocol revision spoken by this client
pub const PROTOCOL_VERSION: u32 = 8;

/// Main configuration for a signaling session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Signaling server base URL (ws:// or wss://)
    pub server_url: String,

    /// Access token presented on every connect
    pub token: String,

    /// Room to join
    pub room: String,

    /// Local identity (informational, the token carries the authoritative one)
    pub identity: Option<String>,

    /// Ask the server to subscribe to remote tracks automatically (default: true)
    pub auto_subscribe: bool,

    /// Adaptive stream hint (default: true)
    pub adaptive_stream: bool,

    /// Client SDK description sent as query parameters
    pub sdk: SdkInfo,

    /// Time to wait for the join response, in milliseconds (default: 10000)
    pub join_timeout_ms: u64,

    /// Reconnection backoff policy
    pub reconnect: ReconnectPolicy,

    /// Keepalive interval override in milliseconds (0: use the server value)
    pub ping_interval_ms: u64,

    /// Keepalive timeout override in milliseconds (0: use the server value)
    pub ping_timeout_ms: u64,

    /// Capacity of the broadcast event channel (default: 256)
    pub event_channel_capacity: usize,
}

/// SDK identification sent to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkInfo {
    /// Signaling protocol revision
    pub protocol: u32,
    /// SDK name
    pub sdk: String,
    /// SDK version
    pub version: String,
}

impl Default for SdkInfo {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            sdk: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:7880".to_string(),
            token: String::new(),
            room: String::new(),
            identity: None,
            auto_subscribe: true,
            adaptive_stream: true,
            sdk: SdkInfo::default(),
            join_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
            ping_interval_ms: 0,
            ping_timeout_ms: 0,
            event_channel_capacity: 256,
        }
    }
}

impl SignalingConfig {
    /// Create a configuration for joining `room` on `server_url` with `token`
    pub fn new(server_url: &str, token: &str, room: &str) -> Self {
        Self {
            server_url: server_url.to_string(),
            token: token.to_string(),
            room: room.to_string(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `server_url` is not a valid WebSocket URL
    /// - `token` or `room` is empty
    /// - `join_timeout_ms` is zero
    /// - the reconnect policy is inconsistent
    pub fn validate(&self) -> Result<()> {
        if !self.server_url.starts_with("ws://") && !self.server_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "server_url must start with ws:// or wss://, got {}",
                self.server_url
            )));
        }

        Url::parse(&self.server_url)
            .map_err(|e| Error::InvalidConfig(format!("Invalid server_url: {}", e)))?;

        if self.token.is_empty() {
            return Err(Error::InvalidConfig("token must not be empty".to_string()));
        }

        if self.room.is_empty() {
            return Err(Error::InvalidConfig("room must not be empty".to_string()));
        }

        if self.join_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "join_timeout_ms must be greater than 0".to_string(),
            ));
        }

        self.reconnect.validate()
    }

    /// Join timeout as a Duration
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Build the signaling URL for a connection attempt
    ///
    /// `resume_sid` carries the local participant sid on reconnect attempts so
    /// the server can resume the participant instead of creating a new one.
    pub fn connect_url(&self, token: &str, resume_sid: Option<&str>) -> Result<Url> {
        let base = self.server_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{}{}", base, SIGNALING_PATH))
            .map_err(|e| Error::InvalidConfig(format!("Invalid server_url: {}", e)))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("access_token", token)
                .append_pair("auto_subscribe", flag(self.auto_subscribe))
                .append_pair("adaptive_stream", flag(self.adaptive_stream))
                .append_pair("protocol", &self.sdk.protocol.to_string())
                .append_pair("sdk", &self.sdk.sdk)
                .append_pair("version", &self.sdk.version);

            if let Some(sid) = resume_sid {
                query.append_pair("reconnect", "1").append_pair("sid", sid);
            }
        }

        Ok(url)
    }

    /// Set the local identity
    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = Some(identity.to_string());
        self
    }

    /// Replace the reconnect policy
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the join timeout
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the auto-subscribe flag
    pub fn with_auto_subscribe(mut self, auto_subscribe: bool) -> Self {
        self.auto_subscribe = auto_subscribe;
        self
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Backoff schedule for rejoining after the signal connection drops
///
/// Attempt `n` (0-based) waits `backoff_initial_ms * backoff_multiplier^n`,
/// capped at `backoff_max_ms`. With `jitter`, a random extra of up to a
/// quarter of that delay is added so that clients dropped together do not
/// rejoin in lockstep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Rejoin attempts before the session gives up; 0 disables reconnect
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub backoff_initial_ms: u64,
    /// Ceiling for any single delay
    pub backoff_max_ms: u64,
    /// Growth factor between attempts, at least 1.0
    pub backoff_multiplier: f64,
    /// Randomize delays
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Many quick attempts; suits clients on flaky mobile networks
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 8,
            backoff_initial_ms: 250,
            backoff_max_ms: 4_000,
            backoff_multiplier: 1.6,
            ..Self::default()
        }
    }

    /// Few, widely spaced attempts; keeps load off a recovering server
    pub fn conservative() -> Self {
        Self {
            max_attempts: 3,
            backoff_initial_ms: 3_000,
            backoff_max_ms: 60_000,
            backoff_multiplier: 3.0,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt` (0-based)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = (self.backoff_initial_ms as f64 * self.backoff_multiplier.powi(exponent))
            .min(self.backoff_max_ms as f64);

        let extra = if self.jitter && base > 0.0 {
            rand::thread_rng().gen_range(0.0..=base / 4.0)
        } else {
            0.0
        };
        Duration::from_millis((base + extra) as u64)
    }

    /// Whether attempt `attempt` (0-based) may run
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    fn validate(&self) -> Result<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }

        if self.backoff_initial_ms > self.backoff_max_ms {
            return Err(Error::InvalidConfig(format!(
                "backoff_initial_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_initial_ms, self.backoff_max_ms
            )));
        }

        Ok(())
    }
}
