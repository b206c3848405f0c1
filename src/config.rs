// Configuration File Support
//
// TOML configuration with environment variable overrides (RSVPD_*).
// Every section has serde defaults so a missing file or partial file is
// always usable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default attempt-guard thresholds for guest token validation
pub const DEFAULT_TOKEN_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_TOKEN_WINDOW_SECS: u64 = 15 * 60;
pub const DEFAULT_TOKEN_LOCKOUT_SECS: u64 = 30 * 60;

/// Default attempt-guard thresholds for admin login
pub const DEFAULT_ADMIN_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_ADMIN_WINDOW_SECS: u64 = 10 * 60;
pub const DEFAULT_ADMIN_LOCKOUT_SECS: u64 = 60 * 60;

/// Default send ceilings (normal operation)
pub const DEFAULT_SENDS_PER_MINUTE: u32 = 10;
pub const DEFAULT_SENDS_PER_HOUR: u32 = 200;
pub const DEFAULT_BURST_SIZE: u32 = 3;
pub const DEFAULT_BURST_COOLDOWN_SECS: u64 = 60;

/// Constrained (dev-mode) send ceilings
pub const CONSTRAINED_SENDS_PER_MINUTE: u32 = 2;
pub const CONSTRAINED_SENDS_PER_HOUR: u32 = 5;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Guest-token attempt guard
    pub token_guard: GuardSettings,

    /// Admin-login attempt guard
    pub admin_guard: GuardSettings,

    /// Outbound send rate limits
    pub limits: RateLimitSettings,

    /// Delivery engine tuning
    pub delivery: DeliverySettings,

    /// Admin credentials
    pub admin: AdminConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            token_guard: GuardSettings::token_defaults(),
            admin_guard: GuardSettings::admin_defaults(),
            limits: RateLimitSettings::default(),
            delivery: DeliverySettings::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply RSVPD_* environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("RSVPD_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("RSVPD_BIND") {
            self.server.bind = val;
        }
        if let Ok(val) = std::env::var("RSVPD_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("RSVPD_CONSTRAINED_MODE") {
            if val.parse().unwrap_or(false) {
                self.limits = RateLimitSettings::constrained();
            }
        }
        if let Ok(val) = std::env::var("RSVPD_SENDS_PER_MINUTE") {
            if let Ok(limit) = val.parse() {
                self.limits.sends_per_minute = limit;
            }
        }
        if let Ok(val) = std::env::var("RSVPD_SENDS_PER_HOUR") {
            if let Ok(limit) = val.parse() {
                self.limits.sends_per_hour = limit;
            }
        }
        if let Ok(val) = std::env::var("RSVPD_ADMIN_PASSWORD_SHA256") {
            self.admin.password_sha256 = val;
        }
        if let Ok(val) = std::env::var("RSVPD_PROVIDER_URL") {
            self.delivery.provider_url = Some(val);
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,

    /// Listen port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Attempt-guard thresholds
///
/// A sliding window of `window_secs` counts attempts per key; exceeding
/// `max_attempts` locks the key out for `lockout_secs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardSettings {
    pub max_attempts: u32,
    pub window_secs: u64,
    pub lockout_secs: u64,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self::token_defaults()
    }
}

impl GuardSettings {
    /// Defaults for guest-token validation attempts
    pub fn token_defaults() -> Self {
        Self {
            max_attempts: DEFAULT_TOKEN_MAX_ATTEMPTS,
            window_secs: DEFAULT_TOKEN_WINDOW_SECS,
            lockout_secs: DEFAULT_TOKEN_LOCKOUT_SECS,
        }
    }

    /// Defaults for admin login attempts (tighter)
    pub fn admin_defaults() -> Self {
        Self {
            max_attempts: DEFAULT_ADMIN_MAX_ATTEMPTS,
            window_secs: DEFAULT_ADMIN_WINDOW_SECS,
            lockout_secs: DEFAULT_ADMIN_LOCKOUT_SECS,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn lockout(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }
}

/// Outbound send ceilings
///
/// Three independent windows, all of which must pass before a send attempt
/// proceeds. The burst limiter smooths spikes that would still be legal
/// under the per-minute ceiling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    pub sends_per_minute: u32,
    pub sends_per_hour: u32,
    pub burst_size: u32,
    pub burst_cooldown_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            sends_per_minute: DEFAULT_SENDS_PER_MINUTE,
            sends_per_hour: DEFAULT_SENDS_PER_HOUR,
            burst_size: DEFAULT_BURST_SIZE,
            burst_cooldown_secs: DEFAULT_BURST_COOLDOWN_SECS,
        }
    }
}

impl RateLimitSettings {
    /// Constrained ceilings for dev environments and provider trials
    pub fn constrained() -> Self {
        Self {
            sends_per_minute: CONSTRAINED_SENDS_PER_MINUTE,
            sends_per_hour: CONSTRAINED_SENDS_PER_HOUR,
            ..Self::default()
        }
    }

    pub fn burst_cooldown(&self) -> Duration {
        Duration::from_secs(self.burst_cooldown_secs)
    }
}

/// Delivery engine tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliverySettings {
    /// Maximum attempts per notification before it is dropped as exhausted
    pub max_attempts: u32,

    /// Base retry backoff in milliseconds
    pub base_backoff_ms: u64,

    /// Backoff cap in milliseconds
    pub max_backoff_ms: u64,

    /// Pause after each successful send, milliseconds
    pub inter_send_delay_ms: u64,

    /// Per-call provider timeout, milliseconds
    pub provider_timeout_ms: u64,

    /// Queue capacity; enqueues beyond this are refused
    pub queue_capacity: usize,

    /// Background drain tick, milliseconds
    pub drain_tick_ms: u64,

    /// Delivery provider endpoint (None selects the log-only provider)
    pub provider_url: Option<String>,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 5 * 60 * 1_000,
            inter_send_delay_ms: 250,
            provider_timeout_ms: 5_000,
            queue_capacity: 512,
            drain_tick_ms: 3_000,
            provider_url: None,
        }
    }
}

impl DeliverySettings {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn inter_send_delay(&self) -> Duration {
        Duration::from_millis(self.inter_send_delay_ms)
    }

    pub fn drain_tick(&self) -> Duration {
        Duration::from_millis(self.drain_tick_ms)
    }
}

/// Admin credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Admin username
    pub username: String,

    /// Hex-encoded SHA-256 digest of the admin password
    pub password_sha256: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password_sha256: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.limits.sends_per_minute, DEFAULT_SENDS_PER_MINUTE);
        assert_eq!(config.token_guard.max_attempts, DEFAULT_TOKEN_MAX_ATTEMPTS);
        assert_eq!(config.admin_guard.max_attempts, DEFAULT_ADMIN_MAX_ATTEMPTS);
    }

    #[test]
    fn test_constrained_preset() {
        let limits = RateLimitSettings::constrained();
        assert_eq!(limits.sends_per_minute, CONSTRAINED_SENDS_PER_MINUTE);
        assert_eq!(limits.sends_per_hour, CONSTRAINED_SENDS_PER_HOUR);
        assert_eq!(limits.burst_size, DEFAULT_BURST_SIZE);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9999

            [limits]
            sends_per_minute = 4
            "#,
        )
        .unwrap();
        assert_eq!(parsed.server.port, 9999);
        assert_eq!(parsed.limits.sends_per_minute, 4);
        assert_eq!(parsed.limits.sends_per_hour, DEFAULT_SENDS_PER_HOUR);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 7070").unwrap();
        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 7070);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/rsvpd.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = AppConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&raw).unwrap();
        assert_eq!(config, parsed);
    }
}
