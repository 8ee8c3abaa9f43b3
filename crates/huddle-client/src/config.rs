//! Client configuration loaded from environment variables.
//!
//! Every setting has a default that points at a local development server,
//! so the client starts with zero configuration.

use std::time::Duration;

use huddle_media::RtcConfig;
use huddle_net::{ConnectTarget, ConnectionConfig, ReconnectPolicy};
use huddle_shared::constants::{
    DEFAULT_STUN_SERVER, DIRECTORY_REFRESH_DEBOUNCE_MS, HISTORY_PAGE_SIZE, MAX_UPLOAD_SIZE,
    TYPING_TIMEOUT_MS,
};
use huddle_shared::TenantId;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Real-time channel endpoint.
    /// Env: `HUDDLE_SOCKET_URL`
    /// Default: `ws://127.0.0.1:5000/socket`
    pub socket_url: String,

    /// Base URL of the message store API.
    /// Env: `HUDDLE_API_URL`
    /// Default: `http://127.0.0.1:5000/api`
    pub api_url: String,

    /// Tenant this session belongs to, sent out-of-band on every request.
    /// Env: `HUDDLE_TENANT`
    /// Default: `default`
    pub tenant: TenantId,

    /// Bearer token issued by the identity service.
    /// Env: `HUDDLE_TOKEN`
    pub auth_token: Option<String>,

    /// Inactivity window after which typing indicators clear.
    /// Env: `HUDDLE_TYPING_TIMEOUT_MS`
    pub typing_timeout: Duration,

    /// Coalescing window for conversation list refreshes after inbound messages.
    pub directory_debounce: Duration,

    /// Messages per history page.
    /// Env: `HUDDLE_PAGE_SIZE`
    pub page_size: u32,

    /// Largest attachment accepted for upload, in bytes.
    pub max_upload_bytes: usize,

    /// Backoff between channel reconnects.
    /// Env: `HUDDLE_RECONNECT_MAX_MS` (cap)
    pub reconnect: ReconnectPolicy,

    /// STUN/TURN servers handed to peer connections.
    /// Env: `HUDDLE_ICE_SERVERS` (comma-separated)
    pub ice_servers: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_url: "ws://127.0.0.1:5000/socket".to_string(),
            api_url: "http://127.0.0.1:5000/api".to_string(),
            tenant: TenantId::new("default"),
            auth_token: None,
            typing_timeout: Duration::from_millis(TYPING_TIMEOUT_MS),
            directory_debounce: Duration::from_millis(DIRECTORY_REFRESH_DEBOUNCE_MS),
            page_size: HISTORY_PAGE_SIZE,
            max_upload_bytes: MAX_UPLOAD_SIZE,
            reconnect: ReconnectPolicy::default(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("HUDDLE_SOCKET_URL") {
            config.socket_url = url;
        }

        if let Some(url) = var("HUDDLE_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        if let Some(tenant) = var("HUDDLE_TENANT") {
            if tenant.trim().is_empty() {
                tracing::warn!("Empty HUDDLE_TENANT, using default");
            } else {
                config.tenant = TenantId::new(tenant.trim());
            }
        }

        if let Some(token) = var("HUDDLE_TOKEN") {
            if !token.is_empty() {
                config.auth_token = Some(token);
            }
        }

        if let Some(val) = var("HUDDLE_TYPING_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.typing_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid HUDDLE_TYPING_TIMEOUT_MS, using default"),
            }
        }

        if let Some(val) = var("HUDDLE_PAGE_SIZE") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.page_size = n,
                _ => tracing::warn!(value = %val, "Invalid HUDDLE_PAGE_SIZE, using default"),
            }
        }

        if let Some(val) = var("HUDDLE_RECONNECT_MAX_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms as u128 >= config.reconnect.initial_delay.as_millis() => {
                    config.reconnect.max_delay = Duration::from_millis(ms);
                }
                _ => tracing::warn!(value = %val, "Invalid HUDDLE_RECONNECT_MAX_MS, using default"),
            }
        }

        if let Some(val) = var("HUDDLE_ICE_SERVERS") {
            let servers: Vec<String> = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if servers.is_empty() {
                tracing::warn!("Empty HUDDLE_ICE_SERVERS, using default");
            } else {
                config.ice_servers = servers;
            }
        }

        config
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            target: ConnectTarget {
                url: self.socket_url.clone(),
                tenant: self.tenant.clone(),
                auth_token: self.auth_token.clone(),
            },
            reconnect: self.reconnect.clone(),
        }
    }

    pub fn rtc(&self) -> RtcConfig {
        RtcConfig {
            ice_servers: self.ice_servers.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.typing_timeout, Duration::from_secs(2));
        assert_eq!(config.page_size, 20);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.tenant.as_str(), "default");
        assert_eq!(config.rtc(), RtcConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("HUDDLE_TENANT", "acme"),
            ("HUDDLE_API_URL", "https://hr.example.com/api/"),
            ("HUDDLE_TOKEN", "secret"),
            ("HUDDLE_PAGE_SIZE", "50"),
            ("HUDDLE_ICE_SERVERS", "stun:a:3478, turn:b:3478"),
        ]));
        assert_eq!(config.tenant, TenantId::new("acme"));
        assert_eq!(config.api_url, "https://hr.example.com/api");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.page_size, 50);
        assert_eq!(config.ice_servers, vec!["stun:a:3478", "turn:b:3478"]);

        let target = config.connection().target;
        assert_eq!(target.tenant, TenantId::new("acme"));
        assert_eq!(target.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("HUDDLE_PAGE_SIZE", "0"),
            ("HUDDLE_TYPING_TIMEOUT_MS", "soon"),
            ("HUDDLE_RECONNECT_MAX_MS", "10"),
            ("HUDDLE_ICE_SERVERS", " , "),
        ]));
        let defaults = ClientConfig::default();
        assert_eq!(config.page_size, defaults.page_size);
        assert_eq!(config.typing_timeout, defaults.typing_timeout);
        assert_eq!(config.reconnect.max_delay, defaults.reconnect.max_delay);
        assert_eq!(config.ice_servers, defaults.ice_servers);
    }
}
