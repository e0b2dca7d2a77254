use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Where and how to reach the chat server. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    connect_timeout: Duration,
    max_backoff: Duration,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ConfigError> {
        Self::with_timeouts(host, port, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_BACKOFF)
    }

    pub fn with_timeouts(
        host: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
        max_backoff: Duration,
    ) -> Result<Self, ConfigError> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if connect_timeout.is_zero() {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        // A zero ceiling would turn the reconnect loop into a busy spin.
        if max_backoff.is_zero() {
            return Err(ConfigError::ZeroMaxBackoff);
        }

        Ok(Self {
            host,
            port,
            connect_timeout,
            max_backoff,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// `host:port`, as used in log lines and error messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Rejects values that would break line framing when written to the wire.
pub(crate) fn single_line(field: &'static str, value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains(['\n', '\r']) {
        return Err(ConfigError::InvalidLine { field });
    }
    Ok(trimmed.to_string())
}
