//! Daemon settings, loadable from a TOML file and overridable from the CLI.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::activity::IdlePolicy;
use crate::broadcast::DEFAULT_VIEWER_BACKLOG;
use crate::ring::DEFAULT_REPLAY_CAPACITY;
use crate::session::SessionRegistry;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the HTTP/WebSocket control plane binds to.
    pub bind: SocketAddr,
    /// Inactivity period before the daemon stops itself. Zero or negative
    /// disables idle shutdown.
    pub idle_timeout_seconds: i64,
    /// Delay between repeated stop attempts. Must be positive.
    pub stop_retry_seconds: u64,
    /// Stop attempts before the daemon terminates forcefully.
    pub max_stop_attempts: u32,
    /// Replay buffer capacity in bytes, uniform across sessions.
    pub replay_capacity: usize,
    /// Per-viewer undelivered chunk bound before eviction.
    pub viewer_backlog: usize,
    /// How long a terminated session stays attachable before removal.
    pub grace_seconds: u64,
    /// Session admission limit.
    pub max_sessions: usize,
    /// Execution provider name, resolved through the provider registry.
    pub provider: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:4444".parse().expect("valid default bind"),
            idle_timeout_seconds: 30 * 60,
            stop_retry_seconds: 10,
            max_stop_attempts: 3,
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            viewer_backlog: DEFAULT_VIEWER_BACKLOG,
            grace_seconds: 5,
            max_sessions: SessionRegistry::DEFAULT_MAX_SESSIONS,
            provider: "local".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    ReadFailed(std::path::PathBuf, #[source] std::io::Error),
    #[error("failed to parse config {0}: {1}")]
    ParseFailed(std::path::PathBuf, #[source] toml::de::Error),
    #[error("stop-retry-seconds must be greater than 0")]
    InvalidStopRetry,
    #[error("replay-capacity must be greater than 0")]
    InvalidReplayCapacity,
    #[error("viewer-backlog must be greater than 0")]
    InvalidViewerBacklog,
}

impl Settings {
    /// Load settings from a TOML file. Returns defaults if the file does
    /// not exist.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        check_config_permissions(path);
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let settings: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stop_retry_seconds == 0 {
            return Err(ConfigError::InvalidStopRetry);
        }
        if self.replay_capacity == 0 {
            return Err(ConfigError::InvalidReplayCapacity);
        }
        if self.viewer_backlog == 0 {
            return Err(ConfigError::InvalidViewerBacklog);
        }
        Ok(())
    }

    pub fn idle_policy(&self) -> IdlePolicy {
        IdlePolicy {
            idle_timeout: if self.idle_timeout_seconds > 0 {
                Some(Duration::from_secs(self.idle_timeout_seconds as u64))
            } else {
                None
            },
            stop_retry_period: Duration::from_secs(self.stop_retry_seconds),
            max_stop_attempts: self.max_stop_attempts,
        }
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_seconds)
    }

    /// Log the effective configuration at startup.
    pub fn report(&self) {
        tracing::info!(bind = %self.bind, provider = %self.provider, "exec daemon configuration");
        if self.idle_timeout_seconds > 0 {
            tracing::info!(
                idle_timeout_s = self.idle_timeout_seconds,
                stop_retry_s = self.stop_retry_seconds,
                max_stop_attempts = self.max_stop_attempts,
                "idle shutdown enabled"
            );
        } else {
            tracing::info!("idle shutdown disabled");
        }
        tracing::info!(
            replay_capacity = self.replay_capacity,
            viewer_backlog = self.viewer_backlog,
            grace_s = self.grace_seconds,
            max_sessions = self.max_sessions,
            "session policy"
        );
    }
}

/// Warn if the settings file is world-readable: deployments sometimes put
/// bearer tokens in it.
#[cfg(unix)]
fn check_config_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };
    let mode = metadata.permissions().mode();
    if mode & 0o004 != 0 {
        tracing::warn!(
            "config file {} is world-readable (mode {:o}); consider 600",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
fn check_config_permissions(_path: &std::path::Path) {}
