use std::time::Duration;

use beach_commands_core::DEFAULT_SESSION_ID_LEN;
use thiserror::Error;

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
pub const MIN_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Age after which a continuation is answered with `session-expired`.
    /// The sweeper drops the entry at twice this age.
    pub session_timeout: Duration,
    pub sweep_interval: Duration,
    pub session_id_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            session_id_len: DEFAULT_SESSION_ID_LEN,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("session timeout {timeout:?} is below the minimum of {minimum:?}")]
    SessionTimeoutTooShort { timeout: Duration, minimum: Duration },
    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,
    #[error("session id length must be greater than zero")]
    ZeroSessionIdLength,
}

impl SessionConfig {
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_timeout < MIN_SESSION_TIMEOUT {
            return Err(ConfigError::SessionTimeoutTooShort {
                timeout: self.session_timeout,
                minimum: MIN_SESSION_TIMEOUT,
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if self.session_id_len == 0 {
            return Err(ConfigError::ZeroSessionIdLength);
        }
        Ok(())
    }

    /// Age past which the sweeper removes a session.
    pub fn sweep_after(&self) -> Duration {
        self.session_timeout.saturating_mul(2)
    }
}
