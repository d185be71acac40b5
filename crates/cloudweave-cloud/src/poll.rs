//! Poll cadence shared by every wait primitive
//!
//! A [`PollDeadline`] owns the clock of one wait: the optional grace delay,
//! the fixed interval between polls, the overall timeout and cancellation.
//! All polling loops in the engine are built on it.

use crate::error::{CloudError, Result};
use cloudweave_config::PollSettings;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Interval, timeout and grace delay of one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub initial_delay: Duration,
}

impl PollConfig {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            initial_delay: Duration::ZERO,
        }
    }

    pub const fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }
}

impl From<&PollSettings> for PollConfig {
    fn from(settings: &PollSettings) -> Self {
        Self {
            interval: settings.interval(),
            timeout: settings.timeout(),
            initial_delay: settings.initial_delay(),
        }
    }
}

impl From<PollSettings> for PollConfig {
    fn from(settings: PollSettings) -> Self {
        Self::from(&settings)
    }
}

/// Clock of a single wait
pub struct PollDeadline<'a> {
    started: Instant,
    config: PollConfig,
    cancel: &'a CancellationToken,
}

impl<'a> PollDeadline<'a> {
    /// Start the clock, sleeping through the grace delay first.
    ///
    /// The timeout budget starts after the grace delay.
    pub async fn begin(
        config: &PollConfig,
        cancel: &'a CancellationToken,
        what: &str,
    ) -> Result<Self> {
        if cancel.is_cancelled() {
            return Err(CloudError::Cancelled(what.to_string()));
        }
        if !config.initial_delay.is_zero() {
            tracing::debug!("{}: waiting {:?} before first poll", what, config.initial_delay);
            sleep_or_cancel(config.initial_delay, cancel, what).await?;
        }

        Ok(Self {
            started: Instant::now(),
            config: *config,
            cancel,
        })
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= self.config.timeout
    }

    /// Sleep one interval
    pub async fn pause(&self, what: &str) -> Result<()> {
        sleep_or_cancel(self.config.interval, self.cancel, what).await
    }

    pub fn timeout_error(&self, what: &str) -> CloudError {
        CloudError::Timeout(format!(
            "{} did not converge within {:?}",
            what, self.config.timeout
        ))
    }
}

pub(crate) async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
    what: &str,
) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(CloudError::Cancelled(what.to_string())),
    }
}
