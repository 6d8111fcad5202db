//! Fixed-interval polling with an optional deadline.
//!
//! The cluster platform is eventually consistent: service tasks move through
//! their state machine at their own pace and the only way to observe progress
//! is to re-fetch. Every busy-wait in this crate goes through [`Poller`] so
//! the interval and deadline are configured in one place.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Result, SwarmError};

/// Interval and optional deadline for one polling phase.
///
/// The default carries no deadline: a stuck deployment is waited on forever
/// unless the caller configures one.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub deadline: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            deadline: None,
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// One polling phase. Call [`Poller::tick`] between probes; it sleeps for the
/// interval and fails once the deadline has passed.
pub struct Poller {
    interval: Duration,
    deadline: Option<Duration>,
    started: Instant,
    what: String,
}

impl Poller {
    pub fn new(config: &PollConfig, what: impl Into<String>) -> Self {
        Self {
            interval: config.interval,
            deadline: config.deadline,
            started: Instant::now(),
            what: what.into(),
        }
    }

    /// Sleep for one interval, or fail with [`SwarmError::DeadlineExceeded`]
    /// if the phase has run past its deadline.
    pub async fn tick(&mut self) -> Result<()> {
        if let Some(deadline) = self.deadline {
            if self.started.elapsed() >= deadline {
                return Err(SwarmError::DeadlineExceeded(self.what.clone()));
            }
        }
        tokio::time::sleep(self.interval).await;
        Ok(())
    }
}
