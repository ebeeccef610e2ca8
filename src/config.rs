//! Session configuration.

use std::time::Duration;

use crate::error::ConfigError;
use crate::state::board::{ShipKind, DEFAULT_GRID_SIZE, MAX_GRID_SIZE, STANDARD_FLEET};

/// Default capacity of the notice channel.
pub const DEFAULT_NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Default time allowed for a graceful exit before the actor is aborted.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for a match session.
///
/// # Example
///
/// ```
/// use seabattle_state::config::SessionConfig;
/// use seabattle_state::state::board::ShipKind;
///
/// let config = SessionConfig::default()
///     .with_grid_size(8)
///     .with_fleet(vec![ShipKind::Cruiser, ShipKind::Destroyer]);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Width and height of each board.
    pub grid_size: usize,
    /// Ships every player must place before committing.
    pub fleet: Vec<ShipKind>,
    /// Capacity of the bounded notice channel. Values below 1 are clamped.
    ///
    /// When the presentation layer falls behind, notices other than the
    /// abort notice are dropped with a warning.
    pub notice_channel_capacity: usize,
    /// How long `exit` waits for the actor to publish `leave` and release the
    /// transport before aborting it.
    pub shutdown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            fleet: STANDARD_FLEET.to_vec(),
            notice_channel_capacity: DEFAULT_NOTICE_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_grid_size(mut self, grid_size: usize) -> Self {
        self.grid_size = grid_size;
        self
    }

    #[must_use]
    pub fn with_fleet(mut self, fleet: Vec<ShipKind>) -> Self {
        self.fleet = fleet;
        self
    }

    #[must_use]
    pub fn with_notice_channel_capacity(mut self, capacity: usize) -> Self {
        self.notice_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Check the fleet fits the grid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_size == 0 || self.grid_size > MAX_GRID_SIZE {
            return Err(ConfigError::GridSize {
                size: self.grid_size,
                max: MAX_GRID_SIZE,
            });
        }
        if self.fleet.is_empty() {
            return Err(ConfigError::EmptyFleet);
        }
        if let Some(kind) = self.fleet.iter().find(|k| k.length() > self.grid_size) {
            return Err(ConfigError::ShipTooLong {
                kind: kind.as_str(),
                length: kind.length(),
                size: self.grid_size,
            });
        }
        Ok(())
    }
}
