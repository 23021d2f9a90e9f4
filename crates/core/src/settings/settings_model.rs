//! Runtime-adjustable refresh settings.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::constants::{DEFAULT_PERSIST_BATCH_SIZE, DEFAULT_REFRESH_INTERVAL_SECS};
use crate::errors::{Error, Result};

/// How often quotes are polled and how often the cache is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSettings {
    pub interval_secs: u64,
    /// Successful refreshes between snapshot writes during an open session
    pub persist_batch_size: u32,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            persist_batch_size: DEFAULT_PERSIST_BATCH_SIZE,
        }
    }
}

impl RefreshSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::InvalidConfigValue(
                "interval_secs must be at least 1".to_string(),
            ));
        }
        if self.persist_batch_size == 0 {
            return Err(Error::InvalidConfigValue(
                "persist_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared, observable refresh settings.
///
/// The scheduler reads the current value before every sleep, so an update
/// takes effect on the next cycle without restarting the loop.
#[derive(Clone)]
pub struct RefreshSettingsHandle {
    sender: Arc<watch::Sender<RefreshSettings>>,
}

impl Default for RefreshSettingsHandle {
    fn default() -> Self {
        Self::new(RefreshSettings::default())
    }
}

impl RefreshSettingsHandle {
    pub fn new(initial: RefreshSettings) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> RefreshSettings {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshSettings> {
        self.sender.subscribe()
    }

    /// Validates and publishes new settings.
    pub fn update(&self, settings: RefreshSettings) -> Result<()> {
        settings.validate()?;
        self.sender.send_replace(settings);
        Ok(())
    }
}
