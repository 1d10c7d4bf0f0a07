use std::time::Duration;

use serde::Deserialize;

use crate::platform::environment::orm_defaults;
use crate::util::environment::is_browser;

pub const BROWSER_IDLE_TTL: Duration = Duration::from_millis(1_000);
pub const SERVER_IDLE_TTL: Duration = Duration::from_millis(60_000);
pub const DEFAULT_SAVE_DELAYS: [Duration; 2] =
    [Duration::from_millis(50), Duration::from_millis(1_000)];

/// Tuning for store lifetimes and debounced writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSettings {
    /// How long a store keeps its backend subscription after the last listener detaches.
    pub idle_ttl: Duration,
    /// Escalating debounce delays for optimistic writes. Never empty.
    pub save_delays: Vec<Duration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsOverrides {
    idle_ttl_ms: Option<u64>,
    save_delays_ms: Option<Vec<u64>>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        let idle_ttl = if is_browser() {
            BROWSER_IDLE_TTL
        } else {
            SERVER_IDLE_TTL
        };
        Self {
            idle_ttl,
            save_delays: DEFAULT_SAVE_DELAYS.to_vec(),
        }
    }
}

impl StoreSettings {
    /// Defaults overlaid with the `FIRESTORE_ORM_DEFAULTS` JSON object, when present.
    pub fn from_env() -> Self {
        let settings = Self::default();
        match orm_defaults() {
            Some(value) => settings.overlay(value),
            None => settings,
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Ignored when `delays` is empty.
    pub fn with_save_delays(mut self, delays: Vec<Duration>) -> Self {
        if !delays.is_empty() {
            self.save_delays = delays;
        }
        self
    }

    fn overlay(mut self, value: serde_json::Value) -> Self {
        let overrides: SettingsOverrides = serde_json::from_value(value).unwrap_or_default();
        if let Some(ms) = overrides.idle_ttl_ms {
            self.idle_ttl = Duration::from_millis(ms);
        }
        if let Some(delays) = overrides.save_delays_ms {
            self = self.with_save_delays(delays.into_iter().map(Duration::from_millis).collect());
        }
        self
    }
}
