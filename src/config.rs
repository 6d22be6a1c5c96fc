//! Supervisor timing and link settings.
//!
//! Every fixed wait the supervisor performs lives here so it can be tuned
//! (and shortened in tests) without touching the lifecycle code. An optional
//! JSON file overrides individual keys; absent keys keep their defaults.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::error::ConfigError;

pub const DEFAULT_APP_NAME: &str = "SimConnectSupervisor";

/// Required-data poll period.
pub const DEFAULT_REQUIRED_INTERVAL_MS: u64 = 500;
/// HUD-data poll period.
pub const DEFAULT_HUD_INTERVAL_MS: u64 = 200;
/// Wait between closing a session and opening the next one.
pub const DEFAULT_DRAIN_DELAY_MS: u64 = 2000;
/// Extra margin on top of one required period before reading fresh telemetry.
pub const TELEMETRY_REFRESH_MARGIN_MS: u64 = 500;
pub const DEFAULT_ACTUATION_SETTLE_MS: u64 = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Client name announced to the simulator.
    pub app_name: String,
    pub required_interval: Duration,
    pub hud_interval: Duration,
    pub drain_delay: Duration,
    /// Never shorter than `hud_interval`.
    pub hud_settle_delay: Duration,
    pub telemetry_refresh_wait: Duration,
    pub actuation_settle_delay: Duration,
    /// Tried in order when loading the SimConnect library.
    pub library_paths: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            required_interval: Duration::from_millis(DEFAULT_REQUIRED_INTERVAL_MS),
            hud_interval: Duration::from_millis(DEFAULT_HUD_INTERVAL_MS),
            drain_delay: Duration::from_millis(DEFAULT_DRAIN_DELAY_MS),
            hud_settle_delay: Duration::from_millis(DEFAULT_HUD_INTERVAL_MS),
            telemetry_refresh_wait: Duration::from_millis(
                DEFAULT_REQUIRED_INTERVAL_MS + TELEMETRY_REFRESH_MARGIN_MS,
            ),
            actuation_settle_delay: Duration::from_millis(DEFAULT_ACTUATION_SETTLE_MS),
            library_paths: vec![
                "SimConnect.dll".to_string(),
                r"C:\Windows\System32\SimConnect.dll".to_string(),
            ],
        }
    }
}

impl SupervisorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path)?;
        Self::from_json_str(&body)
    }

    pub fn from_json_str(body: &str) -> Result<Self, ConfigError> {
        let v: Value = serde_json::from_str(body)?;
        let mut cfg = Self::default();

        if let Some(name) = v.get("app_name") {
            cfg.app_name = name
                .as_str()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| invalid("app_name", "expected a non-empty string"))?
                .to_string();
        }

        read_millis(&v, "required_interval_ms", &mut cfg.required_interval)?;
        read_millis(&v, "hud_interval_ms", &mut cfg.hud_interval)?;
        read_millis(&v, "drain_delay_ms", &mut cfg.drain_delay)?;
        read_millis(&v, "hud_settle_delay_ms", &mut cfg.hud_settle_delay)?;
        read_millis(&v, "actuation_settle_delay_ms", &mut cfg.actuation_settle_delay)?;

        // Refresh wait follows the required period unless set explicitly.
        cfg.telemetry_refresh_wait =
            cfg.required_interval + Duration::from_millis(TELEMETRY_REFRESH_MARGIN_MS);
        read_millis(&v, "telemetry_refresh_wait_ms", &mut cfg.telemetry_refresh_wait)?;

        if let Some(paths) = v.get("library_paths") {
            let arr = paths
                .as_array()
                .ok_or_else(|| invalid("library_paths", "expected an array of strings"))?;
            cfg.library_paths = arr
                .iter()
                .map(|p| {
                    p.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid("library_paths", "expected an array of strings"))
                })
                .collect::<Result<_, _>>()?;
        }

        Ok(cfg.normalized())
    }

    /// Applies the invariants between fields.
    pub fn normalized(mut self) -> Self {
        if self.hud_settle_delay < self.hud_interval {
            self.hud_settle_delay = self.hud_interval;
        }
        self
    }
}

fn read_millis(v: &Value, key: &'static str, slot: &mut Duration) -> Result<(), ConfigError> {
    match v.get(key) {
        None => Ok(()),
        Some(x) => {
            let ms = x
                .as_u64()
                .ok_or_else(|| invalid(key, "expected milliseconds as a non-negative integer"))?;
            if ms == 0 && (key == "required_interval_ms" || key == "hud_interval_ms") {
                return Err(invalid(key, "poll interval must be positive"));
            }
            *slot = Duration::from_millis(ms);
            Ok(())
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field,
        reason: reason.to_string(),
    }
}
