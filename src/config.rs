use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::engine::schedule::parse_timezone;
use crate::engine::EngineOptions;
use crate::model::CompanySettings;

/// Process configuration, read from `SLOTWISE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub feed_timeout: Duration,
    pub reaper_interval: Duration,
    /// Settings of a company that never wrote its own.
    pub defaults: CompanySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            feed_timeout: Duration::from_millis(2000),
            reaper_interval: Duration::from_secs(30),
            defaults: CompanySettings::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let timezone = match lookup("SLOTWISE_DEFAULT_TIMEZONE") {
            Some(tz) if parse_timezone(&tz).is_some() => tz,
            Some(tz) => {
                warn!("SLOTWISE_DEFAULT_TIMEZONE={tz:?} is not an IANA timezone, using {}", d.defaults.timezone);
                d.defaults.timezone
            }
            None => d.defaults.timezone,
        };
        Self {
            bind: lookup("SLOTWISE_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "SLOTWISE_PORT").unwrap_or(d.port),
            data_dir: lookup("SLOTWISE_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            metrics_port: parsed(&lookup, "SLOTWISE_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "SLOTWISE_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            feed_timeout: parsed(&lookup, "SLOTWISE_FEED_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.feed_timeout),
            reaper_interval: parsed(&lookup, "SLOTWISE_REAPER_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.reaper_interval),
            defaults: CompanySettings {
                timezone,
                slot_step_minutes: parsed(&lookup, "SLOTWISE_DEFAULT_SLOT_STEP_MINUTES")
                    .filter(|m| *m > 0)
                    .unwrap_or(d.defaults.slot_step_minutes),
            },
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            feed_timeout: self.feed_timeout,
            defaults: self.defaults.clone(),
            ..EngineOptions::default()
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring unparseable {key}={raw:?}");
            None
        }
    }
}
