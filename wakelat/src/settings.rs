use config::{Config, ConfigError, Environment};
use serde::Deserialize;

const DEFAULT_READOUT_INTERVAL_SECS: u64 = 10;
const DEFAULT_MAX_RENDERED_TASKS: usize = 20;

/// Histogram readout configuration.
///
/// Engine constants (map capacities, noise threshold, bucket count)
/// are deliberately not configurable here; they are compile-time
/// constants in `wakelat-common`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Readout {
    pub interval_secs: Option<u64>,
    pub max_tasks: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub otel_exporter_otlp_endpoint: Option<String>,
    #[serde(default)]
    pub readout: Readout,
}

impl Settings {
    /// Load settings from the environment (`WAKELAT__*`, nested keys
    /// separated by `__`), with `.env` support.
    pub fn new() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let s = Config::builder()
            .add_source(
                Environment::with_prefix("WAKELAT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    pub fn readout_interval_secs(&self) -> u64 {
        self.readout
            .interval_secs
            .unwrap_or(DEFAULT_READOUT_INTERVAL_SECS)
    }

    pub fn max_rendered_tasks(&self) -> usize {
        self.readout.max_tasks.unwrap_or(DEFAULT_MAX_RENDERED_TASKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn loads_readout_from_env() {
        unsafe {
            std::env::set_var("WAKELAT__READOUT__INTERVAL_SECS", "5");
            std::env::set_var("WAKELAT__READOUT__MAX_TASKS", "3");
        }

        let settings = Settings::new().expect("Failed to load settings");

        assert_eq!(settings.readout.interval_secs, Some(5));
        assert_eq!(settings.readout.max_tasks, Some(3));
        assert_eq!(settings.readout_interval_secs(), 5);
        assert_eq!(settings.max_rendered_tasks(), 3);

        unsafe {
            std::env::remove_var("WAKELAT__READOUT__INTERVAL_SECS");
            std::env::remove_var("WAKELAT__READOUT__MAX_TASKS");
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_unset() {
        unsafe {
            std::env::remove_var("WAKELAT__READOUT__INTERVAL_SECS");
            std::env::remove_var("WAKELAT__READOUT__MAX_TASKS");
        }

        let settings = Settings::new().expect("Failed to load settings");

        assert_eq!(
            settings.readout_interval_secs(),
            DEFAULT_READOUT_INTERVAL_SECS
        );
        assert_eq!(settings.max_rendered_tasks(), DEFAULT_MAX_RENDERED_TASKS);
    }
}
