use crate::detector::{
    DEFAULT_DESTINATION_ADDRESS, DEFAULT_THRESHOLD, DetectorSettings, DetectorTiming,
};
use crate::error::ScheduleError;
use crate::schedule::{
    AdvisorSettings, DEFAULT_EPOCH_SANITY_THRESHOLD, DEFAULT_REPORT_WINDOW_MINUTES,
    DEFAULT_SCHEDULE, ModeSleepSeconds, ScheduleAdvisor, ScheduleEntry, ScheduleTable,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use time::UtcOffset;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_FALLBACK_SLEEP_SECS: u64 = 70;
pub const DEFAULT_FAST_CADENCE_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_FAST_CADENCE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_I2C_BUS: u8 = 1;
pub const DEFAULT_ACTIVITY_LED_PIN: u8 = 5;
pub const DEFAULT_PARKING_STATE_LED_PIN: u8 = 6;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub detector: Option<DetectorSection>,
    #[serde(default)]
    pub schedule: Option<ScheduleSection>,
    #[serde(default)]
    pub control: Option<ControlSection>,
    #[serde(default)]
    pub fast_cadence: Option<FastCadenceSection>,
    #[serde(default)]
    pub radio: Option<RadioSection>,
    #[serde(default)]
    pub hardware: Option<HardwareSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorSection {
    /// Deviation above which the space is occupied (default: 250)
    pub threshold: Option<u16>,
    /// Address carried in every report (default: 30007)
    pub destination_address: Option<u32>,
    pub indicator_flash_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleSection {
    /// Fixed offset from UTC used for the local hour (default: 0)
    pub utc_offset_hours: Option<i8>,
    pub epoch_sanity_threshold: Option<i64>,
    pub report_window_minutes: Option<u8>,
    #[serde(default)]
    pub entries: Vec<ScheduleEntry>,
    pub mode_sleep_secs: Option<ModeSleepSeconds>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ControlSection {
    /// Sleep after a detection cycle (default: 70)
    pub fallback_sleep_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FastCadenceSection {
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RadioSection {
    /// UDP concentrator `host:port`; reports are only logged when unset
    pub concentrator: Option<SocketAddr>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HardwareSection {
    pub i2c_bus: Option<u8>,
    pub magnetometer_address: Option<u8>,
    pub activity_led_pin: Option<u8>,
    pub parking_state_led_pin: Option<u8>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Status API port; the API is disabled when unset
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Checks every invariant the node relies on at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule_advisor()?;
        let fast = self.fast_cadence_interval();
        if fast.is_zero() {
            return Err(ConfigError::Invalid(
                "fast_cadence.interval_secs must be non-zero".to_string(),
            ));
        }
        if fast > self.fallback_sleep() {
            return Err(ConfigError::Invalid(format!(
                "fast_cadence.interval_secs ({}) exceeds control.fallback_sleep_secs ({})",
                fast.as_secs(),
                self.fallback_sleep().as_secs()
            )));
        }
        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        self.logging.level.parse().unwrap_or(tracing::Level::INFO)
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        let section = self.detector.as_ref();
        DetectorSettings {
            threshold: section
                .and_then(|d| d.threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
            destination_address: section
                .and_then(|d| d.destination_address)
                .unwrap_or(DEFAULT_DESTINATION_ADDRESS),
        }
    }

    pub fn detector_timing(&self) -> DetectorTiming {
        let defaults = DetectorTiming::default();
        match self.detector.as_ref().and_then(|d| d.indicator_flash_ms) {
            Some(ms) => DetectorTiming {
                indicator_flash: Duration::from_millis(ms),
                ..defaults
            },
            None => defaults,
        }
    }

    /// Builds the advisor, rejecting tables that do not cover the whole day.
    pub fn schedule_advisor(&self) -> Result<ScheduleAdvisor, ConfigError> {
        let section = self.schedule.as_ref();
        let entries = match section {
            Some(s) if !s.entries.is_empty() => s.entries.clone(),
            _ => DEFAULT_SCHEDULE.to_vec(),
        };
        let offset_hours = section.and_then(|s| s.utc_offset_hours).unwrap_or(0);
        let utc_offset = UtcOffset::from_hms(offset_hours, 0, 0).map_err(|err| {
            ConfigError::Invalid(format!("utc_offset_hours {offset_hours}: {err}"))
        })?;
        let settings = AdvisorSettings {
            utc_offset,
            epoch_sanity_threshold: section
                .and_then(|s| s.epoch_sanity_threshold)
                .unwrap_or(DEFAULT_EPOCH_SANITY_THRESHOLD),
            report_window_minutes: section
                .and_then(|s| s.report_window_minutes)
                .unwrap_or(DEFAULT_REPORT_WINDOW_MINUTES),
        };
        if !(1..=59).contains(&settings.report_window_minutes) {
            return Err(ConfigError::Invalid(format!(
                "schedule.report_window_minutes ({}) must be within 1-59",
                settings.report_window_minutes
            )));
        }
        let mode_secs = section
            .and_then(|s| s.mode_sleep_secs)
            .unwrap_or_default();

        let table = ScheduleTable::new(entries)?;
        Ok(ScheduleAdvisor::new(table, mode_secs, settings)?)
    }

    pub fn fallback_sleep(&self) -> Duration {
        let secs = self
            .control
            .as_ref()
            .and_then(|c| c.fallback_sleep_secs)
            .unwrap_or(DEFAULT_FALLBACK_SLEEP_SECS);
        Duration::from_secs(secs)
    }

    pub fn fast_cadence_interval(&self) -> Duration {
        let secs = self
            .fast_cadence
            .as_ref()
            .and_then(|f| f.interval_secs)
            .unwrap_or(DEFAULT_FAST_CADENCE_INTERVAL_SECS);
        Duration::from_secs(secs)
    }

    pub fn fast_cadence_timeout(&self) -> Duration {
        let secs = self
            .fast_cadence
            .as_ref()
            .and_then(|f| f.timeout_secs)
            .unwrap_or(DEFAULT_FAST_CADENCE_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    pub fn concentrator(&self) -> Option<SocketAddr> {
        self.radio.as_ref()?.concentrator
    }

    pub fn i2c_bus(&self) -> u8 {
        self.hardware
            .as_ref()
            .and_then(|h| h.i2c_bus)
            .unwrap_or(DEFAULT_I2C_BUS)
    }

    pub fn magnetometer_address(&self) -> Option<u8> {
        self.hardware.as_ref()?.magnetometer_address
    }

    pub fn indicator_pins(&self) -> (u8, u8) {
        let hardware = self.hardware.as_ref();
        (
            hardware
                .and_then(|h| h.activity_led_pin)
                .unwrap_or(DEFAULT_ACTIVITY_LED_PIN),
            hardware
                .and_then(|h| h.parking_state_led_pin)
                .unwrap_or(DEFAULT_PARKING_STATE_LED_PIN),
        )
    }

    pub fn server_port(&self) -> Option<u16> {
        self.server.as_ref()?.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::OperationMode;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_temp(name: &str, contents: &str) -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
        let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let path = std::env::temp_dir().join(format!("parking-node-{name}-{unique}.toml"));
        fs::write(&path, contents)?;
        Ok(path)
    }

    const MINIMAL: &str = r#"
[app]
name = "parking-node"

[logging]
level = "debug"
"#;

    #[test]
    fn default_config_is_valid() -> Result<(), Box<dyn std::error::Error>> {
        let config = load_default()?;
        assert_eq!(config.detector_settings().threshold, 250);
        Ok(())
    }

    #[test]
    fn minimal_config_uses_node_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp("minimal", MINIMAL)?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.detector_settings(), DetectorSettings::default());
        assert_eq!(config.fallback_sleep(), Duration::from_secs(70));
        assert_eq!(config.fast_cadence_interval(), Duration::from_secs(1));
        assert_eq!(config.fast_cadence_timeout(), Duration::from_secs(30));
        assert_eq!(config.concentrator(), None);
        assert_eq!(config.server_port(), None);
        assert_eq!(config.log_level(), tracing::Level::DEBUG);
        assert_eq!(config.schedule_advisor()?.table(), &ScheduleTable::default());
        Ok(())
    }

    #[test]
    fn custom_schedule_is_parsed() -> Result<(), Box<dyn std::error::Error>> {
        let contents = format!(
            "{}{}",
            MINIMAL,
            r#"
[schedule]
utc_offset_hours = -4
entries = [
    { start_hour = 0, mode = "sleep" },
    { start_hour = 8, mode = "semi_quiet" },
]

[schedule.mode_sleep_secs]
sleep = 0
busy = 4
semi_quiet = 12
quiet = 40
"#
        );
        let path = write_temp("schedule", &contents)?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        let advisor = config.schedule_advisor()?;
        assert_eq!(advisor.table().mode_at(9), Some(OperationMode::SemiQuiet));
        assert_eq!(advisor.table().mode_at(7), Some(OperationMode::Sleep));
        Ok(())
    }

    #[test]
    fn partial_mode_table_keeps_other_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let contents = format!(
            "{}{}",
            MINIMAL,
            r#"
[schedule.mode_sleep_secs]
busy = 4
"#
        );
        let path = write_temp("partial-modes", &contents)?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        // Monday 2024-01-01: 07:30 is busy, 18:30 is quiet.
        let monday = 1_704_067_200;
        let mut advisor = config.schedule_advisor()?;
        assert_eq!(advisor.compute(monday + 7 * 3600 + 1800).sleep_secs, 4);
        assert_eq!(advisor.compute(monday + 18 * 3600 + 1800).sleep_secs, 30);
        Ok(())
    }

    #[test]
    fn report_window_outside_the_hour_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        for minutes in [0, 60] {
            let contents = format!(
                "{}[schedule]\nreport_window_minutes = {minutes}\n",
                MINIMAL
            );
            let path = write_temp("report-window", &contents)?;

            let result = load_from_path(&path);
            let _ = fs::remove_file(&path);

            assert!(matches!(result, Err(ConfigError::Invalid(_))), "{minutes}");
        }
        Ok(())
    }

    #[test]
    fn uncovered_schedule_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let contents = format!(
            "{}{}",
            MINIMAL,
            r#"
[schedule]
entries = [{ start_hour = 6, mode = "busy" }]
"#
        );
        let path = write_temp("uncovered", &contents)?;

        let result = load_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(
            result,
            Err(ConfigError::Schedule(ScheduleError::FirstEntryNotMidnight(6)))
        ));
        Ok(())
    }

    #[test]
    fn fast_cadence_slower_than_fallback_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let contents = format!(
            "{}{}",
            MINIMAL,
            r#"
[control]
fallback_sleep_secs = 10

[fast_cadence]
interval_secs = 20
"#
        );
        let path = write_temp("cadence", &contents)?;

        let result = load_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn missing_config_file_returns_read_error() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("parking-node-missing-{unique}.toml"));

        let result = load_from_path(&path);

        assert!(matches!(result, Err(ConfigError::Read(_))));
    }

    #[test]
    fn invalid_toml_returns_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp("invalid", "not = [valid")?;

        let result = load_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        Ok(())
    }
}
