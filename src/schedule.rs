//! Time-of-day duty cycle.
//!
//! The advisor maps wall-clock time to a recommended sleep between samples.
//! A sleep of zero means "run a detection cycle now".

use crate::error::ScheduleError;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset, Weekday};
use tracing::debug;

/// Timestamps below this are treated as an unsynchronized clock.
pub const DEFAULT_EPOCH_SANITY_THRESHOLD: i64 = 799_000_000;
pub const DEFAULT_REPORT_WINDOW_MINUTES: u8 = 3;

pub const UNSYNCHRONIZED_SLEEP_SECS: u8 = 60;
pub const REPORT_WINDOW_SLEEP_SECS: u8 = 90;
pub const WEEKEND_SLEEP_SECS: u8 = 0;
pub const NO_MATCH_SLEEP_SECS: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    Sleep,
    Busy,
    SemiQuiet,
    Quiet,
}

/// Sleep seconds per operation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSleepSeconds {
    pub sleep: u8,
    pub busy: u8,
    pub semi_quiet: u8,
    pub quiet: u8,
}

impl ModeSleepSeconds {
    pub fn for_mode(&self, mode: OperationMode) -> u8 {
        match mode {
            OperationMode::Sleep => self.sleep,
            OperationMode::Busy => self.busy,
            OperationMode::SemiQuiet => self.semi_quiet,
            OperationMode::Quiet => self.quiet,
        }
    }
}

impl Default for ModeSleepSeconds {
    fn default() -> Self {
        Self {
            sleep: 0,
            busy: 5,
            semi_quiet: 15,
            quiet: 30,
        }
    }
}

/// Mode active from `start_hour` until the next entry's start hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub start_hour: u8,
    pub mode: OperationMode,
}

impl ScheduleEntry {
    pub const fn new(start_hour: u8, mode: OperationMode) -> Self {
        Self { start_hour, mode }
    }
}

pub const DEFAULT_SCHEDULE: [ScheduleEntry; 5] = [
    ScheduleEntry::new(0, OperationMode::Sleep),
    ScheduleEntry::new(6, OperationMode::Busy),
    ScheduleEntry::new(10, OperationMode::SemiQuiet),
    ScheduleEntry::new(17, OperationMode::Quiet),
    ScheduleEntry::new(21, OperationMode::Sleep),
];

/// Sorted table whose first entry starts at midnight, so every hour 0-23 has
/// exactly one active mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleTable {
    entries: Vec<ScheduleEntry>,
}

impl ScheduleTable {
    pub fn new(entries: Vec<ScheduleEntry>) -> Result<Self, ScheduleError> {
        let first = entries.first().ok_or(ScheduleError::Empty)?;
        if first.start_hour != 0 {
            return Err(ScheduleError::FirstEntryNotMidnight(first.start_hour));
        }
        for entry in &entries {
            if entry.start_hour > 23 {
                return Err(ScheduleError::HourOutOfRange(entry.start_hour));
            }
        }
        for pair in entries.windows(2) {
            if pair[1].start_hour <= pair[0].start_hour {
                return Err(ScheduleError::NotAscending {
                    previous: pair[0].start_hour,
                    next: pair[1].start_hour,
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Scan from the latest start hour down; the first entry at or before
    /// `hour` wins.
    pub fn mode_at(&self, hour: u8) -> Option<OperationMode> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.start_hour <= hour)
            .map(|entry| entry.mode)
    }
}

impl Default for ScheduleTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_SCHEDULE.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Advice {
    pub sleep_secs: u8,
    pub is_report_time: bool,
}

impl Advice {
    const fn sleep(sleep_secs: u8) -> Self {
        Self {
            sleep_secs,
            is_report_time: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvisorSettings {
    pub utc_offset: UtcOffset,
    pub epoch_sanity_threshold: i64,
    pub report_window_minutes: u8,
}

impl Default for AdvisorSettings {
    fn default() -> Self {
        Self {
            utc_offset: UtcOffset::UTC,
            epoch_sanity_threshold: DEFAULT_EPOCH_SANITY_THRESHOLD,
            report_window_minutes: DEFAULT_REPORT_WINDOW_MINUTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleAdvisor {
    table: ScheduleTable,
    mode_secs: ModeSleepSeconds,
    settings: AdvisorSettings,
    report_time: bool,
}

impl ScheduleAdvisor {
    pub fn new(
        table: ScheduleTable,
        mode_secs: ModeSleepSeconds,
        settings: AdvisorSettings,
    ) -> Result<Self, ScheduleError> {
        // Zero doubles as "sample now" in the control loop.
        if mode_secs.sleep != 0 {
            return Err(ScheduleError::SleepModeNotZero(mode_secs.sleep));
        }
        Ok(Self {
            table,
            mode_secs,
            settings,
            report_time: false,
        })
    }

    pub fn table(&self) -> &ScheduleTable {
        &self.table
    }

    /// Report-window flag from the most recent `compute`.
    pub fn is_report_time(&self) -> bool {
        self.report_time
    }

    pub fn compute(&mut self, now: i64) -> Advice {
        let advice = self.advise(now);
        self.report_time = advice.is_report_time;
        debug!(
            now,
            sleep_secs = advice.sleep_secs,
            report_time = advice.is_report_time,
            "Schedule advice"
        );
        advice
    }

    fn advise(&self, now: i64) -> Advice {
        if now < self.settings.epoch_sanity_threshold {
            return Advice::sleep(UNSYNCHRONIZED_SLEEP_SECS);
        }
        let Some(local) = OffsetDateTime::from_unix_timestamp(now)
            .ok()
            .and_then(|utc| utc.checked_to_offset(self.settings.utc_offset))
        else {
            return Advice::sleep(NO_MATCH_SLEEP_SECS);
        };

        if local.minute() < self.settings.report_window_minutes {
            return Advice {
                sleep_secs: REPORT_WINDOW_SLEEP_SECS,
                is_report_time: true,
            };
        }
        if matches!(local.weekday(), Weekday::Saturday | Weekday::Sunday) {
            return Advice::sleep(WEEKEND_SLEEP_SECS);
        }
        match self.table.mode_at(local.hour()) {
            Some(mode) => Advice::sleep(self.mode_secs.for_mode(mode)),
            None => Advice::sleep(NO_MATCH_SLEEP_SECS),
        }
    }
}

impl Default for ScheduleAdvisor {
    fn default() -> Self {
        Self {
            table: ScheduleTable::default(),
            mode_secs: ModeSleepSeconds::default(),
            settings: AdvisorSettings::default(),
            report_time: false,
        }
    }
}
