use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorFault {
    #[error("sensor bus unavailable: {0}")]
    BusUnavailable(String),
    #[error("magnetometer read fault: {0}")]
    Read(String),
    #[error("magnetometer control fault: {0}")]
    Control(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransmitFault {
    #[error("radio link unavailable: {0}")]
    Link(String),
    #[error("failed to encode report: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("schedule table is empty")]
    Empty,
    #[error("schedule table must start at hour 0, found {0}")]
    FirstEntryNotMidnight(u8),
    #[error("schedule start hour {0} is outside 0-23")]
    HourOutOfRange(u8),
    #[error("schedule start hours must be strictly ascending ({previous} then {next})")]
    NotAscending { previous: u8, next: u8 },
    #[error("sleep mode must map to 0 seconds, found {0}")]
    SleepModeNotZero(u8),
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("detector sampled before calibration")]
    NotCalibrated,
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(#[from] SensorFault),
    #[error("a sample is already in progress")]
    SampleInProgress,
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("watch channel send failed")]
    WatchSend,
    #[error("state lock poisoned")]
    StateLock,
}
