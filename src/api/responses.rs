use crate::detector::{Occupancy, ReportOutcome};
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Ko,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InternalError,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct BaselineResponse {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct AdviceResponse {
    pub sleep_secs: u8,
    pub is_report_time: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DetectionResponse {
    pub outcome: ReportOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupancy: Option<Occupancy>,
    pub reports_sent: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FastCadenceResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<BaselineResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<AdviceResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionResponse>,
    pub fast_cadence: FastCadenceResponse,
    pub timestamp: String,
}
