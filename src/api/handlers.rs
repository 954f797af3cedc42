use crate::api::ApiState;
use crate::api::responses::{
    AdviceResponse, BaselineResponse, DetectionResponse, ErrorCode, ErrorResponse,
    FastCadenceResponse, HealthStatus, HealthSuccessResponse, StatusResponse,
};
use crate::detector::ReportOutcome;
use crate::state::NodeState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;
use std::time::{Instant, SystemTime};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::error;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

pub enum ApiResponse<T> {
    Success { status: StatusCode, body: T },
    Error { status: StatusCode, body: ErrorResponse },
}

impl<T: serde::Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success { status, body } => (status, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_health(State(state): State<ApiState>) -> impl IntoResponse {
    build_health_response(&state, SystemTime::now())
}

pub async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    build_status_response(&state, SystemTime::now(), Instant::now())
}

pub async fn request_fast_cadence(State(state): State<ApiState>) -> impl IntoResponse {
    build_fast_cadence_request(&state, Instant::now())
}

pub async fn cancel_fast_cadence(State(state): State<ApiState>) -> impl IntoResponse {
    build_fast_cadence_cancel(&state)
}

fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

fn internal_error<T>(route: &str, reason: &str) -> ApiResponse<T> {
    error!(route, reason, "Internal error while handling request");
    let formatted = format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format internal error timestamp");
        "1970-01-01T00:00:00Z".to_string()
    });
    ApiResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            error_code: ErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: formatted,
        },
    }
}

fn derive_health_status(node: &NodeState) -> HealthStatus {
    if node.baseline().is_none() {
        return HealthStatus::Ko;
    }
    match node.detection().map(|record| record.snapshot.outcome) {
        Some(ReportOutcome::SensorUnavailable) => HealthStatus::Degraded,
        _ => HealthStatus::Ok,
    }
}

fn build_health_response(state: &ApiState, now: SystemTime) -> ApiResponse<HealthSuccessResponse> {
    let status = match state.node.read() {
        Ok(guard) => derive_health_status(&guard),
        Err(_) => return internal_error("/api/health", "state lock poisoned"),
    };
    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/health", "timestamp formatting failure"),
    };
    let status_code = match status {
        HealthStatus::Ko => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
    };

    ApiResponse::Success {
        status: status_code,
        body: HealthSuccessResponse { status, timestamp },
    }
}

fn fast_cadence_view(state: &ApiState, now: Instant) -> Option<FastCadenceResponse> {
    let remaining = state.fast_cadence.remaining(now).ok()?;
    Some(FastCadenceResponse {
        active: remaining.is_some(),
        remaining_secs: remaining.map(|left| left.as_secs()),
    })
}

fn build_status_response(
    state: &ApiState,
    now: SystemTime,
    monotonic_now: Instant,
) -> ApiResponse<StatusResponse> {
    let guard = match state.node.read() {
        Ok(guard) => guard,
        Err(_) => return internal_error("/api/status", "state lock poisoned"),
    };
    let baseline = guard.baseline();
    let advice = guard.advice().copied();
    let detection = guard.detection().copied();
    drop(guard);

    let advice = match advice {
        Some(record) => match format_timestamp(record.timestamp) {
            Ok(timestamp) => Some(AdviceResponse {
                sleep_secs: record.advice.sleep_secs,
                is_report_time: record.advice.is_report_time,
                timestamp,
            }),
            Err(_) => return internal_error("/api/status", "timestamp formatting failure"),
        },
        None => None,
    };
    let detection = match detection {
        Some(record) => match format_timestamp(record.timestamp) {
            Ok(timestamp) => Some(DetectionResponse {
                outcome: record.snapshot.outcome,
                deviation: record.snapshot.deviation,
                occupancy: record.snapshot.occupancy,
                reports_sent: record.snapshot.reports_sent,
                timestamp,
            }),
            Err(_) => return internal_error("/api/status", "timestamp formatting failure"),
        },
        None => None,
    };
    let Some(fast_cadence) = fast_cadence_view(state, monotonic_now) else {
        return internal_error("/api/status", "fast cadence lock poisoned");
    };
    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/status", "timestamp formatting failure"),
    };

    ApiResponse::Success {
        status: StatusCode::OK,
        body: StatusResponse {
            baseline: baseline.map(|b| BaselineResponse {
                x: b.x,
                y: b.y,
                z: b.z,
            }),
            advice,
            detection,
            fast_cadence,
            timestamp,
        },
    }
}

fn build_fast_cadence_request(state: &ApiState, now: Instant) -> ApiResponse<FastCadenceResponse> {
    match state.fast_cadence.request(now) {
        Ok(until) => ApiResponse::Success {
            status: StatusCode::ACCEPTED,
            body: FastCadenceResponse {
                active: true,
                remaining_secs: Some((until - now).as_secs()),
            },
        },
        Err(_) => internal_error("/api/fast-cadence", "fast cadence lock poisoned"),
    }
}

fn build_fast_cadence_cancel(state: &ApiState) -> ApiResponse<FastCadenceResponse> {
    match state.fast_cadence.cancel() {
        Ok(()) => ApiResponse::Success {
            status: StatusCode::OK,
            body: FastCadenceResponse {
                active: false,
                remaining_secs: None,
            },
        },
        Err(_) => internal_error("/api/fast-cadence", "fast cadence lock poisoned"),
    }
}
