use std::num::TryFromIntError;

use rusoto_cloudwatch::GetMetricStatisticsError;
use rusoto_core::RusotoError;
use thiserror::Error;

#[derive(Debug, PartialEq, Error)]
pub enum ReaperError {
    #[error("Value is None")]
    NoneValue,
    #[error("Failed to convert bigDecimal to primitive")]
    ToPrimitive,
    #[error("Failed to convert int")]
    TryFromIntError,
    #[error(transparent)]
    GetMetricsError(#[from] RusotoError<GetMetricStatisticsError>),
    #[error("Tracking table {0} does not exist in this region")]
    TrackingTableNotFound(String),
    #[error("Tracking store error: {0}")]
    Store(String),
    #[error("Failed to publish notification: {0}")]
    Notify(String),
    #[error("Failed to list regions: {0}")]
    ListRegions(String),
    #[error("Invalid trigger event: {0}")]
    InvalidEvent(String),
}

impl From<TryFromIntError> for ReaperError {
    fn from(_: TryFromIntError) -> ReaperError {
        ReaperError::TryFromIntError
    }
}

/// Failure of a single resource operation, classified so callers can tell
/// "already gone" from "try again next run" from "fix the role".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Transient fault: {0}")]
    Transient(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("{0}")]
    Other(String),
}

impl ResourceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResourceError::NotFound(_))
    }
}

#[derive(Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

const NOT_FOUND_CODES: &[&str] = &[
    "InvalidInstanceID.NotFound",
    "InvalidInstanceID.Malformed",
    "DBInstanceNotFound",
    "ResourceNotFoundException",
];

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "InternalError",
];

const PERMISSION_CODES: &[&str] = &[
    "UnauthorizedOperation",
    "AccessDenied",
    "AccessDeniedException",
    "AuthFailure",
];

/// Classify an AWS error code (or a raw response body that contains one).
pub fn classify_error_code(body: &str) -> ResourceError {
    let message = body.to_string();
    if NOT_FOUND_CODES.iter().any(|code| body.contains(code)) {
        ResourceError::NotFound(message)
    } else if THROTTLING_CODES.iter().any(|code| body.contains(code)) {
        ResourceError::Transient(message)
    } else if PERMISSION_CODES.iter().any(|code| body.contains(code)) {
        ResourceError::PermissionDenied(message)
    } else {
        ResourceError::Other(message)
    }
}

/// Classify the transport-level part of a rusoto error. Service errors are
/// handed to `service` since only the caller knows their variants.
pub fn classify_rusoto_error<E, F>(error: RusotoError<E>, service: F) -> ResourceError
where
    E: std::error::Error + 'static,
    F: FnOnce(E) -> ResourceError,
{
    match error {
        RusotoError::Service(error) => service(error),
        RusotoError::HttpDispatch(error) => ResourceError::Transient(error.to_string()),
        RusotoError::Credentials(error) => ResourceError::PermissionDenied(error.to_string()),
        RusotoError::Unknown(response) => {
            if response.status.is_server_error() {
                ResourceError::Transient(response.body_as_str().to_string())
            } else {
                classify_error_code(response.body_as_str())
            }
        }
        other => ResourceError::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found_code() {
        let body = "<Response><Errors><Error><Code>InvalidInstanceID.NotFound</Code>\
                    <Message>The instance ID 'i-0abc' does not exist</Message></Error></Errors></Response>";
        assert!(classify_error_code(body).is_not_found());
    }

    #[test]
    fn test_classify_throttling_and_permission_codes() {
        assert!(matches!(
            classify_error_code("<Code>RequestLimitExceeded</Code>"),
            ResourceError::Transient(_)
        ));
        assert!(matches!(
            classify_error_code("<Code>UnauthorizedOperation</Code>"),
            ResourceError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_error_code("<Code>IncorrectInstanceState</Code>"),
            ResourceError::Other(_)
        ));
    }

    #[test]
    fn test_config_error_message() {
        assert_eq!(
            ConfigError::Missing("SNS_TOPIC_ARN").to_string(),
            "SNS_TOPIC_ARN must be set"
        );
        assert_eq!(
            ConfigError::Invalid {
                name: "COMPUTE_FINALIZE_ACTION",
                value: "shred".to_string()
            }
            .to_string(),
            "COMPUTE_FINALIZE_ACTION has an invalid value: shred"
        );
    }
}
