use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::services::governor::{Denial, DenialReason};

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{0}")]
    Denied(Denial),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Store error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable kind, used as the `error` field of response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Denied(denial) => denial.reason.as_str(),
            AppError::Unauthorized => "unauthorized",
            AppError::NotFound => "not_found",
            AppError::UpstreamUnavailable(_) | AppError::HttpClient(_) => "upstream_unavailable",
            AppError::Cache(_) | AppError::Internal(_) => "internal_error",
        }
    }
}

impl AppError {
    /// Owned copy for handing one failure to several waiting callers.
    ///
    /// Wrapped library errors cannot be cloned; they keep their kind and message.
    pub fn replicate(&self) -> AppError {
        match self {
            AppError::Validation(msg) => AppError::Validation(msg.clone()),
            AppError::Denied(denial) => AppError::Denied(denial.clone()),
            AppError::Unauthorized => AppError::Unauthorized,
            AppError::NotFound => AppError::NotFound,
            AppError::UpstreamUnavailable(msg) => AppError::UpstreamUnavailable(msg.clone()),
            AppError::HttpClient(e) => AppError::UpstreamUnavailable(e.to_string()),
            AppError::Cache(e) => AppError::Internal(format!("Store error: {}", e)),
            AppError::Internal(msg) => AppError::Internal(msg.clone()),
        }
    }
}

impl From<Denial> for AppError {
    fn from(denial: Denial) -> Self {
        AppError::Denied(denial)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();

        let (status, body) = match &self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": kind, "message": msg }),
            ),
            AppError::Denied(denial) => {
                let status = match denial.reason {
                    DenialReason::EmergencyStopped => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::TOO_MANY_REQUESTS,
                };
                (
                    status,
                    json!({
                        "error": kind,
                        "message": denial.to_string(),
                        "current": denial.current,
                        "limit": denial.limit,
                        "retry_after": denial.retry_after_secs,
                    }),
                )
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": kind, "message": self.to_string() }),
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({ "error": kind, "message": self.to_string() }),
            ),
            AppError::UpstreamUnavailable(_) | AppError::HttpClient(_) => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": kind, "message": self.to_string() }),
            ),
            AppError::Cache(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, "Request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": kind, "message": "An unexpected error occurred" }),
                )
            }
        };

        let mut response = (status, Json(body)).into_response();

        if let AppError::Denied(Denial {
            retry_after_secs: Some(secs),
            ..
        }) = &self
        {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let response = AppError::Validation("Text cannot be empty".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_minute_denial_sets_retry_after() {
        let denial = Denial {
            reason: DenialReason::MinuteRateExceeded,
            current: 3.0,
            limit: 3.0,
            retry_after_secs: Some(42),
        };
        let response = AppError::from(denial).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn test_emergency_stop_maps_to_service_unavailable() {
        let denial = Denial {
            reason: DenialReason::EmergencyStopped,
            current: 0.0,
            limit: 0.0,
            retry_after_secs: None,
        };
        let response = AppError::from(denial).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_upstream_kind() {
        let err = AppError::UpstreamUnavailable("catalog timed out".to_string());
        assert_eq!(err.kind(), "upstream_unavailable");
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_replicated_errors_keep_their_kind() {
        let store_error = AppError::from(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection reset",
        )));
        let copy = store_error.replicate();
        assert!(matches!(copy, AppError::Internal(_)));
        assert_eq!(copy.kind(), store_error.kind());

        let upstream = AppError::UpstreamUnavailable("catalog down".to_string()).replicate();
        assert_eq!(upstream.to_string(), "Upstream unavailable: catalog down");
    }

    #[test]
    fn test_admin_errors() {
        assert_eq!(AppError::Unauthorized.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::NotFound.kind(), "not_found");
    }
}
