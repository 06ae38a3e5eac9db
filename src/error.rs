//! Error types
//! Matching / registration の失敗分類と HTTP への変換

use axum::{http::StatusCode, response::Json};
use serde::Serialize;
use tracing::warn;

/// Errors surfaced by the matching engine, the repository and registration.
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    /// Latitude/longitude outside the valid range, or not a finite number.
    #[error("invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("Geolocation required")]
    MissingOrigin,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Storage layer failure. Never retried here.
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),
}

impl From<sqlx::Error> for MarketError {
    fn from(e: sqlx::Error) -> Self {
        Self::RepositoryUnavailable(e.to_string())
    }
}

impl MarketError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCoordinate { .. } | Self::MissingOrigin | Self::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RepositoryUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ========================================
// HTTP エラーレスポンス
// ========================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(status: StatusCode, message: String) -> ApiError {
    warn!("API Error: {}", message);
    (status, Json(ErrorResponse { success: false, error: message }))
}

/// `.map_err(api_error)` で handler の戻り値に変換する
pub fn api_error(err: MarketError) -> ApiError {
    error_response(err.status_code(), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_map_to_bad_request() {
        assert_eq!(MarketError::MissingOrigin.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            MarketError::InvalidCoordinate { lat: 91.0, lng: 0.0 }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            MarketError::Validation("cropName is required".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn not_found_keeps_its_message() {
        let (status, body) = api_error(MarketError::NotFound("No buyers found for this crop".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.0.error, "No buyers found for this crop");
    }

    #[test]
    fn storage_errors_map_to_internal_error() {
        let err: MarketError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, MarketError::RepositoryUnavailable(_)));

        let (status, body) = api_error(err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.0.success);
    }
}
