//! Error Handling Module
//!
//! Provides type-safe error handling with proper HTTP status code mapping.
//! Uses thiserror for domain errors and integrates with tracing for structured logging.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::binary_payout::PayoutError;
use crate::services::binary_policy::PolicyError;
use crate::services::catalog::CatalogError;
use crate::services::modules::ModuleError;
use crate::services::placement::PlacementError;

/// API 에러 타입
///
/// # Design Decision
///
/// 각 에러 variant는 적절한 HTTP 상태 코드에 매핑됨
/// - 클라이언트 에러: 4xx (잘못된 요청, 없는 리소스 등)
/// - 서버 에러: 5xx (내부 오류)
///
/// 배치 탐색 예산 소진(PLACEMENT_EXHAUSTED)은 별도 variant:
/// "스폰서 없음"이나 "잘못된 입력"과 절대 섞이면 안 되는 실패 종류
#[derive(Debug, Error)]
pub enum ApiError {
    // ============ 400 Bad Request ============
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    // ============ 404 Not Found ============
    #[error("Resource not found: {0}")]
    NotFound(String),

    // ============ 422 Unprocessable Entity ============
    #[error("Stored policy is invalid: {0}")]
    PolicyInvalid(String),

    #[error("Placement search exhausted after visiting {visited} nodes")]
    PlacementExhausted { visited: usize },

    // ============ 500 Internal Server Error ============
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error")]
    InternalError,

    // ============ 503 Service Unavailable ============
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// API 에러 응답 구조
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            // 4xx 클라이언트 에러
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            ApiError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "Validation failed".to_string(),
                Some(msg.clone()),
            ),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{} not found", resource),
                None,
            ),
            ApiError::PolicyInvalid(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "POLICY_INVALID",
                "Stored policy is invalid".to_string(),
                Some(msg.clone()),
            ),
            ApiError::PlacementExhausted { visited } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "PLACEMENT_EXHAUSTED",
                "No free slot found within the configured search budget".to_string(),
                Some(format!("visited {} nodes", visited)),
            ),

            // 5xx 서버 에러
            ApiError::DatabaseError(_) => {
                // 내부 에러는 클라이언트에 상세 정보 노출 안 함
                tracing::error!("Database error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "Database error occurred".to_string(),
                    None,
                )
            }
            ApiError::InternalError => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::ServiceUnavailable(service) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                format!("{} is currently unavailable", service),
                None,
            ),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// SQLx 에러를 ApiError로 변환
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("SQLx error: {:?}", err);
        ApiError::DatabaseError(err.to_string())
    }
}

/// anyhow 에러를 ApiError로 변환
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Anyhow error: {:?}", err);
        ApiError::InternalError
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        ApiError::PolicyInvalid(err.to_string())
    }
}

impl From<ModuleError> for ApiError {
    fn from(err: ModuleError) -> Self {
        match err {
            ModuleError::UnknownModule(key) => ApiError::NotFound(format!("module {}", key)),
            ModuleError::Disabled(key) => {
                ApiError::BadRequest(format!("module {} is not enabled", key))
            }
            ModuleError::Invalid(msg) => ApiError::ValidationError(msg),
            ModuleError::Store(inner) => inner.into(),
        }
    }
}

impl From<PlacementError> for ApiError {
    fn from(err: PlacementError) -> Self {
        match err {
            PlacementError::SponsorNotFound(id) => {
                ApiError::NotFound(format!("sponsor {}", id))
            }
            PlacementError::UnknownUser(id) => ApiError::NotFound(format!("user {}", id)),
            PlacementError::Invalid(msg) => ApiError::ValidationError(msg),
            PlacementError::SearchExhausted { visited } => {
                ApiError::PlacementExhausted { visited }
            }
            PlacementError::Store(inner) => inner.into(),
        }
    }
}

impl From<PayoutError> for ApiError {
    fn from(err: PayoutError) -> Self {
        match err {
            PayoutError::UnknownUser(id) => ApiError::NotFound(format!("user {}", id)),
            PayoutError::Policy(inner) => inner.into(),
            PayoutError::Store(inner) => inner.into(),
        }
    }
}
