//! Plan Catalog Endpoint
//!
//! # Endpoints
//! - `GET /payments/plans` - 현재 플랜 카탈로그

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::ApiError;
use crate::services::catalog::{self, Plan};
use crate::AppState;

/// 카탈로그 응답
#[derive(Debug, Serialize)]
pub struct PlansResponse {
    pub plans: Vec<Plan>,
    /// 카탈로그 전체에 단일 통화
    pub currency: String,
}

/// GET /payments/plans
///
/// `plans.catalog` 설정의 현재 버전에 색상/통화 오버레이를
/// 적용해 반환. 설정이 없으면 기본 카탈로그
pub async fn get_plans(State(state): State<AppState>) -> Result<Json<PlansResponse>, ApiError> {
    let plans = catalog::current_plans(state.store.as_ref()).await?;
    let currency = plans
        .first()
        .map(|p| p.currency.clone())
        .unwrap_or_else(|| "EUR".to_string());

    Ok(Json(PlansResponse { plans, currency }))
}
