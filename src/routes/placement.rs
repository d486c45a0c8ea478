//! Placement Endpoints
//!
//! 바이너리 트리 배치와 볼륨 기록
//!
//! # Endpoints
//! - `POST /mlm-engine/binary/placements` - 신규 가입자 배치
//! - `GET  /mlm-engine/binary/placements/:user_id` - 배치 조회
//! - `POST /mlm-engine/binary/volumes` - BV 발생 기록

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::ApiError;
use crate::services::binary_policy::BinaryPolicy;
use crate::services::broadcast::{now_unix, PlacementNotice};
use crate::services::modules::MODULE_BINARY;
use crate::services::placement::Placement;
use crate::types::Leg;
use crate::AppState;

// ============ Request Types ============

#[derive(Debug, Deserialize)]
pub struct PlaceRequest {
    pub user_id: String,
    /// 없으면 루트 노드로 삽입
    pub sponsor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    pub user_id: String,
    pub bv: f64,
    /// 없으면 오늘 (UTC)
    pub day: Option<NaiveDate>,
}

// ============ Handlers ============

/// POST /mlm-engine/binary/placements
///
/// 현재 binary 정책 스냅샷으로 배치 실행. 이미 배치된 사용자는
/// 기존 배치를 그대로 반환 (멱등). 탐색 예산 소진은 422로 구분됨
pub async fn place_user(
    State(state): State<AppState>,
    Json(req): Json<PlaceRequest>,
) -> Result<Json<Placement>, ApiError> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::ValidationError("user_id must not be empty".to_string()));
    }

    let policy = current_binary_policy(&state).await?;
    let placement = state
        .placement
        .place(&req.user_id, req.sponsor_id.as_deref(), &policy)
        .await?;

    if placement.newly_placed {
        state.hub.broadcast_placement(PlacementNotice {
            user_id: placement.user_id.clone(),
            parent_id: placement.parent_id.clone(),
            leg: placement.leg.map(|l: Leg| l.as_str().to_string()),
            via_spillover: placement.via_spillover,
            timestamp: now_unix(),
        });
    }

    Ok(Json(placement))
}

/// GET /mlm-engine/binary/placements/:user_id
pub async fn get_placement(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Placement>, ApiError> {
    state
        .placement
        .placement_of(&user_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("placement for {}", user_id)))
}

/// POST /mlm-engine/binary/volumes
///
/// 결제 등으로 발생한 BV를 발생자의 조상 체인에 적립
pub async fn record_volume(
    State(state): State<AppState>,
    Json(req): Json<VolumeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let day = req.day.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let credited = state
        .placement
        .record_volume(&req.user_id, req.bv, day)
        .await?;

    Ok(Json(serde_json::json!({
        "user_id": req.user_id,
        "day": day,
        "credited_ancestors": credited,
    })))
}

// ============ Helpers ============

/// 저장된 binary 설정에서 정책 스냅샷 구성 (없으면 기본값)
async fn current_binary_policy(state: &AppState) -> Result<BinaryPolicy, ApiError> {
    match state.store.get_module_settings(MODULE_BINARY).await? {
        Some(record) => {
            let settings = record
                .settings_map()
                .map_err(|e| ApiError::PolicyInvalid(e.to_string()))?;
            Ok(BinaryPolicy::from_settings(&settings)?)
        }
        None => Ok(BinaryPolicy::default()),
    }
}
