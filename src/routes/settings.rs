//! Settings Endpoints
//!
//! 일반 키-값 설정 저장소. 플랜 카탈로그 JSON, 통화 코드, 색상 맵,
//! 결제 프로바이더 자격증명이 모두 이 저장소의 키로 관리됨
//!
//! # Endpoints
//! - `GET  /settings` - 전체 설정 (시크릿 마스킹)
//! - `GET  /settings/:key` - 단일 키
//! - `POST /settings` - 단일 키 쓰기 (새 버전)
//! - `POST /settings/batch` - 다중 키 원자적 쓰기
//!
//! # Design Decision
//!
//! 값은 불투명 문자열이지만, 잘 알려진 키(plans.*)는 쓰기 시점에
//! 서버가 구조를 재검증함. 클라이언트 검증은 신뢰하지 않음

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::services::broadcast::{now_unix, CatalogUpdate};
use crate::services::catalog::{self, KEY_CATALOG, KEY_COLORS, KEY_CURRENCY};
use crate::AppState;

// ============ Request/Response Types ============

#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub key: String,
    /// 시크릿 키는 마스킹된 값
    pub value: String,
    pub version: i64,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct PutSettingRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchPutRequest {
    pub entries: Vec<PutSettingRequest>,
}

#[derive(Debug, Serialize)]
pub struct BatchPutResponse {
    pub saved: Vec<SettingResponse>,
}

// ============ Handlers ============

/// GET /settings
pub async fn list_settings(
    State(state): State<AppState>,
) -> Result<Json<Vec<SettingResponse>>, ApiError> {
    let records = state.store.list_settings().await?;
    Ok(Json(records.into_iter().map(to_response).collect()))
}

/// GET /settings/:key
///
/// 없는 키는 404가 아니라 body `null` — 클라이언트는 이를
/// "아직 설정 전"으로 해석하고 기본값을 적용함
pub async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Option<SettingResponse>>, ApiError> {
    let record = state.store.get_setting(&key).await?;
    Ok(Json(record.map(to_response)))
}

/// POST /settings
///
/// 단일 키 전체 교체. 잘 알려진 키는 값 구조를 검증한 뒤 저장
pub async fn put_setting(
    State(state): State<AppState>,
    Json(req): Json<PutSettingRequest>,
) -> Result<Json<SettingResponse>, ApiError> {
    let value = validate_known_key(&req.key, &req.value)?;
    let record = state.store.put_setting(&req.key, &value).await?;

    notify_if_catalog_key(&state, &req.key).await;

    tracing::info!(key = %req.key, version = record.version, "Setting saved");
    Ok(Json(to_response(record)))
}

/// POST /settings/batch
///
/// 다중 키를 하나의 트랜잭션으로 쓰기. catalog + currency + colors처럼
/// 서로 정합성이 요구되는 묶음에 사용 — 부분 성공이 없으므로
/// 카탈로그와 색상 맵이 어긋난 상태로 남을 수 없음
pub async fn put_settings_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchPutRequest>,
) -> Result<Json<BatchPutResponse>, ApiError> {
    if req.entries.is_empty() {
        return Err(ApiError::BadRequest("entries must not be empty".to_string()));
    }

    // 전부 검증 통과한 뒤에만 쓰기 시작
    let mut entries = Vec::with_capacity(req.entries.len());
    for entry in &req.entries {
        let value = validate_known_key(&entry.key, &entry.value)?;
        entries.push((entry.key.clone(), value));
    }

    let records = state.store.put_settings_atomic(&entries).await?;

    for (key, _) in &entries {
        notify_if_catalog_key(&state, key).await;
    }

    tracing::info!(keys = entries.len(), "Settings batch saved");
    Ok(Json(BatchPutResponse {
        saved: records.into_iter().map(to_response).collect(),
    }))
}

// ============ Helpers ============

fn to_response(record: crate::db::models::SettingRecord) -> SettingResponse {
    let value = if is_secret_key(&record.key) {
        mask_secret(&record.value)
    } else {
        record.value
    };
    SettingResponse {
        key: record.key,
        value,
        version: record.version,
        updated_at: record.created_at.to_rfc3339(),
    }
}

/// 잘 알려진 키의 값 구조 검증. 정규화된 값을 반환
fn validate_known_key(key: &str, value: &str) -> Result<String, ApiError> {
    match key {
        KEY_CATALOG => {
            catalog::parse_and_validate(value)?;
            Ok(value.to_string())
        }
        KEY_CURRENCY => {
            let code = value.trim().to_uppercase();
            if !catalog::is_currency_code(&code) {
                return Err(ApiError::ValidationError(format!(
                    "'{}' is not a 3-letter ISO currency code",
                    value
                )));
            }
            Ok(code)
        }
        KEY_COLORS => {
            serde_json::from_str::<std::collections::HashMap<String, String>>(value).map_err(
                |_| {
                    ApiError::ValidationError(
                        "plans.colors must be a JSON map of plan id to color".to_string(),
                    )
                },
            )?;
            Ok(value.to_string())
        }
        _ => Ok(value.to_string()),
    }
}

/// plans.* 키가 바뀌면 열려 있는 세션들에 best-effort 알림
async fn notify_if_catalog_key(state: &AppState, key: &str) {
    if key != KEY_CATALOG && key != KEY_CURRENCY && key != KEY_COLORS {
        return;
    }
    // 알림 내용은 재조회 결과 기준 — 실패하면 조용히 생략
    if let Ok(plans) = catalog::current_plans(state.store.as_ref()).await {
        state.hub.broadcast_catalog(CatalogUpdate {
            plan_count: plans.len(),
            currency: plans
                .first()
                .map(|p| p.currency.clone())
                .unwrap_or_default(),
            timestamp: now_unix(),
        });
    }
}

fn is_secret_key(key: &str) -> bool {
    key.ends_with(".secret_key")
        || key.ends_with(".webhook_secret")
        || key.ends_with(".client_secret")
}

/// 시크릿 값 마스킹: 앞 6자만 남김
///
/// 6자 이하인 값은 접두부를 남기면 전체가 노출되므로 통째로 마스킹
fn mask_secret(value: &str) -> String {
    if value.chars().count() <= 6 {
        return "••••••••".to_string();
    }
    let prefix: String = value.chars().take(6).collect();
    format!("{}••••••••", prefix)
}
