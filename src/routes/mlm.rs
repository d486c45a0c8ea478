//! MLM Engine Endpoints
//!
//! 모듈 스키마/설정 조회와 저장
//!
//! # Endpoints
//! - `GET  /mlm-engine/enabled` - 활성 모듈 키 목록
//! - `GET  /mlm-engine/modules` - 전체 모듈 구성 (스키마 + 설정)
//! - `GET  /mlm-engine/modules/:key` - 단일 모듈 구성
//! - `POST /mlm-engine/modules/settings` - 설정 전체 교체

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::services::broadcast::{now_unix, ModuleSettingsUpdate};
use crate::services::modules::ModuleConfig;
use crate::types::SettingValue;
use crate::AppState;

// ============ Request/Response Types ============

#[derive(Debug, Serialize)]
pub struct EnabledResponse {
    pub enabled: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveSettingsRequest {
    pub key: String,
    pub settings: BTreeMap<String, SettingValue>,
}

// ============ Handlers ============

/// GET /mlm-engine/enabled
pub async fn get_enabled(State(state): State<AppState>) -> Json<EnabledResponse> {
    Json(EnabledResponse {
        enabled: state.modules.enabled_keys().to_vec(),
    })
}

/// GET /mlm-engine/modules
pub async fn list_modules(
    State(state): State<AppState>,
) -> Result<Json<Vec<ModuleConfig>>, ApiError> {
    let configs = state.modules.list_modules().await?;
    Ok(Json(configs))
}

/// GET /mlm-engine/modules/:key
pub async fn get_module(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ModuleConfig>, ApiError> {
    let config = state.modules.module_config(&key).await?;
    Ok(Json(config))
}

/// POST /mlm-engine/modules/settings
///
/// 설정 맵 전체 교체. 스키마 검증을 통과해야만 새 버전으로 저장되고,
/// 저장 즉시 열린 세션들에 버전 변경이 브로드캐스트됨
pub async fn save_module_settings(
    State(state): State<AppState>,
    Json(req): Json<SaveSettingsRequest>,
) -> Result<Json<ModuleConfig>, ApiError> {
    let config = state.modules.save_settings(&req.key, req.settings).await?;

    state.hub.broadcast_module_settings(ModuleSettingsUpdate {
        module_key: config.key.clone(),
        version: config.version,
        timestamp: now_unix(),
    });

    Ok(Json(config))
}
