//! Database Models
//!
//! 정책 저장소의 영속 레코드. 설정/모듈 설정은 버전이 단조 증가하는
//! append-only 스냅샷이며, 조회는 항상 키별 최신 버전을 읽음

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::types::SettingValue;

/// 일반 설정 엔트리 (키별 최신 버전)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SettingRecord {
    /// 점 표기 네임스페이스 키 (예: `plans.catalog`, `stripe.secret_key`)
    pub key: String,

    /// 불투명 문자열 값 (JSON 인코딩인 경우가 많음)
    pub value: String,

    /// 키별 단조 증가 버전
    pub version: i64,

    pub created_at: DateTime<Utc>,
}

/// 모듈 설정 스냅샷 (모듈별 최신 버전)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ModuleSettingsRecord {
    /// 모듈 키 (`unilevel`, `binary`)
    pub module_key: String,

    /// 설정 맵의 JSON 인코딩
    pub settings: String,

    /// 지급 원장이 참조하는 정책 스냅샷 버전
    pub version: i64,

    pub created_at: DateTime<Utc>,
}

impl ModuleSettingsRecord {
    /// JSON 설정을 타입드 맵으로 역직렬화
    pub fn settings_map(&self) -> Result<BTreeMap<String, SettingValue>, serde_json::Error> {
        serde_json::from_str(&self.settings)
    }
}

/// 배치 로그 1건 (append-only, 재생 순서 = created_at 순)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PlacementRecord {
    pub user_id: String,

    /// 추천(스폰서) 관계. 루트면 None
    pub sponsor_id: Option<String>,

    /// 실제 트리상 부모 (스필오버면 sponsor와 다름)
    pub parent_id: Option<String>,

    /// `left` / `right`
    pub leg: Option<String>,

    pub via_spillover: bool,

    pub created_at: DateTime<Utc>,
}

/// 사용자×일 단위 다리별 볼륨 버킷
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct VolumeRecord {
    pub user_id: String,

    pub day: NaiveDate,

    pub left_bv: f64,
    pub right_bv: f64,

    /// 직접 추천인이 만든 볼륨 (스필오버 제외)
    pub left_personal_bv: f64,
    pub right_personal_bv: f64,
}

/// 지급 원장 엔트리
///
/// (user_id, period_kind, period_start)가 유니크 키 — 같은 주기
/// 재실행이 절대 이중 기록되지 않는 근거
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LedgerRecord {
    pub user_id: String,

    /// `day` / `week`
    pub period_kind: String,

    /// 주간이면 ISO 월요일
    pub period_start: NaiveDate,

    /// 최종 지급액 (자격 미달이면 0)
    pub amount: f64,

    /// 계산에 사용된 binary 모듈 설정 버전
    pub policy_version: i64,

    /// 계산 내역 전체의 JSON (감사 추적)
    pub detail: String,

    pub created_at: DateTime<Utc>,
}
