//! Binary Policy Model
//!
//! `binary` 모듈의 settings 맵을 강타입 정책으로 변환
//!
//! # Design Decision
//!
//! 정책은 쓰기 시점과 읽기 시점 양쪽에서 검증:
//! - 쓰기: 모듈 저장 시 스키마 + 범위 검증 (modules.rs)
//! - 읽기: 엔진 실행 직전 from_settings()로 다시 검증
//!
//! 과거에 저장된 값이 현재 규칙과 어긋나면 읽기 쪽 검증이
//! POLICY_INVALID로 드러내며, 엔진은 절대 opaque JSON을 신뢰하지 않음

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SettingValue;

/// 정책 파싱/검증 실패
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("field {key}: {reason}")]
    InvalidField { key: String, reason: String },
}

/// 신규 가입자 배치 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    AutoWeak,
    Alternate,
    StrictLeft,
    StrictRight,
}

/// 직속 슬롯이 모두 찼을 때의 스필오버 탐색 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpilloverMode {
    Bfs,
    WeakLegFirst,
}

/// 약한 다리 판정 기준
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeakMetric {
    Count,
    Bv,
}

/// 동률일 때의 타이브레이크 규칙
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreaker {
    Left,
    Right,
    StableAuto,
}

/// alternate 모드의 다리 선택 기준
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternateMode {
    SponsorHistory,
    StableAuto,
}

/// `binary` 모듈의 강타입 정책
///
/// 필드 의미는 모듈 스키마(modules.rs)와 1:1 대응
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryPolicy {
    /// 매칭 페어 1개당 BV
    pub pair_volume: f64,
    /// 페어 볼륨 대비 지급 퍼센트 (0~100)
    pub pair_percent: f64,
    /// 강한 다리는 약한 다리의 ratio배까지만 인정 (>= 1)
    pub carryover_max_ratio: f64,
    /// 자격 조건: 활성 직접 추천인 최소 수
    pub min_active_personals: u32,
    /// 자격 조건: 약한 다리 일일 유입 BV 최소치
    pub min_weak_leg_bv_per_day: f64,
    /// 일일 지급 상한 (0 = 무제한)
    pub daily_binary_cap: f64,
    /// 주간 지급 상한 (0 = 무제한)
    pub weekly_binary_cap: f64,
    /// 랭크 달성 볼륨 중 한 다리가 차지할 수 있는 최대 비율 (0~100)
    pub max_percent_from_one_leg_for_rank: f64,
    /// 약한 다리 볼륨 중 개인(비-스필오버) 볼륨 최소 비율 (0~100)
    pub min_personal_share_in_weak_leg: f64,
    /// 양쪽 다리 모두에 직접 추천인이 있어야 자격 인정
    pub require_personals_in_each_leg: bool,
    /// 개인/스필오버 볼륨 구분 추적 여부
    pub track_personal_vs_spillover: bool,
    pub placement_mode: PlacementMode,
    pub spillover_mode: SpilloverMode,
    pub weak_metric: WeakMetric,
    pub tie_breaker: TieBreaker,
    pub alternate_mode: AlternateMode,
    /// 스필오버 탐색 노드 예산 (>= 1)
    pub max_bfs_visited: usize,
}

impl Default for BinaryPolicy {
    fn default() -> Self {
        Self {
            pair_volume: 100.0,
            pair_percent: 10.0,
            carryover_max_ratio: 2.0,
            min_active_personals: 2,
            min_weak_leg_bv_per_day: 0.0,
            daily_binary_cap: 0.0,
            weekly_binary_cap: 0.0,
            max_percent_from_one_leg_for_rank: 60.0,
            min_personal_share_in_weak_leg: 0.0,
            require_personals_in_each_leg: false,
            track_personal_vs_spillover: true,
            placement_mode: PlacementMode::AutoWeak,
            spillover_mode: SpilloverMode::Bfs,
            weak_metric: WeakMetric::Bv,
            tie_breaker: TieBreaker::StableAuto,
            alternate_mode: AlternateMode::SponsorHistory,
            max_bfs_visited: 512,
        }
    }
}

impl BinaryPolicy {
    /// settings 맵에서 정책 구성
    ///
    /// 없는 키는 기본값, 있는 키는 타입과 범위를 엄격히 검증
    pub fn from_settings(settings: &BTreeMap<String, SettingValue>) -> Result<Self, PolicyError> {
        let defaults = Self::default();

        let policy = Self {
            pair_volume: number(settings, "pairVolume", defaults.pair_volume)?,
            pair_percent: number(settings, "pairPercent", defaults.pair_percent)?,
            carryover_max_ratio: number(
                settings,
                "carryoverMaxRatio",
                defaults.carryover_max_ratio,
            )?,
            min_active_personals: integer(
                settings,
                "minActivePersonals",
                defaults.min_active_personals as i64,
            )? as u32,
            min_weak_leg_bv_per_day: number(
                settings,
                "minWeakLegBvPerDay",
                defaults.min_weak_leg_bv_per_day,
            )?,
            daily_binary_cap: number(settings, "dailyBinaryCap", defaults.daily_binary_cap)?,
            weekly_binary_cap: number(settings, "weeklyBinaryCap", defaults.weekly_binary_cap)?,
            max_percent_from_one_leg_for_rank: number(
                settings,
                "maxPercentFromOneLegForRank",
                defaults.max_percent_from_one_leg_for_rank,
            )?,
            min_personal_share_in_weak_leg: number(
                settings,
                "minPersonalShareInWeakLeg",
                defaults.min_personal_share_in_weak_leg,
            )?,
            require_personals_in_each_leg: boolean(
                settings,
                "requirePersonalsInEachLeg",
                defaults.require_personals_in_each_leg,
            )?,
            track_personal_vs_spillover: boolean(
                settings,
                "trackPersonalVsSpillover",
                defaults.track_personal_vs_spillover,
            )?,
            placement_mode: variant(settings, "placementMode", defaults.placement_mode)?,
            spillover_mode: variant(settings, "spilloverMode", defaults.spillover_mode)?,
            weak_metric: variant(settings, "weakMetric", defaults.weak_metric)?,
            tie_breaker: variant(settings, "tieBreaker", defaults.tie_breaker)?,
            alternate_mode: variant(settings, "alternateMode", defaults.alternate_mode)?,
            max_bfs_visited: integer(settings, "maxBfsVisited", defaults.max_bfs_visited as i64)?
                as usize,
        };

        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        require(self.pair_volume > 0.0, "pairVolume", "must be > 0")?;
        require_percent(self.pair_percent, "pairPercent")?;
        require(
            self.carryover_max_ratio >= 1.0,
            "carryoverMaxRatio",
            "must be >= 1",
        )?;
        require(
            self.min_weak_leg_bv_per_day >= 0.0,
            "minWeakLegBvPerDay",
            "must be >= 0",
        )?;
        require(self.daily_binary_cap >= 0.0, "dailyBinaryCap", "must be >= 0")?;
        require(
            self.weekly_binary_cap >= 0.0,
            "weeklyBinaryCap",
            "must be >= 0",
        )?;
        require_percent(
            self.max_percent_from_one_leg_for_rank,
            "maxPercentFromOneLegForRank",
        )?;
        require_percent(
            self.min_personal_share_in_weak_leg,
            "minPersonalShareInWeakLeg",
        )?;
        require(self.max_bfs_visited >= 1, "maxBfsVisited", "must be >= 1")?;
        Ok(())
    }
}

fn require(cond: bool, key: &str, reason: &str) -> Result<(), PolicyError> {
    if cond {
        Ok(())
    } else {
        Err(PolicyError::InvalidField {
            key: key.to_string(),
            reason: reason.to_string(),
        })
    }
}

fn require_percent(value: f64, key: &str) -> Result<(), PolicyError> {
    require(
        (0.0..=100.0).contains(&value),
        key,
        "must be between 0 and 100",
    )
}

fn number(
    settings: &BTreeMap<String, SettingValue>,
    key: &str,
    default: f64,
) -> Result<f64, PolicyError> {
    match settings.get(key) {
        None => Ok(default),
        Some(value) => value.as_f64().ok_or_else(|| PolicyError::InvalidField {
            key: key.to_string(),
            reason: "expected a number".to_string(),
        }),
    }
}

fn integer(
    settings: &BTreeMap<String, SettingValue>,
    key: &str,
    default: i64,
) -> Result<i64, PolicyError> {
    let raw = number(settings, key, default as f64)?;
    if raw < 0.0 || raw.fract() != 0.0 {
        return Err(PolicyError::InvalidField {
            key: key.to_string(),
            reason: "expected a non-negative integer".to_string(),
        });
    }
    Ok(raw as i64)
}

fn boolean(
    settings: &BTreeMap<String, SettingValue>,
    key: &str,
    default: bool,
) -> Result<bool, PolicyError> {
    match settings.get(key) {
        None => Ok(default),
        Some(value) => value.as_bool().ok_or_else(|| PolicyError::InvalidField {
            key: key.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn variant<T: serde::de::DeserializeOwned>(
    settings: &BTreeMap<String, SettingValue>,
    key: &str,
    default: T,
) -> Result<T, PolicyError> {
    match settings.get(key) {
        None => Ok(default),
        Some(value) => {
            let text = value.as_str().ok_or_else(|| PolicyError::InvalidField {
                key: key.to_string(),
                reason: "expected a string".to_string(),
            })?;
            serde_json::from_value(serde_json::Value::String(text.to_string())).map_err(|_| {
                PolicyError::InvalidField {
                    key: key.to_string(),
                    reason: format!("unknown value '{}'", text),
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(json: &str) -> BTreeMap<String, SettingValue> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults_when_empty() {
        let policy = BinaryPolicy::from_settings(&BTreeMap::new()).unwrap();
        assert_eq!(policy, BinaryPolicy::default());
    }

    #[test]
    fn test_parse_full_settings() {
        let policy = BinaryPolicy::from_settings(&settings(
            r#"{
                "pairVolume": 50,
                "pairPercent": 10,
                "carryoverMaxRatio": 3,
                "minActivePersonals": 1,
                "placementMode": "strict_left",
                "spilloverMode": "weak_leg_first",
                "weakMetric": "count",
                "tieBreaker": "right",
                "alternateMode": "stable_auto",
                "maxBfsVisited": 64
            }"#,
        ))
        .unwrap();

        assert_eq!(policy.pair_volume, 50.0);
        assert_eq!(policy.carryover_max_ratio, 3.0);
        assert_eq!(policy.placement_mode, PlacementMode::StrictLeft);
        assert_eq!(policy.spillover_mode, SpilloverMode::WeakLegFirst);
        assert_eq!(policy.weak_metric, WeakMetric::Count);
        assert_eq!(policy.tie_breaker, TieBreaker::Right);
        assert_eq!(policy.alternate_mode, AlternateMode::StableAuto);
        assert_eq!(policy.max_bfs_visited, 64);
    }

    #[test]
    fn test_percent_out_of_range_rejected() {
        let err = BinaryPolicy::from_settings(&settings(r#"{"pairPercent": 120}"#)).unwrap_err();
        assert!(err.to_string().contains("pairPercent"));
    }

    #[test]
    fn test_ratio_below_one_rejected() {
        let err =
            BinaryPolicy::from_settings(&settings(r#"{"carryoverMaxRatio": 0.5}"#)).unwrap_err();
        assert!(err.to_string().contains("carryoverMaxRatio"));
    }

    #[test]
    fn test_unknown_enum_value_rejected() {
        let err =
            BinaryPolicy::from_settings(&settings(r#"{"placementMode": "sideways"}"#)).unwrap_err();
        assert!(err.to_string().contains("placementMode"));
    }

    #[test]
    fn test_zero_search_budget_rejected() {
        let err = BinaryPolicy::from_settings(&settings(r#"{"maxBfsVisited": 0}"#)).unwrap_err();
        assert!(err.to_string().contains("maxBfsVisited"));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let err =
            BinaryPolicy::from_settings(&settings(r#"{"pairVolume": "fifty"}"#)).unwrap_err();
        assert!(err.to_string().contains("expected a number"));
    }
}
