//! Unilevel Payout Policy
//!
//! 플랜별 레벨 퍼센트 테이블에 따라 스폰서 체인을 따라 올라가며 지급
//!
//! # Fallback Chain
//!
//! `planLevels[plan]` → 레거시 `levelsPercent` → `maxDepth` × `bonusPercent`
//! 확장 → 하드코딩 기본값 `[5, 3, 2]`
//!
//! 레거시 형태는 읽기 시점에 한 번 canonical한 `planLevels` 맵으로
//! 마이그레이션되어 새 버전으로 저장됨 (매 읽기마다 재유도하지 않음)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::services::catalog::Plan;
use crate::types::{percent_of_minor, SettingValue};

/// 플랜별 테이블이 전혀 없을 때의 기본 레벨 퍼센트
pub const DEFAULT_LEVELS: [f64; 3] = [5.0, 3.0, 2.0];

/// 스폰서 체인의 한 단계 (S1 = 직접 스폰서)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SponsorAncestor {
    pub user_id: String,
    /// 비활성 조상에서 지급이 멈춤
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// 레벨별 커미션
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Commission {
    /// 1 = 직접 스폰서
    pub level: u32,
    pub user_id: String,
    pub percent: f64,
    /// 최소 화폐 단위, round-half-up
    pub amount: i64,
}

/// 레거시 설정에서 전역 레벨 리스트 유도
///
/// `levelsPercent`가 숫자 배열이면 그대로, 아니면
/// `maxDepth` × `bonusPercent` 확장, 둘 다 없으면 기본값
pub fn legacy_levels(settings: &BTreeMap<String, SettingValue>) -> Vec<f64> {
    if let Some(levels) = settings
        .get("levelsPercent")
        .and_then(SettingValue::as_number_list)
    {
        return levels;
    }

    let max_depth = settings
        .get("maxDepth")
        .and_then(SettingValue::as_f64)
        .unwrap_or(0.0);
    let bonus_percent = settings
        .get("bonusPercent")
        .and_then(SettingValue::as_f64)
        .unwrap_or(0.0);

    if max_depth > 0.0 && bonus_percent > 0.0 {
        return vec![bonus_percent; max_depth as usize];
    }

    DEFAULT_LEVELS.to_vec()
}

/// 플랜 id → 레벨 리스트 맵 구성
///
/// 명시적 `planLevels` 항목이 항상 우선, 없는 플랜은 레거시 fallback
pub fn plan_levels(
    settings: &BTreeMap<String, SettingValue>,
    plans: &[Plan],
) -> BTreeMap<String, Vec<f64>> {
    let mut result = BTreeMap::new();

    if let Some(SettingValue::Map(explicit)) = settings.get("planLevels") {
        for (plan_id, value) in explicit {
            if let Some(levels) = value.as_number_list() {
                result.insert(plan_id.clone(), levels);
            }
        }
    }

    let fallback = legacy_levels(settings);
    for plan in plans {
        result
            .entry(plan.id.clone())
            .or_insert_with(|| fallback.clone());
    }

    result
}

/// 하나의 플랜에 적용될 실효 레벨 리스트
pub fn effective_levels(
    settings: &BTreeMap<String, SettingValue>,
    plans: &[Plan],
    plan_id: &str,
) -> Vec<f64> {
    plan_levels(settings, plans)
        .remove(plan_id)
        .unwrap_or_else(|| legacy_levels(settings))
}

/// 레거시 형태를 canonical `planLevels` 맵으로 변환
///
/// 반환값: (canonical settings, 변경 여부). 변경된 경우에만
/// 호출자가 새 버전으로 저장함
pub fn canonical_settings(
    settings: &BTreeMap<String, SettingValue>,
    plans: &[Plan],
) -> (BTreeMap<String, SettingValue>, bool) {
    let levels = plan_levels(settings, plans);
    let canonical = SettingValue::Map(
        levels
            .iter()
            .map(|(id, lv)| (id.clone(), SettingValue::number_list(lv)))
            .collect(),
    );

    let changed = settings.get("planLevels") != Some(&canonical);
    if !changed {
        return (settings.clone(), false);
    }

    let mut out = settings.clone();
    out.insert("planLevels".to_string(), canonical);
    (out, true)
}

/// planLevels 값 검증 (쓰기 경로)
///
/// 모든 항목이 0~100 퍼센트 숫자 배열이어야 함
pub fn validate_plan_levels(value: &SettingValue) -> Result<(), String> {
    let map = value
        .as_map()
        .ok_or_else(|| "planLevels must be a map of plan id to percent list".to_string())?;

    for (plan_id, entry) in map {
        let levels = entry
            .as_number_list()
            .ok_or_else(|| format!("planLevels['{}'] must be a number list", plan_id))?;
        for percent in &levels {
            if !(0.0..=100.0).contains(percent) {
                return Err(format!(
                    "planLevels['{}'] contains {} (must be 0..=100)",
                    plan_id, percent
                ));
            }
        }
    }

    Ok(())
}

/// 결제 1건에 대한 유니레벨 커미션 계산
///
/// 레벨 i의 퍼센트를 Si에게 지급. 설정된 리스트 끝, 또는
/// 체인이 끊기거나 비활성 조상을 만나는 지점 중 먼저 오는 곳에서 중단
pub fn payout(amount_minor: i64, levels: &[f64], chain: &[SponsorAncestor]) -> Vec<Commission> {
    let mut commissions = Vec::new();

    for (index, percent) in levels.iter().enumerate() {
        let Some(ancestor) = chain.get(index) else {
            break;
        };
        if !ancestor.active {
            break;
        }
        commissions.push(Commission {
            level: index as u32 + 1,
            user_id: ancestor.user_id.clone(),
            percent: *percent,
            amount: percent_of_minor(amount_minor, *percent),
        });
    }

    commissions
}
