//! MLM Module Registry
//!
//! 활성 모듈(unilevel / binary)의 스키마 + 현재 설정을 관리
//!
//! ```text
//! ┌──────────────┐   validate    ┌──────────────┐   JSON    ┌───────────┐
//! │ admin client │ ────────────▶ │ ModuleRegistry│ ────────▶ │ PolicyStore│
//! └──────────────┘               └──────────────┘           └───────────┘
//!                               schema + 범위 검증            버전 스냅샷
//! ```
//!
//! # Design Decision
//!
//! 설정 저장은 전체 교체(full replace). 부분 병합은 지원하지 않음 —
//! 클라이언트가 현재 맵을 읽고 수정본 전체를 다시 보내는 모델.
//! 스키마에 없는 키는 보존되지만 (하위 호환), 알려진 키는
//! 타입/범위를 서버에서 강제함. 클라이언트 검증은 신뢰하지 않음

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::db::repository::PolicyStore;
use crate::services::binary_policy::BinaryPolicy;
use crate::services::catalog;
use crate::services::unilevel;
use crate::types::SettingValue;

pub const MODULE_UNILEVEL: &str = "unilevel";
pub const MODULE_BINARY: &str = "binary";

/// 모듈 설정 조작 실패
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("unknown module '{0}'")]
    UnknownModule(String),

    #[error("module '{0}' is not enabled")]
    Disabled(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// 설정 필드의 렌더링/검증 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Select,
    Checkbox,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectOption {
    pub value: &'static str,
    pub label: &'static str,
}

/// 필드 스키마 (타입 + 범위 제약)
#[derive(Debug, Clone, Serialize)]
pub struct FieldSchema {
    pub key: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// 정수만 허용
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub integer: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
}

impl FieldSchema {
    fn number(key: &'static str, label: &'static str, min: f64, max: Option<f64>) -> Self {
        Self {
            key,
            label,
            field_type: FieldType::Number,
            min: Some(min),
            max,
            integer: false,
            options: vec![],
        }
    }

    fn integer(key: &'static str, label: &'static str, min: f64, max: Option<f64>) -> Self {
        Self {
            integer: true,
            ..Self::number(key, label, min, max)
        }
    }

    fn checkbox(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            field_type: FieldType::Checkbox,
            min: None,
            max: None,
            integer: false,
            options: vec![],
        }
    }

    fn select(key: &'static str, label: &'static str, options: &[(&'static str, &'static str)]) -> Self {
        Self {
            key,
            label,
            field_type: FieldType::Select,
            min: None,
            max: None,
            integer: false,
            options: options
                .iter()
                .map(|(value, label)| SelectOption { value, label })
                .collect(),
        }
    }
}

/// 모듈 정의 (키 + 라벨 + 필드 스키마)
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDescriptor {
    pub key: &'static str,
    pub label: &'static str,
    pub fields: Vec<FieldSchema>,
}

/// API로 내보내는 모듈 구성 (스키마 + 현재 설정 + 버전)
#[derive(Debug, Clone, Serialize)]
pub struct ModuleConfig {
    pub key: String,
    pub label: String,
    pub fields: Vec<FieldSchema>,
    pub settings: BTreeMap<String, SettingValue>,
    pub version: i64,
}

/// 내장 모듈 카탈로그
pub fn builtin_modules() -> Vec<ModuleDescriptor> {
    vec![
        ModuleDescriptor {
            key: MODULE_UNILEVEL,
            label: "Unilevel",
            fields: vec![
                FieldSchema::integer("maxDepth", "Max depth", 1.0, Some(20.0)),
                FieldSchema::number("bonusPercent", "Bonus percent per level", 0.0, Some(100.0)),
            ],
        },
        ModuleDescriptor {
            key: MODULE_BINARY,
            label: "Binary",
            fields: vec![
                FieldSchema::number("pairVolume", "Pair volume (BV)", 0.0, None),
                FieldSchema::number("pairPercent", "Pair percent", 0.0, Some(100.0)),
                FieldSchema::number("carryoverMaxRatio", "Carryover max ratio", 1.0, None),
                FieldSchema::integer("minActivePersonals", "Min active personals", 0.0, None),
                FieldSchema::number("minWeakLegBvPerDay", "Min weak-leg BV per day", 0.0, None),
                FieldSchema::number("dailyBinaryCap", "Daily cap (0 = unlimited)", 0.0, None),
                FieldSchema::number("weeklyBinaryCap", "Weekly cap (0 = unlimited)", 0.0, None),
                FieldSchema::number(
                    "maxPercentFromOneLegForRank",
                    "Max rank volume from one leg (%)",
                    0.0,
                    Some(100.0),
                ),
                FieldSchema::number(
                    "minPersonalShareInWeakLeg",
                    "Min personal share in weak leg (%)",
                    0.0,
                    Some(100.0),
                ),
                FieldSchema::checkbox("requirePersonalsInEachLeg", "Require personals in each leg"),
                FieldSchema::checkbox("trackPersonalVsSpillover", "Track personal vs spillover"),
                FieldSchema::select(
                    "placementMode",
                    "Placement mode",
                    &[
                        ("auto_weak", "Auto (weak leg)"),
                        ("alternate", "Alternate"),
                        ("strict_left", "Strict left"),
                        ("strict_right", "Strict right"),
                    ],
                ),
                FieldSchema::select(
                    "spilloverMode",
                    "Spillover mode",
                    &[("bfs", "Breadth-first"), ("weak_leg_first", "Weak leg first")],
                ),
                FieldSchema::select(
                    "weakMetric",
                    "Weak leg metric",
                    &[("count", "Member count"), ("bv", "Business volume")],
                ),
                FieldSchema::select(
                    "tieBreaker",
                    "Tie breaker",
                    &[
                        ("left", "Left"),
                        ("right", "Right"),
                        ("stable_auto", "Stable hash"),
                    ],
                ),
                FieldSchema::select(
                    "alternateMode",
                    "Alternate mode",
                    &[
                        ("sponsor_history", "Sponsor history"),
                        ("stable_auto", "Stable hash"),
                    ],
                ),
                FieldSchema::integer("maxBfsVisited", "Spillover search budget", 1.0, None),
            ],
        },
    ]
}

/// 설정 맵을 모듈 스키마로 검증
///
/// 알려진 키: 타입 + 범위 검사. 모르는 키: 보존 (단, unilevel의
/// `planLevels`는 구조 검증). 스키마 통과 후 모듈별 교차 검증
/// (binary는 정책 전체를 한 번 구성해 봄)
pub fn validate_settings(
    descriptor: &ModuleDescriptor,
    settings: &BTreeMap<String, SettingValue>,
) -> Result<(), ModuleError> {
    for field in &descriptor.fields {
        let Some(value) = settings.get(field.key) else {
            continue;
        };
        match field.field_type {
            FieldType::Number => {
                let n = value.as_f64().ok_or_else(|| {
                    ModuleError::Invalid(format!("field '{}' must be a number", field.key))
                })?;
                if field.integer && n.fract() != 0.0 {
                    return Err(ModuleError::Invalid(format!(
                        "field '{}' must be an integer",
                        field.key
                    )));
                }
                if let Some(min) = field.min {
                    if n < min {
                        return Err(ModuleError::Invalid(format!(
                            "field '{}' must be >= {}",
                            field.key, min
                        )));
                    }
                }
                if let Some(max) = field.max {
                    if n > max {
                        return Err(ModuleError::Invalid(format!(
                            "field '{}' must be <= {}",
                            field.key, max
                        )));
                    }
                }
            }
            FieldType::Checkbox => {
                if value.as_bool().is_none() {
                    return Err(ModuleError::Invalid(format!(
                        "field '{}' must be a boolean",
                        field.key
                    )));
                }
            }
            FieldType::Select => {
                let text = value.as_str().ok_or_else(|| {
                    ModuleError::Invalid(format!("field '{}' must be a string", field.key))
                })?;
                if !field.options.iter().any(|o| o.value == text) {
                    return Err(ModuleError::Invalid(format!(
                        "field '{}': '{}' is not one of the allowed values",
                        field.key, text
                    )));
                }
            }
            FieldType::Text => {
                if value.as_str().is_none() {
                    return Err(ModuleError::Invalid(format!(
                        "field '{}' must be a string",
                        field.key
                    )));
                }
            }
        }
    }

    // 모듈별 교차 검증
    match descriptor.key {
        MODULE_UNILEVEL => {
            if let Some(plan_levels) = settings.get("planLevels") {
                unilevel::validate_plan_levels(plan_levels).map_err(ModuleError::Invalid)?;
            }
        }
        MODULE_BINARY => {
            BinaryPolicy::from_settings(settings)
                .map_err(|e| ModuleError::Invalid(e.to_string()))?;
        }
        _ => {}
    }

    Ok(())
}

/// 활성 모듈 레지스트리
pub struct ModuleRegistry {
    store: Arc<dyn PolicyStore>,
    descriptors: Vec<ModuleDescriptor>,
    enabled: Vec<String>,
}

impl ModuleRegistry {
    pub fn new(store: Arc<dyn PolicyStore>, enabled: Vec<String>) -> Self {
        Self {
            store,
            descriptors: builtin_modules(),
            enabled,
        }
    }

    pub fn enabled_keys(&self) -> &[String] {
        &self.enabled
    }

    fn descriptor(&self, key: &str) -> Result<&ModuleDescriptor, ModuleError> {
        let descriptor = self
            .descriptors
            .iter()
            .find(|d| d.key == key)
            .ok_or_else(|| ModuleError::UnknownModule(key.to_string()))?;
        if !self.enabled.iter().any(|k| k == key) {
            return Err(ModuleError::Disabled(key.to_string()));
        }
        Ok(descriptor)
    }

    /// 활성 모듈 전체의 스키마 + 현재 설정
    pub async fn list_modules(&self) -> Result<Vec<ModuleConfig>, ModuleError> {
        let mut configs = Vec::new();
        for key in self.enabled.clone() {
            if self.descriptors.iter().any(|d| d.key == key) {
                configs.push(self.module_config(&key).await?);
            }
        }
        Ok(configs)
    }

    /// 단일 모듈의 스키마 + 현재 설정
    ///
    /// unilevel은 읽기 시점에 레거시 형태(levelsPercent,
    /// maxDepth×bonusPercent)를 canonical `planLevels`로 변환해
    /// 새 버전으로 저장함 (write-on-read 마이그레이션)
    pub async fn module_config(&self, key: &str) -> Result<ModuleConfig, ModuleError> {
        let descriptor = self.descriptor(key)?;

        let record = self.store.get_module_settings(key).await?;
        let (mut settings, mut version) = match record {
            Some(rec) => (rec.settings_map().map_err(anyhow::Error::from)?, rec.version),
            None => (BTreeMap::new(), 0),
        };

        if key == MODULE_UNILEVEL {
            let plans = catalog::current_plans(self.store.as_ref()).await?;
            let (canonical, changed) = unilevel::canonical_settings(&settings, &plans);
            if changed {
                let json = serde_json::to_string(&canonical).map_err(anyhow::Error::from)?;
                let saved = self.store.put_module_settings(key, &json).await?;
                tracing::info!(
                    module = key,
                    version = saved.version,
                    "Migrated legacy unilevel settings to planLevels"
                );
                version = saved.version;
                settings = canonical;
            }
        }

        Ok(ModuleConfig {
            key: descriptor.key.to_string(),
            label: descriptor.label.to_string(),
            fields: descriptor.fields.clone(),
            settings,
            version,
        })
    }

    /// 모듈 설정 전체 교체 (검증 통과 시에만 저장)
    pub async fn save_settings(
        &self,
        key: &str,
        settings: BTreeMap<String, SettingValue>,
    ) -> Result<ModuleConfig, ModuleError> {
        let descriptor = self.descriptor(key)?;
        validate_settings(descriptor, &settings)?;

        let json = serde_json::to_string(&settings).map_err(anyhow::Error::from)?;
        let saved = self.store.put_module_settings(key, &json).await?;
        tracing::info!(module = key, version = saved.version, "Module settings saved");

        Ok(ModuleConfig {
            key: descriptor.key.to_string(),
            label: descriptor.label.to_string(),
            fields: descriptor.fields.clone(),
            settings,
            version: saved.version,
        })
    }
}
