//! Plan Catalog Service
//!
//! 플랜 카탈로그는 설정 저장소의 well-known 키 아래 JSON으로 보관됨
//! - `plans.catalog`: 플랜 배열 (전체 교체 저장, per-plan 패치 없음)
//! - `plans.colors`: 플랜 id → 표시 색상 맵
//! - `plans.currency`: 카탈로그 전체에 적용되는 단일 통화 코드
//!
//! # Invariants
//!
//! - 플랜 id는 카탈로그 안에서 유일
//! - name은 비어 있을 수 없음
//! - amount는 최소 화폐 단위 정수, 음수 금지
//! - 한 카탈로그 버전의 통화는 단일 (혼합 통화 저장 거부)
//!
//! 클라이언트 검증은 신뢰하지 않으므로 저장 경로에서 전부 재검증

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::repository::PolicyStore;

/// 카탈로그가 저장되는 설정 키
pub const KEY_CATALOG: &str = "plans.catalog";
/// 플랜 색상 맵 키
pub const KEY_COLORS: &str = "plans.colors";
/// 카탈로그 통화 키
pub const KEY_CURRENCY: &str = "plans.currency";

/// 구매 가능한 플랜
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// 안정 식별자 (결제 기록이 참조)
    pub id: String,
    pub name: String,
    /// 최소 화폐 단위 (센트)
    pub amount: i64,
    /// ISO 4217 통화 코드
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    /// 표시 힌트 (선택)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// 카탈로그 검증 실패
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog JSON is invalid: {0}")]
    Json(String),

    #[error("duplicate plan id '{0}'")]
    DuplicateId(String),

    #[error("plan '{0}' has an empty name")]
    EmptyName(String),

    #[error("plan '{0}' has a negative amount")]
    NegativeAmount(String),

    #[error("catalog mixes currencies ('{0}' vs '{1}'); one currency per catalog version")]
    MixedCurrency(String, String),

    #[error("'{0}' is not a valid ISO 4217 currency code")]
    InvalidCurrency(String),
}

/// 기본 카탈로그 (설정 저장소가 비어 있을 때)
pub fn default_catalog() -> Vec<Plan> {
    vec![
        Plan {
            id: "bronze".to_string(),
            name: "Bronze".to_string(),
            amount: 1900,
            currency: "EUR".to_string(),
            description: Some("Ideal for freelancers and mini teams.".to_string()),
            features: vec![
                "1 project".to_string(),
                "Basic analytics".to_string(),
                "Email support".to_string(),
            ],
            color: None,
        },
        Plan {
            id: "silver".to_string(),
            name: "Silver".to_string(),
            amount: 4900,
            currency: "EUR".to_string(),
            description: Some("For teams that grow steadily.".to_string()),
            features: vec![
                "5 projects".to_string(),
                "Advanced analytics".to_string(),
                "Priority support".to_string(),
            ],
            color: None,
        },
        Plan {
            id: "gold".to_string(),
            name: "Gold".to_string(),
            amount: 9900,
            currency: "EUR".to_string(),
            description: Some("Optimized for agencies and startups.".to_string()),
            features: vec![
                "Unlimited projects".to_string(),
                "Automation tools".to_string(),
                "Account manager".to_string(),
            ],
            color: None,
        },
        Plan {
            id: "brilliant".to_string(),
            name: "Brilliant".to_string(),
            amount: 19900,
            currency: "EUR".to_string(),
            description: Some("Complete toolkit for enterprises.".to_string()),
            features: vec![
                "All Pro features".to_string(),
                "99.9% SLA".to_string(),
                "Custom onboarding".to_string(),
            ],
            color: None,
        },
    ]
}

/// JSON 문자열 파싱 + 전체 검증
pub fn parse_and_validate(raw: &str) -> Result<Vec<Plan>, CatalogError> {
    let plans: Vec<Plan> =
        serde_json::from_str(raw).map_err(|e| CatalogError::Json(e.to_string()))?;
    validate(&plans)?;
    Ok(plans)
}

/// 카탈로그 불변 조건 검증 (저장 전에 반드시 호출)
pub fn validate(plans: &[Plan]) -> Result<(), CatalogError> {
    let mut seen = std::collections::HashSet::new();
    let mut currency: Option<&str> = None;

    for plan in plans {
        if !seen.insert(plan.id.as_str()) {
            return Err(CatalogError::DuplicateId(plan.id.clone()));
        }
        if plan.name.trim().is_empty() {
            return Err(CatalogError::EmptyName(plan.id.clone()));
        }
        if plan.amount < 0 {
            return Err(CatalogError::NegativeAmount(plan.id.clone()));
        }
        if !is_currency_code(&plan.currency) {
            return Err(CatalogError::InvalidCurrency(plan.currency.clone()));
        }
        match currency {
            None => currency = Some(&plan.currency),
            Some(existing) if existing != plan.currency => {
                return Err(CatalogError::MixedCurrency(
                    existing.to_string(),
                    plan.currency.clone(),
                ));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// ISO 4217 형태 검사 (대문자 ASCII 3글자)
pub fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// 현재 카탈로그 조회
///
/// `plans.catalog`가 없으면 기본 카탈로그를 반환하고,
/// `plans.colors` / `plans.currency` 오버레이를 적용
pub async fn current_plans(store: &dyn PolicyStore) -> anyhow::Result<Vec<Plan>> {
    let mut plans = match store.get_setting(KEY_CATALOG).await? {
        Some(entry) => parse_and_validate(&entry.value)
            .map_err(|e| anyhow::anyhow!("stored catalog is invalid: {}", e))?,
        None => default_catalog(),
    };

    if let Some(entry) = store.get_setting(KEY_COLORS).await? {
        if let Ok(colors) =
            serde_json::from_str::<std::collections::HashMap<String, String>>(&entry.value)
        {
            for plan in &mut plans {
                if let Some(color) = colors.get(&plan.id) {
                    plan.color = Some(color.clone());
                }
            }
        } else {
            // 색상 맵이 깨져 있어도 카탈로그 조회는 막지 않음
            tracing::warn!("plans.colors is not a valid string map; ignoring");
        }
    }

    if let Some(entry) = store.get_setting(KEY_CURRENCY).await? {
        let code = entry.value.trim().to_uppercase();
        if is_currency_code(&code) {
            for plan in &mut plans {
                plan.currency = code.clone();
            }
        } else {
            tracing::warn!(code = %entry.value, "plans.currency is not a valid code; ignoring");
        }
    }

    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::mock::MemoryStore;

    fn plan(id: &str, name: &str, amount: i64, currency: &str) -> Plan {
        Plan {
            id: id.to_string(),
            name: name.to_string(),
            amount,
            currency: currency.to_string(),
            description: None,
            features: vec![],
            color: None,
        }
    }

    #[test]
    fn test_default_catalog_is_valid() {
        let plans = default_catalog();
        assert_eq!(plans.len(), 4);
        validate(&plans).unwrap();
        assert_eq!(plans[2].id, "gold");
        assert_eq!(plans[2].amount, 9900);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        // 같은 id "gold"가 두 번 → 저장 전에 거부
        let plans = vec![
            plan("gold", "Gold", 9900, "EUR"),
            plan("gold", "Gold Plus", 19900, "EUR"),
        ];
        assert!(matches!(
            validate(&plans),
            Err(CatalogError::DuplicateId(id)) if id == "gold"
        ));
    }

    #[test]
    fn test_empty_name_rejected() {
        let plans = vec![plan("bronze", "   ", 1900, "EUR")];
        assert!(matches!(validate(&plans), Err(CatalogError::EmptyName(_))));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let plans = vec![plan("bronze", "Bronze", -100, "EUR")];
        assert!(matches!(
            validate(&plans),
            Err(CatalogError::NegativeAmount(_))
        ));
    }

    #[test]
    fn test_mixed_currency_rejected() {
        let plans = vec![
            plan("bronze", "Bronze", 1900, "EUR"),
            plan("silver", "Silver", 4900, "USD"),
        ];
        assert!(matches!(
            validate(&plans),
            Err(CatalogError::MixedCurrency(_, _))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_json() {
        assert!(matches!(
            parse_and_validate("not json"),
            Err(CatalogError::Json(_))
        ));
    }

    #[test]
    fn test_currency_code_shape() {
        assert!(is_currency_code("EUR"));
        assert!(is_currency_code("USD"));
        assert!(!is_currency_code("eur"));
        assert!(!is_currency_code("EURO"));
        assert!(!is_currency_code(""));
    }

    #[tokio::test]
    async fn test_current_plans_applies_overlays() {
        let store = MemoryStore::new();
        store
            .put_setting(
                KEY_CATALOG,
                r#"[{"id":"gold","name":"Gold","amount":9900,"currency":"EUR"}]"#,
            )
            .await
            .unwrap();
        store
            .put_setting(KEY_COLORS, r##"{"gold":"#ffd700"}"##)
            .await
            .unwrap();
        store.put_setting(KEY_CURRENCY, "USD").await.unwrap();

        let plans = current_plans(&store).await.unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].color.as_deref(), Some("#ffd700"));
        assert_eq!(plans[0].currency, "USD");
    }

    #[tokio::test]
    async fn test_current_plans_falls_back_to_default() {
        let store = MemoryStore::new();
        let plans = current_plans(&store).await.unwrap();
        assert_eq!(plans.len(), 4);
        assert_eq!(plans[0].id, "bronze");
    }
}
