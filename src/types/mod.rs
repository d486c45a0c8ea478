//! Common Types Module
//!
//! 애플리케이션 전반에서 사용되는 공통 타입 정의

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// MLM 모듈 설정 값
///
/// # Design Decision
///
/// 설정 값은 런타임에 스키마 검증되는 태그드 variant로 표현
/// - 프론트엔드가 보내는 JSON 형태 그대로 수용 (string | number | boolean | list | map)
/// - opaque JSON을 정책 엔진 깊숙이 전달하지 않고 경계에서 타입 확정
/// - untagged 순서 주의: Bool → Number → Text (JSON 스칼라 모호성 방지)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<SettingValue>),
    Map(BTreeMap<String, SettingValue>),
}

impl SettingValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 숫자로만 이루어진 리스트면 Vec<f64>로 변환
    pub fn as_number_list(&self) -> Option<Vec<f64>> {
        match self {
            SettingValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.as_f64()?);
                }
                Some(out)
            }
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, SettingValue>> {
        match self {
            SettingValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn number_list(values: &[f64]) -> Self {
        SettingValue::List(values.iter().copied().map(SettingValue::Number).collect())
    }
}

/// 바이너리 트리의 다리 (LEFT / RIGHT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    Left,
    Right,
}

impl Leg {
    pub fn opposite(self) -> Self {
        match self {
            Leg::Left => Leg::Right,
            Leg::Right => Leg::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Leg::Left => "left",
            Leg::Right => "right",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "left" => Some(Leg::Left),
            "right" => Some(Leg::Right),
            _ => None,
        }
    }
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 정산 주기
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Day,
    Week,
}

impl PeriodKind {
    /// 주어진 날짜가 속한 주기의 시작일
    ///
    /// 주간 주기는 ISO 기준 월요일 시작
    pub fn period_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            PeriodKind::Day => date,
            PeriodKind::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
        }
    }

    /// 주기에 포함되는 일 수
    pub fn days(self) -> u32 {
        match self {
            PeriodKind::Day => 1,
            PeriodKind::Week => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PeriodKind::Day => "day",
            PeriodKind::Week => "week",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(PeriodKind::Day),
            "week" => Some(PeriodKind::Week),
            _ => None,
        }
    }
}

/// 퍼센트 커미션 계산 (최소 화폐 단위, round-half-up)
///
/// 반올림 규칙은 실행 간 드리프트를 막기 위해 고정:
/// 0.5는 항상 올림 (amount는 음수가 될 수 없음)
pub fn percent_of_minor(amount_minor: i64, percent: f64) -> i64 {
    let raw = amount_minor as f64 * percent / 100.0;
    (raw + 0.5).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_value_untagged_roundtrip() {
        let json = r#"{"pairVolume":50,"placementMode":"auto_weak","requirePersonalsInEachLeg":true,"planLevels":{"gold":[5,3,2]}}"#;
        let map: BTreeMap<String, SettingValue> = serde_json::from_str(json).unwrap();

        assert_eq!(map["pairVolume"].as_f64(), Some(50.0));
        assert_eq!(map["placementMode"].as_str(), Some("auto_weak"));
        assert_eq!(map["requirePersonalsInEachLeg"].as_bool(), Some(true));

        let levels = map["planLevels"].as_map().unwrap();
        assert_eq!(levels["gold"].as_number_list(), Some(vec![5.0, 3.0, 2.0]));

        // 직렬화 후 다시 파싱해도 같은 값
        let encoded = serde_json::to_string(&map).unwrap();
        let decoded: BTreeMap<String, SettingValue> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(map, decoded);
    }

    #[test]
    fn test_number_list_rejects_mixed() {
        let value: SettingValue = serde_json::from_str(r#"[5,"three",2]"#).unwrap();
        assert_eq!(value.as_number_list(), None);
    }

    #[test]
    fn test_leg_opposite() {
        assert_eq!(Leg::Left.opposite(), Leg::Right);
        assert_eq!(Leg::Right.opposite(), Leg::Left);
        assert_eq!(Leg::parse("left"), Some(Leg::Left));
        assert_eq!(Leg::parse("up"), None);
    }

    #[test]
    fn test_week_period_starts_monday() {
        // 2025-06-18은 수요일
        let wed = NaiveDate::from_ymd_opt(2025, 6, 18).unwrap();
        let monday = NaiveDate::from_ymd_opt(2025, 6, 16).unwrap();
        assert_eq!(PeriodKind::Week.period_start(wed), monday);
        assert_eq!(PeriodKind::Week.period_start(monday), monday);
        assert_eq!(PeriodKind::Day.period_start(wed), wed);
    }

    #[test]
    fn test_percent_round_half_up() {
        // 999 * 5% = 49.95 → 50
        assert_eq!(percent_of_minor(999, 5.0), 50);
        // 1000 * 2.5% = 25.0 → 25
        assert_eq!(percent_of_minor(1000, 2.5), 25);
        // 정확히 .5는 올림: 50 * 5% = 2.5 → 3
        assert_eq!(percent_of_minor(50, 5.0), 3);
        assert_eq!(percent_of_minor(0, 10.0), 0);
    }
}
