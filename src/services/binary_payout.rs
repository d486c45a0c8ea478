//! Binary Payout & Qualification
//!
//! 주기(일/주) 단위로 집계된 다리별 BV에서 바이너리 보너스를 계산
//!
//! ```text
//! weak/strong 판정 → 자격 게이트 → 페어 매칭 → 개인볼륨 감액 → 캡
//! ```
//!
//! # Design Decision
//!
//! 자격 미달은 에러가 아니라 정상적인 0원 결과. 감사 추적을 위해
//! 미달 사유까지 원장에 그대로 기록하며, 계산 실패(PayoutError)와는
//! 타입 수준에서 구분됨
//!
//! # Interview Q&A
//!
//! Q: 같은 주기를 두 번 실행하면 이중 지급되지 않나?
//! A: 원장이 (user, period_kind, period_start)로 키잉돼 있고,
//!    실행 전에 기존 엔트리를 조회해 있으면 그대로 반환.
//!    누적 가산이 아니라 조회-후-기록이라 재실행이 안전함

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::LedgerRecord;
use crate::db::repository::PolicyStore;
use crate::services::binary_policy::{BinaryPolicy, PolicyError};
use crate::services::catalog::Plan;
use crate::services::modules::{MODULE_BINARY, MODULE_UNILEVEL};
use crate::services::placement::PlacementService;
use crate::services::unilevel::{self, Commission, SponsorAncestor};
use crate::types::{Leg, PeriodKind, SettingValue};

/// 지급 계산 실패 (자격 미달과 다름)
#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("user '{0}' is not placed in the binary tree")]
    UnknownUser(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// 자격 게이트 미달 사유
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualificationFailure {
    InsufficientPersonals { have: u32, need: u32 },
    MissingPersonalInLeg { leg: Leg },
    WeakLegBelowMinimum { weak_bv: f64, required: f64 },
}

/// 어느 캡이 지급액을 잘랐는지
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapKind {
    Daily,
    Weekly,
}

/// 한 주기의 집계 입력
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryPayoutInput {
    pub left_bv: f64,
    pub right_bv: f64,
    /// 직접 추천인이 만든 볼륨 (스필오버 제외)
    pub left_personal_bv: f64,
    pub right_personal_bv: f64,
    pub active_personals: u32,
    pub personals_in_left: u32,
    pub personals_in_right: u32,
}

/// 페어 매칭 단계별 내역
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutBreakdown {
    pub weak_leg: Leg,
    pub weak_bv: f64,
    pub strong_bv: f64,
    /// ratio 캡 적용 후 인정되는 강한 다리 볼륨
    pub capped_strong: f64,
    pub matched: f64,
    pub pairs: u64,
    /// 캡/감액 전 보너스
    pub raw_bonus: f64,
    /// 약한 다리 내 개인 볼륨 비율 (0~1)
    pub personal_share: f64,
    pub after_personal_share: f64,
    pub cap_applied: Option<CapKind>,
    /// 최종 지급액 (통화 단위, 센트 반올림)
    pub payable: f64,
    /// 매칭되지 못한 강한 다리 잔여 볼륨 (보고용, 이월 적립 아님)
    pub carryover_strong: f64,
}

/// 한 주기의 계산 결과
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BinaryPayoutOutcome {
    Qualified(PayoutBreakdown),
    NotQualified { failures: Vec<QualificationFailure> },
}

impl BinaryPayoutOutcome {
    pub fn amount(&self) -> f64 {
        match self {
            Self::Qualified(breakdown) => breakdown.payable,
            Self::NotQualified { .. } => 0.0,
        }
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 주기 하나의 바이너리 보너스 계산 (순수 함수)
///
/// `prior_weekly_paid`: 같은 주에 이미 지급된 누적액 (주간 캡 판정용)
pub fn compute(
    policy: &BinaryPolicy,
    input: &BinaryPayoutInput,
    kind: PeriodKind,
    prior_weekly_paid: f64,
) -> BinaryPayoutOutcome {
    // 약한 다리 판정: BV가 적은 쪽, 동률이면 left
    let (weak_leg, weak_bv, strong_bv, weak_personal) = if input.left_bv <= input.right_bv {
        (Leg::Left, input.left_bv, input.right_bv, input.left_personal_bv)
    } else {
        (Leg::Right, input.right_bv, input.left_bv, input.right_personal_bv)
    };

    // ──────── 자격 게이트 ────────
    let mut failures = Vec::new();
    if input.active_personals < policy.min_active_personals {
        failures.push(QualificationFailure::InsufficientPersonals {
            have: input.active_personals,
            need: policy.min_active_personals,
        });
    }
    if policy.require_personals_in_each_leg {
        if input.personals_in_left == 0 {
            failures.push(QualificationFailure::MissingPersonalInLeg { leg: Leg::Left });
        }
        if input.personals_in_right == 0 {
            failures.push(QualificationFailure::MissingPersonalInLeg { leg: Leg::Right });
        }
    }
    // 일일 최소치는 주간 주기에서는 7일치로 환산
    let min_weak = policy.min_weak_leg_bv_per_day * f64::from(kind.days());
    if weak_bv < min_weak {
        failures.push(QualificationFailure::WeakLegBelowMinimum {
            weak_bv,
            required: min_weak,
        });
    }
    if !failures.is_empty() {
        return BinaryPayoutOutcome::NotQualified { failures };
    }

    // ──────── 페어 매칭 ────────
    let capped_strong = strong_bv.min(policy.carryover_max_ratio * weak_bv);
    let matched = weak_bv.min(capped_strong);
    let pairs = (matched / policy.pair_volume).floor() as u64;
    let raw_bonus = pairs as f64 * policy.pair_volume * policy.pair_percent / 100.0;

    // ──────── 개인 볼륨 비율 감액 ────────
    // 약한 다리 개인볼륨 비율이 기준 미달이면 비율만큼 선형 감액
    let personal_share = if weak_bv > 0.0 {
        weak_personal / weak_bv
    } else {
        0.0
    };
    let threshold = policy.min_personal_share_in_weak_leg / 100.0;
    let after_personal_share = if policy.track_personal_vs_spillover
        && threshold > 0.0
        && personal_share < threshold
    {
        raw_bonus * (personal_share / threshold)
    } else {
        raw_bonus
    };

    // ──────── 캡 ────────
    // 일일 캡 → 주간 캡 순서. 초과분은 소멸 (이월 없음)
    let mut payable = after_personal_share;
    let mut cap_applied = None;
    if kind == PeriodKind::Day && policy.daily_binary_cap > 0.0 && payable > policy.daily_binary_cap
    {
        payable = policy.daily_binary_cap;
        cap_applied = Some(CapKind::Daily);
    }
    if policy.weekly_binary_cap > 0.0 {
        let weekly_room = (policy.weekly_binary_cap - prior_weekly_paid).max(0.0);
        if payable > weekly_room {
            payable = weekly_room;
            cap_applied = Some(CapKind::Weekly);
        }
    }

    BinaryPayoutOutcome::Qualified(PayoutBreakdown {
        weak_leg,
        weak_bv,
        strong_bv,
        capped_strong,
        matched,
        pairs,
        raw_bonus,
        personal_share,
        after_personal_share: round_cents(after_personal_share),
        cap_applied,
        payable: round_cents(payable),
        carryover_strong: strong_bv - matched,
    })
}

/// 랭크 승급 볼륨 인정액
///
/// 한 다리에서 인정되는 볼륨은 필요 볼륨의
/// `maxPercentFromOneLegForRank`%까지
pub fn rank_volume_credit(
    policy: &BinaryPolicy,
    left_bv: f64,
    right_bv: f64,
    required_volume: f64,
) -> f64 {
    let per_leg_cap = required_volume * policy.max_percent_from_one_leg_for_rank / 100.0;
    left_bv.min(per_leg_cap) + right_bv.min(per_leg_cap)
}

/// 한 번의 주기 실행 결과
#[derive(Debug, Clone, Serialize)]
pub struct PayoutRun {
    pub user_id: String,
    pub period_kind: PeriodKind,
    pub period_start: NaiveDate,
    /// 계산에 사용된 정책 스냅샷 버전
    pub policy_version: i64,
    pub amount: f64,
    pub outcome: BinaryPayoutOutcome,
    /// true면 기존 원장 엔트리를 재반환한 것 (멱등 재실행)
    pub already_recorded: bool,
}

/// 주기 지급 실행기 (원장 멱등성 + 정책 스냅샷)
pub struct PayoutRunner {
    store: Arc<dyn PolicyStore>,
    placement: Arc<PlacementService>,
}

impl PayoutRunner {
    pub fn new(store: Arc<dyn PolicyStore>, placement: Arc<PlacementService>) -> Self {
        Self { store, placement }
    }

    /// 모듈 설정 스냅샷 로드 (없으면 기본 정책, 버전 0)
    async fn binary_policy_snapshot(
        &self,
    ) -> Result<(BinaryPolicy, i64), PayoutError> {
        match self.store.get_module_settings(MODULE_BINARY).await? {
            Some(record) => {
                let settings = record.settings_map().map_err(anyhow::Error::from)?;
                Ok((BinaryPolicy::from_settings(&settings)?, record.version))
            }
            None => Ok((BinaryPolicy::default(), 0)),
        }
    }

    /// 한 사용자의 한 주기 바이너리 지급 실행
    ///
    /// 같은 (user, kind, period_start) 재실행은 기존 원장 엔트리를
    /// 그대로 반환하며 절대 이중 기록하지 않음
    pub async fn run_binary(
        &self,
        user_id: &str,
        kind: PeriodKind,
        reference_date: NaiveDate,
    ) -> Result<PayoutRun, PayoutError> {
        if !self.placement.contains(user_id).await {
            return Err(PayoutError::UnknownUser(user_id.to_string()));
        }
        let period_start = kind.period_start(reference_date);

        if let Some(entry) = self
            .store
            .get_ledger_entry(user_id, kind.as_str(), period_start)
            .await?
        {
            let outcome: BinaryPayoutOutcome =
                serde_json::from_str(&entry.detail).map_err(anyhow::Error::from)?;
            return Ok(PayoutRun {
                user_id: user_id.to_string(),
                period_kind: kind,
                period_start,
                policy_version: entry.policy_version,
                amount: entry.amount,
                outcome,
                already_recorded: true,
            });
        }

        let (policy, policy_version) = self.binary_policy_snapshot().await?;

        let volumes = self
            .placement
            .period_volumes(user_id, kind, period_start)
            .await;
        let personals = self.placement.personals(user_id).await;
        let input = BinaryPayoutInput {
            left_bv: volumes.left_bv,
            right_bv: volumes.right_bv,
            left_personal_bv: volumes.left_personal_bv,
            right_personal_bv: volumes.right_personal_bv,
            active_personals: personals.active_personals,
            personals_in_left: personals.in_left,
            personals_in_right: personals.in_right,
        };

        // 주간 캡 판정: 같은 주에 이미 지급된 누적액
        let prior_weekly_paid = if policy.weekly_binary_cap > 0.0 {
            let week_start = PeriodKind::Week.period_start(reference_date);
            let week_end = week_start + chrono::Duration::days(7);
            self.store
                .ledger_paid_between(user_id, week_start, week_end)
                .await?
        } else {
            0.0
        };

        let outcome = compute(&policy, &input, kind, prior_weekly_paid);
        let amount = outcome.amount();

        let record = LedgerRecord {
            user_id: user_id.to_string(),
            period_kind: kind.as_str().to_string(),
            period_start,
            amount,
            policy_version,
            detail: serde_json::to_string(&outcome).map_err(anyhow::Error::from)?,
            created_at: chrono::Utc::now(),
        };
        self.store.insert_ledger_entry(&record).await?;

        tracing::info!(
            user = user_id,
            period = kind.as_str(),
            start = %period_start,
            amount,
            policy_version,
            qualified = matches!(outcome, BinaryPayoutOutcome::Qualified(_)),
            "Binary payout recorded"
        );

        Ok(PayoutRun {
            user_id: user_id.to_string(),
            period_kind: kind,
            period_start,
            policy_version,
            amount,
            outcome,
            already_recorded: false,
        })
    }

    /// 유니레벨 커미션 미리보기 (원장 기록 없음)
    ///
    /// 판매 금액(통화 최소 단위)과 스폰서 체인을 받아
    /// 레벨별 커미션을 계산
    pub async fn preview_unilevel(
        &self,
        plans: &[Plan],
        plan_id: &str,
        amount_minor: i64,
        chain: &[SponsorAncestor],
    ) -> Result<Vec<Commission>, PayoutError> {
        let settings = match self.store.get_module_settings(MODULE_UNILEVEL).await? {
            Some(record) => record.settings_map().map_err(anyhow::Error::from)?,
            None => BTreeMap::<String, SettingValue>::new(),
        };
        let levels = unilevel::effective_levels(&settings, plans, plan_id);
        Ok(unilevel::payout(amount_minor, &levels, chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::mock::MemoryStore;
    use crate::services::binary_policy::{PlacementMode, TieBreaker};

    fn input(left: f64, right: f64) -> BinaryPayoutInput {
        BinaryPayoutInput {
            left_bv: left,
            right_bv: right,
            left_personal_bv: left,
            right_personal_bv: right,
            active_personals: 2,
            personals_in_left: 1,
            personals_in_right: 1,
        }
    }

    fn breakdown(outcome: BinaryPayoutOutcome) -> PayoutBreakdown {
        match outcome {
            BinaryPayoutOutcome::Qualified(b) => b,
            BinaryPayoutOutcome::NotQualified { failures } => {
                panic!("expected qualified, got {:?}", failures)
            }
        }
    }

    #[test]
    fn test_pair_matching_reference_case() {
        // weak=120, strong=500, ratio=3, pairVolume=50, pairPercent=10
        let policy = BinaryPolicy {
            pair_volume: 50.0,
            pair_percent: 10.0,
            carryover_max_ratio: 3.0,
            min_active_personals: 0,
            ..BinaryPolicy::default()
        };
        let b = breakdown(compute(&policy, &input(120.0, 500.0), PeriodKind::Day, 0.0));

        assert_eq!(b.weak_leg, Leg::Left);
        assert_eq!(b.capped_strong, 360.0);
        assert_eq!(b.matched, 120.0);
        assert_eq!(b.pairs, 2);
        assert_eq!(b.payable, 10.0);
        assert_eq!(b.carryover_strong, 380.0);
    }

    #[test]
    fn test_weekly_cap_is_exact_ceiling() {
        let policy = BinaryPolicy {
            pair_volume: 50.0,
            pair_percent: 10.0,
            weekly_binary_cap: 100.0,
            min_active_personals: 0,
            ..BinaryPolicy::default()
        };
        // raw bonus = 2000/50 = 40 pairs → 200 > 100
        let b = breakdown(compute(&policy, &input(2000.0, 2000.0), PeriodKind::Week, 0.0));
        assert_eq!(b.payable, 100.0);
        assert_eq!(b.cap_applied, Some(CapKind::Weekly));

        // 이미 70 지급된 주 → 남은 30만
        let b = breakdown(compute(&policy, &input(2000.0, 2000.0), PeriodKind::Week, 70.0));
        assert_eq!(b.payable, 30.0);
    }

    #[test]
    fn test_daily_cap_applies_before_weekly() {
        let policy = BinaryPolicy {
            pair_volume: 50.0,
            pair_percent: 10.0,
            daily_binary_cap: 20.0,
            weekly_binary_cap: 100.0,
            min_active_personals: 0,
            ..BinaryPolicy::default()
        };
        let b = breakdown(compute(&policy, &input(2000.0, 2000.0), PeriodKind::Day, 0.0));
        assert_eq!(b.payable, 20.0);
        assert_eq!(b.cap_applied, Some(CapKind::Daily));

        // 주간 잔여가 일일 캡보다 작으면 주간 캡이 최종 천장
        let b = breakdown(compute(&policy, &input(2000.0, 2000.0), PeriodKind::Day, 95.0));
        assert_eq!(b.payable, 5.0);
        assert_eq!(b.cap_applied, Some(CapKind::Weekly));
    }

    #[test]
    fn test_qualification_failures_are_not_errors() {
        let policy = BinaryPolicy {
            min_active_personals: 3,
            require_personals_in_each_leg: true,
            min_weak_leg_bv_per_day: 50.0,
            ..BinaryPolicy::default()
        };
        let mut few = input(10.0, 500.0);
        few.active_personals = 1;
        few.personals_in_right = 0;

        let outcome = compute(&policy, &few, PeriodKind::Day, 0.0);
        assert_eq!(outcome.amount(), 0.0);
        match outcome {
            BinaryPayoutOutcome::NotQualified { failures } => {
                assert_eq!(failures.len(), 3);
                assert!(failures.iter().any(|f| matches!(
                    f,
                    QualificationFailure::InsufficientPersonals { have: 1, need: 3 }
                )));
                assert!(failures.iter().any(|f| matches!(
                    f,
                    QualificationFailure::MissingPersonalInLeg { leg: Leg::Right }
                )));
                assert!(failures
                    .iter()
                    .any(|f| matches!(f, QualificationFailure::WeakLegBelowMinimum { .. })));
            }
            BinaryPayoutOutcome::Qualified(_) => panic!("should not qualify"),
        }
    }

    #[test]
    fn test_weekly_period_scales_daily_minimum() {
        let policy = BinaryPolicy {
            min_weak_leg_bv_per_day: 10.0,
            min_active_personals: 0,
            ..BinaryPolicy::default()
        };
        // 주간 최소치는 70: 65는 미달, 70은 통과
        let outcome = compute(&policy, &input(65.0, 100.0), PeriodKind::Week, 0.0);
        assert!(matches!(outcome, BinaryPayoutOutcome::NotQualified { .. }));

        let outcome = compute(&policy, &input(70.0, 100.0), PeriodKind::Week, 0.0);
        assert!(matches!(outcome, BinaryPayoutOutcome::Qualified(_)));
    }

    #[test]
    fn test_personal_share_linear_scale_down() {
        let policy = BinaryPolicy {
            pair_volume: 50.0,
            pair_percent: 10.0,
            min_personal_share_in_weak_leg: 50.0,
            min_active_personals: 0,
            ..BinaryPolicy::default()
        };
        // 약한 다리 100 중 개인 25 → share 25% < 기준 50% → 절반 감액
        let mut spillover_heavy = input(100.0, 100.0);
        spillover_heavy.left_personal_bv = 25.0;

        let b = breakdown(compute(&policy, &spillover_heavy, PeriodKind::Day, 0.0));
        assert_eq!(b.raw_bonus, 10.0);
        assert_eq!(b.personal_share, 0.25);
        assert_eq!(b.payable, 5.0);

        // 추적 비활성화 시 감액 없음
        let no_track = BinaryPolicy {
            track_personal_vs_spillover: false,
            ..policy
        };
        let b = breakdown(compute(&no_track, &spillover_heavy, PeriodKind::Day, 0.0));
        assert_eq!(b.payable, 10.0);
    }

    #[test]
    fn test_weak_leg_tie_goes_left() {
        let policy = BinaryPolicy {
            min_active_personals: 0,
            ..BinaryPolicy::default()
        };
        let b = breakdown(compute(&policy, &input(300.0, 300.0), PeriodKind::Day, 0.0));
        assert_eq!(b.weak_leg, Leg::Left);
    }

    #[test]
    fn test_rank_volume_credit_caps_single_leg() {
        let policy = BinaryPolicy {
            max_percent_from_one_leg_for_rank: 60.0,
            ..BinaryPolicy::default()
        };
        // 필요 1000, 한 다리 최대 600 인정
        let credit = rank_volume_credit(&policy, 900.0, 300.0, 1000.0);
        assert_eq!(credit, 900.0);

        let lopsided = rank_volume_credit(&policy, 2000.0, 0.0, 1000.0);
        assert_eq!(lopsided, 600.0);
    }

    async fn runner_fixture() -> (Arc<MemoryStore>, PayoutRunner) {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn PolicyStore> = store.clone();
        let placement = Arc::new(PlacementService::hydrate(dyn_store.clone()).await.unwrap());

        let p = BinaryPolicy {
            placement_mode: PlacementMode::StrictLeft,
            tie_breaker: TieBreaker::Left,
            ..BinaryPolicy::default()
        };
        placement.place("root", None, &p).await.unwrap();
        placement.place("a", Some("root"), &p).await.unwrap();
        placement.place("b", Some("root"), &p).await.unwrap();
        placement
            .record_volume("a", 500.0, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap())
            .await
            .unwrap();
        placement
            .record_volume("b", 120.0, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap())
            .await
            .unwrap();

        let runner = PayoutRunner::new(dyn_store, placement);
        (store, runner)
    }

    #[tokio::test]
    async fn test_runner_is_idempotent_per_period() {
        let (_store, runner) = runner_fixture().await;
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();

        let first = runner
            .run_binary("root", PeriodKind::Day, day)
            .await
            .unwrap();
        assert!(!first.already_recorded);
        // 기본 정책: pairVolume 100, pairPercent 10, ratio 2
        // weak=120 → capped strong 240, matched 120, 1 pair → 10.0
        assert_eq!(first.amount, 10.0);

        let replay = runner
            .run_binary("root", PeriodKind::Day, day)
            .await
            .unwrap();
        assert!(replay.already_recorded);
        assert_eq!(replay.amount, 10.0);
        assert_eq!(replay.policy_version, first.policy_version);
    }

    #[tokio::test]
    async fn test_runner_records_not_qualified_for_audit() {
        let (store, runner) = runner_fixture().await;
        // 볼륨 없는 날 → weak=0, 페어 0이지만 자격은 통과 (기본 게이트 충족)
        // 자격 미달을 만들려면 직접 추천인 기준을 올린 설정 저장
        store
            .put_module_settings(
                MODULE_BINARY,
                &serde_json::to_string(&serde_json::json!({ "minActivePersonals": 5 })).unwrap(),
            )
            .await
            .unwrap();

        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let run = runner
            .run_binary("root", PeriodKind::Day, day)
            .await
            .unwrap();
        assert_eq!(run.amount, 0.0);
        assert!(matches!(
            run.outcome,
            BinaryPayoutOutcome::NotQualified { .. }
        ));

        // 미달 결과도 원장에 남아 멱등성이 유지됨
        let replay = runner
            .run_binary("root", PeriodKind::Day, day)
            .await
            .unwrap();
        assert!(replay.already_recorded);
    }

    #[tokio::test]
    async fn test_runner_unknown_user() {
        let (_store, runner) = runner_fixture().await;
        let err = runner
            .run_binary("ghost", PeriodKind::Day, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, PayoutError::UnknownUser(_)));
    }
}
