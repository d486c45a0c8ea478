//! Payout Endpoints
//!
//! # Endpoints
//! - `POST /mlm-engine/binary/payouts/run` - 주기 바이너리 지급 실행
//! - `POST /mlm-engine/unilevel/payouts/preview` - 유니레벨 커미션 미리보기

use axum::{extract::State, Json};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::services::binary_payout::{BinaryPayoutOutcome, PayoutRun};
use crate::services::broadcast::{now_unix, PayoutNotice};
use crate::services::catalog;
use crate::services::unilevel::{Commission, SponsorAncestor};
use crate::types::PeriodKind;
use crate::AppState;

// ============ Request/Response Types ============

#[derive(Debug, Deserialize)]
pub struct RunBinaryRequest {
    pub user_id: String,
    /// `day` 또는 `week`
    pub period: String,
    /// 주기를 포함하는 임의의 날짜. 없으면 오늘 (UTC)
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct UnilevelPreviewRequest {
    pub plan_id: String,
    /// 결제 금액 (통화 최소 단위)
    pub amount_minor: i64,
    /// S1(직접 스폰서)부터의 조상 체인
    pub chain: Vec<SponsorAncestor>,
}

#[derive(Debug, Serialize)]
pub struct UnilevelPreviewResponse {
    pub plan_id: String,
    pub commissions: Vec<Commission>,
    /// 레벨별 지급 합계 (최소 단위)
    pub total_minor: i64,
}

// ============ Handlers ============

/// POST /mlm-engine/binary/payouts/run
///
/// 한 사용자의 한 주기를 실행. 같은 주기 재호출은 기존 원장
/// 엔트리를 반환하며 이중 지급하지 않음
pub async fn run_binary(
    State(state): State<AppState>,
    Json(req): Json<RunBinaryRequest>,
) -> Result<Json<PayoutRun>, ApiError> {
    let kind = PeriodKind::parse(&req.period).ok_or_else(|| {
        ApiError::ValidationError(format!("period must be 'day' or 'week', got '{}'", req.period))
    })?;
    let date = req.date.unwrap_or_else(|| chrono::Utc::now().date_naive());

    let run = state.payouts.run_binary(&req.user_id, kind, date).await?;

    if !run.already_recorded {
        state.hub.broadcast_payout(PayoutNotice {
            user_id: run.user_id.clone(),
            period_kind: run.period_kind.as_str().to_string(),
            amount: run.amount,
            qualified: matches!(run.outcome, BinaryPayoutOutcome::Qualified(_)),
            timestamp: now_unix(),
        });
    }

    Ok(Json(run))
}

/// POST /mlm-engine/unilevel/payouts/preview
///
/// 원장 기록 없이 레벨별 커미션만 계산. 플랜이 카탈로그에
/// 없으면 404
pub async fn preview_unilevel(
    State(state): State<AppState>,
    Json(req): Json<UnilevelPreviewRequest>,
) -> Result<Json<UnilevelPreviewResponse>, ApiError> {
    if req.amount_minor < 0 {
        return Err(ApiError::ValidationError(
            "amount_minor must be >= 0".to_string(),
        ));
    }

    let plans = catalog::current_plans(state.store.as_ref()).await?;
    if !plans.iter().any(|p| p.id == req.plan_id) {
        return Err(ApiError::NotFound(format!("plan {}", req.plan_id)));
    }

    let commissions = state
        .payouts
        .preview_unilevel(&plans, &req.plan_id, req.amount_minor, &req.chain)
        .await?;
    let total_minor = commissions.iter().map(|c| c.amount).sum();

    Ok(Json(UnilevelPreviewResponse {
        plan_id: req.plan_id,
        commissions,
        total_minor,
    }))
}
