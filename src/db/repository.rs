//! Policy Store Interface
//!
//! # Interview Q&A
//!
//! Q: 왜 trait로 추상화했는가?
//! A: 엔진 로직(배치/지급/검증)이 저장소 없이 테스트 가능해야 함
//!
//!    - 비즈니스 로직과 데이터 접근 분리
//!    - 테스트는 인메모리 Mock, 런타임은 PostgreSQL
//!    - 서비스 레이어는 `Arc<dyn PolicyStore>`만 알면 됨
//!
//! Q: 설정 버전은 어떻게 관리되는가?
//! A: 키별 단조 증가. 쓰기는 append(새 버전 insert), 읽기는 최신
//!    버전 조회. 지급 원장이 policy_version을 기록하므로 과거
//!    지급이 어떤 정책으로 계산됐는지 항상 재구성 가능

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use super::models::{
    LedgerRecord, ModuleSettingsRecord, PlacementRecord, SettingRecord, VolumeRecord,
};

/// 정책 엔진의 영속 계층 인터페이스
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// 키의 최신 설정 조회
    async fn get_setting(&self, key: &str) -> Result<Option<SettingRecord>>;

    /// 모든 키의 최신 설정 조회
    async fn list_settings(&self) -> Result<Vec<SettingRecord>>;

    /// 설정 쓰기 (전체 교체, 새 버전)
    async fn put_setting(&self, key: &str, value: &str) -> Result<SettingRecord>;

    /// 다중 키 설정의 원자적 쓰기
    ///
    /// 전부 성공하거나 전부 실패. catalog + currency + colors처럼
    /// 서로 정합성이 요구되는 키 묶음에 사용
    async fn put_settings_atomic(&self, entries: &[(String, String)])
        -> Result<Vec<SettingRecord>>;

    /// 모듈의 최신 설정 스냅샷 조회
    async fn get_module_settings(&self, module_key: &str) -> Result<Option<ModuleSettingsRecord>>;

    /// 모듈 설정 쓰기 (전체 교체, 새 버전)
    async fn put_module_settings(
        &self,
        module_key: &str,
        settings_json: &str,
    ) -> Result<ModuleSettingsRecord>;

    /// 배치 로그 추가 (append-only)
    async fn insert_placement(&self, record: &PlacementRecord) -> Result<()>;

    /// 전체 배치 로그 (created_at 오름차순 — 재생 순서)
    async fn load_placements(&self) -> Result<Vec<PlacementRecord>>;

    /// 일 단위 볼륨 버킷 upsert
    async fn upsert_volume(&self, record: &VolumeRecord) -> Result<()>;

    /// 전체 볼륨 버킷
    async fn load_volumes(&self) -> Result<Vec<VolumeRecord>>;

    /// 주기별 원장 엔트리 조회 (멱등성 검사)
    async fn get_ledger_entry(
        &self,
        user_id: &str,
        period_kind: &str,
        period_start: NaiveDate,
    ) -> Result<Option<LedgerRecord>>;

    /// 원장 엔트리 기록
    async fn insert_ledger_entry(&self, record: &LedgerRecord) -> Result<()>;

    /// [from, to) 구간에 시작하는 주기들의 지급 합계
    async fn ledger_paid_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<f64>;

    /// 연결 상태 확인
    async fn health_check(&self) -> Result<()>;
}

// PostgreSQL 구현은 db/mod.rs의 Database 구조체에 있음
// 테스트용 인메모리 구현:
