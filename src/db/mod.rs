//! Database Module
//!
//! # Interview Q&A
//!
//! Q: 설정을 UPDATE하지 않고 매번 INSERT하는 이유는?
//! A: append-only 버전 이력
//!
//!    1. 지급 원장이 policy_version을 참조 — 과거 지급의 근거 정책을
//!       언제든 재구성 가능
//!    2. 쓰기 경합 시에도 덮어쓰기 유실이 없음
//!    3. 읽기는 키별 최신 버전만 (DISTINCT ON / ORDER BY version DESC)
//!
//! Q: 커넥션 풀은 어떻게 관리하는가?
//! A: SQLx의 PgPool 사용
//!    - 최소/최대 커넥션 수 설정
//!    - 커넥션 재사용 (오버헤드 감소)
//!    - 자동 health check
//!    - 타임아웃 처리

pub mod models;
pub mod repository;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{postgres::PgPoolOptions, PgPool};

use models::{LedgerRecord, ModuleSettingsRecord, PlacementRecord, SettingRecord, VolumeRecord};
use repository::PolicyStore;

/// 데이터베이스 연결 및 쿼리 담당
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 10 (트래픽에 따라 조정)
    /// - min_connections: 1 (idle 시 최소 유지)
    /// - acquire_timeout: 3초 (커넥션 획득 대기)
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for Database {
    async fn get_setting(&self, key: &str) -> Result<Option<SettingRecord>> {
        let record = sqlx::query_as::<_, SettingRecord>(
            r#"
            SELECT key, value, version, created_at
            FROM settings
            WHERE key = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_settings(&self) -> Result<Vec<SettingRecord>> {
        let records = sqlx::query_as::<_, SettingRecord>(
            r#"
            SELECT DISTINCT ON (key) key, value, version, created_at
            FROM settings
            ORDER BY key, version DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<SettingRecord> {
        // 키별 MAX+1 버전으로 append
        let record = sqlx::query_as::<_, SettingRecord>(
            r#"
            INSERT INTO settings (key, value, version)
            SELECT $1::text, $2::text, COALESCE(MAX(version), 0) + 1
            FROM settings
            WHERE key = $1
            RETURNING key, value, version, created_at
            "#,
        )
        .bind(key)
        .bind(value)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn put_settings_atomic(
        &self,
        entries: &[(String, String)],
    ) -> Result<Vec<SettingRecord>> {
        // 묶음 전체가 하나의 트랜잭션 — 부분 성공 없음
        let mut tx = self.pool.begin().await?;
        let mut records = Vec::with_capacity(entries.len());

        for (key, value) in entries {
            let record = sqlx::query_as::<_, SettingRecord>(
                r#"
                INSERT INTO settings (key, value, version)
                SELECT $1::text, $2::text, COALESCE(MAX(version), 0) + 1
                FROM settings
                WHERE key = $1
                RETURNING key, value, version, created_at
                "#,
            )
            .bind(key)
            .bind(value)
            .fetch_one(&mut *tx)
            .await?;
            records.push(record);
        }

        tx.commit().await?;
        Ok(records)
    }

    async fn get_module_settings(&self, module_key: &str) -> Result<Option<ModuleSettingsRecord>> {
        let record = sqlx::query_as::<_, ModuleSettingsRecord>(
            r#"
            SELECT module_key, settings, version, created_at
            FROM mlm_module_settings
            WHERE module_key = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(module_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn put_module_settings(
        &self,
        module_key: &str,
        settings_json: &str,
    ) -> Result<ModuleSettingsRecord> {
        let record = sqlx::query_as::<_, ModuleSettingsRecord>(
            r#"
            INSERT INTO mlm_module_settings (module_key, settings, version)
            SELECT $1::text, $2::text, COALESCE(MAX(version), 0) + 1
            FROM mlm_module_settings
            WHERE module_key = $1
            RETURNING module_key, settings, version, created_at
            "#,
        )
        .bind(module_key)
        .bind(settings_json)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_placement(&self, record: &PlacementRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO binary_placements (
                user_id, sponsor_id, parent_id, leg, via_spillover, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.sponsor_id)
        .bind(&record.parent_id)
        .bind(&record.leg)
        .bind(record.via_spillover)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_placements(&self) -> Result<Vec<PlacementRecord>> {
        // 재생 순서 = 삽입 순서
        let records = sqlx::query_as::<_, PlacementRecord>(
            r#"
            SELECT user_id, sponsor_id, parent_id, leg, via_spillover, created_at
            FROM binary_placements
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn upsert_volume(&self, record: &VolumeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO binary_volumes (
                user_id, day, left_bv, right_bv, left_personal_bv, right_personal_bv
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, day)
            DO UPDATE SET
                left_bv = EXCLUDED.left_bv,
                right_bv = EXCLUDED.right_bv,
                left_personal_bv = EXCLUDED.left_personal_bv,
                right_personal_bv = EXCLUDED.right_personal_bv
            "#,
        )
        .bind(&record.user_id)
        .bind(record.day)
        .bind(record.left_bv)
        .bind(record.right_bv)
        .bind(record.left_personal_bv)
        .bind(record.right_personal_bv)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_volumes(&self) -> Result<Vec<VolumeRecord>> {
        let records = sqlx::query_as::<_, VolumeRecord>(
            r#"
            SELECT user_id, day, left_bv, right_bv, left_personal_bv, right_personal_bv
            FROM binary_volumes
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn get_ledger_entry(
        &self,
        user_id: &str,
        period_kind: &str,
        period_start: NaiveDate,
    ) -> Result<Option<LedgerRecord>> {
        let record = sqlx::query_as::<_, LedgerRecord>(
            r#"
            SELECT user_id, period_kind, period_start, amount, policy_version, detail, created_at
            FROM payout_ledger
            WHERE user_id = $1 AND period_kind = $2 AND period_start = $3
            "#,
        )
        .bind(user_id)
        .bind(period_kind)
        .bind(period_start)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_ledger_entry(&self, record: &LedgerRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payout_ledger (
                user_id, period_kind, period_start, amount, policy_version, detail, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.period_kind)
        .bind(record.period_start)
        .bind(record.amount)
        .bind(record.policy_version)
        .bind(&record.detail)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ledger_paid_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<f64> {
        let total: (f64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(amount), 0)::double precision
            FROM payout_ledger
            WHERE user_id = $1 AND period_start >= $2 AND period_start < $3
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(total.0)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
