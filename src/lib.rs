//! MLM Policy Engine API Library
//!
//! # Overview
//!
//! 추천/MLM SaaS 플랫폼의 백엔드 정책 엔진:
//! 버전 관리되는 설정 저장소, 플랜 카탈로그, 유니레벨/바이너리
//! 커미션 정책과 배치·지급 실행을 제공합니다.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Policy Engine API                    │
//! │                                                          │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌─────────┐    │
//! │  │ Routes  │  │Services │  │   DB    │  │  Types  │    │
//! │  └────┬────┘  └────┬────┘  └────┬────┘  └────┬────┘    │
//! │       │            │            │            │          │
//! │       └────────────┴────────────┴────────────┘          │
//! │                         │                                │
//! └─────────────────────────┼────────────────────────────────┘
//!                           │
//!                           ▼
//!                  ┌────────────────┐
//!                  │   PostgreSQL   │
//!                  └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: 에러 타입 및 처리
//! - `routes`: HTTP 엔드포인트 핸들러
//! - `services`: 비즈니스 로직 (카탈로그, 배치, 지급, 브로드캐스트)
//! - `db`: 데이터베이스 연동 (PolicyStore)
//! - `types`: 공통 타입 정의
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mlm_engine_api::{config::Config, db::Database};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Database::connect(&config.database_url).await?;
//!     db.run_migrations().await?;
//!
//!     // ... 서버 시작
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod db;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use error::ApiError;
pub use db::Database;
pub use db::repository::PolicyStore;
pub use services::{EngineHub, ModuleRegistry, PayoutRunner, PlacementService};

/// 애플리케이션 전역 상태
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PolicyStore>,
    pub modules: Arc<ModuleRegistry>,
    pub placement: Arc<PlacementService>,
    pub payouts: Arc<PayoutRunner>,
    pub hub: Arc<EngineHub>,
    pub config: Arc<Config>,
}
