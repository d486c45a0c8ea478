//! MLM Policy Engine API Server
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Admin Dashboard (Frontend)                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum Web Server                         │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                      Routes Layer                        ││
//! │  │  /health  /settings*  /payments/plans  /mlm-engine/*    ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Services Layer                        ││
//! │  │  ModuleRegistry   PlacementService   PayoutRunner       ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Data Layer                            ││
//! │  │  PostgreSQL PolicyStore (versioned settings + ledger)   ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// 라이브러리에서 가져오기
use mlm_engine_api::{
    db::repository::PolicyStore,
    routes, AppState, Config, Database, EngineHub, ModuleRegistry, PayoutRunner, PlacementService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 로깅 초기화
    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "mlm_engine_api=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting MLM Policy Engine API Server");

    // 설정 로드
    let config = Config::from_env()?;
    tracing::info!("📋 Configuration loaded");

    // 데이터베이스 연결
    let db = Database::connect(&config.database_url).await?;
    tracing::info!("🗄️  Database connected");

    // 마이그레이션 실행
    db.run_migrations().await?;
    tracing::info!("📦 Migrations completed");

    let store: Arc<dyn PolicyStore> = Arc::new(db);

    // 배치 로그 재생으로 바이너리 트리 복원
    let placement = Arc::new(PlacementService::hydrate(store.clone()).await?);
    tracing::info!("🌳 Binary tree hydrated");

    // 모듈 레지스트리 + 지급 실행기
    let modules = Arc::new(ModuleRegistry::new(store.clone(), config.mlm_enabled.clone()));
    let payouts = Arc::new(PayoutRunner::new(store.clone(), placement.clone()));
    tracing::info!(enabled = ?config.mlm_enabled, "⚙️  MLM modules registered");

    // 이벤트 허브
    let hub = Arc::new(EngineHub::new());

    // 앱 상태 구성
    let state = AppState {
        store,
        modules,
        placement,
        payouts,
        hub,
        config: Arc::new(config.clone()),
    };

    // 라우터 구성
    let app = create_router(state);

    // 서버 시작
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🌐 Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// 라우터 생성
///
/// # Route Structure
///
/// ```text
/// GET  /health                              - 서버 상태 확인
///
/// GET  /settings                            - 전체 설정 (시크릿 마스킹)
/// GET  /settings/:key                       - 단일 설정
/// POST /settings                            - 설정 쓰기 (새 버전)
/// POST /settings/batch                      - 다중 키 원자적 쓰기
///
/// GET  /payments/plans                      - 플랜 카탈로그
///
/// GET  /mlm-engine/enabled                  - 활성 모듈 키
/// GET  /mlm-engine/modules                  - 전체 모듈 구성
/// GET  /mlm-engine/modules/:key             - 단일 모듈 구성
/// POST /mlm-engine/modules/settings         - 모듈 설정 교체
///
/// POST /mlm-engine/binary/placements           - 신규 가입자 배치
/// GET  /mlm-engine/binary/placements/:user_id  - 배치 조회
/// POST /mlm-engine/binary/volumes              - BV 발생 기록
/// POST /mlm-engine/binary/payouts/run          - 주기 지급 실행
/// POST /mlm-engine/unilevel/payouts/preview    - 커미션 미리보기
/// ```
fn create_router(state: AppState) -> Router {
    // CORS 설정
    // 프로덕션에서는 특정 도메인만 허용
    // 개발 환경에서는 localhost 허용
    let cors = if state.config.is_production() {
        // 프로덕션: 특정 도메인만 허용 (환경변수로 설정)
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "https://yourdomain.com".to_string());
        let origins: Vec<_> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        // 개발: localhost 허용
        CorsLayer::new()
            .allow_origin([
                "http://localhost:5173".parse().unwrap(),  // Vite dev server
                "http://localhost:3000".parse().unwrap(),  // Alternative
                "http://127.0.0.1:5173".parse().unwrap(),
            ])
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        // Health check
        .route("/health", get(routes::health::health_check))

        // Generic settings store
        .route("/settings", get(routes::settings::list_settings))
        .route("/settings", post(routes::settings::put_setting))
        .route("/settings/batch", post(routes::settings::put_settings_batch))
        .route("/settings/:key", get(routes::settings::get_setting))

        // Plan catalog
        .route("/payments/plans", get(routes::plans::get_plans))

        // MLM engine: module configuration
        .route("/mlm-engine/enabled", get(routes::mlm::get_enabled))
        .route("/mlm-engine/modules", get(routes::mlm::list_modules))
        .route("/mlm-engine/modules/settings", post(routes::mlm::save_module_settings))
        .route("/mlm-engine/modules/:key", get(routes::mlm::get_module))

        // MLM engine: placement & volumes
        .route("/mlm-engine/binary/placements", post(routes::placement::place_user))
        .route(
            "/mlm-engine/binary/placements/:user_id",
            get(routes::placement::get_placement),
        )
        .route("/mlm-engine/binary/volumes", post(routes::placement::record_volume))

        // MLM engine: payouts
        .route("/mlm-engine/binary/payouts/run", post(routes::payout::run_binary))
        .route(
            "/mlm-engine/unilevel/payouts/preview",
            post(routes::payout::preview_unilevel),
        )

        // WebSocket
        .route("/ws", get(routes::ws::ws_handler))

        // 미들웨어
        .layer(TraceLayer::new_for_http())
        .layer(cors)

        // 상태 주입
        .with_state(state)
}
