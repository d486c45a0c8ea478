//! API Routes Module
//!
//! 모든 HTTP 엔드포인트 정의
//!
//! # Routes
//! - `/health` - 헬스 체크
//! - `/settings*` - 일반 설정 저장소
//! - `/payments/plans` - 플랜 카탈로그
//! - `/mlm-engine/*` - 모듈 구성, 배치, 지급
//! - `/ws` - WebSocket 이벤트 스트림

pub mod health;
pub mod mlm;
pub mod payout;
pub mod placement;
pub mod plans;
pub mod settings;
pub mod ws;
