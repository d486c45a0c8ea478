//! Services Module
//!
//! 정책 엔진의 비즈니스 로직 레이어
//!
//! # Services
//! - `catalog`: 플랜 카탈로그 검증/조회
//! - `unilevel`: 유니레벨 레벨 테이블 + 커미션 계산
//! - `binary_policy`: binary 모듈 설정의 강타입 정책
//! - `placement`: 바이너리 트리 배치 엔진
//! - `binary_payout`: 페어 매칭 / 자격 / 캡 / 지급 원장
//! - `modules`: 모듈 레지스트리 (스키마 + 설정 검증)
//! - `broadcast`: 세션 간 이벤트 허브

pub mod binary_payout;
pub mod binary_policy;
pub mod broadcast;
pub mod catalog;
pub mod modules;
pub mod placement;
pub mod unilevel;

pub use binary_payout::{BinaryPayoutOutcome, PayoutRunner};
pub use binary_policy::BinaryPolicy;
pub use broadcast::{EngineEvent, EngineHub};
pub use catalog::Plan;
pub use modules::{ModuleConfig, ModuleRegistry};
pub use placement::{Placement, PlacementService};
