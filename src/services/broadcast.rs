//! Engine Event Broadcast
//!
//! 관리자 세션 간 실시간 알림 (WebSocket)
//!
//! # Features
//! - 플랜 카탈로그 변경 알림
//! - 모듈 설정 변경 알림
//! - 배치/지급 이벤트 스트림
//!
//! # Design Decision
//!
//! 브로드캐스트는 순수하게 UI 신선도를 위한 best-effort.
//! 전달/순서/재시도 보장이 전혀 없으며, 정합성의 기준은 언제나
//! 서버 재조회. 따라서 send 실패(수신자 없음)는 전부 무시함

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

/// 엔진 이벤트 (송신)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EngineEvent {
    /// 플랜 카탈로그가 교체됨
    CatalogUpdated(CatalogUpdate),
    /// 모듈 설정이 새 버전으로 저장됨
    ModuleSettingsUpdated(ModuleSettingsUpdate),
    /// 신규 배치 확정
    PlacementRecorded(PlacementNotice),
    /// 주기 지급 원장 기록
    PayoutRecorded(PayoutNotice),
    /// 구독 확인
    Subscribed(SubscriptionConfirm),
    /// Heartbeat
    Ping,
    Pong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogUpdate {
    pub plan_count: usize,
    pub currency: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSettingsUpdate {
    pub module_key: String,
    pub version: i64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementNotice {
    pub user_id: String,
    pub parent_id: Option<String>,
    pub leg: Option<String>,
    pub via_spillover: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutNotice {
    pub user_id: String,
    pub period_kind: String,
    pub amount: f64,
    pub qualified: bool,
    pub timestamp: u64,
}

/// 구독 확인
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfirm {
    pub channel: String,
    pub subscribed: bool,
}

/// 연결 상태
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub connected_at: u64,
}

/// Engine Hub
///
/// 모든 WebSocket 연결과 이벤트 브로드캐스팅을 관리
///
/// # Architecture
/// ```text
/// ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
/// │  Session 1  │◀────│              │◀────│  settings /  │
/// ├─────────────┤     │  EngineHub   │     │  plans 저장   │
/// │  Session 2  │◀────│  (broadcast) │◀────│  placement / │
/// ├─────────────┤     │              │     │  payout 실행  │
/// │  Session 3  │◀────│              │     └──────────────┘
/// └─────────────┘     └──────────────┘
/// ```
pub struct EngineHub {
    /// 설정/카탈로그 변경 채널
    config_tx: broadcast::Sender<EngineEvent>,
    /// 배치/지급 이벤트 채널
    activity_tx: broadcast::Sender<EngineEvent>,
    /// 연결 정보
    connections: Arc<RwLock<HashMap<String, ConnectionInfo>>>,
}

impl EngineHub {
    pub fn new() -> Self {
        let (config_tx, _) = broadcast::channel(256);
        let (activity_tx, _) = broadcast::channel(1024);

        Self {
            config_tx,
            activity_tx,
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 카탈로그 변경 브로드캐스트
    pub fn broadcast_catalog(&self, update: CatalogUpdate) {
        let _ = self.config_tx.send(EngineEvent::CatalogUpdated(update));
    }

    /// 모듈 설정 변경 브로드캐스트
    pub fn broadcast_module_settings(&self, update: ModuleSettingsUpdate) {
        let _ = self
            .config_tx
            .send(EngineEvent::ModuleSettingsUpdated(update));
    }

    /// 배치 이벤트 브로드캐스트
    pub fn broadcast_placement(&self, notice: PlacementNotice) {
        let _ = self.activity_tx.send(EngineEvent::PlacementRecorded(notice));
    }

    /// 지급 이벤트 브로드캐스트
    pub fn broadcast_payout(&self, notice: PayoutNotice) {
        let _ = self.activity_tx.send(EngineEvent::PayoutRecorded(notice));
    }

    /// 설정 변경 채널 구독
    pub fn subscribe_config(&self) -> broadcast::Receiver<EngineEvent> {
        self.config_tx.subscribe()
    }

    /// 배치/지급 채널 구독
    pub fn subscribe_activity(&self) -> broadcast::Receiver<EngineEvent> {
        self.activity_tx.subscribe()
    }

    /// 연결 등록
    pub async fn register_connection(&self, id: String, info: ConnectionInfo) {
        let mut conns = self.connections.write().await;
        conns.insert(id, info);
    }

    /// 연결 해제
    pub async fn unregister_connection(&self, id: &str) {
        let mut conns = self.connections.write().await;
        conns.remove(id);
    }

    /// 활성 연결 수
    pub async fn active_connections(&self) -> usize {
        let conns = self.connections.read().await;
        conns.len()
    }
}

impl Default for EngineHub {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket 클라이언트 메시지 (수신)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientMessage {
    /// 채널 구독
    Subscribe { channel: String },
    /// 구독 취소
    Unsubscribe { channel: String },
    /// Ping (keepalive)
    Ping,
}

/// 클라이언트 메시지 파싱
pub fn parse_client_message(data: &str) -> Result<ClientMessage> {
    serde_json::from_str(data).map_err(Into::into)
}

/// 서버 메시지 직렬화
pub fn serialize_event(event: &EngineEvent) -> Result<String> {
    serde_json::to_string(event).map_err(Into::into)
}

pub fn now_unix() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hub_creation() {
        let hub = EngineHub::new();
        assert_eq!(hub.active_connections().await, 0);
    }

    #[tokio::test]
    async fn test_catalog_broadcast() {
        let hub = EngineHub::new();
        let mut rx = hub.subscribe_config();

        hub.broadcast_catalog(CatalogUpdate {
            plan_count: 4,
            currency: "EUR".to_string(),
            timestamp: 1234567890,
        });

        if let Ok(EngineEvent::CatalogUpdated(received)) = rx.recv().await {
            assert_eq!(received.plan_count, 4);
        } else {
            panic!("Expected CatalogUpdated event");
        }
    }

    #[tokio::test]
    async fn test_activity_channel_is_separate() {
        let hub = EngineHub::new();
        let mut config_rx = hub.subscribe_config();
        let mut activity_rx = hub.subscribe_activity();

        hub.broadcast_placement(PlacementNotice {
            user_id: "u1".to_string(),
            parent_id: Some("root".to_string()),
            leg: Some("left".to_string()),
            via_spillover: false,
            timestamp: 1234567890,
        });

        assert!(matches!(
            activity_rx.recv().await,
            Ok(EngineEvent::PlacementRecorded(_))
        ));
        // 설정 채널에는 배치 이벤트가 흐르지 않음
        assert!(config_rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_without_subscribers_is_silent() {
        let hub = EngineHub::new();
        // 수신자 0명이어도 패닉/에러 없음 (fire-and-forget)
        hub.broadcast_module_settings(ModuleSettingsUpdate {
            module_key: "binary".to_string(),
            version: 3,
            timestamp: 1234567890,
        });
    }

    #[test]
    fn test_event_serialization() {
        let json = serialize_event(&EngineEvent::Ping).unwrap();
        assert!(json.contains("Ping"));
    }

    #[test]
    fn test_client_message_parsing() {
        let json = r#"{"action":"Subscribe","channel":"config"}"#;
        let msg = parse_client_message(json).unwrap();

        if let ClientMessage::Subscribe { channel } = msg {
            assert_eq!(channel, "config");
        } else {
            panic!("Expected Subscribe message");
        }
    }
}
