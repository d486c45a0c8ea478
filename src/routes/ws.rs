//! WebSocket Routes
//!
//! 관리자 세션 간 실시간 이벤트 스트리밍
//!
//! # Endpoints
//! - `GET /ws` - WebSocket 연결

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{error::RecvError, Receiver};

use crate::services::broadcast::{
    parse_client_message, serialize_event, ClientMessage, ConnectionInfo, EngineEvent, EngineHub,
};
use crate::AppState;

/// WebSocket 업그레이드 핸들러
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// WebSocket 연결 처리
async fn handle_socket(socket: WebSocket, hub: Arc<EngineHub>) {
    let (mut sender, mut receiver) = socket.split();

    // 두 이벤트 채널 모두 구독
    let mut config_rx = hub.subscribe_config();
    let mut activity_rx = hub.subscribe_activity();

    // 연결 ID 생성
    let conn_id = uuid::Uuid::new_v4().to_string();

    hub.register_connection(
        conn_id.clone(),
        ConnectionInfo {
            id: conn_id.clone(),
            connected_at: crate::services::broadcast::now_unix(),
        },
    )
    .await;
    tracing::debug!(conn = %conn_id, "WebSocket connected");

    // 수신 태스크
    let conn_id_clone = conn_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Ok(client_msg) = parse_client_message(&text) {
                        handle_client_message(&conn_id_clone, client_msg);
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // 송신 태스크
    let send_task = tokio::spawn(async move {
        while let Some(event) = next_event(&mut config_rx, &mut activity_rx).await {
            let Ok(json) = serialize_event(&event) else {
                continue;
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // 연결이 종료될 때까지 대기
    tokio::select! {
        _ = recv_task => {}
        _ = send_task => {}
    }

    hub.unregister_connection(&conn_id).await;
    tracing::debug!(conn = %conn_id, "WebSocket disconnected");
}

/// 두 브로드캐스트 채널에서 다음 이벤트 수신
///
/// Lagged는 best-effort 드롭이므로 건너뛰고 계속 수신.
/// None은 허브가 닫혔다는 뜻이며, 그때만 연결이 종료됨
async fn next_event(
    config_rx: &mut Receiver<EngineEvent>,
    activity_rx: &mut Receiver<EngineEvent>,
) -> Option<EngineEvent> {
    loop {
        let result = tokio::select! {
            r = config_rx.recv() => r,
            r = activity_rx.recv() => r,
        };
        match result {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "broadcast receiver lagged, continuing");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

/// 클라이언트 메시지 처리
fn handle_client_message(conn_id: &str, msg: ClientMessage) {
    match msg {
        ClientMessage::Subscribe { channel } => {
            tracing::info!("Connection {} subscribed to {}", conn_id, channel);
        }
        ClientMessage::Unsubscribe { channel } => {
            tracing::info!("Connection {} unsubscribed from {}", conn_id, channel);
        }
        ClientMessage::Ping => {
            // keepalive, 응답 불필요
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lagged_receiver_keeps_receiving() {
        let (config_tx, mut config_rx) = tokio::sync::broadcast::channel(2);
        let (activity_tx, mut activity_rx) = tokio::sync::broadcast::channel::<EngineEvent>(2);

        // 용량 2를 넘겨 수신자를 lag 상태로 만듦
        for _ in 0..5 {
            config_tx.send(EngineEvent::Ping).unwrap();
        }

        // Lagged에서 종료되지 않고 남은 이벤트를 계속 수신
        let event = next_event(&mut config_rx, &mut activity_rx).await;
        assert!(matches!(event, Some(EngineEvent::Ping)));

        // 허브가 닫히고 버퍼가 비면 그때 None
        drop(config_tx);
        drop(activity_tx);
        while let Some(event) = next_event(&mut config_rx, &mut activity_rx).await {
            assert!(matches!(event, EngineEvent::Ping));
        }
    }

    #[test]
    fn test_client_message_deserialize() {
        let json = r#"{"action":"Subscribe","channel":"config"}"#;
        let msg = parse_client_message(json).unwrap();

        if let ClientMessage::Subscribe { channel } = msg {
            assert_eq!(channel, "config");
        } else {
            panic!("Expected Subscribe");
        }
    }
}
