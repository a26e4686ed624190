// WebSocket message shapes for the dashboard protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Refresh,
    RefreshFocus,
    RefreshHeatmap,
    DashboardUpdateAck,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    InitialMetrics { data: Value },
    FreshMetrics { data: Value },
    FocusData { data: Value },
    MetricsUpdate { data: Value },
    DashboardUpdate { data: Value },
    Pong,
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_ping_decodes_by_type_tag() {
        let message: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(message, ClientMessage::Ping));
    }

    #[test]
    fn client_message_refresh_focus_decodes() {
        let message: ClientMessage = serde_json::from_str(r#"{"type":"refresh_focus"}"#).unwrap();
        assert!(matches!(message, ClientMessage::RefreshFocus));
    }

    #[test]
    fn client_message_rejects_unknown_type() {
        let result: Result<ClientMessage, _> = serde_json::from_str(r#"{"type":"bogus"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn server_message_pong_encodes_with_type_tag_only() {
        let payload = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(payload, serde_json::json!({"type": "pong"}));
    }

    #[test]
    fn server_message_dashboard_update_carries_data() {
        let payload = serde_json::to_value(ServerMessage::DashboardUpdate {
            data: serde_json::json!({"todos": {"count": 3}}),
        })
        .unwrap();
        assert_eq!(payload["type"], "dashboard_update");
        assert_eq!(payload["data"]["todos"]["count"], 3);
    }
}
