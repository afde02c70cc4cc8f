//! Overlay node LocalAPI payloads

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use workpod_proto::DaemonState;

/// Backend state reported once the node is fully connected
pub const BACKEND_RUNNING: &str = "Running";

/// Backend state reported while the node waits for credentials
pub const BACKEND_NEEDS_LOGIN: &str = "NeedsLogin";

/// One node as seen in the overlay status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerStatus {
    #[serde(rename = "HostName", default)]
    pub host_name: String,
    #[serde(rename = "DNSName", default)]
    pub dns_name: String,
    #[serde(rename = "TailscaleIPs", default)]
    pub addresses: Vec<String>,
    #[serde(rename = "Online", default)]
    pub online: bool,
}

/// Response of `GET /localapi/v0/status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(rename = "BackendState", default)]
    pub backend_state: String,
    #[serde(rename = "AuthURL", default, skip_serializing_if = "String::is_empty")]
    pub auth_url: String,
    #[serde(rename = "Self", default, skip_serializing_if = "Option::is_none")]
    pub self_node: Option<PeerStatus>,
    #[serde(rename = "Peer", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peers: BTreeMap<String, PeerStatus>,
    #[serde(rename = "Health", default, skip_serializing_if = "Vec::is_empty")]
    pub health: Vec<String>,
}

impl NodeStatus {
    pub fn daemon_state(&self) -> DaemonState {
        DaemonState::from_backend_state(&self.backend_state)
    }

    pub fn is_running(&self) -> bool {
        self.backend_state == BACKEND_RUNNING
    }

    pub fn needs_login(&self) -> bool {
        self.backend_state == BACKEND_NEEDS_LOGIN
    }
}

/// Preferences sent with a start request
#[derive(Debug, Clone, Serialize)]
pub struct StartPrefs {
    #[serde(rename = "ControlURL")]
    pub control_url: String,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "WantRunning")]
    pub want_running: bool,
}

/// Body of `POST /localapi/v0/start`
#[derive(Debug, Clone, Serialize)]
pub struct StartOptions {
    #[serde(rename = "UpdatePrefs")]
    pub update_prefs: StartPrefs,
    #[serde(rename = "AuthKey", skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
}

/// One notification from the IPN bus
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Notify {
    #[serde(rename = "NetMap", default)]
    pub net_map: Option<serde_json::Value>,
    #[serde(rename = "ErrMessage", default)]
    pub err_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        let json = r#"{
            "BackendState": "Running",
            "Self": {"HostName": "laptop", "DNSName": "laptop.ts.net.", "TailscaleIPs": ["100.64.0.1"], "Online": true},
            "Peer": {"nodekey:abc": {"HostName": "ws-1", "TailscaleIPs": ["100.64.0.2"], "Online": false}}
        }"#;

        let status: NodeStatus = serde_json::from_str(json).unwrap();
        assert!(status.is_running());
        assert_eq!(status.daemon_state(), DaemonState::Running);
        assert_eq!(status.self_node.unwrap().addresses, vec!["100.64.0.1"]);
        assert_eq!(status.peers["nodekey:abc"].host_name, "ws-1");
    }

    #[test]
    fn test_backend_state_mapping() {
        for (backend, expected) in [
            ("Starting", DaemonState::Pending),
            ("Running", DaemonState::Running),
            ("NeedsLogin", DaemonState::Stopped),
            ("", DaemonState::Stopped),
        ] {
            let status = NodeStatus {
                backend_state: backend.to_string(),
                ..Default::default()
            };
            assert_eq!(status.daemon_state(), expected, "backend state {:?}", backend);
        }
    }

    #[test]
    fn test_start_options_shape() {
        let options = StartOptions {
            update_prefs: StartPrefs {
                control_url: "https://ts.example.com".to_string(),
                hostname: "laptop".to_string(),
                want_running: true,
            },
            auth_key: Some("tskey-123".to_string()),
        };
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["UpdatePrefs"]["ControlURL"], "https://ts.example.com");
        assert_eq!(json["AuthKey"], "tskey-123");
    }
}
