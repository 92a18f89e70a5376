// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message schema for the cluster enrollment and channel protocols.
//!
//! These are hand-authored `prost::Message` implementations rather than
//! `.proto`-generated code: the schema is small and stable enough that a
//! `protoc`/`prost-build` step isn't worth the extra build-time dependency.

use prost::{Message, Oneof};

/// Sent by an agent to join the cluster. `csr` is a PEM-encoded PKCS#10
/// certificate signing request for the keypair the agent just generated.
#[derive(Clone, PartialEq, Message)]
pub struct EnrollRequest {
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub host_name: String,
    #[prost(string, tag = "3")]
    pub csr: String,
}

/// Reply to a successful [`EnrollRequest`]: the host's assigned id, the root
/// CA certificate (so the agent can verify the server later), and the
/// agent's own signed leaf certificate.
#[derive(Clone, PartialEq, Message)]
pub struct EnrollResponse {
    #[prost(string, tag = "1")]
    pub host_id: String,
    #[prost(string, tag = "2")]
    pub ca_cert: String,
    #[prost(string, tag = "3")]
    pub agent_cert: String,
}

/// A container action the server can request on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum ContainerAction {
    Stop = 0,
    Start = 1,
    Restart = 2,
    Remove = 3,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateContainer {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub target_image: String,
    #[prost(string, optional, tag = "3")]
    pub target_digest: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ContainerActionRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "ContainerAction", tag = "2")]
    pub action: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct CertRenewalResponse {
    #[prost(string, tag = "1")]
    pub cert: String,
}

/// Every message the server may send down a channel stream, tagged with the
/// request id it correlates with (empty for unsolicited pushes).
#[derive(Clone, PartialEq, Message)]
pub struct ServerMessage {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(oneof = "ServerPayload", tags = "2, 3, 4, 5")]
    pub payload: Option<ServerPayload>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum ServerPayload {
    #[prost(message, tag = "2")]
    ListContainers(ListContainersRequest),
    #[prost(message, tag = "3")]
    UpdateContainer(UpdateContainer),
    #[prost(message, tag = "4")]
    ContainerAction(ContainerActionRequest),
    #[prost(message, tag = "5")]
    CertRenewalResponse(CertRenewalResponse),
}

#[derive(Clone, PartialEq, Message)]
pub struct ListContainersRequest {}

#[derive(Clone, PartialEq, Message)]
pub struct Heartbeat {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(string, repeated, tag = "3")]
    pub features: Vec<String>,
    #[prost(string, tag = "4")]
    pub host_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ContainerInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub image: String,
    #[prost(string, optional, tag = "3")]
    pub digest: Option<String>,
    #[prost(bool, tag = "4")]
    pub running: bool,
    /// Set when the agent's local engine has been unreachable for longer than
    /// its configured offline grace period: `running` is last-known, not current.
    #[prost(bool, tag = "5")]
    pub stale: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct ContainerList {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(message, repeated, tag = "2")]
    pub containers: Vec<ContainerInfo>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateResult {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub old_image: String,
    #[prost(string, tag = "4")]
    pub new_image: String,
    #[prost(string, optional, tag = "5")]
    pub old_digest: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub new_digest: Option<String>,
    #[prost(string, tag = "7")]
    pub outcome: String,
    #[prost(string, optional, tag = "8")]
    pub error: Option<String>,
    #[prost(uint64, tag = "9")]
    pub duration_ms: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct ContainerActionResult {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(enumeration = "ContainerAction", tag = "3")]
    pub action: i32,
    #[prost(string, tag = "4")]
    pub outcome: String,
    #[prost(string, optional, tag = "5")]
    pub error: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct HookResult {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(string, tag = "2")]
    pub command: String,
    #[prost(int32, tag = "3")]
    pub exit_code: i32,
    #[prost(string, tag = "4")]
    pub stderr: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RollbackResult {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(bool, tag = "3")]
    pub succeeded: bool,
    #[prost(string, optional, tag = "4")]
    pub error: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct JournalEntry {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(string, tag = "2")]
    pub description: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct OfflineJournal {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<JournalEntry>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CertRenewal {
    #[prost(string, tag = "1")]
    pub csr: String,
}

/// Every message an agent may send up a channel stream.
#[derive(Clone, PartialEq, Message)]
pub struct AgentMessage {
    #[prost(oneof = "AgentPayload", tags = "1, 2, 3, 4, 5, 6, 7, 8")]
    pub payload: Option<AgentPayload>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum AgentPayload {
    #[prost(message, tag = "1")]
    Heartbeat(Heartbeat),
    #[prost(message, tag = "2")]
    ContainerList(ContainerList),
    #[prost(message, tag = "3")]
    UpdateResult(UpdateResult),
    #[prost(message, tag = "4")]
    ContainerActionResult(ContainerActionResult),
    #[prost(message, tag = "5")]
    HookResult(HookResult),
    #[prost(message, tag = "6")]
    RollbackResult(RollbackResult),
    #[prost(message, tag = "7")]
    OfflineJournal(OfflineJournal),
    #[prost(message, tag = "8")]
    CertRenewal(CertRenewal),
}

/// Unary report sent once a channel first opens: the agent's full local
/// container list and version, so the server can reconcile state without
/// waiting for the next heartbeat.
#[derive(Clone, PartialEq, Message)]
pub struct StateReport {
    #[prost(string, tag = "1")]
    pub host_id: String,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(message, repeated, tag = "3")]
    pub containers: Vec<ContainerInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enroll_request_round_trips_through_encode_decode() {
        let req = EnrollRequest {
            token: "tok".to_string(),
            host_name: "host-a".to_string(),
            csr: "-----BEGIN CERTIFICATE REQUEST-----".to_string(),
        };
        let bytes = req.encode_to_vec();
        let decoded = EnrollRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn server_message_oneof_round_trips() {
        let msg = ServerMessage {
            request_id: "r1".to_string(),
            payload: Some(ServerPayload::UpdateContainer(UpdateContainer {
                name: "web".to_string(),
                target_image: "nginx:1.26".to_string(),
                target_digest: Some("sha256:abc".to_string()),
            })),
        };
        let bytes = msg.encode_to_vec();
        let decoded = ServerMessage::decode(bytes.as_slice()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn agent_message_heartbeat_round_trips() {
        let msg = AgentMessage {
            payload: Some(AgentPayload::Heartbeat(Heartbeat {
                timestamp: 1234,
                version: "0.1.0".to_string(),
                features: vec!["cert-renewal".to_string()],
                host_id: "host-a".to_string(),
            })),
        };
        let bytes = msg.encode_to_vec();
        let decoded = AgentMessage::decode(bytes.as_slice()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn state_report_round_trips_with_container_list() {
        let report = StateReport {
            host_id: "host-a".to_string(),
            version: "0.1.0".to_string(),
            containers: vec![ContainerInfo {
                name: "web".to_string(),
                image: "nginx:1.25".to_string(),
                digest: Some("sha256:aaa".to_string()),
                running: true,
                stale: false,
            }],
        };
        let bytes = report.encode_to_vec();
        let decoded = StateReport::decode(bytes.as_slice()).unwrap();
        assert_eq!(report, decoded);
    }
}
