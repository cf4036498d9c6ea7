//! Protobuf messages exchanged with the remote management endpoint.
//!
//! Each logical service is bound to a fixed port agreed out of band with
//! the endpoint. A service listens on its open port in plain text until the
//! node is provisioned, then moves to its secure port behind TLS.
//!
//! "Incoming" messages travel endpoint → node, "outgoing" node → endpoint.

/// Certificate service, plain text.
pub const CERT_OPEN_PORT: u32 = 30001;

/// Certificate service, TLS.
pub const CERT_SECURE_PORT: u32 = 30002;

/// Workload service and clock bootstrap, plain text.
pub const WORKLOAD_OPEN_PORT: u32 = 30003;

/// Workload service, TLS.
pub const WORKLOAD_SECURE_PORT: u32 = 30004;

/// Certificate type securing the certificate service.
pub const CERT_SERVICE_CERT_TYPE: &str = "iam";

/// Certificate type securing the workload service.
pub const WORKLOAD_CERT_TYPE: &str = "sm";

/// Error details attached to a response.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ErrorInfo {
    /// Node-side error code.
    #[prost(int32, tag = "1")]
    pub aos_code: i32,
    /// Process exit code, when the error came from a process.
    #[prost(int32, tag = "2")]
    pub exit_code: i32,
    /// Human readable description.
    #[prost(string, tag = "3")]
    pub message: String,
}

/// Point in time as seconds and nanoseconds since the Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Timestamp {
    /// Whole seconds.
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    /// Sub-second nanoseconds.
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

// Certificate service

/// Requests the certificate types the node can issue keys for.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct GetCertTypesRequest {
    /// Target node.
    #[prost(string, tag = "1")]
    pub node_id: String,
}

/// Requests a new key pair and its CSR.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct CreateKeyRequest {
    /// Target node.
    #[prost(string, tag = "1")]
    pub node_id: String,
    /// Certificate type the key is for.
    #[prost(string, tag = "2")]
    pub cert_type: String,
    /// Subject common name.
    #[prost(string, tag = "3")]
    pub subject: String,
    /// Owner password protecting the key storage.
    #[prost(string, tag = "4")]
    pub password: String,
}

/// Installs a certificate issued for a previously created key.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ApplyCertRequest {
    /// Target node.
    #[prost(string, tag = "1")]
    pub node_id: String,
    /// Certificate type.
    #[prost(string, tag = "2")]
    pub cert_type: String,
    /// PEM encoded certificate chain.
    #[prost(string, tag = "3")]
    pub cert: String,
}

/// Node identity and state, sent whenever the certificate service connects.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct NodeInfo {
    /// Node identifier.
    #[prost(string, tag = "1")]
    pub node_id: String,
    /// Node type.
    #[prost(string, tag = "2")]
    pub node_type: String,
    /// Provisioning status.
    #[prost(string, tag = "3")]
    pub status: String,
}

/// Reply to [`GetCertTypesRequest`].
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct CertTypes {
    /// Node identifier.
    #[prost(string, tag = "1")]
    pub node_id: String,
    /// Supported certificate types.
    #[prost(string, repeated, tag = "2")]
    pub types: Vec<String>,
    /// Set when the types could not be listed.
    #[prost(message, optional, tag = "3")]
    pub error: Option<ErrorInfo>,
}

/// Reply to [`CreateKeyRequest`].
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct CreateKeyResponse {
    /// Node identifier.
    #[prost(string, tag = "1")]
    pub node_id: String,
    /// Certificate type.
    #[prost(string, tag = "2")]
    pub cert_type: String,
    /// PEM encoded certificate signing request.
    #[prost(string, tag = "3")]
    pub csr: String,
    /// Set when key creation failed.
    #[prost(message, optional, tag = "4")]
    pub error: Option<ErrorInfo>,
}

/// Reply to [`ApplyCertRequest`].
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ApplyCertResponse {
    /// Node identifier.
    #[prost(string, tag = "1")]
    pub node_id: String,
    /// Certificate type.
    #[prost(string, tag = "2")]
    pub cert_type: String,
    /// URL of the installed certificate.
    #[prost(string, tag = "3")]
    pub cert_url: String,
    /// Hex encoded serial number.
    #[prost(string, tag = "4")]
    pub serial: String,
    /// Set when the certificate could not be applied.
    #[prost(message, optional, tag = "5")]
    pub error: Option<ErrorInfo>,
}

/// Envelope for messages addressed to the certificate service.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct IamIncomingMessages {
    /// Carried message.
    #[prost(oneof = "iam_incoming_messages::IamIncomingMessage", tags = "1, 2, 3")]
    pub iam_incoming_message: Option<iam_incoming_messages::IamIncomingMessage>,
}

/// Nested types for [`IamIncomingMessages`].
pub mod iam_incoming_messages {
    /// Messages the certificate service accepts.
    #[derive(Clone, PartialEq, Eq, ::prost::Oneof)]
    pub enum IamIncomingMessage {
        /// See [`super::GetCertTypesRequest`].
        #[prost(message, tag = "1")]
        GetCertTypesRequest(super::GetCertTypesRequest),
        /// See [`super::CreateKeyRequest`].
        #[prost(message, tag = "2")]
        CreateKeyRequest(super::CreateKeyRequest),
        /// See [`super::ApplyCertRequest`].
        #[prost(message, tag = "3")]
        ApplyCertRequest(super::ApplyCertRequest),
    }
}

/// Envelope for messages sent by the certificate service.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct IamOutgoingMessages {
    /// Carried message.
    #[prost(oneof = "iam_outgoing_messages::IamOutgoingMessage", tags = "1, 2, 3, 4")]
    pub iam_outgoing_message: Option<iam_outgoing_messages::IamOutgoingMessage>,
}

/// Nested types for [`IamOutgoingMessages`].
pub mod iam_outgoing_messages {
    /// Messages the certificate service emits.
    #[derive(Clone, PartialEq, Eq, ::prost::Oneof)]
    pub enum IamOutgoingMessage {
        /// See [`super::NodeInfo`].
        #[prost(message, tag = "1")]
        NodeInfo(super::NodeInfo),
        /// See [`super::CertTypes`].
        #[prost(message, tag = "2")]
        CertTypes(super::CertTypes),
        /// See [`super::CreateKeyResponse`].
        #[prost(message, tag = "3")]
        CreateKeyResponse(super::CreateKeyResponse),
        /// See [`super::ApplyCertResponse`].
        #[prost(message, tag = "4")]
        ApplyCertResponse(super::ApplyCertResponse),
    }
}

// Workload service

/// Identifies one running instance of a service.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct InstanceIdent {
    /// Service identifier.
    #[prost(string, tag = "1")]
    pub service_id: String,
    /// Subject identifier.
    #[prost(string, tag = "2")]
    pub subject_id: String,
    /// Instance index.
    #[prost(uint64, tag = "3")]
    pub instance: u64,
}

/// Desired instance as requested by the endpoint.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct InstanceInfo {
    /// Instance identity.
    #[prost(message, optional, tag = "1")]
    pub ident: Option<InstanceIdent>,
    /// UID the instance runs as.
    #[prost(uint32, tag = "2")]
    pub uid: u32,
    /// Scheduling priority.
    #[prost(uint64, tag = "3")]
    pub priority: u64,
}

/// Replaces the set of running instances.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct RunInstances {
    /// Desired instances.
    #[prost(message, repeated, tag = "1")]
    pub instances: Vec<InstanceInfo>,
    /// Restart instances even if unchanged.
    #[prost(bool, tag = "2")]
    pub force_restart: bool,
}

/// Current wall-clock time pushed by the endpoint.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ClockSync {
    /// Endpoint time.
    #[prost(message, optional, tag = "1")]
    pub current_time: Option<Timestamp>,
}

/// Observed state of one instance.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct InstanceStatus {
    /// Instance identity.
    #[prost(message, optional, tag = "1")]
    pub ident: Option<InstanceIdent>,
    /// Version of the running service.
    #[prost(string, tag = "2")]
    pub service_version: String,
    /// Run state, e.g. `active` or `failed`.
    #[prost(string, tag = "3")]
    pub run_state: String,
    /// Set when the instance failed.
    #[prost(message, optional, tag = "4")]
    pub error_info: Option<ErrorInfo>,
}

/// Full status after a [`RunInstances`] request completed.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct RunInstancesStatus {
    /// Status of every instance.
    #[prost(message, repeated, tag = "1")]
    pub instances: Vec<InstanceStatus>,
}

/// Incremental status change.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct UpdateInstancesStatus {
    /// Changed instances only.
    #[prost(message, repeated, tag = "1")]
    pub instances: Vec<InstanceStatus>,
}

/// Asks the endpoint for a [`ClockSync`].
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct ClockSyncRequest {}

/// Envelope for messages addressed to the workload service.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct SmIncomingMessages {
    /// Carried message.
    #[prost(oneof = "sm_incoming_messages::SmIncomingMessage", tags = "1, 2")]
    pub sm_incoming_message: Option<sm_incoming_messages::SmIncomingMessage>,
}

/// Nested types for [`SmIncomingMessages`].
pub mod sm_incoming_messages {
    /// Messages the workload service accepts.
    #[derive(Clone, PartialEq, Eq, ::prost::Oneof)]
    pub enum SmIncomingMessage {
        /// See [`super::RunInstances`].
        #[prost(message, tag = "1")]
        RunInstances(super::RunInstances),
        /// See [`super::ClockSync`].
        #[prost(message, tag = "2")]
        ClockSync(super::ClockSync),
    }
}

/// Envelope for messages sent by the workload service.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct SmOutgoingMessages {
    /// Carried message.
    #[prost(oneof = "sm_outgoing_messages::SmOutgoingMessage", tags = "1, 2, 3")]
    pub sm_outgoing_message: Option<sm_outgoing_messages::SmOutgoingMessage>,
}

/// Nested types for [`SmOutgoingMessages`].
pub mod sm_outgoing_messages {
    /// Messages the workload service emits.
    #[derive(Clone, PartialEq, Eq, ::prost::Oneof)]
    pub enum SmOutgoingMessage {
        /// See [`super::RunInstancesStatus`].
        #[prost(message, tag = "1")]
        RunInstancesStatus(super::RunInstancesStatus),
        /// See [`super::UpdateInstancesStatus`].
        #[prost(message, tag = "2")]
        UpdateInstancesStatus(super::UpdateInstancesStatus),
        /// See [`super::ClockSyncRequest`].
        #[prost(message, tag = "3")]
        ClockSyncRequest(super::ClockSyncRequest),
    }
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn oneof_tag_selects_variant() {
        let msg = SmIncomingMessages {
            sm_incoming_message: Some(sm_incoming_messages::SmIncomingMessage::ClockSync(
                ClockSync {
                    current_time: Some(Timestamp {
                        seconds: 1_700_000_000,
                        nanos: 5,
                    }),
                },
            )),
        };

        let bytes = msg.encode_to_vec();
        // Field 2, wire type 2 (length delimited).
        assert_eq!(bytes[0], (2 << 3) | 2);

        let decoded = SmIncomingMessages::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn empty_payload_decodes_to_no_message() {
        let decoded = SmOutgoingMessages::decode(&[][..]).unwrap();
        assert!(decoded.sm_outgoing_message.is_none());
    }

    #[test]
    fn ports_are_distinct() {
        let ports = [
            CERT_OPEN_PORT,
            CERT_SECURE_PORT,
            WORKLOAD_OPEN_PORT,
            WORKLOAD_SECURE_PORT,
        ];
        for (i, a) in ports.iter().enumerate() {
            assert!(ports[i + 1..].iter().all(|b| a != b));
        }
    }
}
