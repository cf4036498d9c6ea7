//! Certificate provisioning service.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

use edgelink_proto::message::{
    ApplyCertRequest, ApplyCertResponse, CertTypes, CreateKeyRequest, CreateKeyResponse,
    GetCertTypesRequest, IamIncomingMessages, IamOutgoingMessages, NodeInfo,
    iam_incoming_messages::IamIncomingMessage, iam_outgoing_messages::IamOutgoingMessage,
};
use prost::Message;
use tracing::{debug, info, warn};

use super::error_info;
use crate::error::{Error, Result};
use crate::pbhandler::{MessageHandler, MessageSender};
use crate::tls::CertInfo;

/// Issues keys and installs certificates on behalf of the endpoint.
pub trait CertHandler: Send + Sync {
    /// Certificate types the node manages.
    fn get_cert_types(&self) -> Result<Vec<String>>;

    /// Creates a key for `cert_type` and returns a PEM CSR for `subject`.
    fn create_key(&self, cert_type: &str, subject: &str, password: &str) -> Result<String>;

    /// Installs the PEM certificate chain `pem` for `cert_type`.
    fn apply_cert(&self, cert_type: &str, pem: &str) -> Result<CertInfo>;
}

/// Handler for the certificate service ports.
pub struct CertificateService {
    node: Mutex<NodeInfo>,
    certs: Arc<dyn CertHandler>,
}

impl std::fmt::Debug for CertificateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateService")
            .field("node", &self.node_info())
            .finish_non_exhaustive()
    }
}

impl CertificateService {
    /// Creates the service for `node`.
    pub fn new(node: NodeInfo, certs: Arc<dyn CertHandler>) -> Self {
        Self {
            node: Mutex::new(node),
            certs,
        }
    }

    /// Current node identity.
    pub fn node_info(&self) -> NodeInfo {
        self.node.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Updates the provisioning status and reports it when `sender` is given.
    pub fn set_status(&self, status: impl Into<String>, sender: Option<&MessageSender>) -> Result<()> {
        self.node
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status = status.into();
        match sender {
            Some(sender) => self.send_node_info(sender),
            None => Ok(()),
        }
    }

    /// Sends the node identity to the endpoint.
    pub fn send_node_info(&self, sender: &MessageSender) -> Result<()> {
        send(sender, IamOutgoingMessage::NodeInfo(self.node_info()))
    }

    fn check_node(&self, node_id: &str) -> Result<()> {
        let node = self.node.lock().unwrap_or_else(PoisonError::into_inner);
        if node_id != node.node_id {
            return Err(Error::InvalidMessage(format!("request for node {node_id}")));
        }
        Ok(())
    }

    fn get_cert_types(&self, req: &GetCertTypesRequest) -> CertTypes {
        let result = self
            .check_node(&req.node_id)
            .and_then(|()| self.certs.get_cert_types());
        match result {
            Ok(types) => CertTypes {
                node_id: req.node_id.clone(),
                types,
                error: None,
            },
            Err(err) => CertTypes {
                node_id: req.node_id.clone(),
                types: Vec::new(),
                error: Some(error_info(&err)),
            },
        }
    }

    fn create_key(&self, req: &CreateKeyRequest) -> CreateKeyResponse {
        let result = self
            .check_node(&req.node_id)
            .and_then(|()| {
                self.certs
                    .create_key(&req.cert_type, &req.subject, &req.password)
            });
        let (csr, error) = match result {
            Ok(csr) => (csr, None),
            Err(err) => {
                warn!(cert_type = %req.cert_type, %err, "failed to create key");
                (String::new(), Some(error_info(&err)))
            }
        };
        CreateKeyResponse {
            node_id: req.node_id.clone(),
            cert_type: req.cert_type.clone(),
            csr,
            error,
        }
    }

    fn apply_cert(&self, req: &ApplyCertRequest) -> ApplyCertResponse {
        let result = self
            .check_node(&req.node_id)
            .and_then(|()| self.certs.apply_cert(&req.cert_type, &req.cert));
        let mut resp = ApplyCertResponse {
            node_id: req.node_id.clone(),
            cert_type: req.cert_type.clone(),
            ..ApplyCertResponse::default()
        };
        match result {
            Ok(info) => {
                info!(cert_type = %req.cert_type, url = %info.cert_url, "certificate applied");
                resp.cert_url = info.cert_url;
                resp.serial = hex(&info.serial);
            }
            Err(err) => {
                warn!(cert_type = %req.cert_type, %err, "failed to apply certificate");
                resp.error = Some(error_info(&err));
            }
        }
        resp
    }
}

impl MessageHandler for CertificateService {
    fn on_connect(&self, sender: &MessageSender) {
        if let Err(err) = self.send_node_info(sender) {
            warn!(%err, "failed to send node info");
        }
    }

    fn receive_message(&self, data: &[u8], sender: &MessageSender) -> Result<()> {
        let incoming = IamIncomingMessages::decode(data)?;
        let Some(message) = incoming.iam_incoming_message else {
            debug!("empty certificate service message");
            return Ok(());
        };

        let reply = match message {
            IamIncomingMessage::GetCertTypesRequest(req) => {
                IamOutgoingMessage::CertTypes(self.get_cert_types(&req))
            }
            IamIncomingMessage::CreateKeyRequest(req) => {
                IamOutgoingMessage::CreateKeyResponse(self.create_key(&req))
            }
            IamIncomingMessage::ApplyCertRequest(req) => {
                IamOutgoingMessage::ApplyCertResponse(self.apply_cert(&req))
            }
        };
        send(sender, reply)
    }
}

fn send(sender: &MessageSender, message: IamOutgoingMessage) -> Result<()> {
    sender.send_message(Some(&IamOutgoingMessages {
        iam_outgoing_message: Some(message),
    }))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
