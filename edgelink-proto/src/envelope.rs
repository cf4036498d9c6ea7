//! Length-prefixed protobuf envelope.
//!
//! Each envelope is `[u32 little-endian length][prost payload]`. The frame
//! layer below already guarantees integrity, so the envelope carries no
//! checksum of its own.

use prost::Message;

use crate::error::{Error, Result};

/// Size of the envelope length prefix.
pub const ENVELOPE_HEADER_SIZE: usize = 4;

/// Serializes `msg` behind a length prefix into `buf`, replacing its
/// contents. `None` produces a header-only envelope.
///
/// Fails if the encoded message exceeds `max_payload` bytes.
pub fn encode_into<M: Message>(buf: &mut Vec<u8>, msg: Option<&M>, max_payload: usize) -> Result<()> {
    let len = msg.map_or(0, |m| m.encoded_len());
    if len > max_payload {
        return Err(Error::TooLarge {
            size: len,
            max: max_payload,
        });
    }
    let prefix = u32::try_from(len).map_err(|_| Error::TooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;

    buf.clear();
    buf.reserve(ENVELOPE_HEADER_SIZE + len);
    buf.extend_from_slice(&prefix.to_le_bytes());
    if let Some(msg) = msg {
        msg.encode(buf)?;
    }
    Ok(())
}

/// Decodes the payload length from an envelope header.
pub const fn payload_len(header: [u8; ENVELOPE_HEADER_SIZE]) -> usize {
    u32::from_le_bytes(header) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        ClockSyncRequest, IamOutgoingMessages, NodeInfo, iam_outgoing_messages::IamOutgoingMessage,
    };

    #[test]
    fn prefix_matches_encoded_len() {
        let msg = IamOutgoingMessages {
            iam_outgoing_message: Some(IamOutgoingMessage::NodeInfo(NodeInfo {
                node_id: "node0".into(),
                node_type: "edge".into(),
                status: "provisioned".into(),
            })),
        };

        let mut buf = Vec::new();
        encode_into(&mut buf, Some(&msg), 1024).unwrap();

        let len = payload_len([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len, msg.encoded_len());
        assert_eq!(buf.len(), ENVELOPE_HEADER_SIZE + len);

        let decoded = IamOutgoingMessages::decode(&buf[ENVELOPE_HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn none_is_header_only() {
        let mut buf = vec![0xff; 16];
        encode_into::<ClockSyncRequest>(&mut buf, None, 1024).unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[test]
    fn rejects_message_over_limit() {
        let msg = NodeInfo {
            node_id: "x".repeat(64),
            ..NodeInfo::default()
        };
        let mut buf = Vec::new();
        assert!(matches!(
            encode_into(&mut buf, Some(&msg), 16),
            Err(Error::TooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn header_is_little_endian() {
        assert_eq!(payload_len([0x00, 0x00, 0x00, 0x02]), 32 * 1024 * 1024);
        assert_eq!(payload_len([0x2a, 0, 0, 0]), 42);
    }
}
