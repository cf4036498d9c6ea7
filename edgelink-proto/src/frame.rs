//! Multiplexing frame header.
//!
//! ```text
//! ┌──────────┬───────────┬──────────────────┬─────────────────┐
//! │ port     │ data size │ sha256(payload)  │ payload         │
//! │ u32 LE   │ u32 LE    │ 32 bytes         │ data size bytes │
//! └──────────┴───────────┴──────────────────┴─────────────────┘
//! ```

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Size of the SHA-256 checksum carried in every header.
pub const CHECKSUM_SIZE: usize = 32;

/// Encoded header size: port + data size + checksum.
pub const HEADER_SIZE: usize = 8 + CHECKSUM_SIZE;

/// Largest payload a single frame may carry (64 KiB read buffer minus
/// 1 KiB of headroom).
pub const MAX_FRAME_DATA: usize = 64 * 1024 - 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct FrameHeader {
    /// Destination port.
    pub port: u32,
    /// Number of payload bytes following the header.
    pub data_size: u32,
    /// SHA-256 digest of the payload.
    pub checksum: [u8; CHECKSUM_SIZE],
}

impl FrameHeader {
    /// Builds the header for `payload` addressed to `port`.
    ///
    /// Fails if the payload does not fit in one frame.
    pub fn for_payload(port: u32, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_FRAME_DATA {
            return Err(Error::TooLarge {
                size: payload.len(),
                max: MAX_FRAME_DATA,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let data_size = payload.len() as u32;
        Ok(Self {
            port,
            data_size,
            checksum: checksum(payload),
        })
    }

    /// Encodes the header into its fixed little-endian layout.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.port.to_le_bytes());
        buf[4..8].copy_from_slice(&self.data_size.to_le_bytes());
        buf[8..].copy_from_slice(&self.checksum);
        buf
    }

    /// Decodes a header. Sizes are not validated here; see [`validate`].
    ///
    /// [`validate`]: Self::validate
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        let mut checksum = [0u8; CHECKSUM_SIZE];
        checksum.copy_from_slice(&buf[8..]);
        Self {
            port: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            data_size: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            checksum,
        }
    }

    /// Payload size as `usize`.
    pub const fn len(&self) -> usize {
        self.data_size as usize
    }

    /// Returns `true` for a header-only frame.
    pub const fn is_empty(&self) -> bool {
        self.data_size == 0
    }

    /// Rejects headers whose payload exceeds [`MAX_FRAME_DATA`].
    pub fn validate(&self) -> Result<()> {
        if self.len() > MAX_FRAME_DATA {
            return Err(Error::TooLarge {
                size: self.len(),
                max: MAX_FRAME_DATA,
            });
        }
        Ok(())
    }

    /// Checks `payload` against the header checksum.
    pub fn verify(&self, payload: &[u8]) -> Result<()> {
        if checksum(payload) != self.checksum {
            return Err(Error::Checksum { port: self.port });
        }
        Ok(())
    }
}

/// SHA-256 of `data`.
pub fn checksum(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_little_endian() {
        let header = FrameHeader::for_payload(8080, b"Test1").unwrap();
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], &8080u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &5u32.to_le_bytes());
        assert_eq!(&bytes[8..], &checksum(b"Test1"));
        assert_eq!(FrameHeader::decode(&bytes), header);
    }

    #[test]
    fn empty_payload_has_known_digest() {
        let header = FrameHeader::for_payload(1, &[]).unwrap();
        assert!(header.is_empty());
        // SHA-256 of the empty string.
        assert_eq!(header.checksum[..4], [0xe3, 0xb0, 0xc4, 0x42]);
    }

    #[test]
    fn rejects_oversized_payload() {
        let payload = vec![0u8; MAX_FRAME_DATA + 1];
        assert!(matches!(
            FrameHeader::for_payload(1, &payload),
            Err(Error::TooLarge { .. })
        ));

        let mut raw = FrameHeader::for_payload(1, b"x").unwrap().encode();
        raw[4..8].copy_from_slice(&(u32::MAX).to_le_bytes());
        assert!(FrameHeader::decode(&raw).validate().is_err());
    }

    #[test]
    fn verify_detects_corruption() {
        let header = FrameHeader::for_payload(7, b"payload").unwrap();
        assert!(header.verify(b"payload").is_ok());
        assert!(matches!(
            header.verify(b"paylaod"),
            Err(Error::Checksum { port: 7 })
        ));
    }
}
