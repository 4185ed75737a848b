//! Framing for the stream transport: a 4-byte big-endian length followed
//! by a bincode-encoded [`Packet`].

use crate::Packet;
use bincode::{deserialize, serialize};
use thiserror::Error;

pub const HEADER_LEN: usize = 4;
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),
    #[error("malformed packet: {0}")]
    Malformed(#[from] bincode::Error),
}

pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let body = serialize(packet)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads the body length out of a frame header.
pub fn frame_len(header: [u8; HEADER_LEN]) -> Result<usize, CodecError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }
    Ok(len)
}

pub fn decode_body(body: &[u8]) -> Result<Packet, CodecError> {
    Ok(deserialize(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, PushEvent};

    #[test]
    fn test_frame_layout() {
        let packet = Packet::Push(PushEvent::Ping { nonce: 9 });
        let frame = encode_frame(&packet).unwrap();
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&frame[..HEADER_LEN]);
        let len = frame_len(header).unwrap();
        assert_eq!(len, frame.len() - HEADER_LEN);

        let decoded = decode_body(&frame[HEADER_LEN..]).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_oversized_header_rejected() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        assert!(matches!(frame_len(header), Err(CodecError::FrameTooLarge(_))));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let packet = Packet::Request {
            id: 3,
            command: Command::LoginPlayer {
                username: "lorenzo".to_string(),
            },
        };
        let frame = encode_frame(&packet).unwrap();
        let truncated = &frame[HEADER_LEN..frame.len() - 2];
        assert!(decode_body(truncated).is_err());
        assert!(decode_body(&[]).is_err());
    }
}
