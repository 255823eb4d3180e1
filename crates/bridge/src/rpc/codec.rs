//! Wire framing for the webinspector service
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! plist. Outbound frames are binary plists; inbound ones may be binary or
//! XML.

use bytes::{Buf, BufMut, BytesMut};
use plist::Value as Plist;
use std::io::Cursor;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::BridgeError;

const HEADER_LEN: usize = 4;
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct RpcFrameCodec;

impl Decoder for RpcFrameCodec {
    type Item = Plist;
    type Error = BridgeError;

    /// A frame whose body is not a plist is logged and skipped. Only an
    /// oversized length is an error, since framing cannot recover from it.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Plist>, BridgeError> {
        loop {
            if src.len() < HEADER_LEN {
                return Ok(None);
            }
            let mut header = [0u8; HEADER_LEN];
            header.copy_from_slice(&src[..HEADER_LEN]);
            let len = u32::from_be_bytes(header) as usize;

            if len > MAX_FRAME_LEN {
                return Err(BridgeError::Malformed(format!(
                    "frame of {} bytes exceeds limit",
                    len
                )));
            }
            if src.len() < HEADER_LEN + len {
                src.reserve(HEADER_LEN + len - src.len());
                return Ok(None);
            }

            src.advance(HEADER_LEN);
            let body = src.split_to(len);
            match Plist::from_reader(Cursor::new(&body[..])) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    tracing::warn!("[RpcFrameCodec] Skipping undecodable frame of {} bytes: {}", len, e)
                }
            }
        }
    }
}

impl Encoder<plist::Dictionary> for RpcFrameCodec {
    type Error = BridgeError;

    fn encode(&mut self, item: plist::Dictionary, dst: &mut BytesMut) -> Result<(), BridgeError> {
        let mut body = Vec::new();
        Plist::Dictionary(item).to_writer_binary(&mut body)?;
        if body.len() > MAX_FRAME_LEN {
            return Err(BridgeError::Malformed(format!(
                "frame of {} bytes exceeds limit",
                body.len()
            )));
        }

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
