//! IO domain - reads from streams the bridge itself opened
//!
//! Streams are created by other translators (`Network.loadNetworkResource`)
//! and read back by the client in chunks.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{client_keys, into_request, param, required_str, Translator};
use crate::adapter::ProtocolAdapter;
use crate::error::Result;
use crate::filter::{Direction, FilterKey, MessageFilter};
use crate::protocol::Message;

const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
const INVALID_HANDLE: i64 = -32000;

struct Stream {
    bytes: Vec<u8>,
    base64_encoded: bool,
    position: usize,
}

/// One chunk handed back by `read`
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub data: String,
    pub eof: bool,
    pub base64_encoded: bool,
}

#[derive(Default)]
pub struct StreamStore {
    next_handle: AtomicU64,
    streams: DashMap<String, Stream>,
}

impl StreamStore {
    /// Store `data` and return its handle. Base64 input is decoded so reads
    /// can slice the real bytes.
    pub fn create(&self, data: String, base64_encoded: bool) -> String {
        let (bytes, base64_encoded) = if base64_encoded {
            match BASE64.decode(data.as_bytes()) {
                Ok(bytes) => (bytes, true),
                Err(e) => {
                    tracing::debug!("[StreamStore] Keeping undecodable body as text: {}", e);
                    (data.into_bytes(), false)
                }
            }
        } else {
            (data.into_bytes(), false)
        };

        let handle = (self.next_handle.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        self.streams.insert(
            handle.clone(),
            Stream {
                bytes,
                base64_encoded,
                position: 0,
            },
        );
        handle
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.streams.contains_key(handle)
    }

    /// Read up to `size` bytes from `offset`, or from where the last read
    /// stopped. `None` for an unknown handle. The stream is dropped once a
    /// chunk reporting EOF has been handed out.
    pub fn read(&self, handle: &str, offset: Option<usize>, size: Option<usize>) -> Option<Chunk> {
        let chunk = self.read_chunk(handle, offset, size)?;
        if chunk.eof {
            self.streams.remove(handle);
        }
        Some(chunk)
    }

    fn read_chunk(&self, handle: &str, offset: Option<usize>, size: Option<usize>) -> Option<Chunk> {
        let mut stream = self.streams.get_mut(handle)?;
        let len = stream.bytes.len();
        let start = offset.unwrap_or(stream.position).min(len);
        let mut end = start.saturating_add(size.unwrap_or(DEFAULT_CHUNK_SIZE)).min(len);

        let data = if stream.base64_encoded {
            BASE64.encode(&stream.bytes[start..end])
        } else {
            // Text chunks end on a char boundary when one exists in range
            let mut cut = end;
            while cut > start && std::str::from_utf8(&stream.bytes[start..cut]).is_err() {
                cut -= 1;
            }
            if cut > start {
                end = cut;
            }
            String::from_utf8_lossy(&stream.bytes[start..end]).into_owned()
        };

        stream.position = end;
        Some(Chunk {
            data,
            eof: end >= len,
            base64_encoded: stream.base64_encoded,
        })
    }

    /// True for any handle this store issued, including ones already
    /// dropped at EOF
    pub fn close(&self, handle: &str) -> bool {
        if self.streams.remove(handle).is_some() {
            return true;
        }
        handle
            .parse::<u64>()
            .is_ok_and(|n| n > 0 && n <= self.next_handle.load(Ordering::Relaxed))
    }
}

pub struct IoTranslator {
    streams: Arc<StreamStore>,
}

impl IoTranslator {
    pub fn new(streams: Arc<StreamStore>) -> Self {
        Self { streams }
    }
}

impl Translator for IoTranslator {
    fn keys(&self) -> Vec<FilterKey> {
        client_keys(&["IO.read", "IO.close"]).collect()
    }
}

#[async_trait]
impl MessageFilter for IoTranslator {
    fn name(&self) -> &str {
        "io"
    }

    async fn filter(
        &self,
        adapter: &ProtocolAdapter,
        key: &FilterKey,
        msg: Message,
    ) -> Result<Option<Message>> {
        if key.direction != Direction::FromClient {
            return Ok(Some(msg));
        }
        let request = into_request(msg)?;
        let handle = required_str(&request, "handle")?;

        match key.method.as_str() {
            "IO.read" => {
                let offset = param(&request, "offset").and_then(Value::as_u64).map(|v| v as usize);
                let size = param(&request, "size").and_then(Value::as_u64).map(|v| v as usize);
                match self.streams.read(handle, offset, size) {
                    Some(chunk) => adapter.fire_result_to_client(
                        request.id,
                        json!({
                            "data": chunk.data,
                            "eof": chunk.eof,
                            "base64Encoded": chunk.base64_encoded,
                        }),
                    ),
                    None => adapter.fire_error_to_client(request.id, INVALID_HANDLE, "Invalid stream handle"),
                }
            }
            "IO.close" => {
                if self.streams.close(handle) {
                    adapter.fire_result_to_client(request.id, json!({}));
                } else {
                    adapter.fire_error_to_client(request.id, INVALID_HANDLE, "Invalid stream handle");
                }
            }
            _ => return Ok(Some(Message::Request(request))),
        }
        Ok(None)
    }
}
