use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error};

use crate::{
    error::{Error, Result},
    schema::JSONRPCMessage,
};

/// JSON-RPC codec for encoding/decoding messages over a stream
/// Uses newline-delimited JSON format
#[derive(Debug, Default)]
pub struct JsonRpcCodec;

impl JsonRpcCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for JsonRpcCodec {
    type Error = Error;
    type Item = JSONRPCMessage;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(n) = src.iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };

            let line = src.split_to(n + 1);
            let json_bytes = trim_line(&line[..n]);
            if json_bytes.is_empty() {
                continue;
            }

            debug!("Decoding JSON-RPC message: {:?}", std::str::from_utf8(json_bytes));

            let message = serde_json::from_slice(json_bytes).map_err(|e| {
                error!("Failed to parse JSON-RPC message: {}", e);
                match std::str::from_utf8(json_bytes) {
                    Ok(text) => Error::InvalidMessageFormat {
                        message: format!("Invalid JSON: {e} (content: {text})"),
                    },
                    Err(_) => Error::InvalidMessageFormat {
                        message: format!("Invalid JSON: {e} (non-UTF8 content)"),
                    },
                }
            })?;
            return Ok(Some(message));
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

impl Encoder<JSONRPCMessage> for JsonRpcCodec {
    type Error = Error;

    fn encode(&mut self, item: JSONRPCMessage, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(&item)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        debug!("Encoded JSON-RPC message: {:?}", std::str::from_utf8(&json));
        Ok(())
    }
}
