//! RPC message types and framing for node and proxy communication.
//!
//! Every message is a bincode-encoded [`Message`] preceded by its length as a
//! big-endian `u32`. A connection carries one request/response exchange at a
//! time and can be reused for the next one.

use crate::error::{Error, ErrorKind, NetworkError, Result};
use crate::types::{
    BatchGetReply, CacheStats, CacheValue, DeleteReply, GetReply, NodeHealth, ProxyHealth,
    SetReply,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame accepted on either side.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Network message wrapper for all communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Proxy → node.
    NodeRequest(NodeRequest),

    /// Node → proxy.
    NodeResponse(NodeResponse),

    /// Client → proxy.
    ProxyRequest(ProxyRequest),

    /// Proxy → client.
    ProxyResponse(ProxyResponse),

    /// Either tier rejecting a request.
    Error(ErrorResponse),
}

/// Operations a storage node serves. Keys are already namespace-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRequest {
    Get { key: String },
    Set { key: String, value: Vec<u8>, ttl_seconds: i64 },
    Delete { key: String },
    Health,
    Stats,
}

impl NodeRequest {
    /// Operation name used in logs and error context.
    pub fn operation(&self) -> &'static str {
        match self {
            NodeRequest::Get { .. } => "get",
            NodeRequest::Set { .. } => "set",
            NodeRequest::Delete { .. } => "delete",
            NodeRequest::Health => "health",
            NodeRequest::Stats => "stats",
        }
    }

    /// Whether sending the request twice leaves the node as sending it once.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            NodeRequest::Get { .. } | NodeRequest::Health | NodeRequest::Stats
        )
    }
}

/// Node replies, one per [`NodeRequest`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeResponse {
    Get(Option<CacheValue>),
    Set { success: bool },
    Delete { success: bool, existed: bool },
    Health(NodeHealth),
    Stats(CacheStats),
}

/// Operations the proxy serves to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyRequest {
    Get {
        api_key: String,
        key: String,
    },
    Set {
        api_key: String,
        key: String,
        value: Vec<u8>,
        ttl_seconds: i64,
    },
    Delete {
        api_key: String,
        key: String,
    },
    BatchGet {
        api_key: String,
        keys: Vec<String>,
    },
    Health,
}

/// Proxy replies, one per [`ProxyRequest`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyResponse {
    Get(GetReply),
    Set(SetReply),
    Delete(DeleteReply),
    BatchGet(BatchGetReply),
    Health(ProxyHealth),
}

/// A typed failure crossing the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorResponse {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl ErrorResponse {
    pub fn into_error(self) -> Error {
        Error::from_wire(self.kind, self.message)
    }
}

/// Encode a message to bytes.
pub fn encode_message(msg: &Message) -> std::result::Result<Vec<u8>, bincode::Error> {
    bincode::serialize(msg)
}

/// Decode a message from bytes.
pub fn decode_message(data: &[u8]) -> std::result::Result<Message, bincode::Error> {
    bincode::deserialize(data)
}

/// Frame a message with length prefix for TCP transmission.
pub fn frame_message(msg: &Message) -> std::result::Result<Vec<u8>, bincode::Error> {
    let data = encode_message(msg)?;
    let len = data.len() as u32;

    let mut framed = Vec::with_capacity(4 + data.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&data);

    Ok(framed)
}

/// Write one framed message.
pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = frame_message(msg)?;
    if framed.len() - 4 > MAX_FRAME_SIZE {
        return Err(NetworkError::FrameTooLarge(framed.len() - 4).into());
    }
    writer.write_all(&framed).await.map_err(NetworkError::Io)?;
    writer.flush().await.map_err(NetworkError::Io)?;
    Ok(())
}

/// Read one framed message.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(NetworkError::Io(e).into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetworkError::FrameTooLarge(len).into());
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await.map_err(NetworkError::Io)?;

    Ok(Some(decode_message(&data)?))
}
