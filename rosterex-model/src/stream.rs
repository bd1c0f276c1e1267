use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Descriptor handed to the caller when a result was spooled instead of
/// returned inline. The caller drives retrieval through the chunk-read
/// contract (`offset, length -> bytes, next_offset, eof`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub id: Uuid,
    /// Encoding of the spooled bytes, currently always `"gzip"`.
    pub encoding: String,
    pub size_bytes: u64,
    pub chunk_size: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One chunk of a spooled payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub bytes: Vec<u8>,
    /// Offset to pass to the next read.
    pub next_offset: u64,
    /// When true the backing storage is already gone; do not read again.
    pub eof: bool,
}
