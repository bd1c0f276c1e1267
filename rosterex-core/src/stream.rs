//! Spooled delivery of oversized scrape results.
//!
//! Small results go back inline; anything past the threshold is gzip-spooled
//! to temporary storage and handed out as seekable, expiring chunked reads.
//! Cleanup is lazy (terminal read, expiry-on-read, explicit abort) with
//! [`StreamManager::gc_expired`] as a periodic safety net.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use rosterex_config::StreamConfig;
use rosterex_model::{ScrapeOutcome, StreamChunk, StreamDescriptor};

use crate::error::StreamError;

/// Result of packing a scrape outcome for delivery.
#[derive(Debug)]
pub enum PackedResult {
    /// Serialized payload small enough to return directly.
    Inline(Vec<u8>),
    /// Payload was compressed and spooled; retrieve via [`StreamManager::next`].
    Spooled(StreamDescriptor),
}

#[derive(Debug, Clone)]
struct SpoolEntry {
    path: PathBuf,
    size_bytes: u64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Serializes finished results and serves spooled payloads as chunked reads.
#[derive(Debug)]
pub struct StreamManager {
    root: PathBuf,
    config: StreamConfig,
    handles: Mutex<HashMap<Uuid, SpoolEntry>>,
}

impl StreamManager {
    /// Manager spooling under the system temp directory.
    pub fn new(config: StreamConfig) -> Self {
        let root = std::env::temp_dir().join(format!("rosterex-spool-{}", Uuid::new_v4()));
        Self::with_root(root, config)
    }

    pub fn with_root(root: impl Into<PathBuf>, config: StreamConfig) -> Self {
        StreamManager {
            root: root.into(),
            config,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize a result; return it inline when small, otherwise compress,
    /// spool, and return a descriptor for chunked retrieval.
    pub fn pack(&self, outcome: &ScrapeOutcome) -> Result<PackedResult, StreamError> {
        let serialized = serde_json::to_vec(outcome)?;
        if serialized.len() <= self.config.inline_threshold_bytes {
            return Ok(PackedResult::Inline(serialized));
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serialized)?;
        let compressed = encoder.finish()?;

        let id = Uuid::new_v4();
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(format!("{id}.json.gz"));
        fs::write(&path, &compressed)?;

        let created_at = Utc::now();
        let entry = SpoolEntry {
            path,
            size_bytes: compressed.len() as u64,
            created_at,
            expires_at: created_at
                + chrono::Duration::from_std(self.config.ttl)
                    .unwrap_or_else(|_| chrono::Duration::days(365)),
        };
        let descriptor = StreamDescriptor {
            id,
            encoding: "gzip".to_string(),
            size_bytes: entry.size_bytes,
            chunk_size: self.config.chunk_size,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
        };
        self.handles.lock().insert(id, entry);

        debug!(
            %id,
            raw_bytes = serialized.len(),
            spooled_bytes = descriptor.size_bytes,
            "result spooled"
        );
        Ok(PackedResult::Spooled(descriptor))
    }

    /// Read the chunk starting at `offset` (`length` defaults to the
    /// configured chunk size). Reaching the stored size reports `eof` and
    /// deletes the backing storage; callers must not read again after that.
    pub fn next(
        &self,
        id: Uuid,
        offset: u64,
        length: Option<usize>,
    ) -> Result<StreamChunk, StreamError> {
        // Snapshot the entry and release the lock; all filesystem work
        // happens unlocked, re-locking only to retire the handle.
        let entry = self
            .handles
            .lock()
            .get(&id)
            .cloned()
            .ok_or(StreamError::StreamNotFound(id))?;

        if Utc::now() > entry.expires_at {
            self.handles.lock().remove(&id);
            remove_spool_file(&entry.path);
            return Err(StreamError::StreamExpired(id));
        }

        if offset >= entry.size_bytes {
            self.handles.lock().remove(&id);
            remove_spool_file(&entry.path);
            return Ok(StreamChunk {
                bytes: Vec::new(),
                next_offset: offset,
                eof: true,
            });
        }

        let want = length.unwrap_or(self.config.chunk_size) as u64;
        let want = want.min(entry.size_bytes - offset);

        let mut file = File::open(&entry.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = Vec::with_capacity(want as usize);
        file.take(want).read_to_end(&mut bytes)?;

        let next_offset = offset + bytes.len() as u64;
        let eof = next_offset >= entry.size_bytes;
        if eof {
            self.handles.lock().remove(&id);
            remove_spool_file(&entry.path);
        }

        Ok(StreamChunk {
            bytes,
            next_offset,
            eof,
        })
    }

    /// Idempotent cleanup; succeeds even when the id is already gone.
    pub fn abort(&self, id: Uuid) {
        if let Some(entry) = self.handles.lock().remove(&id) {
            remove_spool_file(&entry.path);
        }
    }

    /// Best-effort sweep of up to `max_delete` expired handles. Returns the
    /// number removed. Run periodically alongside lazy expiry-on-read.
    pub fn gc_expired(&self, max_delete: usize) -> usize {
        let now = Utc::now();
        let expired: Vec<(Uuid, SpoolEntry)> = {
            let mut handles = self.handles.lock();
            let ids: Vec<Uuid> = handles
                .iter()
                .filter(|(_, entry)| now > entry.expires_at)
                .map(|(id, _)| *id)
                .take(max_delete)
                .collect();
            ids.into_iter()
                .filter_map(|id| handles.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (id, entry) in &expired {
            debug!(%id, "sweeping expired spool");
            remove_spool_file(&entry.path);
        }
        expired.len()
    }
}

fn remove_spool_file(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %err, "failed to remove spool file");
    }
}
