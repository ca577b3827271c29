//! Attachment storage
//!
//! Inbound binary payloads arrive as data-URI strings
//! (`data:<mime>;base64,<body>`). The store strips the prefix, decodes the
//! body, and writes the bytes under a generated name. Content is opaque;
//! nothing is validated beyond the base64 encoding.

use base64::Engine;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

use crate::error::RelayError;

/// Writes attachment bytes to durable storage and hands back stable
/// references (filenames) for message records.
pub struct AttachmentStore {
    root: PathBuf,
    counter: AtomicU64,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Decode an inbound payload and persist it, returning the generated
    /// reference.
    ///
    /// The disk write is spawned and not awaited; a write failure is logged
    /// but the reference has already been handed to the caller, so the
    /// message record keeps it either way.
    pub fn store(&self, original_name: &str, data: &str) -> Result<String, RelayError> {
        let body = data.split_once(',').map(|(_, body)| body).unwrap_or(data);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| RelayError::AttachmentWrite(format!("payload is not valid base64: {e}")))?;

        let filename = self.generate_name(original_name);
        let path = self.root.join(&filename);
        tokio::spawn(async move {
            match tokio::fs::write(&path, &bytes).await {
                Ok(()) => debug!("Attachment saved: {}", path.display()),
                Err(e) => error!("Attachment write failed for {}: {}", path.display(), e),
            }
        });

        Ok(filename)
    }

    /// Millisecond timestamp plus a process-wide counter, preserving the
    /// original extension. The counter keeps same-millisecond calls from
    /// colliding.
    fn generate_name(&self, original: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);

        match original.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => format!("{millis}-{seq}.{ext}"),
            _ => format!("{millis}-{seq}"),
        }
    }
}
