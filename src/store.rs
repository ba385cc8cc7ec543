use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use slatedb::object_store::ObjectStore;
use slatedb::{Db, Error as SlateError};
use thiserror::Error;
use tracing::warn;

use crate::codec::{decode_envelope, encode_envelope, CodecError};
use crate::envelope::Envelope;
use crate::keys;
use crate::registry::JobRegistry;
use crate::settings::{Backend, StoreConfig};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("slatedb error: {0}")]
    Slate(#[from] SlateError),
    #[error("invalid store path: {0}")]
    InvalidPath(String),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Milliseconds since the unix epoch.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Result of resolving an object store, includes the canonical path used
struct ResolvedStore {
    store: Arc<dyn ObjectStore>,
    canonical_path: String,
}

fn resolve_object_store(backend: &Backend, path: &str) -> Result<ResolvedStore, StoreError> {
    match backend {
        Backend::Fs => {
            // Ensure the directory exists before creating the LocalFileSystem root
            let root = Path::new(path);
            if !root.exists() {
                fs::create_dir_all(root).map_err(|e| {
                    StoreError::InvalidPath(format!("failed to create fs root {}: {}", path, e))
                })?;
            }
            // Canonicalize the path to avoid URL-encoding issues with relative paths
            // (e.g., "./tmp" being encoded as "%2E/tmp" or "%252E/tmp" inconsistently)
            let canonical_path = root.canonicalize().map_err(|e| {
                StoreError::InvalidPath(format!("failed to canonicalize path {}: {}", path, e))
            })?;
            let canonical_str = canonical_path.to_string_lossy().to_string();
            // Use slatedb's re-exported object_store to ensure trait compatibility
            let store = slatedb::object_store::local::LocalFileSystem::new_with_prefix(
                &canonical_str,
            )
            .map_err(|e| StoreError::InvalidPath(format!("{}", e)))?;
            Ok(ResolvedStore {
                store: Arc::new(store),
                canonical_path: canonical_str,
            })
        }
        Backend::Memory => Ok(ResolvedStore {
            store: Arc::new(slatedb::object_store::memory::InMemory::new()),
            canonical_path: path.to_string(),
        }),
        Backend::Url => {
            // Interpret path as a URL understood by SlateDB's resolver,
            // e.g. s3://bucket/prefix
            let store = Db::resolve_object_store(path)?;
            Ok(ResolvedStore {
                store,
                canonical_path: path.to_string(),
            })
        }
    }
}

/// Durable envelope store for one connection, backed by SlateDB.
///
/// Every write is a whole-envelope upsert keyed by id; there is no partial
/// update. Clones share the underlying db handle.
#[derive(Clone)]
pub struct JobStore {
    name: String,
    db: Arc<Db>,
}

impl JobStore {
    pub async fn open(cfg: &StoreConfig) -> Result<Self, StoreError> {
        let resolved = resolve_object_store(&cfg.backend, &cfg.path)?;

        let mut db_builder =
            slatedb::DbBuilder::new(resolved.canonical_path.as_str(), resolved.store);

        // Apply custom flush interval if specified
        if let Some(flush_ms) = cfg.flush_interval_ms {
            let mut settings = slatedb::config::Settings::default();
            settings.flush_interval = Some(std::time::Duration::from_millis(flush_ms));
            db_builder = db_builder.with_settings(settings);
        }

        let db = db_builder.build().await?;
        Ok(JobStore {
            name: cfg.name.clone(),
            db: Arc::new(db),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upsert the envelope's full stored form.
    pub async fn put(&self, envelope: &Envelope) -> Result<(), StoreError> {
        let value = encode_envelope(envelope)?;
        self.db
            .put(keys::envelope_key(envelope.id()).as_bytes(), &value)
            .await?;
        Ok(())
    }

    /// Fetch the raw stored bytes for one envelope, if present.
    pub async fn get_raw(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let maybe_raw = self.db.get(keys::envelope_key(id).as_bytes()).await?;
        Ok(maybe_raw.map(|raw| raw.to_vec()))
    }

    /// Fetch and decode one envelope, if present.
    pub async fn get(&self, id: &str, registry: &JobRegistry) -> Result<Option<Envelope>, StoreError> {
        match self.get_raw(id).await? {
            Some(raw) => Ok(Some(decode_envelope(&raw, registry)?)),
            None => Ok(None),
        }
    }

    pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.db
            .delete(keys::envelope_key(id).as_bytes())
            .await?;
        Ok(())
    }

    /// Load every stored envelope, skipping records that no longer decode.
    ///
    /// A skipped record stays in the store untouched; a later process with
    /// the missing type registered can still recover it. Survivors come
    /// back sorted by creation time so recovery re-offers them in original
    /// dispatch order.
    pub async fn load_all(&self, registry: &JobRegistry) -> Result<Vec<Envelope>, StoreError> {
        let (start, end) = keys::envelope_scan_bounds();
        let mut iter = self.db.scan::<Vec<u8>, _>(start..=end).await?;

        let mut envelopes = Vec::new();
        while let Some(kv) = iter.next().await? {
            match decode_envelope(&kv.value, registry) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => {
                    let key = String::from_utf8_lossy(&kv.key).to_string();
                    warn!(store = %self.name, key = %key, error = %e, "skipping undecodable envelope");
                }
            }
        }
        envelopes.sort_by(|a, b| {
            a.created_at_ms()
                .cmp(&b.created_at_ms())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(envelopes)
    }

    pub async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().await?;
        Ok(())
    }

    /// Close the underlying SlateDB instance gracefully.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.db.close().await?;
        Ok(())
    }
}
