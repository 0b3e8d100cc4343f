//! Capture artifact store.
//!
//! Each capture is a full-resolution still plus a derived preview,
//! persisted as JPEG files under two parallel directories keyed by one
//! logical id. The pair is written atomically together: a failed write
//! of either half removes the other, so the store never holds an
//! orphaned half after a completed operation. Submits also enforce a
//! fixed retention window, evicting the oldest pairs beyond it.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::fs::{self, File};
use std::io::{Cursor, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

use crate::now_ms;

/// Number of most-recent captures kept on disk.
pub const RETENTION_WINDOW: usize = 10;

const FULL_MAX_WIDTH: u32 = 800;
const FULL_MAX_HEIGHT: u32 = 600;
const PREVIEW_WIDTH: u32 = 120;
const PREVIEW_HEIGHT: u32 = 80;

const CAPTURES_SUBDIR: &str = "captures";
const PREVIEWS_SUBDIR: &str = "previews";
const ARTIFACT_EXT: &str = "jpg";
const MAX_ID_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested artifact does not exist.
    #[error("capture not found")]
    NotFound,
    /// Decoding, deriving, or writing an artifact failed.
    #[error("failed to persist capture: {0}")]
    PersistFailure(#[source] anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    Full,
    Preview,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

pub struct CaptureStore {
    captures_dir: PathBuf,
    previews_dir: PathBuf,
    seq: AtomicU64,
    // Serializes retention enforcement so two concurrent submits cannot
    // both act on a pre-eviction listing.
    retention: Mutex<()>,
}

impl CaptureStore {
    pub fn open(cfg: &StoreConfig) -> Result<Self> {
        let captures_dir = cfg.data_dir.join(CAPTURES_SUBDIR);
        let previews_dir = cfg.data_dir.join(PREVIEWS_SUBDIR);
        fs::create_dir_all(&captures_dir)
            .with_context(|| format!("create {}", captures_dir.display()))?;
        fs::create_dir_all(&previews_dir)
            .with_context(|| format!("create {}", previews_dir.display()))?;
        Ok(Self {
            captures_dir,
            previews_dir,
            seq: AtomicU64::new(0),
            retention: Mutex::new(()),
        })
    }

    /// Decodes submitted image bytes, derives the full and preview
    /// artifacts, persists both under a fresh id, then enforces the
    /// retention window. Eviction problems never fail the submit.
    pub fn submit(&self, raw: &[u8]) -> Result<String, StoreError> {
        let decoded = image::load_from_memory(raw)
            .map_err(|e| StoreError::PersistFailure(anyhow!("decode submitted image: {}", e)))?;

        let full = normalize_full(&decoded);
        let preview = decoded.resize_exact(PREVIEW_WIDTH, PREVIEW_HEIGHT, FilterType::Triangle);

        let id = self.next_id().map_err(StoreError::PersistFailure)?;
        self.persist_pair(&id, &full, &preview)?;
        self.enforce_retention();
        Ok(id)
    }

    /// Ids of stored captures, ascending by creation order. Ids embed a
    /// zero-padded timestamp and sequence number, so lexicographic order
    /// is creation order.
    pub fn list(&self) -> Result<Vec<String>> {
        self.list_dir(&self.captures_dir)
    }

    /// Ids with a preview artifact present. Matches `list` whenever the
    /// atomic-pair invariant holds.
    pub fn list_previews(&self) -> Result<Vec<String>> {
        self.list_dir(&self.previews_dir)
    }

    pub fn fetch(&self, id: &str, variant: Variant) -> Result<Vec<u8>, StoreError> {
        let id = sanitize_id(id).ok_or(StoreError::NotFound)?;
        let path = self.artifact_path(id, variant);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(err) => {
                return Err(StoreError::PersistFailure(anyhow!(
                    "open {}: {}",
                    path.display(),
                    err
                )))
            }
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(|e| {
            StoreError::PersistFailure(anyhow!("read {}: {}", path.display(), e))
        })?;
        Ok(bytes)
    }

    /// Removes both artifacts for `id`. A half already missing is not an
    /// error; only a pair with neither half present is `NotFound`.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = sanitize_id(id).ok_or(StoreError::NotFound)?;
        let full_removed = remove_if_present(&self.artifact_path(id, Variant::Full))
            .map_err(StoreError::PersistFailure)?;
        let preview_removed = remove_if_present(&self.artifact_path(id, Variant::Preview))
            .map_err(StoreError::PersistFailure)?;
        if !full_removed && !preview_removed {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn persist_pair(
        &self,
        id: &str,
        full: &DynamicImage,
        preview: &DynamicImage,
    ) -> Result<(), StoreError> {
        let full_path = self.artifact_path(id, Variant::Full);
        let preview_path = self.artifact_path(id, Variant::Preview);

        let result = encode_jpeg(full)
            .and_then(|bytes| write_atomic(&full_path, &bytes))
            .and_then(|_| encode_jpeg(preview))
            .and_then(|bytes| write_atomic(&preview_path, &bytes));

        if let Err(err) = result {
            // No orphaned halves: roll back whatever landed on disk.
            for path in [&full_path, &preview_path] {
                if let Err(cleanup_err) = remove_if_present(path) {
                    log::warn!(
                        "cleanup after failed persist of {} left {}: {}",
                        id,
                        path.display(),
                        cleanup_err
                    );
                }
            }
            return Err(StoreError::PersistFailure(err));
        }
        Ok(())
    }

    fn enforce_retention(&self) {
        let _guard = self
            .retention
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let ids = match self.list() {
            Ok(ids) => ids,
            Err(err) => {
                log::warn!("retention scan failed: {}", err);
                return;
            }
        };
        if ids.len() <= RETENTION_WINDOW {
            return;
        }

        let excess = ids.len() - RETENTION_WINDOW;
        for id in &ids[..excess] {
            for variant in [Variant::Full, Variant::Preview] {
                let path = self.artifact_path(id, variant);
                if let Err(err) = remove_if_present(&path) {
                    // Best effort: a stuck file must not block later
                    // evictions or fail the submit that triggered this.
                    log::warn!("failed to evict {}: {}", path.display(), err);
                }
            }
            log::info!("evicted capture {}", id);
        }
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("scan {}", dir.display()))? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(&format!(".{ARTIFACT_EXT}")) {
                if sanitize_id(id).is_some() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn artifact_path(&self, id: &str, variant: Variant) -> PathBuf {
        let dir = match variant {
            Variant::Full => &self.captures_dir,
            Variant::Preview => &self.previews_dir,
        };
        dir.join(format!("{id}.{ARTIFACT_EXT}"))
    }

    fn next_id(&self) -> Result<String> {
        let ms = now_ms()?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        Ok(format!("capture_{:013}_{:04}", ms, seq % 10_000))
    }
}

/// Bounds the full artifact to the capture resolution without upscaling
/// smaller inputs. Aspect ratio is preserved.
fn normalize_full(decoded: &DynamicImage) -> DynamicImage {
    if decoded.width() > FULL_MAX_WIDTH || decoded.height() > FULL_MAX_HEIGHT {
        decoded.resize(FULL_MAX_WIDTH, FULL_MAX_HEIGHT, FilterType::Triangle)
    } else {
        decoded.clone()
    }
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .context("encode jpeg")?;
    Ok(bytes)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create {}", tmp_path.display()))?;
        file.write_all(data)
            .with_context(|| format!("write {}", tmp_path.display()))?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(anyhow!("remove {}: {}", path.display(), err)),
    }
}

/// Capture ids name files directly, so anything that could escape the
/// artifact directories is rejected outright.
fn sanitize_id(id: &str) -> Option<&str> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return None;
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }
    Some(id)
}
