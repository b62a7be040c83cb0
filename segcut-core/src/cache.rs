//! Content-addressed artifact cache.
//!
//! Artifacts are stored flat as `<digest>.<ext>`, where the digest covers
//! the source content identity and every parameter that influences the
//! rendered output. Entries are immutable once written; concurrent writers
//! of the same digest produce identical files, so the last rename wins.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::Result;

/// Bytes of the input sampled for content identity.
pub const IDENTITY_SAMPLE_BYTES: usize = 64 * 1024;

/// Hex characters kept from the SHA-256 digest.
pub const DIGEST_LEN: usize = 16;

const FLOAT_PRECISION: f64 = 1e6;

fn short_hex(hasher: Sha256) -> String {
    let hex = format!("{:x}", hasher.finalize());
    hex[..DIGEST_LEN].to_string()
}

/// Fast fingerprint of input bytes: a bounded prefix plus the total length.
pub fn content_identity(bytes: &[u8]) -> String {
    let sample = &bytes[..bytes.len().min(IDENTITY_SAMPLE_BYTES)];
    let mut hasher = Sha256::new();
    hasher.update(sample);
    hasher.update((bytes.len() as u64).to_le_bytes());
    short_hex(hasher)
}

/// [`content_identity`] of a file without reading it fully.
pub fn file_content_identity(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let len = fs::metadata(path)?.len();
    let mut sample = Vec::with_capacity(IDENTITY_SAMPLE_BYTES);
    fs::File::open(path)?
        .take(IDENTITY_SAMPLE_BYTES as u64)
        .read_to_end(&mut sample)?;

    let mut hasher = Sha256::new();
    hasher.update(&sample);
    hasher.update(len.to_le_bytes());
    Ok(short_hex(hasher))
}

/// Serialize `value` with sorted keys and floats rounded to 6 decimals.
///
/// Integral numbers print without a fraction, so `30` and `30.0` agree.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => out.push_str(&value.to_string()),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => out.push_str(&i.to_string()),
            (_, Some(u), _) => out.push_str(&u.to_string()),
            (_, _, Some(f)) => {
                let rounded = (f * FLOAT_PRECISION).round() / FLOAT_PRECISION;
                if rounded.fract() == 0.0 && rounded.abs() < 1e15 {
                    out.push_str(&(rounded as i64).to_string());
                } else {
                    out.push_str(&format!("{rounded:?}"));
                }
            }
            _ => out.push_str(&n.to_string()),
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

/// A stored artifact, as seen by maintenance operations
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub digest: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
pub struct ContentAddressedCache {
    dir: PathBuf,
}

impl ContentAddressedCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Digest for `params` under `cache_type`.
    ///
    /// Objects are flattened with `cache_type` added; key order and float
    /// noise below 1e-6 do not change the result.
    pub fn key(cache_type: &str, params: &Value) -> String {
        let mut object = match params {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("params".to_string(), other.clone());
                map
            }
        };
        object.insert("cache_type".to_string(), Value::String(cache_type.to_string()));

        let mut hasher = Sha256::new();
        hasher.update(canonical_json(&Value::Object(object)).as_bytes());
        short_hex(hasher)
    }

    /// Path of the artifact stored under `digest`, if any
    pub fn get(&self, digest: &str) -> Option<PathBuf> {
        self.files_for(digest).into_iter().next()
    }

    /// Copy `source` into the cache as `<digest>.<ext>`.
    ///
    /// The copy goes to a temporary name first so readers never see a partial file.
    pub fn put(&self, source: impl AsRef<Path>, digest: &str) -> Result<PathBuf> {
        let source = source.as_ref();
        let file_name = match source.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{digest}.{ext}"),
            None => digest.to_string(),
        };
        let target = self.dir.join(&file_name);
        let staging = self
            .dir
            .join(format!(".{file_name}.{}.partial", std::process::id()));

        if let Err(e) = fs::copy(source, &staging).and_then(|_| fs::rename(&staging, &target)) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        log::debug!("Cached {:?} as {}", source, file_name);
        Ok(target)
    }

    /// Remove the artifact stored under `digest`. Returns whether anything was removed.
    pub fn invalidate(&self, digest: &str) -> Result<bool> {
        let files = self.files_for(digest);
        for file in &files {
            fs::remove_file(file)?;
        }
        if !files.is_empty() {
            log::info!("Invalidated cache entry {}", digest);
        }
        Ok(!files.is_empty())
    }

    /// All stored artifacts, oldest first
    pub fn entries(&self) -> Result<Vec<CacheEntryInfo>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(digest) = artifact_digest(&path) else {
                continue;
            };
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            entries.push(CacheEntryInfo {
                digest,
                size: meta.len(),
                modified: meta.modified()?,
                path,
            });
        }
        entries.sort_by_key(|e| e.modified);
        Ok(entries)
    }

    /// Evict entries older than `max_age`, then oldest-first until the
    /// total size is within `max_total_size`. Returns the number removed.
    pub fn cleanup(&self, max_age: Duration, max_total_size: u64) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut remaining = Vec::new();

        for entry in self.entries()? {
            let age = now.duration_since(entry.modified).unwrap_or_default();
            if age > max_age {
                fs::remove_file(&entry.path)?;
                removed += 1;
            } else {
                remaining.push(entry);
            }
        }

        let mut total: u64 = remaining.iter().map(|e| e.size).sum();
        for entry in &remaining {
            if total <= max_total_size {
                break;
            }
            fs::remove_file(&entry.path)?;
            total -= entry.size;
            removed += 1;
        }

        if removed > 0 {
            log::info!(
                "Cache cleanup removed {} entries, {} bytes remain",
                removed,
                total
            );
        }
        Ok(removed)
    }

    fn files_for(&self, digest: &str) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| artifact_digest(p).as_deref() == Some(digest))
            .collect();
        files.sort();
        files
    }
}

/// Digest of a cache artifact path; `None` for staging files and strays.
fn artifact_digest(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') {
        return None;
    }
    let stem = name.split_once('.').map_or(name, |(stem, _)| stem);
    (stem.len() == DIGEST_LEN && stem.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| stem.to_string())
}
