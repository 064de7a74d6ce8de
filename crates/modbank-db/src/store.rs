use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bincode::Options;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use modbank_sdk::ABI_SIGNATURE;

use crate::entry::{CacheEntry, FileIdentity};

/// File name of the per-directory cache.
pub const CACHE_FILE_NAME: &str = "modbank-cache.dat";

const MAGIC: &[u8; 8] = b"MODBANK\x01";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to access plugin cache: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode plugin cache: {0}")]
    Codec(#[from] bincode::Error),
    #[error("not a plugin cache file")]
    BadMagic,
    #[error("plugin cache was written by `{found}`, expected `{expected}`")]
    SignatureMismatch { found: String, expected: String },
}

/// How a scan treats the on-disk cache. Exactly one is active per scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Trust and read the cache, write it back after the scan.
    #[default]
    UseCache,
    /// Delete the cache, rescan everything and write a fresh cache.
    ResetCache,
    /// Never read or write the cache file.
    IgnoreCache,
}

impl CachePolicy {
    pub fn reads_cache(self) -> bool {
        matches!(self, CachePolicy::UseCache)
    }

    pub fn writes_cache(self) -> bool {
        !matches!(self, CachePolicy::IgnoreCache)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CachePolicy::UseCache => "use-cache",
            CachePolicy::ResetCache => "reset-cache",
            CachePolicy::IgnoreCache => "ignore-cache",
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "use-cache" | "use" => Ok(CachePolicy::UseCache),
            "reset-cache" | "reset" => Ok(CachePolicy::ResetCache),
            "ignore-cache" | "ignore" => Ok(CachePolicy::IgnoreCache),
            other => Err(format!("unknown cache policy: {other}")),
        }
    }
}

/// Decoded contents of a cache file.
#[derive(Debug)]
pub struct CacheContents {
    pub written_at: DateTime<Utc>,
    pub entries: Vec<CacheEntry>,
}

fn codec(limit: usize) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(limit as u64)
}

/// Serialize entries into a cache blob tagged with this build's signature.
///
/// Every entry is encoded on its own so a damaged record only loses itself.
pub fn encode(entries: &[CacheEntry]) -> Result<Vec<u8>, CacheError> {
    let mut out = MAGIC.to_vec();
    bincode::serialize_into(&mut out, ABI_SIGNATURE)?;
    bincode::serialize_into(&mut out, &Utc::now())?;
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        match bincode::serialize(entry) {
            Ok(record) => records.push(record),
            Err(err) => log::warn!(
                "not caching {}: {}",
                entry.identity.path.display(),
                err
            ),
        }
    }
    bincode::serialize_into(&mut out, &records)?;
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<CacheContents, CacheError> {
    let mut reader = bytes.strip_prefix(MAGIC.as_slice()).ok_or(CacheError::BadMagic)?;
    let limit = bytes.len();
    let signature: String = codec(limit).deserialize_from(&mut reader)?;
    if signature != ABI_SIGNATURE {
        return Err(CacheError::SignatureMismatch {
            found: signature,
            expected: ABI_SIGNATURE.to_string(),
        });
    }
    let written_at: DateTime<Utc> = codec(limit).deserialize_from(&mut reader)?;
    let records: Vec<Vec<u8>> = codec(limit).deserialize_from(&mut reader)?;
    let entries: Vec<CacheEntry> = records
        .iter()
        .filter_map(|record| match codec(record.len()).deserialize(record) {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::debug!("dropping unreadable cache record: {err}");
                None
            }
        })
        .collect();
    Ok(CacheContents {
        written_at,
        entries,
    })
}

/// Reads and writes the cache file of scanned plugin directories.
#[derive(Debug, Clone)]
pub struct CacheStore {
    file_name: String,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self::with_file_name(CACHE_FILE_NAME)
    }

    pub fn with_file_name(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    pub fn cache_path(&self, directory: &Path) -> PathBuf {
        directory.join(&self.file_name)
    }

    /// Load the cache of `directory`, reporting why it could not be used.
    pub fn try_load(&self, directory: &Path) -> Result<CacheContents, CacheError> {
        let raw = fs::read(self.cache_path(directory))?;
        decode(&raw)
    }

    /// Load the cache of `directory`. Any failure yields an empty set.
    pub fn load(&self, directory: &Path) -> Vec<CacheEntry> {
        match self.try_load(directory) {
            Ok(contents) => {
                log::debug!(
                    "loaded {} cache entries for {} (written {})",
                    contents.entries.len(),
                    directory.display(),
                    contents.written_at
                );
                contents.entries
            }
            Err(CacheError::Io(err)) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                log::debug!("ignoring plugin cache in {}: {}", directory.display(), err);
                Vec::new()
            }
        }
    }

    /// Atomically replace the cache of `directory`.
    pub fn save(&self, directory: &Path, entries: &[CacheEntry]) -> Result<(), CacheError> {
        let blob = encode(entries)?;
        let path = self.cache_path(directory);
        let tmp = path.with_extension("dat.tmp");
        if let Err(err) = fs::write(&tmp, &blob).and_then(|_| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        log::debug!("saved {} cache entries to {}", entries.len(), path.display());
        Ok(())
    }

    pub fn delete(&self, directory: &Path) -> Result<(), CacheError> {
        match fs::remove_file(self.cache_path(directory)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Cached entries of one directory, keyed by plugin path.
#[derive(Debug, Default)]
pub struct CacheIndex {
    entries: HashMap<PathBuf, CacheEntry>,
}

impl CacheIndex {
    pub fn from_entries(entries: Vec<CacheEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.identity.path.clone(), entry))
                .collect(),
        }
    }

    /// Returns the cached entry only when path, size and mtime all match.
    pub fn find(&self, identity: &FileIdentity) -> Option<&CacheEntry> {
        self.entries
            .get(&identity.path)
            .filter(|entry| entry.identity == *identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
