use std::collections::HashSet;
use std::env::consts::DLL_SUFFIX;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use modbank_db::{CacheEntry, CacheIndex, CachePolicy, CacheStore, Descriptor, FileIdentity};
use modbank_host::{load_module, unload, CodeLoader, HostError};

use crate::config::DEFAULT_MAX_DEPTH;
use crate::record::ResidentCode;

/// Stem suffix every plugin file name carries before the platform extension.
pub const PLUGIN_SUFFIX: &str = "_plugin";

/// Prefix reserved for the bank's own libraries.
pub const RESERVED_PREFIX: &str = "libmodbank";

/// Whether `file_name` follows the plugin naming convention.
pub fn is_plugin_file(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    if lower.starts_with(RESERVED_PREFIX) {
        return false;
    }
    lower
        .strip_suffix(DLL_SUFFIX)
        .and_then(|stem| stem.strip_suffix(PLUGIN_SUFFIX))
        .is_some_and(|name| !name.is_empty())
}

/// A module found during a scan.
pub struct ScannedPlugin {
    pub identity: FileIdentity,
    pub descriptor: Descriptor,
    pub(crate) resident: Option<ResidentCode>,
}

impl ScannedPlugin {
    pub fn is_loaded(&self) -> bool {
        self.resident.is_some()
    }
}

/// Counters of one scan.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Roots that existed and were walked.
    pub roots: usize,
    /// Modules taken from the cache without loading their file.
    pub cached: usize,
    /// Modules whose file had to be loaded.
    pub loaded: usize,
    /// Files that match the naming convention but hold no usable module.
    pub junk: usize,
    /// Cache files written back.
    pub caches_written: usize,
}

impl ScanReport {
    pub fn modules(&self) -> usize {
        self.cached + self.loaded
    }
}

/// Walks plugin roots and turns plugin files into descriptors.
pub struct Scanner {
    loader: Arc<dyn CodeLoader>,
    store: CacheStore,
    max_depth: usize,
}

impl Scanner {
    pub fn new(loader: Arc<dyn CodeLoader>) -> Self {
        Self {
            loader,
            store: CacheStore::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_store(mut self, store: CacheStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Scan every root in order. A file reachable from several roots is
    /// only reported once, under the first root that reached it.
    pub fn scan_all(&self, roots: &[PathBuf], policy: CachePolicy) -> (Vec<ScannedPlugin>, ScanReport) {
        let mut report = ScanReport::default();
        let mut seen = HashSet::new();
        let mut plugins = Vec::new();
        for root in roots {
            plugins.extend(self.scan_dir(root, policy, &mut seen, &mut report));
        }
        info!(
            roots = report.roots,
            cached = report.cached,
            loaded = report.loaded,
            junk = report.junk,
            "plugin scan finished"
        );
        (plugins, report)
    }

    pub fn scan_root(&self, root: &Path, policy: CachePolicy) -> (Vec<ScannedPlugin>, ScanReport) {
        self.scan_all(&[root.to_path_buf()], policy)
    }

    fn scan_dir(
        &self,
        root: &Path,
        policy: CachePolicy,
        seen: &mut HashSet<PathBuf>,
        report: &mut ScanReport,
    ) -> Vec<ScannedPlugin> {
        if !root.is_dir() {
            debug!(root = %root.display(), "skipping missing plugin root");
            return Vec::new();
        }
        report.roots += 1;

        if policy == CachePolicy::ResetCache {
            if let Err(err) = self.store.delete(root) {
                warn!(root = %root.display(), error = %err, "failed to remove plugin cache");
            }
        }
        let cache = if policy.reads_cache() {
            CacheIndex::from_entries(self.store.load(root))
        } else {
            CacheIndex::default()
        };

        let mut fresh = Vec::new();
        let mut plugins = Vec::new();
        let walker = WalkDir::new(root)
            .max_depth(self.max_depth + 1)
            .follow_links(true)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str() else {
                continue;
            };
            if !is_plugin_file(file_name) {
                continue;
            }
            let canonical = fs::canonicalize(entry.path()).unwrap_or_else(|_| entry.path().to_path_buf());
            if !seen.insert(canonical) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    debug!(path = %entry.path().display(), error = %err, "cannot stat plugin");
                    continue;
                }
            };
            let identity = FileIdentity::from_metadata(entry.path(), &metadata);

            match cache.find(&identity) {
                Some(cached) => match &cached.module {
                    None => {
                        report.junk += 1;
                        fresh.push(cached.clone());
                    }
                    Some(descriptor) if !descriptor.requires_code() => {
                        report.cached += 1;
                        fresh.push(cached.clone());
                        plugins.push(ScannedPlugin {
                            identity,
                            descriptor: descriptor.clone(),
                            resident: None,
                        });
                    }
                    // Option callbacks live in the plugin's code.
                    Some(_) => self.load_file(identity, &mut fresh, &mut plugins, report),
                },
                None => self.load_file(identity, &mut fresh, &mut plugins, report),
            }
        }

        if policy.writes_cache() {
            match self.store.save(root, &fresh) {
                Ok(()) => report.caches_written += 1,
                Err(err) => {
                    warn!(root = %root.display(), error = %err, "failed to write plugin cache")
                }
            }
        }
        plugins
    }

    fn load_file(
        &self,
        identity: FileIdentity,
        fresh: &mut Vec<CacheEntry>,
        plugins: &mut Vec<ScannedPlugin>,
        report: &mut ScanReport,
    ) {
        match load_module(self.loader.as_ref(), &identity.path, true) {
            Ok((code, decl)) => {
                let descriptor = Descriptor::from_decl(&decl);
                let resident = if decl.requires_code() {
                    Some(ResidentCode::mapped(decl, code))
                } else {
                    drop(decl);
                    unload(code);
                    None
                };
                debug!(
                    path = %identity.path.display(),
                    module = descriptor.object_name(),
                    resident = resident.is_some(),
                    "plugin loaded"
                );
                report.loaded += 1;
                fresh.push(CacheEntry::module(identity.clone(), descriptor.clone()));
                plugins.push(ScannedPlugin {
                    identity,
                    descriptor,
                    resident,
                });
            }
            Err(HostError::MissingBinary(path)) => {
                debug!(path = %path.display(), "plugin vanished during scan");
            }
            Err(err) => {
                warn!(path = %identity.path.display(), error = %err, "cannot load plugin");
                report.junk += 1;
                fresh.push(CacheEntry::junk(identity));
            }
        }
    }
}
