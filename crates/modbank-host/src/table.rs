use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use modbank_sdk::BuiltinEntry;

use crate::{CodeLoader, EntryPoint, HostError, LoadedCode};

/// Counters shared by a [`StaticLoader`] and the code it hands out.
#[derive(Debug, Default)]
pub struct LoaderStats {
    loads: AtomicUsize,
    fast_loads: AtomicUsize,
    resident: AtomicUsize,
}

impl LoaderStats {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn fast_loads(&self) -> usize {
        self.fast_loads.load(Ordering::SeqCst)
    }

    /// Code objects currently alive.
    pub fn resident(&self) -> usize {
        self.resident.load(Ordering::SeqCst)
    }
}

/// Loader resolving plugin files against an in-process table of entries,
/// keyed by file name. The file must still exist on disk, so identities and
/// cache validation behave exactly as with shared objects.
#[derive(Debug, Default, Clone)]
pub struct StaticLoader {
    modules: Arc<RwLock<HashMap<OsString, Option<BuiltinEntry>>>>,
    stats: Arc<LoaderStats>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(self, file_name: impl Into<OsString>, entry: BuiltinEntry) -> Self {
        self.register(file_name, entry);
        self
    }

    /// A file that maps fine but exports no entry point.
    pub fn with_broken(self, file_name: impl Into<OsString>) -> Self {
        self.modules.write().insert(file_name.into(), None);
        self
    }

    pub fn register(&self, file_name: impl Into<OsString>, entry: BuiltinEntry) {
        self.modules.write().insert(file_name.into(), Some(entry));
    }

    pub fn stats(&self) -> &LoaderStats {
        &self.stats
    }
}

impl CodeLoader for StaticLoader {
    fn load(&self, path: &Path, fast: bool) -> Result<Box<dyn LoadedCode>, HostError> {
        if !path.exists() {
            return Err(HostError::MissingBinary(path.to_path_buf()));
        }
        let entry = path
            .file_name()
            .and_then(|name| self.modules.read().get(name).copied())
            .ok_or_else(|| HostError::Corrupt(path.to_path_buf(), "not a known module".into()))?;

        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        if fast {
            self.stats.fast_loads.fetch_add(1, Ordering::SeqCst);
        }
        self.stats.resident.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StaticCode {
            path: path.to_path_buf(),
            entry,
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct StaticCode {
    path: PathBuf,
    entry: Option<BuiltinEntry>,
    stats: Arc<LoaderStats>,
}

impl LoadedCode for StaticCode {
    fn path(&self) -> &Path {
        &self.path
    }

    fn lookup_entry(&self) -> Result<EntryPoint<'_>, HostError> {
        let entry = self
            .entry
            .ok_or_else(|| HostError::missing_entry(&self.path, modbank_sdk::ENTRY_SYMBOL))?;
        Ok(EntryPoint::Builtin {
            path: &self.path,
            entry,
        })
    }
}

impl Drop for StaticCode {
    fn drop(&mut self) {
        self.stats.resident.fetch_sub(1, Ordering::SeqCst);
    }
}
