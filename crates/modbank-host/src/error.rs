use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while mapping plugin code or reading its entry.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("plugin binary not found at {0}")]
    MissingBinary(PathBuf),
    #[error("failed to load plugin library {path}: {source}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("plugin {path} does not export `{symbol}`")]
    MissingEntry { path: PathBuf, symbol: &'static str },
    #[error("plugin {path} was built for `{found}`, host expects `{expected}`")]
    SignatureMismatch {
        path: PathBuf,
        found: String,
        expected: &'static str,
    },
    #[error("plugin {0} returned no module declaration")]
    NullDescriptor(PathBuf),
    #[error("plugin {0} is corrupt: {1}")]
    Corrupt(PathBuf, String),
}

impl HostError {
    pub(crate) fn missing_entry(path: impl Into<PathBuf>, symbol: &'static str) -> Self {
        HostError::MissingEntry {
            path: path.into(),
            symbol,
        }
    }

    /// Whether the file itself is at fault, as opposed to the environment.
    pub fn is_corrupt_module(&self) -> bool {
        matches!(
            self,
            HostError::MissingEntry { .. }
                | HostError::SignatureMismatch { .. }
                | HostError::NullDescriptor(_)
                | HostError::Corrupt(..)
        )
    }
}
