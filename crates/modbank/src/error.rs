use std::path::PathBuf;

use thiserror::Error;

use modbank_host::HostError;
use modbank_sdk::OptionError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum BankError {
    #[error("module bank is not initialized")]
    NotInitialized,
    #[error("no module named `{0}`")]
    UnknownModule(String),
    #[error("module `{module}` has no option `{option}`")]
    UnknownOption { module: String, option: String },
    #[error(transparent)]
    Option(#[from] OptionError),
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Why a capability request produced no module.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Nothing in the bank provides the capability under the given request.
    #[error("no {capability} module matched \"{requested}\"")]
    NoMatch {
        capability: String,
        requested: String,
    },
    /// Candidates exist but every activation attempt failed.
    #[error("no {capability} module matching \"{requested}\" could be loaded ({candidates} tried)")]
    AllFailed {
        capability: String,
        requested: String,
        candidates: usize,
    },
}
