//! Modbank
//! =======
//!
//! Discovers plugin modules on disk, remembers what they declare in a per
//! directory cache and hands out the best module for a capability request.
//!
//! ```no_run
//! use modbank::{BankConfig, ModuleBank, ProbeOutcome};
//!
//! let bank = ModuleBank::new(BankConfig::default());
//! bank.init();
//! bank.load_plugins().unwrap();
//! let resolution = bank.resolve("audio output", Some("pulse,any"), false, |candidate| {
//!     println!("trying {}", candidate.object_name());
//!     ProbeOutcome::Success
//! });
//! println!("{resolution:?}");
//! bank.teardown();
//! ```

mod bank;
mod builtin;
mod config;
mod error;
mod record;
mod resolver;
mod scanner;

pub use bank::ModuleBank;
pub use builtin::{main_module, MAIN_MODULE};
pub use config::{BankConfig, DEFAULT_MAX_DEPTH, PLUGIN_PATH_ENV};
pub use error::{BankError, ConfigError, ResolveError};
pub use record::{ModuleHandle, ModuleId, ModuleInfo};
pub use resolver::{
    parse_request, Candidate, Priority, RankedCandidate, Request, Resolution, Token,
    SHORTCUT_BONUS,
};
pub use scanner::{is_plugin_file, ScanReport, ScannedPlugin, Scanner, PLUGIN_SUFFIX, RESERVED_PREFIX};

pub use modbank_db::{CachePolicy, CacheStore, Descriptor, FileIdentity};
pub use modbank_host::{CodeLoader, DylibLoader, HostError, StaticLoader};
pub use modbank_sdk::{
    BuiltinEntry, ConfigOption, ModuleDecl, OptionKind, OptionSpec, OptionValue, ProbeOutcome,
};
