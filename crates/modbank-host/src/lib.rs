//! Code loading layer of the module bank.
//!
//! Everything `unsafe` about plugins lives here: mapping a shared object,
//! resolving its entry symbol and taking ownership of the declaration it
//! returns. The bank above only sees [`CodeLoader`] and [`LoadedCode`], so
//! tests and embedders can swap the shared-object loader for a
//! [`StaticLoader`] backed by an in-process table.

mod dylib;
mod error;
mod table;

use std::path::Path;

use modbank_sdk::{take_decl, BuiltinEntry, ModuleDecl, RawEntryFn};

pub use dylib::{DylibCode, DylibLoader};
pub use error::HostError;
pub use table::{LoaderStats, StaticLoader};

/// Maps plugin files into memory.
pub trait CodeLoader: Send + Sync {
    /// `fast` loads are used while populating the cache and may defer symbol
    /// resolution; non-fast loads precede execution and bind eagerly.
    fn load(&self, path: &Path, fast: bool) -> Result<Box<dyn LoadedCode>, HostError>;
}

/// Code of one plugin file. Dropping it unmaps the code.
pub trait LoadedCode: Send + Sync {
    fn path(&self) -> &Path;

    fn lookup_entry(&self) -> Result<EntryPoint<'_>, HostError>;
}

/// Entry point borrowed from a [`LoadedCode`]; it cannot outlive the mapping.
#[derive(Clone, Copy)]
pub enum EntryPoint<'a> {
    Raw { path: &'a Path, entry: RawEntryFn },
    Builtin { path: &'a Path, entry: BuiltinEntry },
}

/// Call an entry point and validate the declaration it hands back.
pub fn invoke_entry(entry: EntryPoint<'_>) -> Result<ModuleDecl, HostError> {
    let (path, decl) = match entry {
        EntryPoint::Raw { path, entry } => {
            // SAFETY: the signature check in `lookup_entry` guarantees the
            // plugin was built against the same SDK, so the pointer comes
            // from `export_decl`.
            let decl = unsafe { take_decl(entry()) };
            (path, decl.ok_or_else(|| HostError::NullDescriptor(path.to_path_buf()))?)
        }
        EntryPoint::Builtin { path, entry } => (path, entry()),
    };
    if decl.object_name().is_empty() {
        return Err(HostError::Corrupt(
            path.to_path_buf(),
            "module declares no object name".into(),
        ));
    }
    Ok(decl)
}

/// Load a file, resolve its entry and invoke it in one step.
pub fn load_module(
    loader: &dyn CodeLoader,
    path: &Path,
    fast: bool,
) -> Result<(Box<dyn LoadedCode>, ModuleDecl), HostError> {
    let code = loader.load(path, fast)?;
    let decl = invoke_entry(code.lookup_entry()?)?;
    Ok((code, decl))
}

/// Release mapped code. Callers must make sure nothing derived from it is
/// still in use.
pub fn unload(code: Box<dyn LoadedCode>) {
    tracing::trace!(path = %code.path().display(), "unloading plugin code");
    drop(code);
}
