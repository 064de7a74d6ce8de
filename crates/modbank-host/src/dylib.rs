use std::ffi::CStr;
use std::fmt;
use std::path::{Path, PathBuf};

use libloading::Library;

use modbank_sdk::{RawEntryFn, SignatureFn, ABI_SIGNATURE, ENTRY_SYMBOL, SIGNATURE_SYMBOL};

use crate::{CodeLoader, EntryPoint, HostError, LoadedCode};

/// Loads plugins as shared objects through the platform dynamic linker.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl CodeLoader for DylibLoader {
    fn load(&self, path: &Path, fast: bool) -> Result<Box<dyn LoadedCode>, HostError> {
        if !path.exists() {
            return Err(HostError::MissingBinary(path.to_path_buf()));
        }
        // SAFETY: mapping a library runs its initializers. Only files that
        // follow the plugin naming convention are handed to this loader.
        let library = unsafe { open(path, fast) }.map_err(|source| HostError::LibraryLoad {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::trace!(path = %path.display(), fast, "mapped plugin library");
        Ok(Box::new(DylibCode {
            path: path.to_path_buf(),
            library,
        }))
    }
}

#[cfg(unix)]
unsafe fn open(path: &Path, fast: bool) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LAZY, RTLD_LOCAL, RTLD_NOW};

    let binding = if fast { RTLD_LAZY } else { RTLD_NOW };
    UnixLibrary::open(Some(path), binding | RTLD_LOCAL).map(Library::from)
}

#[cfg(not(unix))]
unsafe fn open(path: &Path, _fast: bool) -> Result<Library, libloading::Error> {
    Library::new(path)
}

/// A mapped shared object.
pub struct DylibCode {
    path: PathBuf,
    library: Library,
}

impl DylibCode {
    fn signature(&self) -> Result<String, HostError> {
        // SAFETY: the symbol type matches what `declare_module!` exports.
        unsafe {
            let accessor = self
                .library
                .get::<SignatureFn>(SIGNATURE_SYMBOL.as_bytes())
                .map_err(|_| HostError::missing_entry(&self.path, SIGNATURE_SYMBOL))?;
            let raw = accessor();
            if raw.is_null() {
                return Err(HostError::Corrupt(
                    self.path.clone(),
                    "null ABI signature".into(),
                ));
            }
            Ok(CStr::from_ptr(raw).to_string_lossy().into_owned())
        }
    }
}

impl LoadedCode for DylibCode {
    fn path(&self) -> &Path {
        &self.path
    }

    fn lookup_entry(&self) -> Result<EntryPoint<'_>, HostError> {
        let found = self.signature()?;
        if found != ABI_SIGNATURE {
            return Err(HostError::SignatureMismatch {
                path: self.path.clone(),
                found,
                expected: ABI_SIGNATURE,
            });
        }
        // SAFETY: the signature matched, so the symbol has the SDK's type.
        let entry = unsafe {
            self.library
                .get::<RawEntryFn>(ENTRY_SYMBOL.as_bytes())
                .map_err(|_| HostError::missing_entry(&self.path, ENTRY_SYMBOL))?
        };
        Ok(EntryPoint::Raw {
            path: &self.path,
            entry: *entry,
        })
    }
}

impl fmt::Debug for DylibCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DylibCode")
            .field("path", &self.path)
            .finish()
    }
}
