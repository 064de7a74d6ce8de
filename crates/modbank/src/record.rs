use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use modbank_db::{Descriptor, FileIdentity};
use modbank_host::{load_module, CodeLoader, HostError, LoadedCode};
use modbank_sdk::{ActivateFn, DeactivateFn, ModuleDecl, OptionCallback};

/// Stable identifier of a module inside one bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleId(pub(crate) u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A declaration together with the code it points into.
///
/// Field order matters: the declaration holds function pointers into `_code`
/// and must be dropped before the mapping goes away.
pub(crate) struct ResidentCode {
    decl: ModuleDecl,
    _code: Option<Box<dyn LoadedCode>>,
}

impl ResidentCode {
    pub(crate) fn builtin(decl: ModuleDecl) -> Self {
        Self { decl, _code: None }
    }

    pub(crate) fn mapped(decl: ModuleDecl, code: Box<dyn LoadedCode>) -> Self {
        Self {
            decl,
            _code: Some(code),
        }
    }

    pub(crate) fn activate(&self) -> Option<ActivateFn> {
        self.decl.activate
    }

    pub(crate) fn deactivate(&self) -> Option<DeactivateFn> {
        self.decl.deactivate
    }

    pub(crate) fn option_callback(&self, name: &str) -> Option<OptionCallback> {
        self.decl
            .options
            .iter()
            .find(|option| option.name() == name)
            .and_then(|option| option.callback)
    }
}

/// Code state of a module discovered in a plugin file.
pub(crate) struct PluginCode {
    identity: FileIdentity,
    resident: Mutex<Option<Arc<ResidentCode>>>,
}

impl PluginCode {
    pub(crate) fn new(identity: FileIdentity, resident: Option<ResidentCode>) -> Self {
        Self {
            identity,
            resident: Mutex::new(resident.map(Arc::new)),
        }
    }

    pub(crate) fn identity(&self) -> &FileIdentity {
        &self.identity
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.resident.lock().is_some()
    }

    /// Map the code for execution unless it already is.
    fn ensure_loaded(
        &self,
        loader: &dyn CodeLoader,
        object_name: &str,
    ) -> Result<Arc<ResidentCode>, HostError> {
        let mut slot = self.resident.lock();
        if let Some(resident) = slot.as_ref() {
            return Ok(Arc::clone(resident));
        }
        let (code, decl) = load_module(loader, &self.identity.path, false)?;
        if decl.object_name() != object_name {
            return Err(HostError::Corrupt(
                self.identity.path.clone(),
                format!(
                    "declares `{}` but was registered as `{object_name}`",
                    decl.object_name()
                ),
            ));
        }
        tracing::debug!(path = %self.identity.path.display(), "plugin code loaded");
        let resident = Arc::new(ResidentCode::mapped(decl, code));
        *slot = Some(Arc::clone(&resident));
        Ok(resident)
    }

    /// Drop the mapping if nothing outside the bank references it.
    fn release_if_idle(&self) -> bool {
        let mut slot = self.resident.lock();
        match slot.as_ref() {
            Some(resident) if Arc::strong_count(resident) == 1 => {
                *slot = None;
                true
            }
            _ => false,
        }
    }
}

pub(crate) enum Origin {
    Builtin(Arc<ResidentCode>),
    Plugin(PluginCode),
}

/// Arena entry of the bank.
pub(crate) struct ModuleRecord {
    pub(crate) id: ModuleId,
    pub(crate) descriptor: Descriptor,
    pub(crate) origin: Origin,
}

impl ModuleRecord {
    pub(crate) fn object_name(&self) -> &str {
        self.descriptor.object_name()
    }

    pub(crate) fn plugin(&self) -> Option<&PluginCode> {
        match &self.origin {
            Origin::Plugin(plugin) => Some(plugin),
            Origin::Builtin(_) => None,
        }
    }

    pub(crate) fn is_loaded(&self) -> bool {
        match &self.origin {
            Origin::Builtin(_) => true,
            Origin::Plugin(plugin) => plugin.is_loaded(),
        }
    }

    /// Code of the module, loading it first when needed.
    pub(crate) fn resident(&self, loader: &dyn CodeLoader) -> Result<Arc<ResidentCode>, HostError> {
        match &self.origin {
            Origin::Builtin(resident) => Ok(Arc::clone(resident)),
            Origin::Plugin(plugin) => plugin.ensure_loaded(loader, self.object_name()),
        }
    }

    /// Unload idle code. Modules whose code must stay mapped are left alone.
    pub(crate) fn reclaim(&self) -> bool {
        match &self.origin {
            Origin::Plugin(plugin) if self.descriptor.unloadable => plugin.release_if_idle(),
            _ => false,
        }
    }

    /// Code still referenced from outside the bank.
    pub(crate) fn in_use(&self) -> bool {
        match &self.origin {
            Origin::Builtin(_) => false,
            Origin::Plugin(plugin) => plugin
                .resident
                .lock()
                .as_ref()
                .is_some_and(|resident| Arc::strong_count(resident) > 1),
        }
    }

    pub(crate) fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: self.id,
            descriptor: self.descriptor.clone(),
            file: self.plugin().map(|plugin| plugin.identity().clone()),
            loaded: self.is_loaded(),
        }
    }
}

/// Snapshot of a module as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub descriptor: Descriptor,
    /// `None` for statically linked modules.
    pub file: Option<FileIdentity>,
    pub loaded: bool,
}

impl ModuleInfo {
    pub fn object_name(&self) -> &str {
        self.descriptor.object_name()
    }

    pub fn is_builtin(&self) -> bool {
        self.file.is_none()
    }
}

/// A module that accepted a capability request.
///
/// Holding the handle keeps the module's code mapped. Give it back with
/// [`ModuleBank::release`](crate::ModuleBank::release).
pub struct ModuleHandle {
    pub(crate) record: Arc<ModuleRecord>,
    pub(crate) resident: Arc<ResidentCode>,
    pub(crate) alias: Option<String>,
    pub(crate) forced: bool,
}

impl ModuleHandle {
    pub fn id(&self) -> ModuleId {
        self.record.id
    }

    pub fn object_name(&self) -> &str {
        self.record.object_name()
    }

    /// The alias requested with `name@alias`, or the object name.
    pub fn name(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.object_name())
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.record.descriptor
    }

    /// The module was picked by name from a strict list.
    pub fn is_forced(&self) -> bool {
        self.forced
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("id", &self.record.id)
            .field("object_name", &self.object_name())
            .field("alias", &self.alias)
            .field("forced", &self.forced)
            .finish()
    }
}
