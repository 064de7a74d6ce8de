use std::any::Any;

use crate::options::ConfigOption;

/// Result of one activation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeOutcome {
    /// The module accepted the request; resolution stops here.
    Success,
    /// The caller's operation was cancelled; resolution stops without error.
    Aborted,
    /// The module declined; the next candidate is tried.
    Failed,
}

/// Activation entry of a module. The context is whatever the capability's
/// contract says it is; modules downcast it to the concrete type they expect.
pub type ActivateFn = fn(ctx: &mut dyn Any) -> ProbeOutcome;

pub type DeactivateFn = fn(ctx: &mut dyn Any);

/// Entry point of a statically linked module.
pub type BuiltinEntry = fn() -> ModuleDecl;

/// Everything a module tells the bank about itself.
#[derive(Debug, Clone)]
pub struct ModuleDecl {
    pub capability: Option<String>,
    /// The first shortcut is the canonical object name.
    pub shortcuts: Vec<String>,
    pub score: i32,
    pub long_name: Option<String>,
    pub help: Option<String>,
    pub options: Vec<ConfigOption>,
    pub activate: Option<ActivateFn>,
    pub deactivate: Option<DeactivateFn>,
}

impl ModuleDecl {
    pub fn new(object_name: impl Into<String>) -> Self {
        Self {
            capability: None,
            shortcuts: vec![object_name.into()],
            score: 0,
            long_name: None,
            help: None,
            options: Vec::new(),
            activate: None,
            deactivate: None,
        }
    }

    pub fn capability(mut self, capability: impl Into<String>, score: i32) -> Self {
        self.capability = Some(capability.into());
        self.score = score;
        self
    }

    pub fn shortcut(mut self, shortcut: impl Into<String>) -> Self {
        self.shortcuts.push(shortcut.into());
        self
    }

    pub fn long_name(mut self, long_name: impl Into<String>) -> Self {
        self.long_name = Some(long_name.into());
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn option(mut self, option: ConfigOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn activate(mut self, activate: ActivateFn) -> Self {
        self.activate = Some(activate);
        self
    }

    pub fn deactivate(mut self, deactivate: DeactivateFn) -> Self {
        self.deactivate = Some(deactivate);
        self
    }

    pub fn object_name(&self) -> &str {
        self.shortcuts.first().map(String::as_str).unwrap_or_default()
    }

    /// Whether the module's code must stay mapped for as long as it is known.
    pub fn requires_code(&self) -> bool {
        self.options.iter().any(ConfigOption::has_callback)
    }
}

/// Move a declaration across the entry point boundary.
pub fn export_decl(decl: ModuleDecl) -> *mut ModuleDecl {
    Box::into_raw(Box::new(decl))
}

/// Take back a declaration produced by [`export_decl`].
///
/// Returns `None` for a null pointer.
///
/// # Safety
///
/// `ptr` must be null or come from [`export_decl`] in a module built against
/// the same SDK signature, and must not be used afterwards.
pub unsafe fn take_decl(ptr: *mut ModuleDecl) -> Option<ModuleDecl> {
    if ptr.is_null() {
        None
    } else {
        Some(*Box::from_raw(ptr))
    }
}
