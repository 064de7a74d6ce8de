//! Modbank Plugin SDK
//! ==================
//!
//! Types shared between the module bank and the plugins it loads. A plugin
//! describes itself with a [`ModuleDecl`]: the capability it provides, the
//! shortcut names it answers to, its score and the configuration options it
//! declares. Dynamic plugins export that declaration through
//! [`declare_module!`]; statically linked modules hand a [`BuiltinEntry`]
//! to the bank directly.

mod decl;
mod options;

use std::os::raw::c_char;

pub use decl::{
    export_decl, take_decl, ActivateFn, BuiltinEntry, DeactivateFn, ModuleDecl, ProbeOutcome,
};
pub use options::{ConfigOption, OptionCallback, OptionError, OptionKind, OptionSpec, OptionValue};

/// Symbol every dynamic plugin exports to hand out its [`ModuleDecl`].
pub const ENTRY_SYMBOL: &str = "modbank_module_entry";

/// Symbol returning the ABI signature the plugin was built against.
pub const SIGNATURE_SYMBOL: &str = "modbank_abi_signature";

/// Build/ABI signature of this SDK. Plugins and cache files carrying a
/// different signature are rejected as a whole.
pub const ABI_SIGNATURE: &str = concat!("modbank-", env!("CARGO_PKG_VERSION"), "/abi-1");

#[doc(hidden)]
pub const ABI_SIGNATURE_C: &[u8] = concat!("modbank-", env!("CARGO_PKG_VERSION"), "/abi-1", "\0").as_bytes();

/// Raw entry point exported by dynamic plugins.
pub type RawEntryFn = unsafe extern "C" fn() -> *mut ModuleDecl;

/// Raw signature accessor exported by dynamic plugins.
pub type SignatureFn = unsafe extern "C" fn() -> *const c_char;

/// Common imports for plugin authors.
pub mod prelude {
    pub use crate::{
        declare_module, ConfigOption, ModuleDecl, OptionKind, OptionSpec, OptionValue,
        ProbeOutcome,
    };
}

/// Declare the entry points of a dynamic module.
///
/// The macro expects an expression evaluating to a [`ModuleDecl`]. It is
/// evaluated every time the host invokes the entry point, so it should be
/// cheap and free of side effects.
///
/// # Example
///
/// ```ignore
/// use modbank_sdk::prelude::*;
///
/// fn open(_ctx: &mut dyn std::any::Any) -> ProbeOutcome {
///     ProbeOutcome::Success
/// }
///
/// declare_module!(ModuleDecl::new("gain").capability("audio filter", 10).activate(open));
/// ```
#[macro_export]
macro_rules! declare_module {
    ($decl:expr) => {
        #[no_mangle]
        pub extern "C" fn modbank_abi_signature() -> *const ::std::os::raw::c_char {
            $crate::ABI_SIGNATURE_C.as_ptr() as *const ::std::os::raw::c_char
        }

        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn modbank_module_entry() -> *mut $crate::ModuleDecl {
            let decl: $crate::ModuleDecl = $decl;
            $crate::export_decl(decl)
        }
    };
}
