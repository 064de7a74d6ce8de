//! Persistent descriptor cache used by the module bank.
//!
//! One cache file lives in every scanned plugin directory. It maps each
//! plugin file's identity (path, size, modification time) to the descriptor
//! obtained the last time the file was loaded, so unchanged plugins do not
//! have to be mapped and executed on every startup.

mod entry;
mod store;

pub use entry::*;
pub use store::*;
