use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use modbank_sdk::{ModuleDecl, OptionSpec};

/// Cache validity key of a plugin file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    pub path: PathBuf,
    pub size: u64,
    /// Seconds since the Unix epoch; negative for pre-epoch timestamps.
    pub mtime: i64,
}

impl FileIdentity {
    pub fn new(path: impl Into<PathBuf>, size: u64, mtime: i64) -> Self {
        Self {
            path: path.into(),
            size,
            mtime,
        }
    }

    pub fn from_metadata(path: impl Into<PathBuf>, metadata: &Metadata) -> Self {
        let mtime = metadata
            .modified()
            .map(|modified| match modified.duration_since(UNIX_EPOCH) {
                Ok(after) => after.as_secs() as i64,
                Err(before) => -(before.duration().as_secs() as i64),
            })
            .unwrap_or(0);
        Self::new(path, metadata.len(), mtime)
    }

    pub fn stat(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self::from_metadata(path, &metadata))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredOption {
    pub spec: OptionSpec,
    pub has_callback: bool,
}

/// Static description of a module, independent of whether its code is mapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub capability: Option<String>,
    pub shortcuts: Vec<String>,
    pub score: i32,
    pub long_name: Option<String>,
    pub help: Option<String>,
    pub options: Vec<DeclaredOption>,
    pub unloadable: bool,
}

impl Descriptor {
    pub fn from_decl(decl: &ModuleDecl) -> Self {
        Self {
            capability: decl.capability.clone(),
            shortcuts: decl.shortcuts.clone(),
            score: decl.score,
            long_name: decl.long_name.clone(),
            help: decl.help.clone(),
            options: decl
                .options
                .iter()
                .map(|option| DeclaredOption {
                    spec: option.spec.clone(),
                    has_callback: option.has_callback(),
                })
                .collect(),
            unloadable: !decl.requires_code(),
        }
    }

    pub fn object_name(&self) -> &str {
        self.shortcuts.first().map(String::as_str).unwrap_or_default()
    }

    /// Long name when requested and present, otherwise the object name.
    pub fn display_name(&self, long: bool) -> &str {
        match &self.long_name {
            Some(long_name) if long => long_name.as_str(),
            _ => self.object_name(),
        }
    }

    pub fn is_capable(&self, capability: &str) -> bool {
        self.capability.as_deref() == Some(capability)
    }

    pub fn requires_code(&self) -> bool {
        self.options.iter().any(|option| option.has_callback)
    }

    pub fn public_options(&self) -> impl Iterator<Item = &OptionSpec> {
        self.options
            .iter()
            .map(|option| &option.spec)
            .filter(|spec| spec.is_public())
    }
}

/// One record of a directory cache. A `None` module marks a junk file: it
/// matched the naming convention but could not be loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub identity: FileIdentity,
    pub module: Option<Descriptor>,
}

impl CacheEntry {
    pub fn module(identity: FileIdentity, descriptor: Descriptor) -> Self {
        Self {
            identity,
            module: Some(descriptor),
        }
    }

    pub fn junk(identity: FileIdentity) -> Self {
        Self {
            identity,
            module: None,
        }
    }

    pub fn is_junk(&self) -> bool {
        self.module.is_none()
    }
}

#[cfg(test)]
mod tests {
    use modbank_sdk::{ConfigOption, OptionKind, OptionValue};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    fn on_change(_name: &str, _value: &OptionValue) {}

    #[test]
    fn descriptor_tracks_callback_options() {
        let decl = ModuleDecl::new("osd")
            .capability("sub source", 5)
            .long_name("On screen display")
            .option(ConfigOption::new("osd", "Show OSD", OptionKind::Bool { default: true }))
            .option(
                ConfigOption::new("osd-size", "Size", OptionKind::Bool { default: false })
                    .with_callback(on_change)
                    .internal(),
            );
        let descriptor = Descriptor::from_decl(&decl);
        assert!(!descriptor.unloadable);
        assert!(descriptor.requires_code());
        assert_eq!(descriptor.display_name(true), "On screen display");
        assert_eq!(descriptor.display_name(false), "osd");
        let public: Vec<_> = descriptor.public_options().map(|o| o.name.as_str()).collect();
        assert_eq!(public, vec!["osd"]);
    }

    #[test]
    fn identity_reflects_file_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a_plugin.so");
        fs::write(&path, b"12345").unwrap();
        let identity = FileIdentity::stat(&path).unwrap();
        assert_eq!(identity.size, 5);
        assert_eq!(identity.path, path);
        assert!(identity.mtime > 0);
    }
}
