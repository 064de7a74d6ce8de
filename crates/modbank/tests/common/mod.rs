#![allow(dead_code)]

use std::env::consts::DLL_SUFFIX;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modbank::{BankConfig, ModuleBank, ModuleDecl, StaticLoader, PLUGIN_SUFFIX};

pub fn plugin_file(stem: &str) -> String {
    format!("{stem}{PLUGIN_SUFFIX}{DLL_SUFFIX}")
}

/// Write a stand-in plugin file whose contents are its own stem.
pub fn write_plugin(dir: &Path, stem: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(plugin_file(stem));
    fs::write(&path, stem).unwrap();
    path
}

/// An initialized bank scanning only `dir`.
pub fn bank_for(dir: &Path, loader: &StaticLoader) -> ModuleBank {
    let bank = ModuleBank::with_loader(BankConfig::with_dirs([dir]), Arc::new(loader.clone()));
    bank.init();
    bank
}

pub fn foo() -> ModuleDecl {
    ModuleDecl::new("foo").capability("codec", 10)
}

pub fn bar() -> ModuleDecl {
    ModuleDecl::new("bar").capability("codec", 20)
}

pub fn codec_loader() -> StaticLoader {
    StaticLoader::new()
        .with_module(plugin_file("foo"), foo)
        .with_module(plugin_file("bar"), bar)
}
