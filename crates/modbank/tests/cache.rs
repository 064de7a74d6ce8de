mod common;

use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use modbank::{
    BankConfig, CachePolicy, CacheStore, ModuleBank, Scanner, StaticLoader, DEFAULT_MAX_DEPTH,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use common::{bank_for, codec_loader, plugin_file, write_plugin};

#[test]
fn warm_scan_skips_the_loader() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "foo");
    write_plugin(dir.path(), "bar");

    let cold = codec_loader();
    let report = bank_for(dir.path(), &cold).load_plugins().unwrap().unwrap();
    assert_eq!((report.loaded, report.cached), (2, 0));
    assert!(CacheStore::new().cache_path(dir.path()).exists());

    let warm = codec_loader();
    let bank = bank_for(dir.path(), &warm);
    let report = bank.load_plugins().unwrap().unwrap();
    assert_eq!((report.loaded, report.cached), (0, 2));
    assert_eq!(warm.stats().loads(), 0);

    let foo = bank.find("foo").unwrap();
    assert_eq!(foo.descriptor.score, 10);
    assert_eq!(foo.descriptor.capability.as_deref(), Some("codec"));
    assert!(!foo.loaded);
}

#[test]
fn changed_size_or_mtime_forces_a_reload() {
    let dir = tempdir().unwrap();
    let foo = write_plugin(dir.path(), "foo");
    let bar = write_plugin(dir.path(), "bar");
    bank_for(dir.path(), &codec_loader()).load_plugins().unwrap();

    fs::write(&foo, "foo, rebuilt").unwrap();
    let earlier = SystemTime::now() - Duration::from_secs(3600);
    filetime::set_file_mtime(&bar, FileTime::from_system_time(earlier)).unwrap();

    let loader = codec_loader();
    let report = bank_for(dir.path(), &loader).load_plugins().unwrap().unwrap();
    assert_eq!((report.loaded, report.cached), (2, 0));
    assert_eq!(loader.stats().loads(), 2);

    let loader = codec_loader();
    let report = bank_for(dir.path(), &loader).load_plugins().unwrap().unwrap();
    assert_eq!((report.loaded, report.cached), (0, 2));
}

#[test]
fn foreign_signature_triggers_full_rescan() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "foo");
    write_plugin(dir.path(), "bar");
    bank_for(dir.path(), &codec_loader()).load_plugins().unwrap();

    // Magic, then the signature string behind its 8 byte length.
    let cache = CacheStore::new().cache_path(dir.path());
    let mut blob = fs::read(&cache).unwrap();
    assert_eq!(blob[16], b'm');
    blob[16] = b'x';
    fs::write(&cache, blob).unwrap();
    assert!(CacheStore::new().try_load(dir.path()).is_err());

    let loader = codec_loader();
    let bank = bank_for(dir.path(), &loader);
    let report = bank.load_plugins().unwrap().unwrap();
    assert_eq!((report.loaded, report.cached), (2, 0));
    assert!(bank.exists("foo") && bank.exists("bar"));
    assert_eq!(CacheStore::new().load(dir.path()).len(), 2);
}

#[test]
fn garbage_cache_is_replaced() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "foo");
    fs::write(CacheStore::new().cache_path(dir.path()), b"definitely not a cache").unwrap();

    let loader = codec_loader();
    let report = bank_for(dir.path(), &loader).load_plugins().unwrap().unwrap();
    assert_eq!(report.loaded, 1);
    assert_eq!(report.caches_written, 1);
    assert_eq!(CacheStore::new().load(dir.path()).len(), 1);
}

#[test]
fn reset_cache_reloads_everything() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "foo");
    let loader = codec_loader();
    let bank = bank_for(dir.path(), &loader);
    bank.load_plugins().unwrap();

    let report = bank.rescan(CachePolicy::ResetCache).unwrap();
    assert_eq!((report.loaded, report.cached), (1, 0));
    assert_eq!(loader.stats().fast_loads(), 2);
    assert!(CacheStore::new().cache_path(dir.path()).exists());
}

#[test]
fn ignore_cache_neither_reads_nor_writes() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "foo");
    bank_for(dir.path(), &codec_loader()).load_plugins().unwrap();
    let cache = CacheStore::new().cache_path(dir.path());
    let before = fs::read(&cache).unwrap();

    write_plugin(dir.path(), "bar");
    let loader = codec_loader();
    let bank = ModuleBank::with_loader(
        BankConfig {
            cache_policy: CachePolicy::IgnoreCache,
            ..BankConfig::with_dirs([dir.path()])
        },
        Arc::new(loader.clone()),
    );
    bank.init();
    let report = bank.load_plugins().unwrap().unwrap();
    assert_eq!((report.loaded, report.cached), (2, 0));
    assert_eq!(fs::read(&cache).unwrap(), before);
}

#[test]
fn junk_files_are_remembered() {
    let dir = tempdir().unwrap();
    write_plugin(dir.path(), "foo");
    write_plugin(dir.path(), "stray");
    let loader = codec_loader().with_broken(plugin_file("broken"));
    write_plugin(dir.path(), "broken");

    let report = bank_for(dir.path(), &loader).load_plugins().unwrap().unwrap();
    assert_eq!((report.loaded, report.junk), (1, 2));
    let loads = loader.stats().loads();

    let bank = bank_for(dir.path(), &loader);
    let report = bank.load_plugins().unwrap().unwrap();
    assert_eq!((report.cached, report.junk), (1, 2));
    assert_eq!(loader.stats().loads(), loads);
    assert!(!bank.exists("stray"));
}

#[test]
fn depth_is_bounded() {
    let dir = tempdir().unwrap();
    let mut deepest_found = dir.path().to_path_buf();
    for level in 0..DEFAULT_MAX_DEPTH {
        deepest_found = deepest_found.join(format!("level{level}"));
    }
    let too_deep = deepest_found.join("beyond");
    write_plugin(&deepest_found, "foo");
    write_plugin(&too_deep, "bar");

    let scanner = Scanner::new(Arc::new(codec_loader()));
    let (plugins, _) = scanner.scan_root(dir.path(), CachePolicy::IgnoreCache);
    let names: Vec<_> = plugins
        .iter()
        .map(|plugin| plugin.descriptor.object_name())
        .collect();
    assert_eq!(names, vec!["foo"]);

    let shallow = Scanner::new(Arc::new(codec_loader())).with_max_depth(0);
    write_plugin(dir.path(), "bar");
    let (plugins, _) = shallow.scan_root(dir.path(), CachePolicy::IgnoreCache);
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0].identity.path, dir.path().join(plugin_file("bar")));
}

#[test]
fn environment_adds_roots() {
    let configured = tempdir().unwrap();
    let extra = tempdir().unwrap();
    write_plugin(configured.path(), "foo");
    write_plugin(extra.path(), "bar");

    let var = "MODBANK_TEST_EXTRA_ROOTS";
    std::env::set_var(var, extra.path());
    let loader = StaticLoader::new()
        .with_module(plugin_file("foo"), common::foo)
        .with_module(plugin_file("bar"), common::bar);
    let bank = ModuleBank::with_loader(
        BankConfig {
            env_var: Some(var.to_string()),
            ..BankConfig::with_dirs([configured.path()])
        },
        Arc::new(loader),
    );
    bank.init();
    let report = bank.load_plugins().unwrap().unwrap();
    std::env::remove_var(var);

    assert_eq!(report.roots, 2);
    assert!(bank.exists("foo") && bank.exists("bar"));
}
