use std::env::consts::DLL_SUFFIX;
use std::fs;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use modbank::{
    BankConfig, CachePolicy, Descriptor, FileIdentity, ModuleBank, ModuleDecl, StaticLoader,
    PLUGIN_SUFFIX,
};
use modbank_db::{decode, encode, CacheEntry};

const MODULES: usize = 500;

fn codec() -> ModuleDecl {
    ModuleDecl::new("codec")
        .capability("codec", 10)
        .shortcut("generic")
}

fn populated_bank(dir: &std::path::Path) -> ModuleBank {
    let loader = StaticLoader::new();
    for index in 0..MODULES {
        let name = format!("codec{index:03}{PLUGIN_SUFFIX}{DLL_SUFFIX}");
        fs::write(dir.join(&name), name.as_bytes()).expect("write plugin");
        loader.register(name, codec);
    }
    let bank = ModuleBank::with_loader(BankConfig::with_dirs([dir]), Arc::new(loader));
    bank.init();
    bank
}

fn ranking(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let bank = populated_bank(dir.path());
    bank.load_plugins().expect("scan");

    let mut group = c.benchmark_group("rank");
    group.bench_function("500_by_score", |b| {
        b.iter(|| black_box(bank.rank("codec", None, false)));
    });
    group.bench_function("500_named_list", |b| {
        b.iter(|| black_box(bank.rank("codec", Some("missing,generic,any"), false)));
    });
    group.finish();
}

fn scanning(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let bank = populated_bank(dir.path());
    bank.load_plugins().expect("scan");

    let mut group = c.benchmark_group("scan");
    group.sample_size(20);
    group.bench_function("500_warm_cache", |b| {
        b.iter(|| bank.rescan(CachePolicy::UseCache).expect("rescan"));
    });
    group.bench_function("500_cold", |b| {
        b.iter(|| bank.rescan(CachePolicy::IgnoreCache).expect("rescan"));
    });
    group.finish();
}

fn cache_codec(c: &mut Criterion) {
    let entries: Vec<CacheEntry> = (0..MODULES)
        .map(|index| {
            let decl = ModuleDecl::new(format!("codec{index}")).capability("codec", index as i32);
            CacheEntry::module(
                FileIdentity::new(format!("/plugins/codec{index}_plugin.so"), 4096, 1_700_000_000),
                Descriptor::from_decl(&decl),
            )
        })
        .collect();
    let blob = encode(&entries).expect("encode");

    let mut group = c.benchmark_group("cache");
    group.bench_function("encode_500", |b| b.iter(|| encode(black_box(&entries))));
    group.bench_function("decode_500", |b| b.iter(|| decode(black_box(&blob))));
    group.finish();
}

criterion_group!(benches, ranking, scanning, cache_codec);
criterion_main!(benches);
