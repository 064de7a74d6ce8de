use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use modbank::{BankConfig, CachePolicy, ModuleBank, ModuleInfo, Resolution};

#[derive(Parser)]
#[command(name = "modbank", author, version, about = "Inspect and query the plugin module bank")]
struct Cli {
    #[command(flatten)]
    bank: BankArgs,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BankArgs {
    /// JSON configuration file.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Additional directories to scan for plugins.
    #[arg(long = "path", value_name = "PATH", global = true)]
    extra_paths: Vec<PathBuf>,
    /// use-cache, reset-cache or ignore-cache.
    #[arg(long, value_name = "POLICY", global = true)]
    cache_policy: Option<CachePolicy>,
    /// Directory levels searched below each root.
    #[arg(long, value_name = "DEPTH", global = true)]
    max_depth: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan plugin directories and refresh their caches.
    Scan {
        #[arg(long)]
        json: bool,
    },
    /// List known modules.
    List {
        /// Only show modules providing this capability.
        #[arg(long)]
        capability: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Pick a module for a capability.
    Resolve {
        capability: String,
        /// Comma separated shortcut list, optionally ending in `none` or `any`.
        #[arg(long)]
        name: Option<String>,
        /// Only consider modules named in the list.
        #[arg(long)]
        strict: bool,
        /// Print the candidates in probe order without activating any.
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete the cache file of every plugin root.
    ResetCache,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let config = load_config(&cli.bank)?;
    let bank = ModuleBank::new(config);
    bank.init();
    let result = run(&bank, cli.command);
    bank.teardown();
    result
}

fn load_config(args: &BankArgs) -> Result<BankConfig> {
    let mut config = match &args.config {
        Some(path) => BankConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => BankConfig::default(),
    };
    config.plugin_dirs.extend(args.extra_paths.iter().cloned());
    if let Some(policy) = args.cache_policy {
        config.cache_policy = policy;
    }
    if let Some(depth) = args.max_depth {
        config.max_depth = depth;
    }
    Ok(config)
}

fn run(bank: &ModuleBank, command: Commands) -> Result<()> {
    match command {
        Commands::Scan { json } => {
            let report = bank.load_plugins()?.unwrap_or_default();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} modules ({} cached, {} loaded), {} junk files in {} roots",
                    report.modules(),
                    report.cached,
                    report.loaded,
                    report.junk,
                    report.roots
                );
            }
        }
        Commands::List { capability, json } => {
            bank.load_plugins()?;
            let modules: Vec<ModuleInfo> = bank
                .modules()
                .into_iter()
                .filter(|module| match &capability {
                    Some(capability) => module.descriptor.is_capable(capability),
                    None => true,
                })
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&modules)?);
            } else {
                for module in &modules {
                    print_module(module);
                }
            }
        }
        Commands::Resolve {
            capability,
            name,
            strict,
            dry_run,
        } => {
            bank.load_plugins()?;
            if dry_run {
                let candidates = bank.rank(&capability, name.as_deref(), strict);
                if candidates.is_empty() {
                    bail!("no {capability} module matched \"{}\"", name.unwrap_or_default());
                }
                for candidate in candidates {
                    println!(
                        "{:<24} {:>8}{}",
                        candidate.module.object_name(),
                        candidate.priority.effective_score(),
                        if candidate.forced { "  forced" } else { "" }
                    );
                }
                return Ok(());
            }
            match bank.resolve_activate(&capability, name.as_deref(), strict, &mut ())? {
                Resolution::Found(handle) => {
                    println!("using {capability} module \"{}\"", handle.name());
                    bank.release(handle, &mut ());
                }
                Resolution::Disabled => println!("{capability} disabled"),
                Resolution::Aborted => println!("{capability} resolution aborted"),
            }
        }
        Commands::ResetCache => {
            let store = bank.cache_store();
            for root in bank.config().search_roots() {
                let path = store.cache_path(&root);
                if path.exists() {
                    store
                        .delete(&root)
                        .with_context(|| format!("failed to remove {}", path.display()))?;
                    println!("removed {}", path.display());
                }
            }
        }
    }
    Ok(())
}

fn print_module(module: &ModuleInfo) {
    let descriptor = &module.descriptor;
    let origin = match &module.file {
        Some(file) => file.path.display().to_string(),
        None => "builtin".to_string(),
    };
    println!(
        "{:<24} {:<20} {:>6}  {}",
        module.object_name(),
        descriptor.capability.as_deref().unwrap_or("-"),
        descriptor.score,
        origin
    );
}
