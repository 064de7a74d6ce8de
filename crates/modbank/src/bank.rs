use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use modbank_db::{CachePolicy, CacheStore, Descriptor};
use modbank_host::{CodeLoader, DylibLoader};
use modbank_sdk::{BuiltinEntry, ModuleDecl, OptionSpec, OptionValue, ProbeOutcome};

use crate::builtin::{main_module, MAIN_MODULE};
use crate::config::BankConfig;
use crate::error::{BankError, ResolveError};
use crate::record::{
    ModuleHandle, ModuleId, ModuleInfo, ModuleRecord, Origin, PluginCode, ResidentCode,
};
use crate::resolver::{parse_request, rank, Candidate, RankedCandidate, Request, Resolution};
use crate::scanner::{ScanReport, Scanner};

#[derive(Default)]
struct BankState {
    usage: usize,
    next_id: u64,
    /// Ids grow monotonically, so iteration follows registration order.
    modules: BTreeMap<ModuleId, Arc<ModuleRecord>>,
    builtins_loaded: bool,
    plugins_loaded: bool,
    vars: HashMap<String, String>,
    options: HashMap<(String, String), OptionValue>,
}

impl BankState {
    fn insert(&mut self, descriptor: Descriptor, origin: Origin) -> ModuleId {
        let id = ModuleId(self.next_id);
        self.next_id += 1;
        self.modules.insert(
            id,
            Arc::new(ModuleRecord {
                id,
                descriptor,
                origin,
            }),
        );
        id
    }

    fn insert_builtin(&mut self, decl: ModuleDecl) -> ModuleId {
        let descriptor = Descriptor {
            unloadable: false,
            ..Descriptor::from_decl(&decl)
        };
        self.insert(descriptor, Origin::Builtin(Arc::new(ResidentCode::builtin(decl))))
    }

    fn find(&self, object_name: &str) -> Option<&Arc<ModuleRecord>> {
        self.modules
            .values()
            .find(|record| record.object_name() == object_name)
    }

    fn main_option(&self, name: &str) -> Option<&OptionValue> {
        self.options.get(&(MAIN_MODULE.to_string(), name.to_string()))
    }

    fn ensure_initialized(&self) -> Result<(), BankError> {
        if self.usage == 0 {
            Err(BankError::NotInitialized)
        } else {
            Ok(())
        }
    }
}

/// Everything a scan needs, captured under the lock.
struct ScanSettings {
    roots: Vec<PathBuf>,
    policy: CachePolicy,
    max_depth: usize,
}

/// Registry of every module known to the process.
///
/// The bank is usage counted: each [`init`](Self::init) must be paired with a
/// [`teardown`](Self::teardown), and modules are only dropped when the last
/// user is gone. One lock guards the registry; it is never held while module
/// code runs.
pub struct ModuleBank {
    config: BankConfig,
    loader: Arc<dyn CodeLoader>,
    store: CacheStore,
    state: Mutex<BankState>,
}

impl ModuleBank {
    /// A bank loading plugins as shared objects.
    pub fn new(config: BankConfig) -> Self {
        Self::with_loader(config, Arc::new(DylibLoader))
    }

    pub fn with_loader(config: BankConfig, loader: Arc<dyn CodeLoader>) -> Self {
        Self {
            config,
            loader,
            store: CacheStore::new(),
            state: Mutex::new(BankState::default()),
        }
    }

    pub fn config(&self) -> &BankConfig {
        &self.config
    }

    pub fn cache_store(&self) -> &CacheStore {
        &self.store
    }

    /// Take a usage reference. The first one registers the `main` module.
    pub fn init(&self) -> usize {
        let mut state = self.state.lock();
        state.usage += 1;
        if state.usage == 1 {
            state.insert_builtin(main_module());
            debug!("module bank initialized");
        }
        state.usage
    }

    /// Drop a usage reference and return how many remain. The last one
    /// empties the bank and unloads all code.
    pub fn teardown(&self) -> usize {
        let mut state = self.state.lock();
        match state.usage {
            0 => {
                warn!("module bank torn down without init");
                return 0;
            }
            1 => {}
            _ => {
                state.usage -= 1;
                return state.usage;
            }
        }
        let next_id = state.next_id;
        let released = mem::replace(
            &mut *state,
            BankState {
                next_id,
                ..BankState::default()
            },
        );
        drop(state);

        for record in released.modules.values() {
            if record.in_use() {
                warn!(module = record.object_name(), "module still in use at teardown");
            }
        }
        let count = released.modules.len();
        drop(released);
        info!(modules = count, "module bank torn down");
        0
    }

    pub fn usage(&self) -> usize {
        self.state.lock().usage
    }

    /// Register statically linked modules. Only the first call does anything.
    pub fn load_builtins(&self, entries: &[BuiltinEntry]) -> Result<usize, BankError> {
        {
            let mut state = self.state.lock();
            state.ensure_initialized()?;
            if mem::replace(&mut state.builtins_loaded, true) {
                return Ok(0);
            }
        }

        let decls: Vec<ModuleDecl> = entries
            .iter()
            .map(|entry| entry())
            .filter(|decl| {
                let named = !decl.object_name().is_empty();
                if !named {
                    error!("builtin module declares no object name");
                }
                named
            })
            .collect();

        let mut state = self.state.lock();
        let count = decls.len();
        for decl in decls {
            state.insert_builtin(decl);
        }
        debug!(count, "builtin modules registered");
        Ok(count)
    }

    /// Scan the plugin roots. Only the first call scans; later calls return
    /// `None` until [`rescan`](Self::rescan) or teardown.
    pub fn load_plugins(&self) -> Result<Option<ScanReport>, BankError> {
        let settings = {
            let mut state = self.state.lock();
            state.ensure_initialized()?;
            if mem::replace(&mut state.plugins_loaded, true) {
                return Ok(None);
            }
            self.scan_settings(&state, None)
        };
        Ok(Some(self.scan_into_bank(settings)))
    }

    /// Forget every plugin module and scan again under `policy`.
    ///
    /// Handles obtained earlier stay valid; the modules they refer to are
    /// simply no longer offered by the bank.
    pub fn rescan(&self, policy: CachePolicy) -> Result<ScanReport, BankError> {
        let (settings, removed) = {
            let mut state = self.state.lock();
            state.ensure_initialized()?;
            state.plugins_loaded = true;
            let (kept, removed): (BTreeMap<_, _>, BTreeMap<_, _>) =
                mem::take(&mut state.modules)
                    .into_iter()
                    .partition(|(_, record)| record.plugin().is_none());
            state.modules = kept;
            (self.scan_settings(&state, Some(policy)), removed)
        };
        debug!(removed = removed.len(), %policy, "rescanning plugins");
        drop(removed);
        Ok(self.scan_into_bank(settings))
    }

    fn scan_settings(&self, state: &BankState, policy: Option<CachePolicy>) -> ScanSettings {
        let policy = policy.unwrap_or_else(|| {
            if state.main_option("reset-plugins-cache") == Some(&OptionValue::Bool(true)) {
                CachePolicy::ResetCache
            } else if state.main_option("plugins-cache") == Some(&OptionValue::Bool(false)) {
                CachePolicy::IgnoreCache
            } else {
                self.config.cache_policy
            }
        });
        let max_depth = state
            .main_option("plugin-scan-depth")
            .and_then(OptionValue::as_integer)
            .and_then(|depth| usize::try_from(depth).ok())
            .unwrap_or(self.config.max_depth);

        let mut roots = self.config.search_roots();
        if let Some(extra) = state.main_option("plugin-path").and_then(OptionValue::as_str) {
            for root in env::split_paths(extra) {
                if !root.as_os_str().is_empty() && !roots.contains(&root) {
                    roots.push(root);
                }
            }
        }
        ScanSettings {
            roots,
            policy,
            max_depth,
        }
    }

    fn scan_into_bank(&self, settings: ScanSettings) -> ScanReport {
        let scanner = Scanner::new(Arc::clone(&self.loader))
            .with_store(self.store.clone())
            .with_max_depth(settings.max_depth);
        let (plugins, report) = scanner.scan_all(&settings.roots, settings.policy);

        let mut state = self.state.lock();
        let mut known: HashSet<PathBuf> = state
            .modules
            .values()
            .filter_map(|record| record.plugin())
            .map(|plugin| plugin.identity().path.clone())
            .collect();
        for plugin in plugins {
            if !known.insert(plugin.identity.path.clone()) {
                continue;
            }
            state.insert(
                plugin.descriptor,
                Origin::Plugin(PluginCode::new(plugin.identity, plugin.resident)),
            );
        }
        report
    }

    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.state
            .lock()
            .modules
            .values()
            .map(|record| record.info())
            .collect()
    }

    /// First module whose object name is exactly `object_name`.
    pub fn find(&self, object_name: &str) -> Option<ModuleInfo> {
        self.state.lock().find(object_name).map(|record| record.info())
    }

    pub fn exists(&self, object_name: &str) -> bool {
        self.state.lock().find(object_name).is_some()
    }

    /// `(object name, long name)` of every module providing `capability`.
    pub fn names_for_capability(&self, capability: &str) -> Vec<(String, String)> {
        self.state
            .lock()
            .modules
            .values()
            .filter(|record| record.descriptor.is_capable(capability))
            .map(|record| {
                (
                    record.object_name().to_string(),
                    record.descriptor.display_name(true).to_string(),
                )
            })
            .collect()
    }

    /// User-facing options of a module.
    pub fn config_of(&self, object_name: &str) -> Option<Vec<OptionSpec>> {
        self.state
            .lock()
            .find(object_name)
            .map(|record| record.descriptor.public_options().cloned().collect())
    }

    pub fn set_var(&self, name: impl Into<String>, value: impl Into<String>) {
        self.state.lock().vars.insert(name.into(), value.into());
    }

    pub fn var(&self, name: &str) -> Option<String> {
        self.state.lock().vars.get(name).cloned()
    }

    /// Change an option value, firing the module's callback if it has one.
    pub fn set_option(
        &self,
        object_name: &str,
        option: &str,
        value: OptionValue,
    ) -> Result<(), BankError> {
        let record = {
            let mut state = self.state.lock();
            state.ensure_initialized()?;
            let record = state
                .find(object_name)
                .cloned()
                .ok_or_else(|| BankError::UnknownModule(object_name.to_string()))?;
            let declared = record
                .descriptor
                .options
                .iter()
                .find(|declared| declared.spec.name == option)
                .ok_or_else(|| BankError::UnknownOption {
                    module: object_name.to_string(),
                    option: option.to_string(),
                })?;
            declared.spec.kind.validate(option, &value)?;
            let has_callback = declared.has_callback;
            state
                .options
                .insert((object_name.to_string(), option.to_string()), value.clone());
            if !has_callback {
                return Ok(());
            }
            record
        };

        let resident = record.resident(self.loader.as_ref())?;
        if let Some(callback) = resident.option_callback(option) {
            callback(option, &value);
        }
        Ok(())
    }

    /// Current value of an option: the last one set, or the declared default.
    pub fn option(&self, object_name: &str, option: &str) -> Option<OptionValue> {
        let state = self.state.lock();
        if let Some(value) = state
            .options
            .get(&(object_name.to_string(), option.to_string()))
        {
            return Some(value.clone());
        }
        state.find(object_name).and_then(|record| {
            record
                .descriptor
                .options
                .iter()
                .find(|declared| declared.spec.name == option)
                .map(|declared| declared.spec.kind.default_value())
        })
    }

    /// Names starting with `$` are read from the bank's variables.
    fn expand_name(&self, name: Option<&str>) -> Option<String> {
        let name = name?;
        match name.strip_prefix('$') {
            Some(var) => self.var(var),
            None => Some(name.to_string()),
        }
    }

    fn request(&self, name: Option<&str>, strict: bool) -> (Option<String>, Request) {
        let expanded = self.expand_name(name);
        let request = parse_request(expanded.as_deref(), strict);
        (expanded, request)
    }

    /// Candidates for `capability` in the order `resolve` would try them.
    pub fn rank(&self, capability: &str, name: Option<&str>, strict: bool) -> Vec<RankedCandidate> {
        let (tokens, strict) = match self.request(name, strict).1 {
            Request::Disabled => return Vec::new(),
            Request::Modules { tokens, strict } => (tokens, strict),
        };
        let state = self.state.lock();
        rank(state.modules.values(), capability, &tokens, strict)
            .iter()
            .map(RankedCandidate::from)
            .collect()
    }

    /// Find a module providing `capability` and activate it.
    ///
    /// Candidates are offered to `probe` in priority order until one reports
    /// [`ProbeOutcome::Success`] or [`ProbeOutcome::Aborted`]. Candidates
    /// whose code fails to load are skipped.
    pub fn resolve<F>(
        &self,
        capability: &str,
        name: Option<&str>,
        strict: bool,
        mut probe: F,
    ) -> Result<Resolution, ResolveError>
    where
        F: FnMut(&Candidate<'_>) -> ProbeOutcome,
    {
        let (expanded, request) = self.request(name, strict);
        let requested = expanded.unwrap_or_default();
        let (tokens, strict) = match request {
            Request::Disabled => {
                debug!(capability, "module request disabled");
                return Ok(Resolution::Disabled);
            }
            Request::Modules { tokens, strict } => (tokens, strict),
        };

        let ranked = {
            let state = self.state.lock();
            rank(state.modules.values(), capability, &tokens, strict)
        };
        debug!(
            "looking for {capability} module matching \"{requested}\": {} candidates",
            ranked.len()
        );

        for candidate in &ranked {
            let record = &candidate.record;
            let resident = match record.resident(self.loader.as_ref()) {
                Ok(resident) => resident,
                Err(err) => {
                    warn!(module = record.object_name(), error = %err, "cannot load module");
                    continue;
                }
            };
            let offered = Candidate {
                record,
                resident: &resident,
                alias: candidate.alias.as_deref(),
                forced: candidate.forced,
            };
            match probe(&offered) {
                ProbeOutcome::Success => {
                    debug!("using {capability} module \"{}\"", record.object_name());
                    return Ok(Resolution::Found(ModuleHandle {
                        record: Arc::clone(record),
                        resident,
                        alias: candidate.alias.clone(),
                        forced: candidate.forced,
                    }));
                }
                ProbeOutcome::Aborted => {
                    debug!("{capability} module \"{}\" aborted", record.object_name());
                    return Ok(Resolution::Aborted);
                }
                ProbeOutcome::Failed => {
                    debug!("{capability} module \"{}\" failed", record.object_name());
                }
            }
        }

        if ranked.is_empty() {
            error!("no {capability} module matched \"{requested}\"");
            Err(ResolveError::NoMatch {
                capability: capability.to_string(),
                requested,
            })
        } else {
            warn!("no {capability} module matching \"{requested}\" could be loaded");
            Err(ResolveError::AllFailed {
                capability: capability.to_string(),
                requested,
                candidates: ranked.len(),
            })
        }
    }

    /// [`resolve`](Self::resolve) using each module's own activation function
    /// with `ctx` as its argument.
    pub fn resolve_activate(
        &self,
        capability: &str,
        name: Option<&str>,
        strict: bool,
        ctx: &mut dyn Any,
    ) -> Result<Resolution, ResolveError> {
        self.resolve(capability, name, strict, |candidate| match candidate.activate() {
            Some(activate) => activate(&mut *ctx),
            None => ProbeOutcome::Failed,
        })
    }

    /// Hand back a module obtained from [`resolve`](Self::resolve), running
    /// its deactivation function. The code stays mapped until reclaimed.
    pub fn release(&self, handle: ModuleHandle, ctx: &mut dyn Any) {
        if let Some(deactivate) = handle.resident.deactivate() {
            deactivate(ctx);
        }
        debug!("removing module \"{}\"", handle.name());
        drop(handle);
    }

    /// Unmap the code of plugins that nothing uses and that do not need their
    /// code to stay resident. Returns how many were unloaded.
    pub fn reclaim_idle(&self) -> usize {
        let records: Vec<Arc<ModuleRecord>> =
            self.state.lock().modules.values().cloned().collect();
        let reclaimed = records.iter().filter(|record| record.reclaim()).count();
        if reclaimed > 0 {
            debug!(reclaimed, "idle plugin code unloaded");
        }
        reclaimed
    }
}

impl Default for ModuleBank {
    fn default() -> Self {
        Self::new(BankConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use modbank_host::StaticLoader;
    use modbank_sdk::{ConfigOption, OptionKind};
    use pretty_assertions::assert_eq;

    use super::*;

    fn bank() -> ModuleBank {
        ModuleBank::with_loader(
            BankConfig::with_dirs(Vec::<PathBuf>::new()),
            Arc::new(StaticLoader::new()),
        )
    }

    fn vout_a() -> ModuleDecl {
        ModuleDecl::new("vout_a").capability("vout", 10)
    }

    fn vout_b() -> ModuleDecl {
        ModuleDecl::new("vout_b").capability("vout", 20).long_name("Vout B")
    }

    static TOGGLES: AtomicUsize = AtomicUsize::new(0);

    fn on_toggle(_name: &str, _value: &OptionValue) {
        TOGGLES.fetch_add(1, Ordering::SeqCst);
    }

    fn toggled() -> ModuleDecl {
        ModuleDecl::new("toggled")
            .capability("widget", 1)
            .option(
                ConfigOption::new("toggled-on", "On", OptionKind::Bool { default: false })
                    .with_callback(on_toggle),
            )
            .option(
                ConfigOption::new("toggled-level", "Level", OptionKind::Integer {
                    default: 3,
                    range: Some((0, 9)),
                })
                .internal(),
            )
    }

    #[test]
    fn main_module_exists_after_init() {
        let bank = bank();
        assert!(!bank.exists(MAIN_MODULE));
        bank.init();
        let main = bank.find(MAIN_MODULE).unwrap();
        assert!(main.is_builtin());
        assert!(!main.descriptor.unloadable);
        let names: Vec<_> = bank
            .config_of(MAIN_MODULE)
            .unwrap()
            .into_iter()
            .map(|spec| spec.name)
            .collect();
        assert_eq!(names, vec!["plugin-path", "plugins-cache", "plugin-scan-depth"]);
    }

    #[test]
    fn operations_require_init() {
        let bank = bank();
        assert!(matches!(bank.load_plugins(), Err(BankError::NotInitialized)));
        assert!(matches!(
            bank.load_builtins(&[vout_a]),
            Err(BankError::NotInitialized)
        ));
        assert_eq!(bank.teardown(), 0);
    }

    #[test]
    fn builtins_load_once() {
        let bank = bank();
        bank.init();
        assert_eq!(bank.load_builtins(&[vout_a, vout_b]).unwrap(), 2);
        assert_eq!(bank.load_builtins(&[vout_a]).unwrap(), 0);
        assert_eq!(
            bank.names_for_capability("vout"),
            vec![
                ("vout_a".to_string(), "vout_a".to_string()),
                ("vout_b".to_string(), "Vout B".to_string()),
            ]
        );
    }

    #[test]
    fn dollar_names_read_variables() {
        let bank = bank();
        bank.init();
        bank.load_builtins(&[vout_a, vout_b]).unwrap();
        bank.set_var("vout", "vout_a,none");
        let ranked = bank.rank("vout", Some("$vout"), false);
        let names: Vec<_> = ranked.iter().map(|c| c.module.object_name()).collect();
        assert_eq!(names, vec!["vout_a"]);
        assert!(ranked[0].forced);

        let ranked = bank.rank("vout", Some("$unset"), false);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn disabled_request_resolves_nothing() {
        let bank = bank();
        bank.init();
        bank.load_builtins(&[vout_a]).unwrap();
        let resolution = bank
            .resolve("vout", Some("none"), false, |_| panic!("no probe expected"))
            .unwrap();
        assert!(matches!(resolution, Resolution::Disabled));
        assert!(bank.rank("vout", Some("none"), false).is_empty());
    }

    #[test]
    fn options_validate_and_fire_callbacks() {
        let bank = bank();
        bank.init();
        bank.load_builtins(&[toggled]).unwrap();

        assert_eq!(bank.option("toggled", "toggled-level"), Some(OptionValue::Integer(3)));
        bank.set_option("toggled", "toggled-level", OptionValue::Integer(7))
            .unwrap();
        assert_eq!(bank.option("toggled", "toggled-level"), Some(OptionValue::Integer(7)));
        assert!(matches!(
            bank.set_option("toggled", "toggled-level", OptionValue::Integer(70)),
            Err(BankError::Option(_))
        ));
        assert!(matches!(
            bank.set_option("toggled", "missing", OptionValue::Bool(true)),
            Err(BankError::UnknownOption { .. })
        ));

        let before = TOGGLES.load(Ordering::SeqCst);
        bank.set_option("toggled", "toggled-on", OptionValue::Bool(true))
            .unwrap();
        assert_eq!(TOGGLES.load(Ordering::SeqCst), before + 1);
        assert_eq!(bank.option("toggled", "toggled-on"), Some(OptionValue::Bool(true)));

        let public: Vec<_> = bank
            .config_of("toggled")
            .unwrap()
            .into_iter()
            .map(|spec| spec.name)
            .collect();
        assert_eq!(public, vec!["toggled-on"]);
    }

    #[test]
    fn teardown_resets_state() {
        let bank = bank();
        bank.init();
        bank.load_builtins(&[vout_a]).unwrap();
        bank.set_var("vout", "vout_a");
        assert_eq!(bank.teardown(), 0);
        assert!(bank.modules().is_empty());
        assert_eq!(bank.var("vout"), None);

        bank.init();
        assert_eq!(bank.load_builtins(&[vout_a]).unwrap(), 1);
        assert!(bank.find(MAIN_MODULE).unwrap().id > ModuleId(1));
    }
}
