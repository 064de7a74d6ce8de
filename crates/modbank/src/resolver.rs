//! Turning a capability request into an ordered list of candidates.
//!
//! A request names modules as a comma separated list of shortcuts, each
//! optionally followed by `@alias`. Two trailing keywords change how the
//! list is read: `none` ends a strict list (only the named modules may be
//! used) and `any` ends a permissive one (everything else providing the
//! capability is tried afterwards). A request of exactly `none` disables the
//! capability altogether.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;

use modbank_db::Descriptor;
use modbank_sdk::ActivateFn;

use crate::record::{ModuleHandle, ModuleInfo, ModuleRecord, ResidentCode};

/// One requested module name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub name: String,
    pub alias: Option<String>,
}

impl Token {
    fn parse(raw: &str) -> Self {
        match raw.split_once('@') {
            Some((name, alias)) => Self {
                name: name.to_string(),
                alias: (!alias.is_empty()).then(|| alias.to_string()),
            },
            None => Self {
                name: raw.to_string(),
                alias: None,
            },
        }
    }

    fn matches(&self, descriptor: &Descriptor) -> bool {
        descriptor
            .shortcuts
            .iter()
            .any(|shortcut| shortcut.eq_ignore_ascii_case(&self.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// The caller asked for no module at all.
    Disabled,
    Modules { tokens: Vec<Token>, strict: bool },
}

/// Parse a name list. `strict` is the caller's default and is overridden by
/// a trailing `none` or `any`. The keywords are matched exactly, so a module
/// whose shortcut is `None` or `Any` can still be named.
pub fn parse_request(name: Option<&str>, strict: bool) -> Request {
    let name = name.map(str::trim).unwrap_or_default();
    if name == "none" {
        return Request::Disabled;
    }

    let mut raw: Vec<&str> = name
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect();
    let mut strict = strict;
    match raw.last() {
        Some(&"none") => {
            raw.pop();
            strict = true;
        }
        Some(&"any") => {
            raw.pop();
            strict = false;
        }
        _ => {}
    }

    Request::Modules {
        tokens: raw.into_iter().map(Token::parse).collect(),
        strict,
    }
}

/// Shortcut bonus used by [`Priority::effective_score`]. Ordering itself does
/// not depend on it.
pub const SHORTCUT_BONUS: i64 = 10_000;

/// Sort key of a candidate.
///
/// Any module matched by a requested name outranks every unmatched one, and
/// earlier names outrank later ones regardless of score. Score only breaks
/// ties within the same tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Priority {
    /// `0` when unmatched, otherwise the number of requested names from the
    /// matching one to the end of the list.
    pub tier: usize,
    pub score: i32,
}

impl Priority {
    pub fn effective_score(&self) -> i64 {
        i64::from(self.score).saturating_add((self.tier as i64).saturating_mul(SHORTCUT_BONUS))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tier
            .cmp(&other.tier)
            .then_with(|| self.score.cmp(&other.score))
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub(crate) struct Ranked {
    pub(crate) record: Arc<ModuleRecord>,
    pub(crate) priority: Priority,
    pub(crate) alias: Option<String>,
    pub(crate) forced: bool,
}

/// Filter `modules` down to the candidates for `capability` and order them,
/// highest priority first. Modules of equal priority keep their input order.
pub(crate) fn rank<'a>(
    modules: impl IntoIterator<Item = &'a Arc<ModuleRecord>>,
    capability: &str,
    tokens: &[Token],
    strict: bool,
) -> Vec<Ranked> {
    let mut ranked: Vec<Ranked> = modules
        .into_iter()
        .filter(|record| record.descriptor.is_capable(capability))
        .filter_map(|record| {
            let score = record.descriptor.score;
            let matched = tokens
                .iter()
                .position(|token| token.matches(&record.descriptor));
            let (tier, alias, forced) = match matched {
                Some(index) => (tokens.len() - index, tokens[index].alias.clone(), strict),
                // Without names every module competes on score alone.
                None if tokens.is_empty() || !strict => {
                    if score <= 0 {
                        return None;
                    }
                    (0, None, false)
                }
                None => return None,
            };
            Some(Ranked {
                record: Arc::clone(record),
                priority: Priority { tier, score },
                alias,
                forced,
            })
        })
        .collect();
    ranked.sort_by(|a, b| b.priority.cmp(&a.priority));
    ranked
}

/// A ranked candidate as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub module: ModuleInfo,
    pub priority: Priority,
    pub alias: Option<String>,
    pub forced: bool,
}

impl From<&Ranked> for RankedCandidate {
    fn from(ranked: &Ranked) -> Self {
        Self {
            module: ranked.record.info(),
            priority: ranked.priority,
            alias: ranked.alias.clone(),
            forced: ranked.forced,
        }
    }
}

/// The module being offered to a probe.
pub struct Candidate<'a> {
    pub(crate) record: &'a ModuleRecord,
    pub(crate) resident: &'a ResidentCode,
    pub(crate) alias: Option<&'a str>,
    pub(crate) forced: bool,
}

impl Candidate<'_> {
    pub fn object_name(&self) -> &str {
        self.record.object_name()
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.record.descriptor
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias
    }

    /// The module was named in a strict request.
    pub fn forced(&self) -> bool {
        self.forced
    }

    /// The module's own activation function.
    pub fn activate(&self) -> Option<ActivateFn> {
        self.resident.activate()
    }
}

/// Successful outcome of a resolution.
#[derive(Debug)]
pub enum Resolution {
    Found(ModuleHandle),
    /// The request was `none`.
    Disabled,
    /// A module reported the caller's operation as cancelled.
    Aborted,
}

impl Resolution {
    pub fn handle(&self) -> Option<&ModuleHandle> {
        match self {
            Resolution::Found(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn into_handle(self) -> Option<ModuleHandle> {
        match self {
            Resolution::Found(handle) => Some(handle),
            _ => None,
        }
    }
}
