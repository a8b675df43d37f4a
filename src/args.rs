//! Per-verb argument schemas and validation (spec.md component D),
//! grounded on `oaipmh.validation` in the original implementation.

use std::collections::BTreeMap;

use crate::error::{OaiError, Result};

/// How a single argument name is treated by a verb's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Required,
    Optional,
    /// At most one exclusive name per verb. When present in a request it
    /// must appear alone (aside from `local` arguments, which are
    /// stripped before this rule is checked).
    Exclusive,
    /// Consumed by the embedding transport layer (e.g. `verb` itself)
    /// and never checked against the schema.
    Local,
}

/// An ordered `(name, kind)` table for one verb. Declared as a plain
/// slice rather than a `HashMap` so specs read as a literal table next
/// to the verb they describe, same as `ValidationSpec` in the original.
pub type ArgumentSpec = &'static [(&'static str, ArgKind)];

/// The arguments accepted by `GetRecord`.
pub const GET_RECORD: ArgumentSpec = &[
    ("identifier", ArgKind::Required),
    ("metadataPrefix", ArgKind::Required),
];

/// `Identify` takes no arguments.
pub const IDENTIFY: ArgumentSpec = &[];

/// `ListIdentifiers`, without resumption-token awareness (used by a
/// repository wrapped in the stateless resumption adapter, which
/// intercepts `resumptionToken` before the inner spec ever sees it).
pub const LIST_IDENTIFIERS: ArgumentSpec = &[
    ("metadataPrefix", ArgKind::Required),
    ("from", ArgKind::Optional),
    ("until", ArgKind::Optional),
    ("set", ArgKind::Optional),
];

/// `ListIdentifiers`, resumption-aware: `resumptionToken` is exclusive.
pub const LIST_IDENTIFIERS_RESUMPTION: ArgumentSpec = &[
    ("metadataPrefix", ArgKind::Required),
    ("from", ArgKind::Optional),
    ("until", ArgKind::Optional),
    ("set", ArgKind::Optional),
    ("resumptionToken", ArgKind::Exclusive),
];

pub const LIST_METADATA_FORMATS: ArgumentSpec = &[("identifier", ArgKind::Optional)];

pub const LIST_RECORDS: ArgumentSpec = &[
    ("metadataPrefix", ArgKind::Required),
    ("from", ArgKind::Optional),
    ("until", ArgKind::Optional),
    ("set", ArgKind::Optional),
];

pub const LIST_RECORDS_RESUMPTION: ArgumentSpec = &[
    ("metadataPrefix", ArgKind::Required),
    ("from", ArgKind::Optional),
    ("until", ArgKind::Optional),
    ("set", ArgKind::Optional),
    ("resumptionToken", ArgKind::Exclusive),
];

pub const LIST_SETS: ArgumentSpec = &[];

pub const LIST_SETS_RESUMPTION: ArgumentSpec = &[("resumptionToken", ArgKind::Exclusive)];

/// Validate `args` against `spec`, per spec.md §4.2:
///
/// 1. `local` arguments are collected aside and removed from the set
///    under validation (the caller is expected to have already pulled
///    them out, but we accept them here too for convenience).
/// 2. Any key outside the spec is a `BadArgument`.
/// 3. If the spec has an exclusive key present in `args`, it must be the
///    only non-local key, or it's a `BadArgument`.
/// 4. Otherwise every required key must be present.
pub fn validate(spec: ArgumentSpec, args: &BTreeMap<String, String>) -> Result<()> {
    let exclusive = spec
        .iter()
        .find(|(_, kind)| *kind == ArgKind::Exclusive)
        .map(|(name, _)| *name);

    let is_known = |key: &str| spec.iter().any(|(name, _)| *name == key);
    let is_local = |key: &str| {
        spec.iter()
            .any(|(name, kind)| *name == key && *kind == ArgKind::Local)
    };

    for key in args.keys() {
        if is_local(key) {
            continue;
        }
        if !is_known(key) {
            return Err(OaiError::BadArgument(format!("Unknown argument: {key}")));
        }
    }

    if let Some(exclusive) = exclusive {
        if args.contains_key(exclusive) {
            let non_local_count = args.keys().filter(|k| !is_local(k)).count();
            if non_local_count > 1 {
                return Err(OaiError::BadArgument(format!(
                    "Exclusive argument {exclusive} is used but other arguments found."
                )));
            }
            return Ok(());
        }
    }

    for (name, kind) in spec {
        if *kind == ArgKind::Required && !args.contains_key(*name) {
            return Err(OaiError::BadArgument(format!(
                "Argument required but not found: {name}"
            )));
        }
    }

    Ok(())
}
