//! Key builder (C8): deterministic cache keys over a dice catalog and run
//! settings.
//!
//! Every key embeds the cache's format/schema version so changing either
//! value invalidates all previously persisted entries without an explicit
//! migration step.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::settings::RiskProfile;

/// Bumped whenever the on-disk cache entry shape changes.
pub const CACHE_FORMAT_VERSION: u32 = 1;
/// Bumped whenever the `cache_entries` table schema changes.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// `sha256_hex(json([{name, probs}, ...] sorted by name))` over a catalog.
///
/// The catalog is already in canonical (name-sorted) order, so no
/// re-sorting is needed here.
pub fn dice_signature(catalog: &crate::dice::Catalog) -> String {
    let entries: Vec<Value> = catalog
        .dice()
        .iter()
        .map(|d| json!({"name": d.name(), "probs": d.probabilities()}))
        .collect();
    sha256_hex(&serde_json::to_string(&entries).expect("dice signature is always serializable"))
}

/// Builds the run-identity context a cache key is derived from.
///
/// `num_turns` and `seed_base` are passed explicitly (rather than read off a
/// full `OptimizationSettings`) because a staged workflow run evaluates each
/// loadout with per-stage overrides of both.
pub fn context(
    signature: &str,
    target: u32,
    risk_profile: RiskProfile,
    num_turns: u32,
    cap: u32,
    seed_base: Option<u64>,
) -> Value {
    let mut map = Map::new();
    map.insert("v".to_string(), json!(CACHE_FORMAT_VERSION));
    map.insert("schema".to_string(), json!(CACHE_SCHEMA_VERSION));
    map.insert("dice".to_string(), json!(signature));
    map.insert("target".to_string(), json!(target));
    map.insert("risk_profile".to_string(), json!(format!("{risk_profile:?}")));
    map.insert("num_turns".to_string(), json!(num_turns));
    map.insert("cap".to_string(), json!(cap));
    if let Some(seed) = seed_base {
        map.insert("seed_base".to_string(), json!(seed));
    }
    Value::Object(map)
}

/// `sha256_hex(json_sorted_keys(context ∪ {counts}))`: the final cache key.
///
/// `serde_json::Map` is a `BTreeMap` by default (this crate does not enable
/// the `preserve_order` feature), so serialization always emits object keys
/// in byte-wise sorted order regardless of insertion order.
pub fn key(context: &Value, counts: &[u32]) -> String {
    let mut map = match context {
        Value::Object(m) => m.clone(),
        other => panic!("context must be a JSON object, got {other:?}"),
    };
    map.insert("counts".to_string(), json!(counts));
    sha256_hex(&serde_json::to_string(&Value::Object(map)).expect("key context is always serializable"))
}
