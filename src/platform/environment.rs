//! Default configuration read from the process environment.

use std::env;
use std::fs;

use serde_json::Value;

/// JSON object with store defaults, e.g. `{"idleTtlMs": 1000, "saveDelaysMs": [50, 1000]}`.
pub const DEFAULTS_VAR: &str = "FIRESTORE_ORM_DEFAULTS";
/// Path to a file holding the same JSON object.
pub const DEFAULTS_PATH_VAR: &str = "FIRESTORE_ORM_DEFAULTS_PATH";

/// Returns the parsed defaults object when one is configured.
pub fn orm_defaults() -> Option<Value> {
    defaults_from_env().or_else(defaults_from_path)
}

fn defaults_from_env() -> Option<Value> {
    let raw = env::var(DEFAULTS_VAR).ok()?;
    parse_object(&raw)
}

fn defaults_from_path() -> Option<Value> {
    let path = env::var(DEFAULTS_PATH_VAR).ok()?;
    let content = fs::read_to_string(path).ok()?;
    parse_object(&content)
}

pub(crate) fn parse_object(raw: &str) -> Option<Value> {
    serde_json::from_str::<Value>(raw)
        .ok()
        .filter(Value::is_object)
}
