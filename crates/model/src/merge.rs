//! RFC 7386 JSON merge-patch.

use serde_json::Value;

/// Apply `patch` to `base` and return the result.
///
/// A non-object patch replaces the target. Object members set to `null`
/// are removed; other members are merged recursively.
pub fn json_merge_patch(base: &Value, patch: &Value) -> Value {
    let Value::Object(patch_map) = patch else {
        return patch.clone();
    };
    let mut result = match base {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    for (key, value) in patch_map {
        if value.is_null() {
            result.remove(key);
        } else {
            let current = result.remove(key).unwrap_or(Value::Null);
            let merged = json_merge_patch(&current, value);
            result.insert(key.clone(), merged);
        }
    }
    Value::Object(result)
}
