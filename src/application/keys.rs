// Cache key derivation and query-string building
use reqwest::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::form_urlencoded;

/// Serialize `value` with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Identity of one logical request: `"{endpoint}:{METHOD}:{sha256}"`.
///
/// The endpoint comes first so prefix invalidation can match on it.
pub fn cache_key(
    endpoint: &str,
    method: &Method,
    params: &BTreeMap<String, Value>,
    body: Option<&Value>,
) -> String {
    let params: serde_json::Map<String, Value> = params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&Value::Object(params)));
    hasher.update(b"\n");
    hasher.update(canonical_json(body.unwrap_or(&Value::Null)));

    format!(
        "{}:{}:{}",
        endpoint,
        method.as_str(),
        hex::encode(hasher.finalize())
    )
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => canonical_json(other),
    }
}

/// Append `params` to `endpoint`, skipping nulls and respecting an existing
/// query string.
pub fn build_url(endpoint: &str, params: &BTreeMap<String, Value>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in params.iter().filter(|(_, v)| !v.is_null()) {
        serializer.append_pair(name, &param_text(value));
    }
    let query = serializer.finish();

    if query.is_empty() {
        return endpoint.to_string();
    }
    if !endpoint.contains('?') {
        format!("{}?{}", endpoint, query)
    } else if endpoint.ends_with('?') || endpoint.ends_with('&') {
        format!("{}{}", endpoint, query)
    } else {
        format!("{}&{}", endpoint, query)
    }
}
