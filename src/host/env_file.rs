//! Flat `.env` file codec.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{LifecycleError, Result};

/// Parse `.env` text into a key/value map.
pub fn parse(text: &str) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for item in dotenvy::from_read_iter(text.as_bytes()) {
        let (key, value) = item.map_err(|e| LifecycleError::MalformedDocument {
            field: ".env".to_string(),
            expected: format!("KEY=value lines ({e})"),
        })?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// Serialize a map back to `.env` text, one sorted `KEY=value` line per
/// entry. Integers are written bare, everything else double-quoted.
pub fn serialize(vars: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in vars {
        out.push_str(key);
        out.push('=');
        if !value.is_empty() && value.parse::<i64>().is_ok() {
            out.push_str(value);
        } else {
            out.push('"');
            for c in value.chars() {
                match c {
                    '\\' | '"' | '$' => {
                        out.push('\\');
                        out.push(c);
                    }
                    '\n' => out.push_str("\\n"),
                    _ => out.push(c),
                }
            }
            out.push('"');
        }
        out.push('\n');
    }
    out
}

/// Render install parameters into env values. Numbers use their shortest
/// decimal form; any other non-string value is rejected.
pub fn render_params(params: &Map<String, Value>) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for (key, value) in params {
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => render_number(n),
            _ => {
                return Err(LifecycleError::InvalidParam {
                    key: key.clone(),
                    expected: "string or number".to_string(),
                })
            }
        };
        vars.insert(key.clone(), rendered);
    }
    Ok(vars)
}

fn render_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    // Single precision keeps form values like 0.1 from printing as 0.1000000001
    n.as_f64().map(|f| (f as f32).to_string()).unwrap_or_default()
}

/// Read a port number stored under `key`, if present.
pub fn port(vars: &BTreeMap<String, String>, key: &str) -> Result<Option<u16>> {
    vars.get(key)
        .map(|value| {
            value.trim().parse::<u16>().map_err(|_| LifecycleError::InvalidParam {
                key: key.to_string(),
                expected: "a port number".to_string(),
            })
        })
        .transpose()
}

pub fn write(path: &Path, vars: &BTreeMap<String, String>) -> Result<String> {
    let text = serialize(vars);
    fs::write(path, &text)?;
    Ok(text)
}
