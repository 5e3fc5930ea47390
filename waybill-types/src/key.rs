//! Canonical query-key codec.
//!
//! Turns a named topic plus a structured parameter descriptor into a
//! canonical cache key. Two descriptors that are semantically equal (same
//! keys and values, regardless of field order, with null fields treated as
//! absent) encode to the same key; different descriptors encode to
//! different keys.
//!
//! This determinism is what lets independently created queries for the
//! "same" filtered list share one cache entry instead of duplicating it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Canonical cache key for a query.
///
/// Opaque to callers; obtained only through [`QueryKey::encode`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(String);

impl QueryKey {
    /// Encodes a topic and parameter descriptor into a canonical key.
    ///
    /// Object keys are sorted lexicographically, array order is preserved,
    /// and primitives are type-tagged so the number `1` and the string
    /// `"1"` do not collide. Object entries whose value is `null` are
    /// omitted: an absent field and an `Option::None` field produce the
    /// same key. The topic is prefixed so two different queries with
    /// coincidentally identical parameter shapes never collide.
    #[must_use]
    pub fn encode(topic: &str, params: &Value) -> Self {
        let mut out = String::with_capacity(topic.len() + 16);
        out.push_str(topic);
        out.push('#');
        write_canonical(params, &mut out);
        Self(out)
    }

    /// Encodes any serializable parameter struct.
    pub fn encode_params<T: Serialize>(topic: &str, params: &T) -> crate::Result<Self> {
        let value = serde_json::to_value(params)?;
        Ok(Self::encode(topic, &value))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            out.push_str("b:");
            out.push_str(if *b { "true" } else { "false" });
        }
        Value::Number(n) => {
            out.push_str("n:");
            out.push_str(&n.to_string());
        }
        Value::String(s) => {
            out.push_str("s:");
            write_escaped(s, out);
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
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&str> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k.as_str())
                .collect();
            keys.sort_unstable();
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(k, out);
                out.push(':');
                write_canonical(&map[*k], out);
            }
            out.push('}');
        }
    }
}

/// Writes a quoted string with delimiter characters escaped, so values
/// containing `{`, `,` or quotes cannot forge a different descriptor.
fn write_escaped(s: &str, out: &mut String) {
    use fmt::Write;

    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
