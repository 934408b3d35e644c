//! Remote configuration loading.
//!
//! Configuration lives in the store as one key per field:
//! `path ‖ tag = raw value`. Which fields participate is an explicit
//! schema: a configuration struct implements [`RemoteConfig`] and lists
//! the store tags of its loadable fields in [`RemoteConfig::TAGS`].
//! Unlisted fields never touch the store and always keep their in-memory
//! values, whatever the store holds. A tag addresses the field with the
//! matching serialized name, so `#[serde(rename = "...")]` aligns a Rust
//! field with its store tag.
//!
//! Coercion is by the field's current JSON shape:
//! - strings take the raw bytes,
//! - signed integers decode the raw value as a JSON number,
//! - booleans accept `1/0/t/f/true/false/TRUE/FALSE/True/False`.
//!
//! Values that fail to parse and fields of any other shape are silently
//! skipped, so one bad key never poisons the rest of the configuration.
//! A store failure aborts the whole load.

use crate::core::error::{Error, Result};
use crate::store::Store;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A configuration struct whose fields can load from the store.
///
/// `TAGS` is the schema: each entry is the store tag of one loadable
/// field, and must equal that field's serialized name. Fields whose
/// serialized name is not listed are invisible to the loader.
pub trait RemoteConfig: Serialize + DeserializeOwned {
    /// Store tags of the loadable fields.
    const TAGS: &'static [&'static str];
}

/// Load `path ‖ tag` values into the listed fields of `target`.
pub(crate) async fn load_into<T>(
    store: &Arc<dyn Store>,
    timeout: Duration,
    path: &str,
    target: &mut T,
) -> Result<()>
where
    T: RemoteConfig,
{
    let mut shape = serde_json::to_value(&*target).map_err(|_| Error::InvalidConfig)?;
    let Some(fields) = shape.as_object_mut() else {
        return Err(Error::InvalidConfig);
    };
    if T::TAGS.is_empty() {
        return Err(Error::InvalidConfig);
    }

    for tag in T::TAGS {
        let Some(slot) = fields.get_mut(*tag) else {
            continue;
        };
        let key = format!("{}{}", path, tag);
        let fetched = match tokio::time::timeout(timeout, store.get(&key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(error)) => return Err(error),
            Err(_) => return Err(Error::EtcdTimeout),
        };
        let Some(raw) = fetched else {
            continue;
        };
        coerce(slot, &raw);
    }

    *target = serde_json::from_value(shape).map_err(|_| Error::InvalidConfig)?;
    Ok(())
}

/// Overwrite `slot` with `raw` coerced to the slot's shape.
fn coerce(slot: &mut Value, raw: &str) {
    match slot {
        Value::String(_) => *slot = Value::String(raw.to_string()),
        Value::Number(n) if n.is_i64() => {
            if let Ok(parsed) = serde_json::from_str::<i64>(raw) {
                *slot = Value::from(parsed);
            }
        }
        Value::Bool(_) => {
            if let Some(parsed) = parse_bool(raw) {
                *slot = Value::Bool(parsed);
            }
        }
        _ => {}
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_alphabet() {
        for raw in ["1", "t", "T", "true", "TRUE", "True"] {
            assert_eq!(parse_bool(raw), Some(true), "{raw}");
        }
        for raw in ["0", "f", "F", "false", "FALSE", "False"] {
            assert_eq!(parse_bool(raw), Some(false), "{raw}");
        }
        for raw in ["yes", "tRuE", "2", ""] {
            assert_eq!(parse_bool(raw), None, "{raw}");
        }
    }

    #[test]
    fn coerce_string_takes_raw_bytes() {
        let mut slot = Value::String("old".to_string());
        coerce(&mut slot, "new value");
        assert_eq!(slot, Value::String("new value".to_string()));
    }

    #[test]
    fn coerce_integer_skips_garbage() {
        let mut slot = Value::from(42i64);
        coerce(&mut slot, "not a number");
        assert_eq!(slot, Value::from(42i64));
        coerce(&mut slot, "8080");
        assert_eq!(slot, Value::from(8080i64));
    }

    #[test]
    fn coerce_float_is_unsupported() {
        let mut slot = Value::from(1.5f64);
        coerce(&mut slot, "2.5");
        assert_eq!(slot, Value::from(1.5f64));
    }
}
