//! Reduce two entity snapshots to `(originalValues, newValues)`

use serde_json::Value as JsonValue;
use std::{collections::BTreeSet, sync::Arc};

pub type Snapshot = Option<JsonValue>;

/// Comparison applied after projection
pub type DiffFn = Arc<dyn Fn(Snapshot, Snapshot) -> (Snapshot, Snapshot) + Send + Sync>;

/// Pass both snapshots through unchanged
pub fn identity() -> DiffFn {
    Arc::new(|old, new| (old, new))
}

/// Keep only the keys whose values differ between two objects
pub fn changed_only() -> DiffFn {
    Arc::new(|old, new| match (old, new) {
        (Some(JsonValue::Object(mut old)), Some(JsonValue::Object(mut new))) => {
            let same: Vec<String> = old
                .iter()
                .filter(|(key, value)| new.get(key.as_str()) == Some(*value))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &same {
                old.remove(key);
                new.remove(key);
            }
            (Some(JsonValue::Object(old)), Some(JsonValue::Object(new)))
        },
        (old, new) => (old, new),
    })
}

/// Projection applied before comparison; `keep_only` wins over `drop_keys`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOptions {
    pub keep_only: Option<Vec<String>>,
    pub drop_keys: Option<Vec<String>>,
}

impl DiffOptions {
    pub fn keep_only<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            keep_only: Some(keys.into_iter().map(Into::into).collect()),
            drop_keys: None,
        }
    }

    pub fn drop_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            keep_only: None,
            drop_keys: Some(keys.into_iter().map(Into::into).collect()),
        }
    }
}

/// Remove from both objects every key not in `keep`
pub fn keep_props(old: &mut Snapshot, new: &mut Snapshot, keep: &[String]) {
    let keep: BTreeSet<&str> = keep.iter().map(String::as_str).collect();
    let mut keys: BTreeSet<String> = BTreeSet::new();
    for snapshot in [&*old, &*new] {
        if let Some(JsonValue::Object(map)) = snapshot {
            keys.extend(map.keys().cloned());
        }
    }
    let doomed: Vec<String> = keys.into_iter().filter(|key| !keep.contains(key.as_str())).collect();
    drop_props(old, new, &doomed);
}

/// Remove the named keys from both objects
pub fn drop_props(old: &mut Snapshot, new: &mut Snapshot, keys: &[String]) {
    for snapshot in [old, new] {
        if let Some(JsonValue::Object(map)) = snapshot {
            for key in keys {
                map.remove(key);
            }
        }
    }
}

/// Project copies of both snapshots, then hand them to `diff_fn`
pub fn reduce(old: Snapshot, new: Snapshot, options: &DiffOptions, diff_fn: &DiffFn) -> (Snapshot, Snapshot) {
    let (mut old, mut new) = (old, new);

    if let Some(keep) = &options.keep_only {
        keep_props(&mut old, &mut new, keep);
    } else if let Some(drop) = &options.drop_keys {
        drop_props(&mut old, &mut new, drop);
    }

    diff_fn(old, new)
}
