//! Loading objects from JSON files

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load a list of objects
///
/// Accepts a JSON array, a `List` object with `items`, or a single object.
pub fn load_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let value: Value = load_json(path)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) if object.get("items").is_some_and(Value::is_array) => {
            match object.remove("items") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            }
        }
        single => vec![single],
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item)
                .with_context(|| format!("Invalid item {} in {}", index, path.display()))
        })
        .collect()
}
