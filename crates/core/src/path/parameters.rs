use super::read::query;
use crate::error::{FlowError, Result};
use serde_json::{Map, Value};

const REFERENCE_SUFFIX: &str = ".$";

/// Apply a step's `Parameters` to its filtered input.
///
/// Keys ending in `.$` hold read paths resolved against `data`; the resolved
/// value is stored under the key without the suffix. Other keys are literals.
/// An object input is shallow-merged with the parameters (parameters win);
/// any other input is replaced by the parameters object.
pub fn apply_parameters(data: &Value, parameters: &Map<String, Value>) -> Result<Value> {
    if parameters.is_empty() {
        return Ok(data.clone());
    }

    let mut resolved = Map::new();
    for (key, value) in parameters {
        let Some(target) = reference_target(key) else {
            resolved.insert(key.clone(), value.clone());
            continue;
        };

        let path = value.as_str().ok_or_else(|| {
            FlowError::ReferenceResolution(format!(
                "reference '{}' must be a path string, got {}",
                key, value
            ))
        })?;

        // The read grammar has no wildcards, so a successful query is always a single match.
        let found = match query(data, path) {
            Ok(found) => found,
            Err(FlowError::PathResolution { .. }) => {
                return Err(FlowError::ReferenceResolution(format!(
                    "no matching property: '{}': '{}'",
                    key, path
                )))
            }
            Err(e) => return Err(e),
        };
        resolved.insert(target.to_string(), found.clone());
    }

    Ok(match data {
        Value::Object(source) => {
            let mut merged = source.clone();
            merged.extend(resolved);
            Value::Object(merged)
        }
        _ => Value::Object(resolved),
    })
}

fn reference_target(key: &str) -> Option<&str> {
    key.strip_suffix(REFERENCE_SUFFIX).filter(|k| !k.is_empty())
}
