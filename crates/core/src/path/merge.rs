use super::read::PathStep;
use crate::error::{FlowError, Result};
use serde_json::{Map, Value};

/// Merge a step's raw result into its input at `result_path`.
///
/// `$` replaces the whole value. Any other path writes into a copy of the top
/// level of `data`, creating empty objects for missing intermediate keys.
/// Bracket segments are rejected.
pub fn merge_by_result_path(data: &Value, result: Value, result_path: &str) -> Result<Value> {
    if result_path.is_empty() {
        return Err(FlowError::path_syntax(result_path, "ResultPath is empty"));
    }
    if result_path.contains('[') || result_path.contains(']') {
        return Err(FlowError::path_syntax(
            result_path,
            "bracket syntax not supported in ResultPath",
        ));
    }

    let mut segments = result_path.split('.');
    if segments.next() != Some("$") {
        return Err(FlowError::path_syntax(result_path, "ResultPath must start with $"));
    }

    let segments: Vec<&str> = segments.collect();
    let Some((last, parents)) = segments.split_last() else {
        return Ok(result);
    };
    if segments.iter().any(|s| s.is_empty()) {
        return Err(FlowError::path_syntax(result_path, "ResultPath has an empty segment"));
    }

    let mut new_data = shallow_object(data);
    let mut target = &mut new_data;
    for segment in parents {
        let entry = target
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        target = match entry {
            Value::Object(map) => map,
            other => {
                return Err(FlowError::Merge(format!(
                    "cannot write through property '{}' holding {}",
                    segment, other
                )))
            }
        };
    }
    target.insert(last.to_string(), result);

    Ok(Value::Object(new_data))
}

/// Write `result` at a key/index chain inside a copy of `data`.
///
/// Missing containers are created to match the next step (object for a key,
/// array for an index). Index writes may append at position 0 of an empty
/// array; any other out of range index is a [`FlowError::Merge`].
pub fn merge_by_keys(data: &Value, result: Value, keys: &[PathStep]) -> Result<Value> {
    if keys.is_empty() {
        return Err(FlowError::Merge("empty indices".to_string()));
    }

    let mut new_data = data.clone();
    write_at(&mut new_data, keys, result)?;
    Ok(new_data)
}

fn write_at(target: &mut Value, keys: &[PathStep], result: Value) -> Result<()> {
    match keys {
        [] => Ok(()),
        [last] => {
            let slot = slot_mut(target, last, keys)?;
            *slot = result;
            Ok(())
        }
        [head, rest @ ..] => {
            let child = slot_mut(target, head, keys)?;
            if !child.is_object() && !child.is_array() {
                *child = empty_container_for(&rest[0]);
            }
            write_at(child, rest, result)
        }
    }
}

fn slot_mut<'a>(target: &'a mut Value, step: &PathStep, keys: &[PathStep]) -> Result<&'a mut Value> {
    if target.is_null() {
        *target = empty_container_for(step);
    }

    match (step, target) {
        (PathStep::Key(key), Value::Object(map)) => {
            Ok(map.entry(key.clone()).or_insert(Value::Null))
        }
        (PathStep::Index(index), Value::Array(items)) => {
            if *index == 0 && items.is_empty() {
                items.push(Value::Null);
            }
            let len = items.len();
            items.get_mut(*index).ok_or_else(|| {
                FlowError::Merge(format!(
                    "index {} out of bounds (len {}) in path {}",
                    index,
                    len,
                    describe(keys)
                ))
            })
        }
        (step, other) => Err(FlowError::Merge(format!(
            "cannot apply '{}' to {} in path {}",
            step,
            other,
            describe(keys)
        ))),
    }
}

fn empty_container_for(step: &PathStep) -> Value {
    match step {
        PathStep::Key(_) => Value::Object(Map::new()),
        PathStep::Index(_) => Value::Array(Vec::new()),
    }
}

fn describe(keys: &[PathStep]) -> String {
    let mut path = "$".to_string();
    for key in keys {
        path.push_str(&key.to_string());
    }
    path
}

/// Top-level copy of `data` as an object. Arrays and strings become
/// index-keyed maps; other scalars contribute no keys.
fn shallow_object(data: &Value) -> Map<String, Value> {
    match data {
        Value::Object(map) => map.clone(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        Value::String(text) => text
            .chars()
            .enumerate()
            .map(|(i, c)| (i.to_string(), Value::String(c.to_string())))
            .collect(),
        Value::Null | Value::Bool(_) | Value::Number(_) => Map::new(),
    }
}
