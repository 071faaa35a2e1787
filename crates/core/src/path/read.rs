use crate::error::{FlowError, Result};
use serde_json::Value;

/// One segment of a parsed read path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for PathStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(key) => write!(f, ".{}", key),
            Self::Index(index) => write!(f, "[{}]", index),
        }
    }
}

/// Parse a read path such as `$.a[0][1].b` into its steps
pub fn parse_read_path(path: &str) -> Result<Vec<PathStep>> {
    let mut rest = path
        .strip_prefix('$')
        .ok_or_else(|| FlowError::path_syntax(path, "path must start with $"))?;
    let mut steps = Vec::new();

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            let key = &after[..end];
            if key.is_empty() || key.contains(']') {
                return Err(FlowError::path_syntax(path, "empty or malformed property name"));
            }
            steps.push(PathStep::Key(key.to_string()));
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after
                .find(']')
                .ok_or_else(|| FlowError::path_syntax(path, "unclosed bracket"))?;
            let digits = &after[..end];
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(FlowError::path_syntax(
                    path,
                    format!("index must be a non-negative integer, got '{}'", digits),
                ));
            }
            let index = digits
                .parse::<usize>()
                .map_err(|e| FlowError::path_syntax(path, e.to_string()))?;
            steps.push(PathStep::Index(index));
            rest = &after[end + 1..];
        } else {
            return Err(FlowError::path_syntax(
                path,
                format!("unexpected segment '{}'", rest),
            ));
        }
    }

    Ok(steps)
}

/// Resolve `path` against `data`, returning the single matching value
pub fn query<'a>(data: &'a Value, path: &str) -> Result<&'a Value> {
    let steps = parse_read_path(path)?;

    let mut current = data;
    for step in &steps {
        let next = match (step, current) {
            (PathStep::Key(key), Value::Object(map)) => map.get(key),
            (PathStep::Index(index), Value::Array(items)) => items.get(*index),
            _ => None,
        };

        current = next.ok_or_else(|| FlowError::PathResolution {
            path: path.to_string(),
            payload: data.to_string(),
        })?;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_mixed_path() {
        let steps = parse_read_path("$.a[0][1].b").unwrap();
        assert_eq!(
            steps,
            vec![
                PathStep::Key("a".to_string()),
                PathStep::Index(0),
                PathStep::Index(1),
                PathStep::Key("b".to_string()),
            ]
        );
        assert!(parse_read_path("$").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        for path in ["", "a.b", "$.", "$..a", "$[", "$[-1]", "$[x]", "$a", "$.a]"] {
            let result = parse_read_path(path);
            assert!(
                matches!(result, Err(FlowError::PathSyntax { .. })),
                "expected syntax error for {:?}",
                path
            );
        }
    }

    #[test]
    fn test_query_walks_objects_and_arrays() {
        let data = json!({ "a": [[1, { "b": "found" }]], "c": null });

        assert_eq!(query(&data, "$").unwrap(), &data);
        assert_eq!(query(&data, "$.a[0][1].b").unwrap(), &json!("found"));
        assert_eq!(query(&data, "$.c").unwrap(), &Value::Null);
    }

    #[test]
    fn test_query_on_array_root() {
        let data = json!([{ "count": 2 }, { "count": 3 }]);
        assert_eq!(query(&data, "$[1].count").unwrap(), &json!(3));
    }

    #[test]
    fn test_query_without_match_fails() {
        let data = json!({ "a": [1] });

        for path in ["$.b", "$.a[3]", "$.a.b", "$[0]"] {
            let err = query(&data, path).unwrap_err();
            assert!(matches!(err, FlowError::PathResolution { .. }), "{}", path);
        }
    }
}
