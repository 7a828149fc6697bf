use std::collections::HashMap;

use serde_json::{Map, Value};

use super::TemplateError;

/// Resolves `{{name}}` parameter markers against the parameter map.
///
/// Runs once, before the DAG starts. A marker whose name is missing from the
/// map is fatal; anything that does not look like a parameter marker is left
/// verbatim for forward compatibility.
pub fn resolve_params(
    text: &str,
    params: &HashMap<String, String>,
) -> Result<String, TemplateError> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '{' && chars.get(i + 1) == Some(&'{') {
            if let Some((name, end)) = parse_marker(&chars, i + 2, &['}', '}']) {
                match params.get(&name) {
                    Some(value) => out.push_str(value),
                    None => return Err(TemplateError::MissingParameter(name)),
                }
                i = end;
                continue;
            }
            out.push_str("{{");
            i += 2;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }

    Ok(out)
}

/// Resolves `{step}` and `{step.field.sub}` references against a context
/// snapshot.
///
/// Substituted text is not rescanned, so resolution cannot cascade. Names
/// absent from the snapshot (and any construct that is not a plain dotted
/// reference) are left verbatim; dotted paths that miss a segment inside a
/// present value resolve to the empty string with a warning, as do
/// references to a skipped step (stored as null).
pub fn resolve_refs(text: &str, snapshot: &Map<String, Value>) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '{' {
            // `{{` opens a parameter marker, not a step reference.
            if chars.get(i + 1) == Some(&'{') {
                out.push_str("{{");
                i += 2;
                continue;
            }
            if let Some((path, end)) = parse_marker(&chars, i + 1, &['}']) {
                let root = path.split('.').next().unwrap_or(&path);
                if snapshot.contains_key(root) {
                    out.push_str(&resolve_path(snapshot, &path));
                    i = end;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    out
}

/// Applies [`resolve_refs`] to every string inside a JSON value. Keys are
/// left untouched.
pub fn resolve_value_refs(value: &Value, snapshot: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_refs(s, snapshot)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value_refs(item, snapshot))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value_refs(v, snapshot)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Applies [`resolve_params`] to every string inside a JSON value.
pub fn resolve_value_params(
    value: &Value,
    params: &HashMap<String, String>,
) -> Result<Value, TemplateError> {
    Ok(match value {
        Value::String(s) => Value::String(resolve_params(s, params)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value_params(item, params))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), resolve_value_params(v, params)?)))
                .collect::<Result<_, TemplateError>>()?,
        ),
        other => other.clone(),
    })
}

/// Follows a dotted path into the snapshot. Returns `None` when any segment
/// is missing.
pub fn lookup_path<'a>(snapshot: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = snapshot.get(segments.next()?)?;

    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }

    Some(current)
}

/// Renders a context value for substitution: strings raw, everything else
/// compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn resolve_path(snapshot: &Map<String, Value>, path: &str) -> String {
    match lookup_path(snapshot, path) {
        Some(Value::Null) => {
            log::warn!("reference '{{{path}}}' points at a skipped step, substituting \"\"");
            String::new()
        }
        Some(value) => stringify(value),
        None => {
            log::warn!("reference '{{{path}}}' has no value in the context, substituting \"\"");
            String::new()
        }
    }
}

/// Parses `ident(.ident)*` starting at `start`, expecting `closer` right
/// after it. Returns the dotted name and the index past the closer.
fn parse_marker(chars: &[char], start: usize, closer: &[char]) -> Option<(String, usize)> {
    let mut i = start;
    let mut name = String::new();

    loop {
        let seg_start = i;
        match chars.get(i) {
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => i += 1,
            _ => return None,
        }
        while matches!(chars.get(i), Some(c) if c.is_ascii_alphanumeric() || *c == '_') {
            i += 1;
        }
        name.extend(&chars[seg_start..i]);

        if chars.get(i) == Some(&'.') {
            name.push('.');
            i += 1;
            continue;
        }
        break;
    }

    for expected in closer {
        if chars.get(i) != Some(expected) {
            return None;
        }
        i += 1;
    }

    Some((name, i))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn snapshot(value: Value) -> Map<String, Value> {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn test_resolve_params() {
        let params = HashMap::from([("name".to_string(), "Alice".to_string())]);
        let resolved = resolve_params("Hello {{name}}, bye {{name}}", &params).unwrap();
        assert_eq!(resolved, "Hello Alice, bye Alice");
    }

    #[test]
    fn test_missing_param_is_fatal() {
        let params = HashMap::new();
        let err = resolve_params("Hello {{name}}", &params).unwrap_err();
        assert!(matches!(err, TemplateError::MissingParameter(name) if name == "name"));
    }

    #[test]
    fn test_malformed_param_marker_left_verbatim() {
        let params = HashMap::new();
        let resolved = resolve_params("json {{1, 2}} stays", &params).unwrap();
        assert_eq!(resolved, "json {{1, 2}} stays");
    }

    #[test]
    fn test_resolve_refs() {
        let snapshot = snapshot(json!({"greet": "hello", "count": 3}));
        assert_eq!(
            resolve_refs("{greet} world x{count}", &snapshot),
            "hello world x3"
        );
    }

    #[test]
    fn test_dotted_path() {
        let snapshot = snapshot(json!({"fetch": {"status": 200, "body": {"id": "a1"}}}));
        assert_eq!(
            resolve_refs("{fetch.status}: {fetch.body.id}", &snapshot),
            "200: a1"
        );
    }

    #[test]
    fn test_missing_segment_resolves_empty() {
        let snapshot = snapshot(json!({"fetch": {"status": 200}}));
        assert_eq!(resolve_refs("[{fetch.body.id}]", &snapshot), "[]");
    }

    #[test]
    fn test_unknown_name_left_verbatim() {
        let snapshot = snapshot(json!({"a": 1}));
        assert_eq!(resolve_refs("{unknown} {a}", &snapshot), "{unknown} 1");
    }

    #[test]
    fn test_unknown_constructs_left_verbatim() {
        let snapshot = snapshot(json!({"a": 1}));
        assert_eq!(resolve_refs("{a + 1} {fn(a)} {a[0]}", &snapshot), "{a + 1} {fn(a)} {a[0]}");
    }

    #[test]
    fn test_skipped_step_resolves_empty() {
        let snapshot = snapshot(json!({"skipped": null}));
        assert_eq!(resolve_refs("[{skipped}]", &snapshot), "[]");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let snapshot = snapshot(json!({"a": "result", "b": {"x": 1}}));
        let once = resolve_refs("{a} and {b.x} and {missing}", &snapshot);
        let twice = resolve_refs(&once, &snapshot);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_object_value_stringified_compact() {
        let snapshot = snapshot(json!({"out": {"k": "v"}}));
        assert_eq!(resolve_refs("{out}", &snapshot), r#"{"k":"v"}"#);
    }

    #[test]
    fn test_resolve_value_refs_recurses() {
        let snapshot = snapshot(json!({"a": "x"}));
        let value = json!({"cmd": "echo {a}", "nested": ["{a}", 3]});
        assert_eq!(
            resolve_value_refs(&value, &snapshot),
            json!({"cmd": "echo x", "nested": ["x", 3]})
        );
    }
}
