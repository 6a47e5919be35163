//! Token-efficient tool-output encoding
//!
//! Arrays of uniform JSON objects re-encode as a header-plus-rows table
//! before going back to the LLM; everything else falls through to compact
//! JSON. The recorded history keeps the raw JSON either way.

use serde_json::Value;

/// Encode a tool output for the model's context window.
pub fn encode_tool_output(value: &Value) -> String {
    if let Some(table) = try_encode_table(value) {
        return table;
    }
    value.to_string()
}

fn scalar_to_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.replace('|', "/").replace('\n', " "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn try_encode_table(value: &Value) -> Option<String> {
    let rows = value.as_array()?;
    if rows.len() < 2 {
        return None;
    }
    let first = rows.first()?.as_object()?;
    let mut keys: Vec<&String> = first.keys().collect();
    keys.sort();
    // Every row must be an object over the same keys with scalar values.
    for row in rows {
        let obj = row.as_object()?;
        if obj.len() != keys.len() {
            return None;
        }
        for key in &keys {
            let cell = obj.get(*key)?;
            if cell.is_object() || cell.is_array() {
                return None;
            }
        }
    }
    let mut out = String::new();
    out.push_str(
        &keys
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join("|"),
    );
    for row in rows {
        let obj = row.as_object()?;
        out.push('\n');
        out.push_str(
            &keys
                .iter()
                .map(|k| scalar_to_cell(&obj[k.as_str()]))
                .collect::<Vec<_>>()
                .join("|"),
        );
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn uniform_object_arrays_become_tables() {
        let value = json!([
            {"date": "2024-01-01", "team": "BOS", "points": 112},
            {"date": "2024-01-03", "team": "BOS", "points": 104},
        ]);
        let encoded = encode_tool_output(&value);
        assert_eq!(encoded, "date|points|team\n2024-01-01|112|BOS\n2024-01-03|104|BOS");
    }

    #[test]
    fn non_uniform_or_nested_values_stay_json() {
        let nested = json!([{"a": {"b": 1}}, {"a": {"b": 2}}]);
        assert!(encode_tool_output(&nested).starts_with('['));
        let object = json!({"wins": 5});
        assert_eq!(encode_tool_output(&object), "{\"wins\":5}");
        let single = json!([{"a": 1}]);
        assert!(encode_tool_output(&single).starts_with('['));
    }

    #[test]
    fn pipes_in_cells_are_escaped() {
        let value = json!([
            {"k": "a|b"},
            {"k": "c"},
        ]);
        assert_eq!(encode_tool_output(&value), "k\na/b\nc");
    }
}
