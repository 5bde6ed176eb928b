//! Flatten JSON payloads into CSV for clients that want tabular output.

use serde_json::{Map, Value};

/// Convert a JSON payload to flattened CSV.
///
/// A `results` array is unwrapped when present (the shape every Massive
/// list endpoint returns); otherwise an array is taken as the records and
/// anything else becomes a single record. Nested objects flatten into
/// `parent_child` columns, arrays are rendered as JSON strings, and columns
/// appear in first-seen order across all records.
pub fn json_to_csv(input: &Value) -> String {
    let records: Vec<&Value> = match input {
        Value::Object(map) if map.contains_key("results") => match &map["results"] {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        },
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let rows: Vec<Vec<(String, String)>> = records.iter().map(|record| flatten(record)).collect();
    if rows.is_empty() {
        return String::new();
    }

    let mut columns: Vec<String> = Vec::new();
    for row in &rows {
        for (key, _) in row {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut output = String::new();
    write_row(&mut output, columns.iter().map(String::as_str));
    for row in &rows {
        write_row(
            &mut output,
            columns.iter().map(|column| {
                row.iter()
                    .find(|(key, _)| key == column)
                    .map(|(_, value)| value.as_str())
                    .unwrap_or("")
            }),
        );
    }
    output
}

fn flatten(record: &Value) -> Vec<(String, String)> {
    match record {
        Value::Object(map) => {
            let mut cells = Vec::new();
            flatten_into(map, "", &mut cells);
            cells
        }
        other => vec![("value".to_string(), render(other))],
    }
}

fn flatten_into(map: &Map<String, Value>, prefix: &str, out: &mut Vec<(String, String)>) {
    for (key, value) in map {
        let column = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}_{key}")
        };
        match value {
            Value::Object(nested) => flatten_into(nested, &column, out),
            other => out.push((column, render(other))),
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(_) => value.to_string(),
        other => other.to_string(),
    }
}

fn write_row<'a>(output: &mut String, cells: impl Iterator<Item = &'a str>) {
    let mut first = true;
    for cell in cells {
        if !first {
            output.push(',');
        }
        first = false;
        output.push_str(&escape(cell));
    }
    output.push('\n');
}

fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_a_results_array() {
        let payload = json!({
            "results": [
                {"ticker": "RZLV", "close": 5.5},
                {"ticker": "AAPL", "close": 180.0}
            ],
            "status": "OK"
        });
        let csv = json_to_csv(&payload);
        assert_eq!(csv, "ticker,close\nRZLV,5.5\nAAPL,180.0\n");
    }

    #[test]
    fn flattens_nested_objects_with_joined_keys() {
        let payload = json!([{"day": {"open": 1.0, "close": 2.0}, "ticker": "X"}]);
        let csv = json_to_csv(&payload);
        assert_eq!(csv, "day_open,day_close,ticker\n1.0,2.0,X\n");
    }

    #[test]
    fn columns_union_across_records_in_first_seen_order() {
        let payload = json!([
            {"a": 1, "b": 2},
            {"a": 3, "c": 4}
        ]);
        let csv = json_to_csv(&payload);
        assert_eq!(csv, "a,b,c\n1,2,\n3,,4\n");
    }

    #[test]
    fn arrays_render_as_json_strings_and_commas_are_quoted() {
        let payload = json!([{"tags": ["a", "b"], "note": "hello, world"}]);
        let csv = json_to_csv(&payload);
        assert_eq!(
            csv,
            "tags,note\n\"[\"\"a\"\",\"\"b\"\"]\",\"hello, world\"\n"
        );
    }

    #[test]
    fn scalar_records_get_a_value_column() {
        let csv = json_to_csv(&json!([1, 2]));
        assert_eq!(csv, "value\n1\n2\n");
    }

    #[test]
    fn empty_input_produces_empty_output() {
        assert_eq!(json_to_csv(&json!({"results": []})), "");
    }
}
