//! Dot-addressed field lookup
//!
//! Paths such as `sensor.readings.0.value` walk nested objects by key and
//! arrays by numeric index. Lookups never fail loudly: any missing key,
//! out-of-range index or type mismatch yields `None`.

use serde_json::Value;

/// Resolve a dot-separated path inside a JSON value
///
/// JSON `null` is reported as absent, so callers only ever see concrete values.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }

    match current {
        Value::Null => None,
        other => Some(other),
    }
}

/// Iterate over the top-level numeric fields of a JSON object
pub fn numeric_fields(value: &Value) -> impl Iterator<Item = (&str, f64)> {
    value
        .as_object()
        .into_iter()
        .flat_map(|map| map.iter())
        .filter_map(|(key, v)| v.as_f64().map(|n| (key.as_str(), n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested_object() {
        let data = json!({"device": {"sensor": {"temperature": 72}}});
        assert_eq!(
            lookup(&data, "device.sensor.temperature"),
            Some(&json!(72))
        );
    }

    #[test]
    fn test_lookup_array_index() {
        let data = json!({"readings": [{"value": 1}, {"value": 2}]});
        assert_eq!(lookup(&data, "readings.1.value"), Some(&json!(2)));
        assert_eq!(lookup(&data, "readings.5.value"), None);
        assert_eq!(lookup(&data, "readings.x.value"), None);
    }

    #[test]
    fn test_lookup_missing_and_null() {
        let data = json!({"a": {"b": null}, "c": 3});
        assert_eq!(lookup(&data, "a.b"), None);
        assert_eq!(lookup(&data, "a.z"), None);
        assert_eq!(lookup(&data, "c.d"), None);
    }

    #[test]
    fn test_numeric_fields_skips_non_numbers() {
        let data = json!({"x": 1, "y": 2.5, "name": "pump", "nested": {"z": 1}});
        let mut fields: Vec<_> = numeric_fields(&data).collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        assert_eq!(fields, vec![("x", 1.0), ("y", 2.5)]);
    }
}
