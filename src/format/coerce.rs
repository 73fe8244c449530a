use std::collections::HashMap;

use serde_json::{Map, Number, Value};

/// Channel schema: field name to declared type tag.
pub type Schema = HashMap<String, String>;

/// Replaces float values with 64-bit integers for every field the schema
/// declares as `int`, truncating toward zero. Other entries are untouched.
pub fn coerce_ints(values: &mut Map<String, Value>, schema: &Schema) {
    for (key, tag) in schema {
        if tag != "int" {
            continue;
        }
        let Some(value) = values.get_mut(key) else {
            continue;
        };
        if let Value::Number(num) = value {
            if num.is_f64() {
                if let Some(f) = num.as_f64() {
                    *value = Value::Number(Number::from(f as i64));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(entries: &[(&str, &str)]) -> Schema {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn values(raw: Value) -> Map<String, Value> {
        raw.as_object().unwrap().clone()
    }

    #[test]
    fn turns_declared_floats_into_integers() {
        let mut map = values(json!({"qty": 3.0, "price": 10.5}));
        coerce_ints(&mut map, &schema(&[("qty", "int"), ("price", "float")]));

        assert_eq!(map["qty"], json!(3));
        assert!(map["qty"].is_i64());
        assert_eq!(map["price"], json!(10.5));
    }

    #[test]
    fn truncates_toward_zero() {
        let mut map = values(json!({"a": 2.9, "b": -2.9}));
        coerce_ints(&mut map, &schema(&[("a", "int"), ("b", "int")]));

        assert_eq!(map["a"], json!(2));
        assert_eq!(map["b"], json!(-2));
    }

    #[test]
    fn leaves_non_floats_untouched() {
        let mut map = values(json!({"qty": 3, "note": "n/a", "gap": null}));
        coerce_ints(
            &mut map,
            &schema(&[("qty", "int"), ("note", "int"), ("gap", "int")]),
        );

        assert_eq!(map["qty"], json!(3));
        assert_eq!(map["note"], json!("n/a"));
        assert_eq!(map["gap"], json!(null));
    }

    #[test]
    fn ignores_missing_keys() {
        let mut map = values(json!({"present": 1.0}));
        coerce_ints(&mut map, &schema(&[("absent", "int")]));
        assert_eq!(map["present"], json!(1.0));
    }
}
