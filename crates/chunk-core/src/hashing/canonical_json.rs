//! JSON canónico: claves de objetos ordenadas, sin espacios.
//!
//! Se usa para derivar la `job_key` de unos `JobParameters`: dos conjuntos con
//! los mismos pares en distinto orden producen el mismo texto.

use serde_json::Value;
use std::collections::BTreeMap;

pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Display de `Value::String` ya produce la cadena escapada.
        Value::String(_) => value.to_string(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let tree: BTreeMap<&String, String> = map.iter().map(|(k, v)| (k, to_canonical_json(v))).collect();
            let items: Vec<String> = tree.into_iter()
                                         .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                                         .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted() {
        let a = json!({"b": 1, "a": "x"});
        assert_eq!(to_canonical_json(&a), r#"{"a":"x","b":1}"#);
    }

    #[test]
    fn nested_values_are_canonical() {
        let a = json!({"z": [ {"y": null, "x": true} ], "q": "com\"illa"});
        assert_eq!(to_canonical_json(&a), r#"{"q":"com\"illa","z":[{"x":true,"y":null}]}"#);
    }
}
