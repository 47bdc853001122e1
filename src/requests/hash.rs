use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{ControlError, ControlResult};

/// Structural hash of a request: SHA-256 over its canonical JSON form, lowercase hex.
///
/// Object keys are sorted at every level, so the result depends only on field names and
/// values, never on declaration or map iteration order.
pub fn compute_hash<T: Serialize + ?Sized>(request: &T) -> ControlResult<String> {
    let value = serde_json::to_value(request)
        .map_err(|err| ControlError::Protocol(format!("request is not serializable: {err}")))?;
    let mut canonical = Vec::new();
    write_canonical(&value, &mut canonical);
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// A change id is exactly what [`compute_hash`] produces.
pub fn is_change_id(candidate: &str) -> bool {
    candidate.len() == 64
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push(b'{');
            for (idx, (key, item)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                write_scalar(&Value::String(key.clone()), out);
                out.push(b':');
                write_canonical(item, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut Vec<u8>) {
    // Scalars have a single compact rendering.
    out.extend_from_slice(value.to_string().as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"Type": "Policy", "Name": "readonly", "Required": 3});
        let b = json!({"Required": 3, "Name": "readonly", "Type": "Policy"});
        assert_eq!(compute_hash(&a).unwrap(), compute_hash(&b).unwrap());
    }

    #[test]
    fn nested_objects_are_canonicalized() {
        let a = json!({"outer": {"b": 1, "a": [ {"y": 2, "x": 1} ]}});
        let b = json!({"outer": {"a": [ {"x": 1, "y": 2} ], "b": 1}});
        assert_eq!(compute_hash(&a).unwrap(), compute_hash(&b).unwrap());
    }

    #[test]
    fn any_field_change_alters_hash() {
        let base = json!({"Type": "Policy", "Name": "readonly", "Required": 3});
        let original = compute_hash(&base).unwrap();
        for altered in [
            json!({"Type": "policy", "Name": "readonly", "Required": 3}),
            json!({"Type": "Policy", "Name": "readonly2", "Required": 3}),
            json!({"Type": "Policy", "Name": "readonly", "Required": 2}),
            json!({"Type": "Policy", "Name": "readonly", "Required": "3"}),
        ] {
            assert_ne!(compute_hash(&altered).unwrap(), original);
        }
    }

    #[test]
    fn output_is_a_change_id() {
        let id = compute_hash(&json!({"Type": "Policy"})).unwrap();
        assert!(is_change_id(&id));
        assert!(!is_change_id("../unseal_wrapping_tokens/abc"));
        assert!(!is_change_id(&id.to_uppercase()));
    }
}
