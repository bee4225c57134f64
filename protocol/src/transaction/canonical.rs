//! # Canonical JSON
//!
//! The signed payload of a transaction is its JSON object re-serialized with
//! no insignificant whitespace and with object keys in ascending byte order,
//! recursively. The client signs exactly these bytes, so the node has to be
//! able to rebuild them bit-for-bit from whatever formatting the request
//! arrived in.
//!
//! Keys are sorted explicitly rather than relying on `serde_json::Map`'s
//! backing collection, which changes if any crate in the build enables the
//! `preserve_order` feature.

use serde_json::{Map, Value};

use super::types::Transaction;

/// Errors while producing canonical JSON.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("top-level JSON value must be an object, found {0}")]
    NotAnObject(&'static str),
}

/// Canonicalize a JSON document whose top level is an object.
///
/// ```
/// use sidechain_protocol::transaction::canonical::canonicalize;
///
/// let a = canonicalize("{ \"to\": \"b\",\n  \"from\": \"a\" }").unwrap();
/// let b = canonicalize(r#"{"from":"a","to":"b"}"#).unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a, r#"{"from":"a","to":"b"}"#);
/// ```
pub fn canonicalize(json: &str) -> Result<String, CodecError> {
    let value: Value = serde_json::from_str(json)?;
    canonicalize_value(value)
}

/// Canonicalize an already-parsed value. Fails unless it is an object.
pub fn canonicalize_value(value: Value) -> Result<String, CodecError> {
    if !value.is_object() {
        return Err(CodecError::NotAnObject(kind(&value)));
    }
    Ok(serde_json::to_string(&sort_keys(value))?)
}

/// The exact message a sender signs for `tx`.
pub fn canonical_message(tx: &Transaction) -> Result<String, CodecError> {
    canonicalize(&serde_json::to_string(tx)?)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, sort_keys(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_and_whitespace_do_not_matter() {
        let variants = [
            r#"{"from":"a","to":"b","amount":"10","nonce":"x"}"#,
            r#"{"nonce":"x","amount":"10","to":"b","from":"a"}"#,
            "{\n  \"to\" : \"b\",\r\n\t\"nonce\":\"x\", \"from\":\"a\",\"amount\" :\"10\"\n}",
        ];
        let canon: Vec<String> = variants.iter().map(|v| canonicalize(v).unwrap()).collect();
        assert!(canon.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(canon[0], r#"{"amount":"10","from":"a","nonce":"x","to":"b"}"#);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize(r#"{"b":1,"a":{"d":[1,2],"c":null}}"#).unwrap();
        let twice = canonicalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn nested_objects_are_sorted() {
        let out = canonicalize(r#"{"z":{"b":1,"a":2},"y":[{"d":0,"c":0}]}"#).unwrap();
        assert_eq!(out, r#"{"y":[{"c":0,"d":0}],"z":{"a":2,"b":1}}"#);
    }

    #[test]
    fn whitespace_inside_strings_is_preserved() {
        let out = canonicalize(r#"{ "memo" : "two  words" }"#).unwrap();
        assert_eq!(out, r#"{"memo":"two  words"}"#);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            canonicalize(r#"{"from":"a","#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn non_object_top_level_is_an_error() {
        assert!(matches!(
            canonicalize("[1,2,3]"),
            Err(CodecError::NotAnObject("array"))
        ));
        assert!(matches!(
            canonicalize("\"str\""),
            Err(CodecError::NotAnObject("string"))
        ));
    }

    #[test]
    fn transaction_message_matches_sorted_fields() {
        let tx = Transaction::new("alice", "bob", 10, "n-1");
        assert_eq!(
            canonical_message(&tx).unwrap(),
            r#"{"amount":"10","from":"alice","nonce":"n-1","to":"bob"}"#
        );
    }
}
