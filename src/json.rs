//! Recursive traversal over untyped JSON records.
//!
//! Archive records have no fixed schema, so everything that needs to look
//! inside one goes through these walkers. Read-only scans (post id
//! discovery, media collection) implement [`Visitor`] and borrow the record;
//! URL rewriting implements [`VisitorMut`] and edits string leaves in place.

use serde_json::Value;

/// Read-only callbacks for [`walk`]. Both default to no-ops.
pub trait Visitor {
    /// Called for every object entry, before descending into its value.
    fn visit_entry(&mut self, _key: &str, _value: &Value) {}

    /// Called for every string leaf.
    fn visit_str(&mut self, _value: &str) {}
}

/// Callbacks for [`walk_mut`].
pub trait VisitorMut {
    /// Called for every string leaf. The visitor may edit it in place.
    fn visit_string(&mut self, value: &mut String);
}

/// Depth-first, document-order walk. Containers are visited recursively,
/// numbers, booleans and nulls are left alone.
pub fn walk<V: Visitor + ?Sized>(value: &Value, visitor: &mut V) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                visitor.visit_entry(key, child);
                walk(child, visitor);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, visitor);
            }
        }
        Value::String(s) => visitor.visit_str(s),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Same order as [`walk`], handing out mutable string leaves.
pub fn walk_mut<V: VisitorMut + ?Sized>(value: &mut Value, visitor: &mut V) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                walk_mut(child, visitor);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                walk_mut(item, visitor);
            }
        }
        Value::String(s) => visitor.visit_string(s),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        keys: Vec<String>,
        strings: Vec<String>,
    }

    impl Visitor for Recorder {
        fn visit_entry(&mut self, key: &str, _value: &Value) {
            self.keys.push(key.to_string());
        }

        fn visit_str(&mut self, value: &str) {
            self.strings.push(value.to_string());
        }
    }

    #[test]
    fn test_walk_visits_in_document_order() {
        let value = json!({
            "b": "first",
            "a": [ "second", { "c": "third" } ],
            "n": 1
        });
        let mut recorder = Recorder::default();
        walk(&value, &mut recorder);

        assert_eq!(recorder.keys, vec!["b", "a", "c", "n"]);
        assert_eq!(recorder.strings, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_walk_mut_edits_strings_in_place() {
        struct Upper(usize);
        impl VisitorMut for Upper {
            fn visit_string(&mut self, value: &mut String) {
                self.0 += 1;
                *value = value.to_uppercase();
            }
        }

        let mut value = json!({ "a": ["x", 1, null, { "c": "z" }], "b": "y" });
        let mut upper = Upper(0);
        walk_mut(&mut value, &mut upper);
        assert_eq!(upper.0, 3);
        assert_eq!(value, json!({ "a": ["X", 1, null, { "c": "Z" }], "b": "Y" }));
    }
}
