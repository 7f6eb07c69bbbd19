//! Identifier extraction from posts and profiles.
//!
//! Ids show up either as strings (`userIdStr`, `postIdStr`) or as JSON numbers
//! (`userId`, `postId`). Numbers are normalized to plain decimal strings so
//! both encodings land on the same storage key.

use serde_json::{Number, Value};

use crate::json::{walk, Visitor};

/// Format a JSON number as an integer decimal string, without exponent or
/// fractional part. Returns `None` for non-finite or negative values.
pub fn format_id_number(n: &Number) -> Option<String> {
    if let Some(u) = n.as_u64() {
        return Some(u.to_string());
    }
    if n.as_i64().is_some() {
        return None;
    }
    let f = n.as_f64()?;
    if !f.is_finite() || f < 0.0 {
        return None;
    }
    Some(format!("{:.0}", f.trunc()))
}

/// Read an id from a single JSON value (string or number).
fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => format_id_number(n),
        _ => None,
    }
}

/// Prefer the string field, then the numeric field.
fn id_field(record: &Value, str_key: &str, num_key: &str) -> Option<String> {
    if let Some(Value::String(s)) = record.get(str_key) {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }
    match record.get(num_key) {
        Some(Value::Number(n)) => format_id_number(n),
        _ => None,
    }
}

/// Author of a post, if the record names one.
pub fn user_id(record: &Value) -> Option<String> {
    id_field(record, "userIdStr", "userId")
}

/// Post id of a record, falling back to the id the record was requested by.
pub fn post_id(record: &Value, requested: &str) -> String {
    id_field(record, "postIdStr", "postId").unwrap_or_else(|| requested.to_string())
}

/// Post ids referenced by a profile, in first-seen order without duplicates.
///
/// The `posts` list is used when present and non-empty. Its entries may be
/// strings, numbers or post objects. Otherwise the whole record is searched
/// for `postId` / `postIdStr` keys (any case), since profile layouts differ
/// between archive snapshots.
pub fn post_ids_from_profile(profile: &Value) -> Vec<String> {
    let mut ids = IdList::default();

    if let Some(Value::Array(posts)) = profile.get("posts") {
        for item in posts {
            let id = match item {
                Value::Object(_) => id_field(item, "postIdStr", "postId"),
                other => id_from_value(other),
            };
            if let Some(id) = id {
                ids.push(id);
            }
        }
    }

    if ids.is_empty() {
        walk(profile, &mut PostIdScan { ids: &mut ids });
    }

    ids.into_vec()
}

/// User ids from a user list: an array of id strings or numbers, or of
/// objects carrying `userIdStr` / `userId`. First-seen order, no duplicates.
pub fn user_ids_from_list(list: &Value) -> Vec<String> {
    let mut ids = IdList::default();
    if let Value::Array(items) = list {
        for item in items {
            let id = match item {
                Value::Object(_) => user_id(item),
                other => id_from_value(other),
            };
            if let Some(id) = id {
                ids.push(id);
            }
        }
    }
    ids.into_vec()
}

/// Whether an id is safe to embed in a storage key.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Default)]
struct IdList {
    ids: Vec<String>,
    seen: std::collections::HashSet<String>,
}

impl IdList {
    fn push(&mut self, id: String) {
        if self.seen.insert(id.clone()) {
            self.ids.push(id);
        }
    }

    fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn into_vec(self) -> Vec<String> {
        self.ids
    }
}

struct PostIdScan<'a> {
    ids: &'a mut IdList,
}

impl Visitor for PostIdScan<'_> {
    fn visit_entry(&mut self, key: &str, value: &Value) {
        if key.eq_ignore_ascii_case("postid") || key.eq_ignore_ascii_case("postidstr") {
            if let Some(id) = id_from_value(value) {
                self.ids.push(id);
            }
        }
    }
}
