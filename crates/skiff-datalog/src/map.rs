//! Result normalization.
//!
//! Query rows are flat maps of namespaced attributes. [`normalize`] turns one
//! result tuple into an object keyed by entity type, with de-namespaced,
//! camelCased attribute names.

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};

/// Bucket for rows that carry no entity type and no transaction marker.
pub const FALLBACK_BUCKET: &str = "unknownEntity";

/// Bucket for transaction rows.
pub const TX_BUCKET: &str = "tx";

const ENTITY_TYPE: &str = "schema/entity-type";
const TX_MARKER: &str = "db/txInstant";

/// Normalize the rows of one result tuple.
///
/// Rows sharing a bucket accumulate into an array in row order. When only
/// the fallback bucket is populated its value is returned directly;
/// otherwise the fallback bucket is dropped.
pub fn normalize(rows: &[Json]) -> Json {
    let mut buckets: BTreeMap<String, Vec<Json>> = BTreeMap::new();

    for row in rows {
        let (bucket, value) = match row {
            Json::Object(attributes) => {
                let bucket = match attributes.get(ENTITY_TYPE).and_then(Json::as_str) {
                    Some(entity_type) => name_from_key(entity_type, true),
                    None if attributes.contains_key(TX_MARKER) => TX_BUCKET.to_string(),
                    None => FALLBACK_BUCKET.to_string(),
                };
                let mut value = Map::new();
                for (key, attribute) in attributes {
                    if key != ENTITY_TYPE {
                        value.insert(name_from_key(key, true), map_value(attribute));
                    }
                }
                (bucket, Json::Object(value))
            }
            scalar => (FALLBACK_BUCKET.to_string(), map_value(scalar)),
        };
        buckets.entry(bucket).or_default().push(value);
    }

    if buckets.len() == 1
        && let Some(values) = buckets.remove(FALLBACK_BUCKET)
    {
        return collapse(values);
    }
    buckets.remove(FALLBACK_BUCKET);

    Json::Object(
        buckets
            .into_iter()
            .map(|(bucket, values)| (bucket, collapse(values)))
            .collect(),
    )
}

/// Normalize every tuple of a decoded result set.
pub fn normalize_tuples(tuples: &Json) -> Vec<Json> {
    to_seq(tuples)
        .iter()
        .map(|tuple| normalize(&to_seq(tuple)))
        .collect()
}

/// View a JSON value as a sequence: arrays as-is, `null` as empty, anything
/// else as a single element.
pub fn to_seq(value: &Json) -> Vec<Json> {
    match value {
        Json::Array(items) => items.clone(),
        Json::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn collapse(mut values: Vec<Json>) -> Json {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Json::Array(values)
    }
}

fn map_value(value: &Json) -> Json {
    match value {
        Json::Array(items) => Json::Array(items.iter().map(map_value).collect()),
        Json::Object(map) => {
            // Enum references pull as {db/id, db/ident}; keep just the name.
            if map.len() == 2
                && map.contains_key("db/id")
                && let Some(ident) = map.get("db/ident").and_then(Json::as_str)
            {
                return Json::String(name_from_key(ident, true));
            }
            Json::Object(
                map.iter()
                    .map(|(k, v)| (name_from_key(k, true), map_value(v)))
                    .collect(),
            )
        }
        scalar => scalar.clone(),
    }
}

/// Strip a leading `:` and the namespace from a key, optionally camelCasing
/// the remainder.
pub fn name_from_key(key: &str, to_camel_case: bool) -> String {
    let key = key.strip_prefix(':').unwrap_or(key);
    let name = match key.split('/').nth(1) {
        Some(name) => name,
        None => key,
    };
    if to_camel_case {
        camel_case(name)
    } else {
        name.to_string()
    }
}

fn words(input: &str) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if !current.is_empty() {
            let prev = chars[i - 1];
            let lower_to_upper = (prev.is_lowercase() || prev.is_ascii_digit()) && c.is_uppercase();
            let acronym_end = prev.is_uppercase()
                && c.is_uppercase()
                && chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if lower_to_upper || acronym_end {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// `entity-type` → `entityType`.
pub fn camel_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (i, word) in words(input).iter().enumerate() {
        let lower = word.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

/// `defaultBranch` → `default-branch`.
pub fn kebab_case(input: &str) -> String {
    words(input)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn commit(sha: &str) -> Json {
        json!({ "schema/entity-type": "git/commit", "git.commit/sha": sha })
    }

    #[test]
    fn test_case_conversion() {
        assert_eq!(camel_case("entity-type"), "entityType");
        assert_eq!(camel_case("installation-token"), "installationToken");
        assert_eq!(camel_case("default_branch"), "defaultBranch");
        assert_eq!(camel_case("sha"), "sha");
        assert_eq!(camel_case("HTMLUrl"), "htmlUrl");
        assert_eq!(kebab_case("defaultBranch"), "default-branch");
        assert_eq!(kebab_case("sourceId"), "source-id");
        assert_eq!(kebab_case("url"), "url");
    }

    #[test]
    fn test_name_from_key() {
        assert_eq!(name_from_key(":git.ref.type/branch", false), "branch");
        assert_eq!(name_from_key("git.repo/default-branch", true), "defaultBranch");
        assert_eq!(name_from_key("plain-name", true), "plainName");
    }

    #[test]
    fn test_single_row_is_object() {
        let normalized = normalize(&[commit("a")]);
        assert_eq!(normalized, json!({ "commit": { "sha": "a" } }));
    }

    #[test]
    fn test_same_bucket_accumulates_in_order() {
        let normalized = normalize(&[commit("a"), commit("b")]);
        assert_eq!(normalized, json!({ "commit": [{ "sha": "a" }, { "sha": "b" }] }));

        let normalized = normalize(&[commit("a"), commit("b"), commit("c")]);
        assert_eq!(normalized["commit"].as_array().unwrap().len(), 3);
        assert_eq!(normalized["commit"][2]["sha"], "c");
    }

    #[test]
    fn test_only_fallback_is_unwrapped() {
        assert_eq!(normalize(&[json!(42)]), json!(42));
        assert_eq!(
            normalize(&[json!({ "git.repo/name": "skiff" })]),
            json!({ "name": "skiff" })
        );
    }

    #[test]
    fn test_fallback_dropped_next_to_real_bucket() {
        let normalized = normalize(&[commit("a"), json!("stray")]);
        assert_eq!(normalized, json!({ "commit": { "sha": "a" } }));
    }

    #[test]
    fn test_tx_bucket() {
        let normalized = normalize(&[json!({ "db/txInstant": "2021-01-01T00:00:00.000Z", "db/id": 7 })]);
        assert_eq!(normalized["tx"]["txInstant"], "2021-01-01T00:00:00.000Z");
        assert_eq!(normalized["tx"]["id"], 7);
    }

    #[test]
    fn test_nested_values_and_enums() {
        let row = json!({
            "schema/entity-type": ":git/commit",
            "git.commit/repo": {
                "git.repo/name": "go-sample-skill",
                "git.repo/org": { "github.org/installation-token": "t" }
            },
            "git.ref/refs": [{
                "git.ref/name": "main",
                "git.ref/type": { "db/id": 83562883711320_i64, "db/ident": "git.ref.type/branch" }
            }]
        });
        let normalized = normalize(&[row]);
        assert_eq!(
            normalized,
            json!({
                "commit": {
                    "repo": { "name": "go-sample-skill", "org": { "installationToken": "t" } },
                    "refs": [{ "name": "main", "type": "branch" }]
                }
            })
        );
    }

    #[test]
    fn test_normalize_tuples() {
        let tuples = json!([[commit("a")], [commit("b")]]);
        let rows = normalize_tuples(&tuples);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["commit"]["sha"], "b");
        assert!(normalize_tuples(&Json::Null).is_empty());
    }
}
