//! Settings parsing and merging primitives
//!
//! Component settings are ordered sequences of `key = value` strings that are
//! semantically maps: the last occurrence of a key wins. This module provides
//! the primitives the rest of the pipeline is built on:
//!
//! - [`parse_setting`] splits one entry into its key and value
//! - [`merge_settings`] merges two sequences, later entries superseding
//!   earlier ones while preserving first-appearance order
//! - [`merge_arrays`] overlays one array table onto another
//! - [`replace_variables`] substitutes `:name` tokens from a variable table
//! - [`ArrayValue`] holds the three concrete array shapes a component may
//!   carry, preserving the shape across deep copies
//!
//! # Merge semantics
//!
//! For sequences `old` and `new`, the merged result contains the union of
//! their keys; per key the value comes from `new` when present there, else
//! from `old`. Entries are emitted in the order keys first appeared across
//! `old` followed by `new`. A key without a value in `new` (`key=` or bare
//! `key`) is an *unset marker* and removes the key, except `guest_os_type`,
//! which is retained because ISO discovery fills it at synthesis time.

use crate::constants::{DEFAULT_DELIM, GUEST_OS_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A heterogeneous array value attached to a component.
///
/// Three shapes occur in configuration documents and all three must survive
/// deep copies unchanged: plain string sequences (`scripts`, `boot_command`),
/// sequences of string sequences (`chroot_mounts`, pre-shaped `qemuargs`),
/// and sequences of objects (`ami_block_device_mappings` in long form).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ArrayValue {
    /// An ordered sequence of strings.
    Strings(Vec<String>),
    /// An ordered sequence of string sequences.
    Lists(Vec<Vec<String>>),
    /// An ordered sequence of objects.
    Objects(Vec<serde_json::Map<String, serde_json::Value>>),
    /// A key/value table (`tags`, `run_tags`, `metadata`, `volumes`, and
    /// friends).
    Object(serde_json::Map<String, serde_json::Value>),
}

impl ArrayValue {
    /// Returns the value as a string slice when it has the `Strings` shape.
    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            ArrayValue::Strings(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true when the array holds no entries.
    pub fn is_empty(&self) -> bool {
        match self {
            ArrayValue::Strings(v) => v.is_empty(),
            ArrayValue::Lists(v) => v.is_empty(),
            ArrayValue::Objects(v) => v.is_empty(),
            ArrayValue::Object(v) => v.is_empty(),
        }
    }

    /// Converts the array into a JSON value, preserving its shape and the
    /// order of its contents.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("array value serialization cannot fail")
    }
}

/// The array table of a component: array name to heterogeneous value.
pub type Arrays = BTreeMap<String, ArrayValue>;

/// Splits a `key = value` entry into `(key, value)`.
///
/// Whitespace around the first `=` is tolerated. A key without a value
/// (`key=` or a bare `key`) yields an empty value, which merge treats as an
/// unset marker. This function never fails.
pub fn parse_setting(entry: &str) -> (String, String) {
    match entry.split_once('=') {
        Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
        None => (entry.trim().to_string(), String::new()),
    }
}

/// Merges two settings sequences; entries in `new` supersede entries in
/// `old`.
///
/// See the module docs for the full semantics. The raw entry string of the
/// winning side is carried through unchanged, so formatting (`k=v` versus
/// `k = v`) is preserved.
pub fn merge_settings(old: &[String], new: &[String]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut entries: HashMap<String, String> = HashMap::new();
    for entry in old {
        let (key, _) = parse_setting(entry);
        if !entries.contains_key(&key) {
            order.push(key.clone());
        }
        entries.insert(key, entry.clone());
    }
    for entry in new {
        let (key, value) = parse_setting(entry);
        if value.is_empty() && key != GUEST_OS_TYPE {
            entries.remove(&key);
            continue;
        }
        if !entries.contains_key(&key) && !order.contains(&key) {
            order.push(key.clone());
        }
        entries.insert(key, entry.clone());
    }
    order
        .iter()
        .filter_map(|key| entries.get(key).cloned())
        .collect()
}

/// Overlays `new` onto `old` per array name; an array present in `new`
/// replaces the one in `old` wholesale, arrays only in `old` survive.
pub fn merge_arrays(old: &Arrays, new: &Arrays) -> Arrays {
    let mut merged = old.clone();
    for (name, value) in new {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

/// Substitutes `<delim><name>` tokens in `s` from the variable table.
///
/// The scan is a single pass over the string: substituted values are not
/// rescanned, so a value containing further tokens is emitted literally.
/// Names are maximal runs of `[A-Za-z0-9_]`; a delimiter not followed by a
/// known name is kept as-is (URLs like `http://` pass through untouched).
pub fn replace_variables(s: &str, delim: &str, vars: &HashMap<String, String>) -> String {
    let delim_ch = delim.chars().next().unwrap_or(':');
    let mut out = String::with_capacity(s.len());
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != delim_ch {
            out.push(c);
            continue;
        }
        let rest = &s[i + c.len_utf8()..];
        let name_len = rest
            .find(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        match vars.get(name) {
            Some(value) if !name.is_empty() => {
                out.push_str(value);
                for _ in 0..name_len {
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Convenience wrapper using the default `:` delimiter.
pub fn replace_variables_default(s: &str, vars: &HashMap<String, String>) -> String {
    replace_variables(s, DEFAULT_DELIM, vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_setting() {
        assert_eq!(
            parse_setting("ssh_username = vagrant"),
            ("ssh_username".to_string(), "vagrant".to_string())
        );
        assert_eq!(
            parse_setting("memory=4096"),
            ("memory".to_string(), "4096".to_string())
        );
        assert_eq!(
            parse_setting("guest_os_type ="),
            ("guest_os_type".to_string(), String::new())
        );
        assert_eq!(parse_setting("headless"), ("headless".to_string(), String::new()));
        assert_eq!(
            parse_setting("output = :out_dir/packer.box"),
            ("output".to_string(), ":out_dir/packer.box".to_string())
        );
    }

    #[test]
    fn test_merge_rightmost_wins() {
        let old = entries(&["ssh_port = 22", "disk_size = 20000"]);
        let new = entries(&["disk_size = 40000"]);
        let merged = merge_settings(&old, &new);
        assert_eq!(merged, entries(&["ssh_port = 22", "disk_size = 40000"]));
    }

    #[test]
    fn test_merge_preserves_first_appearance_order() {
        let old = entries(&["a = 1", "b = 2", "c = 3"]);
        let new = entries(&["c = 30", "d = 4", "a = 10"]);
        let merged = merge_settings(&old, &new);
        assert_eq!(merged, entries(&["a = 10", "b = 2", "c = 30", "d = 4"]));
    }

    #[test]
    fn test_merge_each_key_once() {
        let old = entries(&["a = 1", "a = 2"]);
        let new = entries(&["a = 3", "b = 1", "a = 4"]);
        let merged = merge_settings(&old, &new);
        assert_eq!(merged, entries(&["a = 4", "b = 1"]));
    }

    #[test]
    fn test_merge_unset_marker_removes() {
        let old = entries(&["ssh_port = 22", "headless = true"]);
        let new = entries(&["headless ="]);
        let merged = merge_settings(&old, &new);
        assert_eq!(merged, entries(&["ssh_port = 22"]));
    }

    #[test]
    fn test_merge_guest_os_type_unset_preserved() {
        let old = entries(&["ssh_port = 22"]);
        let new = entries(&["guest_os_type = "]);
        let merged = merge_settings(&old, &new);
        assert_eq!(merged, entries(&["ssh_port = 22", "guest_os_type = "]));
    }

    #[test]
    fn test_merge_empty_sides() {
        let old = entries(&["a = 1"]);
        assert_eq!(merge_settings(&old, &[]), old);
        assert_eq!(merge_settings(&[], &old), old);
        assert!(merge_settings(&[], &[]).is_empty());
    }

    #[test]
    fn test_merge_arrays_new_replaces() {
        let mut old = Arrays::new();
        old.insert("scripts".into(), ArrayValue::Strings(vec!["setup.sh".into()]));
        old.insert("only".into(), ArrayValue::Strings(vec!["docker".into()]));
        let mut new = Arrays::new();
        new.insert(
            "scripts".into(),
            ArrayValue::Strings(vec!["setup.sh".into(), "cleanup.sh".into()]),
        );
        let merged = merge_arrays(&old, &new);
        assert_eq!(
            merged.get("scripts").unwrap().as_strings().unwrap(),
            &["setup.sh".to_string(), "cleanup.sh".to_string()]
        );
        assert_eq!(
            merged.get("only").unwrap().as_strings().unwrap(),
            &["docker".to_string()]
        );
    }

    #[test]
    fn test_replace_variables() {
        let vars: HashMap<String, String> = [
            ("distro", "ubuntu"),
            ("release", "14.04"),
            ("arch", "amd64"),
            ("build_name", "1404-amd64-server"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(
            replace_variables_default("../test_files/src/:distro", &vars),
            "../test_files/src/ubuntu"
        );
        assert_eq!(
            replace_variables_default("out/:distro/:build_name", &vars),
            "out/ubuntu/1404-amd64-server"
        );
        assert_eq!(replace_variables_default("http", &vars), "http");
        // Unknown names and bare delimiters pass through.
        assert_eq!(
            replace_variables_default("http://releases.ubuntu.com/", &vars),
            "http://releases.ubuntu.com/"
        );
        assert_eq!(replace_variables_default(":unknown/:arch", &vars), ":unknown/amd64");
    }

    #[test]
    fn test_replace_variables_single_pass() {
        let vars: HashMap<String, String> = [
            ("name", ":distro-:release"),
            ("distro", "ubuntu"),
            ("release", "14.04"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        // The substituted value is not rescanned.
        assert_eq!(replace_variables_default(":name", &vars), ":distro-:release");
    }

    #[test]
    fn test_replace_variables_idempotent_when_resolved() {
        let vars: HashMap<String, String> = [("arch", "amd64")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let once = replace_variables_default("iso/:arch/image", &vars);
        let twice = replace_variables_default(&once, &vars);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_array_value_shapes_roundtrip() {
        let strings = ArrayValue::Strings(vec!["a".into(), "b".into()]);
        assert_eq!(strings.to_json(), json!(["a", "b"]));

        let lists = ArrayValue::Lists(vec![vec!["modifyvm".into(), "--memory".into()]]);
        assert_eq!(lists.to_json(), json!([["modifyvm", "--memory"]]));

        let mut obj = serde_json::Map::new();
        obj.insert("device_name".into(), json!("/dev/sdb"));
        let objects = ArrayValue::Objects(vec![obj]);
        assert_eq!(objects.to_json(), json!([{ "device_name": "/dev/sdb" }]));

        // Deep copy preserves the concrete shape.
        let copy = lists.clone();
        assert_eq!(copy, lists);
    }

    #[test]
    fn test_array_value_untagged_decode() {
        let v: ArrayValue = serde_json::from_value(json!(["x", "y"])).unwrap();
        assert!(matches!(v, ArrayValue::Strings(_)));
        let v: ArrayValue = serde_json::from_value(json!([["x"], ["y"]])).unwrap();
        assert!(matches!(v, ArrayValue::Lists(_)));
        let v: ArrayValue = serde_json::from_value(json!([{ "iops": "100" }])).unwrap();
        assert!(matches!(v, ArrayValue::Objects(_)));
        let v: ArrayValue = serde_json::from_value(json!({ "env": "prod" })).unwrap();
        assert!(matches!(v, ArrayValue::Object(_)));
    }
}
