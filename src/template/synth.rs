//! Shared machinery for the component synthesizers.
//!
//! Every synthesizer follows the same skeleton: look up the sub-record,
//! merge the `common` sibling's settings underneath its own, walk the merged
//! entries dispatching on the kind's per-key type, check required keys,
//! process arrays, and resolve any referenced resources. The helpers here
//! are that skeleton's vocabulary.

use crate::constants::COMMON_ID;
use crate::core::error::ForgeError;
use crate::settings::{merge_settings, parse_setting, ArrayValue};
use crate::source::{command_from_lines, SourceTree};
use crate::template::{Component, RawTemplate, TemplateSection};
use crate::Result;
use serde_json::{json, Value};
use std::collections::HashMap;

/// The settings object under construction for one emitted component.
pub type SettingsMap = serde_json::Map<String, Value>;

/// Parses an integer-typed setting, failing with `invalid-int` context.
pub fn parse_int(key: &str, value: &str) -> Result<i64> {
    value.parse::<i64>().map_err(|e| ForgeError::InvalidInt {
        key: key.to_string(),
        value: value.to_string(),
        source: e,
    })
}

/// Parses a boolean-typed setting: the literal `true`, case-insensitively;
/// anything else is `false`.
pub fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

/// Looks up a component and returns its section together with the
/// common-merged work slice.
pub fn work_slice<C: Component>(
    family: &HashMap<String, C>,
    id: &str,
) -> Result<(TemplateSection, Vec<String>)> {
    let section = family
        .get(id)
        .map(|c| c.section().clone())
        .ok_or_else(|| ForgeError::ComponentNotFound { id: id.to_string() })?;
    let work = match family.get(COMMON_ID) {
        Some(common) => merge_settings(&common.section().settings, &section.settings),
        None => section.settings.clone(),
    };
    Ok((section, work))
}

/// Loads a command file and joins its lines into a single command per the
/// `\` continuation rule. An empty result is `no-commands`.
pub fn single_command(tree: &SourceTree, value: &str, component: &str) -> Result<String> {
    let lines = tree.commands_from_file(value, component)?;
    let cmd = command_from_lines(&lines);
    if cmd.is_empty() {
        return Err(ForgeError::NoCommands {
            path: value.to_string(),
        });
    }
    Ok(cmd)
}

/// Loads a command file as a command array (boot and run commands). An
/// empty file is `no-commands`.
pub fn command_array(tree: &SourceTree, value: &str, component: &str) -> Result<Vec<String>> {
    let lines = tree.commands_from_file(value, component)?;
    if lines.is_empty() {
        return Err(ForgeError::NoCommands {
            path: value.to_string(),
        });
    }
    Ok(lines)
}

/// Copies an array value into the settings object under its own name,
/// preserving shape and content order. Empty arrays are skipped.
pub fn copy_array(settings: &mut SettingsMap, name: &str, value: &ArrayValue) {
    if value.is_empty() {
        return;
    }
    settings.insert(name.to_string(), value.to_json());
}

/// The `vboxmanage`/`vboxmanage_post` transform: each `key=value` entry
/// becomes `["modifyvm", "{{.Name}}", "--key", "value"]`; keys not already
/// prefixed with `--` are so prefixed.
pub fn vbox_manage_commands(r: &RawTemplate, value: &ArrayValue) -> Result<Value> {
    let entries = value.as_strings().ok_or_else(|| ForgeError::Other {
        message: "vboxmanage entries must be an array of key=value strings".to_string(),
    })?;
    let mut out: Vec<Vec<String>> = Vec::with_capacity(entries.len());
    for entry in entries {
        let (key, val) = parse_setting(entry);
        let key = if key.starts_with("--") {
            key
        } else {
            format!("--{key}")
        };
        out.push(vec![
            "modifyvm".to_string(),
            "{{.Name}}".to_string(),
            key,
            r.replace_vars(&val),
        ]);
    }
    Ok(json!(out))
}

/// The `vmx_data`/`vmx_data_post` transform: `key=value` entries become a
/// `{key: value}` object with variable substitution applied to values.
pub fn vmx_data_object(r: &RawTemplate, value: &ArrayValue) -> Result<Value> {
    let entries = value.as_strings().ok_or_else(|| ForgeError::Other {
        message: "vmx_data entries must be an array of key=value strings".to_string(),
    })?;
    let mut out = SettingsMap::new();
    for entry in entries {
        let (key, val) = parse_setting(entry);
        out.insert(key, json!(r.replace_vars(&val)));
    }
    Ok(Value::Object(out))
}

/// Converts `ami_block_device_mappings` into its emitted form.
///
/// A sequence of objects passes through untouched. A sequence of
/// `key=value` string sequences converts to objects, typing `iops` and
/// `volume_size` as integers and `delete_on_termination`/`encrypted`/
/// `no_device` as booleans; everything else stays a string.
pub fn block_device_mappings(value: &ArrayValue) -> Result<Value> {
    let lists = match value {
        ArrayValue::Objects(_) => return Ok(value.to_json()),
        ArrayValue::Lists(lists) => lists,
        ArrayValue::Strings(_) | ArrayValue::Object(_) => {
            return Err(ForgeError::Other {
                message: "ami_block_device_mappings is not in a supported format".to_string(),
            })
        }
    };
    let mut out: Vec<Value> = Vec::with_capacity(lists.len());
    for mapping in lists {
        let mut obj = SettingsMap::new();
        for entry in mapping {
            let (key, val) = parse_setting(entry);
            match key.as_str() {
                "iops" | "volume_size" => {
                    let i = parse_int(&format!("ami_block_device_mappings.{key}"), &val)?;
                    obj.insert(key, json!(i));
                }
                "delete_on_termination" | "encrypted" | "no_device" => {
                    obj.insert(key, json!(parse_bool(&val)));
                }
                _ => {
                    obj.insert(key, json!(val));
                }
            }
        }
        out.push(Value::Object(obj));
    }
    Ok(json!(out))
}

/// Converts `disk_additional_size` entries into integers.
pub fn disk_additional_sizes(value: &ArrayValue) -> Result<Value> {
    let entries = value.as_strings().ok_or_else(|| ForgeError::Other {
        message: "disk_additional_size must be an array of integer strings".to_string(),
    })?;
    let mut out: Vec<i64> = Vec::with_capacity(entries.len());
    for entry in entries {
        out.push(parse_int("disk_additional_size", entry)?);
    }
    Ok(json!(out))
}

/// Ensures `http_directory` is set (assuming `http` when absent), resolves
/// it as a directory, schedules it for copy, and rewrites the emitted value
/// to the output-tree form. The http directory is not nested under the
/// component in the output tree.
pub fn set_http(r: &mut RawTemplate, component: &str, settings: &mut SettingsMap) -> Result<()> {
    let value = match settings.get("http_directory") {
        Some(Value::String(s)) => s.clone(),
        _ => crate::constants::DEFAULT_HTTP_DIR.to_string(),
    };
    let tree = r.source_tree();
    match tree.find_source(&value, component, true)? {
        crate::source::Resolved::Disk(src) => {
            r.insert_dir(tree.build_out_path("", &value), src)?;
        }
        crate::source::Resolved::Example(_) => {}
    }
    let emitted = tree.build_template_resource_path("", &value, false);
    settings.insert("http_directory".to_string(), json!(emitted));
    tracing::debug!(build = %r.build_name, http = %value, "http directory scheduled");
    Ok(())
}
