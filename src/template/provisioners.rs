//! Provisioner synthesizers
//!
//! Same skeleton as the builders: merge the `common` section underneath,
//! walk the merged settings typing each key, validate required keys, and
//! process arrays. Provisioners are where most file references live -
//! scripts, playbooks, manifests, cookbooks - so these synthesizers lean on
//! the source resolver heavily, scheduling everything they reference for
//! copy into the output tree.
//!
//! `execute_command`-style keys follow the command-file rule: a value ending
//! in `.command` is replaced by the contents of that file, joined into a
//! single command.

use crate::core::error::ForgeError;
use crate::settings::{parse_setting, ArrayValue};
use crate::source::is_command_filename;
use crate::template::synth::{copy_array, parse_bool, single_command, work_slice, SettingsMap};
use crate::template::{component_kind, RawTemplate};
use crate::Result;
use serde_json::{json, Value};
use std::fmt;

/// A Packer provisioner kind boxforge can synthesize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisionerKind {
    /// `ansible-local`
    AnsibleLocal,
    /// `chef-solo`
    ChefSolo,
    /// `file`
    File,
    /// `puppet-masterless`
    PuppetMasterless,
    /// `puppet-server`
    PuppetServer,
    /// `salt-masterless`
    SaltMasterless,
    /// `shell`
    Shell,
}

impl ProvisionerKind {
    /// Parses a canonical kind string, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ansible-local" => Some(Self::AnsibleLocal),
            "chef-solo" => Some(Self::ChefSolo),
            "file" => Some(Self::File),
            "puppet-masterless" => Some(Self::PuppetMasterless),
            "puppet-server" => Some(Self::PuppetServer),
            "salt-masterless" => Some(Self::SaltMasterless),
            "shell" => Some(Self::Shell),
            _ => None,
        }
    }

    /// The kind's canonical string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AnsibleLocal => "ansible-local",
            Self::ChefSolo => "chef-solo",
            Self::File => "file",
            Self::PuppetMasterless => "puppet-masterless",
            Self::PuppetServer => "puppet-server",
            Self::SaltMasterless => "salt-masterless",
            Self::Shell => "shell",
        }
    }
}

impl fmt::Display for ProvisionerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates the plan's provisioner objects in emission-ID order.
pub fn create_provisioners(r: &mut RawTemplate) -> Result<Vec<Value>> {
    let ids = r.build.provisioner_ids.clone();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    tracing::info!(build = %r.build_name, count = ids.len(), "create provisioners");
    let mut out = Vec::with_capacity(ids.len());
    for id in &ids {
        let kind_str = match r.build.provisioners.get(id) {
            Some(p) => component_kind(&p.section, id).to_string(),
            None => return Err(ForgeError::ComponentNotFound { id: id.clone() }),
        };
        let kind = match ProvisionerKind::parse(&kind_str) {
            Some(kind) => kind,
            None => {
                return Err(ForgeError::UnsupportedKind { kind: kind_str }
                    .for_component("provisioner", id.clone()))
            }
        };
        tracing::debug!(build = %r.build_name, id = %id, kind = %kind, "create provisioner");
        let settings = match kind {
            ProvisionerKind::AnsibleLocal => create_ansible_local(r, id),
            ProvisionerKind::ChefSolo => create_chef_solo(r, id),
            ProvisionerKind::File => create_file(r, id),
            ProvisionerKind::PuppetMasterless => create_puppet_masterless(r, id),
            ProvisionerKind::PuppetServer => create_puppet_server(r, id),
            ProvisionerKind::SaltMasterless => create_salt_masterless(r, id),
            ProvisionerKind::Shell => create_shell(r, id),
        }
        .map_err(|e| e.for_component(kind.as_str(), id.clone()))?;
        out.push(Value::Object(settings));
    }
    tracing::info!(build = %r.build_name, "provisioners created");
    Ok(out)
}

/// Handles a command-style setting under the command-file rule.
fn command_setting(
    r: &RawTemplate,
    settings: &mut SettingsMap,
    component: &str,
    key: &str,
    value: &str,
) -> Result<()> {
    if !is_command_filename(value) {
        settings.insert(key.to_string(), json!(value));
        return Ok(());
    }
    let tree = r.source_tree();
    let cmd = single_command(&tree, value, component).map_err(|e| e.for_setting(key, value))?;
    settings.insert(key.to_string(), json!(cmd));
    Ok(())
}

/// Resolves every entry of a directory-list array, scheduling each for copy
/// and emitting the rewritten list.
fn dir_list(r: &mut RawTemplate, component: &str, name: &str, val: &ArrayValue) -> Result<Value> {
    let entries = val.as_strings().ok_or_else(|| ForgeError::Other {
        message: format!("{name} must be an array of paths"),
    })?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let emitted = r
            .schedule_dir(component, entry, component)
            .map_err(|e| e.for_setting(name, entry))?;
        out.push(emitted);
    }
    Ok(json!(out))
}

/// Resolves every entry of a file-list array, scheduling each for copy and
/// emitting the rewritten list.
fn file_list(r: &mut RawTemplate, component: &str, name: &str, val: &ArrayValue) -> Result<Value> {
    let entries = val.as_strings().ok_or_else(|| ForgeError::Other {
        message: format!("{name} must be an array of paths"),
    })?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let emitted = r
            .schedule_file(component, entry)
            .map_err(|e| e.for_setting(name, entry))?;
        out.push(emitted);
    }
    Ok(json!(out))
}

// Required configuration options:
//   playbook_file
// Optional configuration options:
//   command, staging_directory, inventory_file, playbook_dir, group_vars,
//   host_vars, and the extra_arguments/inventory_groups/playbook_paths/
//   role_paths arrays. All path-valued settings resolve through the source
//   tree and are scheduled for copy.
fn create_ansible_local(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.provisioners, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(ProvisionerKind::AnsibleLocal.as_str()),
    );
    let kind = ProvisionerKind::AnsibleLocal.as_str();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "command" | "staging_directory" => {
                settings.insert(k, json!(v));
            }
            "playbook_file" | "inventory_file" => {
                let emitted = r.schedule_file(kind, &v).map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            "group_vars" | "host_vars" | "playbook_dir" => {
                let emitted = r
                    .schedule_dir(kind, &v, kind)
                    .map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            _ => {}
        }
    }
    if !settings.contains_key("playbook_file") {
        return Err(ForgeError::RequiredSetting {
            key: "playbook_file".to_string(),
        });
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "extra_arguments" | "inventory_groups" | "only" | "except" => {
                copy_array(&mut settings, name, val)
            }
            "playbook_paths" | "role_paths" => {
                let emitted = dir_list(r, kind, name, val)?;
                settings.insert(name.clone(), emitted);
            }
            _ => {}
        }
    }
    Ok(settings)
}

// Optional configuration options:
//   chef_environment, config_template (resolved), data_bags_path,
//   encrypted_data_bag_secret_path, environments_path, execute_command,
//   install_command, prevent_sudo (bool), roles_path, skip_install (bool),
//   staging_directory, version, and the cookbook_paths/
//   remote_cookbook_paths/run_list/json arrays. No settings are required.
fn create_chef_solo(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.provisioners, id)?;
    let mut settings = SettingsMap::new();
    settings.insert("type".to_string(), json!(ProvisionerKind::ChefSolo.as_str()));
    let kind = ProvisionerKind::ChefSolo.as_str();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "chef_environment" | "encrypted_data_bag_secret_path" | "staging_directory"
            | "version" => {
                settings.insert(k, json!(v));
            }
            "prevent_sudo" | "skip_install" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "execute_command" | "install_command" => {
                command_setting(r, &mut settings, kind, &k, &v)?;
            }
            "config_template" => {
                let emitted = r.schedule_file(kind, &v).map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            "data_bags_path" | "environments_path" | "roles_path" => {
                let emitted = r
                    .schedule_dir(kind, &v, kind)
                    .map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            _ => {}
        }
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "cookbook_paths" => {
                let emitted = dir_list(r, kind, name, val)?;
                settings.insert(name.clone(), emitted);
            }
            "remote_cookbook_paths" | "run_list" | "only" | "except" => {
                copy_array(&mut settings, name, val)
            }
            "json" => copy_array(&mut settings, name, val),
            _ => {}
        }
    }
    Ok(settings)
}

// Required configuration options:
//   source (resolved through the source tree), destination
fn create_file(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.provisioners, id)?;
    let mut settings = SettingsMap::new();
    settings.insert("type".to_string(), json!(ProvisionerKind::File.as_str()));
    let kind = ProvisionerKind::File.as_str();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "destination" => {
                settings.insert(k, json!(v));
            }
            "source" => {
                let emitted = r.schedule_file(kind, &v).map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            _ => {}
        }
    }
    for key in ["source", "destination"] {
        if !settings.contains_key(key) {
            return Err(ForgeError::RequiredSetting {
                key: key.to_string(),
            });
        }
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "only" | "except" => copy_array(&mut settings, name, val),
            _ => {}
        }
    }
    Ok(settings)
}

// Required configuration options:
//   manifest_file (resolved through the source tree)
// Optional configuration options:
//   execute_command, hiera_config_path (resolved), ignore_exit_codes
//   (bool), manifest_dir (resolved), prevent_sudo (bool),
//   staging_directory, working_directory, and the extra_arguments/facter/
//   module_paths arrays.
fn create_puppet_masterless(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.provisioners, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(ProvisionerKind::PuppetMasterless.as_str()),
    );
    let kind = ProvisionerKind::PuppetMasterless.as_str();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "staging_directory" | "working_directory" => {
                settings.insert(k, json!(v));
            }
            "ignore_exit_codes" | "prevent_sudo" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "execute_command" => {
                command_setting(r, &mut settings, kind, &k, &v)?;
            }
            "hiera_config_path" | "manifest_file" => {
                let emitted = r.schedule_file(kind, &v).map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            "manifest_dir" => {
                let emitted = r
                    .schedule_dir(kind, &v, kind)
                    .map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            _ => {}
        }
    }
    if !settings.contains_key("manifest_file") {
        return Err(ForgeError::RequiredSetting {
            key: "manifest_file".to_string(),
        });
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "extra_arguments" | "only" | "except" => copy_array(&mut settings, name, val),
            "facter" => copy_array(&mut settings, name, val),
            "module_paths" => {
                let emitted = dir_list(r, kind, name, val)?;
                settings.insert(name.clone(), emitted);
            }
            _ => {}
        }
    }
    Ok(settings)
}

// Optional configuration options:
//   client_cert_path, client_private_key_path, ignore_exit_codes (bool),
//   options, prevent_sudo (bool), puppet_node, puppet_server,
//   staging_directory, and the facter table. No settings are required.
fn create_puppet_server(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.provisioners, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(ProvisionerKind::PuppetServer.as_str()),
    );
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "client_cert_path" | "client_private_key_path" | "options" | "puppet_node"
            | "puppet_server" | "staging_directory" => {
                settings.insert(k, json!(v));
            }
            "ignore_exit_codes" | "prevent_sudo" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            _ => {}
        }
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "facter" | "only" | "except" => copy_array(&mut settings, name, val),
            _ => {}
        }
    }
    Ok(settings)
}

// Required configuration options:
//   local_state_tree (resolved through the source tree)
// Optional configuration options:
//   bootstrap_args, disable_sudo (bool), local_pillar_roots (resolved),
//   minion_config (resolved), remote_pillar_roots, remote_state_tree,
//   skip_bootstrap (bool), temp_config_dir
fn create_salt_masterless(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.provisioners, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(ProvisionerKind::SaltMasterless.as_str()),
    );
    let kind = ProvisionerKind::SaltMasterless.as_str();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "bootstrap_args" | "remote_pillar_roots" | "remote_state_tree"
            | "temp_config_dir" => {
                settings.insert(k, json!(v));
            }
            "disable_sudo" | "skip_bootstrap" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "local_state_tree" | "local_pillar_roots" => {
                let emitted = r
                    .schedule_dir(kind, &v, kind)
                    .map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            "minion_config" => {
                let emitted = r.schedule_file(kind, &v).map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            _ => {}
        }
    }
    if !settings.contains_key("local_state_tree") {
        return Err(ForgeError::RequiredSetting {
            key: "local_state_tree".to_string(),
        });
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "only" | "except" => copy_array(&mut settings, name, val),
            _ => {}
        }
    }
    Ok(settings)
}

// Required configuration options:
//   one of inline, script, or scripts
// Optional configuration options:
//   binary (bool), execute_command, inline_shebang, remote_path,
//   skip_clean (bool), start_retry_timeout, environment_vars. The script
//   setting and every scripts entry resolve through the source tree and
//   are scheduled for copy.
fn create_shell(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.provisioners, id)?;
    let mut settings = SettingsMap::new();
    settings.insert("type".to_string(), json!(ProvisionerKind::Shell.as_str()));
    let kind = ProvisionerKind::Shell.as_str();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "inline_shebang" | "remote_path" | "start_retry_timeout" => {
                settings.insert(k, json!(v));
            }
            "binary" | "skip_clean" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "execute_command" => {
                command_setting(r, &mut settings, kind, &k, &v)?;
            }
            "script" => {
                let emitted = r.schedule_file(kind, &v).map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            _ => {}
        }
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "inline" | "environment_vars" | "only" | "except" => {
                copy_array(&mut settings, name, val)
            }
            "scripts" => {
                let emitted = file_list(r, kind, name, val)?;
                settings.insert(name.clone(), emitted);
            }
            _ => {}
        }
    }
    if !settings.contains_key("inline")
        && !settings.contains_key("script")
        && !settings.contains_key("scripts")
    {
        return Err(ForgeError::RequiredSetting {
            key: "inline, script, or scripts".to_string(),
        });
    }
    Ok(settings)
}
