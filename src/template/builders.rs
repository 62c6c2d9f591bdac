//! Builder synthesizers
//!
//! One routine per Packer builder kind. Each synthesizer merges the
//! `common` section's settings underneath the builder's own, walks the
//! merged entries typing each key per the kind's schema, validates the
//! kind's required keys, processes its arrays, and - for ISO-consuming
//! builders - resolves the `iso_url`/`iso_checksum`/`iso_checksum_type`
//! triple, invoking ISO discovery when the configuration does not supply
//! it.
//!
//! Settings that are not part of a kind's schema are ignored; this is what
//! lets a `common` section carry settings shared by several builder kinds
//! without every kind understanding every key.
//!
//! Builders that take a communicator process it first: the chosen prefix
//! (`ssh` or `winrm`) gates which credential and transport keys are
//! consumed in the main walk and which `*_username`/`*_password` variant is
//! required.

use crate::core::error::ForgeError;
use crate::settings::parse_setting;
use crate::source::is_command_filename;
use crate::template::synth::{
    block_device_mappings, command_array, copy_array, disk_additional_sizes, parse_bool,
    parse_int, set_http, single_command, vbox_manage_commands, vmx_data_object, work_slice,
    SettingsMap,
};
use crate::template::{component_kind, RawTemplate};
use crate::Result;
use serde_json::{json, Value};
use std::fmt;

/// A Packer builder kind boxforge can synthesize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuilderKind {
    /// `amazon-chroot`
    AmazonChroot,
    /// `amazon-ebs`
    AmazonEbs,
    /// `amazon-instance`
    AmazonInstance,
    /// `digitalocean`
    DigitalOcean,
    /// `docker`
    Docker,
    /// `googlecompute`
    GoogleCompute,
    /// `null`
    Null,
    /// `openstack`
    OpenStack,
    /// `parallels-iso`
    ParallelsIso,
    /// `parallels-pvm`
    ParallelsPvm,
    /// `qemu`
    Qemu,
    /// `virtualbox-iso`
    VirtualBoxIso,
    /// `virtualbox-ovf`
    VirtualBoxOvf,
    /// `vmware-iso`
    VmWareIso,
    /// `vmware-vmx`
    VmWareVmx,
}

impl BuilderKind {
    /// Parses a canonical kind string, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "amazon-chroot" => Some(Self::AmazonChroot),
            "amazon-ebs" => Some(Self::AmazonEbs),
            "amazon-instance" => Some(Self::AmazonInstance),
            "digitalocean" => Some(Self::DigitalOcean),
            "docker" => Some(Self::Docker),
            "googlecompute" => Some(Self::GoogleCompute),
            "null" => Some(Self::Null),
            "openstack" => Some(Self::OpenStack),
            "parallels-iso" => Some(Self::ParallelsIso),
            "parallels-pvm" => Some(Self::ParallelsPvm),
            "qemu" => Some(Self::Qemu),
            "virtualbox-iso" => Some(Self::VirtualBoxIso),
            "virtualbox-ovf" => Some(Self::VirtualBoxOvf),
            "vmware-iso" => Some(Self::VmWareIso),
            "vmware-vmx" => Some(Self::VmWareVmx),
            _ => None,
        }
    }

    /// The kind's canonical string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AmazonChroot => "amazon-chroot",
            Self::AmazonEbs => "amazon-ebs",
            Self::AmazonInstance => "amazon-instance",
            Self::DigitalOcean => "digitalocean",
            Self::Docker => "docker",
            Self::GoogleCompute => "googlecompute",
            Self::Null => "null",
            Self::OpenStack => "openstack",
            Self::ParallelsIso => "parallels-iso",
            Self::ParallelsPvm => "parallels-pvm",
            Self::Qemu => "qemu",
            Self::VirtualBoxIso => "virtualbox-iso",
            Self::VirtualBoxOvf => "virtualbox-ovf",
            Self::VmWareIso => "vmware-iso",
            Self::VmWareVmx => "vmware-vmx",
        }
    }
}

impl fmt::Display for BuilderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates the plan's builder objects in emission-ID order.
pub async fn create_builders(r: &mut RawTemplate) -> Result<Vec<Value>> {
    if r.build.builder_ids.is_empty() {
        return Err(ForgeError::Other {
            message: "no builders specified".to_string(),
        });
    }
    let ids = r.build.builder_ids.clone();
    tracing::info!(build = %r.build_name, count = ids.len(), "create builders");
    let mut out = Vec::with_capacity(ids.len());
    for id in &ids {
        let kind_str = match r.build.builders.get(id) {
            Some(b) => component_kind(&b.section, id).to_string(),
            None => {
                return Err(ForgeError::ComponentNotFound { id: id.clone() })
            }
        };
        let kind = match BuilderKind::parse(&kind_str) {
            Some(kind) => kind,
            None => {
                return Err(ForgeError::UnsupportedKind { kind: kind_str }
                    .for_component("builder", id.clone()))
            }
        };
        tracing::debug!(build = %r.build_name, id = %id, kind = %kind, "create builder");
        let settings = match kind {
            BuilderKind::AmazonChroot => create_amazon_chroot(r, id),
            BuilderKind::AmazonEbs => create_amazon_ebs(r, id),
            BuilderKind::AmazonInstance => create_amazon_instance(r, id),
            BuilderKind::DigitalOcean => create_digitalocean(r, id),
            BuilderKind::Docker => create_docker(r, id),
            BuilderKind::GoogleCompute => create_googlecompute(r, id),
            BuilderKind::Null => create_null(r, id),
            BuilderKind::OpenStack => create_openstack(r, id),
            BuilderKind::ParallelsIso => create_parallels_iso(r, id),
            BuilderKind::ParallelsPvm => create_parallels_pvm(r, id),
            BuilderKind::Qemu => create_qemu(r, id).await,
            BuilderKind::VirtualBoxIso => create_virtualbox_iso(r, id).await,
            BuilderKind::VirtualBoxOvf => create_virtualbox_ovf(r, id),
            BuilderKind::VmWareIso => create_vmware_iso(r, id).await,
            BuilderKind::VmWareVmx => create_vmware_vmx(r, id),
        }
        .map_err(|e| e.for_component(kind.as_str(), id.clone()))?;
        out.push(Value::Object(settings));
    }
    tracing::info!(build = %r.build_name, "builders created");
    Ok(out)
}

/// Processes the `communicator` setting and its prefixed keys.
///
/// Returns the chosen prefix: `"ssh"`, `"winrm"`, or empty when no
/// communicator (or `communicator = none`) is configured. The prefixed
/// transport keys are typed here; the main walk skips them when a
/// communicator was processed.
fn process_communicator(
    r: &RawTemplate,
    work: &[String],
    settings: &mut SettingsMap,
) -> Result<String> {
    let mut comm = String::new();
    for entry in work {
        let (key, value) = parse_setting(entry);
        if key == "communicator" {
            comm = r.replace_vars(&value);
        }
    }
    if comm.is_empty() {
        return Ok(String::new());
    }
    match comm.as_str() {
        "none" => {
            settings.insert("communicator".to_string(), json!("none"));
            Ok(String::new())
        }
        "ssh" => {
            settings.insert("communicator".to_string(), json!("ssh"));
            process_ssh(r, work, settings)?;
            Ok("ssh".to_string())
        }
        "winrm" => {
            settings.insert("communicator".to_string(), json!("winrm"));
            process_winrm(r, work, settings)?;
            Ok("winrm".to_string())
        }
        other => Err(ForgeError::InvalidOption {
            key: "communicator".to_string(),
            value: other.to_string(),
        }),
    }
}

fn process_ssh(r: &RawTemplate, work: &[String], settings: &mut SettingsMap) -> Result<()> {
    for entry in work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "ssh_bastion_host" | "ssh_bastion_password" | "ssh_bastion_private_key_file"
            | "ssh_bastion_username" | "ssh_host" | "ssh_password" | "ssh_private_key_file"
            | "ssh_timeout" | "ssh_username" => {
                settings.insert(k, json!(v));
            }
            "ssh_bastion_port" | "ssh_handshake_attempts" | "ssh_port" => {
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            "ssh_disable_agent" | "ssh_pty" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            _ => {}
        }
    }
    Ok(())
}

fn process_winrm(r: &RawTemplate, work: &[String], settings: &mut SettingsMap) -> Result<()> {
    for entry in work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "winrm_host" | "winrm_password" | "winrm_timeout" | "winrm_username" => {
                settings.insert(k, json!(v));
            }
            "winrm_port" => {
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            "winrm_insecure" | "winrm_use_ssl" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Fills the ISO triple: from discovery when the configuration supplied no
/// `iso_url`/`iso_urls`, otherwise validating that the checksum pair was
/// supplied alongside the URL.
async fn resolve_iso(
    r: &mut RawTemplate,
    kind: BuilderKind,
    work: &[String],
    settings: &mut SettingsMap,
    has_iso_url: bool,
    has_checksum: bool,
    has_checksum_type: bool,
) -> Result<()> {
    if !has_iso_url {
        r.iso_info(kind.as_str(), work).await?;
        let rel = r
            .release_iso
            .as_ref()
            .expect("release iso is set by iso_info")
            .release();
        settings.insert("iso_url".to_string(), json!(rel.image_url));
        settings.insert("iso_checksum".to_string(), json!(rel.checksum));
        settings.insert("iso_checksum_type".to_string(), json!(rel.checksum_type));
        return Ok(());
    }
    if !has_checksum {
        return Err(ForgeError::RequiredSetting {
            key: "iso_checksum".to_string(),
        });
    }
    if !has_checksum_type {
        return Err(ForgeError::RequiredSetting {
            key: "iso_checksum_type".to_string(),
        });
    }
    Ok(())
}

/// Loads a cached boot-command file into `boot_command` when the arrays
/// pass did not supply one.
fn apply_boot_command_file(
    r: &RawTemplate,
    settings: &mut SettingsMap,
    component: &str,
    boot_cmd_file: &str,
) -> Result<()> {
    if settings.contains_key("boot_command") || boot_cmd_file.is_empty() {
        return Ok(());
    }
    let tree = r.source_tree();
    let commands = command_array(&tree, boot_cmd_file, component)
        .map_err(|e| e.for_setting("boot_command", boot_cmd_file))?;
    settings.insert("boot_command".to_string(), json!(commands));
    Ok(())
}

/// Handles a command-style setting: a `.command` value loads the file and
/// joins it into a single command; anything else is the command itself.
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

fn required(settings: &SettingsMap, key: &str) -> Result<()> {
    if settings.contains_key(key) {
        return Ok(());
    }
    Err(ForgeError::RequiredSetting {
        key: key.to_string(),
    })
}

// Required configuration options:
//   access_key, ami_name, secret_key, source_ami
// Optional configuration options:
//   ami_description, ami_virtualization_type, command_wrapper, device_path,
//   enhanced_networking (bool), force_deregister (bool), mount_path,
//   root_volume_size (int), and the ami_groups/ami_product_codes/
//   ami_regions/ami_users/chroot_mounts/copy_files/mount_options/tags
//   arrays.
fn create_amazon_chroot(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert("type".to_string(), json!(BuilderKind::AmazonChroot.as_str()));
    process_communicator(r, &work, &mut settings)?;
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "access_key" | "ami_description" | "ami_name" | "ami_virtualization_type"
            | "command_wrapper" | "device_path" | "mount_path" | "secret_key" | "source_ami" => {
                settings.insert(k, json!(v));
            }
            "enhanced_networking" | "force_deregister" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "root_volume_size" => {
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            _ => {}
        }
    }
    for key in ["access_key", "ami_name", "secret_key", "source_ami"] {
        required(&settings, key)?;
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "ami_groups" | "ami_product_codes" | "ami_regions" | "ami_users" | "chroot_mounts"
            | "copy_files" | "mount_options" | "tags" => copy_array(&mut settings, name, val),
            _ => {}
        }
    }
    Ok(settings)
}

// Required configuration options:
//   access_key, ami_name, instance_type, region, secret_key, source_ami,
//   and the communicator's username variant (ssh_username by default).
// Optional configuration options include the block-device mapping arrays,
// spot settings, VPC settings, and a user_data_file resolved through the
// source tree.
fn create_amazon_ebs(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert("type".to_string(), json!(BuilderKind::AmazonEbs.as_str()));
    let prefix = process_communicator(r, &work, &mut settings)?;
    let has_communicator = !prefix.is_empty();
    let mut has_username =
        has_communicator && settings.contains_key(&format!("{prefix}_username"));
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "access_key" | "ami_description" | "ami_name" | "availability_zone"
            | "iam_instance_profile" | "instance_type" | "region" | "secret_key"
            | "security_group_id" | "source_ami" | "spot_price" | "spot_price_auto_product"
            | "subnet_id" | "temporary_key_pair_name" | "token" | "user_data" | "vpc_id" => {
                settings.insert(k, json!(v));
            }
            "associate_public_ip_address" | "ebs_optimized" | "enhanced_networking"
            | "force_deregister" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "ssh_keypair_name" | "ssh_private_key_file" => {
                if has_communicator && prefix != "ssh" {
                    continue;
                }
                settings.insert(k, json!(v));
            }
            "ssh_username" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
                has_username = true;
            }
            "windows_password_timeout" => {
                if has_communicator && prefix != "winrm" {
                    continue;
                }
                settings.insert(k, json!(v));
            }
            "user_data_file" => {
                let emitted = r
                    .schedule_file(BuilderKind::AmazonEbs.as_str(), &v)
                    .map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            _ => {}
        }
    }
    for key in [
        "access_key",
        "ami_name",
        "instance_type",
        "region",
        "secret_key",
        "source_ami",
    ] {
        required(&settings, key)?;
    }
    if !has_username {
        let prefix = if prefix.is_empty() { "ssh" } else { prefix.as_str() };
        return Err(ForgeError::RequiredSetting {
            key: format!("{prefix}_username"),
        });
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "ami_block_device_mappings" => {
                settings.insert(name.clone(), block_device_mappings(val)?);
            }
            "ami_groups" | "ami_product_codes" | "ami_regions" | "ami_users"
            | "launch_block_device_mappings" | "run_tags" | "security_group_ids" | "tags" => {
                copy_array(&mut settings, name, val);
            }
            _ => {}
        }
    }
    Ok(settings)
}

// Required configuration options:
//   access_key, account_id, ami_name, instance_type, region, s3_bucket,
//   secret_key, source_ami, x509_cert_path, x509_key_path, and the
//   communicator's username variant.
// The bundle_upload_command and bundle_vol_command settings follow the
// command-file rule and are joined into single commands.
fn create_amazon_instance(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(BuilderKind::AmazonInstance.as_str()),
    );
    let prefix = process_communicator(r, &work, &mut settings)?;
    let has_communicator = !prefix.is_empty();
    let mut has_username =
        has_communicator && settings.contains_key(&format!("{prefix}_username"));
    let kind = BuilderKind::AmazonInstance.as_str();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "access_key" | "account_id" | "ami_description" | "ami_name"
            | "ami_virtualization_type" | "availability_zone" | "bundle_destination"
            | "bundle_prefix" | "iam_instance_profile" | "instance_type" | "region"
            | "s3_bucket" | "secret_key" | "security_group_id" | "source_ami" | "spot_price"
            | "spot_price_auto_product" | "subnet_id" | "temporary_key_pair_name" | "user_data"
            | "vpc_id" | "x509_cert_path" | "x509_key_path" | "x509_upload_path" => {
                settings.insert(k, json!(v));
            }
            "associate_public_ip_address" | "ebs_optimized" | "enhanced_networking"
            | "force_deregister" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "bundle_upload_command" | "bundle_vol_command" => {
                command_setting(r, &mut settings, kind, &k, &v)?;
            }
            "ssh_keypair_name" => {
                if has_communicator && prefix != "ssh" {
                    continue;
                }
                settings.insert(k, json!(v));
            }
            "ssh_private_ip" => {
                if has_communicator && prefix != "ssh" {
                    continue;
                }
                settings.insert(k, json!(parse_bool(&v)));
            }
            "ssh_private_key_file" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
            }
            "ssh_username" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
                has_username = true;
            }
            "windows_password_timeout" => {
                if has_communicator && prefix != "winrm" {
                    continue;
                }
                settings.insert(k, json!(v));
            }
            "user_data_file" => {
                let emitted = r
                    .schedule_file(kind, &v)
                    .map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            _ => {}
        }
    }
    for key in [
        "access_key",
        "account_id",
        "ami_name",
        "instance_type",
        "region",
        "s3_bucket",
        "secret_key",
        "source_ami",
    ] {
        required(&settings, key)?;
    }
    if !has_username {
        let prefix = if prefix.is_empty() { "ssh" } else { prefix.as_str() };
        return Err(ForgeError::RequiredSetting {
            key: format!("{prefix}_username"),
        });
    }
    for key in ["x509_cert_path", "x509_key_path"] {
        required(&settings, key)?;
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "ami_block_device_mappings" => {
                settings.insert(name.clone(), block_device_mappings(val)?);
            }
            "ami_groups" | "ami_product_codes" | "ami_regions" | "ami_users"
            | "launch_block_device_mappings" | "run_tags" | "security_group_ids" | "tags" => {
                copy_array(&mut settings, name, val);
            }
            _ => {}
        }
    }
    Ok(settings)
}

// Required configuration options:
//   api_token, image, region, size
// Optional configuration options:
//   droplet_name, private_networking (bool), snapshot_name, state_timeout,
//   user_data
fn create_digitalocean(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (_, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert("type".to_string(), json!(BuilderKind::DigitalOcean.as_str()));
    process_communicator(r, &work, &mut settings)?;
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "api_token" | "droplet_name" | "image" | "region" | "size" | "snapshot_name"
            | "state_timeout" | "user_data" => {
                settings.insert(k, json!(v));
            }
            "private_networking" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            _ => {}
        }
    }
    for key in ["api_token", "image", "region", "size"] {
        required(&settings, key)?;
    }
    Ok(settings)
}

// Required configuration options:
//   commit (bool), discard (bool), export_path, image
// Optional configuration options:
//   login (bool), login_email, login_username, login_password,
//   login_server, pull (bool), the run_command array (or a `.command`
//   file), and the volumes table.
fn create_docker(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert("type".to_string(), json!(BuilderKind::Docker.as_str()));
    process_communicator(r, &work, &mut settings)?;
    let mut run_command_file = String::new();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "export_path" | "image" | "login_email" | "login_password" | "login_server"
            | "login_username" => {
                settings.insert(k, json!(v));
            }
            "commit" | "discard" | "login" | "pull" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "run_command" => {
                if is_command_filename(&v) {
                    run_command_file = v;
                }
            }
            _ => {}
        }
    }
    for key in ["commit", "discard", "export_path", "image"] {
        required(&settings, key)?;
    }
    let mut has_run_command = false;
    for (name, val) in &section.arrays {
        match name.as_str() {
            "run_command" => {
                if !val.is_empty() {
                    copy_array(&mut settings, name, val);
                    has_run_command = true;
                }
            }
            "volumes" => copy_array(&mut settings, name, val),
            _ => {}
        }
    }
    if !has_run_command && !run_command_file.is_empty() {
        let tree = r.source_tree();
        let commands = command_array(&tree, &run_command_file, BuilderKind::Docker.as_str())
            .map_err(|e| e.for_setting("run_command", &run_command_file))?;
        settings.insert("run_command".to_string(), json!(commands));
    }
    Ok(settings)
}

// Required configuration options:
//   project_id, source_image, zone
// Optional configuration options:
//   account_file, address, disk_size (int), image_name, image_description,
//   instance_name, machine_type, network, preemptible (bool),
//   state_timeout, use_internal_ip (bool), and the metadata/tags arrays.
fn create_googlecompute(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(BuilderKind::GoogleCompute.as_str()),
    );
    process_communicator(r, &work, &mut settings)?;
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "account_file" | "address" | "image_name" | "image_description" | "instance_name"
            | "machine_type" | "network" | "project_id" | "source_image" | "state_timeout"
            | "zone" => {
                settings.insert(k, json!(v));
            }
            "preemptible" | "use_internal_ip" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "disk_size" => {
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            _ => {}
        }
    }
    for key in ["project_id", "source_image", "zone"] {
        required(&settings, key)?;
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "metadata" | "tags" => copy_array(&mut settings, name, val),
            _ => {}
        }
    }
    Ok(settings)
}

// The null builder takes only communicator settings; a configuration
// without a communicator (or with `communicator = none`) is invalid.
fn create_null(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (_, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert("type".to_string(), json!(BuilderKind::Null.as_str()));
    let prefix = process_communicator(r, &work, &mut settings)?;
    if prefix.is_empty() {
        return Err(ForgeError::RequiredSetting {
            key: "communicator".to_string(),
        });
    }
    Ok(settings)
}

// Required configuration options:
//   flavor, image_name, source_image, and the communicator's username and
//   password variants (bare `username`/`password` without a communicator).
// Optional configuration options:
//   api_key, availability_zone, config_drive (bool), floating_ip,
//   floating_ip_pool, insecure (bool), metadata (bool), rackconnect_wait
//   (bool), region, ssh_interface, tenant_id, tenant_name, use_floating_ip
//   (bool), and the metadata/networks/security_groups arrays.
fn create_openstack(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert("type".to_string(), json!(BuilderKind::OpenStack.as_str()));
    let prefix = process_communicator(r, &work, &mut settings)?;
    let has_communicator = !prefix.is_empty();
    let mut has_username =
        has_communicator && settings.contains_key(&format!("{prefix}_username"));
    let mut has_password =
        has_communicator && settings.contains_key(&format!("{prefix}_password"));
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "api_key" | "availability_zone" | "flavor" | "floating_ip" | "floating_ip_pool"
            | "image_name" | "region" | "source_image" | "tenant_id" | "tenant_name" => {
                settings.insert(k, json!(v));
            }
            "config_drive" | "insecure" | "metadata" | "rackconnect_wait"
            | "use_floating_ip" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "ssh_interface" => {
                if has_communicator && prefix != "ssh" {
                    continue;
                }
                settings.insert(k, json!(v));
            }
            "password" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
                has_password = true;
            }
            "username" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
                has_username = true;
            }
            _ => {}
        }
    }
    for key in ["flavor", "image_name", "source_image"] {
        required(&settings, key)?;
    }
    if !has_password {
        let key = if prefix.is_empty() {
            "password".to_string()
        } else {
            format!("{prefix}_password")
        };
        return Err(ForgeError::RequiredSetting { key });
    }
    if !has_username {
        let key = if prefix.is_empty() {
            "username".to_string()
        } else {
            format!("{prefix}_username")
        };
        return Err(ForgeError::RequiredSetting { key });
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "metadata" | "networks" | "security_groups" => {
                copy_array(&mut settings, name, val)
            }
            _ => {}
        }
    }
    Ok(settings)
}

// Required configuration options:
//   iso_url (or iso_urls), iso_checksum (or iso_checksum_url),
//   iso_checksum_type, parallels_tools_flavor (unless the tools mode is
//   `disable`), and the communicator's username variant.
// Optional configuration options:
//   boot_command, boot_wait, disk_size (int), floppy_files, guest_os_type,
//   hard_drive_interface, host_interfaces, http_directory,
//   http_port_min/max (int), iso_target_path, output_directory,
//   parallels_tools_guest_path, parallels_tools_guest_mode
//   (disable|upload|detach), prlctl, prlctl_post, prlctl_version_file,
//   shutdown_command, shutdown_timeout, skip_compaction (bool), vm_name.
fn create_parallels_iso(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(BuilderKind::ParallelsIso.as_str()),
    );
    let kind = BuilderKind::ParallelsIso.as_str();
    let prefix = process_communicator(r, &work, &mut settings)?;
    let has_communicator = !prefix.is_empty();
    let mut has_username =
        has_communicator && settings.contains_key(&format!("{prefix}_username"));
    let mut has_checksum = false;
    let mut has_checksum_url = false;
    let mut has_checksum_type = false;
    let mut has_iso_url = false;
    let mut has_tools_flavor = false;
    let mut tools_disabled = false;
    let mut iso_url = String::new();
    let mut boot_cmd_file = String::new();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "boot_wait" | "guest_os_type" | "hard_drive_interface" | "http_directory"
            | "iso_target_path" | "output_directory" | "parallels_tools_guest_path"
            | "prlctl_version_file" | "shutdown_timeout" | "vm_name" => {
                settings.insert(k, json!(v));
            }
            "skip_compaction" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "disk_size" | "http_port_max" | "http_port_min" => {
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            "boot_command" => {
                if is_command_filename(&v) {
                    boot_cmd_file = v;
                }
            }
            "iso_checksum" => {
                settings.insert(k, json!(v));
                has_checksum = true;
            }
            "iso_checksum_type" => {
                settings.insert(k, json!(v));
                has_checksum_type = true;
            }
            "iso_checksum_url" => {
                settings.insert(k, json!(v));
                has_checksum_url = true;
            }
            "iso_url" => {
                iso_url = v;
                has_iso_url = true;
            }
            "parallels_tools_flavor" => {
                settings.insert(k, json!(v));
                has_tools_flavor = true;
            }
            "parallels_tools_guest_mode" => {
                match v.as_str() {
                    "disable" => tools_disabled = true,
                    "upload" | "detach" => {}
                    _ => {
                        return Err(ForgeError::InvalidOption { key: k, value: v });
                    }
                }
                settings.insert(k, json!(v));
            }
            "shutdown_command" => {
                command_setting(r, &mut settings, kind, &k, &v)?;
            }
            "ssh_username" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
                has_username = true;
            }
            _ => {}
        }
    }
    if !has_checksum && !has_checksum_url {
        return Err(ForgeError::RequiredSetting {
            key: "iso_checksum or iso_checksum_url".to_string(),
        });
    }
    if !has_checksum_type {
        return Err(ForgeError::RequiredSetting {
            key: "iso_checksum_type".to_string(),
        });
    }
    if !has_tools_flavor && !tools_disabled {
        return Err(ForgeError::RequiredSetting {
            key: "parallels_tools_flavor".to_string(),
        });
    }
    if !has_username {
        let prefix = if prefix.is_empty() { "ssh" } else { prefix.as_str() };
        return Err(ForgeError::RequiredSetting {
            key: format!("{prefix}_username"),
        });
    }
    let mut has_iso_urls = false;
    for (name, val) in &section.arrays {
        match name.as_str() {
            "boot_command" => copy_array(&mut settings, name, val),
            "floppy_files" | "host_interfaces" | "prlctl" | "prlctl_post" => {
                copy_array(&mut settings, name, val)
            }
            "iso_urls" => {
                // iso_urls takes precedence over a cached iso_url.
                if !val.is_empty() {
                    copy_array(&mut settings, name, val);
                    has_iso_urls = true;
                }
            }
            _ => {}
        }
    }
    apply_boot_command_file(r, &mut settings, kind, &boot_cmd_file)?;
    if !has_iso_urls && !has_iso_url {
        return Err(ForgeError::RequiredSetting {
            key: "iso_url".to_string(),
        });
    }
    if !has_iso_urls {
        settings.insert("iso_url".to_string(), json!(iso_url));
    }
    Ok(settings)
}

// Required configuration options:
//   source_path (resolved through the source tree),
//   parallels_tools_flavor (unless the tools mode is `disable`), and the
//   communicator's username variant.
// Optional configuration options:
//   boot_command, boot_wait, floppy_files, output_directory,
//   parallels_tools_guest_path, parallels_tools_mode
//   (disable|upload|detach), parallels_tools_path, prlctl, prlctl_post,
//   prlctl_version_file, reassign_mac (bool), shutdown_command,
//   shutdown_timeout, skip_compaction (bool), vm_name.
fn create_parallels_pvm(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(BuilderKind::ParallelsPvm.as_str()),
    );
    let kind = BuilderKind::ParallelsPvm.as_str();
    let prefix = process_communicator(r, &work, &mut settings)?;
    let has_communicator = !prefix.is_empty();
    let mut has_username =
        has_communicator && settings.contains_key(&format!("{prefix}_username"));
    let mut has_source_path = false;
    let mut has_tools_flavor = false;
    let mut tools_disabled = false;
    let mut boot_cmd_file = String::new();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "boot_wait" | "output_directory" | "parallels_tools_guest_path"
            | "parallels_tools_path" | "prlctl_version_file" | "shutdown_timeout"
            | "vm_name" => {
                settings.insert(k, json!(v));
            }
            "reassign_mac" | "skip_compaction" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "boot_command" => {
                if is_command_filename(&v) {
                    boot_cmd_file = v;
                }
            }
            "parallels_tools_flavor" => {
                settings.insert(k, json!(v));
                has_tools_flavor = true;
            }
            "parallels_tools_mode" => {
                match v.as_str() {
                    "disable" => tools_disabled = true,
                    "upload" | "detach" => {}
                    _ => {
                        return Err(ForgeError::InvalidOption { key: k, value: v });
                    }
                }
                settings.insert(k, json!(v));
            }
            "shutdown_command" => {
                command_setting(r, &mut settings, kind, &k, &v)?;
            }
            "source_path" => {
                let emitted = r.schedule_file(kind, &v).map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
                has_source_path = true;
            }
            "ssh_username" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
                has_username = true;
            }
            _ => {}
        }
    }
    if !has_source_path {
        return Err(ForgeError::RequiredSetting {
            key: "source_path".to_string(),
        });
    }
    if !has_tools_flavor && !tools_disabled {
        return Err(ForgeError::RequiredSetting {
            key: "parallels_tools_flavor".to_string(),
        });
    }
    if !has_username {
        let prefix = if prefix.is_empty() { "ssh" } else { prefix.as_str() };
        return Err(ForgeError::RequiredSetting {
            key: format!("{prefix}_username"),
        });
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "boot_command" => copy_array(&mut settings, name, val),
            "floppy_files" | "prlctl" | "prlctl_post" => copy_array(&mut settings, name, val),
            _ => {}
        }
    }
    apply_boot_command_file(r, &mut settings, kind, &boot_cmd_file)?;
    Ok(settings)
}

// Required configuration options:
//   the ISO triple (or discovery) and the communicator's username variant.
// Optional configuration options:
//   accelerator, boot_command, boot_wait, disk_cache, disk_compression
//   (bool), disk_discard, disk_image (bool), disk_interface, disk_size
//   (int), floppy_files, format, headless (bool), http_directory,
//   http_port_min/max (int), iso_target_path, iso_urls, net_device,
//   output_directory, qemuargs, qemu_binary, skip_compaction (bool).
async fn create_qemu(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert("type".to_string(), json!(BuilderKind::Qemu.as_str()));
    let prefix = process_communicator(r, &work, &mut settings)?;
    let has_communicator = !prefix.is_empty();
    let mut has_username =
        has_communicator && settings.contains_key(&format!("{prefix}_username"));
    let mut has_iso_url = false;
    let mut has_checksum = false;
    let mut has_checksum_type = false;
    let mut boot_cmd_file = String::new();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "accelerator" | "boot_wait" | "disk_cache" | "disk_discard" | "disk_interface"
            | "format" | "http_directory" | "iso_target_path" | "net_device"
            | "output_directory" | "qemu_binary" => {
                settings.insert(k, json!(v));
            }
            "disk_compression" | "disk_image" | "headless" | "skip_compaction" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "disk_size" | "http_port_max" | "http_port_min" => {
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            "boot_command" => {
                if is_command_filename(&v) {
                    boot_cmd_file = v;
                }
            }
            "iso_checksum" => {
                settings.insert(k, json!(v));
                has_checksum = true;
            }
            "iso_checksum_type" => {
                settings.insert(k, json!(v));
                has_checksum_type = true;
            }
            "iso_url" => {
                settings.insert(k, json!(v));
                has_iso_url = true;
            }
            "ssh_username" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
                has_username = true;
            }
            _ => {}
        }
    }
    if !has_username {
        let prefix = if prefix.is_empty() { "ssh" } else { prefix.as_str() };
        return Err(ForgeError::RequiredSetting {
            key: format!("{prefix}_username"),
        });
    }
    set_http(r, BuilderKind::Qemu.as_str(), &mut settings)?;
    for (name, val) in &section.arrays {
        match name.as_str() {
            "boot_command" => copy_array(&mut settings, name, val),
            "floppy_files" => copy_array(&mut settings, name, val),
            "iso_urls" => {
                if !has_iso_url && !val.is_empty() {
                    copy_array(&mut settings, name, val);
                    has_iso_url = true;
                }
            }
            "qemuargs" => copy_array(&mut settings, name, val),
            _ => {}
        }
    }
    apply_boot_command_file(r, &mut settings, BuilderKind::Qemu.as_str(), &boot_cmd_file)?;
    resolve_iso(
        r,
        BuilderKind::Qemu,
        &work,
        &mut settings,
        has_iso_url,
        has_checksum,
        has_checksum_type,
    )
    .await?;
    Ok(settings)
}

// Required configuration options:
//   the ISO triple (or discovery), plus the communicator's username and
//   password variants.
// Optional configuration options follow the virtualbox-iso schema:
//   boot_command, boot_wait, disk_size (int), export_opts, floppy_files,
//   format, guest_additions_mode/path/sha256/url, guest_os_type (generated
//   when empty), hard_drive_interface, headless (bool), http_directory,
//   http_port_min/max (int), iso_interface, iso_target_path, iso_urls,
//   output_directory, shutdown_command, shutdown_timeout,
//   ssh_host_port_min/max (int), ssh_skip_nat_mapping (bool), vboxmanage,
//   vboxmanage_post, virtualbox_version_file, vm_name.
async fn create_virtualbox_iso(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(BuilderKind::VirtualBoxIso.as_str()),
    );
    let kind = BuilderKind::VirtualBoxIso.as_str();
    let prefix = process_communicator(r, &work, &mut settings)?;
    let has_communicator = !prefix.is_empty();
    let mut has_username =
        has_communicator && settings.contains_key(&format!("{prefix}_username"));
    let mut has_password =
        has_communicator && settings.contains_key(&format!("{prefix}_password"));
    let mut has_iso_url = false;
    let mut has_checksum = false;
    let mut has_checksum_type = false;
    let mut boot_cmd_file = String::new();
    let mut guest_os_type = String::new();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "boot_wait" | "format" | "guest_additions_mode" | "guest_additions_path"
            | "guest_additions_sha256" | "guest_additions_url" | "hard_drive_interface"
            | "http_directory" | "iso_interface" | "iso_target_path" | "output_directory"
            | "shutdown_timeout" | "virtualbox_version_file" | "vm_name" => {
                settings.insert(k, json!(v));
            }
            "headless" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "ssh_skip_nat_mapping" => {
                if prefix == "winrm" {
                    continue;
                }
                settings.insert(k, json!(parse_bool(&v)));
            }
            "disk_size" | "http_port_max" | "http_port_min" => {
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            "ssh_host_port_max" | "ssh_host_port_min" => {
                if prefix == "winrm" {
                    continue;
                }
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            "boot_command" => {
                if is_command_filename(&v) {
                    boot_cmd_file = v;
                }
            }
            "guest_os_type" => {
                guest_os_type = v.clone();
                settings.insert(k, json!(v));
            }
            "iso_checksum" => {
                settings.insert(k, json!(v));
                has_checksum = true;
            }
            "iso_checksum_type" => {
                settings.insert(k, json!(v));
                has_checksum_type = true;
            }
            "iso_url" => {
                settings.insert(k, json!(v));
                has_iso_url = true;
            }
            "shutdown_command" => {
                command_setting(r, &mut settings, kind, &k, &v)?;
            }
            "ssh_password" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
                has_password = true;
            }
            "ssh_username" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
                has_username = true;
            }
            _ => {}
        }
    }
    if !has_username {
        let prefix = if prefix.is_empty() { "ssh" } else { prefix.as_str() };
        return Err(ForgeError::RequiredSetting {
            key: format!("{prefix}_username"),
        });
    }
    if !has_password {
        let prefix = if prefix.is_empty() { "ssh" } else { prefix.as_str() };
        return Err(ForgeError::RequiredSetting {
            key: format!("{prefix}_password"),
        });
    }
    set_http(r, kind, &mut settings)?;
    for (name, val) in &section.arrays {
        match name.as_str() {
            "boot_command" => copy_array(&mut settings, name, val),
            "export_opts" | "floppy_files" => copy_array(&mut settings, name, val),
            "iso_urls" => {
                if !has_iso_url && !val.is_empty() {
                    copy_array(&mut settings, name, val);
                    has_iso_url = true;
                }
            }
            "vboxmanage" | "vboxmanage_post" => {
                settings.insert(name.clone(), vbox_manage_commands(r, val)?);
            }
            _ => {}
        }
    }
    apply_boot_command_file(r, &mut settings, kind, &boot_cmd_file)?;
    resolve_iso(
        r,
        BuilderKind::VirtualBoxIso,
        &work,
        &mut settings,
        has_iso_url,
        has_checksum,
        has_checksum_type,
    )
    .await?;
    if guest_os_type.is_empty() {
        settings.insert("guest_os_type".to_string(), json!(r.os_type));
    }
    Ok(settings)
}

// Required configuration options:
//   source_path (resolved through the source tree) and the communicator's
//   username variant.
// Optional configuration options follow the virtualbox-ovf schema,
// including import_flags/import_opts and the vboxmanage arrays.
fn create_virtualbox_ovf(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(BuilderKind::VirtualBoxOvf.as_str()),
    );
    let kind = BuilderKind::VirtualBoxOvf.as_str();
    let prefix = process_communicator(r, &work, &mut settings)?;
    let has_communicator = !prefix.is_empty();
    let has_winrm = prefix == "winrm";
    let mut has_username =
        has_communicator && settings.contains_key(&format!("{prefix}_username"));
    let mut has_source_path = false;
    let mut boot_cmd_file = String::new();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "boot_wait" | "format" | "guest_additions_mode" | "guest_additions_path"
            | "guest_additions_sha256" | "guest_additions_url" | "http_directory"
            | "import_opts" | "output_directory" | "shutdown_timeout"
            | "virtualbox_version_file" | "vm_name" => {
                settings.insert(k, json!(v));
            }
            "headless" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "ssh_skip_nat_mapping" => {
                if has_winrm {
                    continue;
                }
                settings.insert(k, json!(parse_bool(&v)));
            }
            "http_port_max" | "http_port_min" => {
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            "ssh_host_port_max" | "ssh_host_port_min" => {
                if has_winrm {
                    continue;
                }
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            "boot_command" => {
                if is_command_filename(&v) {
                    boot_cmd_file = v;
                }
            }
            "shutdown_command" => {
                command_setting(r, &mut settings, kind, &k, &v)?;
            }
            "source_path" => {
                let emitted = r.schedule_file(kind, &v).map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
                has_source_path = true;
            }
            "ssh_username" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
                has_username = true;
            }
            _ => {}
        }
    }
    if !has_username {
        let prefix = if prefix.is_empty() { "ssh" } else { prefix.as_str() };
        return Err(ForgeError::RequiredSetting {
            key: format!("{prefix}_username"),
        });
    }
    if !has_source_path {
        return Err(ForgeError::RequiredSetting {
            key: "source_path".to_string(),
        });
    }
    set_http(r, kind, &mut settings)?;
    for (name, val) in &section.arrays {
        match name.as_str() {
            "boot_command" => copy_array(&mut settings, name, val),
            "export_opts" | "floppy_files" | "import_flags" => {
                copy_array(&mut settings, name, val)
            }
            "vboxmanage" | "vboxmanage_post" => {
                settings.insert(name.clone(), vbox_manage_commands(r, val)?);
            }
            _ => {}
        }
    }
    apply_boot_command_file(r, &mut settings, kind, &boot_cmd_file)?;
    Ok(settings)
}

// Required configuration options:
//   the ISO triple (or discovery) and the communicator's username variant.
// Optional configuration options follow the vmware-iso schema: the remote
// builder settings, disk_additional_size (ints), vmx_data/vmx_data_post
// tables, VNC port bounds, and the usual boot/shutdown command handling.
async fn create_vmware_iso(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert("type".to_string(), json!(BuilderKind::VmWareIso.as_str()));
    let kind = BuilderKind::VmWareIso.as_str();
    let prefix = process_communicator(r, &work, &mut settings)?;
    let has_communicator = !prefix.is_empty();
    let mut has_username =
        has_communicator && settings.contains_key(&format!("{prefix}_username"));
    let mut has_iso_url = false;
    let mut has_checksum = false;
    let mut has_checksum_type = false;
    let mut boot_cmd_file = String::new();
    let mut guest_os_type = String::new();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "boot_wait" | "disk_type_id" | "fusion_app_path" | "http_directory"
            | "iso_target_path" | "output_directory" | "remote_cache_datastore"
            | "remote_cache_directory" | "remote_datastore" | "remote_host"
            | "remote_password" | "remote_private_key_file" | "remote_type"
            | "remote_username" | "shutdown_timeout" | "tools_upload_flavor"
            | "tools_upload_path" | "version" | "vm_name" | "vmdk_name"
            | "vmx_template_path" => {
                settings.insert(k, json!(v));
            }
            "headless" | "skip_compaction" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "disk_size" | "http_port_max" | "http_port_min" | "vnc_port_max" | "vnc_port_min" => {
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            "boot_command" => {
                if is_command_filename(&v) {
                    boot_cmd_file = v;
                }
            }
            "guest_os_type" => {
                guest_os_type = v;
            }
            "iso_checksum" => {
                settings.insert(k, json!(v));
                has_checksum = true;
            }
            "iso_checksum_type" => {
                settings.insert(k, json!(v));
                has_checksum_type = true;
            }
            "iso_url" => {
                settings.insert(k, json!(v));
                has_iso_url = true;
            }
            "shutdown_command" => {
                command_setting(r, &mut settings, kind, &k, &v)?;
            }
            "ssh_username" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
                has_username = true;
            }
            _ => {}
        }
    }
    if !has_username {
        let prefix = if prefix.is_empty() { "ssh" } else { prefix.as_str() };
        return Err(ForgeError::RequiredSetting {
            key: format!("{prefix}_username"),
        });
    }
    set_http(r, kind, &mut settings)?;
    for (name, val) in &section.arrays {
        match name.as_str() {
            "boot_command" => copy_array(&mut settings, name, val),
            "disk_additional_size" => {
                settings.insert(name.clone(), disk_additional_sizes(val)?);
            }
            "floppy_files" => copy_array(&mut settings, name, val),
            "iso_urls" => {
                if !has_iso_url && !val.is_empty() {
                    copy_array(&mut settings, name, val);
                    has_iso_url = true;
                }
            }
            "vmx_data" | "vmx_data_post" => {
                settings.insert(name.clone(), vmx_data_object(r, val)?);
            }
            _ => {}
        }
    }
    apply_boot_command_file(r, &mut settings, kind, &boot_cmd_file)?;
    resolve_iso(
        r,
        BuilderKind::VmWareIso,
        &work,
        &mut settings,
        has_iso_url,
        has_checksum,
        has_checksum_type,
    )
    .await?;
    if guest_os_type.is_empty() {
        guest_os_type = r.os_type.clone();
    }
    settings.insert("guest_os_type".to_string(), json!(guest_os_type));
    Ok(settings)
}

// Required configuration options:
//   source_path (resolved through the source tree) and the communicator's
//   username variant.
// Optional configuration options follow the vmware-vmx schema.
fn create_vmware_vmx(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.builders, id)?;
    let mut settings = SettingsMap::new();
    settings.insert("type".to_string(), json!(BuilderKind::VmWareVmx.as_str()));
    let kind = BuilderKind::VmWareVmx.as_str();
    let prefix = process_communicator(r, &work, &mut settings)?;
    let has_communicator = !prefix.is_empty();
    let mut has_username =
        has_communicator && settings.contains_key(&format!("{prefix}_username"));
    let mut has_source_path = false;
    let mut boot_cmd_file = String::new();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "boot_wait" | "fusion_app_path" | "http_directory" | "output_directory"
            | "shutdown_timeout" | "vm_name" => {
                settings.insert(k, json!(v));
            }
            "headless" | "skip_compaction" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "http_port_max" | "http_port_min" | "vnc_port_max" | "vnc_port_min" => {
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            "boot_command" => {
                if is_command_filename(&v) {
                    boot_cmd_file = v;
                }
            }
            "shutdown_command" => {
                command_setting(r, &mut settings, kind, &k, &v)?;
            }
            "source_path" => {
                let emitted = r.schedule_file(kind, &v).map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
                has_source_path = true;
            }
            "ssh_username" => {
                if has_communicator {
                    continue;
                }
                settings.insert(k, json!(v));
                has_username = true;
            }
            _ => {}
        }
    }
    if !has_username {
        let prefix = if prefix.is_empty() { "ssh" } else { prefix.as_str() };
        return Err(ForgeError::RequiredSetting {
            key: format!("{prefix}_username"),
        });
    }
    if !has_source_path {
        return Err(ForgeError::RequiredSetting {
            key: "source_path".to_string(),
        });
    }
    set_http(r, kind, &mut settings)?;
    for (name, val) in &section.arrays {
        match name.as_str() {
            "boot_command" => copy_array(&mut settings, name, val),
            "floppy_files" => copy_array(&mut settings, name, val),
            "vmx_data" | "vmx_data_post" => {
                settings.insert(name.clone(), vmx_data_object(r, val)?);
            }
            _ => {}
        }
    }
    apply_boot_command_file(r, &mut settings, kind, &boot_cmd_file)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ArrayValue;
    use crate::template::{Build, BuilderC, TemplateSection};
    use std::collections::HashMap;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn builder(settings: &[&str], arrays: &[(&str, ArrayValue)]) -> BuilderC {
        BuilderC {
            section: TemplateSection {
                typ: String::new(),
                settings: strings(settings),
                arrays: arrays
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            },
        }
    }

    fn template(ids: &[&str], builders: HashMap<String, BuilderC>) -> RawTemplate {
        let mut r = RawTemplate {
            distro: "ubuntu".to_string(),
            release: "14.04".to_string(),
            arch: "amd64".to_string(),
            image: "server".to_string(),
            build_name: "test-build".to_string(),
            delim: ":".to_string(),
            example: true,
            ..RawTemplate::default()
        };
        r.build = Build {
            builder_ids: strings(ids),
            builders,
            ..Build::default()
        };
        r.merge_variables();
        r
    }

    fn vbox_builders(common_settings: &[&str]) -> HashMap<String, BuilderC> {
        let mut m = HashMap::new();
        m.insert("common".to_string(), builder(common_settings, &[]));
        m.insert(
            "virtualbox-iso".to_string(),
            builder(
                &[],
                &[(
                    "vboxmanage",
                    ArrayValue::Strings(vec!["memory=4096".to_string()]),
                )],
            ),
        );
        m
    }

    #[tokio::test]
    async fn test_virtualbox_iso_explicit_iso() {
        let mut r = template(
            &["virtualbox-iso"],
            vbox_builders(&[
                "ssh_username = vagrant",
                "ssh_password = vagrant",
                "iso_url = http://example.com/ubuntu-14.04-server-amd64.iso",
                "iso_checksum = abc123",
                "iso_checksum_type = sha256",
                "disk_size = 20000",
                "headless = true",
            ]),
        );
        let builders = create_builders(&mut r).await.unwrap();
        assert_eq!(builders.len(), 1);
        let b = &builders[0];
        assert_eq!(b["type"], "virtualbox-iso");
        assert_eq!(b["ssh_username"], "vagrant");
        assert_eq!(b["disk_size"], 20000);
        assert_eq!(b["headless"], true);
        assert_eq!(b["http_directory"], "http");
        assert_eq!(
            b["vboxmanage"],
            json!([["modifyvm", "{{.Name}}", "--memory", "4096"]])
        );
        assert_eq!(
            b["iso_url"],
            "http://example.com/ubuntu-14.04-server-amd64.iso"
        );
        // No discovery ran, so the placeholder guest_os_type is emitted.
        assert_eq!(b["guest_os_type"], "");
    }

    #[tokio::test]
    async fn test_virtualbox_iso_missing_checksum() {
        let mut r = template(
            &["virtualbox-iso"],
            vbox_builders(&[
                "ssh_username = vagrant",
                "ssh_password = vagrant",
                "iso_url = http://example.com/u.iso",
                "iso_checksum_type = sha256",
            ]),
        );
        let err = create_builders(&mut r).await.unwrap_err();
        let msg = format!("{err}");
        assert_eq!(msg, "virtualbox-iso: virtualbox-iso");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "iso_checksum: required setting not found");
    }

    #[tokio::test]
    async fn test_virtualbox_iso_missing_password() {
        let mut r = template(
            &["virtualbox-iso"],
            vbox_builders(&["ssh_username = vagrant"]),
        );
        let err = create_builders(&mut r).await.unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "ssh_password: required setting not found");
    }

    #[tokio::test]
    async fn test_ssh_port_typed_as_int() {
        let mut r = template(
            &["virtualbox-iso"],
            vbox_builders(&[
                "communicator = ssh",
                "ssh_username = vagrant",
                "ssh_password = vagrant",
                "ssh_port = twenty-two",
            ]),
        );
        let err = create_builders(&mut r).await.unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(
            source.to_string(),
            "ssh_port: invalid integer value \"twenty-two\""
        );
    }

    #[tokio::test]
    async fn test_communicator_gates_credentials() {
        let mut m = HashMap::new();
        m.insert(
            "virtualbox-iso".to_string(),
            builder(
                &[
                    "communicator = ssh",
                    "ssh_username = vagrant",
                    "ssh_password = vagrant",
                    "ssh_port = 22",
                    "iso_url = http://example.com/u.iso",
                    "iso_checksum = abc",
                    "iso_checksum_type = sha256",
                ],
                &[],
            ),
        );
        let mut r = template(&["virtualbox-iso"], m);
        let builders = create_builders(&mut r).await.unwrap();
        let b = &builders[0];
        assert_eq!(b["communicator"], "ssh");
        assert_eq!(b["ssh_username"], "vagrant");
        assert_eq!(b["ssh_port"], 22);
    }

    #[tokio::test]
    async fn test_invalid_communicator() {
        let mut m = HashMap::new();
        m.insert(
            "null".to_string(),
            builder(&["communicator = telnet"], &[]),
        );
        let mut r = template(&["null"], m);
        let err = create_builders(&mut r).await.unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "communicator: invalid option \"telnet\"");
    }

    #[tokio::test]
    async fn test_null_requires_communicator() {
        let mut m = HashMap::new();
        m.insert("null".to_string(), builder(&[], &[]));
        let mut r = template(&["null"], m);
        let err = create_builders(&mut r).await.unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "communicator: required setting not found");
    }

    #[tokio::test]
    async fn test_component_not_found() {
        let mut r = template(&["virtualbox-iso"], HashMap::new());
        let err = create_builders(&mut r).await.unwrap_err();
        assert!(matches!(err, ForgeError::ComponentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_kind() {
        let mut m = HashMap::new();
        m.insert(
            "hyperv".to_string(),
            BuilderC {
                section: TemplateSection {
                    typ: "hyperv-iso".to_string(),
                    ..TemplateSection::default()
                },
            },
        );
        let mut r = template(&["hyperv"], m);
        let err = create_builders(&mut r).await.unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "unsupported kind: hyperv-iso");
    }

    #[tokio::test]
    async fn test_docker_run_command_array_wins() {
        let mut m = HashMap::new();
        m.insert(
            "docker".to_string(),
            builder(
                &[
                    "commit = true",
                    "discard = false",
                    "export_path = image.tar",
                    "image = ubuntu:14.04",
                    "run_command = run_test.command",
                ],
                &[(
                    "run_command",
                    ArrayValue::Strings(strings(&["-d", "-i", "-t", "{{.Image}}", "/bin/bash"])),
                )],
            ),
        );
        let mut r = template(&["docker"], m);
        let builders = create_builders(&mut r).await.unwrap();
        let b = &builders[0];
        assert_eq!(b["commit"], true);
        assert_eq!(b["discard"], false);
        assert_eq!(
            b["run_command"],
            json!(["-d", "-i", "-t", "{{.Image}}", "/bin/bash"])
        );
    }

    #[tokio::test]
    async fn test_amazon_ebs_required_and_mappings() {
        let mut m = HashMap::new();
        m.insert(
            "amazon-ebs".to_string(),
            builder(
                &[
                    "access_key = AKIA",
                    "ami_name = test-ami",
                    "instance_type = m3.medium",
                    "region = us-east-1",
                    "secret_key = shhh",
                    "source_ami = ami-1234",
                    "ssh_username = ec2-user",
                ],
                &[(
                    "ami_block_device_mappings",
                    ArrayValue::Lists(vec![strings(&[
                        "device_name=/dev/sdb",
                        "volume_size=100",
                        "delete_on_termination=true",
                    ])]),
                )],
            ),
        );
        let mut r = template(&["amazon-ebs"], m);
        let builders = create_builders(&mut r).await.unwrap();
        let b = &builders[0];
        assert_eq!(b["type"], "amazon-ebs");
        assert_eq!(b["ami_block_device_mappings"][0]["volume_size"], 100);
        assert_eq!(b["ami_block_device_mappings"][0]["delete_on_termination"], true);

        // Drop a required setting and the synthesizer names it.
        let mut m = HashMap::new();
        m.insert(
            "amazon-ebs".to_string(),
            builder(&["access_key = AKIA", "ssh_username = ec2-user"], &[]),
        );
        let mut r = template(&["amazon-ebs"], m);
        let err = create_builders(&mut r).await.unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "ami_name: required setting not found");
    }

    #[tokio::test]
    async fn test_digitalocean_minimal() {
        let mut m = HashMap::new();
        m.insert(
            "digitalocean".to_string(),
            builder(
                &[
                    "api_token = token",
                    "image = ubuntu-14-04-x64",
                    "region = nyc3",
                    "size = 512mb",
                    "private_networking = true",
                ],
                &[],
            ),
        );
        let mut r = template(&["digitalocean"], m);
        let builders = create_builders(&mut r).await.unwrap();
        let b = &builders[0];
        assert_eq!(b["type"], "digitalocean");
        assert_eq!(b["private_networking"], true);
        assert!(b.get("droplet_name").is_none());
    }

    #[tokio::test]
    async fn test_qemu_explicit_iso_missing_checksum_type() {
        let mut m = HashMap::new();
        m.insert(
            "qemu".to_string(),
            builder(
                &[
                    "ssh_username = vagrant",
                    "iso_url = http://example.com/u.iso",
                    "iso_checksum = abc",
                ],
                &[],
            ),
        );
        let mut r = template(&["qemu"], m);
        let err = create_builders(&mut r).await.unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(
            source.to_string(),
            "iso_checksum_type: required setting not found"
        );
    }

    #[tokio::test]
    async fn test_vmware_vmx_source_path_and_vmx_data() {
        let mut m = HashMap::new();
        m.insert(
            "vmware-vmx".to_string(),
            builder(
                &["ssh_username = vagrant", "source_path = base.vmx"],
                &[(
                    "vmx_data",
                    ArrayValue::Strings(strings(&["memsize=2048", "numvcpus=2"])),
                )],
            ),
        );
        let mut r = template(&["vmware-vmx"], m);
        r.io_dirs.include_component_string = Some(true);
        let builders = create_builders(&mut r).await.unwrap();
        let b = &builders[0];
        assert_eq!(b["source_path"], "vmware-vmx/base.vmx");
        assert_eq!(b["vmx_data"]["memsize"], "2048");
        assert_eq!(b["vmx_data"]["numvcpus"], "2");
    }

    #[tokio::test]
    async fn test_openstack_required_credentials() {
        let mut m = HashMap::new();
        m.insert(
            "openstack".to_string(),
            builder(
                &[
                    "flavor = m1.small",
                    "image_name = precise-image",
                    "source_image = 3.14159",
                    "username = admin",
                ],
                &[],
            ),
        );
        let mut r = template(&["openstack"], m);
        let err = create_builders(&mut r).await.unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "password: required setting not found");
    }

    #[tokio::test]
    async fn test_parallels_iso_tools_mode() {
        let mut m = HashMap::new();
        m.insert(
            "parallels-iso".to_string(),
            builder(
                &[
                    "iso_checksum = abc",
                    "iso_checksum_type = sha256",
                    "iso_url = http://example.com/u.iso",
                    "parallels_tools_guest_mode = disable",
                    "ssh_username = vagrant",
                ],
                &[],
            ),
        );
        let mut r = template(&["parallels-iso"], m);
        let builders = create_builders(&mut r).await.unwrap();
        let b = &builders[0];
        assert_eq!(b["type"], "parallels-iso");
        // Tools flavor is not required once the tools mode is disabled.
        assert_eq!(b["parallels_tools_guest_mode"], "disable");
        assert_eq!(b["iso_url"], "http://example.com/u.iso");
    }

    #[tokio::test]
    async fn test_parallels_iso_invalid_tools_mode() {
        let mut m = HashMap::new();
        m.insert(
            "parallels-iso".to_string(),
            builder(
                &[
                    "iso_checksum = abc",
                    "iso_checksum_type = sha256",
                    "iso_url = http://example.com/u.iso",
                    "parallels_tools_guest_mode = sideload",
                    "ssh_username = vagrant",
                ],
                &[],
            ),
        );
        let mut r = template(&["parallels-iso"], m);
        let err = create_builders(&mut r).await.unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(
            source.to_string(),
            "parallels_tools_guest_mode: invalid option \"sideload\""
        );
    }

    #[tokio::test]
    async fn test_parallels_pvm_requires_source_path() {
        let mut m = HashMap::new();
        m.insert(
            "parallels-pvm".to_string(),
            builder(
                &["parallels_tools_flavor = lin", "ssh_username = vagrant"],
                &[],
            ),
        );
        let mut r = template(&["parallels-pvm"], m);
        let err = create_builders(&mut r).await.unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "source_path: required setting not found");
    }

    #[tokio::test]
    async fn test_emission_order_follows_ids() {
        let mut m = HashMap::new();
        m.insert(
            "digitalocean".to_string(),
            builder(
                &["api_token = t", "image = i", "region = r", "size = s"],
                &[],
            ),
        );
        m.insert("null".to_string(), builder(&["communicator = ssh"], &[]));
        let mut r = template(&["null", "digitalocean"], m);
        let builders = create_builders(&mut r).await.unwrap();
        assert_eq!(builders[0]["type"], "null");
        assert_eq!(builders[1]["type"], "digitalocean");
    }

    #[tokio::test]
    async fn test_unset_guest_os_type_survives_common_merge() {
        let mut m = vbox_builders(&[
            "ssh_username = vagrant",
            "ssh_password = vagrant",
            "iso_url = http://example.com/u.iso",
            "iso_checksum = abc",
            "iso_checksum_type = sha256",
            "guest_os_type = ",
        ]);
        m.get_mut("virtualbox-iso").unwrap();
        let mut r = template(&["virtualbox-iso"], m);
        let builders = create_builders(&mut r).await.unwrap();
        // The unset marker survives the merge and is filled from the
        // template's os_type (empty here: no discovery ran).
        assert_eq!(builders[0]["guest_os_type"], "");
    }
}
