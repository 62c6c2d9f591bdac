//! Post-processor synthesizers
//!
//! Same skeleton as the builders and provisioners. Post-processors
//! repackage the artifact Packer produced - boxing it for Vagrant,
//! compressing it, pushing it to a Docker registry, or uploading it to
//! vSphere - so their schemas are small and mostly string-typed.

use crate::core::error::ForgeError;
use crate::settings::parse_setting;
use crate::template::synth::{copy_array, parse_bool, parse_int, work_slice, SettingsMap};
use crate::template::{component_kind, RawTemplate};
use crate::Result;
use serde_json::{json, Value};
use std::fmt;

/// A Packer post-processor kind boxforge can synthesize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostProcessorKind {
    /// `compress`
    Compress,
    /// `docker-import`
    DockerImport,
    /// `docker-push`
    DockerPush,
    /// `docker-save`
    DockerSave,
    /// `docker-tag`
    DockerTag,
    /// `vagrant`
    Vagrant,
    /// `vagrant-cloud`
    VagrantCloud,
    /// `vsphere`
    VSphere,
}

impl PostProcessorKind {
    /// Parses a canonical kind string, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "compress" => Some(Self::Compress),
            "docker-import" => Some(Self::DockerImport),
            "docker-push" => Some(Self::DockerPush),
            "docker-save" => Some(Self::DockerSave),
            "docker-tag" => Some(Self::DockerTag),
            "vagrant" => Some(Self::Vagrant),
            "vagrant-cloud" => Some(Self::VagrantCloud),
            "vsphere" => Some(Self::VSphere),
            _ => None,
        }
    }

    /// The kind's canonical string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compress => "compress",
            Self::DockerImport => "docker-import",
            Self::DockerPush => "docker-push",
            Self::DockerSave => "docker-save",
            Self::DockerTag => "docker-tag",
            Self::Vagrant => "vagrant",
            Self::VagrantCloud => "vagrant-cloud",
            Self::VSphere => "vsphere",
        }
    }
}

impl fmt::Display for PostProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates the plan's post-processor objects in emission-ID order.
pub fn create_post_processors(r: &mut RawTemplate) -> Result<Vec<Value>> {
    let ids = r.build.post_processor_ids.clone();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    tracing::info!(build = %r.build_name, count = ids.len(), "create post-processors");
    let mut out = Vec::with_capacity(ids.len());
    for id in &ids {
        let kind_str = match r.build.post_processors.get(id) {
            Some(p) => component_kind(&p.section, id).to_string(),
            None => return Err(ForgeError::ComponentNotFound { id: id.clone() }),
        };
        let kind = match PostProcessorKind::parse(&kind_str) {
            Some(kind) => kind,
            None => {
                return Err(ForgeError::UnsupportedKind { kind: kind_str }
                    .for_component("post-processor", id.clone()))
            }
        };
        tracing::debug!(build = %r.build_name, id = %id, kind = %kind, "create post-processor");
        let settings = match kind {
            PostProcessorKind::Compress => create_compress(r, id),
            PostProcessorKind::DockerImport => create_docker_import(r, id),
            PostProcessorKind::DockerPush => create_docker_push(r, id),
            PostProcessorKind::DockerSave => create_docker_save(r, id),
            PostProcessorKind::DockerTag => create_docker_tag(r, id),
            PostProcessorKind::Vagrant => create_vagrant(r, id),
            PostProcessorKind::VagrantCloud => create_vagrant_cloud(r, id),
            PostProcessorKind::VSphere => create_vsphere(r, id),
        }
        .map_err(|e| e.for_component(kind.as_str(), id.clone()))?;
        out.push(Value::Object(settings));
    }
    tracing::info!(build = %r.build_name, "post-processors created");
    Ok(out)
}

fn required(settings: &SettingsMap, key: &str) -> Result<()> {
    if settings.contains_key(key) {
        return Ok(());
    }
    Err(ForgeError::RequiredSetting {
        key: key.to_string(),
    })
}

// Optional configuration options:
//   output
fn create_compress(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.post_processors, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(PostProcessorKind::Compress.as_str()),
    );
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        if k == "output" {
            settings.insert(k, json!(v));
        }
    }
    only_except(&mut settings, &section.arrays);
    Ok(settings)
}

// Required configuration options:
//   repository
// Optional configuration options:
//   tag
fn create_docker_import(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.post_processors, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(PostProcessorKind::DockerImport.as_str()),
    );
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "repository" | "tag" => {
                settings.insert(k, json!(v));
            }
            _ => {}
        }
    }
    required(&settings, "repository")?;
    only_except(&mut settings, &section.arrays);
    Ok(settings)
}

// Optional configuration options:
//   login (bool), login_email, login_username, login_password,
//   login_server
fn create_docker_push(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.post_processors, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(PostProcessorKind::DockerPush.as_str()),
    );
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "login_email" | "login_username" | "login_password" | "login_server" => {
                settings.insert(k, json!(v));
            }
            "login" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            _ => {}
        }
    }
    only_except(&mut settings, &section.arrays);
    Ok(settings)
}

// Required configuration options:
//   path
fn create_docker_save(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.post_processors, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(PostProcessorKind::DockerSave.as_str()),
    );
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        if k == "path" {
            settings.insert(k, json!(v));
        }
    }
    required(&settings, "path")?;
    only_except(&mut settings, &section.arrays);
    Ok(settings)
}

// Required configuration options:
//   repository
// Optional configuration options:
//   tag, force (bool)
fn create_docker_tag(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.post_processors, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(PostProcessorKind::DockerTag.as_str()),
    );
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "repository" | "tag" => {
                settings.insert(k, json!(v));
            }
            "force" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            _ => {}
        }
    }
    required(&settings, "repository")?;
    only_except(&mut settings, &section.arrays);
    Ok(settings)
}

// Optional configuration options:
//   compression_level (int), keep_input_artifact (bool), output,
//   vagrantfile_template (resolved through the source tree), and the
//   include array (each entry resolved and scheduled for copy).
fn create_vagrant(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.post_processors, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(PostProcessorKind::Vagrant.as_str()),
    );
    let kind = PostProcessorKind::Vagrant.as_str();
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "output" => {
                settings.insert(k, json!(v));
            }
            "compression_level" => {
                settings.insert(k.clone(), json!(parse_int(&k, &v)?));
            }
            "keep_input_artifact" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            "vagrantfile_template" => {
                let emitted = r.schedule_file(kind, &v).map_err(|e| e.for_setting(&k, &v))?;
                settings.insert(k, json!(emitted));
            }
            _ => {}
        }
    }
    for (name, val) in &section.arrays {
        match name.as_str() {
            "include" => {
                let entries = val.as_strings().ok_or_else(|| ForgeError::Other {
                    message: "include must be an array of paths".to_string(),
                })?;
                let mut emitted = Vec::with_capacity(entries.len());
                for entry in entries {
                    let path = r
                        .schedule_file(kind, entry)
                        .map_err(|e| e.for_setting(name, entry))?;
                    emitted.push(path);
                }
                settings.insert(name.clone(), json!(emitted));
            }
            "only" | "except" => copy_array(&mut settings, name, val),
            _ => {}
        }
    }
    Ok(settings)
}

// Required configuration options:
//   access_token, box_tag, version
// Optional configuration options:
//   box_download_url, no_release, vagrant_cloud_url, version_description
fn create_vagrant_cloud(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.post_processors, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(PostProcessorKind::VagrantCloud.as_str()),
    );
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "access_token" | "box_download_url" | "box_tag" | "no_release"
            | "vagrant_cloud_url" | "version" | "version_description" => {
                settings.insert(k, json!(v));
            }
            _ => {}
        }
    }
    for key in ["access_token", "box_tag", "version"] {
        required(&settings, key)?;
    }
    only_except(&mut settings, &section.arrays);
    Ok(settings)
}

// Required configuration options:
//   cluster, datacenter, datastore, host, password, username, vm_name
// Optional configuration options:
//   disk_mode, insecure (bool), resource_pool, vm_folder, vm_network
fn create_vsphere(r: &mut RawTemplate, id: &str) -> Result<SettingsMap> {
    let (section, work) = work_slice(&r.build.post_processors, id)?;
    let mut settings = SettingsMap::new();
    settings.insert(
        "type".to_string(),
        json!(PostProcessorKind::VSphere.as_str()),
    );
    for entry in &work {
        let (k, v) = parse_setting(entry);
        let v = r.replace_vars(&v);
        match k.as_str() {
            "cluster" | "datacenter" | "datastore" | "disk_mode" | "host" | "password"
            | "resource_pool" | "username" | "vm_folder" | "vm_name" | "vm_network" => {
                settings.insert(k, json!(v));
            }
            "insecure" => {
                settings.insert(k, json!(parse_bool(&v)));
            }
            _ => {}
        }
    }
    for key in [
        "cluster",
        "datacenter",
        "datastore",
        "host",
        "password",
        "username",
        "vm_name",
    ] {
        required(&settings, key)?;
    }
    only_except(&mut settings, &section.arrays);
    Ok(settings)
}

fn only_except(settings: &mut SettingsMap, arrays: &crate::settings::Arrays) {
    for (name, val) in arrays {
        if name == "only" || name == "except" {
            copy_array(settings, name, val);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ArrayValue;
    use crate::template::{Build, PostProcessorC, TemplateSection};
    use std::collections::HashMap;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn post_processor(settings: &[&str], arrays: &[(&str, ArrayValue)]) -> PostProcessorC {
        PostProcessorC {
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

    fn template(ids: &[&str], post_processors: HashMap<String, PostProcessorC>) -> RawTemplate {
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
            post_processor_ids: strings(ids),
            post_processors,
            ..Build::default()
        };
        r.merge_variables();
        r
    }

    #[test]
    fn test_vagrant_with_only_except() {
        let mut m = HashMap::new();
        m.insert(
            "vagrant".to_string(),
            post_processor(
                &[
                    "compression_level = 9",
                    "keep_input_artifact = false",
                    "output = :build_name.box",
                ],
                &[
                    ("only", ArrayValue::Strings(strings(&["virtualbox-iso"]))),
                    ("except", ArrayValue::Strings(strings(&["docker"]))),
                ],
            ),
        );
        let mut r = template(&["vagrant"], m);
        let pps = create_post_processors(&mut r).unwrap();
        let p = &pps[0];
        assert_eq!(p["type"], "vagrant");
        assert_eq!(p["compression_level"], 9);
        assert_eq!(p["keep_input_artifact"], false);
        assert_eq!(p["output"], "test-build.box");
        assert_eq!(p["only"], serde_json::json!(["virtualbox-iso"]));
        assert_eq!(p["except"], serde_json::json!(["docker"]));
    }

    #[test]
    fn test_vagrant_cloud_required() {
        let mut m = HashMap::new();
        m.insert(
            "vagrant-cloud".to_string(),
            post_processor(
                &["access_token = token", "box_tag = foo/bar", "version = 1.0.2"],
                &[],
            ),
        );
        let mut r = template(&["vagrant-cloud"], m);
        let pps = create_post_processors(&mut r).unwrap();
        assert_eq!(pps[0]["box_tag"], "foo/bar");

        let mut m = HashMap::new();
        m.insert(
            "vagrant-cloud".to_string(),
            post_processor(&["access_token = token"], &[]),
        );
        let mut r = template(&["vagrant-cloud"], m);
        let err = create_post_processors(&mut r).unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "box_tag: required setting not found");
    }

    #[test]
    fn test_docker_kinds() {
        let mut m = HashMap::new();
        m.insert(
            "docker-tag".to_string(),
            post_processor(
                &["repository = example/precise", "tag = 0.7", "force = true"],
                &[],
            ),
        );
        m.insert(
            "docker-save".to_string(),
            post_processor(&["path = image.tar"], &[]),
        );
        m.insert(
            "docker-push".to_string(),
            post_processor(&["login = true", "login_username = user"], &[]),
        );
        let mut r = template(&["docker-tag", "docker-save", "docker-push"], m);
        let pps = create_post_processors(&mut r).unwrap();
        assert_eq!(pps[0]["type"], "docker-tag");
        assert_eq!(pps[0]["force"], true);
        assert_eq!(pps[1]["type"], "docker-save");
        assert_eq!(pps[2]["type"], "docker-push");
        assert_eq!(pps[2]["login"], true);
    }

    #[test]
    fn test_docker_import_requires_repository() {
        let mut m = HashMap::new();
        m.insert(
            "docker-import".to_string(),
            post_processor(&["tag = 0.7"], &[]),
        );
        let mut r = template(&["docker-import"], m);
        let err = create_post_processors(&mut r).unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "repository: required setting not found");
    }

    #[test]
    fn test_vsphere_required() {
        let mut m = HashMap::new();
        m.insert(
            "vsphere".to_string(),
            post_processor(
                &[
                    "cluster = c1",
                    "datacenter = dc1",
                    "datastore = ds1",
                    "host = vsphere.example.com",
                    "password = secret",
                    "username = admin",
                ],
                &[],
            ),
        );
        let mut r = template(&["vsphere"], m);
        let err = create_post_processors(&mut r).unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "vm_name: required setting not found");
    }

    #[test]
    fn test_unsupported_post_processor() {
        let mut m = HashMap::new();
        m.insert("shell-local".to_string(), post_processor(&[], &[]));
        let mut r = template(&["shell-local"], m);
        let err = create_post_processors(&mut r).unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "unsupported kind: shell-local");
    }
}
