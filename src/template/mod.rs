//! Raw templates and their assembly
//!
//! A raw template is the working record for one named build. It is assembled
//! by a three-way merge - application defaults, then the distro profile,
//! then the named build, later layers winning per key - and then consumed
//! once by the component synthesizers, which turn its component sub-records
//! into the emitted plan while scheduling referenced resources for copy.
//!
//! # Layering
//!
//! [`DistroDefaults`] materializes `defaults ⊕ distro-profile` once per
//! supported distribution. Generating a named build then clones the distro's
//! template and overlays the build document on top
//! ([`RawTemplate::update_build_settings`]): scalar fields overlay when
//! non-empty, component settings merge per the ordered rightmost-wins rules
//! of [`crate::settings`], arrays replace wholesale per name, and ID lists
//! are taken from the build when present.
//!
//! After overlay, the variable table is populated (`:distro`, `:release`,
//! `:arch`, `:image`, `:date`, `:build_name`, plus user-defined entries) and
//! substituted through the IO dirs and template name.

pub mod builders;
pub mod post_processors;
pub mod provisioners;
pub mod synth;

use crate::config::{BuildDoc, Defaults, SupportedDistro, SupportedDistros};
use crate::constants::DEFAULT_DELIM;
use crate::core::error::ForgeError;
use crate::release::{IsoClient, ReleaseIso};
use crate::settings::{merge_arrays, merge_settings, parse_setting, replace_variables, Arrays};
use crate::source::SourceTree;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Where boxforge reads sources from and writes output to.
///
/// The `*_is_relative` flags mark a path as relative to the configuration
/// directory rather than the working directory; the orchestrator resolves
/// them before synthesis.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct IoDirInf {
    /// Root of the generated template output tree.
    #[serde(default)]
    pub template_output_dir: String,
    /// Whether `template_output_dir` is relative to the configuration dir.
    #[serde(default)]
    pub template_output_dir_is_relative: Option<bool>,
    /// Directory Packer writes produced images into; referenced from
    /// settings via `:packer_output_dir`.
    #[serde(default)]
    pub packer_output_dir: String,
    /// Whether `packer_output_dir` is relative to the configuration dir.
    #[serde(default)]
    pub packer_output_dir_is_relative: Option<bool>,
    /// Root of the layered source tree.
    #[serde(default)]
    pub source_dir: String,
    /// Whether `source_dir` is relative to the configuration dir.
    #[serde(default)]
    pub source_dir_is_relative: Option<bool>,
    /// Whether component names are interposed as output subdirectories.
    #[serde(default)]
    pub include_component_string: Option<bool>,
}

impl IoDirInf {
    /// Overlays the non-empty fields of `new` onto `self`.
    pub fn update(&mut self, new: &IoDirInf) {
        if !new.template_output_dir.is_empty() {
            self.template_output_dir = new.template_output_dir.clone();
        }
        if new.template_output_dir_is_relative.is_some() {
            self.template_output_dir_is_relative = new.template_output_dir_is_relative;
        }
        if !new.packer_output_dir.is_empty() {
            self.packer_output_dir = new.packer_output_dir.clone();
        }
        if new.packer_output_dir_is_relative.is_some() {
            self.packer_output_dir_is_relative = new.packer_output_dir_is_relative;
        }
        if !new.source_dir.is_empty() {
            self.source_dir = new.source_dir.clone();
        }
        if new.source_dir_is_relative.is_some() {
            self.source_dir_is_relative = new.source_dir_is_relative;
        }
        if new.include_component_string.is_some() {
            self.include_component_string = new.include_component_string;
        }
    }
}

/// Packer template metadata. Optional in Packer itself, carried through to
/// the emitted document.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PackerInf {
    /// Minimum Packer version the plan requires.
    #[serde(default)]
    pub min_packer_version: String,
    /// Human-readable plan description.
    #[serde(default)]
    pub description: String,
}

impl PackerInf {
    /// Overlays the non-empty fields of `new` onto `self`.
    pub fn update(&mut self, new: &PackerInf) {
        if !new.min_packer_version.is_empty() {
            self.min_packer_version = new.min_packer_version.clone();
        }
        if !new.description.is_empty() {
            self.description = new.description.clone();
        }
    }
}

/// Build naming metadata and mirror hints.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct BuildInf {
    /// Template filename, usually containing `:build_name`.
    #[serde(default)]
    pub name: String,
    /// The named build this template belongs to.
    #[serde(default)]
    pub build_name: String,
    /// Mirror base URL for ISO discovery; distro-dependent default applies
    /// when empty.
    #[serde(default)]
    pub base_url: String,
    /// Preferred mirror region hint.
    #[serde(default)]
    pub region: Option<String>,
    /// Preferred mirror country hint.
    #[serde(default)]
    pub country: Option<String>,
    /// Preferred mirror sponsor hint.
    #[serde(default)]
    pub sponsor: Option<String>,
}

impl BuildInf {
    /// Overlays the non-empty fields of `new` onto `self`.
    pub fn update(&mut self, new: &BuildInf) {
        if !new.name.is_empty() {
            self.name = new.name.clone();
        }
        if !new.build_name.is_empty() {
            self.build_name = new.build_name.clone();
        }
        if !new.base_url.is_empty() {
            self.base_url = new.base_url.clone();
        }
        if new.region.is_some() {
            self.region = new.region.clone();
        }
        if new.country.is_some() {
            self.country = new.country.clone();
        }
        if new.sponsor.is_some() {
            self.sponsor = new.sponsor.clone();
        }
    }
}

/// The shared payload of every component: a kind, ordered settings, and
/// named arrays.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct TemplateSection {
    /// The component kind's canonical string; defaults to the component's
    /// identifier when unset.
    #[serde(default, rename = "type")]
    pub typ: String,
    /// Ordered `key = value` entries; the last occurrence of a key wins.
    #[serde(default)]
    pub settings: Vec<String>,
    /// Named heterogeneous arrays.
    #[serde(default)]
    pub arrays: Arrays,
}

impl TemplateSection {
    /// Merges `new` into `self`: settings per the ordered rightmost-wins
    /// rule, arrays replaced wholesale per name.
    pub fn merge(&mut self, new: &TemplateSection) {
        if !new.typ.is_empty() {
            self.typ = new.typ.clone();
        }
        self.settings = merge_settings(&self.settings, &new.settings);
        self.arrays = merge_arrays(&self.arrays, &new.arrays);
    }
}

/// Access to the shared section of a component record.
pub trait Component: Clone + Default {
    /// The shared section.
    fn section(&self) -> &TemplateSection;
    /// The shared section, mutably.
    fn section_mut(&mut self) -> &mut TemplateSection;
}

macro_rules! component_record {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
        pub struct $name {
            /// The component's section payload.
            #[serde(flatten)]
            pub section: TemplateSection,
        }

        impl Component for $name {
            fn section(&self) -> &TemplateSection {
                &self.section
            }
            fn section_mut(&mut self) -> &mut TemplateSection {
                &mut self.section
            }
        }
    };
}

component_record! {
    /// A builder sub-record.
    BuilderC
}
component_record! {
    /// A provisioner sub-record.
    ProvisionerC
}
component_record! {
    /// A post-processor sub-record.
    PostProcessorC
}

/// The component families of a build: three maps of identifier to
/// sub-record, plus the ordered ID lists naming which sub-records are
/// emitted and in what order.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Build {
    /// Emission order of builders.
    #[serde(default)]
    pub builder_ids: Vec<String>,
    /// Builder sub-records by identifier.
    #[serde(default)]
    pub builders: HashMap<String, BuilderC>,
    /// Emission order of post-processors.
    #[serde(default)]
    pub post_processor_ids: Vec<String>,
    /// Post-processor sub-records by identifier.
    #[serde(default)]
    pub post_processors: HashMap<String, PostProcessorC>,
    /// Emission order of provisioners.
    #[serde(default)]
    pub provisioner_ids: Vec<String>,
    /// Provisioner sub-records by identifier.
    #[serde(default)]
    pub provisioners: HashMap<String, ProvisionerC>,
    /// User-defined `name = value` variable entries.
    #[serde(default)]
    pub variables: Vec<String>,
}

/// Overlays a component family: sub-records present in both sides merge,
/// new-only sub-records are added, old-only sub-records survive.
fn update_family<C: Component>(old: &mut HashMap<String, C>, new: &HashMap<String, C>) {
    for (id, new_component) in new {
        match old.get_mut(id) {
            Some(existing) => existing.section_mut().merge(new_component.section()),
            None => {
                old.insert(id.clone(), new_component.clone());
            }
        }
    }
}

impl Build {
    /// Overlays `new` onto `self` per the family rules; ID lists are taken
    /// from `new` when it specifies them, inherited otherwise.
    pub fn update(&mut self, new: &Build) {
        update_family(&mut self.builders, &new.builders);
        update_family(&mut self.provisioners, &new.provisioners);
        update_family(&mut self.post_processors, &new.post_processors);
        if !new.builder_ids.is_empty() {
            self.builder_ids = new.builder_ids.clone();
        }
        if !new.provisioner_ids.is_empty() {
            self.provisioner_ids = new.provisioner_ids.clone();
        }
        if !new.post_processor_ids.is_empty() {
            self.post_processor_ids = new.post_processor_ids.clone();
        }
        self.variables = merge_settings(&self.variables, &new.variables);
    }
}

/// The working record for one named build.
///
/// Created by the orchestrator, populated during assembly, consumed once by
/// the synthesizers, and dropped after materialization. The file and
/// directory ledgers accumulate copy work during synthesis and are drained
/// by the materializer.
#[derive(Clone, Debug, Default)]
pub struct RawTemplate {
    /// IO directory settings after overlay and variable substitution.
    pub io_dirs: IoDirInf,
    /// Packer metadata after overlay.
    pub packer: PackerInf,
    /// Build naming metadata after overlay.
    pub build_inf: BuildInf,
    /// Target distribution.
    pub distro: String,
    /// Target release; may be a major-version placeholder.
    pub release: String,
    /// Target architecture label.
    pub arch: String,
    /// Target ISO image type.
    pub image: String,
    /// The named build being generated.
    pub build_name: String,
    /// Template filename after variable substitution.
    pub name: String,
    /// Variable-substitution delimiter.
    pub delim: String,
    /// Today's date, `YYYY-MM-DD`; the `:date` variable.
    pub date: String,
    /// The variable table, name to value.
    pub var_vals: HashMap<String, String>,
    /// Scheduled file copies: destination to source.
    pub files: BTreeMap<String, String>,
    /// Scheduled directory copies: destination to source.
    pub dirs: BTreeMap<String, String>,
    /// Architectures the distro profile supports.
    pub supported_arch: Vec<String>,
    /// Image types the distro profile supports.
    pub supported_image: Vec<String>,
    /// Releases the distro profile supports.
    pub supported_release: Vec<String>,
    /// Guest OS type filled by ISO discovery.
    pub os_type: String,
    /// The distro's ISO release object, created lazily at first ISO need.
    pub release_iso: Option<ReleaseIso>,
    /// Example mode: resolve paths without disk checks, schedule no copies.
    pub example: bool,
    /// The component families and ID lists.
    pub build: Build,
}

impl RawTemplate {
    /// Seeds a raw template from the application defaults.
    pub fn from_defaults(defaults: &Defaults) -> Self {
        RawTemplate {
            io_dirs: defaults.io_dirs.clone(),
            packer: defaults.packer.clone(),
            build_inf: defaults.build_inf.clone(),
            delim: DEFAULT_DELIM.to_string(),
            date: chrono::Local::now().format("%Y-%m-%d").to_string(),
            build: defaults.build.clone(),
            ..RawTemplate::default()
        }
    }

    /// Overlays a distro profile: IO dirs, packer metadata, build info,
    /// supported lists, the default image selection, and distro-level
    /// component overrides.
    pub fn set_defaults(&mut self, profile: &SupportedDistro) {
        self.io_dirs.update(&profile.io_dirs);
        self.packer.update(&profile.packer);
        self.build_inf.update(&profile.build_inf);
        self.supported_arch = profile.arch.clone();
        self.supported_image = profile.image.clone();
        self.supported_release = profile.release.clone();
        for entry in &profile.default_image {
            let (key, value) = parse_setting(entry);
            match key.as_str() {
                "arch" => self.arch = value,
                "image" => self.image = value,
                "release" => self.release = value,
                _ => {}
            }
        }
        self.build.update(&profile.build);
    }

    /// Overlays a named build document.
    pub fn update_build_settings(&mut self, build_name: &str, doc: &BuildDoc) -> Result<()> {
        self.build_name = build_name.to_string();
        self.build_inf.build_name = build_name.to_string();
        if !doc.arch.is_empty() {
            self.arch = doc.arch.clone();
        }
        if !doc.image.is_empty() {
            self.image = doc.image.clone();
        }
        if !doc.release.is_empty() {
            self.release = doc.release.clone();
        }
        self.packer.update(&doc.packer);
        self.build_inf.update(&doc.build_inf);
        self.io_dirs.update(&doc.io_dirs);
        self.build.update(&doc.build);
        self.validate_selection()?;
        self.merge_variables();
        Ok(())
    }

    /// Rejects arch/image/release values outside the distro profile's
    /// supported lists. Empty lists impose no constraint.
    fn validate_selection(&self) -> Result<()> {
        let checks = [
            ("arch", &self.arch, &self.supported_arch),
            ("image", &self.image, &self.supported_image),
            ("release", &self.release, &self.supported_release),
        ];
        for (key, value, allowed) in checks {
            if value.is_empty() || allowed.is_empty() {
                continue;
            }
            if !allowed.iter().any(|a| a == value) {
                return Err(ForgeError::InvalidOption {
                    key: key.to_string(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Populates the variable table with the base variables plus any
    /// user-defined entries, then substitutes through the IO dirs and the
    /// template name.
    pub fn merge_variables(&mut self) {
        self.set_base_var_vals();
        for entry in &self.build.variables {
            let (name, value) = parse_setting(entry);
            let value = replace_variables(&value, &self.delim, &self.var_vals);
            self.var_vals.insert(name, value);
        }
        self.name = self.replace_vars(&self.build_inf.name);
        self.io_dirs.template_output_dir = self.replace_vars(&self.io_dirs.template_output_dir);
        self.io_dirs.packer_output_dir = self.replace_vars(&self.io_dirs.packer_output_dir);
        self.io_dirs.source_dir = self.replace_vars(&self.io_dirs.source_dir);
        // The dir variables hold the substituted forms so settings that
        // reference them resolve in one pass.
        self.var_vals.insert(
            "out_dir".to_string(),
            self.io_dirs.template_output_dir.clone(),
        );
        self.var_vals.insert(
            "packer_output_dir".to_string(),
            self.io_dirs.packer_output_dir.clone(),
        );
        self.var_vals
            .insert("src_dir".to_string(), self.io_dirs.source_dir.clone());
    }

    fn set_base_var_vals(&mut self) {
        self.var_vals
            .insert("distro".to_string(), self.distro.clone());
        self.var_vals
            .insert("release".to_string(), self.release.clone());
        self.var_vals.insert("arch".to_string(), self.arch.clone());
        self.var_vals
            .insert("image".to_string(), self.image.clone());
        self.var_vals.insert("date".to_string(), self.date.clone());
        self.var_vals
            .insert("build_name".to_string(), self.build_name.clone());
    }

    /// Substitutes the template's variables into `s`.
    pub fn replace_vars(&self, s: &str) -> String {
        replace_variables(s, &self.delim, &self.var_vals)
    }

    /// The source-lookup context for this template.
    pub fn source_tree(&self) -> SourceTree {
        SourceTree {
            source_dir: self.io_dirs.source_dir.clone(),
            template_output_dir: self.io_dirs.template_output_dir.clone(),
            distro: self.distro.clone(),
            release: self.release.clone(),
            arch: self.arch.clone(),
            build_name: self.build_name.clone(),
            include_component_string: self.io_dirs.include_component_string.unwrap_or(false),
            example: self.example,
        }
    }

    /// Ensures ISO information is resolved for an ISO-consuming builder.
    ///
    /// Creates the distro's [`ReleaseIso`] on first need, pulls
    /// `iso_checksum_type` out of the merged settings, runs discovery, and
    /// fills the template's guest OS type for builder families that use it.
    pub async fn iso_info(&mut self, builder_kind: &str, work: &[String]) -> Result<()> {
        let mut checksum_type = String::new();
        for entry in work {
            let (key, value) = parse_setting(entry);
            if key == "iso_checksum_type" {
                checksum_type = self.replace_vars(&value);
            }
        }
        if self.release_iso.is_none() {
            self.release_iso = Some(ReleaseIso::new(
                &self.distro,
                &self.release,
                &self.arch,
                &self.image,
                &self.build_inf.base_url,
            )?);
        }
        let client = IsoClient::new()?;
        let iso = self.release_iso.as_mut().expect("release iso just set");
        iso.set_iso_info(&client, &checksum_type).await?;
        if matches!(
            builder_kind,
            "virtualbox-iso" | "virtualbox-ovf" | "vmware-iso" | "vmware-vmx"
        ) {
            self.os_type = iso.os_type(builder_kind)?;
        }
        tracing::info!(
            build = %self.build_name,
            iso = %iso.release().name,
            "iso discovery complete"
        );
        Ok(())
    }

    /// Records a file copy in the ledger; two distinct sources for one
    /// destination is a conflict.
    pub(crate) fn insert_file(&mut self, dest: String, src: String) -> Result<()> {
        if let Some(existing) = self.files.get(&dest) {
            if existing != &src {
                return Err(ForgeError::CopyConflict { dest });
            }
        }
        self.files.insert(dest, src);
        Ok(())
    }

    /// Records a directory copy in the ledger; two distinct sources for one
    /// destination is a conflict.
    pub(crate) fn insert_dir(&mut self, dest: String, src: String) -> Result<()> {
        if let Some(existing) = self.dirs.get(&dest) {
            if existing != &src {
                return Err(ForgeError::CopyConflict { dest });
            }
        }
        self.dirs.insert(dest, src);
        Ok(())
    }

    /// Schedules a file copy and returns the emitted relative form, or
    /// passes the value through untouched in example mode.
    pub(crate) fn schedule_file(&mut self, component: &str, value: &str) -> Result<String> {
        let tree = self.source_tree();
        match tree.find_source(value, component, false)? {
            crate::source::Resolved::Disk(src) => {
                self.insert_file(tree.build_out_path(component, value), src)?;
            }
            crate::source::Resolved::Example(_) => {}
        }
        Ok(tree.build_template_resource_path(component, value, false))
    }

    /// Schedules a directory copy and returns the emitted relative form.
    pub(crate) fn schedule_dir(
        &mut self,
        component: &str,
        value: &str,
        out_component: &str,
    ) -> Result<String> {
        let tree = self.source_tree();
        match tree.find_source(value, component, true)? {
            crate::source::Resolved::Disk(src) => {
                self.insert_dir(tree.build_out_path(out_component, value), src)?;
            }
            crate::source::Resolved::Example(_) => {}
        }
        Ok(tree.build_template_resource_path(out_component, value, true))
    }
}

/// The `defaults ⊕ distro-profile` layer, materialized once per supported
/// distribution.
#[derive(Clone, Debug, Default)]
pub struct DistroDefaults {
    /// One pre-merged raw template per distro.
    pub templates: HashMap<String, RawTemplate>,
}

impl DistroDefaults {
    /// Merges the defaults document with every distro profile.
    pub fn new(defaults: &Defaults, supported: &SupportedDistros) -> Self {
        let mut templates = HashMap::new();
        for (name, profile) in &supported.distro {
            let mut tpl = RawTemplate::from_defaults(defaults);
            tpl.distro = name.clone();
            tpl.set_defaults(profile);
            templates.insert(name.clone(), tpl);
        }
        DistroDefaults { templates }
    }

    /// The pre-merged template for `distro`, or `unsupported-distro`.
    pub fn template(&self, distro: &str) -> Result<RawTemplate> {
        self.templates
            .get(distro)
            .cloned()
            .ok_or_else(|| ForgeError::UnsupportedDistro {
                distro: distro.to_string(),
            })
    }
}

/// Returns the kind string for a component: its section's `type` when set,
/// the identifier otherwise.
pub fn component_kind<'a>(section: &'a TemplateSection, id: &'a str) -> &'a str {
    if section.typ.is_empty() {
        id
    } else {
        &section.typ
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{decode_str, Format};

    fn defaults() -> Defaults {
        decode_str(
            r#"
description = "Default template"
min_packer_version = "0.4.0"
name = ":build_name"
template_output_dir = "out/:distro/:build_name"
packer_output_dir = "packer_boxes/:distro/:build_name"
source_dir = "src/:distro"

builder_ids = ["virtualbox-iso"]
provisioner_ids = ["shell"]
post_processor_ids = ["vagrant"]

[builders.common]
settings = ["ssh_wait_timeout = 300m", "ssh_username = vagrant"]

[builders.virtualbox-iso.arrays]
vboxmanage = ["memory=1024"]

[provisioners.shell]
settings = ["execute_command = execute_test.command"]

[provisioners.shell.arrays]
scripts = ["setup_test.sh"]

[post_processors.vagrant]
settings = ["keep_input_artifact = false"]
"#,
            Format::Toml,
        )
        .unwrap()
    }

    fn supported() -> SupportedDistros {
        decode_str(
            r#"
[distro.ubuntu]
base_url = "http://releases.ubuntu.com/"
description = "Ubuntu distro defaults"
arch = ["i386", "amd64"]
image = ["desktop", "server"]
release = ["12.04", "14.04"]
default_image = ["release = 14.04", "image = server", "arch = amd64"]

[distro.centos]
arch = ["i386", "x86_64"]
image = ["minimal", "netinstall"]
release = ["6", "7"]
default_image = ["release = 7", "image = minimal", "arch = x86_64"]
"#,
            Format::Toml,
        )
        .unwrap()
    }

    fn build_doc(toml: &str) -> BuildDoc {
        decode_str(toml, Format::Toml).unwrap()
    }

    #[test]
    fn test_distro_defaults_overlay() {
        let dd = DistroDefaults::new(&defaults(), &supported());
        let tpl = dd.template("ubuntu").unwrap();
        assert_eq!(tpl.distro, "ubuntu");
        assert_eq!(tpl.arch, "amd64");
        assert_eq!(tpl.image, "server");
        assert_eq!(tpl.release, "14.04");
        assert_eq!(tpl.packer.description, "Ubuntu distro defaults");
        assert_eq!(tpl.packer.min_packer_version, "0.4.0");
        assert_eq!(tpl.build_inf.base_url, "http://releases.ubuntu.com/");
        assert_eq!(tpl.build.builder_ids, vec!["virtualbox-iso".to_string()]);
        assert!(dd.template("slackware").is_err());
    }

    #[test]
    fn test_update_build_settings_overlays() {
        let dd = DistroDefaults::new(&defaults(), &supported());
        let mut tpl = dd.template("ubuntu").unwrap();
        let doc = build_doc(
            r#"
distro = "ubuntu"
release = "12.04"
description = "Precise build"

[builders.common]
settings = ["ssh_wait_timeout = 240m"]

[builders.virtualbox-iso.arrays]
vboxmanage = ["memory=4096"]
"#,
        );
        tpl.update_build_settings("1204-amd64-server", &doc).unwrap();
        assert_eq!(tpl.release, "12.04");
        assert_eq!(tpl.arch, "amd64");
        assert_eq!(tpl.packer.description, "Precise build");
        let common = tpl.build.builders.get("common").unwrap();
        assert_eq!(
            common.section.settings,
            vec![
                "ssh_wait_timeout = 240m".to_string(),
                "ssh_username = vagrant".to_string()
            ]
        );
        let vbox = tpl.build.builders.get("virtualbox-iso").unwrap();
        assert_eq!(
            vbox.section.arrays.get("vboxmanage").unwrap().as_strings().unwrap(),
            &["memory=4096".to_string()]
        );
    }

    #[test]
    fn test_update_build_settings_rejects_unsupported_selection() {
        let dd = DistroDefaults::new(&defaults(), &supported());
        let mut tpl = dd.template("ubuntu").unwrap();
        let doc = build_doc("release = \"13.10\"");
        match tpl.update_build_settings("bad", &doc) {
            Err(ForgeError::InvalidOption { key, value }) => {
                assert_eq!(key, "release");
                assert_eq!(value, "13.10");
            }
            other => panic!("expected InvalidOption, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_variables_expands_dirs_and_name() {
        let dd = DistroDefaults::new(&defaults(), &supported());
        let mut tpl = dd.template("ubuntu").unwrap();
        let doc = build_doc("");
        tpl.update_build_settings("1404-amd64-server", &doc).unwrap();
        assert_eq!(tpl.name, "1404-amd64-server");
        assert_eq!(tpl.io_dirs.template_output_dir, "out/ubuntu/1404-amd64-server");
        assert_eq!(tpl.io_dirs.source_dir, "src/ubuntu");
        assert_eq!(tpl.var_vals.get("release").unwrap(), "14.04");
    }

    #[test]
    fn test_user_variables() {
        let dd = DistroDefaults::new(&defaults(), &supported());
        let mut tpl = dd.template("ubuntu").unwrap();
        let doc = build_doc(r#"variables = ["box_name = :build_name-virtualbox"]"#);
        tpl.update_build_settings("1404-amd64-server", &doc).unwrap();
        assert_eq!(
            tpl.var_vals.get("box_name").unwrap(),
            "1404-amd64-server-virtualbox"
        );
    }

    #[test]
    fn test_component_kind_falls_back_to_id() {
        let section = TemplateSection::default();
        assert_eq!(component_kind(&section, "virtualbox-iso"), "virtualbox-iso");
        let section = TemplateSection {
            typ: "shell".to_string(),
            ..TemplateSection::default()
        };
        assert_eq!(component_kind(&section, "shell-two"), "shell");
    }

    #[test]
    fn test_new_ids_win_absent_ids_inherit() {
        let mut old = Build {
            builder_ids: vec!["virtualbox-iso".to_string()],
            provisioner_ids: vec!["shell".to_string()],
            ..Build::default()
        };
        let new = Build {
            builder_ids: vec!["vmware-iso".to_string()],
            ..Build::default()
        };
        old.update(&new);
        assert_eq!(old.builder_ids, vec!["vmware-iso".to_string()]);
        assert_eq!(old.provisioner_ids, vec!["shell".to_string()]);
    }
}
