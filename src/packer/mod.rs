//! The emitted build plan and the output materializer
//!
//! A [`PackerTemplate`] is the JSON document the builder runtime consumes:
//! plan metadata, a variables table, and the three ordered component
//! arrays. [`synthesize`] produces one from a raw template by running the
//! component synthesizers; [`PackerTemplate::write`] then materializes the
//! output tree - the JSON file plus every resource the synthesizers
//! scheduled in the template's copy ledgers.
//!
//! Copy ordering is irrelevant, but each destination is created at most
//! once; two distinct sources for one destination fail with
//! `copy-conflict` at scheduling time, before anything touches the disk.

use crate::core::error::ForgeError;
use crate::settings::parse_setting;
use crate::template::{builders, post_processors, provisioners, RawTemplate};
use crate::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// The build-plan document emitted for the builder runtime.
///
/// Field order matches the emitted JSON. Component arrays preserve the
/// emission-ID order from the raw template.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PackerTemplate {
    /// Human-readable plan description.
    pub description: String,
    /// Minimum builder-runtime version the plan requires.
    pub min_packer_version: String,
    /// User-defined variables.
    pub variables: BTreeMap<String, String>,
    /// Builder objects, in emission order.
    pub builders: Vec<Value>,
    /// Provisioner objects, in emission order.
    pub provisioners: Vec<Value>,
    /// Post-processor objects, in emission order.
    #[serde(rename = "post-processors")]
    pub post_processors: Vec<Value>,
}

/// Runs the component synthesizers over a raw template and assembles the
/// plan document.
pub async fn synthesize(r: &mut RawTemplate) -> Result<PackerTemplate> {
    let bldrs = builders::create_builders(r).await?;
    let provs = provisioners::create_provisioners(r)?;
    let pps = post_processors::create_post_processors(r)?;
    let mut variables = BTreeMap::new();
    for entry in &r.build.variables {
        let (name, value) = parse_setting(entry);
        variables.insert(name, r.replace_vars(&value));
    }
    Ok(PackerTemplate {
        description: r.packer.description.clone(),
        min_packer_version: r.packer.min_packer_version.clone(),
        variables,
        builders: bldrs,
        provisioners: provs,
        post_processors: pps,
    })
}

impl PackerTemplate {
    /// Materializes the output tree: creates the directory structure,
    /// drains the template's copy ledgers, and writes the plan as indented
    /// JSON at the template file path. Returns that path.
    pub fn write(&self, r: &RawTemplate) -> Result<PathBuf> {
        if r.io_dirs.template_output_dir.is_empty() {
            return Err(ForgeError::Config {
                message: format!("template output dir for {} not set", r.build_name),
            });
        }
        if r.name.is_empty() {
            return Err(ForgeError::Config {
                message: format!("template name for {} not set", r.build_name),
            });
        }
        let out_dir = Path::new(&r.io_dirs.template_output_dir);
        fs::create_dir_all(out_dir)?;
        for (dest, src) in &r.files {
            copy_file(Path::new(src), Path::new(dest))?;
        }
        for (dest, src) in &r.dirs {
            copy_dir(Path::new(src), Path::new(dest))?;
        }
        let plan_path = out_dir.join(&r.name);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&plan_path, json)?;
        tracing::info!(
            build = %r.build_name,
            plan = %plan_path.display(),
            files = r.files.len(),
            dirs = r.dirs.len(),
            "plan materialized"
        );
        Ok(plan_path)
    }
}

fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest)?;
    Ok(())
}

fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
