//! The build orchestrator
//!
//! Drives one or more named builds to completion. Builds are independent:
//! each is assembled, synthesized, and materialized in its own task, owning
//! its raw template and ISO release object exclusively. The worker set is
//! bounded to `max(1, cores - 1)` permits; a failed build is logged and
//! reported without stopping its peers.

use crate::config::{AppConfig, BuildDoc, BuildLists, Builds, Defaults, SupportedDistros};
use crate::core::error::ForgeError;
use crate::packer;
use crate::template::{DistroDefaults, RawTemplate};
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Selection filters from the command line; any subset may be set.
#[derive(Clone, Debug, Default)]
pub struct BuildFilter {
    /// Target distribution for a one-off distro build.
    pub distro: Option<String>,
    /// Architecture override.
    pub arch: Option<String>,
    /// Image-type override.
    pub image: Option<String>,
    /// Release override.
    pub release: Option<String>,
    /// Example mode: resolve resource references without disk checks and
    /// schedule no copies.
    pub example: bool,
}

/// Outcome of one named build.
#[derive(Debug)]
pub struct BuildOutcome {
    /// The named build.
    pub name: String,
    /// The plan path on success, the failure otherwise.
    pub result: Result<PathBuf>,
}

/// Generates the plans for `names` (build names or build-list names),
/// plus a one-off distro build when the filter carries a distro.
///
/// Every selected build runs in its own task; failures are logged and
/// collected. The returned outcomes preserve selection order.
pub async fn build_templates(
    conf: &AppConfig,
    filter: &BuildFilter,
    names: &[String],
) -> Result<Vec<BuildOutcome>> {
    let defaults = Defaults::load(conf)?;
    let supported = SupportedDistros::load(conf)?;
    let builds = Builds::load(conf)?;
    let lists = BuildLists::load(conf)?;
    let distro_defaults = DistroDefaults::new(&defaults, &supported);
    let conf_dir = conf
        .defaults_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    // A name matching a build list expands to the list's builds.
    let mut selected: Vec<String> = Vec::new();
    for name in names {
        match lists.as_ref().and_then(|l| l.list.get(name)) {
            Some(list) => selected.extend(list.builds.iter().cloned()),
            None => selected.push(name.clone()),
        }
    }

    let mut prepared: Vec<(String, RawTemplate)> = Vec::new();
    if let Some(distro) = &filter.distro {
        prepared.push(distro_build(&distro_defaults, distro, filter, &conf_dir)?);
    }
    for name in &selected {
        let doc = builds
            .build
            .get(name)
            .ok_or_else(|| ForgeError::Config {
                message: format!("build {name} not found in the builds file"),
            })?;
        prepared.push(named_build(&distro_defaults, name, doc, &conf_dir)?);
    }
    for (_, template) in &mut prepared {
        template.example = filter.example;
    }
    if prepared.is_empty() {
        return Err(ForgeError::Config {
            message: "nothing to build: pass build names or --distro".to_string(),
        });
    }

    let workers = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1);
    tracing::info!(builds = prepared.len(), workers, "starting builds");
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut handles = Vec::with_capacity(prepared.len());
    for (name, template) in prepared {
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("build semaphore is never closed");
            let result = run_build(template).await;
            BuildOutcome { name, result }
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        let outcome = handle.await.map_err(|e| ForgeError::Other {
            message: format!("build task panicked: {e}"),
        })?;
        match &outcome.result {
            Ok(path) => {
                tracing::info!(build = %outcome.name, plan = %path.display(), "build complete");
            }
            Err(e) => {
                tracing::error!(build = %outcome.name, error = %e, "build failed");
            }
        }
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

/// Assembles the raw template for a named build.
fn named_build(
    distro_defaults: &DistroDefaults,
    name: &str,
    doc: &BuildDoc,
    conf_dir: &Path,
) -> Result<(String, RawTemplate)> {
    if doc.distro.is_empty() {
        return Err(ForgeError::Config {
            message: format!("build {name} does not name a distro"),
        });
    }
    let mut template = distro_defaults.template(&doc.distro)?;
    template
        .update_build_settings(name, doc)
        .map_err(|e| e.for_component("build", name.to_string()))?;
    resolve_io_dirs(&mut template, conf_dir);
    Ok((name.to_string(), template))
}

/// Assembles a one-off build from distro defaults and command-line
/// overrides; the build name is derived from the final selection.
fn distro_build(
    distro_defaults: &DistroDefaults,
    distro: &str,
    filter: &BuildFilter,
    conf_dir: &Path,
) -> Result<(String, RawTemplate)> {
    let mut template = distro_defaults.template(distro)?;
    if let Some(arch) = &filter.arch {
        template.arch = arch.clone();
    }
    if let Some(image) = &filter.image {
        template.image = image.clone();
    }
    if let Some(release) = &filter.release {
        template.release = release.clone();
    }
    let name = format!(
        "{}-{}-{}-{}",
        template.distro, template.release, template.arch, template.image
    );
    template
        .update_build_settings(&name, &BuildDoc::default())
        .map_err(|e| e.for_component("build", name.clone()))?;
    resolve_io_dirs(&mut template, conf_dir);
    Ok((name, template))
}

/// Resolves IO dirs flagged as relative against the configuration dir.
fn resolve_io_dirs(template: &mut RawTemplate, conf_dir: &Path) {
    let rebase = |dir: &mut String, flag: Option<bool>| {
        if flag == Some(true) && !dir.is_empty() {
            *dir = conf_dir.join(&*dir).to_string_lossy().into_owned();
        }
    };
    rebase(
        &mut template.io_dirs.template_output_dir,
        template.io_dirs.template_output_dir_is_relative,
    );
    rebase(
        &mut template.io_dirs.packer_output_dir,
        template.io_dirs.packer_output_dir_is_relative,
    );
    rebase(
        &mut template.io_dirs.source_dir,
        template.io_dirs.source_dir_is_relative,
    );
}

async fn run_build(mut template: RawTemplate) -> Result<PathBuf> {
    let plan = packer::synthesize(&mut template).await?;
    plan.write(&template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{decode_str, Format};

    fn distro_defaults() -> DistroDefaults {
        let defaults: Defaults = decode_str(
            r#"
name = ":build_name.json"
template_output_dir = "out/:build_name"
source_dir = "src"
builder_ids = ["null"]

[builders.null]
settings = ["communicator = ssh", "ssh_username = vagrant", "ssh_password = vagrant"]
"#,
            Format::Toml,
        )
        .unwrap();
        let supported: SupportedDistros = decode_str(
            r#"
[distro.ubuntu]
arch = ["amd64"]
image = ["server"]
release = ["14.04"]
default_image = ["release = 14.04", "image = server", "arch = amd64"]
"#,
            Format::Toml,
        )
        .unwrap();
        DistroDefaults::new(&defaults, &supported)
    }

    #[test]
    fn test_distro_build_derives_name() {
        let dd = distro_defaults();
        let filter = BuildFilter::default();
        let (name, template) =
            distro_build(&dd, "ubuntu", &filter, Path::new("/conf")).unwrap();
        assert_eq!(name, "ubuntu-14.04-amd64-server");
        assert_eq!(template.name, "ubuntu-14.04-amd64-server.json");
    }

    #[test]
    fn test_named_build_requires_distro() {
        let dd = distro_defaults();
        let doc = BuildDoc::default();
        let err = named_build(&dd, "nameless", &doc, Path::new("/conf")).unwrap_err();
        assert!(matches!(err, ForgeError::Config { .. }));
    }

    #[test]
    fn test_resolve_io_dirs_rebases_flagged_paths() {
        let dd = distro_defaults();
        let mut template = dd.template("ubuntu").unwrap();
        template.io_dirs.source_dir = "src".to_string();
        template.io_dirs.source_dir_is_relative = Some(true);
        resolve_io_dirs(&mut template, Path::new("/etc/boxforge"));
        assert_eq!(template.io_dirs.source_dir, "/etc/boxforge/src");
        // Unflagged dirs stay put.
        assert_eq!(template.io_dirs.template_output_dir, "out/:build_name");
    }
}
