//! Configuration documents and their loaders
//!
//! Three documents drive plan generation:
//! - **defaults** - application-level template defaults applied to every
//!   build
//! - **supported distros** - one profile per distribution: supported
//!   arches/images/releases, the default image selection, and distro-level
//!   template overrides
//! - **builds** - the named builds, each a sparse raw-template seed overlaid
//!   onto `defaults ⊕ distro`
//!
//! A fourth, optional document, **build lists**, names groups of builds so a
//! whole set can be generated with one command.
//!
//! File locations come from the environment ([`AppConfig::from_env`]); the
//! file encoding is TOML, JSON, or CJSON (JSON with comments), selected by
//! `BOXFORGE_FORMAT`. The documents decode into the shared template records
//! defined in [`crate::template`].

use crate::core::error::ForgeError;
use crate::template::{Build, BuildInf, IoDirInf, PackerInf};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming the defaults document.
pub const ENV_DEFAULTS_FILE: &str = "BOXFORGE_DEFAULTS_FILE";
/// Environment variable naming the supported-distros document.
pub const ENV_SUPPORTED_FILE: &str = "BOXFORGE_SUPPORTED_FILE";
/// Environment variable naming the builds document.
pub const ENV_BUILDS_FILE: &str = "BOXFORGE_BUILDS_FILE";
/// Environment variable naming the optional build-lists document.
pub const ENV_BUILD_LISTS_FILE: &str = "BOXFORGE_BUILD_LISTS_FILE";
/// Environment variable naming the log directory.
pub const ENV_LOG_DIR: &str = "BOXFORGE_LOG_DIR";
/// Environment variable selecting the document encoding.
pub const ENV_FORMAT: &str = "BOXFORGE_FORMAT";

/// Supported document encodings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    /// TOML (the default).
    #[default]
    Toml,
    /// Plain JSON.
    Json,
    /// JSON with `//` and `/* */` comments.
    Cjson,
}

impl FromStr for Format {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "toml" => Ok(Format::Toml),
            "json" => Ok(Format::Json),
            "cjson" => Ok(Format::Cjson),
            other => Err(ForgeError::Config {
                message: format!("unknown format {other:?}; expected toml, json, or cjson"),
            }),
        }
    }
}

/// Application-level template defaults; the bottom layer of every build.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Defaults {
    /// IO directory settings.
    #[serde(flatten)]
    pub io_dirs: IoDirInf,
    /// Packer template metadata.
    #[serde(flatten)]
    pub packer: PackerInf,
    /// Build naming metadata.
    #[serde(flatten)]
    pub build_inf: BuildInf,
    /// Default component families and ID lists.
    #[serde(flatten)]
    pub build: Build,
}

impl Defaults {
    /// Loads the defaults document named by [`ENV_DEFAULTS_FILE`].
    pub fn load(conf: &AppConfig) -> Result<Self> {
        decode_file(&conf.defaults_file, conf.format)
    }
}

/// Profile of one supported distribution.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SupportedDistro {
    /// Distro-level IO overrides.
    #[serde(flatten)]
    pub io_dirs: IoDirInf,
    /// Distro-level template metadata overrides.
    #[serde(flatten)]
    pub packer: PackerInf,
    /// Distro-level build metadata (base URL, mirror hints).
    #[serde(flatten)]
    pub build_inf: BuildInf,
    /// Supported architecture labels; labels differ per distro
    /// (`amd64` versus `x86_64`).
    #[serde(default)]
    pub arch: Vec<String>,
    /// Supported ISO image types, e.g. `server`, `minimal`.
    #[serde(default)]
    pub image: Vec<String>,
    /// Supported releases available from the distribution's mirrors.
    #[serde(default)]
    pub release: Vec<String>,
    /// `key = value` entries selecting the default arch/image/release when a
    /// build does not specify them.
    #[serde(default)]
    pub default_image: Vec<String>,
    /// Distro-level component overrides.
    #[serde(flatten)]
    pub build: Build,
}

/// The supported-distros document: distro name to profile.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SupportedDistros {
    /// One profile per distribution.
    #[serde(default)]
    pub distro: HashMap<String, SupportedDistro>,
}

impl SupportedDistros {
    /// Loads the document named by [`ENV_SUPPORTED_FILE`].
    pub fn load(conf: &AppConfig) -> Result<Self> {
        decode_file(&conf.supported_file, conf.format)
    }
}

/// A named build: a sparse raw-template seed overlaid onto the distro
/// defaults.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BuildDoc {
    /// Target distribution name.
    #[serde(default)]
    pub distro: String,
    /// Architecture override; the distro default applies when empty.
    #[serde(default)]
    pub arch: String,
    /// Image-type override.
    #[serde(default)]
    pub image: String,
    /// Release override.
    #[serde(default)]
    pub release: String,
    /// Template metadata overrides.
    #[serde(flatten)]
    pub packer: PackerInf,
    /// Build naming overrides.
    #[serde(flatten)]
    pub build_inf: BuildInf,
    /// IO overrides.
    #[serde(flatten)]
    pub io_dirs: IoDirInf,
    /// Component overrides.
    #[serde(flatten)]
    pub build: Build,
}

/// The builds document: build name to seed.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Builds {
    /// The named builds.
    #[serde(default)]
    pub build: HashMap<String, BuildDoc>,
}

impl Builds {
    /// Loads the document named by [`ENV_BUILDS_FILE`].
    pub fn load(conf: &AppConfig) -> Result<Self> {
        decode_file(&conf.builds_file, conf.format)
    }
}

/// A named group of builds.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BuildList {
    /// The build names in the group.
    #[serde(default)]
    pub builds: Vec<String>,
}

/// The build-lists document: list name to group.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BuildLists {
    /// The named lists.
    #[serde(default)]
    pub list: HashMap<String, BuildList>,
}

impl BuildLists {
    /// Loads the document named by [`ENV_BUILD_LISTS_FILE`], when set.
    pub fn load(conf: &AppConfig) -> Result<Option<Self>> {
        match &conf.build_lists_file {
            Some(path) => Ok(Some(decode_file(path, conf.format)?)),
            None => Ok(None),
        }
    }
}

/// Resolved application environment: document locations and encoding.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Path of the defaults document.
    pub defaults_file: PathBuf,
    /// Path of the supported-distros document.
    pub supported_file: PathBuf,
    /// Path of the builds document.
    pub builds_file: PathBuf,
    /// Path of the optional build-lists document.
    pub build_lists_file: Option<PathBuf>,
    /// Directory log files are written into, when set.
    pub log_dir: Option<PathBuf>,
    /// Document encoding.
    pub format: Format,
}

impl AppConfig {
    /// Resolves the application environment from `BOXFORGE_*` variables.
    ///
    /// The three primary documents are required; the build-lists document
    /// and the log directory are optional.
    pub fn from_env() -> Result<Self> {
        let format = match std::env::var(ENV_FORMAT) {
            Ok(v) => v.parse()?,
            Err(_) => Format::default(),
        };
        Ok(Self {
            defaults_file: required_env(ENV_DEFAULTS_FILE)?,
            supported_file: required_env(ENV_SUPPORTED_FILE)?,
            builds_file: required_env(ENV_BUILDS_FILE)?,
            build_lists_file: std::env::var(ENV_BUILD_LISTS_FILE).ok().map(PathBuf::from),
            log_dir: std::env::var(ENV_LOG_DIR).ok().map(PathBuf::from),
            format,
        })
    }
}

fn required_env(name: &str) -> Result<PathBuf> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(PathBuf::from(v)),
        _ => Err(ForgeError::Config {
            message: format!("{name} is not set; point it at the configuration file"),
        }),
    }
}

/// Reads and decodes a configuration file in the selected format.
pub fn decode_file<T: DeserializeOwned>(path: &Path, format: Format) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|e| ForgeError::Config {
        message: format!("cannot read {}: {e}", path.display()),
    })?;
    decode_str(&contents, format)
}

/// Decodes a document from a string in the selected format.
pub fn decode_str<T: DeserializeOwned>(contents: &str, format: Format) -> Result<T> {
    match format {
        Format::Toml => Ok(toml::from_str(contents)?),
        Format::Json => Ok(serde_json::from_str(contents)?),
        Format::Cjson => {
            let stripped = strip_json_comments(contents);
            Ok(serde_json::from_str(&stripped)?)
        }
    }
}

/// Removes `//` line comments and `/* */` block comments from CJSON input.
/// String literals are respected; comment characters inside them survive.
fn strip_json_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' => match chars.peek() {
                Some('/') => {
                    for next in chars.by_ref() {
                        if next == '\n' {
                            out.push('\n');
                            break;
                        }
                    }
                }
                Some('*') => {
                    chars.next();
                    let mut prev = ' ';
                    for next in chars.by_ref() {
                        if prev == '*' && next == '/' {
                            break;
                        }
                        prev = next;
                    }
                }
                _ => out.push(c),
            },
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_str() {
        assert_eq!("toml".parse::<Format>().unwrap(), Format::Toml);
        assert_eq!("JSON".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("cjson".parse::<Format>().unwrap(), Format::Cjson);
        assert!("yaml".parse::<Format>().is_err());
    }

    #[test]
    fn test_strip_json_comments() {
        let input = r#"{
  // line comment
  "url": "http://example.com", /* block */
  "note": "a // literal /* inside */ string"
}"#;
        let stripped = strip_json_comments(input);
        let v: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(v["url"], "http://example.com");
        assert_eq!(v["note"], "a // literal /* inside */ string");
    }

    #[test]
    fn test_decode_defaults_toml() {
        let doc = r#"
description = "Default template"
min_packer_version = "0.4.0"
name = ":build_name"
template_output_dir = "packer_templates/:build_name"
source_dir = "src"

builder_ids = ["virtualbox-iso"]

[builders.common]
settings = [
  "boot_wait = 5s",
  "ssh_username = vagrant",
]

[builders.virtualbox-iso.arrays]
vboxmanage = ["memory=1024"]
"#;
        let d: Defaults = decode_str(doc, Format::Toml).unwrap();
        assert_eq!(d.packer.description, "Default template");
        assert_eq!(d.io_dirs.template_output_dir, "packer_templates/:build_name");
        assert_eq!(d.build.builder_ids, vec!["virtualbox-iso".to_string()]);
        let common = d.build.builders.get("common").unwrap();
        assert_eq!(common.section.settings.len(), 2);
        let vbox = d.build.builders.get("virtualbox-iso").unwrap();
        assert!(vbox.section.arrays.contains_key("vboxmanage"));
    }

    #[test]
    fn test_decode_supported_distros() {
        let doc = r#"
[distro.ubuntu]
base_url = "http://releases.ubuntu.com/"
arch = ["i386", "amd64"]
image = ["server"]
release = ["12.04", "14.04"]
default_image = ["release = 14.04", "image = server", "arch = amd64"]
"#;
        let s: SupportedDistros = decode_str(doc, Format::Toml).unwrap();
        let ubuntu = s.distro.get("ubuntu").unwrap();
        assert_eq!(ubuntu.build_inf.base_url, "http://releases.ubuntu.com/");
        assert_eq!(ubuntu.release.len(), 2);
        assert_eq!(ubuntu.default_image.len(), 3);
    }

    #[test]
    fn test_decode_builds_json() {
        let doc = r#"{
  "build": {
    "1404-amd64-server": {
      "distro": "ubuntu",
      "release": "14.04",
      "arch": "amd64"
    }
  }
}"#;
        let b: Builds = decode_str(doc, Format::Json).unwrap();
        let build = b.build.get("1404-amd64-server").unwrap();
        assert_eq!(build.distro, "ubuntu");
        assert_eq!(build.release, "14.04");
    }

    #[test]
    fn test_decode_build_lists() {
        let doc = r#"
[list.lts]
builds = ["1204-amd64-server", "1404-amd64-server"]
"#;
        let l: BuildLists = decode_str(doc, Format::Toml).unwrap();
        assert_eq!(l.list.get("lts").unwrap().builds.len(), 2);
    }
}
