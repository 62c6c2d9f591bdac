//! Boxforge - Packer build-plan generator
//!
//! Boxforge turns a layered build configuration into ready-to-execute Packer
//! build plans. A plan is a JSON document enumerating the builders that
//! acquire and boot a base operating-system image, the provisioners that run
//! inside the booted guest, and the post-processors that repackage the
//! produced artifact. Alongside the document, boxforge materializes a
//! self-contained output directory holding every referenced resource:
//! boot/shutdown command files, preseed/HTTP directories, provisioning
//! scripts, uploaded files, and source OVF/VMX images.
//!
//! # Architecture Overview
//!
//! Configuration is layered; later layers win per key:
//!
//! ```text
//! defaults  ⊕  supported-distro profile  ⊕  named build
//!     │
//!     ▼
//! raw template ──► component synthesizers ──► plan + copy ledgers
//!                       │         │                  │
//!                       ▼         ▼                  ▼
//!                source resolver  iso discovery  materializer
//! ```
//!
//! Each named build is assembled into a [`template::RawTemplate`], synthesized
//! into a [`packer::PackerTemplate`], and written out together with its
//! scheduled resources. Builds run concurrently, one task per named build.
//!
//! # Core Modules
//!
//! - [`settings`] - `key = value` parsing, ordered merging, variable
//!   substitution, and shape-preserving array values
//! - [`source`] - layered on-disk resource lookup and output-path building
//! - [`release`] - per-distribution ISO discovery (name, URL, checksum)
//!   against live mirror endpoints
//! - [`template`] - raw-template assembly and the per-kind component
//!   synthesizers
//! - [`packer`] - the emitted plan document and the output materializer
//! - [`build`] - the concurrent build orchestrator
//!
//! # Supporting Modules
//!
//! - [`cli`] - command-line interface (`boxforge build ...`)
//! - [`config`] - configuration documents and their loaders
//! - [`core`] - error taxonomy and user-facing error rendering
//!
//! # Configuration Documents
//!
//! Three documents drive plan generation, each TOML (or JSON/CJSON, see
//! [`config::Format`]):
//!
//! ```toml
//! # defaults.toml - application-level template defaults
//! template_output_dir = "packer_templates/:build_name"
//! source_dir = "src"
//!
//! # supported.toml - one profile per distribution
//! [distro.ubuntu]
//! base_url = "http://releases.ubuntu.com/"
//! arch = ["i386", "amd64"]
//!
//! # builds.toml - named builds
//! [build.1404-amd64-server]
//! distro = "ubuntu"
//! release = "14.04"
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use boxforge::build;
//! use boxforge::config::AppConfig;
//!
//! let conf = AppConfig::from_env()?;
//! build::build_named_templates(&conf, vec!["1404-amd64-server".to_string()]).await?;
//! ```

pub mod build;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod packer;
pub mod release;
pub mod settings;
pub mod source;
pub mod template;

pub use crate::core::error::{user_friendly_error, ErrorContext, ForgeError};

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, ForgeError>;
