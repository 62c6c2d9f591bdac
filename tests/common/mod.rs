//! Shared fixtures for boxforge integration tests.

// Allow dead code because these helpers are shared across test files and
// not every test file uses every helper.
#![allow(dead_code)]

use boxforge::config::{AppConfig, Format};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A configuration-and-source-tree fixture rooted in a tempdir.
pub struct Fixture {
    pub root: TempDir,
    pub conf: AppConfig,
}

impl Fixture {
    /// Writes the three configuration documents and returns the resolved
    /// app config pointing at them.
    pub fn new(defaults: &str, supported: &str, builds: &str) -> Self {
        let root = TempDir::new().expect("create fixture tempdir");
        let conf_dir = root.path().join("conf");
        fs::create_dir_all(&conf_dir).expect("create conf dir");
        let defaults_file = conf_dir.join("defaults.toml");
        let supported_file = conf_dir.join("supported.toml");
        let builds_file = conf_dir.join("builds.toml");
        fs::write(&defaults_file, defaults).expect("write defaults");
        fs::write(&supported_file, supported).expect("write supported");
        fs::write(&builds_file, builds).expect("write builds");
        let conf = AppConfig {
            defaults_file,
            supported_file,
            builds_file,
            build_lists_file: None,
            log_dir: None,
            format: Format::Toml,
        };
        Self { root, conf }
    }

    /// Adds a build-lists document to the fixture.
    pub fn with_build_lists(mut self, build_lists: &str) -> Self {
        let path = self.conf.defaults_file.parent().unwrap().join("build_lists.toml");
        fs::write(&path, build_lists).expect("write build lists");
        self.conf.build_lists_file = Some(path);
        self
    }

    /// Writes a file into the fixture's source tree, creating parents.
    pub fn add_source(&self, rel: &str, contents: &str) {
        let path = self.src_dir().join(rel);
        fs::create_dir_all(path.parent().unwrap()).expect("create source parents");
        fs::write(path, contents).expect("write source file");
    }

    /// The source tree root (`<root>/src`).
    pub fn src_dir(&self) -> PathBuf {
        self.root.path().join("src")
    }

    /// The output tree root (`<root>/out`).
    pub fn out_dir(&self) -> PathBuf {
        self.root.path().join("out")
    }

    /// Escapes a path for inlining into a TOML document.
    pub fn toml_path(path: &Path) -> String {
        path.to_string_lossy().replace('\\', "\\\\")
    }
}
