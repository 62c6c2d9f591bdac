//! Layered source resolution
//!
//! Resources referenced from a build - provisioning scripts, preseed/HTTP
//! directories, command files, source OVF/VMX images - are located by
//! searching a layered set of candidate locations under the source
//! directory, from the most specific to the least:
//!
//! ```text
//!  1. src/<distro>/<release>/<build_name>/<path>
//!  2. src/<distro>/<release>/<component>/<path>
//!  3. src/<distro>/<release>/<arch>/<path>
//!  4. src/<distro>/<release>/<path>
//!  5. src/<distro>/<arch>/<path>
//!  6. src/<distro>/<build_name>/<path>
//!  7. src/<distro>/<component>/<path>
//!  8. src/<distro>/<path>
//!  9. src/<component>/<path>
//! 10. src/<build_name>/<path>
//! 11. src/<path>
//! ```
//!
//! Steps that include the release are tried with the full release string
//! first and, when the release carries a point version, again with its major
//! prefix (`14.04` also searches `14`). The first existing candidate wins;
//! the search is deterministic for a fixed file-system state.
//!
//! In *example* mode the disk search is skipped entirely: the relative
//! `component/path` form is returned and nothing is scheduled for copy.
//! Command files are exempt - their contents feed the emitted plan, so they
//! are always resolved against the disk.

use crate::constants::{COMMANDS_DIR, COMMAND_FILE_SUFFIX};
use crate::core::error::ForgeError;
use crate::Result;
use std::path::{Path, PathBuf};

/// A resolved source reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolved {
    /// An existing on-disk location that should be scheduled for copy.
    Disk(String),
    /// The relative `component/path` form produced in example mode; nothing
    /// exists on disk and nothing is copied.
    Example(String),
}

impl Resolved {
    /// The resolved path string, whichever variant holds it.
    pub fn as_str(&self) -> &str {
        match self {
            Resolved::Disk(s) | Resolved::Example(s) => s,
        }
    }
}

/// The source-lookup context for one raw template.
///
/// Carries the distro/release/arch/build-name tuple the layered search keys
/// on, together with the output-dir knobs used to compute destinations.
#[derive(Clone, Debug, Default)]
pub struct SourceTree {
    /// Root of the layered source tree.
    pub source_dir: String,
    /// Root of the template output tree (copy destinations).
    pub template_output_dir: String,
    /// Distribution name, e.g. `ubuntu`.
    pub distro: String,
    /// Release string, e.g. `14.04`.
    pub release: String,
    /// Architecture label, e.g. `amd64`.
    pub arch: String,
    /// The named build being generated.
    pub build_name: String,
    /// Whether the component name is interposed as an output subdirectory.
    pub include_component_string: bool,
    /// Example mode: skip disk existence checks, schedule no copies.
    pub example: bool,
}

impl SourceTree {
    /// Locates `path` for `component` through the layered search.
    ///
    /// Returns [`Resolved::Disk`] with the first existing candidate, or
    /// [`Resolved::Example`] in example mode. Directory results carry a
    /// trailing separator. Fails with [`ForgeError::EmptyPath`] for an empty
    /// path and [`ForgeError::SourceNotFound`] when the search is exhausted.
    pub fn find_source(&self, path: &str, component: &str, is_dir: bool) -> Result<Resolved> {
        if path.is_empty() {
            return Err(ForgeError::EmptyPath);
        }
        if self.example {
            let mut rel = join_nonempty(&[component, path]);
            if is_dir && !rel.ends_with('/') {
                rel.push('/');
            }
            return Ok(Resolved::Example(rel));
        }
        let found = self.search_disk(path, component)?;
        let mut s = found.to_string_lossy().into_owned();
        if found.is_dir() && !s.ends_with('/') {
            s.push('/');
        }
        Ok(Resolved::Disk(s))
    }

    /// Resolves `commands/<name>` through the layered search and returns the
    /// on-disk file path. Command files are always disk-checked, even in
    /// example mode.
    pub fn find_command_file(&self, name: &str, component: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(ForgeError::EmptyPath);
        }
        let rel = format!("{COMMANDS_DIR}/{name}");
        self.search_disk(&rel, component)
    }

    /// Loads the named command file and returns its lines, trimmed, with
    /// empty lines dropped.
    pub fn commands_from_file(&self, name: &str, component: &str) -> Result<Vec<String>> {
        let path = self.find_command_file(name, component)?;
        let contents = std::fs::read_to_string(&path)?;
        let lines: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        tracing::debug!(file = %path.display(), lines = lines.len(), "loaded command file");
        Ok(lines)
    }

    /// Computes the on-disk copy destination for `path` under the template
    /// output dir, interposing the lowercased component name when
    /// `include_component_string` is set.
    pub fn build_out_path(&self, component: &str, path: &str) -> String {
        let component = self.component_segment(component);
        join_nonempty(&[&self.template_output_dir, &component, path])
    }

    /// Computes the relative form referenced from the emitted plan for
    /// `path`, with a trailing separator when `is_dir`.
    pub fn build_template_resource_path(&self, component: &str, path: &str, is_dir: bool) -> String {
        let component = self.component_segment(component);
        let mut rel = join_nonempty(&[&component, path]);
        if is_dir && !rel.ends_with('/') {
            rel.push('/');
        }
        rel
    }

    fn component_segment(&self, component: &str) -> String {
        if self.include_component_string {
            component.to_lowercase()
        } else {
            String::new()
        }
    }

    fn search_disk(&self, path: &str, component: &str) -> Result<PathBuf> {
        for candidate in self.candidates(path, component) {
            if candidate.exists() {
                tracing::debug!(path, found = %candidate.display(), "source resolved");
                return Ok(candidate);
            }
        }
        Err(ForgeError::SourceNotFound {
            path: path.to_string(),
        })
    }

    fn candidates(&self, path: &str, component: &str) -> Vec<PathBuf> {
        let src = Path::new(&self.source_dir);
        let distro = self.distro.as_str();
        let arch = self.arch.as_str();
        let build_name = self.build_name.as_str();
        let mut releases: Vec<&str> = vec![self.release.as_str()];
        if let Some((major, _)) = self.release.split_once('.') {
            releases.push(major);
        }
        let mut out: Vec<PathBuf> = Vec::new();
        let mut push = |segments: &[&str]| {
            let mut p = src.to_path_buf();
            for seg in segments {
                if !seg.is_empty() {
                    p.push(seg);
                }
            }
            p.push(path);
            if !out.contains(&p) {
                out.push(p);
            }
        };
        // Release-scoped steps, full release before the major prefix.
        for narrow in [build_name, component, arch, ""] {
            for &rel in &releases {
                if distro.is_empty() || rel.is_empty() {
                    continue;
                }
                push(&[distro, rel, narrow]);
            }
        }
        // Distro-scoped steps.
        if !distro.is_empty() {
            push(&[distro, arch]);
            push(&[distro, build_name]);
            push(&[distro, component]);
            push(&[distro]);
        }
        // Root-scoped steps.
        push(&[component]);
        push(&[build_name]);
        push(&[]);
        out
    }
}

/// Joins non-empty segments with `/`, preserving any separators already
/// inside the segments.
fn join_nonempty(segments: &[&str]) -> String {
    let mut out = String::new();
    for seg in segments {
        if seg.is_empty() {
            continue;
        }
        if !out.is_empty() && !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(seg);
    }
    out
}

/// Returns whether the string references a command file, i.e. names a file
/// with the `.command` extension. A bare `.command` is not a valid
/// reference.
pub fn is_command_filename(s: &str) -> bool {
    match s.strip_suffix(COMMAND_FILE_SUFFIX) {
        Some(stem) => !stem.is_empty() && !stem.ends_with('/'),
        None => false,
    }
}

/// Joins the lines of a multi-line command file into a single command.
///
/// Lines are trimmed; a trailing `\` marks a continuation and is stripped
/// before concatenation. The first line without a trailing `\` terminates
/// the command; any later lines are ignored.
pub fn command_from_lines(lines: &[String]) -> String {
    if lines.len() == 1 {
        return lines[0].clone();
    }
    let mut cmd = String::new();
    for line in lines {
        let line = line.trim();
        match line.strip_suffix('\\') {
            Some(body) => cmd.push_str(body),
            None => {
                cmd.push_str(line);
                return cmd;
            }
        }
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree(root: &TempDir) -> SourceTree {
        SourceTree {
            source_dir: root.path().join("src").to_string_lossy().into_owned(),
            template_output_dir: root.path().join("out").to_string_lossy().into_owned(),
            distro: "ubuntu".to_string(),
            release: "14.04".to_string(),
            arch: "amd64".to_string(),
            build_name: "ubuntu_build".to_string(),
            include_component_string: false,
            example: false,
        }
    }

    fn touch(root: &TempDir, rel: &str) {
        let p = root.path().join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, "x").unwrap();
    }

    #[test]
    fn test_empty_path() {
        let root = TempDir::new().unwrap();
        let t = tree(&root);
        assert!(matches!(
            t.find_source("", "shell", false),
            Err(ForgeError::EmptyPath)
        ));
    }

    #[test]
    fn test_not_found() {
        let root = TempDir::new().unwrap();
        let t = tree(&root);
        match t.find_source("nope.sh", "shell", false) {
            Err(ForgeError::SourceNotFound { path }) => assert_eq!(path, "nope.sh"),
            other => panic!("expected SourceNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_most_specific_wins() {
        let root = TempDir::new().unwrap();
        touch(&root, "src/setup.sh");
        touch(&root, "src/ubuntu/setup.sh");
        touch(&root, "src/ubuntu/14.04/ubuntu_build/setup.sh");
        let t = tree(&root);
        let found = t.find_source("setup.sh", "shell", false).unwrap();
        match found {
            Resolved::Disk(p) => assert!(p.ends_with("src/ubuntu/14.04/ubuntu_build/setup.sh")),
            other => panic!("expected Disk, got {other:?}"),
        }
    }

    #[test]
    fn test_component_layer() {
        let root = TempDir::new().unwrap();
        touch(&root, "src/shell/setup.sh");
        touch(&root, "src/setup.sh");
        let t = tree(&root);
        let found = t.find_source("setup.sh", "shell", false).unwrap();
        assert!(found.as_str().ends_with("src/shell/setup.sh"));
    }

    #[test]
    fn test_release_major_fallback_for_command_file() {
        let root = TempDir::new().unwrap();
        touch(&root, "src/ubuntu/14/commands/ubuntu-14.command");
        let t = tree(&root);
        let found = t.find_command_file("ubuntu-14.command", "shell").unwrap();
        assert!(found
            .to_string_lossy()
            .ends_with("src/ubuntu/14/commands/ubuntu-14.command"));
    }

    #[test]
    fn test_directory_result_has_trailing_separator() {
        let root = TempDir::new().unwrap();
        touch(&root, "src/ubuntu/http/preseed.cfg");
        let t = tree(&root);
        let found = t.find_source("http", "virtualbox-iso", true).unwrap();
        assert!(found.as_str().ends_with("src/ubuntu/http/"));
    }

    #[test]
    fn test_example_mode_skips_disk() {
        let root = TempDir::new().unwrap();
        let mut t = tree(&root);
        t.example = true;
        let found = t.find_source("cookbook1", "chef-solo", true).unwrap();
        assert_eq!(found, Resolved::Example("chef-solo/cookbook1/".to_string()));
        let file = t.find_source("app.tar.gz", "file", false).unwrap();
        assert_eq!(file, Resolved::Example("file/app.tar.gz".to_string()));
    }

    #[test]
    fn test_commands_from_file_trims_and_drops_empty() {
        let root = TempDir::new().unwrap();
        let p = root.path().join("src/commands/boot.command");
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, "<esc><wait>\n\n  <enter><wait>  \n").unwrap();
        let t = tree(&root);
        let lines = t.commands_from_file("boot.command", "virtualbox-iso").unwrap();
        assert_eq!(lines, vec!["<esc><wait>".to_string(), "<enter><wait>".to_string()]);
    }

    #[test]
    fn test_build_out_path() {
        let root = TempDir::new().unwrap();
        let mut t = tree(&root);
        let out = t.template_output_dir.clone();
        assert_eq!(t.build_out_path("shell", "setup.sh"), format!("{out}/setup.sh"));
        t.include_component_string = true;
        assert_eq!(
            t.build_out_path("Shell", "setup.sh"),
            format!("{out}/shell/setup.sh")
        );
    }

    #[test]
    fn test_build_template_resource_path() {
        let root = TempDir::new().unwrap();
        let mut t = tree(&root);
        assert_eq!(t.build_template_resource_path("shell", "setup.sh", false), "setup.sh");
        assert_eq!(t.build_template_resource_path("", "http", true), "http/");
        t.include_component_string = true;
        assert_eq!(
            t.build_template_resource_path("chef-solo", "cookbooks", true),
            "chef-solo/cookbooks/"
        );
    }

    #[test]
    fn test_is_command_filename() {
        assert!(is_command_filename("boot.command"));
        assert!(is_command_filename("execute_test.command"));
        assert!(!is_command_filename(".command"));
        assert!(!is_command_filename("boot.cmd"));
        assert!(!is_command_filename("boot"));
    }

    #[test]
    fn test_command_from_lines_single() {
        let lines = vec!["shutdown -h now".to_string()];
        assert_eq!(command_from_lines(&lines), "shutdown -h now");
    }

    #[test]
    fn test_command_from_lines_continuation() {
        let lines = vec![
            "echo 'vagrant' | \\".to_string(),
            "sudo -S shutdown -h now".to_string(),
            "ignored".to_string(),
        ];
        assert_eq!(
            command_from_lines(&lines),
            "echo 'vagrant' | sudo -S shutdown -h now"
        );
    }

    #[test]
    fn test_command_from_lines_all_continuations() {
        // Every line ends in a continuation: the join has no trailing slash.
        let lines = vec!["a \\".to_string(), "b \\".to_string()];
        assert_eq!(command_from_lines(&lines), "a b ");
    }

    #[test]
    fn test_command_from_lines_empty() {
        assert_eq!(command_from_lines(&[]), "");
    }
}
