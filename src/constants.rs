//! Global constants used throughout the boxforge codebase.
//!
//! Timeouts, reserved identifiers, and wire-level literals that are shared
//! across modules live here so they are discoverable in one place.

use std::time::Duration;

/// Per-request timeout applied to every ISO-discovery HTTP call.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Reserved component identifier whose settings are merged into every other
/// component of the same family before per-kind synthesis. Never emitted.
pub const COMMON_ID: &str = "common";

/// Setting key that survives an unset marker during merges because ISO
/// discovery fills it at synthesis time.
pub const GUEST_OS_TYPE: &str = "guest_os_type";

/// Default variable-substitution delimiter (`:name` tokens).
pub const DEFAULT_DELIM: &str = ":";

/// Filename suffix marking a setting value as a command file reference.
pub const COMMAND_FILE_SUFFIX: &str = ".command";

/// Subdirectory of the source tree searched for command files.
pub const COMMANDS_DIR: &str = "commands";

/// HTTP directory name assumed when a builder exposes `http_directory`
/// without setting it.
pub const DEFAULT_HTTP_DIR: &str = "http";

/// CentOS mirrorlist endpoint used to resolve a bare major release number.
pub const CENTOS_MIRRORLIST_URL: &str = "http://mirrorlist.centos.org/";

/// CentOS isoredirect endpoint scraped for candidate mirrors when no
/// base URL is configured.
pub const CENTOS_ISOREDIRECT_URL: &str = "http://isoredirect.centos.org/centos/";

/// Default Debian CD-image base URL.
pub const DEBIAN_BASE_URL: &str = "http://cdimage.debian.org/debian-cd/";

/// Default Ubuntu release base URL.
pub const UBUNTU_BASE_URL: &str = "http://releases.ubuntu.com/";
