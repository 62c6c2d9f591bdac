//! Error handling for boxforge
//!
//! The error system consists of two types:
//! - [`ForgeError`] - enumerated error types for every failure mode in plan
//!   generation. Synthesizers wrap their failures with the owning component's
//!   kind and identifier so a failure inside a deeply-nested setting walk
//!   still names the component that caused it.
//! - [`ErrorContext`] - wrapper that adds a user-friendly message and
//!   actionable suggestion for CLI display.
//!
//! # Propagation policy
//!
//! Synthesizers never swallow errors. A failure while processing a setting is
//! wrapped as [`ForgeError::Setting`] (key and value), then as
//! [`ForgeError::Component`] (kind and id), and surfaces through the
//! orchestrator, which logs it and lets peer builds finish. The CLI renders
//! the full cause chain.
//!
//! # Examples
//!
//! ```rust
//! use boxforge::core::error::ForgeError;
//!
//! let err = ForgeError::RequiredSetting { key: "iso_checksum".into() };
//! assert_eq!(err.to_string(), "iso_checksum: required setting not found");
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for boxforge operations.
///
/// Each variant represents a specific failure mode and carries the
/// identifiers needed to act on it. Variants map one-to-one onto the
/// failure taxonomy of the plan-generation pipeline; IO, decode, and HTTP
/// errors from the ecosystem convert via `#[from]`.
#[derive(Error, Debug)]
pub enum ForgeError {
    /// A setting required by a component's schema was absent after merging.
    #[error("{key}: required setting not found")]
    RequiredSetting {
        /// The schema key that was missing.
        key: String,
    },

    /// A setting typed as integer failed to parse.
    #[error("{key}: invalid integer value {value:?}")]
    InvalidInt {
        /// The setting key being parsed.
        key: String,
        /// The raw value that failed to parse.
        value: String,
        /// The underlying parse failure.
        #[source]
        source: std::num::ParseIntError,
    },

    /// A setting's value was outside the allowed set for that key.
    #[error("{key}: invalid option {value:?}")]
    InvalidOption {
        /// The setting key being validated.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// A synthesizer referenced a component id with no sub-record.
    #[error("component not found: {id}")]
    ComponentNotFound {
        /// The component identifier from the emission ID list.
        id: String,
    },

    /// A builder, provisioner, or post-processor kind is not recognized.
    #[error("unsupported kind: {kind}")]
    UnsupportedKind {
        /// The unrecognized kind string.
        kind: String,
    },

    /// Template assembly saw a distro name with no supported-distro profile.
    #[error("unsupported distro: {distro}")]
    UnsupportedDistro {
        /// The unknown distribution name.
        distro: String,
    },

    /// ISO discovery was invoked without a usable arch or release.
    #[error("iso discovery input missing: {field}")]
    MissingIsoInput {
        /// The empty field (`arch` or `release`).
        field: String,
    },

    /// An HTTP or parse failure during ISO discovery.
    #[error("iso discovery failed")]
    IsoDiscovery {
        /// The underlying transport or parse failure.
        #[source]
        source: Box<ForgeError>,
    },

    /// A checksum page did not contain the image filename.
    #[error("checksum not found for {filename}")]
    ChecksumNotFound {
        /// The ISO filename searched for.
        filename: String,
    },

    /// The source resolver exhausted its layered search path.
    #[error("source not found: {path}")]
    SourceNotFound {
        /// The logical path that could not be located.
        path: String,
    },

    /// A path argument was the empty string.
    #[error("empty path")]
    EmptyPath,

    /// A command file produced zero commands.
    #[error("no commands found in {path}")]
    NoCommands {
        /// The command file that was empty.
        path: String,
    },

    /// The materializer saw two distinct sources for one destination.
    #[error("copy conflict: {dest} scheduled from two sources")]
    CopyConflict {
        /// The contested destination path.
        dest: String,
    },

    /// A failure while processing a single setting; wraps the cause with the
    /// setting's key and raw value.
    #[error("setting {key} = {value:?}")]
    Setting {
        /// The setting key being processed.
        key: String,
        /// The setting's raw value.
        value: String,
        /// The underlying failure.
        #[source]
        source: Box<ForgeError>,
    },

    /// A failure inside a component synthesizer; wraps the cause with the
    /// component's kind and identifier.
    #[error("{kind}: {id}")]
    Component {
        /// The component kind's canonical string.
        kind: String,
        /// The component identifier from the emission ID list.
        id: String,
        /// The underlying failure.
        #[source]
        source: Box<ForgeError>,
    },

    /// Environment or configuration-document failure.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// IO error from [`std::io::Error`].
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML decode error.
    #[error("toml decode error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON encode/decode error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Catch-all for errors that don't fit a specific variant.
    #[error("{message}")]
    Other {
        /// Generic error message.
        message: String,
    },
}

impl ForgeError {
    /// Wraps `self` with the owning component's kind and identifier.
    pub fn for_component(self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        ForgeError::Component {
            kind: kind.into(),
            id: id.into(),
            source: Box::new(self),
        }
    }

    /// Wraps `self` with the setting key and value being processed.
    pub fn for_setting(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        ForgeError::Setting {
            key: key.into(),
            value: value.into(),
            source: Box::new(self),
        }
    }

    /// Wraps `self` as an ISO-discovery failure.
    pub fn into_iso_discovery(self) -> Self {
        ForgeError::IsoDiscovery {
            source: Box::new(self),
        }
    }
}

/// User-facing error wrapper with an optional suggestion and details.
///
/// The CLI converts any error into an `ErrorContext` before display so the
/// user sees a colored, actionable message followed by the cause chain.
pub struct ErrorContext {
    error: ForgeError,
    suggestion: Option<String>,
    details: Option<String>,
}

impl ErrorContext {
    /// Creates a context wrapping `error` with no suggestion or details.
    pub fn new(error: ForgeError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Attaches an actionable suggestion shown after the error message.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attaches explanatory details shown after the suggestion.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Prints the context to stderr with color.
    pub fn display(&self) {
        eprintln!("{} {}", "error:".red().bold(), self.error);
        let mut source = std::error::Error::source(&self.error);
        while let Some(cause) = source {
            eprintln!("  {} {}", "caused by:".yellow(), cause);
            source = cause.source();
        }
        if let Some(suggestion) = &self.suggestion {
            eprintln!("\n{} {}", "suggestion:".green().bold(), suggestion);
        }
        if let Some(details) = &self.details {
            eprintln!("{} {}", "details:".blue(), details);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nsuggestion: {suggestion}")?;
        }
        Ok(())
    }
}

/// Converts any error into a user-friendly [`ErrorContext`] with suggestions
/// tailored to the failure mode.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let error = match error.downcast::<ForgeError>() {
        Ok(forge) => forge,
        Err(other) => ForgeError::Other {
            message: format!("{other:#}"),
        },
    };
    match &error {
        ForgeError::RequiredSetting { key } => {
            let key = key.clone();
            ErrorContext::new(error).with_suggestion(format!(
                "add `{key} = <value>` to the component's settings or its common section"
            ))
        }
        ForgeError::UnsupportedDistro { distro } => {
            let distro = distro.clone();
            ErrorContext::new(error).with_suggestion(format!(
                "add a [distro.{distro}] profile to the supported-distros file"
            ))
        }
        ForgeError::SourceNotFound { .. } => ErrorContext::new(error)
            .with_suggestion("check the source directory layout; resources are searched from the most specific location (distro/release/build) to the least (the source root)"),
        ForgeError::IsoDiscovery { .. } => ErrorContext::new(error)
            .with_suggestion("check network connectivity to the distro mirrors, or set iso_url, iso_checksum, and iso_checksum_type explicitly"),
        ForgeError::Config { .. } => ErrorContext::new(error)
            .with_suggestion("check the BOXFORGE_* environment variables and configuration file paths"),
        _ => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_setting_display() {
        let err = ForgeError::RequiredSetting {
            key: "test_setting".to_string(),
        };
        assert_eq!(err.to_string(), "test_setting: required setting not found");
    }

    #[test]
    fn test_component_wrapping() {
        let err = ForgeError::RequiredSetting {
            key: "iso_checksum".to_string(),
        }
        .for_component("virtualbox-iso", "virtualbox-iso");
        assert_eq!(err.to_string(), "virtualbox-iso: virtualbox-iso");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "iso_checksum: required setting not found");
    }

    #[test]
    fn test_setting_wrapping_chain() {
        let err = ForgeError::NoCommands {
            path: "boot.command".to_string(),
        }
        .for_setting("boot_command", "boot.command")
        .for_component("qemu", "qemu");
        let mut chain = Vec::new();
        let mut cur: Option<&(dyn std::error::Error + 'static)> = Some(&err);
        while let Some(e) = cur {
            chain.push(e.to_string());
            cur = e.source();
        }
        assert_eq!(
            chain,
            vec![
                "qemu: qemu".to_string(),
                "setting boot_command = \"boot.command\"".to_string(),
                "no commands found in boot.command".to_string(),
            ]
        );
    }

    #[test]
    fn test_user_friendly_error_downcast() {
        let err = anyhow::Error::from(ForgeError::EmptyPath);
        let ctx = user_friendly_error(err);
        assert_eq!(ctx.to_string(), "empty path");
    }

    #[test]
    fn test_user_friendly_error_generic() {
        let err = anyhow::anyhow!("something else");
        let ctx = user_friendly_error(err);
        assert!(ctx.to_string().contains("something else"));
    }
}
