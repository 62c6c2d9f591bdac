//! Core types for boxforge
//!
//! This module holds the error taxonomy shared by every stage of plan
//! generation and the user-facing error rendering used by the CLI.
//!
//! The error system follows two principles:
//! - **Strongly-typed errors** ([`ForgeError`]) for precise handling in code,
//!   with each variant carrying the contextual identifiers (setting key,
//!   component id, path) a user needs to act on the failure.
//! - **User-friendly messages** ([`ErrorContext`]) with suggestions, rendered
//!   with color by the CLI before exiting nonzero.

pub mod error;

pub use error::{user_friendly_error, ErrorContext, ForgeError};
