// src/lib.rs

//! DPMS - Discovery Package Manager
//!
//! Installs packages shipped as compressed archives into a per-package
//! directory and keeps a flat registry of what is installed.
//!
//! # Architecture
//!
//! - Archives: tar, tar.gz, tar.xz and zip, detected from content
//! - Registry: a single JSON array of package names, atomically rewritten
//! - Layout: `<install_root>/<lowercased name>/` per package
//! - Repository: plain HTTP(S) downloads plus a JSON directory listing

pub mod archive;
pub mod config;
mod error;
pub mod install;
pub mod packages;
pub mod progress;
pub mod registry;
pub mod repository;
pub mod version;

pub use config::Config;
pub use error::{Error, Result};
pub use install::InstallEngine;
pub use version::Version;
