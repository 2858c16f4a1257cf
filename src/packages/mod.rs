// src/packages/mod.rs

//! Package archive naming
//!
//! Archives are named `<name>-<version>.<ext>`, e.g. `myapp-1.2.3.tar.gz`.
//! This module pulls the package name and version back out of such a
//! filename and bundles them with the detected archive format.

use crate::archive::{self, ArchiveFormat};
use crate::error::Result;
use crate::version::Version;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Archive suffixes recognized when scanning a package directory,
/// longest first so `.tar.gz` wins over `.tar`
pub const ARCHIVE_SUFFIXES: &[&str] = &[
    ".tar.bz2", ".tar.gz", ".tar.xz", ".tbz2", ".tgz", ".txz", ".tar", ".zip", ".dpm",
];

/// Suffixes picked up from the local package directory; bzip2 archives are
/// recognized by name but cannot be extracted
pub const INSTALLABLE_SUFFIXES: &[&str] = &[
    ".tar.gz", ".tar.xz", ".tgz", ".txz", ".tar", ".zip", ".dpm",
];

/// Suffixes served by a remote repository
pub const REMOTE_SUFFIXES: &[&str] = &[".tar.xz", ".tar.gz"];

/// Name and version parsed from an archive filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub name: String,
    pub version: Version,
    /// Extension as written in the filename (e.g. "tar.gz", "ZIP")
    pub extension: String,
}

/// Filename grammar: `<name>-<digits>(.<digits>)*.<ext>`
///
/// The name group is lazy so it stops at the first `-<version>.<ext>` that
/// completes a match.
fn archive_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)^(.+?)-(\d+(?:\.\d+)*)\.(dpm|zip|tar(?:\.gz|\.bz2|\.xz)?|tgz|tbz2|txz)$")
                .ok()
        })
        .as_ref()
}

/// Parse `(name, version)` from an archive filename
///
/// Returns `None` when the filename does not follow the naming grammar;
/// callers decide whether that is fatal.
pub fn parse_archive_name(filename: &str) -> Option<ArchiveName> {
    let captures = archive_name_pattern()?.captures(filename)?;

    let name = captures.get(1)?.as_str();
    let version = match captures.get(2)?.as_str().parse::<Version>() {
        Ok(version) => version,
        Err(e) => {
            debug!("Rejecting archive name {}: {}", filename, e);
            return None;
        }
    };
    let extension = captures.get(3)?.as_str();

    Some(ArchiveName {
        name: name.to_string(),
        version,
        extension: extension.to_string(),
    })
}

/// Strip a recognized archive suffix, e.g. `foo.tar.xz` -> `foo`
pub fn archive_stem(filename: &str) -> Option<&str> {
    let lower = filename.to_ascii_lowercase();
    ARCHIVE_SUFFIXES
        .iter()
        .find(|suffix| lower.ends_with(*suffix) && lower.len() > suffix.len())
        .map(|suffix| &filename[..filename.len() - suffix.len()])
}

/// Whether a filename carries one of the given suffixes (case-insensitive)
pub fn has_suffix(filename: &str, suffixes: &[&str]) -> bool {
    let lower = filename.to_ascii_lowercase();
    suffixes.iter().any(|suffix| lower.ends_with(suffix))
}

/// An archive on disk, inspected but not yet extracted
#[derive(Debug, Clone)]
pub struct PackageArchive {
    pub path: PathBuf,
    pub format: ArchiveFormat,
    pub name: Option<String>,
    pub version: Option<Version>,
}

impl PackageArchive {
    /// Detect the format and parse the filename of an archive
    pub fn inspect(path: &Path) -> Result<Self> {
        let format = archive::detect(path)?;
        let parsed = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_archive_name);

        debug!(
            "Inspected {}: format {:?}, parsed {:?}",
            path.display(),
            format,
            parsed.as_ref().map(|p| (&p.name, p.version.to_string()))
        );

        let (name, version) = match parsed {
            Some(parsed) => (Some(parsed.name), Some(parsed.version)),
            None => (None, None),
        };

        Ok(Self {
            path: path.to_path_buf(),
            format,
            name,
            version,
        })
    }

    /// Directory name used under the install root
    pub fn install_dir_name(&self) -> Option<String> {
        self.name.as_ref().map(|n| n.to_lowercase())
    }
}
