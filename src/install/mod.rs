// src/install/mod.rs

//! Install and uninstall orchestration
//!
//! An install walks through fixed states:
//!
//! 1. Resolve the identifier to an archive (package directory, listing,
//!    repository convention, or a plain URL / path)
//! 2. Fetch it into the download directory when it is remote
//! 3. Parse the package name and version from the archive filename
//! 4. Extract into `<install_root>/<lowercased name>/`
//! 5. Commit the name to the registry
//!
//! Any failure aborts the remaining states. The registry is validated before
//! anything is fetched or extracted and is only written after a successful
//! extraction.

use crate::archive::{ArchiveCodec, ArchiveFormat};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::packages::{
    ARCHIVE_SUFFIXES, INSTALLABLE_SUFFIXES, PackageArchive, archive_stem, has_suffix,
    parse_archive_name,
};
use crate::progress::ProgressObserver;
use crate::registry::{InstallRegistry, names_match};
use crate::repository::{Fetcher, RemotePackage, url_filename};
use crate::version::Version;
use std::fs;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use tracing::{debug, info, warn};

/// Metadata file looked up by `package_info`
const METADATA_FILE: &str = "package.json";

/// Archive types tried, in order, when building a repository URL by convention
const CONVENTION_EXTENSIONS: &[&str] = &["tar.xz", "tar.gz"];

/// Where an install identifier points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// `http://` or `https://` URL of an archive
    Url(String),
    /// Path to an archive on disk
    LocalFile(PathBuf),
    /// Bare package name, resolved through the package directory or repository
    Named(String),
}

impl PackageSource {
    /// Classify an identifier
    ///
    /// A URL prefix wins. Anything with a path separator is a local path, as
    /// is a bare archive filename (`app-1.0.tar.gz`) that exists in the
    /// working directory. Everything else is a package name, even when a file
    /// of that name happens to exist.
    pub fn parse(identifier: &str) -> Self {
        let lower = identifier.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return PackageSource::Url(identifier.to_string());
        }

        let has_separator = identifier.contains('/') || identifier.contains(MAIN_SEPARATOR);
        let local_archive =
            has_suffix(identifier, ARCHIVE_SUFFIXES) && Path::new(identifier).is_file();
        if has_separator || local_archive {
            return PackageSource::LocalFile(PathBuf::from(identifier));
        }

        PackageSource::Named(identifier.to_string())
    }
}

/// Outcome of a successful install
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// Package name as parsed from the archive filename
    pub name: String,
    pub version: Version,
    pub install_dir: PathBuf,
    /// Archive that was extracted
    pub archive: PathBuf,
    pub format: ArchiveFormat,
    /// The archive was fetched over the network (and has been removed)
    pub downloaded: bool,
    /// False when the name was already registered
    pub newly_registered: bool,
}

/// Outcome of an uninstall
#[derive(Debug, Clone)]
pub struct UninstallReport {
    pub name: String,
    pub install_dir: PathBuf,
    pub directory_removed: bool,
    pub registry_entries_removed: usize,
}

/// An archive sitting in the local package directory
#[derive(Debug, Clone)]
pub struct LocalPackage {
    pub file_name: String,
    pub path: PathBuf,
    pub name: Option<String>,
    pub version: Option<Version>,
}

/// Installed package details
#[derive(Debug, Clone)]
pub struct PackageInfo {
    /// Name as recorded in the registry
    pub name: String,
    pub install_dir: PathBuf,
    pub directory_exists: bool,
    /// Contents of `package.json`, when present and well-formed
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// Matching registry names
    pub installed: Vec<String>,
    /// Matching archive filenames in the package directory
    pub installable: Vec<String>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty() && self.installable.is_empty()
    }
}

/// Registry and install root disagree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// Registered, but `<install_root>/<name>` is missing
    MissingDirectory(String),
    /// A directory under the install root with no registry entry
    UnregisteredDirectory(String),
}

/// An archive ready for extraction
struct ResolvedArchive {
    path: PathBuf,
    downloaded: bool,
}

/// Orchestrates fetching, extraction and registry bookkeeping
pub struct InstallEngine {
    config: Config,
    registry: InstallRegistry,
    codec: ArchiveCodec,
    fetcher: Fetcher,
}

impl InstallEngine {
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = Fetcher::from_config(&config)?;
        Ok(Self {
            registry: InstallRegistry::new(config.registry_path.clone()),
            codec: ArchiveCodec::new(config.xz_backend),
            fetcher,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &InstallRegistry {
        &self.registry
    }

    /// Directory a package name installs into
    pub fn install_dir(&self, name: &str) -> PathBuf {
        self.config.install_root.join(name.to_lowercase())
    }

    /// Install a package from a name, local path or URL
    pub fn install(
        &self,
        identifier: &str,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<InstallReport> {
        info!("Installing {}", identifier);

        // A corrupt registry must abort before the install root is touched
        self.registry.load()?;

        let resolved = self.resolve(identifier, observer)?;
        let archive = PackageArchive::inspect(&resolved.path)?;

        let (Some(name), Some(version)) = (archive.name, archive.version) else {
            return Err(Error::ArchiveError(format!(
                "Could not determine package name and version from '{}'. Expected <name>-<version>.<ext>",
                display_name(&resolved.path)
            )));
        };
        validate_package_name(&name).map_err(Error::ArchiveError)?;

        let install_dir = self.install_dir(&name);
        let format = self.codec.extract(&resolved.path, &install_dir, observer)?;
        let newly_registered = self.registry.add(&name)?;

        if resolved.downloaded {
            match fs::remove_file(&resolved.path) {
                Ok(()) => debug!("Removed downloaded archive {}", resolved.path.display()),
                Err(e) => warn!(
                    "Failed to remove downloaded archive {}: {}",
                    resolved.path.display(),
                    e
                ),
            }
        }

        info!(
            "Installed {} version {} into {}",
            name,
            version,
            install_dir.display()
        );

        Ok(InstallReport {
            name,
            version,
            install_dir,
            archive: resolved.path,
            format,
            downloaded: resolved.downloaded,
            newly_registered,
        })
    }

    /// Remove a package directory and every registry entry for it
    ///
    /// Neither a missing directory nor a missing registry entry is an error.
    pub fn uninstall(&self, name: &str) -> Result<UninstallReport> {
        validate_package_name(name).map_err(Error::CoreError)?;
        info!("Uninstalling {}", name);

        let registered = self.registry.load()?;
        let display = registered
            .iter()
            .find(|n| names_match(n, name))
            .cloned()
            .unwrap_or_else(|| name.to_string());

        let install_dir = self.install_dir(name);
        let directory_removed = if install_dir.is_dir() {
            fs::remove_dir_all(&install_dir).map_err(|e| {
                Error::CoreError(format!(
                    "Failed to remove {}: {}",
                    install_dir.display(),
                    e
                ))
            })?;
            info!("Removed directory {}", install_dir.display());
            true
        } else {
            debug!("No directory at {}", install_dir.display());
            false
        };

        let registry_entries_removed = self.registry.remove(name)?;
        if !directory_removed && registry_entries_removed == 0 {
            warn!("Package {} was not installed", name);
        }

        Ok(UninstallReport {
            name: display,
            install_dir,
            directory_removed,
            registry_entries_removed,
        })
    }

    /// Installed package names in install order
    pub fn list_installed(&self) -> Result<Vec<String>> {
        self.registry.list()
    }

    /// Archives in the package directory, sorted by filename
    pub fn list_installable(&self) -> Result<Vec<LocalPackage>> {
        let dir = &self.config.package_dir;
        if !dir.is_dir() {
            debug!("Package directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }

        let mut packages = Vec::new();
        let read_error = |e| Error::io("read package directory", dir, e);
        for entry in fs::read_dir(dir).map_err(read_error)? {
            let entry = entry.map_err(read_error)?;
            if !entry.file_type().map_err(read_error)?.is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !has_suffix(&file_name, INSTALLABLE_SUFFIXES) {
                continue;
            }

            let parsed = parse_archive_name(&file_name);
            packages.push(LocalPackage {
                path: entry.path(),
                name: parsed.as_ref().map(|p| p.name.clone()),
                version: parsed.map(|p| p.version),
                file_name,
            });
        }

        packages.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(packages)
    }

    /// Archives published by the configured repository listing
    pub fn list_remote(&self) -> Result<Vec<RemotePackage>> {
        let api_url = self.api_url()?;
        self.fetcher.list_remote_packages(api_url)
    }

    /// Download every published archive into the package directory
    pub fn sync_remote(&self, observer: Option<&dyn ProgressObserver>) -> Result<Vec<PathBuf>> {
        let packages = self.list_remote()?;
        fs::create_dir_all(&self.config.package_dir)
            .map_err(|e| Error::io("create directory", &self.config.package_dir, e))?;

        let mut downloaded = Vec::with_capacity(packages.len());
        for package in packages {
            if validate_package_name(&package.name).is_err() {
                warn!("Skipping listing entry with unsafe name: {}", package.name);
                continue;
            }

            let dest = self.config.package_dir.join(&package.name);
            self.fetcher.download(&package.download_url, &dest, observer)?;
            downloaded.push(dest);
        }

        info!(
            "Fetched {} packages into {}",
            downloaded.len(),
            self.config.package_dir.display()
        );
        Ok(downloaded)
    }

    /// Case-insensitive substring search over installed and installable packages
    pub fn search(&self, query: &str) -> Result<SearchResults> {
        let needle = query.to_lowercase();
        let installed = self.registry.search(query)?;
        let installable = self
            .list_installable()?
            .into_iter()
            .map(|p| p.file_name)
            .filter(|f| f.to_lowercase().contains(&needle))
            .collect();

        Ok(SearchResults {
            installed,
            installable,
        })
    }

    /// Details for an installed package; `None` when it is not registered
    pub fn package_info(&self, name: &str) -> Result<Option<PackageInfo>> {
        let Some(registered) = self
            .registry
            .list()?
            .into_iter()
            .find(|n| names_match(n, name))
        else {
            return Ok(None);
        };

        let install_dir = self.install_dir(&registered);
        let directory_exists = install_dir.is_dir();
        let metadata = if directory_exists {
            read_metadata(&install_dir)
        } else {
            None
        };

        Ok(Some(PackageInfo {
            name: registered,
            install_dir,
            directory_exists,
            metadata,
        }))
    }

    /// Compare the registry with the install root; never repairs anything
    pub fn check_consistency(&self) -> Result<Vec<Inconsistency>> {
        let registered = self.registry.list()?;
        let mut issues = Vec::new();

        for name in &registered {
            if !self.install_dir(name).is_dir() {
                issues.push(Inconsistency::MissingDirectory(name.clone()));
            }
        }

        let mut unregistered = Vec::new();
        let root = &self.config.install_root;
        let read_error = |e| Error::io("read install root", root, e);
        let entries = if root.is_dir() {
            fs::read_dir(root)
                .map_err(read_error)?
                .collect::<std::io::Result<Vec<_>>>()
                .map_err(read_error)?
        } else {
            Vec::new()
        };
        for entry in entries {
            if !entry.file_type().map_err(read_error)?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            if !registered.iter().any(|n| n.to_lowercase() == dir_name) {
                unregistered.push(dir_name);
            }
        }
        unregistered.sort();
        issues.extend(unregistered.into_iter().map(Inconsistency::UnregisteredDirectory));

        if !issues.is_empty() {
            warn!("Found {} registry inconsistencies", issues.len());
        }
        Ok(issues)
    }

    /// Build `<output_base>.tar.gz` or `.tar.xz` from a source path
    pub fn compress(
        &self,
        source: &Path,
        output_base: &Path,
        compression: &str,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<PathBuf> {
        self.codec.compress(source, output_base, compression, observer)
    }

    /// Download a URL to a local path
    pub fn download(
        &self,
        url: &str,
        dest_path: &Path,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<u64> {
        self.fetcher.download(url, dest_path, observer)
    }

    fn api_url(&self) -> Result<&str> {
        self.config
            .repository_api_url
            .as_deref()
            .ok_or_else(|| Error::CoreError("No repository listing URL is configured".to_string()))
    }

    fn resolve(
        &self,
        identifier: &str,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<ResolvedArchive> {
        match PackageSource::parse(identifier) {
            PackageSource::LocalFile(path) => {
                if !path.is_file() {
                    return Err(Error::InvalidSourceError(format!(
                        "The package file '{}' does not exist",
                        path.display()
                    )));
                }
                Ok(ResolvedArchive {
                    path,
                    downloaded: false,
                })
            }
            PackageSource::Url(url) => {
                let file_name = url_filename(&url).ok_or_else(|| {
                    Error::ArchiveError(format!("Cannot determine archive name from URL {}", url))
                })?;
                let dest = self.config.download_dir.join(file_name);
                self.fetcher.download(&url, &dest, observer)?;
                Ok(ResolvedArchive {
                    path: dest,
                    downloaded: true,
                })
            }
            PackageSource::Named(name) => {
                if let Some(path) = self.find_local(&name)? {
                    info!("Using local archive {}", path.display());
                    return Ok(ResolvedArchive {
                        path,
                        downloaded: false,
                    });
                }
                let path = self.fetch_remote(&name, observer)?;
                Ok(ResolvedArchive {
                    path,
                    downloaded: true,
                })
            }
        }
    }

    /// Best matching archive in the package directory
    fn find_local(&self, name: &str) -> Result<Option<PathBuf>> {
        let candidates = self
            .list_installable()?
            .into_iter()
            .map(|p| (p.file_name, p.path))
            .collect();
        Ok(pick_best(name, candidates))
    }

    /// Download a named package from the repository
    fn fetch_remote(&self, name: &str, observer: Option<&dyn ProgressObserver>) -> Result<PathBuf> {
        if let Some(api_url) = self.config.repository_api_url.as_deref() {
            match self.fetcher.list_remote_packages(api_url) {
                Ok(listing) => {
                    let candidates = listing.into_iter().map(|p| (p.name.clone(), p)).collect();
                    if let Some(package) = pick_best(name, candidates) {
                        validate_package_name(&package.name).map_err(Error::NetworkError)?;
                        let dest = self.config.download_dir.join(&package.name);
                        self.fetcher.download(&package.download_url, &dest, observer)?;
                        return Ok(dest);
                    }
                    debug!("{} is not in the repository listing", name);
                }
                Err(e) => warn!("Repository listing unavailable ({}), trying direct download", e),
            }
        }

        let base = self.config.repository_url.trim_end_matches('/');
        let mut last_error = None;
        for extension in CONVENTION_EXTENSIONS {
            let file_name = format!("{}.{}", name, extension);
            let url = format!("{}/{}", base, file_name);
            let dest = self.config.download_dir.join(&file_name);

            match self.fetcher.download(&url, &dest, observer) {
                Ok(_) => return Ok(dest),
                Err(e) => {
                    debug!("Download of {} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::NetworkError(format!("Package {} could not be downloaded", name))
        }))
    }
}

/// Pick the archive best matching `identifier` from `(filename, item)` pairs
///
/// A filename whose stem equals the identifier beats one whose parsed name
/// does; within a group the highest version wins, then the first filename.
fn pick_best<T>(identifier: &str, candidates: Vec<(String, T)>) -> Option<T> {
    candidates
        .into_iter()
        .filter_map(|(file_name, item)| {
            let exact = archive_stem(&file_name).is_some_and(|stem| names_match(stem, identifier));
            let parsed = parse_archive_name(&file_name);
            let by_name = parsed.as_ref().is_some_and(|p| names_match(&p.name, identifier));
            if !exact && !by_name {
                return None;
            }
            Some((exact, parsed.map(|p| p.version), file_name, item))
        })
        .max_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| b.2.cmp(&a.2))
        })
        .map(|(_, _, _, item)| item)
}

/// Reject names that would escape the install root
fn validate_package_name(name: &str) -> std::result::Result<(), String> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        Err(format!("Invalid package name '{}'", name))
    } else {
        Ok(())
    }
}

/// `package.json` at the top of an install directory or one level down
fn read_metadata(install_dir: &Path) -> Option<serde_json::Map<String, serde_json::Value>> {
    let path = find_metadata(install_dir)?;

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!("Ignoring malformed metadata {}: {}", path.display(), e);
            None
        }
    }
}

fn find_metadata(install_dir: &Path) -> Option<PathBuf> {
    let top = install_dir.join(METADATA_FILE);
    if top.is_file() {
        return Some(top);
    }

    let mut subdirs: Vec<PathBuf> = fs::read_dir(install_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();

    subdirs
        .into_iter()
        .map(|dir| dir.join(METADATA_FILE))
        .find(|path| path.is_file())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
