// src/archive/compress.rs

//! Building tar.gz and tar.xz archives from a source tree
//!
//! Entries are stored relative to the *parent* of the source, so packing
//! `/src/myapp` yields entries under `myapp/`.

use crate::error::{Error, Result};
use crate::progress::{Progress, ProgressObserver, Stage};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use tracing::{debug, info};
use walkdir::WalkDir;
use xz2::write::XzEncoder;

/// xz preset used by the native encoder (same default as the xz tool)
const XZ_PRESET: u32 = 6;

/// Supported output compressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    Gz,
    Xz,
}

impl CompressionKind {
    pub fn as_str(&self) -> &str {
        match self {
            CompressionKind::Gz => "gz",
            CompressionKind::Xz => "xz",
        }
    }

    /// Archive extension appended to the output base name
    pub fn extension(&self) -> &str {
        match self {
            CompressionKind::Gz => "tar.gz",
            CompressionKind::Xz => "tar.xz",
        }
    }
}

impl FromStr for CompressionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gz" => Ok(CompressionKind::Gz),
            "xz" => Ok(CompressionKind::Xz),
            _ => Err(Error::UnsupportedCompressionError(format!(
                "Invalid compression type '{}'. Please use 'gz' or 'xz'",
                s
            ))),
        }
    }
}

/// Which implementation produces tar.xz archives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XzBackend {
    /// In-process tar + xz2 encoder
    #[default]
    Native,
    /// The system `tar` with `-J`
    External,
}

/// Something that can pack a source path into an archive file
pub trait Compressor {
    fn compress(&self, source: &Path, archive_path: &Path, progress: Progress<'_>) -> Result<()>;
}

/// Packs archives in-process with the tar crate
pub struct NativeCompressor {
    kind: CompressionKind,
}

impl NativeCompressor {
    pub fn new(kind: CompressionKind) -> Self {
        Self { kind }
    }

    fn write_entries<W: Write>(
        builder: &mut tar::Builder<W>,
        source: &Path,
        base: &Path,
        progress: Progress<'_>,
    ) -> Result<()> {
        let total = count_files(source)?;
        let mut done = 0u64;
        progress.report(0, Some(total));

        for entry in WalkDir::new(source).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                Error::CoreError(format!("Failed to walk {}: {}", source.display(), e))
            })?;

            let relative = entry.path().strip_prefix(base).map_err(|e| {
                Error::CoreError(format!(
                    "Failed to compute archive path for {}: {}",
                    entry.path().display(),
                    e
                ))
            })?;
            if relative.as_os_str().is_empty() {
                continue;
            }

            let appended = if entry.file_type().is_dir() {
                builder.append_dir(relative, entry.path())
            } else {
                builder.append_path_with_name(entry.path(), relative)
            };
            appended.map_err(|e| {
                Error::CoreError(format!("Failed to add {} to archive: {}", relative.display(), e))
            })?;

            if !entry.file_type().is_dir() {
                done += 1;
                progress.report(done, Some(total));
            }
        }

        Ok(())
    }
}

impl Compressor for NativeCompressor {
    fn compress(&self, source: &Path, archive_path: &Path, progress: Progress<'_>) -> Result<()> {
        let base = archive_base(source);
        let file = File::create(archive_path).map_err(|e| {
            Error::CoreError(format!("Failed to create {}: {}", archive_path.display(), e))
        })?;

        let finish_error =
            |e: std::io::Error| Error::CoreError(format!("Failed to finish archive: {}", e));

        match self.kind {
            CompressionKind::Gz => {
                let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
                builder.follow_symlinks(false);
                Self::write_entries(&mut builder, source, &base, progress)?;
                builder.into_inner().map_err(finish_error)?.finish().map_err(finish_error)?;
            }
            CompressionKind::Xz => {
                let mut builder = tar::Builder::new(XzEncoder::new(file, XZ_PRESET));
                builder.follow_symlinks(false);
                Self::write_entries(&mut builder, source, &base, progress)?;
                builder.into_inner().map_err(finish_error)?.finish().map_err(finish_error)?;
            }
        }

        Ok(())
    }
}

/// Packs tar.xz archives by running the system `tar -J`
pub struct ExternalTarCompressor {
    program: PathBuf,
}

impl ExternalTarCompressor {
    pub fn new() -> Self {
        Self::with_program("tar")
    }

    /// Use a specific tar executable
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ExternalTarCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for ExternalTarCompressor {
    fn compress(&self, source: &Path, archive_path: &Path, progress: Progress<'_>) -> Result<()> {
        let base = archive_base(source);
        let name = source.file_name().ok_or_else(|| {
            Error::InvalidSourceError(format!("'{}' has no final component", source.display()))
        })?;
        let archive_path = std::path::absolute(archive_path)
            .map_err(|e| Error::io("resolve", archive_path, e))?;

        let mut command = Command::new(&self.program);
        command
            .arg("-c")
            .arg("-J")
            .arg("-f")
            .arg(&archive_path)
            .arg("-C")
            .arg(if base.as_os_str().is_empty() { Path::new(".") } else { base.as_path() })
            .arg(name);

        debug!("Executing command: {:?}", command);
        progress.report(0, Some(1));

        let output = command.output().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::SubprocessError {
                message: format!("The '{}' command was not found", self.program.display()),
                stdout: None,
                stderr: Some("Please ensure tar and xz are installed and in your PATH".to_string()),
                status: None,
            },
            _ => Error::SubprocessError {
                message: format!("Failed to run '{}': {}", self.program.display(), e),
                stdout: None,
                stderr: None,
                status: None,
            },
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        debug!("Command stdout: {}", stdout);
        debug!("Command stderr: {}", stderr);

        if !output.status.success() {
            return Err(Error::SubprocessError {
                message: "An error occurred during xz compression".to_string(),
                stdout: Some(stdout),
                stderr: Some(stderr),
                status: output.status.code(),
            });
        }

        progress.report(1, Some(1));
        Ok(())
    }
}

/// Entries are named relative to this directory
fn archive_base(source: &Path) -> PathBuf {
    source.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn count_files(source: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(source) {
        let entry = entry
            .map_err(|e| Error::CoreError(format!("Failed to walk {}: {}", source.display(), e)))?;
        if !entry.file_type().is_dir() {
            total += 1;
        }
    }
    Ok(total)
}

/// Archive filename for an output base name, e.g. `out/foo` -> `out/foo.tar.gz`
pub fn archive_filename(output_base: &Path, kind: CompressionKind) -> PathBuf {
    let mut name = output_base.as_os_str().to_os_string();
    name.push(".");
    name.push(kind.extension());
    PathBuf::from(name)
}

/// Compress `source` into `<output_base>.tar.gz` or `<output_base>.tar.xz`
pub fn compress(
    source: &Path,
    output_base: &Path,
    compression: &str,
    xz_backend: XzBackend,
    observer: Option<&dyn ProgressObserver>,
) -> Result<PathBuf> {
    if !source.exists() {
        return Err(Error::InvalidSourceError(format!(
            "The source path '{}' does not exist",
            source.display()
        )));
    }

    let kind: CompressionKind = compression.parse()?;
    let archive_path = archive_filename(output_base, kind);

    if let Some(parent) = archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            Error::CoreError(format!("Failed to create directory {}: {}", parent.display(), e))
        })?;
    }

    let compressor: Box<dyn Compressor> = match (kind, xz_backend) {
        (CompressionKind::Xz, XzBackend::External) => Box::new(ExternalTarCompressor::new()),
        _ => Box::new(NativeCompressor::new(kind)),
    };

    info!(
        "Compressing {} into {}",
        source.display(),
        archive_path.display()
    );

    let progress = Progress::new(Stage::Compress, observer);
    let result = compressor.compress(source, &archive_path, progress);
    progress.finish();
    result?;

    info!(
        "Successfully compressed '{}' into '{}' using {}",
        source.display(),
        archive_path.display(),
        kind.as_str()
    );
    Ok(archive_path)
}
