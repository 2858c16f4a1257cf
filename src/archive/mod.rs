// src/archive/mod.rs

//! Archive detection and extraction
//!
//! Formats are detected from file content, not the extension: gzip and xz
//! streams are only accepted when they decompress to a tar header, and zip
//! files only when their central directory opens. Anything else is
//! `ArchiveFormat::Unknown` and is never extracted.

pub mod compress;

use crate::error::{Error, Result};
use crate::progress::{Progress, ProgressObserver, Stage};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{debug, info, warn};
use xz2::read::XzDecoder;
use zip::ZipArchive;

pub use compress::{CompressionKind, Compressor, ExternalTarCompressor, NativeCompressor, XzBackend};

/// Size of one tar header block
const TAR_BLOCK_SIZE: usize = 512;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
const ZIP_LOCAL_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const ZIP_EMPTY_MAGIC: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];

/// Archive container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarXz,
    Zip,
    Unknown,
}

impl ArchiveFormat {
    pub fn as_str(&self) -> &str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::TarXz => "tar.xz",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Unknown => "unknown",
        }
    }
}

/// Detect the archive format of a file from its content
pub fn detect(path: &Path) -> Result<ArchiveFormat> {
    let mut head = Vec::with_capacity(TAR_BLOCK_SIZE);
    open_archive_file(path)?
        .take(TAR_BLOCK_SIZE as u64)
        .read_to_end(&mut head)
        .map_err(|e| Error::ArchiveError(format!("Failed to read {}: {}", path.display(), e)))?;

    let format = if head.starts_with(&ZIP_LOCAL_MAGIC) || head.starts_with(&ZIP_EMPTY_MAGIC) {
        probe_zip(path)?
    } else if head.starts_with(&GZIP_MAGIC) {
        probe_compressed_tar(GzDecoder::new(open_archive_file(path)?), ArchiveFormat::TarGz)
    } else if head.starts_with(&XZ_MAGIC) {
        probe_compressed_tar(XzDecoder::new(open_archive_file(path)?), ArchiveFormat::TarXz)
    } else if is_tar_header(&head) {
        ArchiveFormat::Tar
    } else {
        ArchiveFormat::Unknown
    };

    debug!("Detected {} as {}", path.display(), format.as_str());
    Ok(format)
}

fn open_archive_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        Error::ArchiveError(format!("Failed to open archive {}: {}", path.display(), e))
    })
}

fn probe_zip(path: &Path) -> Result<ArchiveFormat> {
    match ZipArchive::new(open_archive_file(path)?) {
        Ok(_) => Ok(ArchiveFormat::Zip),
        Err(e) => {
            debug!("{} has a zip signature but does not open: {}", path.display(), e);
            Ok(ArchiveFormat::Unknown)
        }
    }
}

/// Decompress the first block and check that it is a tar header
fn probe_compressed_tar<R: Read>(decoder: R, format: ArchiveFormat) -> ArchiveFormat {
    let mut block = Vec::with_capacity(TAR_BLOCK_SIZE);
    match decoder.take(TAR_BLOCK_SIZE as u64).read_to_end(&mut block) {
        Ok(_) if is_tar_header(&block) => format,
        Ok(_) => ArchiveFormat::Unknown,
        Err(e) => {
            debug!("Compressed stream did not decode: {}", e);
            ArchiveFormat::Unknown
        }
    }
}

/// A tar header either carries the `ustar` magic or a valid checksum
fn is_tar_header(block: &[u8]) -> bool {
    if block.len() < TAR_BLOCK_SIZE {
        return false;
    }

    if &block[257..262] == b"ustar" {
        return true;
    }

    // Pre-POSIX headers: checksum is computed with the checksum field as spaces
    let Some(stored) = parse_octal(&block[148..156]) else {
        return false;
    };
    let computed: u64 = block[..TAR_BLOCK_SIZE]
        .iter()
        .enumerate()
        .map(|(i, &b)| if (148..156).contains(&i) { b' ' as u64 } else { b as u64 })
        .sum();

    stored == computed
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(field).ok()?;
    let digits = text.trim_matches(|c: char| c == '\0' || c == ' ');
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 8).ok()
}

/// Extract an archive into `destination`
///
/// The source is checked and its format detected before the destination is
/// created, so an unreadable archive leaves nothing behind. A failure part
/// way through may leave a partially populated destination.
pub fn extract(
    archive_path: &Path,
    destination: &Path,
    observer: Option<&dyn ProgressObserver>,
) -> Result<ArchiveFormat> {
    if !archive_path.exists() {
        return Err(Error::ArchiveError(format!(
            "The archive '{}' does not exist",
            archive_path.display()
        )));
    }

    let format = detect(archive_path)?;
    if format == ArchiveFormat::Unknown {
        return Err(Error::ArchiveError(format!(
            "Unsupported archive format for '{}'. Only .tar, .tar.gz, .tar.xz and .zip are supported",
            archive_path.display()
        )));
    }

    fs::create_dir_all(destination).map_err(|e| {
        Error::ArchiveError(format!(
            "Failed to create directory {}: {}",
            destination.display(),
            e
        ))
    })?;

    info!(
        "Extracting {} archive {} to {}",
        format.as_str(),
        archive_path.display(),
        destination.display()
    );

    let progress = Progress::new(Stage::Extract, observer);
    let result = match format {
        ArchiveFormat::Zip => extract_zip(archive_path, destination, progress),
        _ => open_tar(archive_path, format)
            .and_then(|archive| extract_tar(archive, destination, progress)),
    };
    progress.finish();
    let entries = result?;

    info!("Extracted {} entries to {}", entries, destination.display());
    Ok(format)
}

/// Open a tar-family archive with the right decompressor
fn open_tar(path: &Path, format: ArchiveFormat) -> Result<Archive<Box<dyn Read>>> {
    let file = open_archive_file(path)?;

    let reader: Box<dyn Read> = match format {
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
        ArchiveFormat::TarXz => Box::new(XzDecoder::new(file)),
        ArchiveFormat::Tar => Box::new(file),
        other => {
            return Err(Error::ArchiveError(format!(
                "{} is not a tar archive",
                other.as_str()
            )));
        }
    };

    Ok(Archive::new(reader))
}

fn extract_tar<R: Read>(
    mut archive: Archive<R>,
    destination: &Path,
    progress: Progress<'_>,
) -> Result<u64> {
    let mut count = 0u64;

    for entry in archive
        .entries()
        .map_err(|e| Error::ArchiveError(format!("Failed to read archive entries: {}", e)))?
    {
        let mut entry =
            entry.map_err(|e| Error::ArchiveError(format!("Failed to read archive entry: {}", e)))?;

        let entry_path = entry
            .path()
            .map_err(|e| Error::ArchiveError(format!("Failed to get entry path: {}", e)))?
            .to_path_buf();

        let unpacked = entry.unpack_in(destination).map_err(|e| {
            Error::ArchiveError(format!("Failed to extract {}: {}", entry_path.display(), e))
        })?;
        if !unpacked {
            warn!("Skipped entry outside destination: {}", entry_path.display());
        }

        count += 1;
        progress.report(count, None);
    }

    Ok(count)
}

fn extract_zip(archive_path: &Path, destination: &Path, progress: Progress<'_>) -> Result<u64> {
    let mut archive = ZipArchive::new(open_archive_file(archive_path)?)
        .map_err(|e| Error::ArchiveError(format!("Failed to open zip archive: {}", e)))?;
    let total = archive.len() as u64;

    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| Error::ArchiveError(format!("Failed to read zip entry {}: {}", index, e)))?;

        let Some(relative) = file.enclosed_name().map(PathBuf::from) else {
            warn!("Skipped entry outside destination: {}", file.name());
            progress.report(index as u64 + 1, Some(total));
            continue;
        };
        let target = destination.join(&relative);

        if file.is_dir() {
            fs::create_dir_all(&target).map_err(|e| zip_write_error(&target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| zip_write_error(parent, e))?;
            }
            let mut out = File::create(&target).map_err(|e| zip_write_error(&target, e))?;
            io::copy(&mut file, &mut out).map_err(|e| {
                Error::ArchiveError(format!("Failed to extract {}: {}", relative.display(), e))
            })?;
        }

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                .map_err(|e| zip_write_error(&target, e))?;
        }

        progress.report(index as u64 + 1, Some(total));
    }

    Ok(total)
}

fn zip_write_error(path: &Path, e: io::Error) -> Error {
    Error::ArchiveError(format!("Failed to write {}: {}", path.display(), e))
}

/// Detects, extracts and creates archives
///
/// Holds the choice of xz backend; everything else is stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveCodec {
    xz_backend: XzBackend,
}

impl ArchiveCodec {
    pub fn new(xz_backend: XzBackend) -> Self {
        Self { xz_backend }
    }

    pub fn xz_backend(&self) -> XzBackend {
        self.xz_backend
    }

    pub fn detect(&self, path: &Path) -> Result<ArchiveFormat> {
        detect(path)
    }

    pub fn extract(
        &self,
        archive_path: &Path,
        destination: &Path,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<ArchiveFormat> {
        extract(archive_path, destination, observer)
    }

    /// Build `<output_base>.tar.gz` or `<output_base>.tar.xz` from `source`
    pub fn compress(
        &self,
        source: &Path,
        output_base: &Path,
        compression: &str,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<PathBuf> {
        compress::compress(source, output_base, compression, self.xz_backend, observer)
    }
}
