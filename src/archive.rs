use crate::enums::{ContainerKind, FileRole};

use log::{debug, warn};
use std::io::{Cursor, Read};
use std::path::{Component, Path};
use thiserror::Error;
use zip::ZipArchive;

/// Entries above this size are skipped when expanding a ZIP (4 GiB).
pub const DEFAULT_MAX_ENTRY_SIZE: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Required file missing from upload: {0}")]
    MissingRequiredFile(String),

    #[error("Unsupported archive format: {format}. {hint}")]
    UnsupportedArchiveFormat {
        format: ContainerKind,
        hint: &'static str,
    },

    #[error("Archive entry is password-protected: {0}")]
    PasswordProtected(String),

    #[error("Invalid ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    fn unsupported(format: ContainerKind) -> Self {
        let hint = match format {
            ContainerKind::Rar | ContainerKind::SevenZip => {
                "Convert the archive to ZIP, or extract it and upload the folder instead"
            }
            _ => "Upload a ZIP archive or the scan folder containing the .vol, VolumeId.xml and ver_ctrl.txt files",
        };
        Self::UnsupportedArchiveFormat { format, hint }
    }
}

/// A named in-memory file, either read from a folder or expanded from an archive.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ExtractedFile {
    pub name: String,
    pub content: Vec<u8>,
    pub size: usize,
}

impl std::fmt::Debug for ExtractedFile {
    // Don't print all bytes, just the length.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractedFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

impl ExtractedFile {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        let size = content.len();
        Self {
            name: name.into(),
            content,
            size,
        }
    }
}

/// The three members a scan needs.
#[derive(Debug, Clone)]
pub struct ScanFiles {
    pub volume: ExtractedFile,
    pub volume_id: ExtractedFile,
    pub ver_ctrl: ExtractedFile,
}

/// Locates the scan members in a folder upload or a ZIP archive.
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    max_entry_size: u64,
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRY_SIZE)
    }
}

impl ArchiveExtractor {
    pub fn new(max_entry_size: u64) -> Self {
        Self { max_entry_size }
    }

    /// Locate the scan members in a set of named buffers.
    ///
    /// Buffers already named like a scan member are used as they are. Every
    /// other buffer is checked for an archive signature: ZIP archives are
    /// expanded and searched, anything else is ignored. A RAR or 7z buffer, or
    /// a ZIP that fails to expand, is skipped with a warning as long as the
    /// members are found elsewhere in the set.
    ///
    /// # Errors
    ///
    /// - `MissingRequiredFile` naming the first member that could not be found
    /// - in place of that, the first `UnsupportedArchiveFormat`, ZIP or I/O
    ///   error raised by a skipped buffer
    pub fn extract(&self, files: Vec<ExtractedFile>) -> Result<ScanFiles, ArchiveError> {
        let mut candidates = Vec::new();
        // Only reported if the scan members cannot be found without these files.
        let mut deferred = None;

        for file in files {
            let role = FileRole::classify(base_name(&file.name).unwrap_or_default(), true);
            if role.is_medical() {
                candidates.push((role, file));
                continue;
            }

            let result = match ContainerKind::detect(&file.content) {
                ContainerKind::Zip => {
                    debug!("Expanding ZIP archive {}", file.name);
                    self.medical_entries(&file.content)
                }
                ContainerKind::Flat => {
                    debug!("Ignoring non-scan file {}", file.name);
                    Ok(Vec::new())
                }
                other => Err(ArchiveError::unsupported(other)),
            };
            match result {
                Ok(entries) => candidates.extend(entries),
                Err(e) => {
                    warn!("Skipping {}: {e}", file.name);
                    deferred.get_or_insert(e);
                }
            }
        }

        match locate(candidates) {
            Err(ArchiveError::MissingRequiredFile(name)) => {
                Err(deferred.unwrap_or(ArchiveError::MissingRequiredFile(name)))
            }
            result => result,
        }
    }

    /// Locate the scan members inside a single uploaded archive.
    ///
    /// # Errors
    ///
    /// - `UnsupportedArchiveFormat` if the buffer is not a ZIP archive
    /// - `MissingRequiredFile` naming the first member that could not be found
    pub fn extract_archive(&self, bytes: &[u8]) -> Result<ScanFiles, ArchiveError> {
        match ContainerKind::detect(bytes) {
            ContainerKind::Zip => locate(self.medical_entries(bytes)?),
            other => Err(ArchiveError::unsupported(other)),
        }
    }

    /// Expand every file entry of a ZIP archive into memory.
    ///
    /// Directories, macOS resource forks and entries larger than the
    /// configured limit are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is corrupt or an entry is encrypted.
    pub fn expand_zip(&self, bytes: &[u8]) -> Result<Vec<ExtractedFile>, ArchiveError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut files = Vec::new();

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }

            let raw_name = entry.name().to_string();
            if entry.encrypted() {
                return Err(ArchiveError::PasswordProtected(raw_name));
            }
            if raw_name.starts_with("__MACOSX/") {
                continue;
            }
            let Some(name) = base_name(&raw_name) else {
                warn!("Skipping archive entry with invalid path: {raw_name}");
                continue;
            };
            if name.starts_with("._") {
                continue;
            }

            let size = entry.size();
            if size > self.max_entry_size {
                warn!(
                    "Skipping large archive entry: {raw_name} ({size} bytes exceeds {} bytes limit)",
                    self.max_entry_size
                );
                continue;
            }

            let mut content = Vec::with_capacity(usize::try_from(size).unwrap_or_default());
            entry.read_to_end(&mut content)?;
            files.push(ExtractedFile::new(name, content));
        }

        Ok(files)
    }

    fn medical_entries(&self, bytes: &[u8]) -> Result<Vec<(FileRole, ExtractedFile)>, ArchiveError> {
        Ok(self
            .expand_zip(bytes)?
            .into_iter()
            .filter_map(|file| match FileRole::classify(&file.name, false) {
                FileRole::Other => {
                    debug!("Ignoring program file {}", file.name);
                    None
                }
                role => Some((role, file)),
            })
            .collect())
    }
}

/// Last normal component of a path, so `scan/VolumeId.xml` is `VolumeId.xml`.
fn base_name(path: &str) -> Option<&str> {
    let normalized = path.rsplit(['/', '\\']).next()?;
    match Path::new(normalized).components().next_back()? {
        Component::Normal(part) => part.to_str(),
        _ => None,
    }
}

fn locate(candidates: Vec<(FileRole, ExtractedFile)>) -> Result<ScanFiles, ArchiveError> {
    let mut volumes = Vec::new();
    let mut volume_id = None;
    let mut ver_ctrl = None;

    for (role, file) in candidates {
        match role {
            FileRole::Volume => volumes.push(file),
            FileRole::VolumeId => {
                volume_id.get_or_insert(file);
            }
            FileRole::VerCtrl => {
                ver_ctrl.get_or_insert(file);
            }
            FileRole::Other => {}
        }
    }

    if volumes.len() > 1 {
        warn!(
            "Found {} .vol files, using the largest: {:?}",
            volumes.len(),
            volumes.iter().map(|v| v.name.as_str()).collect::<Vec<_>>()
        );
    }
    // Largest file wins, ties go to the smallest name, independent of entry order.
    let volume = volumes
        .into_iter()
        .min_by(|a, b| b.size.cmp(&a.size).then_with(|| a.name.cmp(&b.name)))
        .ok_or_else(|| {
            ArchiveError::MissingRequiredFile(format!("*{}", FileRole::VOLUME_EXTENSION))
        })?;
    let volume_id = volume_id
        .ok_or_else(|| ArchiveError::MissingRequiredFile(FileRole::VOLUME_ID_NAME.to_string()))?;
    let ver_ctrl = ver_ctrl
        .ok_or_else(|| ArchiveError::MissingRequiredFile(FileRole::VER_CTRL_NAME.to_string()))?;

    Ok(ScanFiles {
        volume,
        volume_id,
        ver_ctrl,
    })
}
