use crate::archive::{ArchiveError, ArchiveExtractor, DEFAULT_MAX_ENTRY_SIZE, ExtractedFile, ScanFiles};
use crate::decoder::{DecodeError, VolumeDecoder};
use crate::dimensions::{DEFAULT_TOLERANCE, DimensionResolution, DimensionResolver, VolumeDimensions};
use crate::enums::{ContainerKind, FileRole};
use crate::metadata::{MetadataParser, VolumeMetadata, decode_text};
use crate::volume::VoxelVolume;

use log::{debug, info};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Load worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Tunables for loading a scan.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadOptions {
    /// Relative tolerance between the geometry estimate and the file size.
    pub dimension_tolerance: f64,
    /// ZIP entries above this size are skipped.
    pub max_entry_size: u64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            dimension_tolerance: DEFAULT_TOLERANCE,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
        }
    }
}

/// A fully decoded scan, ready for slice rendering.
#[derive(Debug)]
pub struct LoadedScan {
    pub metadata: VolumeMetadata,
    pub resolution: DimensionResolution,
    pub volume: VoxelVolume,
}

impl LoadedScan {
    pub fn dimensions(&self) -> VolumeDimensions {
        self.resolution.dimensions
    }
}

#[derive(Clone, Debug, Default)]
pub struct VolumeLoader {
    options: LoadOptions,
}

impl VolumeLoader {
    pub fn new(options: LoadOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Load a scan from its three located members: parse the sidecars,
    /// resolve the dimensions from the `.vol` size and decode the voxels.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the `.vol` file is too short for the resolved
    /// dimensions.
    pub fn load_from_scan_files(&self, files: ScanFiles) -> Result<LoadedScan, VolumeLoaderError> {
        let metadata = MetadataParser::parse(
            &decode_text(&files.volume_id.content),
            &decode_text(&files.ver_ctrl.content),
        );
        let resolution = DimensionResolver::resolve_detailed(
            files.volume.content.len(),
            metadata.voxel_size_mm,
            metadata.volume_radius_mm,
            self.options.dimension_tolerance,
        );
        let volume = VolumeDecoder::decode(&files.volume.content, resolution.dimensions)?;

        info!(
            "Loaded {} ({} bytes): {} voxels at {}mm, patient '{}'",
            files.volume.name,
            files.volume.size,
            resolution.dimensions,
            metadata.voxel_size_mm,
            metadata.patient_id
        );
        Ok(LoadedScan {
            metadata,
            resolution,
            volume,
        })
    }

    /// Load a scan from a set of named buffers, as uploaded from a folder or
    /// containing ZIP archives.
    ///
    /// # Errors
    ///
    /// Returns `Archive` if the scan members cannot be located and `Decode` if
    /// the voxel data is truncated.
    pub fn load_from_files(&self, files: Vec<ExtractedFile>) -> Result<LoadedScan, VolumeLoaderError> {
        let scan_files = self.extractor().extract(files)?;
        self.load_from_scan_files(scan_files)
    }

    /// Load a scan from a single uploaded archive.
    ///
    /// # Errors
    ///
    /// Returns `Archive` for non-ZIP input or missing members and `Decode` if
    /// the voxel data is truncated.
    pub fn load_from_archive(&self, bytes: &[u8]) -> Result<LoadedScan, VolumeLoaderError> {
        let scan_files = self.extractor().extract_archive(bytes)?;
        self.load_from_scan_files(scan_files)
    }

    /// Load a scan from a directory holding the scan files or a ZIP archive
    /// of them. Files that are neither are not read.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or the scan cannot
    /// be loaded from its contents.
    pub fn load_from_directory(&self, path: impl AsRef<Path>) -> Result<LoadedScan, VolumeLoaderError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut files = Vec::new();
        for path in paths {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();
            if FileRole::classify(&name, true).is_medical() || Self::is_archive(&path)? {
                files.push(ExtractedFile::new(name, fs::read(&path)?));
            } else {
                debug!("Skipping {}", path.display());
            }
        }

        self.load_from_files(files)
    }

    /// Load a scan from a directory or an archive file.
    ///
    /// # Errors
    ///
    /// See [`Self::load_from_directory`] and [`Self::load_from_files`].
    pub fn load_from_path(&self, path: impl AsRef<Path>) -> Result<LoadedScan, VolumeLoaderError> {
        let path = path.as_ref();
        if path.is_dir() {
            return self.load_from_directory(path);
        }

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        self.load_from_files(vec![ExtractedFile::new(name, fs::read(path)?)])
    }

    /// [`Self::load_from_path`] on the tokio blocking pool.
    ///
    /// # Errors
    ///
    /// See [`Self::load_from_path`]; `Worker` if the load task panicked.
    pub async fn load_from_path_async(
        &self,
        path: impl Into<PathBuf>,
    ) -> Result<LoadedScan, VolumeLoaderError> {
        let loader = self.clone();
        let path = path.into();
        tokio::task::spawn_blocking(move || loader.load_from_path(path)).await?
    }

    fn extractor(&self) -> ArchiveExtractor {
        ArchiveExtractor::new(self.options.max_entry_size)
    }

    fn is_archive(path: &Path) -> Result<bool, std::io::Error> {
        let mut magic = Vec::with_capacity(8);
        File::open(path)?.take(8).read_to_end(&mut magic)?;
        Ok(ContainerKind::detect(&magic) != ContainerKind::Flat)
    }
}

#[cfg(test)]
mod tests {
    use super::{LoadOptions, VolumeLoader, VolumeLoaderError};
    use crate::archive::{ArchiveError, ExtractedFile};
    use crate::decoder::DecodeError;
    use crate::dimensions::VolumeDimensions;
    use crate::enums::DimensionSource;

    const VOLUME_ID: &str = r#"<VolumeId><V0 strGuid="x"><dmmVolumeRadius value="0.25"/><dmmVoxelSize value="0.25"/></V0></VolumeId>"#;

    fn scan(vol: Vec<u8>) -> Vec<ExtractedFile> {
        vec![
            ExtractedFile::new("VolumeId.xml", VOLUME_ID.as_bytes().to_vec()),
            ExtractedFile::new("ver_ctrl.txt", b"PatientID = \"42\"\nComment = \"kV:80\"".to_vec()),
            ExtractedFile::new("scan.vol", vol),
        ]
    }

    #[test]
    pub fn test_load_from_files() {
        let vol: Vec<u8> = (0u16..8).flat_map(|v| (v * 1000).to_le_bytes()).collect();
        let loaded = VolumeLoader::default().load_from_files(scan(vol)).unwrap();
        assert_eq!(VolumeDimensions::cube(2), loaded.dimensions());
        assert_eq!(DimensionSource::Geometry, loaded.resolution.source);
        assert_eq!("42", loaded.metadata.patient_id);
        assert_eq!(Some(80.0), loaded.metadata.technical.tube_voltage_kv);
        assert_eq!(7000, loaded.volume.voxel(1, 1, 1));
    }

    #[test]
    pub fn test_size_mismatch_uses_byte_count() {
        let loaded = VolumeLoader::default()
            .load_from_files(scan(vec![0; 27 * 2]))
            .unwrap();
        assert_eq!(VolumeDimensions::cube(3), loaded.dimensions());
        assert_eq!(DimensionSource::ByteCount, loaded.resolution.source);
        assert!(loaded.resolution.discrepancy);
    }

    #[test]
    pub fn test_empty_volume_is_truncated() {
        let result = VolumeLoader::default().load_from_files(scan(Vec::new()));
        assert!(matches!(
            result,
            Err(VolumeLoaderError::Decode(DecodeError::TruncatedVolume { .. }))
        ));
    }

    #[test]
    pub fn test_short_file_within_tolerance_is_truncated() {
        // Geometry says 10^3, the file is five samples short of that.
        let volume_id = r#"<VolumeId><V0><dmmVolumeRadius value="0.5"/><dmmVoxelSize value="0.1"/></V0></VolumeId>"#;
        let files = vec![
            ExtractedFile::new("VolumeId.xml", volume_id.as_bytes().to_vec()),
            ExtractedFile::new("ver_ctrl.txt", Vec::new()),
            ExtractedFile::new("scan.vol", vec![0; 995 * 2]),
        ];
        match VolumeLoader::default().load_from_files(files) {
            Err(VolumeLoaderError::Decode(DecodeError::TruncatedVolume {
                dims,
                expected,
                actual,
            })) => {
                assert_eq!(VolumeDimensions::cube(10), dims);
                assert_eq!(2000, expected);
                assert_eq!(1990, actual);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    pub fn test_missing_member() {
        let mut files = scan(vec![0; 16]);
        files.remove(0);
        assert!(matches!(
            VolumeLoader::new(LoadOptions::default()).load_from_files(files),
            Err(VolumeLoaderError::Archive(ArchiveError::MissingRequiredFile(name))) if name == "VolumeId.xml"
        ));
    }
}
