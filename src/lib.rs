//! # CBCT-volume library
//!
//! This crate decodes cone-beam CT scans exported as a raw `.vol` voxel file
//! with its `VolumeId.xml` and `ver_ctrl.txt` sidecars, and renders windowed
//! slices of the decoded volume.

//!
//! Scans can be loaded from a folder containing the three files, from a set
//! of named in-memory buffers (a folder upload) or from a ZIP archive that
//! may also carry the vendor's viewer software, which is ignored. The load
//! pipeline is:
//!  - Archive extraction: locate the `.vol`, `VolumeId.xml` and
//!    `ver_ctrl.txt` members
//!  - Metadata parsing: scan geometry, patient record and acquisition
//!    parameters, with defaults for anything missing
//!  - Dimension resolution: the voxel grid edge from the scan geometry,
//!    checked against the number of samples actually in the file
//!  - Decoding: little-endian 16-bit samples into a `(z, y, x)` volume
//!
//!  Slices along `z` are rendered to grayscale RGBA with a window
//!  level/width and brightness/contrast adjustment. Rendering is pure, so it
//!  can be repeated, run on a background thread or abandoned at any time.
//!  Scans are assumed to be cubic (`x == y == z`), which is what the scanner
//!  reconstructs; the metadata only carries a single radius.
//!
//! # Examples
//!
//! ## Loading a scan and rendering its center slice
//!
//! ```no_run
//! # use cbct_volume::{VolumeLoader, WindowSettings};
//! let scan = VolumeLoader::default()
//!     .load_from_path("scan.zip")
//!     .expect("should have loaded the scan");
//! let image = scan
//!     .volume
//!     .render_slice(scan.dimensions().z / 2, &WindowSettings::new(1800, 3000))
//!     .expect("should have rendered the center slice");
//! image.save("result.png");
//! ```

pub mod archive;
pub mod decoder;
pub mod dimensions;
pub mod enums;
pub mod metadata;
pub mod renderer;
pub mod volume;
pub mod volume_loader;
pub mod windowing;

pub use archive::{ArchiveError, ArchiveExtractor, ExtractedFile, ScanFiles};
pub use decoder::{DecodeError, VolumeDecoder};
pub use dimensions::{DimensionResolution, DimensionResolver, VolumeDimensions};
pub use enums::{ContainerKind, DimensionSource, FileRole};
pub use metadata::{MetadataParser, Point3, TechnicalParams, VolumeMetadata};
pub use renderer::{RenderTicket, SliceRenderer};
pub use volume::VoxelVolume;
pub use volume_loader::{LoadOptions, LoadedScan, VolumeLoader, VolumeLoaderError};
pub use windowing::{RenderError, WindowSettings, WindowingEngine};
