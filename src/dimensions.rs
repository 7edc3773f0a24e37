use crate::enums::DimensionSource;
use crate::metadata::DEFAULT_VOXEL_SIZE_MM;

use log::{debug, warn};

/// Relative difference tolerated between the geometry estimate and the
/// number of samples in the file.
pub const DEFAULT_TOLERANCE: f64 = 0.01;

const BYTES_PER_VOXEL: usize = 2;

/// Voxel counts along each axis. Every axis is at least 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VolumeDimensions {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl VolumeDimensions {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    pub fn cube(n: usize) -> Self {
        Self::new(n, n, n)
    }

    pub fn voxel_count(&self) -> usize {
        self.x * self.y * self.z
    }

    /// Voxels in a single `z` slice.
    pub fn slice_len(&self) -> usize {
        self.x * self.y
    }

    /// Bytes the raw `.vol` file needs to hold for these dimensions.
    pub fn byte_len(&self) -> usize {
        self.voxel_count() * BYTES_PER_VOXEL
    }

    /// Dimensions in ndarray order, `(depth, height, width)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.z, self.y, self.x)
    }
}

impl std::fmt::Display for VolumeDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// Outcome of a dimension resolution, with both estimates kept for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DimensionResolution {
    pub dimensions: VolumeDimensions,
    pub source: DimensionSource,
    /// Samples in the buffer, counting the pad byte of odd-length files.
    pub total_voxels: usize,
    /// `round(radius * 2 / voxel size)`, 0 if the geometry is unusable.
    pub geometry_estimate: usize,
    /// Largest cube edge that fits into the buffer.
    pub size_estimate: usize,
    /// Whether the two estimates disagreed beyond the tolerance.
    pub discrepancy: bool,
}

pub struct DimensionResolver;

impl DimensionResolver {
    /// Resolve cubic voxel-grid dimensions for a raw file of `byte_length`
    /// bytes with the default tolerance.
    pub fn resolve(byte_length: usize, voxel_size_mm: f64, volume_radius_mm: f64) -> VolumeDimensions {
        Self::resolve_detailed(byte_length, voxel_size_mm, volume_radius_mm, DEFAULT_TOLERANCE)
            .dimensions
    }

    /// Resolve dimensions and report how they were chosen.
    ///
    /// The geometry estimate is used when its cube is within `tolerance` of
    /// the samples actually present, even if the buffer falls a few samples
    /// short of it; the decoder then reports the file as truncated. Otherwise
    /// the cube root of the sample count wins, since it can always be indexed.
    pub fn resolve_detailed(
        byte_length: usize,
        voxel_size_mm: f64,
        volume_radius_mm: f64,
        tolerance: f64,
    ) -> DimensionResolution {
        let total_voxels = byte_length.div_ceil(BYTES_PER_VOXEL);
        let geometry_estimate = Self::geometry_estimate(voxel_size_mm, volume_radius_mm);
        let size_estimate = Self::size_estimate(total_voxels);

        let geometry_cube = (geometry_estimate as f64).powi(3);
        let total = total_voxels as f64;
        let within_tolerance =
            geometry_estimate > 0 && (geometry_cube - total).abs() <= tolerance.max(0.0) * total;

        let (edge, source) = if within_tolerance {
            (geometry_estimate, DimensionSource::Geometry)
        } else {
            (size_estimate, DimensionSource::ByteCount)
        };
        let discrepancy = !within_tolerance;

        if discrepancy {
            warn!(
                "Scan geometry suggests {geometry_estimate}^3 voxels but file holds {total_voxels} \
                 samples, using {size_estimate}^3 from file size"
            );
        } else {
            debug!("Resolved volume to {edge}^3 voxels from {source:?}");
        }

        DimensionResolution {
            dimensions: VolumeDimensions::cube(edge),
            source,
            total_voxels,
            geometry_estimate,
            size_estimate,
            discrepancy,
        }
    }

    fn geometry_estimate(voxel_size_mm: f64, volume_radius_mm: f64) -> usize {
        let voxel_size_mm = if voxel_size_mm.is_finite() && voxel_size_mm > 0.0 {
            voxel_size_mm
        } else {
            DEFAULT_VOXEL_SIZE_MM
        };
        let diameter = (volume_radius_mm * 2.0 / voxel_size_mm).round();
        if diameter.is_finite() && diameter >= 1.0 && diameter <= u32::MAX as f64 {
            diameter as usize
        } else {
            0
        }
    }

    fn size_estimate(total_voxels: usize) -> usize {
        let mut edge = ((total_voxels as f64).cbrt().round() as usize).max(1);
        while edge > 1 && edge.pow(3) > total_voxels {
            edge -= 1;
        }
        edge
    }
}
