use crate::dimensions::VolumeDimensions;
use crate::windowing::{RenderError, WindowSettings, WindowingEngine};

use image::RgbaImage;
use ndarray::{Array3, ArrayView2, Axis};
use rayon::prelude::*;

/// A decoded scan. Samples are stored `(z, y, x)` in standard layout, so
/// every `z` slice is one contiguous run of `x * y` samples.
pub struct VoxelVolume {
    data: Array3<u16>,
}

impl std::fmt::Debug for VoxelVolume {
    // Don't print every voxel, just the shape.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoxelVolume")
            .field("dim", &self.dim())
            .finish()
    }
}

impl VoxelVolume {
    pub fn new(data: Array3<u16>) -> Self {
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Self { data }
    }

    /// Get the dimensions of the volume
    pub fn dim(&self) -> VolumeDimensions {
        let (depth, height, width) = self.data.dim();
        VolumeDimensions::new(width, height, depth)
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    /// All samples, `x` fastest, then `y`, then `z`.
    pub fn samples(&self) -> &[u16] {
        // Always standard layout, see `new`.
        self.data.as_slice().unwrap_or_default()
    }

    pub fn into_samples(self) -> Vec<u16> {
        self.data.into_raw_vec_and_offset().0
    }

    /// Samples of slice `z`, or `None` if `z` is past the last slice.
    pub fn slice(&self, z: usize) -> Option<&[u16]> {
        let len = self.dim().slice_len();
        let start = z.checked_mul(len)?;
        self.samples().get(start..start.checked_add(len)?)
    }

    pub fn slice_view(&self, z: usize) -> Option<ArrayView2<'_, u16>> {
        (z < self.dim().z).then(|| self.data.index_axis(Axis(0), z))
    }

    /// # Panics
    ///
    /// Panics if the coordinate is outside the volume.
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> u16 {
        self.data[[z, y, x]]
    }

    /// Smallest and largest intensity in the volume.
    pub fn intensity_range(&self) -> (u16, u16) {
        self.samples()
            .par_iter()
            .fold(
                || (u16::MAX, u16::MIN),
                |(min, max), &v| (min.min(v), max.max(v)),
            )
            .reduce(
                || (u16::MAX, u16::MIN),
                |(a_min, a_max), (b_min, b_max)| (a_min.min(b_min), a_max.max(b_max)),
            )
    }

    /// Render slice `index` with the given window.
    ///
    /// # Errors
    ///
    /// See [`WindowingEngine::render_slice`].
    pub fn render_slice(
        &self,
        index: usize,
        settings: &WindowSettings,
    ) -> Result<RgbaImage, RenderError> {
        WindowingEngine::render_slice(self, self.dim(), index, settings)
    }
}
