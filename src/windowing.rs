use crate::dimensions::VolumeDimensions;
use crate::volume::VoxelVolume;

use image::{ImageBuffer, RgbaImage};
use rayon::prelude::*;
use thiserror::Error;

pub const DEFAULT_WINDOW_LEVEL: i32 = 1800;
pub const DEFAULT_WINDOW_WIDTH: i32 = 3000;
/// Midpoint of the 0-100 brightness and contrast sliders, a factor of 1.
pub const NEUTRAL_ADJUSTMENT: f32 = 50.0;

const LUT_LEN: usize = u16::MAX as usize + 1;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Window width must not be zero")]
    InvalidWindowWidth,

    #[error("Slice index {index} out of range for volume depth {depth}")]
    IndexOutOfRange { index: usize, depth: usize },

    #[error("Dimensions {given} do not match volume {actual}")]
    DimensionMismatch {
        given: VolumeDimensions,
        actual: VolumeDimensions,
    },

    #[error("Volume {0} has no voxels to render")]
    EmptyVolume(VolumeDimensions),

    #[error("Slice of {width}x{height} does not fit an image buffer")]
    ImageBuffer { width: usize, height: usize },

    #[error("Render worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Clinician-adjustable display settings. Changing them never touches the
/// voxel data, only how the next slice is rendered.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowSettings {
    pub window_level: i32,
    pub window_width: i32,
    /// 0-100, 50 is neutral.
    pub brightness: f32,
    /// 0-100, 50 is neutral.
    pub contrast: f32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_LEVEL, DEFAULT_WINDOW_WIDTH)
    }
}

impl WindowSettings {
    pub fn new(window_level: i32, window_width: i32) -> Self {
        Self {
            window_level,
            window_width,
            brightness: NEUTRAL_ADJUSTMENT,
            contrast: NEUTRAL_ADJUSTMENT,
        }
    }

    #[must_use]
    pub fn with_adjustment(mut self, brightness: f32, contrast: f32) -> Self {
        self.brightness = brightness;
        self.contrast = contrast;
        self
    }

    /// A window spanning the given intensity range.
    pub fn from_range(min: u16, max: u16) -> Self {
        let (min, max) = (i32::from(min.min(max)), i32::from(min.max(max)));
        Self::new(min + (max - min) / 2, (max - min).max(1))
    }

    /// Check the settings before accepting them, so a caller can keep the
    /// last valid settings instead.
    ///
    /// # Errors
    ///
    /// Returns `InvalidWindowWidth` for a zero window width.
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.window_width == 0 {
            return Err(RenderError::InvalidWindowWidth);
        }
        Ok(())
    }

    pub fn window_min(&self) -> f64 {
        f64::from(self.window_level) - f64::from(self.window_width) / 2.0
    }

    pub fn window_max(&self) -> f64 {
        f64::from(self.window_level) + f64::from(self.window_width) / 2.0
    }

    fn adjustment(&self) -> f64 {
        f64::from(self.contrast / NEUTRAL_ADJUSTMENT) * f64::from(self.brightness / NEUTRAL_ADJUSTMENT)
    }

    /// Map one voxel intensity to a display value. The window must be valid.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn apply(&self, value: u16) -> u8 {
        let (min, max) = (self.window_min(), self.window_max());
        let mut normalized = ((f64::from(value) - min) / (max - min)).clamp(0.0, 1.0);
        let adjustment = self.adjustment();
        if adjustment != 1.0 {
            normalized = (normalized * adjustment).clamp(0.0, 1.0);
        }
        (normalized * f64::from(u8::MAX)).round() as u8
    }
}

pub struct WindowingEngine;

impl WindowingEngine {
    /// Display value for every possible `u16` intensity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidWindowWidth` for a zero window width.
    pub fn lookup_table(settings: &WindowSettings) -> Result<Vec<u8>, RenderError> {
        settings.validate()?;
        Ok((0..LUT_LEN)
            .into_par_iter()
            .map(|value| settings.apply(value as u16))
            .collect())
    }

    /// Render slice `slice_index` of `volume` as grayscale RGBA, `dims.x`
    /// pixels wide and `dims.y` pixels high.
    ///
    /// # Errors
    ///
    /// - `InvalidWindowWidth` for a zero window width
    /// - `DimensionMismatch` if `dims` are not the volume's dimensions
    /// - `IndexOutOfRange` if `slice_index >= dims.z`
    /// - `EmptyVolume` if the slice has no pixels
    pub fn render_slice(
        volume: &VoxelVolume,
        dims: VolumeDimensions,
        slice_index: usize,
        settings: &WindowSettings,
    ) -> Result<RgbaImage, RenderError> {
        let lut = Self::lookup_table(settings)?;

        if dims != volume.dim() {
            return Err(RenderError::DimensionMismatch {
                given: dims,
                actual: volume.dim(),
            });
        }
        if slice_index >= dims.z {
            return Err(RenderError::IndexOutOfRange {
                index: slice_index,
                depth: dims.z,
            });
        }
        if dims.x == 0 || dims.y == 0 {
            return Err(RenderError::EmptyVolume(dims));
        }
        let plane = volume
            .slice(slice_index)
            .ok_or(RenderError::IndexOutOfRange {
                index: slice_index,
                depth: dims.z,
            })?;

        let mut pixels = vec![0u8; dims.slice_len() * 4];
        pixels
            .par_chunks_mut(dims.x * 4)
            .zip(plane.par_chunks(dims.x))
            .for_each(|(row, values)| {
                for (pixel, &value) in row.chunks_exact_mut(4).zip(values) {
                    let gray = lut[usize::from(value)];
                    pixel.copy_from_slice(&[gray, gray, gray, u8::MAX]);
                }
            });

        let buffer_error = RenderError::ImageBuffer {
            width: dims.x,
            height: dims.y,
        };
        let (Ok(width), Ok(height)) = (u32::try_from(dims.x), u32::try_from(dims.y)) else {
            return Err(buffer_error);
        };
        ImageBuffer::from_raw(width, height, pixels).ok_or(buffer_error)
    }
}
