use crate::dimensions::VolumeDimensions;
use crate::volume::VoxelVolume;

use log::debug;
use ndarray::Array3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Volume data truncated: {dims} needs {expected} bytes, file has {actual}")]
    TruncatedVolume {
        dims: VolumeDimensions,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid volume shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub struct VolumeDecoder;

impl VolumeDecoder {
    /// Decode a raw `.vol` buffer of little-endian `u16` samples.
    ///
    /// An odd-length buffer is padded with one zero byte first, so its last
    /// sample takes the final byte as its low byte. Samples past the end of
    /// the volume are ignored. The returned volume owns a fresh copy of the
    /// samples.
    ///
    /// # Errors
    ///
    /// Returns `TruncatedVolume` if the (padded) buffer holds fewer than
    /// `x * y * z` samples.
    pub fn decode(raw: &[u8], dims: VolumeDimensions) -> Result<VoxelVolume, DecodeError> {
        let expected = dims.byte_len();
        let padded_len = raw.len() + raw.len() % 2;
        if padded_len < expected {
            return Err(DecodeError::TruncatedVolume {
                dims,
                expected,
                actual: raw.len(),
            });
        }
        if padded_len > expected {
            debug!(
                "Ignoring {} trailing bytes after {dims} volume",
                padded_len - expected
            );
        }

        let mut samples: Vec<u16> = if expected <= raw.len() {
            bytemuck::pod_collect_to_vec(&raw[..expected])
        } else {
            let mut padded = Vec::with_capacity(expected);
            padded.extend_from_slice(raw);
            padded.push(0);
            bytemuck::pod_collect_to_vec(&padded)
        };
        // The scanner writes little-endian; a no-op on little-endian hosts.
        for sample in &mut samples {
            *sample = u16::from_le(*sample);
        }

        let data = Array3::from_shape_vec(dims.shape(), samples)?;
        Ok(VoxelVolume::new(data))
    }
}
