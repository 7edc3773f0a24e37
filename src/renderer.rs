use crate::volume::VoxelVolume;
use crate::windowing::{RenderError, WindowSettings};

use image::RgbaImage;
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;

/// Renders slices of a shared volume on the tokio blocking pool so the
/// caller's thread stays free. Only the most recent request is delivered;
/// older ones resolve to `None` once a newer request has been made.
pub struct SliceRenderer {
    volume: Arc<VoxelVolume>,
    generation: Arc<AtomicU64>,
}

pub struct RenderTicket {
    generation: u64,
    latest: Arc<AtomicU64>,
    handle: JoinHandle<Result<RgbaImage, RenderError>>,
}

impl SliceRenderer {
    pub fn new(volume: Arc<VoxelVolume>) -> Self {
        Self {
            volume,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn volume(&self) -> &Arc<VoxelVolume> {
        &self.volume
    }

    /// Start rendering slice `index` with `settings`, superseding any
    /// earlier request.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn request(&self, index: usize, settings: WindowSettings) -> RenderTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let volume = Arc::clone(&self.volume);
        let handle = tokio::task::spawn_blocking(move || volume.render_slice(index, &settings));

        RenderTicket {
            generation,
            latest: Arc::clone(&self.generation),
            handle,
        }
    }
}

impl RenderTicket {
    pub fn is_superseded(&self) -> bool {
        self.latest.load(Ordering::SeqCst) != self.generation
    }

    /// Wait for the render. Returns `Ok(None)` if a newer request was made
    /// in the meantime; the stale image is dropped.
    ///
    /// # Errors
    ///
    /// Returns the render error of the current request, or `Worker` if the
    /// render task panicked.
    pub async fn wait(self) -> Result<Option<RgbaImage>, RenderError> {
        if self.is_superseded() {
            debug!("Dropping superseded render request {}", self.generation);
            self.handle.abort();
            return Ok(None);
        }
        let image = self.handle.await??;
        if self.latest.load(Ordering::SeqCst) != self.generation {
            debug!("Dropping superseded render result {}", self.generation);
            return Ok(None);
        }
        Ok(Some(image))
    }
}

#[cfg(test)]
mod tests {
    use super::SliceRenderer;
    use crate::volume::VoxelVolume;
    use crate::windowing::{RenderError, WindowSettings};

    use ndarray::Array3;
    use std::sync::Arc;

    fn renderer() -> SliceRenderer {
        let data = Array3::from_shape_fn((4, 4, 4), |(z, y, x)| (z * 16 + y * 4 + x) as u16);
        SliceRenderer::new(Arc::new(VoxelVolume::new(data)))
    }

    #[tokio::test]
    async fn test_latest_request_wins() {
        let renderer = renderer();
        let first = renderer.request(0, WindowSettings::new(32, 64));
        let second = renderer.request(3, WindowSettings::new(32, 64));
        assert!(first.is_superseded());
        assert!(!second.is_superseded());

        assert!(first.wait().await.unwrap().is_none());
        let image = second.wait().await.unwrap().unwrap();
        assert_eq!((4, 4), image.dimensions());
    }

    #[tokio::test]
    async fn test_matches_direct_render() {
        let renderer = renderer();
        let settings = WindowSettings::new(20, 40).with_adjustment(70.0, 45.0);
        let direct = renderer.volume().render_slice(2, &settings).unwrap();
        let background = renderer.request(2, settings).wait().await.unwrap().unwrap();
        assert_eq!(direct.into_raw(), background.into_raw());
    }

    #[tokio::test]
    async fn test_errors_are_delivered() {
        let renderer = renderer();
        let result = renderer.request(9, WindowSettings::default()).wait().await;
        assert!(matches!(result, Err(RenderError::IndexOutOfRange { index: 9, depth: 4 })));
    }
}
