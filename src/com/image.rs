use std::path::Path;
use std::sync::Arc;

use image::{GenericImageView, RgbaImage};

use super::Res;
use crate::error::{EngineError, Result};

/// The source raster (spec §3 "Image"). Created once on load, read-only for
/// the lifetime of the engine. Pixel data is kept behind an `Arc` so both the
/// render thread and the resample worker can read it without copying, while
/// staying single-writer: nothing ever mutates the bytes once decoded.
#[derive(Debug, Clone)]
pub struct Image {
    res: Res,
    pixels: Arc<RgbaImage>,
}

impl Image {
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        let res = Res { w: pixels.width(), h: pixels.height() };
        Self { res, pixels: Arc::new(pixels) }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path)
            .map_err(|e| EngineError::ImageDecode(format!("{}: {e}", path.display())))?;
        Ok(Self::from_rgba(img.into_rgba8()))
    }

    pub const fn res(&self) -> Res {
        self.res
    }

    pub fn pixels(&self) -> &Arc<RgbaImage> {
        &self.pixels
    }

    /// Whether this image qualifies for tile mode per spec §4.D: estimated peak
    /// LOD memory exceeds `budget_bytes`, the source exceeds 50 megapixels, or
    /// either side exceeds 8192 px.
    pub fn needs_tiling(&self, budget_bytes: u64, max_untiled_side: u32) -> bool {
        let full_res_bytes = self.res.byte_size();
        self.res.megapixels() > 50.0
            || self.res.longest_side() > max_untiled_side
            || full_res_bytes > budget_bytes
    }

    /// Extracts the source-pixel rectangle `(x, y, w, h)`, clamped to the image
    /// bounds (edge tiles may be smaller, per spec §3 "Tile"). Used both for
    /// tile uploads and background-texture generation.
    pub fn sub_rect(&self, x: u32, y: u32, w: u32, h: u32) -> RgbaImage {
        let w = w.min(self.res.w.saturating_sub(x));
        let h = h.min(self.res.h.saturating_sub(y));
        self.pixels.view(x, y, w, h).to_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32) -> Image {
        Image::from_rgba(RgbaImage::from_pixel(w, h, image::Rgba([10, 20, 30, 255])))
    }

    #[test]
    fn small_image_does_not_need_tiling() {
        let img = solid(2048, 1024);
        assert!(!img.needs_tiling(512 * 1024 * 1024, 8192));
    }

    #[test]
    fn huge_side_forces_tiling() {
        let img = solid(9000, 2000);
        assert!(img.needs_tiling(512 * 1024 * 1024, 8192));
    }

    #[test]
    fn sub_rect_clamps_at_edges() {
        let img = solid(100, 100);
        let rect = img.sub_rect(80, 80, 50, 50);
        assert_eq!(rect.width(), 20);
        assert_eq!(rect.height(), 20);
    }
}
