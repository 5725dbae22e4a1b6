use std::fmt;

/// A pixel width/height pair, used for both source images and viewport sizes.
#[derive(Default, PartialEq, Eq, Copy, Clone, serde::Deserialize, serde::Serialize)]
pub struct Res {
    pub w: u32,
    pub h: u32,
}

impl fmt::Debug for Res {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

// Just allow panics because this should only ever be used to convert to/from formats that use
// signed but never negative widths/heights.
#[allow(clippy::fallible_impl_from)]
impl From<(i32, i32)> for Res {
    fn from(wh: (i32, i32)) -> Self {
        assert!(wh.0 >= 0 && wh.1 >= 0, "Can't have negative width or height");

        Self { w: wh.0 as u32, h: wh.1 as u32 }
    }
}

impl From<(u32, u32)> for Res {
    fn from(wh: (u32, u32)) -> Self {
        Self { w: wh.0, h: wh.1 }
    }
}

impl Res {
    pub const fn is_zero_area(self) -> bool {
        self.w == 0 || self.h == 0
    }

    pub const fn longest_side(self) -> u32 {
        if self.w > self.h { self.w } else { self.h }
    }

    pub fn megapixels(self) -> f64 {
        (self.w as u64 * self.h as u64) as f64 / 1_000_000.0
    }

    /// The absolute scale at which `self` fits entirely inside `viewport` — the
    /// fit-to-screen scale (GLOSSARY).
    pub fn fit_scale(self, viewport: Self) -> f32 {
        if self.is_zero_area() || viewport.is_zero_area() {
            return 1.0;
        }
        (viewport.w as f32 / self.w as f32).min(viewport.h as f32 / self.h as f32)
    }

    /// `self` scaled uniformly by `scale`, rounded to the nearest pixel, floored at 1.
    pub fn scaled(self, scale: f32) -> Self {
        Self {
            w: ((self.w as f32 * scale).round() as u32).max(1),
            h: ((self.h as f32 * scale).round() as u32).max(1),
        }
    }

    /// Bytes of GPU memory a texture of this size occupies at 4 bytes/pixel (RGBA), per §3.
    pub const fn byte_size(self) -> u64 {
        self.w as u64 * self.h as u64 * 4
    }
}
