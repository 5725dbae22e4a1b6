use super::Res;

/// The current view: absolute image-pixels-per-viewport-pixel scale plus a
/// viewport-pixel translation from centered. See spec §3 "Transform".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: f32,
    pub translate_x: f32,
    pub translate_y: f32,
}

impl Transform {
    pub const fn centered(scale: f32) -> Self {
        Self { scale, translate_x: 0.0, translate_y: 0.0 }
    }

    /// Relative scale: absolute scale divided by fit-to-screen scale.
    pub fn relative_scale(self, fit_scale: f32) -> f32 {
        if fit_scale <= 0.0 { self.scale } else { self.scale / fit_scale }
    }

    /// Enforces the bounds invariant from spec §3: if `limit_to_bounds` and
    /// `scale > fit_scale`, translation is clamped so the image can't be dragged
    /// more than half of its overscroll past the viewport center; if `scale <=
    /// fit_scale`, translation is forced to zero.
    pub fn clamp(&mut self, image: Res, viewport: Res, fit_scale: f32, limit_to_bounds: bool) {
        if !limit_to_bounds {
            return;
        }

        if self.scale <= fit_scale {
            self.translate_x = 0.0;
            self.translate_y = 0.0;
            return;
        }

        let max_x = Self::axis_bound(image.w, viewport.w, self.scale);
        let max_y = Self::axis_bound(image.h, viewport.h, self.scale);

        self.translate_x = self.translate_x.clamp(-max_x, max_x);
        self.translate_y = self.translate_y.clamp(-max_y, max_y);
    }

    fn axis_bound(image_dim: u32, viewport_dim: u32, scale: f32) -> f32 {
        let scaled = image_dim as f32 * scale;
        ((scaled - viewport_dim as f32) / 2.0).max(0.0)
    }

    /// Returns a copy with `target` applied, run through `clamp`, letting callers
    /// pre-clamp an animation target before the animation starts (spec §4.B).
    pub fn clamped_target(
        target_scale: f32,
        target_tx: f32,
        target_ty: f32,
        image: Res,
        viewport: Res,
        fit_scale: f32,
        limit_to_bounds: bool,
    ) -> Self {
        let mut t = Self { scale: target_scale, translate_x: target_tx, translate_y: target_ty };
        t.clamp(image, viewport, fit_scale, limit_to_bounds);
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_fit_scale_forces_zero_translate() {
        let mut t = Transform { scale: 0.4, translate_x: 100.0, translate_y: -50.0 };
        t.clamp(Res { w: 2000, h: 1000 }, Res { w: 1000, h: 800 }, 0.5, true);
        assert_eq!(t.translate_x, 0.0);
        assert_eq!(t.translate_y, 0.0);
    }

    #[test]
    fn above_fit_scale_clamps_to_half_overscroll() {
        let image = Res { w: 2000, h: 1000 };
        let viewport = Res { w: 1000, h: 800 };
        let mut t = Transform { scale: 2.0, translate_x: 10_000.0, translate_y: -10_000.0 };
        t.clamp(image, viewport, 0.5, true);

        let max_x = (2000.0 * 2.0 - 1000.0) / 2.0;
        let max_y = (1000.0 * 2.0 - 800.0) / 2.0;
        assert_eq!(t.translate_x, max_x);
        assert_eq!(t.translate_y, -max_y);
    }

    #[test]
    fn unbounded_when_limit_to_bounds_disabled() {
        let mut t = Transform { scale: 2.0, translate_x: 99_999.0, translate_y: 0.0 };
        t.clamp(Res { w: 100, h: 100 }, Res { w: 50, h: 50 }, 0.5, false);
        assert_eq!(t.translate_x, 99_999.0);
    }
}
