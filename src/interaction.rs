use std::time::{Duration, Instant};

use crate::com::{Res, Transform};
use crate::config::EngineConfig;

/// Rate limiter for the tile-update throttle (§4.A: "never on every pointer
/// move", at most one call per `min_interval`).
pub struct RateLimiter {
    min_interval: Duration,
    last_fired: Option<Instant>,
}

impl RateLimiter {
    pub const fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_fired: None }
    }

    /// Returns whether the caller should act now, recording the time if so.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.last_fired {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_fired = Some(now);
                true
            }
        }
    }
}

/// Drag input state (§3 "Input State"). `drag_optimized` latches on after a
/// grace period (100ms mouse / 50ms touch) from drag start.
#[derive(Debug, Clone, Copy)]
pub struct DragState {
    pub active: bool,
    pub last_x: f32,
    pub last_y: f32,
    pub started_at: Instant,
    pub optimized: bool,
}

impl DragState {
    pub fn start(x: f32, y: f32, now: Instant) -> Self {
        Self { active: true, last_x: x, last_y: y, started_at: now, optimized: false }
    }

    pub fn grace_period(touch: bool) -> Duration {
        if touch { Duration::from_millis(50) } else { Duration::from_millis(100) }
    }

    pub fn update_optimized(&mut self, now: Instant, touch: bool) {
        if !self.optimized && now.duration_since(self.started_at) >= Self::grace_period(touch) {
            self.optimized = true;
        }
    }
}

/// Double-tap/double-click re-entrancy guard (§4.A): a second tap only
/// counts within 300ms and 50px of the first.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleTapTracker {
    last: Option<(Instant, f32, f32)>,
}

impl DoubleTapTracker {
    pub const WINDOW: Duration = Duration::from_millis(300);
    pub const MAX_MOVEMENT: f32 = 50.0;

    /// Registers a tap at `(x, y, now)`. Returns true if this completes a
    /// double-tap (and clears the tracker); false if this is the first tap
    /// of a new pair (the tap is recorded for next time).
    pub fn register(&mut self, x: f32, y: f32, now: Instant) -> bool {
        if let Some((last_time, lx, ly)) = self.last {
            let elapsed = now.duration_since(last_time);
            let moved = ((x - lx).powi(2) + (y - ly).powi(2)).sqrt();
            if elapsed <= Self::WINDOW && moved <= Self::MAX_MOVEMENT {
                self.last = None;
                return true;
            }
        }
        self.last = Some((now, x, y));
        false
    }
}

/// Two-finger pinch state: ratio of current to previous finger distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinchState {
    last_distance: Option<f32>,
}

impl PinchState {
    pub fn start(&mut self, distance: f32) {
        self.last_distance = Some(distance);
    }

    pub fn end(&mut self) {
        self.last_distance = None;
    }

    /// Returns the scale factor for this update and records the new distance.
    pub fn update(&mut self, distance: f32) -> f32 {
        let factor = match self.last_distance {
            Some(last) if last > 0.0 => distance / last,
            _ => 1.0,
        };
        self.last_distance = Some(distance);
        factor
    }
}

/// §4.A scale clamping: `effectiveMin = fitToScreen * minScaleConfig`;
/// `effectiveMax = max(fitToScreen * maxScaleConfig, 1.0)`.
pub fn clamp_scale(scale: f32, fit_scale: f32, config: &EngineConfig) -> f32 {
    let min = config.effective_min_scale(fit_scale);
    let max = config.effective_max_scale(fit_scale);
    scale.clamp(min, max)
}

/// Computes a zoom-about-point transform: `anchor` (viewport coords) stays
/// under the same source pixel after the scale changes from `old_scale` to
/// `new_scale`, given the current translate.
pub fn zoom_about_point(
    old_scale: f32,
    new_scale: f32,
    translate_x: f32,
    translate_y: f32,
    anchor_x: f32,
    anchor_y: f32,
) -> (f32, f32) {
    let ratio = new_scale / old_scale;
    let new_tx = anchor_x + (translate_x - anchor_x) * ratio;
    let new_ty = anchor_y + (translate_y - anchor_y) * ratio;
    (new_tx, new_ty)
}

/// Owns the current transform and viewport for one engine instance
/// (component A). Drag/double-tap/pinch trackers live alongside it so input
/// handlers are plain mutating methods, not closures over engine state.
pub struct Interaction {
    pub transform: Transform,
    pub viewport: Res,
    pub image: Res,
    pub drag: Option<DragState>,
    pub double_tap: DoubleTapTracker,
    pub pinch: PinchState,
    pub tile_update_limiter: RateLimiter,
}

impl Interaction {
    pub fn new(image: Res, viewport: Res, initial_scale: f32) -> Self {
        Self {
            transform: Transform::centered(initial_scale),
            viewport,
            image,
            drag: None,
            double_tap: DoubleTapTracker::default(),
            pinch: PinchState::default(),
            tile_update_limiter: RateLimiter::new(Duration::from_millis(50)),
        }
    }

    pub fn fit_scale(&self) -> f32 {
        self.image.fit_scale(self.viewport)
    }

    pub fn relative_scale(&self) -> f32 {
        self.transform.relative_scale(self.fit_scale())
    }

    fn clamp(&mut self, config: &EngineConfig) {
        self.transform.clamp(self.image, self.viewport, self.fit_scale(), config.limit_to_bounds);
    }

    /// §4.A `setViewportSize`.
    pub fn set_viewport_size(&mut self, viewport: Res, config: &EngineConfig) {
        if self.viewport == viewport {
            return;
        }
        self.viewport = viewport;
        self.clamp(config);
    }

    pub fn pointer_down(&mut self, x: f32, y: f32, now: Instant) {
        self.drag = Some(DragState::start(x, y, now));
    }

    /// Returns the delta applied, or `None` if not currently dragging.
    pub fn pointer_move(&mut self, x: f32, y: f32, now: Instant, touch: bool, config: &EngineConfig) -> Option<(f32, f32)> {
        let drag = self.drag.as_mut()?;
        if config.panning.disabled {
            return None;
        }
        drag.update_optimized(now, touch);
        let dx = x - drag.last_x;
        let dy = y - drag.last_y;
        drag.last_x = x;
        drag.last_y = y;

        self.transform.translate_x += dx;
        self.transform.translate_y += dy;
        self.clamp(config);
        Some((dx, dy))
    }

    pub fn pointer_up(&mut self) -> bool {
        self.drag.take().is_some()
    }

    pub fn is_drag_optimized(&self) -> bool {
        self.drag.map(|d| d.optimized).unwrap_or(false)
    }

    /// §4.A wheel: zoom about the pointer by `1 +/- step`.
    pub fn wheel(&mut self, delta_positive: bool, anchor_x: f32, anchor_y: f32, config: &EngineConfig) {
        if config.wheel.wheel_disabled {
            return;
        }
        let factor = if delta_positive { 1.0 + config.wheel.step } else { 1.0 / (1.0 + config.wheel.step) };
        let old_scale = self.transform.scale;
        let new_scale = clamp_scale(old_scale * factor, self.fit_scale(), config);
        let (tx, ty) = zoom_about_point(
            old_scale,
            new_scale,
            self.transform.translate_x,
            self.transform.translate_y,
            anchor_x,
            anchor_y,
        );
        self.transform = Transform { scale: new_scale, translate_x: tx, translate_y: ty };
        self.clamp(config);
    }

    /// §4.A double-tap: toggles between fit and 1:1, centered at `(x, y)`.
    /// Returns the animation target if this tap completed a double-tap.
    pub fn double_tap(&mut self, x: f32, y: f32, now: Instant, config: &EngineConfig) -> Option<Transform> {
        if !self.double_tap.register(x, y, now) {
            return None;
        }
        let fit = self.fit_scale();
        let target_scale = if (self.transform.scale - 1.0).abs() < 1e-3 { fit } else { 1.0 };
        let (tx, ty) = zoom_about_point(
            self.transform.scale,
            target_scale,
            self.transform.translate_x,
            self.transform.translate_y,
            x,
            y,
        );
        Some(Transform::clamped_target(
            target_scale,
            tx,
            ty,
            self.image,
            self.viewport,
            fit,
            config.limit_to_bounds,
        ))
    }

    /// §4.A pinch: scale factor anchored at the two-finger midpoint.
    pub fn pinch(&mut self, distance: f32, mid_x: f32, mid_y: f32, config: &EngineConfig) {
        if config.pinch.disabled {
            return;
        }
        let factor = self.pinch.update(distance);
        let old_scale = self.transform.scale;
        let new_scale = clamp_scale(old_scale * factor, self.fit_scale(), config);
        let (tx, ty) = zoom_about_point(
            old_scale,
            new_scale,
            self.transform.translate_x,
            self.transform.translate_y,
            mid_x,
            mid_y,
        );
        self.transform = Transform { scale: new_scale, translate_x: tx, translate_y: ty };
        self.clamp(config);
    }

    pub fn zoom_in(&mut self, config: &EngineConfig) -> Transform {
        let fit = self.fit_scale();
        let target = clamp_scale(self.transform.scale * (1.0 + config.wheel.step), fit, config);
        Transform::clamped_target(
            target,
            self.transform.translate_x,
            self.transform.translate_y,
            self.image,
            self.viewport,
            fit,
            config.limit_to_bounds,
        )
    }

    pub fn zoom_out(&mut self, config: &EngineConfig) -> Transform {
        let fit = self.fit_scale();
        let target = clamp_scale(self.transform.scale / (1.0 + config.wheel.step), fit, config);
        Transform::clamped_target(
            target,
            self.transform.translate_x,
            self.transform.translate_y,
            self.image,
            self.viewport,
            fit,
            config.limit_to_bounds,
        )
    }

    pub fn reset_view(&self, config: &EngineConfig) -> Transform {
        Transform::centered(self.fit_scale() * config.initial_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn double_tap_within_window_and_distance_counts() {
        let mut tracker = DoubleTapTracker::default();
        let t0 = Instant::now();
        assert!(!tracker.register(100.0, 100.0, t0));
        assert!(tracker.register(110.0, 105.0, t0 + Duration::from_millis(150)));
    }

    #[test]
    fn double_tap_too_far_apart_disqualifies() {
        let mut tracker = DoubleTapTracker::default();
        let t0 = Instant::now();
        assert!(!tracker.register(0.0, 0.0, t0));
        assert!(!tracker.register(100.0, 0.0, t0 + Duration::from_millis(100)));
    }

    #[test]
    fn double_tap_too_slow_disqualifies() {
        let mut tracker = DoubleTapTracker::default();
        let t0 = Instant::now();
        assert!(!tracker.register(0.0, 0.0, t0));
        assert!(!tracker.register(0.0, 0.0, t0 + Duration::from_millis(400)));
    }

    #[test]
    fn rate_limiter_blocks_within_interval() {
        let mut rl = RateLimiter::new(Duration::from_millis(50));
        let t0 = Instant::now();
        assert!(rl.poll(t0));
        assert!(!rl.poll(t0 + Duration::from_millis(10)));
        assert!(rl.poll(t0 + Duration::from_millis(60)));
    }

    #[test]
    fn zoom_about_point_keeps_anchor_fixed() {
        // With old_scale=1, translate=0, anchor=(200,300): after scaling to
        // 2x, the new translate must put the same source point back at the
        // anchor.
        let (tx, ty) = zoom_about_point(1.0, 2.0, 0.0, 0.0, 200.0, 300.0);
        // anchor + (0 - anchor) * 2 = anchor * (1 - 2) = -anchor
        assert_eq!(tx, -200.0);
        assert_eq!(ty, -300.0);
    }

    #[test]
    fn wheel_zoom_respects_effective_max() {
        let mut interaction = Interaction::new(
            Res { w: 4000, h: 3000 },
            Res { w: 1000, h: 750 },
            1.0,
        );
        let config = cfg();
        for _ in 0..200 {
            interaction.wheel(true, 500.0, 375.0, &config);
        }
        let fit = interaction.fit_scale();
        assert!(interaction.transform.scale <= config.effective_max_scale(fit) + 1e-3);
    }

    #[test]
    fn double_tap_toggles_between_fit_and_one() {
        let mut interaction = Interaction::new(
            Res { w: 4000, h: 3000 },
            Res { w: 1000, h: 750 },
            0.25,
        );
        let config = cfg();
        interaction.transform.scale = 1.0;
        let t0 = Instant::now();
        interaction.double_tap(500.0, 375.0, t0, &config);
        let target = interaction
            .double_tap(500.0, 375.0, t0 + Duration::from_millis(100), &config)
            .unwrap();
        assert!((target.scale - interaction.fit_scale()).abs() < 1e-3);
    }

    #[test]
    fn below_fit_scale_forces_centered_transform() {
        let mut interaction =
            Interaction::new(Res { w: 2000, h: 1000 }, Res { w: 1000, h: 800 }, 0.1);
        let config = cfg();
        interaction.pointer_down(0.0, 0.0, Instant::now());
        interaction.pointer_move(500.0, 500.0, Instant::now(), false, &config);
        assert_eq!(interaction.transform.translate_x, 0.0);
        assert_eq!(interaction.transform.translate_y, 0.0);
    }
}
