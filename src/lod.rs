use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::com::{select_optimal_lod, LodLevel, Res, DEFAULT_LOD_TABLE};
use crate::renderer::{Renderer, TextureFilter, TextureId};
use crate::scheduler::Scheduler;

const DEBOUNCE: Duration = Duration::from_millis(200);

/// Single-LOD-resident pyramid for images that don't qualify for tile mode
/// (§4.C). At most one LOD texture is GPU-resident; `currently_creating`
/// prevents firing a second request for the same target while one is
/// in-flight.
pub struct LodPyramid {
    table: Vec<LodLevel>,
    current: Mutex<Option<(u8, TextureId)>>,
    /// `u8::MAX` means "not creating"; anything else is the level in flight.
    creating: AtomicU8,
    suspended: AtomicBool,
}

const NOT_CREATING: u8 = u8::MAX;

impl Default for LodPyramid {
    fn default() -> Self {
        Self::new(DEFAULT_LOD_TABLE.to_vec())
    }
}

impl LodPyramid {
    pub fn new(table: Vec<LodLevel>) -> Self {
        crate::com::assert_ascending(&table);
        Self {
            table,
            current: Mutex::new(None),
            creating: AtomicU8::new(NOT_CREATING),
            suspended: AtomicBool::new(false),
        }
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// §4.C `selectOptimalLOD`.
    pub fn target_level(&self, relative_scale: f32) -> u8 {
        select_optimal_lod(&self.table, relative_scale) as u8
    }

    pub fn level_scale(&self, level: u8) -> f32 {
        self.table[level as usize].scale
    }

    pub fn current(&self) -> Option<(u8, TextureId)> {
        *self.current.lock().unwrap()
    }

    /// Pixel-art heuristic (§4.C): nearest when `source < threshold px on a
    /// side` and the chosen level's scale is `>= 1`.
    pub fn filter_for(&self, source: Res, level: u8, pixel_art_threshold: u32) -> TextureFilter {
        let small_source = source.w.max(source.h) < pixel_art_threshold;
        if small_source && self.level_scale(level) >= 1.0 {
            TextureFilter::Nearest
        } else {
            TextureFilter::Linear
        }
    }

    /// Claims the right to start creating `level`. Returns `false` if
    /// already creating this level or suspended (caller should not proceed).
    pub fn begin_create(&self, level: u8) -> bool {
        if self.suspended.load(Ordering::SeqCst) {
            return false;
        }
        self.creating.compare_exchange(NOT_CREATING, level, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    /// Releases the creating-lock for `level` without installing a texture
    /// (§4.E worker-error recovery), so a later `begin_create` for the same
    /// level isn't blocked forever by a request that never completed.
    pub fn abort_create(&self, level: u8) {
        let _ = self.creating.compare_exchange(level, NOT_CREATING, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Installs a newly created texture for `level`, deleting whatever was
    /// previously resident. If the pyramid was suspended before this fired,
    /// the new texture is deleted instead and nothing is installed (§4.C).
    /// Returns whether a render should be triggered.
    pub fn finish_create(&self, level: u8, texture: TextureId, renderer: &Renderer) -> bool {
        self.creating.store(NOT_CREATING, Ordering::SeqCst);

        if self.suspended.load(Ordering::SeqCst) {
            renderer.delete_texture(texture);
            return false;
        }

        let mut current = self.current.lock().unwrap();
        if let Some((_, old)) = current.take() {
            renderer.delete_texture(old);
        }
        *current = Some((level, texture));
        true
    }

    pub fn teardown(&self, renderer: &Renderer) {
        if let Some((_, tex)) = self.current.lock().unwrap().take() {
            renderer.delete_texture(tex);
        }
    }

    /// §4.C `debouncedUpdate`: schedules a 200ms trailing-edge call to
    /// `on_fire(target_level)`. Suspension (checked again at fire time by
    /// the caller via `is_suspended`) short-circuits the effect, not the
    /// scheduling itself — matching "suspension short-circuits both the
    /// schedule and the fire" by making the fired closure a no-op.
    pub fn debounced_update(
        &self,
        scheduler: &dyn Scheduler,
        relative_scale: f32,
        on_fire: impl FnOnce(u8) + Send + 'static,
    ) {
        if self.suspended.load(Ordering::SeqCst) {
            return;
        }
        let level = self.target_level(relative_scale);
        scheduler.schedule_after(DEBOUNCE, Box::new(move || on_fire(level)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;

    #[test]
    fn begin_create_rejects_concurrent_request() {
        let pyramid = LodPyramid::default();
        assert!(pyramid.begin_create(4));
        assert!(!pyramid.begin_create(4));
        assert!(!pyramid.begin_create(5));
    }

    #[test]
    fn abort_create_releases_the_lock_for_retry() {
        let pyramid = LodPyramid::default();
        assert!(pyramid.begin_create(4));
        assert!(!pyramid.begin_create(4));
        pyramid.abort_create(4);
        assert!(pyramid.begin_create(4));
    }

    #[test]
    fn begin_create_rejected_while_suspended() {
        let pyramid = LodPyramid::default();
        pyramid.set_suspended(true);
        assert!(!pyramid.begin_create(4));
    }

    #[test]
    fn target_level_matches_selection_table() {
        let pyramid = LodPyramid::default();
        assert_eq!(pyramid.target_level(1.0), 4);
        assert_eq!(pyramid.target_level(20.0), 7);
    }

    #[test]
    fn filter_for_picks_nearest_for_small_source_at_high_lod() {
        let pyramid = LodPyramid::default();
        let small = Res { w: 400, h: 300 };
        assert_eq!(pyramid.filter_for(small, 4, 512), TextureFilter::Nearest);
        assert_eq!(pyramid.filter_for(small, 2, 512), TextureFilter::Linear);
    }

    #[test]
    fn debounced_update_fires_after_delay_not_before() {
        let sched = ManualScheduler::new();
        let pyramid = LodPyramid::default();
        let fired = std::sync::Arc::new(std::sync::Mutex::new(None));
        let f = fired.clone();
        pyramid.debounced_update(&sched, 1.0, move |level| *f.lock().unwrap() = Some(level));
        sched.advance(Duration::from_millis(100));
        assert!(fired.lock().unwrap().is_none());
        sched.advance(Duration::from_millis(150));
        assert_eq!(*fired.lock().unwrap(), Some(4));
    }

    #[test]
    fn debounced_update_does_nothing_while_suspended() {
        let sched = ManualScheduler::new();
        let pyramid = LodPyramid::default();
        pyramid.set_suspended(true);
        pyramid.debounced_update(&sched, 1.0, |_| panic!("must not fire"));
        assert_eq!(sched.pending_count(), 0);
    }
}
