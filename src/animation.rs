use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::com::Transform;

/// One in-flight transform animation (§3 "Animation", §4.B). At most one is
/// ever active; starting a new one replaces the old.
#[derive(Debug, Clone, Copy)]
struct AnimationState {
    start: Instant,
    duration: Duration,
    start_scale: f32,
    target_scale: f32,
    start_tx: f32,
    target_tx: f32,
    start_ty: f32,
    target_ty: f32,
}

/// Drives time-based interpolation of scale/translate (component B). Not
/// itself timer-driven: the host calls `tick()` once per display-refresh
/// callback, matching §5's "only yields across display-refresh callbacks".
///
/// While an animation is active `lod_suspended()` is true; LOD Pyramid and
/// Tile Engine poll it before starting new background work.
pub struct AnimationScheduler {
    state: std::sync::Mutex<Option<AnimationState>>,
    generation: AtomicU64,
    suspended: AtomicBool,
}

impl Default for AnimationScheduler {
    fn default() -> Self {
        Self {
            state: std::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            suspended: AtomicBool::new(false),
        }
    }
}

/// Ease-out-quartic, per §4.B: `p = 1 - (1-t)^4`.
fn ease_out_quartic(t: f32) -> f32 {
    let inv = 1.0 - t;
    1.0 - inv * inv * inv * inv
}

impl AnimationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an animation toward `target`, which the caller must already
    /// have clamped (§4.B: "targets are clamped before the animation
    /// starts"). `current` is read as the animation's start point.
    pub fn start(&self, current: Transform, target: Transform, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        *state = Some(AnimationState {
            start: Instant::now(),
            duration,
            start_scale: current.scale,
            target_scale: target.scale,
            start_tx: current.translate_x,
            target_tx: target.translate_x,
            start_ty: current.translate_y,
            target_ty: target.translate_y,
        });
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.suspended.store(true, Ordering::SeqCst);
    }

    /// Cancels any in-flight animation. Idempotent (§4.A: "animation
    /// interruption is always idempotent").
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        if state.take().is_some() {
            self.suspended.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }

    pub fn lod_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Advances the animation to `now`. Returns `Some(transform)` for every
    /// active tick, `None` once there is nothing to animate. The returned
    /// `bool` is true exactly on the tick that completes the animation,
    /// signaling the caller to clear suspension and force a refresh.
    pub fn tick(&self) -> Option<(Transform, bool)> {
        let mut guard = self.state.lock().unwrap();
        let anim = (*guard)?;

        let elapsed = anim.start.elapsed();
        let t = (elapsed.as_secs_f32() / anim.duration.as_secs_f32().max(f32::EPSILON)).clamp(0.0, 1.0);
        let p = ease_out_quartic(t);

        let scale = anim.start_scale + (anim.target_scale - anim.start_scale) * p;
        let translate_x = anim.start_tx + (anim.target_tx - anim.start_tx) * p;
        let translate_y = anim.start_ty + (anim.target_ty - anim.start_ty) * p;

        let done = t >= 1.0;
        if done {
            *guard = None;
            self.suspended.store(false, Ordering::SeqCst);
        }

        Some((
            Transform {
                scale: if done { anim.target_scale } else { scale },
                translate_x: if done { anim.target_tx } else { translate_x },
                translate_y: if done { anim.target_ty } else { translate_y },
            },
            done,
        ))
    }
}

/// Runs `on_tick` repeatedly via `scheduler` until the animation completes,
/// without depending on a real display-refresh loop. Used by hosts that
/// drive the engine from `scheduler.rs`'s `Scheduler` abstraction rather than
/// a GUI main loop directly.
pub fn drive_to_completion(
    animation: Arc<AnimationScheduler>,
    scheduler: Arc<dyn crate::scheduler::Scheduler>,
    frame_interval: Duration,
    mut on_tick: impl FnMut(Transform, bool) + Send + 'static,
) {
    fn step(
        animation: Arc<AnimationScheduler>,
        scheduler: Arc<dyn crate::scheduler::Scheduler>,
        frame_interval: Duration,
        mut on_tick: Box<dyn FnMut(Transform, bool) + Send>,
    ) {
        let Some((transform, done)) = animation.tick() else { return };
        on_tick(transform, done);
        if !done {
            let sched = scheduler.clone();
            scheduler.schedule_after(
                frame_interval,
                Box::new(move || step(animation, sched, frame_interval, on_tick)),
            );
        }
    }
    step(animation, scheduler, frame_interval, Box::new(move |t, d| on_tick(t, d)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_with_no_animation_returns_none() {
        let sched = AnimationScheduler::new();
        assert!(sched.tick().is_none());
    }

    #[test]
    fn start_sets_suspended_until_completion() {
        let sched = AnimationScheduler::new();
        let from = Transform::centered(0.5);
        let to = Transform::centered(1.0);
        sched.start(from, to, Duration::from_millis(1));
        assert!(sched.lod_suspended());
        std::thread::sleep(Duration::from_millis(5));
        let (t, done) = sched.tick().unwrap();
        assert!(done);
        assert_eq!(t.scale, 1.0);
        assert!(!sched.lod_suspended());
    }

    #[test]
    fn cancel_is_idempotent() {
        let sched = AnimationScheduler::new();
        sched.cancel();
        sched.cancel();
        assert!(!sched.is_active());
    }

    #[test]
    fn ease_out_quartic_endpoints() {
        assert_eq!(ease_out_quartic(0.0), 0.0);
        assert!((ease_out_quartic(1.0) - 1.0).abs() < 1e-6);
    }
}
