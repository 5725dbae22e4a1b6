use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Abstracts "run this later" so animation/debounce logic can be driven by a
/// deterministic virtual clock in tests instead of real timers (§9 design
/// note). Replaces the teacher's `glib::timeout_add_local_once` calls, which
/// only exist inside a running GTK main loop.
pub trait Scheduler: Send + Sync {
    /// Schedules `f` to run after `delay`.
    fn schedule_after(&self, delay: Duration, f: Box<dyn FnOnce() + Send>) -> ScheduledHandle;

    /// Schedules `f` to run the next time the caller drains idle work
    /// (`RealTimeScheduler` runs it on its worker thread immediately;
    /// `ManualScheduler` requires an explicit `run_idle`).
    fn schedule_idle(&self, f: Box<dyn FnOnce() + Send>) -> ScheduledHandle;
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduledHandle(u64);

impl ScheduledHandle {
    fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Production scheduler: a single background thread running a min-heap of
/// pending timers, woken by condvar. Mirrors the shape of the teacher's
/// `spawn_thread` helper in `main.rs` more than any GTK timer API, since
/// there's no main loop to piggyback on outside a GUI host.
pub struct RealTimeScheduler {
    inner: Arc<Mutex<Vec<Timer>>>,
    cvar: Arc<std::sync::Condvar>,
    cancelled: Arc<Mutex<ahash::AHashSet<u64>>>,
}

struct Timer {
    id: u64,
    at: Instant,
    f: Option<Box<dyn FnOnce() + Send>>,
}

impl RealTimeScheduler {
    pub fn new() -> Self {
        let inner: Arc<Mutex<Vec<Timer>>> = Arc::new(Mutex::new(Vec::new()));
        let cvar = Arc::new(std::sync::Condvar::new());
        let cancelled = Arc::new(Mutex::new(ahash::AHashSet::default()));

        let worker_inner = inner.clone();
        let worker_cvar = cvar.clone();
        let worker_cancelled = cancelled.clone();
        std::thread::Builder::new()
            .name("gigaview-scheduler".into())
            .spawn(move || Self::run(worker_inner, worker_cvar, worker_cancelled))
            .expect("failed to spawn scheduler thread");

        Self { inner, cvar, cancelled }
    }

    fn run(
        inner: Arc<Mutex<Vec<Timer>>>,
        cvar: Arc<std::sync::Condvar>,
        cancelled: Arc<Mutex<ahash::AHashSet<u64>>>,
    ) {
        loop {
            let mut guard = inner.lock().unwrap();
            let wait_until = guard.iter().map(|t| t.at).min();

            guard = match wait_until {
                None => cvar.wait(guard).unwrap(),
                Some(at) => {
                    let now = Instant::now();
                    if at > now {
                        let (g, _) = cvar.wait_timeout(guard, at - now).unwrap();
                        g
                    } else {
                        guard
                    }
                }
            };

            let now = Instant::now();
            let mut due = Vec::new();
            guard.retain(|t| {
                if t.at <= now {
                    due.push(t.id);
                    false
                } else {
                    true
                }
            });
            let mut fired = Vec::new();
            for id in due {
                if let Some(pos) = guard.iter().position(|t| t.id == id) {
                    fired.push(guard.remove(pos));
                }
            }
            drop(guard);

            let skip = cancelled.lock().unwrap();
            for mut t in fired {
                if skip.contains(&t.id) {
                    continue;
                }
                if let Some(f) = t.f.take() {
                    f();
                }
            }
        }
    }
}

impl Default for RealTimeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RealTimeScheduler {
    /// Prevents a previously scheduled timer from firing, if it hasn't already.
    pub fn cancel(&self, handle: ScheduledHandle) {
        self.cancelled.lock().unwrap().insert(handle.0);
    }
}

impl Scheduler for RealTimeScheduler {
    fn schedule_after(&self, delay: Duration, f: Box<dyn FnOnce() + Send>) -> ScheduledHandle {
        let handle = ScheduledHandle::next();
        let timer = Timer { id: handle.0, at: Instant::now() + delay, f: Some(f) };
        self.inner.lock().unwrap().push(timer);
        self.cvar.notify_all();
        handle
    }

    fn schedule_idle(&self, f: Box<dyn FnOnce() + Send>) -> ScheduledHandle {
        self.schedule_after(Duration::ZERO, f)
    }
}

/// Test double with a virtual clock: nothing fires until `advance` is
/// called, so debounce/animation tests are deterministic instead of racing
/// real timers.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    pending: Vec<(u64, Duration, Option<Box<dyn FnOnce() + Send>>)>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the virtual clock by `delta` and runs everything now due, in
    /// scheduled order.
    pub fn advance(&self, delta: Duration) {
        let mut state = self.state.lock().unwrap();
        state.now += delta;
        let now = state.now;

        let mut due = Vec::new();
        state.pending.retain_mut(|(id, at, f)| {
            if *at <= now {
                due.push((*at, *id, f.take()));
                false
            } else {
                true
            }
        });
        drop(state);

        due.sort_by_key(|(at, id, _)| (*at, *id));
        for (_, _, f) in due {
            if let Some(f) = f {
                f();
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_after(&self, delay: Duration, f: Box<dyn FnOnce() + Send>) -> ScheduledHandle {
        let handle = ScheduledHandle::next();
        let mut state = self.state.lock().unwrap();
        let at = state.now + delay;
        state.pending.push((handle.0, at, Some(f)));
        handle
    }

    fn schedule_idle(&self, f: Box<dyn FnOnce() + Send>) -> ScheduledHandle {
        self.schedule_after(Duration::ZERO, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn manual_scheduler_does_not_fire_before_advance() {
        let sched = ManualScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        sched.schedule_after(Duration::from_millis(200), Box::new(move || {
            flag.store(true, Ordering::SeqCst);
        }));
        assert!(!fired.load(Ordering::SeqCst));
        sched.advance(Duration::from_millis(100));
        assert!(!fired.load(Ordering::SeqCst));
        sched.advance(Duration::from_millis(100));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn manual_scheduler_fires_in_order() {
        let sched = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (i, ms) in [(1, 10), (2, 5), (3, 20)] {
            let o = order.clone();
            sched.schedule_after(Duration::from_millis(ms), Box::new(move || {
                o.lock().unwrap().push(i);
            }));
        }
        sched.advance(Duration::from_millis(25));
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 3]);
    }
}
