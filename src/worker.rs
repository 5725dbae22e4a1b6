use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbaImage;

use crate::resample::{self, FilterType};

/// Request sent to the resample worker (§4.E `CREATE_LOD`). `pixels` is
/// moved in, never cloned — ownership transfers for the duration of the
/// request, matching §5's "transfer, not share".
pub struct CreateLodRequest {
    pub id: u64,
    pub pixels: Arc<RgbaImage>,
    pub target_width: u32,
    pub target_height: u32,
    pub filter: FilterType,
}

pub enum WorkerResponse {
    Created { id: u64, pixels: RgbaImage, width: u32, height: u32 },
    Error { id: u64, error: String },
}

/// One dedicated thread doing CPU resampling off the render thread (§5,
/// component E). Requests and responses cross a `flume` channel; there is no
/// shared mutable state between the render thread and the worker.
pub struct ResampleWorker {
    tx: flume::Sender<CreateLodRequest>,
    rx: flume::Receiver<WorkerResponse>,
    alive: Arc<AtomicBool>,
}

impl ResampleWorker {
    pub fn spawn() -> Self {
        let (req_tx, req_rx) = flume::unbounded::<CreateLodRequest>();
        let (resp_tx, resp_rx) = flume::unbounded::<WorkerResponse>();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_in_thread = alive.clone();

        std::thread::Builder::new()
            .name("gigaview-resample".into())
            .spawn(move || {
                while let Ok(req) = req_rx.recv() {
                    let out = resample::resize_par_linear(
                        &req.pixels,
                        req.target_width,
                        req.target_height,
                        req.filter,
                    );
                    let (width, height) = (out.width(), out.height());
                    if resp_tx
                        .send(WorkerResponse::Created { id: req.id, pixels: out, width, height })
                        .is_err()
                    {
                        break;
                    }
                }
                alive_in_thread.store(false, Ordering::SeqCst);
            })
            .expect("failed to spawn resample worker thread");

        Self { tx: req_tx, rx: resp_rx, alive }
    }

    /// Submits a request. Fails if the worker thread has gone away; the
    /// caller (§7) falls back to a synchronous `resample::resize_par_linear`
    /// call on the render thread.
    pub fn submit(&self, req: CreateLodRequest) -> Result<(), crate::error::EngineError> {
        self.tx.send(req).map_err(|_| crate::error::EngineError::WorkerUnavailable)
    }

    pub fn try_recv(&self) -> Option<WorkerResponse> {
        self.rx.try_recv().ok()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Tracks outstanding worker requests, keyed by id, so completions that no
/// longer match the current LOD/tile target can be dropped (§4.E "the
/// engine accepts only those whose level still matches the current target").
#[derive(Default)]
pub struct OutstandingRequests {
    by_id: ahash::AHashMap<u64, u8>,
}

impl OutstandingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u64, level: u8) {
        self.by_id.insert(id, level);
    }

    /// Removes `id` and returns whether its recorded level still matches
    /// `current_level` (the check that decides whether to apply or discard
    /// a completion).
    pub fn take_if_current(&mut self, id: u64, current_level: u8) -> bool {
        match self.by_id.remove(&id) {
            Some(level) => level == current_level,
            None => false,
        }
    }

    /// Drains every outstanding request, returning each id with the level it
    /// was requested for so the caller can also release any per-level lock
    /// (e.g. `LodPyramid::abort_create`) it was holding.
    pub fn reject_all(&mut self) -> Vec<(u64, u8)> {
        self.by_id.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn worker_round_trips_a_resize_request() {
        let worker = ResampleWorker::spawn();
        let pixels = Arc::new(RgbaImage::from_pixel(64, 64, Rgba([10, 20, 30, 255])));
        worker
            .submit(CreateLodRequest {
                id: 1,
                pixels,
                target_width: 16,
                target_height: 16,
                filter: FilterType::Lanczos3,
            })
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if let Some(WorkerResponse::Created { id, width, height, .. }) = worker.try_recv() {
                assert_eq!(id, 1);
                assert_eq!((width, height), (16, 16));
                break;
            }
            assert!(std::time::Instant::now() < deadline, "worker did not respond in time");
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    #[test]
    fn outstanding_requests_drop_stale_completions() {
        let mut outstanding = OutstandingRequests::new();
        outstanding.insert(1, 4);
        assert!(!outstanding.take_if_current(1, 5));

        outstanding.insert(2, 4);
        assert!(outstanding.take_if_current(2, 4));
    }

    #[test]
    fn reject_all_drains_and_returns_every_id() {
        let mut outstanding = OutstandingRequests::new();
        outstanding.insert(1, 4);
        outstanding.insert(2, 5);
        let mut rejected = outstanding.reject_all();
        rejected.sort_unstable();
        assert_eq!(rejected, vec![(1, 4), (2, 5)]);
        assert!(outstanding.is_empty());
    }
}
