use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glium::backend::Facade;
use glium::{Frame, Surface};
use log::{debug, info, trace, warn};

use crate::animation::AnimationScheduler;
use crate::com::{Image, Res, TileKey, DEFAULT_LOD_TABLE};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::interaction::Interaction;
use crate::lod::LodPyramid;
use crate::renderer::{image_matrix, tile_matrix, Renderer, TextureFilter, TextureId};
use crate::resample::{self, FilterType};
use crate::scheduler::Scheduler;
use crate::tile::{
    self, buffer_fraction, buffer_priority, in_viewport_priority, prefetch_priority,
    tile_index_range, tile_lod_for_scale, viewport_to_source_rect, ConcurrencyBudget, LoadMode,
    TileCache,
};
use crate::worker::{next_request_id, CreateLodRequest, OutstandingRequests, ResampleWorker, WorkerResponse};

/// Window after a double-tap toggle during which tile loads get the widened
/// `post_toggle` concurrency ceiling (§4.D). Not spec'd exactly; picked to
/// comfortably outlast the double-tap animation (`animation_time_ms`
/// defaults to 300ms) so the burst of tiles the new LOD needs isn't
/// throttled mid-animation.
const POST_TOGGLE_WINDOW: Duration = Duration::from_millis(500);

/// §4.A "after a short settle (~50ms), one unconditional tile update" and
/// §4.B "a second recomputation ~50ms later to catch late-loading tiles".
const SETTLE_REFRESH_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    High,
    Medium,
    Low,
    Unknown,
}

/// §6 `onDebugUpdate` payload.
#[derive(Debug, Clone, Copy)]
pub struct DebugSnapshot {
    pub scale: f32,
    pub relative_scale: f32,
    pub translate_x: f32,
    pub translate_y: f32,
    pub canvas: Res,
    pub image: Res,
    pub fit_scale: f32,
    pub effective_min_scale: f32,
    pub effective_max_scale: f32,
    pub texture_bytes: u64,
    pub budget_bytes: u64,
    pub pressure_ratio: f32,
    pub active_lod_count: u8,
    pub tile_mode: bool,
    pub active_tile_count: usize,
    pub cached_tile_count: usize,
    pub loading_tile_count: usize,
}

/// Host-supplied callbacks (§6). Default methods make every one optional.
#[allow(unused_variables)]
pub trait Observer: Send {
    fn on_zoom_change(&mut self, absolute_scale: f32, relative_scale: f32) {}
    fn on_loading_state_change(&mut self, is_loading: bool, message: Option<&str>, quality: Quality) {}
    fn on_debug_update(&mut self, snapshot: DebugSnapshot) {}
    fn on_image_copied(&mut self) {}
}

/// A no-op observer for hosts/tests that don't care.
pub struct NullObserver;
impl Observer for NullObserver {}

enum Mode {
    /// Small-image strategy (component C).
    Lod(LodPyramid),
    /// Large-image strategy (component D). `background` is `None` for images
    /// so large that even the background was skipped (§4.D).
    Tiled { cache: TileCache, background: Option<TextureId>, current_level: u8 },
}

/// Top-level object wiring components A-F together (§2). One instance per
/// loaded image; `load` may be called again to replace it.
pub struct Engine {
    config: EngineConfig,
    renderer: Renderer,
    worker: ResampleWorker,
    outstanding: OutstandingRequests,
    scheduler: Arc<dyn Scheduler>,
    observer: Box<dyn Observer>,
    animation: AnimationScheduler,
    interaction: Option<Interaction>,
    image: Option<Image>,
    mode: Option<Mode>,
    mobile: bool,
    /// Set by a fired [`LodPyramid::debounced_update`] closure; cleared and
    /// acted on by [`Engine::poll_pending_refresh`].
    pending_refresh: Arc<AtomicBool>,
    /// Set by a scheduled settle callback (drag-release, animation
    /// completion); cleared and acted on by [`Engine::poll_pending_refresh`].
    pending_unconditional_refresh: Arc<AtomicBool>,
    /// True for [`POST_TOGGLE_WINDOW`] after a double-tap, widening the tile
    /// concurrency ceiling while the new LOD's tiles stream in.
    post_toggle_active: Arc<AtomicBool>,
}

/// §4.D concurrency tier: dragging beats idle, but a recent double-tap
/// toggle briefly beats both (the new LOD's tiles need to stream in fast).
fn select_load_mode(post_toggle_active: bool, dragging: bool) -> LoadMode {
    if post_toggle_active {
        LoadMode::PostToggle
    } else if dragging {
        LoadMode::Dragging
    } else {
        LoadMode::Idle
    }
}

/// §4.D step 4 "tileSize * lodScale, capped to the platform ceiling": the
/// tile's resample target resolution at the given LOD's scale factor.
fn tile_target_dims(w: u32, h: u32, level_scale: f32, max_side: u32) -> (u32, u32) {
    let target_w = ((w as f32 * level_scale).round() as u32).clamp(1, max_side);
    let target_h = ((h as f32 * level_scale).round() as u32).clamp(1, max_side);
    (target_w, target_h)
}

/// Resamples and uploads the tile at grid cell `(gx, gy)`, returning the
/// texture plus the clipped source-pixel footprint (`w`/`h`) to store in the
/// cache — not the resample target's raster dimensions (§4.D/§4.F, the two
/// differ for LOD levels below 1x). Returns `None` for an empty edge cell or
/// a failed upload; the caller is responsible for local recovery (§7).
fn create_tile_texture(
    renderer: &Renderer,
    facade: &impl Facade,
    image: &Image,
    gx: u32,
    gy: u32,
    tile_size: u32,
    image_res: Res,
    level_scale: f32,
    level: u8,
    max_tile_texture_side: u32,
) -> Option<(TextureId, u32, u32)> {
    let w = tile_size.min(image_res.w.saturating_sub(gx * tile_size));
    let h = tile_size.min(image_res.h.saturating_sub(gy * tile_size));
    if w == 0 || h == 0 {
        return None;
    }
    let src = image.sub_rect(gx * tile_size, gy * tile_size, w, h);
    let (target_w, target_h) = tile_target_dims(w, h, level_scale, max_tile_texture_side);
    let resized = resample::resize_par_linear(&src, target_w, target_h, FilterType::Lanczos3);
    match renderer.create_texture(facade, &resized) {
        Ok(texture) => Some((texture, w, h)),
        Err(e) => {
            warn!("{}: {e}", EngineError::TileUploadFailed { x: gx, y: gy, level });
            None
        }
    }
}

impl Engine {
    /// Fatal on GPU context/shader failure (§7): construction does not
    /// partially initialize.
    pub fn new(
        facade: &impl Facade,
        config: EngineConfig,
        scheduler: Arc<dyn Scheduler>,
        observer: Box<dyn Observer>,
        mobile: bool,
    ) -> Result<Self> {
        let renderer = Renderer::new(facade)?;
        Ok(Self {
            config,
            renderer,
            worker: ResampleWorker::spawn(),
            outstanding: OutstandingRequests::new(),
            scheduler,
            observer,
            animation: AnimationScheduler::new(),
            interaction: None,
            image: None,
            mode: None,
            mobile,
            pending_refresh: Arc::new(AtomicBool::new(false)),
            pending_unconditional_refresh: Arc::new(AtomicBool::new(false)),
            post_toggle_active: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn get_scale(&self) -> f32 {
        self.interaction.as_ref().map(|i| i.transform.scale).unwrap_or(1.0)
    }

    fn notify_zoom_change(&mut self) {
        if let Some(interaction) = &self.interaction {
            let absolute = interaction.transform.scale;
            let relative = interaction.relative_scale();
            self.observer.on_zoom_change(absolute, relative);
        }
    }

    /// §4.A `load`: begins rendering a new image, choosing LOD-vs-tile
    /// strategy immediately.
    pub fn load(&mut self, facade: &impl Facade, image: Image, viewport: Res) -> Result<()> {
        self.teardown(facade);

        self.observer.on_loading_state_change(true, None, Quality::Unknown);

        let interaction = Interaction::new(image.res(), viewport, self.config.initial_scale);
        let peak_lod_bytes = image.res().byte_size();

        if self.config.needs_tiling(image.res(), peak_lod_bytes) {
            info!("entering tile mode for {:?}", image.res());
            let background = self.create_background(facade, &image)?;
            self.mode = Some(Mode::Tiled { cache: TileCache::new(), background, current_level: 0 });
        } else {
            debug!("using single-LOD mode for {:?}", image.res());
            self.mode = Some(Mode::Lod(LodPyramid::default()));
        }

        self.interaction = Some(interaction);
        self.image = Some(image);
        self.notify_zoom_change();

        if let Some(Mode::Lod(_)) = &self.mode {
            self.refresh_lod(facade)?;
        } else {
            self.refresh_tiles(facade, false)?;
        }

        self.observer.on_loading_state_change(false, None, Quality::High);
        Ok(())
    }

    /// §4.D background layer: a single low-resolution texture of the whole
    /// image, skipped outright above the mobile/desktop megapixel ceiling.
    fn create_background(&self, facade: &impl Facade, image: &Image) -> Result<Option<TextureId>> {
        let mp = image.res().megapixels();
        if mp > self.config.memory.skip_background_above_megapixels {
            warn!("skipping background texture for {mp:.0} MP image");
            return Ok(None);
        }

        let max_side = self.config.memory.max_background_side;
        let mut target = image.res().scaled(max_side as f32 / image.res().longest_side() as f32);
        while target.byte_size() > self.config.memory.max_background_bytes {
            target = target.scaled(0.75);
        }

        let resized = resample::resize_par_linear(
            &image.sub_rect(0, 0, image.res().w, image.res().h),
            target.w,
            target.h,
            FilterType::Lanczos3,
        );
        Ok(Some(self.renderer.create_texture(facade, &resized)?))
    }

    /// §4.C: selects and (re)requests the appropriate single LOD for the
    /// current relative scale.
    fn refresh_lod(&mut self, facade: &impl Facade) -> Result<()> {
        let Some(interaction) = &self.interaction else { return Ok(()) };
        let Some(Mode::Lod(pyramid)) = &self.mode else { return Ok(()) };
        if pyramid.is_suspended() {
            return Ok(());
        }

        let level = pyramid.target_level(interaction.relative_scale());
        if let Some((current, _)) = pyramid.current() {
            if current == level {
                return Ok(());
            }
        }
        if !pyramid.begin_create(level) {
            return Ok(());
        }

        let image = self.image.as_ref().ok_or(EngineError::GpuContextUnavailable)?;
        let scale = pyramid.level_scale(level);
        let target = image.res().scaled(scale);

        let pixel_art = image.res().longest_side() < self.config.pixel_art_threshold;
        let filter = if pixel_art && scale >= 1.0 { FilterType::Nearest } else { FilterType::Lanczos3 };

        let pixels = if filter == FilterType::Nearest || !self.worker.is_alive() {
            resample::resize_par_linear(&image.sub_rect(0, 0, image.res().w, image.res().h), target.w, target.h, filter)
        } else {
            match self.submit_worker_request(image, target, filter, level) {
                Ok(()) => return Ok(()),
                Err(EngineError::WorkerUnavailable) => {
                    warn!("resample worker unavailable, falling back to synchronous resample");
                    resample::resize_par_linear(&image.sub_rect(0, 0, image.res().w, image.res().h), target.w, target.h, filter)
                }
                Err(e) => return Err(e),
            }
        };

        self.install_lod_result(facade, level, pixels)
    }

    fn submit_worker_request(&mut self, image: &Image, target: Res, filter: FilterType, level: u8) -> Result<()> {
        let id = next_request_id();
        self.worker.submit(CreateLodRequest {
            id,
            pixels: image.pixels().clone(),
            target_width: target.w,
            target_height: target.h,
            filter,
        })?;
        self.outstanding.insert(id, level);
        Ok(())
    }

    /// §7 local recovery: a failed upload is logged and skipped rather than
    /// propagated, leaving the previously-resident LOD (if any) in place.
    fn install_lod_result(&mut self, facade: &impl Facade, level: u8, pixels: image::RgbaImage) -> Result<()> {
        let texture = match self.renderer.create_texture(facade, &pixels) {
            Ok(texture) => texture,
            Err(e) => {
                warn!("{}: {e}", EngineError::LodUploadFailed { level });
                if let Some(Mode::Lod(pyramid)) = &self.mode {
                    pyramid.abort_create(level);
                }
                return Ok(());
            }
        };
        let Some(Mode::Lod(pyramid)) = &self.mode else {
            self.renderer.delete_texture(texture);
            return Ok(());
        };
        pyramid.finish_create(level, texture, &self.renderer);
        Ok(())
    }

    /// Drains completed worker responses, applying only those whose level
    /// still matches the current target (§4.E stale-work policy).
    pub fn poll_worker(&mut self, facade: &impl Facade) -> Result<()> {
        while let Some(response) = self.worker.try_recv() {
            match response {
                WorkerResponse::Created { id, pixels, .. } => {
                    let Some(interaction) = &self.interaction else { continue };
                    let Some(Mode::Lod(pyramid)) = &self.mode else { continue };
                    let current_target = pyramid.target_level(interaction.relative_scale());

                    if self.outstanding.take_if_current(id, current_target) {
                        self.install_lod_result(facade, current_target, pixels)?;
                    } else {
                        trace!("dropping stale LOD completion id={id}");
                    }
                }
                WorkerResponse::Error { id, error } => {
                    warn!("resample worker error for request {id}: {error}");
                    // §4.E: a worker error rejects every outstanding request,
                    // not just the one that failed.
                    let rejected = self.outstanding.reject_all();
                    if let Some(Mode::Lod(pyramid)) = &self.mode {
                        for (rejected_id, level) in rejected {
                            trace!("rejecting outstanding request {rejected_id} for level {level} after worker error");
                            pyramid.abort_create(level);
                        }
                    }
                    self.refresh_lod(facade)?;
                }
            }
        }
        Ok(())
    }

    /// §4.D tile selection + load, run per viewport update.
    fn refresh_tiles(&mut self, facade: &impl Facade, dragging: bool) -> Result<()> {
        let Some(interaction) = &self.interaction else { return Ok(()) };
        let image_res = interaction.image;
        let viewport_res = interaction.viewport;
        let scale = interaction.transform.scale;
        let tx = interaction.transform.translate_x;
        let ty = interaction.transform.translate_y;
        let drag_optimized = interaction.is_drag_optimized();

        let Some(Mode::Tiled { cache, current_level, .. }) = &mut self.mode else { return Ok(()) };
        if self.animation.lod_suspended() {
            return Ok(());
        }

        let level = tile_lod_for_scale(scale, self.mobile);
        if level != *current_level {
            cache.evict_wrong_level(level, &self.renderer);
            *current_level = level;
        }
        let level_scale = DEFAULT_LOD_TABLE[level as usize].scale;
        let max_tile_texture_side = self.config.memory.max_tile_texture_side;

        let viewport = viewport_to_source_rect(viewport_res, image_res, scale, tx, ty);
        let tile_size = self.config.memory.tile_size;
        let buffer = buffer_fraction(
            dragging,
            self.config.memory.idle_buffer_fraction,
            self.config.memory.drag_buffer_fraction,
        ) * tile_size as f32;

        // Unbuffered viewport range, used to classify each cell below as
        // in-viewport vs. buffer-only for the two-tier priority split.
        let (vx0, vx1) = tile_index_range(viewport.center_x, viewport.width / 2.0, 0.0, tile_size, image_res.w);
        let (vy0, vy1) = tile_index_range(viewport.center_y, viewport.height / 2.0, 0.0, tile_size, image_res.h);
        let (x0, x1) = tile_index_range(viewport.center_x, viewport.width / 2.0, buffer, tile_size, image_res.w);
        let (y0, y1) = tile_index_range(viewport.center_y, viewport.height / 2.0, buffer, tile_size, image_res.h);

        let now = Instant::now();
        let budget = ConcurrencyBudget {
            idle: self.config.memory.idle_concurrency,
            drag: self.config.memory.drag_concurrency,
            post_toggle: self.config.memory.post_toggle_concurrency,
        };
        let mode = select_load_mode(self.post_toggle_active.load(AtomicOrdering::SeqCst), dragging);
        let ceiling = budget.ceiling(mode);
        let mut in_flight = 0usize;

        let cell_distance = |gx: u32, gy: u32| {
            let cell_cx = (gx as f32 + 0.5) * tile_size as f32;
            let cell_cy = (gy as f32 + 0.5) * tile_size as f32;
            (((cell_cx - viewport.center_x).powi(2) + (cell_cy - viewport.center_y).powi(2)).sqrt())
                / (viewport.width.max(viewport.height) / 2.0 + tile_size as f32).max(1.0)
        };

        let mut active = ahash::AHashSet::default();
        for gy in y0..y1 {
            for gx in x0..x1 {
                let key = TileKey::new(gx, gy, level);
                active.insert(key);

                let in_viewport = gx >= vx0 && gx < vx1 && gy >= vy0 && gy < vy1;
                let dist = cell_distance(gx, gy);
                let priority = if in_viewport { in_viewport_priority(dist) } else { buffer_priority(dist) };

                if cache.get(&key).is_some() {
                    cache.touch(&key, now);
                    continue;
                }
                if in_flight >= ceiling {
                    continue;
                }
                if tile::should_refuse_new_tile(&self.renderer.accounting, self.config.memory.memory_budget_bytes) {
                    warn!("memory pressure above 90%, refusing new tile {key:?}");
                    continue;
                }

                cache.mark_loading(key, priority, now);
                in_flight += 1;

                let created = self.image.as_ref().and_then(|image| {
                    create_tile_texture(
                        &self.renderer,
                        facade,
                        image,
                        gx,
                        gy,
                        tile_size,
                        image_res,
                        level_scale,
                        level,
                        max_tile_texture_side,
                    )
                });
                match created {
                    Some((texture, w, h)) => cache.insert_ready(key, texture, w, h, now),
                    None => cache.remove(&key, &self.renderer),
                }
            }
        }

        // §4.D predictive prefetch: while drag-optimized, extend the grid by
        // one tile-width per axis at a reduced priority tier, gated on a
        // small amount of capacity spare of the normal per-cell ceiling.
        if dragging && drag_optimized {
            let spare = if self.mobile { 1 } else { 2 };
            let max_gx = ((image_res.w as f32 / tile_size as f32).ceil() as u32).max(1);
            let max_gy = ((image_res.h as f32 / tile_size as f32).ceil() as u32).max(1);
            let px0 = x0.saturating_sub(1);
            let px1 = (x1 + 1).min(max_gx);
            let py0 = y0.saturating_sub(1);
            let py1 = (y1 + 1).min(max_gy);
            let mut prefetched = 0usize;

            'prefetch: for gy in py0..py1 {
                for gx in px0..px1 {
                    if gx >= x0 && gx < x1 && gy >= y0 && gy < y1 {
                        continue;
                    }
                    if prefetched >= spare {
                        break 'prefetch;
                    }
                    let key = TileKey::new(gx, gy, level);
                    if cache.get(&key).is_some() {
                        continue;
                    }
                    if tile::should_refuse_new_tile(&self.renderer.accounting, self.config.memory.memory_budget_bytes) {
                        continue;
                    }

                    let priority = prefetch_priority(cell_distance(gx, gy));
                    cache.mark_loading(key, priority, now);
                    prefetched += 1;
                    active.insert(key);

                    let created = self.image.as_ref().and_then(|image| {
                        create_tile_texture(
                            &self.renderer,
                            facade,
                            image,
                            gx,
                            gy,
                            tile_size,
                            image_res,
                            level_scale,
                            level,
                            max_tile_texture_side,
                        )
                    });
                    match created {
                        Some((texture, w, h)) => cache.insert_ready(key, texture, w, h, now),
                        None => cache.remove(&key, &self.renderer),
                    }
                }
            }
        }

        // §3/§4.D proactive eviction, ahead of the hard 90% refusal wall.
        if self.renderer.accounting.pressure_ratio(self.config.memory.memory_budget_bytes)
            > self.config.memory.pressure_threshold
        {
            let evicted = cache.evict_under_pressure(&active, &self.renderer);
            if evicted > 0 {
                debug!("memory pressure above {:.0}% threshold, proactively evicted {evicted} tiles",
                    self.config.memory.pressure_threshold * 100.0);
            }
        }

        cache.evict_over_capacity(self.config.memory.max_tiles_in_memory, &active, &self.renderer);
        Ok(())
    }

    pub fn set_viewport_size(&mut self, facade: &impl Facade, viewport: Res) -> Result<()> {
        let config = self.config.clone();
        if let Some(interaction) = &mut self.interaction {
            interaction.set_viewport_size(viewport, &config);
        }
        self.notify_zoom_change();
        self.refresh_any(facade)
    }

    fn refresh_any(&mut self, facade: &impl Facade) -> Result<()> {
        match &self.mode {
            Some(Mode::Lod(_)) => self.refresh_lod(facade),
            Some(Mode::Tiled { .. }) => self.refresh_tiles(facade, false),
            None => Ok(()),
        }
    }

    pub fn zoom_in(&mut self) {
        let config = self.config.clone();
        if let Some(interaction) = &mut self.interaction {
            let target = interaction.zoom_in(&config);
            self.animation.start(interaction.transform, target, Duration::from_millis(config.double_click.animation_time_ms as u64));
        }
    }

    pub fn zoom_out(&mut self) {
        let config = self.config.clone();
        if let Some(interaction) = &mut self.interaction {
            let target = interaction.zoom_out(&config);
            self.animation.start(interaction.transform, target, Duration::from_millis(config.double_click.animation_time_ms as u64));
        }
    }

    pub fn reset_view(&mut self) {
        let config = self.config.clone();
        if let Some(interaction) = &mut self.interaction {
            let target = interaction.reset_view(&config);
            self.animation.start(interaction.transform, target, Duration::from_millis(config.double_click.animation_time_ms as u64));
        }
    }

    pub fn pointer_down(&mut self, x: f32, y: f32) {
        if let Some(interaction) = &mut self.interaction {
            interaction.pointer_down(x, y, Instant::now());
        }
    }

    /// Continuous drag (§4.A): panning is applied immediately, but tile
    /// reloads are rate-limited through `tile_update_limiter` so a fast drag
    /// doesn't flood the loader.
    pub fn pointer_move(&mut self, facade: &impl Facade, x: f32, y: f32, touch: bool) -> Result<()> {
        let config = self.config.clone();
        let now = Instant::now();
        let should_refresh_tiles = {
            let Some(interaction) = &mut self.interaction else { return Ok(()) };
            if interaction.pointer_move(x, y, now, touch, &config).is_none() {
                return Ok(());
            }
            interaction.tile_update_limiter.poll(now)
        };
        self.notify_zoom_change();
        if should_refresh_tiles && matches!(self.mode, Some(Mode::Tiled { .. })) {
            self.refresh_tiles(facade, true)?;
        }
        Ok(())
    }

    /// §4.A: drag-release performs one settle refresh ~50ms later rather than
    /// immediately, giving the pointer a moment to actually stop moving.
    pub fn pointer_up(&mut self, _facade: &impl Facade) -> Result<()> {
        let was_dragging = self.interaction.as_mut().map(Interaction::pointer_up).unwrap_or(false);
        if was_dragging {
            self.schedule_settle_refresh();
        }
        Ok(())
    }

    /// §4.A wheel zoom: applies immediately, but the LOD refresh it
    /// eventually needs is debounced (`schedule_debounced_lod_refresh`) so a
    /// burst of wheel ticks only resamples once, 200ms after the last one.
    pub fn wheel(&mut self, facade: &impl Facade, delta_positive: bool, anchor_x: f32, anchor_y: f32) -> Result<()> {
        let config = self.config.clone();
        if let Some(interaction) = &mut self.interaction {
            interaction.wheel(delta_positive, anchor_x, anchor_y, &config);
        }
        self.animation.cancel();
        self.notify_zoom_change();
        self.schedule_debounced_lod_refresh();
        if matches!(self.mode, Some(Mode::Tiled { .. })) {
            self.refresh_tiles(facade, false)?;
        }
        Ok(())
    }

    pub fn pinch(&mut self, facade: &impl Facade, distance: f32, mid_x: f32, mid_y: f32) -> Result<()> {
        let config = self.config.clone();
        if let Some(interaction) = &mut self.interaction {
            interaction.pinch(distance, mid_x, mid_y, &config);
        }
        self.notify_zoom_change();
        self.schedule_debounced_lod_refresh();
        if matches!(self.mode, Some(Mode::Tiled { .. })) {
            self.refresh_tiles(facade, true)?;
        }
        Ok(())
    }

    /// §4.A double-tap/double-click: toggles fit/1:1, animated.
    pub fn double_tap(&mut self, x: f32, y: f32) {
        let config = self.config.clone();
        if config.double_click.disabled {
            return;
        }
        let target = match &mut self.interaction {
            Some(interaction) => interaction.double_tap(x, y, Instant::now(), &config),
            None => None,
        };
        if let (Some(target), Some(interaction)) = (target, &self.interaction) {
            self.animation.start(interaction.transform, target, Duration::from_millis(config.double_click.animation_time_ms as u64));
            self.post_toggle_active.store(true, AtomicOrdering::SeqCst);
            let flag = self.post_toggle_active.clone();
            self.scheduler.schedule_after(POST_TOGGLE_WINDOW, Box::new(move || {
                flag.store(false, AtomicOrdering::SeqCst);
            }));
        }
    }

    /// §6 "copy original to clipboard" side effect. Copies the full-resolution
    /// source image, not the currently-displayed LOD/tile texture. §7
    /// clipboard-unavailable policy: log and return quietly, no error
    /// propagated to the host.
    pub fn copy_to_clipboard(&mut self) {
        let Some(image) = &self.image else { return };
        let pixels = image.pixels();
        let data = arboard::ImageData {
            width: pixels.width() as usize,
            height: pixels.height() as usize,
            bytes: Cow::from(pixels.as_raw().as_slice()),
        };
        match arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_image(data)) {
            Ok(()) => self.observer.on_image_copied(),
            Err(e) => warn!("clipboard unavailable, image not copied: {e}"),
        }
    }

    /// Arranges for `poll_pending_refresh` to recompute the target LOD 200ms
    /// after the last call, instead of on every continuous-zoom event.
    fn schedule_debounced_lod_refresh(&self) {
        let (Some(Mode::Lod(pyramid)), Some(interaction)) = (&self.mode, &self.interaction) else { return };
        let flag = self.pending_refresh.clone();
        pyramid.debounced_update(self.scheduler.as_ref(), interaction.relative_scale(), move |_level| {
            flag.store(true, AtomicOrdering::SeqCst);
        });
    }

    /// Hosts call this once per idle tick (alongside `poll_worker` and
    /// `tick_animation`) to apply any debounced LOD refresh queued by
    /// `schedule_debounced_lod_refresh`, and any unconditional settle refresh
    /// queued by `pointer_up`/`tick_animation`.
    pub fn poll_pending_refresh(&mut self, facade: &impl Facade) -> Result<()> {
        if self.pending_refresh.swap(false, AtomicOrdering::SeqCst) {
            self.refresh_lod(facade)?;
        }
        if self.pending_unconditional_refresh.swap(false, AtomicOrdering::SeqCst) {
            self.refresh_any(facade)?;
        }
        Ok(())
    }

    /// Arranges for `poll_pending_refresh` to run an unconditional
    /// `refresh_any` after [`SETTLE_REFRESH_DELAY`].
    fn schedule_settle_refresh(&self) {
        let flag = self.pending_unconditional_refresh.clone();
        self.scheduler.schedule_after(SETTLE_REFRESH_DELAY, Box::new(move || {
            flag.store(true, AtomicOrdering::SeqCst);
        }));
    }

    /// Advances any in-flight animation by one display-refresh tick (§4.B).
    /// LOD/tile requests stay suspended for the duration; on completion the
    /// engine immediately refreshes against the final transform.
    pub fn tick_animation(&mut self, facade: &impl Facade) -> Result<()> {
        let Some((transform, done)) = self.animation.tick() else { return Ok(()) };
        if let Some(interaction) = &mut self.interaction {
            interaction.transform = transform;
        }
        self.notify_zoom_change();

        if let Some(Mode::Lod(pyramid)) = &self.mode {
            pyramid.set_suspended(!done && self.animation.lod_suspended());
        }

        if done {
            // §4.B: an immediate recomputation against the final transform,
            // plus a second one ~50ms later to catch tiles that were still
            // loading when the first one fired.
            self.refresh_any(facade)?;
            self.schedule_settle_refresh();
        }
        Ok(())
    }

    pub fn debug_snapshot(&self) -> Option<DebugSnapshot> {
        if !self.config.debug {
            return None;
        }
        let interaction = self.interaction.as_ref()?;
        let image = self.image.as_ref()?;
        let fit = interaction.fit_scale();
        let (tile_mode, active, cached, loading) = match &self.mode {
            Some(Mode::Tiled { cache, .. }) => (
                true,
                cache.iter_ready().count(),
                cache.len(),
                cache.len() - cache.iter_ready().count(),
            ),
            _ => (false, 0, 0, 0),
        };
        Some(DebugSnapshot {
            scale: interaction.transform.scale,
            relative_scale: interaction.relative_scale(),
            translate_x: interaction.transform.translate_x,
            translate_y: interaction.transform.translate_y,
            canvas: interaction.viewport,
            image: image.res(),
            fit_scale: fit,
            effective_min_scale: self.config.effective_min_scale(fit),
            effective_max_scale: self.config.effective_max_scale(fit),
            texture_bytes: self.renderer.accounting.bytes(),
            budget_bytes: self.config.memory.memory_budget_bytes,
            pressure_ratio: self.renderer.accounting.pressure_ratio(self.config.memory.memory_budget_bytes),
            active_lod_count: if matches!(self.mode, Some(Mode::Lod(_))) { 1 } else { 0 },
            tile_mode,
            active_tile_count: active,
            cached_tile_count: cached,
            loading_tile_count: loading,
        })
    }

    /// §4.F per-frame draw: background first, then active tiles, or the
    /// single resident LOD texture.
    pub fn render(&mut self, frame: &mut Frame) -> Result<()> {
        if !self.renderer.should_render_now() {
            return Ok(());
        }
        let Some(interaction) = &self.interaction else { return Ok(()) };
        frame.clear_color(0.0, 0.0, 0.0, 0.0);

        let canvas = interaction.viewport;
        let image_res = interaction.image;
        let scale = interaction.transform.scale;
        let translate = cgmath::Vector2::new(interaction.transform.translate_x, interaction.transform.translate_y);

        match &self.mode {
            Some(Mode::Lod(pyramid)) => {
                if let Some((level, texture)) = pyramid.current() {
                    let filter = pyramid.filter_for(image_res, level, self.config.pixel_art_threshold);
                    let matrix = image_matrix(canvas, image_res, scale, translate);
                    self.renderer.draw(frame, texture, matrix, filter)?;
                }
            }
            Some(Mode::Tiled { cache, background, .. }) => {
                if let Some(bg) = background {
                    let matrix = image_matrix(canvas, image_res, scale, translate);
                    self.renderer.draw(frame, *bg, matrix, TextureFilter::Linear)?;
                }
                for entry in cache.iter_ready() {
                    let Some(texture) = entry.texture else { continue };
                    let origin = cgmath::Vector2::new(
                        (entry.key.x * self.config.memory.tile_size) as f32,
                        (entry.key.y * self.config.memory.tile_size) as f32,
                    );
                    let footprint = Res { w: entry.w, h: entry.h };
                    let matrix = tile_matrix(canvas, footprint, image_res, origin, scale, translate);
                    self.renderer.draw(frame, texture, matrix, TextureFilter::Linear)?;
                }
            }
            None => {}
        }
        Ok(())
    }

    fn teardown(&mut self, _facade: &impl Facade) {
        match self.mode.take() {
            Some(Mode::Lod(pyramid)) => pyramid.teardown(&self.renderer),
            Some(Mode::Tiled { mut cache, background, .. }) => {
                cache.teardown(&self.renderer);
                if let Some(bg) = background {
                    self.renderer.delete_texture(bg);
                }
            }
            None => {}
        }
        for (id, _level) in self.outstanding.reject_all() {
            trace!("rejected outstanding request {id} on teardown");
        }
    }
}

// `Engine::new` needs a real `impl Facade` (a live GL context), which this
// crate has no headless backend for, so these tests exercise the
// decision logic `refresh_tiles`/`tick_animation`/`pointer_up` are built
// from rather than driving a constructed `Engine` end to end. §8's
// scenarios 4/5/6 map onto: drag throttling and prefetch extension
// (`select_load_mode`, `tile_target_dims`), memory-pressure eviction
// (`TileCache::evict_under_pressure`, exercised in `tile.rs`), and
// worker-failure fallback (`OutstandingRequests::reject_all`,
// `LodPyramid::abort_create`, exercised in `worker.rs`/`lod.rs`).
#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;

    #[test]
    fn select_load_mode_post_toggle_beats_dragging() {
        assert_eq!(select_load_mode(true, true), LoadMode::PostToggle);
        assert_eq!(select_load_mode(true, false), LoadMode::PostToggle);
        assert_eq!(select_load_mode(false, true), LoadMode::Dragging);
        assert_eq!(select_load_mode(false, false), LoadMode::Idle);
    }

    #[test]
    fn tile_target_dims_scales_by_lod_and_caps_to_ceiling() {
        // A 512px tile at a 0.5x LOD targets 256px.
        assert_eq!(tile_target_dims(512, 512, 0.5, 1024), (256, 256));
        // A 512px tile at a 4x LOD would want 2048px but caps at 1024.
        assert_eq!(tile_target_dims(512, 512, 4.0, 1024), (1024, 1024));
        // Never collapses to zero for a tiny source footprint at a small LOD.
        assert_eq!(tile_target_dims(4, 4, 0.125, 1024), (1, 1));
    }

    #[test]
    fn settle_refresh_flag_fires_after_delay_not_before() {
        let sched = Arc::new(ManualScheduler::new());
        let flag = Arc::new(AtomicBool::new(false));
        let f = flag.clone();
        sched.schedule_after(SETTLE_REFRESH_DELAY, Box::new(move || {
            f.store(true, AtomicOrdering::SeqCst);
        }));
        sched.advance(Duration::from_millis(30));
        assert!(!flag.load(AtomicOrdering::SeqCst));
        sched.advance(Duration::from_millis(30));
        assert!(flag.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn post_toggle_window_clears_itself() {
        let sched = Arc::new(ManualScheduler::new());
        let active = Arc::new(AtomicBool::new(true));
        let a = active.clone();
        sched.schedule_after(POST_TOGGLE_WINDOW, Box::new(move || {
            a.store(false, AtomicOrdering::SeqCst);
        }));
        sched.advance(POST_TOGGLE_WINDOW - Duration::from_millis(1));
        assert!(active.load(AtomicOrdering::SeqCst));
        sched.advance(Duration::from_millis(2));
        assert!(!active.load(AtomicOrdering::SeqCst));
    }
}
