use serde::Deserialize;

use crate::com::Res;

/// Which device class the memory/size defaults should target (§10.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Mobile,
    Desktop,
}

impl Default for Platform {
    fn default() -> Self {
        Self::Desktop
    }
}

/// Tile-size, cache, and budget numbers from §3's data model, which come in
/// mobile/desktop pairs throughout.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Tile side, in source pixels.
    pub tile_size: u32,
    /// Cap on a tile's own GPU texture side, in pixels.
    pub max_tile_texture_side: u32,
    /// Cap on the background texture's longest side, in pixels.
    pub max_background_side: u32,
    /// Background texture is further shrunk so it never exceeds this.
    pub max_background_bytes: u64,
    /// Above this source megapixel count, background creation is skipped entirely.
    pub skip_background_above_megapixels: f64,
    /// Tile cache count ceiling.
    pub max_tiles_in_memory: usize,
    /// Total GPU texture budget, in bytes.
    pub memory_budget_bytes: u64,
    /// Fraction of budget at which new tile/LOD creation is refused.
    pub pressure_threshold: f32,
    /// Idle (non-drag) viewport buffer, as a fraction of tile size.
    pub idle_buffer_fraction: f32,
    /// Drag-time viewport buffer, as a fraction of tile size.
    pub drag_buffer_fraction: f32,
    /// Idle concurrent tile-load ceiling.
    pub idle_concurrency: usize,
    /// Drag-time concurrent tile-load ceiling.
    pub drag_concurrency: usize,
    /// Post-double-tap concurrent tile-load ceiling.
    pub post_toggle_concurrency: usize,
}

impl MemoryConfig {
    pub const fn desktop() -> Self {
        Self {
            tile_size: 512,
            max_tile_texture_side: 1024,
            max_background_side: 2048,
            max_background_bytes: 32 * 1024 * 1024,
            skip_background_above_megapixels: 200.0,
            max_tiles_in_memory: 16,
            memory_budget_bytes: 512 * 1024 * 1024,
            pressure_threshold: 0.80,
            idle_buffer_fraction: 0.35,
            drag_buffer_fraction: 0.75,
            idle_concurrency: 5,
            drag_concurrency: 6,
            post_toggle_concurrency: 8,
        }
    }

    pub const fn mobile() -> Self {
        Self {
            tile_size: 256,
            max_tile_texture_side: 512,
            max_background_side: 1024,
            max_background_bytes: 32 * 1024 * 1024,
            skip_background_above_megapixels: 100.0,
            max_tiles_in_memory: 8,
            memory_budget_bytes: 128 * 1024 * 1024,
            pressure_threshold: 0.60,
            idle_buffer_fraction: 0.25,
            drag_buffer_fraction: 0.75,
            idle_concurrency: 3,
            drag_concurrency: 4,
            post_toggle_concurrency: 5,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::desktop()
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WheelConfig {
    pub step: f32,
    pub wheel_disabled: bool,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self { step: 0.1, wheel_disabled: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoubleClickMode {
    Toggle,
    Zoom,
}

impl Default for DoubleClickMode {
    fn default() -> Self {
        Self::Toggle
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DoubleClickConfig {
    pub disabled: bool,
    pub mode: DoubleClickMode,
    pub step: f32,
    pub animation_time_ms: u32,
}

impl Default for DoubleClickConfig {
    fn default() -> Self {
        Self { disabled: false, mode: DoubleClickMode::default(), step: 1.0, animation_time_ms: 300 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PanningConfig {
    pub disabled: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PinchConfig {
    pub disabled: bool,
    pub step: f32,
}

impl Default for PinchConfig {
    fn default() -> Self {
        Self { disabled: false, step: 0.01 }
    }
}

/// Top-level engine configuration (§6). Every field has the stated default,
/// so a host can deserialize a partial TOML/JSON override over
/// `EngineConfig::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_scale: f32,
    pub max_scale: f32,
    pub initial_scale: f32,
    pub center_on_init: bool,
    pub limit_to_bounds: bool,
    pub smooth: bool,
    pub wheel: WheelConfig,
    pub double_click: DoubleClickConfig,
    pub panning: PanningConfig,
    pub pinch: PinchConfig,
    pub debug: bool,

    /// Source side, in px, below which the pixel-art nearest-neighbor
    /// heuristic applies at LOD scale >= 1 (§4.C). Ad hoc per §9; tunable.
    pub pixel_art_threshold: u32,

    pub memory: MemoryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_scale: 0.1,
            max_scale: 10.0,
            initial_scale: 1.0,
            center_on_init: true,
            limit_to_bounds: true,
            smooth: true,
            wheel: WheelConfig::default(),
            double_click: DoubleClickConfig::default(),
            panning: PanningConfig::default(),
            pinch: PinchConfig::default(),
            debug: false,
            pixel_art_threshold: 512,
            memory: MemoryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            memory: match platform {
                Platform::Mobile => MemoryConfig::mobile(),
                Platform::Desktop => MemoryConfig::desktop(),
            },
            ..Self::default()
        }
    }

    /// `max(fitToScreen * maxScaleConfig, 1.0)` from §4.A — 1:1 is always reachable.
    pub fn effective_max_scale(&self, fit_scale: f32) -> f32 {
        (fit_scale * self.max_scale).max(1.0)
    }

    pub fn effective_min_scale(&self, fit_scale: f32) -> f32 {
        fit_scale * self.min_scale
    }

    /// §4.D tile-mode entry rule.
    pub fn needs_tiling(&self, image: Res, peak_lod_bytes: u64) -> bool {
        image.megapixels() > 50.0
            || image.longest_side() > 8192
            || peak_lod_bytes > self.memory.memory_budget_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_and_desktop_defaults_differ() {
        let mobile = EngineConfig::for_platform(Platform::Mobile);
        let desktop = EngineConfig::for_platform(Platform::Desktop);
        assert!(mobile.memory.memory_budget_bytes < desktop.memory.memory_budget_bytes);
        assert!(mobile.memory.tile_size < desktop.memory.tile_size);
    }

    #[test]
    fn effective_max_scale_never_below_one() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.effective_max_scale(0.01), 1.0);
    }

    #[test]
    fn needs_tiling_on_huge_side() {
        let cfg = EngineConfig::default();
        assert!(cfg.needs_tiling(Res { w: 9000, h: 2000 }, 0));
    }
}
