//! Tile-component / resolution / subband geometry shared by `tier2`, `dwt` and
//! `quant`. Centralised here so the ceil-divide and parity recurrences are
//! computed identically on encode and decode, per the canvas-origin-parity
//! requirement.

/// Ceil-divide by `2^n`, matching the reference-grid-to-resolution recurrence
/// used throughout Annex B (`ceil(a / 2^n)`).
pub fn ceil_div_pow2(a: u32, n: u32) -> u32 {
    if n == 0 {
        return a;
    }
    let denom = 1u32 << n;
    (a + denom - 1) / denom
}

/// One of the four subband orientations. `Ll` only exists at resolution 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    Ll,
    Hl,
    Lh,
    Hh,
}

impl Band {
    /// Orientation index used by the block coder's `setBand` hook.
    pub fn index(self) -> u8 {
        match self {
            Band::Ll => 0,
            Band::Hl => 1,
            Band::Lh => 2,
            Band::Hh => 3,
        }
    }
}

/// Axis-aligned rectangle in some integer coordinate space (component,
/// resolution, or subband coordinates depending on context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }
}

/// Tile-component canvas corners, resolution `r`'s canvas corners are this
/// shifted by `num_levels - r` (B.5).
#[derive(Debug, Clone, Copy)]
pub struct ComponentCanvas {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl ComponentCanvas {
    /// Resolution-`r` canvas corners, out of `num_levels` decomposition
    /// levels (`num_resolutions = num_levels + 1`).
    pub fn resolution_rect(&self, r: u32, num_levels: u32) -> Rect {
        let shift = num_levels - r;
        Rect {
            x0: ceil_div_pow2(self.x0, shift),
            y0: ceil_div_pow2(self.y0, shift),
            x1: ceil_div_pow2(self.x1, shift),
            y1: ceil_div_pow2(self.y1, shift),
        }
    }

    /// Dimensions of the LL subband produced after `levels_done` levels of
    /// decomposition, exposed so callers can size subband buffers without
    /// replicating the recurrence (`WaveletDWT::ll_dimensions`).
    pub fn ll_dimensions(&self, num_levels: u32, levels_done: u32) -> (u32, u32) {
        let r = num_levels - levels_done;
        let rect = self.resolution_rect(r, num_levels);
        (rect.width(), rect.height())
    }
}

/// Subband rectangle at resolution `r > 0`: width/height/offset all depend on
/// the parity of the resolution canvas corner along each axis (B.5, Eq. B-15/16).
pub fn subband_rect(res_rect: Rect, band: Band) -> Rect {
    let (x0, y0, x1, y1) = (res_rect.x0, res_rect.y0, res_rect.x1, res_rect.y1);

    // "u" index offsets pick out odd/even samples along each axis; HL/HH take
    // the odd horizontal samples, LH/HH take the odd vertical samples.
    let (ox, oy) = match band {
        Band::Ll => (0u32, 0u32),
        Band::Hl => (1, 0),
        Band::Lh => (0, 1),
        Band::Hh => (1, 1),
    };

    let band_x0 = ceil_div_pow2(x0.saturating_sub(ox), 1);
    let band_x1 = ceil_div_pow2(x1.saturating_sub(ox), 1);
    let band_y0 = ceil_div_pow2(y0.saturating_sub(oy), 1);
    let band_y1 = ceil_div_pow2(y1.saturating_sub(oy), 1);

    Rect {
        x0: band_x0,
        y0: band_y0,
        x1: band_x1.max(band_x0),
        y1: band_y1.max(band_y0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_div_matches_known_values() {
        assert_eq!(ceil_div_pow2(7, 1), 4);
        assert_eq!(ceil_div_pow2(8, 1), 4);
        assert_eq!(ceil_div_pow2(0, 3), 0);
        assert_eq!(ceil_div_pow2(5, 0), 5);
    }

    #[test]
    fn resolution_rect_shrinks_by_level() {
        let canvas = ComponentCanvas { x0: 0, y0: 0, x1: 17, y1: 17 };
        let r2 = canvas.resolution_rect(2, 2);
        assert_eq!((r2.x1, r2.y1), (17, 17));
        let r0 = canvas.resolution_rect(0, 2);
        assert_eq!((r0.x1, r0.y1), (5, 5));
    }

    #[test]
    fn subband_rect_even_origin_splits_evenly() {
        let res = Rect { x0: 0, y0: 0, x1: 16, y1: 16 };
        let hl = subband_rect(res, Band::Hl);
        let ll_like = subband_rect(res, Band::Ll);
        assert_eq!(hl.width(), 8);
        assert_eq!(ll_like.width(), 8);
    }

    #[test]
    fn subband_rect_odd_origin_shifts_parity() {
        // origin at x0=1 (odd): LL samples come from odd indices.
        let res = Rect { x0: 1, y0: 0, x1: 17, y1: 16 };
        let ll = subband_rect(res, Band::Ll);
        let hl = subband_rect(res, Band::Hl);
        assert_eq!(ll.width() + hl.width(), res.width());
    }
}
