//! 2D discrete wavelet transform: the 5/3 reversible integer filter and the
//! 9/7 irreversible (CDF 9/7) float filter (Annex F.3/F.4), each applied
//! column-then-row on the forward transform and row-then-column on the
//! inverse (`spec.md` §4.5) per level, with symmetric boundary extension,
//! producing the standard four-subband (LL/HL/LH/HH) packing in place.
//!
//! 5/3 stays integer end to end so the round trip is bit-exact (`spec.md`
//! §8's reversible property); 9/7 produces a float coefficient plane that
//! `quant.rs` quantizes to integers before entropy coding, matching how the
//! irreversible path is actually used.
//!
//! Both filters are parameterised by the canvas-origin parity along each
//! axis (`spec.md` §4.5): whether the tile-component's first sample sits at
//! an even or odd position on the reference grid decides whether the
//! low-pass half of a lifted line is drawn from local-even or local-odd
//! indices, and tile boundaries only line up across encode/decode if every
//! level re-derives that parity rather than assuming it is always even.

use crate::geometry::ceil_div_pow2;

/// Reflects `i` into `[0, n)` using whole-sample symmetric extension, the
/// boundary handling Annex F.3.8 specifies for finite-length signals.
fn mirror(i: isize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * (n - 1) - i;
        } else {
            return i as usize;
        }
    }
}

fn get_i32(line: &[i32], i: isize) -> i32 {
    line[mirror(i, line.len())]
}

fn get_f64(line: &[f64], i: isize) -> f64 {
    line[mirror(i, line.len())]
}

/// Parity of the local origin: `h_start`/`l_start` name which local index
/// (0 or 1) carries the high-pass, resp. low-pass, half of an interleaved
/// line. Even origin puts the low-pass at local index 0 (Annex F's default
/// convention); odd origin swaps the two (`spec.md` §4.5).
fn parities(odd_origin: bool) -> (usize, usize) {
    if odd_origin {
        (0, 1)
    } else {
        (1, 0)
    }
}

/// Forward 5/3 lifting on one line, in place, interleaved (local `l_start`
/// stays `s`, local `h_start` becomes `d`).
fn lift_53_1d(line: &mut [i32], odd_origin: bool) {
    let n = line.len();
    if n < 2 {
        // A single-sample axis with odd origin holds what would otherwise be
        // a lone high-pass sample; scaling by 2 keeps its energy consistent
        // with a paired low/high split (`spec.md` §4.5).
        if n == 1 && odd_origin {
            line[0] *= 2;
        }
        return;
    }
    let (h_start, l_start) = parities(odd_origin);

    let orig: Vec<i32> = line.to_vec();
    let mut i = h_start;
    while i < n {
        let left = get_i32(&orig, i as isize - 1);
        let right = get_i32(&orig, i as isize + 1);
        line[i] = orig[i] - ((left + right) >> 1);
        i += 2;
    }
    let d: Vec<i32> = line.to_vec();
    let mut i = l_start;
    while i < n {
        let left = get_i32(&d, i as isize - 1);
        let right = get_i32(&d, i as isize + 1);
        line[i] = orig[i] + ((left + right + 2) >> 2);
        i += 2;
    }
}

/// Inverse of [`lift_53_1d`].
fn unlift_53_1d(line: &mut [i32], odd_origin: bool) {
    let n = line.len();
    if n < 2 {
        if n == 1 && odd_origin {
            line[0] /= 2;
        }
        return;
    }
    let (h_start, l_start) = parities(odd_origin);

    let d: Vec<i32> = line.to_vec();
    let mut i = l_start;
    while i < n {
        let left = get_i32(&d, i as isize - 1);
        let right = get_i32(&d, i as isize + 1);
        line[i] = d[i] - ((left + right + 2) >> 2);
        i += 2;
    }
    let s: Vec<i32> = line.to_vec();
    let mut i = h_start;
    while i < n {
        let left = get_i32(&s, i as isize - 1);
        let right = get_i32(&s, i as isize + 1);
        line[i] = s[i] + ((left + right) >> 1);
        i += 2;
    }
}

const ALPHA: f64 = -1.586_134_342_059_924;
const BETA: f64 = -0.052_980_118_572_961;
const GAMMA: f64 = 0.882_911_075_530_934;
const DELTA: f64 = 0.443_506_852_043_971;
const KAPPA: f64 = 1.230_174_104_914_001;

/// Forward 9/7 lifting on one line, in place, interleaved.
fn lift_97_1d(line: &mut [f64], odd_origin: bool) {
    let n = line.len();
    if n < 2 {
        if n == 1 && odd_origin {
            line[0] *= 2.0;
        }
        return;
    }
    let (h_start, l_start) = parities(odd_origin);

    let step = |line: &mut [f64], coeff: f64, start: usize| {
        let src: Vec<f64> = line.to_vec();
        let mut i = start;
        while i < n {
            let left = get_f64(&src, i as isize - 1);
            let right = get_f64(&src, i as isize + 1);
            line[i] = src[i] + coeff * (left + right);
            i += 2;
        }
    };
    step(line, ALPHA, h_start); // predict high-pass half from low-pass neighbours
    step(line, BETA, l_start); // update low-pass half from the new high-pass
    step(line, GAMMA, h_start); // refine high-pass half
    step(line, DELTA, l_start); // refine low-pass half

    for (i, v) in line.iter_mut().enumerate() {
        if i % 2 == h_start {
            *v *= KAPPA;
        } else {
            *v /= KAPPA;
        }
    }
}

/// Inverse of [`lift_97_1d`].
fn unlift_97_1d(line: &mut [f64], odd_origin: bool) {
    let n = line.len();
    if n < 2 {
        if n == 1 && odd_origin {
            line[0] /= 2.0;
        }
        return;
    }
    let (h_start, l_start) = parities(odd_origin);

    for (i, v) in line.iter_mut().enumerate() {
        if i % 2 == h_start {
            *v /= KAPPA;
        } else {
            *v *= KAPPA;
        }
    }

    let step = |line: &mut [f64], coeff: f64, start: usize| {
        let src: Vec<f64> = line.to_vec();
        let mut i = start;
        while i < n {
            let left = get_f64(&src, i as isize - 1);
            let right = get_f64(&src, i as isize + 1);
            line[i] = src[i] - coeff * (left + right);
            i += 2;
        }
    };
    step(line, DELTA, l_start);
    step(line, GAMMA, h_start);
    step(line, BETA, l_start);
    step(line, ALPHA, h_start);
}

/// Splits an interleaved line into `(low_pass, high_pass)` halves, the
/// low-pass half drawn from local index `l_start` and sized per the
/// ceil-halving rule (`spec.md` §4.5's `xNext = (x + 1) >> 1`).
fn deinterleave_i32(line: &[i32], odd_origin: bool) -> Vec<i32> {
    let n = line.len();
    let (h_start, l_start) = parities(odd_origin);
    let count_l = if l_start == 0 { (n + 1) / 2 } else { n / 2 };
    let mut out = vec![0i32; n];
    let (mut il, mut ih) = (0usize, 0usize);
    for (i, &v) in line.iter().enumerate() {
        if i % 2 == l_start {
            out[il] = v;
            il += 1;
        } else {
            debug_assert_eq!(i % 2, h_start);
            out[count_l + ih] = v;
            ih += 1;
        }
    }
    out
}

/// Inverse of [`deinterleave_i32`].
fn interleave_i32(packed: &[i32], odd_origin: bool) -> Vec<i32> {
    let n = packed.len();
    let (h_start, l_start) = parities(odd_origin);
    let count_l = if l_start == 0 { (n + 1) / 2 } else { n / 2 };
    let mut out = vec![0i32; n];
    let (mut il, mut ih) = (0usize, 0usize);
    for i in 0..n {
        if i % 2 == l_start {
            out[i] = packed[il];
            il += 1;
        } else {
            out[i] = packed[count_l + ih];
            ih += 1;
        }
    }
    out
}

fn deinterleave_f64(line: &[f64], odd_origin: bool) -> Vec<f64> {
    let n = line.len();
    let (h_start, l_start) = parities(odd_origin);
    let count_l = if l_start == 0 { (n + 1) / 2 } else { n / 2 };
    let mut out = vec![0.0f64; n];
    let (mut il, mut ih) = (0usize, 0usize);
    for (i, &v) in line.iter().enumerate() {
        if i % 2 == l_start {
            out[il] = v;
            il += 1;
        } else {
            debug_assert_eq!(i % 2, h_start);
            out[count_l + ih] = v;
            ih += 1;
        }
    }
    out
}

fn interleave_f64(packed: &[f64], odd_origin: bool) -> Vec<f64> {
    let n = packed.len();
    let (_h_start, l_start) = parities(odd_origin);
    let count_l = if l_start == 0 { (n + 1) / 2 } else { n / 2 };
    let mut out = vec![0.0f64; n];
    let (mut il, mut ih) = (0usize, 0usize);
    for i in 0..n {
        if i % 2 == l_start {
            out[i] = packed[il];
            il += 1;
        } else {
            out[i] = packed[count_l + ih];
            ih += 1;
        }
    }
    out
}

fn row_mut(plane: &mut [i32], stride: usize, y: usize, w: usize) -> Vec<i32> {
    plane[y * stride..y * stride + w].to_vec()
}

/// Parity (odd/even) of the axis origin at decomposition level `level`
/// (0-indexed, 0 being the full-resolution plane), given the tile-component's
/// origin `origin` on the reference grid. Relies on the ceil-div identity
/// `ceil(ceil(a/2)/2) == ceil(a/4)` so each level's parity can be computed
/// directly rather than propagated incrementally.
fn axis_parity_at_level(origin: u32, level: u32) -> bool {
    ceil_div_pow2(origin, level) % 2 == 1
}

/// In-place 5/3 forward transform over `num_levels` decomposition levels on
/// a `width` x `height` plane stored row-major with stride `width`, whose
/// top-left sample sits at reference-grid position `(x0, y0)`.
pub fn forward_reversible(width: u32, height: u32, num_levels: u32, x0: u32, y0: u32, samples: &mut [i32]) {
    let stride = width as usize;
    let (mut w, mut h) = (width as usize, height as usize);
    for level in 0..num_levels {
        if w < 2 && h < 2 {
            break;
        }
        let odd_x = axis_parity_at_level(x0, level);
        let odd_y = axis_parity_at_level(y0, level);
        for x in 0..w {
            let mut col: Vec<i32> = (0..h).map(|y| samples[y * stride + x]).collect();
            lift_53_1d(&mut col, odd_y);
            let col = deinterleave_i32(&col, odd_y);
            for y in 0..h {
                samples[y * stride + x] = col[y];
            }
        }
        for y in 0..h {
            let mut line = row_mut(samples, stride, y, w);
            lift_53_1d(&mut line, odd_x);
            let line = deinterleave_i32(&line, odd_x);
            samples[y * stride..y * stride + w].copy_from_slice(&line);
        }
        w = (w + 1) / 2;
        h = (h + 1) / 2;
    }
}

/// Inverse of [`forward_reversible`].
pub fn inverse_reversible(width: u32, height: u32, num_levels: u32, x0: u32, y0: u32, samples: &mut [i32]) {
    let stride = width as usize;
    let mut dims = Vec::new();
    let (mut w, mut h) = (width as usize, height as usize);
    for level in 0..num_levels {
        if w < 2 && h < 2 {
            break;
        }
        dims.push((w, h, level));
        w = (w + 1) / 2;
        h = (h + 1) / 2;
    }
    for &(w, h, level) in dims.iter().rev() {
        let odd_x = axis_parity_at_level(x0, level);
        let odd_y = axis_parity_at_level(y0, level);
        for y in 0..h {
            let line = row_mut(samples, stride, y, w);
            let mut line = interleave_i32(&line, odd_x);
            unlift_53_1d(&mut line, odd_x);
            samples[y * stride..y * stride + w].copy_from_slice(&line);
        }
        for x in 0..w {
            let col: Vec<i32> = (0..h).map(|y| samples[y * stride + x]).collect();
            let mut col = interleave_i32(&col, odd_y);
            unlift_53_1d(&mut col, odd_y);
            for y in 0..h {
                samples[y * stride + x] = col[y];
            }
        }
    }
}

/// 9/7 forward transform. Input samples are promoted to `f64`; the returned
/// plane carries the (not-yet-quantized) wavelet coefficients.
pub fn forward_irreversible(width: u32, height: u32, num_levels: u32, x0: u32, y0: u32, samples: &[i32]) -> Vec<f64> {
    let stride = width as usize;
    let mut plane: Vec<f64> = samples.iter().map(|&v| v as f64).collect();
    let (mut w, mut h) = (width as usize, height as usize);
    for level in 0..num_levels {
        if w < 2 && h < 2 {
            break;
        }
        let odd_x = axis_parity_at_level(x0, level);
        let odd_y = axis_parity_at_level(y0, level);
        for x in 0..w {
            let mut col: Vec<f64> = (0..h).map(|y| plane[y * stride + x]).collect();
            lift_97_1d(&mut col, odd_y);
            let col = deinterleave_f64(&col, odd_y);
            for y in 0..h {
                plane[y * stride + x] = col[y];
            }
        }
        for y in 0..h {
            let mut line = plane[y * stride..y * stride + w].to_vec();
            lift_97_1d(&mut line, odd_x);
            let line = deinterleave_f64(&line, odd_x);
            plane[y * stride..y * stride + w].copy_from_slice(&line);
        }
        w = (w + 1) / 2;
        h = (h + 1) / 2;
    }
    plane
}

/// Inverse of [`forward_irreversible`], rounding the final reconstruction to
/// integer samples.
pub fn inverse_irreversible(width: u32, height: u32, num_levels: u32, x0: u32, y0: u32, coeffs: &[f64]) -> Vec<i32> {
    let stride = width as usize;
    let mut plane = coeffs.to_vec();
    let mut dims = Vec::new();
    let (mut w, mut h) = (width as usize, height as usize);
    for level in 0..num_levels {
        if w < 2 && h < 2 {
            break;
        }
        dims.push((w, h, level));
        w = (w + 1) / 2;
        h = (h + 1) / 2;
    }
    for &(w, h, level) in dims.iter().rev() {
        let odd_x = axis_parity_at_level(x0, level);
        let odd_y = axis_parity_at_level(y0, level);
        for y in 0..h {
            let line = plane[y * stride..y * stride + w].to_vec();
            let mut line = interleave_f64(&line, odd_x);
            unlift_97_1d(&mut line, odd_x);
            plane[y * stride..y * stride + w].copy_from_slice(&line);
        }
        for x in 0..w {
            let col: Vec<f64> = (0..h).map(|y| plane[y * stride + x]).collect();
            let mut col = interleave_f64(&col, odd_y);
            unlift_97_1d(&mut col, odd_y);
            for y in 0..h {
                plane[y * stride + x] = col[y];
            }
        }
    }
    plane.iter().map(|&v| v.round() as i32).collect()
}

/// Dimensions of the LL subband after `levels_done` levels of decomposition
/// of a `width` x `height` plane originating at `(x0, y0)`, without
/// replicating the ceil-halving recurrence at call sites.
pub fn ll_dimensions(width: u32, height: u32, levels_done: u32, x0: u32, y0: u32) -> (u32, u32) {
    let mut w = width;
    let mut h = height;
    for _ in 0..levels_done {
        if w < 2 && h < 2 {
            break;
        }
        w = (w + 1) / 2;
        h = (h + 1) / 2;
    }
    let _ = (x0, y0); // dimensions don't depend on parity, only on ceil-halving
    (w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversible_round_trips_bit_exact() {
        let (w, h) = (8u32, 8u32);
        let original: Vec<i32> = (0..w * h).map(|i| (i as i32 * 7 % 23) - 11).collect();
        let mut plane = original.clone();
        forward_reversible(w, h, 3, 0, 0, &mut plane);
        inverse_reversible(w, h, 3, 0, 0, &mut plane);
        assert_eq!(plane, original);
    }

    #[test]
    fn reversible_round_trips_on_odd_dimensions() {
        let (w, h) = (9u32, 5u32);
        let original: Vec<i32> = (0..w * h).map(|i| (i as i32 % 17) - 8).collect();
        let mut plane = original.clone();
        forward_reversible(w, h, 2, 0, 0, &mut plane);
        inverse_reversible(w, h, 2, 0, 0, &mut plane);
        assert_eq!(plane, original);
    }

    #[test]
    fn reversible_round_trips_with_odd_origin_on_both_axes() {
        let (w, h) = (11u32, 7u32);
        let original: Vec<i32> = (0..w * h).map(|i| (i as i32 * 5 % 29) - 14).collect();
        for &(x0, y0) in &[(0u32, 0u32), (1, 0), (0, 1), (1, 1)] {
            let mut plane = original.clone();
            forward_reversible(w, h, 3, x0, y0, &mut plane);
            inverse_reversible(w, h, 3, x0, y0, &mut plane);
            assert_eq!(plane, original, "failed to round-trip at origin ({}, {})", x0, y0);
        }
    }

    #[test]
    fn reversible_round_trips_on_single_sample_odd_origin_axis() {
        // A 1-wide strip with an odd x-origin exercises the doubling rule.
        let (w, h) = (1u32, 6u32);
        let original: Vec<i32> = (0..w * h).map(|i| i as i32 - 3).collect();
        let mut plane = original.clone();
        forward_reversible(w, h, 2, 1, 0, &mut plane);
        inverse_reversible(w, h, 2, 1, 0, &mut plane);
        assert_eq!(plane, original);
    }

    #[test]
    fn irreversible_round_trips_within_one_unit() {
        let (w, h) = (16u32, 16u32);
        let original: Vec<i32> = (0..w * h).map(|i| ((i as i32 * 13) % 255) - 128).collect();
        let coeffs = forward_irreversible(w, h, 4, 0, 0, &original);
        let reconstructed = inverse_irreversible(w, h, 4, 0, 0, &coeffs);
        for (&a, &b) in original.iter().zip(reconstructed.iter()) {
            assert!((a - b).abs() <= 2, "expected near-exact reconstruction, got {} vs {}", a, b);
        }
    }

    #[test]
    fn irreversible_round_trips_with_odd_origin() {
        let (w, h) = (12u32, 10u32);
        let original: Vec<i32> = (0..w * h).map(|i| ((i as i32 * 11) % 200) - 100).collect();
        let coeffs = forward_irreversible(w, h, 3, 1, 1, &original);
        let reconstructed = inverse_irreversible(w, h, 3, 1, 1, &coeffs);
        for (&a, &b) in original.iter().zip(reconstructed.iter()) {
            assert!((a - b).abs() <= 2, "expected near-exact reconstruction at odd origin, got {} vs {}", a, b);
        }
    }

    #[test]
    fn constant_plane_has_no_detail_energy() {
        let (w, h) = (8u32, 8u32);
        let original = vec![128i32; (w * h) as usize];
        let mut plane = original.clone();
        forward_reversible(w, h, 3, 0, 0, &mut plane);
        // LL subband (top-left 1x1 after 3 levels on an 8x8 plane) carries
        // all the energy; everything else should be exactly zero.
        let ll = plane[0];
        assert_ne!(ll, 0);
        for (i, &v) in plane.iter().enumerate() {
            if i != 0 {
                assert_eq!(v, 0, "unexpected detail energy at index {}", i);
            }
        }
    }

    #[test]
    fn irreversible_constant_plane_has_near_zero_detail_energy() {
        let (w, h) = (8u32, 8u32);
        let original = vec![128i32; (w * h) as usize];
        let coeffs = forward_irreversible(w, h, 3, 0, 0, &original);
        for (i, &v) in coeffs.iter().enumerate() {
            if i != 0 {
                assert!(v.abs() < 1e-6, "unexpected detail energy {} at index {}", v, i);
            }
        }
    }

    #[test]
    fn mirror_reflects_within_bounds() {
        assert_eq!(mirror(-1, 5), 1);
        assert_eq!(mirror(5, 5), 3);
        assert_eq!(mirror(2, 5), 2);
    }

    #[test]
    fn ll_dimensions_matches_ceil_halving_recurrence() {
        assert_eq!(ll_dimensions(17, 17, 2, 0, 0), (5, 5));
        assert_eq!(ll_dimensions(8, 8, 3, 0, 0), (1, 1));
    }
}
