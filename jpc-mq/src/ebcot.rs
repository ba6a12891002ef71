//! EBCOT bit-plane block coder (Annex D): significance propagation,
//! magnitude refinement and cleanup passes, context-modeled through the
//! MQ coder in [`crate::mq`].
//!
//! Context assignment follows Annex D.3 (Tables D.1-D.3 for zero coding,
//! D.4 for sign coding, D.5-D.6 for magnitude refinement); scanning follows
//! the 4-row stripe order of Annex D.4, including the cleanup pass's
//! run-length shortcut for columns with no significant neighbors.

use log::debug;

use jpc::{Band, CodBlockStyle, EncodedBlock};

use crate::mq::{MqDecoder, MqEncoder};

/// Context count: 9 zero-coding + 5 sign + 3 magnitude-refinement + 1
/// run-length + 1 spare (used for the run-length shortcut's 2-bit index,
/// coded with a fixed near-uniform probability rather than a dedicated
/// adaptive context).
const NUM_CONTEXTS: usize = 19;
const CTX_RUN_LENGTH: usize = 17;
const CTX_UNIFORM: usize = 18;

fn idx(x: u32, y: u32, width: u32) -> usize {
    (y * width + x) as usize
}

fn sig_at(significant: &[bool], width: u32, height: u32, x: i64, y: i64) -> bool {
    if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
        false
    } else {
        significant[idx(x as u32, y as u32, width)]
    }
}

fn neg_at(neg: &[bool], width: u32, height: u32, x: i64, y: i64) -> bool {
    if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
        false
    } else {
        neg[idx(x as u32, y as u32, width)]
    }
}

fn counts(significant: &[bool], width: u32, height: u32, x: u32, y: u32) -> (u8, u8, u8) {
    let xi = x as i64;
    let yi = y as i64;
    let h = sig_at(significant, width, height, xi - 1, yi) as u8 + sig_at(significant, width, height, xi + 1, yi) as u8;
    let v = sig_at(significant, width, height, xi, yi - 1) as u8 + sig_at(significant, width, height, xi, yi + 1) as u8;
    let d = sig_at(significant, width, height, xi - 1, yi - 1) as u8
        + sig_at(significant, width, height, xi + 1, yi - 1) as u8
        + sig_at(significant, width, height, xi - 1, yi + 1) as u8
        + sig_at(significant, width, height, xi + 1, yi + 1) as u8;
    (h, v, d)
}

fn sign_contribution(sig: bool, neg: bool) -> i32 {
    if !sig {
        0
    } else if neg {
        -1
    } else {
        1
    }
}

fn clip(sum: i32) -> i32 {
    sum.signum()
}

fn sign_counts(significant: &[bool], neg: &[bool], width: u32, height: u32, x: u32, y: u32) -> (i32, i32) {
    let xi = x as i64;
    let yi = y as i64;
    let hl = sign_contribution(sig_at(significant, width, height, xi - 1, yi), neg_at(neg, width, height, xi - 1, yi));
    let hr = sign_contribution(sig_at(significant, width, height, xi + 1, yi), neg_at(neg, width, height, xi + 1, yi));
    let vt = sign_contribution(sig_at(significant, width, height, xi, yi - 1), neg_at(neg, width, height, xi, yi - 1));
    let vb = sign_contribution(sig_at(significant, width, height, xi, yi + 1), neg_at(neg, width, height, xi, yi + 1));
    (clip(hl + hr), clip(vt + vb))
}

fn any_neighbor_significant(significant: &[bool], width: u32, height: u32, x: u32, y: u32) -> bool {
    let (h, v, d) = counts(significant, width, height, x, y);
    h > 0 || v > 0 || d > 0
}

/// Table D.1 (LL/LH), D.2 (HL, with horizontal/vertical roles swapped) and
/// D.3 (HH, diagonal-dominated) zero-coding context selection.
fn sig_context(band: Band, h: u8, v: u8, d: u8) -> usize {
    match band {
        Band::Ll | Band::Lh => match (h, v, d) {
            (2, _, _) => 8,
            (1, v, _) if v >= 1 => 7,
            (1, 0, d) if d >= 1 => 6,
            (1, 0, 0) => 5,
            (0, 2, _) => 4,
            (0, 1, _) => 3,
            (0, 0, d) if d >= 2 => 2,
            (0, 0, 1) => 1,
            (0, 0, 0) => 0,
            _ => unreachable!("h,v bounded to 0..=2"),
        },
        Band::Hl => match (h, v, d) {
            (_, 2, _) => 8,
            (h, 1, _) if h >= 1 => 7,
            (0, 1, d) if d >= 1 => 6,
            (0, 1, 0) => 5,
            (2, 0, _) => 4,
            (1, 0, _) => 3,
            (0, 0, d) if d >= 2 => 2,
            (0, 0, 1) => 1,
            (0, 0, 0) => 0,
            _ => unreachable!("h,v bounded to 0..=2"),
        },
        Band::Hh => {
            let hv = h + v;
            match (d, hv) {
                (d, _) if d >= 3 => 8,
                (2, hv) if hv >= 1 => 7,
                (2, 0) => 6,
                (1, hv) if hv >= 2 => 5,
                (1, 1) => 4,
                (1, 0) => 3,
                (0, hv) if hv >= 2 => 2,
                (0, 1) => 1,
                (0, 0) => 0,
                _ => unreachable!("d bounded to 0..=4"),
            }
        }
    }
}

/// Table D.4: sign context and the XOR bit applied to the coded sign.
fn sign_context(h: i32, v: i32) -> (usize, bool) {
    match (h, v) {
        (1, 1) => (13, false),
        (1, 0) => (12, false),
        (1, -1) => (11, false),
        (0, 1) => (10, false),
        (0, 0) => (9, false),
        (0, -1) => (10, true),
        (-1, 1) => (11, true),
        (-1, 0) => (12, true),
        (-1, -1) => (13, true),
        _ => unreachable!("clip bounds contributions to -1..=1"),
    }
}

/// Table D.5/D.6: magnitude refinement context.
fn mag_context(first_refinement: bool, any_neighbor_significant: bool) -> usize {
    if first_refinement {
        if any_neighbor_significant {
            15
        } else {
            14
        }
    } else {
        16
    }
}

/// Groups code-block coordinates into 4-row stripes, scanned column by
/// column within each stripe (Annex D.4).
fn scan_order(width: u32, height: u32) -> Vec<Vec<(u32, u32)>> {
    let mut columns = Vec::new();
    let mut y0 = 0u32;
    while y0 < height {
        let stripe_h = (height - y0).min(4);
        for x in 0..width {
            columns.push((0..stripe_h).map(|dy| (x, y0 + dy)).collect());
        }
        y0 += stripe_h;
    }
    columns
}

fn run_length_eligible(significant: &[bool], visited: &[bool], width: u32, height: u32, col: &[(u32, u32)]) -> bool {
    col.len() == 4
        && col.iter().all(|&(x, y)| {
            let i = idx(x, y, width);
            !significant[i] && !visited[i] && !any_neighbor_significant(significant, width, height, x, y)
        })
}

struct Block {
    band: Band,
    width: u32,
    height: u32,
    significant: Vec<bool>,
    neg: Vec<bool>,
    refined: Vec<bool>,
    visited: Vec<bool>,
    columns: Vec<Vec<(u32, u32)>>,
}

impl Block {
    fn new(band: Band, width: u32, height: u32) -> Self {
        let n = (width * height) as usize;
        Block {
            band,
            width,
            height,
            significant: vec![false; n],
            neg: vec![false; n],
            refined: vec![false; n],
            visited: vec![false; n],
            columns: scan_order(width, height),
        }
    }

    fn mark_significant(&mut self, x: u32, y: u32, negative: bool) {
        let i = idx(x, y, self.width);
        self.significant[i] = true;
        self.neg[i] = negative;
    }
}

pub fn encode_block(band: Band, coefficients: &[i32], width: u32, height: u32, max_bitplane: i32, style: CodBlockStyle) -> EncodedBlock {
    let n = (width * height) as usize;
    debug_assert_eq!(coefficients.len(), n);

    let magnitude: Vec<u32> = coefficients.iter().map(|c| c.unsigned_abs()).collect();
    let sign_of: Vec<bool> = coefficients.iter().map(|c| *c < 0).collect();
    let mut blk = Block::new(band, width, height);

    let mut mq = MqEncoder::new(NUM_CONTEXTS);
    mq.init();
    let mut pass_lengths = Vec::new();

    let mut bitplane = max_bitplane;
    let mut zero_bit_planes = 0u8;
    while bitplane >= 0 && magnitude.iter().all(|m| (m >> bitplane) & 1 == 0) {
        zero_bit_planes += 1;
        bitplane -= 1;
    }
    debug!("{:?} block {}x{}: {} zero bit planes, {} remain", band, width, height, zero_bit_planes, bitplane + 1);

    let mut first_plane = true;
    while bitplane >= 0 {
        if !first_plane {
            if style.reset {
                mq.reset_contexts();
            }
            for col in &blk.columns {
                for &(x, y) in col {
                    let i = idx(x, y, width);
                    if blk.significant[i] || !any_neighbor_significant(&blk.significant, width, height, x, y) {
                        continue;
                    }
                    let (h, v, d) = counts(&blk.significant, width, height, x, y);
                    let cx = sig_context(band, h, v, d);
                    let bit = ((magnitude[i] >> bitplane) & 1) as u8;
                    mq.encode(cx, bit);
                    blk.visited[i] = true;
                    if bit == 1 {
                        blk.mark_significant(x, y, sign_of[i]);
                        let (hc, vc) = sign_counts(&blk.significant, &blk.neg, width, height, x, y);
                        let (scx, xor) = sign_context(hc, vc);
                        mq.encode(scx, (sign_of[i] as u8) ^ (xor as u8));
                    }
                }
            }
            pass_lengths.push(mq.stable_byte_count());

            if style.reset {
                mq.reset_contexts();
            }
            for col in &blk.columns {
                for &(x, y) in col {
                    let i = idx(x, y, width);
                    if !blk.significant[i] || blk.visited[i] {
                        continue;
                    }
                    let first_refinement = !blk.refined[i];
                    let nb_sig = any_neighbor_significant(&blk.significant, width, height, x, y);
                    let cx = mag_context(first_refinement, nb_sig);
                    let bit = ((magnitude[i] >> bitplane) & 1) as u8;
                    mq.encode(cx, bit);
                    blk.refined[i] = true;
                }
            }
            pass_lengths.push(mq.stable_byte_count());
        }

        if style.reset {
            mq.reset_contexts();
        }
        for col in &blk.columns {
            let mut k = 0usize;
            while k < col.len() {
                let (x, y) = col[k];
                let i = idx(x, y, width);
                if blk.significant[i] || blk.visited[i] {
                    k += 1;
                    continue;
                }
                if k == 0 && run_length_eligible(&blk.significant, &blk.visited, width, height, col) {
                    let any_one = (0..4).any(|j| (magnitude[idx(col[j].0, col[j].1, width)] >> bitplane) & 1 == 1);
                    mq.encode(CTX_RUN_LENGTH, any_one as u8);
                    if !any_one {
                        k = 4;
                        continue;
                    }
                    let first = (0..4).find(|&j| (magnitude[idx(col[j].0, col[j].1, width)] >> bitplane) & 1 == 1).unwrap();
                    mq.encode(CTX_UNIFORM, ((first >> 1) & 1) as u8);
                    mq.encode(CTX_UNIFORM, (first & 1) as u8);
                    for &(xx, yy) in &col[..first] {
                        blk.visited[idx(xx, yy, width)] = true;
                    }
                    let (xx, yy) = col[first];
                    let fi = idx(xx, yy, width);
                    blk.mark_significant(xx, yy, sign_of[fi]);
                    let (hc, vc) = sign_counts(&blk.significant, &blk.neg, width, height, xx, yy);
                    let (scx, xor) = sign_context(hc, vc);
                    mq.encode(scx, (sign_of[fi] as u8) ^ (xor as u8));
                    blk.visited[fi] = true;
                    k = first + 1;
                    continue;
                }
                let (h, v, d) = counts(&blk.significant, width, height, x, y);
                let cx = sig_context(band, h, v, d);
                let bit = ((magnitude[i] >> bitplane) & 1) as u8;
                mq.encode(cx, bit);
                if bit == 1 {
                    blk.mark_significant(x, y, sign_of[i]);
                    let (hc, vc) = sign_counts(&blk.significant, &blk.neg, width, height, x, y);
                    let (scx, xor) = sign_context(hc, vc);
                    mq.encode(scx, (sign_of[i] as u8) ^ (xor as u8));
                }
                k += 1;
            }
        }
        pass_lengths.push(mq.stable_byte_count());

        for v in blk.visited.iter_mut() {
            *v = false;
        }
        first_plane = false;
        bitplane -= 1;
    }

    let data = mq.flush();
    if let Some(last) = pass_lengths.last_mut() {
        *last = data.len();
    }
    EncodedBlock { data, pass_lengths, zero_bit_planes }
}

fn decode_block_impl(band: Band, data: &[u8], width: u32, height: u32, max_passes: u32, max_bitplane: i32, reset_per_pass: bool) -> Vec<i32> {
    let mut blk = Block::new(band, width, height);
    let mut magnitude = vec![0u32; (width * height) as usize];

    let mut mq = MqDecoder::new(NUM_CONTEXTS);
    mq.init(data);

    let mut passes_done = 0u32;
    let mut first_plane = true;
    let mut bitplane = max_bitplane;

    while bitplane >= 0 && passes_done < max_passes {
        if !first_plane {
            if reset_per_pass {
                mq.reset_contexts();
            }
            for col in &blk.columns {
                for &(x, y) in col {
                    let i = idx(x, y, width);
                    if blk.significant[i] || !any_neighbor_significant(&blk.significant, width, height, x, y) {
                        continue;
                    }
                    let (h, v, d) = counts(&blk.significant, width, height, x, y);
                    let cx = sig_context(band, h, v, d);
                    let bit = mq.decode(cx);
                    blk.visited[i] = true;
                    if bit == 1 {
                        let (hc, vc) = sign_counts(&blk.significant, &blk.neg, width, height, x, y);
                        let (scx, xor) = sign_context(hc, vc);
                        let coded = mq.decode(scx);
                        blk.mark_significant(x, y, (coded ^ (xor as u8)) == 1);
                        magnitude[i] |= 1 << bitplane;
                    }
                }
            }
            passes_done += 1;
            if passes_done >= max_passes {
                break;
            }

            if reset_per_pass {
                mq.reset_contexts();
            }
            for col in &blk.columns {
                for &(x, y) in col {
                    let i = idx(x, y, width);
                    if !blk.significant[i] || blk.visited[i] {
                        continue;
                    }
                    let first_refinement = !blk.refined[i];
                    let nb_sig = any_neighbor_significant(&blk.significant, width, height, x, y);
                    let cx = mag_context(first_refinement, nb_sig);
                    let bit = mq.decode(cx);
                    if bit == 1 {
                        magnitude[i] |= 1 << bitplane;
                    }
                    blk.refined[i] = true;
                }
            }
            passes_done += 1;
            if passes_done >= max_passes {
                break;
            }
        }

        if reset_per_pass {
            mq.reset_contexts();
        }
        for col in &blk.columns {
            let mut k = 0usize;
            while k < col.len() {
                let (x, y) = col[k];
                let i = idx(x, y, width);
                if blk.significant[i] || blk.visited[i] {
                    k += 1;
                    continue;
                }
                if k == 0 && run_length_eligible(&blk.significant, &blk.visited, width, height, col) {
                    let any_one = mq.decode(CTX_RUN_LENGTH);
                    if any_one == 0 {
                        k = 4;
                        continue;
                    }
                    let b1 = mq.decode(CTX_UNIFORM);
                    let b0 = mq.decode(CTX_UNIFORM);
                    let first = ((b1 << 1) | b0) as usize;
                    for &(xx, yy) in &col[..first] {
                        blk.visited[idx(xx, yy, width)] = true;
                    }
                    let (xx, yy) = col[first];
                    let fi = idx(xx, yy, width);
                    let (hc, vc) = sign_counts(&blk.significant, &blk.neg, width, height, xx, yy);
                    let (scx, xor) = sign_context(hc, vc);
                    let coded = mq.decode(scx);
                    blk.mark_significant(xx, yy, (coded ^ (xor as u8)) == 1);
                    magnitude[fi] |= 1 << bitplane;
                    blk.visited[fi] = true;
                    k = first + 1;
                    continue;
                }
                let (h, v, d) = counts(&blk.significant, width, height, x, y);
                let cx = sig_context(band, h, v, d);
                let bit = mq.decode(cx);
                if bit == 1 {
                    let (hc, vc) = sign_counts(&blk.significant, &blk.neg, width, height, x, y);
                    let (scx, xor) = sign_context(hc, vc);
                    let coded = mq.decode(scx);
                    blk.mark_significant(x, y, (coded ^ (xor as u8)) == 1);
                    magnitude[i] |= 1 << bitplane;
                }
                k += 1;
            }
        }
        passes_done += 1;

        for v in blk.visited.iter_mut() {
            *v = false;
        }
        first_plane = false;
        bitplane -= 1;
    }

    magnitude.iter().zip(blk.neg.iter()).map(|(&m, &s)| if s { -(m as i32) } else { m as i32 }).collect()
}

/// Code-block coder implementing [`jpc::BlockCoder`] over the bit-plane
/// passes above. `roi_shift` is accepted for interface compatibility but not
/// applied here: differential region-of-interest descaling needs the mask
/// carried in [`jpc::RgnParams`], which lives above this layer, so the
/// caller is expected to apply it to the reconstructed coefficients.
#[derive(Debug)]
pub struct EbcotCoder {
    band: Band,
}

impl EbcotCoder {
    pub fn new() -> Self {
        EbcotCoder { band: Band::Ll }
    }
}

impl Default for EbcotCoder {
    fn default() -> Self {
        Self::new()
    }
}

impl jpc::BlockCoder for EbcotCoder {
    fn set_band(&mut self, band: Band) {
        self.band = band;
    }

    fn decode(&mut self, data: &[u8], width: u32, height: u32, max_passes: u32, max_bitplane: i32, _roi_shift: u8) -> Vec<i32> {
        decode_block_impl(self.band, data, width, height, max_passes, max_bitplane, false)
    }

    fn decode_layered(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        cumulative_pass_lengths: &[usize],
        max_bitplane: i32,
        _roi_shift: u8,
        _use_termall: bool,
        reset_per_pass: bool,
    ) -> Vec<i32> {
        let max_passes = cumulative_pass_lengths.len() as u32;
        let available = cumulative_pass_lengths.last().copied().unwrap_or(0).min(data.len());
        decode_block_impl(self.band, &data[..available], width, height, max_passes, max_bitplane, reset_per_pass)
    }

    fn encode(&mut self, coefficients: &[i32], width: u32, height: u32, max_bitplane: i32, style: CodBlockStyle) -> EncodedBlock {
        encode_block(self.band, coefficients, width, height, max_bitplane, style)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jpc::BlockCoder;

    #[test]
    fn single_block_round_trips_bit_exact() {
        let width = 4u32;
        let height = 4u32;
        let coefficients = vec![3, -1, 0, 0, 5, 2, -2, 0, 0, 0, 1, -1, 4, -4, 0, 1];
        let style = CodBlockStyle::default();
        let mut coder = EbcotCoder::new();
        coder.set_band(Band::Ll);
        let max_bitplane = 2;
        let encoded = coder.encode(&coefficients, width, height, max_bitplane, style);

        let mut decoder = EbcotCoder::new();
        decoder.set_band(Band::Ll);
        let decoded = decoder.decode(&encoded.data, width, height, encoded.pass_lengths.len() as u32, max_bitplane, 0);
        assert_eq!(decoded, coefficients);
    }

    #[test]
    fn all_zero_block_produces_no_passes() {
        let width = 4u32;
        let height = 4u32;
        let coefficients = vec![0i32; 16];
        let mut coder = EbcotCoder::new();
        coder.set_band(Band::Hh);
        let encoded = coder.encode(&coefficients, width, height, 3, CodBlockStyle::default());
        assert!(encoded.pass_lengths.is_empty());
        assert_eq!(encoded.zero_bit_planes, 4);
    }

    #[test]
    fn layered_decode_recovers_more_detail_as_layers_accumulate() {
        let width = 8u32;
        let height = 8u32;
        let mut coefficients = vec![0i32; 64];
        coefficients[0] = 100;
        coefficients[9] = -50;
        coefficients[40] = 25;
        let mut coder = EbcotCoder::new();
        coder.set_band(Band::Lh);
        let max_bitplane = 7;
        let encoded = coder.encode(&coefficients, width, height, max_bitplane, CodBlockStyle::default());
        assert!(encoded.pass_lengths.len() >= 3);

        let mut decoder = EbcotCoder::new();
        decoder.set_band(Band::Lh);
        let first_two: Vec<usize> = encoded.pass_lengths.iter().take(2).copied().collect();
        let partial = decoder.decode_layered(&encoded.data, width, height, &first_two, max_bitplane, 0, false, false);

        let mut decoder_full = EbcotCoder::new();
        decoder_full.set_band(Band::Lh);
        let full = decoder_full.decode_layered(&encoded.data, width, height, &encoded.pass_lengths, max_bitplane, 0, false, false);
        assert_eq!(full, coefficients);

        let partial_err: i64 = partial.iter().zip(coefficients.iter()).map(|(a, b)| ((*a - *b) as i64).abs()).sum();
        let full_err: i64 = full.iter().zip(coefficients.iter()).map(|(a, b)| ((*a - *b) as i64).abs()).sum();
        assert!(partial_err >= full_err);
    }

    #[test]
    fn reset_style_still_round_trips() {
        let width = 4u32;
        let height = 4u32;
        let coefficients = vec![7, 0, -3, 0, 0, 2, 0, 0, 0, 0, 0, 6, -1, 0, 0, 0];
        let style = CodBlockStyle { reset: true, ..CodBlockStyle::default() };
        let mut coder = EbcotCoder::new();
        coder.set_band(Band::Hl);
        let max_bitplane = 3;
        let encoded = coder.encode(&coefficients, width, height, max_bitplane, style);

        let mut decoder = EbcotCoder::new();
        decoder.set_band(Band::Hl);
        let decoded = decoder.decode_layered(&encoded.data, width, height, &encoded.pass_lengths, max_bitplane, 0, false, true);
        assert_eq!(decoded, coefficients);
    }
}
