//! Packet header grammar and per-code-block persistent state (Annex B.10).
//!
//! A packet carries, for one (tile, component, resolution, precinct, layer)
//! quadruple, the newly-included code blocks and the newly-contributed
//! coding passes of previously-included ones. The header is tag-tree and
//! variable-length coded (§4.3); the body is the concatenation of the raw
//! Tier-1 bytes those passes contributed, byte-stuffed as a whole
//! (`bit_io::stuff_bytes`) independently of the header's own bit-level
//! stuffing.

use crate::bit_io::{stuff_bytes, BitReader, BitWriter};
use crate::geometry::Band;
use crate::tag_tree::{InclusionTagTree, ZeroBitPlaneTagTree};
use crate::{CoreError, EncodedBlock};

/// Per-code-block state that persists across every layer of a precinct's
/// life (`spec.md` §3: "Tag-tree node values are monotone non-decreasing").
#[derive(Debug, Clone)]
pub struct CodeBlock {
    /// Whether this block has been included in any layer up to and
    /// including the current one.
    pub included: bool,
    /// Running bit-width budget for the length-indicator field (Annex
    /// B.10.7); starts at 3 and only ever grows.
    pub lblock: u32,
    /// Number of all-zero most-significant bit planes, fixed at first
    /// inclusion.
    pub zero_bit_planes: u8,
    /// Cumulative coding passes contributed across all layers so far.
    pub total_passes: u32,
    /// Cumulative coded bytes contributed across all layers so far.
    pub total_bytes: usize,
    /// Encoder-only: this block's full Tier-1 output, set once before
    /// layering begins (`Tier2Pipeline` slices new passes out of it per
    /// layer). Unused on the decode side.
    pub coded: Option<EncodedBlock>,
    /// Encoder-only: how many new passes to contribute at each layer,
    /// populated from `coded`'s pass count by the layer-allocation policy.
    pub layer_plan: Vec<u32>,
}

impl Default for CodeBlock {
    fn default() -> Self {
        CodeBlock {
            included: false,
            lblock: 3,
            zero_bit_planes: 0,
            total_passes: 0,
            total_bytes: 0,
            coded: None,
            layer_plan: Vec::new(),
        }
    }
}

/// One subband's code-block grid within a precinct, with its own pair of
/// tag trees (Annex B.10.2's inclusion and zero-bit-plane trees are scoped
/// per subband-per-precinct).
#[derive(Debug, Clone)]
pub struct SubbandPrecinct {
    pub band: Band,
    pub nx: usize,
    pub ny: usize,
    pub blocks: Vec<CodeBlock>,
    pub inclusion: InclusionTagTree,
    pub zero_bp: ZeroBitPlaneTagTree,
}

impl SubbandPrecinct {
    /// Fresh decoder-side subband: tag trees unresolved, blocks never
    /// included.
    pub fn for_decode(band: Band, nx: usize, ny: usize) -> Self {
        SubbandPrecinct {
            band,
            nx,
            ny,
            blocks: vec![CodeBlock::default(); nx * ny],
            inclusion: InclusionTagTree::for_decode(nx, ny),
            zero_bp: ZeroBitPlaneTagTree::for_decode(nx, ny),
        }
    }

    /// Fresh encoder-side subband: the caller supplies the ground truth
    /// (the layer each block is first included in, and its zero-bit-plane
    /// count) so the tag trees can be built with known values up front.
    pub fn for_encode(
        band: Band,
        nx: usize,
        ny: usize,
        first_inclusion_layer: &[u32],
        zero_bit_planes: &[u32],
    ) -> Self {
        SubbandPrecinct {
            band,
            nx,
            ny,
            blocks: vec![CodeBlock::default(); nx * ny],
            inclusion: InclusionTagTree::for_encode(nx, ny, first_inclusion_layer),
            zero_bp: ZeroBitPlaneTagTree::for_encode(nx, ny, zero_bit_planes),
        }
    }
}

/// A precinct's full code-block population across all its subbands.
#[derive(Debug, Clone, Default)]
pub struct Precinct {
    pub subbands: Vec<SubbandPrecinct>,
}

impl Precinct {
    pub fn block_count(&self) -> usize {
        self.subbands.iter().map(|s| s.blocks.len()).sum()
    }
}

/// A single code block's contribution to one packet: on encode input, the
/// caller supplies `new_passes`/`data`/`zero_bit_planes` in the same
/// traversal order `decode_packet` produces (subbands in precinct order,
/// blocks in raster order within each subband); on decode output,
/// `subband_index`/`block_index` identify which block this is.
///
/// `pass_lengths`, when non-empty, gives each individual coding pass's byte
/// length within `data` (which still holds their concatenation); it is only
/// consulted when the code-block style's TERMALL flag is active, in which
/// case the header carries one length field per pass instead of one for the
/// whole layer contribution (`spec.md` §4.3).
#[derive(Debug, Clone, Default)]
pub struct BlockLayerContribution {
    pub subband_index: usize,
    pub block_index: usize,
    pub new_passes: u32,
    pub data: Vec<u8>,
    pub zero_bit_planes: u8,
    pub pass_lengths: Vec<usize>,
}

/// A decoded or about-to-be-encoded packet.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub layer: u32,
    pub contributions: Vec<BlockLayerContribution>,
}

/// Result of decoding a packet: truncation is reported out-of-band rather
/// than as an `Err`, so the caller can keep whatever prefix was decodable
/// (`spec.md` §7's graceful-degradation requirement).
#[derive(Debug, Clone)]
pub struct PacketOutcome {
    pub packet: Packet,
    pub truncated: bool,
    /// Stuffed bytes consumed from the input slice (header + body), so a
    /// caller streaming several packets out of one buffer can advance past
    /// exactly this packet without a separate length marker.
    pub consumed_len: usize,
}

fn bit_width(value: usize) -> u32 {
    if value == 0 {
        0
    } else {
        usize::BITS - value.leading_zeros()
    }
}

fn floor_log2(value: u32) -> u32 {
    debug_assert!(value >= 1);
    31 - value.leading_zeros()
}

/// Variable-length coding-pass-count code (Annex B.10.6, Table B.4): `0` for
/// 1 pass, `10` for 2, `11` + 2 bits for 3..5, `1111` + 5 bits for 6..36, and
/// `1111` + `11111` + 7 bits for 37..164 (the escape's 7-bit field caps the
/// total at 164 new passes in one packet contribution, matching the code
/// block's maximum of 164 coding passes).
fn encode_pass_count(writer: &mut BitWriter, n: u32) {
    debug_assert!((1..=164).contains(&n), "pass count {} outside encodable range", n);
    if n == 1 {
        writer.write_bit(0);
    } else if n == 2 {
        writer.write_bits(0b10, 2);
    } else if n <= 5 {
        writer.write_bits(0b11, 2);
        writer.write_bits(n - 3, 2);
    } else if n <= 36 {
        writer.write_bits(0b11, 2);
        writer.write_bits(0b11, 2);
        writer.write_bits(n - 6, 5);
    } else {
        writer.write_bits(0b11, 2);
        writer.write_bits(0b11, 2);
        writer.write_bits(31, 5);
        writer.write_bits(n - 37, 7);
    }
}

fn decode_pass_count(reader: &mut BitReader) -> Result<u32, CoreError> {
    if reader.read_bit()? == 0 {
        return Ok(1);
    }
    if reader.read_bit()? == 0 {
        return Ok(2);
    }
    let b2 = reader.read_bit()?;
    let b3 = reader.read_bit()?;
    match (b2, b3) {
        (0, 0) => Ok(3),
        (0, 1) => Ok(4),
        (1, 0) => Ok(5),
        _ => {
            let v5 = reader.read_bits(5)?;
            if v5 < 31 {
                Ok(6 + v5)
            } else {
                let v7 = reader.read_bits(7)?;
                Ok(37 + v7)
            }
        }
    }
}

/// Encodes one packet, advancing every touched code block's persistent
/// state, and returns the full (header + stuffed body) packet bytes.
///
/// `contributions` must be ordered exactly as `precinct.subbands` and each
/// subband's raster-ordered blocks; a block not contributing this layer is
/// represented by `new_passes == 0`. `termall` selects the code-block style
/// under which every coding pass is independently terminated and signals its
/// own length (`spec.md` §4.3); it is a single flag for the whole call
/// because TERMALL is a per-tile-component coding style, not a per-block one.
pub fn encode_packet(precinct: &mut Precinct, layer: u32, contributions: &[BlockLayerContribution], termall: bool) -> Vec<u8> {
    debug_assert_eq!(contributions.len(), precinct.block_count());

    let mut header = BitWriter::new();
    let any_included = contributions.iter().any(|c| c.new_passes > 0);
    header.write_bit(if any_included { 1 } else { 0 });

    let mut pos = 0usize;
    if any_included {
        for subband in precinct.subbands.iter_mut() {
            for block_idx in 0..subband.blocks.len() {
                let contribution = &contributions[pos];
                pos += 1;
                let x = block_idx % subband.nx;
                let y = block_idx / subband.nx;
                let cb = &mut subband.blocks[block_idx];

                let included_now = if !cb.included {
                    let included = subband.inclusion.encode_inclusion(x, y, layer, &mut header);
                    if included {
                        subband.zero_bp.encode(x, y, &mut header);
                        cb.zero_bit_planes = contribution.zero_bit_planes;
                        cb.included = true;
                    }
                    included
                } else {
                    let included = contribution.new_passes > 0;
                    header.write_bit(if included { 1 } else { 0 });
                    included
                };

                if included_now {
                    encode_pass_count(&mut header, contribution.new_passes);
                    if termall {
                        debug_assert_eq!(
                            contribution.pass_lengths.len(),
                            contribution.new_passes as usize,
                            "TERMALL contribution must carry one length per new pass"
                        );
                        // Every pass is its own terminated segment (nump == 1
                        // after each termination), so the comma code covers
                        // the widest individual pass length with no
                        // floor(log2(passes)) offset (`spec.md` §4.3).
                        let required_bits =
                            contribution.pass_lengths.iter().map(|&l| bit_width(l)).max().unwrap_or(0);
                        let extra = required_bits.saturating_sub(cb.lblock);
                        for _ in 0..extra {
                            header.write_bit(1);
                        }
                        header.write_bit(0);
                        cb.lblock += extra;
                        for &len in &contribution.pass_lengths {
                            header.write_bits(len as u32, cb.lblock);
                        }
                    } else {
                        let floor_log2_passes = floor_log2(contribution.new_passes);
                        let base_bits = cb.lblock + floor_log2_passes;
                        let required_bits = bit_width(contribution.data.len());
                        let extra = required_bits.saturating_sub(base_bits);
                        for _ in 0..extra {
                            header.write_bit(1);
                        }
                        header.write_bit(0);
                        cb.lblock += extra;
                        let length_bits = cb.lblock + floor_log2_passes;
                        header.write_bits(contribution.data.len() as u32, length_bits);
                    }
                    cb.total_passes += contribution.new_passes;
                    cb.total_bytes += contribution.data.len();
                }
            }
        }
    }
    header.flush();

    let mut body_raw = Vec::new();
    for contribution in contributions {
        if contribution.new_passes > 0 {
            body_raw.extend_from_slice(&contribution.data);
        }
    }

    let mut packet = header.into_bytes();
    packet.extend(stuff_bytes(&body_raw));
    packet
}

/// Decodes one packet out of `data` (which may extend past this packet's
/// end; only as many bytes as the header's length fields declare are
/// consumed from the body). Truncated input degrades gracefully: whatever
/// prefix of contributions was decodable is returned with `truncated: true`
/// rather than an error.
pub fn decode_packet(precinct: &mut Precinct, layer: u32, data: &[u8], termall: bool) -> Result<PacketOutcome, CoreError> {
    let mut reader = BitReader::new(data);
    let mut truncated = false;

    let any_included = match reader.read_bit() {
        Ok(b) => b == 1,
        Err(_) => {
            return Ok(PacketOutcome {
                packet: Packet { layer, contributions: Vec::new() },
                truncated: true,
                consumed_len: data.len(),
            });
        }
    };

    struct Pending {
        subband_index: usize,
        block_index: usize,
        new_passes: u32,
        length: usize,
        pass_lengths: Vec<usize>,
        zero_bit_planes: u8,
    }
    let mut pending = Vec::new();

    'outer: if any_included {
        for (sub_idx, subband) in precinct.subbands.iter_mut().enumerate() {
            for block_idx in 0..subband.blocks.len() {
                let x = block_idx % subband.nx;
                let y = block_idx / subband.nx;
                let cb = &mut subband.blocks[block_idx];

                let mut newly_resolved_zbp = 0u8;
                let included_now = if !cb.included {
                    match subband.inclusion.decode_inclusion(x, y, layer, &mut reader) {
                        Ok(v) => v,
                        Err(_) => {
                            truncated = true;
                            break 'outer;
                        }
                    }
                } else {
                    match reader.read_bit() {
                        Ok(b) => b == 1,
                        Err(_) => {
                            truncated = true;
                            break 'outer;
                        }
                    }
                };

                if included_now && !cb.included {
                    match subband.zero_bp.decode(x, y, &mut reader) {
                        Ok(v) => {
                            newly_resolved_zbp = v as u8;
                            cb.zero_bit_planes = newly_resolved_zbp;
                            cb.included = true;
                        }
                        Err(_) => {
                            truncated = true;
                            break 'outer;
                        }
                    }
                }

                if included_now {
                    let new_passes = match decode_pass_count(&mut reader) {
                        Ok(v) => v,
                        Err(_) => {
                            truncated = true;
                            break 'outer;
                        }
                    };
                    let mut extra = 0u32;
                    loop {
                        match reader.read_bit() {
                            Ok(1) => extra += 1,
                            Ok(_) => break,
                            Err(_) => {
                                truncated = true;
                                break 'outer;
                            }
                        }
                    }
                    cb.lblock += extra;

                    let (length, pass_lengths) = if termall {
                        let mut lengths = Vec::with_capacity(new_passes as usize);
                        let mut sum = 0usize;
                        let mut failed = false;
                        for _ in 0..new_passes {
                            match reader.read_bits(cb.lblock) {
                                Ok(v) => {
                                    lengths.push(v as usize);
                                    sum += v as usize;
                                }
                                Err(_) => {
                                    failed = true;
                                    break;
                                }
                            }
                        }
                        if failed {
                            truncated = true;
                            break 'outer;
                        }
                        (sum, lengths)
                    } else {
                        let floor_log2_passes = floor_log2(new_passes);
                        let length_bits = cb.lblock + floor_log2_passes;
                        match reader.read_bits(length_bits) {
                            Ok(v) => (v as usize, Vec::new()),
                            Err(_) => {
                                truncated = true;
                                break 'outer;
                            }
                        }
                    };
                    cb.total_passes += new_passes;
                    cb.total_bytes += length;
                    pending.push(Pending {
                        subband_index: sub_idx,
                        block_index: block_idx,
                        new_passes,
                        length,
                        pass_lengths,
                        zero_bit_planes: newly_resolved_zbp,
                    });
                }
            }
        }
    }

    reader.align_to_byte();
    let header_len = reader.bytes_read().min(data.len());
    let body_stuffed = &data[header_len..];
    let raw_needed: usize = pending.iter().map(|p| p.length).sum();
    let (body_raw, stuffed_consumed, body_truncated) = unstuff_prefix(body_stuffed, raw_needed);
    truncated |= body_truncated;

    let mut contributions = Vec::with_capacity(pending.len());
    let mut offset = 0usize;
    for p in pending {
        let available = body_raw.len().saturating_sub(offset);
        let take = p.length.min(available);
        if take < p.length {
            truncated = true;
        }
        let chunk = body_raw[offset..offset + take].to_vec();
        offset += take;
        // Per-pass lengths were declared against the full (possibly
        // truncated) total; only report as many as the chunk actually holds.
        let mut pass_lengths = Vec::with_capacity(p.pass_lengths.len());
        let mut consumed = 0usize;
        for len in p.pass_lengths {
            if consumed + len > chunk.len() {
                break;
            }
            consumed += len;
            pass_lengths.push(len);
        }
        contributions.push(BlockLayerContribution {
            subband_index: p.subband_index,
            block_index: p.block_index,
            new_passes: p.new_passes,
            data: chunk,
            zero_bit_planes: p.zero_bit_planes,
            pass_lengths,
        });
    }

    let consumed_len = if truncated { data.len() } else { header_len + stuffed_consumed };

    Ok(PacketOutcome { packet: Packet { layer, contributions }, truncated, consumed_len })
}

/// Unstuffs bytes from `stuffed` until `raw_needed` raw bytes have been
/// produced or the input runs out, returning `(raw_bytes, stuffed_bytes_consumed,
/// truncated)`. Bounding the unstuff to exactly what this packet's header
/// declared lets the caller know precisely how many stuffed bytes this
/// packet occupied in a multi-packet stream.
fn unstuff_prefix(stuffed: &[u8], raw_needed: usize) -> (Vec<u8>, usize, bool) {
    let mut out = Vec::with_capacity(raw_needed);
    let mut i = 0;
    while out.len() < raw_needed {
        if i >= stuffed.len() {
            return (out, i, true);
        }
        let b = stuffed[i];
        out.push(b);
        i += 1;
        if b == 0xFF {
            if i >= stuffed.len() || stuffed[i] != 0x00 {
                return (out, i.min(stuffed.len()), true);
            }
            i += 1;
        }
    }
    (out, i, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_precinct_pair(nx: usize, ny: usize, first_layers: &[u32], zbp: &[u32]) -> (Precinct, Precinct) {
        let encoder = Precinct {
            subbands: vec![SubbandPrecinct::for_encode(Band::Ll, nx, ny, first_layers, zbp)],
        };
        let decoder = Precinct { subbands: vec![SubbandPrecinct::for_decode(Band::Ll, nx, ny)] };
        (encoder, decoder)
    }

    #[test]
    fn single_block_two_layer_round_trip() {
        let (mut enc, mut dec) = make_precinct_pair(1, 1, &[0], &[2]);

        let layer0 = vec![BlockLayerContribution {
            new_passes: 2,
            data: vec![0xAB, 0xCD],
            zero_bit_planes: 2,
            ..Default::default()
        }];
        let packet0 = encode_packet(&mut enc, 0, &layer0, false);
        let outcome0 = decode_packet(&mut dec, 0, &packet0, false).unwrap();
        assert!(!outcome0.truncated);
        assert_eq!(outcome0.packet.contributions.len(), 1);
        assert_eq!(outcome0.packet.contributions[0].data, vec![0xAB, 0xCD]);
        assert_eq!(outcome0.packet.contributions[0].zero_bit_planes, 2);

        let layer1 = vec![BlockLayerContribution { new_passes: 1, data: vec![0xEF], ..Default::default() }];
        let packet1 = encode_packet(&mut enc, 1, &layer1, false);
        let outcome1 = decode_packet(&mut dec, 1, &packet1, false).unwrap();
        assert!(!outcome1.truncated);
        assert_eq!(outcome1.packet.contributions[0].data, vec![0xEF]);
    }

    #[test]
    fn empty_packet_round_trips_as_single_bit() {
        let (mut enc, mut dec) = make_precinct_pair(1, 1, &[3], &[1]);
        let layer0 = vec![BlockLayerContribution { new_passes: 0, data: vec![], ..Default::default() }];
        let packet = encode_packet(&mut enc, 0, &layer0, false);
        assert_eq!(packet.len(), 1);
        let outcome = decode_packet(&mut dec, 0, &packet, false).unwrap();
        assert!(outcome.packet.contributions.is_empty());
        assert!(!outcome.truncated);
    }

    #[test]
    fn truncated_body_is_reported_not_errored() {
        let (mut enc, mut dec) = make_precinct_pair(1, 1, &[0], &[0]);
        let layer0 =
            vec![BlockLayerContribution { new_passes: 3, data: vec![1, 2, 3, 4, 5], ..Default::default() }];
        let mut packet = encode_packet(&mut enc, 0, &layer0, false);
        packet.truncate(packet.len() - 2);
        let outcome = decode_packet(&mut dec, 0, &packet, false).unwrap();
        assert!(outcome.truncated);
        assert!(outcome.packet.contributions[0].data.len() < 5);
    }

    #[test]
    fn termall_encodes_one_length_per_pass() {
        let (mut enc, mut dec) = make_precinct_pair(1, 1, &[0], &[0]);
        let layer0 = vec![BlockLayerContribution {
            new_passes: 3,
            data: vec![1, 2, 3, 4, 5, 6],
            pass_lengths: vec![1, 2, 3],
            ..Default::default()
        }];
        let packet = encode_packet(&mut enc, 0, &layer0, true);
        let outcome = decode_packet(&mut dec, 0, &packet, true).unwrap();
        assert!(!outcome.truncated);
        assert_eq!(outcome.packet.contributions[0].data, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(outcome.packet.contributions[0].pass_lengths, vec![1, 2, 3]);
    }

    #[test]
    fn termall_truncation_drops_incomplete_trailing_passes() {
        let (mut enc, mut dec) = make_precinct_pair(1, 1, &[0], &[0]);
        let layer0 = vec![BlockLayerContribution {
            new_passes: 4,
            data: vec![0xAA; 10],
            pass_lengths: vec![2, 2, 3, 3],
            ..Default::default()
        }];
        let mut packet = encode_packet(&mut enc, 0, &layer0, true);
        packet.truncate(packet.len() - 4);
        let outcome = decode_packet(&mut dec, 0, &packet, true).unwrap();
        assert!(outcome.truncated);
        let contribution = &outcome.packet.contributions[0];
        assert_eq!(contribution.pass_lengths.iter().sum::<usize>(), contribution.data.len());
    }

    #[test]
    fn pass_count_code_round_trips_full_range() {
        for n in 1..=164u32 {
            let mut w = BitWriter::new();
            encode_pass_count(&mut w, n);
            w.flush();
            let bytes = w.into_bytes();
            let mut r = BitReader::new(&bytes);
            assert_eq!(decode_pass_count(&mut r).unwrap(), n, "pass count {} failed to round-trip", n);
        }
    }

    #[test]
    fn lblock_only_grows_across_layers() {
        let (mut enc, mut dec) = make_precinct_pair(1, 1, &[0], &[0]);
        let small = vec![BlockLayerContribution { new_passes: 1, data: vec![0x01], ..Default::default() }];
        let packet0 = encode_packet(&mut enc, 0, &small, false);
        decode_packet(&mut dec, 0, &packet0, false).unwrap();
        let before = dec.subbands[0].blocks[0].lblock;

        let big = vec![BlockLayerContribution {
            new_passes: 1,
            data: vec![0u8; 5000],
            ..Default::default()
        }];
        let packet1 = encode_packet(&mut enc, 1, &big, false);
        let outcome1 = decode_packet(&mut dec, 1, &packet1, false).unwrap();
        assert!(!outcome1.truncated);
        assert_eq!(outcome1.packet.contributions[0].data.len(), 5000);
        assert!(dec.subbands[0].blocks[0].lblock >= before);
    }
}
