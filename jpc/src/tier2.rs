//! Progression ordering and packet sequencing (Annex B.12). This is the
//! layer above `packet.rs`: it decides *which* (layer, resolution,
//! component, precinct) quadruple's packet comes next, and, on encode,
//! *which* newly-available coding passes of each code block go into which
//! layer. Rate-distortion optimised layer allocation is out of scope
//! (`spec.md` §1's Non-goals); the policy here is the simplest one
//! consistent with the packet grammar — see [`split_passes_into_layers`].

use log::{info, warn};

use crate::geometry::Band;
use crate::packet::{decode_packet, encode_packet, BlockLayerContribution, Precinct};
use crate::{CoreError, ProgressionOrder};

/// Identifies one packet's place in the tile-part byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionKey {
    pub layer: u32,
    pub resolution: u32,
    pub component: u32,
    pub precinct: u32,
}

/// Enumerates every (layer, resolution, component, precinct) quadruple for
/// `order`, in the nesting order Table A.16 specifies (outermost loop is the
/// acronym's first letter). `precinct_counts[component][resolution]` gives
/// the precinct count for that tile-component/resolution pair; it may vary
/// by resolution (coarser resolutions typically have fewer precincts).
///
/// For the two orders whose outer loop is the precinct index itself (PCRL,
/// CPRL), a resolution/component's precinct grid may be smaller than the
/// loop's range; that combination is simply skipped, the same simplification
/// `other_examples` production decoders use when precinct partitions aren't
/// geometrically aligned across resolutions.
pub fn progression_order(
    order: ProgressionOrder,
    num_layers: u32,
    num_resolutions: u32,
    num_components: u32,
    precinct_counts: &[Vec<u32>],
) -> Vec<PositionKey> {
    let mut keys = Vec::new();
    let count = |c: u32, r: u32| -> u32 { precinct_counts[c as usize][r as usize] };

    match order {
        ProgressionOrder::Lrcp => {
            for l in 0..num_layers {
                for r in 0..num_resolutions {
                    for c in 0..num_components {
                        for p in 0..count(c, r) {
                            keys.push(PositionKey { layer: l, resolution: r, component: c, precinct: p });
                        }
                    }
                }
            }
        }
        ProgressionOrder::Rlcp => {
            for r in 0..num_resolutions {
                for l in 0..num_layers {
                    for c in 0..num_components {
                        for p in 0..count(c, r) {
                            keys.push(PositionKey { layer: l, resolution: r, component: c, precinct: p });
                        }
                    }
                }
            }
        }
        ProgressionOrder::Rpcl => {
            for r in 0..num_resolutions {
                let max_p = (0..num_components).map(|c| count(c, r)).max().unwrap_or(0);
                for p in 0..max_p {
                    for c in 0..num_components {
                        if p < count(c, r) {
                            for l in 0..num_layers {
                                keys.push(PositionKey { layer: l, resolution: r, component: c, precinct: p });
                            }
                        }
                    }
                }
            }
        }
        ProgressionOrder::Pcrl => {
            let max_p = (0..num_components)
                .flat_map(|c| (0..num_resolutions).map(move |r| (c, r)))
                .map(|(c, r)| count(c, r))
                .max()
                .unwrap_or(0);
            for p in 0..max_p {
                for c in 0..num_components {
                    for r in 0..num_resolutions {
                        if p < count(c, r) {
                            for l in 0..num_layers {
                                keys.push(PositionKey { layer: l, resolution: r, component: c, precinct: p });
                            }
                        }
                    }
                }
            }
        }
        ProgressionOrder::Cprl => {
            for c in 0..num_components {
                let max_p = (0..num_resolutions).map(|r| count(c, r)).max().unwrap_or(0);
                for p in 0..max_p {
                    for r in 0..num_resolutions {
                        if p < count(c, r) {
                            for l in 0..num_layers {
                                keys.push(PositionKey { layer: l, resolution: r, component: c, precinct: p });
                            }
                        }
                    }
                }
            }
        }
    }
    keys
}

/// Splits a code block's total coding passes into `num_layers` per-layer
/// allocations, as evenly as possible with the earliest layers absorbing any
/// remainder, so that quality improves monotonically and every layer (save
/// possibly trailing empty ones) carries some new data.
pub fn split_passes_into_layers(total_passes: u32, num_layers: u32) -> Vec<u32> {
    if num_layers == 0 {
        return Vec::new();
    }
    let base = total_passes / num_layers;
    let rem = total_passes % num_layers;
    (0..num_layers).map(|i| base + if i < rem { 1 } else { 0 }).collect()
}

fn layer_slice(coded: &crate::EncodedBlock, passes_before: u32, new_passes: u32) -> Vec<u8> {
    if new_passes == 0 || coded.pass_lengths.is_empty() {
        return Vec::new();
    }
    let start_byte = if passes_before == 0 { 0 } else { coded.pass_lengths[passes_before as usize - 1] };
    let end_idx = (passes_before + new_passes) as usize - 1;
    let end_byte = coded.pass_lengths[end_idx.min(coded.pass_lengths.len() - 1)];
    coded.data[start_byte..end_byte].to_vec()
}

/// Individual (non-cumulative) byte length of each pass newly contributed in
/// this layer, derived from `EncodedBlock::pass_lengths`' cumulative offsets.
/// Only meaningful under TERMALL, where every pass is independently
/// terminated and the packet header carries one length field per pass.
fn termall_pass_lengths(coded: &crate::EncodedBlock, passes_before: u32, new_passes: u32) -> Vec<usize> {
    if new_passes == 0 || coded.pass_lengths.is_empty() {
        return Vec::new();
    }
    let mut prev = if passes_before == 0 { 0 } else { coded.pass_lengths[passes_before as usize - 1] };
    let mut out = Vec::with_capacity(new_passes as usize);
    for i in 0..new_passes {
        let idx = ((passes_before + i) as usize).min(coded.pass_lengths.len() - 1);
        let cumulative = coded.pass_lengths[idx];
        out.push(cumulative - prev);
        prev = cumulative;
    }
    out
}

/// One tile-component's per-resolution precinct grids (resolution 0 first),
/// each resolution's precincts in raster order.
pub struct TileComponent {
    pub resolutions: Vec<Vec<Precinct>>,
}

/// A tile's components plus the progression parameters governing packet
/// order.
pub struct Tile {
    pub components: Vec<TileComponent>,
    pub num_layers: u32,
    pub progression: ProgressionOrder,
    /// Whether this tile's code blocks use the TERMALL style (every coding
    /// pass independently terminated), which changes the packet header's
    /// length-field grammar from one field per layer contribution to one per
    /// pass (`spec.md` §4.3).
    pub termall: bool,
}

impl Tile {
    fn precinct_counts(&self) -> Vec<Vec<u32>> {
        self.components
            .iter()
            .map(|tc| tc.resolutions.iter().map(|res| res.len() as u32).collect())
            .collect()
    }

    fn num_resolutions(&self) -> u32 {
        self.components.iter().map(|tc| tc.resolutions.len() as u32).max().unwrap_or(0)
    }

    /// Populates every included code block's `layer_plan` from its `coded`
    /// Tier-1 output, using [`split_passes_into_layers`]. Must be called
    /// once before [`Tile::encode`].
    pub fn plan_layers(&mut self) {
        for component in &mut self.components {
            for resolution in &mut component.resolutions {
                for precinct in resolution {
                    for subband in &mut precinct.subbands {
                        for block in &mut subband.blocks {
                            if let Some(coded) = &block.coded {
                                let total = coded.pass_lengths.len() as u32;
                                block.layer_plan = split_passes_into_layers(total, self.num_layers);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Encodes every packet in progression order, returning the
    /// byte-stuffed tile-part body (the concatenation of all packets; no
    /// SOT/marker framing, which is external per `spec.md` §1).
    pub fn encode(&mut self) -> Vec<u8> {
        let precinct_counts = self.precinct_counts();
        let num_resolutions = self.num_resolutions();
        let num_components = self.components.len() as u32;
        let keys = progression_order(self.progression, self.num_layers, num_resolutions, num_components, &precinct_counts);
        info!("encoding {} packets in {:?} order", keys.len(), self.progression);

        let mut out = Vec::new();
        for key in keys {
            let component = &mut self.components[key.component as usize];
            let precinct = &mut component.resolutions[key.resolution as usize][key.precinct as usize];

            let mut contributions = Vec::with_capacity(precinct.block_count());
            for subband in &precinct.subbands {
                for block in &subband.blocks {
                    let passes_before: u32 =
                        block.layer_plan.get(..key.layer as usize).map_or(0, |s| s.iter().sum());
                    let new_passes = block.layer_plan.get(key.layer as usize).copied().unwrap_or(0);
                    let data = block
                        .coded
                        .as_ref()
                        .map(|c| layer_slice(c, passes_before, new_passes))
                        .unwrap_or_default();
                    let pass_lengths = if self.termall {
                        block
                            .coded
                            .as_ref()
                            .map(|c| termall_pass_lengths(c, passes_before, new_passes))
                            .unwrap_or_default()
                    } else {
                        Vec::new()
                    };
                    contributions.push(BlockLayerContribution {
                        new_passes,
                        data,
                        zero_bit_planes: block.coded.as_ref().map(|c| c.zero_bit_planes).unwrap_or(0),
                        pass_lengths,
                        ..Default::default()
                    });
                }
            }
            let packet = encode_packet(precinct, key.layer, &contributions, self.termall);
            out.extend(packet);
        }
        info!("tile-part body is {} bytes", out.len());
        out
    }

    /// Decodes packets from `data` in progression order, distributing each
    /// packet's code-block contributions back onto the matching precinct's
    /// code blocks. Returns the decoded contributions grouped by
    /// `PositionKey` alongside whether any packet was truncated, so callers
    /// can feed each block's accumulated bytes to a `BlockCoder`.
    pub fn decode(&mut self, data: &[u8]) -> Result<DecodedTile, CoreError> {
        let precinct_counts = self.precinct_counts();
        let num_resolutions = self.num_resolutions();
        let num_components = self.components.len() as u32;
        let keys = progression_order(self.progression, self.num_layers, num_resolutions, num_components, &precinct_counts);

        let num_keys = keys.len();
        let mut offset = 0usize;
        let mut packets = Vec::with_capacity(num_keys);
        let mut any_truncated = false;
        for key in keys {
            let component = &mut self.components[key.component as usize];
            let precinct = &mut component.resolutions[key.resolution as usize][key.precinct as usize];
            let outcome = decode_packet(precinct, key.layer, &data[offset..], self.termall)?;
            offset = data.len().min(offset + outcome.consumed_len);
            any_truncated |= outcome.truncated;
            packets.push((key, outcome.packet));
            if any_truncated {
                warn!(
                    "tile-part truncated at packet {} of {} (layer {}, resolution {}, component {}, precinct {})",
                    packets.len(),
                    num_keys,
                    key.layer,
                    key.resolution,
                    key.component,
                    key.precinct
                );
                break;
            }
        }
        Ok(DecodedTile { packets, truncated: any_truncated })
    }
}

/// Every decoded packet's position and contents, in decode order.
pub struct DecodedTile {
    pub packets: Vec<(PositionKey, crate::packet::Packet)>,
    pub truncated: bool,
}

/// Subband orientation for a given resolution index within a `num_levels`
/// decomposition: resolution 0 is LL-only; every other resolution carries
/// HL/LH/HH.
pub fn subbands_for_resolution(resolution: u32) -> Vec<Band> {
    if resolution == 0 {
        vec![Band::Ll]
    } else {
        vec![Band::Hl, Band::Lh, Band::Hh]
    }
}
