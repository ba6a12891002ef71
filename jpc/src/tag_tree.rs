//! Generalised tag tree (Annex B.10.2), grounded on the node-state design of
//! `other_examples/c5f22fad_Lanzaa-jpeg2000__jpc-src-tag_tree.rs` but
//! reshaped to carry both the encoder's (ground-truth-known-upfront) and the
//! decoder's (progressively-learned) walks through one shared structure, per
//! `spec.md` §4.2's threshold/monotone-refinement contract.
//!
//! A tag tree over an `nx` × `ny` leaf grid has `ceil(log2(max(nx, ny))) + 1`
//! levels; level 0 is the root (a single node covering the whole grid) and
//! the last level is the leaf grid itself. Each non-leaf node's value is the
//! minimum of its (up to four) children — the property a threshold walk
//! exploits to skip whole unresolved subtrees.

use crate::bit_io::{BitReader, BitWriter};
use crate::CoreError;

#[derive(Debug, Clone, Copy)]
struct Node {
    value: u32,
    known: bool,
    state: u32,
    signalled: bool,
}

impl Default for Node {
    fn default() -> Self {
        Node { value: 0, known: false, state: 0, signalled: false }
    }
}

/// Outcome of a single threshold query against a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagTreeResult {
    /// The leaf's exact value is known and is `< threshold`.
    Known(u32),
    /// The leaf's value is only known to be `>= value` so far.
    AtLeast(u32),
}

impl TagTreeResult {
    pub fn is_known_below(&self, threshold: u32) -> bool {
        matches!(self, TagTreeResult::Known(v) if *v < threshold)
    }
}

/// Generic tag tree over an `nx` × `ny` leaf grid, usable for either encoding
/// (ground-truth values supplied upfront) or decoding (values learned from
/// the bitstream one threshold query at a time).
#[derive(Debug, Clone)]
pub struct TagTree {
    /// `(width, height, nodes)` per level, index 0 is the root.
    levels: Vec<(usize, usize, Vec<Node>)>,
    max_depth: usize,
}

fn level_dims(nx: usize, ny: usize) -> Vec<(usize, usize)> {
    let mut dims = vec![(nx.max(1), ny.max(1))];
    let (mut w, mut h) = (nx.max(1), ny.max(1));
    while w > 1 || h > 1 {
        w = (w + 1) / 2;
        h = (h + 1) / 2;
        dims.push((w, h));
    }
    dims.reverse();
    dims
}

impl TagTree {
    /// Builds a decoder-side tree: all nodes start unresolved.
    pub fn for_decode(nx: usize, ny: usize) -> Self {
        let dims = level_dims(nx, ny);
        let max_depth = dims.len() - 1;
        let levels = dims
            .into_iter()
            .map(|(w, h)| (w, h, vec![Node::default(); w * h]))
            .collect();
        TagTree { levels, max_depth }
    }

    /// Builds an encoder-side tree from the known leaf values (raster order,
    /// `nx` per row), pre-computing every ancestor's min-of-children value.
    pub fn for_encode(nx: usize, ny: usize, leaf_values: &[u32]) -> Self {
        assert_eq!(leaf_values.len(), nx * ny, "leaf value grid size mismatch");
        let dims = level_dims(nx, ny);
        let max_depth = dims.len() - 1;

        let mut levels: Vec<(usize, usize, Vec<Node>)> = Vec::with_capacity(dims.len());
        let (leaf_w, leaf_h) = dims[max_depth];
        debug_assert_eq!((leaf_w, leaf_h), (nx.max(1), ny.max(1)));
        let leaf_nodes: Vec<Node> = leaf_values
            .iter()
            .map(|&v| Node { value: v, known: true, state: 0, signalled: false })
            .collect();

        let mut built: Vec<Vec<Node>> = vec![Vec::new(); dims.len()];
        built[max_depth] = leaf_nodes;
        for level in (0..max_depth).rev() {
            let (w, h) = dims[level];
            let (cw, _ch) = dims[level + 1];
            let mut nodes = Vec::with_capacity(w * h);
            for row in 0..h {
                for col in 0..w {
                    let mut min_val = u32::MAX;
                    for dy in 0..2 {
                        for dx in 0..2 {
                            let cr = row * 2 + dy;
                            let cc = col * 2 + dx;
                            if cr < dims[level + 1].1 && cc < cw {
                                let idx = cr * cw + cc;
                                min_val = min_val.min(built[level + 1][idx].value);
                            }
                        }
                    }
                    nodes.push(Node { value: min_val, known: true, state: 0, signalled: false });
                }
            }
            built[level] = nodes;
        }

        for (level, (w, h)) in dims.into_iter().enumerate() {
            levels.push((w, h, std::mem::take(&mut built[level])));
        }

        TagTree { levels, max_depth }
    }

    /// Resets per-leaf committed state (used when an encoder-side tree is
    /// reused across an entirely new precinct rather than across layers of
    /// the same one; layer-to-layer reuse must *not* call this).
    pub fn reset_encoding_state(&mut self) {
        for (_, _, nodes) in self.levels.iter_mut() {
            for node in nodes.iter_mut() {
                node.state = 0;
                node.signalled = false;
            }
        }
    }

    fn path(&self, x: usize, y: usize) -> Vec<(usize, usize, usize)> {
        (0..=self.max_depth)
            .map(|level| {
                let shift = self.max_depth - level;
                (level, x >> shift, y >> shift)
            })
            .collect()
    }

    /// Encodes the single-leaf decision at `(x, y)` for the given
    /// `threshold`, writing only the bits not already committed by an
    /// earlier (lower-threshold) call against the same leaf.
    pub fn encode(&mut self, x: usize, y: usize, threshold: u32, writer: &mut BitWriter) -> TagTreeResult {
        let path = self.path(x, y);
        let mut result = TagTreeResult::AtLeast(0);
        for (level, col, row) in path {
            let (width, _height, nodes) = &mut self.levels[level];
            let idx = row * *width + col;
            let node = &mut nodes[idx];
            debug_assert!(node.known, "encoder-side tag tree requires precomputed values");
            let value = node.value;

            if !node.signalled {
                let target = value.min(threshold);
                if node.state < target {
                    for _ in 0..(target - node.state) {
                        writer.write_bit(0);
                    }
                    node.state = target;
                }
                if value < threshold && node.state == value {
                    writer.write_bit(1);
                    node.signalled = true;
                }
            }

            if value < threshold {
                result = TagTreeResult::Known(value);
            } else {
                return TagTreeResult::AtLeast(node.state);
            }
        }
        result
    }

    /// Decodes the single-leaf decision at `(x, y)` for the given
    /// `threshold`.
    pub fn decode(
        &mut self,
        x: usize,
        y: usize,
        threshold: u32,
        reader: &mut BitReader,
    ) -> Result<TagTreeResult, CoreError> {
        let path = self.path(x, y);
        let mut result = TagTreeResult::AtLeast(0);
        for (level, col, row) in path {
            let (width, _height, nodes) = &mut self.levels[level];
            let idx = row * *width + col;
            let node = &mut nodes[idx];

            if !node.known {
                while node.state < threshold {
                    if reader.read_bit()? == 1 {
                        node.value = node.state;
                        node.known = true;
                        break;
                    }
                    node.state += 1;
                }
            }

            if node.known && node.value < threshold {
                result = TagTreeResult::Known(node.value);
            } else {
                return Ok(TagTreeResult::AtLeast(node.state));
            }
        }
        Ok(result)
    }

    /// Convenience for the zero-bit-plane tree: decodes with a threshold
    /// large enough that resolution is guaranteed, per `spec.md` §4.2's
    /// "decoded once on first inclusion with a sufficiently large threshold".
    pub fn decode_unconditional(&mut self, x: usize, y: usize, reader: &mut BitReader) -> Result<u32, CoreError> {
        match self.decode(x, y, u32::MAX >> 1, reader)? {
            TagTreeResult::Known(v) => Ok(v),
            TagTreeResult::AtLeast(_) => Err(CoreError::InvalidPacketHeader {
                tile: 0,
                component: 0,
                resolution: 0,
                reason: "zero-bit-plane tag tree failed to resolve",
            }),
        }
    }

    /// Mirrors [`decode_unconditional`] for the encoder, since the
    /// zero-bit-plane value is always signalled unconditionally.
    pub fn encode_unconditional(&mut self, x: usize, y: usize, writer: &mut BitWriter) {
        self.encode(x, y, u32::MAX >> 1, writer);
    }
}

/// Thin wrapper naming the inclusion tag tree's specific contract: the
/// value at a leaf is the layer index at which its code block is first
/// included in any packet.
#[derive(Debug, Clone)]
pub struct InclusionTagTree(TagTree);

impl InclusionTagTree {
    pub fn for_decode(nx: usize, ny: usize) -> Self {
        InclusionTagTree(TagTree::for_decode(nx, ny))
    }

    pub fn for_encode(nx: usize, ny: usize, first_inclusion_layer: &[u32]) -> Self {
        InclusionTagTree(TagTree::for_encode(nx, ny, first_inclusion_layer))
    }

    /// Encodes "is the block at `(x, y)` included in layer `layer`?".
    pub fn encode_inclusion(&mut self, x: usize, y: usize, layer: u32, writer: &mut BitWriter) -> bool {
        self.0.encode(x, y, layer + 1, writer).is_known_below(layer + 1)
    }

    /// Decodes "is the block at `(x, y)` included in layer `layer`?".
    pub fn decode_inclusion(
        &mut self,
        x: usize,
        y: usize,
        layer: u32,
        reader: &mut BitReader,
    ) -> Result<bool, CoreError> {
        Ok(self.0.decode(x, y, layer + 1, reader)?.is_known_below(layer + 1))
    }
}

/// Thin wrapper naming the zero-bit-plane tag tree's contract: the value at
/// a leaf is the number of all-zero most-significant bit planes skipped by
/// that code block.
#[derive(Debug, Clone)]
pub struct ZeroBitPlaneTagTree(TagTree);

impl ZeroBitPlaneTagTree {
    pub fn for_decode(nx: usize, ny: usize) -> Self {
        ZeroBitPlaneTagTree(TagTree::for_decode(nx, ny))
    }

    pub fn for_encode(nx: usize, ny: usize, zero_bit_planes: &[u32]) -> Self {
        ZeroBitPlaneTagTree(TagTree::for_encode(nx, ny, zero_bit_planes))
    }

    pub fn encode(&mut self, x: usize, y: usize, writer: &mut BitWriter) {
        self.0.encode_unconditional(x, y, writer)
    }

    pub fn decode(&mut self, x: usize, y: usize, reader: &mut BitReader) -> Result<u32, CoreError> {
        self.0.decode_unconditional(x, y, reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf_tree_short_circuits() {
        let mut enc = TagTree::for_encode(1, 1, &[3]);
        let mut w = BitWriter::new();
        enc.encode_unconditional(0, 0, &mut w);
        w.flush();
        let bytes = w.into_bytes();

        let mut dec = TagTree::for_decode(1, 1);
        let mut r = BitReader::new(&bytes);
        assert_eq!(dec.decode_unconditional(0, 0, &mut r).unwrap(), 3);
    }

    #[test]
    fn round_trips_grid_of_values() {
        let values = vec![0u32, 2, 5, 1];
        let mut enc = TagTree::for_encode(2, 2, &values);
        let mut w = BitWriter::new();
        for y in 0..2 {
            for x in 0..2 {
                enc.encode_unconditional(x, y, &mut w);
            }
        }
        w.flush();
        let bytes = w.into_bytes();

        let mut dec = TagTree::for_decode(2, 2);
        let mut r = BitReader::new(&bytes);
        let mut decoded = Vec::new();
        for y in 0..2 {
            for x in 0..2 {
                decoded.push(dec.decode_unconditional(x, y, &mut r).unwrap());
            }
        }
        assert_eq!(decoded, values);
    }

    #[test]
    fn inclusion_tree_tracks_first_inclusion_layer() {
        // block 0 included from layer 0, block 1 from layer 2.
        let layers = vec![0u32, 2];
        let mut enc = InclusionTagTree::for_encode(2, 1, &layers);
        let mut w = BitWriter::new();
        for layer in 0..3u32 {
            for x in 0..2usize {
                enc.encode_inclusion(x, 0, layer, &mut w);
            }
        }
        w.flush();
        let bytes = w.into_bytes();

        let mut dec = InclusionTagTree::for_decode(2, 1);
        let mut r = BitReader::new(&bytes);
        let mut seen = vec![false, false];
        for layer in 0..3u32 {
            for x in 0..2usize {
                let included = dec.decode_inclusion(x, 0, layer, &mut r).unwrap();
                if included {
                    seen[x] = true;
                }
                assert_eq!(included, layer >= layers[x]);
            }
        }
        assert!(seen[0] && seen[1]);
    }

    #[test]
    fn zero_bit_plane_tree_single_shot() {
        let zbp = vec![4u32, 0, 7, 2];
        let mut enc = ZeroBitPlaneTagTree::for_encode(2, 2, &zbp);
        let mut w = BitWriter::new();
        for y in 0..2 {
            for x in 0..2 {
                enc.encode(x, y, &mut w);
            }
        }
        w.flush();
        let bytes = w.into_bytes();

        let mut dec = ZeroBitPlaneTagTree::for_decode(2, 2);
        let mut r = BitReader::new(&bytes);
        let mut decoded = Vec::new();
        for y in 0..2 {
            for x in 0..2 {
                decoded.push(dec.decode(x, y, &mut r).unwrap());
            }
        }
        assert_eq!(decoded, zbp);
    }

    #[test]
    fn state_is_monotone_across_layers() {
        let layers = vec![3u32];
        let mut enc = InclusionTagTree::for_encode(1, 1, &layers);
        let mut w = BitWriter::new();
        let mut included_flags = Vec::new();
        for layer in 0..5u32 {
            included_flags.push(enc.encode_inclusion(0, 0, layer, &mut w));
        }
        w.flush();
        assert_eq!(included_flags, vec![false, false, false, true, true]);
    }
}
