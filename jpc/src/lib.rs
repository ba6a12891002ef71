//! JPEG 2000 Part 1 Tier-2 packet layer, Tier-1 interface, and DWT core.
//!
//! The codestream marker parser, JP2 container framing, colour transforms and
//! CLI are external collaborators and out of scope here (see `spec.md` §1);
//! this crate consumes already-parsed coding parameters (`SizParams`,
//! `CodParams`, `QcdParams`, `RgnParams`) and produces/consumes packet bytes.

pub mod bit_io;
pub mod dwt;
pub mod geometry;
pub mod packet;
pub mod quant;
pub mod tag_tree;
pub mod tier2;

use std::error;
use std::fmt;

pub use geometry::Band;

/// Errors raised by grammar violations in the packet/tier-2 layer. Truncated
/// input is *not* represented here — `spec.md` §7 requires the decoder to
/// degrade gracefully on truncation, so that case is carried in
/// [`packet::PacketOutcome`] instead.
#[derive(Debug)]
pub enum CoreError {
    InvalidPacketHeader { tile: u32, component: u32, resolution: u32, reason: &'static str },
    TruncatedPacket { tile: u32, component: u32, resolution: u32, precinct: u32, available: usize, required: usize },
    InconsistentQuantization { component: u32, reason: &'static str },
    UnsupportedProgression { tile: u32 },
    UnsupportedTransformation { tile: u32, component: u32 },
    EndOfStream { offset: usize },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidPacketHeader { tile, component, resolution, reason } => write!(
                f,
                "invalid packet header (tile {}, component {}, resolution {}): {}",
                tile, component, resolution, reason
            ),
            CoreError::TruncatedPacket { tile, component, resolution, precinct, available, required } => write!(
                f,
                "truncated packet (tile {}, component {}, resolution {}, precinct {}): {} of {} bytes available",
                tile, component, resolution, precinct, available, required
            ),
            CoreError::InconsistentQuantization { component, reason } => {
                write!(f, "inconsistent quantization (component {}): {}", component, reason)
            }
            CoreError::UnsupportedProgression { tile } => {
                write!(f, "unsupported progression order (tile {})", tile)
            }
            CoreError::UnsupportedTransformation { tile, component } => write!(
                f,
                "unsupported transformation (tile {}, component {})",
                tile, component
            ),
            CoreError::EndOfStream { offset } => write!(f, "end of stream at byte offset {}", offset),
        }
    }
}

impl error::Error for CoreError {}

/// Per-component SIZ fields, standing in for the marker parser's parsed
/// Image and Tile Size segment (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentParams {
    pub dx: u8,
    pub dy: u8,
    pub signed: bool,
    pub bit_depth: u8,
}

/// Tile-component canvas geometry plus the component list, standing in for
/// the parsed SIZ segment.
#[derive(Debug, Clone)]
pub struct SizParams {
    pub tile_x0: u32,
    pub tile_y0: u32,
    pub tile_x1: u32,
    pub tile_y1: u32,
    pub components: Vec<ComponentParams>,
}

/// Packet progression order (Table A.16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionOrder {
    Lrcp,
    Rlcp,
    Rpcl,
    Pcrl,
    Cprl,
}

/// Code-block style flags (Table A.19).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodBlockStyle {
    pub bypass: bool,
    pub reset: bool,
    pub termall: bool,
    pub restart: bool,
    pub vsc: bool,
    pub segmark: bool,
}

/// Wavelet transformation kind for a tile-component (Table A.20).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformation {
    Reversible53,
    Irreversible97,
}

/// Coding style parameters, standing in for the parsed COD/COC segment.
#[derive(Debug, Clone)]
pub struct CodParams {
    pub progression: ProgressionOrder,
    pub num_layers: u16,
    pub num_levels: u8,
    pub cb_width: u32,
    pub cb_height: u32,
    pub cb_style: CodBlockStyle,
    pub transformation: Transformation,
    /// `(PPx, PPy)` precinct size exponents per resolution, resolution 0 first.
    pub precincts: Vec<(u8, u8)>,
}

impl CodParams {
    pub fn num_resolutions(&self) -> u32 {
        self.num_levels as u32 + 1
    }
}

/// Quantization style (Table A.28).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizationStyle {
    None,
    ScalarDerived,
    ScalarExpounded,
}

/// Quantization parameters, standing in for the parsed QCD/QCC segment.
#[derive(Debug, Clone)]
pub struct QcdParams {
    pub style: QuantizationStyle,
    pub guard_bits: u8,
    /// Per-subband exponent, ordered as the marker segment orders them:
    /// for `None`/`ScalarExpounded` one entry per subband; for
    /// `ScalarDerived` a single entry (NL LL only).
    pub exponents: Vec<u8>,
    /// Per-subband mantissa; empty for `QuantizationStyle::None`.
    pub mantissas: Vec<u16>,
}

/// Region-of-interest style (Table A.32).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgnStyle {
    MaxShift,
    GeneralScaling,
}

/// A precomputed boolean mask selecting the coefficients inside the region
/// of interest, in subband-local coordinates.
#[derive(Debug, Clone)]
pub struct RoiMask {
    pub width: u32,
    pub height: u32,
    pub inside: Vec<bool>,
}

/// Region-of-interest parameters, standing in for the parsed RGN segment.
#[derive(Debug, Clone)]
pub struct RgnParams {
    pub component: usize,
    pub style: RgnStyle,
    pub shift: u8,
    pub mask: Option<RoiMask>,
}

/// Result of a Tier-1 `encode` call: the coded byte stream, the cumulative
/// byte length after each coding pass (used to locate layer boundaries for
/// layered inclusion), and the number of skipped all-zero bit planes.
#[derive(Debug, Clone, Default)]
pub struct EncodedBlock {
    pub data: Vec<u8>,
    pub pass_lengths: Vec<usize>,
    pub zero_bit_planes: u8,
}

/// The seam to the Tier-1 entropy coder (Annex C/D). `jpc` only depends on
/// this trait; a concrete implementation (e.g. `jpc-mq`) is supplied by the
/// caller or, for this crate's own tests, by a dev-dependency.
pub trait BlockCoder {
    /// Selects the subband orientation, which determines the context
    /// assignment used by significance propagation (Annex D.3).
    fn set_band(&mut self, band: Band);

    /// Decodes a single-layer, single-segment code block.
    fn decode(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        max_passes: u32,
        max_bitplane: i32,
        roi_shift: u8,
    ) -> Vec<i32>;

    /// Decodes a code block whose coding passes were contributed across
    /// multiple layers, each extending the decodable prefix up to
    /// `cumulative_pass_lengths[layer]` bytes.
    fn decode_layered(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        cumulative_pass_lengths: &[usize],
        max_bitplane: i32,
        roi_shift: u8,
        use_termall: bool,
        reset_per_pass: bool,
    ) -> Vec<i32>;

    /// Encodes a code block's coefficients, returning the coded bytes and
    /// per-pass cumulative byte lengths.
    fn encode(
        &mut self,
        coefficients: &[i32],
        width: u32,
        height: u32,
        max_bitplane: i32,
        style: CodBlockStyle,
    ) -> EncodedBlock;
}
