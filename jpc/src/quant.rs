//! Quantization step-size derivation from a QCD-style segment (Annex E.1),
//! grounded on the formula and LL/HL/LH/HH gain table used by
//! `other_examples/944e3b61_Abhi9024-MyImageCompressor__RUST-src-codec-jpeg2000.rs`:
//! `Δ_b = 2^(Rb − expn_b) · (1 + mant_b / 2048)`.

use crate::geometry::Band;
use crate::{CoreError, QcdParams, QuantizationStyle};

/// Per-subband gain exponent (`spec.md` §4.6): LL and LH/HL carry the
/// biorthogonal 9/7 analysis gain of zero; HH carries two bits of gain.
pub fn gain_bits(band: Band) -> u8 {
    match band {
        Band::Ll | Band::Hl | Band::Lh => 0,
        Band::Hh => 2,
    }
}

/// Nominal dynamic range `Rb` of a subband: the component's bit depth plus
/// the subband's gain (Annex E.1, Eq. E-4 simplified for 2D dyadic
/// decomposition).
pub fn nominal_dynamic_range(bit_depth: u8, band: Band) -> u8 {
    bit_depth + gain_bits(band)
}

/// Linear index of subband `(resolution, band)` into the ordering used by
/// QCD/QCC segments: resolution 0's LL first, then for each resolution
/// `r = 1..=num_levels`, `HL_r, LH_r, HH_r` in that order.
pub fn subband_index(resolution: u8, band: Band, num_levels: u8) -> usize {
    if resolution == 0 {
        debug_assert_eq!(band, Band::Ll);
        return 0;
    }
    1 + 3 * (resolution as usize - 1)
        + match band {
            Band::Hl => 0,
            Band::Lh => 1,
            Band::Hh => 2,
            Band::Ll => unreachable!("LL subband only exists at resolution 0"),
        }
}

/// Total subband count for a `num_levels`-level decomposition.
pub fn subband_count(num_levels: u8) -> usize {
    1 + 3 * num_levels as usize
}

/// The `(exponent, mantissa)` pair governing subband `(resolution, band)`,
/// accounting for the three QCD styles (Annex E.1):
/// - `None`: every subband carries its own exponent, no mantissa.
/// - `ScalarExpounded`: every subband carries its own `(exponent, mantissa)`.
/// - `ScalarDerived`: only the NLLL subband's `(exponent, mantissa)` is
///   transmitted; every other subband's exponent is derived by subtracting
///   the number of decomposition levels between it and the LL band (Eq. E-5).
pub fn derive_subband_params(
    qcd: &QcdParams,
    resolution: u8,
    band: Band,
    num_levels: u8,
) -> Result<(u8, u16), CoreError> {
    let idx = subband_index(resolution, band, num_levels);
    match qcd.style {
        QuantizationStyle::None => {
            let exp = *qcd.exponents.get(idx).ok_or(CoreError::InconsistentQuantization {
                component: 0,
                reason: "QCD exponent list shorter than subband count",
            })?;
            Ok((exp, 0))
        }
        QuantizationStyle::ScalarExpounded => {
            let exp = *qcd.exponents.get(idx).ok_or(CoreError::InconsistentQuantization {
                component: 0,
                reason: "QCD exponent list shorter than subband count",
            })?;
            let mant = *qcd.mantissas.get(idx).ok_or(CoreError::InconsistentQuantization {
                component: 0,
                reason: "QCD mantissa list shorter than subband count",
            })?;
            Ok((exp, mant))
        }
        QuantizationStyle::ScalarDerived => {
            let base_exp = *qcd.exponents.first().ok_or(CoreError::InconsistentQuantization {
                component: 0,
                reason: "derived QCD requires exactly one exponent entry",
            })?;
            let base_mant = *qcd.mantissas.first().ok_or(CoreError::InconsistentQuantization {
                component: 0,
                reason: "derived QCD requires exactly one mantissa entry",
            })?;
            let levels_below = num_levels - resolution.min(num_levels);
            let exp = base_exp.saturating_sub(levels_below);
            Ok((exp, base_mant))
        }
    }
}

/// The quantization step size Δ_b for a subband, given its component bit
/// depth.
pub fn step_size(style: QuantizationStyle, bit_depth: u8, band: Band, exponent: u8, mantissa: u16) -> f64 {
    match style {
        QuantizationStyle::None => 1.0,
        QuantizationStyle::ScalarDerived | QuantizationStyle::ScalarExpounded => {
            let rb = nominal_dynamic_range(bit_depth, band) as i32;
            let shift = rb - exponent as i32;
            2f64.powi(shift) * (1.0 + mantissa as f64 / 2048.0)
        }
    }
}

/// Maximum magnitude bit plane index `Kmax` a code block in this subband
/// may need to code, the budget `guard_bits` adds on top of the number of
/// exponent-implied magnitude bits (Annex E.1, Eq. E-2).
pub fn max_bitplane(style: QuantizationStyle, guard_bits: u8, bit_depth: u8, band: Band, exponent: u8) -> i32 {
    let magnitude_bits = match style {
        QuantizationStyle::None => nominal_dynamic_range(bit_depth, band) as i32,
        QuantizationStyle::ScalarDerived | QuantizationStyle::ScalarExpounded => exponent as i32,
    };
    guard_bits as i32 + magnitude_bits - 1
}

/// Quantizes a real-valued (9/7) coefficient to an integer index, per Annex
/// E.1, Eq. E-3 (midpoint / sign-magnitude quantizer with no dead-zone
/// offset beyond the standard's implicit half-step truncation).
pub fn quantize(coefficient: f64, step: f64) -> i32 {
    if step <= 0.0 {
        return coefficient.round() as i32;
    }
    let magnitude = (coefficient.abs() / step).floor();
    let signed = if coefficient < 0.0 { -magnitude } else { magnitude };
    signed as i32
}

/// Dequantizes an integer coefficient index back to a real value, using the
/// standard's reconstruction rule of placing the value at the bin's
/// midpoint.
pub fn dequantize(index: i32, step: f64) -> f64 {
    if index == 0 {
        return 0.0;
    }
    let magnitude = (index.unsigned_abs() as f64 + 0.5) * step;
    if index < 0 {
        -magnitude
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QcdParams;

    #[test]
    fn subband_index_matches_expected_ordering() {
        assert_eq!(subband_index(0, Band::Ll, 2), 0);
        assert_eq!(subband_index(1, Band::Hl, 2), 1);
        assert_eq!(subband_index(1, Band::Lh, 2), 2);
        assert_eq!(subband_index(1, Band::Hh, 2), 3);
        assert_eq!(subband_index(2, Band::Hl, 2), 4);
        assert_eq!(subband_count(2), 7);
    }

    #[test]
    fn none_style_step_size_is_unity() {
        let s = step_size(QuantizationStyle::None, 8, Band::Hl, 5, 0);
        assert_eq!(s, 1.0);
    }

    #[test]
    fn derived_style_reuses_mantissa_and_shifts_exponent() {
        let qcd = QcdParams {
            style: QuantizationStyle::ScalarDerived,
            guard_bits: 2,
            exponents: vec![10],
            mantissas: vec![300],
        };
        let (exp_r2, mant_r2) = derive_subband_params(&qcd, 2, Band::Ll, 2).unwrap();
        assert_eq!((exp_r2, mant_r2), (10, 300));
        let (exp_r0, mant_r0) = derive_subband_params(&qcd, 0, Band::Ll, 2).unwrap();
        assert_eq!((exp_r0, mant_r0), (8, 300));
    }

    #[test]
    fn quantize_dequantize_round_trip_within_one_step() {
        let step = 2.5;
        for raw in [-10.3f64, -0.1, 0.0, 3.7, 40.0] {
            let q = quantize(raw, step);
            let back = dequantize(q, step);
            assert!((back - raw).abs() <= step + 1e-9);
        }
    }

    #[test]
    fn inconsistent_quantization_reports_error() {
        let qcd = QcdParams { style: QuantizationStyle::None, guard_bits: 2, exponents: vec![5], mantissas: vec![] };
        let result = derive_subband_params(&qcd, 1, Band::Hl, 2);
        assert!(result.is_err());
    }
}
