//! DSP helpers the WV saver calls to synthesise `LEVEL OFFS` fields that are absent
//! from a waveform's metadata.
//!
//! The reference implementation runs these through `numpy.float16` before taking a
//! logarithm, and the byte-exactness of `LEVEL OFFS` depends on reproducing that
//! reduced-precision pipeline, not just the final rounding. Each helper here narrows
//! its input/output to [`half::f16`] at the same points the reference narrows to
//! `float16`.

use half::f16;
use num_complex::Complex64;

/// 16-bit quantisation headroom: `1 - 2⁻¹⁵`, rounded to `f16` once and reused as the
/// default `normalize()` reference.
pub fn default_normalize_reference() -> f64 {
    f64::from(f16::from_f64(1.0 - 2f64.powi(-15)))
}

/// Converts a linear amplitude value to decibels, narrowing to `f16` first to match
/// the reference implementation's `convert_to_db`.
pub fn convert_to_db(value: f64) -> f64 {
    let narrowed = f16::from_f64(value);
    f64::from(f16::from_f64(20.0 * f64::from(narrowed).log10()))
}

/// Peak amplitude of `samples`, in dB.
pub fn peak_db(samples: &[Complex64]) -> f64 {
    let max = samples.iter().map(Complex64::norm).fold(0.0, f64::max);
    convert_to_db(f64::from(f16::from_f64(max)))
}

/// RMS amplitude of `samples`, in dB.
pub fn rms_db(samples: &[Complex64]) -> f64 {
    if samples.is_empty() {
        return convert_to_db(0.0);
    }
    let mean_sq_mag =
        samples.iter().map(|s| (s * s.conj()).re).sum::<f64>() / samples.len() as f64;
    convert_to_db(mean_sq_mag.sqrt())
}

/// Peak-to-average ratio of `samples`, in dB.
pub fn par_db(samples: &[Complex64]) -> f64 {
    peak_db(samples) - rms_db(samples)
}

/// Scales `samples` so that `max|x| == reference`, defaulting `reference` to
/// [`default_normalize_reference`]. Leaves an all-zero buffer unchanged.
pub fn normalize(samples: &[Complex64], reference: Option<f64>) -> Vec<Complex64> {
    let reference = reference.unwrap_or_else(default_normalize_reference);
    let max = samples.iter().map(Complex64::norm).fold(0.0, f64::max);
    if max == 0.0 {
        return samples.to_vec();
    }
    let factor = reference / max;
    samples.iter().map(|s| s * factor).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_to_db_matches_the_spec_example() {
        assert_eq!(convert_to_db(10.0), 20.0);
    }

    #[test]
    fn normalize_reaches_the_default_reference() {
        let samples: Vec<Complex64> = (0..16).map(|i| Complex64::new(i as f64, 0.0)).collect();
        let normalized = normalize(&samples, None);
        let max = normalized.iter().map(Complex64::norm).fold(0.0, f64::max);
        assert_eq!(max, default_normalize_reference());
    }

    #[test]
    fn normalize_leaves_silence_untouched() {
        let samples = vec![Complex64::new(0.0, 0.0); 4];
        assert_eq!(normalize(&samples, None), samples);
    }
}
