//! Polyphase decimator (C2, §4.2).
//!
//! Implements the filter-then-downsample form of a polyphase decimator: a
//! Kaiser-windowed low-pass FIR followed by keep-every-`os`-th-sample. The
//! two are mathematically equivalent to computing only the phases actually
//! needed; this crate favors the simpler direct form since decimation only
//! runs during preamble search (§4.3), never in the steady-state symbol
//! loop.
//!
//! The FIR is applied causally (`y[i] = Σ_k h[k]·x[center-k]`, zero-padded
//! on the left), the same convention `scipy.signal.lfilter` uses, so the
//! filter delays its output by its group delay, `L/2` taps — not a centered
//! (zero-delay) convolution. [`group_delay`] reports exactly that delay, and
//! `preamble::detect_preamble_os` subtracts it from the decimated-domain hit
//! to recover the true raw-sample arrival time (§4.3's `start_raw =
//! i₀·os + phase − L/2`).

use rustfft::num_complex::Complex32;

use crate::error::LoRaError;
use crate::types::Oversampling;

fn kaiser_beta(attenuation_db: f32) -> f32 {
    if attenuation_db > 50.0 {
        0.1102 * (attenuation_db - 8.7)
    } else if attenuation_db >= 21.0 {
        0.5842 * (attenuation_db - 21.0).powf(0.4) + 0.07886 * (attenuation_db - 21.0)
    } else {
        0.0
    }
}

/// Modified Bessel function of the first kind, order 0, via its power
/// series — the standard building block of a Kaiser window.
fn bessel_i0(x: f32) -> f32 {
    let mut sum = 1.0f32;
    let mut term = 1.0f32;
    let half_x = x / 2.0;
    for k in 1..=24 {
        term *= (half_x / k as f32).powi(2);
        sum += term;
    }
    sum
}

fn sinc(x: f32) -> f32 {
    if x.abs() < 1e-7 {
        1.0
    } else {
        (std::f32::consts::PI * x).sin() / (std::f32::consts::PI * x)
    }
}

/// Number of taps for a given oversampling factor: `max(32*os, 8*os)`.
pub fn taps_len(os: Oversampling) -> usize {
    let m = os.factor();
    (32 * m).max(8 * m)
}

/// Group delay in raw samples introduced by the low-pass filter at this
/// oversampling factor; `0` when `os == 1` (no filtering is applied).
pub fn group_delay(os: Oversampling) -> usize {
    if os == Oversampling::X1 {
        0
    } else {
        taps_len(os) / 2
    }
}

fn kaiser_lowpass_taps(os: Oversampling, attenuation_db: f32) -> Vec<f32> {
    let l = taps_len(os);
    let fc = 0.45 / os.factor() as f32;
    let beta = kaiser_beta(attenuation_db);
    let m = (l - 1) as f32 / 2.0;
    let denom = bessel_i0(beta);
    (0..l)
        .map(|n| {
            let centered = n as f32 - m;
            let ideal = 2.0 * fc * sinc(2.0 * fc * centered);
            let ratio = if m > 0.0 { centered / m } else { 0.0 };
            let window = bessel_i0(beta * (1.0 - ratio * ratio).max(0.0).sqrt()) / denom;
            ideal * window
        })
        .collect()
}

/// Decimate `x` by `os`, starting at `phase` samples into the input.
/// `|y| = floor((|x| - phase) / os)`.
pub fn decimate(
    x: &[Complex32],
    os: Oversampling,
    phase: usize,
    attenuation_db: f32,
) -> Result<Vec<Complex32>, LoRaError> {
    if phase >= os.factor() && os != Oversampling::X1 {
        return Err(LoRaError::InvalidConfig(format!(
            "phase {phase} must be in [0, {})",
            os.factor()
        )));
    }

    if os == Oversampling::X1 {
        let start = phase.min(x.len());
        return Ok(x[start..].to_vec());
    }

    let taps = kaiser_lowpass_taps(os, attenuation_db);
    let m = os.factor();
    if phase >= x.len() {
        return Ok(Vec::new());
    }
    let usable = (x.len() - phase) / m;
    let mut y = Vec::with_capacity(usable);
    for out_idx in 0..usable {
        let center = (phase + out_idx * m) as isize;
        let mut acc = Complex32::new(0.0, 0.0);
        for (k, &h) in taps.iter().enumerate() {
            let src = center - k as isize;
            if src >= 0 && (src as usize) < x.len() {
                acc += x[src as usize] * h;
            }
        }
        y.push(acc);
    }
    Ok(y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os1_skips_phase_samples_unchanged() {
        let x: Vec<Complex32> = (0..10).map(|i| Complex32::new(i as f32, 0.0)).collect();
        let y = decimate(&x, Oversampling::X1, 3, 60.0).unwrap();
        assert_eq!(y.len(), 7);
        assert_eq!(y[0], Complex32::new(3.0, 0.0));
    }

    #[test]
    fn output_length_matches_formula() {
        let x: Vec<Complex32> = vec![Complex32::new(0.0, 0.0); 1000];
        for os in [Oversampling::X2, Oversampling::X4, Oversampling::X8] {
            for phase in 0..os.factor() {
                let y = decimate(&x, os, phase, 60.0).unwrap();
                assert_eq!(y.len(), (x.len() - phase) / os.factor());
            }
        }
    }

    #[test]
    fn rejects_out_of_range_phase() {
        let x = vec![Complex32::new(0.0, 0.0); 100];
        assert!(decimate(&x, Oversampling::X4, 4, 60.0).is_err());
    }

    #[test]
    fn passes_dc_with_near_unity_gain() {
        let x: Vec<Complex32> = vec![Complex32::new(1.0, 0.0); 2000];
        let y = decimate(&x, Oversampling::X4, 0, 60.0).unwrap();
        let steady = &y[y.len() / 2..];
        let avg: f32 = steady.iter().map(|c| c.re).sum::<f32>() / steady.len() as f32;
        assert!((avg - 1.0).abs() < 0.05, "avg={avg}");
    }
}
