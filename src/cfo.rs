//! CFO / STO estimator (C4, §4.4).
//!
//! Fractional CFO comes from the phase slope across the preamble's repeated
//! upchirps; integer CFO comes from the bin drift the SFD downchirps exhibit
//! once the fractional term is removed; the residual sample-timing offset
//! comes from a correlation-max shift search against the reference upchirp.

use rustfft::num_complex::Complex32;

use crate::chirp::Workspace;
use crate::demod::apply_cfo;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfoStoEstimate {
    /// Fractional CFO in bins, `eps ∈ (-0.5, 0.5]`.
    pub frac_cfo: f32,
    /// Integer CFO in bins.
    pub int_cfo: i32,
    /// Residual sample timing offset, in samples.
    pub sto: i32,
}

/// Estimate fractional CFO from the phase advance between consecutive
/// preamble symbols: each reference upchirp's dechirped FFT bin carries a
/// constant phase rotation per symbol of `2π·eps`. `syms` must be at least
/// two consecutive `N`-sample preamble blocks.
fn estimate_frac_cfo(ws: &mut Workspace, syms: &[&[Complex32]]) -> f32 {
    let n = ws.n();
    let mut angle_sum = 0.0f32;
    let mut count = 0usize;
    let mut prev_bin_phasor: Option<Complex32> = None;

    for block in syms {
        debug_assert_eq!(block.len(), n);
        let mut buf: Vec<Complex32> = block.to_vec();
        for i in 0..n {
            buf[i] *= ws.downchirp()[i];
        }
        ws.fft(&mut buf);
        let bin = argmax(&buf);
        let phasor = buf[bin];
        if let Some(prev) = prev_bin_phasor {
            let delta = phasor * prev.conj();
            angle_sum += delta.arg();
            count += 1;
        }
        prev_bin_phasor = Some(phasor);
    }

    if count == 0 {
        return 0.0;
    }
    let mean_angle = angle_sum / count as f32;
    (mean_angle / (2.0 * std::f32::consts::PI)).clamp(-0.5, 0.5)
}

fn argmax(spectrum: &[Complex32]) -> usize {
    let mut best_bin = 0usize;
    let mut best_mag = -1.0f32;
    for (k, c) in spectrum.iter().enumerate() {
        let mag = c.norm_sqr();
        if mag > best_mag {
            best_mag = mag;
            best_bin = k;
        }
    }
    best_bin
}

/// Estimate integer CFO (in whole bins) from the two SFD downchirp symbols,
/// which should demodulate to bin `0` once fractional CFO and timing are
/// both correct. `down_syms` must each be `N` samples, already
/// downchirp-aligned at the presumed SFD start.
fn estimate_int_cfo(ws: &mut Workspace, down_syms: &[&[Complex32]], frac_cfo: f32) -> i32 {
    let n = ws.n() as i32;
    let mut bins = Vec::with_capacity(down_syms.len());
    for block in down_syms {
        let mut buf: Vec<Complex32> = block.to_vec();
        apply_cfo(&mut buf, frac_cfo);
        let bin = demod_with_upchirp_mixer(ws, &buf);
        bins.push(bin as i32);
    }
    let bin = bins[0];
    let n_half = n / 2;
    if bin > n_half {
        bin - n
    } else {
        bin
    }
}

/// Search `window` for the integer-sample shift `s ∈ [-margin, margin]`
/// (`margin <= N/8`) maximising `|Σ_n window[margin+s+n]·conj(u[n])|`
/// against the reference upchirp (§4.4). `window` must be `N + 2·margin`
/// samples, with shift `0` aligned to `window[margin..margin+N]`.
fn estimate_sto(ws: &Workspace, window: &[Complex32]) -> i32 {
    let n = ws.n();
    if window.len() < n {
        return 0;
    }
    let margin = ((window.len() - n) / 2) as i32;
    let upchirp = ws.upchirp();
    let mut best_shift = 0i32;
    let mut best_mag = -1.0f32;
    for s in -margin..=margin {
        let start = (margin + s) as usize;
        if start + n > window.len() {
            continue;
        }
        let mut acc = Complex32::new(0.0, 0.0);
        for k in 0..n {
            acc += window[start + k] * upchirp[k].conj();
        }
        let mag = acc.norm();
        if mag > best_mag {
            best_mag = mag;
            best_shift = s;
        }
    }
    best_shift
}

/// SFD symbols are downchirps; demodulating them against the *upchirp*
/// mixer (rather than the usual downchirp mixer) folds their residual bin
/// back through the same dechirp/FFT/argmax pipeline `demod` uses.
fn demod_with_upchirp_mixer(ws: &mut Workspace, block: &[Complex32]) -> u32 {
    let n = ws.n();
    let mut buf = vec![Complex32::new(0.0, 0.0); n];
    for i in 0..n {
        buf[i] = block[i] * ws.upchirp()[i];
    }
    ws.fft(&mut buf);
    let bin = argmax(&buf);
    bin as u32
}

/// Full CFO/STO estimate from a located preamble (`up_syms`, consecutive
/// reference upchirps), the SFD (`down_syms`, the two trailing downchirps),
/// and `sto_window` (a margin-padded span around one reference upchirp, for
/// the correlation-max shift search), per §4.4.
pub fn estimate(
    ws: &mut Workspace,
    up_syms: &[&[Complex32]],
    down_syms: &[&[Complex32]],
    sto_window: &[Complex32],
) -> CfoStoEstimate {
    let frac_cfo = estimate_frac_cfo(ws, up_syms);
    let int_cfo = estimate_int_cfo(ws, down_syms, frac_cfo);
    let sto = estimate_sto(ws, sto_window);
    CfoStoEstimate {
        frac_cfo,
        int_cfo,
        sto,
    }
}

/// Apply a combined fractional+integer CFO correction to `x` in place
/// (§4.4 compensation convention: total `eps = frac + int_cfo` bins).
pub fn compensate(x: &mut [Complex32], n: usize, est: &CfoStoEstimate) {
    let total_eps = est.frac_cfo + est.int_cfo as f32;
    apply_cfo(x, total_eps / n as f32);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upchirp_with_cfo(ws: &Workspace, eps_bins: f32) -> Vec<Complex32> {
        let n = ws.n();
        let mut block = ws.upchirp().to_vec();
        let eps = eps_bins / n as f32;
        for (i, s) in block.iter_mut().enumerate() {
            let phase = 2.0 * std::f32::consts::PI * eps * i as f32;
            *s *= Complex32::new(phase.cos(), phase.sin());
        }
        block
    }

    #[test]
    fn recovers_small_fractional_cfo() {
        let mut ws = Workspace::new(7);
        let eps = 0.15f32;
        let s1 = upchirp_with_cfo(&ws, eps);
        let s2 = upchirp_with_cfo(&ws, eps);
        let got = estimate_frac_cfo(&mut ws, &[&s1, &s2]);
        assert!((got - eps).abs() < 0.02, "got={got}");
    }

    #[test]
    fn zero_cfo_estimates_near_zero() {
        let mut ws = Workspace::new(7);
        let s1 = ws.upchirp().to_vec();
        let s2 = ws.upchirp().to_vec();
        let got = estimate_frac_cfo(&mut ws, &[&s1, &s2]);
        assert!(got.abs() < 1e-3, "got={got}");
    }

    #[test]
    fn sfd_downchirp_demodulates_to_bin_zero_with_no_cfo() {
        let mut ws = Workspace::new(7);
        let down = ws.downchirp().to_vec();
        let bin = demod_with_upchirp_mixer(&mut ws, &down);
        assert_eq!(bin, 0);
    }

    #[test]
    fn sto_search_recovers_a_known_shift() {
        let ws = Workspace::new(7);
        let n = ws.n();
        let margin = n / 8;
        for true_shift in [-5i32, 0, 7] {
            let mut window = vec![Complex32::new(0.0, 0.0); n + 2 * margin];
            let start = (margin as i32 + true_shift) as usize;
            window[start..start + n].copy_from_slice(ws.upchirp());
            let got = estimate_sto(&ws, &window);
            assert_eq!(got, true_shift, "true_shift={true_shift}");
        }
    }

    #[test]
    fn sto_search_degenerates_to_zero_with_no_margin() {
        let ws = Workspace::new(7);
        // Exactly N samples, no margin: only shift 0 is searchable.
        let window = ws.upchirp().to_vec();
        assert_eq!(estimate_sto(&ws, &window), 0);
    }
}
