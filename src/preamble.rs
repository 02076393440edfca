//! Preamble / SFD detector (C3, §4.3).

use rustfft::num_complex::Complex32;

use crate::chirp::Workspace;
use crate::decimate::{decimate, group_delay};
use crate::types::{Oversampling, PreambleDetection};

fn correlate_upchirp(x: &[Complex32], upchirp: &[Complex32], i: usize) -> Complex32 {
    let n = upchirp.len();
    let mut acc = Complex32::new(0.0, 0.0);
    for k in 0..n {
        acc += x[i + k] * upchirp[k].conj();
    }
    acc
}

/// Result of scanning one `(os, phase)` candidate for a run of `min_syms`
/// reference upchirps.
struct CandidateScan {
    /// Sample index (in the decimated stream) where the genuine run starts,
    /// when one was found.
    run_start: Option<usize>,
}

fn scan_candidate(decimated: &[Complex32], upchirp: &[Complex32], min_syms: usize) -> CandidateScan {
    let n = upchirp.len();
    if decimated.len() < n {
        return CandidateScan { run_start: None };
    }
    let last_i = decimated.len() - n;
    let mags: Vec<f32> = (0..=last_i)
        .map(|i| correlate_upchirp(decimated, upchirp, i).norm())
        .collect();
    let m = mags.iter().cloned().fold(0.0f32, f32::max);
    if m <= 0.0 {
        return CandidateScan { run_start: None };
    }
    let tau = 0.4 * m;

    for (i0, &_) in mags.iter().enumerate() {
        if i0 + (min_syms - 1) * n > last_i {
            break;
        }
        let run_ok = (0..min_syms).all(|k| mags[i0 + k * n] >= tau);
        if run_ok {
            return CandidateScan { run_start: Some(i0) };
        }
    }
    CandidateScan { run_start: None }
}

/// Try each OS candidate in order, and each phase in `[0, os)`, returning
/// the first `(os, phase)` combination for which a genuine run of
/// `min_syms` upchirps is found. Returns `None` if no candidate yields a
/// genuine run (§7 `PreambleNotFound`).
///
/// The spec's degenerate `argmax_i |m[i]|` fallback is preserved as an
/// internal computability note (a threshold miss never silently succeeds
/// with a noise-argmax location — see `DESIGN.md`): this function only ever
/// returns `Some` for a candidate that actually satisfied the `min_syms`
/// correlation-run threshold.
pub fn detect_preamble_os(
    ws: &mut Workspace,
    samples: &[Complex32],
    min_syms: usize,
    os_candidates: &[Oversampling],
) -> Option<PreambleDetection> {
    let upchirp = ws.upchirp().to_vec();
    for &os in os_candidates {
        for phase in 0..os.factor() {
            let Ok(decimated) = decimate(samples, os, phase, 60.0) else {
                continue;
            };
            let scan = scan_candidate(&decimated, &upchirp, min_syms);
            if let Some(i0) = scan.run_start {
                let l2 = group_delay(os) as isize;
                let raw = i0 as isize * os.factor() as isize + phase as isize - l2;
                let start_sample_raw = raw.max(0) as usize;
                return Some(PreambleDetection {
                    start_sample_raw,
                    os,
                    phase,
                });
            }
        }
    }
    None
}

/// Location of the two-symbol frame delimiter relative to a decimated
/// (`os == 1`) stream, found within the elastic anchor window described in
/// §4.3 ("SFD location").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncLocation {
    pub sync_start: usize,
    pub header_start: usize,
}

fn expected_sync_bins(sync_word: u8) -> (u32, u32) {
    (
        ((sync_word >> 4) as u32) << 3,
        ((sync_word & 0xF) as u32) << 3,
    )
}

/// Search the elastic window `{±2 symbols} × {±N/16 samples}` around
/// `preamble_end_estimate` for the two sync-word upchirps, accepting any
/// symbol whose peak bin lies within `±2` of either expected value (§4.3).
/// `decimated` must be the `os == 1` stream.
pub fn locate_sync(
    ws: &mut Workspace,
    decimated: &[Complex32],
    preamble_end_estimate: usize,
    sync_word: u8,
) -> Option<SyncLocation> {
    let n = ws.n();
    let (bin_hi, bin_lo) = expected_sync_bins(sync_word);
    let symbol_span = 2isize;
    let sample_span = (n / 16) as isize;

    for sym_off in -symbol_span..=symbol_span {
        for samp_off in -sample_span..=sample_span {
            let base = preamble_end_estimate as isize + sym_off * n as isize + samp_off;
            if base < 0 {
                continue;
            }
            let base = base as usize;
            if base + 2 * n > decimated.len() {
                continue;
            }
            let first = demod_bin(ws, &decimated[base..base + n]);
            let second = demod_bin(ws, &decimated[base + n..base + 2 * n]);
            let first_ok = bin_within(first, bin_hi, 2) || bin_within(first, bin_lo, 2);
            let second_ok = bin_within(second, bin_hi, 2) || bin_within(second, bin_lo, 2);
            if first_ok && second_ok {
                let sync_start = base;
                // Two sync-word upchirps, then two downchirps, then a
                // quarter-symbol tail, then the header (§4.3, mirrors
                // `tx::synthesize_frame`).
                let header_start = sync_start + 2 * n + 2 * n + n / 4;
                return Some(SyncLocation {
                    sync_start,
                    header_start,
                });
            }
        }
    }
    None
}

fn demod_bin(ws: &mut Workspace, block: &[Complex32]) -> u32 {
    crate::demod::demod(ws, block)
}

fn bin_within(bin: u32, expected: u32, tol: u32) -> bool {
    let diff = if bin > expected {
        bin - expected
    } else {
        expected - bin
    };
    diff <= tol
}
