//! Symbol demodulator (C5, §4.5): dechirp, FFT, peak pick.

use rustfft::num_complex::Complex32;

use crate::chirp::Workspace;

/// `demod(block)`: multiply by the reference downchirp, run the size-`N`
/// FFT, return `argmax_k |Y[k]|^2`. `block.len()` must equal `ws.n()`.
pub fn demod(ws: &mut Workspace, block: &[Complex32]) -> u32 {
    let n = ws.n();
    debug_assert_eq!(block.len(), n);
    let mut buf = vec![Complex32::new(0.0, 0.0); n];
    for i in 0..n {
        buf[i] = block[i] * ws.downchirp()[i];
    }
    ws.fft(&mut buf);
    argmax_power(&buf)
}

fn argmax_power(spectrum: &[Complex32]) -> u32 {
    let mut best_bin = 0usize;
    let mut best_mag = -1.0f32;
    for (k, c) in spectrum.iter().enumerate() {
        let mag = c.norm_sqr();
        if mag > best_mag {
            best_mag = mag;
            best_bin = k;
        }
    }
    best_bin as u32
}

fn sharpness(spectrum: &[Complex32], bin: usize) -> f32 {
    let n = spectrum.len();
    let peak = spectrum[bin].norm();
    let left = spectrum[(bin + n - 1) % n].norm();
    let right = spectrum[(bin + 1) % n].norm();
    peak - 0.5 * (left + right)
}

/// Multiply `x[n]` by `exp(-j·2π·eps·n)` in place, `n` counted from the
/// start of `x` (§4.4 compensation convention).
pub fn apply_cfo(x: &mut [Complex32], eps: f32) {
    for (n, s) in x.iter_mut().enumerate() {
        let phase = -2.0 * std::f32::consts::PI * eps * n as f32;
        *s *= Complex32::new(phase.cos(), phase.sin());
    }
}

/// Explores integer shifts `s ∈ [-radius, +radius]` within `span` (which
/// must be `ws.n() + 2*radius` samples long, shift `0` aligned to
/// `span[radius..radius+N]`), re-running `demod` with CFO compensation
/// `eps` applied per shift, and returns the `(bin, shift)` maximizing a
/// sharpness proxy (peak bin magnitude minus average neighbour magnitude).
/// Used only by the header stage (§4.5).
pub fn demod_best_shift(ws: &mut Workspace, span: &[Complex32], radius: i32, eps: f32) -> (u32, i32) {
    let n = ws.n();
    debug_assert_eq!(span.len(), n + 2 * radius as usize);

    let mut best_bin = 0u32;
    let mut best_shift = 0i32;
    let mut best_score = f32::NEG_INFINITY;

    for shift in -radius..=radius {
        let start = (radius + shift) as usize;
        let mut block: Vec<Complex32> = span[start..start + n].to_vec();
        apply_cfo(&mut block, eps);
        for i in 0..n {
            block[i] *= ws.downchirp()[i];
        }
        ws.fft(&mut block);
        let bin = argmax_power(&block) as usize;
        let score = sharpness(&block, bin);
        if score > best_score {
            best_score = score;
            best_bin = bin as u32;
            best_shift = shift;
        }
    }

    (best_bin, best_shift)
}
