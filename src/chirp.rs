//! Chirp workspace (C1, §4.1): precomputed reference chirps, FFT plan and
//! scratch buffers keyed by spreading factor, plus the per-`(sf, cw_len)`
//! interleaver cache (§3 "Workspace").
//!
//! Built around a `rustfft::FftPlanner` plan the same way an OFDM
//! modulator would, generalized to the chirp reference signals and the
//! larger scratch surface a streaming receiver needs.

use std::collections::HashMap;
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::interleaver::Permutation;

/// Owns everything whose lifetime matches one receive session: the chirp
/// references, the FFT plan, and scratch reused across `step()` calls so
/// steady-state decode performs no allocation (§9 "Global workspaces and
/// scratch reuse").
pub struct Workspace {
    sf: u32,
    n: usize,
    upchirp: Vec<Complex32>,
    downchirp: Vec<Complex32>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
    fft_scratch: Vec<Complex32>,
    interleavers: HashMap<(u32, u32), Permutation>,
}

impl Workspace {
    pub fn new(sf: u32) -> Self {
        let mut ws = Self {
            sf: 0,
            n: 0,
            upchirp: Vec::new(),
            downchirp: Vec::new(),
            fft: FftPlanner::new().plan_fft_forward(1),
            scratch: Vec::new(),
            fft_scratch: Vec::new(),
            interleavers: HashMap::new(),
        };
        ws.init(sf);
        ws
    }

    pub fn sf(&self) -> u32 {
        self.sf
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn upchirp(&self) -> &[Complex32] {
        &self.upchirp
    }

    pub fn downchirp(&self) -> &[Complex32] {
        &self.downchirp
    }

    /// `(Re)`computes references and resizes scratch. Idempotent when `sf`
    /// is unchanged (§4.1).
    pub fn init(&mut self, sf: u32) {
        let n = 1usize << sf;
        if self.sf == sf && self.n == n {
            return;
        }
        self.sf = sf;
        self.n = n;

        self.upchirp.clear();
        self.upchirp.reserve(n);
        self.downchirp.clear();
        self.downchirp.reserve(n);
        for k in 0..n {
            let kf = k as f32;
            let nf = n as f32;
            let phase = 2.0 * std::f32::consts::PI * (kf * kf / (2.0 * nf) - kf / 2.0);
            let up = Complex32::new(phase.cos(), phase.sin());
            self.upchirp.push(up);
            self.downchirp.push(up.conj());
        }

        self.fft = FftPlanner::new().plan_fft_forward(n);
        self.fft_scratch = vec![Complex32::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];
        self.scratch = vec![Complex32::new(0.0, 0.0); n];
        self.interleavers.clear();
    }

    /// Guarantees `scratch` is at least `n` complex samples long — used by
    /// the demodulator for blocks larger than one symbol (e.g. sub-sample
    /// shift search).
    pub fn ensure_scratch(&mut self, n: usize) {
        if self.scratch.len() < n {
            self.scratch.resize(n, Complex32::new(0.0, 0.0));
        }
    }

    /// Size-`N` forward FFT: `out[k] = Σ_n in[n]·exp(-j·2π·k·n/N)`.
    pub fn fft(&mut self, buf: &mut [Complex32]) {
        debug_assert_eq!(buf.len(), self.n);
        self.fft
            .process_with_scratch(buf, &mut self.fft_scratch);
    }

    /// Returns the cached diagonal-interleaver permutation for this
    /// `(sf_rows, cw_cols)` geometry, building it on first use (§4.1).
    pub fn interleaver(&mut self, sf_rows: u32, cw_cols: u32) -> &Permutation {
        self.interleavers
            .entry((sf_rows, cw_cols))
            .or_insert_with(|| Permutation::new(sf_rows, cw_cols))
    }
}
