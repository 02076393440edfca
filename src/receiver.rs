//! Streaming receive state machine (C10, §4.10).
//!
//! `SearchPreamble → LocateSync → DemodHeader → DemodPayload → YieldFrame →
//! Advance → SearchPreamble`. Each [`Receiver::step`] call performs at most
//! one transition; [`Receiver::next_frame`] drains completed frames.

use std::collections::VecDeque;

use log::{debug, trace, warn};
use rustfft::num_complex::Complex32;

use crate::cfo::{self, CfoStoEstimate};
use crate::chirp::Workspace;
use crate::config::ReceiverConfig;
use crate::decimate::decimate;
use crate::demod::apply_cfo;
use crate::error::LoRaError;
use crate::header;
use crate::payload;
use crate::preamble::{self, SyncLocation};
use crate::ring::Ring;
use crate::types::{Frame, LocalHeader, PreambleDetection};

/// Ring capacity, `C_raw` (§4.10).
const C_RAW: usize = 4 * (1 << 20);

/// `sync.header_start`, corrected by the §4.4 residual sample-timing offset
/// — "applying `sto` by shifting the read cursor" means every subsequent
/// read (header, payload) starts here instead of at the raw sync location.
fn sto_adjusted_header_start(sync: &SyncLocation, cfo: &CfoStoEstimate) -> usize {
    (sync.header_start as i64 + cfo.sto as i64).max(0) as usize
}

enum State {
    SearchPreamble,
    LocateSync {
        detection: PreambleDetection,
    },
    DemodHeader {
        detection: PreambleDetection,
        sync: SyncLocation,
        cfo: CfoStoEstimate,
    },
    DemodPayload {
        detection: PreambleDetection,
        sync: SyncLocation,
        cfo: CfoStoEstimate,
        header: LocalHeader,
        frame_start_raw: usize,
    },
}

/// A pull interface yielding contiguous spans of complex samples; an empty
/// slice means "try again later" (§6 "Sample source").
pub trait SampleSource {
    fn pull(&mut self) -> Vec<Complex32>;
}

pub struct Receiver {
    config: ReceiverConfig,
    ws: Workspace,
    ring: Ring,
    state: State,
    frames: VecDeque<Frame>,
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> Self {
        let ws = Workspace::new(config.sf);
        Self {
            config,
            ws,
            ring: Ring::new(C_RAW),
            state: State::SearchPreamble,
            frames: VecDeque::new(),
        }
    }

    /// Append freshly-acquired raw samples to the ring.
    pub fn feed(&mut self, samples: &[Complex32]) -> Result<(), LoRaError> {
        let n = self.ws.n();
        self.ring.compact(8 * n + 64 * n);
        self.ring.push(samples)
    }

    /// Pull once from `source` and feed whatever it returns (empty means
    /// "nothing yet", a no-op).
    pub fn feed_from<S: SampleSource>(&mut self, source: &mut S) -> Result<(), LoRaError> {
        let pulled = source.pull();
        if pulled.is_empty() {
            return Ok(());
        }
        self.feed(&pulled)
    }

    /// Discard ring contents and any in-flight frame context, returning to
    /// `SearchPreamble`.
    pub fn reset(&mut self) {
        self.ring.reset();
        self.state = State::SearchPreamble;
        self.frames.clear();
    }

    /// Pop the oldest completed frame, if any.
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    fn decimated_window(
        &self,
        base_global: usize,
        decimated_len: usize,
        os: crate::types::Oversampling,
        phase: usize,
    ) -> Result<Vec<Complex32>, LoRaError> {
        let raw_len = decimated_len * os.factor() + os.factor() * 4;
        let raw = self
            .ring
            .view_global(base_global, raw_len)
            .ok_or(LoRaError::InsufficientSamples)?;
        decimate(raw, os, phase, 60.0)
    }

    /// Advance the state machine by at most one transition. Returns `Ok`
    /// whether or not a frame was produced; a completed frame is queued for
    /// [`Self::next_frame`].
    pub fn step(&mut self) -> Result<(), LoRaError> {
        match std::mem::replace(&mut self.state, State::SearchPreamble) {
            State::SearchPreamble => self.step_search_preamble(),
            State::LocateSync { detection } => self.step_locate_sync(detection),
            State::DemodHeader { detection, sync, cfo } => {
                self.step_demod_header(detection, sync, cfo)
            }
            State::DemodPayload {
                detection,
                sync,
                cfo,
                header,
                frame_start_raw,
            } => self.step_demod_payload(detection, sync, cfo, header, frame_start_raw),
        }
    }

    fn step_search_preamble(&mut self) -> Result<(), LoRaError> {
        let n = self.ws.n();
        let h_raw = 8 * n;
        let w_raw = 64 * n;
        if self.ring.available() < h_raw + w_raw {
            self.state = State::SearchPreamble;
            return Err(LoRaError::InsufficientSamples);
        }

        let window_start = self.ring.head().saturating_sub(h_raw).max(self.ring.floor());
        let window_cap = self.ring.head() + w_raw;
        let window_len = window_cap - window_start;
        let samples = self
            .ring
            .view_global(window_start, window_len)
            .ok_or(LoRaError::InsufficientSamples)?;

        match preamble::detect_preamble_os(
            &mut self.ws,
            samples,
            self.config.min_preamble_syms,
            &self.config.os_candidates,
        ) {
            Some(det) => {
                let absolute = PreambleDetection {
                    start_sample_raw: window_start + det.start_sample_raw,
                    os: det.os,
                    phase: det.phase,
                };
                debug!(
                    "preamble detected at raw sample {} (os={:?}, phase={})",
                    absolute.start_sample_raw, absolute.os, absolute.phase
                );
                self.state = State::LocateSync { detection: absolute };
                Ok(())
            }
            None => {
                trace!("no preamble in search window, advancing by N/8");
                self.ring.advance(n / 8);
                self.state = State::SearchPreamble;
                Err(LoRaError::PreambleNotFound)
            }
        }
    }

    fn step_locate_sync(&mut self, detection: PreambleDetection) -> Result<(), LoRaError> {
        let n = self.ws.n();
        let preamble_end_estimate = self.config.min_preamble_syms * n;
        // `locate_sync` searches sym_off in -2..=2 and samp_off in ±N/16
        // (§4.3), so `sync_start` may legally land as late as
        // `preamble_end_estimate + 2*n + n/16`; the SFD downchirps read
        // below need `sync_start + 4*n` samples, so the window must cover
        // that worst case plus the +4n SFD span.
        let decimated_len = preamble_end_estimate + 6 * n + n / 16;
        let decimated = match self.decimated_window(
            detection.start_sample_raw,
            decimated_len,
            detection.os,
            detection.phase,
        ) {
            Ok(d) => d,
            Err(e) => {
                self.state = State::LocateSync { detection };
                return Err(e);
            }
        };

        match preamble::locate_sync(
            &mut self.ws,
            &decimated,
            preamble_end_estimate,
            self.config.expected_sync_word,
        ) {
            Some(sync) if sync.sync_start >= 2 * n && sync.sync_start + 4 * n <= decimated.len() => {
                let up1 = &decimated[sync.sync_start - 2 * n..sync.sync_start - n];
                let up2 = &decimated[sync.sync_start - n..sync.sync_start];
                let down1 = &decimated[sync.sync_start + 2 * n..sync.sync_start + 3 * n];
                let down2 = &decimated[sync.sync_start + 3 * n..sync.sync_start + 4 * n];

                // STO search window: up1 padded with up to N/8 samples of
                // margin on either side, clamped so it never reaches before
                // index 0 (§4.4).
                let radius = n / 8;
                let margin = radius.min(sync.sync_start - 2 * n);
                let sto_window = &decimated[sync.sync_start - 2 * n - margin..sync.sync_start - n + margin];

                let est = cfo::estimate(&mut self.ws, &[up1, up2], &[down1, down2], sto_window);
                debug!(
                    "sync located at decimated offset {}, frac_cfo={:.4} int_cfo={} sto={}",
                    sync.sync_start, est.frac_cfo, est.int_cfo, est.sto
                );
                self.state = State::DemodHeader {
                    detection,
                    sync,
                    cfo: est,
                };
                Ok(())
            }
            _ => {
                warn!("sync word not found within the anchor window, advancing by N/8");
                self.ring.advance(n / 8);
                self.state = State::SearchPreamble;
                Err(LoRaError::SyncMismatch)
            }
        }
    }

    fn step_demod_header(
        &mut self,
        detection: PreambleDetection,
        sync: SyncLocation,
        cfo: CfoStoEstimate,
    ) -> Result<(), LoRaError> {
        let n = self.ws.n();
        let header_start = sto_adjusted_header_start(&sync, &cfo);
        let decimated_len = header_start + 16 * n;
        let decimated = match self.decimated_window(
            detection.start_sample_raw,
            decimated_len,
            detection.os,
            detection.phase,
        ) {
            Ok(d) => d,
            Err(e) => {
                self.state = State::DemodHeader { detection, sync, cfo };
                return Err(e);
            }
        };

        let mut slice = decimated[header_start..header_start + 16 * n].to_vec();
        apply_cfo(&mut slice, cfo.frac_cfo / n as f32);

        match header::decode_header(&mut self.ws, &slice, 0, cfo.int_cfo) {
            Ok(hdr) => {
                let raw_per_sample = detection.os.factor();
                let frame_start_raw =
                    detection.start_sample_raw + header_start * raw_per_sample;
                debug!("header decoded: {hdr:?}");
                self.state = State::DemodPayload {
                    detection,
                    sync,
                    cfo,
                    header: hdr,
                    frame_start_raw,
                };
                Ok(())
            }
            Err(e) => {
                warn!("header decode failed ({e}); advancing by N/8");
                self.ring.advance(n / 8);
                self.state = State::SearchPreamble;
                Err(e)
            }
        }
    }

    fn step_demod_payload(
        &mut self,
        detection: PreambleDetection,
        sync: SyncLocation,
        cfo: CfoStoEstimate,
        hdr: LocalHeader,
        frame_start_raw: usize,
    ) -> Result<(), LoRaError> {
        let n = self.ws.n();
        let sf = self.config.sf;
        let ldro = self.config.ldro_active();
        let n_syms = payload::expected_symbols(sf, &hdr, ldro);
        let payload_start = sto_adjusted_header_start(&sync, &cfo) + 16 * n;
        let decimated_len = payload_start + n_syms * n;

        let decimated = match self.decimated_window(
            detection.start_sample_raw,
            decimated_len,
            detection.os,
            detection.phase,
        ) {
            Ok(d) => d,
            Err(e) => {
                self.state = State::DemodPayload {
                    detection,
                    sync,
                    cfo,
                    header: hdr,
                    frame_start_raw,
                };
                return Err(e);
            }
        };

        let mut slice = decimated[payload_start..payload_start + n_syms * n].to_vec();
        cfo::compensate(&mut slice, n, &cfo);

        let raw_per_sample = detection.os.factor();
        let frame_end_raw = frame_start_raw + (16 + n_syms) * n * raw_per_sample;

        match payload::decode_payload(&mut self.ws, &slice, sf, &hdr, ldro) {
            Ok(decoded) => {
                if self.config.expect_payload_crc && !hdr.has_crc {
                    warn!("frame carries no CRC though the receiver expects one");
                }
                let frame = Frame {
                    payload: decoded.bytes,
                    header: hdr,
                    detection,
                    // `cfo.frac_cfo` is bin-denominated (cycles/symbol);
                    // §3/§4.4 report `cfo_fractional` in cycles/sample.
                    cfo_fractional: cfo.frac_cfo / n as f32,
                    cfo_integer: cfo.int_cfo,
                    sto: cfo.sto,
                    crc_ok: decoded.crc_ok,
                    frame_start_raw,
                    frame_end_raw,
                };
                debug!(
                    "frame yielded: {} bytes, crc_ok={}",
                    frame.payload.len(),
                    frame.crc_ok
                );
                self.frames.push_back(frame);
                let guard = frame_end_raw.saturating_sub(n * raw_per_sample);
                let delta = guard.saturating_sub(self.ring.head());
                self.ring.advance(delta);
                self.state = State::SearchPreamble;
                Ok(())
            }
            Err(e) => {
                warn!("payload decode failed ({e}); advancing by N/8");
                self.ring.advance(n / 8);
                self.state = State::SearchPreamble;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx;
    use crate::types::CodeRate;

    #[test]
    fn decodes_a_synthesized_frame_end_to_end() {
        let cfg = ReceiverConfig::new(7).unwrap();
        let mut receiver = Receiver::new(cfg.clone());
        let header = LocalHeader {
            payload_len: 6,
            cr: CodeRate::Cr46,
            has_crc: true,
        };
        let payload = b"hi!lol".to_vec();

        let mut ws = Workspace::new(7);
        let frame_samples =
            tx::synthesize_frame(&mut ws, cfg.min_preamble_syms, cfg.expected_sync_word, &header, &payload, false);

        let mut stream = frame_samples;
        stream.extend(vec![Complex32::new(0.0, 0.0); 64 * ws.n()]);
        receiver.feed(&stream).unwrap();

        let mut found = None;
        for _ in 0..64 {
            let _ = receiver.step();
            if let Some(f) = receiver.next_frame() {
                found = Some(f);
                break;
            }
        }

        let frame = found.expect("a frame should have been decoded");
        assert_eq!(frame.payload, payload);
        assert!(frame.crc_ok);
    }

    #[test]
    fn reset_clears_in_flight_context() {
        let cfg = ReceiverConfig::new(7).unwrap();
        let mut receiver = Receiver::new(cfg);
        receiver.feed(&vec![Complex32::new(0.0, 0.0); 1000]).unwrap();
        let _ = receiver.step();
        receiver.reset();
        assert!(receiver.next_frame().is_none());
    }
}
