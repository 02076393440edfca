//! Minimal inverse transmit path (§1, §9): synthesizes chirp waveforms for
//! a chosen header/payload so the receive path can be exercised without an
//! external RF capture. Not a general-purpose modulator — no pacing,
//! filtering, or on-air framing beyond what the receive path consumes.

use rustfft::num_complex::Complex32;

use crate::chirp::Workspace;
use crate::crc::Crc16Ccitt;
use crate::gray::gray_decode;
use crate::hamming;
use crate::header::{expected_checksum, raw_from_reduced};
use crate::payload::expected_symbols;
use crate::types::{CodeRate, LocalHeader};
use crate::whitening::dewhiten;

/// The reference upchirp cyclically shifted by `sym` chips: `s[n] =
/// upchirp[(n + sym) mod N]`, the standard LoRa symbol waveform whose
/// dechirped FFT peak lands on bin `sym`.
pub fn symbol_waveform(ws: &Workspace, sym: u32) -> Vec<Complex32> {
    let n = ws.n() as u32;
    (0..n)
        .map(|i| {
            let shifted = (i + sym) % n;
            ws.upchirp()[shifted as usize]
        })
        .collect()
}

fn encode_header_nibbles(header: &LocalHeader) -> [u8; 5] {
    let n0 = (header.payload_len >> 4) & 0xF;
    let n1 = header.payload_len & 0xF;
    let n2 = ((header.cr.cr_index() & 0x7) << 1) | (header.has_crc as u8);
    let (c4, c3, c2, c1, c0) = expected_checksum(n0, n1, n2);
    let n3 = c4;
    let n4 = (c3 << 3) | (c2 << 2) | (c1 << 1) | c0;
    [n0, n1, n2, n3, n4]
}

fn encode_block(ws: &mut Workspace, nibbles: &[u8], sf_app: u32, cr: CodeRate, cw_cols: u32) -> Vec<u32> {
    debug_assert_eq!(nibbles.len(), sf_app as usize);
    let mut codeword_matrix = vec![0u8; (sf_app * cw_cols) as usize];
    for (row, &nib) in nibbles.iter().enumerate() {
        let cw = hamming::encode(nib, cr);
        for col in 0..cw_cols {
            let bit = (cw >> (cw_cols - 1 - col)) & 1;
            codeword_matrix[row * cw_cols as usize + col as usize] = bit as u8;
        }
    }
    let perm = ws.interleaver(sf_app, cw_cols);
    let bitplane = perm.apply(&codeword_matrix);

    let mut bins = Vec::with_capacity(cw_cols as usize);
    for col in 0..cw_cols {
        let mut g = 0u32;
        for row in 0..sf_app {
            let bit = bitplane[(row * cw_cols + col) as usize];
            g |= (bit as u32) << (sf_app - 1 - row);
        }
        bins.push(g);
    }
    bins
}

/// Synthesize the 16 header symbols for `header` (§4.8 run in reverse).
pub fn synthesize_header(ws: &mut Workspace, header: &LocalHeader) -> Vec<Complex32> {
    let sf = ws.sf();
    let sf_app = sf - 2;
    let n = ws.n() as u32;
    let nibbles = encode_header_nibbles(header);

    let mut block1_nibbles = vec![0u8; sf_app as usize];
    block1_nibbles[..5.min(sf_app as usize)].copy_from_slice(&nibbles[..5.min(sf_app as usize)]);
    let block2_nibbles = vec![0u8; sf_app as usize];

    let gray_bins_1 = encode_block(ws, &block1_nibbles, sf_app, CodeRate::Cr48, 8);
    let gray_bins_2 = encode_block(ws, &block2_nibbles, sf_app, CodeRate::Cr48, 8);

    let mut out = Vec::with_capacity(16 * n as usize);
    for g in gray_bins_1.into_iter().chain(gray_bins_2) {
        let reduced = gray_decode(g);
        let raw = raw_from_reduced(reduced, n);
        out.extend(symbol_waveform(ws, raw));
    }
    out
}

/// Synthesize the payload symbols for `payload` under `header` and `ldro`
/// (§4.9 run in reverse): whiten, CRC-append, Hamming-encode, interleave,
/// Gray-encode, chirp-synthesize.
pub fn synthesize_payload(ws: &mut Workspace, payload: &[u8], header: &LocalHeader, ldro: bool) -> Vec<Complex32> {
    let sf = ws.sf();
    let n = ws.n() as u32;
    let sf_rows = if ldro { sf - 2 } else { sf };
    let cw_cols = header.cr.cw_len();

    let mut bytes = payload.to_vec();
    dewhiten(&mut bytes, 0); // whitening is self-inverse; this whitens on transmit
    if header.has_crc {
        let crc = Crc16Ccitt::lora();
        let trailer = crc.trailer_le(payload);
        bytes.extend_from_slice(&trailer);
    }

    let mut nibbles = Vec::with_capacity(bytes.len() * 2);
    for &b in &bytes {
        nibbles.push(b & 0xF);
        nibbles.push((b >> 4) & 0xF);
    }
    while nibbles.len() % sf_rows as usize != 0 {
        nibbles.push(0);
    }

    let n_syms = expected_symbols(sf, header, ldro);
    let mut bins = Vec::new();
    for chunk in nibbles.chunks(sf_rows as usize) {
        bins.extend(encode_block(ws, chunk, sf_rows, header.cr, cw_cols));
    }
    while bins.len() < n_syms {
        bins.push(0);
    }
    bins.truncate(n_syms);

    let mut out = Vec::with_capacity(n_syms * n as usize);
    for g in bins {
        let raw = gray_decode(g) << (sf - sf_rows);
        out.extend(symbol_waveform(ws, raw));
    }
    out
}

/// Synthesize a complete frame: `min_preamble_syms` reference upchirps, the
/// two sync-word upchirps plus two downchirps and a quarter-upchirp SFD tail
/// (§4.3), the header, and the payload — enough to drive the receive state
/// machine end to end in tests.
pub fn synthesize_frame(
    ws: &mut Workspace,
    min_preamble_syms: usize,
    sync_word: u8,
    header: &LocalHeader,
    payload: &[u8],
    ldro: bool,
) -> Vec<Complex32> {
    let n = ws.n();
    let mut out = Vec::new();

    for _ in 0..min_preamble_syms {
        out.extend_from_slice(ws.upchirp());
    }

    let sync_hi = ((sync_word >> 4) as u32) << 3;
    let sync_lo = ((sync_word & 0xF) as u32) << 3;
    out.extend(symbol_waveform(ws, sync_hi));
    out.extend(symbol_waveform(ws, sync_lo));
    out.extend_from_slice(ws.downchirp());
    out.extend_from_slice(ws.downchirp());
    out.extend_from_slice(&ws.upchirp()[..n / 4]);

    out.extend(synthesize_header(ws, header));
    out.extend(synthesize_payload(ws, payload, header, ldro));
    out
}
