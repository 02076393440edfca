//! Header decoder (C8, §4.8).
//!
//! The explicit header always demodulates `nsym_hdr = 16` symbols, packed as
//! two `sf_app × 8` interleaver blocks (`sf_app = SF − 2`, §4.6). Each block
//! decodes to `sf_app` CR48 nibbles; only the first five nibbles across both
//! blocks carry header content (`n0, n1, n2` plus the two checksum nibbles) —
//! for `SF == 7` that is exactly the `2·sf_app = 10` codewords the textual
//! algorithm describes, and for higher SF the remaining decoded nibbles are
//! simply unused (documented in `DESIGN.md`).

use rustfft::num_complex::Complex32;

use crate::chirp::Workspace;
use crate::error::LoRaError;
use crate::gray::gray_encode;
use crate::hamming::{self, RepairPolicy};
use crate::types::{CodeRate, LocalHeader};

const NSYM_HDR: usize = 16;
const CW_COLS: u32 = 8;

fn reduced_bin(raw: u32, n: u32, cfo_integer: i32) -> u32 {
    let shifted = (raw as i64 - cfo_integer as i64).rem_euclid(n as i64) as u32;
    let stepped = (shifted + n - 1) % n;
    stepped >> 2
}

/// Inverse of [`reduced_bin`] for `cfo_integer == 0`: the smallest raw bin
/// that reduces to `reduced`. Used by the transmit path to synthesize a
/// header symbol carrying a chosen reduced value.
pub(crate) fn raw_from_reduced(reduced: u32, n: u32) -> u32 {
    let stepped = reduced << 2;
    (stepped + 1) % n
}

/// Demodulate the 16 header symbols starting at `header_start` and return
/// their reduced, Gray-encoded bin values, one per symbol.
fn demod_header_symbols(
    ws: &mut Workspace,
    samples: &[Complex32],
    header_start: usize,
    cfo_integer: i32,
) -> Result<Vec<u32>, LoRaError> {
    let n = ws.n() as u32;
    let mut bins = Vec::with_capacity(NSYM_HDR);
    for s in 0..NSYM_HDR {
        let start = header_start + s * ws.n();
        let end = start + ws.n();
        if end > samples.len() {
            return Err(LoRaError::InsufficientSamples);
        }
        let raw = crate::demod::demod(ws, &samples[start..end]);
        let g = gray_encode(reduced_bin(raw, n, cfo_integer));
        bins.push(g);
    }
    Ok(bins)
}

fn block_to_nibbles(ws: &mut Workspace, bins: &[u32], sf_app: u32) -> Vec<u8> {
    debug_assert_eq!(bins.len(), CW_COLS as usize);
    let mut bitplane = vec![0u8; (sf_app * CW_COLS) as usize];
    for (col, &g) in bins.iter().enumerate() {
        for row in 0..sf_app {
            let bit = (g >> (sf_app - 1 - row)) & 1;
            bitplane[(row * CW_COLS + col as u32) as usize] = bit as u8;
        }
    }
    let perm = ws.interleaver(sf_app, CW_COLS);
    let deinterleaved = perm.apply(&bitplane);

    let mut nibbles = Vec::with_capacity(sf_app as usize);
    for row in 0..sf_app {
        let mut cw: u16 = 0;
        for col in 0..CW_COLS {
            let bit = deinterleaved[(row * CW_COLS + col) as usize];
            cw = (cw << 1) | bit as u16;
        }
        match hamming::decode(cw, CodeRate::Cr48, RepairPolicy::Strict) {
            Some(dec) => nibbles.push(dec.nibble),
            None => nibbles.push(0), // caller rejects via HeaderInvalid below
        }
    }
    nibbles
}

fn checksum_bit(n: u8, i: u32) -> u8 {
    (n >> i) & 1
}

pub(crate) fn expected_checksum(n0: u8, n1: u8, n2: u8) -> (u8, u8, u8, u8, u8) {
    let b = checksum_bit;
    let c4 = b(n0, 3) ^ b(n0, 2) ^ b(n0, 1) ^ b(n0, 0);
    let c3 = b(n0, 3) ^ b(n1, 3) ^ b(n1, 2) ^ b(n1, 1) ^ b(n2, 0);
    let c2 = b(n0, 2) ^ b(n1, 3) ^ b(n1, 0) ^ b(n2, 3) ^ b(n2, 1);
    let c1 = b(n0, 1) ^ b(n1, 2) ^ b(n1, 0) ^ b(n2, 2) ^ b(n2, 1) ^ b(n2, 0);
    let c0 = b(n0, 0) ^ b(n1, 1) ^ b(n2, 3) ^ b(n2, 2) ^ b(n2, 1) ^ b(n2, 0);
    (c4, c3, c2, c1, c0)
}

/// Decode the explicit header at a known `header_start` position (no
/// robustness search; used by the state machine once `LocateSync` has
/// already pinned the anchor).
pub fn decode_header(
    ws: &mut Workspace,
    samples: &[Complex32],
    header_start: usize,
    cfo_integer: i32,
) -> Result<LocalHeader, LoRaError> {
    let sf = ws.sf();
    let sf_app = sf - 2;
    let bins = demod_header_symbols(ws, samples, header_start, cfo_integer)?;

    let mut nibbles = Vec::with_capacity(2 * sf_app as usize);
    nibbles.extend(block_to_nibbles(ws, &bins[0..8], sf_app));
    nibbles.extend(block_to_nibbles(ws, &bins[8..16], sf_app));

    if nibbles.len() < 5 {
        return Err(LoRaError::HeaderInvalid);
    }
    let n0 = nibbles[0];
    let n1 = nibbles[1];
    let n2 = nibbles[2];
    let n3 = nibbles[3];
    let n4 = nibbles[4];

    let (c4, c3, c2, c1, c0) = expected_checksum(n0, n1, n2);
    let got_c4 = n3 & 1;
    let got_c3 = (n4 >> 3) & 1;
    let got_c2 = (n4 >> 2) & 1;
    let got_c1 = (n4 >> 1) & 1;
    let got_c0 = n4 & 1;
    if (c4, c3, c2, c1, c0) != (got_c4, got_c3, got_c2, got_c1, got_c0) {
        return Err(LoRaError::HeaderCrcFailed);
    }

    let payload_len = (n0 << 4) | n1;
    let has_crc = (n2 & 1) != 0;
    let cr_index = (n2 >> 1) & 0x7;
    if payload_len == 0 {
        return Err(LoRaError::HeaderInvalid);
    }
    let cr = CodeRate::from_cr_index(cr_index).map_err(|_| LoRaError::HeaderInvalid)?;

    Ok(LocalHeader {
        payload_len,
        cr,
        has_crc,
    })
}
