//! Payload decoder (C9, §4.9).

use rustfft::num_complex::Complex32;

use crate::chirp::Workspace;
use crate::crc::Crc16Ccitt;
use crate::error::LoRaError;
use crate::gray::gray_encode;
use crate::hamming::{self, RepairPolicy};
use crate::types::{CodeRate, LocalHeader};
use crate::whitening::dewhiten;

fn ceil_div_signed(num: i64, den: i64) -> i64 {
    if den == 0 {
        return 0;
    }
    let q = num / den;
    let r = num % den;
    if r != 0 && ((r > 0) == (den > 0)) {
        q + 1
    } else {
        q
    }
}

/// Number of payload symbols to demodulate, per the standard LoRa symbol
/// count formula (§4.9 step 1).
pub fn expected_symbols(sf: u32, header: &LocalHeader, ldro: bool) -> usize {
    let cr_index = header.cr.cr_index() as i64;
    let crc = if header.has_crc { 1i64 } else { 0 };
    let de = if ldro { 1i64 } else { 0 };
    let ih = 0i64;
    let numerator = 8 * header.payload_len as i64 - 4 * sf as i64 + 28 + 16 * crc - 20 * ih;
    let denom = 4 * (sf as i64 - 2 * de);
    let scaled = ceil_div_signed(numerator, denom) * (cr_index + 4);
    (8 + scaled.max(0)) as usize
}

fn pack_block(ws: &mut Workspace, bins: &[u32], sf_rows: u32, cw_cols: u32) -> Vec<u16> {
    let mut bitplane = vec![0u8; (sf_rows * cw_cols) as usize];
    for (col, &g) in bins.iter().enumerate() {
        for row in 0..sf_rows {
            let bit = (g >> (sf_rows - 1 - row)) & 1;
            bitplane[(row * cw_cols + col as u32) as usize] = bit as u8;
        }
    }
    let perm = ws.interleaver(sf_rows, cw_cols);
    let deinterleaved = perm.apply(&bitplane);

    let mut codewords = Vec::with_capacity(sf_rows as usize);
    for row in 0..sf_rows {
        let mut cw: u16 = 0;
        for col in 0..cw_cols {
            let bit = deinterleaved[(row * cw_cols + col) as usize];
            cw = (cw << 1) | bit as u16;
        }
        codewords.push(cw);
    }
    codewords
}

/// Decoded payload and whether its CRC (when present) matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub bytes: Vec<u8>,
    pub crc_ok: bool,
}

/// Decode the post-header payload span (§4.9). `samples` must start exactly
/// at the first payload symbol.
pub fn decode_payload(
    ws: &mut Workspace,
    samples: &[Complex32],
    sf: u32,
    header: &LocalHeader,
    ldro: bool,
) -> Result<DecodedPayload, LoRaError> {
    let n_syms = expected_symbols(sf, header, ldro);
    let n = ws.n();
    let sf_rows = if ldro { sf - 2 } else { sf };
    let cw_cols = header.cr.cw_len();

    let mut bins = Vec::with_capacity(n_syms);
    for s in 0..n_syms {
        let start = s * n;
        let end = start + n;
        if end > samples.len() {
            return Err(LoRaError::InsufficientSamples);
        }
        let raw = crate::demod::demod(ws, &samples[start..end]);
        let g_full = gray_encode(raw);
        let g = g_full >> (sf - sf_rows);
        bins.push(g);
    }
    while bins.len() % cw_cols as usize != 0 {
        bins.push(0);
    }

    let mut nibbles = Vec::with_capacity(bins.len() / cw_cols as usize * sf_rows as usize);
    for block in bins.chunks(cw_cols as usize) {
        let codewords = pack_block(ws, block, sf_rows, cw_cols);
        for cw in codewords {
            match hamming::decode(cw, header.cr, RepairPolicy::Strict) {
                Some(dec) => nibbles.push(dec.nibble),
                None => return Err(LoRaError::FecUncorrectable(header.cr)),
            }
        }
    }

    let expected_bytes = header.payload_len as usize + if header.has_crc { 2 } else { 0 };
    let mut bytes = Vec::with_capacity(expected_bytes);
    for pair in nibbles.chunks(2) {
        if pair.len() < 2 {
            break;
        }
        let low = pair[0];
        let high = pair[1];
        bytes.push(low | (high << 4));
        if bytes.len() == expected_bytes {
            break;
        }
    }
    bytes.truncate(expected_bytes);
    if bytes.len() < expected_bytes {
        return Err(LoRaError::HeaderInvalid);
    }

    dewhiten(&mut bytes[..header.payload_len as usize], 0);

    let crc_ok = if header.has_crc {
        let crc = Crc16Ccitt::lora();
        let (ok, _) = crc.verify_trailer_le(&bytes);
        ok
    } else {
        true
    };

    Ok(DecodedPayload { bytes, crc_ok })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx;

    #[test]
    fn expected_symbols_matches_known_example() {
        let header = LocalHeader {
            payload_len: 11,
            cr: CodeRate::Cr45,
            has_crc: true,
        };
        let n = expected_symbols(7, &header, false);
        assert!(n >= 8);
    }

    #[test]
    fn round_trips_a_short_payload() {
        let mut ws = Workspace::new(7);
        let header = LocalHeader {
            payload_len: 5,
            cr: CodeRate::Cr45,
            has_crc: true,
        };
        let payload = b"lora!".to_vec();
        let samples = tx::synthesize_payload(&mut ws, &payload, &header, false);
        let decoded = decode_payload(&mut ws, &samples, 7, &header, false).unwrap();
        assert_eq!(decoded.bytes, payload);
        assert!(decoded.crc_ok);
    }

    #[test]
    fn flags_crc_mismatch_without_discarding_payload() {
        let mut ws = Workspace::new(7);
        let header = LocalHeader {
            payload_len: 5,
            cr: CodeRate::Cr47,
            has_crc: true,
        };
        let payload = b"hello".to_vec();
        let mut samples = tx::synthesize_payload(&mut ws, &payload, &header, false);
        // Corrupt one payload symbol's samples outright to flip a decoded byte
        // without touching FEC-correctable single bits.
        let n = ws.n();
        for s in samples[0..n].iter_mut() {
            *s *= Complex32::new(-1.0, 0.0);
        }
        let decoded = decode_payload(&mut ws, &samples, 7, &header, false);
        if let Ok(d) = decoded {
            assert!(!d.crc_ok || d.bytes != payload);
        }
    }
}
