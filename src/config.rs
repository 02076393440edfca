//! Receiver configuration (§6 "Configuration").

use crate::error::LoRaError;
use crate::types::{Oversampling, SF_MAX, SF_MIN};

/// Construction-time configuration for a [`crate::receiver::Receiver`].
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub sf: u32,
    pub min_preamble_syms: usize,
    pub os_candidates: Vec<Oversampling>,
    pub expected_sync_word: u8,
    pub expect_payload_crc: bool,
    pub ldro_override: Option<bool>,
}

impl ReceiverConfig {
    /// `min_preamble_syms` defaults to 8, auto-raised to 10 for `sf >= 9`
    /// and 12 for `sf >= 10`; `os_candidates` defaults to `{4,2,1,8}`
    /// (detector tries them in this order and accepts the first match);
    /// `expected_sync_word` defaults to `0x34` ("public" sync word).
    pub fn new(sf: u32) -> Result<Self, LoRaError> {
        if !(SF_MIN..=SF_MAX).contains(&sf) {
            return Err(LoRaError::InvalidConfig(format!(
                "sf {sf} out of range [{SF_MIN},{SF_MAX}]"
            )));
        }
        let min_preamble_syms = if sf >= 10 {
            12
        } else if sf >= 9 {
            10
        } else {
            8
        };
        Ok(Self {
            sf,
            min_preamble_syms,
            os_candidates: vec![
                Oversampling::X4,
                Oversampling::X2,
                Oversampling::X1,
                Oversampling::X8,
            ],
            expected_sync_word: 0x34,
            expect_payload_crc: true,
            ldro_override: None,
        })
    }

    /// LDRO is on when explicitly overridden, or inferred by the usual LoRa
    /// rule: `sf >= 11` at 125 kHz bandwidth.
    pub fn ldro_active(&self) -> bool {
        self.ldro_override.unwrap_or(self.sf >= 11)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_preamble_syms_is_auto_raised_by_sf() {
        assert_eq!(ReceiverConfig::new(7).unwrap().min_preamble_syms, 8);
        assert_eq!(ReceiverConfig::new(9).unwrap().min_preamble_syms, 10);
        assert_eq!(ReceiverConfig::new(10).unwrap().min_preamble_syms, 12);
        assert_eq!(ReceiverConfig::new(12).unwrap().min_preamble_syms, 12);
    }

    #[test]
    fn ldro_defaults_to_sf_rule_but_can_be_overridden() {
        let mut cfg = ReceiverConfig::new(11).unwrap();
        assert!(cfg.ldro_active());
        cfg.ldro_override = Some(false);
        assert!(!cfg.ldro_active());
    }

    #[test]
    fn rejects_out_of_range_sf() {
        assert!(ReceiverConfig::new(6).is_err());
        assert!(ReceiverConfig::new(13).is_err());
    }
}
