use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Soft decision bit as produced by the OFDM demapper. Positive values lean
/// towards a logical 1, the magnitude is the confidence.
pub type ViterbiBit = i16;

pub const SOFT_DECISION_HIGH: ViterbiBit = 127;
pub const SOFT_DECISION_LOW: ViterbiBit = -127;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransmissionMode {
    #[default]
    I,
    Ii,
    Iii,
    Iv,
}

impl TransmissionMode {
    pub fn from_number(mode: u8) -> Option<Self> {
        match mode {
            1 => Some(Self::I),
            2 => Some(Self::Ii),
            3 => Some(Self::Iii),
            4 => Some(Self::Iv),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::I => 1,
            Self::Ii => 2,
            Self::Iii => 3,
            Self::Iv => 4,
        }
    }
}

/// Frame geometry for one transmission mode (ETSI EN 300 401, table 38).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DabParameters {
    pub mode: TransmissionMode,
    /// OFDM symbols per frame, including the phase reference symbol.
    pub nb_symbols: usize,
    pub nb_carriers: usize,
    pub nb_fic_symbols: usize,
    pub nb_msc_symbols: usize,
    pub nb_cifs: usize,
    /// QPSK carries two bits per carrier.
    pub nb_sym_bits: usize,
    pub nb_fic_bits: usize,
    pub nb_msc_bits: usize,
    pub nb_frame_bits: usize,
    pub frame_duration_ms: u64,
}

impl DabParameters {
    pub fn for_mode(mode: TransmissionMode) -> Self {
        let (nb_symbols, nb_carriers, nb_fic_symbols, nb_cifs, frame_duration_ms) = match mode {
            TransmissionMode::I => (76, 1536, 3, 4, 96),
            TransmissionMode::Ii => (76, 384, 3, 1, 24),
            TransmissionMode::Iii => (153, 192, 8, 1, 24),
            TransmissionMode::Iv => (76, 768, 3, 2, 48),
        };
        let nb_data_symbols = nb_symbols - 1;
        let nb_msc_symbols = nb_data_symbols - nb_fic_symbols;
        let nb_sym_bits = nb_carriers * 2;
        Self {
            mode,
            nb_symbols,
            nb_carriers,
            nb_fic_symbols,
            nb_msc_symbols,
            nb_cifs,
            nb_sym_bits,
            nb_fic_bits: nb_sym_bits * nb_fic_symbols,
            nb_msc_bits: nb_sym_bits * nb_msc_symbols,
            nb_frame_bits: nb_sym_bits * nb_data_symbols,
            frame_duration_ms,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_one_frame_is_fic_plus_msc() {
        let p = DabParameters::for_mode(TransmissionMode::I);
        assert_eq!(p.nb_frame_bits, 230_400);
        assert_eq!(p.nb_fic_bits + p.nb_msc_bits, p.nb_frame_bits);
        assert_eq!(p.nb_msc_symbols, 72);
    }

    #[test]
    fn every_mode_splits_cleanly_into_cifs() {
        for n in 1..=4 {
            let mode = TransmissionMode::from_number(n).unwrap();
            assert_eq!(mode.number(), n);
            let p = DabParameters::for_mode(mode);
            assert_eq!(p.nb_msc_symbols % p.nb_cifs, 0);
        }
        assert!(TransmissionMode::from_number(5).is_none());
    }
}
