//! Energy dispersal PRBS (ETSI EN 300 401, clause 10).
//!
//! Generator polynomial `G(x) = 1 + x^-5 + x^-9`. The same stream scrambles and
//! descrambles since it is XORed against the data.

/// Initial register state mandated for energy dispersal (all ones).
pub const DAB_SYNCWORD: u16 = 0xFFFF;

#[derive(Debug, Clone)]
pub struct AdditiveScrambler {
    syncword: u16,
    reg: u16,
}

impl AdditiveScrambler {
    pub fn new(syncword: u16) -> Self {
        Self {
            syncword,
            reg: syncword,
        }
    }

    pub fn syncword(&self) -> u16 {
        self.syncword
    }

    /// Takes effect on the next `reset`.
    pub fn set_syncword(&mut self, syncword: u16) {
        self.syncword = syncword;
    }

    /// Reseeds the register. Must be called at every frame boundary.
    pub fn reset(&mut self) {
        self.reg = self.syncword;
    }

    /// Returns the next 8 PRBS bits.
    ///
    /// The first generated bit lands in the output MSB, matching the bit order
    /// of the packed frames coming out of the demapper.
    pub fn process(&mut self) -> u8 {
        let mut b = 0u8;
        for i in 0..8 {
            let v = (((self.reg >> 8) ^ (self.reg >> 4)) & 0b1) as u8;
            b |= v << (7 - i);
            self.reg = (self.reg << 1) | u16::from(v);
        }
        b
    }

    /// XORs `data` in place with the continuing PRBS stream.
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte ^= self.process();
        }
    }
}

impl Default for AdditiveScrambler {
    fn default() -> Self {
        Self::new(DAB_SYNCWORD)
    }
}
