//! The legacy BSD `sum` checksum.

use digest::{Digest, FixedOutput, HashMarker, Output, OutputSizeUser, Reset, Update, typenum::U2};

/// BSD 16-bit rotating checksum, as printed by `sum` without `-s`.
///
/// For every byte the running value is rotated right by one bit and the byte
/// is added, modulo 2^16. The output is the value in big-endian order.
#[derive(Debug, Default, Clone)]
pub struct BsdSum {
    state: u16,
}

impl BsdSum {
    pub fn value(&self) -> u16 {
        self.state
    }
}

impl OutputSizeUser for BsdSum {
    type OutputSize = U2;
}

impl Update for BsdSum {
    fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.state = self.state.rotate_right(1).wrapping_add(u16::from(byte));
        }
    }
}

impl FixedOutput for BsdSum {
    fn finalize_into(self, out: &mut Output<Self>) {
        out.copy_from_slice(&self.state.to_be_bytes());
    }
}

impl Reset for BsdSum {
    fn reset(&mut self) {
        self.state = 0;
    }
}

impl HashMarker for BsdSum {}

/// Checksums a complete buffer.
pub fn bsd_sum(data: &[u8]) -> u16 {
    let out = BsdSum::digest(data);
    u16::from_be_bytes([out[0], out[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values() {
        assert_eq!(bsd_sum(b""), 0);
        assert_eq!(bsd_sum(b"DATA"), 49283);
        assert_eq!(bsd_sum(b"hello world\n"), 3762);
        assert_eq!(bsd_sum(b"#!/bin/sh\necho hi\n"), 62281);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let mut hasher = BsdSum::default();
        Digest::update(&mut hasher, b"hello ");
        Digest::update(&mut hasher, b"world\n");
        assert_eq!(hasher.value(), 3762);
        assert_eq!(hasher.finalize().as_slice(), &3762u16.to_be_bytes());
    }

    #[test]
    fn reset() {
        let mut hasher = BsdSum::default();
        Digest::update(&mut hasher, b"DATA");
        Digest::reset(&mut hasher);
        assert_eq!(hasher.value(), 0);
    }
}
