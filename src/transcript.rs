use crypto_bigint::BoxedUint;
use sha3::{Digest, Sha3_256};

use crate::arith::ModGroup;

const DOMAIN_TAG: &[u8] = b"mental-mpc/shash/v1";

/// Domain-separated transcript hash used to derive every non-interactive
/// challenge ("shash").
///
/// Each absorbed item is length-prefixed, and integers are absorbed as
/// their minimal big-endian bytes, so the digest is independent of the
/// precision an integer happens to be stored at and no two item sequences
/// collide by concatenation.
pub struct Shash {
    hasher: Sha3_256,
}

impl Shash {
    pub fn new(kind: &str) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(DOMAIN_TAG);
        hasher.update((kind.len() as u16).to_be_bytes());
        hasher.update(kind.as_bytes());
        Self { hasher }
    }

    pub fn absorb_bytes(mut self, bytes: &[u8]) -> Self {
        self.hasher.update((bytes.len() as u32).to_be_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn absorb_str(self, s: &str) -> Self {
        self.absorb_bytes(s.as_bytes())
    }

    pub fn absorb_u64(mut self, value: u64) -> Self {
        self.hasher.update([8u8, 0, 0, 0]);
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub fn absorb_uint(self, value: &BoxedUint) -> Self {
        let bytes = value.to_be_bytes();
        let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        self.absorb_bytes(&bytes[first..])
    }

    pub fn absorb_uints<'a>(mut self, values: impl IntoIterator<Item = &'a BoxedUint>) -> Self {
        for v in values {
            self = self.absorb_uint(v);
        }
        self
    }

    pub fn finish_raw(self) -> [u8; 32] {
        self.hasher.finalize().into()
    }

    /// Digest as an integer at the requested precision (≥ 256 bits).
    pub fn finish_uint(self, precision: u32) -> BoxedUint {
        let digest = self.finish_raw();
        BoxedUint::from_be_slice(&digest, 256)
            .expect("digest fits 256 bits")
            .widen(precision.max(256))
    }

    /// Digest reduced into the given ring.
    pub fn finish_mod(self, ring: &ModGroup) -> BoxedUint {
        let wide = self.finish_uint(ring.bits_precision().max(256));
        ring.reduce(&wide)
    }

    /// Low `bits` bits of the digest, stored at `precision`.
    pub fn finish_bits(self, bits: u32, precision: u32) -> BoxedUint {
        assert!(bits <= 256);
        let mut digest = self.finish_raw();
        let keep_bytes = bits.div_ceil(8) as usize;
        let start = digest.len() - keep_bytes;
        let excess = keep_bytes as u32 * 8 - bits;
        if excess > 0 {
            digest[start] &= 0xff >> excess;
        }
        BoxedUint::from_be_slice(&digest[start..], precision.max(keep_bytes as u32 * 8))
            .expect("truncated digest fits")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::uint_from;

    #[test]
    fn precision_does_not_change_digest() {
        let a = Shash::new("test").absorb_uint(&uint_from(42, 64)).finish_raw();
        let b = Shash::new("test")
            .absorb_uint(&uint_from(42, 2048))
            .finish_raw();
        assert_eq!(a, b);
    }

    #[test]
    fn order_changes_digest() {
        let x = uint_from(1, 64);
        let y = uint_from(2, 64);
        let a = Shash::new("test").absorb_uint(&x).absorb_uint(&y).finish_raw();
        let b = Shash::new("test").absorb_uint(&y).absorb_uint(&x).finish_raw();
        assert_ne!(a, b);
    }

    #[test]
    fn kind_separates_domains() {
        let a = Shash::new("a").absorb_u64(7).finish_raw();
        let b = Shash::new("b").absorb_u64(7).finish_raw();
        assert_ne!(a, b);
    }

    #[test]
    fn finish_bits_truncates() {
        let v = Shash::new("test").absorb_u64(3).finish_bits(12, 64);
        assert!(v.bits() <= 12);
    }
}
