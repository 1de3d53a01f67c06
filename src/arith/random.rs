use crypto_bigint::{BoxedUint, NonZero, RandomMod};
use rand::rngs::OsRng;
use rand_chacha::{ChaCha20Rng, ChaCha8Rng};
use rand_core::{CryptoRngCore, SeedableRng};

use crate::config::Strength;

/// Strength-tiered randomness source.
///
/// `Weak` reseeds a ChaCha8 stream from the OS once per instance, `Strong`
/// a ChaCha20 stream, `VeryStrong` draws every output from the OS
/// directly. Protocol objects take one of these as an explicit parameter
/// instead of picking a tier globally.
pub enum SecureRng {
    Weak(ChaCha8Rng),
    Strong(ChaCha20Rng),
    VeryStrong(OsRng),
}

impl SecureRng {
    pub fn new(strength: Strength) -> Self {
        match strength {
            Strength::Weak => SecureRng::Weak(ChaCha8Rng::from_rng(OsRng).expect("OS entropy")),
            Strength::Strong => {
                SecureRng::Strong(ChaCha20Rng::from_rng(OsRng).expect("OS entropy"))
            }
            Strength::VeryStrong => SecureRng::VeryStrong(OsRng),
        }
    }

    fn rng(&mut self) -> &mut dyn CryptoRngCore {
        match self {
            SecureRng::Weak(r) => r,
            SecureRng::Strong(r) => r,
            SecureRng::VeryStrong(r) => r,
        }
    }

    /// Uniform value in `[0, modulus)`, at the modulus precision.
    pub fn below(&mut self, modulus: &BoxedUint) -> BoxedUint {
        let nz = NonZero::new(modulus.clone()).expect("modulus must be non-zero");
        BoxedUint::random_mod(self.rng(), &nz)
    }

    /// Uniform value in `[1, modulus)`.
    pub fn below_nonzero(&mut self, modulus: &BoxedUint) -> BoxedUint {
        loop {
            let candidate = self.below(modulus);
            if !bool::from(candidate.is_zero()) {
                return candidate;
            }
        }
    }

    /// Uniform `bits`-bit value (i.e. below `2^bits`), stored at `precision`.
    pub fn bits(&mut self, bits: u32, precision: u32) -> BoxedUint {
        assert!(bits > 0 && bits <= precision);
        let nbytes = bits.div_ceil(8) as usize;
        let mut buf = vec![0u8; nbytes];
        self.fill_bytes(&mut buf);
        let excess = nbytes as u32 * 8 - bits;
        if excess > 0 {
            buf[0] &= 0xff >> excess;
        }
        BoxedUint::from_be_slice(&buf, precision).expect("buffer fits requested precision")
    }

    pub fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng().fill_bytes(dest);
    }

    pub fn core(&mut self) -> &mut dyn CryptoRngCore {
        self.rng()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::uint_from;

    #[test]
    fn below_stays_in_range() {
        let modulus = uint_from(97, 64);
        for strength in [Strength::Weak, Strength::Strong, Strength::VeryStrong] {
            let mut rng = SecureRng::new(strength);
            for _ in 0..32 {
                assert!(rng.below(&modulus) < modulus);
            }
        }
    }

    #[test]
    fn bits_bound_is_respected() {
        let mut rng = SecureRng::new(Strength::Strong);
        for _ in 0..32 {
            assert!(rng.bits(10, 64).bits() <= 10);
        }
    }
}
