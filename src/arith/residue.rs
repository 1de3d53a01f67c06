use crypto_bigint::modular::{BoxedMontyForm, BoxedMontyParams};
use crypto_bigint::{BoxedUint, Integer, NonZero, Odd};

use crate::error::{MpcError, MpcResult};

/// Arithmetic in `Z_m` for a runtime odd modulus `m`.
///
/// Multiplication, exponentiation and inversion run through Montgomery
/// form; exponentiation is constant-time in the exponent, which is what
/// every secret-exponent path in the protocol layer relies on. One
/// instance per modulus plays the role the precomputed `fpowm` tables play
/// in classic implementations: build it once per domain, reuse it
/// everywhere.
#[derive(Clone, Debug)]
pub struct ModGroup {
    modulus: BoxedUint,
    nz: NonZero<BoxedUint>,
    params: BoxedMontyParams,
}

impl ModGroup {
    /// `m` must be odd and greater than one.
    pub fn new(modulus: &BoxedUint) -> MpcResult<Self> {
        if !bool::from(modulus.is_odd()) {
            return Err(MpcError::invalid("modulus must be odd"));
        }
        let one = BoxedUint::one_with_precision(modulus.bits_precision());
        if modulus <= &one {
            return Err(MpcError::invalid("modulus must exceed one"));
        }
        let odd = Option::<Odd<BoxedUint>>::from(Odd::new(modulus.clone()))
            .ok_or_else(|| MpcError::invalid("modulus must be odd"))?;
        let nz = Option::<NonZero<BoxedUint>>::from(NonZero::new(modulus.clone()))
            .ok_or_else(|| MpcError::invalid("modulus must be non-zero"))?;
        Ok(Self {
            modulus: modulus.clone(),
            nz,
            params: BoxedMontyParams::new(odd),
        })
    }

    pub fn modulus(&self) -> &BoxedUint {
        &self.modulus
    }

    pub fn bits_precision(&self) -> u32 {
        self.modulus.bits_precision()
    }

    pub fn zero(&self) -> BoxedUint {
        BoxedUint::zero_with_precision(self.bits_precision())
    }

    pub fn one(&self) -> BoxedUint {
        BoxedUint::one_with_precision(self.bits_precision())
    }

    pub fn from_u64(&self, value: u64) -> BoxedUint {
        BoxedUint::from(value).widen(self.bits_precision())
    }

    /// Reduces an arbitrary-precision value into `[0, m)` at this group's
    /// precision.
    pub fn reduce(&self, value: &BoxedUint) -> BoxedUint {
        let wide = if value.bits_precision() < self.bits_precision() {
            value.widen(self.bits_precision())
        } else {
            value.clone()
        };
        let nz = if wide.bits_precision() == self.bits_precision() {
            self.nz.clone()
        } else {
            NonZero::new(self.modulus.widen(wide.bits_precision()))
                .expect("widened modulus stays non-zero")
        };
        let reduced = wide.rem(&nz);
        // rem keeps the dividend precision; the value now fits the modulus
        if reduced.bits_precision() == self.bits_precision() {
            reduced
        } else {
            reduced.shorten(self.bits_precision())
        }
    }

    fn to_monty(&self, value: &BoxedUint) -> BoxedMontyForm {
        BoxedMontyForm::new(self.reduce(value), self.params.clone())
    }

    pub fn add(&self, a: &BoxedUint, b: &BoxedUint) -> BoxedUint {
        self.reduce(a).add_mod(&self.reduce(b), &self.modulus)
    }

    pub fn sub(&self, a: &BoxedUint, b: &BoxedUint) -> BoxedUint {
        self.reduce(a).sub_mod(&self.reduce(b), &self.modulus)
    }

    pub fn neg(&self, a: &BoxedUint) -> BoxedUint {
        self.zero().sub_mod(&self.reduce(a), &self.modulus)
    }

    pub fn mul(&self, a: &BoxedUint, b: &BoxedUint) -> BoxedUint {
        (&self.to_monty(a) * &self.to_monty(b)).retrieve()
    }

    /// `base^exponent mod m`, constant-time in the exponent.
    pub fn pow(&self, base: &BoxedUint, exponent: &BoxedUint) -> BoxedUint {
        self.to_monty(base).pow(exponent).retrieve()
    }

    /// Modular inverse; `None` when `gcd(a, m) != 1`.
    pub fn invert(&self, a: &BoxedUint) -> Option<BoxedUint> {
        Option::<BoxedMontyForm>::from(self.to_monty(a).invert()).map(|f| f.retrieve())
    }

    pub fn is_zero(&self, a: &BoxedUint) -> bool {
        bool::from(self.reduce(a).is_zero())
    }

    pub fn is_one(&self, a: &BoxedUint) -> bool {
        self.reduce(a) == self.one()
    }

    /// Whether `a` already lies in `[0, m)` at a compatible precision.
    pub fn contains(&self, a: &BoxedUint) -> bool {
        a.bits() <= self.modulus.bits() && self.reduce(a) == self.normalize(a)
    }

    fn normalize(&self, a: &BoxedUint) -> BoxedUint {
        let bits = self.bits_precision();
        if a.bits_precision() == bits {
            a.clone()
        } else if a.bits_precision() < bits {
            a.widen(bits)
        } else {
            a.shorten(bits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::uint_from;

    fn small_group() -> ModGroup {
        // 23 = 2*11 + 1 is a safe prime
        ModGroup::new(&uint_from(23, 64)).unwrap()
    }

    #[test]
    fn rejects_even_modulus() {
        assert!(ModGroup::new(&uint_from(24, 64)).is_err());
    }

    #[test]
    fn modular_ops_match_hand_computation() {
        let g = small_group();
        assert_eq!(g.add(&uint_from(20, 64), &uint_from(5, 64)), uint_from(2, 64));
        assert_eq!(g.sub(&uint_from(3, 64), &uint_from(5, 64)), uint_from(21, 64));
        assert_eq!(g.mul(&uint_from(7, 64), &uint_from(8, 64)), uint_from(10, 64));
        // 2^11 = 2048 = 89*23 + 1
        assert_eq!(g.pow(&uint_from(2, 64), &uint_from(11, 64)), uint_from(1, 64));
    }

    #[test]
    fn inversion_round_trips() {
        let g = small_group();
        let a = uint_from(9, 64);
        let inv = g.invert(&a).unwrap();
        assert_eq!(g.mul(&a, &inv), g.one());
    }

    #[test]
    fn reduce_handles_wide_values() {
        let g = small_group();
        let wide = uint_from(1000, 256);
        assert_eq!(g.reduce(&wide), uint_from(1000 % 23, 64));
    }
}
