use crypto_bigint::{BoxedUint, Integer};
use crypto_primes::{generate_prime_with_rng, generate_safe_prime_with_rng, is_prime_with_rng};

use crate::arith::random::SecureRng;
use crate::error::{MpcError, MpcResult};

/// Generates a safe prime `p = 2q + 1` with `p ≡ 7 (mod 8)`, so that `2`
/// generates the subgroup of quadratic residues mod `p`.
///
/// Returns `(p, q)` at `bits` precision.
pub fn safe_prime_for_qr(rng: &mut SecureRng, bits: u32) -> MpcResult<(BoxedUint, BoxedUint)> {
    if bits < 16 {
        return Err(MpcError::invalid("field size too small"));
    }
    loop {
        let p: BoxedUint = generate_safe_prime_with_rng(rng.core(), bits);
        if p.as_words()[0] & 7 != 7 {
            continue;
        }
        let one = BoxedUint::one_with_precision(p.bits_precision());
        let q = p.wrapping_sub(&one).shr(1);
        return Ok((p, q));
    }
}

/// Generates `(p, q, k)` with `p = kq + 1`, both prime, `q` of `q_bits`
/// and `p` of at least `p_bits` bits. Used by the commitment domains,
/// where a short subgroup keeps exponents small.
///
/// All three values are returned at the precision of `p`.
pub fn subgroup_prime(
    rng: &mut SecureRng,
    p_bits: u32,
    q_bits: u32,
) -> MpcResult<(BoxedUint, BoxedUint, BoxedUint)> {
    if q_bits < 16 || p_bits <= q_bits + 8 {
        return Err(MpcError::invalid("bad field/subgroup sizes"));
    }
    let q: BoxedUint = generate_prime_with_rng(rng.core(), q_bits);
    let q = q.widen(p_bits);
    let one = BoxedUint::one_with_precision(p_bits);
    loop {
        // even cofactor k of at most p_bits - q_bits bits; clearing the
        // low bit keeps the product q·k inside the precision
        let mut k = rng.bits(p_bits - q_bits, p_bits);
        if bool::from(k.is_odd()) {
            k = k.wrapping_sub(&one);
        }
        if bool::from(k.is_zero()) {
            continue;
        }
        let p = q.wrapping_mul(&k).wrapping_add(&one);
        if p.bits() < p_bits {
            continue;
        }
        if is_prime_with_rng(rng.core(), &p) {
            return Ok((p, q, k));
        }
    }
}

/// Probable-primality check at the strength used by the group validators.
pub fn is_probable_prime(rng: &mut SecureRng, candidate: &BoxedUint) -> bool {
    if bool::from(candidate.is_zero()) {
        return false;
    }
    is_prime_with_rng(rng.core(), candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Strength;

    #[test]
    fn safe_prime_has_required_form() {
        let mut rng = SecureRng::new(Strength::Weak);
        let (p, q) = safe_prime_for_qr(&mut rng, 128).unwrap();
        assert_eq!(p.as_words()[0] & 7, 7);
        let one = BoxedUint::one_with_precision(p.bits_precision());
        let two = crate::arith::uint_from(2, p.bits_precision());
        assert_eq!(q.wrapping_mul(&two).wrapping_add(&one), p);
        assert!(is_probable_prime(&mut rng, &p));
        assert!(is_probable_prime(&mut rng, &q));
    }

    #[test]
    fn subgroup_prime_has_required_form() {
        let mut rng = SecureRng::new(Strength::Weak);
        let (p, q, k) = subgroup_prime(&mut rng, 192, 64).unwrap();
        let one = BoxedUint::one_with_precision(p.bits_precision());
        assert_eq!(q.wrapping_mul(&k).wrapping_add(&one), p);
        assert!(p.bits() >= 192);
        assert!(is_probable_prime(&mut rng, &p));
        assert!(is_probable_prime(&mut rng, &q));
    }
}
