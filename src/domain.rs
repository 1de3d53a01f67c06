use crypto_bigint::{BoxedUint, Integer};
use serde::{Deserialize, Serialize};

use crate::arith::prime::{is_probable_prime, safe_prime_for_qr, subgroup_prime};
use crate::arith::random::SecureRng;
use crate::arith::{uint_from, ModGroup};
use crate::error::{MpcError, MpcResult};
use crate::transcript::Shash;
use crate::wire;

const LOG_TARGET: &str = "mental_mpc::domain";

/// Shared group parameters `(p, q, k, g, h)` with `p = kq + 1`, both
/// prime, `g` and `h` generators of the order-`q` subgroup of `Z_p^*`.
///
/// Two flavours exist:
///
/// * the QR domain (`k = 2`, `p ≡ 7 (mod 8)`, `g = 2`) used by the VTMF —
///   the subgroup is the full set of quadratic residues;
/// * the short-subgroup domain (`q` much smaller than `p`, canonical `g`)
///   used by the commitment schemes, where short exponents pay off.
///
/// `h` is always derived by deterministic hashing into the subgroup, so no
/// party knows `log_g h`.
#[derive(Clone, Debug)]
pub struct Domain {
    p: BoxedUint,
    q: BoxedUint,
    k: BoxedUint,
    g: BoxedUint,
    h: BoxedUint,
    zp: ModGroup,
    zq: ModGroup,
    canonical_g: bool,
    field_bits: u32,
    subgroup_bits: u32,
}

/// Serialized form of a domain (all values decimal strings, §6 wire style).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainParams {
    pub p: String,
    pub q: String,
    pub k: String,
    pub g: String,
    pub h: String,
    pub canonical_g: bool,
    pub field_bits: u32,
    pub subgroup_bits: u32,
}

impl Domain {
    /// Generates a fresh QR domain over a safe prime of `field_bits` bits.
    pub fn generate_qr(rng: &mut SecureRng, field_bits: u32) -> MpcResult<Self> {
        let (p, q) = safe_prime_for_qr(rng, field_bits)?;
        let k = uint_from(2, p.bits_precision());
        let g = uint_from(2, p.bits_precision());
        Self::assemble(p, q, k, g, false, field_bits, field_bits - 1)
    }

    /// Generates a short-subgroup domain `p = kq + 1` with a canonical `g`.
    pub fn generate_subgroup(
        rng: &mut SecureRng,
        field_bits: u32,
        subgroup_bits: u32,
    ) -> MpcResult<Self> {
        let (p, q, k) = subgroup_prime(rng, field_bits, subgroup_bits)?;
        let zp = ModGroup::new(&p)?;
        let g = derive_subgroup_element(&zp, &k, "domain/ggen", &[&p, &q]);
        Self::assemble(p, q, k, g, true, field_bits, subgroup_bits)
    }

    /// Rebuilds a domain from received parameters. Only structural
    /// well-formedness is verified here; run [`Domain::check_group`]
    /// before trusting the result.
    pub fn from_params(params: &DomainParams) -> MpcResult<Self> {
        let precision = params.field_bits.max(64).next_multiple_of(64);
        let p = wire::decode(&params.p, precision)?;
        let q = wire::decode(&params.q, precision)?;
        let k = wire::decode(&params.k, precision)?;
        let g = wire::decode(&params.g, precision)?;
        let h = wire::decode(&params.h, precision)?;
        let zp = ModGroup::new(&p)?;
        let zq = ModGroup::new(&q)?;
        Ok(Self {
            p,
            q,
            k,
            g,
            h,
            zp,
            zq,
            canonical_g: params.canonical_g,
            field_bits: params.field_bits,
            subgroup_bits: params.subgroup_bits,
        })
    }

    fn assemble(
        p: BoxedUint,
        q: BoxedUint,
        k: BoxedUint,
        g: BoxedUint,
        canonical_g: bool,
        field_bits: u32,
        subgroup_bits: u32,
    ) -> MpcResult<Self> {
        let zp = ModGroup::new(&p)?;
        let zq = ModGroup::new(&q)?;
        let h = derive_subgroup_element(&zp, &k, "domain/hgen", &[&p, &q, &g]);
        Ok(Self {
            p,
            q,
            k,
            g,
            h,
            zp,
            zq,
            canonical_g,
            field_bits,
            subgroup_bits,
        })
    }

    pub fn p(&self) -> &BoxedUint {
        &self.p
    }

    pub fn q(&self) -> &BoxedUint {
        &self.q
    }

    pub fn g(&self) -> &BoxedUint {
        &self.g
    }

    /// Cofactor `k` with `p = kq + 1`.
    pub fn k(&self) -> &BoxedUint {
        &self.k
    }

    pub fn h(&self) -> &BoxedUint {
        &self.h
    }

    /// Arithmetic mod `p` (group elements).
    pub fn zp(&self) -> &ModGroup {
        &self.zp
    }

    /// Arithmetic mod `q` (exponents / scalars).
    pub fn zq(&self) -> &ModGroup {
        &self.zq
    }

    pub fn bits_precision(&self) -> u32 {
        self.p.bits_precision()
    }

    /// Full soundness check of the shared parameters; any tampering with
    /// `p`, `q`, `k`, `g` or `h` must be caught here.
    pub fn check_group(&self, rng: &mut SecureRng) -> MpcResult<()> {
        let fail = |what: &str| Err(MpcError::domain(what.to_string()));

        if self.p.bits() < self.field_bits || self.q.bits() < self.subgroup_bits {
            return fail("p or q below the required size");
        }
        // p = kq + 1, checked at widened precision so oversized received
        // values cannot wrap into a false match
        let one = self.zp.one();
        let prod = self.q.mul(&self.k);
        let one_wide = BoxedUint::one_with_precision(prod.bits_precision());
        if prod.wrapping_add(&one_wide) != self.p.widen(prod.bits_precision()) {
            return fail("p != kq + 1");
        }
        if !is_probable_prime(rng, &self.p) || !is_probable_prime(rng, &self.q) {
            return fail("p or q is composite");
        }
        // q must not divide k, so the subgroup order is exactly q
        if self.zq.is_zero(&self.k) {
            return fail("q divides k");
        }
        let p_minus_1 = self.p.wrapping_sub(&one);
        for (name, e) in [("g", &self.g), ("h", &self.h)] {
            if e <= &one || e >= &p_minus_1 {
                return fail(&format!("{name} is trivial"));
            }
            if !self.zp.is_one(&self.zp.pow(e, &self.q)) {
                return fail(&format!("{name} is not of order q"));
            }
        }
        if self.g == self.h {
            return fail("g equals h");
        }
        if bool::from(self.k.is_odd()) || self.k != uint_from(2, self.k.bits_precision()) {
            // general subgroup domain
            if self.canonical_g {
                let g2 = derive_subgroup_element(&self.zp, &self.k, "domain/ggen", &[
                    &self.p, &self.q,
                ]);
                if g2 != self.g {
                    return fail("g is not the canonical generator");
                }
            }
        } else {
            // QR domain: p ≡ 7 (mod 8) makes 2 a quadratic residue
            if self.p.as_words()[0] & 7 != 7 {
                return fail("p is not congruent 7 mod 8");
            }
        }
        let h2 = derive_subgroup_element(&self.zp, &self.k, "domain/hgen", &[
            &self.p, &self.q, &self.g,
        ]);
        if h2 != self.h {
            return fail("h is not the canonical auxiliary generator");
        }
        tracing::debug!(target: LOG_TARGET, "group parameters verified");
        Ok(())
    }

    /// Subgroup membership: `0 < a < p` and `a^q ≡ 1 (mod p)`.
    pub fn check_element(&self, a: &BoxedUint) -> bool {
        if bool::from(a.is_zero()) || a.bits() > self.p.bits() {
            return false;
        }
        let a = self.zp.reduce(a);
        if bool::from(a.is_zero()) || a >= self.p {
            return false;
        }
        self.zp.is_one(&self.zp.pow(&a, &self.q))
    }

    /// Uniformly random element of the subgroup (a square of a random
    /// non-zero residue).
    pub fn random_element(&self, rng: &mut SecureRng) -> BoxedUint {
        let r = rng.below_nonzero(&self.p);
        self.zp.mul(&r, &r)
    }

    /// The `index`-th smallest subgroup element; `index_element(0)` is the
    /// identity (1 is the smallest quadratic residue).
    ///
    /// Only meaningful on QR domains, where callers use it to encode small
    /// plaintexts as group elements.
    pub fn index_element(&self, index: usize) -> BoxedUint {
        let mut candidate = self.zp.zero();
        let one = self.zp.one();
        let mut remaining = index + 1;
        while remaining > 0 {
            candidate = candidate.add_mod(&one, &self.p);
            if self.check_element(&candidate) {
                remaining -= 1;
            }
        }
        candidate
    }

    pub fn to_params(&self) -> DomainParams {
        DomainParams {
            p: wire::encode(&self.p),
            q: wire::encode(&self.q),
            k: wire::encode(&self.k),
            g: wire::encode(&self.g),
            h: wire::encode(&self.h),
            canonical_g: self.canonical_g,
            field_bits: self.field_bits,
            subgroup_bits: self.subgroup_bits,
        }
    }

}

/// Hashes into the order-`q` subgroup: iterates a transcript chain until
/// `u^k mod p` lands strictly between 1 and `p - 1`. The same procedure
/// (FIPS 186-3 A.2.3 style) re-derives the element during verification.
fn derive_subgroup_element(
    zp: &ModGroup,
    k: &BoxedUint,
    tag: &str,
    seed: &[&BoxedUint],
) -> BoxedUint {
    let one = zp.one();
    let p_minus_1 = zp.modulus().wrapping_sub(&one);
    let mut chain: Vec<BoxedUint> = seed.iter().map(|v| (*v).clone()).collect();
    loop {
        let digest = {
            let mut sh = Shash::new(tag);
            for v in &chain {
                sh = sh.absorb_uint(v);
            }
            sh.finish_uint(zp.bits_precision())
        };
        let candidate = zp.pow(&digest, k);
        if candidate > one && candidate < p_minus_1 {
            return candidate;
        }
        chain.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Strength;

    fn test_rng() -> SecureRng {
        SecureRng::new(Strength::Weak)
    }

    pub(crate) fn small_qr_domain() -> Domain {
        let mut rng = test_rng();
        Domain::generate_qr(&mut rng, 128).unwrap()
    }

    #[test]
    fn fresh_qr_domain_passes_check() {
        let mut rng = test_rng();
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        domain.check_group(&mut rng).unwrap();
    }

    #[test]
    fn fresh_subgroup_domain_passes_check() {
        let mut rng = test_rng();
        let domain = Domain::generate_subgroup(&mut rng, 192, 64).unwrap();
        domain.check_group(&mut rng).unwrap();
    }

    #[test]
    fn tampered_parameters_fail_check() {
        let mut rng = test_rng();
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        let mut params = domain.to_params();
        params.g = wire::encode(&uint_from(4, 128));
        let bad = Domain::from_params(&params).unwrap();
        assert!(bad.check_group(&mut rng).is_err());

        let mut params2 = domain.to_params();
        let p_plus_2 = domain.p().wrapping_add(&uint_from(2, domain.bits_precision()));
        params2.p = wire::encode(&p_plus_2);
        let bad2 = Domain::from_params(&params2).unwrap();
        assert!(bad2.check_group(&mut rng).is_err());

        let mut params3 = domain.to_params();
        params3.h = wire::encode(&domain.zp().mul(domain.h(), domain.g()));
        let bad3 = Domain::from_params(&params3).unwrap();
        assert!(bad3.check_group(&mut rng).is_err());
    }

    #[test]
    fn round_trip_through_params() {
        let mut rng = test_rng();
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        let restored = Domain::from_params(&domain.to_params()).unwrap();
        restored.check_group(&mut rng).unwrap();
        assert_eq!(restored.g(), domain.g());
        assert_eq!(restored.h(), domain.h());
    }

    #[test]
    fn element_checks() {
        let domain = small_qr_domain();
        assert!(domain.check_element(&domain.zp().mul(domain.g(), domain.g())));
        // the identity is in the subgroup, zero is not an element
        assert!(domain.check_element(&domain.zp().one()));
        assert!(!domain.check_element(&domain.zp().zero()));
        let mut rng = test_rng();
        let r = domain.random_element(&mut rng);
        assert!(domain.check_element(&r));
    }

    #[test]
    fn index_element_enumerates_residues() {
        let domain = small_qr_domain();
        assert_eq!(domain.index_element(0), domain.zp().one());
        let e1 = domain.index_element(1);
        let e2 = domain.index_element(2);
        assert!(domain.check_element(&e1));
        assert!(domain.check_element(&e2));
        assert_ne!(e1, e2);
        assert_ne!(e1, domain.zp().one());
    }
}
