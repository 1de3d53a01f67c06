use crypto_bigint::BoxedUint;
use zeroize::Zeroizing;

use crate::arith::random::SecureRng;
use crate::domain::Domain;
use crate::error::{MpcError, MpcResult};
use crate::transcript::Shash;

/// Trapdoor commitment of [JL00], built on Pedersen's scheme: the
/// committer binds to `H(m)` under `c = g^{H(m) mod q} · h^r mod p`, while
/// the key holder knows `σ` with `h = g^σ` and can equivocate in
/// simulation.
pub struct TrapdoorCommitment {
    domain: Domain,
    h: BoxedUint,
    sigma: Option<Zeroizing<BoxedUint>>,
}

impl TrapdoorCommitment {
    /// Key-holder constructor: samples the trapdoor `σ` and publishes
    /// `h = g^σ`.
    pub fn generate(domain: Domain, rng: &mut SecureRng) -> Self {
        let sigma = rng.below(domain.q());
        let h = domain.zp().pow(domain.g(), &sigma);
        Self {
            domain,
            h,
            sigma: Some(Zeroizing::new(sigma)),
        }
    }

    /// Verifier-side constructor: the trapdoor stays unknown.
    pub fn verify_only(domain: Domain, h: BoxedUint) -> Self {
        Self {
            domain,
            h,
            sigma: None,
        }
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Public key `h = g^σ`.
    pub fn h(&self) -> &BoxedUint {
        &self.h
    }

    /// The trapdoor, for the party that generated the key.
    pub fn trapdoor(&self) -> Option<&BoxedUint> {
        self.sigma.as_deref()
    }

    /// Structural checks on `(p, q, g, h)` mirroring the vector scheme.
    pub fn check_group(&self, rng: &mut SecureRng) -> MpcResult<()> {
        self.domain.check_group(rng)?;
        let zp = self.domain.zp();
        let one = zp.one();
        let p_minus_1 = self.domain.p().wrapping_sub(&one);
        if self.h <= one || self.h >= p_minus_1 {
            return Err(MpcError::domain("trapdoor base is trivial"));
        }
        if !zp.is_one(&zp.pow(&self.h, self.domain.q())) {
            return Err(MpcError::domain("trapdoor base not of order q"));
        }
        if &self.h == self.domain.g() {
            return Err(MpcError::domain("trapdoor base equals g"));
        }
        Ok(())
    }

    fn message_exponent(&self, m: &BoxedUint) -> BoxedUint {
        Shash::new("trapdoor_commitment/message_v1")
            .absorb_uint(m)
            .finish_mod(self.domain.zq())
    }

    /// Commits to `m`; returns `(c, r)`.
    pub fn commit(&self, rng: &mut SecureRng, m: &BoxedUint) -> (BoxedUint, BoxedUint) {
        let r = rng.below(self.domain.q());
        let c = self
            .commit_with(&r, m)
            .expect("freshly sampled randomizer is in range");
        (c, r)
    }

    pub fn commit_with(&self, r: &BoxedUint, m: &BoxedUint) -> MpcResult<BoxedUint> {
        if !self.domain.zq().contains(r) {
            return Err(MpcError::invalid("commitment randomizer out of range"));
        }
        let zp = self.domain.zp();
        let e = self.message_exponent(m);
        Ok(zp.mul(&zp.pow(self.domain.g(), &e), &zp.pow(&self.h, r)))
    }

    pub fn verify(&self, c: &BoxedUint, r: &BoxedUint, m: &BoxedUint) -> MpcResult<()> {
        if !self.domain.zq().contains(r) {
            return Err(MpcError::crypto("commitment randomizer out of range"));
        }
        if bool::from(c.is_zero()) || c.bits() > self.domain.p().bits() {
            return Err(MpcError::crypto("commitment outside Z_p"));
        }
        let expected = self.commit_with(r, m)?;
        if self.domain.zp().reduce(c) != expected {
            return Err(MpcError::crypto("commitment mismatch"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::uint_from;
    use crate::config::Strength;

    fn setup() -> (TrapdoorCommitment, SecureRng) {
        let mut rng = SecureRng::new(Strength::Weak);
        let domain = Domain::generate_subgroup(&mut rng, 192, 64).unwrap();
        (TrapdoorCommitment::generate(domain, &mut rng), rng)
    }

    #[test]
    fn commit_verify_round_trip() {
        let (scheme, mut rng) = setup();
        let m = uint_from(424242, 64);
        let (c, r) = scheme.commit(&mut rng, &m);
        scheme.verify(&c, &r, &m).unwrap();

        // verify-only instance accepts the same opening
        let verifier =
            TrapdoorCommitment::verify_only(scheme.domain().clone(), scheme.h().clone());
        verifier.verify(&c, &r, &m).unwrap();
        assert!(verifier.trapdoor().is_none());
    }

    #[test]
    fn wrong_message_rejected() {
        let (scheme, mut rng) = setup();
        let m = uint_from(5, 64);
        let (c, r) = scheme.commit(&mut rng, &m);
        assert!(scheme.verify(&c, &r, &uint_from(6, 64)).is_err());
    }

    #[test]
    fn trapdoor_matches_key() {
        let (scheme, _) = setup();
        let sigma = scheme.trapdoor().unwrap();
        let domain = scheme.domain();
        assert_eq!(&domain.zp().pow(domain.g(), sigma), scheme.h());
    }
}
