use crypto_bigint::BoxedUint;
use serde::{Deserialize, Serialize};

use crate::arith::random::SecureRng;
use crate::domain::Domain;
use crate::error::{MpcError, MpcResult};
use crate::transcript::Shash;

const LOG_TARGET: &str = "mental_mpc::vtmf::chaum_pedersen";

/// Chaum-Pedersen proof of discrete-logarithm equality:
/// `log_gg x = log_hh y` for public `(x, y, gg, hh)`.
///
/// Non-interactive via Fiat-Shamir; the challenge hashes the commitments
/// and the full statement in a fixed order, so flipping any transcript or
/// statement bit is caught either by the hash recheck or by the two group
/// equations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChaumPedersenProof {
    /// Commitment `a = gg^ω`
    #[serde(with = "crate::crypto_serde::uint")]
    pub a: BoxedUint,
    /// Commitment `b = hh^ω`
    #[serde(with = "crate::crypto_serde::uint")]
    pub b: BoxedUint,
    /// Challenge `c = shash(a, b, x, y, gg, hh) mod q`
    #[serde(with = "crate::crypto_serde::uint")]
    pub challenge: BoxedUint,
    /// Response `r = ω - c·α mod q`
    #[serde(with = "crate::crypto_serde::uint")]
    pub response: BoxedUint,
}

impl ChaumPedersenProof {
    /// Proves `x = gg^alpha` and `y = hh^alpha` for secret `alpha`.
    pub fn prove(
        domain: &Domain,
        rng: &mut SecureRng,
        x: &BoxedUint,
        y: &BoxedUint,
        gg: &BoxedUint,
        hh: &BoxedUint,
        alpha: &BoxedUint,
    ) -> Self {
        let zp = domain.zp();
        let zq = domain.zq();

        let omega = rng.below(domain.q());
        let a = zp.pow(gg, &omega);
        let b = zp.pow(hh, &omega);

        let challenge = Self::challenge(domain, &a, &b, x, y, gg, hh);

        // r = ω - c·α mod q
        let response = zq.sub(&omega, &zq.mul(&challenge, alpha));

        ChaumPedersenProof {
            a,
            b,
            challenge,
            response,
        }
    }

    pub fn verify(
        &self,
        domain: &Domain,
        x: &BoxedUint,
        y: &BoxedUint,
        gg: &BoxedUint,
        hh: &BoxedUint,
    ) -> MpcResult<()> {
        let zp = domain.zp();
        let zq = domain.zq();
        if !zq.contains(&self.challenge) || !zq.contains(&self.response) {
            return Err(MpcError::crypto("chaum-pedersen scalar out of range"));
        }
        let c = zq.reduce(&self.challenge);
        let r = zq.reduce(&self.response);
        let a = zp.reduce(&self.a);
        let b = zp.reduce(&self.b);
        let expected = Self::challenge(domain, &a, &b, x, y, gg, hh);
        if expected != c {
            tracing::debug!(target: LOG_TARGET, "challenge mismatch");
            return Err(MpcError::crypto("chaum-pedersen challenge mismatch"));
        }
        // gg^r · x^c = a  and  hh^r · y^c = b
        let lhs1 = zp.mul(&zp.pow(gg, &r), &zp.pow(x, &c));
        if lhs1 != a {
            return Err(MpcError::crypto("chaum-pedersen first equation failed"));
        }
        let lhs2 = zp.mul(&zp.pow(hh, &r), &zp.pow(y, &c));
        if lhs2 != b {
            return Err(MpcError::crypto("chaum-pedersen second equation failed"));
        }
        Ok(())
    }

    fn challenge(
        domain: &Domain,
        a: &BoxedUint,
        b: &BoxedUint,
        x: &BoxedUint,
        y: &BoxedUint,
        gg: &BoxedUint,
        hh: &BoxedUint,
    ) -> BoxedUint {
        Shash::new("chaum_pedersen/proof_v1")
            .absorb_uint(domain.p())
            .absorb_uint(domain.q())
            .absorb_uint(a)
            .absorb_uint(b)
            .absorb_uint(x)
            .absorb_uint(y)
            .absorb_uint(gg)
            .absorb_uint(hh)
            .finish_mod(domain.zq())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Strength;

    fn setup() -> (Domain, SecureRng) {
        let mut rng = SecureRng::new(Strength::Weak);
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        (domain, rng)
    }

    #[test]
    fn honest_proof_verifies() {
        let (domain, mut rng) = setup();
        let alpha = rng.below(domain.q());
        let x = domain.zp().pow(domain.g(), &alpha);
        let y = domain.zp().pow(domain.h(), &alpha);
        let proof =
            ChaumPedersenProof::prove(&domain, &mut rng, &x, &y, domain.g(), domain.h(), &alpha);
        proof.verify(&domain, &x, &y, domain.g(), domain.h()).unwrap();
    }

    #[test]
    fn tampered_transcript_rejects() {
        let (domain, mut rng) = setup();
        let alpha = rng.below(domain.q());
        let x = domain.zp().pow(domain.g(), &alpha);
        let y = domain.zp().pow(domain.h(), &alpha);
        let proof =
            ChaumPedersenProof::prove(&domain, &mut rng, &x, &y, domain.g(), domain.h(), &alpha);

        let one = domain.zq().one();
        let mut bad = proof.clone();
        bad.challenge = domain.zq().add(&bad.challenge, &one);
        assert!(bad.verify(&domain, &x, &y, domain.g(), domain.h()).is_err());

        let mut bad = proof.clone();
        bad.response = domain.zq().add(&bad.response, &one);
        assert!(bad.verify(&domain, &x, &y, domain.g(), domain.h()).is_err());

        let mut bad = proof.clone();
        bad.a = domain.zp().mul(&bad.a, domain.g());
        assert!(bad.verify(&domain, &x, &y, domain.g(), domain.h()).is_err());

        // wrong statement
        let x2 = domain.zp().mul(&x, domain.g());
        assert!(proof.verify(&domain, &x2, &y, domain.g(), domain.h()).is_err());
    }

    #[test]
    fn statement_order_changes_challenge() {
        let (domain, mut rng) = setup();
        let alpha = rng.below(domain.q());
        let x = domain.zp().pow(domain.g(), &alpha);
        let y = domain.zp().pow(domain.h(), &alpha);
        let c1 = ChaumPedersenProof::challenge(&domain, &x, &y, &x, &y, domain.g(), domain.h());
        let c2 = ChaumPedersenProof::challenge(&domain, &y, &x, &x, &y, domain.g(), domain.h());
        assert_ne!(c1, c2);
    }
}
