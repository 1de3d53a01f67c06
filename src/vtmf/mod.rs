pub mod chaum_pedersen;

use crypto_bigint::BoxedUint;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::arith::random::SecureRng;
use crate::config::Strength;
use crate::domain::Domain;
use crate::error::{MpcError, MpcResult};
use crate::transcript::Shash;

pub use chaum_pedersen::ChaumPedersenProof;

const LOG_TARGET: &str = "mental_mpc::vtmf";

/// ElGamal ciphertext `(c1, c2) = (g^r, m·h^r)` over the domain subgroup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElGamalCiphertext {
    #[serde(with = "crate::crypto_serde::uint")]
    pub c1: BoxedUint,
    #[serde(with = "crate::crypto_serde::uint")]
    pub c2: BoxedUint,
}

/// A party's public key share with its Schnorr-style proof of knowledge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyShareProof {
    #[serde(with = "crate::crypto_serde::uint")]
    pub public_share: BoxedUint,
    #[serde(with = "crate::crypto_serde::uint")]
    pub challenge: BoxedUint,
    #[serde(with = "crate::crypto_serde::uint")]
    pub response: BoxedUint,
}

/// A party's decryption share `d_i = c1^{x_i}` with the equality proof
/// `log_{c1} d_i = log_g h_i`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecryptionShare {
    #[serde(with = "crate::crypto_serde::uint")]
    pub share: BoxedUint,
    #[serde(with = "crate::crypto_serde::uint")]
    pub public_share: BoxedUint,
    pub proof: ChaumPedersenProof,
}

/// Verifiable l-out-of-l threshold masking function over a QR domain.
///
/// Every party contributes a key share; masking and remasking work under
/// the aggregated key `h = Π h_i`, decryption requires a verified share
/// from every contributor.
pub struct Vtmf {
    domain: Domain,
    secret: Zeroizing<BoxedUint>,
    public_share: BoxedUint,
    public_key: BoxedUint,
    rng: SecureRng,
}

impl Vtmf {
    /// Generates the local key share. `strength` selects the randomness
    /// tier for the long-term secret.
    pub fn new(domain: Domain, strength: Strength) -> MpcResult<Self> {
        let mut rng = SecureRng::new(strength);
        let secret = rng.below(domain.q());
        let public_share = domain.zp().pow(domain.g(), &secret);
        let public_key = public_share.clone();
        tracing::debug!(target: LOG_TARGET, "generated key share");
        Ok(Self {
            domain,
            secret: Zeroizing::new(secret),
            public_share,
            public_key,
            rng: SecureRng::new(Strength::Strong),
        })
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Aggregated public key `h`.
    pub fn public_key(&self) -> &BoxedUint {
        &self.public_key
    }

    pub fn public_share(&self) -> &BoxedUint {
        &self.public_share
    }

    /// Publishes the local key share with a proof of knowledge of `x_i`.
    pub fn publish_key(&mut self) -> KeyShareProof {
        let zp = self.domain.zp();
        let zq = self.domain.zq();
        let v = self.rng.below(self.domain.q());
        let t = zp.pow(self.domain.g(), &v);
        let challenge = key_challenge(&self.domain, &self.public_share, &t);
        // r = v - c·x_i mod q
        let response = zq.sub(&v, &zq.mul(&challenge, &self.secret));
        KeyShareProof {
            public_share: self.public_share.clone(),
            challenge,
            response,
        }
    }

    /// Verifies another party's key share proof and aggregates it into the
    /// joint public key.
    pub fn update_key(&mut self, proof: &KeyShareProof) -> MpcResult<()> {
        let zp = self.domain.zp();
        let zq = self.domain.zq();
        if !zq.contains(&proof.challenge) || !zq.contains(&proof.response) {
            return Err(MpcError::crypto("key proof scalar out of range"));
        }
        if !self.domain.check_element(&proof.public_share) {
            return Err(MpcError::crypto("key share outside the subgroup"));
        }
        let share = zp.reduce(&proof.public_share);
        let c = zq.reduce(&proof.challenge);
        let r = zq.reduce(&proof.response);
        // t' = g^r · h_i^c
        let t = zp.mul(&zp.pow(self.domain.g(), &r), &zp.pow(&share, &c));
        if key_challenge(&self.domain, &share, &t) != c {
            tracing::warn!(target: LOG_TARGET, "key share proof rejected");
            return Err(MpcError::crypto("key share proof rejected"));
        }
        self.public_key = zp.mul(&self.public_key, &share);
        Ok(())
    }

    /// Masks a group element: `(c1, c2) = (g^r, m·h^r)`. Returns the
    /// ciphertext and the masking value `r` (needed for the proof).
    pub fn mask(&mut self, m: &BoxedUint) -> (ElGamalCiphertext, BoxedUint) {
        let zp = self.domain.zp();
        let r = self.rng.below(self.domain.q());
        let c1 = zp.pow(self.domain.g(), &r);
        let c2 = zp.mul(m, &zp.pow(&self.public_key, &r));
        (ElGamalCiphertext { c1, c2 }, r)
    }

    /// Proof for [`Vtmf::mask`]: `CP(c1, c2/m; g, h)`.
    pub fn prove_mask(
        &mut self,
        m: &BoxedUint,
        ct: &ElGamalCiphertext,
        r: &BoxedUint,
    ) -> MpcResult<ChaumPedersenProof> {
        let zp = self.domain.zp();
        let m_inv = zp
            .invert(m)
            .ok_or_else(|| MpcError::invalid("plaintext not invertible"))?;
        let y = zp.mul(&ct.c2, &m_inv);
        Ok(ChaumPedersenProof::prove(
            &self.domain,
            &mut self.rng,
            &ct.c1,
            &y,
            self.domain.g(),
            &self.public_key,
            r,
        ))
    }

    pub fn verify_mask(
        &self,
        m: &BoxedUint,
        ct: &ElGamalCiphertext,
        proof: &ChaumPedersenProof,
    ) -> MpcResult<()> {
        let zp = self.domain.zp();
        let m_inv = zp
            .invert(m)
            .ok_or_else(|| MpcError::invalid("plaintext not invertible"))?;
        let y = zp.mul(&ct.c2, &m_inv);
        proof.verify(&self.domain, &ct.c1, &y, self.domain.g(), &self.public_key)
    }

    /// Re-randomizes a ciphertext without changing the plaintext.
    pub fn remask(&mut self, ct: &ElGamalCiphertext) -> (ElGamalCiphertext, BoxedUint) {
        let r = self.rng.below(self.domain.q());
        (self.remask_with(ct, &r), r)
    }

    /// Re-randomization with a caller-chosen masking value.
    pub fn remask_with(&self, ct: &ElGamalCiphertext, r: &BoxedUint) -> ElGamalCiphertext {
        let zp = self.domain.zp();
        ElGamalCiphertext {
            c1: zp.mul(&ct.c1, &zp.pow(self.domain.g(), r)),
            c2: zp.mul(&ct.c2, &zp.pow(&self.public_key, r)),
        }
    }

    /// Proof for [`Vtmf::remask`]: `CP(c1'/c1, c2'/c2; g, h)`.
    pub fn prove_remask(
        &mut self,
        before: &ElGamalCiphertext,
        after: &ElGamalCiphertext,
        r: &BoxedUint,
    ) -> MpcResult<ChaumPedersenProof> {
        let (x, y) = self.remask_statement(before, after)?;
        Ok(ChaumPedersenProof::prove(
            &self.domain,
            &mut self.rng,
            &x,
            &y,
            self.domain.g(),
            &self.public_key,
            r,
        ))
    }

    pub fn verify_remask(
        &self,
        before: &ElGamalCiphertext,
        after: &ElGamalCiphertext,
        proof: &ChaumPedersenProof,
    ) -> MpcResult<()> {
        let (x, y) = self.remask_statement(before, after)?;
        proof.verify(&self.domain, &x, &y, self.domain.g(), &self.public_key)
    }

    fn remask_statement(
        &self,
        before: &ElGamalCiphertext,
        after: &ElGamalCiphertext,
    ) -> MpcResult<(BoxedUint, BoxedUint)> {
        let zp = self.domain.zp();
        let c1_inv = zp
            .invert(&before.c1)
            .ok_or_else(|| MpcError::crypto("ciphertext component not invertible"))?;
        let c2_inv = zp
            .invert(&before.c2)
            .ok_or_else(|| MpcError::crypto("ciphertext component not invertible"))?;
        Ok((zp.mul(&after.c1, &c1_inv), zp.mul(&after.c2, &c2_inv)))
    }

    /// Produces this party's decryption share for `ct` with its proof.
    pub fn decrypt_share(&mut self, ct: &ElGamalCiphertext) -> DecryptionShare {
        let zp = self.domain.zp();
        let share = zp.pow(&ct.c1, &self.secret);
        let proof = ChaumPedersenProof::prove(
            &self.domain,
            &mut self.rng,
            &share,
            &self.public_share,
            &ct.c1,
            self.domain.g(),
            &self.secret,
        );
        DecryptionShare {
            share,
            public_share: self.public_share.clone(),
            proof,
        }
    }

    /// Starts joint decryption of `ct` with the local share.
    pub fn decrypt_init(&self, ct: &ElGamalCiphertext) -> DecryptAccumulator {
        let d = self.domain.zp().pow(&ct.c1, &self.secret);
        DecryptAccumulator {
            c1: ct.c1.clone(),
            acc: d,
        }
    }
}

/// Accumulates verified decryption shares into `d = Π d_j`.
pub struct DecryptAccumulator {
    c1: BoxedUint,
    acc: BoxedUint,
}

impl DecryptAccumulator {
    /// Verifies a peer's share against its public key share and folds it
    /// into the accumulator.
    pub fn update(&mut self, vtmf: &Vtmf, share: &DecryptionShare) -> MpcResult<()> {
        share
            .proof
            .verify(
                vtmf.domain(),
                &share.share,
                &share.public_share,
                &self.c1,
                vtmf.domain().g(),
            )
            .map_err(|_| MpcError::crypto("decryption share proof rejected"))?;
        self.acc = vtmf.domain().zp().mul(&self.acc, &share.share);
        Ok(())
    }

    /// Recovers the plaintext `m = c2 · d^{-1} mod p`.
    pub fn finalize(&self, vtmf: &Vtmf, ct: &ElGamalCiphertext) -> MpcResult<BoxedUint> {
        let zp = vtmf.domain().zp();
        let inv = zp
            .invert(&self.acc)
            .ok_or_else(|| MpcError::crypto("decryption accumulator not invertible"))?;
        Ok(zp.mul(&ct.c2, &inv))
    }
}

fn key_challenge(domain: &Domain, share: &BoxedUint, t: &BoxedUint) -> BoxedUint {
    Shash::new("vtmf/key_pok_v1")
        .absorb_uint(domain.p())
        .absorb_uint(domain.q())
        .absorb_uint(domain.g())
        .absorb_uint(share)
        .absorb_uint(t)
        .finish_mod(domain.zq())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joint_setup(n: usize) -> Vec<Vtmf> {
        let mut rng = SecureRng::new(Strength::Weak);
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        let mut parties: Vec<Vtmf> = (0..n)
            .map(|_| Vtmf::new(domain.clone(), Strength::Weak).unwrap())
            .collect();
        let proofs: Vec<KeyShareProof> = parties.iter_mut().map(|p| p.publish_key()).collect();
        for i in 0..n {
            for (j, proof) in proofs.iter().enumerate() {
                if i != j {
                    parties[i].update_key(proof).unwrap();
                }
            }
        }
        parties
    }

    #[test]
    fn joint_keys_agree() {
        let parties = joint_setup(3);
        for p in &parties[1..] {
            assert_eq!(p.public_key(), parties[0].public_key());
        }
    }

    #[test]
    fn bad_key_proof_rejected() {
        let mut parties = joint_setup(2);
        let mut proof = parties[0].publish_key();
        let one = parties[0].domain().zq().one();
        proof.response = parties[0].domain().zq().add(&proof.response, &one);
        assert!(parties[1].update_key(&proof).is_err());
    }

    #[test]
    fn mask_prove_verify_round_trip() {
        let mut parties = joint_setup(2);
        let m = parties[0].domain().index_element(4);
        let (ct, r) = parties[0].mask(&m);
        let proof = parties[0].prove_mask(&m, &ct, &r).unwrap();
        parties[1].verify_mask(&m, &ct, &proof).unwrap();

        // wrong message must fail
        let m2 = parties[0].domain().index_element(5);
        assert!(parties[1].verify_mask(&m2, &ct, &proof).is_err());
    }

    #[test]
    fn remask_prove_verify_round_trip() {
        let mut parties = joint_setup(2);
        let m = parties[0].domain().index_element(7);
        let (ct, _) = parties[0].mask(&m);
        let (ct2, r) = parties[0].remask(&ct);
        let proof = parties[0].prove_remask(&ct, &ct2, &r).unwrap();
        parties[1].verify_remask(&ct, &ct2, &proof).unwrap();

        let mut bad = ct2.clone();
        bad.c2 = parties[0].domain().zp().mul(&bad.c2, parties[0].domain().g());
        assert!(parties[1].verify_remask(&ct, &bad, &proof).is_err());
    }

    #[test]
    fn threshold_decrypt_recovers_plaintext() {
        let mut parties = joint_setup(3);
        let m = parties[0].domain().index_element(4);
        let (ct, _) = parties[0].mask(&m);

        let share1 = parties[1].decrypt_share(&ct);
        let share2 = parties[2].decrypt_share(&ct);

        let mut acc = parties[0].decrypt_init(&ct);
        acc.update(&parties[0], &share1).unwrap();
        acc.update(&parties[0], &share2).unwrap();
        let recovered = acc.finalize(&parties[0], &ct).unwrap();
        assert_eq!(recovered, m);
    }

    #[test]
    fn two_party_mask_of_four_round_trips() {
        // 4 = 2^2 is a quadratic residue for every p, so the literal
        // value is a valid group element
        let mut parties = joint_setup(2);
        let m = crate::arith::uint_from(4, parties[0].domain().bits_precision());
        assert!(parties[0].domain().check_element(&m));
        let (ct, _) = parties[0].mask(&m);

        let share = parties[1].decrypt_share(&ct);
        let mut acc = parties[0].decrypt_init(&ct);
        acc.update(&parties[0], &share).unwrap();
        assert_eq!(acc.finalize(&parties[0], &ct).unwrap(), m);
    }

    #[test]
    fn decrypt_after_remask_recovers_plaintext() {
        let mut parties = joint_setup(2);
        let m = parties[0].domain().index_element(4);
        let (ct, _) = parties[0].mask(&m);
        let (ct2, _) = parties[1].remask(&ct);

        let share = parties[1].decrypt_share(&ct2);
        let mut acc = parties[0].decrypt_init(&ct2);
        acc.update(&parties[0], &share).unwrap();
        assert_eq!(acc.finalize(&parties[0], &ct2).unwrap(), m);
    }

    #[test]
    fn tampered_decryption_share_rejected() {
        let mut parties = joint_setup(2);
        let m = parties[0].domain().index_element(2);
        let (ct, _) = parties[0].mask(&m);
        let mut share = parties[1].decrypt_share(&ct);
        share.share = parties[0].domain().zp().mul(&share.share, parties[0].domain().g());
        let mut acc = parties[0].decrypt_init(&ct);
        assert!(acc.update(&parties[0], &share).is_err());
    }
}
