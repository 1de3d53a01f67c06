pub mod trapdoor;

use crypto_bigint::BoxedUint;
use serde::{Deserialize, Serialize};

use crate::arith::random::SecureRng;
use crate::domain::Domain;
use crate::error::{MpcError, MpcResult};
use crate::transcript::Shash;
use crate::wire;

pub use trapdoor::TrapdoorCommitment;

const LOG_TARGET: &str = "mental_mpc::commitment";

/// Vector Pedersen commitment `c = g_1^{m_1} ··· g_n^{m_n} · h^r mod p`
/// over a short-subgroup domain (the [Gr05] variation of [Pe92]).
///
/// The blinding base `h` starts out as the domain's canonical auxiliary
/// generator and can be replaced, together with `g_1..g_n`, by the
/// public-coin setup when the commitment key must be verifiably fresh.
#[derive(Clone, Debug)]
pub struct PedersenCommitment {
    domain: Domain,
    h: BoxedUint,
    generators: Vec<BoxedUint>,
}

/// Serialized commitment key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitmentKey {
    pub domain: crate::domain::DomainParams,
    pub h: String,
    pub generators: Vec<String>,
}

impl PedersenCommitment {
    /// Fresh scheme over a new short-subgroup domain, with `n` message
    /// generators derived by hashing into the subgroup.
    pub fn generate(
        rng: &mut SecureRng,
        n: usize,
        field_bits: u32,
        subgroup_bits: u32,
    ) -> MpcResult<Self> {
        if n == 0 {
            return Err(MpcError::invalid("at least one generator required"));
        }
        let domain = Domain::generate_subgroup(rng, field_bits, subgroup_bits)?;
        Ok(Self::from_domain(domain, n))
    }

    /// Scheme over an existing domain; generators are derived
    /// deterministically from the domain itself.
    pub fn from_domain(domain: Domain, n: usize) -> Self {
        let h = domain.h().clone();
        let g = domain.g().clone();
        let mut scheme = Self {
            domain,
            h,
            generators: Vec::new(),
        };
        let seed = scheme.derivation_seed(&g);
        scheme.generators = scheme.derive_chain("commitment/ggen", &seed, n);
        scheme
    }

    /// Re-derives `h` (unless `without_h`) and all message generators from
    /// the public coin `a`, so every party can check the key is fresh.
    pub fn setup_generators_publiccoin(&mut self, a: &BoxedUint, without_h: bool) {
        let n = self.generators.len();
        let seed = self.derivation_seed(a);
        if without_h {
            self.generators = self.derive_chain("commitment/hggen", &seed, n);
        } else {
            let mut chain = self.derive_chain("commitment/hggen", &seed, n + 1);
            self.h = chain.remove(0);
            self.generators = chain;
        }
        tracing::debug!(target: LOG_TARGET, n, without_h, "public-coin generator setup");
    }

    /// Distributed variant: the seed coin comes from an EDCF run, so no
    /// party can bias the resulting generators.
    pub async fn setup_generators_publiccoin_distributed(
        &mut self,
        without_h: bool,
        edcf: &mut crate::vss::Edcf,
        aiou: &mut crate::transport::SecureUnicast,
        rbc: &mut crate::broadcast::ReliableBroadcast,
    ) -> MpcResult<()> {
        rbc.set_id(&format!(
            "commitment/setup-publiccoin|{}|{}",
            self.generators.len(),
            without_h
        ));
        let coin = edcf.flip(aiou, rbc).await;
        rbc.unset_id();
        self.setup_generators_publiccoin(&coin?, without_h);
        Ok(())
    }

    fn derivation_seed(&self, a: &BoxedUint) -> Vec<BoxedUint> {
        vec![self.domain.p().clone(), self.domain.q().clone(), a.clone()]
    }

    /// Hash chain into the subgroup, rejecting the weak values 0, 1, p-1.
    fn derive_chain(&self, tag: &str, seed: &[BoxedUint], count: usize) -> Vec<BoxedUint> {
        let zp = self.domain.zp();
        let one = zp.one();
        let p_minus_1 = self.domain.p().wrapping_sub(&one);
        let mut chain: Vec<BoxedUint> = seed.to_vec();
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let digest = {
                let mut sh = Shash::new(tag);
                for v in &chain {
                    sh = sh.absorb_uint(v);
                }
                sh.finish_uint(zp.bits_precision())
            };
            let candidate = zp.pow(&digest, self.domain.k());
            chain.push(candidate.clone());
            if candidate > one && candidate < p_minus_1 {
                out.push(candidate);
            }
        }
        out
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn h(&self) -> &BoxedUint {
        &self.h
    }

    pub fn generators(&self) -> &[BoxedUint] {
        &self.generators
    }

    /// Soundness of the whole commitment key: domain parameters plus
    /// order, non-triviality and pairwise distinctness of all bases.
    pub fn check_group(&self, rng: &mut SecureRng) -> MpcResult<()> {
        self.domain.check_group(rng)?;
        let zp = self.domain.zp();
        let one = zp.one();
        let p_minus_1 = self.domain.p().wrapping_sub(&one);
        let mut bases = self.generators.clone();
        bases.push(self.h.clone());
        for b in &bases {
            if b <= &one || b >= &p_minus_1 {
                return Err(MpcError::domain("trivial commitment base"));
            }
            if !zp.is_one(&zp.pow(b, self.domain.q())) {
                return Err(MpcError::domain("commitment base not of order q"));
            }
        }
        for i in 0..bases.len() {
            for j in i + 1..bases.len() {
                if bases[i] == bases[j] {
                    return Err(MpcError::domain("duplicate commitment bases"));
                }
            }
        }
        Ok(())
    }

    /// Commits to `m_1..m_k` (`k ≤ n`) with fresh randomness; returns
    /// `(c, r)`.
    pub fn commit(&self, rng: &mut SecureRng, m: &[BoxedUint]) -> MpcResult<(BoxedUint, BoxedUint)> {
        let r = rng.below(self.domain.q());
        let c = self.commit_with(&r, m)?;
        Ok((c, r))
    }

    /// Commitment under caller-chosen randomness `r < q`.
    pub fn commit_with(&self, r: &BoxedUint, m: &[BoxedUint]) -> MpcResult<BoxedUint> {
        if m.len() > self.generators.len() {
            return Err(MpcError::invalid("too many messages for commitment key"));
        }
        if !self.domain.zq().contains(r) {
            return Err(MpcError::invalid("commitment randomizer out of range"));
        }
        let zp = self.domain.zp();
        let mut c = zp.pow(&self.h, r);
        for (base, msg) in self.generators.iter().zip(m) {
            c = zp.mul(&c, &zp.pow(base, msg));
        }
        Ok(c)
    }

    /// `0 < c < p`.
    pub fn test_membership(&self, c: &BoxedUint) -> bool {
        !bool::from(c.is_zero()) && c.bits() <= self.domain.p().bits() && {
            let c = self.domain.zp().reduce(c);
            !bool::from(c.is_zero())
        }
    }

    pub fn verify(&self, c: &BoxedUint, r: &BoxedUint, m: &[BoxedUint]) -> MpcResult<()> {
        if !self.domain.zq().contains(r) {
            return Err(MpcError::crypto("commitment randomizer out of range"));
        }
        if !self.test_membership(c) {
            return Err(MpcError::crypto("commitment outside Z_p"));
        }
        let expected = self.commit_with(r, m)?;
        if self.domain.zp().reduce(c) != expected {
            return Err(MpcError::crypto("commitment mismatch"));
        }
        Ok(())
    }

    pub fn to_key(&self) -> CommitmentKey {
        CommitmentKey {
            domain: self.domain.to_params(),
            h: wire::encode(&self.h),
            generators: self.generators.iter().map(wire::encode).collect(),
        }
    }

    pub fn from_key(key: &CommitmentKey) -> MpcResult<Self> {
        let domain = Domain::from_params(&key.domain)?;
        let precision = domain.bits_precision();
        let h = wire::decode(&key.h, precision)?;
        let generators = key
            .generators
            .iter()
            .map(|s| wire::decode(s, precision))
            .collect::<MpcResult<Vec<_>>>()?;
        Ok(Self {
            domain,
            h,
            generators,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::uint_from;
    use crate::config::Strength;

    fn scheme(n: usize) -> (PedersenCommitment, SecureRng) {
        let mut rng = SecureRng::new(Strength::Weak);
        let scheme = PedersenCommitment::generate(&mut rng, n, 192, 64).unwrap();
        (scheme, rng)
    }

    #[test]
    fn fresh_key_passes_check() {
        let (scheme, mut rng) = scheme(3);
        scheme.check_group(&mut rng).unwrap();
    }

    #[test]
    fn commit_verify_round_trip() {
        let (scheme, mut rng) = scheme(3);
        let m: Vec<_> = [5u64, 7, 11]
            .iter()
            .map(|&v| uint_from(v, scheme.domain().bits_precision()))
            .collect();
        let (c, r) = scheme.commit(&mut rng, &m).unwrap();
        scheme.verify(&c, &r, &m).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_opening() {
        let (scheme, mut rng) = scheme(2);
        let bits = scheme.domain().bits_precision();
        let m = vec![uint_from(5, bits), uint_from(7, bits)];
        let (c, r) = scheme.commit(&mut rng, &m).unwrap();

        let bad_m = vec![uint_from(5, bits), uint_from(8, bits)];
        assert!(scheme.verify(&c, &r, &bad_m).is_err());

        let bad_r = scheme.domain().zq().add(&r, &scheme.domain().zq().one());
        assert!(scheme.verify(&c, &bad_r, &m).is_err());

        // r >= q must be rejected outright
        let huge_r = scheme.domain().q().clone();
        assert!(scheme.verify(&c, &huge_r, &m).is_err());
    }

    #[test]
    fn public_coin_setup_is_deterministic() {
        let (mut a_scheme, mut rng) = scheme(2);
        let mut b_scheme = a_scheme.clone();
        let coin = rng.below(a_scheme.domain().q());
        a_scheme.setup_generators_publiccoin(&coin, false);
        b_scheme.setup_generators_publiccoin(&coin, false);
        assert_eq!(a_scheme.h(), b_scheme.h());
        assert_eq!(a_scheme.generators(), b_scheme.generators());
        a_scheme.check_group(&mut rng).unwrap();
    }

    #[test]
    fn homomorphic_addition() {
        let (scheme, mut rng) = scheme(2);
        let bits = scheme.domain().bits_precision();
        let zq = scheme.domain().zq().clone();
        let m1 = vec![uint_from(3, bits), uint_from(4, bits)];
        let m2 = vec![uint_from(10, bits), uint_from(20, bits)];
        let (c1, r1) = scheme.commit(&mut rng, &m1).unwrap();
        let (c2, r2) = scheme.commit(&mut rng, &m2).unwrap();
        let c_sum = scheme.domain().zp().mul(&c1, &c2);
        let r_sum = zq.add(&r1, &r2);
        let m_sum: Vec<_> = m1.iter().zip(&m2).map(|(a, b)| zq.add(a, b)).collect();
        scheme.verify(&c_sum, &r_sum, &m_sum).unwrap();
    }
}
