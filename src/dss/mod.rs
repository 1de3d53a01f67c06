use crypto_bigint::BoxedUint;
use serde::{Deserialize, Serialize};

use crate::broadcast::ReliableBroadcast;
use crate::config::Strength;
use crate::dkg::Dkg;
use crate::domain::Domain;
use crate::error::{MpcError, MpcResult};
use crate::transcript::Shash;
use crate::transport::SecureUnicast;
use crate::vss::{lagrange_at_zero, JointVss, VssMode, Zvss};

const LOG_TARGET: &str = "mental_mpc::dss";

/// DSA signature over the domain subgroup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DssSignature {
    #[serde(with = "crate::crypto_serde::uint")]
    pub r: BoxedUint,
    #[serde(with = "crate::crypto_serde::uint")]
    pub s: BoxedUint,
}

/// Threshold DSS signing [GJKR96 structure]: two Joint-RVSS runs provide
/// a random nonce `k` and a blinding value `a`; degree-`2t` zero sharings
/// mask the openings of `k·a` and of the signature shares; Lagrange
/// interpolation in the clear recovers `(r, s)`.
///
/// Requires `n ≥ 2t + 1` so that degree-`2t` product shares interpolate.
pub struct ThresholdDss {
    domain: Domain,
    label: String,
    n: usize,
    t: usize,
    me: usize,
    strength: Strength,
    round: u64,
}

impl ThresholdDss {
    pub fn new(
        domain: Domain,
        label: &str,
        n: usize,
        t: usize,
        me: usize,
        strength: Strength,
    ) -> MpcResult<Self> {
        if me >= n || n < 2 * t + 1 {
            return Err(MpcError::invalid("signing needs n >= 2t + 1"));
        }
        Ok(Self {
            domain,
            label: label.to_string(),
            n,
            t,
            me,
            strength,
            round: 0,
        })
    }

    /// Hash of the message into `Z_q`.
    pub fn message_digest(domain: &Domain, message: &BoxedUint) -> BoxedUint {
        Shash::new("dss/message_v1")
            .absorb_uint(domain.p())
            .absorb_uint(domain.q())
            .absorb_uint(domain.g())
            .absorb_uint(message)
            .finish_mod(domain.zq())
    }

    /// Jointly signs `message` under the key generated by `dkg`.
    pub async fn sign(
        &mut self,
        dkg: &Dkg,
        message: &BoxedUint,
        aiou: &mut SecureUnicast,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<DssSignature> {
        self.round += 1;
        let round = self.round;
        let zq = self.domain.zq().clone();
        let x_i = zq.reduce(dkg.share()?);
        let digest = Self::message_digest(&self.domain, message);

        // shares of the ephemeral nonce k and the blinding value a
        let mut k_vss = self.joint_vss(&format!("k-{round}"), self.t)?;
        k_vss.share(aiou, rbc).await?;
        let mut a_vss = self.joint_vss(&format!("a-{round}"), self.t)?;
        a_vss.share(aiou, rbc).await?;

        // degree-2t zero sharings hide the partial information leaked by
        // the two public openings below
        let mut mu_mask = self.zero_vss(&format!("mu-mask-{round}"))?;
        mu_mask.share(aiou, rbc).await?;
        let mut s_mask = self.zero_vss(&format!("s-mask-{round}"))?;
        s_mask.share(aiou, rbc).await?;

        let qual = common_qual(&[k_vss.qual(), a_vss.qual(), mu_mask.qual(), s_mask.qual()]);
        if qual.len() < 2 * self.t + 1 {
            return Err(MpcError::violation(None, "not enough qualified signers"));
        }

        let k_i = zq.reduce(k_vss.x_i());
        let a_i = zq.reduce(a_vss.x_i());

        // open μ = k·a via the degree-2t shares w_i = k_i·a_i + mask_i
        let w_i = zq.add(&zq.mul(&k_i, &a_i), mu_mask.x_i());
        rbc.set_id(&format!("dss/mu/{}|{round}", self.label));
        let mu_points = self.open_shares(rbc, &qual, &w_i).await;
        rbc.unset_id();
        let mu = lagrange_at_zero(&zq, &mu_points?)?;
        let mu_inv = zq
            .invert(&mu)
            .ok_or_else(|| MpcError::crypto("degenerate nonce product"))?;

        // r = (g^{k^{-1}} mod p) mod q with k^{-1} = a·μ^{-1}
        let zp = self.domain.zp();
        let big_a_i = zp.pow(self.domain.g(), &a_i);
        rbc.set_id(&format!("dss/r/{}|{round}", self.label));
        let r_result = self.open_exponents(rbc, &qual, &big_a_i).await;
        rbc.unset_id();
        let g_a = r_result?;
        let r_point = zp.pow(&g_a, &mu_inv);
        let r = zq.reduce(&r_point);
        if zq.is_zero(&r) {
            return Err(MpcError::crypto("degenerate signature component r"));
        }

        // open s = k·(H(m) + x·r) via degree-2t shares
        let s_i = zq.add(
            &zq.mul(&k_i, &zq.add(&digest, &zq.mul(&x_i, &r))),
            s_mask.x_i(),
        );
        rbc.set_id(&format!("dss/s/{}|{round}", self.label));
        let s_points = self.open_shares(rbc, &qual, &s_i).await;
        rbc.unset_id();
        let s = lagrange_at_zero(&zq, &s_points?)?;
        if zq.is_zero(&s) {
            return Err(MpcError::crypto("degenerate signature component s"));
        }

        let signature = DssSignature { r, s };
        Self::verify(&self.domain, dkg.public_key(), message, &signature)?;
        tracing::debug!(target: LOG_TARGET, "signature assembled and self-verified");
        Ok(signature)
    }

    /// Standard DSA verification against the joint public key.
    pub fn verify(
        domain: &Domain,
        y: &BoxedUint,
        message: &BoxedUint,
        signature: &DssSignature,
    ) -> MpcResult<()> {
        let zp = domain.zp();
        let zq = domain.zq();
        if !zq.contains(&signature.r)
            || !zq.contains(&signature.s)
            || zq.is_zero(&signature.r)
            || zq.is_zero(&signature.s)
        {
            return Err(MpcError::crypto("signature components out of range"));
        }
        let digest = Self::message_digest(domain, message);
        let w = zq
            .invert(&signature.s)
            .ok_or_else(|| MpcError::crypto("non-invertible signature component"))?;
        let u1 = zq.mul(&digest, &w);
        let u2 = zq.mul(&zq.reduce(&signature.r), &w);
        let v = zp.mul(&zp.pow(domain.g(), &u1), &zp.pow(y, &u2));
        if zq.reduce(&v) != zq.reduce(&signature.r) {
            return Err(MpcError::crypto("signature verification failed"));
        }
        Ok(())
    }

    fn joint_vss(&self, tag: &str, tprime: usize) -> MpcResult<JointVss> {
        JointVss::new(
            self.domain.clone(),
            &format!("dss/{}/{}", self.label, tag),
            self.n,
            self.t,
            tprime,
            self.me,
            VssMode::Random,
            self.strength,
        )
    }

    fn zero_vss(&self, tag: &str) -> MpcResult<Zvss> {
        Zvss::new(
            self.domain.clone(),
            &format!("dss/{}/{}", self.label, tag),
            self.n,
            self.t,
            2 * self.t,
            self.me,
            self.strength,
        )
    }

    /// Broadcasts our share and collects the first `2t+1` qualified
    /// openings as interpolation points.
    async fn open_shares(
        &self,
        rbc: &mut ReliableBroadcast,
        qual: &[usize],
        own: &BoxedUint,
    ) -> MpcResult<Vec<(u64, BoxedUint)>> {
        let zq = self.domain.zq();
        rbc.broadcast(own).await?;
        let mut points: Vec<(u64, BoxedUint)> = vec![((self.me + 1) as u64, zq.reduce(own))];
        for &j in qual {
            if j == self.me {
                continue;
            }
            match rbc.deliver_from(j, None).await {
                Ok(v) if zq.contains(&v) => points.push(((j + 1) as u64, zq.reduce(&v))),
                _ => tracing::warn!(target: LOG_TARGET, from = j, "missing or bad opening"),
            }
        }
        if points.len() < 2 * self.t + 1 {
            return Err(MpcError::violation(None, "not enough openings"));
        }
        points.sort_by_key(|(x, _)| *x);
        points.truncate(2 * self.t + 1);
        Ok(points)
    }

    /// Broadcasts `g^{a_i}` and interpolates `g^a` in the exponent from
    /// `t+1` contributions.
    async fn open_exponents(
        &self,
        rbc: &mut ReliableBroadcast,
        qual: &[usize],
        own: &BoxedUint,
    ) -> MpcResult<BoxedUint> {
        let zp = self.domain.zp();
        let zq = self.domain.zq();
        rbc.broadcast(own).await?;
        let mut points: Vec<(u64, BoxedUint)> = vec![((self.me + 1) as u64, zp.reduce(own))];
        for &j in qual {
            if j == self.me {
                continue;
            }
            match rbc.deliver_from(j, None).await {
                Ok(v) if self.domain.check_element(&v) => {
                    points.push(((j + 1) as u64, zp.reduce(&v)))
                }
                _ => tracing::warn!(target: LOG_TARGET, from = j, "missing or bad exponent share"),
            }
        }
        if points.len() < self.t + 1 {
            return Err(MpcError::violation(None, "not enough exponent shares"));
        }
        points.sort_by_key(|(x, _)| *x);
        points.truncate(self.t + 1);

        // Π (g^{a_j})^{λ_j} with Lagrange coefficients at zero
        let mut acc = zp.one();
        for (idx, (x_j, value)) in points.iter().enumerate() {
            let mut num = zq.one();
            let mut den = zq.one();
            for (l, (x_l, _)) in points.iter().enumerate() {
                if l == idx {
                    continue;
                }
                num = zq.mul(&num, &zq.from_u64(*x_l));
                den = zq.mul(&den, &zq.sub(&zq.from_u64(*x_l), &zq.from_u64(*x_j)));
            }
            let lambda = zq.mul(
                &num,
                &zq.invert(&den)
                    .ok_or_else(|| MpcError::crypto("degenerate interpolation points"))?,
            );
            acc = zp.mul(&acc, &zp.pow(value, &lambda));
        }
        Ok(acc)
    }
}

/// Sorted intersection of several QUAL sets.
fn common_qual(sets: &[&[usize]]) -> Vec<usize> {
    let Some((first, rest)) = sets.split_first() else {
        return Vec::new();
    };
    first
        .iter()
        .copied()
        .filter(|j| rest.iter().all(|s| s.contains(j)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::random::SecureRng;
    use crate::arith::uint_from;
    use crate::test_utils::protocol_mesh;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn threshold_signature_round_trip() {
        let mut rng = SecureRng::new(Strength::Weak);
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        let n = 3;
        let t = 1;
        let mesh = protocol_mesh(n, t, 128, Duration::from_secs(30));
        let message = uint_from(31337, 128);

        let mut handles = Vec::new();
        for (me, (mut aiou, mut rbc)) in mesh.into_iter().enumerate() {
            let domain = domain.clone();
            let message = message.clone();
            handles.push(tokio::spawn(async move {
                let mut dkg =
                    Dkg::new(domain.clone(), "sig-test", n, t, me, Strength::Weak).unwrap();
                dkg.generate(&mut aiou, &mut rbc).await.unwrap();
                dkg.check_share().unwrap();
                let mut dss =
                    ThresholdDss::new(domain, "sig-test", n, t, me, Strength::Weak).unwrap();
                let sig = dss
                    .sign(&dkg, &message, &mut aiou, &mut rbc)
                    .await
                    .unwrap();
                (sig, dkg.public_key().clone())
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        let (sig0, y0) = &results[0];
        for (sig, y) in &results {
            assert_eq!(sig, sig0);
            assert_eq!(y, y0);
        }
        ThresholdDss::verify(&domain, y0, &message, sig0).unwrap();

        // tampered signature and wrong message must fail
        let zq = domain.zq();
        let mut bad = sig0.clone();
        bad.s = zq.add(&bad.s, &zq.one());
        assert!(ThresholdDss::verify(&domain, y0, &message, &bad).is_err());
        assert!(ThresholdDss::verify(&domain, y0, &uint_from(31338, 128), sig0).is_err());
    }
}
