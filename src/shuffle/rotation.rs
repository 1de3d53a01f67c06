use crypto_bigint::BoxedUint;
use serde::{Deserialize, Serialize};

use crate::arith::random::SecureRng;
use crate::domain::Domain;
use crate::error::{MpcError, MpcResult};
use crate::transcript::Shash;
use crate::wire;

const LOG_TARGET: &str = "mental_mpc::shuffle::rotation";

/// HSSV zero-knowledge argument of a verifiable rotation (PUBROTZK):
/// given commitments `c_j = g^{α_{(j-r) mod n}} · h^{s_j}` to a secret
/// rotation of the public list `α_0..α_{n-1}`, prove knowledge of the
/// offset `r` and the randomizers `s_j`.
///
/// Like the shuffle argument, the interactive core takes the verifier
/// coins as parameters so both the public-coin (EDCF) and Fiat-Shamir
/// variants share one implementation.
pub struct VerifiableRotation {
    domain: Domain,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RotationProof {
    #[serde(with = "crate::crypto_serde::uint_vec")]
    pub f: Vec<BoxedUint>,
    #[serde(with = "crate::crypto_serde::uint_vec")]
    pub lambda: Vec<BoxedUint>,
    #[serde(with = "crate::crypto_serde::uint_vec")]
    pub t: Vec<BoxedUint>,
}

impl VerifiableRotation {
    pub fn new(domain: Domain) -> Self {
        Self { domain }
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Commits to `alpha` rotated by `offset`; returns the commitment list
    /// and the randomizers `s_j`.
    pub fn commit_rotation(
        &self,
        rng: &mut SecureRng,
        alpha: &[BoxedUint],
        offset: usize,
    ) -> MpcResult<(Vec<BoxedUint>, Vec<BoxedUint>)> {
        let n = alpha.len();
        if n < 2 || offset >= n {
            return Err(MpcError::invalid("bad rotation parameters"));
        }
        let zp = self.domain.zp();
        let mut commitments = Vec::with_capacity(n);
        let mut randomizers = Vec::with_capacity(n);
        for j in 0..n {
            let s_j = rng.below(self.domain.q());
            let rotated = &alpha[(n + j - offset) % n];
            let c_j = zp.mul(
                &zp.pow(self.domain.g(), rotated),
                &zp.pow(self.domain.h(), &s_j),
            );
            commitments.push(c_j);
            randomizers.push(s_j);
        }
        Ok((commitments, randomizers))
    }

    pub fn prove_noninteractive(
        &self,
        rng: &mut SecureRng,
        offset: usize,
        s: &[BoxedUint],
        alpha: &[BoxedUint],
        c: &[BoxedUint],
    ) -> MpcResult<RotationProof> {
        let beta = self.derive_betas(alpha, c);
        // the λ hash depends on f, so the first prover move runs before λ
        let partial = self.first_move(rng, offset, alpha, c, &beta)?;
        let lambda = self.derive_lambda(alpha, c, &partial.f, &beta);
        self.third_move(offset, s, &beta, lambda, partial)
    }

    /// Interactive / public-coin core with caller-supplied coins.
    pub fn prove_with_challenges(
        &self,
        rng: &mut SecureRng,
        offset: usize,
        s: &[BoxedUint],
        alpha: &[BoxedUint],
        c: &[BoxedUint],
        beta: &[BoxedUint],
        lambda: &BoxedUint,
    ) -> MpcResult<RotationProof> {
        if beta.len() != alpha.len() {
            return Err(MpcError::invalid("one beta per list entry required"));
        }
        let partial = self.first_move(rng, offset, alpha, c, beta)?;
        self.third_move(offset, s, beta, lambda.clone(), partial)
    }

    pub fn verify_noninteractive(
        &self,
        alpha: &[BoxedUint],
        c: &[BoxedUint],
        proof: &RotationProof,
    ) -> MpcResult<()> {
        let beta = self.derive_betas(alpha, c);
        let lambda = self.derive_lambda(alpha, c, &proof.f, &beta);
        self.verify_with_challenges(alpha, c, proof, &beta, &lambda)
    }

    /// Public-coin prover: the `β` vector and `λ` come from distributed
    /// coin flips, the proof messages travel over the broadcast channel.
    #[allow(clippy::too_many_arguments)]
    pub async fn prove_publiccoin(
        &self,
        rng: &mut SecureRng,
        offset: usize,
        s: &[BoxedUint],
        alpha: &[BoxedUint],
        c: &[BoxedUint],
        edcf: &mut crate::vss::Edcf,
        aiou: &mut crate::transport::SecureUnicast,
        rbc: &mut crate::broadcast::ReliableBroadcast,
    ) -> MpcResult<RotationProof> {
        let zq = self.domain.zq();
        let mut beta = Vec::with_capacity(alpha.len());
        for _ in 0..alpha.len() {
            beta.push(zq.reduce(&edcf.flip(aiou, rbc).await?));
        }
        let partial = self.first_move(rng, offset, alpha, c, &beta)?;
        // the first coin doubles as a per-run channel marker
        rbc.set_id(&format!("rotation/publiccoin/f/{}", wire::encode(&beta[0])));
        for f_j in &partial.f {
            rbc.broadcast(f_j).await?;
        }
        rbc.unset_id();
        let lambda = zq.reduce(&edcf.flip(aiou, rbc).await?);
        let proof = self.third_move(offset, s, &beta, lambda.clone(), partial)?;
        rbc.set_id(&format!("rotation/publiccoin/responses/{}", wire::encode(&lambda)));
        for l_k in &proof.lambda {
            rbc.broadcast(l_k).await?;
        }
        for t_k in &proof.t {
            rbc.broadcast(t_k).await?;
        }
        rbc.unset_id();
        Ok(proof)
    }

    /// Public-coin verifier for the proof of `prover`.
    pub async fn verify_publiccoin(
        &self,
        alpha: &[BoxedUint],
        c: &[BoxedUint],
        prover: usize,
        edcf: &mut crate::vss::Edcf,
        aiou: &mut crate::transport::SecureUnicast,
        rbc: &mut crate::broadcast::ReliableBroadcast,
    ) -> MpcResult<()> {
        let zq = self.domain.zq();
        let n = alpha.len();
        let mut beta = Vec::with_capacity(n);
        for _ in 0..n {
            beta.push(zq.reduce(&edcf.flip(aiou, rbc).await?));
        }
        rbc.set_id(&format!("rotation/publiccoin/f/{}", wire::encode(&beta[0])));
        let mut f = Vec::with_capacity(n);
        for _ in 0..n {
            match rbc.deliver_from(prover, None).await {
                Ok(v) => f.push(v),
                Err(_) => break,
            }
        }
        rbc.unset_id();
        if f.len() != n {
            return Err(MpcError::violation(prover, "missing rotation commitments"));
        }
        let lambda = zq.reduce(&edcf.flip(aiou, rbc).await?);
        rbc.set_id(&format!("rotation/publiccoin/responses/{}", wire::encode(&lambda)));
        let mut scalars = Vec::with_capacity(2 * n);
        for _ in 0..2 * n {
            match rbc.deliver_from(prover, None).await {
                Ok(v) => scalars.push(v),
                Err(_) => break,
            }
        }
        rbc.unset_id();
        if scalars.len() != 2 * n {
            return Err(MpcError::violation(prover, "missing rotation responses"));
        }
        let proof = RotationProof {
            f,
            lambda: scalars[..n].to_vec(),
            t: scalars[n..].to_vec(),
        };
        self.verify_with_challenges(alpha, c, &proof, &beta, &lambda)
    }

    pub fn verify_with_challenges(
        &self,
        alpha: &[BoxedUint],
        c: &[BoxedUint],
        proof: &RotationProof,
        beta: &[BoxedUint],
        lambda: &BoxedUint,
    ) -> MpcResult<()> {
        let n = alpha.len();
        if n < 2 || c.len() != n {
            return Err(MpcError::invalid("bad statement shape"));
        }
        if proof.f.len() != n || proof.lambda.len() != n || proof.t.len() != n {
            return Err(MpcError::crypto("rotation proof has wrong shape"));
        }
        let zp = self.domain.zp();
        let zq = self.domain.zq();
        for f_k in &proof.f {
            if !self.domain.check_element(f_k) {
                return Err(MpcError::crypto("rotation proof element outside subgroup"));
            }
        }
        for scalar in proof.lambda.iter().chain(proof.t.iter()) {
            if !zq.contains(scalar) {
                return Err(MpcError::crypto("rotation proof scalar out of range"));
            }
        }
        // λ = Σ λ_k
        let mut sum = zq.zero();
        for l_k in &proof.lambda {
            sum = zq.add(&sum, l_k);
        }
        if sum != zq.reduce(lambda) {
            return Err(MpcError::crypto("lambda shares do not add up"));
        }
        // G = Π c_j^{β_j}
        let mut big_g = zp.one();
        for (c_j, b_j) in c.iter().zip(beta) {
            big_g = zp.mul(&big_g, &zp.pow(c_j, b_j));
        }
        // h^{t_k} = f_k · (G / g^{γ_k})^{λ_k}
        for k in 0..n {
            let gamma_k = self.gamma(alpha, beta, k);
            let lhs = zp.pow(self.domain.h(), &proof.t[k]);
            let g_gamma_inv = zp
                .invert(&zp.pow(self.domain.g(), &gamma_k))
                .ok_or_else(|| MpcError::crypto("non-invertible statement element"))?;
            let base = zp.mul(&big_g, &g_gamma_inv);
            let rhs = zp.mul(&proof.f[k], &zp.pow(&base, &proof.lambda[k]));
            if lhs != rhs {
                tracing::debug!(target: LOG_TARGET, k, "rotation equation failed");
                return Err(MpcError::crypto("rotation equation failed"));
            }
        }
        Ok(())
    }

    /// `γ_k = Σ_j α_{(j-k) mod n} · β_j mod q`
    fn gamma(&self, alpha: &[BoxedUint], beta: &[BoxedUint], k: usize) -> BoxedUint {
        let zq = self.domain.zq();
        let n = alpha.len();
        let mut acc = zq.zero();
        for j in 0..n {
            let idx = (n + j - k) % n;
            acc = zq.add(&acc, &zq.mul(&alpha[idx], &beta[j]));
        }
        acc
    }

    fn first_move(
        &self,
        rng: &mut SecureRng,
        offset: usize,
        alpha: &[BoxedUint],
        c: &[BoxedUint],
        beta: &[BoxedUint],
    ) -> MpcResult<FirstMove> {
        let n = alpha.len();
        if n < 2 || c.len() != n || offset >= n {
            return Err(MpcError::invalid("bad rotation parameters"));
        }
        let zp = self.domain.zp();
        let zq = self.domain.zq();

        let u = rng.below(self.domain.q());
        let mut big_g = zp.one();
        for (c_j, b_j) in c.iter().zip(beta) {
            big_g = zp.mul(&big_g, &zp.pow(c_j, b_j));
        }

        let mut f = vec![zp.one(); n];
        let mut lambda_k = vec![zq.zero(); n];
        let mut t_k = vec![zq.zero(); n];
        for j in 0..n {
            if j == offset {
                continue;
            }
            lambda_k[j] = rng.below(self.domain.q());
            t_k[j] = rng.below(self.domain.q());
            let gamma_j = self.gamma(alpha, beta, j);
            // f_j = g^{λ_j γ_j} · h^{t_j} · G^{-λ_j}
            let e1 = zp.pow(self.domain.g(), &zq.mul(&lambda_k[j], &gamma_j));
            let e2 = zp.pow(self.domain.h(), &t_k[j]);
            let g_inv = zp
                .invert(&zp.pow(&big_g, &lambda_k[j]))
                .ok_or_else(|| MpcError::crypto("non-invertible commitment product"))?;
            f[j] = zp.mul(&zp.mul(&e1, &e2), &g_inv);
        }
        f[offset] = zp.pow(self.domain.h(), &u);

        Ok(FirstMove { f, lambda_k, t_k, u })
    }

    fn third_move(
        &self,
        offset: usize,
        s: &[BoxedUint],
        beta: &[BoxedUint],
        lambda: BoxedUint,
        mut partial: FirstMove,
    ) -> MpcResult<RotationProof> {
        let zq = self.domain.zq();
        if s.len() != beta.len() {
            return Err(MpcError::invalid("one randomizer per commitment required"));
        }
        // λ_r = λ - Σ_{j≠r} λ_j
        let mut others = zq.zero();
        for (j, l_j) in partial.lambda_k.iter().enumerate() {
            if j != offset {
                others = zq.add(&others, l_j);
            }
        }
        partial.lambda_k[offset] = zq.sub(&zq.reduce(&lambda), &others);
        // t_r = u + λ_r · Σ_j s_j β_j
        let mut blind = zq.zero();
        for (s_j, b_j) in s.iter().zip(beta) {
            blind = zq.add(&blind, &zq.mul(s_j, b_j));
        }
        partial.t_k[offset] = zq.add(&partial.u, &zq.mul(&partial.lambda_k[offset], &blind));

        Ok(RotationProof {
            f: partial.f,
            lambda: partial.lambda_k,
            t: partial.t_k,
        })
    }

    /// Chained Fiat-Shamir coins `β_0..β_{n-1}`.
    fn derive_betas(&self, alpha: &[BoxedUint], c: &[BoxedUint]) -> Vec<BoxedUint> {
        let zq = self.domain.zq();
        let mut betas: Vec<BoxedUint> = Vec::with_capacity(alpha.len());
        for i in 0..alpha.len() {
            let prev = if i > 0 { betas[i - 1].clone() } else { zq.zero() };
            let b = Shash::new("rotation/beta_v1")
                .absorb_uints(alpha)
                .absorb_uints(c)
                .absorb_uint(self.domain.p())
                .absorb_uint(self.domain.q())
                .absorb_uint(self.domain.g())
                .absorb_uint(self.domain.h())
                .absorb_uint(&prev)
                .absorb_u64(i as u64)
                .finish_mod(zq);
            betas.push(b);
        }
        betas
    }

    fn derive_lambda(
        &self,
        alpha: &[BoxedUint],
        c: &[BoxedUint],
        f: &[BoxedUint],
        beta: &[BoxedUint],
    ) -> BoxedUint {
        Shash::new("rotation/lambda_v1")
            .absorb_uints(alpha)
            .absorb_uints(c)
            .absorb_uints(f)
            .absorb_uints(beta)
            .absorb_uint(self.domain.p())
            .absorb_uint(self.domain.q())
            .absorb_uint(self.domain.g())
            .absorb_uint(self.domain.h())
            .finish_mod(self.domain.zq())
    }
}

struct FirstMove {
    f: Vec<BoxedUint>,
    lambda_k: Vec<BoxedUint>,
    t_k: Vec<BoxedUint>,
    u: BoxedUint,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::uint_from;
    use crate::config::Strength;

    fn setup() -> (VerifiableRotation, SecureRng) {
        let mut rng = SecureRng::new(Strength::Weak);
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        (VerifiableRotation::new(domain), rng)
    }

    fn list(rot: &VerifiableRotation, values: &[u64]) -> Vec<BoxedUint> {
        let bits = rot.domain().bits_precision();
        values.iter().map(|&v| uint_from(v, bits)).collect()
    }

    #[test]
    fn rotation_round_trip() {
        let (rot, mut rng) = setup();
        let alpha = list(&rot, &[3, 1, 4, 1, 5]);
        for offset in [0usize, 2, 4] {
            let (c, s) = rot.commit_rotation(&mut rng, &alpha, offset).unwrap();
            let proof = rot
                .prove_noninteractive(&mut rng, offset, &s, &alpha, &c)
                .unwrap();
            rot.verify_noninteractive(&alpha, &c, &proof).unwrap();
        }
    }

    #[test]
    fn tampered_proof_rejected() {
        let (rot, mut rng) = setup();
        let alpha = list(&rot, &[2, 7, 1, 8]);
        let (c, s) = rot.commit_rotation(&mut rng, &alpha, 1).unwrap();
        let proof = rot.prove_noninteractive(&mut rng, 1, &s, &alpha, &c).unwrap();

        let zq = rot.domain().zq().clone();
        let mut bad = proof.clone();
        bad.t[0] = zq.add(&bad.t[0], &zq.one());
        assert!(rot.verify_noninteractive(&alpha, &c, &bad).is_err());

        let mut bad = proof.clone();
        bad.lambda[2] = zq.add(&bad.lambda[2], &zq.one());
        assert!(rot.verify_noninteractive(&alpha, &c, &bad).is_err());

        let zp = rot.domain().zp().clone();
        let mut bad = proof.clone();
        bad.f[1] = zp.mul(&bad.f[1], rot.domain().g());
        assert!(rot.verify_noninteractive(&alpha, &c, &bad).is_err());
    }

    #[test]
    fn wrong_statement_rejected() {
        let (rot, mut rng) = setup();
        let alpha = list(&rot, &[10, 20, 30]);
        let (c, s) = rot.commit_rotation(&mut rng, &alpha, 2).unwrap();
        let proof = rot.prove_noninteractive(&mut rng, 2, &s, &alpha, &c).unwrap();

        // a different public list must not verify
        let other = list(&rot, &[10, 20, 31]);
        assert!(rot.verify_noninteractive(&other, &c, &proof).is_err());

        // commitments to a non-rotation must not verify either
        let (c2, _) = rot.commit_rotation(&mut rng, &list(&rot, &[20, 10, 30]), 0).unwrap();
        assert!(rot.verify_noninteractive(&alpha, &c2, &proof).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn publiccoin_round_trip() {
        use crate::test_utils::protocol_mesh;
        use crate::vss::Edcf;
        use std::time::Duration;

        let mut setup_rng = SecureRng::new(Strength::Weak);
        let domain = Domain::generate_qr(&mut setup_rng, 128).unwrap();
        let rot = VerifiableRotation::new(domain.clone());
        let alpha = list(&rot, &[3, 1, 4]);
        let offset = 1;
        let (c, s) = rot.commit_rotation(&mut setup_rng, &alpha, offset).unwrap();

        let mesh = protocol_mesh(2, 0, 128, Duration::from_secs(40));
        let mut handles = Vec::new();
        for (me, (mut aiou, mut rbc)) in mesh.into_iter().enumerate() {
            let domain = domain.clone();
            let alpha = alpha.clone();
            let c = c.clone();
            let s = s.clone();
            handles.push(tokio::spawn(async move {
                let rot = VerifiableRotation::new(domain.clone());
                let mut edcf = Edcf::new(domain, 2, 0, me, Strength::Weak).unwrap();
                let mut rng = SecureRng::new(Strength::Weak);
                if me == 0 {
                    rot.prove_publiccoin(
                        &mut rng, offset, &s, &alpha, &c, &mut edcf, &mut aiou, &mut rbc,
                    )
                    .await
                    .unwrap();
                } else {
                    rot.verify_publiccoin(&alpha, &c, 0, &mut edcf, &mut aiou, &mut rbc)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}

