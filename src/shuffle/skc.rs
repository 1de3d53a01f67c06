use crypto_bigint::BoxedUint;
use serde::{Deserialize, Serialize};

use crate::arith::random::SecureRng;
use crate::commitment::PedersenCommitment;
use crate::error::{MpcError, MpcResult};
use crate::transcript::Shash;
use crate::wire;

const LOG_TARGET: &str = "mental_mpc::shuffle::skc";

/// Groth's argument of a "shuffle of known content" [Gr05]: a commitment
/// `c` opens to some permutation of the public list `m_1..m_n`.
///
/// The four-move interactive protocol is exposed through
/// [`GrothSkc::prove_with_challenges`] / [`GrothSkc::verify_with_challenges`]
/// so that a public-coin run can feed it distributed coins; the
/// non-interactive variant derives both challenges by Fiat-Shamir with the
/// challenge length doubled, following section 2.5 of the paper.
pub struct GrothSkc {
    com: PedersenCommitment,
    l_e: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkcProof {
    #[serde(with = "crate::crypto_serde::uint")]
    pub c_d: BoxedUint,
    #[serde(with = "crate::crypto_serde::uint")]
    pub c_delta: BoxedUint,
    #[serde(with = "crate::crypto_serde::uint")]
    pub c_a: BoxedUint,
    #[serde(with = "crate::crypto_serde::uint_vec")]
    pub f: Vec<BoxedUint>,
    #[serde(with = "crate::crypto_serde::uint")]
    pub z: BoxedUint,
    #[serde(with = "crate::crypto_serde::uint_vec")]
    pub f_delta: Vec<BoxedUint>,
    #[serde(with = "crate::crypto_serde::uint")]
    pub z_delta: BoxedUint,
}

impl GrothSkc {
    pub fn new(com: PedersenCommitment, l_e: u32) -> MpcResult<Self> {
        if l_e == 0 || 2 * l_e > 256 {
            return Err(MpcError::invalid("unsupported challenge length"));
        }
        if 2 * l_e >= com.domain().q().bits() {
            return Err(MpcError::invalid("challenge length exceeds subgroup size"));
        }
        Ok(Self { com, l_e })
    }

    pub fn commitment(&self) -> &PedersenCommitment {
        &self.com
    }

    /// Commits to `m` permuted by `pi`; the commitment/opening pair feeds
    /// the proof below.
    pub fn commit_permutation(
        &self,
        rng: &mut SecureRng,
        pi: &[usize],
        m: &[BoxedUint],
    ) -> MpcResult<(BoxedUint, BoxedUint)> {
        let permuted = self.permuted(pi, m)?;
        self.com.commit(rng, &permuted)
    }

    fn permuted(&self, pi: &[usize], m: &[BoxedUint]) -> MpcResult<Vec<BoxedUint>> {
        if !super::is_permutation(pi, m.len()) {
            return Err(MpcError::invalid("not a permutation"));
        }
        Ok(pi.iter().map(|&idx| m[idx].clone()).collect())
    }

    /// Non-interactive proof that `c = COM(m_{π(1)}..m_{π(n)}; r)`.
    pub fn prove_noninteractive(
        &self,
        rng: &mut SecureRng,
        pi: &[usize],
        r: &BoxedUint,
        m: &[BoxedUint],
    ) -> MpcResult<SkcProof> {
        let l = 2 * self.l_e;
        let x = self.challenge_x(m, l);
        let commit_phase = self.first_phase(rng, pi, m, &x)?;
        let e = self.challenge_e(
            m,
            &x,
            &commit_phase.c_d,
            &commit_phase.c_delta,
            &commit_phase.c_a,
            l,
        );
        self.final_phase(pi, r, m, &x, &e, commit_phase)
    }

    /// Interactive / public-coin core: the caller supplies both verifier
    /// challenges (e.g. from an EDCF).
    pub fn prove_with_challenges(
        &self,
        rng: &mut SecureRng,
        pi: &[usize],
        r: &BoxedUint,
        m: &[BoxedUint],
        x: &BoxedUint,
        e: &BoxedUint,
    ) -> MpcResult<SkcProof> {
        let commit_phase = self.first_phase(rng, pi, m, x)?;
        self.final_phase(pi, r, m, x, e, commit_phase)
    }

    pub fn verify_noninteractive(
        &self,
        c: &BoxedUint,
        m: &[BoxedUint],
        proof: &SkcProof,
    ) -> MpcResult<()> {
        let l = 2 * self.l_e;
        let x = self.challenge_x(m, l);
        let e = self.challenge_e(m, &x, &proof.c_d, &proof.c_delta, &proof.c_a, l);
        self.verify_with_challenges(c, m, proof, &x, &e, None)
    }

    /// Public-coin prover: both challenges come from distributed coin
    /// flips, the proof messages travel over the broadcast channel so
    /// every other party can verify.
    pub async fn prove_publiccoin(
        &self,
        rng: &mut SecureRng,
        pi: &[usize],
        r: &BoxedUint,
        m: &[BoxedUint],
        edcf: &mut crate::vss::Edcf,
        aiou: &mut crate::transport::SecureUnicast,
        rbc: &mut crate::broadcast::ReliableBroadcast,
    ) -> MpcResult<SkcProof> {
        let x = self.coin(edcf, aiou, rbc).await?;
        let phase = self.first_phase(rng, pi, m, &x)?;
        // the fresh coin doubles as a per-run channel marker
        rbc.set_id(&format!("skc/publiccoin/commitments/{}", wire::encode(&x)));
        rbc.broadcast(&phase.c_d).await?;
        rbc.broadcast(&phase.c_delta).await?;
        rbc.broadcast(&phase.c_a).await?;
        rbc.unset_id();
        let e = self.coin(edcf, aiou, rbc).await?;
        let proof = self.final_phase(pi, r, m, &x, &e, phase)?;
        rbc.set_id(&format!("skc/publiccoin/responses/{}", wire::encode(&e)));
        let result = self.broadcast_responses(&proof, rbc).await;
        rbc.unset_id();
        result?;
        Ok(proof)
    }

    /// Public-coin verifier for the proof of `prover`.
    pub async fn verify_publiccoin(
        &self,
        c: &BoxedUint,
        m: &[BoxedUint],
        prover: usize,
        edcf: &mut crate::vss::Edcf,
        aiou: &mut crate::transport::SecureUnicast,
        rbc: &mut crate::broadcast::ReliableBroadcast,
    ) -> MpcResult<()> {
        let n = m.len();
        let x = self.coin(edcf, aiou, rbc).await?;
        rbc.set_id(&format!("skc/publiccoin/commitments/{}", wire::encode(&x)));
        let c_d = rbc.deliver_from(prover, None).await;
        let c_delta = rbc.deliver_from(prover, None).await;
        let c_a = rbc.deliver_from(prover, None).await;
        rbc.unset_id();
        let (Ok(c_d), Ok(c_delta), Ok(c_a)) = (c_d, c_delta, c_a) else {
            return Err(MpcError::violation(prover, "missing shuffle commitments"));
        };
        let e = self.coin(edcf, aiou, rbc).await?;
        rbc.set_id(&format!("skc/publiccoin/responses/{}", wire::encode(&e)));
        let mut scalars = Vec::with_capacity(2 * n + 1);
        for _ in 0..2 * n + 1 {
            match rbc.deliver_from(prover, None).await {
                Ok(v) => scalars.push(v),
                Err(_) => break,
            }
        }
        rbc.unset_id();
        if scalars.len() != 2 * n + 1 {
            return Err(MpcError::violation(prover, "missing shuffle responses"));
        }
        let f = scalars[..n].to_vec();
        let z = scalars[n].clone();
        let f_delta = scalars[n + 1..2 * n].to_vec();
        let z_delta = scalars[2 * n].clone();
        let proof = SkcProof {
            c_d,
            c_delta,
            c_a,
            f,
            z,
            f_delta,
            z_delta,
        };
        self.verify_with_challenges(c, m, &proof, &x, &e, None)
    }

    async fn broadcast_responses(
        &self,
        proof: &SkcProof,
        rbc: &mut crate::broadcast::ReliableBroadcast,
    ) -> MpcResult<()> {
        for f_i in &proof.f {
            rbc.broadcast(f_i).await?;
        }
        rbc.broadcast(&proof.z).await?;
        for fd in &proof.f_delta {
            rbc.broadcast(fd).await?;
        }
        rbc.broadcast(&proof.z_delta).await?;
        Ok(())
    }

    /// One distributed coin, truncated to the interactive challenge
    /// length `l_e`.
    async fn coin(
        &self,
        edcf: &mut crate::vss::Edcf,
        aiou: &mut crate::transport::SecureUnicast,
        rbc: &mut crate::broadcast::ReliableBroadcast,
    ) -> MpcResult<BoxedUint> {
        use crypto_bigint::NonZero;
        let raw = edcf.flip(aiou, rbc).await?;
        let bound = NonZero::new(
            BoxedUint::one_with_precision(raw.bits_precision()).shl(self.l_e),
        )
        .expect("2^l_e is non-zero");
        Ok(raw.rem(&bound))
    }

    /// Verification with caller-supplied challenges. When `batch_rng` is
    /// given, the two commitment relations are checked with the
    /// random-linear-combination optimization from section 6 of [Gr05].
    pub fn verify_with_challenges(
        &self,
        c: &BoxedUint,
        m: &[BoxedUint],
        proof: &SkcProof,
        x: &BoxedUint,
        e: &BoxedUint,
        batch_rng: Option<&mut SecureRng>,
    ) -> MpcResult<()> {
        let zq = self.zq();
        let zp = self.com.domain().zp();
        let n = m.len();
        if n < 2 {
            return Err(MpcError::invalid("shuffle needs at least two messages"));
        }
        if proof.f.len() != n || proof.f_delta.len() != n - 1 {
            return Err(MpcError::crypto("shuffle proof has wrong shape"));
        }
        if zq.is_zero(e) {
            return Err(MpcError::crypto("challenge e must be non-zero"));
        }
        for value in [&proof.c_d, &proof.c_delta, &proof.c_a] {
            if !self.com.test_membership(value) {
                return Err(MpcError::crypto("proof commitment outside Z_p"));
            }
        }
        for scalar in proof
            .f
            .iter()
            .chain(proof.f_delta.iter())
            .chain([&proof.z, &proof.z_delta])
        {
            if !zq.contains(scalar) {
                return Err(MpcError::crypto("proof scalar out of range"));
            }
        }

        // f_Delta padded to n entries with a trailing zero
        let mut f_delta_full: Vec<BoxedUint> = proof.f_delta.iter().map(|v| zq.reduce(v)).collect();
        f_delta_full.push(zq.zero());

        match batch_rng {
            Some(rng) => {
                // ((c^e c_d)^α)(c_a^e c_Δ) = COM(α f + f_Δ; α z + z_Δ)
                let alpha = rng.bits(self.l_e, zq.bits_precision());
                let lhs_1 = zp.mul(&zp.pow(c, e), &proof.c_d);
                let lhs_2 = zp.mul(&zp.pow(&proof.c_a, e), &proof.c_delta);
                let lhs = zp.mul(&zp.pow(&lhs_1, &alpha), &lhs_2);
                let msgs: Vec<BoxedUint> = proof
                    .f
                    .iter()
                    .zip(&f_delta_full)
                    .map(|(fi, fd)| zq.add(&zq.mul(&alpha, fi), fd))
                    .collect();
                let rand = zq.add(&zq.mul(&alpha, &proof.z), &proof.z_delta);
                self.com.verify(&lhs, &rand, &msgs)?;
            }
            None => {
                // c^e c_d = COM(f; z)
                let lhs = zp.mul(&zp.pow(c, e), &proof.c_d);
                self.com.verify(&lhs, &proof.z, &proof.f)?;
                // c_a^e c_Δ = COM(f_Δ; z_Δ)
                let lhs = zp.mul(&zp.pow(&proof.c_a, e), &proof.c_delta);
                self.com.verify(&lhs, &proof.z_delta, &f_delta_full)?;
            }
        }

        // product identity: F_n = e · Π (m_i - x)
        let e_inv = zq
            .invert(e)
            .ok_or_else(|| MpcError::crypto("challenge e not invertible"))?;
        let ex = zq.mul(e, x);
        let mut acc = zq.sub(&zq.reduce(&proof.f[0]), &ex);
        for i in 1..n {
            let term = zq.mul(&zq.sub(&zq.reduce(&proof.f[i]), &ex), &acc);
            let term = zq.add(&term, &f_delta_full[i - 1]);
            acc = zq.mul(&term, &e_inv);
        }
        let mut rhs = zq.one();
        for mi in m {
            rhs = zq.mul(&rhs, &zq.sub(mi, x));
        }
        rhs = zq.mul(&rhs, e);
        if acc != rhs {
            tracing::debug!(target: LOG_TARGET, "product identity failed");
            return Err(MpcError::crypto("shuffle product identity failed"));
        }
        Ok(())
    }

    fn zq(&self) -> &crate::arith::ModGroup {
        self.com.domain().zq()
    }

    fn first_phase(
        &self,
        rng: &mut SecureRng,
        pi: &[usize],
        m: &[BoxedUint],
        x: &BoxedUint,
    ) -> MpcResult<CommitPhase> {
        let zq = self.zq();
        let n = m.len();
        if n < 2 {
            return Err(MpcError::invalid("shuffle needs at least two messages"));
        }
        if !super::is_permutation(pi, n) {
            return Err(MpcError::invalid("not a permutation"));
        }
        let q = self.com.domain().q();

        let r_d = rng.below(q);
        let r_delta = rng.below(q);
        let r_a = rng.below(q);
        let d: Vec<BoxedUint> = (0..n).map(|_| rng.below(q)).collect();

        let mut delta = Vec::with_capacity(n);
        delta.push(d[0].clone());
        for _ in 1..n - 1 {
            delta.push(rng.below(q));
        }
        delta.push(zq.zero());

        // a_i = Π_{j≤i} (m_{π(j)} - x)
        let mut a = Vec::with_capacity(n);
        let mut prod = zq.one();
        for j in 0..n {
            prod = zq.mul(&prod, &zq.sub(&m[pi[j]], x));
            a.push(prod.clone());
        }

        let c_d = self.com.commit_with(&r_d, &d)?;

        let mut v1 = Vec::with_capacity(n);
        for i in 0..n - 1 {
            v1.push(zq.mul(&zq.neg(&delta[i]), &d[i + 1]));
        }
        v1.push(zq.zero());
        let c_delta = self.com.commit_with(&r_delta, &v1)?;

        let mut v2 = Vec::with_capacity(n);
        for i in 0..n - 1 {
            v2.push(Self::step_term(zq, &delta[i + 1], &m[pi[i + 1]], x, &delta[i], &a[i], &d[i + 1]));
        }
        v2.push(zq.zero());
        let c_a = self.com.commit_with(&r_a, &v2)?;

        Ok(CommitPhase {
            c_d,
            c_delta,
            c_a,
            d,
            delta,
            r_d,
            r_delta,
            r_a,
        })
    }

    fn final_phase(
        &self,
        pi: &[usize],
        r: &BoxedUint,
        m: &[BoxedUint],
        x: &BoxedUint,
        e: &BoxedUint,
        phase: CommitPhase,
    ) -> MpcResult<SkcProof> {
        let zq = self.zq();
        let n = m.len();
        if zq.is_zero(e) {
            return Err(MpcError::crypto("challenge e must be non-zero"));
        }

        // f_i = e·m_{π(i)} + d_i
        let f: Vec<BoxedUint> = (0..n)
            .map(|i| zq.add(&zq.mul(e, &m[pi[i]]), &phase.d[i]))
            .collect();
        // z = e·r + r_d
        let z = zq.add(&zq.mul(e, r), &phase.r_d);
        // f_Δi = e·(Δ_{i+1} - (m_{π(i+1)} - x)Δ_i - a_i d_{i+1}) - Δ_i d_{i+1}
        let mut a_prod = zq.one();
        let mut f_delta = Vec::with_capacity(n - 1);
        for i in 0..n - 1 {
            a_prod = zq.mul(&a_prod, &zq.sub(&m[pi[i]], x));
            let step = Self::step_term(
                zq,
                &phase.delta[i + 1],
                &m[pi[i + 1]],
                x,
                &phase.delta[i],
                &a_prod,
                &phase.d[i + 1],
            );
            let masked = zq.sub(&zq.mul(e, &step), &zq.mul(&phase.delta[i], &phase.d[i + 1]));
            f_delta.push(masked);
        }
        // z_Δ = e·r_a + r_Δ
        let z_delta = zq.add(&zq.mul(e, &phase.r_a), &phase.r_delta);

        Ok(SkcProof {
            c_d: phase.c_d,
            c_delta: phase.c_delta,
            c_a: phase.c_a,
            f,
            z,
            f_delta,
            z_delta,
        })
    }

    /// `Δ_{i+1} - (m_{π(i+1)} - x)·Δ_i - a_i·d_{i+1}` over `Z_q`.
    fn step_term(
        zq: &crate::arith::ModGroup,
        delta_next: &BoxedUint,
        m_next: &BoxedUint,
        x: &BoxedUint,
        delta_i: &BoxedUint,
        a_i: &BoxedUint,
        d_next: &BoxedUint,
    ) -> BoxedUint {
        let t1 = zq.mul(&zq.sub(m_next, x), delta_i);
        let t2 = zq.mul(a_i, d_next);
        zq.sub(&zq.sub(delta_next, &t1), &t2)
    }

    fn challenge_x(&self, m: &[BoxedUint], bits: u32) -> BoxedUint {
        let domain = self.com.domain();
        Shash::new("skc/challenge_x_v1")
            .absorb_uints(self.com.generators())
            .absorb_uints(m)
            .absorb_uint(domain.p())
            .absorb_uint(domain.q())
            .absorb_uint(self.com.h())
            .finish_bits(bits, domain.bits_precision())
    }

    fn challenge_e(
        &self,
        m: &[BoxedUint],
        x: &BoxedUint,
        c_d: &BoxedUint,
        c_delta: &BoxedUint,
        c_a: &BoxedUint,
        bits: u32,
    ) -> BoxedUint {
        let domain = self.com.domain();
        Shash::new("skc/challenge_e_v1")
            .absorb_uints(self.com.generators())
            .absorb_uints(m)
            .absorb_uint(x)
            .absorb_uint(c_d)
            .absorb_uint(c_delta)
            .absorb_uint(c_a)
            .finish_bits(bits, domain.bits_precision())
    }
}

struct CommitPhase {
    c_d: BoxedUint,
    c_delta: BoxedUint,
    c_a: BoxedUint,
    d: Vec<BoxedUint>,
    delta: Vec<BoxedUint>,
    r_d: BoxedUint,
    r_delta: BoxedUint,
    r_a: BoxedUint,
}
