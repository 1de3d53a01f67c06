use std::collections::{BTreeSet, HashSet};

use crypto_bigint::BoxedUint;
use zeroize::Zeroizing;

use crate::arith::random::SecureRng;
use crate::broadcast::ReliableBroadcast;
use crate::config::Strength;
use crate::domain::Domain;
use crate::error::{MpcError, MpcResult};
use crate::transport::{Scheduler, SecureUnicast};
use crate::vss::{eval_poly, interpolate_polynomial, share_matches_commitments};

const LOG_TARGET: &str = "mental_mpc::vss::rvss";

/// Whether each dealer shares a fresh random value or a fixed zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VssMode {
    Random,
    /// Joint-ZVSS: all constant terms are zero and `C_{i0}` must be the
    /// identity.
    Zero,
}

/// Joint-RVSS: every party simultaneously deals a Pedersen-VSS of a
/// random value; the sum of the surviving dealers' secrets is the shared
/// scalar nobody knows.
///
/// After a successful [`JointVss::share`] the instance holds the additive
/// share `x_i = Σ_{j∈QUAL} s_{ji}`, the dealer commitments, and this
/// party's row/column of the share matrix, which later phases
/// (reconstruction, DKG exposure) build on.
pub struct JointVss {
    domain: Domain,
    label: String,
    n: usize,
    t: usize,
    /// Degree of the sharing polynomials (`t'`); equal to `t` for DKG use.
    tprime: usize,
    me: usize,
    mode: VssMode,
    rng: SecureRng,

    /// Own polynomial coefficients, kept for the DKG exposure phase.
    coeffs_a: Zeroizing<Vec<BoxedUint>>,
    coeffs_b: Zeroizing<Vec<BoxedUint>>,
    /// `C[j][k] = g^{a_jk} h^{b_jk}` per dealer `j`.
    commitments: Vec<Vec<BoxedUint>>,
    /// Shares this party holds: `held[j] = s_{j,me}` from dealer `j`.
    held: Vec<BoxedUint>,
    held_prime: Vec<BoxedUint>,
    /// Shares this party dealt: `dealt[j] = s_{me,j}`.
    dealt: Zeroizing<Vec<BoxedUint>>,
    dealt_prime: Zeroizing<Vec<BoxedUint>>,

    qual: Vec<usize>,
    x_i: BoxedUint,
    xprime_i: BoxedUint,
    z_i: Zeroizing<BoxedUint>,
    zprime_i: Zeroizing<BoxedUint>,

    #[cfg(test)]
    pub(crate) corrupt_share_to: Option<usize>,
}

impl JointVss {
    pub fn new(
        domain: Domain,
        label: &str,
        n: usize,
        t: usize,
        tprime: usize,
        me: usize,
        mode: VssMode,
        strength: Strength,
    ) -> MpcResult<Self> {
        if t > n || tprime > n || me >= n {
            return Err(MpcError::invalid("bad threshold parameters"));
        }
        let zq = domain.zq().clone();
        Ok(Self {
            domain,
            label: label.to_string(),
            n,
            t,
            tprime,
            me,
            mode,
            rng: SecureRng::new(strength),
            coeffs_a: Zeroizing::new(Vec::new()),
            coeffs_b: Zeroizing::new(Vec::new()),
            commitments: vec![Vec::new(); n],
            held: vec![zq.zero(); n],
            held_prime: vec![zq.zero(); n],
            dealt: Zeroizing::new(vec![zq.zero(); n]),
            dealt_prime: Zeroizing::new(vec![zq.zero(); n]),
            qual: Vec::new(),
            x_i: zq.zero(),
            xprime_i: zq.zero(),
            z_i: Zeroizing::new(zq.zero()),
            zprime_i: Zeroizing::new(zq.zero()),
            #[cfg(test)]
            corrupt_share_to: None,
        })
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn qual(&self) -> &[usize] {
        &self.qual
    }

    /// Additive share of the joint secret.
    pub fn x_i(&self) -> &BoxedUint {
        &self.x_i
    }

    pub fn xprime_i(&self) -> &BoxedUint {
        &self.xprime_i
    }

    /// This dealer's own contribution `z_i = f_i(0)`.
    pub fn z_i(&self) -> &BoxedUint {
        &self.z_i
    }

    pub fn zprime_i(&self) -> &BoxedUint {
        &self.zprime_i
    }

    pub fn commitments(&self) -> &[Vec<BoxedUint>] {
        &self.commitments
    }

    pub(crate) fn coeffs_a(&self) -> &[BoxedUint] {
        &self.coeffs_a
    }

    pub(crate) fn held_share(&self, dealer: usize) -> (&BoxedUint, &BoxedUint) {
        (&self.held[dealer], &self.held_prime[dealer])
    }

    /// Adds a refresh delta onto the accumulated share (used by proactive
    /// refresh, where the delta is a sharing of zero).
    pub(crate) fn add_to_share(&mut self, delta: &BoxedUint, delta_prime: &BoxedUint) {
        let zq = self.domain.zq();
        self.x_i = zq.add(&self.x_i, delta);
        self.xprime_i = zq.add(&self.xprime_i, delta_prime);
    }

    /// Wipes all secret state; public commitments and QUAL survive.
    pub fn erase_secrets(&mut self) {
        let zq = self.domain.zq();
        self.coeffs_a = Zeroizing::new(Vec::new());
        self.coeffs_b = Zeroizing::new(Vec::new());
        self.held = vec![zq.zero(); self.n];
        self.held_prime = vec![zq.zero(); self.n];
        self.dealt = Zeroizing::new(vec![zq.zero(); self.n]);
        self.dealt_prime = Zeroizing::new(vec![zq.zero(); self.n]);
        self.x_i = zq.zero();
        self.xprime_i = zq.zero();
        self.z_i = Zeroizing::new(zq.zero());
        self.zprime_i = Zeroizing::new(zq.zero());
    }

    /// Runs the sharing protocol. Broadcast traffic goes through `rbc`,
    /// the private shares through the separate direct transport `aiou`.
    /// On success `QUAL`, the additive share and the commitment matrix
    /// are populated.
    pub async fn share(
        &mut self,
        aiou: &mut SecureUnicast,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<()> {
        if 2 * self.t >= self.n {
            tracing::warn!(
                target: LOG_TARGET,
                "maximum synchronous t-resilience exceeded"
            );
        }
        let channel = format!(
            "joint-vss/share|{}|{}|{}|{}|{:?}",
            self.label, self.n, self.t, self.tprime, self.mode
        );
        rbc.set_id(&channel);
        let result = self.share_inner(aiou, rbc).await;
        rbc.unset_id();
        if let Err(ref e) = result {
            tracing::warn!(target: LOG_TARGET, label = %self.label, error = %e, "sharing failed");
        }
        result
    }

    async fn share_inner(
        &mut self,
        aiou: &mut SecureUnicast,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<()> {
        let domain = self.domain.clone();
        let zq = domain.zq();
        let q = domain.q();
        let mut complaints: BTreeSet<usize> = BTreeSet::new();

        // 1(a) sample polynomials and broadcast the coefficient commitments
        let mut coeffs_a = Vec::with_capacity(self.tprime + 1);
        let mut coeffs_b = Vec::with_capacity(self.tprime + 1);
        for k in 0..=self.tprime {
            let (a, b) = if k == 0 && self.mode == VssMode::Zero {
                (zq.zero(), zq.zero())
            } else {
                (self.rng.below(q), self.rng.below(q))
            };
            coeffs_a.push(a);
            coeffs_b.push(b);
        }
        *self.z_i = coeffs_a[0].clone();
        *self.zprime_i = coeffs_b[0].clone();

        let zp = domain.zp();
        let mut own_commitments = Vec::with_capacity(self.tprime + 1);
        for k in 0..=self.tprime {
            let c = zp.mul(
                &zp.pow(domain.g(), &coeffs_a[k]),
                &zp.pow(domain.h(), &coeffs_b[k]),
            );
            rbc.broadcast(&c).await?;
            own_commitments.push(c);
        }
        self.commitments[self.me] = own_commitments;

        for j in 0..self.n {
            if j == self.me {
                continue;
            }
            let mut received = Vec::with_capacity(self.tprime + 1);
            for _ in 0..=self.tprime {
                match rbc.deliver_from(j, None).await {
                    Ok(c) => {
                        if !domain.check_element(&c) {
                            tracing::warn!(target: LOG_TARGET, dealer = j, "bad C_ik received");
                            complaints.insert(j);
                            received.push(zp.zero());
                        } else {
                            received.push(zp.reduce(&c));
                        }
                    }
                    Err(_) => {
                        tracing::warn!(target: LOG_TARGET, dealer = j, "receiving C_ik failed");
                        complaints.insert(j);
                        break;
                    }
                }
            }
            if self.mode == VssMode::Zero {
                if let Some(c0) = received.first() {
                    if !zp.is_one(c0) {
                        tracing::warn!(
                            target: LOG_TARGET,
                            dealer = j,
                            "non-identity C_i0 in zero sharing"
                        );
                        complaints.insert(j);
                    }
                }
            }
            self.commitments[j] = received;
        }

        // 1(a) continued: deal the shares over the private channels
        for j in 0..self.n {
            let s = eval_poly(zq, &coeffs_a, (j + 1) as u64);
            let sprime = eval_poly(zq, &coeffs_b, (j + 1) as u64);
            self.dealt[j] = s.clone();
            self.dealt_prime[j] = sprime.clone();
            if j == self.me {
                self.held[self.me] = s;
                self.held_prime[self.me] = sprime;
                continue;
            }
            #[allow(unused_mut)]
            let mut s_wire = s;
            #[cfg(test)]
            if self.corrupt_share_to == Some(j) {
                s_wire = zq.add(&s_wire, &zq.one());
            }
            if aiou.send(&s_wire, j, None).await.is_err()
                || aiou.send(&sprime, j, None).await.is_err()
            {
                tracing::warn!(target: LOG_TARGET, to = j, "sending share failed");
                complaints.insert(j);
            }
        }

        // 1(b) receive and verify the shares dealt to us
        for j in 0..self.n {
            if j == self.me {
                continue;
            }
            let s = aiou.receive_any(Scheduler::Direct(j), None).await;
            let sprime = aiou.receive_any(Scheduler::Direct(j), None).await;
            match (s, sprime) {
                (Ok((_, s)), Ok((_, sprime))) => {
                    if !zq.contains(&s) || !zq.contains(&sprime) {
                        tracing::warn!(target: LOG_TARGET, dealer = j, "share out of range");
                        complaints.insert(j);
                        continue;
                    }
                    self.held[j] = zq.reduce(&s);
                    self.held_prime[j] = zq.reduce(&sprime);
                }
                _ => {
                    tracing::warn!(target: LOG_TARGET, dealer = j, "receiving share failed");
                    complaints.insert(j);
                }
            }
        }
        for j in 0..self.n {
            if !share_matches_commitments(
                &domain,
                &self.held[j],
                &self.held_prime[j],
                &self.commitments[j],
                (self.me + 1) as u64,
            ) {
                tracing::warn!(target: LOG_TARGET, dealer = j, "share check failed");
                complaints.insert(j);
            }
        }

        // broadcast our complaint list, end-marked by n
        for &who in &complaints {
            rbc.broadcast(&zq.from_u64(who as u64)).await?;
        }
        rbc.broadcast(&zq.from_u64(self.n as u64)).await?;

        // collect everyone's complaints
        let mut counter = vec![0usize; self.n];
        for &who in &complaints {
            counter[who] += 1;
        }
        let mut complained_about_me: Vec<usize> = Vec::new();
        let mut faulty: BTreeSet<usize> = BTreeSet::new();
        for j in 0..self.n {
            if j == self.me {
                continue;
            }
            let mut dup: HashSet<usize> = HashSet::new();
            for _ in 0..=self.n {
                let value = match rbc.deliver_from(j, None).await {
                    Ok(v) => v,
                    Err(_) => {
                        tracing::warn!(target: LOG_TARGET, from = j, "receiving complaint failed");
                        faulty.insert(j);
                        break;
                    }
                };
                let who = uint_to_index(&value, self.n);
                match who {
                    None => break, // end marker
                    Some(who) if dup.insert(who) => {
                        tracing::debug!(target: LOG_TARGET, against = who, from = j, "complaint");
                        counter[who] += 1;
                        if who == self.me {
                            complained_about_me.push(j);
                        }
                    }
                    Some(who) => {
                        tracing::warn!(
                            target: LOG_TARGET,
                            against = who, from = j,
                            "duplicated complaint"
                        );
                        faulty.insert(j);
                    }
                }
            }
        }

        // 1(c) answer complaints against us with the correct shares
        if !complained_about_me.is_empty() {
            complained_about_me.sort_unstable();
            tracing::warn!(
                target: LOG_TARGET,
                count = complained_about_me.len(),
                "answering complaints; shares become public"
            );
            for &j in &complained_about_me {
                rbc.broadcast(&zq.from_u64(j as u64)).await?;
                rbc.broadcast(&self.dealt[j].clone()).await?;
                rbc.broadcast(&self.dealt_prime[j].clone()).await?;
            }
        }
        rbc.broadcast(&zq.from_u64(self.n as u64)).await?;

        // 1(d) verify everyone's answers; build the disqualified set
        for (j, &count) in counter.iter().enumerate() {
            if count > self.t {
                faulty.insert(j);
            }
        }
        for j in 0..self.n {
            if j == self.me {
                continue;
            }
            for _ in 0..=self.n {
                let value = match rbc.deliver_from(j, None).await {
                    Ok(v) => v,
                    Err(_) => {
                        faulty.insert(j);
                        break;
                    }
                };
                let Some(who) = uint_to_index(&value, self.n) else {
                    break; // end marker
                };
                let s = rbc.deliver_from(j, None).await;
                let sprime = rbc.deliver_from(j, None).await;
                let (Ok(s), Ok(sprime)) = (s, sprime) else {
                    faulty.insert(j);
                    break;
                };
                if !zq.contains(&s) || !zq.contains(&sprime) {
                    tracing::warn!(target: LOG_TARGET, dealer = j, "answer out of range");
                    faulty.insert(j);
                    continue;
                }
                let s = zq.reduce(&s);
                let sprime = zq.reduce(&sprime);
                if !share_matches_commitments(
                    &domain,
                    &s,
                    &sprime,
                    &self.commitments[j],
                    (who + 1) as u64,
                ) {
                    tracing::warn!(target: LOG_TARGET, dealer = j, "answer fails equation");
                    faulty.insert(j);
                } else if who == self.me {
                    tracing::debug!(target: LOG_TARGET, dealer = j, "share adjusted from answer");
                    self.held[j] = s;
                    self.held_prime[j] = sprime;
                }
            }
        }

        self.qual = (0..self.n).filter(|j| !faulty.contains(j)).collect();
        tracing::debug!(target: LOG_TARGET, qual = ?self.qual, "qualified set decided");

        // 2. accumulate the additive share
        self.x_i = zq.zero();
        self.xprime_i = zq.zero();
        for &j in &self.qual {
            self.x_i = zq.add(&self.x_i, &self.held[j]);
            self.xprime_i = zq.add(&self.xprime_i, &self.held_prime[j]);
        }

        self.coeffs_a = Zeroizing::new(coeffs_a);
        self.coeffs_b = Zeroizing::new(coeffs_b);

        if !self.qual.contains(&self.me) {
            return Err(MpcError::Disqualified(
                "local party excluded from QUAL".to_string(),
            ));
        }
        if self.qual.len() <= self.t {
            return Err(MpcError::violation(None, "QUAL too small"));
        }
        Ok(())
    }

    /// Public reconstruction of the secrets dealt by `complained` parties.
    /// Returns `(dealer, z, coefficients)` per reconstructed dealer.
    pub async fn reconstruct(
        &self,
        complained: &[usize],
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<Vec<(usize, BoxedUint, Vec<BoxedUint>)>> {
        let channel = format!(
            "joint-vss/reconstruct|{}|{}|{}|{}",
            self.label, self.n, self.t, self.tprime
        );
        rbc.set_id(&channel);
        let result = self.reconstruct_inner(complained, rbc).await;
        rbc.unset_id();
        result
    }

    async fn reconstruct_inner(
        &self,
        complained: &[usize],
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<Vec<(usize, BoxedUint, Vec<BoxedUint>)>> {
        let zq = self.domain.zq();
        if complained.len() > self.t {
            return Err(MpcError::violation(None, "too many faulty parties"));
        }
        let mut recovered = Vec::with_capacity(complained.len());
        for &target in complained {
            // publish our share of the target's polynomial
            rbc.broadcast(&self.held[target].clone()).await?;
            rbc.broadcast(&self.held_prime[target].clone()).await?;

            let mut points: Vec<(u64, BoxedUint)> =
                vec![((self.me + 1) as u64, self.held[target].clone())];
            for &j in &self.qual {
                if j == self.me || complained.contains(&j) {
                    continue;
                }
                let s = rbc.deliver_from(j, None).await;
                let sprime = rbc.deliver_from(j, None).await;
                let (Ok(s), Ok(sprime)) = (s, sprime) else {
                    tracing::warn!(target: LOG_TARGET, from = j, "no share received");
                    continue;
                };
                if !zq.contains(&s) || !zq.contains(&sprime) {
                    tracing::warn!(target: LOG_TARGET, from = j, "share out of range");
                    continue;
                }
                let s = zq.reduce(&s);
                let sprime = zq.reduce(&sprime);
                if share_matches_commitments(
                    &self.domain,
                    &s,
                    &sprime,
                    &self.commitments[target],
                    (j + 1) as u64,
                ) {
                    points.push(((j + 1) as u64, s));
                } else {
                    tracing::warn!(target: LOG_TARGET, from = j, "bad share received");
                }
            }
            if points.len() <= self.tprime {
                return Err(MpcError::violation(
                    None,
                    "not enough shares collected for reconstruction",
                ));
            }
            points.truncate(self.tprime + 1);
            let coeffs = interpolate_polynomial(zq, &points)?;
            let z = coeffs[0].clone();
            tracing::debug!(target: LOG_TARGET, dealer = target, "secret reconstructed");
            recovered.push((target, z, coeffs));
        }
        Ok(recovered)
    }
}

/// Parses a broadcast index value; `None` for the end marker or anything
/// out of range.
pub(crate) fn uint_to_index(value: &BoxedUint, n: usize) -> Option<usize> {
    if value.bits() > 32 {
        return None;
    }
    let v = value.as_words()[0] as usize;
    if v < n {
        Some(v)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::protocol_mesh;
    use std::time::Duration;

    async fn run_rvss(
        n: usize,
        t: usize,
        corrupt: Option<(usize, usize)>,
    ) -> Vec<JointVss> {
        let mut rng = SecureRng::new(Strength::Weak);
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        let mesh = protocol_mesh(n, t, 128, Duration::from_secs(30));

        let mut handles = Vec::new();
        for (me, (mut aiou, mut rbc)) in mesh.into_iter().enumerate() {
            let domain = domain.clone();
            handles.push(tokio::spawn(async move {
                let mut vss = JointVss::new(
                    domain,
                    "test",
                    n,
                    t,
                    t,
                    me,
                    VssMode::Random,
                    Strength::Weak,
                )
                .unwrap();
                if let Some((dealer, victim)) = corrupt {
                    if dealer == me {
                        vss.corrupt_share_to = Some(victim);
                    }
                }
                vss.share(&mut aiou, &mut rbc).await.unwrap();
                vss
            }));
        }
        let mut out = Vec::new();
        for handle in handles {
            out.push(handle.await.unwrap());
        }
        out
    }

    fn assert_share_consistent(vss: &JointVss, me: usize) {
        // public invariant: g^{x_i} h^{x'_i} = Π_{j∈QUAL} Π_k C_jk^{(i+1)^k}
        let domain = vss.domain();
        let zp = domain.zp();
        let zq = domain.zq();
        let lhs = zp.mul(
            &zp.pow(domain.g(), vss.x_i()),
            &zp.pow(domain.h(), vss.xprime_i()),
        );
        let mut rhs = zp.one();
        for &j in vss.qual() {
            let x = zq.from_u64((me + 1) as u64);
            let mut power = zq.one();
            for c in &vss.commitments()[j] {
                rhs = zp.mul(&rhs, &zp.pow(c, &power));
                power = zq.mul(&power, &x);
            }
        }
        assert_eq!(lhs, rhs);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn honest_sharing_qualifies_everyone() {
        let parties = run_rvss(3, 1, None).await;
        for p in &parties {
            assert_eq!(p.qual(), &[0, 1, 2]);
        }
        for (me, p) in parties.iter().enumerate() {
            assert_share_consistent(p, me);
        }
        // commitment matrices agree across parties
        for p in &parties[1..] {
            assert_eq!(p.commitments(), parties[0].commitments());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn complaint_is_resolved_by_public_answer() {
        // n = 4, t = 1: dealer 0 corrupts the share for party 2; the
        // complaint is answered publicly and nobody is disqualified
        let parties = run_rvss(4, 1, Some((0, 2))).await;
        for p in &parties {
            assert_eq!(p.qual(), &[0, 1, 2, 3]);
        }
        // party 2 adopted the corrected share
        for (me, p) in parties.iter().enumerate() {
            assert_share_consistent(p, me);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn zero_mode_shares_a_zero_secret() {
        let mut rng = SecureRng::new(Strength::Weak);
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        let n = 3;
        let mesh = protocol_mesh(n, 1, 128, Duration::from_secs(30));
        let mut handles = Vec::new();
        for (me, (mut aiou, mut rbc)) in mesh.into_iter().enumerate() {
            let domain = domain.clone();
            handles.push(tokio::spawn(async move {
                let mut vss =
                    JointVss::new(domain, "zvss", n, 1, 1, me, VssMode::Zero, Strength::Weak)
                        .unwrap();
                vss.share(&mut aiou, &mut rbc).await.unwrap();
                vss
            }));
        }
        let mut parties = Vec::new();
        for handle in handles {
            parties.push(handle.await.unwrap());
        }
        let domain = parties[0].domain().clone();
        let zq = domain.zq();
        let zp = domain.zp();
        for p in &parties {
            assert!(zq.is_zero(p.z_i()));
            // constant-term commitments are the identity
            for &j in p.qual() {
                assert!(zp.is_one(&p.commitments()[j][0]));
            }
        }
        // the shared secret interpolates to zero
        let points: Vec<(u64, BoxedUint)> = parties
            .iter()
            .enumerate()
            .map(|(me, p)| ((me + 1) as u64, zq.reduce(p.x_i())))
            .collect();
        let secret = crate::vss::lagrange_at_zero(zq, &points[..2]).unwrap();
        assert!(zq.is_zero(&secret));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reconstruction_recovers_dealer_secret() {
        let parties = run_rvss(3, 1, None).await;
        let domain = parties[0].domain().clone();
        let zq = domain.zq().clone();
        let expected = zq.reduce(parties[0].z_i());

        // parties 1 and 2 jointly reconstruct dealer 0's contribution;
        // party 0 still relays broadcast traffic
        let mesh = protocol_mesh(3, 1, 128, Duration::from_secs(10));
        let mut handles = Vec::new();
        for ((me, (_aiou, mut rbc)), vss) in
            mesh.into_iter().enumerate().zip(parties.into_iter())
        {
            if me == 0 {
                tokio::spawn(crate::test_utils::relay(rbc, Duration::from_secs(60)));
                continue;
            }
            handles.push(tokio::spawn(async move {
                let recovered = vss.reconstruct(&[0], &mut rbc).await.unwrap();
                recovered[0].1.clone()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), expected);
        }
    }
}
