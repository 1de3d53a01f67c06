use std::collections::HashSet;

use crypto_bigint::BoxedUint;
use zeroize::Zeroizing;

use crate::arith::random::SecureRng;
use crate::broadcast::ReliableBroadcast;
use crate::config::Strength;
use crate::domain::Domain;
use crate::error::{MpcError, MpcResult};
use crate::transport::{Scheduler, SecureUnicast};
use crate::vss::{eval_poly, lagrange_at_zero, share_matches_commitments};

const LOG_TARGET: &str = "mental_mpc::vss::pedersen";

/// Pedersen's verifiable secret sharing [Pe92] with a single dealer: any
/// `t+1` shares reconstruct the secret, and a cheating dealer is caught
/// by the commitment equation.
pub struct PedersenVss {
    domain: Domain,
    label: String,
    n: usize,
    t: usize,
    me: usize,
    rng: SecureRng,

    dealer: Option<usize>,
    /// Coefficient commitments `A_k = g^{a_k} h^{b_k}`.
    commitments: Vec<BoxedUint>,
    /// This party's share `(σ_i, τ_i)`.
    sigma_i: Zeroizing<BoxedUint>,
    tau_i: Zeroizing<BoxedUint>,
    /// Dealer-only: the sharing polynomials.
    coeffs_a: Zeroizing<Vec<BoxedUint>>,
    coeffs_b: Zeroizing<Vec<BoxedUint>>,
}

impl PedersenVss {
    pub fn new(
        domain: Domain,
        label: &str,
        n: usize,
        t: usize,
        me: usize,
        strength: Strength,
    ) -> MpcResult<Self> {
        if t > n || me >= n {
            return Err(MpcError::invalid("bad threshold parameters"));
        }
        let zq = domain.zq().clone();
        Ok(Self {
            domain,
            label: label.to_string(),
            n,
            t,
            me,
            rng: SecureRng::new(strength),
            dealer: None,
            commitments: Vec::new(),
            sigma_i: Zeroizing::new(zq.zero()),
            tau_i: Zeroizing::new(zq.zero()),
            coeffs_a: Zeroizing::new(Vec::new()),
            coeffs_b: Zeroizing::new(Vec::new()),
        })
    }

    pub fn share(&self) -> (&BoxedUint, &BoxedUint) {
        (&self.sigma_i, &self.tau_i)
    }

    pub fn commitments(&self) -> &[BoxedUint] {
        &self.commitments
    }

    /// Deals `sigma` to all parties.
    pub async fn deal(
        &mut self,
        sigma: &BoxedUint,
        aiou: &mut SecureUnicast,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<()> {
        rbc.set_id(&self.channel_label(self.me));
        let result = self.deal_inner(sigma, aiou, rbc).await;
        rbc.unset_id();
        result
    }

    async fn deal_inner(
        &mut self,
        sigma: &BoxedUint,
        aiou: &mut SecureUnicast,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<()> {
        if 2 * self.t >= self.n {
            tracing::warn!(target: LOG_TARGET, "maximum synchronous t-resilience exceeded");
        }
        let domain = self.domain.clone();
        let zp = domain.zp();
        let zq = domain.zq();
        self.dealer = Some(self.me);

        // choose f, f' with f(0) = sigma and commit to the coefficients
        let mut coeffs_a = Vec::with_capacity(self.t + 1);
        let mut coeffs_b = Vec::with_capacity(self.t + 1);
        for k in 0..=self.t {
            coeffs_a.push(if k == 0 {
                zq.reduce(sigma)
            } else {
                self.rng.below(domain.q())
            });
            coeffs_b.push(self.rng.below(domain.q()));
        }
        self.commitments = Vec::with_capacity(self.t + 1);
        for k in 0..=self.t {
            let c = zp.mul(
                &zp.pow(domain.g(), &coeffs_a[k]),
                &zp.pow(domain.h(), &coeffs_b[k]),
            );
            rbc.broadcast(&c).await?;
            self.commitments.push(c);
        }

        // send each player its share
        for j in 0..self.n {
            if j == self.me {
                continue;
            }
            let s = eval_poly(zq, &coeffs_a, (j + 1) as u64);
            let sprime = eval_poly(zq, &coeffs_b, (j + 1) as u64);
            if aiou.send(&s, j, None).await.is_err()
                || aiou.send(&sprime, j, None).await.is_err()
            {
                tracing::warn!(target: LOG_TARGET, to = j, "sending share failed");
            }
        }

        // collect complaints from every player
        let complainers = self.collect_complaints(rbc, self.me).await?;
        if complainers.len() > self.t {
            return Err(MpcError::Disqualified(
                "too many complaints against this dealer".to_string(),
            ));
        }
        // answer with the correct shares, which thereby become public
        for &j in &complainers {
            rbc.broadcast(&zq.from_u64(j as u64)).await?;
            rbc.broadcast(&eval_poly(zq, &coeffs_a, (j + 1) as u64)).await?;
            rbc.broadcast(&eval_poly(zq, &coeffs_b, (j + 1) as u64)).await?;
        }
        if !complainers.is_empty() {
            tracing::warn!(
                target: LOG_TARGET,
                count = complainers.len(),
                "some shares have been revealed to the public"
            );
        }

        *self.sigma_i = eval_poly(zq, &coeffs_a, (self.me + 1) as u64);
        *self.tau_i = eval_poly(zq, &coeffs_b, (self.me + 1) as u64);
        self.coeffs_a = Zeroizing::new(coeffs_a);
        self.coeffs_b = Zeroizing::new(coeffs_b);
        Ok(())
    }

    /// Receives a share from `dealer`.
    pub async fn receive(
        &mut self,
        dealer: usize,
        aiou: &mut SecureUnicast,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<()> {
        if dealer >= self.n || dealer == self.me {
            return Err(MpcError::invalid("bad dealer index"));
        }
        rbc.set_id(&self.channel_label(dealer));
        let result = self.receive_inner(dealer, aiou, rbc).await;
        rbc.unset_id();
        result
    }

    async fn receive_inner(
        &mut self,
        dealer: usize,
        aiou: &mut SecureUnicast,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<()> {
        let domain = self.domain.clone();
        let zq = domain.zq();
        let zp = domain.zp();
        self.dealer = Some(dealer);

        // the dealer's coefficient commitments
        self.commitments = Vec::with_capacity(self.t + 1);
        let mut dealer_ok = true;
        for _ in 0..=self.t {
            match rbc.deliver_from(dealer, None).await {
                Ok(c) if domain.check_element(&c) => self.commitments.push(zp.reduce(&c)),
                _ => {
                    tracing::warn!(target: LOG_TARGET, dealer, "bad or missing commitment");
                    dealer_ok = false;
                    self.commitments.push(zp.zero());
                }
            }
        }

        // our share over the private channel
        let mut have_share = false;
        let s = aiou.receive_any(Scheduler::Direct(dealer), None).await;
        let sprime = aiou.receive_any(Scheduler::Direct(dealer), None).await;
        if let (Ok((_, s)), Ok((_, sprime))) = (s, sprime) {
            if zq.contains(&s) && zq.contains(&sprime) {
                *self.sigma_i = zq.reduce(&s);
                *self.tau_i = zq.reduce(&sprime);
                have_share = true;
            }
        }
        let valid = have_share
            && dealer_ok
            && share_matches_commitments(
                &domain,
                &self.sigma_i,
                &self.tau_i,
                &self.commitments,
                (self.me + 1) as u64,
            );

        // broadcast a complaint when the share fails, then the end marker
        if !valid {
            tracing::warn!(target: LOG_TARGET, dealer, "broadcasting complaint");
            rbc.broadcast(&zq.from_u64(dealer as u64)).await?;
        }
        rbc.broadcast(&zq.from_u64(self.n as u64)).await?;

        let complainers = self.collect_complaints(rbc, dealer).await?;
        let mut all_complaints: HashSet<usize> = complainers.into_iter().collect();
        if !valid {
            all_complaints.insert(self.me);
        }
        if all_complaints.len() > self.t {
            return Err(MpcError::violation(dealer, "dealer disqualified"));
        }

        // the dealer answers each complaint in the open
        for _ in 0..all_complaints.len() {
            let who = rbc.deliver_from(dealer, None).await?;
            let s = rbc.deliver_from(dealer, None).await?;
            let sprime = rbc.deliver_from(dealer, None).await?;
            let Some(who) = super::rvss::uint_to_index(&who, self.n) else {
                return Err(MpcError::violation(dealer, "malformed complaint answer"));
            };
            if !zq.contains(&s) || !zq.contains(&sprime) {
                return Err(MpcError::violation(dealer, "answer out of range"));
            }
            let s = zq.reduce(&s);
            let sprime = zq.reduce(&sprime);
            if !share_matches_commitments(&domain, &s, &sprime, &self.commitments, (who + 1) as u64)
            {
                return Err(MpcError::violation(dealer, "answer fails the share equation"));
            }
            if who == self.me {
                tracing::debug!(target: LOG_TARGET, dealer, "share adjusted from public answer");
                *self.sigma_i = s;
                *self.tau_i = sprime;
            }
        }
        Ok(())
    }

    /// Reads every non-dealer party's complaint list (end-marked by `n`)
    /// and returns the sorted set of complainers against `dealer`.
    async fn collect_complaints(
        &self,
        rbc: &mut ReliableBroadcast,
        dealer: usize,
    ) -> MpcResult<Vec<usize>> {
        let mut complainers: Vec<usize> = Vec::new();
        for j in 0..self.n {
            if j == self.me || j == dealer {
                continue;
            }
            let mut dup: HashSet<usize> = HashSet::new();
            for _ in 0..=self.n {
                let value = match rbc.deliver_from(j, None).await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                match super::rvss::uint_to_index(&value, self.n) {
                    None => break, // end marker
                    Some(who) => {
                        if who == dealer && dup.insert(j) {
                            complainers.push(j);
                        } else {
                            tracing::warn!(
                                target: LOG_TARGET,
                                from = j, against = who,
                                "bad or duplicate complaint"
                            );
                        }
                    }
                }
            }
        }
        complainers.sort_unstable();
        Ok(complainers)
    }

    /// Public reconstruction: every party opens its share, `t+1` verified
    /// shares interpolate the secret.
    pub async fn reconstruct(&self, rbc: &mut ReliableBroadcast) -> MpcResult<BoxedUint> {
        let dealer = self
            .dealer
            .ok_or_else(|| MpcError::invalid("no sharing to reconstruct"))?;
        rbc.set_id(&format!("{}|reconstruct", self.channel_label(dealer)));
        let result = self.reconstruct_inner(rbc).await;
        rbc.unset_id();
        result
    }

    async fn reconstruct_inner(&self, rbc: &mut ReliableBroadcast) -> MpcResult<BoxedUint> {
        let zq = self.domain.zq();
        rbc.broadcast(&self.sigma_i.clone()).await?;
        rbc.broadcast(&self.tau_i.clone()).await?;

        let mut points: Vec<(u64, BoxedUint)> =
            vec![((self.me + 1) as u64, (*self.sigma_i).clone())];
        for j in 0..self.n {
            if j == self.me || points.len() > self.t {
                continue;
            }
            let s = rbc.deliver_from(j, None).await;
            let sprime = rbc.deliver_from(j, None).await;
            let (Ok(s), Ok(sprime)) = (s, sprime) else {
                tracing::warn!(target: LOG_TARGET, from = j, "no share received");
                continue;
            };
            if !zq.contains(&s) || !zq.contains(&sprime) {
                continue;
            }
            let s = zq.reduce(&s);
            let sprime = zq.reduce(&sprime);
            if share_matches_commitments(
                &self.domain,
                &s,
                &sprime,
                &self.commitments,
                (j + 1) as u64,
            ) {
                points.push(((j + 1) as u64, s));
            } else {
                tracing::warn!(target: LOG_TARGET, from = j, "bad share received");
            }
        }
        if points.len() <= self.t {
            return Err(MpcError::violation(None, "not enough shares to reconstruct"));
        }
        points.truncate(self.t + 1);
        lagrange_at_zero(zq, &points)
    }

    fn channel_label(&self, dealer: usize) -> String {
        format!(
            "pedersen-vss|{}|{}|{}|{}",
            self.label, self.n, self.t, dealer
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::protocol_mesh;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn deal_verify_reconstruct_round_trip() {
        let mut rng = SecureRng::new(Strength::Weak);
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        let n = 4;
        let t = 1;
        let dealer = 0;
        let secret = rng.below(domain.q());
        let mesh = protocol_mesh(n, t, 128, Duration::from_secs(30));

        let mut handles = Vec::new();
        for (me, (mut aiou, mut rbc)) in mesh.into_iter().enumerate() {
            let domain = domain.clone();
            let secret = secret.clone();
            handles.push(tokio::spawn(async move {
                let mut vss =
                    PedersenVss::new(domain, "test", n, t, me, Strength::Weak).unwrap();
                if me == dealer {
                    vss.deal(&secret, &mut aiou, &mut rbc).await.unwrap();
                } else {
                    vss.receive(dealer, &mut aiou, &mut rbc).await.unwrap();
                }
                let recovered = vss.reconstruct(&mut rbc).await.unwrap();
                (vss, recovered)
            }));
        }
        let mut parties = Vec::new();
        for handle in handles {
            parties.push(handle.await.unwrap());
        }
        let zq = domain.zq();
        for (vss, recovered) in &parties {
            assert_eq!(recovered, &zq.reduce(&secret));
            // every held share satisfies the public commitment equation
            let (sigma, tau) = vss.share();
            assert!(!zq.is_zero(sigma) || !zq.is_zero(tau));
        }
        // commitments agree and bind the secret: A_0 = g^σ h^τ0
        let (d_vss, _) = &parties[0];
        for (vss, _) in &parties[1..] {
            assert_eq!(vss.commitments(), d_vss.commitments());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shares_interpolate_to_the_secret() {
        let mut rng = SecureRng::new(Strength::Weak);
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        let n = 3;
        let t = 1;
        let secret = rng.below(domain.q());
        let mesh = protocol_mesh(n, t, 128, Duration::from_secs(30));

        let mut handles = Vec::new();
        for (me, (mut aiou, mut rbc)) in mesh.into_iter().enumerate() {
            let domain = domain.clone();
            let secret = secret.clone();
            handles.push(tokio::spawn(async move {
                let mut vss =
                    PedersenVss::new(domain, "interp", n, t, me, Strength::Weak).unwrap();
                if me == 0 {
                    vss.deal(&secret, &mut aiou, &mut rbc).await.unwrap();
                } else {
                    vss.receive(0, &mut aiou, &mut rbc).await.unwrap();
                }
                vss.share().0.clone()
            }));
        }
        let mut shares = Vec::new();
        for handle in handles {
            shares.push(handle.await.unwrap());
        }
        let zq = domain.zq();
        let points: Vec<(u64, crypto_bigint::BoxedUint)> = shares
            .iter()
            .enumerate()
            .map(|(me, s)| ((me + 1) as u64, zq.reduce(s)))
            .collect();
        let recovered = lagrange_at_zero(zq, &points[..2]).unwrap();
        assert_eq!(recovered, zq.reduce(&secret));
    }
}
