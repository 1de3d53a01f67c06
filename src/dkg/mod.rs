use std::collections::BTreeSet;

use crypto_bigint::BoxedUint;
use serde::{Deserialize, Serialize};

use crate::broadcast::ReliableBroadcast;
use crate::config::Strength;
use crate::domain::Domain;
use crate::error::{MpcError, MpcResult};
use crate::transport::SecureUnicast;
use crate::vss::rvss::uint_to_index;
use crate::vss::{JointVss, VssMode, Zvss};
use crate::wire;

const LOG_TARGET: &str = "mental_mpc::dkg";

/// Distributed key generation [GJKR07]: Joint-RVSS followed by a Feldman
/// exposure phase, producing a `(t, n)`-sharing of a secret `x` with
/// public key `y = g^x` that no party ever learns.
pub struct Dkg {
    domain: Domain,
    label: String,
    n: usize,
    t: usize,
    me: usize,
    strength: Strength,

    vss: Option<JointVss>,
    /// Feldman commitments `A[j][k] = g^{a_jk}` per dealer in QUAL.
    feldman: Vec<Vec<BoxedUint>>,
    qual: Vec<usize>,
    y: BoxedUint,
    /// `y_j = g^{z_j}` per dealer in QUAL.
    y_parts: Vec<BoxedUint>,
    /// Per-party verification keys `v_j = g^{f(j+1)}`.
    v: Vec<BoxedUint>,
    /// Known dealer contributions (own, plus any reconstructed in the
    /// clear during complaint handling).
    z: Vec<BoxedUint>,
}

/// Serialized key state, §6 layout; `publish_verification_keys` emits the
/// same shape with the secret entries zeroed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DkgState {
    pub domain: crate::domain::DomainParams,
    pub n: usize,
    pub t: usize,
    pub i: usize,
    pub x_i: String,
    pub xprime_i: String,
    pub y: String,
    pub qual: Vec<usize>,
    pub y_parts: Vec<String>,
    pub z: Vec<String>,
    pub v: Vec<String>,
    pub commitments: Vec<Vec<String>>,
}

impl Dkg {
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
        let zp = domain.zp().clone();
        Ok(Self {
            domain,
            label: label.to_string(),
            n,
            t,
            me,
            strength,
            vss: None,
            feldman: vec![Vec::new(); n],
            qual: Vec::new(),
            y: zp.one(),
            y_parts: vec![zp.one(); n],
            v: vec![zp.one(); n],
            z: vec![zp.zero(); n],
        })
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn qual(&self) -> &[usize] {
        &self.qual
    }

    /// Joint public key `y = g^x`.
    pub fn public_key(&self) -> &BoxedUint {
        &self.y
    }

    /// This party's secret share `x_i = f(i+1)`.
    pub fn share(&self) -> MpcResult<&BoxedUint> {
        self.vss
            .as_ref()
            .map(|v| v.x_i())
            .ok_or_else(|| MpcError::invalid("key generation has not run"))
    }

    pub fn share_prime(&self) -> MpcResult<&BoxedUint> {
        self.vss
            .as_ref()
            .map(|v| v.xprime_i())
            .ok_or_else(|| MpcError::invalid("key generation has not run"))
    }

    /// Verification key `v_j` of party `j`.
    pub fn verification_key(&self, j: usize) -> Option<&BoxedUint> {
        self.v.get(j)
    }

    /// Runs the generation protocol.
    pub async fn generate(
        &mut self,
        aiou: &mut SecureUnicast,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<()> {
        // 1.-3. Pedersen sharing of every party's contribution
        let mut vss = JointVss::new(
            self.domain.clone(),
            &format!("dkg/{}", self.label),
            self.n,
            self.t,
            self.t,
            self.me,
            VssMode::Random,
            self.strength,
        )?;
        vss.share(aiou, rbc).await?;

        // 4. Feldman exposure of y_i = g^{z_i}
        rbc.set_id(&format!("dkg/feldman/{}|{}|{}", self.label, self.n, self.t));
        let result = self.expose(&mut vss, rbc).await;
        rbc.unset_id();
        self.vss = Some(vss);
        result
    }

    async fn expose(
        &mut self,
        vss: &mut JointVss,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<()> {
        let domain = self.domain.clone();
        let zp = domain.zp();
        let zq = domain.zq();
        let qual = vss.qual().to_vec();

        // 4(a) broadcast A_ik = g^{a_ik}
        let own: Vec<BoxedUint> = vss
            .coeffs_a()
            .iter()
            .map(|a| zp.pow(domain.g(), a))
            .collect();
        for a in &own {
            rbc.broadcast(a).await?;
        }
        self.feldman[self.me] = own;
        self.z[self.me] = zq.reduce(vss.z_i());

        // 4(b) verify g^{s_ji} = Π A_jk^{(i+1)^k} for every dealer in QUAL
        let mut complaints: BTreeSet<usize> = BTreeSet::new();
        for &j in &qual {
            if j == self.me {
                continue;
            }
            let mut received = Vec::with_capacity(self.t + 1);
            for _ in 0..=self.t {
                match rbc.deliver_from(j, None).await {
                    Ok(a) if domain.check_element(&a) => received.push(zp.reduce(&a)),
                    _ => {
                        tracing::warn!(target: LOG_TARGET, dealer = j, "bad or missing A_ik");
                        complaints.insert(j);
                        received.push(zp.zero());
                    }
                }
            }
            self.feldman[j] = received;
            let (s, _) = vss.held_share(j);
            if !feldman_matches(&domain, s, &self.feldman[j], (self.me + 1) as u64) {
                tracing::warn!(target: LOG_TARGET, dealer = j, "Feldman check failed");
                complaints.insert(j);
            }
        }

        // complaints carry the previously verified share pair as evidence
        for &who in &complaints {
            let (s, sprime) = vss.held_share(who);
            let (s, sprime) = (s.clone(), sprime.clone());
            rbc.broadcast(&zq.from_u64(who as u64)).await?;
            rbc.broadcast(&s).await?;
            rbc.broadcast(&sprime).await?;
        }
        rbc.broadcast(&zq.from_u64(self.n as u64)).await?;

        // 4(c) a complaint is valid iff the evidence satisfies the
        // Pedersen equation and falsifies the Feldman one
        let mut extract: BTreeSet<usize> = complaints.clone();
        for &j in &qual {
            if j == self.me {
                continue;
            }
            for _ in 0..=self.n {
                let value = match rbc.deliver_from(j, None).await {
                    Ok(v) => v,
                    Err(_) => {
                        tracing::warn!(target: LOG_TARGET, from = j, "receiving complaint failed");
                        extract.insert(j);
                        break;
                    }
                };
                let Some(who) = uint_to_index(&value, self.n) else {
                    break; // end marker
                };
                let s = rbc.deliver_from(j, None).await;
                let sprime = rbc.deliver_from(j, None).await;
                let (Ok(s), Ok(sprime)) = (s, sprime) else {
                    extract.insert(j);
                    break;
                };
                if !zq.contains(&s) || !zq.contains(&sprime) {
                    tracing::warn!(target: LOG_TARGET, from = j, "evidence out of range");
                    extract.insert(j);
                    continue;
                }
                let s = zq.reduce(&s);
                let sprime = zq.reduce(&sprime);
                let pedersen_ok = crate::vss::share_matches_commitments(
                    &domain,
                    &s,
                    &sprime,
                    &vss.commitments()[who],
                    (j + 1) as u64,
                );
                let feldman_ok = !self.feldman[who].is_empty()
                    && feldman_matches(&domain, &s, &self.feldman[who], (j + 1) as u64);
                if pedersen_ok && !feldman_ok {
                    tracing::warn!(target: LOG_TARGET, against = who, from = j, "valid complaint");
                    if qual.contains(&who) {
                        extract.insert(who);
                    }
                } else {
                    tracing::warn!(target: LOG_TARGET, from = j, "invalid complaint");
                    extract.insert(j);
                }
            }
        }

        // reconstruct the complained dealers' polynomials in the clear
        let extract: Vec<usize> = extract.into_iter().collect();
        if !extract.is_empty() {
            tracing::warn!(target: LOG_TARGET, parties = ?extract, "running extraction");
            let recovered = vss.reconstruct(&extract, rbc).await?;
            if recovered.len() != extract.len() {
                return Err(MpcError::violation(None, "extraction incomplete"));
            }
            for (dealer, z, coeffs) in recovered {
                self.z[dealer] = z;
                self.feldman[dealer] = coeffs.iter().map(|a| zp.pow(domain.g(), a)).collect();
            }
        }

        // 5. public key and verification keys
        self.qual = qual.clone();
        self.y = zp.one();
        for &j in &qual {
            self.y_parts[j] = self.feldman[j]
                .first()
                .cloned()
                .unwrap_or_else(|| zp.one());
            self.y = zp.mul(&self.y, &self.y_parts[j]);
        }
        for v_idx in 0..self.n {
            let mut v_j = zp.one();
            for &i in &qual {
                let mut power = zq.one();
                let x = zq.from_u64((v_idx + 1) as u64);
                for a in &self.feldman[i] {
                    v_j = zp.mul(&v_j, &zp.pow(a, &power));
                    power = zq.mul(&power, &x);
                }
            }
            self.v[v_idx] = v_j;
        }
        tracing::debug!(target: LOG_TARGET, qual = ?self.qual, "key generation complete");
        Ok(())
    }

    /// Local self-check: `g^{x_i} = v_i`.
    pub fn check_share(&self) -> MpcResult<()> {
        let x_i = self.share()?;
        let zp = self.domain.zp();
        if zp.pow(self.domain.g(), x_i) != zp.reduce(&self.v[self.me]) {
            return Err(MpcError::crypto("share does not match verification key"));
        }
        Ok(())
    }

    /// Checks a known dealer contribution: `g^{z_j} = y_j`.
    pub fn check_contribution(&self, j: usize) -> MpcResult<()> {
        if j >= self.n {
            return Err(MpcError::invalid("party index out of range"));
        }
        let zp = self.domain.zp();
        if zp.pow(self.domain.g(), &self.z[j]) != zp.reduce(&self.y_parts[j]) {
            return Err(MpcError::crypto("contribution does not match public part"));
        }
        Ok(())
    }

    /// Proactive refresh: a Joint-ZVSS re-randomizes the sharing without
    /// changing the secret; `y` is unchanged.
    pub async fn refresh(
        &mut self,
        aiou: &mut SecureUnicast,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<()> {
        let vss = self
            .vss
            .as_mut()
            .ok_or_else(|| MpcError::invalid("key generation has not run"))?;
        let mut zvss = Zvss::new(
            self.domain.clone(),
            &format!("dkg/refresh/{}", self.label),
            self.n,
            self.t,
            self.t,
            self.me,
            self.strength,
        )?;
        zvss.share(aiou, rbc).await?;
        vss.add_to_share(zvss.x_i(), zvss.xprime_i());
        tracing::debug!(target: LOG_TARGET, "share refreshed");
        Ok(())
    }

    pub fn publish_state(&self) -> MpcResult<DkgState> {
        let vss = self
            .vss
            .as_ref()
            .ok_or_else(|| MpcError::invalid("key generation has not run"))?;
        Ok(DkgState {
            domain: self.domain.to_params(),
            n: self.n,
            t: self.t,
            i: self.me,
            x_i: wire::encode(vss.x_i()),
            xprime_i: wire::encode(vss.xprime_i()),
            y: wire::encode(&self.y),
            qual: self.qual.clone(),
            y_parts: self.y_parts.iter().map(wire::encode).collect(),
            z: self.z.iter().map(wire::encode).collect(),
            v: self.v.iter().map(wire::encode).collect(),
            commitments: vss
                .commitments()
                .iter()
                .map(|row| row.iter().map(wire::encode).collect())
                .collect(),
        })
    }

    /// Same layout as [`Dkg::publish_state`] with every secret entry
    /// zeroed, safe to hand to external verifiers.
    pub fn publish_verification_keys(&self) -> MpcResult<DkgState> {
        let mut state = self.publish_state()?;
        state.x_i = "0".to_string();
        state.xprime_i = "0".to_string();
        state.z = vec!["0".to_string(); self.n];
        Ok(state)
    }
}

/// `g^s ≟ Π_k A_k^{x^k} (mod p)`
fn feldman_matches(domain: &Domain, s: &BoxedUint, a: &[BoxedUint], x: u64) -> bool {
    let zp = domain.zp();
    let zq = domain.zq();
    let lhs = zp.pow(domain.g(), s);
    let x = zq.from_u64(x);
    let mut rhs = zp.one();
    let mut power = zq.one();
    for a_k in a {
        rhs = zp.mul(&rhs, &zp.pow(a_k, &power));
        power = zq.mul(&power, &x);
    }
    lhs == rhs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::random::SecureRng;
    use crate::test_utils::protocol_mesh;
    use crate::vss::lagrange_at_zero;
    use std::time::Duration;

    async fn run_dkg(
        n: usize,
        t: usize,
        timeout: Duration,
        silent_party: Option<usize>,
    ) -> Vec<Dkg> {
        let mut rng = SecureRng::new(Strength::Weak);
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        let mesh = protocol_mesh(n, t, 128, timeout);

        let mut handles = Vec::new();
        for (me, (mut aiou, mut rbc)) in mesh.into_iter().enumerate() {
            if silent_party == Some(me) {
                // protocol-silent adversary: its broadcast layer keeps
                // relaying so the others can still reach agreement
                tokio::spawn(crate::test_utils::relay(rbc, Duration::from_secs(120)));
                continue;
            }
            let domain = domain.clone();
            handles.push(tokio::spawn(async move {
                let mut dkg = Dkg::new(domain, "test", n, t, me, Strength::Weak).unwrap();
                dkg.generate(&mut aiou, &mut rbc).await.unwrap();
                dkg
            }));
        }
        let mut out = Vec::new();
        for handle in handles {
            out.push(handle.await.unwrap());
        }
        out
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn honest_run_produces_consistent_keys() {
        let parties = run_dkg(3, 1, Duration::from_secs(30), None).await;
        let domain = parties[0].domain().clone();
        let zp = domain.zp();
        let zq = domain.zq();

        // everyone agrees on y and QUAL
        for p in &parties[1..] {
            assert_eq!(p.public_key(), parties[0].public_key());
            assert_eq!(p.qual(), parties[0].qual());
        }
        assert_eq!(parties[0].qual(), &[0, 1, 2]);

        // local self-checks and contribution checks
        for p in &parties {
            p.check_share().unwrap();
            p.check_contribution(p.me).unwrap();
        }

        // y = g^{Σ z_i}
        let mut z_sum = zq.zero();
        for p in &parties {
            z_sum = zq.add(&z_sum, &p.z[p.me]);
        }
        assert_eq!(&zp.pow(domain.g(), &z_sum), parties[0].public_key());

        // interpolating the shares recovers the secret behind y
        let points: Vec<(u64, BoxedUint)> = parties
            .iter()
            .map(|p| ((p.me + 1) as u64, zq.reduce(p.share().unwrap())))
            .collect();
        let x = lagrange_at_zero(zq, &points[..2]).unwrap();
        assert_eq!(zp.pow(domain.g(), &x), zp.reduce(parties[0].public_key()));

        // verification keys match the shares
        for p in &parties {
            assert_eq!(
                &zp.pow(domain.g(), p.share().unwrap()),
                p.verification_key(p.me).unwrap()
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn silent_party_is_disqualified() {
        // n = 3, t = 1: party 2 goes silent; the others must still end up
        // with a usable key and QUAL = {0, 1}
        let parties = run_dkg(3, 1, Duration::from_secs(3), Some(2)).await;
        assert_eq!(parties.len(), 2);
        for p in &parties {
            assert_eq!(p.qual(), &[0, 1]);
            p.check_share().unwrap();
        }
        assert_eq!(parties[0].public_key(), parties[1].public_key());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn refresh_keeps_public_key() {
        let mut rng = SecureRng::new(Strength::Weak);
        let domain = Domain::generate_qr(&mut rng, 128).unwrap();
        let n = 3;
        let t = 1;
        let mesh = protocol_mesh(n, t, 128, Duration::from_secs(30));

        let mut handles = Vec::new();
        for (me, (mut aiou, mut rbc)) in mesh.into_iter().enumerate() {
            let domain = domain.clone();
            handles.push(tokio::spawn(async move {
                let mut dkg = Dkg::new(domain, "refresh", n, t, me, Strength::Weak).unwrap();
                dkg.generate(&mut aiou, &mut rbc).await.unwrap();
                let before = dkg.share().unwrap().clone();
                let y = dkg.public_key().clone();
                dkg.refresh(&mut aiou, &mut rbc).await.unwrap();
                (dkg, before, y)
            }));
        }
        let mut parties = Vec::new();
        for handle in handles {
            parties.push(handle.await.unwrap());
        }
        let domain = parties[0].0.domain().clone();
        let zq = domain.zq();
        let zp = domain.zp();

        for (dkg, before, y) in &parties {
            // the share moved, the public key did not
            assert_ne!(dkg.share().unwrap(), before);
            assert_eq!(dkg.public_key(), y);
        }
        // the refreshed shares still interpolate to the same secret
        let points: Vec<(u64, BoxedUint)> = parties
            .iter()
            .map(|(dkg, _, _)| ((dkg.me + 1) as u64, zq.reduce(dkg.share().unwrap())))
            .collect();
        let x = lagrange_at_zero(zq, &points).unwrap();
        assert_eq!(
            zp.pow(domain.g(), &x),
            zp.reduce(parties[0].0.public_key())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn published_verification_keys_hide_secrets() {
        let parties = run_dkg(2, 0, Duration::from_secs(30), None).await;
        let state = parties[0].publish_state().unwrap();
        assert_ne!(state.x_i, "0");
        let public = parties[0].publish_verification_keys().unwrap();
        assert_eq!(public.x_i, "0");
        assert_eq!(public.xprime_i, "0");
        assert!(public.z.iter().all(|z| z == "0"));
        assert_eq!(public.y, state.y);
        assert_eq!(public.v, state.v);

        // round-trips as JSON
        let json = serde_json::to_string(&public).unwrap();
        let back: DkgState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.y, state.y);
    }
}
