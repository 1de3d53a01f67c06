use crypto_bigint::BoxedUint;

use crate::broadcast::ReliableBroadcast;
use crate::config::Strength;
use crate::domain::Domain;
use crate::error::{MpcError, MpcResult};
use crate::transport::SecureUnicast;
use crate::vss::rvss::{JointVss, VssMode};

const LOG_TARGET: &str = "mental_mpc::vss::coinflip";

/// Erasure-free distributed coin flip [JL00]: a Joint-RVSS followed by
/// public reconstruction of every dealer's contribution. With at most `t`
/// corrupted parties the output is a fresh uniform element of `Z_q`.
pub struct Edcf {
    domain: Domain,
    n: usize,
    t: usize,
    me: usize,
    strength: Strength,
    flips: u64,
}

impl Edcf {
    pub fn new(domain: Domain, n: usize, t: usize, me: usize, strength: Strength) -> MpcResult<Self> {
        if t > n || me >= n {
            return Err(MpcError::invalid("bad threshold parameters"));
        }
        Ok(Self {
            domain,
            n,
            t,
            me,
            strength,
            flips: 0,
        })
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Flips one joint coin. All parties must call this the same number of
    /// times in the same order.
    pub async fn flip(
        &mut self,
        aiou: &mut SecureUnicast,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<BoxedUint> {
        self.flips += 1;
        let label = format!("edcf/flip-{}", self.flips);
        let mut vss = JointVss::new(
            self.domain.clone(),
            &label,
            self.n,
            self.t,
            self.t,
            self.me,
            VssMode::Random,
            self.strength,
        )?;
        vss.share(aiou, rbc).await?;

        // reveal phase: every qualified dealer opens its contribution
        rbc.set_id(&format!("edcf/reveal-{}", self.flips));
        let result = self.reveal(&vss, rbc).await;
        rbc.unset_id();
        result
    }

    async fn reveal(
        &self,
        vss: &JointVss,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<BoxedUint> {
        let zq = self.domain.zq();
        let zp = self.domain.zp();
        rbc.broadcast(&vss.z_i().clone()).await?;
        rbc.broadcast(&vss.zprime_i().clone()).await?;

        let mut coin = zq.reduce(vss.z_i());
        let mut failed: Vec<usize> = Vec::new();
        for &j in vss.qual() {
            if j == self.me {
                continue;
            }
            let z = rbc.deliver_from(j, None).await;
            let zprime = rbc.deliver_from(j, None).await;
            let opened = match (z, zprime) {
                (Ok(z), Ok(zprime)) if zq.contains(&z) && zq.contains(&zprime) => {
                    let z = zq.reduce(&z);
                    let zprime = zq.reduce(&zprime);
                    // the opening must match the committed constant term
                    let lhs = zp.mul(
                        &zp.pow(self.domain.g(), &z),
                        &zp.pow(self.domain.h(), &zprime),
                    );
                    match vss.commitments()[j].first() {
                        Some(c0) if lhs == zp.reduce(c0) => Some(z),
                        _ => None,
                    }
                }
                _ => None,
            };
            match opened {
                Some(z) => coin = zq.add(&coin, &z),
                None => {
                    tracing::warn!(target: LOG_TARGET, dealer = j, "opening failed, reconstructing");
                    failed.push(j);
                }
            }
        }
        if !failed.is_empty() {
            for (dealer, z, _) in vss.reconstruct(&failed, rbc).await? {
                tracing::debug!(target: LOG_TARGET, dealer, "contribution reconstructed");
                coin = zq.add(&coin, &z);
            }
        }
        Ok(coin)
    }
}
