use crypto_bigint::BoxedUint;

use crate::broadcast::ReliableBroadcast;
use crate::config::Strength;
use crate::domain::Domain;
use crate::error::MpcResult;
use crate::transport::SecureUnicast;
use crate::vss::rvss::{JointVss, VssMode};

/// Joint-ZVSS: Joint-RVSS with every dealer's constant terms pinned to
/// zero, so the parties end up with a sharing of `0`. Used to
/// re-randomize existing sharings without changing the secret.
pub struct Zvss {
    inner: JointVss,
}

impl Zvss {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        domain: Domain,
        label: &str,
        n: usize,
        t: usize,
        tprime: usize,
        me: usize,
        strength: Strength,
    ) -> MpcResult<Self> {
        Ok(Self {
            inner: JointVss::new(domain, label, n, t, tprime, me, VssMode::Zero, strength)?,
        })
    }

    pub async fn share(
        &mut self,
        aiou: &mut SecureUnicast,
        rbc: &mut ReliableBroadcast,
    ) -> MpcResult<()> {
        self.inner.share(aiou, rbc).await
    }

    /// Share of zero: adding it to another sharing's share refreshes that
    /// sharing.
    pub fn x_i(&self) -> &BoxedUint {
        self.inner.x_i()
    }

    pub fn xprime_i(&self) -> &BoxedUint {
        self.inner.xprime_i()
    }

    pub fn qual(&self) -> &[usize] {
        self.inner.qual()
    }

    pub fn commitments(&self) -> &[Vec<BoxedUint>] {
        self.inner.commitments()
    }

    pub fn erase_secrets(&mut self) {
        self.inner.erase_secrets()
    }
}
