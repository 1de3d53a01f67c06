//! Multi-party wiring helpers for protocol tests: every pair of parties
//! gets an in-memory duplex pipe and a pre-shared secret.

use std::time::Duration;

use tokio::io::{duplex, split};

use crate::broadcast::ReliableBroadcast;
use crate::transport::{BoxedReader, BoxedWriter, Scheduler, SecureUnicast};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(20);

fn pair_secret(a: usize, b: usize) -> String {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    format!("test mesh secret {lo}-{hi}")
}

/// Fully-connected mesh of `n` secure unicast transports.
pub fn unicast_mesh(n: usize, value_bits: u32) -> Vec<SecureUnicast> {
    unicast_mesh_with_timeout(n, value_bits, TEST_TIMEOUT)
}

pub fn unicast_mesh_with_timeout(
    n: usize,
    value_bits: u32,
    timeout: Duration,
) -> Vec<SecureUnicast> {
    let mut endpoints: Vec<Vec<Option<(BoxedReader, BoxedWriter)>>> = (0..n)
        .map(|_| (0..n).map(|_| None).collect())
        .collect();
    for i in 0..n {
        for j in i + 1..n {
            let (side_i, side_j) = duplex(1 << 20);
            let (ri, wi) = split(side_i);
            let (rj, wj) = split(side_j);
            endpoints[i][j] = Some((Box::new(ri) as BoxedReader, Box::new(wi) as BoxedWriter));
            endpoints[j][i] = Some((Box::new(rj) as BoxedReader, Box::new(wj) as BoxedWriter));
        }
    }
    endpoints
        .into_iter()
        .enumerate()
        .map(|(i, eps)| {
            let keys: Vec<String> = (0..n).map(|j| pair_secret(i, j)).collect();
            SecureUnicast::new(n, i, eps, &keys, value_bits, false, timeout)
                .expect("mesh construction")
        })
        .collect()
}

/// Mesh of reliable-broadcast instances over fresh unicast transports.
pub fn rbc_mesh(n: usize, t: usize, value_bits: u32) -> Vec<ReliableBroadcast> {
    unicast_mesh(n, value_bits)
        .into_iter()
        .map(|u| {
            ReliableBroadcast::new(u, t, Scheduler::RoundRobin, TEST_TIMEOUT)
                .expect("rbc construction")
        })
        .collect()
}

/// Channel width covering a domain of `domain_bits` plus broadcast tags.
pub fn channel_bits(domain_bits: u32) -> u32 {
    domain_bits.max(320) + 64
}

/// Per-party protocol endpoints: a direct unicast transport plus a
/// reliable broadcast over its own second transport, so sub-protocol
/// sends can never interleave with broadcast frames.
pub fn protocol_mesh(
    n: usize,
    t: usize,
    domain_bits: u32,
    timeout: Duration,
) -> Vec<(SecureUnicast, ReliableBroadcast)> {
    let bits = channel_bits(domain_bits);
    let direct = unicast_mesh_with_timeout(n, bits, timeout);
    let broadcast = unicast_mesh_with_timeout(n, bits, timeout);
    direct
        .into_iter()
        .zip(broadcast)
        .map(|(aiou, aiou2)| {
            let rbc = ReliableBroadcast::new(aiou2, t, Scheduler::RoundRobin, timeout)
                .expect("rbc construction");
            (aiou, rbc)
        })
        .collect()
}

/// Keeps a party's broadcast layer alive without taking part in any
/// protocol: it processes (and thereby echoes) everyone else's traffic.
/// Models a protocol-silent but transport-live adversary.
pub async fn relay(mut rbc: ReliableBroadcast, duration: Duration) -> ReliableBroadcast {
    let start = tokio::time::Instant::now();
    while start.elapsed() < duration {
        let _ = rbc.deliver(Some(Duration::from_millis(200))).await;
    }
    rbc
}
