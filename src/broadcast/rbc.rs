use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use crypto_bigint::BoxedUint;
use tokio::time::Instant;

use crate::config::{SEND_TIMEOUT, SYNC_SLICES};
use crate::error::{MpcError, MpcResult};
use crate::transcript::Shash;
use crate::transport::{Scheduler, SecureUnicast};

const LOG_TARGET: &str = "mental_mpc::broadcast::rbc";

const ACTION_SEND: u64 = 1;
const ACTION_ECHO: u64 = 2;
const ACTION_READY: u64 = 3;
const ACTION_REQUEST: u64 = 4;
const ACTION_ANSWER: u64 = 5;

/// Per-message identifier `shash(ID, j, s)`.
type Tag = [u8; 32];
/// Hash values are counted by their canonical byte representation.
type DigestKey = Vec<u8>;

#[derive(Clone, Debug)]
struct RbcMessage {
    id: BoxedUint,
    sender: usize,
    seq: u64,
    action: u64,
    payload: BoxedUint,
}

/// Optimized Bracha reliable broadcast with FIFO delivery per sender,
/// tolerating up to `t < n/3` Byzantine parties.
///
/// The instance owns its unicast transport outright; sub-protocols that
/// need private point-to-point traffic run a second transport alongside,
/// so broadcast frames can never interleave with direct sends. Nested
/// sub-protocols call [`ReliableBroadcast::set_id`] /
/// [`ReliableBroadcast::unset_id`] so their messages live in a disjoint
/// tag space.
pub struct ReliableBroadcast {
    unicast: SecureUnicast,
    n: usize,
    t: usize,
    me: usize,
    id: BoxedUint,
    seq: u64,
    deliver_s: Vec<u64>,
    id_stack: Vec<(BoxedUint, u64, Vec<u64>)>,

    // at most one acknowledgement of each kind per (peer, tag)
    seen_send: Vec<HashSet<Tag>>,
    seen_echo: Vec<HashSet<Tag>>,
    seen_ready: Vec<HashSet<Tag>>,
    seen_request: Vec<HashSet<Tag>>,
    seen_answer: Vec<HashSet<Tag>>,

    mbar: HashMap<Tag, BoxedUint>,
    dbar: HashMap<Tag, BoxedUint>,
    echo_count: HashMap<Tag, HashMap<DigestKey, usize>>,
    ready_count: HashMap<Tag, HashMap<DigestKey, usize>>,

    /// Confirmed messages whose per-sender sequence is not yet due.
    deliver_buf: Vec<RbcMessage>,
    /// Raw values per peer until a full five-value message accumulates.
    partial: Vec<VecDeque<BoxedUint>>,
    /// Own fan-out messages are processed through this queue instead of
    /// the network.
    loopback: VecDeque<RbcMessage>,
    /// Delivered values waiting for a `deliver_from` of a specific peer,
    /// together with the channel ID they were delivered under.
    from_buf: Vec<Vec<(BoxedUint, BoxedUint)>>,

    scheduler: Scheduler,
    default_timeout: Duration,
    /// Every stored/compared value is normalized to this precision, the
    /// same one the transport hands out.
    precision: u32,
}

impl ReliableBroadcast {
    pub fn new(
        unicast: SecureUnicast,
        t: usize,
        scheduler: Scheduler,
        default_timeout: Duration,
    ) -> MpcResult<Self> {
        let n = unicast.parties();
        let me = unicast.whoami();
        if n < 2 {
            return Err(MpcError::invalid("reliable broadcast needs n >= 2"));
        }
        if 3 * t >= n {
            tracing::warn!(
                target: LOG_TARGET,
                n, t,
                "maximum asynchronous t-resilience exceeded"
            );
        }
        if unicast.value_bits() < 320 {
            return Err(MpcError::invalid(
                "channel too narrow for broadcast tags and digests",
            ));
        }
        let precision = unicast.value_bits().next_multiple_of(64);
        Ok(Self {
            unicast,
            n,
            t,
            me,
            id: BoxedUint::zero_with_precision(precision),
            seq: 0,
            deliver_s: vec![1; n],
            id_stack: Vec::new(),
            seen_send: vec![HashSet::new(); n],
            seen_echo: vec![HashSet::new(); n],
            seen_ready: vec![HashSet::new(); n],
            seen_request: vec![HashSet::new(); n],
            seen_answer: vec![HashSet::new(); n],
            mbar: HashMap::new(),
            dbar: HashMap::new(),
            echo_count: HashMap::new(),
            ready_count: HashMap::new(),
            deliver_buf: Vec::new(),
            partial: vec![VecDeque::new(); n],
            loopback: VecDeque::new(),
            from_buf: vec![Vec::new(); n],
            scheduler,
            default_timeout,
            precision,
        })
    }

    pub fn parties(&self) -> usize {
        self.n
    }

    pub fn threshold(&self) -> usize {
        self.t
    }

    pub fn whoami(&self) -> usize {
        self.me
    }

    /// Access to the broadcast layer's own transport (sequence resets,
    /// liveness queries).
    pub fn unicast_mut(&mut self) -> &mut SecureUnicast {
        &mut self.unicast
    }

    /// Enters a nested channel: the new ID binds the caller's label to the
    /// current ID, and all sequence counters restart.
    pub fn set_id(&mut self, label: &str) {
        self.id_stack
            .push((self.id.clone(), self.seq, self.deliver_s.clone()));
        self.id = Shash::new("rbc/channel_id_v1")
            .absorb_str(label)
            .absorb_uint(&self.id)
            .finish_uint(self.precision);
        self.seq = 0;
        self.deliver_s = vec![1; self.n];
        tracing::debug!(target: LOG_TARGET, label, "entered nested channel");
    }

    /// Leaves the nested channel and restores the previous counters.
    pub fn unset_id(&mut self) {
        match self.id_stack.pop() {
            Some((id, seq, deliver_s)) => {
                self.id = id;
                self.seq = seq;
                self.deliver_s = deliver_s;
            }
            None => {
                self.id = BoxedUint::zero_with_precision(self.precision);
                self.seq = 0;
                self.deliver_s = vec![1; self.n];
            }
        }
    }

    /// Broadcasts `m` to every party (including the local one).
    pub async fn broadcast(&mut self, m: &BoxedUint) -> MpcResult<()> {
        let payload = crate::arith::with_precision(m, self.precision)
            .filter(|v| v.bits() <= self.unicast.value_bits())
            .ok_or_else(|| MpcError::invalid("value exceeds the broadcast bound"))?;
        self.seq += 1;
        let msg = RbcMessage {
            id: self.id.clone(),
            sender: self.me,
            seq: self.seq,
            action: ACTION_SEND,
            payload,
        };
        self.fan_out(&msg).await;
        Ok(())
    }

    /// Delivers the next broadcast value in FIFO order per sender.
    /// Returns `(sender, value)`.
    pub async fn deliver(&mut self, timeout: Option<Duration>) -> MpcResult<(usize, BoxedUint)> {
        let deadline = timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();
        loop {
            // first: anything already confirmed and now due?
            if let Some(pos) = self.deliver_buf.iter().position(|m| {
                m.id == self.id && m.seq == self.deliver_s[m.sender]
            }) {
                let msg = self.deliver_buf.remove(pos);
                let tag = self.tag_of(&msg);
                let value = self
                    .mbar
                    .get(&tag)
                    .cloned()
                    .ok_or_else(|| MpcError::violation(msg.sender, "confirmed tag without value"))?;
                self.deliver_s[msg.sender] += 1;
                return Ok((msg.sender, value));
            }

            // second: process buffered / incoming protocol messages
            match self.next_message(start, deadline).await? {
                Some((from, msg)) => {
                    if let Some((sender, value)) = self.handle(from, msg).await? {
                        return Ok((sender, value));
                    }
                }
                None => {
                    if start.elapsed() >= deadline {
                        return Err(MpcError::timeout("delivering broadcast value".to_string()));
                    }
                }
            }
        }
    }

    /// Buffered delivery: loops [`ReliableBroadcast::deliver`] until a
    /// value from `from` under the current channel ID is available.
    pub async fn deliver_from(
        &mut self,
        from: usize,
        timeout: Option<Duration>,
    ) -> MpcResult<BoxedUint> {
        if from >= self.n {
            return Err(MpcError::invalid("sender index out of range"));
        }
        let deadline = timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();
        loop {
            if let Some(pos) = self.from_buf[from].iter().position(|(_, id)| *id == self.id) {
                let (value, _) = self.from_buf[from].remove(pos);
                return Ok(value);
            }
            if start.elapsed() >= deadline {
                tracing::warn!(target: LOG_TARGET, from, "timeout delivering from peer");
                return Err(MpcError::timeout(format!("delivering from {from}")));
            }
            match self.deliver(Some(Duration::from_millis(100))).await {
                Ok((sender, value)) => {
                    let id = self.id.clone();
                    self.from_buf[sender].push((value, id));
                }
                Err(e) if e.is_transient() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Approximate clock agreement: everyone broadcasts its remaining
    /// timeout, the median adjusts the local one. Succeeds when the final
    /// adjustment stays within one slice.
    pub async fn sync(&mut self, timeout: Duration, label: &str) -> MpcResult<()> {
        let total = timeout * (self.t as u32 + 1);
        self.set_id(&format!("rbc/sync/{label}"));
        let slice = total / SYNC_SLICES + Duration::from_millis(1);
        let start = Instant::now();
        let mut deadline = total;
        let mut last_diff = i64::MAX;
        let result = loop {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                break last_diff.unsigned_abs() <= slice.as_millis() as u64;
            }
            let remaining = (deadline - elapsed).as_millis() as u64;
            let remaining_uint = BoxedUint::from(remaining).widen(self.precision);
            if self.broadcast(&remaining_uint).await.is_err() {
                break false;
            }
            let mut stamps: HashMap<usize, u64> = HashMap::new();
            stamps.insert(self.me, remaining);
            let slice_start = Instant::now();
            while slice_start.elapsed() < slice {
                match self.deliver(Some(slice.saturating_sub(slice_start.elapsed()))).await {
                    Ok((sender, value)) => {
                        let stamp = value.as_words()[0];
                        if value.bits() <= 64 && stamp <= deadline.as_millis() as u64 * 2 {
                            stamps.insert(sender, stamp);
                        } else {
                            tracing::warn!(target: LOG_TARGET, sender, "bad sync timestamp");
                        }
                    }
                    Err(_) => break,
                }
            }
            if stamps.len() < self.n - self.t {
                tracing::warn!(target: LOG_TARGET, "not enough sync timestamps received");
                continue;
            }
            let mut values: Vec<u64> = stamps.values().copied().collect();
            values.sort_unstable();
            let median = values[values.len() / 2];
            let spent = slice_start.duration_since(start).as_millis() as i64;
            let diff = median as i64 - (deadline.as_millis() as i64 - spent);
            last_diff = diff;
            if diff.unsigned_abs() <= total.as_millis() as u64 {
                let adjusted = deadline.as_millis() as i64 + diff;
                deadline = Duration::from_millis(adjusted.max(0) as u64);
            } else {
                tracing::warn!(target: LOG_TARGET, diff, "time jump detected");
            }
        };
        self.unset_id();
        if result {
            Ok(())
        } else {
            Err(MpcError::Transient("synchronization failed".to_string()))
        }
    }

    fn tag_of(&self, msg: &RbcMessage) -> Tag {
        Shash::new("rbc/tag_v1")
            .absorb_uint(&msg.id)
            .absorb_u64(msg.sender as u64)
            .absorb_u64(msg.seq)
            .finish_raw()
    }

    fn digest(&self, m: &BoxedUint) -> BoxedUint {
        Shash::new("rbc/digest_v1")
            .absorb_uint(m)
            .finish_uint(self.precision)
    }

    fn digest_key(d: &BoxedUint) -> DigestKey {
        let bytes = d.to_be_bytes();
        let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        bytes[first..].to_vec()
    }

    /// Sends `msg` to every peer and queues the local copy.
    async fn fan_out(&mut self, msg: &RbcMessage) {
        for peer in 0..self.n {
            if peer == self.me {
                continue;
            }
            if let Err(e) = self.send_to(msg, peer).await {
                tracing::warn!(
                    target: LOG_TARGET,
                    peer, action = msg.action, error = %e,
                    "sending broadcast message failed"
                );
            }
        }
        self.loopback.push_back(msg.clone());
    }

    async fn send_to(&mut self, msg: &RbcMessage, peer: usize) -> MpcResult<()> {
        let fields = [
            msg.id.clone(),
            BoxedUint::from(msg.sender as u64),
            BoxedUint::from(msg.seq),
            BoxedUint::from(msg.action),
            msg.payload.clone(),
        ];
        for field in fields {
            self.unicast.send(&field, peer, Some(SEND_TIMEOUT)).await?;
        }
        Ok(())
    }

    /// Pulls the next complete five-value message from the loopback queue,
    /// the per-peer buffers, or the wire. `None` on poll timeout.
    async fn next_message(
        &mut self,
        start: Instant,
        deadline: Duration,
    ) -> MpcResult<Option<(usize, RbcMessage)>> {
        if let Some(msg) = self.loopback.pop_front() {
            return Ok(Some((self.me, msg)));
        }
        for peer in 0..self.n {
            if self.partial[peer].len() >= 5 {
                return Ok(Some((peer, self.pop_partial(peer)?)));
            }
        }
        let poll = Duration::from_millis(50).min(deadline.saturating_sub(start.elapsed()));
        match self.unicast.receive_any(self.scheduler, Some(poll)).await {
            Ok((peer, value)) => {
                self.partial[peer].push_back(value);
                if self.partial[peer].len() >= 5 {
                    return Ok(Some((peer, self.pop_partial(peer)?)));
                }
                Ok(None)
            }
            Err(e) if e.is_transient() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn pop_partial(&mut self, peer: usize) -> MpcResult<RbcMessage> {
        let mut take = || {
            self.partial[peer]
                .pop_front()
                .ok_or_else(|| MpcError::violation(peer, "truncated broadcast message"))
        };
        let id = take()?;
        let sender = take()?;
        let seq = take()?;
        let action = take()?;
        let payload = take()?;
        let as_u64 = |v: &BoxedUint| -> Option<u64> {
            if v.bits() <= 64 {
                Some(v.as_words()[0])
            } else {
                None
            }
        };
        Ok(RbcMessage {
            id,
            sender: as_u64(&sender).unwrap_or(u64::MAX) as usize,
            seq: as_u64(&seq).unwrap_or(0),
            action: as_u64(&action).unwrap_or(0),
            payload,
        })
    }

    /// Runs one protocol message through the [CKPS01] state machine.
    /// Returns a deliverable `(sender, value)` when one becomes due.
    async fn handle(
        &mut self,
        from: usize,
        msg: RbcMessage,
    ) -> MpcResult<Option<(usize, BoxedUint)>> {
        // discard malformed messages with a warning
        if msg.sender >= self.n {
            tracing::warn!(target: LOG_TARGET, from, "wrong sender in tag");
            return Ok(None);
        }
        if msg.seq == 0 {
            tracing::warn!(target: LOG_TARGET, from, "wrong sequence number in tag");
            return Ok(None);
        }
        if !(ACTION_SEND..=ACTION_ANSWER).contains(&msg.action) {
            tracing::warn!(target: LOG_TARGET, from, action = msg.action, "wrong action in tag");
            return Ok(None);
        }
        let tag = self.tag_of(&msg);
        tracing::trace!(
            target: LOG_TARGET,
            from, action = msg.action, tag = %hex::encode(&tag[..8]),
            "handling broadcast message"
        );
        match msg.action {
            ACTION_SEND => self.on_send(from, msg, tag).await,
            ACTION_ECHO => self.on_echo(from, msg, tag).await,
            ACTION_READY => self.on_ready(from, msg, tag).await,
            ACTION_REQUEST => self.on_request(from, msg, tag).await,
            ACTION_ANSWER => self.on_answer(from, msg, tag),
            _ => unreachable!("action validated above"),
        }
    }

    async fn on_send(
        &mut self,
        from: usize,
        msg: RbcMessage,
        tag: Tag,
    ) -> MpcResult<Option<(usize, BoxedUint)>> {
        if !self.seen_send[from].insert(tag) {
            tracing::warn!(target: LOG_TARGET, from, "duplicate r-send for tag");
            return Ok(None);
        }
        if msg.sender != from {
            tracing::warn!(target: LOG_TARGET, from, claimed = msg.sender, "r-send sender mismatch");
            return Ok(None);
        }
        match self.mbar.get(&tag) {
            None => {
                self.mbar.insert(tag, msg.payload.clone());
            }
            Some(existing) if *existing != msg.payload => {
                tracing::warn!(target: LOG_TARGET, from, "conflicting r-send value");
                return Ok(None);
            }
            Some(_) => {}
        }
        let echo = RbcMessage {
            id: msg.id,
            sender: msg.sender,
            seq: msg.seq,
            action: ACTION_ECHO,
            payload: self.digest(&msg.payload),
        };
        self.fan_out(&echo).await;
        Ok(None)
    }

    async fn on_echo(
        &mut self,
        from: usize,
        msg: RbcMessage,
        tag: Tag,
    ) -> MpcResult<Option<(usize, BoxedUint)>> {
        if !self.seen_echo[from].insert(tag) {
            tracing::warn!(target: LOG_TARGET, from, "duplicate r-echo for tag");
            return Ok(None);
        }
        if msg.payload.bits() > 264 {
            tracing::warn!(target: LOG_TARGET, from, "oversized digest in r-echo");
            return Ok(None);
        }
        let key = Self::digest_key(&msg.payload);
        let e = {
            let entry = self
                .echo_count
                .entry(tag)
                .or_default()
                .entry(key.clone())
                .or_insert(0);
            *entry += 1;
            *entry
        };
        let r = *self
            .ready_count
            .entry(tag)
            .or_default()
            .entry(key)
            .or_insert(0);
        if e == self.n - self.t && r <= self.t {
            let ready = RbcMessage {
                action: ACTION_READY,
                ..msg
            };
            self.fan_out(&ready).await;
        }
        Ok(None)
    }

    async fn on_ready(
        &mut self,
        from: usize,
        msg: RbcMessage,
        tag: Tag,
    ) -> MpcResult<Option<(usize, BoxedUint)>> {
        if !self.seen_ready[from].insert(tag) {
            tracing::warn!(target: LOG_TARGET, from, "duplicate r-ready for tag");
            return Ok(None);
        }
        if msg.payload.bits() > 264 {
            tracing::warn!(target: LOG_TARGET, from, "oversized digest in r-ready");
            return Ok(None);
        }
        let key = Self::digest_key(&msg.payload);
        let r = {
            let entry = self
                .ready_count
                .entry(tag)
                .or_default()
                .entry(key.clone())
                .or_insert(0);
            *entry += 1;
            *entry
        };
        let e = *self
            .echo_count
            .entry(tag)
            .or_default()
            .entry(key)
            .or_insert(0);

        if self.t > 0 && r == self.t + 1 && e < self.n - self.t {
            // amplify
            let ready = RbcMessage {
                action: ACTION_READY,
                ..msg.clone()
            };
            self.fan_out(&ready).await;
            return Ok(None);
        }
        let commit = if self.t > 0 {
            r == 2 * self.t + 1
        } else {
            // artificial t = 0 case, not considered by [CKPS01]
            r == 1
        };
        if !commit {
            return Ok(None);
        }
        self.dbar.insert(tag, msg.payload.clone());
        let held_digest = self.mbar.get(&tag).map(|m| self.digest(m));
        if held_digest.as_ref() != Some(&msg.payload) {
            // the value is missing or does not match: ask 2t+1 parties
            let request = RbcMessage {
                action: ACTION_REQUEST,
                ..msg
            };
            let howmany = (2 * self.t + 1).min(self.n);
            for peer in 0..howmany {
                if peer == self.me {
                    continue;
                }
                if let Err(e) = self.send_to(&request, peer).await {
                    tracing::warn!(target: LOG_TARGET, peer, error = %e, "sending r-request failed");
                }
            }
            return Ok(None);
        }
        self.conclude(msg, tag)
    }

    async fn on_request(
        &mut self,
        from: usize,
        msg: RbcMessage,
        tag: Tag,
    ) -> MpcResult<Option<(usize, BoxedUint)>> {
        if !self.seen_request[from].insert(tag) {
            tracing::warn!(target: LOG_TARGET, from, "duplicate r-request for tag");
            return Ok(None);
        }
        if let Some(value) = self.mbar.get(&tag).cloned() {
            let answer = RbcMessage {
                action: ACTION_ANSWER,
                payload: value,
                ..msg
            };
            if from == self.me {
                self.loopback.push_back(answer);
            } else if let Err(e) = self.send_to(&answer, from).await {
                tracing::warn!(target: LOG_TARGET, peer = from, error = %e, "sending r-answer failed");
            }
        }
        Ok(None)
    }

    fn on_answer(
        &mut self,
        from: usize,
        msg: RbcMessage,
        tag: Tag,
    ) -> MpcResult<Option<(usize, BoxedUint)>> {
        if !self.seen_answer[from].insert(tag) {
            tracing::warn!(target: LOG_TARGET, from, "duplicate r-answer for tag");
            return Ok(None);
        }
        let Some(expected) = self.dbar.get(&tag).cloned() else {
            tracing::warn!(target: LOG_TARGET, from, "r-answer without outstanding request");
            return Ok(None);
        };
        if self.digest(&msg.payload) != expected {
            tracing::warn!(target: LOG_TARGET, from, "bad r-answer");
            return Ok(None);
        }
        if let Some(existing) = self.mbar.get(&tag) {
            if *existing != msg.payload {
                tracing::warn!(target: LOG_TARGET, from, "conflicting r-answer");
                return Ok(None);
            }
        }
        self.mbar.insert(tag, msg.payload.clone());
        self.conclude(msg, tag)
    }

    /// A message is confirmed; deliver it now if its sequence is due,
    /// otherwise park it for FIFO delivery.
    fn conclude(&mut self, msg: RbcMessage, tag: Tag) -> MpcResult<Option<(usize, BoxedUint)>> {
        if msg.id == self.id && msg.seq == self.deliver_s[msg.sender] {
            let value = self
                .mbar
                .get(&tag)
                .cloned()
                .ok_or_else(|| MpcError::violation(msg.sender, "confirmed tag without value"))?;
            self.deliver_s[msg.sender] += 1;
            return Ok(Some((msg.sender, value)));
        }
        if msg.id == self.id {
            tracing::debug!(
                target: LOG_TARGET,
                sender = msg.sender, seq = msg.seq, due = self.deliver_s[msg.sender],
                "sequence counter not yet due, buffering"
            );
        }
        self.deliver_buf.push(msg);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::uint_from;
    use crate::test_utils::rbc_mesh;
    use crate::wire;

    const BITS: u32 = 384;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn broadcast_reaches_every_party() {
        let mut parties = rbc_mesh(4, 1, BITS);
        parties[0]
            .broadcast(&uint_from(42, 64))
            .await
            .unwrap();

        let handles: Vec<_> = parties
            .into_iter()
            .map(|mut rbc| {
                tokio::spawn(async move {
                    let (sender, value) = rbc.deliver(None).await.unwrap();
                    (sender, wire::encode(&value))
                })
            })
            .collect();
        for handle in handles {
            let (sender, value) = handle.await.unwrap();
            assert_eq!(sender, 0);
            assert_eq!(value, "42");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fifo_order_per_sender() {
        let mut parties = rbc_mesh(3, 0, BITS);
        for v in [10u64, 20, 30] {
            parties[0].broadcast(&uint_from(v, 64)).await.unwrap();
        }
        let handles: Vec<_> = parties
            .into_iter()
            .skip(1)
            .map(|mut rbc| {
                tokio::spawn(async move {
                    let mut got = Vec::new();
                    for _ in 0..3 {
                        let (sender, value) = rbc.deliver(None).await.unwrap();
                        assert_eq!(sender, 0);
                        got.push(wire::encode(&value));
                    }
                    got
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), vec!["10", "20", "30"]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn tolerates_one_silent_party() {
        // n = 4, t = 1: party 3 never echoes nor readies; the remaining
        // honest majority still reaches the thresholds
        let mut parties = rbc_mesh(4, 1, BITS);
        let silent = parties.pop().unwrap();
        drop(silent);

        parties[0].broadcast(&uint_from(42, 64)).await.unwrap();
        let handles: Vec<_> = parties
            .into_iter()
            .map(|mut rbc| {
                tokio::spawn(async move {
                    let (sender, value) = rbc.deliver(None).await.unwrap();
                    assert_eq!(sender, 0);
                    assert_eq!(wire::encode(&value), "42");
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn nested_channels_have_disjoint_tag_spaces() {
        let mut parties = rbc_mesh(2, 0, BITS);
        for rbc in parties.iter_mut() {
            rbc.set_id("nested-protocol");
        }
        parties[0].broadcast(&uint_from(7, 64)).await.unwrap();
        let (sender, value) = parties[1].deliver(None).await.unwrap();
        assert_eq!((sender, wire::encode(&value)), (0, "7".to_string()));

        // after leaving the nested channel the outer sequence resumes
        for rbc in parties.iter_mut() {
            rbc.unset_id();
        }
        parties[0].broadcast(&uint_from(8, 64)).await.unwrap();
        let (sender, value) = parties[1].deliver(None).await.unwrap();
        assert_eq!((sender, wire::encode(&value)), (0, "8".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn deliver_from_buffers_other_senders() {
        let mut parties = rbc_mesh(3, 0, BITS);
        parties[0].broadcast(&uint_from(100, 64)).await.unwrap();
        parties[1].broadcast(&uint_from(200, 64)).await.unwrap();

        let mut p2 = parties.pop().unwrap();
        let p1 = parties.pop().unwrap();
        let p0 = parties.pop().unwrap();
        // keep the other parties processing so echoes keep flowing
        let bg0 = tokio::spawn(async move {
            let mut rbc = p0;
            let _ = rbc.deliver(Some(Duration::from_secs(5))).await;
            let _ = rbc.deliver(Some(Duration::from_secs(5))).await;
            rbc
        });
        let bg1 = tokio::spawn(async move {
            let mut rbc = p1;
            let _ = rbc.deliver(Some(Duration::from_secs(5))).await;
            let _ = rbc.deliver(Some(Duration::from_secs(5))).await;
            rbc
        });

        let from_1 = p2.deliver_from(1, None).await.unwrap();
        assert_eq!(wire::encode(&from_1), "200");
        let from_0 = p2.deliver_from(0, None).await.unwrap();
        assert_eq!(wire::encode(&from_0), "100");

        bg0.await.unwrap();
        bg1.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sync_agrees_on_timeout() {
        let parties = rbc_mesh(2, 0, BITS);
        let handles: Vec<_> = parties
            .into_iter()
            .map(|mut rbc| {
                tokio::spawn(async move { rbc.sync(Duration::from_millis(600), "test").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }
}
