use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crypto_bigint::BoxedUint;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

use crate::arith::random::SecureRng;
use crate::config::{Strength, POLL_INTERVAL};
use crate::error::{MpcError, MpcResult};
use crate::wire;

use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const LOG_TARGET: &str = "mental_mpc::transport::unicast";
const MAC_LEN: usize = 32;
const IV_LEN: usize = 16;
const HKDF_SALT: &[u8] = b"mental-mpc/unicast/v1";
/// Rough month counter for the deterministic chunked-mode nonce.
const NONCE_EPOCH: u64 = 30 * 24 * 3600;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheduler {
    RoundRobin,
    Random,
    Direct(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

enum CipherMode {
    /// One CTR keystream per direction; the IV travels in the clear once,
    /// before the first frame.
    Stream {
        out_cipher: Aes256Ctr,
        out_iv: [u8; IV_LEN],
        iv_sent: bool,
        in_cipher: Option<Aes256Ctr>,
    },
    /// Per-frame CTR with a deterministic nonce; the frame counter is
    /// XORed into the nonce and travels with the ciphertext.
    Chunked {
        out_nonce: [u8; IV_LEN],
        in_nonce: [u8; IV_LEN],
        counter_out: u64,
    },
}

struct PeerLink {
    writer: BoxedWriter,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    buf: Vec<u8>,
    eof: bool,
    poisoned: bool,
    mac_key_out: [u8; 32],
    mac_key_in: [u8; 32],
    enc_key_out: [u8; 32],
    enc_key_in: [u8; 32],
    mode: CipherMode,
    sqn_out: u64,
    sqn_in: u64,
}

/// Authenticated, encrypted point-to-point channels between `n` parties.
///
/// One value per frame, encrypt-then-authenticate: the ciphertext line is
/// HMAC'd together with the decimal per-direction sequence number. A MAC
/// failure on the very first inbound frame is treated as handshake noise
/// and dropped; any later failure renders the peer unusable.
pub struct SecureUnicast {
    n: usize,
    me: usize,
    links: Vec<Option<PeerLink>>,
    value_bits: u32,
    internal_bits: u32,
    hide: BoxedUint,
    chunked: bool,
    rr_next: usize,
    rng: SecureRng,
    default_timeout: Duration,
}

impl SecureUnicast {
    /// `endpoints[i]` carries the byte streams to peer `i` (`None` at the
    /// local index), `keys[i]` the pre-shared secret with that peer.
    pub fn new(
        n: usize,
        me: usize,
        endpoints: Vec<Option<(BoxedReader, BoxedWriter)>>,
        keys: &[String],
        value_bits: u32,
        chunked: bool,
        default_timeout: Duration,
    ) -> MpcResult<Self> {
        if me >= n {
            return Err(MpcError::invalid("own index out of range"));
        }
        if endpoints.len() != n || keys.len() != n {
            return Err(MpcError::invalid("one endpoint and key per party required"));
        }
        let internal_bits = (value_bits + 64).next_multiple_of(64);
        let hide = BoxedUint::one_with_precision(internal_bits)
            .shl(value_bits + 8);
        let mut rng = SecureRng::new(Strength::Weak);
        let mut links = Vec::with_capacity(n);
        for (i, endpoint) in endpoints.into_iter().enumerate() {
            match endpoint {
                None => links.push(None),
                Some((reader, writer)) => {
                    links.push(Some(PeerLink::new(
                        reader, writer, &keys[i], me, i, chunked, &mut rng,
                    )));
                }
            }
        }
        Ok(Self {
            n,
            me,
            links,
            value_bits,
            internal_bits,
            hide,
            chunked,
            rr_next: 0,
            rng,
            default_timeout,
        })
    }

    pub fn parties(&self) -> usize {
        self.n
    }

    pub fn whoami(&self) -> usize {
        self.me
    }

    pub fn value_bits(&self) -> u32 {
        self.value_bits
    }

    pub fn peer_alive(&self, peer: usize) -> bool {
        matches!(self.links.get(peer), Some(Some(link)) if !link.poisoned && !(link.eof && link.buf.is_empty()))
    }

    /// Resets one direction's sequence counter back to 1. The peer must do
    /// the same or every further frame in that direction fails its MAC.
    pub fn reset_sequence(&mut self, peer: usize, direction: Direction) -> MpcResult<()> {
        let link = self.link_mut(peer)?;
        match direction {
            Direction::Inbound => link.sqn_in = 1,
            Direction::Outbound => link.sqn_out = 1,
        }
        Ok(())
    }

    fn link_mut(&mut self, peer: usize) -> MpcResult<&mut PeerLink> {
        if peer >= self.n || peer == self.me {
            return Err(MpcError::invalid("peer index out of range"));
        }
        self.links[peer]
            .as_mut()
            .ok_or_else(|| MpcError::invalid("no channel to peer"))
    }

    /// Sends one value to `to`. The plaintext is offset by `2^c` before
    /// encryption so that small values do not leak their magnitude.
    pub async fn send(
        &mut self,
        m: &BoxedUint,
        to: usize,
        deadline: Option<Duration>,
    ) -> MpcResult<()> {
        if m.bits() > self.value_bits {
            return Err(MpcError::invalid("value exceeds the channel bound"));
        }
        let deadline = deadline.unwrap_or(self.default_timeout);
        let hide = self.hide.clone();
        let internal_bits = self.internal_bits;
        let chunked = self.chunked;
        let link = self.link_mut(to)?;
        if link.poisoned {
            return Err(MpcError::violation(to, "peer channel is poisoned"));
        }

        let normalized = crate::arith::with_precision(m, internal_bits)
            .ok_or_else(|| MpcError::invalid("value exceeds the channel bound"))?;
        let offset = normalized.wrapping_add(&hide);
        let plain = wire::encode(&offset).into_bytes();

        // '+' prefix keeps the leading byte non-zero so the ciphertext
        // survives the integer round-trip with its length intact
        let mut framed = Vec::with_capacity(plain.len() + 1);
        framed.push(b'+');
        framed.extend_from_slice(&plain);
        let counter = link.encrypt_out(&mut framed[1..]);

        let frame_uint = BoxedUint::from_be_slice(&framed, (framed.len() as u32 * 8).next_multiple_of(64))
            .map_err(|_| MpcError::crypto("frame encoding failed"))?;
        let mut line = wire::encode(&frame_uint);
        if chunked {
            line.push('|');
            line.push_str(&counter.to_string());
        }
        line.push('\n');

        let tag = link.mac_out(line.as_bytes());
        link.sqn_out += 1;

        // stream mode sends the plain IV once, before any frame
        let pending_iv = match &link.mode {
            CipherMode::Stream {
                out_iv,
                iv_sent: false,
                ..
            } => Some(*out_iv),
            _ => None,
        };
        if let Some(iv) = pending_iv {
            match timeout(deadline, link.writer.write_all(&iv)).await {
                Err(_) => return Err(MpcError::timeout(format!("sending IV to {to}"))),
                Ok(Err(e)) => {
                    return Err(MpcError::Transient(format!("IV send to {to} failed: {e}")))
                }
                Ok(Ok(())) => {
                    if let CipherMode::Stream { iv_sent, .. } = &mut link.mode {
                        *iv_sent = true;
                    }
                }
            }
        }

        let io = async {
            link.writer.write_all(line.as_bytes()).await?;
            link.writer.write_all(&tag).await?;
            link.writer.flush().await
        };
        match timeout(deadline, io).await {
            Err(_) => Err(MpcError::timeout(format!("sending to {to}"))),
            Ok(Err(e)) => {
                tracing::warn!(target: LOG_TARGET, peer = to, error = %e, "send failed");
                Err(MpcError::Transient(format!("send to {to} failed: {e}")))
            }
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Receives the next value from a specific peer.
    pub async fn receive_from(
        &mut self,
        from: usize,
        deadline: Option<Duration>,
    ) -> MpcResult<BoxedUint> {
        let deadline = deadline.unwrap_or(self.default_timeout);
        let start = Instant::now();
        loop {
            match self.try_extract(from)? {
                Some(value) => return Ok(value),
                None => {
                    if start.elapsed() >= deadline {
                        return Err(MpcError::timeout(format!("receiving from {from}")));
                    }
                    sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Receives the next value from any peer, honoring the scheduler.
    pub async fn receive_any(
        &mut self,
        scheduler: Scheduler,
        deadline: Option<Duration>,
    ) -> MpcResult<(usize, BoxedUint)> {
        let deadline = deadline.unwrap_or(self.default_timeout);
        let start = Instant::now();
        loop {
            let order: Vec<usize> = match scheduler {
                Scheduler::Direct(peer) => vec![peer],
                Scheduler::RoundRobin => {
                    let first = self.rr_next;
                    self.rr_next = (self.rr_next + 1) % self.n;
                    (0..self.n).map(|k| (first + k) % self.n).collect()
                }
                Scheduler::Random => {
                    let first = (self.rng.bits(16, 64).as_words()[0] as usize) % self.n;
                    (0..self.n).map(|k| (first + k) % self.n).collect()
                }
            };
            for peer in order {
                if peer == self.me || peer >= self.n || self.links[peer].is_none() {
                    continue;
                }
                match self.try_extract(peer) {
                    Ok(Some(value)) => return Ok((peer, value)),
                    Ok(None) => {}
                    // a poisoned or departed peer must not stall the
                    // any-peer receive loop; direct receives still surface
                    // the error
                    Err(e) => {
                        tracing::debug!(target: LOG_TARGET, peer, error = %e, "skipping peer");
                    }
                }
            }
            if start.elapsed() >= deadline {
                return Err(MpcError::timeout("receiving from any peer".to_string()));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Non-blocking: pulls buffered bytes and extracts at most one frame.
    fn try_extract(&mut self, peer: usize) -> MpcResult<Option<BoxedUint>> {
        let value_bits = self.value_bits;
        let internal_bits = self.internal_bits;
        let hide = self.hide.clone();
        let link = self.link_mut(peer)?;
        if link.poisoned {
            return Err(MpcError::violation(peer, "peer channel is poisoned"));
        }
        link.drain_rx();

        // stream mode: the first IV_LEN bytes are the peer's IV prologue
        if matches!(&link.mode, CipherMode::Stream { in_cipher: None, .. }) {
            if link.buf.len() < IV_LEN {
                return link.check_eof(peer);
            }
            let iv: [u8; IV_LEN] = link.buf[..IV_LEN].try_into().expect("length checked");
            link.buf.drain(..IV_LEN);
            let cipher = Aes256Ctr::new((&link.enc_key_in).into(), (&iv).into());
            if let CipherMode::Stream { in_cipher, .. } = &mut link.mode {
                *in_cipher = Some(cipher);
            }
        }

        let newline = match link.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => pos,
            None => return link.check_eof(peer),
        };
        if link.buf.len() < newline + 1 + MAC_LEN {
            return link.check_eof(peer);
        }
        let line: Vec<u8> = link.buf[..=newline].to_vec();
        let tag: Vec<u8> = link.buf[newline + 1..newline + 1 + MAC_LEN].to_vec();
        link.buf.drain(..newline + 1 + MAC_LEN);

        if !link.mac_in_ok(&line, &tag) {
            if link.sqn_in <= 1 {
                // handshake resync: silently drop the first frame
                tracing::warn!(target: LOG_TARGET, peer, "MAC failure on first frame, dropped");
                return Ok(None);
            }
            link.poisoned = true;
            tracing::warn!(target: LOG_TARGET, peer, "MAC failure, peer poisoned");
            return Err(MpcError::violation(peer, "MAC verification failed"));
        }
        link.sqn_in += 1;

        let text = std::str::from_utf8(&line[..newline])
            .map_err(|_| MpcError::crypto("frame is not ASCII"))?;
        let (outer, counter) = match text.split_once('|') {
            Some((v, c)) => (
                v,
                Some(
                    c.parse::<u64>()
                        .map_err(|_| MpcError::crypto("bad chunk counter"))?,
                ),
            ),
            None => (text, None),
        };
        // the outer integer carries decimal ASCII as raw bytes, roughly
        // 8 bits of frame per 3.3 bits of value
        let max_frame_bits = (3 * internal_bits + 256).next_multiple_of(64);
        let frame_uint = wire::decode(outer, max_frame_bits)?;
        let bytes = frame_uint.to_be_bytes();
        let first = bytes
            .iter()
            .position(|&b| b != 0)
            .ok_or_else(|| MpcError::crypto("empty frame"))?;
        if bytes[first] != b'+' {
            return Err(MpcError::crypto("frame missing plaintext prefix"));
        }
        let mut cipher_bytes = bytes[first + 1..].to_vec();
        link.decrypt_in(&mut cipher_bytes, counter)?;
        let plain = std::str::from_utf8(&cipher_bytes)
            .map_err(|_| MpcError::crypto("decrypted frame is not ASCII"))?;
        let offset_value = wire::decode(plain, internal_bits)?;
        if offset_value < hide {
            return Err(MpcError::crypto("decrypted value below hiding offset"));
        }
        let value = offset_value.wrapping_sub(&hide);
        if value.bits() > value_bits {
            return Err(MpcError::crypto("decrypted value exceeds channel bound"));
        }
        Ok(Some(value.shorten(value_bits.next_multiple_of(64))))
    }
}

impl PeerLink {
    fn new(
        mut reader: BoxedReader,
        writer: BoxedWriter,
        secret: &str,
        me: usize,
        peer: usize,
        chunked: bool,
        rng: &mut SecureRng,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let enc_key_out = derive_key(secret, &format!("enc|{me}"));
        let enc_key_in = derive_key(secret, &format!("enc|{peer}"));
        let mode = if chunked {
            let month = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() / NONCE_EPOCH)
                .unwrap_or(0);
            CipherMode::Chunked {
                out_nonce: derive_nonce(secret, me, month),
                in_nonce: derive_nonce(secret, peer, month),
                counter_out: 0,
            }
        } else {
            let mut iv = [0u8; IV_LEN];
            rng.fill_bytes(&mut iv);
            CipherMode::Stream {
                out_cipher: Aes256Ctr::new((&enc_key_out).into(), (&iv).into()),
                out_iv: iv,
                iv_sent: false,
                in_cipher: None,
            }
        };
        Self {
            writer,
            rx,
            buf: Vec::new(),
            eof: false,
            poisoned: false,
            mac_key_out: derive_key(secret, &format!("mac|{me}")),
            mac_key_in: derive_key(secret, &format!("mac|{peer}")),
            enc_key_out,
            enc_key_in,
            mode,
            sqn_out: 1,
            sqn_in: 1,
        }
    }

    fn drain_rx(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => self.buf.extend_from_slice(&chunk),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.eof = true;
                    break;
                }
            }
        }
    }

    fn check_eof(&self, peer: usize) -> MpcResult<Option<BoxedUint>> {
        if self.eof && self.buf.is_empty() {
            Err(MpcError::Transient(format!("peer {peer} is gone")))
        } else {
            Ok(None)
        }
    }

    /// Encrypts in place; returns the chunk counter in chunked mode.
    fn encrypt_out(&mut self, data: &mut [u8]) -> u64 {
        match &mut self.mode {
            CipherMode::Stream { out_cipher, .. } => {
                out_cipher.apply_keystream(data);
                0
            }
            CipherMode::Chunked {
                out_nonce,
                counter_out,
                ..
            } => {
                *counter_out += 1;
                let mut cipher = chunk_cipher(&self.enc_key_out, out_nonce, *counter_out);
                cipher.apply_keystream(data);
                *counter_out
            }
        }
    }

    fn decrypt_in(&mut self, data: &mut [u8], counter: Option<u64>) -> MpcResult<()> {
        match &mut self.mode {
            CipherMode::Stream { in_cipher, .. } => match in_cipher {
                Some(cipher) => {
                    cipher.apply_keystream(data);
                    Ok(())
                }
                None => Err(MpcError::crypto("frame before IV prologue")),
            },
            CipherMode::Chunked { in_nonce, .. } => {
                let counter =
                    counter.ok_or_else(|| MpcError::crypto("chunked frame missing counter"))?;
                let mut cipher = chunk_cipher(&self.enc_key_in, in_nonce, counter);
                cipher.apply_keystream(data);
                Ok(())
            }
        }
    }

    fn mac_out(&self, line: &[u8]) -> [u8; MAC_LEN] {
        compute_mac(&self.mac_key_out, line, self.sqn_out)
    }

    fn mac_in_ok(&self, line: &[u8], tag: &[u8]) -> bool {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key_in).expect("any key size");
        mac.update(line);
        mac.update(self.sqn_in.to_string().as_bytes());
        mac.verify_slice(tag).is_ok()
    }
}

fn chunk_cipher(key: &[u8; 32], nonce: &[u8; IV_LEN], counter: u64) -> Aes256Ctr {
    let mut iv = *nonce;
    for (i, b) in counter.to_be_bytes().iter().enumerate() {
        iv[IV_LEN - 8 + i] ^= b;
    }
    Aes256Ctr::new(key.into(), (&iv).into())
}

fn compute_mac(key: &[u8; 32], line: &[u8], sqn: u64) -> [u8; MAC_LEN] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("any key size");
    mac.update(line);
    mac.update(sqn.to_string().as_bytes());
    mac.finalize().into_bytes().into()
}

fn derive_key(secret: &str, info: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(info.as_bytes(), &mut okm)
        .expect("32 bytes is a valid HKDF output length");
    okm
}

fn derive_nonce(secret: &str, sender: usize, month: u64) -> [u8; IV_LEN] {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
    let mut okm = [0u8; IV_LEN];
    hk.expand(format!("nonce|{sender}|{month}").as_bytes(), &mut okm)
        .expect("16 bytes is a valid HKDF output length");
    okm
}
