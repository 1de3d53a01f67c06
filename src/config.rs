use std::time::Duration;

/// Default bit length of the field prime `p`.
pub const DEFAULT_FIELD_BITS: u32 = 2048;

/// Default minimum bit length of the subgroup order `q` for `p = kq + 1`
/// commitment domains.
pub const DEFAULT_SUBGROUP_BITS: u32 = 256;

/// Challenge length `l_e` (bits) for the interactive shuffle arguments.
pub const DEFAULT_CHALLENGE_BITS: u32 = 80;

/// Default timeout for a full protocol step.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Very short timeout used for the fan-out sends inside RBC.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Polling granularity of the non-blocking receive loops.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Number of slices a `sync` round divides its timeout into.
pub const SYNC_SLICES: u32 = 10;

/// Source used when sampling secret scalars.
///
/// Mirrors the three randomness tiers of the underlying toolchain: `Weak`
/// for public nonces and scheduling jitter, `Strong` for protocol
/// randomness (the default), `VeryStrong` for long-term key material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Strength {
    Weak,
    #[default]
    Strong,
    VeryStrong,
}
