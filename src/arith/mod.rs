pub mod prime;
pub mod random;
pub mod residue;

pub use residue::ModGroup;

pub use crypto_bigint::BoxedUint;

/// Widens or truncates `value` to exactly `bits` precision.
///
/// Truncation is only performed when the value actually fits, so callers
/// can normalize wire-decoded integers without silently dropping bits.
pub fn with_precision(value: &BoxedUint, bits: u32) -> Option<BoxedUint> {
    let current = value.bits_precision();
    if current == bits {
        Some(value.clone())
    } else if current < bits {
        Some(value.widen(bits))
    } else if value.bits() <= bits {
        Some(value.shorten(bits))
    } else {
        None
    }
}

/// `BoxedUint` from a small constant at the given precision.
pub fn uint_from(value: u64, bits: u32) -> BoxedUint {
    BoxedUint::from(value).widen(bits)
}
