use crypto_bigint::{BoxedUint, NonZero};

use crate::error::{MpcError, MpcResult};

/// On the wire every value is one ASCII-decimal bignum per `\n`-terminated
/// line; this module provides the two conversions.
const CHUNK_DIGITS: u32 = 19; // 10^19 < 2^64
const CHUNK_BASE: u64 = 10u64.pow(CHUNK_DIGITS);

pub fn encode(value: &BoxedUint) -> String {
    if bool::from(value.is_zero()) {
        return "0".into();
    }
    let base = NonZero::new(BoxedUint::from(CHUNK_BASE).widen(value.bits_precision()))
        .expect("chunk base is non-zero");
    let mut chunks: Vec<u64> = Vec::new();
    let mut rest = value.clone();
    while !bool::from(rest.is_zero()) {
        let (quot, rem) = rest.div_rem(&base);
        chunks.push(rem.as_words()[0]);
        rest = quot;
    }
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate().rev() {
        if i == chunks.len() - 1 {
            out.push_str(&chunk.to_string());
        } else {
            out.push_str(&format!("{chunk:019}"));
        }
    }
    out
}

/// Parses a decimal string into a value of exactly `precision` bits.
///
/// Strings whose magnitude could exceed the precision are rejected up
/// front, so the fixed-width arithmetic below cannot overflow.
pub fn decode(s: &str, precision: u32) -> MpcResult<BoxedUint> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MpcError::crypto("malformed decimal value"));
    }
    let s = s.trim_start_matches('0');
    if s.is_empty() {
        return Ok(BoxedUint::zero_with_precision(precision));
    }
    // 10^d <= 2^precision requires d <= precision * log10(2)
    let max_digits = (precision as usize) * 30103 / 100000;
    if s.len() > max_digits {
        return Err(MpcError::crypto("decimal value exceeds wire bound"));
    }
    let mut acc = BoxedUint::zero_with_precision(precision);
    let bytes = s.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        let take = (bytes.len() - pos).min(CHUNK_DIGITS as usize);
        let chunk: u64 = s[pos..pos + take]
            .parse()
            .map_err(|_| MpcError::crypto("malformed decimal value"))?;
        let scale = BoxedUint::from(10u64.pow(take as u32)).widen(precision);
        acc = acc
            .wrapping_mul(&scale)
            .wrapping_add(&BoxedUint::from(chunk).widen(precision));
        pos += take;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::uint_from;

    #[test]
    fn round_trips_small_values() {
        for v in [0u64, 1, 9, 10, 12345678901234567890u64.wrapping_div(3)] {
            let x = uint_from(v, 128);
            assert_eq!(decode(&encode(&x), 128).unwrap(), x);
        }
    }

    #[test]
    fn round_trips_wide_values() {
        // 2^200 - 1 spans multiple decimal chunks
        let mut x = BoxedUint::zero_with_precision(256);
        for _ in 0..200 {
            x = x
                .wrapping_mul(&uint_from(2, 256))
                .wrapping_add(&uint_from(1, 256));
        }
        assert_eq!(decode(&encode(&x), 256).unwrap(), x);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode("12x4", 64).is_err());
        assert!(decode("", 64).is_err());
        assert!(decode("-5", 64).is_err());
    }

    #[test]
    fn rejects_oversized_values() {
        let big = "9".repeat(40);
        assert!(decode(&big, 64).is_err());
    }
}
