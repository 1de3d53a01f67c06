//! Serde adapters for bignum-bearing protocol artifacts. Values travel as
//! decimal strings, matching the line-oriented wire encoding.

use crypto_bigint::BoxedUint;

use crate::wire;

/// Decodes a decimal string, picking a limb-aligned precision wide enough
/// for the digit count. Callers re-reduce against their domain moduli.
pub fn decode_auto(s: &str) -> Result<BoxedUint, crate::error::MpcError> {
    let digits = s.trim().len().max(1) as u32;
    let precision = (digits * 4).max(64).next_multiple_of(64);
    wire::decode(s, precision)
}

pub mod uint {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BoxedUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&wire::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BoxedUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_auto(&s).map_err(serde::de::Error::custom)
    }
}

pub mod uint_vec {
    use super::*;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        values: &Vec<BoxedUint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for v in values {
            seq.serialize_element(&wire::encode(v))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<BoxedUint>, D::Error> {
        let strings = Vec::<String>::deserialize(deserializer)?;
        strings
            .iter()
            .map(|s| decode_auto(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::uint_from;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "crate::crypto_serde::uint")]
        value: BoxedUint,
        #[serde(with = "crate::crypto_serde::uint_vec")]
        values: Vec<BoxedUint>,
    }

    #[test]
    fn json_round_trip() {
        let w = Wrapper {
            value: uint_from(123456789, 128),
            values: vec![uint_from(1, 64), uint_from(98765, 64)],
        };
        let json = serde_json::to_string(&w).unwrap();
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(wire::encode(&back.value), "123456789");
        assert_eq!(wire::encode(&back.values[1]), "98765");
    }
}
