//! Cryptographic core for secure multi-party computation over a
//! prime-order subgroup of `Z_p^*`, oriented toward mental-game style
//! protocols: verifiable threshold masking (VTMF), reliable broadcast,
//! verifiable secret sharing, distributed key generation, threshold DSS
//! and verifiable shuffle / rotation arguments.

pub mod arith;
pub mod broadcast;
pub mod commitment;
pub mod config;
pub mod crypto_serde;
pub mod dkg;
pub mod domain;
pub mod dss;
pub mod error;
pub mod shuffle;
pub mod transcript;
pub mod transport;
pub mod vss;
pub mod vtmf;
pub mod wire;

#[cfg(test)]
pub mod test_utils;

pub use broadcast::ReliableBroadcast;
pub use commitment::{PedersenCommitment, TrapdoorCommitment};
pub use config::Strength;
pub use dkg::Dkg;
pub use domain::Domain;
pub use dss::{DssSignature, ThresholdDss};
pub use error::{MpcError, MpcResult};
pub use shuffle::{GrothSkc, VerifiableRotation};
pub use transport::{Scheduler, SecureUnicast};
pub use vss::{Edcf, JointVss, PedersenVss, Zvss};
pub use vtmf::{ElGamalCiphertext, Vtmf};
