pub mod rotation;
pub mod skc;

pub use rotation::{RotationProof, VerifiableRotation};
pub use skc::{GrothSkc, SkcProof};

/// Checks that `pi` is a permutation of `0..n`.
pub(crate) fn is_permutation(pi: &[usize], n: usize) -> bool {
    if pi.len() != n {
        return false;
    }
    let mut seen = vec![false; n];
    for &idx in pi {
        if idx >= n || seen[idx] {
            return false;
        }
        seen[idx] = true;
    }
    true
}
