pub mod coinflip;
pub mod pedersen;
pub mod rvss;
pub mod zvss;

pub use coinflip::Edcf;
pub use pedersen::PedersenVss;
pub use rvss::{JointVss, VssMode};
pub use zvss::Zvss;

use crypto_bigint::BoxedUint;

use crate::arith::ModGroup;
use crate::domain::Domain;
use crate::error::{MpcError, MpcResult};

/// Evaluates `Σ coeffs[k] · x^k mod q` at a small point `x`.
pub(crate) fn eval_poly(zq: &ModGroup, coeffs: &[BoxedUint], x: u64) -> BoxedUint {
    let x = zq.from_u64(x);
    let mut acc = zq.zero();
    let mut power = zq.one();
    for c in coeffs {
        acc = zq.add(&acc, &zq.mul(c, &power));
        power = zq.mul(&power, &x);
    }
    acc
}

/// Checks the Pedersen share equation
/// `g^s · h^s' ≟ Π_k C_k^{x^k} (mod p)` at evaluation point `x`.
pub(crate) fn share_matches_commitments(
    domain: &Domain,
    s: &BoxedUint,
    sprime: &BoxedUint,
    commitments: &[BoxedUint],
    x: u64,
) -> bool {
    let zp = domain.zp();
    let zq = domain.zq();
    let lhs = zp.mul(&zp.pow(domain.g(), s), &zp.pow(domain.h(), sprime));
    let x = zq.from_u64(x);
    let mut rhs = zp.one();
    let mut power = zq.one();
    for c in commitments {
        rhs = zp.mul(&rhs, &zp.pow(c, &power));
        power = zq.mul(&power, &x);
    }
    lhs == rhs
}

/// Lagrange interpolation at zero over `Z_q` from points `(x_j, y_j)`
/// with pairwise distinct non-zero `x_j`.
pub(crate) fn lagrange_at_zero(
    zq: &ModGroup,
    points: &[(u64, BoxedUint)],
) -> MpcResult<BoxedUint> {
    let mut acc = zq.zero();
    for (j, (x_j, y_j)) in points.iter().enumerate() {
        let mut num = zq.one();
        let mut den = zq.one();
        for (l, (x_l, _)) in points.iter().enumerate() {
            if l == j {
                continue;
            }
            num = zq.mul(&num, &zq.from_u64(*x_l));
            den = zq.mul(&den, &zq.sub(&zq.from_u64(*x_l), &zq.from_u64(*x_j)));
        }
        let den_inv = zq
            .invert(&den)
            .ok_or_else(|| MpcError::crypto("degenerate interpolation points"))?;
        acc = zq.add(&acc, &zq.mul(y_j, &zq.mul(&num, &den_inv)));
    }
    Ok(acc)
}

/// Full polynomial interpolation over `Z_q`: recovers all `points.len()`
/// coefficients.
pub(crate) fn interpolate_polynomial(
    zq: &ModGroup,
    points: &[(u64, BoxedUint)],
) -> MpcResult<Vec<BoxedUint>> {
    let k = points.len();
    let mut coeffs = vec![zq.zero(); k];
    for (j, (x_j, y_j)) in points.iter().enumerate() {
        // basis polynomial Π_{l≠j} (X - x_l) / (x_j - x_l)
        let mut basis = vec![zq.zero(); k];
        basis[0] = zq.one();
        let mut degree = 0;
        let mut den = zq.one();
        for (l, (x_l, _)) in points.iter().enumerate() {
            if l == j {
                continue;
            }
            // multiply basis by (X - x_l)
            let neg_xl = zq.neg(&zq.from_u64(*x_l));
            for d in (0..=degree).rev() {
                let scaled = zq.mul(&basis[d], &neg_xl);
                basis[d + 1] = zq.add(&basis[d + 1], &basis[d]);
                basis[d] = scaled;
            }
            degree += 1;
            den = zq.mul(&den, &zq.sub(&zq.from_u64(*x_j), &zq.from_u64(*x_l)));
        }
        let scale = zq.mul(
            y_j,
            &zq.invert(&den)
                .ok_or_else(|| MpcError::crypto("degenerate interpolation points"))?,
        );
        for d in 0..k {
            coeffs[d] = zq.add(&coeffs[d], &zq.mul(&basis[d], &scale));
        }
    }
    Ok(coeffs)
}
