//! Generate test instances.

use ark_ec::{AffineRepr as _, CurveGroup as _, VariableBaseMSM as _};
use ark_ed_on_bls12_377::{EdwardsAffine, EdwardsProjective, Fr};
use ark_ff::PrimeField as _;

use crate::{timing::timed, Scalar};

pub fn random_points(size: u8) -> Vec<EdwardsAffine> {
    use rand_core::SeedableRng;
    let mut rng = rand::prelude::StdRng::from_entropy();

    use ark_std::UniformRand;
    let points: Vec<_> = timed("generating random projective points", || {
        (0..(1 << size))
            .map(|_| EdwardsProjective::rand(&mut rng))
            .collect()
    });

    timed("batch converting to affine", || {
        EdwardsProjective::normalize_batch(&points)
    })
}

/// `count` copies of the first `actual` random points, repeated in order.
pub fn repeated_points(count: usize, actual: u8) -> Vec<EdwardsAffine> {
    let points = random_points(actual);
    points.iter().cycle().take(count).copied().collect()
}

pub fn random_scalars(size: u8) -> Vec<Scalar> {
    use rand_core::{RngCore, SeedableRng};
    let mut rng = rand::prelude::StdRng::from_entropy();

    (0..(1 << size))
        .map(|_| {
            let mut scalar = Scalar::default();
            for limb in scalar.iter_mut() {
                *limb = rng.next_u64();
            }
            scalar
        })
        .collect()
}

/// Scalars below `bound`, so windows repeat and clusters fill up.
pub fn small_scalars(size: u8, bound: u64) -> Vec<Scalar> {
    use rand::Rng as _;
    use rand_core::SeedableRng;
    let mut rng = rand::prelude::StdRng::from_entropy();

    (0..(1 << size))
        .map(|_| [rng.gen_range(0..bound), 0, 0, 0])
        .collect()
}

pub fn zero_scalars(size: u8) -> Vec<Scalar> {
    vec![Scalar::default(); 1 << size]
}

/// `sum(scalar_i * point_i)` by double-and-add per point, over the full
/// 256 bits of each scalar.
pub fn naive_msm(points: &[EdwardsAffine], scalars: &[Scalar]) -> EdwardsProjective {
    timed("naive msm", || {
        points
            .iter()
            .zip(scalars)
            .map(|(point, scalar)| point.mul_bigint(scalar))
            .sum()
    })
}

/// Reference MSM of arkworks; scalars are reduced modulo the group order.
pub fn ark_msm(points: &[EdwardsAffine], scalars: &[Scalar]) -> EdwardsProjective {
    let scalars: Vec<_> = scalars
        .iter()
        .map(|scalar| Fr::from_le_bytes_mod_order(&crate::scalar::to_le_bytes(scalar)).into_bigint())
        .collect();
    EdwardsProjective::msm_bigint(points, &scalars)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn naive_msm_matches_arkworks() {
        let points = random_points(3);
        let scalars = random_scalars(3);
        assert_eq!(naive_msm(&points, &scalars), ark_msm(&points, &scalars));
        assert_eq!(
            naive_msm(&points, &zero_scalars(3)),
            EdwardsProjective::default()
        );
    }

    #[test]
    fn small_scalars_stay_small() {
        assert!(small_scalars(4, 3).iter().all(|s| s[0] < 3 && s[1..] == [0, 0, 0]));
        assert_eq!(repeated_points(10, 1).len(), 10);
    }
}
