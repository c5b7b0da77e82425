//! Edwards-BLS12, the twisted Edwards curve over the BLS12-377 scalar field.

use ark_ec::twisted_edwards::TECurveConfig;
use ark_ed_on_bls12_377::{EdwardsAffine, EdwardsConfig, EdwardsProjective, Fq};
use ark_ff::PrimeField;
use num_bigint::BigUint;

use crate::{
    curve::{AffinePoint, Curve, ExtendedPoint},
    field::Params,
    Result,
};

/// The base field modulus, 253 bits.
pub fn modulus() -> BigUint {
    BigUint::from(Fq::MODULUS)
}

pub fn coeff_d() -> BigUint {
    BigUint::from(EdwardsConfig::COEFF_D.into_bigint())
}

/// Field and curve constants for one limb layout.
pub fn curve(word_size: usize, num_words: usize) -> Result<Curve> {
    let field = Params::new(&modulus(), word_size, num_words)?;
    Ok(Curve::new(field, &coeff_d()))
}

impl From<&EdwardsAffine> for AffinePoint {
    fn from(point: &EdwardsAffine) -> AffinePoint {
        AffinePoint {
            x: point.x.into_bigint().0,
            y: point.y.into_bigint().0,
        }
    }
}

fn fq(words: &[u64; 4]) -> Fq {
    let mut bytes = [0u8; 32];
    for (chunk, word) in bytes.chunks_mut(8).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    Fq::from_le_bytes_mod_order(&bytes)
}

/// The arkworks point with the same affine coordinates.
pub fn into_edwards(point: &AffinePoint) -> EdwardsAffine {
    EdwardsAffine::new_unchecked(fq(&point.x), fq(&point.y))
}

/// Normalize an extended point and hand it to arkworks.
pub fn into_projective(curve: &Curve, point: &ExtendedPoint) -> EdwardsProjective {
    into_edwards(&curve.to_affine(point)).into()
}
