//! Twisted Edwards points in extended Montgomery-domain coordinates.

use gpu::{Access, Kernel, Launch};
use num_bigint::BigUint;
use rayon::prelude::*;

use crate::{
    field::{Limbs, Params},
    Scalar,
};

/// Affine point, canonical coordinates as little-endian 64-bit words.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct AffinePoint {
    pub x: [u64; 4],
    pub y: [u64; 4],
}

/// Extended coordinates `(X, Y, T, Z)` with `T = XY/Z`, every coordinate in
/// Montgomery form.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ExtendedPoint {
    pub x: Limbs,
    pub y: Limbs,
    pub t: Limbs,
    pub z: Limbs,
}

/// Curve `-x^2 + y^2 = 1 + d x^2 y^2` over the field of [`Params`].
#[derive(Clone, Debug)]
pub struct Curve {
    pub field: Params,
    /// `2d` in Montgomery form
    pub k: Limbs,
}

impl Curve {
    pub fn new(field: Params, d: &BigUint) -> Self {
        let two_d = (d.clone() * 2u32) % &field.p;
        let k = field.to_montgomery(&field.limbs_from_biguint(&two_d));
        Self { field, k }
    }

    pub fn identity(&self) -> ExtendedPoint {
        let field = &self.field;
        ExtendedPoint {
            x: field.zero(),
            y: field.one(),
            t: field.zero(),
            z: field.one(),
        }
    }

    /// `X = xR`, `Y = yR`, `T = xyR`, `Z = R`.
    ///
    /// `T` comes from the plain product `xy`, so no inversion of `Z` is needed.
    pub fn affine_to_extended(&self, x: &Limbs, y: &Limbs) -> ExtendedPoint {
        let field = &self.field;
        ExtendedPoint {
            x: field.to_montgomery(x),
            y: field.to_montgomery(y),
            t: field.to_montgomery(&field.field_mul(x, y)),
            z: field.one(),
        }
    }

    pub fn from_affine(&self, point: &AffinePoint) -> ExtendedPoint {
        let field = &self.field;
        let x = field.reduce(&field.limbs_from_u64s(&point.x));
        let y = field.reduce(&field.limbs_from_u64s(&point.y));
        self.affine_to_extended(&x, &y)
    }

    /// Unified addition for `a = -1`, complete on this curve, so doubling
    /// and the identity need no special case.
    ///
    /// Source: https://www.hyperelliptic.org/EFD/g1p/auto-twisted-extended-1.html#addition-add-2008-hwcd-3
    pub fn add(&self, p: &ExtendedPoint, q: &ExtendedPoint) -> ExtendedPoint {
        let f = &self.field;

        let r1 = f.sub_mod(&p.y, &p.x);
        let r2 = f.sub_mod(&q.y, &q.x);
        let r3 = f.add_mod(&p.y, &p.x);
        let r4 = f.add_mod(&q.y, &q.x);

        let r5 = f.mont_mul(&r1, &r2);
        let r6 = f.mont_mul(&r3, &r4);
        let r7 = f.mont_mul(&f.mont_mul(&p.t, &self.k), &q.t);
        let r8 = f.mont_mul(&f.add_mod(&p.z, &p.z), &q.z);

        let e = f.sub_mod(&r6, &r5);
        let ff = f.sub_mod(&r8, &r7);
        let g = f.add_mod(&r8, &r7);
        let h = f.add_mod(&r6, &r5);

        ExtendedPoint {
            x: f.mont_mul(&e, &ff),
            y: f.mont_mul(&g, &h),
            t: f.mont_mul(&e, &h),
            z: f.mont_mul(&ff, &g),
        }
    }

    pub fn double(&self, p: &ExtendedPoint) -> ExtendedPoint {
        self.add(p, p)
    }

    pub fn neg(&self, p: &ExtendedPoint) -> ExtendedPoint {
        let f = &self.field;
        ExtendedPoint {
            x: f.sub_mod(&f.zero(), &p.x),
            t: f.sub_mod(&f.zero(), &p.t),
            ..*p
        }
    }

    /// Projective equality, `X1 Z2 == X2 Z1` and `Y1 Z2 == Y2 Z1`.
    pub fn same_point(&self, p: &ExtendedPoint, q: &ExtendedPoint) -> bool {
        let f = &self.field;
        f.mont_mul(&p.x, &q.z) == f.mont_mul(&q.x, &p.z)
            && f.mont_mul(&p.y, &q.z) == f.mont_mul(&q.y, &p.z)
    }

    pub fn to_affine(&self, p: &ExtendedPoint) -> AffinePoint {
        let f = &self.field;
        let z_inv = f.inverse(&p.z);
        let x = f.from_montgomery(&f.mont_mul(&p.x, &z_inv));
        let y = f.from_montgomery(&f.mont_mul(&p.y, &z_inv));
        AffinePoint {
            x: f.limbs_to_u64s(&x),
            y: f.limbs_to_u64s(&y),
        }
    }

    /// Double-and-add, most significant bit first. Verification only.
    pub fn scalar_mul(&self, p: &ExtendedPoint, scalar: &Scalar) -> ExtendedPoint {
        let mut acc = self.identity();
        for i in (0..256).rev() {
            acc = self.double(&acc);
            if (scalar[i / 64] >> (i % 64)) & 1 == 1 {
                acc = self.add(&acc, p);
            }
        }
        acc
    }

    pub fn sum<'a>(&self, points: impl IntoIterator<Item = &'a ExtendedPoint>) -> ExtendedPoint {
        points
            .into_iter()
            .fold(self.identity(), |acc, point| self.add(&acc, point))
    }

    /// Words per point in each of the `x_y` and `t_z` buffers.
    pub fn point_words(&self) -> usize {
        2 * self.field.num_words
    }

    /// Read point `index` from a pair of `x_y`, `t_z` buffers.
    #[inline]
    pub fn load(&self, x_y: &[u32], t_z: &[u32], index: usize) -> ExtendedPoint {
        let n = self.field.num_words;
        let offset = index * 2 * n;
        ExtendedPoint {
            x: self.field.load(&x_y[offset..]),
            y: self.field.load(&x_y[offset + n..]),
            t: self.field.load(&t_z[offset..]),
            z: self.field.load(&t_z[offset + n..]),
        }
    }

    /// Write one point into its own `x_y`, `t_z` slots.
    #[inline]
    pub fn store(&self, point: &ExtendedPoint, x_y: &mut [u32], t_z: &mut [u32]) {
        let n = self.field.num_words;
        self.field.store(&point.x, &mut x_y[..n]);
        self.field.store(&point.y, &mut x_y[n..2 * n]);
        self.field.store(&point.t, &mut t_z[..n]);
        self.field.store(&point.z, &mut t_z[n..2 * n]);
    }
}

/// Converts plain affine coordinates into extended Montgomery form, one lane
/// per point.
///
/// Bindings: `coords` (read), `x_y` (write), `t_z` (write).
pub struct ConvertPoints<'a> {
    pub curve: &'a Curve,
    pub input_size: usize,
    pub workgroup_size: u32,
}

impl Kernel for ConvertPoints<'_> {
    fn label(&self) -> &str {
        "convert_point_coords"
    }

    fn layout(&self) -> &[Access] {
        &[Access::ReadOnly, Access::ReadWrite, Access::ReadWrite]
    }

    fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    fn run(&self, launch: Launch, inputs: &[&[u32]], outputs: &mut [&mut [u32]]) {
        let curve = self.curve;
        let field = &curve.field;
        let n = field.num_words;
        let stride = curve.point_words();
        let coords = inputs[0];
        let (x_y, t_z) = match outputs {
            [x_y, t_z] => (x_y, t_z),
            _ => unreachable!(),
        };

        x_y.par_chunks_mut(stride)
            .zip(t_z.par_chunks_mut(stride))
            .take(launch.lanes().min(self.input_size))
            .enumerate()
            .for_each(|(i, (x_y, t_z))| {
                let x = field.load(&coords[i * stride..]);
                let y = field.load(&coords[i * stride + n..]);
                curve.store(&curve.affine_to_extended(&x, &y), x_y, t_z);
            });
    }
}
