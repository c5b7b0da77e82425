//! Fixed-width modular arithmetic over small limbs.
//!
//! Elements are `num_words` limbs of `word_size` bits, least significant limb
//! first, each limb held in a 32-bit lane word. Every product of two limbs
//! plus a carry must fit 32 bits, which caps `word_size` at 15.
//!
//! All reduction constants live in [`Params`], derived once from the modulus
//! and shared read-only by every kernel of a run.

use num_bigint::BigUint;

use crate::{Error, Result};

/// Capacity of a [`Limbs`] array.
pub const MAX_WORDS: usize = 32;
/// Widest limb whose products still fit a 32-bit accumulator.
pub const MAX_WORD_SIZE: usize = 15;

const WIDE: usize = 2 * MAX_WORDS + 2;

/// Limbs of one field element; only the first `num_words` are used, the rest
/// stay zero.
pub type Limbs = [u32; MAX_WORDS];

type Wide = [u32; WIDE];

/// Reduction constants for one modulus and limb width.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Params {
    pub word_size: usize,
    pub num_words: usize,
    /// spare bits between `num_words * word_size` and the modulus
    pub slack: usize,
    pub mask: u32,
    /// `-p^-1 mod 2^word_size`
    pub n0: u32,
    pub p: BigUint,
    pub p_limbs: Limbs,
    /// `R mod p` with `R = 2^(num_words * word_size)`, i.e. one in Montgomery form
    pub r_limbs: Limbs,
    /// Barrett constant `floor(2^(2 * num_words * word_size) / p)`, `num_words + 1` limbs
    pub mu_limbs: [u32; MAX_WORDS + 1],
}

impl Params {
    pub fn new(p: &BigUint, word_size: usize, num_words: usize) -> Result<Self> {
        if word_size == 0 || word_size > MAX_WORD_SIZE {
            return Err(Error::WordSize(word_size));
        }
        if num_words > MAX_WORDS {
            return Err(Error::TooManyWords {
                num_words,
                max: MAX_WORDS,
            });
        }
        let low = p.to_u32_digits().first().copied().unwrap_or(0);
        let bits = p.bits() as usize;
        if low & 1 == 0 || bits < 2 {
            return Err(Error::InvalidModulus);
        }
        let total = num_words * word_size;
        if total < bits {
            return Err(Error::InsufficientLimbs {
                num_words,
                word_size,
                bits,
            });
        }
        let slack = total - bits;
        if slack >= word_size {
            return Err(Error::ExcessLimbs {
                num_words,
                word_size,
                bits,
            });
        }

        let mask = (1u32 << word_size) - 1;
        let mut params = Self {
            word_size,
            num_words,
            slack,
            mask,
            n0: 0,
            p: p.clone(),
            p_limbs: [0; MAX_WORDS],
            r_limbs: [0; MAX_WORDS],
            mu_limbs: [0; MAX_WORDS + 1],
        };

        let one = BigUint::from(1u32);
        params.p_limbs = params.limbs_from_biguint(p);
        params.r_limbs = params.limbs_from_biguint(&((&one << total) % p));
        let mu = (&one << (2 * total)) / p;
        let mu_digits = params.digits(&mu, num_words + 1);
        params.mu_limbs[..num_words + 1].copy_from_slice(&mu_digits);

        // Newton iteration doubles the correct low bits each round
        let p0 = params.p_limbs[0];
        let mut inv = 1u32;
        for _ in 0..5 {
            inv = inv.wrapping_mul(2u32.wrapping_sub(p0.wrapping_mul(inv)));
        }
        params.n0 = inv.wrapping_neg() & mask;

        Ok(params)
    }

    fn digits(&self, value: &BigUint, count: usize) -> Vec<u32> {
        let mask = BigUint::from(self.mask);
        (0..count)
            .map(|i| {
                let digit = (value >> (i * self.word_size)) & &mask;
                digit.to_u32_digits().first().copied().unwrap_or(0)
            })
            .collect()
    }

    /// Limbs of `value`, truncated to `num_words * word_size` bits.
    pub fn limbs_from_biguint(&self, value: &BigUint) -> Limbs {
        let mut limbs = [0; MAX_WORDS];
        limbs[..self.num_words].copy_from_slice(&self.digits(value, self.num_words));
        limbs
    }

    pub fn limbs_to_biguint(&self, limbs: &Limbs) -> BigUint {
        limbs[..self.num_words]
            .iter()
            .rev()
            .fold(BigUint::from(0u32), |acc, limb| {
                (acc << self.word_size) + BigUint::from(*limb)
            })
    }

    /// Limbs of a little-endian integer of 64-bit words.
    pub fn limbs_from_u64s(&self, words: &[u64]) -> Limbs {
        let mut limbs = [0; MAX_WORDS];
        for (i, limb) in limbs.iter_mut().take(self.num_words).enumerate() {
            let bit = i * self.word_size;
            let (word, shift) = (bit / 64, bit % 64);
            let mut value = words.get(word).map_or(0, |w| w >> shift);
            if shift + self.word_size > 64 {
                value |= words.get(word + 1).map_or(0, |w| w << (64 - shift));
            }
            *limb = value as u32 & self.mask;
        }
        limbs
    }

    /// Little-endian 64-bit words of `limbs`, truncated to 256 bits.
    pub fn limbs_to_u64s(&self, limbs: &Limbs) -> [u64; 4] {
        let mut words = [0u64; 4];
        for (i, limb) in limbs[..self.num_words].iter().enumerate() {
            let bit = i * self.word_size;
            let (word, shift) = (bit / 64, bit % 64);
            let limb = *limb as u64;
            if let Some(w) = words.get_mut(word) {
                *w |= limb << shift;
            }
            if shift + self.word_size > 64 {
                if let Some(w) = words.get_mut(word + 1) {
                    *w |= limb >> (64 - shift);
                }
            }
        }
        words
    }

    /// Read one element from a device word slice.
    #[inline]
    pub fn load(&self, words: &[u32]) -> Limbs {
        let mut limbs = [0; MAX_WORDS];
        limbs[..self.num_words].copy_from_slice(&words[..self.num_words]);
        limbs
    }

    /// Write one element into a device word slice.
    #[inline]
    pub fn store(&self, limbs: &Limbs, words: &mut [u32]) {
        words[..self.num_words].copy_from_slice(&limbs[..self.num_words]);
    }

    pub fn zero(&self) -> Limbs {
        [0; MAX_WORDS]
    }

    /// One in Montgomery form.
    pub fn one(&self) -> Limbs {
        self.r_limbs
    }

    pub fn is_zero(&self, a: &Limbs) -> bool {
        a[..self.num_words].iter().all(|limb| *limb == 0)
    }

    fn gte(&self, a: &[u32], b: &[u32]) -> bool {
        for i in (0..a.len()).rev() {
            let bi = b.get(i).copied().unwrap_or(0);
            if a[i] != bi {
                return a[i] > bi;
            }
        }
        true
    }

    /// `a -= b` over `a.len()` limbs, returning the final borrow.
    fn sub_in_place(&self, a: &mut [u32], b: &[u32]) -> u32 {
        let mut borrow = 0u32;
        for i in 0..a.len() {
            let bi = b.get(i).copied().unwrap_or(0);
            let x = a[i].wrapping_sub(bi).wrapping_sub(borrow);
            a[i] = x & self.mask;
            borrow = x >> 31;
        }
        borrow
    }

    pub fn add_mod(&self, a: &Limbs, b: &Limbs) -> Limbs {
        let n = self.num_words;
        let w = self.word_size;
        let mut sum = [0; MAX_WORDS];
        let mut carry = 0u32;
        for i in 0..n {
            let x = a[i] + b[i] + carry;
            sum[i] = x & self.mask;
            carry = x >> w;
        }
        if carry != 0 || self.gte(&sum[..n], &self.p_limbs[..n]) {
            self.sub_in_place(&mut sum[..n], &self.p_limbs[..n]);
        }
        sum
    }

    pub fn sub_mod(&self, a: &Limbs, b: &Limbs) -> Limbs {
        let n = self.num_words;
        let w = self.word_size;
        let mut diff = *a;
        if self.sub_in_place(&mut diff[..n], &b[..n]) != 0 {
            let mut carry = 0u32;
            for i in 0..n {
                let x = diff[i] + self.p_limbs[i] + carry;
                diff[i] = x & self.mask;
                carry = x >> w;
            }
        }
        diff
    }

    /// Montgomery product `a * b * R^-1 mod p` of two reduced elements.
    ///
    /// Each of the `num_words` rounds adds one row of the product, then adds
    /// the multiple of `p` that clears the low limb and shifts one limb down.
    pub fn mont_mul(&self, a: &Limbs, b: &Limbs) -> Limbs {
        let n = self.num_words;
        let w = self.word_size;
        let mask = self.mask;
        let mut t = [0u32; MAX_WORDS + 2];

        for &bi in &b[..n] {
            let mut carry = 0u32;
            for j in 0..n {
                let x = t[j] + a[j] * bi + carry;
                t[j] = x & mask;
                carry = x >> w;
            }
            let x = t[n] + carry;
            t[n] = x & mask;
            t[n + 1] = x >> w;

            let m = (t[0] * self.n0) & mask;
            let mut carry = (t[0] + m * self.p_limbs[0]) >> w;
            for j in 1..n {
                let x = t[j] + m * self.p_limbs[j] + carry;
                t[j - 1] = x & mask;
                carry = x >> w;
            }
            let x = t[n] + carry;
            t[n - 1] = x & mask;
            t[n] = t[n + 1] + (x >> w);
            t[n + 1] = 0;
        }

        // t < 2p
        let mut out = [0; MAX_WORDS];
        out[..n].copy_from_slice(&t[..n]);
        if t[n] != 0 || self.gte(&out[..n], &self.p_limbs[..n]) {
            self.sub_in_place(&mut out[..n], &self.p_limbs[..n]);
        }
        out
    }

    fn wide_mul(&self, a: &[u32], b: &[u32], out: &mut [u32]) {
        let w = self.word_size;
        for (i, &ai) in a.iter().enumerate() {
            let mut carry = 0u32;
            for (j, &bj) in b.iter().enumerate() {
                let x = out[i + j] + ai * bj + carry;
                out[i + j] = x & self.mask;
                carry = x >> w;
            }
            out[i + b.len()] = carry;
        }
    }

    /// Barrett reduction of a double-width value `z < 2^(2 * num_words * word_size)`.
    pub fn barrett_reduce(&self, z: &[u32]) -> Limbs {
        let n = self.num_words;
        let w = self.word_size;
        let mask = self.mask;
        let z = |i: usize| z.get(i).copied().unwrap_or(0);

        // q3 = floor(floor(z / b^(n-1)) * mu / b^(n+1))
        let q1: Vec<u32> = (n - 1..2 * n).map(z).collect();
        let mut q2: Wide = [0; WIDE];
        self.wide_mul(&q1, &self.mu_limbs[..n + 1], &mut q2);
        let q3 = &q2[n + 1..2 * n + 2];

        // r = (z - q3 * p) mod b^(n+1)
        let mut qp = [0u32; MAX_WORDS + 1];
        for (i, &qi) in q3.iter().enumerate() {
            let mut carry = 0u32;
            for j in 0..n + 1 - i {
                let pj = if j < n { self.p_limbs[j] } else { 0 };
                let x = qp[i + j] + qi * pj + carry;
                qp[i + j] = x & mask;
                carry = x >> w;
            }
        }
        let mut r = [0u32; MAX_WORDS + 1];
        for (i, limb) in r[..n + 1].iter_mut().enumerate() {
            *limb = z(i);
        }
        self.sub_in_place(&mut r[..n + 1], &qp[..n + 1]);

        while self.gte(&r[..n + 1], &self.p_limbs[..n]) {
            self.sub_in_place(&mut r[..n + 1], &self.p_limbs[..n]);
        }

        let mut out = [0; MAX_WORDS];
        out[..n].copy_from_slice(&r[..n]);
        out
    }

    /// Plain-domain product `a * b mod p`.
    pub fn field_mul(&self, a: &Limbs, b: &Limbs) -> Limbs {
        let n = self.num_words;
        let mut z: Wide = [0; WIDE];
        self.wide_mul(&a[..n], &b[..n], &mut z);
        self.barrett_reduce(&z[..2 * n])
    }

    /// Reduce any `num_words`-limb value below `p`.
    pub fn reduce(&self, a: &Limbs) -> Limbs {
        self.barrett_reduce(&a[..self.num_words])
    }

    /// `a * R mod p`
    pub fn to_montgomery(&self, a: &Limbs) -> Limbs {
        self.field_mul(a, &self.r_limbs)
    }

    /// `a * R^-1 mod p`
    pub fn from_montgomery(&self, a: &Limbs) -> Limbs {
        let mut one = [0; MAX_WORDS];
        one[0] = 1;
        self.mont_mul(a, &one)
    }

    /// Inverse of a Montgomery-form element by Fermat's little theorem; zero maps to zero.
    pub fn inverse(&self, a: &Limbs) -> Limbs {
        let exponent = (self.p.clone() - 2u32).to_u32_digits();
        let bits = exponent.len() * 32;
        let mut acc = self.one();
        for i in (0..bits).rev() {
            acc = self.mont_mul(&acc, &acc);
            if (exponent[i / 32] >> (i % 32)) & 1 == 1 {
                acc = self.mont_mul(&acc, a);
            }
        }
        acc
    }
}
