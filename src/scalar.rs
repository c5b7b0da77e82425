//! Splitting scalars into fixed-width windows.

use gpu::{Access, Kernel, Launch};
use rayon::prelude::*;

use crate::{Error, Result, Scalar, SCALAR_BITS};

/// Device words per scalar.
pub const SCALAR_WORDS: usize = 8;

/// Window `i` of width `chunk_size <= 32`, little-endian window order.
#[inline]
pub fn chunk(scalar: &Scalar, i: usize, chunk_size: usize) -> u32 {
    let bit = i * chunk_size;
    let (limb, shift) = (bit / 64, bit % 64);
    let mut value = scalar.get(limb).map_or(0, |l| l >> shift);
    if shift + chunk_size > 64 && shift != 0 {
        value |= scalar.get(limb + 1).map_or(0, |l| l << (64 - shift));
    }
    (value & ((1u64 << chunk_size) - 1)) as u32
}

/// All `num_subtasks` windows of `scalar`, such that
/// `scalar == sum(chunks[i] << (i * chunk_size))`.
pub fn decompose(scalar: &Scalar, num_subtasks: usize, chunk_size: usize) -> Result<Vec<u32>> {
    if num_subtasks * chunk_size != SCALAR_BITS {
        return Err(Error::WindowMismatch {
            num_subtasks,
            chunk_size,
        });
    }
    if chunk_size > 32 {
        return Err(Error::ChunkSize(chunk_size));
    }
    Ok((0..num_subtasks)
        .map(|i| chunk(scalar, i, chunk_size))
        .collect())
}

/// Inverse of [`decompose`].
pub fn recompose(chunks: impl IntoIterator<Item = u32>, chunk_size: usize) -> Scalar {
    let mut scalar = Scalar::default();
    for (i, chunk) in chunks.into_iter().enumerate() {
        let bit = i * chunk_size;
        let (limb, shift) = (bit / 64, bit % 64);
        let chunk = chunk as u64;
        if let Some(l) = scalar.get_mut(limb) {
            *l |= chunk << shift;
        }
        if shift + chunk_size > 64 {
            if let Some(l) = scalar.get_mut(limb + 1) {
                *l |= chunk >> (64 - shift);
            }
        }
    }
    scalar
}

pub fn to_words(scalar: &Scalar) -> [u32; SCALAR_WORDS] {
    let mut words = [0u32; SCALAR_WORDS];
    for (pair, limb) in words.chunks_mut(2).zip(scalar) {
        pair[0] = *limb as u32;
        pair[1] = (*limb >> 32) as u32;
    }
    words
}

pub fn from_words(words: &[u32]) -> Scalar {
    let mut scalar = Scalar::default();
    for (limb, pair) in scalar.iter_mut().zip(words.chunks(2)) {
        *limb = pair[0] as u64 | (pair[1] as u64) << 32;
    }
    scalar
}

pub fn from_le_bytes(bytes: &[u8; 32]) -> Scalar {
    let mut scalar = Scalar::default();
    for (limb, chunk) in scalar.iter_mut().zip(bytes.chunks(8)) {
        let mut le = [0u8; 8];
        le.copy_from_slice(chunk);
        *limb = u64::from_le_bytes(le);
    }
    scalar
}

pub fn to_le_bytes(scalar: &Scalar) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    for (chunk, limb) in bytes.chunks_mut(8).zip(scalar) {
        chunk.copy_from_slice(&limb.to_le_bytes());
    }
    bytes
}

pub fn from_be_bytes(bytes: &[u8; 32]) -> Scalar {
    let mut le = *bytes;
    le.reverse();
    from_le_bytes(&le)
}

/// Parses 64 big-endian hex digits, with or without a `0x` prefix.
pub fn from_hex(hex: &str) -> Result<Scalar> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(hex, &mut bytes)?;
    Ok(from_be_bytes(&bytes))
}

/// Scalar words in, subtask-major chunks out: `chunks[subtask * n + i]`.
///
/// Bindings: `scalars` (read), `chunks` (write).
pub struct DecomposeScalars {
    pub input_size: usize,
    pub num_subtasks: usize,
    pub chunk_size: usize,
    pub workgroup_size: u32,
}

impl Kernel for DecomposeScalars {
    fn label(&self) -> &str {
        "decompose_scalars"
    }

    fn layout(&self) -> &[Access] {
        &[Access::ReadOnly, Access::ReadWrite]
    }

    fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    fn run(&self, launch: Launch, inputs: &[&[u32]], outputs: &mut [&mut [u32]]) {
        let n = self.input_size;
        let lanes = launch.lanes().min(n);
        let scalars = inputs[0];

        // lane `i` owns column `i` of every subtask row
        outputs[0]
            .par_iter_mut()
            .take(self.num_subtasks * n)
            .enumerate()
            .filter(|(index, _)| index % n < lanes)
            .for_each(|(index, out)| {
                let (subtask, i) = (index / n, index % n);
                let scalar = from_words(&scalars[i * SCALAR_WORDS..(i + 1) * SCALAR_WORDS]);
                *out = chunk(&scalar, subtask, self.chunk_size);
            });
    }
}
