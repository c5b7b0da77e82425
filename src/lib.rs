//! cuZK-style multi-scalar multiplication over compute kernels.
//!
//! Supports Edwards-BLS12, the twisted Edwards curve over the scalar field
//! of BLS12-377, on any [`gpu::Device`].
//!
//! Steps:
//! - convert affine points to extended Montgomery coordinates
//! - split scalars into `num_subtasks` windows of `chunk_size` bits
//! - per window, cluster point indices by chunk value (serial pass)
//! - collapse each cluster into one point and one chunk
//! - bucket the collapsed pairs, sum buckets, weight them, combine windows
//!
//! Every stage reads and writes device buffers only. Host round trips happen
//! for the final point, and after each stage in verification mode.

pub mod app;
pub use app::App;

pub mod buckets;

pub mod curve;
pub use curve::{AffinePoint, Curve, ExtendedPoint};

pub mod edwards;

pub mod error;
pub use error::{Error, Result, Violation};

pub mod field;

pub mod preaggregate;

pub mod precompute;
pub use precompute::Clusters;

pub mod scalar;

pub mod testing;

pub mod timing;

pub mod verify;

/// Unsigned 64-bit limb of a scalar
pub type Limb = u64;
/// 256-bit scalar composed of four limbs, least-significant limb first
pub type Scalar = [Limb; 4];

/// Bits in a [`Scalar`].
pub const SCALAR_BITS: usize = 256;

/// Upper bound on the number of points of one MSM.
pub const MAX_INPUT_SIZE: usize = 1 << 20;

/// Parameters of one MSM run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// number of scalar windows
    pub num_subtasks: usize,
    /// bits per window
    pub chunk_size: usize,
    /// bits per field limb
    pub word_size: usize,
    /// limbs per field element
    pub num_words: usize,
    /// points a cluster holds before further members overflow
    pub max_cluster_size: usize,
    /// lanes per workgroup of the parallel kernels
    pub workgroup_size: u32,
    /// read back and check every stage
    pub verify: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_subtasks: 16,
            chunk_size: 16,
            word_size: 13,
            num_words: 20,
            max_cluster_size: 4,
            workgroup_size: 64,
            verify: false,
        }
    }
}

impl Config {
    /// Windows of `chunk_size` bits, as many as cover a scalar.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            num_subtasks: SCALAR_BITS / chunk_size.max(1),
            chunk_size,
            ..Self::default()
        }
    }

    /// Checks the window layout and cluster cap. Limb layouts are checked
    /// when the field constants are derived.
    pub fn validate(&self) -> Result<()> {
        if self.num_subtasks * self.chunk_size != SCALAR_BITS {
            return Err(Error::WindowMismatch {
                num_subtasks: self.num_subtasks,
                chunk_size: self.chunk_size,
            });
        }
        if self.chunk_size > 32 {
            return Err(Error::ChunkSize(self.chunk_size));
        }
        if self.max_cluster_size == 0 {
            return Err(Error::ClusterSize);
        }
        Ok(())
    }

    /// Distinct chunk values of one window.
    pub fn num_buckets(&self) -> usize {
        1 << self.chunk_size
    }
}
