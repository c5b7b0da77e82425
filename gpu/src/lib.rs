//! # gpu
//!
//! Rust traits to drive compute devices.
//!
//! A device owns word-addressed storage buffers and runs kernels against an
//! ordered list of them. Dispatches are visible in submission order: a
//! kernel never observes a buffer before every earlier dispatch writing it
//! has completed.
//!
//! Implemented for the host, running kernel lanes on a rayon pool.

use thiserror::Error;

pub mod host;
pub use host::Host;

/// Bytes per storage word.
pub const WORD_BYTES: usize = 4;

/// Practical per-buffer allocation limit of consumer GPUs.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 268_435_456;

#[derive(Debug, Error)]
pub enum Error {
    #[error("buffer of {requested} bytes exceeds the device limit of {limit} bytes")]
    BufferTooLarge { requested: usize, limit: usize },
    #[error("buffer length {0} is not a whole number of 32-bit words")]
    Unaligned(usize),
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(Buffer),
    #[error("buffer {0:?} is bound more than once in one dispatch")]
    AliasedBinding(Buffer),
    #[error("kernel `{kernel}` declares {expected} bindings, got {got}")]
    BindingCount {
        kernel: String,
        expected: usize,
        got: usize,
    },
    #[error("failed to build the host thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = core::result::Result<T, Error>;

/// Handle to a device-resident storage buffer.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct Buffer(pub(crate) usize);

/// How a kernel binds one of its buffers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    /// `read-only-storage`
    ReadOnly,
    /// `storage`, readable and writable
    ReadWrite,
}

/// Device limits the core must respect.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Limits {
    pub max_buffer_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

/// Workgroup counts of one dispatch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Workgroups {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Workgroups {
    pub const fn linear(x: u32) -> Self {
        Self { x, y: 1, z: 1 }
    }

    /// Smallest linear grid giving every one of `items` its own lane.
    pub fn covering(items: usize, workgroup_size: u32) -> Self {
        let size = workgroup_size.max(1) as usize;
        Self::linear(((items + size - 1) / size).max(1) as u32)
    }

    pub const fn count(&self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }
}

/// Geometry a kernel is launched with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Launch {
    pub workgroups: Workgroups,
    pub workgroup_size: u32,
}

impl Launch {
    /// Total number of lanes.
    pub const fn lanes(&self) -> usize {
        self.workgroups.count() * self.workgroup_size as usize
    }
}

/// A compiled compute kernel.
///
/// `inputs` are the [`Access::ReadOnly`] bindings and `outputs` the
/// [`Access::ReadWrite`] bindings, each in declaration order. Lanes run in
/// no particular order and must write disjoint locations.
pub trait Kernel: Sync {
    fn label(&self) -> &str;

    fn layout(&self) -> &[Access];

    fn workgroup_size(&self) -> u32;

    fn run(&self, launch: Launch, inputs: &[&[u32]], outputs: &mut [&mut [u32]]);
}

/// Buffer management.
pub trait Allocate {
    fn limits(&self) -> Limits;

    /// allocate a zero-initialized buffer of `size` bytes
    fn allocate(&mut self, size: usize) -> Result<Buffer>;

    /// allocate a buffer holding `bytes`
    fn upload(&mut self, bytes: &[u8]) -> Result<Buffer>;

    /// drop a buffer no stage reads any more
    fn release(&mut self, buffer: Buffer) -> Result<()>;

    fn upload_words(&mut self, words: &[u32]) -> Result<Buffer> {
        self.upload(bytemuck::cast_slice(words))
    }
}

/// Kernel execution.
pub trait Dispatch: Allocate {
    /// run `kernel` against `bindings`, which follow the kernel's layout
    fn dispatch(
        &mut self,
        kernel: &dyn Kernel,
        bindings: &[Buffer],
        workgroups: Workgroups,
    ) -> Result<()>;
}

/// Synchronous copy-out. Only verification and the final result use this.
pub trait Readback: Dispatch {
    fn readback(&mut self, buffers: &[Buffer]) -> Result<Vec<Vec<u8>>>;

    fn readback_words(&mut self, buffers: &[Buffer]) -> Result<Vec<Vec<u32>>> {
        self.readback(buffers)?
            .into_iter()
            .map(|bytes| {
                if bytes.len() % WORD_BYTES != 0 {
                    return Err(Error::Unaligned(bytes.len()));
                }
                let mut words = vec![0u32; bytes.len() / WORD_BYTES];
                bytemuck::cast_slice_mut(&mut words).copy_from_slice(&bytes);
                Ok(words)
            })
            .collect()
    }
}

/// Everything the pipeline needs from a device.
pub trait Device: Readback {}

impl<D: Readback> Device for D {}
