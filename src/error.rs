//! Error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("num_subtasks * chunk_size must be 256, got {num_subtasks} * {chunk_size}")]
    WindowMismatch {
        num_subtasks: usize,
        chunk_size: usize,
    },
    #[error("chunk size {0} does not fit a 32-bit device word")]
    ChunkSize(usize),
    #[error("word size {0} is outside 1..=15")]
    WordSize(usize),
    #[error("{num_words} words exceed the supported maximum of {max}")]
    TooManyWords { num_words: usize, max: usize },
    #[error("modulus must be an odd integer greater than 2")]
    InvalidModulus,
    #[error("{num_words} words of {word_size} bits cannot hold a {bits}-bit modulus")]
    InsufficientLimbs {
        num_words: usize,
        word_size: usize,
        bits: usize,
    },
    #[error("{num_words} words of {word_size} bits leave a whole unused word over a {bits}-bit modulus")]
    ExcessLimbs {
        num_words: usize,
        word_size: usize,
        bits: usize,
    },
    #[error("max_cluster_size must be at least 1")]
    ClusterSize,
    #[error("input of {size} points exceeds the supported bound of {limit}")]
    InputTooLarge { size: usize, limit: usize },
    #[error("empty input")]
    EmptyInput,
    #[error("{points} points but {scalars} scalars")]
    LengthMismatch { points: usize, scalars: usize },
    #[error("`{buffer}` needs {requested} bytes, over the device limit of {limit}")]
    ScratchTooLarge {
        buffer: &'static str,
        requested: usize,
        limit: usize,
    },
    #[error("invalid scalar hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error(transparent)]
    Device(#[from] gpu::Error),
    #[error("invariant violated: {0}")]
    Invariant(#[from] Violation),
}

/// Breaches found by the verification mode. Any of these is a kernel bug.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Violation {
    #[error("point {index} converted incorrectly")]
    PointConversion { index: usize },
    #[error("chunks of scalar {index} do not sum back to the scalar")]
    Decomposition { index: usize },
    #[error("cluster {cluster} has start {start} > end {end}")]
    ClusterRange {
        cluster: usize,
        start: u32,
        end: u32,
    },
    #[error("cluster {cluster} holds {size} points, over the cap of {max}")]
    ClusterTooLarge {
        cluster: usize,
        size: usize,
        max: usize,
    },
    #[error("point index {index} is covered {count} times")]
    Partition { index: usize, count: usize },
    #[error("cluster {cluster} mixes chunk values")]
    MixedCluster { cluster: usize },
    #[error("chunk value {value} is split over clusters {first} and {second}")]
    SplitValue {
        value: u32,
        first: usize,
        second: usize,
    },
    #[error("point {index} overflowed before its cluster was full")]
    EarlyOverflow { index: usize },
    #[error("aggregated point of cluster {cluster} differs from the sum of its members")]
    PreAggregatedPoint { cluster: usize },
    #[error("aggregated chunk of cluster {cluster} is {found}, expected {expected}")]
    PreAggregatedChunk {
        cluster: usize,
        found: u32,
        expected: u32,
    },
}

pub type Result<T> = core::result::Result<T, Error>;
