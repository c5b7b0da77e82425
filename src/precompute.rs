//! Cluster precompute: group the point indices of one window by chunk value.
//!
//! A single serial pass over the indices. Each chunk value owns a slot of
//! `max_cluster_size + 1` words in a map, its member count followed by up to
//! `max_cluster_size` member indices. Indices arriving at a full slot go to
//! the overflow list. The slots are then flattened, in order of first
//! occurrence of their value, into contiguous ranges of `new_point_indices`.
//!
//! This pass is the throughput ceiling of the pipeline; a parallel
//! prefix-sum bucketing would replace it.

use gpu::{Access, Kernel, Launch};

/// Output of one cluster precompute.
///
/// Cluster `k` is the `k`-th distinct chunk value to occur. Slots
/// `num_clusters..` are empty ranges.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Clusters {
    pub new_point_indices: Vec<u32>,
    pub cluster_start_indices: Vec<u32>,
    pub cluster_end_indices: Vec<u32>,
    /// indices left out of their full cluster
    pub overflow: Vec<u32>,
    pub num_clusters: usize,
}

impl Clusters {
    /// Read back from the device word buffers; `counts` is `[num_clusters, num_overflow]`.
    pub fn from_words(
        new_point_indices: Vec<u32>,
        cluster_start_indices: Vec<u32>,
        cluster_end_indices: Vec<u32>,
        mut overflow: Vec<u32>,
        counts: &[u32],
    ) -> Self {
        overflow.truncate(counts[1] as usize);
        Self {
            new_point_indices,
            cluster_start_indices,
            cluster_end_indices,
            overflow,
            num_clusters: counts[0] as usize,
        }
    }

    /// Member indices of cluster `k`.
    pub fn members(&self, k: usize) -> &[u32] {
        let start = self.cluster_start_indices[k] as usize;
        let end = self.cluster_end_indices[k] as usize;
        &self.new_point_indices[start..end]
    }

    /// Non-empty clusters with their index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[u32])> + '_ {
        (0..self.cluster_start_indices.len())
            .filter(move |k| self.cluster_start_indices[*k] < self.cluster_end_indices[*k])
            .map(move |k| (k, self.members(k)))
    }
}

/// Device-shaped outputs of the pass.
struct Output<'a> {
    new_point_indices: &'a mut [u32],
    cluster_start_indices: &'a mut [u32],
    cluster_end_indices: &'a mut [u32],
    overflow: &'a mut [u32],
}

/// The serial pass. The member counts in `map` must be zero on entry and
/// are zero again on return.
/// Returns `[num_clusters, num_overflow]`.
fn scan(
    chunks: &[u32],
    max_cluster_size: usize,
    map: &mut [u32],
    keys: &mut [u32],
    out: Output<'_>,
) -> [u32; 2] {
    let stride = max_cluster_size + 1;
    let mut num_clusters = 0;
    let mut num_overflow = 0;

    for (i, value) in chunks.iter().enumerate() {
        let slot = *value as usize * stride;
        let count = map[slot] as usize;
        if count == 0 {
            keys[num_clusters] = *value;
            num_clusters += 1;
        }
        if count < max_cluster_size {
            map[slot + 1 + count] = i as u32;
            map[slot] += 1;
        } else {
            out.overflow[num_overflow] = i as u32;
            num_overflow += 1;
        }
    }

    let mut offset = 0;
    for (k, value) in keys[..num_clusters].iter().enumerate() {
        let slot = *value as usize * stride;
        let count = map[slot] as usize;
        out.cluster_start_indices[k] = offset as u32;
        out.new_point_indices[offset..offset + count]
            .copy_from_slice(&map[slot + 1..slot + 1 + count]);
        offset += count;
        out.cluster_end_indices[k] = offset as u32;
        map[slot] = 0;
    }
    for k in num_clusters..chunks.len() {
        out.cluster_start_indices[k] = offset as u32;
        out.cluster_end_indices[k] = offset as u32;
    }

    [num_clusters as u32, num_overflow as u32]
}

/// Clusters of one window's chunk values, computed on the host.
pub fn cluster(chunks: &[u32], chunk_size: usize, max_cluster_size: usize) -> Clusters {
    let n = chunks.len();
    let num_buckets = 1usize << chunk_size;
    let mut map = vec![0u32; (max_cluster_size + 1) * num_buckets];
    let mut keys = vec![0u32; num_buckets];
    let mut clusters = Clusters {
        new_point_indices: vec![0; n],
        cluster_start_indices: vec![0; n],
        cluster_end_indices: vec![0; n],
        overflow: vec![0; n],
        num_clusters: 0,
    };
    let counts = scan(
        chunks,
        max_cluster_size,
        &mut map,
        &mut keys,
        Output {
            new_point_indices: &mut clusters.new_point_indices,
            cluster_start_indices: &mut clusters.cluster_start_indices,
            cluster_end_indices: &mut clusters.cluster_end_indices,
            overflow: &mut clusters.overflow,
        },
    );
    clusters.overflow.truncate(counts[1] as usize);
    clusters.num_clusters = counts[0] as usize;
    clusters
}

/// Cluster precompute of window `subtask`, one lane.
///
/// Bindings: `chunks` (read), `new_point_indices`, `cluster_start_indices`,
/// `cluster_end_indices`, `overflow`, `counts`, `map`, `keys` (write).
pub struct CsrPrecompute {
    pub input_size: usize,
    pub subtask: usize,
    pub max_cluster_size: usize,
}

impl Kernel for CsrPrecompute {
    fn label(&self) -> &str {
        "csr_precompute"
    }

    fn layout(&self) -> &[Access] {
        use Access::*;
        &[
            ReadOnly, ReadWrite, ReadWrite, ReadWrite, ReadWrite, ReadWrite, ReadWrite, ReadWrite,
        ]
    }

    fn workgroup_size(&self) -> u32 {
        1
    }

    fn run(&self, launch: Launch, inputs: &[&[u32]], outputs: &mut [&mut [u32]]) {
        if launch.lanes() == 0 {
            return;
        }
        let n = self.input_size;
        let chunks = &inputs[0][self.subtask * n..(self.subtask + 1) * n];
        let (out, counts, map, keys) = match outputs {
            [a, b, c, d, e, f, g] => (
                Output {
                    new_point_indices: a,
                    cluster_start_indices: b,
                    cluster_end_indices: c,
                    overflow: d,
                },
                e,
                f,
                g,
            ),
            _ => unreachable!(),
        };
        let result = scan(chunks, self.max_cluster_size, map, keys, out);
        counts[..2].copy_from_slice(&result);
    }
}
