//! Bucket method over the pre-aggregated pairs of each window, and the
//! recombination of the windows.
//!
//! After pre-aggregation a window holds `num_clusters` representative pairs
//! and `num_overflow` untouched original pairs. These are sorted by chunk
//! value into a CSR matrix, each row (bucket) is summed, the buckets are
//! weighted by their value and the windows combined by Horner's rule.

use gpu::{Access, Kernel, Launch};
use rayon::prelude::*;

use crate::curve::{Curve, ExtendedPoint};

/// Counting sort of a window's pairs by chunk value, one lane.
///
/// `bucket_offsets[v]..bucket_offsets[v + 1]` indexes the entries of bucket
/// `v`. An entry `e < n` is representative slot `e`, an entry `e >= n` is
/// original point `e - n`.
///
/// Bindings: aggregated chunks, `chunks`, `overflow`, `counts` (read),
/// `bucket_offsets`, `bucket_entries` (write).
pub struct Transpose {
    pub input_size: usize,
    pub subtask: usize,
    pub num_buckets: usize,
}

impl Transpose {
    fn entries<'a>(
        &self,
        aggregated: &'a [u32],
        window: &'a [u32],
        overflow: &'a [u32],
        counts: &[u32],
    ) -> impl Iterator<Item = (u32, u32)> + 'a {
        let n = self.input_size as u32;
        let (num_clusters, num_overflow) = (counts[0] as usize, counts[1] as usize);
        let representatives = aggregated[..num_clusters]
            .iter()
            .enumerate()
            .map(|(k, value)| (*value, k as u32));
        let overflowed = overflow[..num_overflow]
            .iter()
            .map(move |i| (window[*i as usize], n + *i));
        representatives.chain(overflowed)
    }
}

impl Kernel for Transpose {
    fn label(&self) -> &str {
        "transpose"
    }

    fn layout(&self) -> &[Access] {
        use Access::*;
        &[ReadOnly, ReadOnly, ReadOnly, ReadOnly, ReadWrite, ReadWrite]
    }

    fn workgroup_size(&self) -> u32 {
        1
    }

    fn run(&self, launch: Launch, inputs: &[&[u32]], outputs: &mut [&mut [u32]]) {
        if launch.lanes() == 0 {
            return;
        }
        let n = self.input_size;
        let (aggregated, chunks, overflow, counts) = match inputs {
            [a, b, c, d] => (*a, *b, *c, *d),
            _ => unreachable!(),
        };
        let window = &chunks[self.subtask * n..(self.subtask + 1) * n];
        let (offsets, entries) = match outputs {
            [a, b] => (a, b),
            _ => unreachable!(),
        };
        let offsets = &mut offsets[..self.num_buckets + 1];

        offsets.fill(0);
        for (value, _) in self.entries(aggregated, window, overflow, counts) {
            offsets[value as usize + 1] += 1;
        }
        for v in 1..offsets.len() {
            offsets[v] += offsets[v - 1];
        }
        // offsets[v] serves as the write cursor of bucket v, ending at the
        // start of bucket v + 1
        for (value, entry) in self.entries(aggregated, window, overflow, counts) {
            let cursor = &mut offsets[value as usize];
            entries[*cursor as usize] = entry;
            *cursor += 1;
        }
        for v in (1..self.num_buckets).rev() {
            offsets[v] = offsets[v - 1];
        }
        offsets[0] = 0;
    }
}

/// Sparse matrix-vector product: one lane per bucket sums its entries.
///
/// Bindings: `bucket_offsets`, `bucket_entries`, aggregated `x_y`, `t_z`,
/// original `x_y`, `t_z` (read), bucket `x_y`, `t_z` (write).
pub struct Smvp<'a> {
    pub curve: &'a Curve,
    pub input_size: usize,
    pub num_buckets: usize,
    pub workgroup_size: u32,
}

impl Kernel for Smvp<'_> {
    fn label(&self) -> &str {
        "smvp"
    }

    fn layout(&self) -> &[Access] {
        use Access::*;
        &[
            ReadOnly, ReadOnly, ReadOnly, ReadOnly, ReadOnly, ReadOnly, ReadWrite, ReadWrite,
        ]
    }

    fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    fn run(&self, launch: Launch, inputs: &[&[u32]], outputs: &mut [&mut [u32]]) {
        let curve = self.curve;
        let n = self.input_size;
        let stride = curve.point_words();
        let (offsets, entries, agg_x_y, agg_t_z, x_y, t_z) = match inputs {
            [a, b, c, d, e, f] => (*a, *b, *c, *d, *e, *f),
            _ => unreachable!(),
        };
        let (out_x_y, out_t_z) = match outputs {
            [a, b] => (a, b),
            _ => unreachable!(),
        };

        out_x_y
            .par_chunks_mut(stride)
            .zip(out_t_z.par_chunks_mut(stride))
            .take(launch.lanes().min(self.num_buckets))
            .enumerate()
            .for_each(|(v, (out_x_y, out_t_z))| {
                let row = &entries[offsets[v] as usize..offsets[v + 1] as usize];
                let sum = row.iter().fold(curve.identity(), |acc, entry| {
                    let entry = *entry as usize;
                    let point = if entry < n {
                        curve.load(agg_x_y, agg_t_z, entry)
                    } else {
                        curve.load(x_y, t_z, entry - n)
                    };
                    curve.add(&acc, &point)
                });
                curve.store(&sum, out_x_y, out_t_z);
            });
    }
}

/// `sum(v * B_v)` over the buckets of one window by running sums, one lane.
/// Writes slot `subtask` of the window buffers.
///
/// Bindings: bucket `x_y`, `t_z` (read), window `x_y`, `t_z` (write).
pub struct BucketAggregation<'a> {
    pub curve: &'a Curve,
    pub subtask: usize,
    pub num_buckets: usize,
}

impl Kernel for BucketAggregation<'_> {
    fn label(&self) -> &str {
        "bucket_aggregation"
    }

    fn layout(&self) -> &[Access] {
        use Access::*;
        &[ReadOnly, ReadOnly, ReadWrite, ReadWrite]
    }

    fn workgroup_size(&self) -> u32 {
        1
    }

    fn run(&self, launch: Launch, inputs: &[&[u32]], outputs: &mut [&mut [u32]]) {
        if launch.lanes() == 0 {
            return;
        }
        let curve = self.curve;
        let stride = curve.point_words();
        let (x_y, t_z) = (inputs[0], inputs[1]);

        let mut running = curve.identity();
        let mut total = curve.identity();
        for v in (1..self.num_buckets).rev() {
            running = curve.add(&running, &curve.load(x_y, t_z, v));
            total = curve.add(&total, &running);
        }

        let range = self.subtask * stride..(self.subtask + 1) * stride;
        let (out_x_y, out_t_z) = match outputs {
            [a, b] => (a, b),
            _ => unreachable!(),
        };
        curve.store(&total, &mut out_x_y[range.clone()], &mut out_t_z[range]);
    }
}

/// Horner's rule over the windows, `W_0 + 2^c (W_1 + 2^c (W_2 + ...))`, one lane.
///
/// Bindings: window `x_y`, `t_z` (read), result `x_y`, `t_z` (write).
pub struct CombineWindows<'a> {
    pub curve: &'a Curve,
    pub num_subtasks: usize,
    pub chunk_size: usize,
}

impl CombineWindows<'_> {
    pub fn combine(&self, windows: &[ExtendedPoint]) -> ExtendedPoint {
        let curve = self.curve;
        windows.iter().rev().fold(curve.identity(), |acc, window| {
            let shifted = (0..self.chunk_size).fold(acc, |acc, _| curve.double(&acc));
            curve.add(&shifted, window)
        })
    }
}

impl Kernel for CombineWindows<'_> {
    fn label(&self) -> &str {
        "combine_windows"
    }

    fn layout(&self) -> &[Access] {
        use Access::*;
        &[ReadOnly, ReadOnly, ReadWrite, ReadWrite]
    }

    fn workgroup_size(&self) -> u32 {
        1
    }

    fn run(&self, launch: Launch, inputs: &[&[u32]], outputs: &mut [&mut [u32]]) {
        if launch.lanes() == 0 {
            return;
        }
        let curve = self.curve;
        let windows: Vec<_> = (0..self.num_subtasks)
            .map(|s| curve.load(inputs[0], inputs[1], s))
            .collect();
        let result = self.combine(&windows);
        let (out_x_y, out_t_z) = match outputs {
            [a, b] => (a, b),
            _ => unreachable!(),
        };
        curve.store(&result, out_x_y, out_t_z);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{edwards, testing::random_points};
    use gpu::{Allocate, Dispatch, Host, Readback, Workgroups};

    fn store_all(curve: &Curve, points: &[ExtendedPoint]) -> (Vec<u32>, Vec<u32>) {
        let stride = curve.point_words();
        let mut x_y = vec![0u32; points.len() * stride];
        let mut t_z = x_y.clone();
        for (i, point) in points.iter().enumerate() {
            let range = i * stride..(i + 1) * stride;
            curve.store(point, &mut x_y[range.clone()], &mut t_z[range]);
        }
        (x_y, t_z)
    }

    #[test]
    fn transpose_sorts_by_value() {
        let n = 6;
        // window 1 is transposed
        let chunks = [[0u32; 6], [3, 1, 3, 3, 2, 1]].concat();
        let aggregated = [3u32, 1, 2, 0, 0, 0];
        let overflow = [3u32, 0, 0, 0, 0, 0];
        let counts = [3u32, 1];

        let mut host = Host::new().unwrap();
        let inputs: Vec<_> = [&chunks[..], &aggregated[..], &overflow[..], &counts[..]]
            .iter()
            .map(|words| host.upload_words(words).unwrap())
            .collect();
        let offsets = host.allocate(5 * 4).unwrap();
        let entries = host.allocate(n * 4).unwrap();
        let kernel = Transpose {
            input_size: n,
            subtask: 1,
            num_buckets: 4,
        };
        host.dispatch(
            &kernel,
            &[inputs[1], inputs[0], inputs[2], inputs[3], offsets, entries],
            Workgroups::linear(1),
        )
        .unwrap();

        let words = host.readback_words(&[offsets, entries]).unwrap();
        assert_eq!(words[0], vec![0, 0, 1, 2, 4]);
        // bucket 3 holds representative 0 and original point 3
        assert_eq!(words[1][..4], [1, 2, 0, n as u32 + 3]);
    }

    #[test]
    fn buckets_weight_and_combine() {
        let curve = edwards::curve(13, 20).unwrap();
        let points: Vec<_> = random_points(2)
            .iter()
            .map(|point| curve.from_affine(&point.into()))
            .collect();
        let n = points.len();
        let (x_y, t_z) = store_all(&curve, &points);

        // bucket 1: point 0 + point 3 (original), bucket 3: point 1, bucket 2 empty
        let offsets = [0u32, 0, 2, 2, 3];
        let entries = [0u32, n as u32 + 3, 1, 0];

        let mut host = Host::new().unwrap();
        let inputs: Vec<_> = [&offsets[..], &entries[..], &x_y[..], &t_z[..]]
            .iter()
            .map(|words| host.upload_words(words).unwrap())
            .collect();
        let original_x_y = host.upload_words(&x_y).unwrap();
        let original_t_z = host.upload_words(&t_z).unwrap();
        let stride_bytes = curve.point_words() * 4;
        let bucket_x_y = host.allocate(4 * stride_bytes).unwrap();
        let bucket_t_z = host.allocate(4 * stride_bytes).unwrap();
        let smvp = Smvp {
            curve: &curve,
            input_size: n,
            num_buckets: 4,
            workgroup_size: 2,
        };
        let mut bindings = inputs.clone();
        bindings.extend([original_x_y, original_t_z, bucket_x_y, bucket_t_z]);
        host.dispatch(&smvp, &bindings, Workgroups::covering(4, 2))
            .unwrap();

        let window_x_y = host.allocate(2 * stride_bytes).unwrap();
        let window_t_z = host.allocate(2 * stride_bytes).unwrap();
        let aggregation = BucketAggregation {
            curve: &curve,
            subtask: 1,
            num_buckets: 4,
        };
        host.dispatch(
            &aggregation,
            &[bucket_x_y, bucket_t_z, window_x_y, window_t_z],
            Workgroups::linear(1),
        )
        .unwrap();

        let words = host.readback_words(&[window_x_y, window_t_z]).unwrap();
        let window = curve.load(&words[0], &words[1], 1);
        let b1 = curve.add(&points[0], &points[3]);
        let expected = curve.add(&b1, &curve.scalar_mul(&points[1], &[3, 0, 0, 0]));
        assert!(curve.same_point(&window, &expected));
        // slot 0 untouched
        assert!(curve.field.is_zero(&curve.load(&words[0], &words[1], 0).z));
    }

    #[test]
    fn horner_combination() {
        let curve = edwards::curve(13, 20).unwrap();
        let windows: Vec<_> = random_points(2)
            .iter()
            .map(|point| curve.from_affine(&point.into()))
            .collect();
        let (x_y, t_z) = store_all(&curve, &windows);

        let mut host = Host::new().unwrap();
        let inputs = [
            host.upload_words(&x_y).unwrap(),
            host.upload_words(&t_z).unwrap(),
        ];
        let bytes = curve.point_words() * 4;
        let outputs = [host.allocate(bytes).unwrap(), host.allocate(bytes).unwrap()];
        let kernel = CombineWindows {
            curve: &curve,
            num_subtasks: 4,
            chunk_size: 8,
        };
        host.dispatch(
            &kernel,
            &[inputs[0], inputs[1], outputs[0], outputs[1]],
            Workgroups::linear(1),
        )
        .unwrap();
        let words = host.readback_words(&outputs).unwrap();
        let result = curve.load(&words[0], &words[1], 0);

        // sum(2^(8s) W_s)
        let expected = curve.sum(
            windows
                .iter()
                .enumerate()
                .map(|(s, w)| curve.scalar_mul(w, &[1 << (8 * s), 0, 0, 0]))
                .collect::<Vec<_>>()
                .iter(),
        );
        assert!(curve.same_point(&result, &expected));
    }
}
