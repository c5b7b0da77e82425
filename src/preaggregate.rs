//! Pre-aggregation: collapse every cluster into one point and one chunk.

use gpu::{Access, Kernel, Launch};
use rayon::prelude::*;

use crate::curve::Curve;

/// Stage 1, one lane per cluster slot: fold the member points with the
/// complete addition. Empty slots get the identity.
///
/// Bindings: `x_y`, `t_z`, `new_point_indices`, `cluster_start_indices`,
/// `cluster_end_indices` (read), aggregated `x_y`, `t_z` (write).
pub struct AggregatePoints<'a> {
    pub curve: &'a Curve,
    pub input_size: usize,
    pub workgroup_size: u32,
}

impl Kernel for AggregatePoints<'_> {
    fn label(&self) -> &str {
        "preaggregation_stage_1"
    }

    fn layout(&self) -> &[Access] {
        use Access::*;
        &[ReadOnly, ReadOnly, ReadOnly, ReadOnly, ReadOnly, ReadWrite, ReadWrite]
    }

    fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    fn run(&self, launch: Launch, inputs: &[&[u32]], outputs: &mut [&mut [u32]]) {
        let curve = self.curve;
        let stride = curve.point_words();
        let (x_y, t_z, indices, starts, ends) = match inputs {
            [a, b, c, d, e] => (*a, *b, *c, *d, *e),
            _ => unreachable!(),
        };
        let (out_x_y, out_t_z) = match outputs {
            [a, b] => (a, b),
            _ => unreachable!(),
        };

        out_x_y
            .par_chunks_mut(stride)
            .zip(out_t_z.par_chunks_mut(stride))
            .take(launch.lanes().min(self.input_size))
            .enumerate()
            .for_each(|(k, (out_x_y, out_t_z))| {
                let members = &indices[starts[k] as usize..ends[k] as usize];
                let sum = members.iter().fold(curve.identity(), |acc, index| {
                    curve.add(&acc, &curve.load(x_y, t_z, *index as usize))
                });
                curve.store(&sum, out_x_y, out_t_z);
            });
    }
}

/// Stage 2, one lane per cluster slot: the shared chunk of the members in
/// window `subtask`, 0 for empty slots.
///
/// Bindings: `chunks`, `new_point_indices`, `cluster_start_indices`,
/// `cluster_end_indices` (read), aggregated chunks (write).
pub struct AggregateChunks {
    pub input_size: usize,
    pub subtask: usize,
    pub workgroup_size: u32,
}

impl Kernel for AggregateChunks {
    fn label(&self) -> &str {
        "preaggregation_stage_2"
    }

    fn layout(&self) -> &[Access] {
        use Access::*;
        &[ReadOnly, ReadOnly, ReadOnly, ReadOnly, ReadWrite]
    }

    fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    fn run(&self, launch: Launch, inputs: &[&[u32]], outputs: &mut [&mut [u32]]) {
        let n = self.input_size;
        let (chunks, indices, starts, ends) = match inputs {
            [a, b, c, d] => (*a, *b, *c, *d),
            _ => unreachable!(),
        };
        let window = &chunks[self.subtask * n..(self.subtask + 1) * n];

        outputs[0]
            .par_iter_mut()
            .take(launch.lanes().min(n))
            .enumerate()
            .for_each(|(k, out)| {
                let (start, end) = (starts[k], ends[k]);
                *out = if start < end {
                    window[indices[start as usize] as usize]
                } else {
                    0
                };
            });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        curve::AffinePoint, edwards, precompute::cluster, testing::random_points, verify,
    };
    use gpu::{Allocate, Dispatch, Host, Readback, Workgroups};

    #[test]
    fn both_stages_match_host_sums() {
        let curve = edwards::curve(13, 20).unwrap();
        let f = &curve.field;
        let points: Vec<_> = random_points(3)
            .iter()
            .map(|point| curve.from_affine(&AffinePoint::from(point)))
            .collect();
        let n = points.len();
        // window 1 has a full cluster of value 2 and an overflowing member
        let chunks: Vec<u32> = [[0u32; 8], [2, 5, 2, 2, 0, 2, 5, 2]].concat();
        let clusters = cluster(&chunks[n..], 3, 4);
        assert_eq!(clusters.overflow, vec![7]);

        let mut x_y = vec![0u32; n * curve.point_words()];
        let mut t_z = x_y.clone();
        for (i, point) in points.iter().enumerate() {
            let range = i * curve.point_words()..(i + 1) * curve.point_words();
            curve.store(point, &mut x_y[range.clone()], &mut t_z[range]);
        }

        let mut host = Host::new().unwrap();
        let bytes = x_y.len() * 4;
        let inputs: Vec<_> = [
            &x_y,
            &t_z,
            &clusters.new_point_indices,
            &clusters.cluster_start_indices,
            &clusters.cluster_end_indices,
        ]
        .iter()
        .map(|words| host.upload_words(words).unwrap())
        .collect();
        let out_x_y = host.allocate(bytes).unwrap();
        let out_t_z = host.allocate(bytes).unwrap();
        let stage_1 = AggregatePoints {
            curve: &curve,
            input_size: n,
            workgroup_size: 2,
        };
        let mut bindings = inputs.clone();
        bindings.extend([out_x_y, out_t_z]);
        host.dispatch(&stage_1, &bindings, Workgroups::covering(n, 2))
            .unwrap();

        let words = host.readback_words(&[out_x_y, out_t_z]).unwrap();
        let aggregated: Vec<_> = (0..n).map(|k| curve.load(&words[0], &words[1], k)).collect();
        verify::check_aggregated_points(&curve, &points, &clusters, &aggregated).unwrap();
        assert!(curve.same_point(
            &aggregated[0],
            &curve.sum([&points[0], &points[2], &points[3], &points[5]])
        ));
        assert!(f.is_zero(&aggregated[3].x));

        let chunk_buffer = host.upload_words(&chunks).unwrap();
        let out_chunks = host.allocate(n * 4).unwrap();
        let stage_2 = AggregateChunks {
            input_size: n,
            subtask: 1,
            workgroup_size: 2,
        };
        host.dispatch(
            &stage_2,
            &[chunk_buffer, inputs[2], inputs[3], inputs[4], out_chunks],
            Workgroups::covering(n, 2),
        )
        .unwrap();
        let aggregated = &host.readback_words(&[out_chunks]).unwrap()[0];
        assert_eq!(aggregated, &vec![2, 5, 0, 0, 0, 0, 0, 0]);
        verify::check_aggregated_chunks(&chunks[n..], &clusters, aggregated).unwrap();
    }
}
