//! Host-side checks of stage outputs, run by the verification mode.
//!
//! Each check returns the first [`Violation`] it finds.

use std::collections::HashMap;
use std::hash::Hash;

use crate::{
    curve::{AffinePoint, Curve, ExtendedPoint},
    precompute::Clusters,
    scalar::recompose,
    Scalar, Violation,
};

type Checked = core::result::Result<(), Violation>;

/// Converted points against a host conversion of the inputs.
pub fn check_points(curve: &Curve, inputs: &[AffinePoint], x_y: &[u32], t_z: &[u32]) -> Checked {
    for (index, point) in inputs.iter().enumerate() {
        if curve.load(x_y, t_z, index) != curve.from_affine(point) {
            return Err(Violation::PointConversion { index });
        }
    }
    Ok(())
}

/// Subtask-major chunks sum back to their scalars.
pub fn check_decomposition(scalars: &[Scalar], chunks: &[u32], num_subtasks: usize, chunk_size: usize) -> Checked {
    let n = scalars.len();
    for (index, scalar) in scalars.iter().enumerate() {
        let column = (0..num_subtasks).map(|s| chunks[s * n + index]);
        if column.clone().any(|c| chunk_size < 32 && c >> chunk_size != 0)
            || recompose(column, chunk_size) != *scalar
        {
            return Err(Violation::Decomposition { index });
        }
    }
    Ok(())
}

/// Range order, cluster cap, one chunk value per cluster and one cluster
/// per chunk value, overflow only past a full cluster, and exact coverage
/// of `0..n` by clusters and overflow together.
pub fn check_clusters(chunks: &[u32], clusters: &Clusters, max_cluster_size: usize) -> Checked {
    let n = chunks.len();
    let mut seen = vec![0usize; n];

    for cluster in 0..n {
        let start = clusters.cluster_start_indices[cluster];
        let end = clusters.cluster_end_indices[cluster];
        if start > end || end as usize > n {
            return Err(Violation::ClusterRange {
                cluster,
                start,
                end,
            });
        }
        let size = (end - start) as usize;
        if size > max_cluster_size {
            return Err(Violation::ClusterTooLarge {
                cluster,
                size,
                max: max_cluster_size,
            });
        }
        if (size > 0) != (cluster < clusters.num_clusters) {
            return Err(Violation::ClusterRange {
                cluster,
                start,
                end,
            });
        }
    }

    // chunk value -> (cluster, size)
    let mut owners: HashMap<u32, (usize, usize)> = HashMap::new();
    for (cluster, members) in clusters.iter() {
        let mut value = None;
        for index in members {
            let index = *index as usize;
            if index >= n {
                return Err(Violation::Partition { index, count: 0 });
            }
            if *value.get_or_insert(chunks[index]) != chunks[index] {
                return Err(Violation::MixedCluster { cluster });
            }
            seen[index] += 1;
        }
        if let Some(value) = value {
            if let Some((first, _)) = owners.insert(value, (cluster, members.len())) {
                return Err(Violation::SplitValue {
                    value,
                    first,
                    second: cluster,
                });
            }
        }
    }
    for index in clusters.overflow.iter() {
        let index = *index as usize;
        if index >= n {
            return Err(Violation::Partition { index, count: 0 });
        }
        match owners.get(&chunks[index]) {
            Some((_, size)) if *size == max_cluster_size => {}
            _ => return Err(Violation::EarlyOverflow { index }),
        }
        seen[index] += 1;
    }

    match seen.iter().position(|count| *count != 1) {
        Some(index) => Err(Violation::Partition {
            index,
            count: seen[index],
        }),
        None => Ok(()),
    }
}

/// Stage-1 outputs against the sums of the cluster members.
pub fn check_aggregated_points(
    curve: &Curve,
    points: &[ExtendedPoint],
    clusters: &Clusters,
    aggregated: &[ExtendedPoint],
) -> Checked {
    for (cluster, aggregate) in aggregated.iter().enumerate() {
        let members = if cluster < clusters.cluster_start_indices.len() {
            clusters.members(cluster)
        } else {
            &[]
        };
        let expected = curve.sum(members.iter().map(|index| &points[*index as usize]));
        if !curve.same_point(&expected, aggregate) {
            return Err(Violation::PreAggregatedPoint { cluster });
        }
    }
    Ok(())
}

/// Stage-2 outputs: the window's chunk of the first member, zero if empty.
pub fn check_aggregated_chunks(chunks: &[u32], clusters: &Clusters, aggregated: &[u32]) -> Checked {
    for (cluster, found) in aggregated.iter().enumerate() {
        let expected = clusters
            .members(cluster)
            .first()
            .map_or(0, |index| chunks[*index as usize]);
        if *found != expected {
            return Err(Violation::PreAggregatedChunk {
                cluster,
                found: *found,
                expected,
            });
        }
    }
    Ok(())
}

/// Clusters computed with a hash map, for chunk types no device word holds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NaiveClusters<K> {
    /// chunk value and member indices, in order of first occurrence
    pub clusters: Vec<(K, Vec<usize>)>,
    pub overflow: Vec<usize>,
}

pub fn naive_clusters<K: Clone + Eq + Hash>(chunks: &[K], max_cluster_size: usize) -> NaiveClusters<K> {
    let mut slots: HashMap<K, usize> = HashMap::new();
    let mut clusters: Vec<(K, Vec<usize>)> = Vec::new();
    let mut overflow = Vec::new();

    for (index, chunk) in chunks.iter().enumerate() {
        let slot = *slots.entry(chunk.clone()).or_insert_with(|| {
            clusters.push((chunk.clone(), Vec::new()));
            clusters.len() - 1
        });
        let members = &mut clusters[slot].1;
        if members.len() < max_cluster_size {
            members.push(index);
        } else {
            overflow.push(index);
        }
    }

    NaiveClusters { clusters, overflow }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{edwards, precompute::cluster, testing::random_points};

    #[test]
    fn naive_matches_precompute() {
        let chunks = [3u32, 1, 3, 3, 3, 2, 1, 3];
        let naive = naive_clusters(&chunks, 3);
        let clusters = cluster(&chunks, 2, 3);
        assert_eq!(naive.clusters.len(), clusters.num_clusters);
        for (k, (value, members)) in naive.clusters.iter().enumerate() {
            let found: Vec<usize> = clusters.members(k).iter().map(|i| *i as usize).collect();
            assert_eq!(&found, members);
            assert!(found.iter().all(|i| chunks[*i] == *value));
        }
        let overflow: Vec<usize> = clusters.overflow.iter().map(|i| *i as usize).collect();
        assert_eq!(naive.overflow, overflow);
        assert_eq!(overflow, vec![4, 7]);
    }

    #[test]
    fn detects_broken_clusters() {
        let chunks = [1u32, 1, 2, 2];
        let good = cluster(&chunks, 2, 4);
        assert!(check_clusters(&chunks, &good, 4).is_ok());

        let mut inverted = good.clone();
        inverted.cluster_start_indices[0] = 3;
        assert!(matches!(
            check_clusters(&chunks, &inverted, 4),
            Err(Violation::ClusterRange { cluster: 0, .. })
        ));

        assert!(matches!(
            check_clusters(&chunks, &good, 1),
            Err(Violation::ClusterTooLarge { size: 2, max: 1, .. })
        ));

        let mut mixed = good.clone();
        mixed.new_point_indices.swap(1, 2);
        assert!(matches!(
            check_clusters(&chunks, &mixed, 4),
            Err(Violation::MixedCluster { cluster: 0 })
        ));

        let mut duplicated = good.clone();
        duplicated.overflow.push(0);
        assert!(matches!(
            check_clusters(&chunks, &duplicated, 4),
            Err(Violation::EarlyOverflow { index: 0 })
        ));
        assert!(matches!(
            check_clusters(&chunks, &duplicated, 2),
            Err(Violation::Partition { index: 0, count: 2 })
        ));

        let mut dropped = good;
        dropped.cluster_end_indices[1] = 3;
        assert!(matches!(
            check_clusters(&chunks, &dropped, 4),
            Err(Violation::Partition { index: 3, count: 0 })
        ));
    }

    #[test]
    fn detects_split_values() {
        let chunks = [7u32; 6];
        let good = cluster(&chunks, 3, 4);
        assert_eq!(good.overflow, vec![4, 5]);
        assert!(check_clusters(&chunks, &good, 4).is_ok());

        // one value over two clusters, nothing overflowed
        let split = Clusters {
            new_point_indices: vec![0, 1, 2, 3, 4, 5],
            cluster_start_indices: vec![0, 4, 6, 6, 6, 6],
            cluster_end_indices: vec![4, 6, 6, 6, 6, 6],
            overflow: vec![],
            num_clusters: 2,
        };
        assert_eq!(
            check_clusters(&chunks, &split, 4),
            Err(Violation::SplitValue {
                value: 7,
                first: 0,
                second: 1
            })
        );
    }

    #[test]
    fn detects_bad_decomposition() {
        let scalars = [[0x1234, 0, 0, 1]];
        let mut chunks: Vec<u32> = crate::scalar::decompose(&scalars[0], 16, 16).unwrap();
        assert!(check_decomposition(&scalars, &chunks, 16, 16).is_ok());
        chunks[3] ^= 1;
        assert_eq!(
            check_decomposition(&scalars, &chunks, 16, 16),
            Err(Violation::Decomposition { index: 0 })
        );
    }

    #[test]
    fn detects_bad_aggregates() {
        let curve = edwards::curve(13, 20).unwrap();
        let points: Vec<_> = random_points(2)
            .iter()
            .map(|point| curve.from_affine(&point.into()))
            .collect();
        let chunks = [9u32, 9, 4, 9];
        let clusters = cluster(&chunks, 4, 4);
        let mut aggregated = vec![
            curve.sum([&points[0], &points[1], &points[3]]),
            points[2],
            curve.identity(),
            curve.identity(),
        ];
        assert!(check_aggregated_points(&curve, &points, &clusters, &aggregated).is_ok());
        aggregated[2] = points[0];
        assert_eq!(
            check_aggregated_points(&curve, &points, &clusters, &aggregated),
            Err(Violation::PreAggregatedPoint { cluster: 2 })
        );

        assert!(check_aggregated_chunks(&chunks, &clusters, &[9, 4, 0, 0]).is_ok());
        assert_eq!(
            check_aggregated_chunks(&chunks, &clusters, &[9, 9, 0, 0]),
            Err(Violation::PreAggregatedChunk {
                cluster: 1,
                found: 9,
                expected: 4
            })
        );
    }
}
