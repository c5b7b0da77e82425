use ark_ec::{AffineRepr as _, CurveGroup as _};
use ark_ed_on_bls12_377::{EdwardsAffine, EdwardsProjective};

use cuzk_msm::{
    precompute::cluster,
    scalar::decompose,
    testing::{naive_msm, random_points, random_scalars, repeated_points, small_scalars},
    verify::naive_clusters,
    App, Config, Error, Scalar,
};
use gpu::Host;

fn app(config: Config) -> App<Host> {
    App::new(Host::new().unwrap(), config).unwrap()
}

fn verified(chunk_size: usize) -> Config {
    Config {
        verify: true,
        workgroup_size: 8,
        ..Config::with_chunk_size(chunk_size)
    }
}

fn small(values: &[u64]) -> Vec<Scalar> {
    values.iter().map(|value| [*value, 0, 0, 0]).collect()
}

#[test]
fn four_points_single_window() {
    let points = random_points(2);
    let scalars = small(&[1, 2, 3, 4]);

    // one 256-bit window: every scalar is its own chunk value
    let naive = naive_clusters(&scalars, 4);
    assert_eq!(naive.clusters.len(), 4);
    assert!(naive.overflow.is_empty());
    let mut expected = EdwardsProjective::default();
    for (scalar, members) in &naive.clusters {
        assert_eq!(members.len(), 1);
        let aggregated: EdwardsProjective = members.iter().map(|i| points[*i].into_group()).sum();
        expected += aggregated.into_affine().mul_bigint(scalar);
    }
    assert_eq!(expected, naive_msm(&points, &scalars));

    // with 8-bit windows, window 0 holds one singleton cluster per value
    let chunks: Vec<u32> = scalars
        .iter()
        .map(|scalar| decompose(scalar, 32, 8).unwrap()[0])
        .collect();
    let clusters = cluster(&chunks, 8, 4);
    assert_eq!(clusters.num_clusters, 4);
    assert!(clusters.overflow.is_empty());
    for (k, members) in clusters.iter() {
        assert_eq!(members, &[k as u32][..]);
        assert_eq!(chunks[k], k as u32 + 1);
    }
    assert_eq!(clusters.iter().count(), 4);

    // the same instance through the device pipeline
    let mut app = app(verified(8));
    assert_eq!(app.msm(&points, &scalars).unwrap(), expected);
}

#[test]
fn repeated_scalars_share_clusters() {
    let points = random_points(3);
    let scalars = small(&[2, 1, 2, 2, 1, 2, 2, 3]);

    let naive = naive_clusters(&scalars, 4);
    let sizes: Vec<_> = naive.clusters.iter().map(|(_, members)| members.len()).collect();
    assert_eq!(sizes, vec![4, 2, 1]);
    assert_eq!(naive.overflow, vec![6]);

    // the low window agrees with the device clustering
    let chunks: Vec<u32> = scalars
        .iter()
        .map(|scalar| decompose(scalar, 32, 8).unwrap()[0])
        .collect();
    let clusters = cluster(&chunks, 8, 4);
    for (k, (_, members)) in naive.clusters.iter().enumerate() {
        let found: Vec<usize> = clusters.members(k).iter().map(|i| *i as usize).collect();
        assert_eq!(&found, members);
    }

    let mut app = app(verified(8));
    assert_eq!(
        app.msm(&points, &scalars).unwrap(),
        naive_msm(&points, &scalars)
    );
}

#[test]
fn random_instances_across_window_sizes() {
    let points = random_points(5);
    let scalars = random_scalars(5);
    let expected = naive_msm(&points, &scalars);
    for chunk_size in [4, 8] {
        let mut app = app(verified(chunk_size));
        assert_eq!(app.msm(&points, &scalars).unwrap(), expected);
    }
}

#[test]
fn without_verification() {
    let points = random_points(4);
    let scalars = random_scalars(4);
    let mut app = app(Config {
        workgroup_size: 3,
        ..Config::with_chunk_size(8)
    });
    assert_eq!(
        app.msm(&points, &scalars).unwrap(),
        naive_msm(&points, &scalars)
    );
}

#[test]
fn heavy_overflow_and_repeated_points() {
    let points = repeated_points(64, 2);
    let scalars = small_scalars(6, 4);
    let mut app = app(Config {
        max_cluster_size: 1,
        ..verified(4)
    });
    assert_eq!(
        app.msm(&points, &scalars).unwrap(),
        naive_msm(&points, &scalars)
    );
}

#[test]
fn degenerate_scalars() {
    let points = random_points(3);
    let mut app = app(verified(8));

    let zeros = vec![Scalar::default(); 8];
    assert_eq!(app.msm(&points, &zeros).unwrap(), EdwardsProjective::default());

    let max = vec![[u64::MAX; 4]; 8];
    assert_eq!(app.msm(&points, &max).unwrap(), naive_msm(&points, &max));

    // a point and its negation cancel
    let pair = [points[0], -points[0]];
    assert_eq!(
        app.msm(&pair, &small(&[5, 5])).unwrap(),
        EdwardsProjective::default()
    );
    let identity = [EdwardsAffine::zero(); 2];
    assert_eq!(
        app.msm(&identity, &small(&[7, 9])).unwrap(),
        EdwardsProjective::default()
    );
}

#[test]
fn msm_bigint_matches() {
    use ark_ff::{BigInt, PrimeField as _};
    use ark_std::UniformRand as _;
    use rand_core::SeedableRng;

    let mut rng = rand::prelude::StdRng::seed_from_u64(11);
    let points = random_points(3);
    let scalars: Vec<BigInt<4>> = (0..8)
        .map(|_| ark_ed_on_bls12_377::Fr::rand(&mut rng).into_bigint())
        .collect();
    let limbs: Vec<Scalar> = scalars.iter().map(|scalar| scalar.0).collect();

    let mut app = app(verified(8));
    assert_eq!(
        app.msm_bigint(&points, &scalars).unwrap(),
        naive_msm(&points, &limbs)
    );
}

#[test]
fn configuration_errors_before_any_kernel() {
    let host = Host::new().unwrap();
    let config = Config {
        num_subtasks: 1,
        chunk_size: 256,
        ..Config::default()
    };
    assert!(matches!(App::new(host, config), Err(Error::ChunkSize(256))));

    let host = Host::new().unwrap();
    let config = Config {
        num_words: 19,
        ..Config::default()
    };
    assert!(matches!(
        App::new(host, config),
        Err(Error::InsufficientLimbs { .. })
    ));

    let host = Host::new().unwrap();
    let config = Config {
        num_subtasks: 8,
        ..Config::default()
    };
    assert!(matches!(
        App::new(host, config),
        Err(Error::WindowMismatch { .. })
    ));
}

#[test]
fn other_limb_layouts() {
    let points = random_points(3);
    let scalars = random_scalars(3);
    let expected = naive_msm(&points, &scalars);
    for (word_size, num_words) in [(12, 22), (15, 17)] {
        let mut app = app(Config {
            word_size,
            num_words,
            ..verified(8)
        });
        assert_eq!(app.msm(&points, &scalars).unwrap(), expected);
    }
}
