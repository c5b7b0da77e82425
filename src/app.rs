//! Host-side orchestration of the MSM pipeline on one device.
//!
//! Every stage is one or more dispatches against the single device handle
//! of the [`App`]; a stage reads its declared input buffers and writes its
//! declared output buffers, nothing else. Submission order is visibility
//! order, so stages need no synchronisation of their own.

use ark_ed_on_bls12_377::{EdwardsAffine, EdwardsProjective, Fr};
use ark_ff::PrimeField;
use gpu::{Buffer, Device, Workgroups, WORD_BYTES};

use crate::{
    buckets::{BucketAggregation, CombineWindows, Smvp, Transpose},
    curve::{AffinePoint, ConvertPoints, Curve, ExtendedPoint},
    edwards,
    preaggregate::{AggregateChunks, AggregatePoints},
    precompute::{Clusters, CsrPrecompute},
    scalar::{self, DecomposeScalars},
    timing::timed,
    verify, Config, Error, Result, Scalar, MAX_INPUT_SIZE,
};

/// A point set on the device, `2 * num_words` words per point in each buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Points {
    pub x_y: Buffer,
    pub t_z: Buffer,
}

/// Buffers of one window, reused by every window of a run.
#[derive(Copy, Clone, Debug)]
struct Window {
    new_point_indices: Buffer,
    cluster_start_indices: Buffer,
    cluster_end_indices: Buffer,
    overflow: Buffer,
    counts: Buffer,
    map: Buffer,
    keys: Buffer,
    aggregated: Points,
    aggregated_chunks: Buffer,
    bucket_offsets: Buffer,
    bucket_entries: Buffer,
    buckets: Points,
}

/// Host copies of the inputs, kept by the verification mode.
struct Reference {
    points: Vec<ExtendedPoint>,
    chunks: Vec<u32>,
}

/// Host-side cuZK MSM application.
pub struct App<D> {
    device: D,
    config: Config,
    curve: Curve,
    /// Buffers allocated by the current run, released when it ends.
    live: Vec<Buffer>,
}

impl<D: Device> App<D> {
    /// Derives the field and curve constants and checks every fixed-size
    /// scratch buffer against the device limit. No kernel runs before this
    /// succeeds.
    pub fn new(device: D, config: Config) -> Result<Self> {
        config.validate()?;
        let curve = edwards::curve(config.word_size, config.num_words)?;

        let limit = device.limits().max_buffer_size;
        let num_buckets = config.num_buckets();
        let scratch = [
            ("map", (config.max_cluster_size + 1) * num_buckets),
            ("keys", num_buckets),
            ("bucket_offsets", num_buckets + 1),
            ("buckets", num_buckets * curve.point_words()),
        ];
        for (buffer, words) in scratch {
            let requested = words * WORD_BYTES;
            if requested > limit {
                return Err(Error::ScratchTooLarge {
                    buffer,
                    requested,
                    limit,
                });
            }
        }

        Ok(Self {
            device,
            config,
            curve,
            live: Vec::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn curve(&self) -> &Curve {
        &self.curve
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Largest input the device buffers can hold, at most 2^20 points.
    pub fn max_input_size(&self) -> usize {
        let limit = self.device.limits().max_buffer_size;
        let per_point = self.curve.point_words() * WORD_BYTES;
        let per_scalar = self.config.num_subtasks * WORD_BYTES;
        MAX_INPUT_SIZE
            .min(limit / per_point)
            .min(limit / per_scalar)
    }

    fn check_input(&self, points: usize, scalars: usize) -> Result<usize> {
        if points != scalars {
            return Err(Error::LengthMismatch { points, scalars });
        }
        if points == 0 {
            return Err(Error::EmptyInput);
        }
        let limit = self.max_input_size();
        if points > limit {
            return Err(Error::InputTooLarge {
                size: points,
                limit,
            });
        }
        Ok(points)
    }

    /// Perform full MSM.
    ///
    /// Every buffer of the run is released before returning, on success and
    /// on error alike.
    #[tracing::instrument(skip_all, fields(size = points.len()))]
    pub fn msm(&mut self, points: &[EdwardsAffine], scalars: &[Scalar]) -> Result<EdwardsProjective> {
        let n = self.check_input(points.len(), scalars.len())?;
        let point = self.run(points, scalars, n);
        let released = self.release_all();
        let point = point?;
        released?;
        Ok(edwards::into_projective(&self.curve, &point))
    }

    fn run(&mut self, points: &[EdwardsAffine], scalars: &[Scalar], n: usize) -> Result<ExtendedPoint> {
        let config = self.config;

        let affine: Vec<AffinePoint> = points.iter().map(AffinePoint::from).collect();
        let coords = timed("uploading points", || self.upload_points(&affine))?;
        let converted = self.convert_points(coords, n)?;
        let scalar_words = timed("uploading scalars", || self.upload_scalars(scalars))?;
        let chunks = self.decompose_scalars(scalar_words, n)?;

        let reference = if config.verify {
            Some(self.verify_inputs(&affine, scalars, converted, chunks)?)
        } else {
            None
        };

        let window = self.allocate_window(n)?;
        let windows = self.allocate_points(config.num_subtasks)?;
        for subtask in 0..config.num_subtasks {
            timed(&format!("window {}", subtask), || -> Result<()> {
                self.csr_precompute(chunks, subtask, n, &window)?;
                self.preaggregate_points(converted, n, &window)?;
                self.preaggregate_chunks(chunks, subtask, n, &window)?;
                if let Some(reference) = &reference {
                    self.verify_window(reference, subtask, n, &window)?;
                }
                self.transpose(chunks, subtask, n, &window)?;
                self.smvp(converted, n, &window)?;
                self.bucket_aggregation(subtask, &window, windows)
            })?;
        }

        let result = self.allocate_points(1)?;
        self.combine_windows(windows, result)?;
        self.read_point(result)
    }

    /// Releases every buffer of the run, reporting the first failure.
    fn release_all(&mut self) -> Result<()> {
        let mut first = Ok(());
        for buffer in std::mem::take(&mut self.live) {
            if let Err(err) = self.device.release(buffer) {
                if first.is_ok() {
                    first = Err(err.into());
                }
            }
        }
        first
    }

    /// Like `ark_ec::VariableBaseMSM::msm_bigint`
    pub fn msm_bigint(
        &mut self,
        points: &[EdwardsAffine],
        scalars: &[<Fr as PrimeField>::BigInt],
    ) -> Result<EdwardsProjective> {
        let scalars: Vec<Scalar> = scalars.iter().map(|scalar| scalar.0).collect();
        self.msm(points, &scalars)
    }

    fn upload_points(&mut self, points: &[AffinePoint]) -> Result<Buffer> {
        let field = &self.curve.field;
        let n = field.num_words;
        let mut words = Vec::with_capacity(points.len() * 2 * n);
        for point in points {
            words.extend_from_slice(&field.limbs_from_u64s(&point.x)[..n]);
            words.extend_from_slice(&field.limbs_from_u64s(&point.y)[..n]);
        }
        self.upload_words(&words)
    }

    fn upload_scalars(&mut self, scalars: &[Scalar]) -> Result<Buffer> {
        let words: Vec<u32> = scalars.iter().flat_map(scalar::to_words).collect();
        self.upload_words(&words)
    }

    fn upload_words(&mut self, words: &[u32]) -> Result<Buffer> {
        let buffer = self.device.upload_words(words)?;
        self.live.push(buffer);
        Ok(buffer)
    }

    fn allocate(&mut self, words: usize) -> Result<Buffer> {
        let buffer = self.device.allocate(words * WORD_BYTES)?;
        self.live.push(buffer);
        Ok(buffer)
    }

    fn allocate_points(&mut self, count: usize) -> Result<Points> {
        let words = count * self.curve.point_words();
        Ok(Points {
            x_y: self.allocate(words)?,
            t_z: self.allocate(words)?,
        })
    }

    fn allocate_window(&mut self, n: usize) -> Result<Window> {
        let num_buckets = self.config.num_buckets();
        Ok(Window {
            new_point_indices: self.allocate(n)?,
            cluster_start_indices: self.allocate(n)?,
            cluster_end_indices: self.allocate(n)?,
            overflow: self.allocate(n)?,
            counts: self.allocate(2)?,
            map: self.allocate((self.config.max_cluster_size + 1) * num_buckets)?,
            keys: self.allocate(num_buckets)?,
            aggregated: self.allocate_points(n)?,
            aggregated_chunks: self.allocate(n)?,
            bucket_offsets: self.allocate(num_buckets + 1)?,
            bucket_entries: self.allocate(n)?,
            buckets: self.allocate_points(num_buckets)?,
        })
    }

    fn parallel(&self, items: usize) -> Workgroups {
        Workgroups::covering(items, self.config.workgroup_size)
    }

    #[tracing::instrument(skip_all)]
    fn convert_points(&mut self, coords: Buffer, n: usize) -> Result<Points> {
        let converted = self.allocate_points(n)?;
        let kernel = ConvertPoints {
            curve: &self.curve,
            input_size: n,
            workgroup_size: self.config.workgroup_size,
        };
        let workgroups = self.parallel(n);
        timed("converting points", || {
            self.device
                .dispatch(&kernel, &[coords, converted.x_y, converted.t_z], workgroups)
        })?;
        Ok(converted)
    }

    #[tracing::instrument(skip_all)]
    fn decompose_scalars(&mut self, scalars: Buffer, n: usize) -> Result<Buffer> {
        let chunks = self.allocate(self.config.num_subtasks * n)?;
        let kernel = DecomposeScalars {
            input_size: n,
            num_subtasks: self.config.num_subtasks,
            chunk_size: self.config.chunk_size,
            workgroup_size: self.config.workgroup_size,
        };
        let workgroups = self.parallel(n);
        timed("decomposing scalars", || {
            self.device.dispatch(&kernel, &[scalars, chunks], workgroups)
        })?;
        Ok(chunks)
    }

    #[tracing::instrument(skip_all, fields(subtask = subtask))]
    fn csr_precompute(&mut self, chunks: Buffer, subtask: usize, n: usize, window: &Window) -> Result<()> {
        let kernel = CsrPrecompute {
            input_size: n,
            subtask,
            max_cluster_size: self.config.max_cluster_size,
        };
        let bindings = [
            chunks,
            window.new_point_indices,
            window.cluster_start_indices,
            window.cluster_end_indices,
            window.overflow,
            window.counts,
            window.map,
            window.keys,
        ];
        timed("cluster precompute", || {
            self.device
                .dispatch(&kernel, &bindings, Workgroups::linear(1))
        })?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    fn preaggregate_points(&mut self, points: Points, n: usize, window: &Window) -> Result<()> {
        let kernel = AggregatePoints {
            curve: &self.curve,
            input_size: n,
            workgroup_size: self.config.workgroup_size,
        };
        let bindings = [
            points.x_y,
            points.t_z,
            window.new_point_indices,
            window.cluster_start_indices,
            window.cluster_end_indices,
            window.aggregated.x_y,
            window.aggregated.t_z,
        ];
        let workgroups = self.parallel(n);
        timed("pre-aggregation stage 1", || {
            self.device.dispatch(&kernel, &bindings, workgroups)
        })?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(subtask = subtask))]
    fn preaggregate_chunks(&mut self, chunks: Buffer, subtask: usize, n: usize, window: &Window) -> Result<()> {
        let kernel = AggregateChunks {
            input_size: n,
            subtask,
            workgroup_size: self.config.workgroup_size,
        };
        let bindings = [
            chunks,
            window.new_point_indices,
            window.cluster_start_indices,
            window.cluster_end_indices,
            window.aggregated_chunks,
        ];
        let workgroups = self.parallel(n);
        timed("pre-aggregation stage 2", || {
            self.device.dispatch(&kernel, &bindings, workgroups)
        })?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(subtask = subtask))]
    fn transpose(&mut self, chunks: Buffer, subtask: usize, n: usize, window: &Window) -> Result<()> {
        let kernel = Transpose {
            input_size: n,
            subtask,
            num_buckets: self.config.num_buckets(),
        };
        let bindings = [
            window.aggregated_chunks,
            chunks,
            window.overflow,
            window.counts,
            window.bucket_offsets,
            window.bucket_entries,
        ];
        timed("transpose", || {
            self.device
                .dispatch(&kernel, &bindings, Workgroups::linear(1))
        })?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    fn smvp(&mut self, points: Points, n: usize, window: &Window) -> Result<()> {
        let num_buckets = self.config.num_buckets();
        let kernel = Smvp {
            curve: &self.curve,
            input_size: n,
            num_buckets,
            workgroup_size: self.config.workgroup_size,
        };
        let bindings = [
            window.bucket_offsets,
            window.bucket_entries,
            window.aggregated.x_y,
            window.aggregated.t_z,
            points.x_y,
            points.t_z,
            window.buckets.x_y,
            window.buckets.t_z,
        ];
        let workgroups = self.parallel(num_buckets);
        timed("smvp", || self.device.dispatch(&kernel, &bindings, workgroups))?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(subtask = subtask))]
    fn bucket_aggregation(&mut self, subtask: usize, window: &Window, windows: Points) -> Result<()> {
        let kernel = BucketAggregation {
            curve: &self.curve,
            subtask,
            num_buckets: self.config.num_buckets(),
        };
        let bindings = [
            window.buckets.x_y,
            window.buckets.t_z,
            windows.x_y,
            windows.t_z,
        ];
        timed("bucket aggregation", || {
            self.device
                .dispatch(&kernel, &bindings, Workgroups::linear(1))
        })?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    fn combine_windows(&mut self, windows: Points, result: Points) -> Result<()> {
        let kernel = CombineWindows {
            curve: &self.curve,
            num_subtasks: self.config.num_subtasks,
            chunk_size: self.config.chunk_size,
        };
        let bindings = [windows.x_y, windows.t_z, result.x_y, result.t_z];
        timed("combining windows", || {
            self.device
                .dispatch(&kernel, &bindings, Workgroups::linear(1))
        })?;
        Ok(())
    }

    fn read_points(&mut self, points: Points, count: usize) -> Result<Vec<ExtendedPoint>> {
        let words = self.device.readback_words(&[points.x_y, points.t_z])?;
        Ok((0..count)
            .map(|i| self.curve.load(&words[0], &words[1], i))
            .collect())
    }

    fn read_point(&mut self, points: Points) -> Result<ExtendedPoint> {
        let mut points = timed("fetching point", || self.read_points(points, 1))?;
        Ok(points.remove(0))
    }

    #[tracing::instrument(skip_all)]
    fn verify_inputs(
        &mut self,
        affine: &[AffinePoint],
        scalars: &[Scalar],
        converted: Points,
        chunks: Buffer,
    ) -> Result<Reference> {
        let mut words = self
            .device
            .readback_words(&[converted.x_y, converted.t_z, chunks])?;
        verify::check_points(&self.curve, affine, &words[0], &words[1])?;
        verify::check_decomposition(
            scalars,
            &words[2],
            self.config.num_subtasks,
            self.config.chunk_size,
        )?;
        tracing::debug!("points and scalars verified");

        let points = (0..affine.len())
            .map(|i| self.curve.load(&words[0], &words[1], i))
            .collect();
        Ok(Reference {
            points,
            chunks: words.remove(2),
        })
    }

    #[tracing::instrument(skip_all, fields(subtask = subtask))]
    fn verify_window(&mut self, reference: &Reference, subtask: usize, n: usize, window: &Window) -> Result<()> {
        let mut words = self
            .device
            .readback_words(&[
                window.new_point_indices,
                window.cluster_start_indices,
                window.cluster_end_indices,
                window.overflow,
                window.counts,
                window.aggregated_chunks,
            ])?
            .into_iter();
        let mut next = || words.next().unwrap_or_default();
        let clusters = Clusters::from_words(next(), next(), next(), next(), &next());
        let aggregated_chunks = next();

        let chunks = &reference.chunks[subtask * n..(subtask + 1) * n];
        verify::check_clusters(chunks, &clusters, self.config.max_cluster_size)?;

        let aggregated = self.read_points(window.aggregated, n)?;
        verify::check_aggregated_points(&self.curve, &reference.points, &clusters, &aggregated)?;
        verify::check_aggregated_chunks(chunks, &clusters, &aggregated_chunks)?;

        tracing::debug!(
            num_clusters = clusters.num_clusters,
            num_overflow = clusters.overflow.len(),
            "window verified"
        );
        Ok(())
    }
}
