use crate::{
    Access, Allocate, Buffer, Dispatch, Error, Kernel, Launch, Limits, Readback, Result, Workgroups,
    WORD_BYTES,
};

/// Host device, kernels run on a dedicated rayon pool.
///
/// Dispatches execute eagerly in submission order, which gives the ordering
/// guarantee of a single command sequence for free.
pub struct Host {
    buffers: Vec<Option<Vec<u32>>>,
    limits: Limits,
    pool: rayon::ThreadPool,
}

impl Host {
    pub fn new() -> Result<Self> {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("host-lane-{}", i))
            .build()?;
        Ok(Self {
            buffers: Vec::new(),
            limits,
            pool,
        })
    }

    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?;
        Ok(Self {
            buffers: Vec::new(),
            limits: Limits::default(),
            pool,
        })
    }

    /// Number of live buffers.
    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|buffer| buffer.is_some()).count()
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.limits.max_buffer_size {
            return Err(Error::BufferTooLarge {
                requested: size,
                limit: self.limits.max_buffer_size,
            });
        }
        if size % WORD_BYTES != 0 {
            return Err(Error::Unaligned(size));
        }
        Ok(())
    }

    fn insert(&mut self, words: Vec<u32>) -> Buffer {
        self.buffers.push(Some(words));
        Buffer(self.buffers.len() - 1)
    }

    fn get(&self, buffer: Buffer) -> Result<&Vec<u32>> {
        self.buffers
            .get(buffer.0)
            .and_then(Option::as_ref)
            .ok_or(Error::UnknownBuffer(buffer))
    }

    fn take(&mut self, buffer: Buffer) -> Result<Vec<u32>> {
        self.buffers
            .get_mut(buffer.0)
            .and_then(Option::take)
            .ok_or(Error::UnknownBuffer(buffer))
    }
}

impl Allocate for Host {
    fn limits(&self) -> Limits {
        self.limits
    }

    fn allocate(&mut self, size: usize) -> Result<Buffer> {
        self.check_size(size)?;
        Ok(self.insert(vec![0u32; size / WORD_BYTES]))
    }

    fn upload(&mut self, bytes: &[u8]) -> Result<Buffer> {
        self.check_size(bytes.len())?;
        let mut words = vec![0u32; bytes.len() / WORD_BYTES];
        bytemuck::cast_slice_mut(&mut words).copy_from_slice(bytes);
        Ok(self.insert(words))
    }

    fn release(&mut self, buffer: Buffer) -> Result<()> {
        self.take(buffer).map(drop)
    }
}

impl Dispatch for Host {
    fn dispatch(
        &mut self,
        kernel: &dyn Kernel,
        bindings: &[Buffer],
        workgroups: Workgroups,
    ) -> Result<()> {
        let layout = kernel.layout();
        if layout.len() != bindings.len() {
            return Err(Error::BindingCount {
                kernel: kernel.label().to_string(),
                expected: layout.len(),
                got: bindings.len(),
            });
        }
        for (i, buffer) in bindings.iter().enumerate() {
            self.get(*buffer)?;
            if bindings[..i].contains(buffer) {
                return Err(Error::AliasedBinding(*buffer));
            }
        }

        // writable bindings leave the table for the duration of the dispatch
        let mut taken = Vec::new();
        for (buffer, access) in bindings.iter().zip(layout) {
            if *access == Access::ReadWrite {
                taken.push((*buffer, self.take(*buffer)?));
            }
        }

        let launch = Launch {
            workgroups,
            workgroup_size: kernel.workgroup_size(),
        };
        tracing::trace!(
            kernel = kernel.label(),
            lanes = launch.lanes(),
            "dispatch"
        );

        {
            let mut inputs = Vec::new();
            for (buffer, access) in bindings.iter().zip(layout) {
                if *access == Access::ReadOnly {
                    inputs.push(self.get(*buffer)?.as_slice());
                }
            }
            let mut outputs: Vec<&mut [u32]> = taken
                .iter_mut()
                .map(|(_, words)| words.as_mut_slice())
                .collect();
            self.pool
                .install(|| kernel.run(launch, &inputs, &mut outputs));
        }

        for (buffer, words) in taken {
            self.buffers[buffer.0] = Some(words);
        }
        Ok(())
    }
}

impl Readback for Host {
    fn readback(&mut self, buffers: &[Buffer]) -> Result<Vec<Vec<u8>>> {
        buffers
            .iter()
            .map(|buffer| Ok(bytemuck::cast_slice(self.get(*buffer)?).to_vec()))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rayon::prelude::*;

    /// Adds the input to the output, one lane per word.
    struct Accumulate;

    impl Kernel for Accumulate {
        fn label(&self) -> &str {
            "accumulate"
        }

        fn layout(&self) -> &[Access] {
            &[Access::ReadOnly, Access::ReadWrite]
        }

        fn workgroup_size(&self) -> u32 {
            4
        }

        fn run(&self, launch: Launch, inputs: &[&[u32]], outputs: &mut [&mut [u32]]) {
            let input = inputs[0];
            outputs[0]
                .par_iter_mut()
                .take(launch.lanes())
                .enumerate()
                .for_each(|(i, word)| *word += input[i]);
        }
    }

    #[test]
    fn allocate_is_zeroed() {
        let mut host = Host::new().unwrap();
        let buffer = host.allocate(16).unwrap();
        assert_eq!(host.readback_words(&[buffer]).unwrap(), vec![vec![0; 4]]);
    }

    #[test]
    fn upload_readback() {
        let mut host = Host::new().unwrap();
        let buffer = host.upload_words(&[1, 2, 3, 0xdead_beef]).unwrap();
        assert_eq!(
            host.readback_words(&[buffer]).unwrap(),
            vec![vec![1, 2, 3, 0xdead_beef]]
        );
    }

    #[test]
    fn limits() {
        let mut host = Host::with_limits(Limits { max_buffer_size: 8 }).unwrap();
        assert!(matches!(
            host.allocate(12),
            Err(Error::BufferTooLarge { requested: 12, limit: 8 })
        ));
        assert!(matches!(host.allocate(6), Err(Error::Unaligned(6))));
        assert!(host.allocate(8).is_ok());
    }

    #[test]
    fn dispatches_are_ordered() {
        let mut host = Host::with_threads(2).unwrap();
        let input = host.upload_words(&[1, 2, 3, 4, 5]).unwrap();
        let output = host.allocate(20).unwrap();
        for _ in 0..3 {
            host.dispatch(&Accumulate, &[input, output], Workgroups::covering(5, 4))
                .unwrap();
        }
        assert_eq!(
            host.readback_words(&[output]).unwrap()[0],
            vec![3, 6, 9, 12, 15]
        );
    }

    #[test]
    fn short_grid_leaves_words_untouched() {
        let mut host = Host::new().unwrap();
        let input = host.upload_words(&[1; 8]).unwrap();
        let output = host.allocate(32).unwrap();
        host.dispatch(&Accumulate, &[input, output], Workgroups::linear(1))
            .unwrap();
        assert_eq!(
            host.readback_words(&[output]).unwrap()[0],
            vec![1, 1, 1, 1, 0, 0, 0, 0]
        );
    }

    #[test]
    fn bad_bindings() {
        let mut host = Host::new().unwrap();
        let buffer = host.allocate(4).unwrap();
        assert!(matches!(
            host.dispatch(&Accumulate, &[buffer, buffer], Workgroups::linear(1)),
            Err(Error::AliasedBinding(_))
        ));
        assert!(matches!(
            host.dispatch(&Accumulate, &[buffer], Workgroups::linear(1)),
            Err(Error::BindingCount { expected: 2, got: 1, .. })
        ));
        host.release(buffer).unwrap();
        assert!(matches!(
            host.readback(&[buffer]),
            Err(Error::UnknownBuffer(_))
        ));
        assert_eq!(host.live_buffers(), 0);
    }
}
