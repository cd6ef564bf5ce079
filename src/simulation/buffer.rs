//! Particle storage: the host array shared with CPU workers and its two
//! device mirrors used for ping-pong stepping on the GPU.

use std::cell::UnsafeCell;
use std::ops::Range;
use std::sync::Arc;

use rand::Rng;

use super::gpu::GpuContext;
use super::particle::{scatter, Particle};
use crate::error::{SimulationError, SimulationResult};
use crate::wgpu_utils::ArrayBuffer;

/// One of the two device-resident particle mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorSlot {
    A,
    B,
}

impl MirrorSlot {
    pub fn other(self) -> MirrorSlot {
        match self {
            MirrorSlot::A => MirrorSlot::B,
            MirrorSlot::B => MirrorSlot::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            MirrorSlot::A => 0,
            MirrorSlot::B => 1,
        }
    }
}

/// Fixed-length host particle array that CPU workers write into in parallel.
///
/// Shared through an `Arc` for the duration of a dispatch. Each worker only
/// touches its own disjoint index range; the control thread gets the array
/// back exclusively once every worker has dropped its handle.
pub struct ParticleArray {
    cells: Box<[UnsafeCell<Particle>]>,
}

// SAFETY: concurrent access only happens through `partition_mut`, whose
// callers guarantee disjoint ranges. All other access needs `&mut self`.
unsafe impl Sync for ParticleArray {}

impl ParticleArray {
    pub fn zeroed(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| UnsafeCell::new(Particle::default())).collect(),
        }
    }

    pub fn from_particles(particles: &[Particle]) -> Self {
        Self {
            cells: particles.iter().copied().map(UnsafeCell::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn as_slice(&mut self) -> &[Particle] {
        self.as_mut_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [Particle] {
        // SAFETY: `UnsafeCell<Particle>` has the layout of `Particle`, and
        // `&mut self` rules out any other live reference into the array.
        unsafe {
            std::slice::from_raw_parts_mut(UnsafeCell::raw_get(self.cells.as_ptr()), self.cells.len())
        }
    }

    /// Mutable view of `range` for one worker.
    ///
    /// # Safety
    ///
    /// No other reference to any index in `range` may exist while the returned
    /// slice is alive. The worker pool upholds this by handing out disjoint
    /// partitions and holding the control thread at the barrier.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn partition_mut(&self, range: Range<usize>) -> &mut [Particle] {
        let cells = &self.cells[range];
        // SAFETY: see above; the layout cast is the one `raw_get` documents.
        unsafe { std::slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), cells.len()) }
    }
}

/// Fails with [`SimulationError::Allocation`] when `requested` exceeds `max`.
pub fn check_capacity(requested: usize, max: usize) -> SimulationResult<()> {
    if requested > max {
        return Err(SimulationError::Allocation { requested, max });
    }
    Ok(())
}

/// The authoritative particle state: host array plus two device mirrors.
///
/// Exactly one mirror is current at any time (the frame parity). The other is
/// the write target of the next GPU step.
pub struct ParticleBuffer {
    host: Arc<ParticleArray>,
    mirrors: [ArrayBuffer<Particle>; 2],
    readback: ArrayBuffer<Particle>,
    parity: MirrorSlot,
    max_particles: usize,
    generation: u64,
}

impl ParticleBuffer {
    /// Allocates storage for `num_particles` particles, all at rest at the origin.
    pub fn new(gpu: &GpuContext, num_particles: usize, max_particles: usize) -> SimulationResult<Self> {
        let max_particles = max_particles.min(gpu.max_bindable_particles());
        check_capacity(num_particles, max_particles)?;
        let (mirrors, readback) = Self::create_device_storage(gpu, num_particles)?;

        Ok(Self {
            host: Arc::new(ParticleArray::zeroed(num_particles)),
            mirrors,
            readback,
            parity: MirrorSlot::A,
            max_particles,
            generation: 0,
        })
    }

    fn create_device_storage(
        gpu: &GpuContext,
        num_particles: usize,
    ) -> SimulationResult<([ArrayBuffer<Particle>; 2], ArrayBuffer<Particle>)> {
        // Zero-sized buffers cannot be bound, so keep room for one particle.
        let capacity = num_particles.max(1);
        let device = gpu.device();

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let mirrors = [
            ArrayBuffer::new_storage(device, capacity, "particles buffer A"),
            ArrayBuffer::new_storage(device, capacity, "particles buffer B"),
        ];
        let readback = ArrayBuffer::new_staging(device, capacity, "particles readback");

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            log::error!("Device refused particle storage for {num_particles} particles: {error}");
            return Err(SimulationError::DeviceAllocation {
                requested: num_particles,
                reason: error.to_string(),
            });
        }

        Ok((mirrors, readback))
    }

    /// Destroys the host array and both mirrors and replaces them with storage
    /// for `num_particles`. On failure the previous storage is left untouched.
    pub fn allocate(&mut self, gpu: &GpuContext, num_particles: usize) -> SimulationResult<()> {
        check_capacity(num_particles, self.max_particles)?;
        let (mirrors, readback) = Self::create_device_storage(gpu, num_particles)?;

        for old in &self.mirrors {
            old.buffer().destroy();
        }
        self.readback.buffer().destroy();

        self.host = Arc::new(ParticleArray::zeroed(num_particles));
        self.mirrors = mirrors;
        self.readback = readback;
        self.parity = MirrorSlot::A;
        self.generation += 1;

        log::info!("Allocated particle storage for {num_particles} particles");
        Ok(())
    }

    /// Scatters `num_particles` particles at rest over `[-extent/2, extent/2)²`
    /// and copies that snapshot into both mirrors.
    ///
    /// Reallocates first when `num_particles` differs from the current length.
    pub fn reset<R: Rng + ?Sized>(
        &mut self,
        gpu: &GpuContext,
        num_particles: usize,
        extent: f32,
        rng: &mut R,
    ) -> SimulationResult<()> {
        if num_particles != self.len() {
            self.allocate(gpu, num_particles)?;
        }

        scatter(self.host_particles_mut()?, extent, rng);
        self.upload_all(gpu)?;
        self.parity = MirrorSlot::A;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    pub fn max_particles(&self) -> usize {
        self.max_particles
    }

    /// Bumped on every reallocation so bind groups can be rebuilt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The mirror holding the latest state.
    pub fn current(&self) -> MirrorSlot {
        self.parity
    }

    /// The mirror holding the previous frame, written by the next GPU step.
    pub fn previous(&self) -> MirrorSlot {
        self.parity.other()
    }

    /// Flips the frame parity. Only call once a GPU step has completed.
    pub fn swap_parity(&mut self) {
        self.parity = self.parity.other();
    }

    pub fn set_parity(&mut self, slot: MirrorSlot) {
        self.parity = slot;
    }

    pub fn mirror(&self, slot: MirrorSlot) -> &ArrayBuffer<Particle> {
        &self.mirrors[slot.index()]
    }

    pub fn current_mirror(&self) -> &ArrayBuffer<Particle> {
        self.mirror(self.current())
    }

    /// A handle to the host array for worker threads.
    pub fn share_host(&self) -> Arc<ParticleArray> {
        Arc::clone(&self.host)
    }

    fn host_array_mut(&mut self) -> SimulationResult<&mut ParticleArray> {
        Arc::get_mut(&mut self.host).ok_or(SimulationError::HostArrayShared)
    }

    pub fn host_particles(&mut self) -> SimulationResult<&[Particle]> {
        Ok(self.host_array_mut()?.as_slice())
    }

    pub fn host_particles_mut(&mut self) -> SimulationResult<&mut [Particle]> {
        Ok(self.host_array_mut()?.as_mut_slice())
    }

    /// Replaces the host contents with `particles`, which must have the
    /// buffer's length.
    pub fn copy_into_host(&mut self, particles: &[Particle]) -> SimulationResult<()> {
        let host = self.host_particles_mut()?;
        if host.len() != particles.len() {
            return Err(SimulationError::Readback(format!(
                "expected {} particles, got {}",
                host.len(),
                particles.len()
            )));
        }
        host.copy_from_slice(particles);
        Ok(())
    }

    /// Copies the host array into `slot`.
    pub fn upload_host(&mut self, gpu: &GpuContext, slot: MirrorSlot) -> SimulationResult<()> {
        let queue = gpu.queue();
        let mirrors = &self.mirrors;
        let host = Arc::get_mut(&mut self.host).ok_or(SimulationError::HostArrayShared)?;
        mirrors[slot.index()].write(queue, host.as_slice());
        Ok(())
    }

    /// Copies the host array into both mirrors so they start identical.
    pub fn upload_all(&mut self, gpu: &GpuContext) -> SimulationResult<()> {
        self.upload_host(gpu, MirrorSlot::A)?;
        self.upload_host(gpu, MirrorSlot::B)
    }

    /// Records a copy of `slot` into the readback buffer.
    pub fn encode_readback(&self, encoder: &mut wgpu::CommandEncoder, slot: MirrorSlot) {
        if self.is_empty() {
            return;
        }
        encoder.copy_buffer_to_buffer(
            self.mirror(slot).buffer(),
            0,
            self.readback.buffer(),
            0,
            ArrayBuffer::<Particle>::byte_len(self.len()),
        );
    }

    /// Synchronously reads `slot` back to the host and returns its contents.
    pub fn read_mirror(&self, gpu: &GpuContext, slot: MirrorSlot) -> SimulationResult<Vec<Particle>> {
        let mut encoder = gpu.device().create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Particle Readback Encoder"),
        });
        self.encode_readback(&mut encoder, slot);
        gpu.queue().submit(std::iter::once(encoder.finish()));
        gpu.read_buffer(self.readback.buffer(), self.len())
    }
}
