//! Particle record and the per-particle integration kernel shared by the
//! CPU workers. The WGSL compute kernel in [`super::gpu`] mirrors
//! [`integrate`] operation for operation.

use cgmath::{InnerSpace, Vector2};
use rand::Rng;

use super::params::ForceParams;

/// Below this distance the attraction stops growing.
pub const MIN_ATTRACTION_DISTANCE: f32 = 4.0;

/// Size in bytes of one particle as laid out on the device.
pub const PARTICLE_STRIDE: u64 = std::mem::size_of::<Particle>() as u64;

/// A point particle. Seen by shaders as `vec4f(x, y, vx, vy)`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Particle {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
}

impl Particle {
    pub fn new(position: [f32; 2], velocity: [f32; 2]) -> Self {
        Self { position, velocity }
    }

    pub fn at_rest(position: [f32; 2]) -> Self {
        Self::new(position, [0.0, 0.0])
    }
}

/// Advances one particle by one explicit Euler step.
///
/// Accelerates toward the target (when attraction is active), then damps the
/// velocity, then moves the particle. The order matters: damping before
/// accelerating produces a different trajectory.
#[inline]
pub fn integrate(particle: &mut Particle, force: &ForceParams) {
    let mut position = Vector2::from(particle.position);
    let mut velocity = Vector2::from(particle.velocity);

    if force.attraction_active {
        let diff = Vector2::from(force.target) - position;
        let distance = diff.magnitude();
        // A particle sitting exactly on the target has no direction to move in.
        if distance > 0.0 {
            let direction = diff / distance;
            velocity += direction / ((1.0 / force.power) * distance.max(MIN_ATTRACTION_DISTANCE));
        }
    }

    velocity *= force.damping;
    position += velocity;

    particle.position = position.into();
    particle.velocity = velocity.into();
}

/// Applies [`integrate`] to every particle of `particles`.
pub fn integrate_slice(particles: &mut [Particle], force: &ForceParams) {
    for particle in particles {
        integrate(particle, force);
    }
}

/// Places every particle uniformly in `[-extent/2, extent/2)²` at rest.
pub fn scatter<R: Rng + ?Sized>(particles: &mut [Particle], extent: f32, rng: &mut R) {
    for particle in particles {
        let x = (rng.random::<f32>() - 0.5) * extent;
        let y = (rng.random::<f32>() - 0.5) * extent;
        *particle = Particle::at_rest([x, y]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn force(target: [f32; 2], power: f32, damping: f32, active: bool) -> ForceParams {
        ForceParams {
            target,
            power,
            damping,
            attraction_active: active,
        }
    }

    #[test]
    fn particle_is_sixteen_bytes() {
        assert_eq!(PARTICLE_STRIDE, 16);
    }

    #[test]
    fn accelerates_then_damps_then_moves() {
        let mut particle = Particle::at_rest([10.0, 0.0]);
        integrate(&mut particle, &force([0.0, 0.0], 10.0, 0.5, true));

        // accel = -1, damped to -0.5, position 10 - 0.5
        assert!((particle.velocity[0] + 0.5).abs() < 1e-6);
        assert!((particle.position[0] - 9.5).abs() < 1e-6);
        assert_eq!(particle.velocity[1], 0.0);
    }

    #[test]
    fn attraction_is_clamped_near_target() {
        let mut near = Particle::at_rest([1.0, 0.0]);
        integrate(&mut near, &force([0.0, 0.0], 8.0, 1.0, true));

        // k / max(1, 4) = 2 toward the target
        assert!((near.velocity[0] + 2.0).abs() < 1e-6);
    }

    #[test]
    fn inactive_attraction_only_damps() {
        let mut particle = Particle::new([0.0, 0.0], [2.0, -4.0]);
        integrate(&mut particle, &force([100.0, 100.0], 10.0, 0.5, false));

        assert_eq!(particle.velocity, [1.0, -2.0]);
        assert_eq!(particle.position, [1.0, -2.0]);
    }

    #[test]
    fn particle_on_target_stays_finite() {
        let mut particle = Particle::at_rest([3.0, 3.0]);
        integrate(&mut particle, &force([3.0, 3.0], 10.0, 0.998, true));

        assert!(particle.position.iter().all(|v| v.is_finite()));
        assert_eq!(particle.velocity, [0.0, 0.0]);
    }

    #[test]
    fn scatter_stays_inside_extent() {
        let mut particles = vec![Particle::new([9.0, 9.0], [1.0, 1.0]); 2048];
        let mut rng = StdRng::seed_from_u64(7);
        scatter(&mut particles, 1000.0, &mut rng);

        for p in &particles {
            assert_eq!(p.velocity, [0.0, 0.0]);
            assert!(p.position[0] >= -500.0 && p.position[0] < 500.0);
            assert!(p.position[1] >= -500.0 && p.position[1] < 500.0);
        }
    }
}
